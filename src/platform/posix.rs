//! POSIX calls shared by the Linux and macOS backends

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus as ChildStatus};
use nix::unistd::Pid as NixPid;

use crate::config;
use crate::core::status::{self, NativeStatus};
use crate::core::{Error, Result, UserIdentity, WaitStatus};
use crate::Pid;

/// Existence check used as the liveness probe. Never goes through status
/// translation.
pub fn pid_exists(pid: Pid) -> bool {
    if pid < 0 {
        return false;
    }
    if pid == 0 {
        // kill(0, 0) would target our own process group
        return true;
    }
    match signal::kill(NixPid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn errno_error(pid: Pid, errno: Errno, operation: &'static str) -> Error {
    status::translate(pid, NativeStatus::Errno(errno as i32), operation, &pid_exists)
}

pub fn priority(pid: Pid) -> Result<i32> {
    Errno::clear();
    // SAFETY: plain syscall; -1 is a valid result so errno decides.
    let value = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
    if value == -1 && Errno::last_raw() != 0 {
        return Err(errno_error(pid, Errno::last(), "getpriority"));
    }
    Ok(value)
}

pub fn set_priority(pid: Pid, value: i32) -> Result<()> {
    // SAFETY: plain syscall.
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, value) };
    if ret == -1 {
        return Err(errno_error(pid, Errno::last(), "setpriority"));
    }
    Ok(())
}

pub fn send_signal(pid: Pid, sig: Signal) -> Result<()> {
    signal::kill(NixPid::from_raw(pid), sig).map_err(|errno| errno_error(pid, errno, "kill"))
}

/// Resolve a uid to an account name. A uid with no passwd entry is reported
/// as access denied, like an unmappable SID on Windows.
pub fn username(pid: Pid, uid: u32) -> Result<UserIdentity> {
    match users::get_user_by_uid(uid) {
        Some(user) => Ok(UserIdentity {
            domain: None,
            name: user.name().to_string_lossy().into_owned(),
        }),
        None => Err(Error::access_denied(
            pid,
            format!("uid {} has no passwd entry", uid),
        )),
    }
}

pub fn cpu_count_logical() -> Result<usize> {
    // SAFETY: sysconf has no preconditions.
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if count < 1 {
        return Err(Error::os(
            "sysconf(_SC_NPROCESSORS_ONLN)",
            NativeStatus::last_os_error(),
        ));
    }
    Ok(count as usize)
}

/// Exit-wait without a wait descriptor: reap the process if it is our child,
/// otherwise poll for its disappearance with a growing delay.
pub fn wait_polling(pid: Pid, timeout: Option<Duration>) -> Result<WaitStatus> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut delay = config::WAIT_POLL_MIN;
    loop {
        match waitpid(NixPid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(ChildStatus::Exited(_, code)) => return Ok(WaitStatus::Exited(code)),
            Ok(ChildStatus::Signaled(_, sig, _)) => return Ok(WaitStatus::Signaled(sig as i32)),
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                if !pid_exists(pid) {
                    return Ok(WaitStatus::Gone);
                }
            }
            Err(errno) => return Err(errno_error(pid, errno, "waitpid")),
        }

        let mut sleep = delay;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut {
                    pid,
                    timeout: timeout.unwrap_or_default(),
                });
            }
            sleep = sleep.min(deadline - now);
        }
        std::thread::sleep(sleep);
        delay = (delay * 2).min(config::WAIT_POLL_MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_exists() {
        assert!(pid_exists(std::process::id() as Pid));
        assert!(pid_exists(0));
        assert!(!pid_exists(-1));
        assert!(!pid_exists(Pid::MAX));
    }

    #[test]
    fn test_priority_of_self() {
        let me = std::process::id() as Pid;
        let nice = priority(me).unwrap();
        assert!((-20..=20).contains(&nice));
    }

    #[test]
    fn test_signal_to_missing_process() {
        let err = send_signal(Pid::MAX, Signal::SIGCONT).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_username_of_root() {
        let user = username(1, 0).unwrap();
        assert_eq!(user.name, "root");
        assert_eq!(user.domain, None);
    }

    #[test]
    fn test_unknown_uid_is_access_denied() {
        let err = username(1, u32::MAX - 7).unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_cpu_count() {
        assert!(cpu_count_logical().unwrap() >= 1);
    }
}
