//! Per-process queries
//!
//! Each function acquires the smallest capability it needs, runs one native
//! query and releases everything before returning. pid 0 is never
//! queryable: every function here except [`pid_exists`] rejects it with
//! `AccessDenied`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::{
    CpuTimes, Error, IoCounters, IoPriority, MemoryInfo, MemoryRegion, OpenFile, Result,
    ThreadTimes, UserIdentity, WaitStatus,
};
use crate::platform;
use crate::Pid;

fn queryable(pid: Pid) -> Result<()> {
    if pid == 0 {
        return Err(Error::idle_process());
    }
    Ok(())
}

/// Whether a process with this pid currently exists. Never fails; a process
/// we may not inspect still exists.
pub fn pid_exists(pid: Pid) -> bool {
    platform::pid_exists(pid)
}

/// Short process name (the image file name on Windows, `comm` on Linux).
pub fn name(pid: Pid) -> Result<String> {
    queryable(pid)?;
    platform::name(pid)
}

/// Absolute path of the executable. Empty for processes without an image
/// (kernel threads, the Windows System process).
pub fn exe(pid: Pid) -> Result<PathBuf> {
    queryable(pid)?;
    platform::exe(pid)
}

pub fn cmdline(pid: Pid) -> Result<Vec<String>> {
    queryable(pid)?;
    platform::cmdline(pid)
}

pub fn environ(pid: Pid) -> Result<HashMap<String, String>> {
    queryable(pid)?;
    platform::environ(pid)
}

pub fn cwd(pid: Pid) -> Result<PathBuf> {
    queryable(pid)?;
    platform::cwd(pid)
}

/// CPU time consumed and the creation timestamp.
pub fn times(pid: Pid) -> Result<CpuTimes> {
    queryable(pid)?;
    platform::times(pid)
}

pub fn memory_info(pid: Pid) -> Result<MemoryInfo> {
    queryable(pid)?;
    platform::memory_info(pid)
}

/// Unique set size in bytes: memory that would be freed if the process
/// exited now.
pub fn memory_uss(pid: Pid) -> Result<u64> {
    queryable(pid)?;
    platform::memory_uss(pid)
}

pub fn memory_maps(pid: Pid) -> Result<Vec<MemoryRegion>> {
    queryable(pid)?;
    platform::memory_maps(pid)
}

pub fn io_counters(pid: Pid) -> Result<IoCounters> {
    queryable(pid)?;
    platform::io_counters(pid)
}

/// Nice value on Unix, priority class on Windows.
pub fn priority(pid: Pid) -> Result<i32> {
    queryable(pid)?;
    platform::priority(pid)
}

pub fn set_priority(pid: Pid, value: i32) -> Result<()> {
    queryable(pid)?;
    platform::set_priority(pid, value)
}

pub fn io_priority(pid: Pid) -> Result<IoPriority> {
    queryable(pid)?;
    platform::io_priority(pid)
}

pub fn set_io_priority(pid: Pid, priority: IoPriority) -> Result<()> {
    queryable(pid)?;
    platform::set_io_priority(pid, priority)
}

/// CPU indices the process may run on, ascending.
pub fn cpu_affinity(pid: Pid) -> Result<Vec<usize>> {
    queryable(pid)?;
    platform::cpu_affinity(pid)
}

pub fn set_cpu_affinity(pid: Pid, cpus: &[usize]) -> Result<()> {
    queryable(pid)?;
    platform::set_cpu_affinity(pid, cpus)
}

/// Open handles (Windows) or file descriptors (Unix).
pub fn num_handles(pid: Pid) -> Result<usize> {
    queryable(pid)?;
    platform::num_handles(pid)
}

/// Regular files the process holds open.
pub fn open_files(pid: Pid) -> Result<Vec<OpenFile>> {
    queryable(pid)?;
    platform::open_files(pid)
}

/// Per-thread CPU times. Threads that exit during the walk are left out.
pub fn threads(pid: Pid) -> Result<Vec<ThreadTimes>> {
    queryable(pid)?;
    platform::threads(pid)
}

/// True when every thread of the process is suspended. A process with no
/// visible threads is not suspended.
pub fn is_suspended(pid: Pid) -> Result<bool> {
    queryable(pid)?;
    platform::is_suspended(pid)
}

pub fn suspend(pid: Pid) -> Result<()> {
    queryable(pid)?;
    platform::suspend(pid)
}

pub fn resume(pid: Pid) -> Result<()> {
    queryable(pid)?;
    platform::resume(pid)
}

/// Terminate with `SIGTERM` (Unix) or exit code 15 (Windows). A process
/// that exits between acquisition and the kill is not an error.
pub fn kill(pid: Pid) -> Result<()> {
    queryable(pid)?;
    platform::kill(pid)
}

/// Block until the process exits or `timeout` elapses (`None` waits
/// forever).
///
/// A pid that does not exist when the call starts (including a child
/// reaped by an earlier `wait`) is `NotFound`. Otherwise returns the exit
/// code when it can be retrieved, and [`WaitStatus::Gone`] when the process
/// disappeared during the wait without one (it was not our child).
pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<WaitStatus> {
    queryable(pid)?;
    tracing::trace!(pid, ?timeout, "waiting for exit");
    platform::wait(pid, timeout)
}

pub fn username(pid: Pid) -> Result<UserIdentity> {
    queryable(pid)?;
    platform::username(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_pid_zero_is_access_denied() {
        assert_eq!(name(0).unwrap_err().kind(), ErrorKind::AccessDenied);
        assert_eq!(exe(0).unwrap_err().kind(), ErrorKind::AccessDenied);
        assert_eq!(threads(0).unwrap_err().kind(), ErrorKind::AccessDenied);
        assert_eq!(kill(0).unwrap_err().kind(), ErrorKind::AccessDenied);
        assert_eq!(
            wait(0, Some(Duration::from_millis(1))).unwrap_err().kind(),
            ErrorKind::AccessDenied
        );
        assert!(pid_exists(0));
    }

    #[test]
    fn test_self_is_queryable() {
        let me = std::process::id() as Pid;
        assert!(pid_exists(me));
        assert!(!name(me).unwrap().is_empty());
        assert!(times(me).unwrap().create_time.is_some());
        assert!(memory_info(me).unwrap().rss > 0);
        assert!(!threads(me).unwrap().is_empty());
    }
}
