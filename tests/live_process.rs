//! Queries against real child processes

use std::io::Write;
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use psquery::{process, system, ErrorKind, IoPriority, Pid, WaitStatus};

/// A pid well past anything the OS hands out.
#[cfg(unix)]
const MISSING_PID: Pid = Pid::MAX - 1;
#[cfg(windows)]
const MISSING_PID: Pid = 0x7FFF_FFF0;

fn pid_of(child: &Child) -> Pid {
    child.id() as Pid
}

#[cfg(unix)]
fn sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
}

#[cfg(windows)]
fn sleeper() -> Child {
    Command::new("ping")
        .args(["-n", "30", "127.0.0.1"])
        .stdout(std::process::Stdio::null())
        .spawn()
        .unwrap()
}

#[cfg(unix)]
fn exit_with_42() -> Child {
    Command::new("sh").args(["-c", "exit 42"]).spawn().unwrap()
}

#[cfg(windows)]
fn exit_with_42() -> Child {
    Command::new("cmd").args(["/C", "exit 42"]).spawn().unwrap()
}

fn reap(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_missing_pid_is_not_found() {
    let pid = MISSING_PID;
    assert!(!process::pid_exists(pid));

    let results: Vec<(&str, psquery::Result<()>)> = vec![
        ("name", process::name(pid).map(drop)),
        ("exe", process::exe(pid).map(drop)),
        ("cmdline", process::cmdline(pid).map(drop)),
        ("environ", process::environ(pid).map(drop)),
        ("cwd", process::cwd(pid).map(drop)),
        ("times", process::times(pid).map(drop)),
        ("memory_info", process::memory_info(pid).map(drop)),
        ("memory_uss", process::memory_uss(pid).map(drop)),
        ("memory_maps", process::memory_maps(pid).map(drop)),
        ("io_counters", process::io_counters(pid).map(drop)),
        ("priority", process::priority(pid).map(drop)),
        ("set_priority", process::set_priority(pid, 0)),
        ("io_priority", process::io_priority(pid).map(drop)),
        (
            "set_io_priority",
            process::set_io_priority(pid, IoPriority { class: 2, data: 0 }),
        ),
        ("cpu_affinity", process::cpu_affinity(pid).map(drop)),
        ("set_cpu_affinity", process::set_cpu_affinity(pid, &[0])),
        ("num_handles", process::num_handles(pid).map(drop)),
        ("open_files", process::open_files(pid).map(drop)),
        ("threads", process::threads(pid).map(drop)),
        ("is_suspended", process::is_suspended(pid).map(drop)),
        ("suspend", process::suspend(pid)),
        ("resume", process::resume(pid)),
        ("kill", process::kill(pid)),
        (
            "wait",
            process::wait(pid, Some(Duration::from_millis(10))).map(drop),
        ),
        ("username", process::username(pid).map(drop)),
    ];
    for (operation, result) in results {
        match result {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound, "{}: {}", operation, err),
            Ok(()) => panic!("{} succeeded on a missing pid", operation),
        }
    }
}

#[test]
fn test_pid_zero_is_access_denied() {
    for err in [
        process::exe(0).unwrap_err(),
        process::cmdline(0).unwrap_err(),
        process::memory_info(0).unwrap_err(),
        process::username(0).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }
}

#[test]
fn test_wait_returns_exit_code() {
    let child = exit_with_42();
    let status = process::wait(pid_of(&child), Some(Duration::from_secs(10))).unwrap();
    assert_eq!(status, WaitStatus::Exited(42));
}

#[test]
fn test_wait_times_out() {
    let child = sleeper();
    let err = process::wait(pid_of(&child), Some(Duration::from_millis(1))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    reap(child);
}

#[test]
fn test_kill_then_wait() {
    let child = sleeper();
    let pid = pid_of(&child);
    process::kill(pid).unwrap();
    let status = process::wait(pid, Some(Duration::from_secs(10))).unwrap();
    assert!(matches!(
        status,
        WaitStatus::Exited(_) | WaitStatus::Signaled(_) | WaitStatus::Gone
    ));
    reap(child);
}

#[test]
fn test_second_wait_is_not_found() {
    let child = exit_with_42();
    let pid = pid_of(&child);
    let status = process::wait(pid, Some(Duration::from_secs(10))).unwrap();
    assert_eq!(status, WaitStatus::Exited(42));
    // release our own handle so the exited process object goes away
    drop(child);

    let err = process::wait(pid, Some(Duration::from_secs(1))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_repeated_queries_do_not_leak_handles() {
    let me = std::process::id() as Pid;
    let child = sleeper();
    let live = pid_of(&child);
    let round = || {
        process::memory_info(me).unwrap();
        process::threads(me).unwrap();
        process::times(me).unwrap();
        assert!(process::name(MISSING_PID).unwrap_err().is_not_found());
        assert!(process::threads(MISSING_PID).unwrap_err().is_not_found());
        assert!(process::wait(MISSING_PID, Some(Duration::ZERO))
            .unwrap_err()
            .is_not_found());
        let err = process::wait(live, Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    };
    // warm up lazily opened descriptors (privilege setup, logging)
    round();
    let before = process::num_handles(me).unwrap();
    for _ in 0..50 {
        round();
    }
    let after = process::num_handles(me).unwrap();
    // other test threads may hold a few descriptors at either moment
    assert!(after <= before + 8, "before={} after={}", before, after);
    reap(child);
}

#[test]
fn test_pid_list_is_stable() {
    let child = sleeper();
    let pid = pid_of(&child);
    let me = std::process::id() as Pid;

    let first = system::pids().unwrap();
    let second = system::pids().unwrap();
    assert!(first.contains(&pid));
    assert!(second.contains(&pid));

    let first = system::ppid_map().unwrap();
    let second = system::ppid_map().unwrap();
    assert_eq!(first.get(&pid), Some(&me));
    let common: Vec<Pid> = first
        .keys()
        .filter(|pid| second.contains_key(pid))
        .copied()
        .collect();
    assert!(common.contains(&pid));
    assert!(common.contains(&me));
    for pid in common {
        assert_eq!(first[&pid], second[&pid], "parent of {} changed", pid);
    }
    reap(child);
}

#[test]
fn test_suspend_resume_round_trip() {
    let child = sleeper();
    let pid = pid_of(&child);
    assert!(!process::is_suspended(pid).unwrap());

    process::suspend(pid).unwrap();
    let mut suspended = false;
    for _ in 0..100 {
        if process::is_suspended(pid).unwrap() {
            suspended = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(suspended);

    process::resume(pid).unwrap();
    let mut resumed = false;
    for _ in 0..100 {
        if !process::is_suspended(pid).unwrap() {
            resumed = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(resumed);
    reap(child);
}

#[test]
fn test_open_files_lists_temp_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"psquery").unwrap();
    let expected = file.path().canonicalize().unwrap();

    let me = std::process::id() as Pid;
    let files = process::open_files(me).unwrap();
    assert!(
        files
            .iter()
            .any(|f| f.path.canonicalize().map(|p| p == expected).unwrap_or(false)),
        "{:?} not in {:?}",
        expected,
        files
    );
}

#[test]
fn test_child_facts() {
    let child = sleeper();
    let pid = pid_of(&child);
    assert!(process::pid_exists(pid));
    assert!(process::exe(pid).unwrap().is_absolute());
    assert!(process::cmdline(pid).unwrap().iter().any(|arg| arg == "30"));
    assert!(process::times(pid).unwrap().create_time.is_some());
    assert!(!process::username(pid).unwrap().name.is_empty());
    reap(child);
}
