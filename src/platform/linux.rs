//! Linux platform implementation
//!
//! Process facts are read from /proc through the procfs crate. Control
//! operations (signals, exit-wait) go through a pidfd when the kernel has
//! `pidfd_open`, so a recycled pid is never signalled by mistake.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use procfs::process::{FDTarget, Process};
use procfs::{CurrentSI, KernelStats, ProcError};

use super::posix;
pub use super::posix::{cpu_count_logical, pid_exists, priority, set_priority};

use crate::config;
use crate::core::buffer::{self, Fill};
use crate::core::snapshot::{enumerate_owned, OwnerFilter, SnapshotEntry};
use crate::core::status::{self, errno, NativeStatus};
use crate::core::threads::{self, ThreadState};
use crate::core::{
    privilege, Access, CpuTimes, DiskIoCounters, Error, IoCounters, IoPriority, MemoryInfo,
    MemoryRegion, NetIoCounters, OpenFile, Result, SystemCpuTimes, ThreadTimes, UserIdentity,
    WaitStatus,
};
use crate::Pid;

// IO Priority constants (from linux/ioprio.h)
pub const IOPRIO_CLASS_NONE: u32 = 0;
pub const IOPRIO_CLASS_RT: u32 = 1;
pub const IOPRIO_CLASS_BE: u32 = 2;
pub const IOPRIO_CLASS_IDLE: u32 = 3;

const IOPRIO_CLASS_SHIFT: u32 = 13;
const IOPRIO_PRIO_MASK: u32 = (1 << IOPRIO_CLASS_SHIFT) - 1;
const IOPRIO_WHO_PROCESS: libc::c_int = 1;

const CAP_SYS_PTRACE: u64 = 19;

// waitid(2) id type for a pidfd (linux/wait.h)
const P_PIDFD: libc::idtype_t = 3;

#[inline]
fn ioprio_class(ioprio: u32) -> u32 {
    ioprio >> IOPRIO_CLASS_SHIFT
}

#[inline]
fn ioprio_data(ioprio: u32) -> u32 {
    ioprio & IOPRIO_PRIO_MASK
}

/// Map a procfs failure for a per-process read onto the error taxonomy.
fn proc_error(pid: Pid, operation: &'static str, err: ProcError) -> Error {
    match err {
        ProcError::NotFound(_) => Error::not_found(pid, operation),
        ProcError::PermissionDenied(_) => status::translate(
            pid,
            NativeStatus::Errno(errno::EACCES),
            operation,
            &pid_exists,
        ),
        ProcError::Io(err, _) => io_error(pid, operation, err),
        ProcError::Incomplete(_) if !pid_exists(pid) => Error::not_found(pid, operation),
        other => Error::malformed(operation, other.to_string()),
    }
}

/// Map a procfs failure for a system-wide read.
fn sys_error(operation: &'static str, err: ProcError) -> Error {
    match err {
        ProcError::Io(err, _) => match NativeStatus::from_io(&err) {
            Some(status) => Error::os(operation, status),
            None => Error::malformed(operation, err.to_string()),
        },
        other => Error::malformed(operation, other.to_string()),
    }
}

fn io_error(pid: Pid, operation: &'static str, err: std::io::Error) -> Error {
    match NativeStatus::from_io(&err) {
        Some(status) => status::translate(pid, status, operation, &pid_exists),
        None => Error::malformed(operation, err.to_string()),
    }
}

/// Reference to one process: the `/proc/<pid>` directory and, for control
/// operations, a pidfd. Both are closed on drop.
pub struct ProcessHandle {
    pid: Pid,
    process: Process,
    pidfd: Option<OwnedFd>,
}

impl ProcessHandle {
    pub fn open(pid: Pid, access: Access) -> Result<Self> {
        if pid == 0 {
            return Err(Error::idle_process());
        }
        if access.intersects(Access::QUERY | Access::VM_READ) {
            privilege::ensure();
        }
        let process = Process::new(pid).map_err(|e| proc_error(pid, "open /proc/<pid>", e))?;
        let pidfd = if access.needs_control() {
            open_pidfd(pid)?
        } else {
            None
        };
        Ok(ProcessHandle {
            pid,
            process,
            pidfd,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        let Some(pidfd) = &self.pidfd else {
            return posix::send_signal(self.pid, sig);
        };
        // SAFETY: valid pidfd, null siginfo, no flags.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_pidfd_send_signal,
                pidfd.as_raw_fd(),
                sig as libc::c_int,
                std::ptr::null::<libc::siginfo_t>(),
                0 as libc::c_uint,
            )
        };
        if ret == -1 {
            return Err(posix::errno_error(
                self.pid,
                Errno::last(),
                "pidfd_send_signal",
            ));
        }
        Ok(())
    }
}

fn open_pidfd(pid: Pid) -> Result<Option<OwnedFd>> {
    // SAFETY: plain syscall; the returned fd is owned by us.
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0 as libc::c_uint) };
    if fd >= 0 {
        // SAFETY: fd was just returned by the kernel and is not shared.
        return Ok(Some(unsafe { OwnedFd::from_raw_fd(fd as RawFd) }));
    }
    match Errno::last() {
        Errno::ENOSYS => {
            tracing::debug!(pid, "pidfd_open unavailable, signalling by pid");
            Ok(None)
        }
        errno => Err(posix::errno_error(pid, errno, "pidfd_open")),
    }
}

/// Enabled when running as root or holding CAP_SYS_PTRACE.
pub fn acquire_debug_privilege() -> bool {
    if nix::unistd::geteuid().is_root() {
        return true;
    }
    Process::myself()
        .and_then(|me| me.status())
        .map(|status| status.capeff & (1 << CAP_SYS_PTRACE) != 0)
        .unwrap_or(false)
}

fn ticks(value: u64, ticks_per_second: u64) -> Duration {
    Duration::from_secs_f64(value as f64 / ticks_per_second.max(1) as f64)
}

/// Every process under /proc as (pid, ppid). Processes that exit between the
/// directory listing and the stat read are dropped.
fn process_snapshot() -> Result<impl Iterator<Item = SnapshotEntry>> {
    let all = procfs::process::all_processes().map_err(|e| sys_error("read /proc", e))?;
    Ok(all
        .filter_map(|process| process.ok()?.stat().ok())
        .map(|stat| SnapshotEntry {
            id: stat.pid,
            owner: stat.ppid,
        }))
}

/// Threads of one process as (tid, pid).
fn task_snapshot(handle: &ProcessHandle) -> Result<impl Iterator<Item = SnapshotEntry>> {
    let tasks = handle
        .process
        .tasks()
        .map_err(|e| proc_error(handle.pid, "read /proc/<pid>/task", e))?;
    Ok(tasks.filter_map(|task| task.ok()).map(|task| SnapshotEntry {
        id: task.tid,
        owner: task.pid,
    }))
}

fn task_stat(handle: &ProcessHandle, tid: Pid) -> Result<procfs::process::Stat> {
    handle
        .process
        .task_from_tid(tid)
        .and_then(|task| task.stat())
        .map_err(|e| proc_error(tid, "read /proc/<pid>/task/<tid>/stat", e))
}

pub fn pids() -> Result<Vec<Pid>> {
    let all = procfs::process::all_processes().map_err(|e| sys_error("read /proc", e))?;
    Ok(all.filter_map(|process| process.ok()).map(|p| p.pid()).collect())
}

pub fn ppid_map() -> Result<HashMap<Pid, Pid>> {
    Ok(enumerate_owned(process_snapshot()?, OwnerFilter::All)
        .map(|entry| (entry.id, entry.owner))
        .collect())
}

pub fn name(pid: Pid) -> Result<String> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let stat = handle
        .process
        .stat()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/stat", e))?;
    Ok(stat.comm)
}

/// Kernel threads have no executable; their exe link reads as ENOENT while
/// the process is alive, which is reported as an empty path.
pub fn exe(pid: Pid) -> Result<PathBuf> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    match handle.process.exe() {
        Ok(path) => Ok(path),
        Err(ProcError::NotFound(_)) if pid_exists(pid) => Ok(PathBuf::new()),
        Err(e) => Err(proc_error(pid, "readlink /proc/<pid>/exe", e)),
    }
}

pub fn cmdline(pid: Pid) -> Result<Vec<String>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    handle
        .process
        .cmdline()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/cmdline", e))
}

pub fn environ(pid: Pid) -> Result<HashMap<String, String>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let environ = handle
        .process
        .environ()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/environ", e))?;
    Ok(environ
        .into_iter()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect())
}

pub fn cwd(pid: Pid) -> Result<PathBuf> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    handle
        .process
        .cwd()
        .map_err(|e| proc_error(pid, "readlink /proc/<pid>/cwd", e))
}

pub fn times(pid: Pid) -> Result<CpuTimes> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let stat = handle
        .process
        .stat()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/stat", e))?;
    let tps = procfs::ticks_per_second();
    let started = chrono::Duration::milliseconds((stat.starttime * 1000 / tps.max(1)) as i64);
    Ok(CpuTimes {
        user: ticks(stat.utime, tps),
        system: ticks(stat.stime, tps),
        create_time: Some(boot_time()? + started),
    })
}

pub fn memory_info(pid: Pid) -> Result<MemoryInfo> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let stat = handle
        .process
        .stat()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/stat", e))?;
    let status = handle
        .process
        .status()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/status", e))?;
    Ok(MemoryInfo {
        rss: stat.rss * procfs::page_size(),
        vms: stat.vsize,
        peak_rss: status.vmhwm.map(|kb| kb * 1024),
        page_faults: Some(stat.minflt + stat.majflt),
        private: None,
    })
}

/// Parse the numeric field of an smaps line like "Private_Dirty:   12 kB".
fn parse_kb_value(line: &str) -> Option<u64> {
    line.split_once(':')?
        .1
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
}

/// Unique set size: the kernel's Private_* counters (pages mapped exactly
/// once). Falls back to the full smaps when smaps_rollup is unavailable.
pub fn memory_uss(pid: Pid) -> Result<u64> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let rollup = format!("/proc/{}/smaps_rollup", handle.pid());
    let file = match File::open(&rollup) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && pid_exists(pid) => {
            File::open(format!("/proc/{}/smaps", pid))
                .map_err(|e| io_error(pid, "open /proc/<pid>/smaps", e))?
        }
        Err(err) => return Err(io_error(pid, "open /proc/<pid>/smaps_rollup", err)),
    };

    let mut private_kb = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_error(pid, "read /proc/<pid>/smaps", e))?;
        if line.starts_with("Private_") {
            private_kb += parse_kb_value(&line).unwrap_or(0);
        }
    }
    Ok(private_kb * 1024)
}

/// Maps format: address perms offset dev inode pathname
/// Example: 7f1234-7f5678 r-xp 00000000 08:01 12345 /lib/libc.so.6
fn parse_maps_line(line: &str) -> Option<MemoryRegion> {
    let mut parts = line.split_whitespace();
    let (start, end) = parts.next()?.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let perms = parts.next()?;
    // offset, dev, inode
    parts.nth(2)?;
    let path = parts.collect::<Vec<_>>().join(" ");
    Some(MemoryRegion {
        base: start,
        size: end.saturating_sub(start),
        protection: perms.to_string(),
        path: (!path.is_empty()).then(|| PathBuf::from(path)),
    })
}

pub fn memory_maps(pid: Pid) -> Result<Vec<MemoryRegion>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let file = File::open(format!("/proc/{}/maps", handle.pid()))
        .map_err(|e| io_error(pid, "open /proc/<pid>/maps", e))?;
    let mut regions = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_error(pid, "read /proc/<pid>/maps", e))?;
        if let Some(region) = parse_maps_line(&line) {
            regions.push(region);
        }
    }
    Ok(regions)
}

pub fn io_counters(pid: Pid) -> Result<IoCounters> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let io = handle
        .process
        .io()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/io", e))?;
    Ok(IoCounters {
        read_count: io.syscr,
        write_count: io.syscw,
        read_bytes: io.read_bytes,
        write_bytes: io.write_bytes,
        other_count: None,
        other_bytes: None,
    })
}

pub fn io_priority(pid: Pid) -> Result<IoPriority> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    // SAFETY: plain syscall.
    let ret = unsafe { libc::syscall(libc::SYS_ioprio_get, IOPRIO_WHO_PROCESS, handle.pid()) };
    if ret < 0 {
        return Err(posix::errno_error(pid, Errno::last(), "ioprio_get"));
    }
    let ioprio = ret as u32;
    Ok(IoPriority {
        class: ioprio_class(ioprio),
        data: ioprio_data(ioprio),
    })
}

pub fn set_io_priority(pid: Pid, priority: IoPriority) -> Result<()> {
    if priority.class > IOPRIO_CLASS_IDLE || priority.data >= 8 {
        return Err(Error::os(
            "ioprio_set",
            NativeStatus::Errno(errno::EINVAL),
        ));
    }
    let handle = ProcessHandle::open(pid, Access::SET_INFORMATION)?;
    let ioprio = (priority.class << IOPRIO_CLASS_SHIFT) | priority.data;
    // SAFETY: plain syscall.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_ioprio_set,
            IOPRIO_WHO_PROCESS,
            handle.pid(),
            ioprio as libc::c_int,
        )
    };
    if ret < 0 {
        return Err(posix::errno_error(pid, Errno::last(), "ioprio_set"));
    }
    Ok(())
}

/// CPU indices set in a kernel cpu mask.
fn cpus_from_mask(mask: &[u8]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .flat_map(|(byte, bits)| {
            (0..8)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| byte * 8 + bit)
        })
        .collect()
}

/// Kernel cpu mask for a list of CPU indices, padded to whole longs.
fn mask_from_cpus(cpus: &[usize]) -> Vec<u8> {
    let highest = cpus.iter().copied().max().unwrap_or(0);
    let long = std::mem::size_of::<libc::c_ulong>();
    let len = (highest / 8 + 1).div_ceil(long) * long;
    let mut mask = vec![0u8; len];
    for &cpu in cpus {
        mask[cpu / 8] |= 1 << (cpu % 8);
    }
    mask
}

/// The kernel rejects a mask shorter than its cpumask with EINVAL, so the
/// size is discovered through the buffer protocol.
pub fn cpu_affinity(pid: Pid) -> Result<Vec<usize>> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let buffer = buffer::query_growable(pid, &config::CPU_SET, &pid_exists, |buf| {
        // SAFETY: buf is valid for buf.len() bytes.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_sched_getaffinity,
                handle.pid(),
                buf.len(),
                buf.as_mut_ptr(),
            )
        };
        if ret >= 0 {
            return Fill::Complete(ret as usize);
        }
        match Errno::last() {
            Errno::EINVAL => Fill::TooSmall { required: None },
            errno => Fill::Failed(NativeStatus::Errno(errno as i32)),
        }
    })?;
    Ok(cpus_from_mask(buffer.bytes()))
}

pub fn set_cpu_affinity(pid: Pid, cpus: &[usize]) -> Result<()> {
    let limit = config::CPU_SET.ceiling * 8;
    if cpus.is_empty() || cpus.iter().any(|&cpu| cpu >= limit) {
        return Err(Error::os(
            "sched_setaffinity",
            NativeStatus::Errno(errno::EINVAL),
        ));
    }
    let handle = ProcessHandle::open(pid, Access::SET_INFORMATION)?;
    let mask = mask_from_cpus(cpus);
    // SAFETY: mask is valid for mask.len() bytes.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_sched_setaffinity,
            handle.pid(),
            mask.len(),
            mask.as_ptr(),
        )
    };
    if ret < 0 {
        return Err(posix::errno_error(pid, Errno::last(), "sched_setaffinity"));
    }
    Ok(())
}

pub fn num_handles(pid: Pid) -> Result<usize> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    handle
        .process
        .fd_count()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/fd", e))
}

/// Regular files only; descriptors closed during the walk are skipped.
pub fn open_files(pid: Pid) -> Result<Vec<OpenFile>> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    let fds = handle
        .process
        .fd()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/fd", e))?;
    let mut files = Vec::new();
    for fd in fds {
        let fd = match fd {
            Ok(fd) => fd,
            Err(ProcError::NotFound(_)) => continue,
            Err(e) => return Err(proc_error(pid, "readlink /proc/<pid>/fd/<fd>", e)),
        };
        if let FDTarget::Path(path) = fd.target {
            if path.is_file() {
                files.push(OpenFile {
                    path,
                    fd: fd.fd as i64,
                });
            }
        }
    }
    Ok(files)
}

pub fn threads(pid: Pid) -> Result<Vec<ThreadTimes>> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let tps = procfs::ticks_per_second();
    enumerate_owned(task_snapshot(&handle)?, OwnerFilter::Owner(pid))
        .details(|entry| {
            let stat = task_stat(&handle, entry.id)?;
            Ok(ThreadTimes {
                id: entry.id,
                user: ticks(stat.utime, tps),
                system: ticks(stat.stime, tps),
            })
        })
        .collect_alive(pid, &pid_exists)
}

pub fn is_suspended(pid: Pid) -> Result<bool> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let states = enumerate_owned(task_snapshot(&handle)?, OwnerFilter::Owner(pid))
        .details(|entry| Ok(ThreadState::from_proc_state(task_stat(&handle, entry.id)?.state)))
        .collect_alive(pid, &pid_exists)?;
    Ok(threads::all_suspended(states))
}

pub fn suspend(pid: Pid) -> Result<()> {
    ProcessHandle::open(pid, Access::SUSPEND_RESUME)?.signal(Signal::SIGSTOP)
}

pub fn resume(pid: Pid) -> Result<()> {
    ProcessHandle::open(pid, Access::SUSPEND_RESUME)?.signal(Signal::SIGCONT)
}

/// Send the termination signal. A process that disappears after it was
/// acquired has terminated, which is what was asked for.
pub fn kill(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::TERMINATE)?;
    let sig = Signal::try_from(config::TERMINATE_SIGNAL)
        .map_err(|errno| Error::os("kill", NativeStatus::Errno(errno as i32)))?;
    match handle.signal(sig) {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

fn poll_readable(fd: &OwnedFd, timeout: Option<Duration>) -> std::result::Result<bool, Errno> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let wait_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                left.as_micros().div_ceil(1000).min(i32::MAX as u128) as libc::c_int
            }
        };
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd.
        match unsafe { libc::poll(&mut pfd, 1, wait_ms) } {
            -1 => match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(errno),
            },
            0 => return Ok(false),
            _ => return Ok(true),
        }
    }
}

/// Collect the exit status once the pidfd signalled exit. Only a parent can
/// reap; for anyone else the status is gone.
fn reap(pid: Pid, pidfd: &OwnedFd) -> Result<WaitStatus> {
    // SAFETY: siginfo_t is plain data.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: valid pidfd and out pointer.
        let ret = unsafe {
            libc::waitid(
                P_PIDFD,
                pidfd.as_raw_fd() as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOHANG,
            )
        };
        if ret == 0 {
            break;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            Errno::ECHILD => return Ok(WaitStatus::Gone),
            errno => return Err(posix::errno_error(pid, errno, "waitid")),
        }
    }
    // SAFETY: waitid filled the SIGCHLD fields.
    let status = unsafe { info.si_status() };
    Ok(match info.si_code {
        libc::CLD_EXITED => WaitStatus::Exited(status),
        libc::CLD_KILLED | libc::CLD_DUMPED => WaitStatus::Signaled(status),
        _ => WaitStatus::Gone,
    })
}

pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<WaitStatus> {
    let handle = ProcessHandle::open(pid, Access::SYNCHRONIZE)?;
    let Some(pidfd) = handle.pidfd.as_ref() else {
        return posix::wait_polling(pid, timeout);
    };
    let exited = poll_readable(pidfd, timeout)
        .map_err(|errno| posix::errno_error(pid, errno, "poll(pidfd)"))?;
    if !exited {
        return Err(Error::TimedOut {
            pid,
            timeout: timeout.unwrap_or_default(),
        });
    }
    reap(pid, pidfd)
}

pub fn username(pid: Pid) -> Result<UserIdentity> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let status = handle
        .process
        .status()
        .map_err(|e| proc_error(pid, "read /proc/<pid>/status", e))?;
    posix::username(pid, status.ruid)
}

pub fn boot_time() -> Result<DateTime<Utc>> {
    let stats = KernelStats::current().map_err(|e| sys_error("read /proc/stat", e))?;
    DateTime::from_timestamp(stats.btime as i64, 0)
        .ok_or_else(|| Error::malformed("read /proc/stat", format!("btime {}", stats.btime)))
}

pub fn cpu_times() -> Result<SystemCpuTimes> {
    let stats = KernelStats::current().map_err(|e| sys_error("read /proc/stat", e))?;
    let tps = procfs::ticks_per_second();
    let total = stats.total;
    Ok(SystemCpuTimes {
        user: ticks(total.user, tps),
        nice: ticks(total.nice, tps),
        system: ticks(total.system, tps),
        idle: ticks(total.idle, tps),
        interrupt: ticks(
            total.irq.unwrap_or(0) + total.softirq.unwrap_or(0),
            tps,
        ),
    })
}

pub fn net_io_counters() -> Result<Vec<NetIoCounters>> {
    let devices =
        procfs::net::dev_status().map_err(|e| sys_error("read /proc/net/dev", e))?;
    let mut counters: Vec<NetIoCounters> = devices
        .into_iter()
        .map(|(name, status)| NetIoCounters {
            name,
            bytes_sent: status.sent_bytes,
            bytes_recv: status.recv_bytes,
            packets_sent: status.sent_packets,
            packets_recv: status.recv_packets,
            errin: status.recv_errs,
            errout: status.sent_errs,
            dropin: status.recv_drop,
            dropout: status.sent_drop,
        })
        .collect();
    counters.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(counters)
}

/// Sector counts in /proc/diskstats are always in 512-byte units.
pub fn disk_io_counters() -> Result<Vec<DiskIoCounters>> {
    let stats = procfs::diskstats().map_err(|e| sys_error("read /proc/diskstats", e))?;
    Ok(stats
        .into_iter()
        .map(|stat| DiskIoCounters {
            name: stat.name,
            read_count: stat.reads,
            write_count: stat.writes,
            read_bytes: stat.sectors_read * 512,
            write_bytes: stat.sectors_written * 512,
            read_time: Duration::from_millis(stat.time_reading),
            write_time: Duration::from_millis(stat.time_writing),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> Pid {
        std::process::id() as Pid
    }

    #[test]
    fn test_ioprio_helpers() {
        let ioprio = (IOPRIO_CLASS_BE << IOPRIO_CLASS_SHIFT) | 4;
        assert_eq!(ioprio_class(ioprio), IOPRIO_CLASS_BE);
        assert_eq!(ioprio_data(ioprio), 4);
        assert_eq!(ioprio_class(0), IOPRIO_CLASS_NONE);
    }

    #[test]
    fn test_parse_kb_value() {
        assert_eq!(parse_kb_value("Private_Dirty:      1234 kB"), Some(1234));
        assert_eq!(parse_kb_value("Private_Clean:         0 kB"), Some(0));
        assert_eq!(parse_kb_value("7f00-7f10 r-xp"), None);
    }

    #[test]
    fn test_parse_maps_line() {
        let region =
            parse_maps_line("7f1234000-7f1235000 r-xp 00000000 08:01 12345   /lib/libc.so.6")
                .unwrap();
        assert_eq!(region.base, 0x7f1234000);
        assert_eq!(region.size, 0x1000);
        assert_eq!(region.protection, "r-xp");
        assert_eq!(region.path, Some(PathBuf::from("/lib/libc.so.6")));

        let anon = parse_maps_line("7ffd0000-7ffd2000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(anon.path, None);

        assert!(parse_maps_line("garbage").is_none());
    }

    #[test]
    fn test_cpu_masks() {
        assert_eq!(cpus_from_mask(&[0b0000_0101, 0, 0x80]), vec![0, 2, 23]);
        let mask = mask_from_cpus(&[0, 9]);
        assert_eq!(mask.len() % std::mem::size_of::<libc::c_ulong>(), 0);
        assert_eq!(mask[0], 1);
        assert_eq!(mask[1], 0b10);
    }

    #[test]
    fn test_out_of_range_cpu_is_rejected() {
        for cpu in [usize::MAX, config::CPU_SET.ceiling * 8] {
            let err = set_cpu_affinity(me(), &[0, cpu]).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Other);
        }
    }

    #[test]
    fn test_self_queries() {
        let pid = me();
        assert!(!exe(pid).unwrap().as_os_str().is_empty());
        assert!(!cmdline(pid).unwrap().is_empty());
        assert!(cwd(pid).unwrap().is_absolute());
        assert!(memory_info(pid).unwrap().rss > 0);
        assert!(memory_uss(pid).unwrap() > 0);
        assert!(!memory_maps(pid).unwrap().is_empty());
        assert!(!cpu_affinity(pid).unwrap().is_empty());
        assert!(num_handles(pid).unwrap() > 0);
        assert!(!threads(pid).unwrap().is_empty());
        assert!(!is_suspended(pid).unwrap());
        let created = times(pid).unwrap().create_time.unwrap();
        assert!(created >= boot_time().unwrap());
    }

    #[test]
    fn test_ppid_map_has_self() {
        let map = ppid_map().unwrap();
        let parent = nix::unistd::getppid().as_raw();
        assert_eq!(map.get(&me()), Some(&parent));
    }

    #[test]
    fn test_kernel_thread_exe_is_empty() {
        // kthreadd is pid 2 outside of pid namespaces
        let is_kthreadd = Process::new(2)
            .and_then(|p| p.stat())
            .map(|stat| stat.comm == "kthreadd")
            .unwrap_or(false);
        if !is_kthreadd {
            return;
        }
        match exe(2) {
            Ok(path) => assert!(path.as_os_str().is_empty()),
            Err(err) => assert!(err.is_access_denied()),
        }
    }

    #[test]
    fn test_system_counters() {
        assert!(boot_time().unwrap() < Utc::now());
        assert!(cpu_times().unwrap().idle > Duration::ZERO);
        assert!(net_io_counters().unwrap().iter().any(|c| c.name == "lo"));
        disk_io_counters().unwrap();
    }
}
