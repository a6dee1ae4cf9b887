//! macOS (Darwin) platform implementation
//!
//! Per-process facts come from libproc (`proc_pidinfo` and friends) and the
//! `KERN_PROCARGS2` sysctl; memory and thread details need a Mach task port,
//! which `task_for_pid` only hands out to privileged callers.

use libc::{c_int, c_void, size_t};
use std::collections::HashMap;
use std::ffi::CStr;
use std::mem;
use std::path::PathBuf;
use std::ptr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mach2::kern_return::{kern_return_t, KERN_SUCCESS};
use mach2::mach_port::mach_port_deallocate;
use mach2::message::mach_msg_type_number_t;
use mach2::port::mach_port_t;
use mach2::task::task_threads;
use mach2::traps::{mach_task_self, task_for_pid};
use mach2::vm::{mach_vm_deallocate, mach_vm_region};
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};
use nix::errno::Errno;
use nix::sys::signal::Signal;

use super::posix;
pub use super::posix::{cpu_count_logical, pid_exists, priority, set_priority};

use crate::config;
use crate::core::buffer::{self, Fill};
use crate::core::snapshot::{enumerate_owned, OwnerFilter, SnapshotEntry};
use crate::core::status::{self, NativeStatus, Probing};
use crate::core::{
    privilege, Access, CpuTimes, DiskIoCounters, Error, IoCounters, IoPriority, MemoryInfo,
    MemoryRegion, NetIoCounters, OpenFile, Result, SystemCpuTimes, ThreadTimes, UserIdentity,
    WaitStatus,
};
use crate::Pid;

// sysctl MIB constants
const CTL_KERN: c_int = 1;
const KERN_ARGMAX: c_int = 8;
const KERN_BOOTTIME: c_int = 21;
const KERN_PROCARGS2: c_int = 49;

// Host statistics
const HOST_CPU_LOAD_INFO: c_int = 3;
const CPU_STATE_USER: usize = 0;
const CPU_STATE_SYSTEM: usize = 1;
const CPU_STATE_IDLE: usize = 2;
const CPU_STATE_NICE: usize = 3;
const CPU_STATE_MAX: usize = 4;

// proc_pidinfo flavors
const PROC_PIDLISTFDS: c_int = 1;
const PROC_PIDTBSDINFO: c_int = 3;
const PROC_PIDTASKINFO: c_int = 4;
const PROC_PIDVNODEPATHINFO: c_int = 9;
const PROC_PIDFDVNODEPATHINFO: c_int = 2;
const PROX_FDTYPE_VNODE: u32 = 1;

const MAXPATHLEN: usize = 1024;
const PROC_PIDPATHINFO_MAXSIZE: usize = 4 * MAXPATHLEN;

// sys/proc.h
const SSTOP: u32 = 4;

// Mach VM regions
const VM_REGION_BASIC_INFO_64: c_int = 9;
const VM_REGION_TOP_INFO: c_int = 12;
const SM_COW: u8 = 1;
const SM_PRIVATE: u8 = 2;
const SM_LARGE_PAGE: u8 = 6;
const VM_PROT_READ: i32 = 1;
const VM_PROT_WRITE: i32 = 2;
const VM_PROT_EXECUTE: i32 = 4;

const THREAD_BASIC_INFO: c_int = 3;

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct ProcBsdInfo {
    pbi_flags: u32,
    pbi_status: u32,
    pbi_xstatus: u32,
    pbi_pid: u32,
    pbi_ppid: u32,
    pbi_uid: u32,
    pbi_gid: u32,
    pbi_ruid: u32,
    pbi_rgid: u32,
    pbi_svuid: u32,
    pbi_svgid: u32,
    _reserved: u32,
    pbi_comm: [u8; 16],
    pbi_name: [u8; 32],
    pbi_nfiles: u32,
    pbi_pgid: u32,
    pbi_pjobc: u32,
    e_tdev: u32,
    e_tpgid: u32,
    pbi_nice: i32,
    pbi_start_tvsec: u64,
    pbi_start_tvusec: u64,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct ProcTaskInfo {
    pti_virtual_size: u64,
    pti_resident_size: u64,
    pti_total_user: u64,
    pti_total_system: u64,
    pti_threads_user: u64,
    pti_threads_system: u64,
    pti_policy: i32,
    pti_faults: i32,
    pti_pageins: i32,
    pti_cow_faults: i32,
    pti_messages_sent: i32,
    pti_messages_received: i32,
    pti_syscalls_mach: i32,
    pti_syscalls_unix: i32,
    pti_csw: i32,
    pti_threadnum: i32,
    pti_numrunning: i32,
    pti_priority: i32,
}

/// vnode_info_path from sys/proc_info.h; only the path is decoded.
#[repr(C)]
#[derive(Clone, Copy)]
struct VnodeInfoPath {
    _vip_vi: [u8; 152],
    vip_path: [u8; MAXPATHLEN],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ProcVnodePathInfo {
    pvi_cdir: VnodeInfoPath,
    pvi_rdir: VnodeInfoPath,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ProcFileInfo {
    fi_openflags: u32,
    fi_status: u32,
    fi_offset: i64,
    fi_type: i32,
    fi_guardflags: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VnodeFdInfoWithPath {
    pfi: ProcFileInfo,
    pvip: VnodeInfoPath,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ProcFdInfo {
    proc_fd: i32,
    proc_fdtype: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct VmRegionTopInfo {
    obj_id: u32,
    ref_count: u32,
    private_pages_resident: u32,
    shared_pages_resident: u32,
    share_mode: u8,
}

#[repr(C, packed(4))]
#[derive(Default, Clone, Copy)]
struct VmRegionBasicInfo64 {
    protection: i32,
    max_protection: i32,
    inheritance: u32,
    shared: u32,
    reserved: u32,
    offset: u64,
    behavior: i32,
    user_wired_count: u16,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct TimeValue {
    seconds: i32,
    microseconds: i32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct ThreadBasicInfo {
    user_time: TimeValue,
    system_time: TimeValue,
    cpu_usage: i32,
    policy: i32,
    run_state: i32,
    flags: i32,
    suspend_count: i32,
    sleep_time: i32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct HostCpuLoadInfo {
    cpu_ticks: [u32; CPU_STATE_MAX],
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct MachTimebaseInfo {
    numer: u32,
    denom: u32,
}

extern "C" {
    fn mach_host_self() -> mach_port_t;
    fn host_statistics(host: mach_port_t, flavor: c_int, info: *mut c_void, count: *mut u32) -> c_int;
    fn thread_info(
        thread: mach_port_t,
        flavor: c_int,
        info: *mut c_int,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
    fn mach_timebase_info(info: *mut MachTimebaseInfo) -> kern_return_t;
}

// libproc functions
extern "C" {
    fn proc_listallpids(buffer: *mut c_void, buffersize: c_int) -> c_int;
    fn proc_pidinfo(
        pid: c_int,
        flavor: c_int,
        arg: u64,
        buffer: *mut c_void,
        buffersize: c_int,
    ) -> c_int;
    fn proc_pidfdinfo(
        pid: c_int,
        fd: c_int,
        flavor: c_int,
        buffer: *mut c_void,
        buffersize: c_int,
    ) -> c_int;
    fn proc_pidpath(pid: c_int, buffer: *mut c_void, buffersize: u32) -> c_int;
    fn proc_regionfilename(pid: c_int, address: u64, buffer: *mut c_void, buffersize: u32)
        -> c_int;
}

fn c_string(bytes: &[u8]) -> String {
    CStr::from_bytes_until_nul(bytes)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

/// `proc_pidinfo` into a fixed-size struct. A short or failed read with the
/// process gone is `NotFound`.
fn pidinfo<T: Copy>(pid: Pid, flavor: c_int, operation: &'static str) -> Result<T> {
    // SAFETY: only used with plain-data repr(C) structs.
    let mut value: T = unsafe { mem::zeroed() };
    let size = mem::size_of::<T>() as c_int;
    Errno::clear();
    // SAFETY: value is valid for size bytes.
    let ret = unsafe { proc_pidinfo(pid, flavor, 0, &mut value as *mut T as *mut c_void, size) };
    if ret <= 0 {
        return Err(status::resolve(
            pid,
            NativeStatus::Errno(Errno::last_raw()),
            operation,
            &pid_exists,
            Probing::Always,
        ));
    }
    if ret < size {
        return Err(Error::malformed(
            operation,
            format!("short read: {} of {} bytes", ret, size),
        ));
    }
    Ok(value)
}

fn sysctl<T: Copy>(mib: &[c_int], operation: &'static str) -> Result<T> {
    // SAFETY: only used with plain-data types.
    let mut value: T = unsafe { mem::zeroed() };
    let mut size = mem::size_of::<T>() as size_t;
    // SAFETY: value is valid for size bytes.
    let ret = unsafe {
        libc::sysctl(
            mib.as_ptr() as *mut c_int,
            mib.len() as u32,
            &mut value as *mut T as *mut c_void,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(Error::os(operation, NativeStatus::last_os_error()));
    }
    Ok(value)
}

/// Mach task port for a process, released on drop.
struct TaskPort(mach_port_t);

impl Drop for TaskPort {
    fn drop(&mut self) {
        // SAFETY: we own one send right on this port.
        unsafe {
            mach_port_deallocate(mach_task_self(), self.0);
        }
    }
}

/// Reference to one process: its BSD info, read at acquisition, and a task
/// port when memory access was requested.
pub struct ProcessHandle {
    pid: Pid,
    bsd: ProcBsdInfo,
    task: Option<TaskPort>,
}

impl ProcessHandle {
    pub fn open(pid: Pid, access: Access) -> Result<Self> {
        if pid == 0 {
            return Err(Error::idle_process());
        }
        let bsd = pidinfo::<ProcBsdInfo>(pid, PROC_PIDTBSDINFO, "proc_pidinfo(PROC_PIDTBSDINFO)")?;
        let task = if access.needs_memory() {
            privilege::ensure();
            Some(open_task(pid)?)
        } else {
            None
        };
        Ok(ProcessHandle { pid, bsd, task })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn task(&self) -> Result<mach_port_t> {
        self.task
            .as_ref()
            .map(|t| t.0)
            .ok_or_else(|| Error::access_denied(self.pid, "no task port"))
    }
}

fn open_task(pid: Pid) -> Result<TaskPort> {
    let mut port: mach_port_t = 0;
    // SAFETY: out pointer is valid.
    let kr = unsafe { task_for_pid(mach_task_self(), pid, &mut port) };
    if kr != KERN_SUCCESS {
        return Err(status::translate(
            pid,
            NativeStatus::Kern(kr),
            "task_for_pid",
            &pid_exists,
        ));
    }
    Ok(TaskPort(port))
}

pub fn acquire_debug_privilege() -> bool {
    libproc::proc_pid::am_root()
}

fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

pub fn pids() -> Result<Vec<Pid>> {
    let policy = config::PID_LIST.named("proc_listallpids");
    let buffer = buffer::query_growable_system(&policy, |buf| {
        // SAFETY: buf is valid for buf.len() bytes.
        let ret = unsafe { proc_listallpids(buf.as_mut_ptr() as *mut c_void, buf.len() as c_int) };
        if ret <= 0 {
            return Fill::Failed(NativeStatus::last_os_error());
        }
        let bytes = ret as usize * mem::size_of::<Pid>();
        // a full buffer may have been truncated
        if bytes >= buf.len() {
            Fill::TooSmall { required: None }
        } else {
            Fill::Complete(bytes)
        }
    })?;
    let count = buffer.valid() / mem::size_of::<Pid>();
    Ok((0..count)
        .filter_map(|i| buffer.read::<Pid>(i * mem::size_of::<Pid>()))
        .collect())
}

/// Every process as (pid, ppid); processes gone before their BSD info was
/// read are dropped.
fn bsd_snapshot() -> Result<impl Iterator<Item = SnapshotEntry>> {
    Ok(pids()?.into_iter().filter_map(|pid| {
        let info =
            pidinfo::<ProcBsdInfo>(pid, PROC_PIDTBSDINFO, "proc_pidinfo(PROC_PIDTBSDINFO)").ok()?;
        Some(SnapshotEntry {
            id: pid,
            owner: info.pbi_ppid as Pid,
        })
    }))
}

pub fn ppid_map() -> Result<HashMap<Pid, Pid>> {
    Ok(enumerate_owned(bsd_snapshot()?, OwnerFilter::All)
        .map(|entry| (entry.id, entry.owner))
        .collect())
}

pub fn name(pid: Pid) -> Result<String> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let name = c_string(&handle.bsd.pbi_name);
    if name.is_empty() {
        return Ok(c_string(&handle.bsd.pbi_comm));
    }
    Ok(name)
}

pub fn exe(pid: Pid) -> Result<PathBuf> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let mut buf = vec![0u8; PROC_PIDPATHINFO_MAXSIZE];
    Errno::clear();
    // SAFETY: buf is valid for its length.
    let ret = unsafe {
        proc_pidpath(
            handle.pid(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len() as u32,
        )
    };
    if ret <= 0 {
        return Err(status::resolve(
            pid,
            NativeStatus::Errno(Errno::last_raw()),
            "proc_pidpath",
            &pid_exists,
            Probing::Always,
        ));
    }
    buf.truncate(ret as usize);
    Ok(PathBuf::from(c_string(&buf)))
}

/// Raw `KERN_PROCARGS2` area, sized by `KERN_ARGMAX`.
fn procargs(pid: Pid) -> Result<Vec<u8>> {
    let argmax = sysctl::<c_int>(&[CTL_KERN, KERN_ARGMAX], "sysctl(KERN_ARGMAX)")?;
    let mut size = argmax.max(0) as size_t;
    let mut buf = vec![0u8; size];
    let mib = [CTL_KERN, KERN_PROCARGS2, pid];
    // SAFETY: buf is valid for size bytes.
    let ret = unsafe {
        libc::sysctl(
            mib.as_ptr() as *mut c_int,
            mib.len() as u32,
            buf.as_mut_ptr() as *mut c_void,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if ret < 0 {
        let errno = Errno::last();
        if !pid_exists(pid) {
            return Err(Error::not_found(pid, "sysctl(KERN_PROCARGS2)"));
        }
        return Err(match errno {
            // zombie
            Errno::EINVAL => {
                tracing::debug!(pid, "KERN_PROCARGS2 EINVAL reported as NotFound");
                Error::not_found(pid, "sysctl(KERN_PROCARGS2) -> EINVAL")
            }
            Errno::EIO => {
                tracing::debug!(pid, "KERN_PROCARGS2 EIO reported as AccessDenied");
                Error::access_denied(pid, "sysctl(KERN_PROCARGS2) -> EIO")
            }
            errno => posix::errno_error(pid, errno, "sysctl(KERN_PROCARGS2)"),
        });
    }
    buf.truncate(size);
    Ok(buf)
}

/// Split a `KERN_PROCARGS2` area.
/// Layout: argc (int) | exec_path | \0+ | argv[0] \0 ... argv[argc-1] \0 | env \0 ... | \0
fn parse_procargs(buf: &[u8]) -> Result<(Vec<String>, HashMap<String, String>)> {
    const OP: &str = "sysctl(KERN_PROCARGS2)";
    let header = buf
        .get(..mem::size_of::<c_int>())
        .ok_or_else(|| Error::malformed(OP, "argument area shorter than argc"))?;
    let argc = c_int::from_ne_bytes([header[0], header[1], header[2], header[3]]).max(0) as usize;
    let rest = &buf[mem::size_of::<c_int>()..];

    // skip the exec path and its NUL padding
    let Some(path_end) = rest.iter().position(|&b| b == 0) else {
        return Ok((Vec::new(), HashMap::new()));
    };
    let start = rest[path_end..]
        .iter()
        .position(|&b| b != 0)
        .map(|p| path_end + p)
        .unwrap_or(rest.len());

    let mut fields = rest[start..].split(|&b| b == 0);
    let args = fields
        .by_ref()
        .take(argc)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();

    let mut env = HashMap::new();
    for entry in fields {
        if entry.is_empty() {
            break;
        }
        let entry = String::from_utf8_lossy(entry);
        if let Some((key, value)) = entry.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }
    Ok((args, env))
}

pub fn cmdline(pid: Pid) -> Result<Vec<String>> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    let (args, _) = parse_procargs(&procargs(handle.pid())?)?;
    Ok(args)
}

pub fn environ(pid: Pid) -> Result<HashMap<String, String>> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    let (_, env) = parse_procargs(&procargs(handle.pid())?)?;
    Ok(env)
}

pub fn cwd(pid: Pid) -> Result<PathBuf> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    let info = pidinfo::<ProcVnodePathInfo>(
        handle.pid(),
        PROC_PIDVNODEPATHINFO,
        "proc_pidinfo(PROC_PIDVNODEPATHINFO)",
    )?;
    Ok(PathBuf::from(c_string(&info.pvi_cdir.vip_path)))
}

/// Mach absolute time units to a duration.
fn mach_time(value: u64) -> Duration {
    let mut timebase = MachTimebaseInfo::default();
    // SAFETY: out pointer is valid.
    let kr = unsafe { mach_timebase_info(&mut timebase) };
    if kr != KERN_SUCCESS || timebase.denom == 0 {
        return Duration::from_nanos(value);
    }
    let nanos = value as u128 * timebase.numer as u128 / timebase.denom as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

pub fn times(pid: Pid) -> Result<CpuTimes> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let task = pidinfo::<ProcTaskInfo>(pid, PROC_PIDTASKINFO, "proc_pidinfo(PROC_PIDTASKINFO)")?;
    let create_time = DateTime::from_timestamp(
        handle.bsd.pbi_start_tvsec as i64,
        (handle.bsd.pbi_start_tvusec * 1000) as u32,
    );
    Ok(CpuTimes {
        user: mach_time(task.pti_total_user),
        system: mach_time(task.pti_total_system),
        create_time,
    })
}

pub fn memory_info(pid: Pid) -> Result<MemoryInfo> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let task = pidinfo::<ProcTaskInfo>(
        handle.pid(),
        PROC_PIDTASKINFO,
        "proc_pidinfo(PROC_PIDTASKINFO)",
    )?;
    Ok(MemoryInfo {
        rss: task.pti_resident_size,
        vms: task.pti_virtual_size,
        peak_rss: None,
        page_faults: Some(task.pti_faults.max(0) as u64),
        private: None,
    })
}

/// Walk the task's regions with one flavor of `mach_vm_region`, calling
/// `visit(address, size, info)` for each.
fn walk_regions<T: Copy + Default>(
    pid: Pid,
    task: mach_port_t,
    flavor: c_int,
    mut visit: impl FnMut(u64, u64, &T),
) -> Result<()> {
    let mut address: mach_vm_address_t = 0;
    loop {
        let mut size: mach_vm_size_t = 0;
        let mut info = T::default();
        let mut count = (mem::size_of::<T>() / mem::size_of::<c_int>()) as mach_msg_type_number_t;
        let mut object_name: mach_port_t = 0;
        // SAFETY: all out pointers are valid; info is sized by count.
        let kr = unsafe {
            mach_vm_region(
                task,
                &mut address,
                &mut size,
                flavor,
                &mut info as *mut T as *mut c_int,
                &mut count,
                &mut object_name,
            )
        };
        match kr {
            KERN_SUCCESS => {}
            // KERN_INVALID_ADDRESS: past the last region
            1 => return Ok(()),
            kr => {
                return Err(status::translate(
                    pid,
                    NativeStatus::Kern(kr),
                    "mach_vm_region",
                    &pid_exists,
                ))
            }
        }
        visit(address, size, &info);
        address = address.saturating_add(size);
    }
}

/// Private regions, plus copy-on-write regions nobody else references.
pub fn memory_uss(pid: Pid) -> Result<u64> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let mut private_pages = 0u64;
    walk_regions::<VmRegionTopInfo>(pid, handle.task()?, VM_REGION_TOP_INFO, |_, _, info| {
        let mode = if info.share_mode == SM_COW && info.ref_count == 1 {
            SM_PRIVATE
        } else {
            info.share_mode
        };
        match mode {
            SM_PRIVATE | SM_LARGE_PAGE => {
                private_pages +=
                    info.private_pages_resident as u64 + info.shared_pages_resident as u64;
            }
            SM_COW => private_pages += info.private_pages_resident as u64,
            _ => {}
        }
    })?;
    Ok(private_pages * page_size())
}

fn protection_string(prot: i32) -> String {
    let flag = |bit: i32, c: char| if prot & bit != 0 { c } else { '-' };
    [
        flag(VM_PROT_READ, 'r'),
        flag(VM_PROT_WRITE, 'w'),
        flag(VM_PROT_EXECUTE, 'x'),
    ]
    .iter()
    .collect()
}

fn region_filename(pid: Pid, address: u64) -> Option<PathBuf> {
    let mut buf = vec![0u8; MAXPATHLEN];
    // SAFETY: buf is valid for its length.
    let ret = unsafe {
        proc_regionfilename(pid, address, buf.as_mut_ptr() as *mut c_void, buf.len() as u32)
    };
    if ret <= 0 {
        return None;
    }
    buf.truncate(ret as usize);
    Some(PathBuf::from(c_string(&buf)))
}

pub fn memory_maps(pid: Pid) -> Result<Vec<MemoryRegion>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let mut regions = Vec::new();
    walk_regions::<VmRegionBasicInfo64>(
        pid,
        handle.task()?,
        VM_REGION_BASIC_INFO_64,
        |address, size, info| {
            let protection = info.protection;
            regions.push(MemoryRegion {
                base: address,
                size,
                protection: protection_string(protection),
                path: region_filename(pid, address),
            });
        },
    )?;
    Ok(regions)
}

/// Facts the kernel does not expose. The pid is still resolved first so an
/// absent process reports `NotFound` like every other query.
fn unsupported<T>(pid: Pid, fact: &'static str) -> Result<T> {
    ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    Err(Error::Unsupported(fact))
}

pub fn io_counters(pid: Pid) -> Result<IoCounters> {
    unsupported(pid, "io_counters")
}

pub fn io_priority(pid: Pid) -> Result<IoPriority> {
    unsupported(pid, "io_priority")
}

pub fn set_io_priority(pid: Pid, _priority: IoPriority) -> Result<()> {
    unsupported(pid, "set_io_priority")
}

pub fn cpu_affinity(pid: Pid) -> Result<Vec<usize>> {
    unsupported(pid, "cpu_affinity")
}

pub fn set_cpu_affinity(pid: Pid, _cpus: &[usize]) -> Result<()> {
    unsupported(pid, "set_cpu_affinity")
}

fn list_fds(handle: &ProcessHandle) -> Result<Vec<ProcFdInfo>> {
    let pid = handle.pid();
    let buffer = buffer::query_growable(pid, &config::FD_LIST, &pid_exists, |buf| {
        Errno::clear();
        // SAFETY: buf is valid for buf.len() bytes.
        let ret = unsafe {
            proc_pidinfo(
                pid,
                PROC_PIDLISTFDS,
                0,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as c_int,
            )
        };
        if ret < 0 || (ret == 0 && Errno::last_raw() != 0) {
            return Fill::Failed(NativeStatus::Errno(Errno::last_raw()));
        }
        let bytes = ret as usize;
        if bytes >= buf.len() {
            Fill::TooSmall { required: None }
        } else {
            Fill::Complete(bytes)
        }
    })?;
    let entry = mem::size_of::<ProcFdInfo>();
    Ok((0..buffer.valid() / entry)
        .filter_map(|i| buffer.read::<ProcFdInfo>(i * entry))
        .collect())
}

pub fn num_handles(pid: Pid) -> Result<usize> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    Ok(list_fds(&handle)?.len())
}

/// Regular files only; descriptors closed during the walk are skipped.
pub fn open_files(pid: Pid) -> Result<Vec<OpenFile>> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    let mut files = Vec::new();
    for fd in list_fds(&handle)? {
        if fd.proc_fdtype != PROX_FDTYPE_VNODE {
            continue;
        }
        // SAFETY: plain-data struct.
        let mut info: VnodeFdInfoWithPath = unsafe { mem::zeroed() };
        let size = mem::size_of::<VnodeFdInfoWithPath>() as c_int;
        Errno::clear();
        // SAFETY: info is valid for size bytes.
        let ret = unsafe {
            proc_pidfdinfo(
                pid,
                fd.proc_fd,
                PROC_PIDFDVNODEPATHINFO,
                &mut info as *mut _ as *mut c_void,
                size,
            )
        };
        if ret < size {
            match Errno::last() {
                Errno::EBADF | Errno::ENOENT => continue,
                errno => return Err(posix::errno_error(pid, errno, "proc_pidfdinfo")),
            }
        }
        let path = PathBuf::from(c_string(&info.pvip.vip_path));
        if path.is_file() {
            files.push(OpenFile {
                path,
                fd: fd.proc_fd as i64,
            });
        }
    }
    Ok(files)
}

/// Thread ports of a task; the ports and the array are released on drop.
struct ThreadList {
    ports: *mut mach_port_t,
    count: mach_msg_type_number_t,
}

impl ThreadList {
    fn of(pid: Pid, task: mach_port_t) -> Result<Self> {
        let mut ports: *mut mach_port_t = ptr::null_mut();
        let mut count: mach_msg_type_number_t = 0;
        // SAFETY: out pointers are valid.
        let kr = unsafe { task_threads(task, &mut ports, &mut count) };
        if kr != KERN_SUCCESS {
            return Err(status::translate(
                pid,
                NativeStatus::Kern(kr),
                "task_threads",
                &pid_exists,
            ));
        }
        Ok(ThreadList { ports, count })
    }

    fn ports(&self) -> &[mach_port_t] {
        if self.ports.is_null() {
            return &[];
        }
        // SAFETY: the kernel returned `count` ports at `ports`.
        unsafe { std::slice::from_raw_parts(self.ports, self.count as usize) }
    }
}

impl Drop for ThreadList {
    fn drop(&mut self) {
        // SAFETY: we own one right per port and the out-of-line array.
        unsafe {
            for &port in self.ports() {
                mach_port_deallocate(mach_task_self(), port);
            }
            if !self.ports.is_null() {
                mach_vm_deallocate(
                    mach_task_self(),
                    self.ports as mach_vm_address_t,
                    (self.count as usize * mem::size_of::<mach_port_t>()) as mach_vm_size_t,
                );
            }
        }
    }
}

fn thread_basic_info(owner: Pid, port: mach_port_t) -> Result<ThreadBasicInfo> {
    let mut info = ThreadBasicInfo::default();
    let mut count =
        (mem::size_of::<ThreadBasicInfo>() / mem::size_of::<c_int>()) as mach_msg_type_number_t;
    // SAFETY: info is sized by count.
    let kr = unsafe {
        thread_info(
            port,
            THREAD_BASIC_INFO,
            &mut info as *mut _ as *mut c_int,
            &mut count,
        )
    };
    if kr != KERN_SUCCESS {
        // the thread terminated since task_threads
        return Err(Error::not_found(owner, "thread_info"));
    }
    Ok(info)
}

fn time_value(t: TimeValue) -> Duration {
    Duration::from_secs(t.seconds.max(0) as u64) + Duration::from_micros(t.microseconds.max(0) as u64)
}

pub fn threads(pid: Pid) -> Result<Vec<ThreadTimes>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let list = ThreadList::of(pid, handle.task()?)?;
    let ports = list.ports();
    let snapshot = (0..ports.len()).map(|i| SnapshotEntry {
        id: i as Pid + 1,
        owner: pid,
    });
    enumerate_owned(snapshot, OwnerFilter::Owner(pid))
        .details(|entry| {
            let info = thread_basic_info(pid, ports[(entry.id - 1) as usize])?;
            Ok(ThreadTimes {
                id: entry.id,
                user: time_value(info.user_time),
                system: time_value(info.system_time),
            })
        })
        .collect_alive(pid, &pid_exists)
}

pub fn is_suspended(pid: Pid) -> Result<bool> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    Ok(handle.bsd.pbi_status == SSTOP)
}

pub fn suspend(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::SUSPEND_RESUME)?;
    posix::send_signal(handle.pid(), Signal::SIGSTOP)
}

pub fn resume(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::SUSPEND_RESUME)?;
    posix::send_signal(handle.pid(), Signal::SIGCONT)
}

pub fn kill(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::TERMINATE)?;
    let sig = Signal::try_from(config::TERMINATE_SIGNAL)
        .map_err(|errno| Error::os("kill", NativeStatus::Errno(errno as i32)))?;
    match posix::send_signal(handle.pid(), sig) {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

/// Zombies have no BSD info but still carry an exit status, so only
/// existence is checked before waiting.
pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<WaitStatus> {
    if !pid_exists(pid) {
        return Err(Error::not_found(pid, "kill(pid, 0) -> ESRCH"));
    }
    posix::wait_polling(pid, timeout)
}

pub fn username(pid: Pid) -> Result<UserIdentity> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    posix::username(pid, handle.bsd.pbi_ruid)
}

pub fn boot_time() -> Result<DateTime<Utc>> {
    let tv = sysctl::<libc::timeval>(&[CTL_KERN, KERN_BOOTTIME], "sysctl(KERN_BOOTTIME)")?;
    DateTime::from_timestamp(tv.tv_sec, (tv.tv_usec.max(0) as u32) * 1000)
        .ok_or_else(|| Error::malformed("sysctl(KERN_BOOTTIME)", format!("tv_sec {}", tv.tv_sec)))
}

pub fn cpu_times() -> Result<SystemCpuTimes> {
    let mut load = HostCpuLoadInfo::default();
    let mut count = (mem::size_of::<HostCpuLoadInfo>() / mem::size_of::<u32>()) as u32;
    // SAFETY: load is sized by count.
    let kr = unsafe {
        host_statistics(
            mach_host_self(),
            HOST_CPU_LOAD_INFO,
            &mut load as *mut _ as *mut c_void,
            &mut count,
        )
    };
    if kr != KERN_SUCCESS {
        return Err(Error::os("host_statistics(HOST_CPU_LOAD_INFO)", NativeStatus::Kern(kr)));
    }
    // SAFETY: sysconf has no preconditions.
    let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as f64;
    let secs = |ticks: u32| Duration::from_secs_f64(ticks as f64 / tck);
    Ok(SystemCpuTimes {
        user: secs(load.cpu_ticks[CPU_STATE_USER]),
        nice: secs(load.cpu_ticks[CPU_STATE_NICE]),
        system: secs(load.cpu_ticks[CPU_STATE_SYSTEM]),
        idle: secs(load.cpu_ticks[CPU_STATE_IDLE]),
        interrupt: Duration::ZERO,
    })
}

pub fn net_io_counters() -> Result<Vec<NetIoCounters>> {
    let mut ifaddrs: *mut libc::ifaddrs = ptr::null_mut();
    // SAFETY: out pointer is valid; freed below.
    if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
        return Err(Error::os("getifaddrs", NativeStatus::last_os_error()));
    }
    let mut counters = Vec::new();
    let mut cursor = ifaddrs;
    while !cursor.is_null() {
        // SAFETY: cursor walks the list returned by getifaddrs.
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;
        if ifa.ifa_addr.is_null() || ifa.ifa_data.is_null() {
            continue;
        }
        // SAFETY: non-null sockaddr from getifaddrs.
        if unsafe { (*ifa.ifa_addr).sa_family } as c_int != libc::AF_LINK {
            continue;
        }
        // SAFETY: AF_LINK entries carry a struct if_data.
        let data = unsafe { &*(ifa.ifa_data as *const libc::if_data) };
        // SAFETY: ifa_name is a NUL-terminated string.
        let name = unsafe { CStr::from_ptr(ifa.ifa_name) }
            .to_string_lossy()
            .into_owned();
        counters.push(NetIoCounters {
            name,
            bytes_sent: data.ifi_obytes as u64,
            bytes_recv: data.ifi_ibytes as u64,
            packets_sent: data.ifi_opackets as u64,
            packets_recv: data.ifi_ipackets as u64,
            errin: data.ifi_ierrors as u64,
            errout: data.ifi_oerrors as u64,
            dropin: data.ifi_iqdrops as u64,
            dropout: 0,
        });
    }
    // SAFETY: list returned by getifaddrs.
    unsafe { libc::freeifaddrs(ifaddrs) };
    counters.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(counters)
}

pub fn disk_io_counters() -> Result<Vec<DiskIoCounters>> {
    Err(Error::Unsupported("disk_io_counters"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procargs_area(argc: i32, exec: &str, args: &[&str], env: &[&str]) -> Vec<u8> {
        let mut buf = argc.to_ne_bytes().to_vec();
        buf.extend_from_slice(exec.as_bytes());
        buf.extend_from_slice(&[0, 0, 0]);
        for field in args.iter().chain(env) {
            buf.extend_from_slice(field.as_bytes());
            buf.push(0);
        }
        buf.push(0);
        buf
    }

    #[test]
    fn test_parse_procargs() {
        let area = procargs_area(
            2,
            "/bin/sleep",
            &["sleep", "5"],
            &["HOME=/Users/me", "TERM=xterm"],
        );
        let (args, env) = parse_procargs(&area).unwrap();
        assert_eq!(args, vec!["sleep", "5"]);
        assert_eq!(env.get("HOME").map(String::as_str), Some("/Users/me"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_parse_procargs_truncated() {
        assert!(parse_procargs(&[1, 0]).is_err());
        let (args, env) = parse_procargs(&1i32.to_ne_bytes()).unwrap();
        assert!(args.is_empty());
        assert!(env.is_empty());
    }

    #[test]
    fn test_protection_string() {
        assert_eq!(protection_string(VM_PROT_READ | VM_PROT_EXECUTE), "r-x");
        assert_eq!(protection_string(0), "---");
    }

    #[test]
    fn test_self_queries() {
        let me = std::process::id() as Pid;
        assert!(exe(me).unwrap().is_absolute());
        assert!(!cmdline(me).unwrap().is_empty());
        assert!(memory_info(me).unwrap().rss > 0);
        assert!(num_handles(me).unwrap() > 0);
        assert!(!is_suspended(me).unwrap());
        assert!(pids().unwrap().contains(&me));
    }
}
