//! Windows platform implementation
//!
//! Documented Win32 calls where they exist; the NT native API (see
//! `windows_nt`) for the image path, command line, working set, process
//! table, handle table and suspend/resume. Environment and working
//! directory are read out of the target's PEB.

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::path::PathBuf;
use std::ptr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use windows_sys::Win32::Foundation::{
    CloseHandle, DuplicateHandle, GetLastError, LocalFree, DUPLICATE_SAME_ACCESS, FILETIME,
    HANDLE, INVALID_HANDLE_VALUE, LUID, UNICODE_STRING,
};
use windows_sys::Win32::NetworkManagement::IpHelper::{FreeMibTable, GetIfTable2, MIB_IF_TABLE2};
use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, GetTokenInformation, LookupAccountSidW, LookupPrivilegeValueW,
    TokenUser, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, SID_NAME_USE, TOKEN_ADJUST_PRIVILEGES,
    TOKEN_PRIVILEGES, TOKEN_QUERY, TOKEN_USER,
};
use windows_sys::Win32::Storage::FileSystem::{
    GetFileType, GetFinalPathNameByHandleW, QueryDosDeviceW, FILE_TYPE_DISK, VOLUME_NAME_DOS,
};
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, Thread32First, Thread32Next,
    PROCESSENTRY32W, TH32CS_SNAPPROCESS, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows_sys::Win32::System::Memory::{VirtualQueryEx, MEMORY_BASIC_INFORMATION};
use windows_sys::Win32::System::ProcessStatus::{
    EnumProcesses, GetMappedFileNameW, GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS,
    PROCESS_MEMORY_COUNTERS_EX,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, GetTickCount64, SYSTEM_INFO};
use windows_sys::Win32::System::Threading::{
    GetActiveProcessorCount, GetCurrentProcess, GetExitCodeProcess, GetPriorityClass,
    GetProcessAffinityMask, GetProcessHandleCount, GetProcessIoCounters, GetProcessTimes,
    GetThreadTimes, OpenProcess, OpenProcessToken, OpenThread, SetPriorityClass,
    SetProcessAffinityMask, TerminateProcess, WaitForSingleObject, IO_COUNTERS,
    PROCESS_DUP_HANDLE, PROCESS_QUERY_INFORMATION, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_SET_INFORMATION, PROCESS_SUSPEND_RESUME, PROCESS_SYNCHRONIZE, PROCESS_TERMINATE,
    PROCESS_VM_READ, THREAD_QUERY_LIMITED_INFORMATION,
};
use windows_sys::Win32::UI::Shell::CommandLineToArgvW;

use super::windows_nt as nt;
use crate::config;
use crate::core::buffer::{self, Fill, GrowableBuffer};
use crate::core::memory::{self, WorkingSetPage};
use crate::core::snapshot::{enumerate_owned, OwnerFilter, SnapshotEntry};
use crate::core::status::{self, ntstatus, win32, NativeStatus};
use crate::core::threads::{self, ThreadState};
use crate::core::{
    privilege, Access, CpuTimes, DiskIoCounters, Error, IoCounters, IoPriority, MemoryInfo,
    MemoryRegion, NetIoCounters, OpenFile, Result, SystemCpuTimes, ThreadTimes, UserIdentity,
    WaitStatus,
};
use crate::Pid;

/// Priority classes accepted by [`crate::process::set_priority`] on Windows.
pub mod priority_class {
    pub const IDLE: i32 = 0x0000_0040;
    pub const BELOW_NORMAL: i32 = 0x0000_4000;
    pub const NORMAL: i32 = 0x0000_0020;
    pub const ABOVE_NORMAL: i32 = 0x0000_8000;
    pub const HIGH: i32 = 0x0000_0080;
    pub const REALTIME: i32 = 0x0000_0100;
}

const STILL_ACTIVE: u32 = 259;
const INFINITE: u32 = 0xFFFF_FFFF;
const WAIT_OBJECT_0: u32 = 0;
const WAIT_ABANDONED: u32 = 0x80;
const WAIT_TIMEOUT: u32 = 0x102;
const ALL_PROCESSOR_GROUPS: u16 = 0xFFFF;
const MAX_PATH: usize = 260;

// FILETIME epoch (1601-01-01) to Unix epoch, in 100ns ticks
const EPOCH_DIFFERENCE: u64 = 116_444_736_000_000_000;

fn last_error() -> NativeStatus {
    // SAFETY: no preconditions.
    NativeStatus::Win32(unsafe { GetLastError() })
}

fn win32_error(pid: Pid, operation: &'static str) -> Error {
    status::translate(pid, last_error(), operation, &pid_exists)
}

fn nt_error(pid: Pid, status: i32, operation: &'static str) -> Error {
    status::translate(pid, NativeStatus::NtStatus(status), operation, &pid_exists)
}

fn wide_to_string(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn filetime_ticks(ft: &FILETIME) -> u64 {
    ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(100))
}

fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    let since_unix = ticks.checked_sub(EPOCH_DIFFERENCE)?;
    DateTime::from_timestamp(
        (since_unix / 10_000_000) as i64,
        ((since_unix % 10_000_000) * 100) as u32,
    )
}

/// An owned kernel handle, closed on drop.
struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: we own this handle.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn native_rights(access: Access) -> u32 {
    let mut rights = 0;
    if access.contains(Access::QUERY_LIMITED) {
        rights |= PROCESS_QUERY_LIMITED_INFORMATION;
    }
    if access.contains(Access::QUERY) {
        rights |= PROCESS_QUERY_INFORMATION;
    }
    if access.contains(Access::VM_READ) {
        rights |= PROCESS_VM_READ;
    }
    if access.contains(Access::TERMINATE) {
        rights |= PROCESS_TERMINATE;
    }
    if access.contains(Access::SUSPEND_RESUME) {
        rights |= PROCESS_SUSPEND_RESUME;
    }
    if access.contains(Access::SET_INFORMATION) {
        rights |= PROCESS_SET_INFORMATION;
    }
    if access.contains(Access::DUP_HANDLE) {
        rights |= PROCESS_DUP_HANDLE;
    }
    if access.contains(Access::SYNCHRONIZE) {
        rights |= PROCESS_SYNCHRONIZE;
    }
    rights
}

/// A process handle opened with a given access mask.
pub struct ProcessHandle {
    pid: Pid,
    handle: OwnedHandle,
}

impl ProcessHandle {
    /// Open `pid` and confirm it has not already exited; a handle to an
    /// exited process can stay valid while its object lingers.
    pub fn open(pid: Pid, access: Access) -> Result<Self> {
        let handle = Self::open_unchecked(pid, access)?;
        let mut code = 0u32;
        // SAFETY: valid handle and out pointer.
        if unsafe { GetExitCodeProcess(handle.raw(), &mut code) } != 0 && code != STILL_ACTIVE {
            return Err(Error::not_found(pid, "GetExitCodeProcess -> exited"));
        }
        Ok(handle)
    }

    fn open_unchecked(pid: Pid, access: Access) -> Result<Self> {
        if pid == 0 {
            return Err(Error::idle_process());
        }
        if access.intersects(Access::QUERY | Access::VM_READ) {
            privilege::ensure();
        }
        // SAFETY: plain call; null on failure.
        let raw = unsafe { OpenProcess(native_rights(access), 0, pid) };
        if raw.is_null() {
            let code = last_error();
            // OpenProcess reports an unknown pid as a bad parameter
            if code == NativeStatus::Win32(win32::ERROR_INVALID_PARAMETER) {
                return Err(Error::not_found(pid, "OpenProcess -> ERROR_INVALID_PARAMETER"));
            }
            return Err(status::translate(pid, code, "OpenProcess", &pid_exists));
        }
        Ok(ProcessHandle {
            pid,
            handle: OwnedHandle(raw),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn raw(&self) -> HANDLE {
        self.handle.raw()
    }
}

/// Enable `SeDebugPrivilege` on our own token.
pub fn acquire_debug_privilege() -> bool {
    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: pseudo handle and out pointer are valid.
    let opened = unsafe {
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
    };
    if opened == 0 {
        tracing::debug!(status = %last_error(), "OpenProcessToken failed");
        return false;
    }
    let token = OwnedHandle(token);

    let name = to_wide("SeDebugPrivilege");
    let mut luid = LUID {
        LowPart: 0,
        HighPart: 0,
    };
    // SAFETY: NUL-terminated name and valid out pointer.
    if unsafe { LookupPrivilegeValueW(ptr::null(), name.as_ptr(), &mut luid) } == 0 {
        return false;
    }
    let privileges = TOKEN_PRIVILEGES {
        PrivilegeCount: 1,
        Privileges: [LUID_AND_ATTRIBUTES {
            Luid: luid,
            Attributes: SE_PRIVILEGE_ENABLED,
        }],
    };
    // SAFETY: token is open with TOKEN_ADJUST_PRIVILEGES.
    let adjusted = unsafe {
        AdjustTokenPrivileges(
            token.raw(),
            0,
            &privileges,
            0,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    // ERROR_NOT_ALL_ASSIGNED still returns success
    adjusted != 0 && unsafe { GetLastError() } == 0
}

/// Existence check that never goes through status translation.
pub fn pid_exists(pid: Pid) -> bool {
    if pid == 0 {
        return true;
    }
    // SAFETY: plain call; null on failure.
    let raw = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if raw.is_null() {
        return match unsafe { GetLastError() } {
            win32::ERROR_INVALID_PARAMETER => false,
            win32::ERROR_ACCESS_DENIED => true,
            _ => pids().map(|all| all.contains(&pid)).unwrap_or(false),
        };
    }
    let handle = OwnedHandle(raw);
    let mut code = 0u32;
    // SAFETY: valid handle and out pointer.
    if unsafe { GetExitCodeProcess(handle.raw(), &mut code) } == 0 {
        return unsafe { GetLastError() } == win32::ERROR_ACCESS_DENIED;
    }
    code == STILL_ACTIVE
}

pub fn pids() -> Result<Vec<Pid>> {
    let buffer = buffer::query_growable_system(&config::PID_LIST, |buf| {
        let mut returned = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let ok = unsafe { EnumProcesses(buf.as_mut_ptr() as *mut u32, buf.len() as u32, &mut returned) };
        if ok == 0 {
            return Fill::Failed(last_error());
        }
        // a full buffer may have been truncated
        if returned as usize >= buf.len() {
            Fill::TooSmall { required: None }
        } else {
            Fill::Complete(returned as usize)
        }
    })?;
    let width = mem::size_of::<u32>();
    Ok((0..buffer.valid() / width)
        .filter_map(|i| buffer.read::<u32>(i * width))
        .collect())
}

/// Toolhelp snapshot of one kind; iterating yields [`SnapshotEntry`] rows
/// and the snapshot handle is closed on drop.
struct Toolhelp<E> {
    handle: OwnedHandle,
    entry: E,
    started: bool,
    first: unsafe extern "system" fn(HANDLE, *mut E) -> i32,
    next: unsafe extern "system" fn(HANDLE, *mut E) -> i32,
    row: fn(&E) -> SnapshotEntry,
}

impl<E> Iterator for Toolhelp<E> {
    type Item = SnapshotEntry;

    fn next(&mut self) -> Option<SnapshotEntry> {
        let step = if self.started { self.next } else { self.first };
        self.started = true;
        // SAFETY: entry has dwSize set and the snapshot handle is open.
        if unsafe { step(self.handle.raw(), &mut self.entry) } == 0 {
            return None;
        }
        Some((self.row)(&self.entry))
    }
}

fn toolhelp_snapshot(flags: u32) -> Result<OwnedHandle> {
    // SAFETY: plain call.
    let raw = unsafe { CreateToolhelp32Snapshot(flags, 0) };
    if raw == INVALID_HANDLE_VALUE {
        return Err(Error::os("CreateToolhelp32Snapshot", last_error()));
    }
    Ok(OwnedHandle(raw))
}

fn process_snapshot() -> Result<Toolhelp<PROCESSENTRY32W>> {
    // SAFETY: plain-data struct.
    let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;
    Ok(Toolhelp {
        handle: toolhelp_snapshot(TH32CS_SNAPPROCESS)?,
        entry,
        started: false,
        first: Process32FirstW,
        next: Process32NextW,
        row: |e| SnapshotEntry {
            id: e.th32ProcessID,
            owner: e.th32ParentProcessID,
        },
    })
}

fn thread_snapshot() -> Result<Toolhelp<THREADENTRY32>> {
    // SAFETY: plain-data struct.
    let mut entry: THREADENTRY32 = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;
    Ok(Toolhelp {
        handle: toolhelp_snapshot(TH32CS_SNAPTHREAD)?,
        entry,
        started: false,
        first: Thread32First,
        next: Thread32Next,
        row: |e| SnapshotEntry {
            id: e.th32ThreadID,
            owner: e.th32OwnerProcessID,
        },
    })
}

pub fn ppid_map() -> Result<HashMap<Pid, Pid>> {
    Ok(enumerate_owned(process_snapshot()?, OwnerFilter::All)
        .map(|entry| (entry.id, entry.owner))
        .collect())
}

/// One `NtQuerySystemInformation(SystemProcessInformation)` result.
struct ProcessTable(GrowableBuffer);

struct ProcessRecord {
    offset: usize,
    info: nt::SystemProcessInformation,
}

impl ProcessTable {
    fn query(pid: Pid) -> Result<Self> {
        let buffer = buffer::query_growable(pid, &config::PROCESS_TABLE, &pid_exists, |buf| {
            let mut needed = 0u32;
            // SAFETY: buf is valid for buf.len() bytes.
            let status = unsafe {
                nt::NtQuerySystemInformation(
                    nt::SYSTEM_PROCESS_INFORMATION,
                    buf.as_mut_ptr() as *mut c_void,
                    buf.len() as u32,
                    &mut needed,
                )
            };
            match status {
                ntstatus::STATUS_INFO_LENGTH_MISMATCH | ntstatus::STATUS_BUFFER_TOO_SMALL => {
                    Fill::TooSmall {
                        required: Some(needed as usize),
                    }
                }
                s if nt::nt_success(s) => Fill::Complete(buf.len()),
                s => Fill::Failed(NativeStatus::NtStatus(s)),
            }
        })?;
        Ok(ProcessTable(buffer))
    }

    fn find(&self, pid: Pid) -> Option<ProcessRecord> {
        let mut offset = 0usize;
        loop {
            let info = self.0.read::<nt::SystemProcessInformation>(offset)?;
            if info.unique_process_id == pid as usize {
                return Some(ProcessRecord { offset, info });
            }
            if info.next_entry_offset == 0 {
                return None;
            }
            offset += info.next_entry_offset as usize;
        }
    }

    fn threads<'a>(
        &'a self,
        record: &'a ProcessRecord,
    ) -> impl Iterator<Item = nt::SystemThreadInformation> + 'a {
        let base = record.offset + mem::size_of::<nt::SystemProcessInformation>();
        let width = mem::size_of::<nt::SystemThreadInformation>();
        (0..record.info.number_of_threads as usize)
            .map_while(move |i| self.0.read::<nt::SystemThreadInformation>(base + i * width))
    }

    /// The image name points back into the buffer itself.
    fn image_name(&self, record: &ProcessRecord) -> String {
        let start = self.0.bytes().as_ptr() as usize;
        let Some(offset) = record.info.image_name_buffer.checked_sub(start) else {
            return String::new();
        };
        let chars = record.info.image_name_length as usize / 2;
        let name: Vec<u16> = (0..chars)
            .map_while(|i| self.0.read::<u16>(offset + i * 2))
            .collect();
        String::from_utf16_lossy(&name)
    }
}

fn process_record(pid: Pid) -> Result<(ProcessTable, ProcessRecord)> {
    let table = ProcessTable::query(pid)?;
    match table.find(pid) {
        Some(record) => Ok((table, record)),
        None => Err(Error::not_found(pid, "not in SystemProcessInformation")),
    }
}

pub fn name(pid: Pid) -> Result<String> {
    if pid == 0 {
        return Err(Error::idle_process());
    }
    let (table, record) = process_record(pid)?;
    Ok(table.image_name(&record))
}

/// `\Device\HarddiskVolumeN\...` to `C:\...`; paths on no lettered volume
/// are returned unchanged.
fn dos_path(device_path: &str) -> String {
    let mut target = vec![0u16; MAX_PATH];
    for letter in b'A'..=b'Z' {
        let drive = format!("{}:", letter as char);
        let wide = to_wide(&drive);
        // SAFETY: NUL-terminated name and valid output buffer.
        let len = unsafe { QueryDosDeviceW(wide.as_ptr(), target.as_mut_ptr(), target.len() as u32) };
        if len == 0 {
            continue;
        }
        let device = wide_to_string(&target[..len as usize]);
        if let Some(rest) = device_path.strip_prefix(device.as_str()) {
            if rest.is_empty() || rest.starts_with('\\') {
                return format!("{}{}", drive, rest);
            }
        }
    }
    device_path.to_string()
}

/// Works without a process handle: the kernel answers from its own table.
pub fn exe(pid: Pid) -> Result<PathBuf> {
    if pid == 0 {
        return Err(Error::idle_process());
    }
    let mut length = 0usize;
    let mut null_buffer = false;
    let buffer = buffer::query_growable(pid, &config::IMAGE_PATH, &pid_exists, |buf| {
        let capacity = buf.len().min(u16::MAX as usize) as u16;
        let mut info = nt::SystemProcessIdInformation {
            process_id: pid as usize as HANDLE,
            image_name: UNICODE_STRING {
                Length: 0,
                MaximumLength: capacity,
                Buffer: buf.as_mut_ptr() as *mut u16,
            },
        };
        // SAFETY: info points at buf, which outlives the call.
        let status = unsafe {
            nt::NtQuerySystemInformation(
                nt::SYSTEM_PROCESS_ID_INFORMATION,
                &mut info as *mut _ as *mut c_void,
                mem::size_of::<nt::SystemProcessIdInformation>() as u32,
                ptr::null_mut(),
            )
        };
        if status == ntstatus::STATUS_INFO_LENGTH_MISMATCH {
            // WOW64 callers do not get the required size back
            let reported = info.image_name.MaximumLength as usize;
            return Fill::TooSmall {
                required: (reported > capacity as usize).then_some(reported),
            };
        }
        if !nt::nt_success(status) {
            return Fill::Failed(NativeStatus::NtStatus(status));
        }
        null_buffer = info.image_name.Buffer.is_null();
        length = info.image_name.Length as usize;
        Fill::Complete(length)
    })?;
    // the System process has no image path
    if null_buffer || length == 0 {
        return Ok(PathBuf::new());
    }
    let wide: Vec<u16> = (0..buffer.valid() / 2)
        .filter_map(|i| buffer.read::<u16>(i * 2))
        .collect();
    Ok(PathBuf::from(dos_path(&String::from_utf16_lossy(&wide))))
}

fn split_command_line(line: &[u16]) -> Result<Vec<String>> {
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let mut owned: Vec<u16> = line.to_vec();
    owned.push(0);
    let mut argc = 0i32;
    // SAFETY: NUL-terminated input; the result is freed with LocalFree.
    let argv = unsafe { CommandLineToArgvW(owned.as_ptr(), &mut argc) };
    if argv.is_null() {
        return Err(Error::os("CommandLineToArgvW", last_error()));
    }
    let mut args = Vec::with_capacity(argc.max(0) as usize);
    for i in 0..argc.max(0) as usize {
        // SAFETY: argv holds argc NUL-terminated strings.
        unsafe {
            let arg = *argv.add(i);
            let len = (0..).take_while(|&j| *arg.add(j) != 0).count();
            args.push(String::from_utf16_lossy(std::slice::from_raw_parts(arg, len)));
        }
    }
    // SAFETY: allocated by CommandLineToArgvW.
    unsafe { LocalFree(argv as *mut c_void) };
    Ok(args)
}

pub fn cmdline(pid: Pid) -> Result<Vec<String>> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let buffer = buffer::query_growable(pid, &config::COMMAND_LINE, &pid_exists, |buf| {
        let mut needed = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let status = unsafe {
            nt::NtQueryInformationProcess(
                handle.raw(),
                nt::PROCESS_COMMAND_LINE_INFORMATION,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut needed,
            )
        };
        match status {
            ntstatus::STATUS_INFO_LENGTH_MISMATCH
            | ntstatus::STATUS_BUFFER_TOO_SMALL
            | nt::STATUS_BUFFER_OVERFLOW => Fill::TooSmall {
                required: Some(needed as usize),
            },
            s if nt::nt_success(s) => Fill::Complete(buf.len()),
            s => Fill::Failed(NativeStatus::NtStatus(s)),
        }
    })?;
    // a UNICODE_STRING whose buffer follows it
    let header = mem::size_of::<UNICODE_STRING>();
    let length = buffer
        .read::<u16>(0)
        .ok_or_else(|| Error::malformed("ProcessCommandLineInformation", "empty result"))?;
    let line: Vec<u16> = (0..length as usize / 2)
        .map_while(|i| buffer.read::<u16>(header + i * 2))
        .collect();
    split_command_line(&line)
}

fn read_remote(handle: &ProcessHandle, address: usize, out: &mut [u8]) -> Result<()> {
    let mut read = 0usize;
    // SAFETY: out is valid for out.len() bytes.
    let ok = unsafe {
        ReadProcessMemory(
            handle.raw(),
            address as *const c_void,
            out.as_mut_ptr() as *mut c_void,
            out.len(),
            &mut read,
        )
    };
    if ok == 0 {
        return Err(win32_error(handle.pid(), "ReadProcessMemory"));
    }
    if read != out.len() {
        return Err(Error::malformed(
            "ReadProcessMemory",
            format!("short read: {} of {} bytes", read, out.len()),
        ));
    }
    Ok(())
}

fn read_remote_usize(handle: &ProcessHandle, address: usize) -> Result<usize> {
    let mut bytes = [0u8; mem::size_of::<usize>()];
    read_remote(handle, address, &mut bytes)?;
    Ok(usize::from_ne_bytes(bytes))
}

fn read_remote_wide(handle: &ProcessHandle, address: usize, bytes: usize) -> Result<Vec<u16>> {
    let mut raw = vec![0u8; bytes];
    read_remote(handle, address, &mut raw)?;
    Ok(raw
        .chunks_exact(2)
        .map(|c| u16::from_ne_bytes([c[0], c[1]]))
        .collect())
}

/// Address of the target's `RTL_USER_PROCESS_PARAMETERS`.
fn process_parameters(handle: &ProcessHandle) -> Result<usize> {
    let mut info = nt::ProcessBasicInformation::default();
    // SAFETY: info is valid for its size.
    let status = unsafe {
        nt::NtQueryInformationProcess(
            handle.raw(),
            nt::PROCESS_BASIC_INFORMATION,
            &mut info as *mut _ as *mut c_void,
            mem::size_of::<nt::ProcessBasicInformation>() as u32,
            ptr::null_mut(),
        )
    };
    if !nt::nt_success(status) {
        return Err(nt_error(
            handle.pid(),
            status,
            "NtQueryInformationProcess(ProcessBasicInformation)",
        ));
    }
    read_remote_usize(handle, info.peb_base_address + nt::PEB_PROCESS_PARAMETERS)
}

/// Parse a `K=V\0K=V\0\0` block. Hidden per-drive entries (`=C:=C:\`) are
/// dropped.
fn parse_environment_block(block: &[u16]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for entry in block.split(|&c| c == 0) {
        if entry.is_empty() {
            break;
        }
        let entry = String::from_utf16_lossy(entry);
        if let Some((key, value)) = entry.split_once('=') {
            if !key.is_empty() {
                env.insert(key.to_string(), value.to_string());
            }
        }
    }
    env
}

pub fn environ(pid: Pid) -> Result<HashMap<String, String>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let params = process_parameters(&handle)?;
    let address = read_remote_usize(&handle, params + nt::PARAMS_ENVIRONMENT)?;
    let size = read_remote_usize(&handle, params + nt::PARAMS_ENVIRONMENT_SIZE)?;
    if address == 0 || size == 0 {
        return Ok(HashMap::new());
    }
    let block = read_remote_wide(&handle, address, size & !1)?;
    Ok(parse_environment_block(&block))
}

fn trim_directory(mut path: String) -> String {
    // keep the root of a drive ("C:\")
    while path.len() > 3 && path.ends_with('\\') {
        path.pop();
    }
    path
}

pub fn cwd(pid: Pid) -> Result<PathBuf> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let params = process_parameters(&handle)?;
    let mut header = [0u8; mem::size_of::<UNICODE_STRING>()];
    read_remote(&handle, params + nt::PARAMS_CURRENT_DIRECTORY, &mut header)?;
    let length = u16::from_ne_bytes([header[0], header[1]]) as usize;
    let buffer = usize::from_ne_bytes(
        header[8..16]
            .try_into()
            .map_err(|_| Error::malformed("CurrentDirectory", "truncated UNICODE_STRING"))?,
    );
    if buffer == 0 || length == 0 {
        return Ok(PathBuf::new());
    }
    let wide = read_remote_wide(&handle, buffer, length)?;
    Ok(PathBuf::from(trim_directory(String::from_utf16_lossy(&wide))))
}

pub fn times(pid: Pid) -> Result<CpuTimes> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    // SAFETY: plain-data structs.
    let (mut create, mut exit, mut kernel, mut user): (FILETIME, FILETIME, FILETIME, FILETIME) =
        unsafe { mem::zeroed() };
    // SAFETY: valid handle and out pointers.
    let ok = unsafe { GetProcessTimes(handle.raw(), &mut create, &mut exit, &mut kernel, &mut user) };
    if ok == 0 {
        // usually means the process died after the open
        return Err(match last_error() {
            NativeStatus::Win32(win32::ERROR_ACCESS_DENIED) => {
                Error::not_found(pid, "GetProcessTimes -> ERROR_ACCESS_DENIED")
            }
            code => Error::os("GetProcessTimes", code),
        });
    }
    Ok(CpuTimes {
        user: ticks_to_duration(filetime_ticks(&user)),
        system: ticks_to_duration(filetime_ticks(&kernel)),
        create_time: filetime_to_utc(filetime_ticks(&create)),
    })
}

pub fn memory_info(pid: Pid) -> Result<MemoryInfo> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    // SAFETY: plain-data struct.
    let mut counters: PROCESS_MEMORY_COUNTERS_EX = unsafe { mem::zeroed() };
    // SAFETY: counters is valid for its size.
    let ok = unsafe {
        GetProcessMemoryInfo(
            handle.raw(),
            &mut counters as *mut _ as *mut PROCESS_MEMORY_COUNTERS,
            mem::size_of::<PROCESS_MEMORY_COUNTERS_EX>() as u32,
        )
    };
    if ok == 0 {
        return Err(win32_error(pid, "GetProcessMemoryInfo"));
    }
    Ok(MemoryInfo {
        rss: counters.WorkingSetSize as u64,
        vms: counters.PagefileUsage as u64,
        peak_rss: Some(counters.PeakWorkingSetSize as u64),
        page_faults: Some(counters.PageFaultCount as u64),
        private: Some(counters.PrivateUsage as u64),
    })
}

fn system_info() -> SYSTEM_INFO {
    // SAFETY: plain-data out struct.
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info
    }
}

/// Pages in the working set that only this process maps, in bytes.
pub fn memory_uss(pid: Pid) -> Result<u64> {
    let handle = ProcessHandle::open(pid, Access::QUERY)?;
    let buffer = buffer::query_growable(pid, &config::WORKING_SET, &pid_exists, |buf| {
        // SAFETY: buf is valid for buf.len() bytes.
        let status = unsafe {
            nt::NtQueryVirtualMemory(
                handle.raw(),
                ptr::null(),
                nt::MEMORY_WORKING_SET_INFORMATION,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                ptr::null_mut(),
            )
        };
        match status {
            ntstatus::STATUS_INFO_LENGTH_MISMATCH => Fill::TooSmall { required: None },
            s if nt::nt_success(s) => Fill::Complete(buf.len()),
            s => Fill::Failed(NativeStatus::NtStatus(s)),
        }
    })?;
    let width = mem::size_of::<usize>();
    let entries = buffer.read::<usize>(0).unwrap_or(0);
    let pages = (0..entries)
        .map_while(|i| buffer.read::<usize>(width + i * width))
        .map(WorkingSetPage::from_block);
    Ok(memory::count_private_pages(pages) * system_info().dwPageSize as u64)
}

fn mapped_file_name(handle: &ProcessHandle, address: *const c_void) -> Option<PathBuf> {
    let mut name = vec![0u16; MAX_PATH];
    // SAFETY: name is valid for its length in wide chars.
    let len = unsafe { GetMappedFileNameW(handle.raw(), address, name.as_mut_ptr(), name.len() as u32) };
    if len == 0 {
        return None;
    }
    Some(PathBuf::from(dos_path(&wide_to_string(&name[..len as usize]))))
}

/// File-backed regions of the address space.
pub fn memory_maps(pid: Pid) -> Result<Vec<MemoryRegion>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::VM_READ)?;
    let max_address = system_info().lpMaximumApplicationAddress as usize;
    let mut regions = Vec::new();
    let mut address = 0usize;
    loop {
        // SAFETY: plain-data struct.
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
        // SAFETY: info is valid for its size.
        let len = unsafe {
            VirtualQueryEx(
                handle.raw(),
                address as *const c_void,
                &mut info,
                mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if len == 0 || address > max_address {
            break;
        }
        if let Some(path) = mapped_file_name(&handle, address as *const c_void) {
            regions.push(MemoryRegion {
                base: address as u64,
                size: info.RegionSize as u64,
                protection: memory::protection_string(info.Protect).to_string(),
                path: Some(path),
            });
        }
        match address.checked_add(info.RegionSize) {
            Some(next) if info.RegionSize > 0 => address = next,
            _ => break,
        }
    }
    Ok(regions)
}

pub fn io_counters(pid: Pid) -> Result<IoCounters> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    // SAFETY: plain-data struct.
    let mut io: IO_COUNTERS = unsafe { mem::zeroed() };
    // SAFETY: valid handle and out pointer.
    if unsafe { GetProcessIoCounters(handle.raw(), &mut io) } == 0 {
        return Err(win32_error(pid, "GetProcessIoCounters"));
    }
    Ok(IoCounters {
        read_count: io.ReadOperationCount,
        write_count: io.WriteOperationCount,
        read_bytes: io.ReadTransferCount,
        write_bytes: io.WriteTransferCount,
        other_count: Some(io.OtherOperationCount),
        other_bytes: Some(io.OtherTransferCount),
    })
}

/// The priority class (see [`priority_class`]).
pub fn priority(pid: Pid) -> Result<i32> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    // SAFETY: valid handle.
    let class = unsafe { GetPriorityClass(handle.raw()) };
    if class == 0 {
        return Err(win32_error(pid, "GetPriorityClass"));
    }
    Ok(class as i32)
}

pub fn set_priority(pid: Pid, value: i32) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::SET_INFORMATION)?;
    // SAFETY: valid handle.
    if unsafe { SetPriorityClass(handle.raw(), value as u32) } == 0 {
        return Err(win32_error(pid, "SetPriorityClass"));
    }
    Ok(())
}

/// I/O priority hint: 0 very low, 1 low, 2 normal, 3 high. `data` is unused.
pub fn io_priority(pid: Pid) -> Result<IoPriority> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let mut value = 0u32;
    // SAFETY: value is valid for 4 bytes.
    let status = unsafe {
        nt::NtQueryInformationProcess(
            handle.raw(),
            nt::PROCESS_IO_PRIORITY,
            &mut value as *mut u32 as *mut c_void,
            mem::size_of::<u32>() as u32,
            ptr::null_mut(),
        )
    };
    if !nt::nt_success(status) {
        return Err(nt_error(pid, status, "NtQueryInformationProcess(ProcessIoPriority)"));
    }
    Ok(IoPriority {
        class: value,
        data: 0,
    })
}

pub fn set_io_priority(pid: Pid, priority: IoPriority) -> Result<()> {
    const OP: &str = "NtSetInformationProcess(ProcessIoPriority)";
    if priority.class > 3 {
        return Err(Error::os(OP, NativeStatus::NtStatus(nt::STATUS_INVALID_PARAMETER)));
    }
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::SET_INFORMATION)?;
    // SAFETY: value is valid for 4 bytes.
    let status = unsafe {
        nt::NtSetInformationProcess(
            handle.raw(),
            nt::PROCESS_IO_PRIORITY,
            &priority.class as *const u32 as *const c_void,
            mem::size_of::<u32>() as u32,
        )
    };
    if !nt::nt_success(status) {
        return Err(nt_error(pid, status, OP));
    }
    Ok(())
}

pub fn cpu_affinity(pid: Pid) -> Result<Vec<usize>> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let (mut process_mask, mut system_mask) = (0usize, 0usize);
    // SAFETY: valid handle and out pointers.
    let ok = unsafe { GetProcessAffinityMask(handle.raw(), &mut process_mask, &mut system_mask) };
    if ok == 0 {
        return Err(win32_error(pid, "GetProcessAffinityMask"));
    }
    Ok((0..usize::BITS as usize)
        .filter(|cpu| process_mask & (1 << cpu) != 0)
        .collect())
}

pub fn set_cpu_affinity(pid: Pid, cpus: &[usize]) -> Result<()> {
    const OP: &str = "SetProcessAffinityMask";
    let mut mask = 0usize;
    for &cpu in cpus {
        if cpu >= usize::BITS as usize {
            return Err(Error::os(OP, NativeStatus::NtStatus(nt::STATUS_INVALID_PARAMETER)));
        }
        mask |= 1 << cpu;
    }
    if mask == 0 {
        return Err(Error::os(OP, NativeStatus::NtStatus(nt::STATUS_INVALID_PARAMETER)));
    }
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::SET_INFORMATION)?;
    // SAFETY: valid handle.
    if unsafe { SetProcessAffinityMask(handle.raw(), mask) } == 0 {
        return Err(win32_error(pid, OP));
    }
    Ok(())
}

pub fn num_handles(pid: Pid) -> Result<usize> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let mut count = 0u32;
    // SAFETY: valid handle and out pointer.
    if unsafe { GetProcessHandleCount(handle.raw(), &mut count) } == 0 {
        return Err(win32_error(pid, "GetProcessHandleCount"));
    }
    Ok(count as usize)
}

/// Handle values the process owns, from the system-wide handle table.
fn handle_values(pid: Pid) -> Result<Vec<usize>> {
    let buffer = buffer::query_growable(pid, &config::HANDLE_TABLE, &pid_exists, |buf| {
        let mut needed = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let status = unsafe {
            nt::NtQuerySystemInformation(
                nt::SYSTEM_EXTENDED_HANDLE_INFORMATION,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut needed,
            )
        };
        match status {
            ntstatus::STATUS_INFO_LENGTH_MISMATCH => Fill::TooSmall {
                required: Some(needed as usize),
            },
            s if nt::nt_success(s) => Fill::Complete(buf.len()),
            s => Fill::Failed(NativeStatus::NtStatus(s)),
        }
    })?;
    let header = buffer
        .read::<nt::SystemExtendedHandleInformation>(0)
        .ok_or_else(|| Error::malformed(config::HANDLE_TABLE.operation, "missing header"))?;
    let first = mem::size_of::<nt::SystemExtendedHandleInformation>();
    let width = mem::size_of::<nt::SystemExtendedHandleTableEntry>();
    Ok((0..header.number_of_handles)
        .map_while(|i| buffer.read::<nt::SystemExtendedHandleTableEntry>(first + i * width))
        .filter(|entry| entry.unique_process_id == pid as usize)
        .map(|entry| entry.handle_value)
        .collect())
}

/// Path of a duplicated handle when it refers to a file on disk. Pipes and
/// other non-disk handles are skipped before the path query, which can
/// block on them.
fn disk_file_path(owner: &ProcessHandle, value: usize) -> Option<PathBuf> {
    let mut local: HANDLE = ptr::null_mut();
    // SAFETY: owner has PROCESS_DUP_HANDLE; local is a valid out pointer.
    let ok = unsafe {
        DuplicateHandle(
            owner.raw(),
            value as HANDLE,
            GetCurrentProcess(),
            &mut local,
            0,
            0,
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return None;
    }
    let local = OwnedHandle(local);
    // SAFETY: valid handle.
    if unsafe { GetFileType(local.raw()) } != FILE_TYPE_DISK {
        return None;
    }
    let mut path = vec![0u16; 0x7FFF];
    // SAFETY: path is valid for its length in wide chars.
    let len = unsafe {
        GetFinalPathNameByHandleW(local.raw(), path.as_mut_ptr(), path.len() as u32, VOLUME_NAME_DOS)
    };
    if len == 0 || len as usize >= path.len() {
        return None;
    }
    let path = wide_to_string(&path[..len as usize]);
    let path = path.strip_prefix(r"\\?\").unwrap_or(&path).to_string();
    Some(PathBuf::from(path))
}

/// Regular files only; handles closed during the walk are skipped.
pub fn open_files(pid: Pid) -> Result<Vec<OpenFile>> {
    let handle = ProcessHandle::open(pid, Access::QUERY | Access::DUP_HANDLE)?;
    let mut files = Vec::new();
    for value in handle_values(pid)? {
        if let Some(path) = disk_file_path(&handle, value) {
            if path.is_file() {
                files.push(OpenFile {
                    path,
                    fd: value as i64,
                });
            }
        }
    }
    Ok(files)
}

fn thread_times(tid: Pid) -> Result<ThreadTimes> {
    // SAFETY: plain call; null on failure.
    let raw = unsafe { OpenThread(THREAD_QUERY_LIMITED_INFORMATION, 0, tid) };
    if raw.is_null() {
        // the thread exited since the snapshot
        return Err(Error::not_found(tid, "OpenThread"));
    }
    let thread = OwnedHandle(raw);
    // SAFETY: plain-data structs.
    let (mut create, mut exit, mut kernel, mut user): (FILETIME, FILETIME, FILETIME, FILETIME) =
        unsafe { mem::zeroed() };
    // SAFETY: valid handle and out pointers.
    if unsafe { GetThreadTimes(thread.raw(), &mut create, &mut exit, &mut kernel, &mut user) } == 0 {
        return Err(Error::os("GetThreadTimes", last_error()));
    }
    Ok(ThreadTimes {
        id: tid,
        user: ticks_to_duration(filetime_ticks(&user)),
        system: ticks_to_duration(filetime_ticks(&kernel)),
    })
}

pub fn threads(pid: Pid) -> Result<Vec<ThreadTimes>> {
    if pid == 0 {
        return Err(Error::idle_process());
    }
    if !pid_exists(pid) {
        return Err(Error::not_found(pid, "pid_exists -> false"));
    }
    enumerate_owned(thread_snapshot()?, OwnerFilter::Owner(pid))
        .details(|entry| thread_times(entry.id))
        .collect_alive(pid, &pid_exists)
}

/// True when every thread waits with reason `Suspended`.
pub fn is_suspended(pid: Pid) -> Result<bool> {
    if pid == 0 {
        return Err(Error::idle_process());
    }
    let (table, record) = process_record(pid)?;
    let states = table
        .threads(&record)
        .map(|t| ThreadState::from_nt(t.thread_state, t.wait_reason));
    Ok(threads::all_suspended(states))
}

pub fn suspend(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::SUSPEND_RESUME)?;
    // SAFETY: valid handle with PROCESS_SUSPEND_RESUME.
    let status = unsafe { nt::NtSuspendProcess(handle.raw()) };
    if !nt::nt_success(status) {
        return Err(nt_error(pid, status, "NtSuspendProcess"));
    }
    Ok(())
}

pub fn resume(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::SUSPEND_RESUME)?;
    // SAFETY: valid handle with PROCESS_SUSPEND_RESUME.
    let status = unsafe { nt::NtResumeProcess(handle.raw()) };
    if !nt::nt_success(status) {
        return Err(nt_error(pid, status, "NtResumeProcess"));
    }
    Ok(())
}

/// `TerminateProcess` reports access denied for a process that is already
/// terminating; that counts as success.
pub fn kill(pid: Pid) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::TERMINATE)?;
    // SAFETY: valid handle with PROCESS_TERMINATE.
    if unsafe { TerminateProcess(handle.raw(), config::TERMINATE_SIGNAL as u32) } == 0 {
        let status = last_error();
        if status == NativeStatus::Win32(win32::ERROR_ACCESS_DENIED) {
            tracing::debug!(pid, "TerminateProcess -> ERROR_ACCESS_DENIED; treated as exited");
            return Ok(());
        }
        return Err(Error::os("TerminateProcess", status));
    }
    Ok(())
}

fn wait_millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => INFINITE,
        Some(t) => {
            let ms = t.as_nanos().div_ceil(1_000_000);
            ms.min((INFINITE - 1) as u128) as u32
        }
    }
}

pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<WaitStatus> {
    // an exited process whose object lingers still yields its exit code
    let handle = ProcessHandle::open_unchecked(pid, Access::SYNCHRONIZE | Access::QUERY_LIMITED)?;
    // SAFETY: valid handle with SYNCHRONIZE.
    match unsafe { WaitForSingleObject(handle.raw(), wait_millis(timeout)) } {
        WAIT_OBJECT_0 => {
            let mut code = 0u32;
            // SAFETY: valid handle and out pointer.
            if unsafe { GetExitCodeProcess(handle.raw(), &mut code) } == 0 {
                return Err(Error::os("GetExitCodeProcess", last_error()));
            }
            Ok(WaitStatus::Exited(code as i32))
        }
        WAIT_TIMEOUT => Err(Error::TimedOut {
            pid,
            timeout: timeout.unwrap_or_default(),
        }),
        WAIT_ABANDONED => {
            tracing::debug!(pid, "WaitForSingleObject -> WAIT_ABANDONED");
            Err(Error::WaitAbandoned { pid })
        }
        _ => Err(Error::os("WaitForSingleObject", last_error())),
    }
}

fn token_user(pid: Pid, token: &OwnedHandle) -> Result<GrowableBuffer> {
    buffer::query_growable(pid, &config::TOKEN_USER, &pid_exists, |buf| {
        let mut needed = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let ok = unsafe {
            GetTokenInformation(
                token.raw(),
                TokenUser,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut needed,
            )
        };
        if ok != 0 {
            return Fill::Complete(buf.len());
        }
        match last_error() {
            NativeStatus::Win32(win32::ERROR_INSUFFICIENT_BUFFER) => Fill::TooSmall {
                required: Some(needed as usize),
            },
            status => Fill::Failed(status),
        }
    })
}

/// Account owning the process token, as domain and name.
pub fn username(pid: Pid) -> Result<UserIdentity> {
    let handle = ProcessHandle::open(pid, Access::QUERY_LIMITED)?;
    let mut raw_token: HANDLE = ptr::null_mut();
    // SAFETY: valid handle and out pointer.
    if unsafe { OpenProcessToken(handle.raw(), TOKEN_QUERY, &mut raw_token) } == 0 {
        return Err(win32_error(pid, "OpenProcessToken"));
    }
    let token = OwnedHandle(raw_token);
    let buffer = token_user(pid, &token)?;
    let user = buffer
        .read::<TOKEN_USER>(0)
        .ok_or_else(|| Error::malformed("GetTokenInformation(TokenUser)", "short result"))?;

    let mut name_len = 0x100u32;
    let mut domain_len = 0x100u32;
    loop {
        let mut name = vec![0u16; name_len as usize];
        let mut domain = vec![0u16; domain_len as usize];
        let mut sid_use: SID_NAME_USE = 0;
        // SAFETY: the SID points into `buffer`, which is alive; the name
        // buffers match their lengths.
        let ok = unsafe {
            LookupAccountSidW(
                ptr::null(),
                user.User.Sid,
                name.as_mut_ptr(),
                &mut name_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut sid_use,
            )
        };
        if ok != 0 {
            return Ok(UserIdentity {
                domain: Some(wide_to_string(&domain)),
                name: wide_to_string(&name),
            });
        }
        match last_error() {
            NativeStatus::Win32(win32::ERROR_INSUFFICIENT_BUFFER) => continue,
            code => return Err(status::translate(pid, code, "LookupAccountSidW", &pid_exists)),
        }
    }
}

pub fn boot_time() -> Result<DateTime<Utc>> {
    // SAFETY: no preconditions.
    let uptime = Duration::from_millis(unsafe { GetTickCount64() });
    let uptime = chrono::Duration::from_std(uptime)
        .map_err(|e| Error::malformed("GetTickCount64", e.to_string()))?;
    Ok(Utc::now() - uptime)
}

pub fn cpu_count_logical() -> Result<usize> {
    // SAFETY: no preconditions.
    let count = unsafe { GetActiveProcessorCount(ALL_PROCESSOR_GROUPS) };
    if count == 0 {
        return Err(Error::os("GetActiveProcessorCount", last_error()));
    }
    Ok(count as usize)
}

/// Summed over the processors of the current group.
pub fn cpu_times() -> Result<SystemCpuTimes> {
    let width = mem::size_of::<nt::SystemProcessorPerformanceInformation>();
    let policy = config::PROCESS_TABLE.named("NtQuerySystemInformation(SystemProcessorPerformanceInformation)");
    let buffer = buffer::query_growable_system(&policy, |buf| {
        let mut returned = 0u32;
        // SAFETY: buf is valid for buf.len() bytes.
        let status = unsafe {
            nt::NtQuerySystemInformation(
                nt::SYSTEM_PROCESSOR_PERFORMANCE_INFORMATION,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut returned,
            )
        };
        match status {
            ntstatus::STATUS_INFO_LENGTH_MISMATCH => Fill::TooSmall { required: None },
            s if nt::nt_success(s) => Fill::Complete(returned as usize),
            s => Fill::Failed(NativeStatus::NtStatus(s)),
        }
    })?;
    let mut total = SystemCpuTimes::default();
    for cpu in (0..buffer.valid() / width)
        .filter_map(|i| buffer.read::<nt::SystemProcessorPerformanceInformation>(i * width))
    {
        let ticks = |v: i64| ticks_to_duration(v.max(0) as u64);
        total.user += ticks(cpu.user_time);
        // kernel time includes idle time
        total.system += ticks(cpu.kernel_time.saturating_sub(cpu.idle_time));
        total.idle += ticks(cpu.idle_time);
        total.interrupt += ticks(cpu.interrupt_time);
    }
    Ok(total)
}

pub fn net_io_counters() -> Result<Vec<NetIoCounters>> {
    let mut table: *mut MIB_IF_TABLE2 = ptr::null_mut();
    // SAFETY: out pointer is valid; freed with FreeMibTable.
    let status = unsafe { GetIfTable2(&mut table) };
    if status != 0 || table.is_null() {
        return Err(Error::os("GetIfTable2", NativeStatus::Win32(status)));
    }
    // SAFETY: GetIfTable2 returned a table with NumEntries rows.
    let rows = unsafe {
        std::slice::from_raw_parts((*table).Table.as_ptr(), (*table).NumEntries as usize)
    };
    let mut counters: Vec<NetIoCounters> = rows
        .iter()
        .map(|row| NetIoCounters {
            name: wide_to_string(&row.Alias),
            bytes_sent: row.OutOctets,
            bytes_recv: row.InOctets,
            packets_sent: row.OutUcastPkts + row.OutNUcastPkts,
            packets_recv: row.InUcastPkts + row.InNUcastPkts,
            errin: row.InErrors,
            errout: row.OutErrors,
            dropin: row.InDiscards,
            dropout: row.OutDiscards,
        })
        .collect();
    // SAFETY: allocated by GetIfTable2.
    unsafe { FreeMibTable(table as *const c_void) };
    counters.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(counters)
}

pub fn disk_io_counters() -> Result<Vec<DiskIoCounters>> {
    Err(Error::Unsupported("disk_io_counters"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_environment_block() {
        let mut block = wide("=C:=C:\\work\0PATH=C:\\Windows\0EMPTY=\0");
        block.push(0);
        let env = parse_environment_block(&block);
        assert_eq!(env.get("PATH").map(String::as_str), Some("C:\\Windows"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_trim_directory() {
        assert_eq!(trim_directory("C:\\".to_string()), "C:\\");
        assert_eq!(trim_directory("C:\\Users\\me\\".to_string()), "C:\\Users\\me");
    }

    #[test]
    fn test_filetime_conversion() {
        assert_eq!(filetime_to_utc(EPOCH_DIFFERENCE).map(|t| t.timestamp()), Some(0));
        assert_eq!(filetime_to_utc(0), None);
        assert_eq!(ticks_to_duration(10_000_000), Duration::from_secs(1));
    }

    #[test]
    fn test_wait_millis_rounds_up() {
        assert_eq!(wait_millis(None), INFINITE);
        assert_eq!(wait_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(wait_millis(Some(Duration::from_millis(5))), 5);
    }

    #[test]
    fn test_split_command_line() {
        let args = split_command_line(&wide(r#"C:\app.exe "two words" x"#)).unwrap();
        assert_eq!(args, vec![r"C:\app.exe", "two words", "x"]);
        assert!(split_command_line(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_self_queries() {
        let me = std::process::id();
        assert!(pid_exists(me));
        assert!(exe(me).unwrap().is_absolute());
        assert!(!name(me).unwrap().is_empty());
        assert!(memory_uss(me).unwrap() > 0);
        assert!(!is_suspended(me).unwrap());
        assert!(username(me).unwrap().domain.is_some());
    }
}
