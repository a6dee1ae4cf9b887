//! Native NT API declarations and layouts
//!
//! Only what the Windows backend reads: the system process and handle
//! tables, working-set blocks, the image-path query and the process
//! suspend/resume calls. Layouts are the 64-bit ones.

use std::ffi::c_void;

use windows_sys::Win32::Foundation::{HANDLE, NTSTATUS, UNICODE_STRING};

// SYSTEM_INFORMATION_CLASS
pub const SYSTEM_PROCESS_INFORMATION: u32 = 5;
pub const SYSTEM_PROCESSOR_PERFORMANCE_INFORMATION: u32 = 8;
pub const SYSTEM_EXTENDED_HANDLE_INFORMATION: u32 = 64;
pub const SYSTEM_PROCESS_ID_INFORMATION: u32 = 88;

// PROCESSINFOCLASS
pub const PROCESS_BASIC_INFORMATION: u32 = 0;
pub const PROCESS_IO_PRIORITY: u32 = 33;
pub const PROCESS_COMMAND_LINE_INFORMATION: u32 = 60;

// MEMORY_INFORMATION_CLASS
pub const MEMORY_WORKING_SET_INFORMATION: u32 = 1;

pub const STATUS_SUCCESS: NTSTATUS = 0;
pub const STATUS_BUFFER_OVERFLOW: NTSTATUS = 0x8000_0005u32 as i32;
pub const STATUS_INVALID_PARAMETER: NTSTATUS = 0xC000_000Du32 as i32;

pub fn nt_success(status: NTSTATUS) -> bool {
    status >= 0
}

/// `SYSTEM_PROCESS_ID_INFORMATION`
#[repr(C)]
pub struct SystemProcessIdInformation {
    pub process_id: HANDLE,
    pub image_name: UNICODE_STRING,
}

/// `SYSTEM_PROCESS_INFORMATION`, followed in the buffer by
/// `number_of_threads` [`SystemThreadInformation`] records.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemProcessInformation {
    pub next_entry_offset: u32,
    pub number_of_threads: u32,
    pub working_set_private_size: i64,
    pub hard_fault_count: u32,
    pub number_of_threads_high_watermark: u32,
    pub cycle_time: u64,
    pub create_time: i64,
    pub user_time: i64,
    pub kernel_time: i64,
    pub image_name_length: u16,
    pub image_name_maximum_length: u16,
    pub image_name_buffer: usize,
    pub base_priority: i32,
    pub unique_process_id: usize,
    pub inherited_from_unique_process_id: usize,
    pub handle_count: u32,
    pub session_id: u32,
    pub unique_process_key: usize,
    pub peak_virtual_size: usize,
    pub virtual_size: usize,
    pub page_fault_count: u32,
    pub peak_working_set_size: usize,
    pub working_set_size: usize,
    pub quota_peak_paged_pool_usage: usize,
    pub quota_paged_pool_usage: usize,
    pub quota_peak_non_paged_pool_usage: usize,
    pub quota_non_paged_pool_usage: usize,
    pub pagefile_usage: usize,
    pub peak_pagefile_usage: usize,
    pub private_page_count: usize,
    pub read_operation_count: i64,
    pub write_operation_count: i64,
    pub other_operation_count: i64,
    pub read_transfer_count: i64,
    pub write_transfer_count: i64,
    pub other_transfer_count: i64,
}

/// `SYSTEM_THREAD_INFORMATION`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemThreadInformation {
    pub kernel_time: i64,
    pub user_time: i64,
    pub create_time: i64,
    pub wait_time: u32,
    pub start_address: usize,
    pub unique_process: usize,
    pub unique_thread: usize,
    pub priority: i32,
    pub base_priority: i32,
    pub context_switches: u32,
    pub thread_state: u32,
    pub wait_reason: u32,
}

/// `SYSTEM_PROCESSOR_PERFORMANCE_INFORMATION`, one per processor.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemProcessorPerformanceInformation {
    pub idle_time: i64,
    pub kernel_time: i64,
    pub user_time: i64,
    pub dpc_time: i64,
    pub interrupt_time: i64,
    pub interrupt_count: u32,
}

/// Header of `SYSTEM_HANDLE_INFORMATION_EX`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemExtendedHandleInformation {
    pub number_of_handles: usize,
    pub reserved: usize,
}

/// `SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemExtendedHandleTableEntry {
    pub object: usize,
    pub unique_process_id: usize,
    pub handle_value: usize,
    pub granted_access: u32,
    pub creator_back_trace_index: u16,
    pub object_type_index: u16,
    pub handle_attributes: u32,
    pub reserved: u32,
}

/// `PROCESS_BASIC_INFORMATION`
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ProcessBasicInformation {
    pub exit_status: NTSTATUS,
    pub peb_base_address: usize,
    pub affinity_mask: usize,
    pub base_priority: i32,
    pub unique_process_id: usize,
    pub inherited_from_unique_process_id: usize,
}

// PEB / RTL_USER_PROCESS_PARAMETERS offsets
pub const PEB_PROCESS_PARAMETERS: usize = 0x20;
pub const PARAMS_CURRENT_DIRECTORY: usize = 0x38;
pub const PARAMS_ENVIRONMENT: usize = 0x80;
pub const PARAMS_ENVIRONMENT_SIZE: usize = 0x3F0;

#[link(name = "ntdll")]
extern "system" {
    pub fn NtQuerySystemInformation(
        system_information_class: u32,
        system_information: *mut c_void,
        system_information_length: u32,
        return_length: *mut u32,
    ) -> NTSTATUS;

    pub fn NtQueryInformationProcess(
        process_handle: HANDLE,
        process_information_class: u32,
        process_information: *mut c_void,
        process_information_length: u32,
        return_length: *mut u32,
    ) -> NTSTATUS;

    pub fn NtSetInformationProcess(
        process_handle: HANDLE,
        process_information_class: u32,
        process_information: *const c_void,
        process_information_length: u32,
    ) -> NTSTATUS;

    pub fn NtQueryVirtualMemory(
        process_handle: HANDLE,
        base_address: *const c_void,
        memory_information_class: u32,
        memory_information: *mut c_void,
        memory_information_length: usize,
        return_length: *mut usize,
    ) -> NTSTATUS;

    pub fn NtSuspendProcess(process_handle: HANDLE) -> NTSTATUS;

    pub fn NtResumeProcess(process_handle: HANDLE) -> NTSTATUS;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_layouts_match_x64() {
        assert_eq!(mem::size_of::<SystemProcessInformation>(), 0x100);
        assert_eq!(mem::size_of::<SystemThreadInformation>(), 0x50);
        assert_eq!(mem::size_of::<SystemExtendedHandleTableEntry>(), 40);
        assert_eq!(mem::size_of::<SystemProcessorPerformanceInformation>(), 48);
        assert_eq!(mem::size_of::<ProcessBasicInformation>(), 48);
    }
}
