//! Compile-time limits and tunables
//!
//! Initial sizes are first guesses for variable-length OS queries; ceilings
//! bound how far the buffer protocol will grow before giving up with
//! `ResourceExhausted`.

use std::time::Duration;

use crate::core::BufferPolicy;

const MIB: usize = 1024 * 1024;

/// Working-set page list (`NtQueryVirtualMemory`).
pub const WORKING_SET: BufferPolicy = BufferPolicy {
    operation: "NtQueryVirtualMemory(MemoryWorkingSetInformation)",
    initial: 0x8000,
    ceiling: 256 * MIB,
};

/// System process table (`NtQuerySystemInformation(SystemProcessInformation)`).
pub const PROCESS_TABLE: BufferPolicy = BufferPolicy {
    operation: "NtQuerySystemInformation(SystemProcessInformation)",
    initial: 0x4000,
    ceiling: 256 * MIB,
};

/// System handle table (`SystemExtendedHandleInformation`).
pub const HANDLE_TABLE: BufferPolicy = BufferPolicy {
    operation: "NtQuerySystemInformation(SystemExtendedHandleInformation)",
    initial: MIB,
    ceiling: 256 * MIB,
};

/// Image path: `MAX_PATH` wide chars up to the NTFS path limit.
pub const IMAGE_PATH: BufferPolicy = BufferPolicy {
    operation: "NtQuerySystemInformation(SystemProcessIdInformation)",
    initial: 0x104 * 2,
    ceiling: 0x7FFF * 2,
};

/// Command line (`NtQueryInformationProcess(ProcessCommandLineInformation)`).
pub const COMMAND_LINE: BufferPolicy = BufferPolicy {
    operation: "NtQueryInformationProcess(ProcessCommandLineInformation)",
    initial: 0x400,
    ceiling: 16 * MIB,
};

/// Token user / SID data.
pub const TOKEN_USER: BufferPolicy = BufferPolicy {
    operation: "GetTokenInformation(TokenUser)",
    initial: 0x100,
    ceiling: 64 * 1024,
};

/// Pid list: bytes for `EnumProcesses` / `proc_listallpids`.
pub const PID_LIST: BufferPolicy = BufferPolicy {
    operation: "EnumProcesses",
    initial: 1024 * 4,
    ceiling: 64 * MIB,
};

/// CPU set for `sched_getaffinity` (starts at 1024 CPUs).
pub const CPU_SET: BufferPolicy = BufferPolicy {
    operation: "sched_getaffinity",
    initial: 128,
    ceiling: 64 * 1024,
};

/// Descriptor list (`proc_pidinfo(PROC_PIDLISTFDS)`).
pub const FD_LIST: BufferPolicy = BufferPolicy {
    operation: "proc_pidinfo(PROC_PIDLISTFDS)",
    initial: 256 * 8,
    ceiling: 16 * MIB,
};

/// Signal used for termination; also the exit value passed to
/// `TerminateProcess` on Windows.
pub const TERMINATE_SIGNAL: i32 = 15;

/// Polling bounds for exit-wait when no wait descriptor is available.
pub const WAIT_POLL_MIN: Duration = Duration::from_micros(100);
pub const WAIT_POLL_MAX: Duration = Duration::from_millis(40);

/// Environment variable read by the `psq` tool to configure log filtering.
pub const LOG_ENV: &str = "PSQUERY_LOG";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies_are_growable() {
        for policy in [
            WORKING_SET,
            PROCESS_TABLE,
            HANDLE_TABLE,
            IMAGE_PATH,
            COMMAND_LINE,
            TOKEN_USER,
            PID_LIST,
            CPU_SET,
            FD_LIST,
        ] {
            assert!(policy.initial > 0, "{}", policy.operation);
            assert!(policy.initial < policy.ceiling, "{}", policy.operation);
        }
    }

    #[test]
    fn test_working_set_ceiling() {
        assert_eq!(WORKING_SET.ceiling, 256 * 1024 * 1024);
    }
}
