//! Status translation
//!
//! Maps heterogeneous native status codes (errno, Win32 error codes,
//! NTSTATUS values, Mach `kern_return_t`) onto [`ErrorKind`]. Classification
//! itself is a pure table lookup; [`translate`] adds the one policy that needs
//! I/O: an *ambiguous* access-denied is re-checked with a liveness probe and
//! reported as `NotFound` when the process turns out to be gone.

use std::fmt;

use crate::core::error::{Error, ErrorKind};
use crate::Pid;

/// A raw status code as reported by the OS, tagged with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    /// POSIX `errno`.
    Errno(i32),
    /// Win32 `GetLastError()` value.
    Win32(u32),
    /// NT native status.
    NtStatus(i32),
    /// Mach `kern_return_t`.
    Kern(i32),
}

impl NativeStatus {
    /// The calling thread's current `errno` (or `GetLastError()` on Windows).
    pub fn last_os_error() -> Self {
        let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        #[cfg(windows)]
        {
            NativeStatus::Win32(code as u32)
        }
        #[cfg(not(windows))]
        {
            NativeStatus::Errno(code)
        }
    }

    pub fn from_io(err: &std::io::Error) -> Option<Self> {
        let code = err.raw_os_error()?;
        #[cfg(windows)]
        {
            Some(NativeStatus::Win32(code as u32))
        }
        #[cfg(not(windows))]
        {
            Some(NativeStatus::Errno(code))
        }
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            #[cfg(unix)]
            NativeStatus::Errno(code) => {
                write!(f, "{}", std::io::Error::from_raw_os_error(code))
            }
            #[cfg(not(unix))]
            NativeStatus::Errno(code) => write!(f, "errno {}", code),
            #[cfg(windows)]
            NativeStatus::Win32(code) => {
                write!(f, "{}", std::io::Error::from_raw_os_error(code as i32))
            }
            #[cfg(not(windows))]
            NativeStatus::Win32(code) => write!(f, "Win32 error {}", code),
            NativeStatus::NtStatus(code) => write!(f, "NTSTATUS 0x{:08X}", code as u32),
            NativeStatus::Kern(code) => write!(f, "kern_return_t {}", code),
        }
    }
}

// POSIX errno values shared by Linux and Darwin.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const ESRCH: i32 = 3;
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EINVAL: i32 = 22;
}

pub mod win32 {
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
    pub const ERROR_PARTIAL_COPY: u32 = 299;
    pub const ERROR_PRIVILEGE_NOT_HELD: u32 = 1314;
    pub const ERROR_NONE_MAPPED: u32 = 1332;
}

pub mod ntstatus {
    pub const STATUS_PARTIAL_COPY: i32 = 0x8000_000Du32 as i32;
    pub const STATUS_INVALID_CID: i32 = 0xC000_000Bu32 as i32;
    pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022u32 as i32;
    pub const STATUS_BUFFER_TOO_SMALL: i32 = 0xC000_0023u32 as i32;
    pub const STATUS_INFO_LENGTH_MISMATCH: i32 = 0xC000_0004u32 as i32;
    pub const STATUS_PROCESS_IS_TERMINATING: i32 = 0xC000_010Au32 as i32;
    pub const STATUS_NOT_FOUND: i32 = 0xC000_0225u32 as i32;
}

pub mod kern {
    pub const KERN_PROTECTION_FAILURE: i32 = 2;
    pub const KERN_INVALID_ARGUMENT: i32 = 4;
    pub const KERN_FAILURE: i32 = 5;
}

/// Result of the pure classification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The code unambiguously means this kind.
    Definite(ErrorKind),
    /// The code is reported as this kind, but in practice often means the
    /// process already exited. Needs a liveness probe.
    Ambiguous(ErrorKind),
}

impl Classification {
    pub fn kind(self) -> ErrorKind {
        match self {
            Classification::Definite(kind) | Classification::Ambiguous(kind) => kind,
        }
    }
}

/// Map a native status onto an error kind. Pure; no I/O.
pub fn classify(status: NativeStatus) -> Classification {
    use Classification::*;
    use ErrorKind::*;

    match status {
        NativeStatus::Errno(code) => match code {
            errno::ESRCH | errno::ENOENT => Definite(NotFound),
            errno::EPERM | errno::EACCES => Ambiguous(AccessDenied),
            _ => Definite(Other),
        },
        NativeStatus::Win32(code) => match code {
            win32::ERROR_ACCESS_DENIED | win32::ERROR_PARTIAL_COPY => Ambiguous(AccessDenied),
            win32::ERROR_NONE_MAPPED | win32::ERROR_PRIVILEGE_NOT_HELD => Definite(AccessDenied),
            _ => Definite(Other),
        },
        NativeStatus::NtStatus(code) => match code {
            ntstatus::STATUS_INVALID_CID
            | ntstatus::STATUS_NOT_FOUND
            | ntstatus::STATUS_PROCESS_IS_TERMINATING => Definite(NotFound),
            ntstatus::STATUS_ACCESS_DENIED | ntstatus::STATUS_PARTIAL_COPY => {
                Ambiguous(AccessDenied)
            }
            _ => Definite(Other),
        },
        NativeStatus::Kern(code) => match code {
            kern::KERN_PROTECTION_FAILURE => Definite(AccessDenied),
            kern::KERN_INVALID_ARGUMENT | kern::KERN_FAILURE => Ambiguous(AccessDenied),
            _ => Definite(Other),
        },
    }
}

/// Minimal, unambiguous existence check used to resolve ambiguous codes.
///
/// Implementations must not go through [`translate`] themselves.
pub trait Liveness {
    fn pid_exists(&self, pid: Pid) -> bool;
}

impl<F> Liveness for F
where
    F: Fn(Pid) -> bool,
{
    fn pid_exists(&self, pid: Pid) -> bool {
        self(pid)
    }
}

/// When to consult the liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probing {
    /// Only for codes classified as ambiguous.
    Ambiguous,
    /// For every failure (used where a length mismatch or generic failure may
    /// be the only visible symptom of the process exiting).
    Always,
}

/// Classify `status` and build the error returned to the caller.
pub fn translate(
    pid: Pid,
    status: NativeStatus,
    operation: &'static str,
    probe: &dyn Liveness,
) -> Error {
    resolve(pid, status, operation, probe, Probing::Ambiguous)
}

/// Like [`translate`], with explicit control over when the probe runs.
pub fn resolve(
    pid: Pid,
    status: NativeStatus,
    operation: &'static str,
    probe: &dyn Liveness,
    probing: Probing,
) -> Error {
    let classification = classify(status);
    let needs_probe = match (probing, classification) {
        (_, Classification::Definite(ErrorKind::NotFound)) => false,
        (Probing::Always, _) => true,
        (Probing::Ambiguous, Classification::Ambiguous(_)) => true,
        (Probing::Ambiguous, Classification::Definite(_)) => false,
    };

    if needs_probe && !probe.pid_exists(pid) {
        tracing::debug!(
            pid,
            operation,
            %status,
            "process is gone; reporting NotFound"
        );
        return Error::not_found(pid, format!("{} -> {}", operation, status));
    }

    match classification.kind() {
        ErrorKind::NotFound => Error::not_found(pid, format!("{} -> {}", operation, status)),
        ErrorKind::AccessDenied => {
            Error::access_denied(pid, format!("{} -> {}", operation, status))
        }
        _ => Error::os(operation, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn alive(_: Pid) -> bool {
        true
    }

    fn dead(_: Pid) -> bool {
        false
    }

    #[test]
    fn test_classify_errno() {
        assert_eq!(
            classify(NativeStatus::Errno(errno::ESRCH)),
            Classification::Definite(ErrorKind::NotFound)
        );
        assert_eq!(
            classify(NativeStatus::Errno(errno::EPERM)),
            Classification::Ambiguous(ErrorKind::AccessDenied)
        );
        assert_eq!(
            classify(NativeStatus::Errno(errno::EIO)),
            Classification::Definite(ErrorKind::Other)
        );
    }

    #[test]
    fn test_classify_windows_codes() {
        assert_eq!(
            classify(NativeStatus::Win32(win32::ERROR_INVALID_PARAMETER)),
            Classification::Definite(ErrorKind::Other)
        );
        assert_eq!(
            classify(NativeStatus::Win32(win32::ERROR_NONE_MAPPED)),
            Classification::Definite(ErrorKind::AccessDenied)
        );
        assert_eq!(
            classify(NativeStatus::NtStatus(ntstatus::STATUS_ACCESS_DENIED)),
            Classification::Ambiguous(ErrorKind::AccessDenied)
        );
        assert_eq!(
            classify(NativeStatus::NtStatus(ntstatus::STATUS_INVALID_CID)).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_bad_argument_on_live_process_is_os_error() {
        for operation in ["SetPriorityClass", "SetProcessAffinityMask"] {
            let err = translate(
                1234,
                NativeStatus::Win32(win32::ERROR_INVALID_PARAMETER),
                operation,
                &alive,
            );
            assert_eq!(err.kind(), ErrorKind::Other);
        }
    }

    #[test]
    fn test_unknown_codes_keep_raw_value() {
        let err = translate(42, NativeStatus::Win32(0xDEAD), "Frobnicate", &alive);
        match err {
            Error::Os { operation, status } => {
                assert_eq!(operation, "Frobnicate");
                assert_eq!(status, NativeStatus::Win32(0xDEAD));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_denial_reclassified_when_gone() {
        let err = translate(
            42,
            NativeStatus::Win32(win32::ERROR_ACCESS_DENIED),
            "GetProcessTimes",
            &dead,
        );
        assert!(err.is_not_found());

        let err = translate(
            42,
            NativeStatus::Win32(win32::ERROR_ACCESS_DENIED),
            "GetProcessTimes",
            &alive,
        );
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_definite_codes_skip_probe() {
        let calls = Cell::new(0);
        let probe = |_: Pid| {
            calls.set(calls.get() + 1);
            false
        };
        let err = translate(9, NativeStatus::Win32(win32::ERROR_NONE_MAPPED), "Lookup", &probe);
        assert!(err.is_access_denied());
        assert_eq!(calls.get(), 0);

        let err = translate(9, NativeStatus::Errno(errno::ESRCH), "kill", &probe);
        assert!(err.is_not_found());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_always_probing_turns_length_mismatch_into_not_found() {
        let status = NativeStatus::NtStatus(ntstatus::STATUS_INFO_LENGTH_MISMATCH);
        let err = resolve(5, status, "NtQuerySystemInformation", &dead, Probing::Always);
        assert!(err.is_not_found());

        let err = resolve(5, status, "NtQuerySystemInformation", &alive, Probing::Always);
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_kern_codes() {
        let err = translate(
            77,
            NativeStatus::Kern(kern::KERN_FAILURE),
            "task_for_pid",
            &dead,
        );
        assert!(err.is_not_found());
        let err = translate(
            77,
            NativeStatus::Kern(kern::KERN_PROTECTION_FAILURE),
            "task_for_pid",
            &dead,
        );
        assert!(err.is_access_denied());
    }
}
