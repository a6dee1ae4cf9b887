//! Error taxonomy
//!
//! Every extractor returns [`Result`]. Native failures are classified at the
//! point where they happen (see [`crate::core::status`]) so callers only ever
//! see the small, closed set of kinds in [`ErrorKind`].

use std::time::Duration;

use crate::core::status::NativeStatus;
use crate::Pid;

/// Result type returned by every query.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure kinds, identical on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    TimedOut,
    WaitAbandoned,
    ResourceExhausted,
    Other,
}

/// An error returned by a process or system query.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The process does not exist (never existed, or exited).
    #[error("no such process (pid={pid}): {reason}")]
    NotFound { pid: Pid, reason: String },

    /// The caller lacks the privilege to query this process.
    #[error("access denied (pid={pid}): {reason}")]
    AccessDenied { pid: Pid, reason: String },

    /// A bounded wait elapsed.
    #[error("timeout after {timeout:?} waiting for pid {pid}")]
    TimedOut { pid: Pid, timeout: Duration },

    /// The wait completed without defined ownership of the wait object.
    #[error("wait on pid {pid} was abandoned")]
    WaitAbandoned { pid: Pid },

    /// A growable buffer exceeded its ceiling.
    #[error("{operation}: buffer growth exceeded limit ({limit} bytes)")]
    ResourceExhausted {
        operation: &'static str,
        limit: usize,
    },

    /// Any native failure not covered above.
    #[error("{operation} failed: {status}")]
    Os {
        operation: &'static str,
        status: NativeStatus,
    },

    /// The OS returned data that could not be decoded.
    #[error("{operation}: malformed data: {detail}")]
    Malformed {
        operation: &'static str,
        detail: String,
    },

    /// The fact is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl Error {
    pub fn not_found(pid: Pid, reason: impl Into<String>) -> Self {
        Error::NotFound {
            pid,
            reason: reason.into(),
        }
    }

    pub fn access_denied(pid: Pid, reason: impl Into<String>) -> Self {
        Error::AccessDenied {
            pid,
            reason: reason.into(),
        }
    }

    pub fn os(operation: &'static str, status: NativeStatus) -> Self {
        Error::Os { operation, status }
    }

    pub fn malformed(operation: &'static str, detail: impl Into<String>) -> Self {
        Error::Malformed {
            operation,
            detail: detail.into(),
        }
    }

    /// The error for pid 0, which is never queryable.
    pub fn idle_process() -> Self {
        Error::access_denied(0, "automatically set for PID 0")
    }

    /// Which of the closed set of kinds this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AccessDenied { .. } => ErrorKind::AccessDenied,
            Error::TimedOut { .. } => ErrorKind::TimedOut,
            Error::WaitAbandoned { .. } => ErrorKind::WaitAbandoned,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Error::Os { .. } | Error::Malformed { .. } | Error::Unsupported(_) => {
                ErrorKind::Other
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_access_denied(&self) -> bool {
        self.kind() == ErrorKind::AccessDenied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::not_found(10, "gone").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::access_denied(10, "nope").kind(),
            ErrorKind::AccessDenied
        );
        assert_eq!(
            Error::WaitAbandoned { pid: 3 }.kind(),
            ErrorKind::WaitAbandoned
        );
        assert_eq!(Error::Unsupported("cpu_affinity").kind(), ErrorKind::Other);
        assert_eq!(
            Error::os("sysctl", NativeStatus::Errno(22)).kind(),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_timeout_and_abandoned_are_distinct() {
        let timed_out = Error::TimedOut {
            pid: 7,
            timeout: Duration::from_millis(1),
        };
        let abandoned = Error::WaitAbandoned { pid: 7 };
        assert_ne!(timed_out.kind(), abandoned.kind());
    }

    #[test]
    fn test_idle_process_is_access_denied() {
        let err = Error::idle_process();
        assert!(err.is_access_denied());
        assert!(err.to_string().contains("PID 0"));
    }

    #[test]
    fn test_display_carries_operation() {
        let err = Error::os("NtQueryVirtualMemory", NativeStatus::NtStatus(0xC000_0005u32 as i32));
        let text = err.to_string();
        assert!(text.starts_with("NtQueryVirtualMemory failed"));
        assert!(text.contains("0xC0000005"));
    }
}
