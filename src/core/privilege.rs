//! Process-wide privilege state
//!
//! Computed once, the first time an extractor needs broad inspection rights
//! (or when [`ensure`] is called explicitly), and read-only afterwards. On
//! Windows this enables `SeDebugPrivilege` for the current process token; on
//! Unix it only records whether the caller can inspect other users' processes.

use lazy_static::lazy_static;

use crate::platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegeState {
    /// Broad process inspection is available (SeDebugPrivilege enabled,
    /// CAP_SYS_PTRACE held, or running as root).
    pub elevated: bool,
}

lazy_static! {
    static ref STATE: PrivilegeState = {
        let elevated = platform::acquire_debug_privilege();
        tracing::debug!(elevated, "privilege state initialized");
        PrivilegeState { elevated }
    };
}

/// Run the one-time initialization if it has not happened yet.
/// Idempotent and safe to call from any thread.
pub fn ensure() -> &'static PrivilegeState {
    &STATE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_is_idempotent() {
        let first = ensure();
        let second = ensure();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_callers_converge() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| ensure() as *const PrivilegeState as usize))
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }
}
