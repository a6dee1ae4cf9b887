//! Capabilities requested when acquiring a process reference
//!
//! Extractors ask for the smallest set that lets their native query succeed:
//! a process that cannot be opened with full query rights is frequently still
//! readable with `QUERY_LIMITED`.

use bitflags::bitflags;

bitflags! {
    /// Access rights requested from the OS when opening a process.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        /// Basic information (times, memory counters, priority, exit code).
        const QUERY_LIMITED = 1 << 0;
        /// Full query rights (token, working set, handle table).
        const QUERY = 1 << 1;
        /// Read the target's address space.
        const VM_READ = 1 << 2;
        /// Terminate the process.
        const TERMINATE = 1 << 3;
        /// Suspend or resume all threads.
        const SUSPEND_RESUME = 1 << 4;
        /// Change priority, I/O priority or affinity.
        const SET_INFORMATION = 1 << 5;
        /// Duplicate handles owned by the process.
        const DUP_HANDLE = 1 << 6;
        /// Wait for the process to exit.
        const SYNCHRONIZE = 1 << 7;
    }
}

impl Access {
    /// Whether acquiring this access needs a signalling/wait descriptor in
    /// addition to the basic process reference.
    pub fn needs_control(self) -> bool {
        self.intersects(Access::TERMINATE | Access::SUSPEND_RESUME | Access::SYNCHRONIZE)
    }

    /// Whether the address space or the task port is needed.
    pub fn needs_memory(self) -> bool {
        self.contains(Access::VM_READ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_rights() {
        assert!(Access::TERMINATE.needs_control());
        assert!((Access::SYNCHRONIZE | Access::QUERY_LIMITED).needs_control());
        assert!(!Access::QUERY_LIMITED.needs_control());
        assert!(!(Access::QUERY | Access::VM_READ).needs_control());
    }

    #[test]
    fn test_memory_rights() {
        assert!((Access::QUERY | Access::VM_READ).needs_memory());
        assert!(!Access::QUERY.needs_memory());
    }
}
