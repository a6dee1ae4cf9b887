//! Decoded results returned by the extractors

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::Pid;

/// Accumulated CPU time of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: Duration,
    pub system: Duration,
    pub create_time: Option<DateTime<Utc>>,
}

/// Memory counters. Fields a platform does not report are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Resident set size in bytes.
    pub rss: u64,
    /// Virtual memory size in bytes.
    pub vms: u64,
    pub peak_rss: Option<u64>,
    pub page_faults: Option<u64>,
    /// Private (commit) bytes.
    pub private: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub other_count: Option<u64>,
    pub other_bytes: Option<u64>,
}

/// One mapped region of a process address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    /// `rwxp` style on Unix, `r`/`rw`/`xr`/... on Windows.
    pub protection: String,
    pub path: Option<PathBuf>,
}

/// A regular file held open by a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpenFile {
    pub path: PathBuf,
    /// File descriptor on Unix, handle value on Windows.
    pub fd: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTimes {
    pub id: Pid,
    pub user: Duration,
    pub system: Duration,
}

/// Owning account of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Windows account domain; `None` on Unix.
    pub domain: Option<String>,
    pub name: String,
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}\\{}", domain, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Terminal outcome of a successful exit-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Normal exit with this code.
    Exited(i32),
    /// Killed by this signal (Unix only).
    Signaled(i32),
    /// The process exited during the wait and its status cannot be retrieved
    /// (it was not our child, or another waiter reaped it first).
    Gone,
}

/// I/O scheduling priority.
///
/// Linux: `class` is the ioprio class (1 RT, 2 BE, 3 IDLE) and `data` the
/// level within it. Windows: `class` is the I/O priority hint (0 very low to
/// 3 high) and `data` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoPriority {
    pub class: u32,
    pub data: u32,
}

/// System-wide CPU time split by mode. Modes a platform does not track are
/// zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemCpuTimes {
    pub user: Duration,
    pub nice: Duration,
    pub system: Duration,
    pub idle: Duration,
    pub interrupt: Duration,
}

/// Per-interface network counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetIoCounters {
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
    pub dropin: u64,
    pub dropout: u64,
}

/// Per-disk I/O counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskIoCounters {
    pub name: String,
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_time: Duration,
    pub write_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_identity_display() {
        let windows = UserIdentity {
            domain: Some("NT AUTHORITY".to_string()),
            name: "SYSTEM".to_string(),
        };
        assert_eq!(windows.to_string(), "NT AUTHORITY\\SYSTEM");

        let unix = UserIdentity {
            domain: None,
            name: "root".to_string(),
        };
        assert_eq!(unix.to_string(), "root");
    }
}
