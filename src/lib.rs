//! psquery - cross-platform process and system information queries
//!
//! Every query is synchronous and re-derived from the OS on each call. Failures
//! come back as [`Error`], whose [`ErrorKind`] is one of a small closed set on
//! every platform: a process that exited mid-query is always `NotFound`, never
//! a permission error.
//!
//! ```no_run
//! let me = std::process::id() as psquery::Pid;
//! let exe = psquery::process::exe(me)?;
//! let parents = psquery::system::ppid_map()?;
//! # Ok::<(), psquery::Error>(())
//! ```

pub mod config;
pub mod core;
mod platform;
pub mod process;
pub mod system;

pub use crate::core::{
    Access, CpuTimes, DiskIoCounters, Error, ErrorKind, IoCounters, IoPriority, MemoryInfo,
    MemoryRegion, NetIoCounters, OpenFile, Result, SystemCpuTimes, ThreadTimes, UserIdentity,
    WaitStatus,
};

/// Native process id type.
#[cfg(unix)]
pub type Pid = libc::pid_t;

/// Native process id type.
#[cfg(windows)]
pub type Pid = u32;

#[cfg(windows)]
pub use platform::priority_class;
