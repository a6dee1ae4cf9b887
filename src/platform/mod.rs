//! Platform-specific process queries
//!
//! Every backend exposes the same set of free functions (and a
//! `ProcessHandle` acquisition type); `crate::process` and `crate::system`
//! call them through the re-exports below. Native declarations stay inside
//! these modules.

#[cfg(unix)]
mod posix;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "macos")]
mod darwin;
#[cfg(target_os = "macos")]
pub use darwin::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
mod windows_nt;
#[cfg(windows)]
pub use self::windows::*;

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
compile_error!("psquery supports Linux, macOS and Windows only");
