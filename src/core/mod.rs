//! Platform-agnostic engine
//!
//! This module contains:
//! - error / status: the closed error taxonomy and native status translation
//! - access: capability set requested when acquiring a process reference
//! - buffer: the grow-and-retry protocol for variable-length OS queries
//! - snapshot: owner-filtered enumeration of process and thread snapshots
//! - privilege: the one-time process-wide privilege state
//! - memory / threads: USS and suspend-state rules
//! - types: decoded results

pub mod access;
pub mod buffer;
pub mod error;
pub mod memory;
pub mod privilege;
pub mod snapshot;
pub mod status;
pub mod threads;
mod types;

pub use access::Access;
pub use buffer::{query_growable, query_growable_system, BufferPolicy, Fill, GrowableBuffer};
pub use error::{Error, ErrorKind, Result};
pub use snapshot::{enumerate_owned, OwnerFilter, SnapshotEntry};
pub use status::{classify, translate, Liveness, NativeStatus};
pub use types::*;
