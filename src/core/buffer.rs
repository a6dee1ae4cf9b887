//! Variable-length buffer protocol
//!
//! Many OS queries only report "buffer too small" and expect the caller to
//! retry. [`query_growable`] drives that loop: start from a size hint, adopt
//! the OS-reported size when it is given and larger, otherwise double, and
//! stop with `ResourceExhausted` once the policy ceiling would be exceeded.

use std::mem;

use crate::core::error::{Error, Result};
use crate::core::status::{self, Liveness, NativeStatus, Probing};
use crate::Pid;

/// Initial size hint and growth ceiling for one kind of query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Name of the native call, used in diagnostics.
    pub operation: &'static str,
    /// First allocation size in bytes.
    pub initial: usize,
    /// Largest allocation the loop will attempt, in bytes.
    pub ceiling: usize,
}

impl BufferPolicy {
    pub const fn named(self, operation: &'static str) -> Self {
        BufferPolicy { operation, ..self }
    }
}

/// What the native query reported for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Success; the first `n` bytes are valid.
    Complete(usize),
    /// The buffer was too small. `required` is the exact size when the OS
    /// reports one.
    TooSmall { required: Option<usize> },
    /// Any other failure.
    Failed(NativeStatus),
}

/// An owned, 8-byte aligned byte region with an OS-reported valid length.
pub struct GrowableBuffer {
    words: Vec<u64>,
    len: usize,
    valid: usize,
}

impl GrowableBuffer {
    pub fn zeroed(len: usize) -> Self {
        GrowableBuffer {
            words: vec![0u64; len.div_ceil(mem::size_of::<u64>())],
            len,
            valid: 0,
        }
    }

    /// Allocated size in bytes.
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Number of bytes the OS reported as valid.
    pub fn valid(&self) -> usize {
        self.valid
    }

    /// The whole allocation, for the native call to fill.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: `words` holds at least `len` bytes and u8 has no alignment
        // requirement.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    /// Only the valid prefix.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: see `as_mut_bytes`; `valid <= len`.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.valid) }
    }

    /// Read a plain-data value at `offset` within the valid prefix.
    pub fn read<T: Copy>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(mem::size_of::<T>())?;
        if end > self.valid {
            return None;
        }
        // SAFETY: bounds checked above; read_unaligned tolerates any offset.
        Some(unsafe { std::ptr::read_unaligned(self.bytes().as_ptr().add(offset) as *const T) })
    }

    fn set_valid(&mut self, valid: usize) {
        self.valid = valid.min(self.len);
    }
}

impl std::fmt::Debug for GrowableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowableBuffer")
            .field("capacity", &self.len)
            .field("valid", &self.valid)
            .finish()
    }
}

enum Growth {
    Done(GrowableBuffer),
    Exhausted,
    Failed(NativeStatus),
}

fn grow<F>(policy: &BufferPolicy, mut query: F) -> Growth
where
    F: FnMut(&mut [u8]) -> Fill,
{
    let mut size = policy.initial.max(1);
    loop {
        let mut buffer = GrowableBuffer::zeroed(size);
        match query(buffer.as_mut_bytes()) {
            Fill::Complete(valid) => {
                buffer.set_valid(valid);
                return Growth::Done(buffer);
            }
            Fill::TooSmall { required } => {
                let next = match required {
                    Some(required) if required > size => required,
                    _ => size.saturating_mul(2),
                };
                if next > policy.ceiling {
                    tracing::debug!(
                        operation = policy.operation,
                        next,
                        ceiling = policy.ceiling,
                        "buffer growth exceeded limit"
                    );
                    return Growth::Exhausted;
                }
                tracing::trace!(operation = policy.operation, size, next, "growing buffer");
                size = next;
            }
            Fill::Failed(status) => return Growth::Failed(status),
        }
    }
}

/// Run a per-process variable-length query to completion.
///
/// A native failure is translated with the liveness probe consulted for every
/// failure: a length mismatch against a process that exited mid-query becomes
/// `NotFound`.
pub fn query_growable<F>(
    pid: Pid,
    policy: &BufferPolicy,
    probe: &dyn Liveness,
    query: F,
) -> Result<GrowableBuffer>
where
    F: FnMut(&mut [u8]) -> Fill,
{
    match grow(policy, query) {
        Growth::Done(buffer) => Ok(buffer),
        Growth::Exhausted => Err(Error::ResourceExhausted {
            operation: policy.operation,
            limit: policy.ceiling,
        }),
        Growth::Failed(status) => Err(status::resolve(
            pid,
            status,
            policy.operation,
            probe,
            Probing::Always,
        )),
    }
}

/// Run a system-wide variable-length query (no target process).
pub fn query_growable_system<F>(policy: &BufferPolicy, query: F) -> Result<GrowableBuffer>
where
    F: FnMut(&mut [u8]) -> Fill,
{
    match grow(policy, query) {
        Growth::Done(buffer) => Ok(buffer),
        Growth::Exhausted => Err(Error::ResourceExhausted {
            operation: policy.operation,
            limit: policy.ceiling,
        }),
        Growth::Failed(status) => Err(Error::os(policy.operation, status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use std::cell::Cell;

    const POLICY: BufferPolicy = BufferPolicy {
        operation: "stub",
        initial: 16,
        ceiling: 1024,
    };

    fn alive(_: Pid) -> bool {
        true
    }

    fn dead(_: Pid) -> bool {
        false
    }

    #[test]
    fn test_always_too_small_is_exhausted() {
        let calls = Cell::new(0usize);
        let result = query_growable(1, &POLICY, &alive, |_buf| {
            calls.set(calls.get() + 1);
            Fill::TooSmall { required: None }
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        // 16, 32, 64, 128, 256, 512, 1024
        assert_eq!(calls.get(), 7);
    }

    #[test]
    fn test_exact_size_is_adopted() {
        let mut sizes = Vec::new();
        let buffer = query_growable(1, &POLICY, &alive, |buf| {
            sizes.push(buf.len());
            if buf.len() < 1000 {
                Fill::TooSmall {
                    required: Some(1000),
                }
            } else {
                Fill::Complete(999)
            }
        })
        .unwrap();
        assert_eq!(sizes, vec![16, 1000]);
        assert_eq!(buffer.capacity(), 1000);
        assert_eq!(buffer.valid(), 999);
    }

    #[test]
    fn test_stale_required_size_doubles() {
        // The OS echoes back the size we passed (WOW64 quirk).
        let mut sizes = Vec::new();
        query_growable(1, &POLICY, &alive, |buf| {
            sizes.push(buf.len());
            if buf.len() < 64 {
                Fill::TooSmall {
                    required: Some(buf.len()),
                }
            } else {
                Fill::Complete(8)
            }
        })
        .unwrap();
        assert_eq!(sizes, vec![16, 32, 64]);
    }

    #[test]
    fn test_required_beyond_ceiling() {
        let err = query_growable(1, &POLICY, &alive, |_| Fill::TooSmall {
            required: Some(4096),
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_iterations_are_logarithmic() {
        let policy = BufferPolicy {
            operation: "stub",
            initial: 64,
            ceiling: 1 << 20,
        };
        let true_size = 5000;
        let calls = Cell::new(0usize);
        let buffer = query_growable(1, &policy, &alive, |buf| {
            calls.set(calls.get() + 1);
            if buf.len() < true_size {
                Fill::TooSmall { required: None }
            } else {
                Fill::Complete(true_size)
            }
        })
        .unwrap();
        // ceil(log2(5000 / 64)) = 7 doublings plus the first attempt
        assert_eq!(calls.get(), 8);
        assert_eq!(buffer.valid(), true_size);
    }

    #[test]
    fn test_failure_of_exited_process_is_not_found() {
        let err = query_growable(1, &POLICY, &dead, |_| {
            Fill::Failed(NativeStatus::NtStatus(
                status::ntstatus::STATUS_INFO_LENGTH_MISMATCH,
            ))
        })
        .unwrap_err();
        assert!(err.is_not_found());

        let err = query_growable(1, &POLICY, &alive, |_| {
            Fill::Failed(NativeStatus::NtStatus(
                status::ntstatus::STATUS_INFO_LENGTH_MISMATCH,
            ))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_valid_length_is_clamped_and_reads_are_bounded() {
        let buffer = query_growable_system(&POLICY, |buf| {
            buf[..4].copy_from_slice(&7u32.to_ne_bytes());
            Fill::Complete(buf.len() + 100)
        })
        .unwrap();
        assert_eq!(buffer.valid(), 16);
        assert_eq!(buffer.read::<u32>(0), Some(7));
        assert_eq!(buffer.read::<u64>(12), None);
    }

    #[test]
    fn test_system_failure_is_os_error() {
        let err = query_growable_system(&POLICY, |_| Fill::Failed(NativeStatus::Errno(5)))
            .unwrap_err();
        match err {
            Error::Os { operation, status } => {
                assert_eq!(operation, "stub");
                assert_eq!(status, NativeStatus::Errno(5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
