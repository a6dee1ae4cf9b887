//! Snapshot enumeration
//!
//! Platform snapshots (Toolhelp, `/proc`, `proc_listallpids`) are plain
//! iterators of [`SnapshotEntry`] that own their OS enumeration handle and
//! close it on drop. [`enumerate_owned`] filters one by owner, and
//! [`Owned::details`] runs a per-entry query that silently skips entries which
//! vanished since the snapshot was taken.

use crate::core::error::{Error, Result};
use crate::core::status::Liveness;
use crate::Pid;

/// One row of an OS enumeration.
///
/// Process snapshots: `id` is the pid and `owner` the parent pid.
/// Thread snapshots: `id` is the thread id and `owner` the owning pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotEntry {
    pub id: Pid,
    pub owner: Pid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerFilter {
    All,
    Owner(Pid),
}

impl OwnerFilter {
    pub fn matches(&self, entry: &SnapshotEntry) -> bool {
        match *self {
            OwnerFilter::All => true,
            OwnerFilter::Owner(pid) => entry.owner == pid,
        }
    }
}

/// Entries of one enumeration pass that match an owner filter.
pub struct Owned<I> {
    inner: I,
    filter: OwnerFilter,
}

/// Walk `snapshot` once, yielding only entries accepted by `filter`.
pub fn enumerate_owned<S>(snapshot: S, filter: OwnerFilter) -> Owned<S::IntoIter>
where
    S: IntoIterator<Item = SnapshotEntry>,
{
    Owned {
        inner: snapshot.into_iter(),
        filter,
    }
}

impl<I> Iterator for Owned<I>
where
    I: Iterator<Item = SnapshotEntry>,
{
    type Item = SnapshotEntry;

    fn next(&mut self) -> Option<SnapshotEntry> {
        let filter = self.filter;
        self.inner.by_ref().find(|entry| filter.matches(entry))
    }
}

impl<I> Owned<I>
where
    I: Iterator<Item = SnapshotEntry>,
{
    /// Query details for each entry. `NotFound` from `query` means the entry
    /// vanished and it is skipped; every other error is yielded.
    pub fn details<T, F>(self, query: F) -> Details<I, F>
    where
        F: FnMut(&SnapshotEntry) -> Result<T>,
    {
        Details { owned: self, query }
    }
}

pub struct Details<I, F> {
    owned: Owned<I>,
    query: F,
}

impl<I, F, T> Details<I, F>
where
    I: Iterator<Item = SnapshotEntry>,
    F: FnMut(&SnapshotEntry) -> Result<T>,
{
    /// Collect every detail of `owner`'s entries. When all of them vanished,
    /// `owner` itself may have exited mid-walk; that is `NotFound`, not an
    /// empty result.
    pub fn collect_alive(self, owner: Pid, probe: &dyn Liveness) -> Result<Vec<T>> {
        let items = self.collect::<Result<Vec<_>>>()?;
        if items.is_empty() && !probe.pid_exists(owner) {
            return Err(Error::not_found(owner, "exited during snapshot walk"));
        }
        Ok(items)
    }
}

impl<I, F, T> Iterator for Details<I, F>
where
    I: Iterator<Item = SnapshotEntry>,
    F: FnMut(&SnapshotEntry) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            let entry = self.owned.next()?;
            match (self.query)(&entry) {
                Err(err) if err.is_not_found() => {
                    tracing::trace!(id = entry.id, owner = entry.owner, "snapshot entry vanished");
                    continue;
                }
                other => return Some(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn entry(id: Pid, owner: Pid) -> SnapshotEntry {
        SnapshotEntry { id, owner }
    }

    struct CountingSnapshot {
        entries: std::vec::IntoIter<SnapshotEntry>,
        closed: Rc<Cell<usize>>,
    }

    impl Iterator for CountingSnapshot {
        type Item = SnapshotEntry;
        fn next(&mut self) -> Option<SnapshotEntry> {
            self.entries.next()
        }
    }

    impl Drop for CountingSnapshot {
        fn drop(&mut self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    #[test]
    fn test_filter_by_owner() {
        let rows = vec![entry(10, 1), entry(11, 2), entry(12, 1), entry(13, 3)];
        let ids: Vec<Pid> = enumerate_owned(rows.clone(), OwnerFilter::Owner(1))
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![10, 12]);

        let all = enumerate_owned(rows, OwnerFilter::All).count();
        assert_eq!(all, 4);
    }

    #[test]
    fn test_vanished_entries_are_skipped() {
        let rows = vec![entry(10, 1), entry(11, 1), entry(12, 1)];
        let times: Vec<Pid> = enumerate_owned(rows, OwnerFilter::Owner(1))
            .details(|e| {
                if e.id == 11 {
                    Err(Error::not_found(e.id, "OpenThread"))
                } else {
                    Ok(e.id * 100)
                }
            })
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(times, vec![1000, 1200]);
    }

    #[test]
    fn test_other_errors_are_yielded() {
        let rows = vec![entry(10, 1), entry(11, 1)];
        let result = enumerate_owned(rows, OwnerFilter::Owner(1))
            .details(|e| {
                if e.id == 11 {
                    Err(Error::access_denied(e.id, "OpenThread"))
                } else {
                    Ok(())
                }
            })
            .collect::<Result<Vec<_>>>();
        assert!(result.unwrap_err().is_access_denied());
    }

    #[test]
    fn test_owner_exiting_mid_walk_is_not_found() {
        let vanished = |e: &SnapshotEntry| -> Result<Pid> { Err(Error::not_found(e.id, "stat")) };
        let rows = vec![entry(10, 1), entry(11, 1)];

        let err = enumerate_owned(rows.clone(), OwnerFilter::Owner(1))
            .details(vanished)
            .collect_alive(1, &|_: Pid| false)
            .unwrap_err();
        assert!(err.is_not_found());

        // still alive: an empty walk is a real answer
        let items = enumerate_owned(rows, OwnerFilter::Owner(1))
            .details(vanished)
            .collect_alive(1, &|_: Pid| true)
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_snapshot_closed_on_early_termination() {
        let closed = Rc::new(Cell::new(0));
        let snapshot = CountingSnapshot {
            entries: vec![entry(1, 0), entry(2, 0), entry(3, 0)].into_iter(),
            closed: Rc::clone(&closed),
        };
        let first = enumerate_owned(snapshot, OwnerFilter::All).next();
        assert_eq!(first, Some(entry(1, 0)));
        assert_eq!(closed.get(), 1);
    }
}
