//! System-wide queries

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::{DiskIoCounters, NetIoCounters, Result, SystemCpuTimes};
use crate::platform;
use crate::Pid;

/// All pids currently present, in OS order.
pub fn pids() -> Result<Vec<Pid>> {
    platform::pids()
}

/// pid → parent pid for every process, from one enumeration pass.
pub fn ppid_map() -> Result<HashMap<Pid, Pid>> {
    platform::ppid_map()
}

pub fn boot_time() -> Result<DateTime<Utc>> {
    platform::boot_time()
}

pub fn cpu_count_logical() -> Result<usize> {
    platform::cpu_count_logical()
}

/// Cumulative CPU time across all processors since boot.
pub fn cpu_times() -> Result<SystemCpuTimes> {
    platform::cpu_times()
}

/// Per-interface counters, sorted by interface name.
pub fn net_io_counters() -> Result<Vec<NetIoCounters>> {
    platform::net_io_counters()
}

pub fn disk_io_counters() -> Result<Vec<DiskIoCounters>> {
    platform::disk_io_counters()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pids_contains_self() {
        let me = std::process::id() as Pid;
        assert!(pids().unwrap().contains(&me));
        assert!(ppid_map().unwrap().contains_key(&me));
    }

    #[test]
    fn test_boot_time_in_past() {
        assert!(boot_time().unwrap() < Utc::now());
    }

    #[test]
    fn test_cpu_facts() {
        assert!(cpu_count_logical().unwrap() >= 1);
        let times = cpu_times().unwrap();
        assert!(times.user + times.system + times.idle > std::time::Duration::ZERO);
    }
}
