//! psq - print one process or system fact using psquery
//!
//! Usage:
//!   psq --pid 1234 exe
//!   psq ppid-map
//!   PSQUERY_LOG=psquery=debug psq --pid 4 cmdline

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use psquery::{config, process, system, Pid};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Fact {
    Exists,
    Name,
    Exe,
    Cmdline,
    Environ,
    Cwd,
    Times,
    Memory,
    Uss,
    Maps,
    Io,
    Priority,
    IoPriority,
    Affinity,
    Handles,
    OpenFiles,
    Threads,
    Suspended,
    Suspend,
    Resume,
    Kill,
    Wait,
    Username,
    Pids,
    PpidMap,
    BootTime,
    CpuCount,
    CpuTimes,
    NetIo,
    DiskIo,
}

/// psq - query process and system information
#[derive(Parser, Debug)]
#[command(name = "psq", version)]
struct Args {
    /// Target process (defaults to psq itself)
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pid: Option<Pid>,

    /// Timeout for `wait`, in milliseconds (waits forever when omitted)
    #[arg(short = 't', long = "timeout", value_name = "MS")]
    timeout: Option<u64>,

    /// Fact to print
    #[arg(value_enum)]
    fact: Fact,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(config::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_fact(pid: Pid, fact: Fact, timeout: Option<Duration>) -> Result<()> {
    match fact {
        Fact::Pids => {
            for pid in system::pids()? {
                println!("{}", pid);
            }
        }
        Fact::PpidMap => {
            let mut pairs: Vec<_> = system::ppid_map()?.into_iter().collect();
            pairs.sort_unstable();
            for (pid, ppid) in pairs {
                println!("{:<8} {}", pid, ppid);
            }
        }
        Fact::BootTime => println!("{}", system::boot_time()?.to_rfc3339()),
        Fact::CpuCount => println!("{}", system::cpu_count_logical()?),
        Fact::CpuTimes => println!("{:?}", system::cpu_times()?),
        Fact::NetIo => {
            for nic in system::net_io_counters()? {
                println!(
                    "{:<16} sent={} recv={} errin={} errout={}",
                    nic.name, nic.bytes_sent, nic.bytes_recv, nic.errin, nic.errout
                );
            }
        }
        Fact::DiskIo => {
            for disk in system::disk_io_counters()? {
                println!(
                    "{:<16} reads={} writes={} read_bytes={} write_bytes={}",
                    disk.name, disk.read_count, disk.write_count, disk.read_bytes, disk.write_bytes
                );
            }
        }
        Fact::Exists => println!("{}", process::pid_exists(pid)),
        Fact::Name => println!("{}", process::name(pid)?),
        Fact::Exe => println!("{}", process::exe(pid)?.display()),
        Fact::Cmdline => println!("{}", process::cmdline(pid)?.join(" ")),
        Fact::Environ => {
            let mut vars: Vec<_> = process::environ(pid)?.into_iter().collect();
            vars.sort();
            for (key, value) in vars {
                println!("{}={}", key, value);
            }
        }
        Fact::Cwd => println!("{}", process::cwd(pid)?.display()),
        Fact::Times => println!("{:?}", process::times(pid)?),
        Fact::Memory => println!("{:?}", process::memory_info(pid)?),
        Fact::Uss => println!("{}", process::memory_uss(pid)?),
        Fact::Maps => {
            for region in process::memory_maps(pid)? {
                println!(
                    "{:016x} {:>10} {:<4} {}",
                    region.base,
                    region.size,
                    region.protection,
                    region
                        .path
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                );
            }
        }
        Fact::Io => println!("{:?}", process::io_counters(pid)?),
        Fact::Priority => println!("{}", process::priority(pid)?),
        Fact::IoPriority => println!("{:?}", process::io_priority(pid)?),
        Fact::Affinity => println!("{:?}", process::cpu_affinity(pid)?),
        Fact::Handles => println!("{}", process::num_handles(pid)?),
        Fact::OpenFiles => {
            for file in process::open_files(pid)? {
                println!("{:<6} {}", file.fd, file.path.display());
            }
        }
        Fact::Threads => {
            for thread in process::threads(pid)? {
                println!(
                    "{:<8} user={:.3}s system={:.3}s",
                    thread.id,
                    thread.user.as_secs_f64(),
                    thread.system.as_secs_f64()
                );
            }
        }
        Fact::Suspended => println!("{}", process::is_suspended(pid)?),
        Fact::Suspend => process::suspend(pid)?,
        Fact::Resume => process::resume(pid)?,
        Fact::Kill => process::kill(pid)?,
        Fact::Wait => println!("{:?}", process::wait(pid, timeout)?),
        Fact::Username => println!("{}", process::username(pid)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let pid = args.pid.unwrap_or(std::process::id() as Pid);
    let timeout = args.timeout.map(Duration::from_millis);
    print_fact(pid, args.fact, timeout).with_context(|| format!("{:?} (pid {})", args.fact, pid))
}
