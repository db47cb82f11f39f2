//! System-wide per-core CPU load over a measurement interval.
//!
//! The kernel exposes per-core time counters accumulated since boot, so load
//! over a run is computed from two snapshots: one taken before the subject is
//! spawned and one after it has finished.

use std::fmt;
use std::io;

/// Time spent by one core in each state, in clock ticks since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CoreTimes {
    /// Sum over all states. Guest time is already included in user/nice.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// Per-core counters at one instant, ordered by core index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuSnapshot {
    pub cores: Vec<CoreTimes>,
}

impl CpuSnapshot {
    /// Reads the current per-core counters from the host.
    #[cfg(target_os = "linux")]
    pub fn take() -> io::Result<Self> {
        let content = std::fs::read_to_string("/proc/stat")?;
        parse_proc_stat(&content)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn take() -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "per-core CPU times are not available on this platform",
        ))
    }
}

/// Parses the `cpuN` lines of `/proc/stat`, skipping the aggregate `cpu`
/// line.
pub fn parse_proc_stat(content: &str) -> io::Result<CpuSnapshot> {
    let mut cores = Vec::new();

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let Some(index) = label.strip_prefix("cpu") else {
            continue;
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }

        let values: Vec<u64> = fields
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if values.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: expected at least 4 counters", label),
            ));
        }

        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        cores.push(CoreTimes {
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            softirq: at(6),
            steal: at(7),
        });
    }

    if cores.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no per-core cpu lines found",
        ));
    }

    Ok(CpuSnapshot { cores })
}

/// A core whose counters did not advance between the two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    Unmeasurable { core: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Unmeasurable { core } => {
                write!(f, "cpu{} counters did not advance", core)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Busy percentage of each core between `before` and `after`.
///
/// Cores are paired by index; if the core count changed in between, only
/// the common prefix is reported.
///
/// # Errors
///
/// [`LoadError::Unmeasurable`] names the first core whose total time did
/// not advance, which happens when the interval is shorter than one kernel
/// tick.
pub fn load_per_core(before: &CpuSnapshot, after: &CpuSnapshot) -> Result<Vec<u8>, LoadError> {
    before
        .cores
        .iter()
        .zip(&after.cores)
        .enumerate()
        .map(|(core, (t0, t1))| {
            let total = t1.total().saturating_sub(t0.total());
            if total == 0 {
                return Err(LoadError::Unmeasurable { core });
            }
            let idle = t1.idle.saturating_sub(t0.idle).min(total);
            let percent = 100.0 * (1.0 - idle as f64 / total as f64);
            Ok(percent.round().clamp(0.0, 100.0) as u8)
        })
        .collect()
}
