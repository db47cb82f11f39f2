//! Process resource probing using sysinfo and procfs.
//!
//! Memory comes from the sysinfo process table (own RSS plus every live
//! descendant). Cumulative CPU time and context switches are not exposed by
//! sysinfo and are read from procfs on Linux.

use std::io;

use sysinfo::{Pid, ProcessStatus, System};

use super::tracker::{ProbeError, ProcessProbe, Sample};
use super::tree;

/// Probes a process tree on the host OS.
///
/// Wraps `sysinfo::System` and refreshes the whole process table on every
/// sample, because the descendant set can change between ticks.
pub struct ProcessMonitor {
    system: System,
}

impl ProcessMonitor {
    /// Creates a new ProcessMonitor.
    ///
    /// The process table is empty until the first sample.
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Combined RSS of `root` and its live descendants, in bytes.
    ///
    /// Returns `None` if `root` is gone or a zombie. A descendant that exits
    /// between enumeration and lookup is skipped.
    fn tree_memory(&self, root: Pid) -> Option<u64> {
        let process = self.system.process(root)?;
        if process.status() == ProcessStatus::Zombie {
            return None;
        }

        let children: u64 = tree::descendants(&self.system, root)
            .into_iter()
            .filter_map(|pid| self.system.process(pid))
            .map(|p| p.memory())
            .sum();

        Some(process.memory() + children)
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn probe_error(e: io::Error) -> ProbeError {
    // The pid directory vanishing mid-read means the process just exited.
    if e.kind() == io::ErrorKind::NotFound {
        ProbeError::Exited
    } else {
        ProbeError::Io(e)
    }
}

impl ProcessProbe for ProcessMonitor {
    #[cfg(target_os = "linux")]
    fn sample(&mut self, pid: u32) -> Result<Sample, ProbeError> {
        use super::procfs;
        use std::time::Instant;

        tree::refresh_table(&mut self.system);
        let memory = self
            .tree_memory(Pid::from_u32(pid))
            .ok_or(ProbeError::Exited)?;

        let cpu = procfs::read_cpu_times(pid).map_err(probe_error)?;
        let ctx = procfs::read_ctx_switches(pid).map_err(probe_error)?;

        Ok(Sample {
            resident_memory_bytes: memory,
            user_time: cpu.user,
            system_time: cpu.system,
            voluntary_ctx_switches: ctx.voluntary,
            involuntary_ctx_switches: ctx.involuntary,
            timestamp: Instant::now(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&mut self, pid: u32) -> Result<Sample, ProbeError> {
        tree::refresh_table(&mut self.system);
        if self.tree_memory(Pid::from_u32(pid)).is_none() {
            return Err(ProbeError::Exited);
        }
        Err(ProbeError::Unsupported)
    }
}
