//! Process introspection and background sampling.
//!
//! This module provides the pieces the supervisor wires together: a probe
//! that reads a process tree's counters from the host OS, the sampling
//! thread that folds those readings, and helpers for process trees and CPU
//! affinity.

pub mod affinity;
mod monitor;
#[cfg(target_os = "linux")]
mod procfs;
pub mod tracker;
pub mod tree;

pub use monitor::ProcessMonitor;
pub use tracker::{ProbeError, ProcessProbe, ResourceTracker, Sample, TrackerState};
