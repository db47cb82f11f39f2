//! Background sampling of a live process tree.
//!
//! A [`ResourceTracker`] owns one sampling thread for the lifetime of a run.
//! The thread is the only writer of its [`TrackerState`]; the supervisor gets
//! the state back from [`ResourceTracker::stop`], which joins the thread, so
//! the final read never races a write.

use std::fmt;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One resource reading of the subject process (and its descendants for
/// memory).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// RSS of the process plus all live descendants.
    pub resident_memory_bytes: u64,
    /// Cumulative user CPU seconds of the process.
    pub user_time: f64,
    /// Cumulative system CPU seconds of the process.
    pub system_time: f64,
    pub voluntary_ctx_switches: u64,
    pub involuntary_ctx_switches: u64,
    pub timestamp: Instant,
}

/// Running aggregate over all samples of a run.
///
/// `peak_memory_bytes` is a running maximum. The CPU and context switch
/// fields hold the latest reading; the kernel counters are already
/// cumulative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    pub peak_memory_bytes: u64,
    pub last_user_time: f64,
    pub last_system_time: f64,
    pub last_voluntary_ctx: u64,
    pub last_involuntary_ctx: u64,
    pub samples: u64,
}

impl TrackerState {
    /// Folds one sample into the aggregate.
    pub fn observe(&mut self, sample: &Sample) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(sample.resident_memory_bytes);
        self.last_user_time = sample.user_time;
        self.last_system_time = sample.system_time;
        self.last_voluntary_ctx = sample.voluntary_ctx_switches;
        self.last_involuntary_ctx = sample.involuntary_ctx_switches;
        self.samples += 1;
    }

    /// True when the process ended before the first sample was taken.
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

/// Why a probe could not produce a sample.
#[derive(Debug)]
pub enum ProbeError {
    /// The process is gone or a zombie. Ends sampling without complaint.
    Exited,
    /// This platform cannot provide the counters.
    Unsupported,
    Io(io::Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Exited => write!(f, "process has exited"),
            ProbeError::Unsupported => {
                write!(f, "process counters are not available on this platform")
            }
            ProbeError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Source of [`Sample`]s for a pid.
pub trait ProcessProbe: Send + 'static {
    fn sample(&mut self, pid: u32) -> Result<Sample, ProbeError>;
}

/// Handle to a running sampling thread.
pub struct ResourceTracker {
    stop_tx: Sender<()>,
    handle: JoinHandle<TrackerState>,
}

impl ResourceTracker {
    /// Starts sampling `pid` every `poll_interval` until the process exits,
    /// `deadline` passes, or [`stop`](Self::stop) is called.
    ///
    /// The tracker only reads from the process; it never signals it.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the sampling thread.
    pub fn start<P: ProcessProbe>(
        probe: P,
        pid: u32,
        poll_interval: Duration,
        deadline: Instant,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(format!("procmeter-tracker-{}", pid))
            .spawn(move || {
                let mut probe = probe;
                let mut state = TrackerState::default();

                while Instant::now() < deadline {
                    match probe.sample(pid) {
                        Ok(sample) => state.observe(&sample),
                        Err(ProbeError::Exited) => break,
                        Err(e) => {
                            log::error!("Sampling pid {} failed: {}", pid, e);
                            break;
                        }
                    }

                    // Doubles as the sleep: a stop request (or a dropped
                    // sender) wakes the thread immediately.
                    match stop_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                state
            })?;

        Ok(Self { stop_tx, handle })
    }

    /// Stops sampling and returns the final aggregate.
    ///
    /// Call only once the process has exited or been killed. A panicked
    /// sampling thread is logged and yields an empty state.
    pub fn stop(self) -> TrackerState {
        let _ = self.stop_tx.send(());
        match self.handle.join() {
            Ok(state) => {
                log::debug!("Tracker stopped after {} samples", state.samples);
                state
            }
            Err(_) => {
                log::error!("Sampling thread panicked; memory and CPU data lost");
                TrackerState::default()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Probe replaying a fixed script of readings.
    pub(crate) struct ScriptedProbe {
        pub script: VecDeque<Result<Sample, ProbeError>>,
    }

    impl ScriptedProbe {
        pub fn new(script: Vec<Result<Sample, ProbeError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl ProcessProbe for ScriptedProbe {
        fn sample(&mut self, _pid: u32) -> Result<Sample, ProbeError> {
            self.script.pop_front().unwrap_or(Err(ProbeError::Exited))
        }
    }

    pub(crate) fn sample(mem: u64, user: f64, system: f64, vol: u64, invol: u64) -> Sample {
        Sample {
            resident_memory_bytes: mem,
            user_time: user,
            system_time: system,
            voluntary_ctx_switches: vol,
            involuntary_ctx_switches: invol,
            timestamp: Instant::now(),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_observe_keeps_peak_memory() {
        let mut state = TrackerState::default();
        let readings = [100, 400, 250, 900, 10, 899];
        let mut running_max = 0;
        for mem in readings {
            state.observe(&sample(mem, 0.0, 0.0, 0, 0));
            assert!(state.peak_memory_bytes >= running_max);
            running_max = state.peak_memory_bytes;
        }
        assert_eq!(state.peak_memory_bytes, 900);
    }

    #[test]
    fn test_observe_overwrites_counters_with_latest() {
        let mut state = TrackerState::default();
        state.observe(&sample(1, 0.5, 0.1, 10, 2));
        state.observe(&sample(1, 0.7, 0.2, 15, 3));

        assert!((state.last_user_time - 0.7).abs() < f64::EPSILON);
        assert!((state.last_system_time - 0.2).abs() < f64::EPSILON);
        assert_eq!(state.last_voluntary_ctx, 15);
        assert_eq!(state.last_involuntary_ctx, 3);
        assert_eq!(state.samples, 2);
    }

    #[test]
    fn test_default_state_is_empty() {
        let state = TrackerState::default();
        assert!(state.is_empty());
        assert_eq!(state.peak_memory_bytes, 0);
    }

    #[test]
    fn test_fold_is_deterministic() {
        let script = || {
            vec![
                sample(10, 0.1, 0.0, 1, 0),
                sample(30, 0.2, 0.1, 4, 1),
                sample(20, 0.4, 0.1, 9, 1),
            ]
        };
        let fold = |samples: Vec<Sample>| {
            let mut state = TrackerState::default();
            samples.iter().for_each(|s| state.observe(s));
            state
        };
        assert_eq!(fold(script()), fold(script()));
    }

    #[test]
    fn test_tracker_runs_until_process_exits() {
        let probe = ScriptedProbe::new(vec![
            Ok(sample(100, 0.1, 0.0, 1, 0)),
            Ok(sample(300, 0.2, 0.1, 2, 0)),
            Ok(sample(200, 0.3, 0.1, 3, 1)),
            Err(ProbeError::Exited),
        ]);
        let tracker =
            ResourceTracker::start(probe, 1, Duration::from_millis(1), far_deadline()).unwrap();
        thread::sleep(Duration::from_millis(100));
        let state = tracker.stop();

        assert_eq!(state.samples, 3);
        assert_eq!(state.peak_memory_bytes, 300);
        assert!((state.last_user_time - 0.3).abs() < f64::EPSILON);
        assert_eq!(state.last_involuntary_ctx, 1);
    }

    #[test]
    fn test_tracker_keeps_partial_state_on_read_failure() {
        let probe = ScriptedProbe::new(vec![
            Ok(sample(500, 1.0, 0.5, 7, 2)),
            Err(ProbeError::Io(io::Error::other("boom"))),
            Ok(sample(9000, 9.0, 9.0, 99, 99)),
        ]);
        let tracker =
            ResourceTracker::start(probe, 1, Duration::from_millis(1), far_deadline()).unwrap();
        thread::sleep(Duration::from_millis(100));
        let state = tracker.stop();

        assert_eq!(state.samples, 1);
        assert_eq!(state.peak_memory_bytes, 500);
    }

    #[test]
    fn test_tracker_fast_exit_leaves_zero_state() {
        let probe = ScriptedProbe::new(vec![Err(ProbeError::Exited)]);
        let tracker =
            ResourceTracker::start(probe, 1, Duration::from_millis(50), far_deadline()).unwrap();
        let state = tracker.stop();
        assert!(state.is_empty());
    }

    #[test]
    fn test_stop_interrupts_long_poll_interval() {
        let probe = ScriptedProbe::new(
            (0..10).map(|i| Ok(sample(i, 0.0, 0.0, 0, 0))).collect(),
        );
        let tracker =
            ResourceTracker::start(probe, 1, Duration::from_secs(30), far_deadline()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let state = tracker.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(state.samples, 1);
    }

    #[test]
    fn test_past_deadline_takes_no_samples() {
        let probe = ScriptedProbe::new(vec![Ok(sample(1, 0.0, 0.0, 0, 0))]);
        let tracker =
            ResourceTracker::start(probe, 1, Duration::from_millis(1), Instant::now()).unwrap();
        let state = tracker.stop();
        assert!(state.is_empty());
    }
}
