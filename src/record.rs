//! The single artifact a measured run produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::Outcome;
use crate::process::TrackerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CtxSwitches {
    pub voluntary: u64,
    pub involuntary: u64,
}

/// CPU and wall-clock time of a run, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Times {
    pub user: f64,
    pub system: f64,
    pub elapsed: f64,
}

/// Outcome and measurements of one run.
///
/// Measurement fields are `None` when the subject never ran (`Missing`, or a
/// spawn error). `cpu_load` is also `None` when the run was too short for
/// the kernel counters to move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub argument: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub peak_memory_kb: Option<u64>,
    #[serde(default)]
    pub ctx_switches: Option<CtxSwitches>,
    /// Busy percentage per core. If any core's counters did not advance,
    /// the interval is treated as unmeasurable as a whole and this is `None`.
    #[serde(default)]
    pub cpu_load: Option<Vec<u8>>,
    #[serde(default)]
    pub time: Option<Times>,
}

impl ResultRecord {
    /// A record for a run that never produced measurements.
    pub fn unmeasured(argument: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            argument: argument.into(),
            outcome,
            started_at: Utc::now(),
            exit_code: None,
            peak_memory_kb: None,
            ctx_switches: None,
            cpu_load: None,
            time: None,
        }
    }

    /// Copies the tracker's final aggregate and the elapsed wall time in.
    pub fn fill_from_tracker(&mut self, state: &TrackerState, elapsed: f64) {
        self.peak_memory_kb = Some(state.peak_memory_bytes / 1024);
        self.ctx_switches = Some(CtxSwitches {
            voluntary: state.last_voluntary_ctx,
            involuntary: state.last_involuntary_ctx,
        });
        self.time = Some(Times {
            user: state.last_user_time,
            system: state.last_system_time,
            elapsed,
        });
    }

    /// Per-core loads as `"12% 3% 100%"`, or `None` if unmeasured.
    pub fn cpu_load_summary(&self) -> Option<String> {
        self.cpu_load.as_ref().map(|loads| {
            loads
                .iter()
                .map(|l| format!("{}%", l))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tracker::tests::sample;

    #[test]
    fn test_unmeasured_has_no_measurements() {
        let record = ResultRecord::unmeasured("nbody 5000", Outcome::Missing);
        assert_eq!(record.argument, "nbody 5000");
        assert_eq!(record.outcome, Outcome::Missing);
        assert!(record.peak_memory_kb.is_none());
        assert!(record.ctx_switches.is_none());
        assert!(record.cpu_load.is_none());
        assert!(record.time.is_none());
    }

    #[test]
    fn test_fill_from_tracker() {
        let mut state = TrackerState::default();
        state.observe(&sample(51_200_000, 0.25, 0.05, 12, 4));

        let mut record = ResultRecord::unmeasured("x", Outcome::Okay);
        record.fill_from_tracker(&state, 0.2);

        assert_eq!(record.peak_memory_kb, Some(50_000));
        assert_eq!(
            record.ctx_switches,
            Some(CtxSwitches {
                voluntary: 12,
                involuntary: 4
            })
        );
        let time = record.time.unwrap();
        assert!((time.user - 0.25).abs() < f64::EPSILON);
        assert!((time.elapsed - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fill_from_empty_tracker_is_zeroed() {
        let mut record = ResultRecord::unmeasured("x", Outcome::Okay);
        record.fill_from_tracker(&TrackerState::default(), 0.001);
        assert_eq!(record.peak_memory_kb, Some(0));
        assert_eq!(record.ctx_switches, Some(CtxSwitches::default()));
    }

    #[test]
    fn test_cpu_load_summary() {
        let mut record = ResultRecord::unmeasured("x", Outcome::Okay);
        assert_eq!(record.cpu_load_summary(), None);

        record.cpu_load = Some(vec![12, 3, 100]);
        assert_eq!(record.cpu_load_summary().as_deref(), Some("12% 3% 100%"));
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = ResultRecord::unmeasured("spectralnorm", Outcome::Timeout);
        record.cpu_load = Some(vec![50]);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["outcome"], "timeout");
        assert_eq!(value["cpu_load"][0], 50);
        assert!(value["time"].is_null());

        let back: ResultRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
