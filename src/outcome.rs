//! Final classification of a run.

use std::io;

use serde::{Deserialize, Serialize};

/// How a run ended. Set exactly once, after the subject is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Okay,
    Error,
    Timeout,
    Missing,
}

/// What the supervisor observed about the subject's end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Spawning failed with this error kind.
    SpawnFailed(io::ErrorKind),
    /// The deadline passed and the subject was killed.
    TimedOut,
    /// Waiting on a spawned subject failed.
    WaitFailed,
    /// The subject exited on its own. `None` means it died from a signal.
    Exited { code: Option<i32> },
}

/// Maps a termination to its outcome.
///
/// Spawn failures and timeouts are structural and win over any exit code.
pub fn classify(termination: Termination) -> Outcome {
    match termination {
        Termination::SpawnFailed(kind) if is_missing(kind) => Outcome::Missing,
        Termination::SpawnFailed(_) => Outcome::Error,
        Termination::TimedOut => Outcome::Timeout,
        Termination::WaitFailed => Outcome::Error,
        Termination::Exited { code } if code == Some(libc::EXIT_SUCCESS) => Outcome::Okay,
        Termination::Exited { .. } => Outcome::Error,
    }
}

/// Spawn errors meaning the command could not be found or executed.
pub fn is_missing(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}
