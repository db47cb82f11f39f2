//! Runs one subject command under measurement.
//!
//! The supervisor owns the child process for its whole life: it spawns it,
//! races its exit against the deadline, kills the tree on timeout or
//! interrupt, and reduces everything into a [`ResultRecord`].

use std::ffi::OsStr;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{Pid, System};

use crate::cpu::{load_per_core, CpuSnapshot};
use crate::error::{MeterError, Result};
use crate::outcome::{classify, Outcome, Termination};
use crate::process::{
    affinity, tree, ProcessMonitor, ProcessProbe, ResourceTracker, TrackerState,
};
use crate::record::ResultRecord;
use crate::signal::SignalHandler;

/// How often the bounded wait checks for exit, deadline and interrupt.
const WAIT_TICK: Duration = Duration::from_millis(5);

/// Longest run time honoured; larger limits are clamped so the deadline
/// stays representable as an `Instant`.
const MAX_RUN_TIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// How long a subject that died from SIGINT waits for the interrupt flag.
/// A terminal Ctrl+C signals the whole process group, and the subject can
/// be reaped before our own handler thread has run.
const INTERRUPT_GRACE: Duration = Duration::from_millis(100);

/// Knobs for a measured run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Delay between two resource samples.
    pub poll_interval: Duration,
    /// Hard limit on the subject's run time.
    pub max_time: Duration,
    /// Bit *i* allows logical CPU *i*. Ignored where unsupported.
    pub affinity_mask: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_time: Duration::from_secs(3600),
            affinity_mask: None,
        }
    }
}

/// Standard stream handles for the subject. `None` inherits ours.
#[derive(Debug, Default)]
pub struct Redirection {
    pub stdin: Option<Stdio>,
    pub stdout: Option<Stdio>,
    pub stderr: Option<Stdio>,
}

impl Redirection {
    /// All three streams connected to the null device.
    pub fn null() -> Self {
        Self {
            stdin: Some(Stdio::null()),
            stdout: Some(Stdio::null()),
            stderr: Some(Stdio::null()),
        }
    }

    fn apply(self, command: &mut Command) {
        if let Some(stdin) = self.stdin {
            command.stdin(stdin);
        }
        if let Some(stdout) = self.stdout {
            command.stdout(stdout);
        }
        if let Some(stderr) = self.stderr {
            command.stderr(stderr);
        }
    }
}

/// Owns the spawned child and guarantees it does not outlive the run.
///
/// Dropping an unreaped guard kills the whole tree, so every early return
/// (and unwinding) cleans up exactly once.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// SIGKILLs the child and every descendant, then reaps the child.
    ///
    /// Descendants are enumerated before the child dies, while they are
    /// still linked to it.
    fn kill_tree(&mut self) {
        if self.reaped {
            return;
        }

        let mut system = System::new();
        tree::refresh_table(&mut system);
        let descendants = tree::descendants(&system, Pid::from_u32(self.child.id()));

        if let Err(e) = self.child.kill() {
            // Already exited but not yet reaped.
            if e.kind() != io::ErrorKind::InvalidInput {
                log::error!("Failed to kill pid {}: {}", self.child.id(), e);
            }
        }
        let killed = tree::kill_all(&system, &descendants);
        if let Err(e) = self.child.wait() {
            log::error!("Failed to reap pid {}: {}", self.child.id(), e);
        }
        self.reaped = true;

        log::debug!(
            "Killed pid {} and {} of {} descendants",
            self.child.id(),
            killed,
            descendants.len()
        );
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_tree();
    }
}

enum WaitResult {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
    Failed(io::Error),
}

fn wait_bounded(
    guard: &mut ChildGuard,
    deadline: Instant,
    interrupt: Option<&SignalHandler>,
) -> WaitResult {
    loop {
        match guard.try_wait() {
            Ok(Some(status)) if interrupted_during_exit(interrupt, &status) => {
                return WaitResult::Interrupted
            }
            Ok(Some(status)) => return WaitResult::Exited(status),
            Ok(None) => {}
            Err(e) => return WaitResult::Failed(e),
        }

        if interrupt.is_some_and(SignalHandler::is_shutdown_requested) {
            return WaitResult::Interrupted;
        }

        let now = Instant::now();
        if now >= deadline {
            return WaitResult::TimedOut;
        }
        thread::sleep(WAIT_TICK.min(deadline - now));
    }
}

/// True if the interrupt fired, including a SIGINT that reached the
/// subject just before it reached us.
fn interrupted_during_exit(interrupt: Option<&SignalHandler>, status: &ExitStatus) -> bool {
    let Some(handler) = interrupt else {
        return false;
    };
    if handler.is_shutdown_requested() {
        return true;
    }
    if !died_from_sigint(status) {
        return false;
    }

    let grace_end = Instant::now() + INTERRUPT_GRACE;
    while Instant::now() < grace_end {
        thread::sleep(WAIT_TICK);
        if handler.is_shutdown_requested() {
            return true;
        }
    }
    false
}

#[cfg(unix)]
fn died_from_sigint(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGINT)
}

#[cfg(not(unix))]
fn died_from_sigint(_status: &ExitStatus) -> bool {
    false
}

fn take_snapshot() -> Option<CpuSnapshot> {
    match CpuSnapshot::take() {
        Ok(snapshot) => Some(snapshot),
        Err(e) if e.kind() == io::ErrorKind::Unsupported => {
            log::debug!("{}", e);
            None
        }
        Err(e) => {
            log::error!("Failed to read CPU times: {}", e);
            None
        }
    }
}

fn cpu_load(before: Option<CpuSnapshot>, after: Option<CpuSnapshot>) -> Option<Vec<u8>> {
    let (before, after) = (before?, after?);
    match load_per_core(&before, &after) {
        Ok(loads) => Some(loads),
        Err(e) => {
            log::warn!("{}: too fast to measure?", e);
            None
        }
    }
}

/// Reduces a finished run into its record. Measurements that could not be
/// taken degrade the record, never the outcome.
fn finish_record(
    record: &mut ResultRecord,
    termination: Termination,
    state: &TrackerState,
    elapsed: f64,
    cpus0: Option<CpuSnapshot>,
    cpus1: Option<CpuSnapshot>,
) {
    record.outcome = classify(termination);
    if let Termination::Exited { code } = termination {
        record.exit_code = code;
    }
    record.fill_from_tracker(state, elapsed);
    record.cpu_load = cpu_load(cpus0, cpus1);
}

fn display_command<S: AsRef<OsStr>>(command_line: &[S]) -> String {
    command_line
        .iter()
        .map(|part| part.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawns, watches and classifies measured runs.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    options: RunOptions,
    interrupt: Option<SignalHandler>,
}

impl ProcessSupervisor {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            interrupt: None,
        }
    }

    /// Abandons runs when `handler` reports a shutdown request.
    pub fn with_interrupt(mut self, handler: SignalHandler) -> Self {
        self.interrupt = Some(handler);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs `command_line` once and measures it with the host probe.
    ///
    /// # Errors
    ///
    /// * [`MeterError::EmptyCommand`] if `command_line` is empty.
    /// * [`MeterError::Interrupted`] if the interrupt fired; the subject
    ///   tree is killed first and no record is produced.
    ///
    /// Spawn and wait failures are not errors: they are reported through
    /// the record's [`Outcome`].
    pub fn run<S: AsRef<OsStr>>(
        &self,
        argument: &str,
        command_line: &[S],
        redirection: Redirection,
    ) -> Result<ResultRecord> {
        self.run_with_probe(argument, command_line, redirection, ProcessMonitor::new())
    }

    /// Like [`run`](Self::run), sampling through a caller-supplied probe.
    pub fn run_with_probe<S, P>(
        &self,
        argument: &str,
        command_line: &[S],
        redirection: Redirection,
        probe: P,
    ) -> Result<ResultRecord>
    where
        S: AsRef<OsStr>,
        P: ProcessProbe,
    {
        let (program, args) = command_line
            .split_first()
            .ok_or(MeterError::EmptyCommand)?;

        let cpus0 = take_snapshot();
        let mut record = ResultRecord::unmeasured(argument, Outcome::Error);
        let start = Instant::now();

        let mut command = Command::new(program);
        command.args(args);
        redirection.apply(&mut command);
        if let Some(mask) = self.options.affinity_mask {
            affinity::apply_to_command(&mut command, mask);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let outcome = classify(Termination::SpawnFailed(e.kind()));
                if outcome == Outcome::Missing {
                    log::warn!("{}: {}", e, display_command(command_line));
                } else {
                    log::error!("Failed to spawn {}: {}", display_command(command_line), e);
                }
                record.outcome = outcome;
                return Ok(record);
            }
        };
        let mut guard = ChildGuard::new(child);
        log::debug!("Spawned pid {} for '{}'", guard.id(), argument);

        let max_time = self.options.max_time.min(MAX_RUN_TIME);
        let deadline = start + max_time;
        let tracker =
            match ResourceTracker::start(probe, guard.id(), self.options.poll_interval, deadline) {
                Ok(tracker) => Some(tracker),
                Err(e) => {
                    log::error!("Failed to start sampling thread: {}", e);
                    None
                }
            };

        let termination = match wait_bounded(&mut guard, deadline, self.interrupt.as_ref()) {
            WaitResult::Exited(status) => Termination::Exited {
                code: status.code(),
            },
            WaitResult::TimedOut => {
                log::debug!("pid {} exceeded {:?}, killing", guard.id(), max_time);
                guard.kill_tree();
                Termination::TimedOut
            }
            WaitResult::Failed(e) => {
                log::error!("Failed to wait on pid {}: {}", guard.id(), e);
                guard.kill_tree();
                Termination::WaitFailed
            }
            WaitResult::Interrupted => {
                guard.kill_tree();
                if let Some(tracker) = tracker {
                    tracker.stop();
                }
                return Err(MeterError::Interrupted);
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        let cpus1 = take_snapshot();

        // The subject is reaped, so the sampling thread can only be winding
        // down; joining it hands over the final state.
        let state = tracker.map(ResourceTracker::stop).unwrap_or_default();

        finish_record(&mut record, termination, &state, elapsed, cpus0, cpus1);
        Ok(record)
    }
}
