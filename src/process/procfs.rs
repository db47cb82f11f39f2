//! Cumulative per-process counters read from `/proc/<pid>`.

use std::fs;
use std::io;
use std::sync::OnceLock;

/// Cumulative CPU time in seconds, as accounted by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
}

/// Cumulative context switch counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtxSwitchCounts {
    pub voluntary: u64,
    pub involuntary: u64,
}

fn clock_ticks() -> f64 {
    static TICKS: OnceLock<f64> = OnceLock::new();
    *TICKS.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks > 0 {
            ticks as f64
        } else {
            100.0
        }
    })
}

pub fn read_cpu_times(pid: u32) -> io::Result<CpuTimes> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid))?;
    parse_stat(&content, clock_ticks())
}

pub fn read_ctx_switches(pid: u32) -> io::Result<CtxSwitchCounts> {
    let content = fs::read_to_string(format!("/proc/{}/status", pid))?;
    parse_status(&content)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Parses `utime`/`stime` out of a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or parentheses, so fields are counted from the last `)`.
fn parse_stat(content: &str, ticks_per_sec: f64) -> io::Result<CpuTimes> {
    let after_comm = content
        .rfind(')')
        .map(|idx| &content[idx + 1..])
        .ok_or_else(|| invalid("malformed stat: no command terminator"))?;

    // Field 3 (state) is the first token after the command name, so
    // utime (field 14) and stime (field 15) are tokens 11 and 12.
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    if fields.len() < 13 {
        return Err(invalid("malformed stat: too few fields"));
    }

    let utime: u64 = fields[11]
        .parse()
        .map_err(|_| invalid("malformed stat: utime"))?;
    let stime: u64 = fields[12]
        .parse()
        .map_err(|_| invalid("malformed stat: stime"))?;

    Ok(CpuTimes {
        user: utime as f64 / ticks_per_sec,
        system: stime as f64 / ticks_per_sec,
    })
}

fn parse_status(content: &str) -> io::Result<CtxSwitchCounts> {
    let mut voluntary = None;
    let mut involuntary = None;

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("voluntary_ctxt_switches:") {
            voluntary = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("nonvoluntary_ctxt_switches:") {
            involuntary = rest.trim().parse().ok();
        }
    }

    match (voluntary, involuntary) {
        (Some(voluntary), Some(involuntary)) => Ok(CtxSwitchCounts {
            voluntary,
            involuntary,
        }),
        _ => Err(invalid("status has no context switch counters")),
    }
}
