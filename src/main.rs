//! procmeter CLI entry point.
//!
//! Runs one command under measurement and prints its record as JSON.

use clap::Parser;
use procmeter::config::{load_config, validate_config};
use procmeter::logging::init_logger;
use procmeter::{MeterError, ProcessSupervisor, Redirection, Result, SignalHandler};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};

#[derive(Parser)]
#[command(name = "procmeter")]
#[command(
    version,
    about = "Measure peak memory, CPU time and per-core load of a command",
    after_help = "EXAMPLES:
    procmeter -- ./nbody 50000000
    procmeter --timeout 60 --affinity 0x3 --stdout out.txt -- ./fasta 25000000"
)]
struct Cli {
    /// Label stored in the record (defaults to the program name)
    #[arg(long)]
    label: Option<String>,

    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Delay between resource samples
    #[arg(long, value_name = "MS")]
    poll_interval: Option<u64>,

    /// CPU affinity bitmask, decimal or 0x-prefixed hex
    #[arg(long, value_name = "MASK", value_parser = parse_mask)]
    affinity: Option<u64>,

    /// Read the command's stdin from this file
    #[arg(long, value_name = "PATH")]
    stdin: Option<PathBuf>,

    /// Write the command's stdout to this file
    #[arg(long, value_name = "PATH")]
    stdout: Option<PathBuf>,

    /// Write the command's stderr to this file
    #[arg(long, value_name = "PATH")]
    stderr: Option<PathBuf>,

    /// Config file (defaults to <config dir>/procmeter/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug details to stderr
    #[arg(short, long)]
    verbose: bool,

    /// The command to measure
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

fn parse_mask(value: &str) -> std::result::Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid affinity mask '{}': {}", value, e))
}

fn default_label(command: &[String]) -> String {
    command
        .first()
        .map(|program| {
            Path::new(program)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.clone())
        })
        .unwrap_or_default()
}

fn redirection(cli: &Cli) -> Result<Redirection> {
    Ok(Redirection {
        stdin: cli
            .stdin
            .as_deref()
            .map(File::open)
            .transpose()?
            .map(Stdio::from),
        stdout: cli
            .stdout
            .as_deref()
            .map(File::create)
            .transpose()?
            .map(Stdio::from),
        stderr: cli
            .stderr
            .as_deref()
            .map(File::create)
            .transpose()?
            .map(Stdio::from),
    })
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(secs) = cli.timeout {
        config.max_time_secs = secs;
    }
    if let Some(ms) = cli.poll_interval {
        config.poll_interval_ms = ms;
    }
    if cli.affinity.is_some() {
        config.affinity_mask = cli.affinity;
    }
    validate_config(&config).map_err(|e| MeterError::Config(e.to_string()))?;

    let label = cli
        .label
        .clone()
        .unwrap_or_else(|| default_label(&cli.command));
    let redirection = redirection(&cli)?;

    let supervisor =
        ProcessSupervisor::new(config.run_options()).with_interrupt(SignalHandler::new()?);
    let record = supervisor.run(&label, &cli.command, redirection)?;

    println!("{}", serde_json::to_string(&record)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(MeterError::Interrupted) => {
            log::warn!("{}", MeterError::Interrupted);
            ExitCode::from(130)
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mask() {
        assert_eq!(parse_mask("3"), Ok(3));
        assert_eq!(parse_mask("0xff"), Ok(255));
        assert_eq!(parse_mask("0X10"), Ok(16));
        assert!(parse_mask("zz").is_err());
    }

    #[test]
    fn test_default_label_uses_file_name() {
        let command = vec!["/usr/bin/env".to_string(), "true".to_string()];
        assert_eq!(default_label(&command), "env");
        assert_eq!(default_label(&[]), "");
    }

    #[test]
    fn test_cli_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "procmeter",
            "--timeout",
            "5",
            "--affinity",
            "0x1",
            "--",
            "sleep",
            "1",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(5));
        assert_eq!(cli.affinity, Some(1));
        assert_eq!(cli.command, vec!["sleep", "1"]);
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["procmeter"]).is_err());
    }
}
