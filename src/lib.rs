pub mod config;
pub mod cpu;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod process;
pub mod record;
pub mod signal;
pub mod supervisor;

pub use error::{MeterError, Result};
pub use outcome::Outcome;
pub use record::ResultRecord;
pub use signal::SignalHandler;
pub use supervisor::{ProcessSupervisor, Redirection, RunOptions};
