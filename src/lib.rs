//! Run a command on at most one node at a time.
//!
//! Each invocation makes a single attempt to take an expiring lease in
//! Redis. The winner runs the command and refreshes the lease in the
//! background. If a refresh fails, the command and everything it forked is
//! killed. Losers exit straight away with [`error::exit::NOT_OWNER`].

pub mod cli;
pub mod config;
pub mod error;
pub mod lease;
pub mod orchestrator;
pub mod renewal;
pub mod signal;
pub mod supervisor;
pub mod util;

pub use cli::Cli;
pub use config::{GuardSettings, Settings};
pub use error::{Error, Result};
pub use orchestrator::{run, Outcome};
