use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(name = "beatcop", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file with [redis] and [beatcop] sections
    #[arg(required = true, value_parser)]
    pub config: PathBuf,

    /// Lock name, overrides `lockname` from the configuration file
    #[arg(long, env = "BEATCOP_LOCK_NAME")]
    pub lock_name: Option<String>,

    /// Verbose mode (-v, -vv)
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    /// Default log filter for the verbosity level; `RUST_LOG` takes precedence
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
