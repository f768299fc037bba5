use std::process::ExitCode;

use beatcop::error::exit;
use beatcop::lease::redis::connect;
use beatcop::signal::ShutdownSignals;
use beatcop::{Cli, Error, Outcome, Settings};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn invoke(cli: Cli) -> Result<Outcome, Error> {
    let settings = Settings::load(&cli.config)?.with_lock_name(cli.lock_name);

    // Before connecting, so a signal during startup is not lost
    let mut signals = ShutdownSignals::install()?;

    let store = tokio::select! {
        shutdown = signals.recv() => {
            warn!("{} received while connecting, shutting down...", shutdown);
            return Ok(Outcome::Interrupted(shutdown));
        }
        store = connect(&settings.topology, settings.guard.lease.ttl) => store?,
    };
    info!(
        "BeatCop starting on {}-{} using lock '{}'",
        beatcop::util::hostname(),
        std::process::id(),
        settings.guard.lock_name
    );
    beatcop::run(&settings.guard, store, signals.recv()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() { exit::USAGE } else { exit::SUCCESS };
            return ExitCode::from(code as u8);
        }
    };
    init_tracing(&cli);

    let code = match invoke(cli).await {
        Ok(outcome) => {
            if let Outcome::NotOwner { lock_name } = &outcome {
                info!("Lock '{}' is held elsewhere, not running", lock_name);
            }
            outcome.exit_code()
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
