//! One invocation: acquire, supervise and renew, tear down.

use crate::config::GuardSettings;
use crate::error::exit;
use crate::lease::{LeaseStore, LockManager, LockState};
use crate::renewal::{self, LossReason, RenewalEvent};
use crate::signal::Shutdown;
use crate::supervisor::{GuardedProcess, TerminationReason};
use crate::Result;
use std::future::Future;
use std::process::ExitStatus;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Whether we currently believe we hold the lease.
/// Changed only by renewal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Held,
    Lost,
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Someone else holds the lock; nothing was spawned
    NotOwner { lock_name: String },
    /// Asked to stop after acquiring but before spawning
    Interrupted(Shutdown),
    /// The guarded command ran and exited on its own
    Exited { code: i32 },
    /// The lease was lost and the command was killed
    LeaseLost { reason: LossReason, code: i32 },
    /// Asked to stop while the command was running; it was killed
    ShutDown { shutdown: Shutdown, code: i32 },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::NotOwner { .. } => exit::NOT_OWNER,
            Outcome::Interrupted(shutdown) | Outcome::ShutDown { shutdown, .. } => shutdown.exit_code(),
            Outcome::Exited { code } => *code,
            Outcome::LeaseLost { .. } => exit::LEASE_LOST,
        }
    }

    /// Why the guarded process stopped, if one was spawned
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self {
            Outcome::NotOwner { .. } | Outcome::Interrupted(_) => None,
            Outcome::Exited { .. } => Some(TerminationReason::NormalExit),
            Outcome::LeaseLost { .. } => Some(TerminationReason::KilledLeaseLost),
            Outcome::ShutDown { .. } => Some(TerminationReason::KilledShutdown),
        }
    }
}

enum Ending {
    Exited(Result<ExitStatus>),
    Lost(LossReason),
    Shutdown(Shutdown),
}

/// Run the guarded command if, and only while, this invocation owns the lock.
///
/// `shutdown` resolves when the tool is asked to stop; it takes the same
/// teardown path as a lost lease.
pub async fn run<F>(guard: &GuardSettings, store: Arc<dyn LeaseStore>, shutdown: F) -> Result<Outcome>
where
    F: Future<Output = Shutdown>,
{
    tokio::pin!(shutdown);

    info!("Trying lock '{}' on {}", guard.lock_name, store.describe());
    let mut manager = LockManager::new(store);
    let state = tokio::select! {
        biased;
        shutdown = &mut shutdown => {
            // A create still in flight, if it lands, expires with its TTL
            warn!("{} received while acquiring '{}', shutting down...", shutdown, guard.lock_name);
            return Ok(Outcome::Interrupted(shutdown));
        }
        state = manager.acquire(&guard.lock_name, guard.lease.ttl) => state?,
    };
    if state != LockState::Held {
        return Ok(Outcome::NotOwner {
            lock_name: guard.lock_name.clone(),
        });
    }

    // A signal that arrived as acquisition completed still wins over spawning
    tokio::select! {
        biased;
        shutdown = &mut shutdown => {
            warn!("{} received before spawning, shutting down...", shutdown);
            manager.release().await;
            return Ok(Outcome::Interrupted(shutdown));
        }
        _ = std::future::ready(()) => {}
    }

    let mut process = match GuardedProcess::start(&guard.command) {
        Ok(process) => process,
        Err(e) => {
            manager.release().await;
            return Err(e);
        }
    };
    let mut renewal = renewal::spawn(manager, guard.lease.into());
    let mut ownership = Ownership::Held;

    let ending = loop {
        tokio::select! {
            status = process.wait() => break Ending::Exited(status),
            event = renewal.next_event() => match event {
                Some(RenewalEvent::Renewed { renewal_count }) => {
                    debug!("Lease renewed ({} so far)", renewal_count);
                }
                Some(RenewalEvent::Lost(reason)) => {
                    ownership = Ownership::Lost;
                    break Ending::Lost(reason);
                }
                None => {
                    ownership = Ownership::Lost;
                    break Ending::Lost(LossReason::Backend("renewal loop ended unexpectedly".to_string()));
                }
            },
            shutdown = &mut shutdown => break Ending::Shutdown(shutdown),
        }
    };

    let teardown = match ending {
        Ending::Exited(Ok(status)) => {
            process.sweep();
            Ok(Outcome::Exited {
                code: GuardedProcess::exit_code(status),
            })
        }
        Ending::Exited(Err(e)) => {
            error!("Lost track of PID {}: {}", process.pid(), e);
            if let Err(kill) = process.terminate(guard.kill_grace).await {
                warn!("Could not stop process group {}: {}", process.pid(), kill);
            }
            Err(e)
        }
        Ending::Lost(reason) => {
            debug_assert_eq!(ownership, Ownership::Lost);
            error!(
                "Lock '{}' lost ({}), stopping PID {}",
                guard.lock_name,
                reason,
                process.pid()
            );
            process
                .terminate(guard.kill_grace)
                .await
                .map(|status| Outcome::LeaseLost {
                    reason,
                    code: GuardedProcess::exit_code(status),
                })
        }
        Ending::Shutdown(shutdown) => {
            warn!("{} received, shutting down...", shutdown);
            process
                .terminate(guard.kill_grace)
                .await
                .map(|status| Outcome::ShutDown {
                    shutdown,
                    code: GuardedProcess::exit_code(status),
                })
        }
    };

    // The command is gone; only now may the lease go
    if let Some(mut manager) = renewal.stop().await {
        if ownership == Ownership::Held {
            manager.release().await;
        }
    }

    let outcome = teardown?;
    if let Some(reason) = outcome.termination_reason() {
        let runtime = process.runtime();
        match &outcome {
            Outcome::Exited { code } if *code != 0 => error!(
                "Child died with exit code {} after {}s ({})",
                code,
                runtime.num_seconds(),
                reason
            ),
            _ => info!(
                "PID {} ({:?} mode: {}) finished after {}s ({}), tool exits with {}",
                process.pid(),
                process.mode(),
                process.command(),
                runtime.num_seconds(),
                reason,
                outcome.exit_code()
            ),
        }
    }
    Ok(outcome)
}
