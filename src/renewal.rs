//! Background heartbeat that keeps the lease alive.
//!
//! The loop owns the [`LockManager`] while it runs and reports to the
//! orchestrator over a single-consumer channel. It never calls back into
//! the orchestrator or the supervisor. After the first loss it stops for
//! good: a stale belief of ownership is the one thing it must not produce.

use crate::config::LeaseSettings;
use crate::lease::LockManager;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossReason {
    /// The store refused the refresh: the lease expired or has another owner
    Rejected,
    /// Renewal errors ran past the tolerated count
    Backend(String),
    /// Our own expiry estimate passed before a refresh got through
    Expired,
}

impl std::fmt::Display for LossReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LossReason::Rejected => f.write_str("refresh rejected by the store"),
            LossReason::Backend(e) => write!(f, "backend failure: {}", e),
            LossReason::Expired => f.write_str("lease expired before it could be refreshed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalEvent {
    Renewed { renewal_count: u32 },
    Lost(LossReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub interval: Duration,
    pub failure_tolerance: u32,
}

impl From<LeaseSettings> for RenewalPolicy {
    fn from(lease: LeaseSettings) -> Self {
        Self {
            interval: lease.renew_interval,
            failure_tolerance: lease.failure_tolerance,
        }
    }
}

/// The orchestrator's side of a running renewal loop
#[derive(Debug)]
pub struct RenewalHandle {
    events: mpsc::Receiver<RenewalEvent>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<LockManager>,
}

impl RenewalHandle {
    /// Next event, or `None` once the loop has ended. Cancel safe.
    pub async fn next_event(&mut self) -> Option<RenewalEvent> {
        self.events.recv().await
    }

    /// Stop the loop and take the lock manager back.
    /// `None` if the loop panicked, in which case the lease is left to expire.
    pub async fn stop(mut self) -> Option<LockManager> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.await {
            Ok(manager) => Some(manager),
            Err(e) => {
                error!("Renewal loop failed: {}", e);
                None
            }
        }
    }
}

/// Start renewing the lease held by `manager`
pub fn spawn(manager: LockManager, policy: RenewalPolicy) -> RenewalHandle {
    let (event_tx, event_rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(run(manager, policy, event_tx, stop_rx));

    RenewalHandle {
        events: event_rx,
        stop: Some(stop_tx),
        task,
    }
}

async fn run(
    mut manager: LockManager,
    policy: RenewalPolicy,
    events: mpsc::Sender<RenewalEvent>,
    mut stop: oneshot::Receiver<()>,
) -> LockManager {
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        let Some(expires_at) = manager.lease().and_then(|lease| lease.expires_at) else {
            return expired(manager, &events).await;
        };

        tokio::select! {
            _ = &mut stop => {
                debug!("Renewal loop stopped");
                return manager;
            }
            _ = sleep_until(expires_at) => return expired(manager, &events).await,
            _ = ticker.tick() => {}
        }

        let Some(remaining) = manager
            .lease()
            .and_then(|lease| lease.time_remaining(Instant::now()))
        else {
            return expired(manager, &events).await;
        };

        // Never wait on the store past the point where it may have dropped the lease
        let budget = policy.interval.min(remaining);
        let failure = match timeout(budget, manager.renew()).await {
            Ok(Ok(true)) => {
                failures = 0;
                let renewal_count = manager.lease().map_or(0, |lease| lease.renewal_count);
                if events.send(RenewalEvent::Renewed { renewal_count }).await.is_err() {
                    return manager;
                }
                continue;
            }
            Ok(Ok(false)) => {
                let _ = events.send(RenewalEvent::Lost(LossReason::Rejected)).await;
                return manager;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) if budget == remaining => return expired(manager, &events).await,
            Err(_) => format!("refresh timed out after {}ms", budget.as_millis()),
        };

        failures += 1;
        if failures < policy.failure_tolerance {
            warn!(
                "Lock refresh failed ({}/{}): {}",
                failures, policy.failure_tolerance, failure
            );
            continue;
        }

        manager.mark_lost();
        let _ = events.send(RenewalEvent::Lost(LossReason::Backend(failure))).await;
        return manager;
    }
}

async fn expired(mut manager: LockManager, events: &mpsc::Sender<RenewalEvent>) -> LockManager {
    warn!("Lock expired locally before a refresh got through");
    manager.mark_lost();
    let _ = events.send(RenewalEvent::Lost(LossReason::Expired)).await;
    manager
}
