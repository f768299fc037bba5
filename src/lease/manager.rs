// Lock manager - handles acquisition, renewal, and release

use super::{Lease, LeaseStore, OwnerToken};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Where this invocation stands with respect to its lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Nothing attempted yet
    Unacquired,
    /// The store confirmed our token on create or last renewal
    Held,
    /// Another owner holds the lease
    AcquisitionFailed,
    /// A renewal was refused, or renewal gave up; we must stop acting as owner
    Lost,
    /// We deleted the lease ourselves
    Released,
}

/// Owns one lease for one invocation.
///
/// Only `try_create` in the store guarantees uniqueness. Everything else
/// here tracks what that guarantee currently lets us believe.
#[derive(Debug)]
pub struct LockManager {
    store: Arc<dyn LeaseStore>,
    lease: Option<Lease>,
    state: LockState,
}

impl LockManager {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            lease: None,
            state: LockState::Unacquired,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    /// The lease this manager created or tried to create
    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// One acquisition attempt under a fresh owner token.
    ///
    /// Returns `Held` or `AcquisitionFailed`; a held lock elsewhere is an
    /// expected outcome, not an error. Backend errors propagate.
    pub async fn acquire(&mut self, name: &str, ttl: Duration) -> Result<LockState> {
        if self.state != LockState::Unacquired {
            return Ok(self.state);
        }

        let mut lease = Lease::new(name.to_string(), OwnerToken::generate(), ttl);
        let sent_at = Instant::now();
        let created = self
            .store
            .try_create(&lease.name, lease.owner_token.as_str(), ttl)
            .await?;

        if created {
            lease.refreshed(sent_at);
            info!("Lock '{}' acquired as {}", lease.name, lease.owner_token);
            self.state = LockState::Held;
        } else {
            match timeout(ttl, self.store.holder(&lease.name)).await {
                Ok(Ok(Some(holder))) => info!("Lock '{}' is currently held by {}", lease.name, holder),
                Ok(Ok(None)) => info!("Lock '{}' was taken, and released again, by another node", lease.name),
                Ok(Err(e)) => debug!("Could not look up holder of '{}': {}", lease.name, e),
                Err(_) => debug!("Timed out looking up holder of '{}'", lease.name),
            }
            self.state = LockState::AcquisitionFailed;
        }

        self.lease = Some(lease);
        Ok(self.state)
    }

    /// Refresh the lease TTL.
    ///
    /// `Ok(false)` means the store no longer has our token under the name:
    /// it expired or someone else owns it now. The manager moves to `Lost`.
    /// Errors leave the state untouched so the caller can apply its policy.
    pub async fn renew(&mut self) -> Result<bool> {
        let lease = match (&mut self.lease, self.state) {
            (Some(lease), LockState::Held) => lease,
            (lease, _) => {
                return Err(Error::NotHeld {
                    name: lease.as_ref().map(|l| l.name.clone()).unwrap_or_default(),
                })
            }
        };

        let sent_at = Instant::now();
        let renewed = self
            .store
            .renew(&lease.name, lease.owner_token.as_str(), lease.ttl)
            .await?;

        if renewed {
            lease.renewed(sent_at);
            debug!(
                "Lock '{}' refreshed (renewal #{})",
                lease.name, lease.renewal_count
            );
        } else {
            self.state = LockState::Lost;
            let holder = self.store.holder(&lease.name).await.ok().flatten();
            match holder {
                Some(holder) => warn!("Lock refresh failed, {} stole '{}'", holder, lease.name),
                None => warn!("Lock refresh failed, '{}' expired", lease.name),
            }
        }
        Ok(renewed)
    }

    /// Stop treating the lease as ours without touching the store
    pub fn mark_lost(&mut self) {
        if self.state == LockState::Held {
            self.state = LockState::Lost;
        }
    }

    /// Best-effort compare-and-delete of our lease. Failures are logged, never returned.
    /// Gives up after one TTL, by which time the store has dropped the lease anyway.
    pub async fn release(&mut self) {
        let Some(lease) = self.lease.as_ref() else {
            return;
        };
        if self.state != LockState::Held {
            debug!("Not releasing '{}' in state {:?}", lease.name, self.state);
            return;
        }

        let released = timeout(
            lease.ttl,
            self.store.release(&lease.name, lease.owner_token.as_str()),
        )
        .await;
        match released {
            Ok(Ok(true)) => info!("Lock '{}' released", lease.name),
            Ok(Ok(false)) => warn!("Lock '{}' was already gone or owned by someone else", lease.name),
            Ok(Err(e)) => warn!("Could not release lock '{}': {}", lease.name, e),
            Err(_) => warn!("Timed out releasing lock '{}', leaving it to expire", lease.name),
        }
        self.state = LockState::Released;
    }
}
