// Process-local lease store

use super::LeaseStore;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Record {
    value: String,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`LeaseStore`] with the same semantics as the Redis backend.
///
/// Each operation runs under the map's per-key lock, which makes it atomic
/// with respect to every other operation on the same name. Expiry uses
/// tokio's clock so tests can drive it with paused time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Record>,
    unavailable: AtomicBool,
    stalled: AtomicBool,
    renewals: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `BackendUnavailable` until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every call started from now on hang forever, like a backend
    /// that accepts the connection and never answers
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Successful renewals across all names
    pub fn renewals(&self) -> u32 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Unconditionally write `name = value`, as another node stealing or
    /// re-creating the lease would.
    pub fn overwrite(&self, name: &str, value: &str, ttl: Duration) {
        self.records.insert(
            name.to_string(),
            Record {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop `name` as if its expiry had passed
    pub fn expire(&self, name: &str) {
        self.records.remove(name);
    }

    /// Remaining time to live of `name`, if it is live
    pub fn ttl(&self, name: &str) -> Option<Duration> {
        let now = Instant::now();
        self.records
            .get(name)
            .filter(|record| record.is_live(now))
            .map(|record| record.expires_at - now)
    }

    async fn check_available(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::BackendUnavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_create(&self, name: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.check_available().await?;
        let now = Instant::now();
        let record = Record {
            value: token.to_string(),
            expires_at: now + ttl,
        };

        match self.records.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(record);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(true)
            }
        }
    }

    async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.check_available().await?;
        let now = Instant::now();

        match self.records.get_mut(name) {
            Some(mut record) if record.is_live(now) && record.value == token => {
                record.expires_at = now + ttl;
                self.renewals.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool> {
        self.check_available().await?;
        let now = Instant::now();

        let removed = self
            .records
            .remove_if(name, |_, record| record.is_live(now) && record.value == token);
        Ok(removed.is_some())
    }

    async fn holder(&self, name: &str) -> Result<Option<String>> {
        self.check_available().await?;
        let now = Instant::now();

        Ok(self
            .records
            .get(name)
            .filter(|record| record.is_live(now))
            .map(|record| record.value.clone()))
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}
