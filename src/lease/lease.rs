// Core lease data structures

use crate::supervisor::CommandSpec;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Prefix of lock names derived from the guarded command
pub const LOCK_NAME_PREFIX: &str = "beatcop:";

/// Opaque value written into the store to prove which invocation owns a lease
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Generate a token unique to this invocation.
    /// Host and pid come first so the holder is recognisable in logs.
    pub fn generate() -> Self {
        Self(format!(
            "{}-{}-{}",
            crate::util::hostname(),
            std::process::id(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock name for a command without an explicit `lockname`.
///
/// Derived from the canonical form of the command, so equivalent spellings
/// of the same direct-mode argv map to the same lock on every node.
pub fn derive_lock_name(command: &CommandSpec) -> String {
    let digest = blake3::hash(&command.canonical());
    format!("{}{}", LOCK_NAME_PREFIX, digest.to_hex())
}

/// A lease this invocation holds (or held) in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Key in the store
    pub name: String,

    /// Value written under `name`
    pub owner_token: OwnerToken,

    /// Expiry applied on creation and on every renewal
    pub ttl: Duration,

    /// Local, conservative estimate of when the store expires the lease
    pub expires_at: Option<Instant>,

    /// Number of successful renewals
    pub renewal_count: u32,
}

impl Lease {
    pub fn new(name: String, owner_token: OwnerToken, ttl: Duration) -> Self {
        Self {
            name,
            owner_token,
            ttl,
            expires_at: None,
            renewal_count: 0,
        }
    }

    /// Record a successful create or refresh that was *sent* at `sent_at`.
    /// Using the send time keeps the estimate on the early side of the
    /// store's real expiry.
    pub fn refreshed(&mut self, sent_at: Instant) {
        self.expires_at = Some(sent_at + self.ttl);
    }

    /// Record a successful renewal
    pub fn renewed(&mut self, sent_at: Instant) {
        self.refreshed(sent_at);
        self.renewal_count += 1;
    }

    /// Time remaining until expiration.
    /// `None` once expired, or if the lease was never created.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .filter(|expires_at| now < *expires_at)
            .map(|expires_at| expires_at - now)
    }
}
