use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value-with-expiry backend that arbitrates lease ownership.
///
/// Every operation must be a single atomic step on the backend. A
/// check-then-act sequence would let two nodes both pass the check.
/// Unreachable backends must surface as [`crate::Error::BackendUnavailable`],
/// never as `Ok(false)`.
#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// Create `name = token` with expiry `ttl`, only if no live lease exists.
    async fn try_create(&self, name: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Reset the expiry of `name` to `ttl`, only if it still holds `token`.
    async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `name`, only if it still holds `token`.
    async fn release(&self, name: &str, token: &str) -> Result<bool>;

    /// Current value of `name`, if any. Diagnostics only.
    async fn holder(&self, name: &str) -> Result<Option<String>>;

    /// Short description of the backend for logs
    fn describe(&self) -> String;
}
