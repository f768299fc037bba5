// Lease management for the guarded command
//
// - `LeaseStore` abstracts the coordination backend
// - `LockManager` drives acquire / renew / release against it
// - Redis and in-memory backends

pub mod lease;
pub mod manager;
pub mod memory;
pub mod redis;
pub mod store;

pub use lease::{derive_lock_name, Lease, OwnerToken};
pub use manager::{LockManager, LockState};
pub use memory::MemoryStore;
pub use store::LeaseStore;
