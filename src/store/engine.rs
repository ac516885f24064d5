use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Revision expectation meaning "the key must not exist yet".
///
/// `cas_put` with this sentinel is a create-if-absent transaction.
pub const NO_PRIOR_REVISION: i64 = 0;

/// Handle to a TTL-bound lease. Keys bound to a lease are deleted by the
/// store when the lease expires without renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// One key as read from the store, with its last-modification revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub mod_revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single change observed by a prefix watch, in store order.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// Empty for delete events.
    pub value: Vec<u8>,
    pub revision: i64,
}

/// Operation set the core needs from an etcd-class coordination store.
///
/// Semantics the implementations must honor:
/// - a store-wide revision counter, bumped on every mutation;
/// - `cas_put` succeeds only when the key's current mod-revision equals
///   `expected_revision` ([`NO_PRIOR_REVISION`] means "key absent"), and
///   optionally binds the written key to a lease;
/// - lease expiry deletes every bound key and emits delete events;
/// - `watch_prefix` delivers events for matching keys in store order,
///   unbounded, from the moment of subscription.
#[async_trait]
pub trait KvEngine: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Unconditional write. Returns the new mod-revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<i64>;

    /// Write a key bound to an existing lease.
    async fn put_with_lease(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> Result<i64>;

    /// Conditional write: succeeds only if the key's mod-revision equals
    /// `expected_revision`. Fails with `CasConflict` otherwise.
    async fn cas_put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: i64,
        lease: Option<LeaseId>,
    ) -> Result<i64>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId>;

    /// Revoking deletes every key bound to the lease immediately.
    async fn lease_revoke(&self, lease: LeaseId) -> Result<()>;

    /// Subscribe to changes under a prefix. The sequence is unbounded and
    /// restartable: calling again opens a fresh subscription.
    fn watch_prefix(&self, prefix: &str) -> mpsc::UnboundedReceiver<WatchEvent>;
}
