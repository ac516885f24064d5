use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::StoreConfig;
use crate::error::{CronbeatError, Result};
use crate::store::engine::{KeyValue, KvEngine, LeaseId, WatchEvent, NO_PRIOR_REVISION};
use crate::store::keys::Keyspace;

/// Client wrapper every core component holds.
///
/// Adds to the raw engine: fail-fast when used before [`connect`],
/// per-request deadlines that surface the configured endpoint set on
/// timeout, and the lock helper built from create-if-absent CAS.
/// Cheap to clone; clones share the connection.
///
/// [`connect`]: Coordinator::connect
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    engine: RwLock<Option<Arc<dyn KvEngine>>>,
    config: StoreConfig,
    keyspace: Keyspace,
}

impl Coordinator {
    /// A disconnected client. Every operation fails with `NotConnected`
    /// until [`Coordinator::connect`] is called.
    pub fn new(config: StoreConfig) -> Self {
        let keyspace = Keyspace::new(config.namespace.clone());
        Self {
            inner: Arc::new(Inner {
                engine: RwLock::new(None),
                config,
                keyspace,
            }),
        }
    }

    pub fn connected(config: StoreConfig, engine: Arc<dyn KvEngine>) -> Self {
        let coordinator = Self::new(config);
        coordinator.connect(engine);
        coordinator
    }

    pub fn connect(&self, engine: Arc<dyn KvEngine>) {
        *self.inner.engine.write().expect("engine slot poisoned") = Some(engine);
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.inner.keyspace
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn engine(&self) -> Result<Arc<dyn KvEngine>> {
        self.inner
            .engine
            .read()
            .expect("engine slot poisoned")
            .clone()
            .ok_or(CronbeatError::NotConnected)
    }

    /// Bound an engine call by the configured request timeout. Retry
    /// policy belongs to callers.
    async fn deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.inner.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CronbeatError::StoreTimeout(
                self.inner.config.endpoints.clone(),
            )),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let engine = self.engine()?;
        self.deadline(engine.get(key)).await
    }

    pub async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let engine = self.engine()?;
        self.deadline(engine.get_prefix(prefix)).await
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<i64> {
        let engine = self.engine()?;
        self.deadline(engine.put(key, value)).await
    }

    /// Bind the value to a freshly granted lease so it vanishes within
    /// `ttl_secs` if the writer crashes.
    pub async fn put_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<i64> {
        let engine = self.engine()?;
        let lease = self.deadline(engine.lease_grant(ttl_secs)).await?;
        self.deadline(engine.put_with_lease(key, value, lease)).await
    }

    /// Conditional write against the last-read revision.
    /// `NO_PRIOR_REVISION` makes this a create-if-absent.
    pub async fn cas_put(&self, key: &str, value: Vec<u8>, expected_revision: i64) -> Result<i64> {
        let engine = self.engine()?;
        self.deadline(engine.cas_put(key, value, expected_revision, None))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let engine = self.engine()?;
        self.deadline(engine.delete(key)).await
    }

    pub async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId> {
        let engine = self.engine()?;
        self.deadline(engine.lease_grant(ttl_secs)).await
    }

    pub async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        let engine = self.engine()?;
        self.deadline(engine.lease_revoke(lease)).await
    }

    /// Open an unbounded change stream under `prefix`.
    pub fn watch_prefix(&self, prefix: &str) -> Result<UnboundedReceiverStream<WatchEvent>> {
        let engine = self.engine()?;
        Ok(UnboundedReceiverStream::new(engine.watch_prefix(prefix)))
    }

    /// Try to take the named lock: a create-if-absent of the reserved
    /// lock key bound to the caller's lease, so a crashed holder releases
    /// it at lease expiry. Returns whether the lock was acquired.
    pub async fn try_lock(&self, name: &str, lease: LeaseId) -> Result<bool> {
        let engine = self.engine()?;
        let key = self.inner.keyspace.lock(name);
        match self
            .deadline(engine.cas_put(&key, Vec::new(), NO_PRIOR_REVISION, Some(lease)))
            .await
        {
            Ok(_) => Ok(true),
            Err(CronbeatError::CasConflict(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Explicit release for a lock taken with [`Coordinator::try_lock`].
    pub async fn unlock(&self, name: &str) -> Result<()> {
        let key = self.inner.keyspace.lock(name);
        self.delete(&key).await?;
        Ok(())
    }
}
