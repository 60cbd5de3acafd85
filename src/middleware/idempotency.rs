//! Idempotency middleware and store
//!
//! Coalesces duplicate calls by idempotency key: the first call populates
//! the store, later calls within the TTL window get the cached result back
//! verbatim — errors and deferred tickets included, so callers coalesce
//! outcomes, not only successes. A best-effort lock turns concurrent
//! duplicates into a deterministic retryable `in_progress` error.

use crate::error::Result;
use crate::middleware::{Middleware, Next, ServiceOp};
use crate::types::{now_millis, ErrorInfo, ResultMeta, ServiceResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Stores results by idempotency key
///
/// Contract:
/// - `get(key)` returns the non-expired entry or `None`
/// - `put(key, result, ttl)` saves the result for later reuse
/// - `lock(key, ttl)` is best-effort: true iff no non-expired lock is held
/// - `unlock(key)` drops the lock unconditionally
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Arc<ServiceResult>>>;

    async fn put(&self, key: &str, result: Arc<ServiceResult>, ttl_seconds: u64) -> Result<()>;

    async fn lock(&self, key: &str, ttl_seconds: u64) -> Result<bool>;

    async fn unlock(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct StoreInner {
    /// key → (expires_at_ms, result)
    entries: HashMap<String, (u64, Arc<ServiceResult>)>,
    /// key → lock_expires_at_ms
    locks: HashMap<String, u64>,
}

/// Dev/test store; production deployments swap in a persistent backend
/// honoring the same contract
///
/// A single mutex covers both inner maps. Expiry is checked lazily on read.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<Arc<ServiceResult>>> {
        let mut inner = self.locked();
        let Some((expires_at, result)) = inner.entries.get(key) else {
            return Ok(None);
        };
        if now_millis() >= *expires_at {
            inner.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(result.clone()))
    }

    async fn put(&self, key: &str, result: Arc<ServiceResult>, ttl_seconds: u64) -> Result<()> {
        let expires_at = now_millis() + ttl_seconds * 1_000;
        self.locked()
            .entries
            .insert(key.to_string(), (expires_at, result));
        Ok(())
    }

    async fn lock(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut inner = self.locked();
        let now = now_millis();
        if let Some(expires_at) = inner.locks.get(key) {
            if now < *expires_at {
                return Ok(false);
            }
        }
        inner.locks.insert(key.to_string(), now + ttl_seconds * 1_000);
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.locked().locks.remove(key);
        Ok(())
    }
}

/// Releases the idempotency lock on every exit path
///
/// When the wrapping future is cancelled (executor deadline), the guard is
/// dropped before an explicit release; the unlock then runs on a spawned
/// task and the aborted attempt is never cached.
struct UnlockGuard {
    store: Arc<dyn IdempotencyStore>,
    key: Option<String>,
}

impl UnlockGuard {
    fn new(store: Arc<dyn IdempotencyStore>, key: String) -> Self {
        Self {
            store,
            key: Some(key),
        }
    }

    async fn release(mut self) {
        if let Some(key) = self.key.take() {
            if let Err(err) = self.store.unlock(&key).await {
                tracing::warn!(key = %key, error = %err, "Failed to release idempotency lock");
            }
        }
    }
}

impl Drop for UnlockGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let store = self.store.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = store.unlock(&key).await {
                        tracing::warn!(key = %key, error = %err, "Failed to release idempotency lock");
                    }
                });
            }
        }
    }
}

/// Middleware coalescing duplicate calls via an [`IdempotencyStore`]
pub struct IdempotencyMiddleware {
    store: Arc<dyn IdempotencyStore>,
    ttl_seconds: u64,
    lock_ttl_seconds: u64,
}

impl IdempotencyMiddleware {
    /// Wrap a store with default TTLs (results 300 s, locks 30 s)
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            ttl_seconds: 300,
            lock_ttl_seconds: 30,
        }
    }

    /// Set how long cached results live
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Set how long the best-effort lock is held
    pub fn with_lock_ttl_seconds(mut self, lock_ttl_seconds: u64) -> Self {
        self.lock_ttl_seconds = lock_ttl_seconds;
        self
    }
}

#[async_trait]
impl Middleware for IdempotencyMiddleware {
    async fn handle(&self, op: &ServiceOp, next: Next<'_>) -> Result<ServiceResult> {
        let Some(key) = op.call.idempotency_key.clone() else {
            return next.run(op).await;
        };

        if let Some(cached) = self.store.get(&key).await? {
            tracing::debug!(key = %key, "Idempotency cache hit");
            return Ok((*cached).clone());
        }

        if !self.store.lock(&key, self.lock_ttl_seconds).await? {
            // someone else is working; deterministic retryable error
            let meta = ResultMeta::for_call(&op.call, now_millis());
            return Ok(ServiceResult::error(meta, ErrorInfo::in_progress()));
        }

        let guard = UnlockGuard::new(self.store.clone(), key.clone());
        match next.run(op).await {
            Ok(result) => {
                self.store
                    .put(&key, Arc::new(result.clone()), self.ttl_seconds)
                    .await?;
                guard.release().await;
                Ok(result)
            }
            Err(err) => {
                guard.release().await;
                Err(err)
            }
        }
    }
}
