//! Deferred result store — two-stage ticket lifecycle
//!
//! A provider returning `deferred` hands back a ticket; the executor
//! registers it as pending, and a later `complete_deferred` stores the
//! final result under the same ticket. Entries expire by TTL and are
//! evicted lazily on read.

use crate::error::Result;
use crate::types::{now_millis, ServiceResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// State of a ticket currently held by the store
#[derive(Debug, Clone)]
pub enum DeferredEntry {
    /// Ticket registered, final result not yet delivered
    Pending,
    /// Final result available
    Completed(Arc<ServiceResult>),
}

/// Stores deferred results by ticket id
#[async_trait]
pub trait DeferredStore: Send + Sync {
    /// Register a pending ticket
    async fn put_pending(&self, ticket_id: &str, ttl_seconds: u64) -> Result<()>;

    /// Store the final result for a ticket
    async fn complete(
        &self,
        ticket_id: &str,
        result: Arc<ServiceResult>,
        ttl_seconds: u64,
    ) -> Result<()>;

    /// Final result for a ticket, or `None` while pending/absent/expired
    async fn get(&self, ticket_id: &str) -> Result<Option<Arc<ServiceResult>>>;

    /// Current entry for a ticket, distinguishing pending from absent
    async fn entry(&self, ticket_id: &str) -> Result<Option<DeferredEntry>>;
}

/// Dev/test store; replacements must honor the trait contract verbatim
///
/// A single mutex guards the inner map; expiry is checked lazily on read.
#[derive(Default)]
pub struct InMemoryDeferredStore {
    /// ticket_id → (expires_at_ms, result once completed)
    data: Mutex<HashMap<String, (u64, Option<Arc<ServiceResult>>)>>,
}

impl InMemoryDeferredStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, (u64, Option<Arc<ServiceResult>>)>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeferredStore for InMemoryDeferredStore {
    async fn put_pending(&self, ticket_id: &str, ttl_seconds: u64) -> Result<()> {
        let expires_at = now_millis() + ttl_seconds * 1_000;
        self.locked().insert(ticket_id.to_string(), (expires_at, None));
        Ok(())
    }

    async fn complete(
        &self,
        ticket_id: &str,
        result: Arc<ServiceResult>,
        ttl_seconds: u64,
    ) -> Result<()> {
        let expires_at = now_millis() + ttl_seconds * 1_000;
        self.locked()
            .insert(ticket_id.to_string(), (expires_at, Some(result)));
        Ok(())
    }

    async fn get(&self, ticket_id: &str) -> Result<Option<Arc<ServiceResult>>> {
        Ok(self.entry(ticket_id).await?.and_then(|entry| match entry {
            DeferredEntry::Pending => None,
            DeferredEntry::Completed(result) => Some(result),
        }))
    }

    async fn entry(&self, ticket_id: &str) -> Result<Option<DeferredEntry>> {
        let mut data = self.locked();
        let Some((expires_at, result)) = data.get(ticket_id) else {
            return Ok(None);
        };
        if now_millis() >= *expires_at {
            data.remove(ticket_id);
            return Ok(None);
        }
        Ok(Some(match result {
            Some(result) => DeferredEntry::Completed(result.clone()),
            None => DeferredEntry::Pending,
        }))
    }
}
