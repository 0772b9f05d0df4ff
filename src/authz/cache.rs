//! Per-user memo of resolved permission sets.
//!
//! Entries never expire. In-process mutations invalidate through
//! [`PermissionCache::apply`]; mutations made by another process sharing the
//! database are caught by comparing the entry's [`StoreStamp`] with the
//! persisted counters before every hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::versions::StoreStamp;
use crate::errors::AppResult;
use crate::models::rbac::EffectivePermissions;

/// What a mutation invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Role graph changed: any user may be affected.
    Global,
    /// One user's role set changed.
    PerUser(String),
}

/// Where the cache resolves misses and reads the current change counters.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// `None` when the user is unknown.
    async fn stamp(&self, username: &str) -> AppResult<Option<StoreStamp>>;

    async fn resolve(&self, username: &str) -> AppResult<(EffectivePermissions, StoreStamp)>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    /// Entries found outdated by a change made outside this process
    pub stale: u64,
    pub entries: usize,
}

struct CachedSet {
    permissions: Arc<EffectivePermissions>,
    stamp: StoreStamp,
}

#[derive(Default)]
struct CacheState {
    /// Bumped by every invalidation. A miss that started under an older
    /// generation must not insert its result.
    generation: u64,
    entries: HashMap<String, CachedSet>,
}

pub struct PermissionCache {
    source: Arc<dyn PermissionSource>,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    stale: AtomicU64,
}

impl PermissionCache {
    pub fn new(source: impl PermissionSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Cached set for `username`, resolving and storing it on a miss.
    pub async fn get(&self, username: &str) -> AppResult<Arc<EffectivePermissions>> {
        let current = self.source.stamp(username).await?;

        let generation = {
            let state = self.state.read();
            match (state.entries.get(username), current) {
                (Some(entry), Some(stamp)) if entry.stamp == stamp => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(username = %username, "permission cache hit");
                    return Ok(Arc::clone(&entry.permissions));
                }
                (Some(_), _) => {
                    self.stale.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(username = %username, "cached permissions outdated by the store");
                }
                (None, _) => {}
            }
            state.generation
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(username = %username, "permission cache miss");

        let (resolved, stamp) = self.source.resolve(username).await?;
        let resolved = Arc::new(resolved);

        let mut state = self.state.write();
        if state.generation == generation {
            state.entries.insert(
                username.to_string(),
                CachedSet {
                    permissions: Arc::clone(&resolved),
                    stamp,
                },
            );
        } else {
            tracing::debug!(username = %username, "invalidated during resolution, not caching");
        }

        Ok(resolved)
    }

    /// Applies one invalidation under the write lock, so readers observe
    /// either the whole old map or the cleared one.
    pub fn apply(&self, event: Invalidation) {
        let mut state = self.state.write();
        state.generation += 1;
        match &event {
            Invalidation::Global => state.entries.clear(),
            Invalidation::PerUser(username) => {
                state.entries.remove(username);
            }
        }
        drop(state);

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(event = ?event, "permission cache invalidated");
    }

    pub fn invalidate_all(&self) {
        self.apply(Invalidation::Global);
    }

    pub fn invalidate_user(&self, username: &str) {
        self.apply(Invalidation::PerUser(username.to_string()));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            entries: self.state.read().entries.len(),
        }
    }
}
