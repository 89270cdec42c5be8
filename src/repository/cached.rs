//! Cache-aside decorator.
//!
//! Reads try the cache first and fall back to the inner repository on a
//! miss, populating the cache on the way out. Writes go to the inner
//! repository first; only once it has committed is the cache brought back
//! in line:
//!
//! - the primary entry and every secondary index entry are rewritten
//! - index entries for values the entity no longer carries are deleted
//! - every `list:{kind}:*` entry is evicted
//!
//! A cache failure never fails the call. It is logged, counted and treated
//! as a miss.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{Repository, StoreResult};
use crate::cache::keys::{index_key, list_key, list_pattern, primary_key};
use crate::cache::Cache;
use crate::domain::Entity;
use crate::metrics::{Metrics, OUTCOME_ERROR, OUTCOME_HIT, OUTCOME_MISS};

const KEY_PRIMARY: &str = "primary";
const KEY_INDEX: &str = "index";
const KEY_LIST: &str = "list";

pub struct CachedRepository<E: Entity> {
    inner: Arc<dyn Repository<E>>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    metrics: Arc<Metrics>,
}

impl<E: Entity> CachedRepository<E> {
    pub fn new(
        inner: Arc<dyn Repository<E>>,
        cache: Arc<dyn Cache>,
        ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner,
            cache,
            ttl,
            metrics,
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str, key_type: &'static str) -> Option<T> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::trace!(entity = E::KIND, key = %key, "Cache miss");
                self.metrics.record_cache_lookup(E::KIND, key_type, OUTCOME_MISS);
                return None;
            }
            Err(e) => {
                tracing::warn!(entity = E::KIND, key = %key, error = %e, "Cache read failed, using store");
                self.metrics.record_cache_lookup(E::KIND, key_type, OUTCOME_ERROR);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::trace!(entity = E::KIND, key = %key, "Cache hit");
                self.metrics.record_cache_lookup(E::KIND, key_type, OUTCOME_HIT);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(entity = E::KIND, key = %key, error = %e, "Corrupt cache entry, evicting");
                self.metrics.record_cache_lookup(E::KIND, key_type, OUTCOME_ERROR);
                self.evict(key).await;
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(entity = E::KIND, key = %key, error = %e, "Failed to serialize cache entry");
                self.metrics.record_cache_write_failure(E::KIND);
                return;
            }
        };

        if let Err(e) = self.cache.set(key, &bytes, self.ttl).await {
            tracing::warn!(entity = E::KIND, key = %key, error = %e, "Failed to write cache entry");
            self.metrics.record_cache_write_failure(E::KIND);
        }
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            tracing::warn!(entity = E::KIND, key = %key, error = %e, "Failed to evict cache entry");
            self.metrics.record_cache_write_failure(E::KIND);
        }
    }

    async fn evict_lists(&self) {
        let pattern = list_pattern(E::KIND);
        if let Err(e) = self.cache.delete_pattern(&pattern).await {
            tracing::warn!(entity = E::KIND, pattern = %pattern, error = %e, "Failed to evict list caches");
            self.metrics.record_cache_write_failure(E::KIND);
        }
    }

    /// Write the primary entry and every secondary index entry of `entity`
    async fn populate(&self, entity: &E) {
        let id = entity.id();
        self.write(&primary_key(E::KIND, id), entity).await;
        for (field, value) in entity.index_entries() {
            self.write(&index_key(E::KIND, field, &value), &id).await;
        }
    }

    /// Current stored state, read before a write to learn the old index
    /// values. A failure only costs the index cleanup.
    async fn previous(&self, id: Uuid) -> Option<E> {
        match self.inner.get_by_id(id).await {
            Ok(previous) => Some(previous),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!(
                    entity = E::KIND,
                    id = %id,
                    error = %e,
                    "Pre-read failed, skipping stale index cleanup"
                );
                None
            }
        }
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for CachedRepository<E> {
    async fn create(&self, mut entity: E) -> StoreResult<E> {
        entity.ensure_id();
        let created = self.inner.create(entity).await?;

        self.populate(&created).await;
        self.evict_lists().await;

        tracing::debug!(entity = E::KIND, id = %created.id(), "Created and cached");
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<E> {
        let key = primary_key(E::KIND, id);
        if let Some(entity) = self.read::<E>(&key, KEY_PRIMARY).await {
            return Ok(entity);
        }

        let entity = self.inner.get_by_id(id).await?;
        self.write(&key, &entity).await;
        Ok(entity)
    }

    async fn get_by_field(&self, field: E::Field, value: &str) -> StoreResult<E> {
        let key = index_key(E::KIND, field, value);

        if let Some(id) = self.read::<Uuid>(&key, KEY_INDEX).await {
            match self.get_by_id(id).await {
                Ok(entity) if entity.field_value(field) == value => return Ok(entity),
                Ok(_) => {
                    tracing::debug!(entity = E::KIND, key = %key, id = %id, "Stale index entry, evicting");
                    self.evict(&key).await;
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(entity = E::KIND, key = %key, id = %id, "Index points at a deleted row, evicting");
                    self.evict(&key).await;
                }
                Err(e) => return Err(e),
            }
        }

        let entity = self.inner.get_by_field(field, value).await?;
        self.populate(&entity).await;
        Ok(entity)
    }

    async fn update(&self, entity: E) -> StoreResult<E> {
        let previous = self.previous(entity.id()).await;
        let updated = self.inner.update(entity).await?;

        if let Some(previous) = previous {
            for (field, old_value) in previous.index_entries() {
                if updated.field_value(field) != old_value {
                    self.evict(&index_key(E::KIND, field, &old_value)).await;
                }
            }
        }
        self.populate(&updated).await;
        self.evict_lists().await;

        tracing::debug!(entity = E::KIND, id = %updated.id(), "Updated and re-cached");
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let previous = self.previous(id).await;
        self.inner.delete(id).await?;

        self.evict(&primary_key(E::KIND, id)).await;
        if let Some(previous) = previous {
            for (field, value) in previous.index_entries() {
                self.evict(&index_key(E::KIND, field, &value)).await;
            }
        }
        self.evict_lists().await;

        tracing::debug!(entity = E::KIND, id = %id, "Deleted and evicted");
        Ok(())
    }

    async fn list(&self, filter: &E::Filter) -> StoreResult<Vec<E>> {
        let key = list_key(E::KIND, filter);
        if let Some(entities) = self.read::<Vec<E>>(&key, KEY_LIST).await {
            return Ok(entities);
        }

        let entities = self.inner.list(filter).await?;
        self.write(&key, &entities).await;
        Ok(entities)
    }
}
