// ============================================================================
// Repository Layer
// ============================================================================
//
// One repository interface per entity type, and two orthogonal decorators
// composed by explicit construction:
//
//   EventingRepository  (publishes after the inner call commits)
//     └── CachedRepository  (cache-aside reads, invalidation on writes)
//           └── PgBookStore / PgUserStore  (source of truth)
//
// Only StoreError ever reaches the caller. Cache and broker failures are
// logged by the decorators and swallowed.
//
// ============================================================================

mod cached;
mod eventing;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::Entity;

pub use cached::CachedRepository;
pub use eventing::{EventSource, EventingRepository};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the authoritative store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// CRUD + lookup contract for one entity type.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Persist a new entity. An identifier is generated if absent and the
    /// stored entity is returned.
    async fn create(&self, entity: E) -> StoreResult<E>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<E>;

    /// Lookup by a secondary field (username, email, ...)
    async fn get_by_field(&self, field: E::Field, value: &str) -> StoreResult<E>;

    async fn update(&self, entity: E) -> StoreResult<E>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    async fn list(&self, filter: &E::Filter) -> StoreResult<Vec<E>>;
}
