use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

// ============================================================================
// Entity Contract - What the generic repository layers need from a type
// ============================================================================
//
// The cache decorator and the eventing decorator are written once and work
// for every entity that implements this trait. Each entity declares:
// - its kind (used as the cache key namespace)
// - its secondary lookup fields (username, email, ...)
// - its listing filter
//
// ============================================================================

/// A secondary lookup field of an entity (e.g. `username`, `email`).
pub trait IndexField: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Column / cache-key name of the field
    fn name(self) -> &'static str;
}

/// Uninhabited field type for entities that have no secondary lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoIndex {}

impl IndexField for NoIndex {
    fn name(self) -> &'static str {
        match self {}
    }
}

/// Filter accepted by `Repository::list`.
pub trait ListFilter: Clone + Debug + Default + Send + Sync + 'static {
    /// Field/value pairs of the filters that are actually set.
    /// Empty or default filters must be omitted.
    fn pairs(&self) -> Vec<(&'static str, String)>;
}

/// A persisted entity owned by the store.
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    type Field: IndexField;
    type Filter: ListFilter;

    /// Cache namespace and event prefix, e.g. "book"
    const KIND: &'static str;

    fn id(&self) -> Uuid;

    fn set_id(&mut self, id: Uuid);

    /// Every secondary field a lookup may be performed on
    fn indexed_fields() -> &'static [Self::Field];

    /// Current value of a secondary field
    fn field_value(&self, field: Self::Field) -> String;

    /// Generate an identifier if the entity does not carry one yet
    fn ensure_id(&mut self) {
        if self.id().is_nil() {
            self.set_id(Uuid::new_v4());
        }
    }

    /// All `(field, value)` pairs this entity is reachable by
    fn index_entries(&self) -> Vec<(Self::Field, String)> {
        Self::indexed_fields()
            .iter()
            .map(|field| (*field, self.field_value(*field)))
            .collect()
    }
}
