use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::{Repository, StoreResult};
use crate::domain::{Book, Entity, User};
use crate::messaging::{Event, EventProducer};

// ============================================================================
// Eventing Decorator
// ============================================================================
//
// Publishes an event after each successful write of the inner repository.
// The write has already committed by then, so a failed publish is logged
// and the call still succeeds: the event is lost, not retried.
//
// ============================================================================

/// Maps an entity's writes to the events that announce them.
pub trait EventSource: Entity {
    fn created_event(&self) -> Event;
    fn updated_event(&self) -> Event;
    fn deleted_event(id: Uuid) -> Event;
}

impl EventSource for Book {
    fn created_event(&self) -> Event {
        Event::BookCreated { book: self.clone() }
    }

    fn updated_event(&self) -> Event {
        Event::BookUpdated { book: self.clone() }
    }

    fn deleted_event(id: Uuid) -> Event {
        Event::BookDeleted { id }
    }
}

// User events carry the public view only
impl EventSource for User {
    fn created_event(&self) -> Event {
        Event::UserCreated {
            user: self.to_public(),
        }
    }

    fn updated_event(&self) -> Event {
        Event::UserUpdated {
            user: self.to_public(),
        }
    }

    fn deleted_event(id: Uuid) -> Event {
        Event::UserDeleted { id }
    }
}

pub struct EventingRepository<E: EventSource> {
    inner: Arc<dyn Repository<E>>,
    producer: EventProducer,
}

impl<E: EventSource> EventingRepository<E> {
    pub fn new(inner: Arc<dyn Repository<E>>, producer: EventProducer) -> Self {
        Self { inner, producer }
    }

    async fn announce(&self, event: Event) {
        let event_type = event.event_type();
        if let Err(e) = self.producer.publish(event).await {
            tracing::warn!(
                entity = E::KIND,
                event_type = %event_type,
                error = %e,
                "Write committed but its event was not published"
            );
        }
    }
}

#[async_trait]
impl<E: EventSource> Repository<E> for EventingRepository<E> {
    async fn create(&self, entity: E) -> StoreResult<E> {
        let created = self.inner.create(entity).await?;
        self.announce(created.created_event()).await;
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<E> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_field(&self, field: E::Field, value: &str) -> StoreResult<E> {
        self.inner.get_by_field(field, value).await
    }

    async fn update(&self, entity: E) -> StoreResult<E> {
        let updated = self.inner.update(entity).await?;
        self.announce(updated.updated_event()).await;
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete(id).await?;
        self.announce(E::deleted_event(id)).await;
        Ok(())
    }

    async fn list(&self, filter: &E::Filter) -> StoreResult<Vec<E>> {
        self.inner.list(filter).await
    }
}
