//! Handlers the service registers on its own consumer.
//!
//! They only log: the service is both producer and audience of its events,
//! which keeps the pipeline observable end to end.

use super::{Envelope, Event, EventConsumer, EventType};

const LOGGED_EVENTS: [EventType; 6] = [
    EventType::BookCreated,
    EventType::BookUpdated,
    EventType::BookDeleted,
    EventType::UserCreated,
    EventType::UserDeleted,
    EventType::UserLoggedIn,
];

pub fn register_logging_handlers(consumer: &mut EventConsumer) {
    for event_type in LOGGED_EVENTS {
        consumer.register_handler(event_type, log_event);
        tracing::debug!(event_type = %event_type, "Registered logging handler");
    }
}

async fn log_event(envelope: Envelope) -> anyhow::Result<()> {
    let id = envelope.id;
    match &envelope.event {
        Event::BookCreated { book } | Event::BookUpdated { book } => tracing::info!(
            event_id = %id,
            event_type = %envelope.event_type(),
            book_id = %book.id,
            name = %book.name,
            author = %book.author,
            "📚 Book event received"
        ),
        Event::BookDeleted { id: book_id } => tracing::info!(
            event_id = %id,
            book_id = %book_id,
            "📚 Book deleted"
        ),
        Event::UserCreated { user } | Event::UserUpdated { user } => tracing::info!(
            event_id = %id,
            event_type = %envelope.event_type(),
            user_id = %user.id,
            username = %user.username,
            "👤 User event received"
        ),
        Event::UserDeleted { id: user_id } => tracing::info!(
            event_id = %id,
            user_id = %user_id,
            "👤 User deleted"
        ),
        Event::UserLoggedIn(login) => tracing::info!(
            event_id = %id,
            user_id = %login.user_id,
            username = %login.username,
            at = %login.timestamp,
            "🔑 User logged in"
        ),
    }
    Ok(())
}
