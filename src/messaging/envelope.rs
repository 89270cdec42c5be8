use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::domain::{Book, PublicUser};

// ============================================================================
// Event Envelope
// ============================================================================
//
// Wire shape:
//
//   { "id": "<uuid v7>", "type": "book.created",
//     "timestamp": "2024-01-01T00:00:00Z", "payload": { "book": {...} } }
//
// `Event` is a closed set. Decoding picks the payload shape from the type
// tag and rejects unknown tags as well as payloads carrying unknown fields,
// so a user payload that smuggles a password hash does not decode.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    BookCreated,
    BookUpdated,
    BookDeleted,
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserLoggedIn,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::BookCreated,
        EventType::BookUpdated,
        EventType::BookDeleted,
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::UserDeleted,
        EventType::UserLoggedIn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::BookCreated => "book.created",
            EventType::BookUpdated => "book.updated",
            EventType::BookDeleted => "book.deleted",
            EventType::UserCreated => "user.created",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
            EventType::UserLoggedIn => "user.logged_in",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `user.logged_in`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoginPayload {
    pub user_id: Uuid,
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    BookCreated { book: Book },
    BookUpdated { book: Book },
    BookDeleted { id: Uuid },
    UserCreated { user: PublicUser },
    UserUpdated { user: PublicUser },
    UserDeleted { id: Uuid },
    UserLoggedIn(LoginPayload),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::BookCreated { .. } => EventType::BookCreated,
            Event::BookUpdated { .. } => EventType::BookUpdated,
            Event::BookDeleted { .. } => EventType::BookDeleted,
            Event::UserCreated { .. } => EventType::UserCreated,
            Event::UserUpdated { .. } => EventType::UserUpdated,
            Event::UserDeleted { .. } => EventType::UserDeleted,
            Event::UserLoggedIn(_) => EventType::UserLoggedIn,
        }
    }

    fn payload(&self) -> PayloadRef<'_> {
        match self {
            Event::BookCreated { book } | Event::BookUpdated { book } => PayloadRef::Book { book },
            Event::UserCreated { user } | Event::UserUpdated { user } => PayloadRef::User { user },
            Event::BookDeleted { id } | Event::UserDeleted { id } => PayloadRef::Deleted { id },
            Event::UserLoggedIn(login) => PayloadRef::Login(login),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid {event_type} payload: {source}")]
    Payload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable once built.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Envelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl Envelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode keeping the typed reason for a rejection
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)?;
        Envelope::try_from(raw)
    }
}

// ---------------------------------------------------------------------------
// Wire representation
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Book { book: &'a Book },
    User { user: &'a PublicUser },
    Deleted { id: &'a Uuid },
    Login(&'a LoginPayload),
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: &'a Uuid,
    #[serde(rename = "type")]
    event_type: &'static str,
    timestamp: &'a DateTime<Utc>,
    payload: PayloadRef<'a>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelope {
            id: &self.id,
            event_type: self.event_type().as_str(),
            timestamp: &self.timestamp,
            payload: self.event.payload(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    id: Uuid,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BookPayload {
    book: Book,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UserPayload {
    user: PublicUser,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DeletedPayload {
    id: Uuid,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let event_type = EventType::parse(&raw.event_type)
            .ok_or_else(|| EnvelopeError::UnknownType(raw.event_type.clone()))?;

        let payload = raw.payload;
        let invalid = |source| EnvelopeError::Payload { event_type, source };

        let event = match event_type {
            EventType::BookCreated | EventType::BookUpdated => {
                let BookPayload { book } = serde_json::from_value(payload).map_err(invalid)?;
                if event_type == EventType::BookCreated {
                    Event::BookCreated { book }
                } else {
                    Event::BookUpdated { book }
                }
            }
            EventType::UserCreated | EventType::UserUpdated => {
                let UserPayload { user } = serde_json::from_value(payload).map_err(invalid)?;
                if event_type == EventType::UserCreated {
                    Event::UserCreated { user }
                } else {
                    Event::UserUpdated { user }
                }
            }
            EventType::BookDeleted => {
                let DeletedPayload { id } = serde_json::from_value(payload).map_err(invalid)?;
                Event::BookDeleted { id }
            }
            EventType::UserDeleted => {
                let DeletedPayload { id } = serde_json::from_value(payload).map_err(invalid)?;
                Event::UserDeleted { id }
            }
            EventType::UserLoggedIn => {
                Event::UserLoggedIn(serde_json::from_value(payload).map_err(invalid)?)
            }
        };

        Ok(Envelope {
            id: raw.id,
            timestamp: raw.timestamp,
            event,
        })
    }
}
