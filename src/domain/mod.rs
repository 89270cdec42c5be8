// ============================================================================
// Domain Layer
// ============================================================================
//
// Entities owned by the store and the generic contract the repository
// decorators are written against:
// - entity.rs - Entity / IndexField / ListFilter traits
// - book.rs   - Book and its listing filter
// - user.rs   - User, PublicUser and the username/email lookups
//
// ============================================================================

pub mod book;
pub mod entity;
pub mod user;

pub use book::{Book, BookFilter};
pub use entity::{Entity, IndexField, ListFilter, NoIndex};
pub use user::{PasswordHash, PublicUser, User, UserField, UserFilter};
