use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entity::{Entity, IndexField, ListFilter};

// ============================================================================
// User
// ============================================================================

/// Password hash as stored in the `users` table.
///
/// Serializes transparently (the cache keeps full snapshots) but never
/// shows up in `Debug` output, and has no place in event payloads: events
/// carry a [`PublicUser`] instead.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(***)")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: PasswordHash,
    pub is_admin: bool,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: PasswordHash,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            username: username.into(),
            email: email.into(),
            password_hash,
            is_admin: false,
        }
    }

    /// Snapshot safe to hand to anything outside the store boundary
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            is_admin: self.is_admin,
        }
    }
}

/// User without credentials.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
}

/// Secondary lookup fields of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Username,
    Email,
}

impl IndexField for UserField {
    fn name(self) -> &'static str {
        match self {
            UserField::Username => "username",
            UserField::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub is_admin: Option<bool>,
}

impl ListFilter for UserFilter {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        self.is_admin
            .map(|is_admin| vec![("is_admin", is_admin.to_string())])
            .unwrap_or_default()
    }
}

impl Entity for User {
    type Field = UserField;
    type Filter = UserFilter;

    const KIND: &'static str = "user";

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn indexed_fields() -> &'static [UserField] {
        &[UserField::Username, UserField::Email]
    }

    fn field_value(&self, field: UserField) -> String {
        match field {
            UserField::Username => self.username.clone(),
            UserField::Email => self.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("alice", "alice@example.com", PasswordHash::new("$2b$10$secret"))
    }

    #[test]
    fn test_debug_redacts_password_hash() {
        let rendered = format!("{:?}", alice());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("PasswordHash(***)"));
    }

    #[test]
    fn test_public_user_has_no_hash() {
        let json = serde_json::to_string(&alice().to_public()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_index_entries_cover_username_and_email() {
        let entries = alice().index_entries();
        assert_eq!(
            entries,
            vec![
                (UserField::Username, "alice".to_string()),
                (UserField::Email, "alice@example.com".to_string()),
            ]
        );
    }

    #[test]
    fn test_user_filter_pairs() {
        assert!(UserFilter::default().pairs().is_empty());
        let admins = UserFilter { is_admin: Some(true) };
        assert_eq!(admins.pairs(), vec![("is_admin", "true".to_string())]);
    }
}
