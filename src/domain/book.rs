use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{Entity, ListFilter, NoIndex};

// ============================================================================
// Book
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Book {
    pub id: Uuid,
    pub genre: String,
    pub name: String,
    pub author: String,
    pub year: i32,
}

impl Book {
    /// New book without an identifier; one is assigned on create
    pub fn new(
        genre: impl Into<String>,
        name: impl Into<String>,
        author: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            genre: genre.into(),
            name: name.into(),
            author: author.into(),
            year,
        }
    }
}

/// Listing filter for books. Empty strings count as "not set".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookFilter {
    pub author: Option<String>,
    pub genre: Option<String>,
}

impl BookFilter {
    pub fn by_author(author: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            ..Self::default()
        }
    }

    pub fn by_genre(genre: impl Into<String>) -> Self {
        Self {
            genre: Some(genre.into()),
            ..Self::default()
        }
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref().filter(|a| !a.is_empty())
    }

    pub fn genre(&self) -> Option<&str> {
        self.genre.as_deref().filter(|g| !g.is_empty())
    }
}

impl ListFilter for BookFilter {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(author) = self.author() {
            pairs.push(("author", author.to_string()));
        }
        if let Some(genre) = self.genre() {
            pairs.push(("genre", genre.to_string()));
        }
        pairs
    }
}

impl Entity for Book {
    type Field = NoIndex;
    type Filter = BookFilter;

    const KIND: &'static str = "book";

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn indexed_fields() -> &'static [NoIndex] {
        &[]
    }

    fn field_value(&self, field: NoIndex) -> String {
        match field {}
    }
}
