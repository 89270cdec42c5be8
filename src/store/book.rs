use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::map_sqlx_error;
use crate::domain::{Book, BookFilter, Entity, NoIndex};
use crate::repository::{Repository, StoreError, StoreResult};

const COLUMNS: &str = "id, genre, name, author, year";

pub struct PgBookStore {
    pool: PgPool,
}

impl PgBookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn book_from_row(row: &PgRow) -> Result<Book, sqlx::Error> {
    Ok(Book {
        id: row.try_get("id")?,
        genre: row.try_get("genre")?,
        name: row.try_get("name")?,
        author: row.try_get("author")?,
        year: row.try_get("year")?,
    })
}

/// `SELECT ... FROM books` narrowed by the filters that are set
fn list_query(filter: &BookFilter) -> QueryBuilder<'_, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT {} FROM books", COLUMNS));
    let mut separator = " WHERE ";

    if let Some(author) = filter.author() {
        query.push(separator).push("author = ").push_bind(author);
        separator = " AND ";
    }
    if let Some(genre) = filter.genre() {
        query.push(separator).push("genre = ").push_bind(genre);
    }

    query.push(" ORDER BY name, id");
    query
}

#[async_trait]
impl Repository<Book> for PgBookStore {
    async fn create(&self, mut book: Book) -> StoreResult<Book> {
        book.ensure_id();

        sqlx::query("INSERT INTO books (id, genre, name, author, year) VALUES ($1, $2, $3, $4, $5)")
            .bind(book.id)
            .bind(&book.genre)
            .bind(&book.name)
            .bind(&book.author)
            .bind(book.year)
            .execute(&self.pool)
            .await?;

        tracing::debug!(id = %book.id, name = %book.name, "Inserted book");
        Ok(book)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Book> {
        let row = sqlx::query(&format!("SELECT {} FROM books WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error(Book::KIND, id))?;

        Ok(book_from_row(&row)?)
    }

    async fn get_by_field(&self, field: NoIndex, _value: &str) -> StoreResult<Book> {
        match field {}
    }

    async fn update(&self, book: Book) -> StoreResult<Book> {
        let result = sqlx::query(
            "UPDATE books SET genre = $2, name = $3, author = $4, year = $5 WHERE id = $1",
        )
        .bind(book.id)
        .bind(&book.genre)
        .bind(&book.name)
        .bind(&book.author)
        .bind(book.year)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Book::KIND, book.id));
        }
        Ok(book)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Book::KIND, id));
        }
        Ok(())
    }

    async fn list(&self, filter: &BookFilter) -> StoreResult<Vec<Book>> {
        let rows = list_query(filter).build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| book_from_row(row).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_without_filters() {
        let filter = BookFilter::default();
        let query = list_query(&filter);
        assert_eq!(
            query.sql(),
            "SELECT id, genre, name, author, year FROM books ORDER BY name, id"
        );
    }

    #[test]
    fn test_list_query_binds_only_set_filters() {
        let filter = BookFilter {
            author: Some("Herbert".to_string()),
            genre: Some(String::new()),
        };
        assert_eq!(
            list_query(&filter).sql(),
            "SELECT id, genre, name, author, year FROM books WHERE author = $1 ORDER BY name, id"
        );

        let both = BookFilter {
            author: Some("Herbert".to_string()),
            genre: Some("sci-fi".to_string()),
        };
        assert_eq!(
            list_query(&both).sql(),
            "SELECT id, genre, name, author, year FROM books WHERE author = $1 AND genre = $2 ORDER BY name, id"
        );
    }
}
