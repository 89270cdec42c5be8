use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::map_sqlx_error;
use crate::domain::{Entity, IndexField, PasswordHash, User, UserField, UserFilter};
use crate::repository::{Repository, StoreError, StoreResult};

const SELECT_USER: &str = "SELECT id, username, email, password_hash, is_admin FROM users";

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: PasswordHash::new(row.try_get::<String, _>("password_hash")?),
        is_admin: row.try_get("is_admin")?,
    })
}

/// Lookup statement for a secondary field; the column name comes from the
/// closed `UserField` set, never from input
fn field_query(field: UserField) -> String {
    format!("{} WHERE {} = $1", SELECT_USER, field.name())
}

#[async_trait]
impl Repository<User> for PgUserStore {
    async fn create(&self, mut user: User) -> StoreResult<User> {
        user.ensure_id();

        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, is_admin) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.password_hash.as_str())
        .bind(user.is_admin)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %user.id, username = %user.username, "Inserted user");
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_USER))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error(User::KIND, id))?;

        Ok(user_from_row(&row)?)
    }

    async fn get_by_field(&self, field: UserField, value: &str) -> StoreResult<User> {
        let row = sqlx::query(&field_query(field))
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error(User::KIND, format!("{}={}", field.name(), value)))?;

        Ok(user_from_row(&row)?)
    }

    async fn update(&self, user: User) -> StoreResult<User> {
        let result = sqlx::query(
            "UPDATE users SET username = $2, email = $3, password_hash = $4, is_admin = $5 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.password_hash.as_str())
        .bind(user.is_admin)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(User::KIND, user.id));
        }
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(User::KIND, id));
        }
        Ok(())
    }

    async fn list(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let rows = match filter.is_admin {
            Some(is_admin) => {
                sqlx::query(&format!("{} WHERE is_admin = $1 ORDER BY username", SELECT_USER))
                    .bind(is_admin)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY username", SELECT_USER))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|row| user_from_row(row).map_err(StoreError::from))
            .collect()
    }
}
