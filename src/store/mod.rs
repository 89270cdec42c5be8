// ============================================================================
// Store - PostgreSQL persistence, the source of truth
// ============================================================================
//
// Plain parameterized queries mapped by hand (no compile-time checked
// macros, so the crate builds without a live database).
//
// "Not found" is reported as StoreError::NotFound both for empty reads and
// for updates/deletes that touched no row.
//
// ============================================================================

mod book;
mod database;
mod user;

pub use book::PgBookStore;
pub use database::Database;
pub use user::PgUserStore;

use crate::repository::StoreError;

/// Map `RowNotFound` to the typed not-found error, everything else as is
pub(crate) fn map_sqlx_error(kind: &'static str, key: impl ToString) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| match err {
        sqlx::Error::RowNotFound => StoreError::not_found(kind, key),
        other => StoreError::Database(other),
    }
}
