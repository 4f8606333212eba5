//! SQL access. Every function takes `&mut PgConnection` so callers decide
//! whether it runs on a pooled connection or inside their transaction.

pub mod bills;
pub mod contracts;
pub mod meters;
pub mod property;
pub mod settings;

use crate::error::AppError;

pub fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if is_unique_violation(&error) {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.code().as_deref() == Some("23505"),
        _ => false,
    }
}
