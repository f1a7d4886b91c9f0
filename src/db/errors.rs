//! User store error types.

use thiserror::Error;

/// User store errors
#[derive(Debug, Error)]
pub enum UserStoreError {
    /// Email already registered
    #[error("Email already exists")]
    DuplicateEmail,

    /// No user matched the update
    #[error("User not found")]
    NotFound,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend unreachable or failed outside of sqlx
    #[error("User store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for user store operations
pub type UserStoreResult<T> = Result<T, UserStoreError>;

/// Map an insert failure, turning a unique violation into [`UserStoreError::DuplicateEmail`]
pub(crate) fn map_insert_error(err: sqlx::Error) -> UserStoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return UserStoreError::DuplicateEmail;
    }
    UserStoreError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_duplicates() {
        let err = map_insert_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, UserStoreError::Database(_)));
    }
}
