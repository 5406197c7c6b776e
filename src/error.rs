use crate::database::DatabaseError;
use rust_decimal::Decimal;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource missing (or already deleted by a cascade)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The operation needs a known identity
    #[error("You need to sign in to do this")]
    Unauthenticated,

    /// Identity is known but not allowed to touch the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The pledge would push the gift's total past its target price
    #[error("Contribution exceeds the funding target: only {remaining} {currency} remaining")]
    ExceedsTarget { remaining: Decimal, currency: String },

    #[error("This group gift has no target price, so contributions cannot be accepted")]
    MissingTarget,

    #[error("This gift is not a group gift")]
    NotGroupGift,

    #[error("This gift is already a group gift")]
    AlreadyGroupGift,

    #[error("You cannot contribute to a gift on your own wishlist")]
    OwnerCannotContribute,

    #[error("You cannot suggest or reserve a gift on your own wishlist")]
    OwnGift,

    #[error("You have already contributed to this gift; edit your existing contribution instead")]
    DuplicateContribution,

    #[error("You have already suggested turning this gift into a group gift")]
    DuplicateSuggestion,

    #[error("This wishlist is not publicly shared")]
    NotPublic,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Only contributors of this group gift can use its messages")]
    NotContributor,

    #[error("This gift is already reserved")]
    AlreadyReserved,

    /// Transport or infrastructure failure; safe to retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store row failed validation at the boundary
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database setup errors (pool, migrations)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::ExceedsTarget { .. } => "exceeds_target",
            AppError::MissingTarget => "missing_target",
            AppError::NotGroupGift => "not_group_gift",
            AppError::AlreadyGroupGift => "already_group_gift",
            AppError::OwnerCannotContribute => "owner_cannot_contribute",
            AppError::OwnGift => "own_gift",
            AppError::DuplicateContribution => "duplicate_contribution",
            AppError::DuplicateSuggestion => "duplicate_suggestion",
            AppError::NotPublic => "not_public",
            AppError::EmptyMessage => "empty_message",
            AppError::NotContributor => "not_contributor",
            AppError::AlreadyReserved => "already_reserved",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::MalformedRow(_) => "malformed_row",
            AppError::Config(_) => "config",
            AppError::Database(_) => "database",
            AppError::Serialization(_) => "serialization",
            AppError::Message(_) => "internal",
        }
    }

    /// Check if error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Only infrastructure failures may be retried; validation failures need new input
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
            || matches!(
                self,
                AppError::Database(DatabaseError::PoolCreation(_))
                    | AppError::Database(DatabaseError::ConnectionTimeout)
            )
    }

    /// Check if error is a validation failure the user must correct
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidAmount(_)
                | AppError::ExceedsTarget { .. }
                | AppError::MissingTarget
                | AppError::NotGroupGift
                | AppError::AlreadyGroupGift
                | AppError::OwnerCannotContribute
                | AppError::OwnGift
                | AppError::DuplicateContribution
                | AppError::DuplicateSuggestion
                | AppError::NotPublic
                | AppError::EmptyMessage
                | AppError::AlreadyReserved
        )
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Unauthenticated => 401,
            AppError::Forbidden(_) | AppError::NotContributor | AppError::NotPublic => 403,
            AppError::DuplicateContribution
            | AppError::DuplicateSuggestion
            | AppError::AlreadyGroupGift
            | AppError::AlreadyReserved => 409,
            AppError::StoreUnavailable(_) => 503,
            e if e.is_validation() => 422,
            _ => 500,
        }
    }
}

/// Repository-specific error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Transport-level failure talking to the store
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database query error
    #[error("Query error: {0}")]
    Query(SqlxError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Row could not be decoded into a domain value
    #[error("Malformed row: {0}")]
    Malformed(String),

    /// The locked re-check found the pledge would overflow the target
    #[error("Target exceeded: {remaining} remaining")]
    TargetExceeded { remaining: Decimal },

    /// The row changed state between the caller's read and the write
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            RepositoryError::Query(e) => AppError::StoreUnavailable(e.to_string()),
            RepositoryError::Duplicate(msg) => AppError::Message(format!("Duplicate: {}", msg)),
            RepositoryError::ConstraintViolation(msg) => AppError::Message(msg),
            RepositoryError::Malformed(msg) => AppError::MalformedRow(msg),
            RepositoryError::TargetExceeded { remaining } => AppError::ExceedsTarget {
                remaining,
                currency: String::new(),
            },
            RepositoryError::Conflict(msg) => AppError::Message(format!("Conflict: {}", msg)),
        }
    }
}

impl From<SqlxError> for RepositoryError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            SqlxError::Database(db_err) => {
                // Check for common PostgreSQL error codes
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    // Unique violation
                    Some("23505") => RepositoryError::Duplicate(db_err.message().to_string()),
                    // Foreign key / check violation
                    Some("23503") | Some("23514") => {
                        RepositoryError::ConstraintViolation(db_err.message().to_string())
                    }
                    _ => RepositoryError::Query(err),
                }
            }
            SqlxError::ColumnDecode { .. } | SqlxError::Decode(_) | SqlxError::TypeNotFound { .. } => {
                RepositoryError::Malformed(err.to_string())
            }
            SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::PoolTimedOut
            | SqlxError::PoolClosed
            | SqlxError::WorkerCrashed
            | SqlxError::Protocol(_) => RepositoryError::Unavailable(err.to_string()),
            _ => RepositoryError::Query(err),
        }
    }
}

/// Convenience function to convert Option<T> to Result<T, AppError>
pub fn option_to_result<T>(opt: Option<T>, error_msg: &str) -> AppResult<T> {
    opt.ok_or_else(|| AppError::NotFound(error_msg.to_string()))
}
