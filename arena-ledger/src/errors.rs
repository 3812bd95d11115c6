use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(
        "Insufficient balance for agent {agent_id} token {token_address}: \
         requested {requested}, available {available}"
    )]
    InsufficientBalance {
        agent_id: Uuid,
        token_address: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Boost bonus not found: {0}")]
    BonusNotFound(Uuid),

    #[error("Constraint violation ({code}): {message}")]
    Constraint {
        code: String,
        constraint: Option<String>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Unique, foreign-key and check violations are surfaced as `Constraint`
/// so callers can tell referential-integrity failures apart from
/// business-rule failures. Everything else stays a raw database error.
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if let Some(code) = db_err.code() {
                if matches!(code.as_ref(), "23505" | "23503" | "23514") {
                    return LedgerError::Constraint {
                        code: code.into_owned(),
                        constraint: db_err.constraint().map(str::to_string),
                        message: db_err.message().to_string(),
                    };
                }
            }
        }
        LedgerError::Database(err)
    }
}
