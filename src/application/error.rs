use thiserror::Error;

use crate::domain::{AccountId, Cents};

/// Broad failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; nothing was attempted
    Validation,
    /// A referenced account does not exist
    NotFound,
    /// Sender balance did not cover the amount at commit time
    InsufficientFunds,
    /// Lost to concurrent writers after exhausting retries; safe to retry
    Conflict,
    /// Underlying persistence failure
    Store,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot transfer to your own account")]
    SelfTransfer,

    #[error("Idempotency key '{0}' was already used for a different transfer")]
    IdempotencyKeyReused(String),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Account already exists: {field} '{value}'")]
    AccountAlreadyExists { field: &'static str, value: String },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Caller account not found: {0}")]
    CallerNotFound(AccountId),

    #[error("Insufficient funds in account {user_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        user_id: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Transfer aborted by concurrent activity after {attempts} attempt(s)")]
    Conflict { attempts: u32 },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidAmount(_)
            | AppError::SelfTransfer
            | AppError::IdempotencyKeyReused(_)
            | AppError::InvalidAccount(_)
            | AppError::AccountAlreadyExists { .. } => ErrorKind::Validation,
            AppError::AccountNotFound(_) | AppError::CallerNotFound(_) => ErrorKind::NotFound,
            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::Conflict { .. } => ErrorKind::Conflict,
            AppError::Database(_) => ErrorKind::Store,
        }
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidAmount(_) => "INVALID_AMOUNT",
            AppError::SelfTransfer => "SELF_TRANSFER",
            AppError::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            AppError::InvalidAccount(_) => "INVALID_ACCOUNT",
            AppError::AccountAlreadyExists { .. } => "ACCOUNT_ALREADY_EXISTS",
            AppError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            AppError::CallerNotFound(_) => "CALLER_NOT_FOUND",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::Database(_) => "STORE_ERROR",
        }
    }

    /// True if retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::InvalidAmount("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(AppError::SelfTransfer.kind(), ErrorKind::Validation);
        assert_eq!(AppError::AccountNotFound("bob".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            AppError::InsufficientFunds {
                user_id: "alice".into(),
                balance: 0,
                required: 1
            }
            .kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(AppError::Conflict { attempts: 3 }.kind(), ErrorKind::Conflict);
        assert_eq!(
            AppError::Database(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Store
        );
    }

    #[test]
    fn test_only_conflict_is_transient() {
        assert!(AppError::Conflict { attempts: 1 }.is_transient());
        assert!(!AppError::SelfTransfer.is_transient());
        assert!(!AppError::Database(anyhow::anyhow!("gone")).is_transient());
    }
}
