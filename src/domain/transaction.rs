use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;

/// Current time at the precision the store keeps (microseconds), so records
/// read back compare equal to the ones just written.
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "COMPLETED" => Some(TransactionStatus::Completed),
            _ => None,
        }
    }
}

/// A committed movement of funds between two accounts.
/// Records are immutable; nothing updates or deletes them once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Monotonically increasing insertion order, assigned inside the atomic unit
    pub sequence: i64,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    /// Sender's user id as it was when the transfer committed
    pub sender_user_id: String,
    /// Receiver's user id as it was when the transfer committed
    pub receiver_user_id: String,
    /// Amount in cents (always positive)
    pub amount_cents: Cents,
    pub sender_balance_after: Cents,
    pub receiver_balance_after: Cents,
    pub status: TransactionStatus,
    /// Client-supplied deduplication key, unique per sender
    pub idempotency_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build a completed record from the post-update balances of both legs.
    /// Sequence number must be assigned by the repository.
    pub fn completed(
        sender: &TransferLeg,
        receiver: &TransferLeg,
        amount_cents: Cents,
        idempotency_key: Option<String>,
    ) -> Self {
        debug_assert!(amount_cents > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            sender_id: sender.account_id,
            receiver_id: receiver.account_id,
            sender_user_id: sender.user_id.clone(),
            receiver_user_id: receiver.user_id.clone(),
            amount_cents,
            sender_balance_after: sender.balance_after,
            receiver_balance_after: receiver.balance_after,
            status: TransactionStatus::Completed,
            idempotency_key,
            timestamp: ledger_now(),
        }
    }

    /// True if `user_id` is the sender or receiver of this record.
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_user_id == user_id || self.receiver_user_id == user_id
    }

    /// True if this record is what a replay of the given request would produce.
    pub fn matches_request(&self, receiver_user_id: &str, amount_cents: Cents) -> bool {
        self.receiver_user_id == receiver_user_id && self.amount_cents == amount_cents
    }
}

/// One side of a transfer as observed inside the atomic unit, right after its
/// balance was updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub account_id: AccountId,
    pub user_id: String,
    pub balance_after: Cents,
}

/// A caller's request to move funds to another account.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Receiver's user id (untrusted input)
    pub receiver: String,
    /// Raw amount as entered (untrusted input), e.g. "200" or "12.50"
    pub amount: String,
    pub idempotency_key: Option<String>,
}

impl TransferRequest {
    pub fn new(receiver: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            amount: amount.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legs() -> (TransferLeg, TransferLeg) {
        (
            TransferLeg {
                account_id: Uuid::new_v4(),
                user_id: "alice".into(),
                balance_after: 30_000,
            },
            TransferLeg {
                account_id: Uuid::new_v4(),
                user_id: "bob".into(),
                balance_after: 70_000,
            },
        )
    }

    #[test]
    fn test_completed_record_captures_snapshots() {
        let (sender, receiver) = legs();
        let record = TransactionRecord::completed(&sender, &receiver, 20_000, None);

        assert_eq!(record.sender_id, sender.account_id);
        assert_eq!(record.receiver_id, receiver.account_id);
        assert_eq!(record.sender_user_id, "alice");
        assert_eq!(record.receiver_user_id, "bob");
        assert_eq!(record.sender_balance_after, 30_000);
        assert_eq!(record.receiver_balance_after, 70_000);
        assert_eq!(record.status, TransactionStatus::Completed);
        assert!(record.involves("alice"));
        assert!(record.involves("bob"));
        assert!(!record.involves("carol"));
    }

    #[test]
    fn test_matches_request() {
        let (sender, receiver) = legs();
        let record =
            TransactionRecord::completed(&sender, &receiver, 20_000, Some("k-1".into()));

        assert!(record.matches_request("bob", 20_000));
        assert!(!record.matches_request("bob", 20_001));
        assert!(!record.matches_request("carol", 20_000));
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&TransactionStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
    }
}
