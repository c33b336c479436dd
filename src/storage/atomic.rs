use anyhow::{Context, Result};
use sqlx::{Row, Sqlite, Transaction};

use crate::domain::{AccountId, AuditEntry, Cents, TransactionRecord, TransferLeg};

use super::repository::encode_timestamp;

/// One atomic unit of ledger writes.
///
/// Wraps a store transaction: every read and write goes through it, and
/// dropping the unit without calling [`AtomicUnit::commit`] rolls everything
/// back.
pub struct AtomicUnit {
    tx: Transaction<'static, Sqlite>,
}

impl AtomicUnit {
    pub(super) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Increment an account's balance, looked up by user id.
    /// Returns `None` if no such account exists.
    pub async fn credit(&mut self, user_id: &str, amount_cents: Cents) -> Result<Option<TransferLeg>> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + ?
            WHERE user_id = ?
            RETURNING id, user_id, balance_cents
            "#,
        )
        .bind(amount_cents)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to credit account")?;

        row.map(|row| Self::row_to_leg(&row)).transpose()
    }

    /// Decrement an account's balance only if it covers `amount_cents`.
    /// Returns `None` if the account is missing or the balance is too low.
    pub async fn debit_if_sufficient(
        &mut self,
        account_id: AccountId,
        amount_cents: Cents,
    ) -> Result<Option<TransferLeg>> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents - ?
            WHERE id = ? AND balance_cents >= ?
            RETURNING id, user_id, balance_cents
            "#,
        )
        .bind(amount_cents)
        .bind(account_id.to_string())
        .bind(amount_cents)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to debit account")?;

        row.map(|row| Self::row_to_leg(&row)).transpose()
    }

    /// Current balance of an account as seen inside this unit.
    pub async fn balance_of(&mut self, account_id: AccountId) -> Result<Option<Cents>> {
        let balance = sqlx::query_scalar::<_, i64>("SELECT balance_cents FROM accounts WHERE id = ?")
            .bind(account_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to read balance")?;
        Ok(balance)
    }

    /// Insert a transaction record, assigning its sequence number.
    pub async fn insert_transaction(&mut self, record: &mut TransactionRecord) -> Result<()> {
        record.sequence = self.next_sequence("transaction_sequence").await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, sender_id, receiver_id, sender_user_id, receiver_user_id, amount_cents, sender_balance_after, receiver_balance_after, status, idempotency_key, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.sequence)
        .bind(record.sender_id.to_string())
        .bind(record.receiver_id.to_string())
        .bind(&record.sender_user_id)
        .bind(&record.receiver_user_id)
        .bind(record.amount_cents)
        .bind(record.sender_balance_after)
        .bind(record.receiver_balance_after)
        .bind(record.status.as_str())
        .bind(&record.idempotency_key)
        .bind(encode_timestamp(&record.timestamp))
        .execute(&mut *self.tx)
        .await
        .context("Failed to save transaction")?;

        Ok(())
    }

    /// Insert an audit entry, assigning its sequence number.
    pub async fn insert_audit_entry(&mut self, entry: &mut AuditEntry) -> Result<()> {
        entry.sequence = self.next_sequence("audit_sequence").await?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, sequence, transaction_id, action, details, status, sender_user_id, receiver_user_id, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.sequence)
        .bind(entry.transaction_id.map(|id| id.to_string()))
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(entry.status.as_str())
        .bind(&entry.sender_user_id)
        .bind(&entry.receiver_user_id)
        .bind(encode_timestamp(&entry.timestamp))
        .execute(&mut *self.tx)
        .await
        .context("Failed to save audit entry")?;

        Ok(())
    }

    /// Make every write in this unit durable.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit")?;
        Ok(())
    }

    async fn next_sequence(&mut self, name: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = ?
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    fn row_to_leg(row: &sqlx::sqlite::SqliteRow) -> Result<TransferLeg> {
        let id_str: String = row.get("id");
        Ok(TransferLeg {
            account_id: uuid::Uuid::parse_str(&id_str).context("Invalid account ID")?,
            user_id: row.get("user_id"),
            balance_after: row.get("balance_cents"),
        })
    }
}
