use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AuditEntry, AuditStatus, IntegrityStats, LedgerScope, Role,
    TransactionRecord, TransactionStatus,
};

use super::{AtomicUnit, MIGRATION_001_INITIAL};

/// SQLite extended result codes share the primary code in their low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// How long a connection waits on a locked database before giving up
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Repository for persisting and querying accounts, transactions and audit entries.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL.
    /// `?mode=rwc` in the URL creates the file if it doesn't exist.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(settings.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, settings: &PoolSettings) -> Result<Self> {
        let repo = Self::connect(database_url, settings).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start an atomic unit of writes.
    pub async fn begin(&self) -> Result<AtomicUnit> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(AtomicUnit::new(tx))
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account to the database.
    pub async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, name, email, credential_hash, role, balance_cents, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.user_id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.credential_hash)
        .bind(account.role.as_str())
        .bind(account.balance_cents)
        .bind(encode_timestamp(&account.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Get an account by internal ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, email, credential_hash, role, balance_cents, created_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.map(|row| Self::row_to_account(&row)).transpose()
    }

    /// Get an account by its user id.
    pub async fn get_account_by_user_id(&self, user_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, email, credential_hash, role, balance_cents, created_at
            FROM accounts
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by user id")?;

        row.map(|row| Self::row_to_account(&row)).transpose()
    }

    /// Get an account by email.
    pub async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, email, credential_hash, role, balance_cents, created_at
            FROM accounts
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by email")?;

        row.map(|row| Self::row_to_account(&row)).transpose()
    }

    /// List accounts, optionally restricted to one role.
    pub async fn list_accounts(&self, role: Option<Role>) -> Result<Vec<Account>> {
        let rows = match role {
            Some(role) => sqlx::query(
                "SELECT id, user_id, name, email, credential_hash, role, balance_cents, created_at FROM accounts WHERE role = ? ORDER BY user_id",
            )
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(
                "SELECT id, user_id, name, email, credential_hash, role, balance_cents, created_at FROM accounts ORDER BY user_id",
            )
            .fetch_all(&self.pool)
            .await,
        }
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let role_str: String = row.get("role");
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            user_id: row.get("user_id"),
            name: row.get("name"),
            email: row.get("email"),
            credential_hash: row.get("credential_hash"),
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role_str))?,
            balance_cents: row.get("balance_cents"),
            created_at: decode_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }

    // ========================
    // Ledger operations
    // ========================

    /// Find the transaction a sender already recorded under an idempotency key.
    pub async fn get_transaction_by_key(
        &self,
        sender_id: AccountId,
        idempotency_key: &str,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, sequence, sender_id, receiver_id, sender_user_id, receiver_user_id, amount_cents, sender_balance_after, receiver_balance_after, status, idempotency_key, timestamp
            FROM transactions
            WHERE sender_id = ? AND idempotency_key = ?
            "#,
        )
        .bind(sender_id.to_string())
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction by idempotency key")?;

        row.map(|row| Self::row_to_transaction(&row)).transpose()
    }

    /// List transactions visible in `scope`, most recent first.
    /// Ties on timestamp go to the later insertion.
    pub async fn list_transactions(&self, scope: &LedgerScope) -> Result<Vec<TransactionRecord>> {
        let mut query = String::from(
            "SELECT id, sequence, sender_id, receiver_id, sender_user_id, receiver_user_id, amount_cents, sender_balance_after, receiver_balance_after, status, idempotency_key, timestamp FROM transactions",
        );
        if scope.participant().is_some() {
            query.push_str(" WHERE sender_user_id = ? OR receiver_user_id = ?");
        }
        query.push_str(" ORDER BY timestamp DESC, sequence DESC");

        let mut sql_query = sqlx::query(&query);
        if let Some(user_id) = scope.participant() {
            sql_query = sql_query.bind(user_id).bind(user_id);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<TransactionRecord> {
        let id_str: String = row.get("id");
        let sender_str: String = row.get("sender_id");
        let receiver_str: String = row.get("receiver_id");
        let status_str: String = row.get("status");
        let timestamp_str: String = row.get("timestamp");

        Ok(TransactionRecord {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            sender_id: Uuid::parse_str(&sender_str).context("Invalid sender ID")?,
            receiver_id: Uuid::parse_str(&receiver_str).context("Invalid receiver ID")?,
            sender_user_id: row.get("sender_user_id"),
            receiver_user_id: row.get("receiver_user_id"),
            amount_cents: row.get("amount_cents"),
            sender_balance_after: row.get("sender_balance_after"),
            receiver_balance_after: row.get("receiver_balance_after"),
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
            idempotency_key: row.get("idempotency_key"),
            timestamp: decode_timestamp(&timestamp_str).context("Invalid timestamp")?,
        })
    }

    // ========================
    // Audit operations
    // ========================

    /// List audit entries visible in `scope`, most recent first.
    pub async fn list_audit_entries(&self, scope: &LedgerScope) -> Result<Vec<AuditEntry>> {
        let mut query = String::from(
            "SELECT id, sequence, transaction_id, action, details, status, sender_user_id, receiver_user_id, timestamp FROM audit_log",
        );
        if scope.participant().is_some() {
            query.push_str(" WHERE sender_user_id = ? OR receiver_user_id = ?");
        }
        query.push_str(" ORDER BY timestamp DESC, sequence DESC");

        let mut sql_query = sqlx::query(&query);
        if let Some(user_id) = scope.participant() {
            sql_query = sql_query.bind(user_id).bind(user_id);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list audit entries")?;

        rows.iter().map(Self::row_to_audit_entry).collect()
    }

    fn row_to_audit_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry> {
        let id_str: String = row.get("id");
        let transaction_str: Option<String> = row.get("transaction_id");
        let status_str: String = row.get("status");
        let timestamp_str: String = row.get("timestamp");

        Ok(AuditEntry {
            id: Uuid::parse_str(&id_str).context("Invalid audit ID")?,
            sequence: row.get("sequence"),
            transaction_id: transaction_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid transaction reference")?,
            action: row.get("action"),
            details: row.get("details"),
            status: AuditStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid audit status: {}", status_str))?,
            sender_user_id: row.get("sender_user_id"),
            receiver_user_id: row.get("receiver_user_id"),
            timestamp: decode_timestamp(&timestamp_str).context("Invalid timestamp")?,
        })
    }

    // ========================
    // Integrity
    // ========================

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let accounts = sqlx::query(
            r#"
            SELECT
                COUNT(*) as count,
                COALESCE(SUM(balance_cents), 0) as total,
                COALESCE(SUM(CASE WHEN balance_cents < 0 THEN 1 ELSE 0 END), 0) as negative
            FROM accounts
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate accounts")?;

        let sequence_check = sqlx::query(
            r#"
            SELECT
                MIN(sequence) as min_seq,
                MAX(sequence) as max_seq,
                COUNT(*) as count
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to check transaction sequence")?;

        let min_seq: Option<i64> = sequence_check.get("min_seq");
        let max_seq: Option<i64> = sequence_check.get("max_seq");
        let transaction_count: i64 = sequence_check.get("count");

        let has_sequence_gaps = match (min_seq, max_seq) {
            (Some(min), Some(max)) => (max - min + 1) != transaction_count,
            _ => false,
        };

        let audit_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM audit_log")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        // Every transaction must have exactly one SUCCESS audit entry
        let unaudited_transactions: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM transactions t
            WHERE (
                SELECT COUNT(*) FROM audit_log a
                WHERE a.transaction_id = t.id AND a.status = 'SUCCESS'
            ) != 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let invalid_amounts: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM transactions WHERE amount_cents <= 0",
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(IntegrityStats {
            account_count: accounts.get("count"),
            transaction_count,
            audit_count,
            total_balance: accounts.get("total"),
            negative_balances: accounts.get("negative"),
            unaudited_transactions,
            invalid_amounts,
            has_sequence_gaps,
        })
    }
}

/// Fixed-width RFC 3339 with microseconds, so text order matches time order.
pub(crate) fn encode_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// True if `err` was caused by another connection holding the database lock.
pub fn is_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
                || db_err.message().contains("database is locked")
        }
        Some(sqlx::Error::PoolTimedOut) => true,
        _ => false,
    })
}

/// True if `err` was caused by a UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db_err)) if db_err.is_unique_violation()
        )
    })
}
