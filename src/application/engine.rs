use tracing::{debug, error, info, warn};

use crate::domain::{
    parse_cents, Account, AuditEntry, Caller, Cents, TransactionRecord, TransferRequest,
};
use crate::storage::{is_contention, is_unique_violation, Repository};

use super::{AppError, EngineConfig};

/// Executes balance transfers as single atomic units.
///
/// Each attempt debits the sender, credits the receiver, and appends the
/// transaction record and its SUCCESS audit entry inside one
/// [`AtomicUnit`](crate::storage::AtomicUnit). Either all of it commits or
/// none of it does.
#[derive(Clone)]
pub struct TransferEngine {
    repo: Repository,
    config: EngineConfig,
}

impl TransferEngine {
    pub fn new(repo: Repository, config: EngineConfig) -> Self {
        Self { repo, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Move `request.amount` from the caller's account to `request.receiver`.
    ///
    /// The caller is resolved by internal id; the receiver by user id. On any
    /// error the store is left exactly as it was, apart from an optional
    /// FAILURE audit entry when failure auditing is enabled.
    pub async fn transfer(
        &self,
        caller: &Caller,
        request: TransferRequest,
    ) -> Result<TransactionRecord, AppError> {
        let sender = self
            .repo
            .get_account(caller.account_id)
            .await?
            .ok_or(AppError::CallerNotFound(caller.account_id))?;

        let result = self.execute(&sender, &request).await;

        match &result {
            Ok(record) => info!(
                transaction_id = %record.id,
                sender = %record.sender_user_id,
                receiver = %record.receiver_user_id,
                amount_cents = record.amount_cents,
                "Transfer committed"
            ),
            Err(err) => {
                warn!(
                    sender = %sender.user_id,
                    receiver = %request.receiver,
                    code = err.code(),
                    transient = err.is_transient(),
                    error = %err,
                    "Transfer rejected"
                );
                if self.config.audit_failures && is_auditable(err) {
                    self.record_failure(&sender, &request, err).await;
                }
            }
        }

        result
    }

    async fn execute(
        &self,
        sender: &Account,
        request: &TransferRequest,
    ) -> Result<TransactionRecord, AppError> {
        let amount_cents = parse_amount(&request.amount)?;

        if sender.user_id == request.receiver {
            return Err(AppError::SelfTransfer);
        }

        let idempotency_key = request
            .idempotency_key
            .as_deref()
            .filter(|key| !key.is_empty());

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.repo.get_transaction_by_key(sender.id, key).await? {
                return replay(existing, key, &request.receiver, amount_cents);
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .attempt(sender, &request.receiver, amount_cents, idempotency_key)
                .await
            {
                Err(AppError::Database(err)) if is_contention(&err) => {
                    if attempt >= self.config.max_retries {
                        return Err(AppError::Conflict { attempts: attempt });
                    }
                    debug!(
                        sender = %sender.user_id,
                        attempt,
                        error = %err,
                        "Transfer contended, retrying"
                    );
                    tokio::time::sleep(self.config.backoff_for(attempt)).await;
                }
                Err(AppError::Database(err))
                    if idempotency_key.is_some() && is_unique_violation(&err) =>
                {
                    // A concurrent request with the same key committed first
                    let key = idempotency_key.unwrap_or_default();
                    return match self.repo.get_transaction_by_key(sender.id, key).await? {
                        Some(existing) => replay(existing, key, &request.receiver, amount_cents),
                        None => Err(AppError::Database(err)),
                    };
                }
                other => return other,
            }
        }
    }

    /// One pass through the atomic unit.
    ///
    /// The receiver credit runs first so the unit's opening statement is a
    /// write and SQLite takes the write lock before any balance is read.
    async fn attempt(
        &self,
        sender: &Account,
        receiver: &str,
        amount_cents: Cents,
        idempotency_key: Option<&str>,
    ) -> Result<TransactionRecord, AppError> {
        let mut unit = self.repo.begin().await?;

        // Returning early drops the unit, which rolls it back
        let Some(receiver_leg) = unit.credit(receiver, amount_cents).await? else {
            return Err(AppError::AccountNotFound(receiver.to_string()));
        };

        let Some(sender_leg) = unit.debit_if_sufficient(sender.id, amount_cents).await? else {
            let balance = unit.balance_of(sender.id).await?;
            return Err(match balance {
                Some(balance) => AppError::InsufficientFunds {
                    user_id: sender.user_id.clone(),
                    balance,
                    required: amount_cents,
                },
                None => AppError::CallerNotFound(sender.id),
            });
        };

        let mut record = TransactionRecord::completed(
            &sender_leg,
            &receiver_leg,
            amount_cents,
            idempotency_key.map(str::to_string),
        );
        unit.insert_transaction(&mut record).await?;

        let mut entry = AuditEntry::transfer_success(&record);
        unit.insert_audit_entry(&mut entry).await?;

        unit.commit().await?;
        Ok(record)
    }

    /// Append a FAILURE audit entry in its own unit. Errors here are logged,
    /// never surfaced, so the caller still sees the original rejection.
    async fn record_failure(&self, sender: &Account, request: &TransferRequest, err: &AppError) {
        let amount_cents = parse_cents(&request.amount).ok();
        let mut entry = AuditEntry::transfer_failure(
            &sender.user_id,
            &request.receiver,
            amount_cents,
            &err.to_string(),
        );

        if let Err(audit_err) = self.append_audit_entry(&mut entry).await {
            error!(
                sender = %sender.user_id,
                error = %audit_err,
                "Failed to record audit entry for rejected transfer"
            );
        }
    }

    async fn append_audit_entry(&self, entry: &mut AuditEntry) -> anyhow::Result<()> {
        let mut unit = self.repo.begin().await?;
        unit.insert_audit_entry(entry).await?;
        unit.commit().await
    }
}

/// Parse an untrusted amount; it must be a positive number of cents.
fn parse_amount(raw: &str) -> Result<Cents, AppError> {
    let cents = parse_cents(raw).map_err(|e| AppError::InvalidAmount(format!("'{}': {}", raw, e)))?;
    if cents <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "'{}': amount must be positive",
            raw
        )));
    }
    Ok(cents)
}

fn replay(
    existing: TransactionRecord,
    key: &str,
    receiver: &str,
    amount_cents: Cents,
) -> Result<TransactionRecord, AppError> {
    if existing.matches_request(receiver, amount_cents) {
        debug!(transaction_id = %existing.id, key, "Replayed idempotent transfer");
        Ok(existing)
    } else {
        Err(AppError::IdempotencyKeyReused(key.to_string()))
    }
}

fn is_auditable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::InvalidAmount(_)
            | AppError::SelfTransfer
            | AppError::AccountNotFound(_)
            | AppError::InsufficientFunds { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("200").unwrap(), 20_000);
        assert_eq!(parse_amount("0.01").unwrap(), 1);
        assert!(matches!(parse_amount("0"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("0.00"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("-5"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("abc"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("NaN"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount("1.999"), Err(AppError::InvalidAmount(_))));
        assert!(matches!(parse_amount(""), Err(AppError::InvalidAmount(_))));
    }

    #[test]
    fn test_auditable_failures() {
        assert!(is_auditable(&AppError::SelfTransfer));
        assert!(is_auditable(&AppError::AccountNotFound("bob".into())));
        assert!(!is_auditable(&AppError::Conflict { attempts: 5 }));
        assert!(!is_auditable(&AppError::IdempotencyKeyReused("k".into())));
        assert!(!is_auditable(&AppError::Database(anyhow::anyhow!("io"))));
    }
}
