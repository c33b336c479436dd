use tracing::debug;

use crate::domain::{AuditEntry, Caller, LedgerScope, TransactionRecord};
use crate::storage::Repository;

use super::AppError;

/// Role-scoped, read-only views over the ledger and the audit trail.
///
/// The caller's role is looked up on every call, never taken from the caller.
/// Results are newest first and fully materialized.
#[derive(Clone)]
pub struct LedgerQueryService {
    repo: Repository,
}

impl LedgerQueryService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Transactions the caller may see. `filter` narrows an admin's view to
    /// one user id and is ignored for everyone else.
    pub async fn list_transactions(
        &self,
        caller: &Caller,
        filter: Option<&str>,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let scope = self.scope_for(caller, filter).await?;
        let records = self.repo.list_transactions(&scope).await?;
        debug!(scope = ?scope, count = records.len(), "Listed transactions");
        Ok(records)
    }

    /// Audit entries the caller may see, with the same scoping rules as
    /// [`list_transactions`](Self::list_transactions).
    pub async fn list_audit_entries(
        &self,
        caller: &Caller,
        filter: Option<&str>,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let scope = self.scope_for(caller, filter).await?;
        let entries = self.repo.list_audit_entries(&scope).await?;
        debug!(scope = ?scope, count = entries.len(), "Listed audit entries");
        Ok(entries)
    }

    async fn scope_for(&self, caller: &Caller, filter: Option<&str>) -> Result<LedgerScope, AppError> {
        let account = self
            .repo
            .get_account(caller.account_id)
            .await?
            .ok_or(AppError::CallerNotFound(caller.account_id))?;
        Ok(LedgerScope::resolve(&account, filter))
    }
}
