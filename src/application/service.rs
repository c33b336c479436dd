use tracing::info;

use crate::domain::{
    build_integrity_report, Account, AuditEntry, Caller, DirectoryEntry, IntegrityReport, Role,
    TransactionRecord, TransferRequest,
};
use crate::storage::{is_unique_violation, Repository};

use super::{AppError, EngineConfig, LedgerQueryService, TransferEngine};

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, API, etc.).
#[derive(Clone)]
pub struct LedgerService {
    repo: Repository,
    engine: TransferEngine,
    queries: LedgerQueryService,
}

/// Details for onboarding a new account holder.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub credential_hash: String,
    pub role: Role,
}

impl NewAccount {
    pub fn user(
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        credential_hash: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
            credential_hash: credential_hash.into(),
            role: Role::User,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::InvalidAccount("user id is required".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidAccount("name is required".to_string()));
        }
        if !self.email.contains('@') {
            return Err(AppError::InvalidAccount(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        Ok(())
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: EngineConfig) -> Self {
        Self {
            engine: TransferEngine::new(repo.clone(), config),
            queries: LedgerQueryService::new(repo.clone()),
            repo,
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        Self::init_with(database_path, EngineConfig::default()).await
    }

    pub async fn init_with(database_path: &str, config: EngineConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url, &config.pool).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        Self::connect_with(database_path, EngineConfig::default()).await
    }

    pub async fn connect_with(database_path: &str, config: EngineConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url, &config.pool).await?;
        Ok(Self::new(repo, config))
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn queries(&self) -> &LedgerQueryService {
        &self.queries
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account with the starting balance.
    pub async fn open_account(&self, new_account: NewAccount) -> Result<Account, AppError> {
        new_account.validate()?;

        if self
            .repo
            .get_account_by_user_id(&new_account.user_id)
            .await?
            .is_some()
        {
            return Err(AppError::AccountAlreadyExists {
                field: "user_id",
                value: new_account.user_id,
            });
        }
        if self
            .repo
            .get_account_by_email(&new_account.email)
            .await?
            .is_some()
        {
            return Err(AppError::AccountAlreadyExists {
                field: "email",
                value: new_account.email,
            });
        }

        let account = Account::new(
            new_account.user_id,
            new_account.name,
            new_account.email,
            new_account.credential_hash,
        )
        .with_role(new_account.role);

        if let Err(err) = self.repo.save_account(&account).await {
            // Lost a race with a concurrent onboarding of the same identity
            if is_unique_violation(&err) {
                return Err(AppError::AccountAlreadyExists {
                    field: "user_id or email",
                    value: account.user_id,
                });
            }
            return Err(err.into());
        }

        info!(user_id = %account.user_id, role = %account.role, "Account opened");
        Ok(account)
    }

    /// Resolve a user id to a caller identity. Stands in for the external
    /// authentication layer.
    pub async fn resolve_caller(&self, user_id: &str) -> Result<Caller, AppError> {
        self.repo
            .get_account_by_user_id(user_id)
            .await?
            .map(|account| Caller::from(&account))
            .ok_or_else(|| AppError::AccountNotFound(user_id.to_string()))
    }

    /// The caller's own account, freshly read.
    pub async fn get_profile(&self, caller: &Caller) -> Result<Account, AppError> {
        self.repo
            .get_account(caller.account_id)
            .await?
            .ok_or(AppError::CallerNotFound(caller.account_id))
    }

    /// Account holders (role `user`) the caller can send to. Admins also see
    /// contact details and balances.
    pub async fn list_directory(&self, caller: &Caller) -> Result<Vec<DirectoryEntry>, AppError> {
        let viewer = self.get_profile(caller).await?;
        let accounts = self.repo.list_accounts(Some(Role::User)).await?;
        Ok(accounts
            .into_iter()
            .map(|account| DirectoryEntry::for_viewer(account, &viewer))
            .collect())
    }

    // ========================
    // Transfer and query operations
    // ========================

    pub async fn transfer(
        &self,
        caller: &Caller,
        request: TransferRequest,
    ) -> Result<TransactionRecord, AppError> {
        self.engine.transfer(caller, request).await
    }

    pub async fn list_transactions(
        &self,
        caller: &Caller,
        filter: Option<&str>,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        self.queries.list_transactions(caller, filter).await
    }

    pub async fn list_audit_entries(
        &self,
        caller: &Caller,
        filter: Option<&str>,
    ) -> Result<Vec<AuditEntry>, AppError> {
        self.queries.list_audit_entries(caller, filter).await
    }

    // ========================
    // Integrity operations
    // ========================

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let stats = self.repo.get_integrity_stats().await?;
        Ok(build_integrity_report(&stats))
    }
}
