// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use securepay::application::{EngineConfig, LedgerService, NewAccount};
use securepay::domain::{Caller, Cents, Role};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(EngineConfig::default()).await
}

/// Helper to create a test service with custom engine settings
pub async fn test_service_with(config: EngineConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init_with(db_path.to_str().unwrap(), config).await?;
    Ok((service, temp_dir))
}

/// Open a regular account and return its caller identity
pub async fn open_user(service: &LedgerService, user_id: &str) -> Result<Caller> {
    open_with_role(service, user_id, Role::User).await
}

/// Open an admin account and return its caller identity
pub async fn open_admin(service: &LedgerService, user_id: &str) -> Result<Caller> {
    open_with_role(service, user_id, Role::Admin).await
}

async fn open_with_role(service: &LedgerService, user_id: &str, role: Role) -> Result<Caller> {
    let account = service
        .open_account(
            NewAccount::user(
                user_id,
                format!("{} name", user_id),
                format!("{}@example.com", user_id),
                "hash",
            )
            .with_role(role),
        )
        .await?;
    Ok(Caller::from(&account))
}

/// Current balance of the caller's account
pub async fn balance_of(service: &LedgerService, caller: &Caller) -> Result<Cents> {
    Ok(service.get_profile(caller).await?.balance_cents)
}

/// Everything a failed transfer must leave untouched
#[derive(Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub balances: Vec<(String, Cents)>,
    pub transaction_count: usize,
    pub audit_count: usize,
}

/// Capture balances and record counts as seen by an admin
pub async fn snapshot(service: &LedgerService, admin: &Caller) -> Result<LedgerSnapshot> {
    let balances = service
        .list_directory(admin)
        .await?
        .into_iter()
        .map(|entry| (entry.user_id, entry.balance_cents.unwrap_or_default()))
        .collect();
    Ok(LedgerSnapshot {
        balances,
        transaction_count: service.list_transactions(admin, None).await?.len(),
        audit_count: service.list_audit_entries(admin, None).await?.len(),
    })
}
