use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::application::{EngineConfig, LedgerService, NewAccount};
use crate::domain::{format_cents, AuditEntry, Role, TransactionRecord, TransferRequest};

/// SecurePay - peer-to-peer transfers with an auditable ledger
#[derive(Parser)]
#[command(name = "securepay")]
#[command(about = "Move funds between accounts and inspect the ledger and audit trail")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "securepay.db", env = "SECUREPAY_DATABASE")]
    pub database: String,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Attempts at a contended transfer before giving up
    #[arg(long, global = true, default_value = "5", env = "SECUREPAY_MAX_RETRIES")]
    pub max_retries: u32,

    /// Record FAILURE audit entries for rejected transfers
    #[arg(long, global = true, env = "SECUREPAY_AUDIT_FAILURES")]
    pub audit_failures: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Send funds to another account
    Transfer {
        /// Receiver's user id
        to: String,

        /// Amount to send (e.g., "50.00" or "50")
        amount: String,

        /// Acting user id
        #[arg(long = "as")]
        caller: String,

        /// Client-generated key; repeating it never moves funds twice
        #[arg(long)]
        key: Option<String>,
    },

    /// List ledger transactions visible to the caller, newest first
    Ledger {
        /// Acting user id
        #[arg(long = "as")]
        caller: String,

        /// Narrow to one user id (admins only)
        #[arg(long)]
        target: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List audit entries visible to the caller, newest first
    Audit {
        /// Acting user id
        #[arg(long = "as")]
        caller: String,

        /// Narrow to one user id (admins only)
        #[arg(long)]
        target: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account with the starting balance
    Open {
        /// User id (must be unique)
        user_id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Email address (must be unique)
        #[arg(long)]
        email: String,

        /// Credential hash from the authentication layer
        #[arg(long, default_value = "")]
        credential_hash: String,

        /// Open as an admin account
        #[arg(long)]
        admin: bool,
    },

    /// Show the acting account
    Show {
        /// Acting user id
        #[arg(long = "as")]
        caller: String,
    },

    /// List account holders
    List {
        /// Acting user id
        #[arg(long = "as")]
        caller: String,
    },
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_max_retries(self.max_retries)
            .with_failure_auditing(self.audit_failures)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.engine_config();

        match self.command {
            Commands::Init => {
                LedgerService::init_with(&self.database, config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Account(account_cmd) => {
                let service = LedgerService::connect_with(&self.database, config).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Transfer {
                to,
                amount,
                caller,
                key,
            } => {
                let service = LedgerService::connect_with(&self.database, config).await?;
                let caller = service.resolve_caller(&caller).await?;

                let mut request = TransferRequest::new(to, amount);
                if let Some(key) = key {
                    request = request.with_idempotency_key(key);
                }

                let record = service.transfer(&caller, request).await?;
                println!(
                    "Sent {} {} -> {} ({})",
                    format_cents(record.amount_cents),
                    record.sender_user_id,
                    record.receiver_user_id,
                    record.id
                );
                println!("Balance: {}", format_cents(record.sender_balance_after));
            }

            Commands::Ledger {
                caller,
                target,
                json,
            } => {
                let service = LedgerService::connect_with(&self.database, config).await?;
                let caller = service.resolve_caller(&caller).await?;
                let records = service
                    .list_transactions(&caller, target.as_deref())
                    .await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    print_transactions(&records);
                }
            }

            Commands::Audit {
                caller,
                target,
                json,
            } => {
                let service = LedgerService::connect_with(&self.database, config).await?;
                let caller = service.resolve_caller(&caller).await?;
                let entries = service
                    .list_audit_entries(&caller, target.as_deref())
                    .await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    print_audit_entries(&entries);
                }
            }

            Commands::Check => {
                let service = LedgerService::connect_with(&self.database, config).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            user_id,
            name,
            email,
            credential_hash,
            admin,
        } => {
            let role = if admin { Role::Admin } else { Role::User };
            let account = service
                .open_account(NewAccount::user(user_id, name, email, credential_hash).with_role(role))
                .await?;
            println!(
                "Opened {} account '{}' with balance {}",
                account.role,
                account.user_id,
                format_cents(account.balance_cents)
            );
        }

        AccountCommands::Show { caller } => {
            let caller = service.resolve_caller(&caller).await?;
            let account = service.get_profile(&caller).await?;
            println!("User ID: {}", account.user_id);
            println!("Name:    {}", account.name);
            println!("Email:   {}", account.email);
            println!("Role:    {}", account.role);
            println!("Balance: {}", format_cents(account.balance_cents));
        }

        AccountCommands::List { caller } => {
            let caller = service.resolve_caller(&caller).await?;
            let entries = service.list_directory(&caller).await?;
            if entries.is_empty() {
                println!("No accounts found.");
                return Ok(());
            }
            println!("{:<20} {:<24} {:<28} {:>12}", "USER ID", "NAME", "EMAIL", "BALANCE");
            println!("{}", "-".repeat(87));
            for entry in entries {
                println!(
                    "{:<20} {:<24} {:<28} {:>12}",
                    truncate(&entry.user_id, 20),
                    truncate(&entry.name, 24),
                    truncate(entry.email.as_deref().unwrap_or("-"), 28),
                    entry.balance_cents.map(format_cents).unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }
    Ok(())
}

fn print_transactions(records: &[TransactionRecord]) {
    if records.is_empty() {
        println!("No transactions found.");
        return;
    }
    println!(
        "{:<20} {:<16} {:<16} {:>12} {:>12} {:>12}",
        "DATE", "FROM", "TO", "AMOUNT", "FROM AFTER", "TO AFTER"
    );
    println!("{}", "-".repeat(93));
    for record in records {
        println!(
            "{:<20} {:<16} {:<16} {:>12} {:>12} {:>12}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            truncate(&record.sender_user_id, 16),
            truncate(&record.receiver_user_id, 16),
            format_cents(record.amount_cents),
            format_cents(record.sender_balance_after),
            format_cents(record.receiver_balance_after)
        );
    }
}

fn print_audit_entries(entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("No audit entries found.");
        return;
    }
    println!("{:<20} {:<10} {:<8} DETAILS", "DATE", "ACTION", "STATUS");
    println!("{}", "-".repeat(80));
    for entry in entries {
        println!(
            "{:<20} {:<10} {:<8} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            truncate(&entry.action, 10),
            entry.status.as_str(),
            entry.details
        );
    }
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:      {}", report.account_count);
    println!("Transactions:  {}", report.transaction_count);
    println!("Audit entries: {}", report.audit_count);
    println!();
    println!(
        "Total held:    {:>12}  {}",
        format_cents(report.total_balance),
        if report.is_balanced { "OK" } else { "UNBALANCED!" }
    );
    println!("Expected:      {:>12}", format_cents(report.expected_total));
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_transfer() {
        let cli = Cli::try_parse_from([
            "securepay", "transfer", "bob", "200", "--as", "alice", "--key", "k-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Transfer {
                to,
                amount,
                caller,
                key,
            } => {
                assert_eq!(to, "bob");
                assert_eq!(amount, "200");
                assert_eq!(caller, "alice");
                assert_eq!(key.as_deref(), Some("k-1"));
            }
            _ => panic!("expected transfer command"),
        }
    }

    #[test]
    fn test_engine_config_from_flags() {
        let cli = Cli::try_parse_from([
            "securepay", "--max-retries", "9", "--audit-failures", "check",
        ])
        .unwrap();
        let config = cli.engine_config();
        assert_eq!(config.max_retries, 9);
        assert!(config.audit_failures);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("alice", 10), "alice");
        assert_eq!(truncate("a-very-long-user-id", 10), "a-very-...");
    }
}
