use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ledger_now, Cents};

pub type AccountId = Uuid;

/// Every account opens with 500.00 units.
pub const STARTING_BALANCE: Cents = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account holder; sees only their own activity
    User,
    /// Operator; sees every account's activity
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered account holder.
///
/// Only the transfer engine ever changes `balance_cents`; every other field is
/// fixed at onboarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Human-chosen identifier, unique across accounts
    pub user_id: String,
    pub name: String,
    pub email: String,
    /// Opaque hash produced by the credential layer
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub role: Role,
    pub balance_cents: Cents,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        credential_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
            credential_hash: credential_hash.into(),
            role: Role::User,
            balance_cents: STARTING_BALANCE,
            created_at: ledger_now(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// The authenticated identity handed to the core by the request layer.
///
/// Carries no role. Visibility is derived from a fresh lookup of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub account_id: AccountId,
}

impl Caller {
    pub fn new(account_id: AccountId) -> Self {
        Self { account_id }
    }
}

impl From<&Account> for Caller {
    fn from(account: &Account) -> Self {
        Self::new(account.id)
    }
}

/// One row of the account directory. Contact details and balance are only
/// filled in for admin callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_cents: Option<Cents>,
}

impl DirectoryEntry {
    pub fn for_viewer(account: Account, viewer: &Account) -> Self {
        if viewer.is_admin() {
            Self {
                user_id: account.user_id,
                name: account.name,
                email: Some(account.email),
                balance_cents: Some(account.balance_cents),
            }
        } else {
            Self {
                user_id: account.user_id,
                name: account.name,
                email: None,
                balance_cents: None,
            }
        }
    }
}
