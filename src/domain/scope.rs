use super::Account;

/// The slice of the ledger and audit trail a caller is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerScope {
    /// Every record, unscoped
    All,
    /// Records where this user id is the sender or the receiver
    Participant(String),
}

impl LedgerScope {
    /// Resolve the visible scope for a freshly loaded caller account.
    ///
    /// Non-admins are pinned to their own user id whatever filter they pass.
    /// An empty filter counts as no filter.
    pub fn resolve(caller: &Account, filter: Option<&str>) -> Self {
        if !caller.is_admin() {
            return LedgerScope::Participant(caller.user_id.clone());
        }
        match filter.map(str::trim) {
            Some(target) if !target.is_empty() => LedgerScope::Participant(target.to_string()),
            _ => LedgerScope::All,
        }
    }

    pub fn participant(&self) -> Option<&str> {
        match self {
            LedgerScope::All => None,
            LedgerScope::Participant(user_id) => Some(user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    fn user(user_id: &str) -> Account {
        Account::new(user_id, user_id, format!("{}@example.com", user_id), "hash")
    }

    #[test]
    fn test_user_is_pinned_to_self() {
        let alice = user("alice");
        assert_eq!(
            LedgerScope::resolve(&alice, None),
            LedgerScope::Participant("alice".into())
        );
        assert_eq!(
            LedgerScope::resolve(&alice, Some("bob")),
            LedgerScope::Participant("alice".into())
        );
    }

    #[test]
    fn test_admin_scope() {
        let admin = user("root").with_role(Role::Admin);
        assert_eq!(LedgerScope::resolve(&admin, None), LedgerScope::All);
        assert_eq!(LedgerScope::resolve(&admin, Some("")), LedgerScope::All);
        assert_eq!(LedgerScope::resolve(&admin, Some("  ")), LedgerScope::All);
        assert_eq!(
            LedgerScope::resolve(&admin, Some("bob")),
            LedgerScope::Participant("bob".into())
        );
    }
}
