use serde::Serialize;

use super::{format_cents, Cents, STARTING_BALANCE};

/// Raw counters gathered from the store for an integrity check.
#[derive(Debug, Clone, Default)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub transaction_count: i64,
    pub audit_count: i64,
    pub total_balance: Cents,
    pub negative_balances: i64,
    pub unaudited_transactions: i64,
    pub invalid_amounts: i64,
    pub has_sequence_gaps: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub transaction_count: i64,
    pub audit_count: i64,
    pub total_balance: Cents,
    pub expected_total: Cents,
    pub is_balanced: bool,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Turn store counters into a report.
///
/// Transfers only move funds between accounts, so the total held must equal
/// the sum of opening balances.
pub fn build_integrity_report(stats: &IntegrityStats) -> IntegrityReport {
    let expected_total = stats.account_count * STARTING_BALANCE;
    let is_balanced = stats.total_balance == expected_total;
    let mut issues = Vec::new();

    if !is_balanced {
        issues.push(format!(
            "Total balance {} does not match opening balances {}",
            format_cents(stats.total_balance),
            format_cents(expected_total)
        ));
    }
    if stats.negative_balances > 0 {
        issues.push(format!(
            "{} account(s) have a negative balance",
            stats.negative_balances
        ));
    }
    if stats.unaudited_transactions > 0 {
        issues.push(format!(
            "{} transaction(s) lack exactly one SUCCESS audit entry",
            stats.unaudited_transactions
        ));
    }
    if stats.invalid_amounts > 0 {
        issues.push(format!(
            "{} transaction(s) have a non-positive amount",
            stats.invalid_amounts
        ));
    }
    if stats.has_sequence_gaps {
        issues.push("Transaction sequence has gaps".to_string());
    }

    IntegrityReport {
        account_count: stats.account_count,
        transaction_count: stats.transaction_count,
        audit_count: stats.audit_count,
        total_balance: stats.total_balance,
        expected_total,
        is_balanced,
        issues,
    }
}
