// ⚖️ Reconciliation Engine - stored balances must match the ledger
//
// Three layers are checked:
//   savings account:  0 + credits - debits = stored balance, and every
//                     balance_after continues the running balance
//   loan:             outstanding principal = Σ unpaid schedule principal
//   general ledger:   trial balance balances, and the control accounts
//                     (Savings Deposits, Loans Receivable) equal the
//                     subsidiary totals

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entities::loan::{get_schedule, list_loans, Installment, Loan, LoanStatus};
use crate::entities::savings::{list_accounts, AccountStatus, SavingsAccount};
use crate::error::Result;
use crate::ledger::{account_transactions, trial_balance, AccountKind, GlAccount, LedgerTransaction, TxType};

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    Balanced {
        total_credits: Decimal,
        total_debits: Decimal,
        closing_balance: Decimal,
    },

    /// Off by less than the major threshold
    MinorDiscrepancy {
        expected_balance: Decimal,
        actual_balance: Decimal,
        difference: Decimal,
    },

    MajorDiscrepancy {
        expected_balance: Decimal,
        actual_balance: Decimal,
        difference: Decimal,
    },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn has_discrepancy(&self) -> bool {
        !self.is_balanced()
    }

    pub fn difference(&self) -> Decimal {
        match self {
            ReconciliationResult::Balanced { .. } => Decimal::ZERO,
            ReconciliationResult::MinorDiscrepancy { difference, .. } => *difference,
            ReconciliationResult::MajorDiscrepancy { difference, .. } => *difference,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub subject: String,
    pub description: String,
    pub amount: Decimal,
    pub category: DiscrepancyCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// Stored balance differs from the sum of postings
    BalanceMismatch,
    /// A posting's balance_after does not follow from the previous one
    RunningBalanceBreak,
    /// GL control account differs from the subsidiary ledger total
    ControlAccountMismatch,
    /// Σ debits ≠ Σ credits
    UnbalancedJournals,
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AccountReconciliation {
    pub subject: String,
    pub result: ReconciliationResult,
    pub transaction_count: usize,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub calculated_balance: Decimal,
    pub recorded_balance: Decimal,
    pub discrepancies: Vec<Discrepancy>,
}

impl AccountReconciliation {
    pub fn is_balanced(&self) -> bool {
        self.result.is_balanced() && self.discrepancies.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} postings, calculated {}, recorded {}, difference {}",
            self.subject,
            self.transaction_count,
            self.calculated_balance,
            self.recorded_balance,
            self.result.difference()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlCheck {
    pub account: GlAccount,
    pub ledger_balance: Decimal,
    pub subsidiary_total: Decimal,
}

impl ControlCheck {
    pub fn matches(&self) -> bool {
        self.ledger_balance == self.subsidiary_total
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub accounts: Vec<AccountReconciliation>,
    pub loans: Vec<AccountReconciliation>,
    pub controls: Vec<ControlCheck>,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn journals_balanced(&self) -> bool {
        self.total_debits == self.total_credits
    }

    pub fn discrepancies(&self) -> Vec<&Discrepancy> {
        self.accounts
            .iter()
            .chain(self.loans.iter())
            .flat_map(|r| r.discrepancies.iter())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.journals_balanced()
            && self.accounts.iter().all(AccountReconciliation::is_balanced)
            && self.loans.iter().all(AccountReconciliation::is_balanced)
            && self.controls.iter().all(ControlCheck::matches)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} accounts, {} loans, {} control checks, {} discrepancies, journals {}",
            self.accounts.len(),
            self.loans.len(),
            self.controls.len(),
            self.discrepancies().len()
                + self.controls.iter().filter(|c| !c.matches()).count()
                + usize::from(!self.journals_balanced()),
            if self.journals_balanced() { "balanced" } else { "UNBALANCED" }
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Minor vs major discrepancy boundary (default: 10.00)
    pub major_discrepancy_threshold: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            major_discrepancy_threshold: Decimal::from(10),
        }
    }

    pub fn with_threshold(major_threshold: Decimal) -> Self {
        ReconciliationEngine {
            major_discrepancy_threshold: major_threshold,
        }
    }

    fn classify(&self, expected: Decimal, actual: Decimal, credits: Decimal, debits: Decimal) -> ReconciliationResult {
        let difference = (actual - expected).abs();
        if difference.is_zero() {
            ReconciliationResult::Balanced {
                total_credits: credits,
                total_debits: debits,
                closing_balance: actual,
            }
        } else if difference < self.major_discrepancy_threshold {
            ReconciliationResult::MinorDiscrepancy {
                expected_balance: expected,
                actual_balance: actual,
                difference,
            }
        } else {
            ReconciliationResult::MajorDiscrepancy {
                expected_balance: expected,
                actual_balance: actual,
                difference,
            }
        }
    }

    /// Savings accounts open at zero, so: credits - debits = balance
    pub fn reconcile_account(
        &self,
        account: &SavingsAccount,
        transactions: &[LedgerTransaction],
    ) -> AccountReconciliation {
        let total_credits = calculate_credits(transactions);
        let total_debits = calculate_debits(transactions);
        let calculated_balance = total_credits - total_debits;

        let mut discrepancies = Vec::new();
        let mut running = Decimal::ZERO;
        for tx in transactions {
            running += if tx.tx_type.is_credit() { tx.amount } else { -tx.amount };
            if tx.balance_after != running {
                discrepancies.push(Discrepancy {
                    subject: account.account_number.clone(),
                    description: format!(
                        "{} {} on {} shows balance {}, expected {}",
                        tx.tx_type, tx.reference, tx.tx_date, tx.balance_after, running
                    ),
                    amount: (tx.balance_after - running).abs(),
                    category: DiscrepancyCategory::RunningBalanceBreak,
                });
                // Resync so one bad row is reported once
                running = tx.balance_after;
            }
        }

        let result = self.classify(calculated_balance, account.balance, total_credits, total_debits);
        if result.has_discrepancy() {
            discrepancies.push(Discrepancy {
                subject: account.account_number.clone(),
                description: format!("Balance mismatch: {} difference", result.difference()),
                amount: result.difference(),
                category: DiscrepancyCategory::BalanceMismatch,
            });
        }

        AccountReconciliation {
            subject: account.account_number.clone(),
            result,
            transaction_count: transactions.len(),
            total_credits,
            total_debits,
            calculated_balance,
            recorded_balance: account.balance,
            discrepancies,
        }
    }

    /// Outstanding principal must equal what the schedule says is unpaid
    pub fn reconcile_loan(&self, loan: &Loan, schedule: &[Installment]) -> AccountReconciliation {
        let scheduled: Decimal = schedule.iter().map(|i| i.principal).sum();
        let paid: Decimal = schedule.iter().map(|i| i.principal_paid).sum();
        let calculated_balance = scheduled - paid;

        let result = self.classify(calculated_balance, loan.outstanding_principal, paid, scheduled);
        let mut discrepancies = Vec::new();
        if result.has_discrepancy() {
            discrepancies.push(Discrepancy {
                subject: loan.loan_number.clone(),
                description: format!("Outstanding principal mismatch: {} difference", result.difference()),
                amount: result.difference(),
                category: DiscrepancyCategory::BalanceMismatch,
            });
        }

        AccountReconciliation {
            subject: loan.loan_number.clone(),
            result,
            transaction_count: schedule.len(),
            total_credits: paid,
            total_debits: scheduled,
            calculated_balance,
            recorded_balance: loan.outstanding_principal,
            discrepancies,
        }
    }

    /// Reconcile every non-closed savings account, every released or paid
    /// loan, and the general ledger control accounts
    pub fn reconcile_all(&self, conn: &Connection) -> Result<ReconciliationReport> {
        let mut accounts = Vec::new();
        let mut savings_total = Decimal::ZERO;
        for account in list_accounts(conn)? {
            savings_total += account.balance;
            if account.status == AccountStatus::Closed && account.balance.is_zero() {
                continue;
            }
            let txs = account_transactions(conn, AccountKind::Savings, account.id)?;
            accounts.push(self.reconcile_account(&account, &txs));
        }

        let mut loans = Vec::new();
        let mut receivable_total = Decimal::ZERO;
        for loan in list_loans(conn)? {
            if !matches!(loan.status, LoanStatus::Released | LoanStatus::Paid) {
                continue;
            }
            receivable_total += loan.outstanding_principal;
            let schedule = get_schedule(conn, loan.id)?;
            loans.push(self.reconcile_loan(&loan, &schedule));
        }

        let tb = trial_balance(conn)?;
        let control = |account: GlAccount, credit_normal: bool, subsidiary_total: Decimal| {
            let net = tb.line(account).map(|l| l.net()).unwrap_or(Decimal::ZERO);
            ControlCheck {
                account,
                ledger_balance: if credit_normal { -net } else { net },
                subsidiary_total,
            }
        };
        let controls = vec![
            control(GlAccount::SavingsDeposits, true, savings_total),
            control(GlAccount::LoansReceivable, false, receivable_total),
        ];

        let report = ReconciliationReport {
            accounts,
            loans,
            controls,
            total_debits: tb.total_debit,
            total_credits: tb.total_credit,
            reconciled_at: Utc::now(),
        };

        if report.is_clean() {
            info!(summary = %report.summary(), "reconciliation clean");
        } else {
            warn!(summary = %report.summary(), "reconciliation found discrepancies");
        }
        Ok(report)
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Deposits and interest credits
fn calculate_credits(transactions: &[LedgerTransaction]) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.tx_type.is_credit())
        .map(|tx| tx.amount)
        .sum()
}

fn calculate_debits(transactions: &[LedgerTransaction]) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.tx_type == TxType::Withdrawal)
        .map(|tx| tx.amount)
        .sum()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoanPolicy;
    use crate::db::setup_database;
    use crate::entities::member::create_member;
    use crate::entities::member::tests::sample_member;
    use crate::entities::savings::open_account;
    use crate::interest::accrue_interest;
    use crate::ledger::{deposit, withdraw};
    use crate::loans::{apply_for_loan, approve_loan, post_loan_payment, release_loan, LoanApplication};
    use crate::amortization::InterestMethod;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn account(balance: Decimal) -> SavingsAccount {
        SavingsAccount {
            id: 1,
            account_number: "SA-000001".to_string(),
            member_id: 1,
            balance,
            status: AccountStatus::Active,
            opened_on: date(2025, 1, 1),
            last_activity: date(2025, 1, 3),
            closed_on: None,
        }
    }

    fn tx(tx_type: TxType, amount: Decimal, balance_after: Decimal) -> LedgerTransaction {
        LedgerTransaction {
            id: 0,
            tx_uuid: String::new(),
            account_kind: AccountKind::Savings,
            account_id: 1,
            member_id: 1,
            tx_type,
            amount,
            balance_after,
            tx_date: date(2025, 1, 2),
            reference: "OR".to_string(),
            actor: "test".to_string(),
        }
    }

    #[test]
    fn test_reconciliation_balanced() {
        let engine = ReconciliationEngine::new();
        let txs = vec![
            tx(TxType::Deposit, dec!(2000), dec!(2000)),
            tx(TxType::Withdrawal, dec!(500), dec!(1500)),
            tx(TxType::Interest, dec!(2.50), dec!(1502.50)),
        ];

        let report = engine.reconcile_account(&account(dec!(1502.50)), &txs);

        assert_eq!(report.transaction_count, 3);
        assert_eq!(report.total_credits, dec!(2002.50));
        assert_eq!(report.total_debits, dec!(500));
        assert!(report.is_balanced());
        assert!(report.summary().contains("SA-000001"));
    }

    #[test]
    fn test_reconciliation_minor_and_major() {
        let engine = ReconciliationEngine::new();
        let txs = vec![tx(TxType::Deposit, dec!(2000), dec!(2000))];

        let minor = engine.reconcile_account(&account(dec!(1995)), &txs);
        assert!(matches!(minor.result, ReconciliationResult::MinorDiscrepancy { .. }));
        assert_eq!(minor.result.difference(), dec!(5));
        assert_eq!(minor.discrepancies.len(), 1);
        assert_eq!(minor.discrepancies[0].category, DiscrepancyCategory::BalanceMismatch);

        let major = engine.reconcile_account(&account(dec!(2100)), &txs);
        assert!(matches!(major.result, ReconciliationResult::MajorDiscrepancy { .. }));
        assert_eq!(major.result.difference(), dec!(100));
    }

    #[test]
    fn test_running_balance_break_reported_once() {
        let engine = ReconciliationEngine::new();
        let txs = vec![
            tx(TxType::Deposit, dec!(1000), dec!(1000)),
            tx(TxType::Deposit, dec!(500), dec!(1400)),
            tx(TxType::Withdrawal, dec!(100), dec!(1300)),
        ];

        let report = engine.reconcile_account(&account(dec!(1400)), &txs);

        let breaks: Vec<_> = report
            .discrepancies
            .iter()
            .filter(|d| d.category == DiscrepancyCategory::RunningBalanceBreak)
            .collect();
        assert_eq!(breaks.len(), 1);
        assert_eq!(breaks[0].amount, dec!(100));
        assert!(!report.is_balanced());
    }

    #[test]
    fn test_full_run_on_live_books_is_clean() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let member = create_member(&conn, &sample_member("Ana", "Lopez"), "clerk").unwrap();
        let sa = open_account(&conn, member.id, date(2024, 1, 2), "teller").unwrap();
        deposit(&conn, sa.id, dec!(8000), date(2024, 1, 2), "OR-1", "teller").unwrap();
        withdraw(&conn, sa.id, dec!(750.25), date(2024, 1, 3), "WS-1", "teller").unwrap();

        let loan = apply_for_loan(
            &conn,
            &LoanApplication {
                member_id: member.id,
                principal: dec!(12000),
                annual_rate: dec!(0.10),
                term_months: 6,
                method: InterestMethod::Diminishing,
                purpose: "Tuition".to_string(),
                applied_on: date(2024, 1, 5),
            },
            &LoanPolicy::default(),
            "teller",
        )
        .unwrap();
        approve_loan(&conn, loan.id, "manager").unwrap();
        release_loan(&conn, loan.id, date(2024, 1, 8), "teller").unwrap();
        post_loan_payment(&conn, loan.id, dec!(2150), date(2024, 2, 8), "OR-2", "teller").unwrap();

        let report = ReconciliationEngine::new().reconcile_all(&conn).unwrap();

        assert!(report.is_clean(), "{}", report.summary());
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.loans.len(), 1);
        assert_eq!(report.controls[0].subsidiary_total, dec!(7249.75));
    }

    #[test]
    fn test_out_of_order_postings_keep_books_clean() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let member = create_member(&conn, &sample_member("Ana", "Lopez"), "clerk").unwrap();
        let sa = open_account(&conn, member.id, date(2024, 3, 2), "teller").unwrap();
        deposit(&conn, sa.id, dec!(300), date(2024, 3, 5), "OR-1", "teller").unwrap();

        assert!(deposit(&conn, sa.id, dec!(200), date(2024, 3, 1), "OR-2", "teller").is_err());
        assert!(withdraw(&conn, sa.id, dec!(100), date(2024, 3, 4), "WS-1", "teller").is_err());
        let january = accrue_interest(&conn, date(2024, 1, 15), "system").unwrap();
        assert!(january.posted.is_empty());

        deposit(&conn, sa.id, dec!(12000), date(2024, 3, 20), "OR-3", "teller").unwrap();
        accrue_interest(&conn, date(2024, 3, 1), "system").unwrap();
        deposit(&conn, sa.id, dec!(50), date(2024, 4, 2), "OR-4", "teller").unwrap();

        let report = ReconciliationEngine::new().reconcile_all(&conn).unwrap();

        assert!(report.is_clean(), "{}", report.summary());
        assert_eq!(report.accounts[0].transaction_count, 4);
        assert_eq!(report.controls[0].subsidiary_total, dec!(12370.50));
    }

    #[test]
    fn test_tampered_balance_is_caught() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let member = create_member(&conn, &sample_member("Ana", "Lopez"), "clerk").unwrap();
        let sa = open_account(&conn, member.id, date(2024, 1, 2), "teller").unwrap();
        deposit(&conn, sa.id, dec!(8000), date(2024, 1, 2), "OR-1", "teller").unwrap();

        conn.execute("UPDATE savings_accounts SET balance = '8500' WHERE id = ?1", [sa.id]).unwrap();

        let report = ReconciliationEngine::new().reconcile_all(&conn).unwrap();

        assert!(!report.is_clean());
        assert!(report.journals_balanced());
        assert!(!report.controls[0].matches());
        assert_eq!(report.discrepancies().len(), 1);
    }
}
