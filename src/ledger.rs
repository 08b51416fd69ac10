// 📒 Ledger - account transactions with balanced general-ledger journals
//
// Every posting writes:
//   1 row in `transactions` (what the member sees on the passbook)
//   2+ rows in `journals`   (what the bookkeeper sees; Σ debit = Σ credit)
//   1 audit event

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::record_event;
use crate::entities::savings::{
    close_account, get_account, store_balance, store_status, AccountStatus, SavingsAccount,
};
use crate::error::{Error, Result};
use crate::interest::{get_interest_settings, mark_reactivated};
use crate::money::{get_decimal, get_parsed, round_cents, to_sql_text};
use crate::validation::ValidationError;

// ============================================================================
// GENERAL LEDGER ACCOUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlAccount {
    Cash,
    LoansReceivable,
    SavingsDeposits,
    RlpfFund,
    InterestIncome,
    ServiceFeeIncome,
    InterestExpense,
}

impl GlAccount {
    pub const ALL: [GlAccount; 7] = [
        GlAccount::Cash,
        GlAccount::LoansReceivable,
        GlAccount::SavingsDeposits,
        GlAccount::RlpfFund,
        GlAccount::InterestIncome,
        GlAccount::ServiceFeeIncome,
        GlAccount::InterestExpense,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            GlAccount::Cash => "1010",
            GlAccount::LoansReceivable => "1200",
            GlAccount::SavingsDeposits => "2010",
            GlAccount::RlpfFund => "2200",
            GlAccount::InterestIncome => "4010",
            GlAccount::ServiceFeeIncome => "4020",
            GlAccount::InterestExpense => "5010",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GlAccount::Cash => "Cash on Hand",
            GlAccount::LoansReceivable => "Loans Receivable",
            GlAccount::SavingsDeposits => "Savings Deposits",
            GlAccount::RlpfFund => "Risk Loss Provision Fund",
            GlAccount::InterestIncome => "Interest Income on Loans",
            GlAccount::ServiceFeeIncome => "Service Fee Income",
            GlAccount::InterestExpense => "Interest Expense on Savings",
        }
    }
}

impl fmt::Display for GlAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

impl FromStr for GlAccount {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        GlAccount::ALL
            .iter()
            .copied()
            .find(|a| a.code() == s.trim())
            .ok_or_else(|| format!("unknown GL account '{}'", s))
    }
}

// ============================================================================
// TRANSACTION TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    Savings,
    Loan,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Savings => "savings",
            AccountKind::Loan => "loan",
        }
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "savings" => Ok(AccountKind::Savings),
            "loan" => Ok(AccountKind::Loan),
            other => Err(format!("unknown account kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Deposit,
    Withdrawal,
    Interest,
    LoanRelease,
    LoanPayment,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "DEPOSIT",
            TxType::Withdrawal => "WITHDRAWAL",
            TxType::Interest => "INTEREST",
            TxType::LoanRelease => "LOAN_RELEASE",
            TxType::LoanPayment => "LOAN_PAYMENT",
        }
    }

    /// Credits increase what the member holds (or owes, for loan releases)
    pub fn is_credit(&self) -> bool {
        matches!(self, TxType::Deposit | TxType::Interest)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(TxType::Deposit),
            "WITHDRAWAL" => Ok(TxType::Withdrawal),
            "INTEREST" => Ok(TxType::Interest),
            "LOAN_RELEASE" => Ok(TxType::LoanRelease),
            "LOAN_PAYMENT" => Ok(TxType::LoanPayment),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: i64,
    pub tx_uuid: String,
    pub account_kind: AccountKind,
    pub account_id: i64,
    pub member_id: i64,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub tx_date: NaiveDate,
    pub reference: String,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub gl_account: GlAccount,
    pub debit: Decimal,
    pub credit: Decimal,
    pub memo: String,
}

impl JournalLine {
    pub fn debit(account: GlAccount, amount: Decimal, memo: &str) -> Self {
        JournalLine {
            gl_account: account,
            debit: amount,
            credit: Decimal::ZERO,
            memo: memo.to_string(),
        }
    }

    pub fn credit(account: GlAccount, amount: Decimal, memo: &str) -> Self {
        JournalLine {
            gl_account: account,
            debit: Decimal::ZERO,
            credit: amount,
            memo: memo.to_string(),
        }
    }
}

/// Everything needed to write one posting
pub(crate) struct Posting<'a> {
    pub account_kind: AccountKind,
    pub account_id: i64,
    pub member_id: i64,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub tx_date: NaiveDate,
    pub reference: &'a str,
    pub actor: &'a str,
    pub lines: Vec<JournalLine>,
}

const TX_COLUMNS: &str = "id, tx_uuid, account_kind, account_id, member_id, tx_type, amount,
    balance_after, tx_date, reference, actor";

fn tx_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    Ok(LedgerTransaction {
        id: row.get(0)?,
        tx_uuid: row.get(1)?,
        account_kind: get_parsed(row, 2)?,
        account_id: row.get(3)?,
        member_id: row.get(4)?,
        tx_type: get_parsed(row, 5)?,
        amount: get_decimal(row, 6)?,
        balance_after: get_decimal(row, 7)?,
        tx_date: row.get(8)?,
        reference: row.get(9)?,
        actor: row.get(10)?,
    })
}

/// Write transaction + journals + event; journals must balance
pub(crate) fn post(conn: &Connection, posting: Posting<'_>) -> Result<LedgerTransaction> {
    let debits: Decimal = posting.lines.iter().map(|l| l.debit).sum();
    let credits: Decimal = posting.lines.iter().map(|l| l.credit).sum();
    if posting.lines.len() < 2 || debits != credits {
        return Err(Error::InvalidAmount(format!(
            "unbalanced journal for {}: debits {} credits {}",
            posting.tx_type, debits, credits
        )));
    }

    let tx_uuid = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO transactions (
            tx_uuid, account_kind, account_id, member_id, tx_type, amount,
            balance_after, tx_date, reference, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            tx_uuid,
            posting.account_kind.as_str(),
            posting.account_id,
            posting.member_id,
            posting.tx_type.as_str(),
            to_sql_text(posting.amount),
            to_sql_text(posting.balance_after),
            posting.tx_date,
            posting.reference,
            posting.actor,
        ],
    )?;
    let tx_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT INTO journals (tx_id, entry_date, gl_account, debit, credit, memo)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for line in posting.lines.iter().filter(|l| !(l.debit.is_zero() && l.credit.is_zero())) {
        stmt.execute(params![
            tx_id,
            posting.tx_date,
            line.gl_account.code(),
            to_sql_text(line.debit),
            to_sql_text(line.credit),
            line.memo,
        ])?;
    }

    record_event(
        conn,
        "transaction_posted",
        posting.account_kind.as_str(),
        posting.account_id,
        serde_json::json!({
            "tx_uuid": tx_uuid,
            "tx_type": posting.tx_type.as_str(),
            "amount": posting.amount.to_string(),
            "reference": posting.reference,
        }),
        posting.actor,
    )?;

    Ok(LedgerTransaction {
        id: tx_id,
        tx_uuid,
        account_kind: posting.account_kind,
        account_id: posting.account_id,
        member_id: posting.member_id,
        tx_type: posting.tx_type,
        amount: posting.amount,
        balance_after: posting.balance_after,
        tx_date: posting.tx_date,
        reference: posting.reference.to_string(),
        actor: posting.actor.to_string(),
    })
}

/// Latest `tx_date` booked against an account, if any
pub fn last_posting_date(conn: &Connection, kind: AccountKind, account_id: i64) -> Result<Option<NaiveDate>> {
    let last = conn.query_row(
        "SELECT MAX(tx_date) FROM transactions WHERE account_kind = ?1 AND account_id = ?2",
        params![kind.as_str(), account_id],
        |row| row.get::<_, Option<NaiveDate>>(0),
    )?;
    Ok(last)
}

/// Statements replay in date order, so a posting may not predate the account's
/// start or its latest entry
pub(crate) fn ensure_in_sequence(
    conn: &Connection,
    kind: AccountKind,
    account_id: i64,
    label: &str,
    starts_on: NaiveDate,
    date: NaiveDate,
) -> Result<()> {
    let mut errors = Vec::new();

    if date < starts_on {
        errors.push(ValidationError::new(
            label,
            "tx_date",
            format!("{} is before the account started on {}", date, starts_on),
        ));
    }
    if let Some(last) = last_posting_date(conn, kind, account_id)? {
        if date < last {
            errors.push(ValidationError::new(
                label,
                "tx_date",
                format!("{} is before the latest posting on {}", date, last),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        warn!(account = %label, date = %date, "back-dated posting refused");
        Err(Error::Validation(errors))
    }
}

fn ensure_positive(amount: Decimal) -> Result<Decimal> {
    let amount = round_cents(amount);
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!("{} must be greater than zero", amount)));
    }
    Ok(amount)
}

// ============================================================================
// SAVINGS POSTINGS
// ============================================================================

/// Cash deposit; a dormant account becomes active again
pub fn deposit(
    conn: &Connection,
    account_id: i64,
    amount: Decimal,
    date: NaiveDate,
    reference: &str,
    actor: &str,
) -> Result<LedgerTransaction> {
    let amount = ensure_positive(amount)?;
    let account = get_account(conn, account_id)?;
    account.ensure_postable(true)?;
    ensure_in_sequence(conn, AccountKind::Savings, account.id, &account.account_number, account.opened_on, date)?;

    let tx = conn.unchecked_transaction()?;

    if account.status == AccountStatus::Dormant {
        store_status(&tx, account.id, AccountStatus::Active)?;
        mark_reactivated(&tx, account.id, date)?;
        info!(account = %account.account_number, "dormant account reactivated by deposit");
    }

    let balance_after = account.balance + amount;
    store_balance(&tx, account.id, balance_after, date)?;

    let posted = post(
        &tx,
        Posting {
            account_kind: AccountKind::Savings,
            account_id: account.id,
            member_id: account.member_id,
            tx_type: TxType::Deposit,
            amount,
            balance_after,
            tx_date: date,
            reference,
            actor,
            lines: vec![
                JournalLine::debit(GlAccount::Cash, amount, "cash deposit"),
                JournalLine::credit(GlAccount::SavingsDeposits, amount, &account.account_number),
            ],
        },
    )?;

    tx.commit()?;
    info!(account = %account.account_number, amount = %amount, balance = %balance_after, "deposit posted");
    Ok(posted)
}

/// Cash withdrawal; must leave the maintaining balance behind
pub fn withdraw(
    conn: &Connection,
    account_id: i64,
    amount: Decimal,
    date: NaiveDate,
    reference: &str,
    actor: &str,
) -> Result<LedgerTransaction> {
    let amount = ensure_positive(amount)?;
    let account = get_account(conn, account_id)?;
    account.ensure_postable(false)?;
    ensure_in_sequence(conn, AccountKind::Savings, account.id, &account.account_number, account.opened_on, date)?;

    let settings = get_interest_settings(conn)?;
    if account.balance - amount < settings.maintaining_balance {
        warn!(account = %account.account_number, amount = %amount, balance = %account.balance, "withdrawal refused");
        return Err(Error::InsufficientFunds {
            account: account.account_number,
            balance: account.balance,
            requested: amount,
            maintaining: settings.maintaining_balance,
        });
    }

    let tx = conn.unchecked_transaction()?;
    let posted = post_withdrawal(&tx, &account, amount, date, reference, actor)?;
    tx.commit()?;

    info!(account = %account.account_number, amount = %amount, balance = %posted.balance_after, "withdrawal posted");
    Ok(posted)
}

fn post_withdrawal(
    conn: &Connection,
    account: &SavingsAccount,
    amount: Decimal,
    date: NaiveDate,
    reference: &str,
    actor: &str,
) -> Result<LedgerTransaction> {
    let balance_after = account.balance - amount;
    store_balance(conn, account.id, balance_after, date)?;

    post(
        conn,
        Posting {
            account_kind: AccountKind::Savings,
            account_id: account.id,
            member_id: account.member_id,
            tx_type: TxType::Withdrawal,
            amount,
            balance_after,
            tx_date: date,
            reference,
            actor,
            lines: vec![
                JournalLine::debit(GlAccount::SavingsDeposits, amount, &account.account_number),
                JournalLine::credit(GlAccount::Cash, amount, "cash withdrawal"),
            ],
        },
    )
}

/// Pay out the whole balance (ignoring the maintaining balance) and close the account
pub fn close_out_account(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    actor: &str,
) -> Result<(Option<LedgerTransaction>, SavingsAccount)> {
    let account = get_account(conn, account_id)?;
    if account.status == AccountStatus::Closed {
        return Err(Error::AccountClosed(account.account_number));
    }
    ensure_in_sequence(conn, AccountKind::Savings, account.id, &account.account_number, account.opened_on, date)?;

    let tx = conn.unchecked_transaction()?;
    let payout = if account.balance > Decimal::ZERO {
        Some(post_withdrawal(&tx, &account, account.balance, date, "account closure", actor)?)
    } else {
        None
    };
    let closed = close_account(&tx, account.id, date, actor)?;
    tx.commit()?;

    Ok((payout, closed))
}

/// Credit savings interest (caller owns the surrounding SQL transaction)
pub(crate) fn post_interest(
    conn: &Connection,
    account: &SavingsAccount,
    interest: Decimal,
    date: NaiveDate,
    reference: &str,
    actor: &str,
) -> Result<LedgerTransaction> {
    let balance_after = account.balance + interest;
    store_balance(conn, account.id, balance_after, account.last_activity)?;

    post(
        conn,
        Posting {
            account_kind: AccountKind::Savings,
            account_id: account.id,
            member_id: account.member_id,
            tx_type: TxType::Interest,
            amount: interest,
            balance_after,
            tx_date: date,
            reference,
            actor,
            lines: vec![
                JournalLine::debit(GlAccount::InterestExpense, interest, reference),
                JournalLine::credit(GlAccount::SavingsDeposits, interest, &account.account_number),
            ],
        },
    )
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn account_transactions(conn: &Connection, kind: AccountKind, account_id: i64) -> Result<Vec<LedgerTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE account_kind = ?1 AND account_id = ?2 ORDER BY tx_date, id",
        TX_COLUMNS
    ))?;
    let txs = stmt
        .query_map(params![kind.as_str(), account_id], tx_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(txs)
}

pub fn member_transactions(conn: &Connection, member_id: i64) -> Result<Vec<LedgerTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE member_id = ?1 ORDER BY tx_date, id",
        TX_COLUMNS
    ))?;
    let txs = stmt
        .query_map([member_id], tx_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(txs)
}

/// Newest first, for the ledger screen
pub fn all_transactions(conn: &Connection) -> Result<Vec<LedgerTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions ORDER BY tx_date DESC, id DESC",
        TX_COLUMNS
    ))?;
    let txs = stmt
        .query_map([], tx_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(txs)
}

pub fn journal_lines(conn: &Connection, tx_id: i64) -> Result<Vec<JournalLine>> {
    let mut stmt = conn.prepare(
        "SELECT gl_account, debit, credit, memo FROM journals WHERE tx_id = ?1 ORDER BY id",
    )?;
    let lines = stmt
        .query_map([tx_id], |row| {
            Ok(JournalLine {
                gl_account: get_parsed(row, 0)?,
                debit: get_decimal(row, 1)?,
                credit: get_decimal(row, 2)?,
                memo: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(lines)
}

// ============================================================================
// TRIAL BALANCE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TrialBalanceLine {
    pub account: GlAccount,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl TrialBalanceLine {
    /// Debit-normal net (assets/expenses positive)
    pub fn net(&self) -> Decimal {
        self.debit - self.credit
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialBalance {
    pub lines: Vec<TrialBalanceLine>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }

    pub fn line(&self, account: GlAccount) -> Option<&TrialBalanceLine> {
        self.lines.iter().find(|l| l.account == account)
    }
}

pub fn trial_balance(conn: &Connection) -> Result<TrialBalance> {
    let mut stmt = conn.prepare("SELECT gl_account, debit, credit FROM journals")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                get_parsed::<GlAccount>(row, 0)?,
                get_decimal(row, 1)?,
                get_decimal(row, 2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut totals: BTreeMap<GlAccount, (Decimal, Decimal)> = BTreeMap::new();
    for (account, debit, credit) in rows {
        let entry = totals.entry(account).or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += debit;
        entry.1 += credit;
    }

    let lines: Vec<TrialBalanceLine> = totals
        .into_iter()
        .map(|(account, (debit, credit))| TrialBalanceLine { account, debit, credit })
        .collect();

    Ok(TrialBalance {
        total_debit: lines.iter().map(|l| l.debit).sum(),
        total_credit: lines.iter().map(|l| l.credit).sum(),
        lines,
    })
}
