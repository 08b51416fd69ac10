// 🏦 Savings Accounts - interest-bearing deposits held by members
//
// The balance column is only ever moved by the ledger module, which writes
// the transaction and journal lines in the same call.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::db::{next_code, record_event};
use crate::entities::member::get_member;
use crate::error::{Error, Result};
use crate::money::{get_decimal, get_parsed, to_sql_text};

// ============================================================================
// ACCOUNT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,

    /// No activity for the configured dormancy period; deposits reactivate
    Dormant,

    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "Active",
            AccountStatus::Dormant => "Dormant",
            AccountStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "dormant" => Ok(AccountStatus::Dormant),
            "closed" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status '{}'", other)),
        }
    }
}

// ============================================================================
// SAVINGS ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsAccount {
    pub id: i64,
    pub account_number: String,
    pub member_id: i64,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub opened_on: NaiveDate,
    pub last_activity: NaiveDate,
    pub closed_on: Option<NaiveDate>,
}

impl SavingsAccount {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Error for postings against a closed account, dormant accounts when `allow_dormant` is false
    pub fn ensure_postable(&self, allow_dormant: bool) -> Result<()> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Dormant if allow_dormant => Ok(()),
            AccountStatus::Dormant => Err(Error::AccountDormant(self.account_number.clone())),
            AccountStatus::Closed => Err(Error::AccountClosed(self.account_number.clone())),
        }
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, account_number, member_id, balance, status, opened_on, last_activity, closed_on";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<SavingsAccount> {
    Ok(SavingsAccount {
        id: row.get(0)?,
        account_number: row.get(1)?,
        member_id: row.get(2)?,
        balance: get_decimal(row, 3)?,
        status: get_parsed(row, 4)?,
        opened_on: row.get(5)?,
        last_activity: row.get(6)?,
        closed_on: row.get(7)?,
    })
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn open_account(conn: &Connection, member_id: i64, opened_on: NaiveDate, actor: &str) -> Result<SavingsAccount> {
    let member = get_member(conn, member_id)?;
    if !member.can_open_account() {
        return Err(Error::MemberInactive(member.member_code));
    }

    let number = next_code(conn, "savings_accounts", "SA")?;
    conn.execute(
        "INSERT INTO savings_accounts (
            account_number, member_id, balance, status, opened_on, last_activity
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            number,
            member_id,
            to_sql_text(Decimal::ZERO),
            AccountStatus::Active.as_str(),
            opened_on,
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(
        conn,
        "savings_opened",
        "savings_account",
        id,
        serde_json::json!({ "account_number": number, "member_code": member.member_code }),
        actor,
    )?;
    info!(account = %number, member_code = %member.member_code, "savings account opened");

    get_account(conn, id)
}

pub fn get_account(conn: &Connection, id: i64) -> Result<SavingsAccount> {
    conn.query_row(
        &format!("SELECT {} FROM savings_accounts WHERE id = ?1", ACCOUNT_COLUMNS),
        [id],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("savings account", id))
}

pub fn find_account_by_number(conn: &Connection, number: &str) -> Result<SavingsAccount> {
    conn.query_row(
        &format!("SELECT {} FROM savings_accounts WHERE account_number = ?1", ACCOUNT_COLUMNS),
        [number.trim().to_uppercase()],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("savings account", number))
}

/// Resolve either a numeric id or an account number ("SA-000003")
pub fn resolve_account(conn: &Connection, key: &str) -> Result<SavingsAccount> {
    match key.trim().parse::<i64>() {
        Ok(id) => get_account(conn, id),
        Err(_) => find_account_by_number(conn, key),
    }
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<SavingsAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM savings_accounts ORDER BY id",
        ACCOUNT_COLUMNS
    ))?;

    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(accounts)
}

pub fn accounts_for_member(conn: &Connection, member_id: i64) -> Result<Vec<SavingsAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM savings_accounts WHERE member_id = ?1 ORDER BY id",
        ACCOUNT_COLUMNS
    ))?;

    let accounts = stmt
        .query_map([member_id], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(accounts)
}

/// Sum of balances over the member's non-closed accounts
pub fn member_total_savings(conn: &Connection, member_id: i64) -> Result<Decimal> {
    Ok(accounts_for_member(conn, member_id)?
        .iter()
        .filter(|a| a.status != AccountStatus::Closed)
        .map(|a| a.balance)
        .sum())
}

/// Ledger-only: store the new balance and activity date
pub(crate) fn store_balance(
    conn: &Connection,
    id: i64,
    balance: Decimal,
    activity: NaiveDate,
) -> Result<()> {
    conn.execute(
        "UPDATE savings_accounts SET balance = ?1, last_activity = MAX(last_activity, ?2) WHERE id = ?3",
        params![to_sql_text(balance), activity, id],
    )?;
    Ok(())
}

pub(crate) fn store_status(conn: &Connection, id: i64, status: AccountStatus) -> Result<()> {
    conn.execute(
        "UPDATE savings_accounts SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(())
}

/// Close an account; the balance must have been withdrawn first
pub fn close_account(conn: &Connection, id: i64, closed_on: NaiveDate, actor: &str) -> Result<SavingsAccount> {
    let account = get_account(conn, id)?;

    if account.status == AccountStatus::Closed {
        return Err(Error::AccountClosed(account.account_number));
    }
    if !account.balance.is_zero() {
        return Err(Error::InvalidTransition {
            entity: format!("account {} with balance {}", account.account_number, account.balance),
            from: account.status.to_string(),
            to: AccountStatus::Closed.to_string(),
        });
    }

    conn.execute(
        "UPDATE savings_accounts SET status = ?1, closed_on = ?2 WHERE id = ?3",
        params![AccountStatus::Closed.as_str(), closed_on, id],
    )?;

    record_event(
        conn,
        "savings_closed",
        "savings_account",
        id,
        serde_json::json!({ "account_number": account.account_number }),
        actor,
    )?;
    info!(account = %account.account_number, "savings account closed");

    get_account(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::member::tests::sample_member;
    use crate::entities::member::{create_member, set_member_status, MemberStatus};
    use rust_decimal_macros::dec;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let member = create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();
        (conn, member.id)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_open_account() {
        let (conn, member_id) = setup();

        let account = open_account(&conn, member_id, date(2024, 2, 1), "teller").unwrap();

        assert_eq!(account.account_number, "SA-000001");
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.last_activity, date(2024, 2, 1));
        assert_eq!(resolve_account(&conn, "sa-000001").unwrap().id, account.id);
    }

    #[test]
    fn test_withdrawn_member_cannot_open_account() {
        let (conn, member_id) = setup();
        set_member_status(&conn, member_id, MemberStatus::Withdrawn, "manager").unwrap();

        let result = open_account(&conn, member_id, date(2024, 2, 1), "teller");
        assert!(matches!(result, Err(Error::MemberInactive(_))));
    }

    #[test]
    fn test_member_total_savings_skips_closed() {
        let (conn, member_id) = setup();
        let a = open_account(&conn, member_id, date(2024, 2, 1), "teller").unwrap();
        let b = open_account(&conn, member_id, date(2024, 2, 1), "teller").unwrap();
        let c = open_account(&conn, member_id, date(2024, 2, 1), "teller").unwrap();

        store_balance(&conn, a.id, dec!(1500.25), date(2024, 2, 2)).unwrap();
        store_balance(&conn, b.id, dec!(499.75), date(2024, 2, 2)).unwrap();
        close_account(&conn, c.id, date(2024, 2, 3), "teller").unwrap();

        assert_eq!(member_total_savings(&conn, member_id).unwrap(), dec!(2000));
        assert_eq!(accounts_for_member(&conn, member_id).unwrap().len(), 3);
    }

    #[test]
    fn test_store_balance_never_moves_activity_backwards() {
        let (conn, member_id) = setup();
        let account = open_account(&conn, member_id, date(2024, 5, 1), "teller").unwrap();

        store_balance(&conn, account.id, dec!(10), date(2024, 4, 1)).unwrap();
        assert_eq!(get_account(&conn, account.id).unwrap().last_activity, date(2024, 5, 1));
    }

    #[test]
    fn test_close_requires_zero_balance() {
        let (conn, member_id) = setup();
        let account = open_account(&conn, member_id, date(2024, 2, 1), "teller").unwrap();
        store_balance(&conn, account.id, dec!(50), date(2024, 2, 2)).unwrap();

        let result = close_account(&conn, account.id, date(2024, 3, 1), "teller");
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        store_balance(&conn, account.id, Decimal::ZERO, date(2024, 2, 3)).unwrap();
        let closed = close_account(&conn, account.id, date(2024, 3, 1), "teller").unwrap();
        assert_eq!(closed.status, AccountStatus::Closed);
        assert_eq!(closed.closed_on, Some(date(2024, 3, 1)));

        assert!(matches!(closed.ensure_postable(true), Err(Error::AccountClosed(_))));
    }

    #[test]
    fn test_ensure_postable_dormant() {
        let (conn, member_id) = setup();
        let account = open_account(&conn, member_id, date(2024, 2, 1), "teller").unwrap();
        store_status(&conn, account.id, AccountStatus::Dormant).unwrap();

        let dormant = get_account(&conn, account.id).unwrap();
        assert!(dormant.ensure_postable(true).is_ok());
        assert!(matches!(dormant.ensure_postable(false), Err(Error::AccountDormant(_))));
    }
}
