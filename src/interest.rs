// 💰 Savings Interest & Dormancy
//
// Interest is credited monthly: balance × annual_rate / 12, only for active
// accounts at or above the minimum balance. One credit per account per month.
//
// Dormancy: an active account with no member-initiated activity for
// `dormancy_months` is flagged dormant. Interest credits do not count as
// activity; a deposit reactivates the account.

use chrono::{Datelike, Months, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::record_event;
use crate::entities::savings::{list_accounts, store_status, AccountStatus, SavingsAccount};
use crate::error::{Error, Result};
use crate::ledger::{last_posting_date, post_interest, AccountKind, LedgerTransaction};
use crate::money::{get_decimal, round_cents, to_sql_text};
use crate::validation::ValidationError;

const MONTHS_PER_YEAR: u32 = 12;

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestSettings {
    pub annual_rate: Decimal,
    pub min_balance_for_interest: Decimal,
    pub maintaining_balance: Decimal,
    pub dormancy_months: u32,
    pub updated_by: String,
    pub updated_at: String,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub annual_rate: Option<Decimal>,
    pub min_balance_for_interest: Option<Decimal>,
    pub maintaining_balance: Option<Decimal>,
    pub dormancy_months: Option<u32>,
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<InterestSettings> {
    Ok(InterestSettings {
        annual_rate: get_decimal(row, 0)?,
        min_balance_for_interest: get_decimal(row, 1)?,
        maintaining_balance: get_decimal(row, 2)?,
        dormancy_months: row.get(3)?,
        updated_by: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn get_interest_settings(conn: &Connection) -> Result<InterestSettings> {
    conn.query_row(
        "SELECT annual_rate, min_balance_for_interest, maintaining_balance,
                dormancy_months, updated_by, updated_at
         FROM interest_settings WHERE id = 1",
        [],
        settings_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("interest settings", 1))
}

pub fn update_interest_settings(
    conn: &Connection,
    update: &SettingsUpdate,
    actor: &str,
) -> Result<InterestSettings> {
    let current = get_interest_settings(conn)?;

    let annual_rate = update.annual_rate.unwrap_or(current.annual_rate);
    let min_balance = update.min_balance_for_interest.unwrap_or(current.min_balance_for_interest);
    let maintaining = update.maintaining_balance.unwrap_or(current.maintaining_balance);
    let dormancy_months = update.dormancy_months.unwrap_or(current.dormancy_months);

    if annual_rate < Decimal::ZERO || annual_rate > Decimal::ONE {
        return Err(Error::InvalidAmount(format!("interest rate {} outside 0..=1", annual_rate)));
    }
    if min_balance < Decimal::ZERO || maintaining < Decimal::ZERO {
        return Err(Error::InvalidAmount("balances must not be negative".to_string()));
    }
    if dormancy_months == 0 {
        return Err(Error::InvalidAmount("dormancy period must be at least one month".to_string()));
    }

    conn.execute(
        "UPDATE interest_settings SET
            annual_rate = ?1, min_balance_for_interest = ?2, maintaining_balance = ?3,
            dormancy_months = ?4, updated_by = ?5, updated_at = ?6
         WHERE id = 1",
        params![
            to_sql_text(annual_rate),
            to_sql_text(min_balance),
            to_sql_text(maintaining),
            dormancy_months,
            actor,
            Utc::now().to_rfc3339(),
        ],
    )?;

    record_event(
        conn,
        "interest_settings_updated",
        "interest_settings",
        1,
        serde_json::json!({
            "before": {
                "annual_rate": current.annual_rate.to_string(),
                "min_balance_for_interest": current.min_balance_for_interest.to_string(),
                "maintaining_balance": current.maintaining_balance.to_string(),
                "dormancy_months": current.dormancy_months,
            },
            "after": {
                "annual_rate": annual_rate.to_string(),
                "min_balance_for_interest": min_balance.to_string(),
                "maintaining_balance": maintaining.to_string(),
                "dormancy_months": dormancy_months,
            },
        }),
        actor,
    )?;

    info!(actor = %actor, rate = %annual_rate, "interest settings updated");
    get_interest_settings(conn)
}

// ============================================================================
// MONTHLY INTEREST
// ============================================================================

/// One month of interest on `balance`; zero below the minimum balance
pub fn monthly_interest(balance: Decimal, settings: &InterestSettings) -> Decimal {
    if balance < settings.min_balance_for_interest || balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_cents(balance * settings.annual_rate / Decimal::from(MONTHS_PER_YEAR))
}

/// Last calendar day of the month containing `date`
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

fn period_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccrualSummary {
    pub period: String,
    pub posted: Vec<LedgerTransaction>,
    pub already_credited: usize,
    pub below_minimum: usize,
    /// Opened after the period closed
    pub not_yet_open: usize,
    /// Already carries postings dated after the period; crediting would break statement order
    pub posted_after_period: usize,
}

impl AccrualSummary {
    pub fn total(&self) -> Decimal {
        self.posted.iter().map(|t| t.amount).sum()
    }
}

fn already_credited(conn: &Connection, account_id: i64, period: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions
         WHERE account_kind = 'savings' AND account_id = ?1
           AND tx_type = 'INTEREST' AND substr(tx_date, 1, 7) = ?2",
        params![account_id, period],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Credit one month of interest to every eligible account, dated month end.
/// Re-running for the same month posts nothing new.
pub fn accrue_interest(conn: &Connection, period: NaiveDate, actor: &str) -> Result<AccrualSummary> {
    accrue_interest_as_of(conn, period, Utc::now().date_naive(), actor)
}

/// `accrue_interest` with an explicit business date; the period must have ended by `today`
pub fn accrue_interest_as_of(
    conn: &Connection,
    period: NaiveDate,
    today: NaiveDate,
    actor: &str,
) -> Result<AccrualSummary> {
    let settings = get_interest_settings(conn)?;
    let posting_date = month_end(period);
    let key = period_key(posting_date);
    let reference = format!("INT-{}", key);

    if posting_date > today {
        warn!(period = %key, today = %today, "interest accrual for an open period refused");
        return Err(Error::Validation(vec![ValidationError::new(
            "interest accrual",
            "period",
            format!("{} does not end until {}", key, posting_date),
        )]));
    }

    let mut summary = AccrualSummary {
        period: key.clone(),
        ..Default::default()
    };

    let tx = conn.unchecked_transaction()?;
    for account in list_accounts(&tx)?.into_iter().filter(SavingsAccount::is_active) {
        if already_credited(&tx, account.id, &key)? {
            summary.already_credited += 1;
            continue;
        }
        if account.opened_on > posting_date {
            summary.not_yet_open += 1;
            continue;
        }
        if let Some(last) = last_posting_date(&tx, AccountKind::Savings, account.id)? {
            if last > posting_date {
                warn!(account = %account.account_number, period = %key, last = %last, "period already closed on this account");
                summary.posted_after_period += 1;
                continue;
            }
        }

        let interest = monthly_interest(account.balance, &settings);
        if interest.is_zero() {
            summary.below_minimum += 1;
            continue;
        }

        debug!(account = %account.account_number, interest = %interest, "crediting interest");
        summary
            .posted
            .push(post_interest(&tx, &account, interest, posting_date, &reference, actor)?);
    }
    tx.commit()?;

    info!(
        period = %summary.period,
        credited = summary.posted.len(),
        total = %summary.total(),
        "interest accrual complete"
    );
    Ok(summary)
}

// ============================================================================
// DORMANCY
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DormantRecord {
    pub id: i64,
    pub account_id: i64,
    pub account_number: String,
    pub member_id: i64,
    pub flagged_on: NaiveDate,
    pub last_activity: NaiveDate,
    pub balance: Decimal,
    pub reactivated_on: Option<NaiveDate>,
}

/// True when `last_activity` is at least `months` before `as_of`
pub fn is_dormant_by(last_activity: NaiveDate, months: u32, as_of: NaiveDate) -> bool {
    match last_activity.checked_add_months(Months::new(months)) {
        Some(threshold) => threshold <= as_of,
        None => false,
    }
}

/// Flag every active account idle for the configured period
pub fn scan_dormant_accounts(conn: &Connection, as_of: NaiveDate, actor: &str) -> Result<Vec<SavingsAccount>> {
    let settings = get_interest_settings(conn)?;
    let mut flagged = Vec::new();

    let tx = conn.unchecked_transaction()?;
    for account in list_accounts(&tx)?.into_iter().filter(SavingsAccount::is_active) {
        if !is_dormant_by(account.last_activity, settings.dormancy_months, as_of) {
            continue;
        }

        store_status(&tx, account.id, AccountStatus::Dormant)?;
        tx.execute(
            "INSERT INTO dormant_accounts (account_id, flagged_on, last_activity, balance)
             VALUES (?1, ?2, ?3, ?4)",
            params![account.id, as_of, account.last_activity, to_sql_text(account.balance)],
        )?;
        record_event(
            &tx,
            "savings_dormant",
            "savings_account",
            account.id,
            serde_json::json!({
                "account_number": account.account_number,
                "last_activity": account.last_activity.to_string(),
            }),
            actor,
        )?;

        flagged.push(SavingsAccount {
            status: AccountStatus::Dormant,
            ..account
        });
    }
    tx.commit()?;

    info!(as_of = %as_of, flagged = flagged.len(), "dormancy scan complete");
    Ok(flagged)
}

/// Close the open dormancy record of an account
pub(crate) fn mark_reactivated(conn: &Connection, account_id: i64, date: NaiveDate) -> Result<()> {
    conn.execute(
        "UPDATE dormant_accounts SET reactivated_on = ?1
         WHERE account_id = ?2 AND reactivated_on IS NULL",
        params![date, account_id],
    )?;
    Ok(())
}

/// Dormancy records, newest first; `open_only` hides reactivated accounts
pub fn list_dormant_accounts(conn: &Connection, open_only: bool) -> Result<Vec<DormantRecord>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.account_id, s.account_number, s.member_id, d.flagged_on,
                d.last_activity, d.balance, d.reactivated_on
         FROM dormant_accounts d
         JOIN savings_accounts s ON s.id = d.account_id
         WHERE (?1 = 0 OR d.reactivated_on IS NULL)
         ORDER BY d.flagged_on DESC, d.id DESC",
    )?;
    let records = stmt
        .query_map([open_only as i64], |row| {
            Ok(DormantRecord {
                id: row.get(0)?,
                account_id: row.get(1)?,
                account_number: row.get(2)?,
                member_id: row.get(3)?,
                flagged_on: row.get(4)?,
                last_activity: row.get(5)?,
                balance: get_decimal(row, 6)?,
                reactivated_on: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}
