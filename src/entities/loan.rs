// 📄 Loan Entity - origination record plus its persisted amortization schedule
//
// Status machine:
//   Pending → Approved → Released → Paid
//   Pending → Rejected

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::amortization::{AmortizationRow, InterestMethod, LoanTerms};
use crate::error::{Error, Result};
use crate::money::{get_decimal, get_parsed, to_sql_text};

// ============================================================================
// LOAN STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Pending,
    Approved,
    Released,
    Paid,
    Rejected,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "Pending",
            LoanStatus::Approved => "Approved",
            LoanStatus::Released => "Released",
            LoanStatus::Paid => "Paid",
            LoanStatus::Rejected => "Rejected",
        }
    }

    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Pending, LoanStatus::Approved)
                | (LoanStatus::Pending, LoanStatus::Rejected)
                | (LoanStatus::Approved, LoanStatus::Released)
                | (LoanStatus::Released, LoanStatus::Paid)
        )
    }

    /// Released loans still carry a receivable
    pub fn is_open(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved | LoanStatus::Released)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "released" => Ok(LoanStatus::Released),
            "paid" => Ok(LoanStatus::Paid),
            "rejected" => Ok(LoanStatus::Rejected),
            other => Err(format!("unknown loan status '{}'", other)),
        }
    }
}

// ============================================================================
// LOAN ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    pub loan_number: String,
    pub member_id: i64,
    pub principal: Decimal,
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub interest_method: InterestMethod,
    pub rlpf: Decimal,
    pub service_charge: Decimal,
    pub net_proceeds: Decimal,
    pub outstanding_principal: Decimal,
    pub status: LoanStatus,
    pub purpose: String,
    pub applied_on: NaiveDate,
    pub approved_by: Option<String>,
    pub released_on: Option<NaiveDate>,
}

impl Loan {
    /// Terms for schedule computation starting at `start_date`
    pub fn terms(&self, start_date: NaiveDate) -> LoanTerms {
        LoanTerms {
            principal: self.principal,
            annual_rate: self.annual_rate,
            term_months: self.term_months,
            method: self.interest_method,
            start_date,
        }
    }

    pub fn ensure_transition(&self, next: LoanStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                entity: format!("loan {}", self.loan_number),
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// One persisted amortization row with what has been paid against it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installment {
    pub loan_id: i64,
    pub installment: u32,
    pub due_date: NaiveDate,
    pub principal: Decimal,
    pub interest: Decimal,
    pub amount_due: Decimal,
    pub principal_paid: Decimal,
    pub interest_paid: Decimal,
    pub balance_after: Decimal,
}

impl Installment {
    pub fn principal_remaining(&self) -> Decimal {
        self.principal - self.principal_paid
    }

    pub fn interest_remaining(&self) -> Decimal {
        self.interest - self.interest_paid
    }

    pub fn remaining(&self) -> Decimal {
        self.principal_remaining() + self.interest_remaining()
    }

    pub fn is_settled(&self) -> bool {
        self.remaining() <= Decimal::ZERO
    }

    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        !self.is_settled() && self.due_date < as_of
    }
}

const LOAN_COLUMNS: &str = "id, loan_number, member_id, principal, annual_rate, term_months,
    interest_method, rlpf, service_charge, net_proceeds, outstanding_principal, status,
    purpose, applied_on, approved_by, released_on";

fn loan_from_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: row.get(0)?,
        loan_number: row.get(1)?,
        member_id: row.get(2)?,
        principal: get_decimal(row, 3)?,
        annual_rate: get_decimal(row, 4)?,
        term_months: row.get(5)?,
        interest_method: get_parsed(row, 6)?,
        rlpf: get_decimal(row, 7)?,
        service_charge: get_decimal(row, 8)?,
        net_proceeds: get_decimal(row, 9)?,
        outstanding_principal: get_decimal(row, 10)?,
        status: get_parsed(row, 11)?,
        purpose: row.get(12)?,
        applied_on: row.get(13)?,
        approved_by: row.get(14)?,
        released_on: row.get(15)?,
    })
}

fn installment_from_row(row: &Row<'_>) -> rusqlite::Result<Installment> {
    Ok(Installment {
        loan_id: row.get(0)?,
        installment: row.get(1)?,
        due_date: row.get(2)?,
        principal: get_decimal(row, 3)?,
        interest: get_decimal(row, 4)?,
        amount_due: get_decimal(row, 5)?,
        principal_paid: get_decimal(row, 6)?,
        interest_paid: get_decimal(row, 7)?,
        balance_after: get_decimal(row, 8)?,
    })
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// Insert a new loan row; the caller has computed deductions already
pub(crate) fn insert_loan(conn: &Connection, loan: &Loan) -> Result<i64> {
    conn.execute(
        "INSERT INTO loans (
            loan_number, member_id, principal, annual_rate, term_months, interest_method,
            rlpf, service_charge, net_proceeds, outstanding_principal, status, purpose,
            applied_on, approved_by, released_on
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            loan.loan_number,
            loan.member_id,
            to_sql_text(loan.principal),
            to_sql_text(loan.annual_rate),
            loan.term_months,
            loan.interest_method.as_str(),
            to_sql_text(loan.rlpf),
            to_sql_text(loan.service_charge),
            to_sql_text(loan.net_proceeds),
            to_sql_text(loan.outstanding_principal),
            loan.status.as_str(),
            loan.purpose,
            loan.applied_on,
            loan.approved_by,
            loan.released_on,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_loan(conn: &Connection, id: i64) -> Result<Loan> {
    conn.query_row(
        &format!("SELECT {} FROM loans WHERE id = ?1", LOAN_COLUMNS),
        [id],
        loan_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("loan", id))
}

pub fn find_loan_by_number(conn: &Connection, number: &str) -> Result<Loan> {
    conn.query_row(
        &format!("SELECT {} FROM loans WHERE loan_number = ?1", LOAN_COLUMNS),
        [number.trim().to_uppercase()],
        loan_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("loan", number))
}

/// Resolve either a numeric id or a loan number ("LN-000004")
pub fn resolve_loan(conn: &Connection, key: &str) -> Result<Loan> {
    match key.trim().parse::<i64>() {
        Ok(id) => get_loan(conn, id),
        Err(_) => find_loan_by_number(conn, key),
    }
}

pub fn list_loans(conn: &Connection) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM loans ORDER BY id", LOAN_COLUMNS))?;
    let loans = stmt
        .query_map([], loan_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(loans)
}

pub fn loans_for_member(conn: &Connection, member_id: i64) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM loans WHERE member_id = ?1 ORDER BY id",
        LOAN_COLUMNS
    ))?;
    let loans = stmt
        .query_map([member_id], loan_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(loans)
}

pub fn loans_by_status(conn: &Connection, status: LoanStatus) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM loans WHERE status = ?1 ORDER BY id",
        LOAN_COLUMNS
    ))?;
    let loans = stmt
        .query_map([status.as_str()], loan_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(loans)
}

pub(crate) fn store_status(
    conn: &Connection,
    id: i64,
    status: LoanStatus,
    approved_by: Option<&str>,
    released_on: Option<NaiveDate>,
) -> Result<()> {
    conn.execute(
        "UPDATE loans SET status = ?1,
            approved_by = COALESCE(?2, approved_by),
            released_on = COALESCE(?3, released_on)
         WHERE id = ?4",
        params![status.as_str(), approved_by, released_on, id],
    )?;
    Ok(())
}

pub(crate) fn store_outstanding(conn: &Connection, id: i64, outstanding: Decimal) -> Result<()> {
    conn.execute(
        "UPDATE loans SET outstanding_principal = ?1 WHERE id = ?2",
        params![to_sql_text(outstanding), id],
    )?;
    Ok(())
}

/// Replace the schedule of a loan (used at application and re-dated at release)
pub(crate) fn replace_schedule(conn: &Connection, loan_id: i64, rows: &[AmortizationRow]) -> Result<()> {
    conn.execute("DELETE FROM loan_amortization WHERE loan_id = ?1", [loan_id])?;

    let mut stmt = conn.prepare(
        "INSERT INTO loan_amortization (
            loan_id, installment, due_date, principal, interest, amount_due, balance_after
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for row in rows {
        stmt.execute(params![
            loan_id,
            row.installment,
            row.due_date,
            to_sql_text(row.principal),
            to_sql_text(row.interest),
            to_sql_text(row.amount_due),
            to_sql_text(row.balance_after),
        ])?;
    }

    Ok(())
}

pub fn get_schedule(conn: &Connection, loan_id: i64) -> Result<Vec<Installment>> {
    let mut stmt = conn.prepare(
        "SELECT loan_id, installment, due_date, principal, interest, amount_due,
                principal_paid, interest_paid, balance_after
         FROM loan_amortization
         WHERE loan_id = ?1
         ORDER BY installment",
    )?;
    let rows = stmt
        .query_map([loan_id], installment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn store_installment_payment(conn: &Connection, item: &Installment) -> Result<()> {
    conn.execute(
        "UPDATE loan_amortization SET principal_paid = ?1, interest_paid = ?2
         WHERE loan_id = ?3 AND installment = ?4",
        params![
            to_sql_text(item.principal_paid),
            to_sql_text(item.interest_paid),
            item.loan_id,
            item.installment,
        ],
    )?;
    Ok(())
}
