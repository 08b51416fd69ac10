// 🤝 Loan Processing - application, approval, release and repayment
//
// Application computes deductions and a provisional schedule; release
// re-dates the schedule from the release day and books the receivable.
// Payments settle installments in order, interest before principal.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::amortization::{compute_schedule, deductions, InterestMethod};
use crate::config::LoanPolicy;
use crate::db::{next_code, record_event};
use crate::entities::loan::{
    get_loan, get_schedule, insert_loan, loans_for_member, replace_schedule, store_installment_payment,
    store_outstanding, store_status, Installment, Loan, LoanStatus,
};
use crate::entities::member::get_member;
use crate::entities::savings::member_total_savings;
use crate::error::{Error, Result};
use crate::ledger::{ensure_in_sequence, post, AccountKind, GlAccount, JournalLine, LedgerTransaction, Posting, TxType};
use crate::money::round_cents;
use crate::validation::validate_loan_application;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub member_id: i64,
    pub principal: Decimal,
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub method: InterestMethod,
    pub purpose: String,
    pub applied_on: NaiveDate,
}

// ============================================================================
// ORIGINATION
// ============================================================================

/// Principal already committed to the member: unreleased applications in
/// full, released loans at their outstanding principal
pub fn loan_exposure(conn: &Connection, member_id: i64) -> Result<Decimal> {
    Ok(loans_for_member(conn, member_id)?
        .iter()
        .map(|loan| match loan.status {
            LoanStatus::Pending | LoanStatus::Approved => loan.principal,
            LoanStatus::Released => loan.outstanding_principal,
            LoanStatus::Paid | LoanStatus::Rejected => Decimal::ZERO,
        })
        .sum())
}

/// How much more the member may borrow; `None` when the savings ratio is disabled
pub fn borrowing_capacity(conn: &Connection, member_id: i64, policy: &LoanPolicy) -> Result<Option<Decimal>> {
    if policy.max_loan_to_savings_ratio.is_zero() {
        return Ok(None);
    }
    let ceiling = round_cents(member_total_savings(conn, member_id)? * policy.max_loan_to_savings_ratio);
    let capacity = ceiling - loan_exposure(conn, member_id)?;
    Ok(Some(capacity.max(Decimal::ZERO)))
}

pub fn apply_for_loan(
    conn: &Connection,
    app: &LoanApplication,
    policy: &LoanPolicy,
    actor: &str,
) -> Result<Loan> {
    validate_loan_application(app, policy).map_err(Error::Validation)?;

    let member = get_member(conn, app.member_id)?;
    if !member.can_borrow() {
        return Err(Error::MemberInactive(member.member_code));
    }

    let principal = round_cents(app.principal);
    if let Some(allowed) = borrowing_capacity(conn, member.id, policy)? {
        if principal > allowed {
            warn!(member = %member.member_code, requested = %principal, allowed = %allowed, "loan limit exceeded");
            return Err(Error::LoanLimitExceeded {
                requested: principal,
                allowed,
            });
        }
    }

    let fees = deductions(principal, app.term_months, policy.rlpf_rate, policy.service_charge_rate)?;

    let mut loan = Loan {
        id: 0,
        loan_number: next_code(conn, "loans", "LN")?,
        member_id: member.id,
        principal,
        annual_rate: app.annual_rate,
        term_months: app.term_months,
        interest_method: app.method,
        rlpf: fees.rlpf,
        service_charge: fees.service_charge,
        net_proceeds: fees.net_proceeds,
        outstanding_principal: Decimal::ZERO,
        status: LoanStatus::Pending,
        purpose: app.purpose.trim().to_string(),
        applied_on: app.applied_on,
        approved_by: None,
        released_on: None,
    };
    let schedule = compute_schedule(&loan.terms(app.applied_on))?;

    let tx = conn.unchecked_transaction()?;
    loan.id = insert_loan(&tx, &loan)?;
    replace_schedule(&tx, loan.id, &schedule.rows)?;
    record_event(
        &tx,
        "loan_applied",
        "loan",
        loan.id,
        serde_json::json!({
            "loan_number": loan.loan_number,
            "member": member.member_code,
            "principal": principal.to_string(),
            "method": loan.interest_method.as_str(),
            "term_months": loan.term_months,
        }),
        actor,
    )?;
    tx.commit()?;

    info!(loan = %loan.loan_number, member = %member.member_code, principal = %principal, "loan application recorded");
    Ok(loan)
}

pub fn approve_loan(conn: &Connection, loan_id: i64, approver: &str) -> Result<Loan> {
    let loan = get_loan(conn, loan_id)?;
    loan.ensure_transition(LoanStatus::Approved)?;

    store_status(conn, loan.id, LoanStatus::Approved, Some(approver), None)?;
    record_event(
        conn,
        "loan_approved",
        "loan",
        loan.id,
        serde_json::json!({ "loan_number": loan.loan_number }),
        approver,
    )?;

    info!(loan = %loan.loan_number, approver = %approver, "loan approved");
    get_loan(conn, loan.id)
}

pub fn reject_loan(conn: &Connection, loan_id: i64, reason: &str, actor: &str) -> Result<Loan> {
    let loan = get_loan(conn, loan_id)?;
    loan.ensure_transition(LoanStatus::Rejected)?;

    store_status(conn, loan.id, LoanStatus::Rejected, None, None)?;
    record_event(
        conn,
        "loan_rejected",
        "loan",
        loan.id,
        serde_json::json!({ "loan_number": loan.loan_number, "reason": reason }),
        actor,
    )?;

    info!(loan = %loan.loan_number, "loan rejected");
    get_loan(conn, loan.id)
}

/// Disburse net proceeds; the receivable is booked at full principal
pub fn release_loan(
    conn: &Connection,
    loan_id: i64,
    release_date: NaiveDate,
    actor: &str,
) -> Result<(Loan, LedgerTransaction)> {
    let loan = get_loan(conn, loan_id)?;
    loan.ensure_transition(LoanStatus::Released)?;
    ensure_in_sequence(conn, AccountKind::Loan, loan.id, &loan.loan_number, loan.applied_on, release_date)?;
    let schedule = compute_schedule(&loan.terms(release_date))?;

    let tx = conn.unchecked_transaction()?;
    replace_schedule(&tx, loan.id, &schedule.rows)?;
    store_status(&tx, loan.id, LoanStatus::Released, None, Some(release_date))?;
    store_outstanding(&tx, loan.id, loan.principal)?;

    let posted = post(
        &tx,
        Posting {
            account_kind: AccountKind::Loan,
            account_id: loan.id,
            member_id: loan.member_id,
            tx_type: TxType::LoanRelease,
            amount: loan.principal,
            balance_after: loan.principal,
            tx_date: release_date,
            reference: &loan.loan_number,
            actor,
            lines: vec![
                JournalLine::debit(GlAccount::LoansReceivable, loan.principal, &loan.loan_number),
                JournalLine::credit(GlAccount::Cash, loan.net_proceeds, "net proceeds"),
                JournalLine::credit(GlAccount::RlpfFund, loan.rlpf, "RLPF"),
                JournalLine::credit(GlAccount::ServiceFeeIncome, loan.service_charge, "service charge"),
            ],
        },
    )?;
    tx.commit()?;

    info!(loan = %loan.loan_number, net = %loan.net_proceeds, "loan released");
    Ok((get_loan(conn, loan.id)?, posted))
}

// ============================================================================
// REPAYMENT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub loan: Loan,
    pub transaction: LedgerTransaction,
    pub principal_applied: Decimal,
    pub interest_applied: Decimal,
}

/// Spread `amount` over unpaid installments, oldest first, interest before principal.
/// Returns the touched installments and the (principal, interest) split.
pub fn allocate_payment(schedule: &[Installment], amount: Decimal) -> (Vec<Installment>, Decimal, Decimal) {
    let mut left = amount;
    let mut touched = Vec::new();
    let mut principal_applied = Decimal::ZERO;
    let mut interest_applied = Decimal::ZERO;

    for item in schedule.iter().filter(|i| !i.is_settled()) {
        if left <= Decimal::ZERO {
            break;
        }
        let mut updated = item.clone();

        let interest = item.interest_remaining().min(left);
        updated.interest_paid += interest;
        left -= interest;

        let principal = item.principal_remaining().min(left);
        updated.principal_paid += principal;
        left -= principal;

        interest_applied += interest;
        principal_applied += principal;
        touched.push(updated);
    }

    (touched, principal_applied, interest_applied)
}

pub fn post_loan_payment(
    conn: &Connection,
    loan_id: i64,
    amount: Decimal,
    date: NaiveDate,
    reference: &str,
    actor: &str,
) -> Result<PaymentReceipt> {
    let amount = round_cents(amount);
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!("{} must be greater than zero", amount)));
    }

    let loan = get_loan(conn, loan_id)?;
    if loan.status != LoanStatus::Released {
        return Err(Error::InvalidTransition {
            entity: format!("loan {}", loan.loan_number),
            from: loan.status.to_string(),
            to: "payment".to_string(),
        });
    }
    let released_on = loan.released_on.unwrap_or(loan.applied_on);
    ensure_in_sequence(conn, AccountKind::Loan, loan.id, &loan.loan_number, released_on, date)?;

    let schedule = get_schedule(conn, loan.id)?;
    let remaining: Decimal = schedule.iter().map(Installment::remaining).sum();
    if amount > remaining {
        return Err(Error::Overpayment {
            paid: amount,
            remaining,
        });
    }

    let (touched, principal_applied, interest_applied) = allocate_payment(&schedule, amount);
    let outstanding = loan.outstanding_principal - principal_applied;
    let fully_paid = amount == remaining;

    let tx = conn.unchecked_transaction()?;
    for item in &touched {
        store_installment_payment(&tx, item)?;
    }
    store_outstanding(&tx, loan.id, outstanding)?;
    if fully_paid {
        store_status(&tx, loan.id, LoanStatus::Paid, None, None)?;
    }

    let posted = post(
        &tx,
        Posting {
            account_kind: AccountKind::Loan,
            account_id: loan.id,
            member_id: loan.member_id,
            tx_type: TxType::LoanPayment,
            amount,
            balance_after: outstanding,
            tx_date: date,
            reference,
            actor,
            lines: vec![
                JournalLine::debit(GlAccount::Cash, amount, reference),
                JournalLine::credit(GlAccount::LoansReceivable, principal_applied, &loan.loan_number),
                JournalLine::credit(GlAccount::InterestIncome, interest_applied, &loan.loan_number),
            ],
        },
    )?;
    tx.commit()?;

    info!(
        loan = %loan.loan_number,
        amount = %amount,
        principal = %principal_applied,
        interest = %interest_applied,
        paid_off = fully_paid,
        "loan payment posted"
    );

    Ok(PaymentReceipt {
        loan: get_loan(conn, loan.id)?,
        transaction: posted,
        principal_applied,
        interest_applied,
    })
}

// ============================================================================
// BALANCE SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoanBalance {
    pub loan_number: String,
    pub status: LoanStatus,
    pub outstanding_principal: Decimal,
    pub unpaid_interest: Decimal,
    pub next_due: Option<Installment>,
    pub overdue_installments: usize,
    pub overdue_amount: Decimal,
}

impl LoanBalance {
    pub fn total_remaining(&self) -> Decimal {
        self.outstanding_principal + self.unpaid_interest
    }
}

pub fn loan_balance(conn: &Connection, loan_id: i64, as_of: NaiveDate) -> Result<LoanBalance> {
    let loan = get_loan(conn, loan_id)?;
    let schedule = get_schedule(conn, loan.id)?;

    let overdue: Vec<&Installment> = schedule.iter().filter(|i| i.is_overdue(as_of)).collect();

    Ok(LoanBalance {
        loan_number: loan.loan_number,
        status: loan.status,
        outstanding_principal: loan.outstanding_principal,
        unpaid_interest: schedule.iter().map(Installment::interest_remaining).sum(),
        next_due: schedule.iter().find(|i| !i.is_settled()).cloned(),
        overdue_installments: overdue.len(),
        overdue_amount: overdue.iter().map(|i| i.remaining()).sum(),
    })
}
