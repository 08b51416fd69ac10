// 📅 Amortization - decompose a loan into monthly principal/interest installments
//
// Three interest methods:
//   Flat         total interest = P × r × n / 12, spread evenly
//   Diminishing  straight-line principal, interest on the declining balance
//   Annuity      level payment P·i / (1 − (1+i)^−n), i = r / 12
//
// Every schedule satisfies: Σ principal = P, the balance never increases,
// and the final balance is exactly zero. Rounding remainders land on the
// last installment.

use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{Error, Result};
use crate::money::round_cents;

pub const MAX_TERM_MONTHS: u32 = 360;

const MONTHS_PER_YEAR: u32 = 12;

// ============================================================================
// INTEREST METHOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestMethod {
    /// Simple interest on the original principal (add-on)
    Flat,

    /// Declining-balance interest with equal principal portions
    Diminishing,

    /// Declining-balance interest with equal total payments
    Annuity,
}

impl InterestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterestMethod::Flat => "Flat",
            InterestMethod::Diminishing => "Diminishing",
            InterestMethod::Annuity => "Annuity",
        }
    }
}

impl fmt::Display for InterestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for InterestMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" | "simple" | "add-on" => Ok(InterestMethod::Flat),
            "diminishing" | "declining" => Ok(InterestMethod::Diminishing),
            "annuity" | "amortized" => Ok(InterestMethod::Annuity),
            other => Err(format!("unknown interest method '{}'", other)),
        }
    }
}

// ============================================================================
// TERMS & SCHEDULE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Decimal,
    /// Nominal annual rate as a fraction (0.12 = 12% p.a.)
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub method: InterestMethod,
    /// Release date; the first installment falls one month later
    pub start_date: NaiveDate,
}

impl LoanTerms {
    pub fn validate(&self) -> Result<()> {
        if self.principal <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "principal must be greater than zero, got {}",
                self.principal
            )));
        }
        if self.term_months == 0 || self.term_months > MAX_TERM_MONTHS {
            return Err(Error::InvalidAmount(format!(
                "term must be between 1 and {} months, got {}",
                MAX_TERM_MONTHS, self.term_months
            )));
        }
        if self.annual_rate < Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "interest rate cannot be negative, got {}",
                self.annual_rate
            )));
        }
        // Largest intermediate of the flat and diminishing methods
        self.principal
            .checked_mul(self.annual_rate)
            .and_then(|v| v.checked_mul(Decimal::from(self.term_months)))
            .ok_or_else(|| overflow(self.principal))?;
        Ok(())
    }

    fn monthly_rate(&self) -> Decimal {
        self.annual_rate / Decimal::from(MONTHS_PER_YEAR)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationRow {
    pub installment: u32,
    pub due_date: NaiveDate,
    pub principal: Decimal,
    pub interest: Decimal,
    pub amount_due: Decimal,
    pub balance_after: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub terms: LoanTerms,
    pub rows: Vec<AmortizationRow>,
}

impl AmortizationSchedule {
    pub fn total_principal(&self) -> Decimal {
        self.rows.iter().map(|r| r.principal).sum()
    }

    pub fn total_interest(&self) -> Decimal {
        self.rows.iter().map(|r| r.interest).sum()
    }

    pub fn total_payments(&self) -> Decimal {
        self.rows.iter().map(|r| r.amount_due).sum()
    }

    pub fn first_payment(&self) -> Option<Decimal> {
        self.rows.first().map(|r| r.amount_due)
    }

    pub fn maturity_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.due_date)
    }
}

// ============================================================================
// SCHEDULE COMPUTATION
// ============================================================================

/// Due date of installment `k` (1-based); end-of-month releases clamp (Jan 31 → Feb 29)
pub fn due_date(start: NaiveDate, installment: u32) -> NaiveDate {
    start
        .checked_add_months(Months::new(installment))
        .unwrap_or(NaiveDate::MAX)
}

pub fn compute_schedule(terms: &LoanTerms) -> Result<AmortizationSchedule> {
    terms.validate()?;

    let rows = match terms.method {
        InterestMethod::Flat => flat_rows(terms),
        InterestMethod::Diminishing => diminishing_rows(terms),
        InterestMethod::Annuity => annuity_rows(terms)?,
    };

    debug!(
        method = %terms.method,
        principal = %terms.principal,
        term_months = terms.term_months,
        "amortization schedule computed"
    );

    Ok(AmortizationSchedule {
        terms: terms.clone(),
        rows,
    })
}

fn flat_rows(terms: &LoanTerms) -> Vec<AmortizationRow> {
    let n = Decimal::from(terms.term_months);
    let total_interest = flat_total_interest(terms);
    let principal_each = round_cents(terms.principal / n);
    let interest_each = round_cents(total_interest / n);

    let mut rows = Vec::with_capacity(terms.term_months as usize);
    let mut balance = terms.principal;
    let mut interest_left = total_interest;

    for k in 1..=terms.term_months {
        let last = k == terms.term_months;
        let principal = if last { balance } else { principal_each.min(balance) };
        let interest = if last { interest_left } else { interest_each.min(interest_left) };

        balance -= principal;
        interest_left -= interest;
        rows.push(row(terms, k, principal, interest, balance));
    }

    rows
}

/// Total add-on interest of a flat loan: round(P × r × n / 12)
pub fn flat_total_interest(terms: &LoanTerms) -> Decimal {
    round_cents(
        terms.principal * terms.annual_rate * Decimal::from(terms.term_months)
            / Decimal::from(MONTHS_PER_YEAR),
    )
}

fn diminishing_rows(terms: &LoanTerms) -> Vec<AmortizationRow> {
    let n = Decimal::from(terms.term_months);
    let principal_each = round_cents(terms.principal / n);
    let i = terms.monthly_rate();

    let mut rows = Vec::with_capacity(terms.term_months as usize);
    let mut balance = terms.principal;

    for k in 1..=terms.term_months {
        let interest = round_cents(balance * i);
        let principal = if k == terms.term_months {
            balance
        } else {
            principal_each.min(balance)
        };

        balance -= principal;
        rows.push(row(terms, k, principal, interest, balance));
    }

    rows
}

fn overflow(principal: Decimal) -> Error {
    Error::InvalidAmount(format!("loan of {} is too large to amortize", principal))
}

/// Level monthly payment of an annuity loan, rounded to centavos
pub fn annuity_payment(principal: Decimal, annual_rate: Decimal, term_months: u32) -> Result<Decimal> {
    let n = Decimal::from(term_months);
    let i = annual_rate / Decimal::from(MONTHS_PER_YEAR);

    if i.is_zero() {
        return Ok(round_cents(principal / n));
    }

    // (1 + i)^n by repeated multiplication keeps full Decimal precision
    let mut growth = Decimal::ONE;
    for _ in 0..term_months {
        growth = growth
            .checked_mul(Decimal::ONE + i)
            .ok_or_else(|| overflow(principal))?;
    }

    let payment = principal
        .checked_mul(i)
        .and_then(|v| v.checked_mul(growth))
        .and_then(|v| v.checked_div(growth - Decimal::ONE))
        .ok_or_else(|| overflow(principal))?;
    Ok(round_cents(payment))
}

fn annuity_rows(terms: &LoanTerms) -> Result<Vec<AmortizationRow>> {
    let payment = annuity_payment(terms.principal, terms.annual_rate, terms.term_months)?;
    let i = terms.monthly_rate();

    let mut rows = Vec::with_capacity(terms.term_months as usize);
    let mut balance = terms.principal;

    for k in 1..=terms.term_months {
        let interest = round_cents(balance * i);
        let principal = if k == terms.term_months {
            balance
        } else {
            (payment - interest).max(Decimal::ZERO).min(balance)
        };

        balance -= principal;
        rows.push(row(terms, k, principal, interest, balance));
    }

    Ok(rows)
}

fn row(
    terms: &LoanTerms,
    installment: u32,
    principal: Decimal,
    interest: Decimal,
    balance_after: Decimal,
) -> AmortizationRow {
    AmortizationRow {
        installment,
        due_date: due_date(terms.start_date, installment),
        principal,
        interest,
        amount_due: principal + interest,
        balance_after,
    }
}

// ============================================================================
// DEDUCTIONS
// ============================================================================

/// Risk Loss Provision Fund: round(P × rate × n / 12)
pub fn rlpf(principal: Decimal, term_months: u32, rate: Decimal) -> Decimal {
    round_cents(principal * rate * Decimal::from(term_months) / Decimal::from(MONTHS_PER_YEAR))
}

pub fn service_charge(principal: Decimal, rate: Decimal) -> Decimal {
    round_cents(principal * rate)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deductions {
    pub rlpf: Decimal,
    pub service_charge: Decimal,
    pub net_proceeds: Decimal,
}

/// Amount actually handed to the member after the fixed deductions
pub fn deductions(
    principal: Decimal,
    term_months: u32,
    rlpf_rate: Decimal,
    service_charge_rate: Decimal,
) -> Result<Deductions> {
    let rlpf = rlpf(principal, term_months, rlpf_rate);
    let service_charge = service_charge(principal, service_charge_rate);
    let net_proceeds = principal - rlpf - service_charge;

    if net_proceeds <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "deductions ({} RLPF + {} service charge) consume the whole principal {}",
            rlpf, service_charge, principal
        )));
    }

    Ok(Deductions {
        rlpf,
        service_charge,
        net_proceeds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms(principal: Decimal, rate: Decimal, months: u32, method: InterestMethod) -> LoanTerms {
        LoanTerms {
            principal,
            annual_rate: rate,
            term_months: months,
            method,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    fn assert_invariants(schedule: &AmortizationSchedule) {
        let p = schedule.terms.principal;
        assert_eq!(schedule.rows.len(), schedule.terms.term_months as usize);
        assert_eq!(schedule.total_principal(), p, "principal portions must sum to P");
        assert_eq!(schedule.rows.last().unwrap().balance_after, Decimal::ZERO);

        let mut previous = p;
        for row in &schedule.rows {
            assert!(row.principal >= Decimal::ZERO, "negative principal at {}", row.installment);
            assert!(row.interest >= Decimal::ZERO);
            assert!(row.balance_after <= previous, "balance rose at {}", row.installment);
            assert_eq!(row.amount_due, row.principal + row.interest);
            previous = row.balance_after;
        }
    }

    #[test]
    fn test_flat_schedule() {
        let schedule = compute_schedule(&terms(dec!(12000), dec!(0.12), 12, InterestMethod::Flat)).unwrap();

        assert_invariants(&schedule);
        assert_eq!(schedule.total_interest(), dec!(1440));
        assert!(schedule.rows.iter().all(|r| r.principal == dec!(1000)));
        assert!(schedule.rows.iter().all(|r| r.interest == dec!(120)));
        assert_eq!(schedule.first_payment(), Some(dec!(1120)));
    }

    #[test]
    fn test_flat_schedule_remainder_on_last_installment() {
        let schedule = compute_schedule(&terms(dec!(10000), dec!(0.10), 7, InterestMethod::Flat)).unwrap();

        assert_invariants(&schedule);
        // 10000 / 7 = 1428.571.. → 1428.57 × 6 + 1428.58
        assert_eq!(schedule.rows[0].principal, dec!(1428.57));
        assert_eq!(schedule.rows[6].principal, dec!(1428.58));
        assert_eq!(schedule.total_interest(), flat_total_interest(&schedule.terms));
        assert_eq!(schedule.total_interest(), dec!(583.33));
    }

    #[test]
    fn test_diminishing_schedule() {
        let schedule =
            compute_schedule(&terms(dec!(12000), dec!(0.12), 12, InterestMethod::Diminishing)).unwrap();

        assert_invariants(&schedule);
        assert_eq!(schedule.rows[0].interest, dec!(120));
        assert_eq!(schedule.rows[1].interest, dec!(110));
        assert_eq!(schedule.rows[11].interest, dec!(10));
        // 120 + 110 + ... + 10
        assert_eq!(schedule.total_interest(), dec!(780));

        for pair in schedule.rows.windows(2) {
            assert!(pair[1].interest < pair[0].interest);
        }
    }

    #[test]
    fn test_annuity_schedule() {
        let schedule =
            compute_schedule(&terms(dec!(100000), dec!(0.12), 12, InterestMethod::Annuity)).unwrap();

        assert_invariants(&schedule);
        assert_eq!(schedule.first_payment(), Some(dec!(8884.88)));
        // All but the last installment carry the level payment
        assert!(schedule.rows[..11].iter().all(|r| r.amount_due == dec!(8884.88)));
        let last = schedule.rows[11].amount_due;
        assert!((last - dec!(8884.88)).abs() < dec!(1));
    }

    #[test]
    fn test_zero_rate_is_principal_only() {
        for method in [InterestMethod::Flat, InterestMethod::Diminishing, InterestMethod::Annuity] {
            let schedule = compute_schedule(&terms(dec!(999.99), Decimal::ZERO, 4, method)).unwrap();
            assert_invariants(&schedule);
            assert_eq!(schedule.total_interest(), Decimal::ZERO, "{}", method);
        }
    }

    #[test]
    fn test_invariants_hold_across_awkward_terms() {
        let cases = [
            (dec!(1), dec!(0.24), 12),
            (dec!(50000.01), dec!(0.18), 36),
            (dec!(7777.77), dec!(0.035), 11),
            (dec!(250000), dec!(0.09), 360),
        ];

        for (principal, rate, months) in cases {
            for method in [InterestMethod::Flat, InterestMethod::Diminishing, InterestMethod::Annuity] {
                let schedule = compute_schedule(&terms(principal, rate, months, method)).unwrap();
                assert_invariants(&schedule);
            }
        }
    }

    #[test]
    fn test_due_dates_clamp_to_month_end() {
        let schedule = compute_schedule(&terms(dec!(3000), dec!(0.12), 3, InterestMethod::Flat)).unwrap();
        let dates: Vec<NaiveDate> = schedule.rows.iter().map(|r| r.due_date).collect();

        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
            ]
        );
        assert_eq!(schedule.maturity_date(), NaiveDate::from_ymd_opt(2024, 4, 30));
    }

    #[test]
    fn test_invalid_terms_rejected() {
        assert!(compute_schedule(&terms(Decimal::ZERO, dec!(0.1), 12, InterestMethod::Flat)).is_err());
        assert!(compute_schedule(&terms(dec!(100), dec!(0.1), 0, InterestMethod::Flat)).is_err());
        assert!(compute_schedule(&terms(dec!(100), dec!(0.1), 361, InterestMethod::Flat)).is_err());
        assert!(compute_schedule(&terms(dec!(100), dec!(-0.1), 12, InterestMethod::Flat)).is_err());
    }

    #[test]
    fn test_oversized_principal_is_an_error() {
        let huge = dec!(100_000_000_000_000_000_000);

        let result = compute_schedule(&terms(huge, dec!(1), 360, InterestMethod::Annuity));
        assert!(matches!(result, Err(Error::InvalidAmount(_))));
        assert!(annuity_payment(huge, dec!(1), 360).is_err());

        let result = compute_schedule(&terms(dec!(70_000_000_000_000_000_000_000_000), dec!(12), 360, InterestMethod::Flat));
        assert!(matches!(result, Err(Error::InvalidAmount(_))));
    }

    #[test]
    fn test_rlpf_and_net_proceeds() {
        assert_eq!(rlpf(dec!(20000), 12, dec!(0.01)), dec!(200));
        assert_eq!(rlpf(dec!(20000), 6, dec!(0.01)), dec!(100));
        assert_eq!(service_charge(dec!(20000), dec!(0.02)), dec!(400));

        let d = deductions(dec!(20000), 12, dec!(0.01), dec!(0.02)).unwrap();
        assert_eq!(d.net_proceeds, dec!(19400));

        assert!(deductions(dec!(100), 12, dec!(0.5), dec!(0.6)).is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("simple".parse::<InterestMethod>().unwrap(), InterestMethod::Flat);
        assert_eq!("Declining".parse::<InterestMethod>().unwrap(), InterestMethod::Diminishing);
        assert_eq!("ANNUITY".parse::<InterestMethod>().unwrap(), InterestMethod::Annuity);
        assert!("balloon".parse::<InterestMethod>().is_err());
    }
}
