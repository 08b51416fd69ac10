// 📤 CSV Export - amortization schedules, passbook statements, member roster

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::entities::loan::{get_loan, get_schedule};
use crate::entities::member::list_members;
use crate::entities::savings::get_account;
use crate::error::Result;
use crate::ledger::{account_transactions, AccountKind};
use crate::money::to_fixed;

#[derive(Debug, Serialize)]
struct ScheduleRecord {
    loan_number: String,
    installment: u32,
    due_date: NaiveDate,
    principal: String,
    interest: String,
    amount_due: String,
    principal_paid: String,
    interest_paid: String,
    balance_after: String,
}

#[derive(Debug, Serialize)]
struct StatementRecord {
    account_number: String,
    date: NaiveDate,
    tx_type: String,
    reference: String,
    debit: String,
    credit: String,
    balance: String,
    posted_by: String,
}

#[derive(Debug, Serialize)]
struct MemberRecord {
    member_code: String,
    last_name: String,
    first_name: String,
    middle_name: String,
    birth_date: String,
    address: String,
    contact_number: String,
    email: String,
    join_date: NaiveDate,
    status: String,
}

/// Serialize rows with a header line; returns the number of data rows
pub fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

pub fn export_schedule<W: Write>(conn: &Connection, loan_id: i64, writer: W) -> Result<usize> {
    let loan = get_loan(conn, loan_id)?;
    let rows: Vec<ScheduleRecord> = get_schedule(conn, loan.id)?
        .into_iter()
        .map(|i| ScheduleRecord {
            loan_number: loan.loan_number.clone(),
            installment: i.installment,
            due_date: i.due_date,
            principal: to_fixed(i.principal),
            interest: to_fixed(i.interest),
            amount_due: to_fixed(i.amount_due),
            principal_paid: to_fixed(i.principal_paid),
            interest_paid: to_fixed(i.interest_paid),
            balance_after: to_fixed(i.balance_after),
        })
        .collect();
    write_csv(writer, &rows)
}

pub fn export_statement<W: Write>(conn: &Connection, account_id: i64, writer: W) -> Result<usize> {
    let account = get_account(conn, account_id)?;
    let rows: Vec<StatementRecord> = account_transactions(conn, AccountKind::Savings, account.id)?
        .into_iter()
        .map(|tx| {
            let amount = to_fixed(tx.amount);
            let (debit, credit) = if tx.tx_type.is_credit() {
                (String::new(), amount)
            } else {
                (amount, String::new())
            };
            StatementRecord {
                account_number: account.account_number.clone(),
                date: tx.tx_date,
                tx_type: tx.tx_type.to_string(),
                reference: tx.reference,
                debit,
                credit,
                balance: to_fixed(tx.balance_after),
                posted_by: tx.actor,
            }
        })
        .collect();
    write_csv(writer, &rows)
}

pub fn export_members<W: Write>(conn: &Connection, writer: W) -> Result<usize> {
    let rows: Vec<MemberRecord> = list_members(conn)?
        .into_iter()
        .map(|m| MemberRecord {
            member_code: m.member_code,
            last_name: m.last_name,
            first_name: m.first_name,
            middle_name: m.middle_name.unwrap_or_default(),
            birth_date: m.birth_date.map(|d| d.to_string()).unwrap_or_default(),
            address: m.address,
            contact_number: m.contact_number,
            email: m.email.unwrap_or_default(),
            join_date: m.join_date,
            status: m.status.to_string(),
        })
        .collect();
    write_csv(writer, &rows)
}

pub fn export_schedule_to_file(conn: &Connection, loan_id: i64, path: &Path) -> Result<usize> {
    let mut buf = Vec::new();
    export_schedule(conn, loan_id, &mut buf)?;
    write_bytes(path, &buf, "amortization schedule")
}

pub fn export_statement_to_file(conn: &Connection, account_id: i64, path: &Path) -> Result<usize> {
    let mut buf = Vec::new();
    export_statement(conn, account_id, &mut buf)?;
    write_bytes(path, &buf, "statement")
}

pub fn export_members_to_file(conn: &Connection, path: &Path) -> Result<usize> {
    let mut buf = Vec::new();
    export_members(conn, &mut buf)?;
    write_bytes(path, &buf, "member roster")
}

/// Write a rendered CSV buffer; returns data rows (lines minus header)
fn write_bytes(path: &Path, bytes: &[u8], what: &str) -> Result<usize> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    let count = csv::Reader::from_reader(bytes).records().count();
    info!(path = %path.display(), rows = count, "{} exported", what);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::member::create_member;
    use crate::entities::member::tests::sample_member;
    use crate::entities::savings::open_account;
    use crate::ledger::{deposit, withdraw};
    use crate::loans::{apply_for_loan, LoanApplication};
    use crate::amortization::InterestMethod;
    use crate::config::LoanPolicy;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let member = create_member(&conn, &sample_member("Jose", "Rizal"), "clerk").unwrap();
        let account = open_account(&conn, member.id, date(2024, 1, 2), "teller").unwrap();
        deposit(&conn, account.id, dec!(5000), date(2024, 1, 2), "OR-1", "teller").unwrap();
        withdraw(&conn, account.id, dec!(1200.50), date(2024, 1, 9), "WS-1", "teller").unwrap();
        (conn, member.id, account.id)
    }

    #[test]
    fn test_export_statement() {
        let (conn, _, account_id) = setup();
        let mut buf = Vec::new();

        let count = export_statement(&conn, account_id, &mut buf).unwrap();

        assert_eq!(count, 2);
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "account_number,date,tx_type,reference,debit,credit,balance,posted_by"
        );
        assert_eq!(lines[1], "SA-000001,2024-01-02,DEPOSIT,OR-1,,5000.00,5000.00,teller");
        assert_eq!(lines[2], "SA-000001,2024-01-09,WITHDRAWAL,WS-1,1200.50,,3799.50,teller");
    }

    #[test]
    fn test_export_schedule_to_file() {
        let (conn, member_id, _) = setup();
        let loan = apply_for_loan(
            &conn,
            &LoanApplication {
                member_id,
                principal: dec!(6000),
                annual_rate: dec!(0.12),
                term_months: 6,
                method: InterestMethod::Flat,
                purpose: "Farm inputs".to_string(),
                applied_on: date(2024, 1, 15),
            },
            &LoanPolicy::default(),
            "teller",
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.csv");
        let count = export_schedule_to_file(&conn, loan.id, &path).unwrap();

        assert_eq!(count, 6);
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[0], "LN-000001");
        assert_eq!(&first[2], "2024-02-15");
        assert_eq!(&first[3], "1000.00");
        assert_eq!(&first[4], "60.00");
    }

    #[test]
    fn test_export_members_quotes_fields() {
        let (conn, _, _) = setup();
        let mut buf = Vec::new();

        assert_eq!(export_members(&conn, &mut buf).unwrap(), 1);

        let mut reader = csv::Reader::from_reader(buf.as_slice());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "member_code");
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "M-000001");
        assert_eq!(&row[1], "Rizal");
        assert_eq!(&row[9], "Active");
    }
}
