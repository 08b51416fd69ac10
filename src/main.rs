// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::debug;

use coop_records::amortization::InterestMethod;
use coop_records::auth::{authenticate, bootstrap_admin, Session};
use coop_records::config::Config;
use coop_records::db::{open_database, setup_database};
use coop_records::entities::loan::{get_schedule, list_loans, loans_by_status, resolve_loan};
use coop_records::entities::member::{
    create_member, list_members, resolve_member, search_members, set_member_status, update_member,
};
use coop_records::entities::savings::{accounts_for_member, list_accounts, open_account, resolve_account};
use coop_records::entities::user::{
    change_password, create_user, effective_permissions, get_user_by_username, grant_permission,
    list_users, revoke_permission, set_active,
};
use coop_records::export::{export_members_to_file, export_schedule_to_file, export_statement_to_file};
use coop_records::interest::{
    accrue_interest, get_interest_settings, list_dormant_accounts, scan_dormant_accounts,
    update_interest_settings, SettingsUpdate,
};
use coop_records::ledger::{account_transactions, close_out_account, deposit, withdraw, AccountKind};
use coop_records::loans::{
    apply_for_loan, approve_loan, borrowing_capacity, loan_balance, post_loan_payment, reject_loan,
    release_loan, LoanApplication,
};
use coop_records::money::{format_amount, parse_amount, parse_rate};
use coop_records::{
    LoanStatus, MemberStatus, MemberUpdate, NewMember, NewUser, Permission, ReconciliationEngine, Role,
};

const USER_ENV: &str = "COOP_USER";
const PASSWORD_ENV: &str = "COOP_PASSWORD";
const NEW_PASSWORD_ENV: &str = "COOP_NEW_PASSWORD";

/// Cooperative Records - members, savings and loans of a credit cooperative
#[derive(Parser, Debug)]
#[command(name = "coop-records")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: coop.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Operator username (password is read from COOP_PASSWORD)
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and the first administrator
    Init(InitArgs),

    /// Manage operator accounts and permissions
    #[command(subcommand)]
    User(UserCommand),

    /// Member registry
    #[command(subcommand)]
    Member(MemberCommand),

    /// Savings accounts and cash postings
    #[command(subcommand)]
    Savings(SavingsCommand),

    /// Loan application, approval, release and repayment
    #[command(subcommand)]
    Loan(LoanCommand),

    /// Savings interest
    #[command(subcommand)]
    Interest(InterestCommand),

    /// Dormant account monitoring
    #[command(subcommand)]
    Dormant(DormantCommand),

    /// Check stored balances against the ledger
    Reconcile,

    /// Write CSV files
    #[command(subcommand)]
    Export(ExportCommand),

    /// Interactive terminal browser
    Ui,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Administrator username
    #[arg(long, default_value = "admin")]
    admin: String,

    /// Administrator full name
    #[arg(long, default_value = "Administrator")]
    full_name: String,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Add an operator (password from COOP_NEW_PASSWORD)
    Add {
        username: String,
        full_name: String,
        #[arg(long, default_value = "teller")]
        role: Role,
    },
    List,
    /// Grant an extra permission
    Grant { username: String, permission: Permission },
    /// Revoke an explicitly granted permission
    Revoke { username: String, permission: Permission },
    Deactivate { username: String },
    Activate { username: String },
    /// Change a password (new password from COOP_NEW_PASSWORD)
    Passwd { username: String },
}

#[derive(Subcommand, Debug)]
enum MemberCommand {
    Add(MemberAddArgs),
    List,
    Search { query: String },
    /// Show a member with accounts and loans (id or member code)
    Show { member: String },
    /// Update contact details
    Update {
        member: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Change membership status (active, inactive, withdrawn)
    Status { member: String, status: MemberStatus },
}

#[derive(Args, Debug)]
struct MemberAddArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    middle_name: Option<String>,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    birth_date: Option<NaiveDate>,
    #[arg(long)]
    address: String,
    #[arg(long)]
    contact: String,
    #[arg(long)]
    email: Option<String>,
    /// Membership date (default: today)
    #[arg(long)]
    joined: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
enum SavingsCommand {
    /// Open a savings account for a member
    Open {
        member: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    List,
    Deposit(PostingArgs),
    Withdraw(PostingArgs),
    /// Passbook of an account (id or account number)
    Statement { account: String },
    /// Pay out the balance and close the account
    Close {
        account: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Args, Debug)]
struct PostingArgs {
    /// Account or loan (id or number)
    target: String,
    /// Amount ("1,500.00" and "₱1500" are accepted)
    #[arg(value_parser = amount_arg)]
    amount: Decimal,
    /// Official receipt / slip number
    #[arg(long, default_value = "")]
    reference: String,
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
enum LoanCommand {
    Apply(LoanApplyArgs),
    Approve { loan: String },
    Reject {
        loan: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Disburse net proceeds; schedule runs from the release date
    Release {
        loan: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Pay(PostingArgs),
    Schedule { loan: String },
    List {
        #[arg(long)]
        status: Option<LoanStatus>,
    },
    Show {
        loan: String,
        /// Balance as of (default: today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

#[derive(Args, Debug)]
struct LoanApplyArgs {
    member: String,
    #[arg(value_parser = amount_arg)]
    principal: Decimal,
    /// Annual rate, "12%" or "0.12"
    #[arg(long, value_parser = rate_arg)]
    rate: Decimal,
    /// Term in months
    #[arg(long)]
    term: u32,
    /// flat, diminishing or annuity
    #[arg(long, default_value = "flat")]
    method: InterestMethod,
    #[arg(long)]
    purpose: String,
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
enum InterestCommand {
    /// Credit one month of interest (any date inside the month)
    Accrue {
        #[arg(long)]
        period: Option<NaiveDate>,
    },
    Settings,
    Set {
        #[arg(long, value_parser = rate_arg)]
        rate: Option<Decimal>,
        #[arg(long, value_parser = balance_arg)]
        min_balance: Option<Decimal>,
        #[arg(long, value_parser = balance_arg)]
        maintaining_balance: Option<Decimal>,
        #[arg(long)]
        dormancy_months: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
enum DormantCommand {
    /// Flag accounts idle for the dormancy period
    Scan {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    List {
        /// Include reactivated accounts
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ExportCommand {
    Schedule { loan: String, out: PathBuf },
    Statement { account: String, out: PathBuf },
    Members { out: PathBuf },
}

fn amount_arg(s: &str) -> std::result::Result<Decimal, String> {
    parse_amount(s).map_err(|e| e.to_string())
}

/// Like `amount_arg` but zero is allowed
fn balance_arg(s: &str) -> std::result::Result<Decimal, String> {
    match s.trim().parse::<Decimal>() {
        Ok(v) if v.is_zero() => Ok(Decimal::ZERO),
        _ => amount_arg(s),
    }
}

fn rate_arg(s: &str) -> std::result::Result<Decimal, String> {
    parse_rate(s).map_err(|e| e.to_string())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Any day of the most recently completed month
fn last_month() -> NaiveDate {
    let today = today();
    today - chrono::Duration::days(i64::from(today.day()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    config.logging.init();
    debug!(db = %config.database.path.display(), "configuration loaded");

    let conn = open_database(&config.database.path)
        .with_context(|| format!("opening {}", config.database.path.display()))?;
    setup_database(&conn)?;

    if let Commands::Init(args) = &cli.command {
        return run_init(&conn, &config, args);
    }

    let session = login(&conn, cli.user.as_deref())?;

    match cli.command {
        Commands::Init(_) => unreachable!("handled above"),
        Commands::User(cmd) => run_user(&conn, &session, cmd),
        Commands::Member(cmd) => run_member(&conn, &session, cmd),
        Commands::Savings(cmd) => run_savings(&conn, &session, cmd),
        Commands::Loan(cmd) => run_loan(&conn, &config, &session, cmd),
        Commands::Interest(cmd) => run_interest(&conn, &session, cmd),
        Commands::Dormant(cmd) => run_dormant(&conn, &session, cmd),
        Commands::Reconcile => run_reconcile(&conn, &session),
        Commands::Export(cmd) => run_export(&conn, &session, cmd),
        Commands::Ui => {
            session.require(Permission::ViewReports)?;
            run_ui_mode(&conn)
        }
    }
}

fn env_secret(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => bail!("{} is not set", name),
    }
}

fn login(conn: &Connection, user: Option<&str>) -> Result<Session> {
    let username = match user {
        Some(u) => u.to_string(),
        None => std::env::var(USER_ENV).context("pass --user or set COOP_USER")?,
    };
    let password = env_secret(PASSWORD_ENV)?;
    Ok(authenticate(conn, &username, &password)?)
}

fn run_init(conn: &Connection, config: &Config, args: &InitArgs) -> Result<()> {
    let password = env_secret(PASSWORD_ENV)?;
    let admin = bootstrap_admin(conn, &args.admin, &args.full_name, &password)?;

    // Fresh books: carry the configured savings policy into the settings row
    update_interest_settings(
        conn,
        &SettingsUpdate {
            annual_rate: Some(config.savings.annual_rate),
            min_balance_for_interest: Some(config.savings.min_balance_for_interest),
            maintaining_balance: Some(config.savings.maintaining_balance),
            dormancy_months: Some(config.savings.dormancy_months),
        },
        &admin.username,
    )?;

    println!("🗄️  Database ready: {}", config.database.path.display());
    println!("✓ Administrator '{}' created", admin.username);
    Ok(())
}

// ============================================================================
// USERS
// ============================================================================

fn run_user(conn: &Connection, session: &Session, cmd: UserCommand) -> Result<()> {
    let actor = session.username();

    match cmd {
        UserCommand::Passwd { username } => {
            let user = get_user_by_username(conn, &username)?;
            if user.id != session.user.id {
                session.require(Permission::ManageUsers)?;
            }
            change_password(conn, user.id, &env_secret(NEW_PASSWORD_ENV)?, actor)?;
            println!("✓ Password changed for {}", user.username);
            return Ok(());
        }
        _ => session.require(Permission::ManageUsers)?,
    }

    match cmd {
        UserCommand::Add { username, full_name, role } => {
            let user = create_user(
                conn,
                &NewUser {
                    username,
                    full_name,
                    role,
                    password: env_secret(NEW_PASSWORD_ENV)?,
                },
                actor,
            )?;
            println!("✓ User {} ({}) created", user.username, user.role);
        }
        UserCommand::List => {
            println!("{:<16} {:<28} {:<8} {:<7} LAST LOGIN", "USERNAME", "NAME", "ROLE", "ACTIVE");
            for user in list_users(conn)? {
                println!(
                    "{:<16} {:<28} {:<8} {:<7} {}",
                    user.username,
                    user.full_name,
                    user.role,
                    if user.active { "yes" } else { "no" },
                    user.last_login.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into())
                );
                let perms: Vec<String> = effective_permissions(conn, &user)?
                    .iter()
                    .map(|p| p.to_string())
                    .collect();
                println!("    {}", perms.join(", "));
            }
        }
        UserCommand::Grant { username, permission } => {
            let user = get_user_by_username(conn, &username)?;
            if grant_permission(conn, user.id, permission, actor)? {
                println!("✓ Granted {} to {}", permission, user.username);
            } else {
                println!("{} already holds {}", user.username, permission);
            }
        }
        UserCommand::Revoke { username, permission } => {
            let user = get_user_by_username(conn, &username)?;
            if revoke_permission(conn, user.id, permission, actor)? {
                println!("✓ Revoked {} from {}", permission, user.username);
            } else {
                println!("{} had no explicit grant of {}", user.username, permission);
            }
        }
        UserCommand::Deactivate { username } => {
            let user = get_user_by_username(conn, &username)?;
            if user.id == session.user.id {
                bail!("you cannot deactivate your own account");
            }
            set_active(conn, user.id, false, actor)?;
            println!("✓ {} deactivated", user.username);
        }
        UserCommand::Activate { username } => {
            let user = get_user_by_username(conn, &username)?;
            set_active(conn, user.id, true, actor)?;
            println!("✓ {} activated", user.username);
        }
        UserCommand::Passwd { .. } => unreachable!("handled above"),
    }
    Ok(())
}

// ============================================================================
// MEMBERS
// ============================================================================

fn run_member(conn: &Connection, session: &Session, cmd: MemberCommand) -> Result<()> {
    let actor = session.username();

    match cmd {
        MemberCommand::Add(args) => {
            session.require(Permission::ManageMembers)?;
            let member = create_member(
                conn,
                &NewMember {
                    first_name: args.first_name,
                    middle_name: args.middle_name,
                    last_name: args.last_name,
                    birth_date: args.birth_date,
                    address: args.address,
                    contact_number: args.contact,
                    email: args.email,
                    join_date: args.joined.unwrap_or_else(today),
                },
                actor,
            )?;
            println!("✓ Member {} {} registered", member.member_code, member.display_name());
        }
        MemberCommand::List => {
            session.require(Permission::ViewMembers)?;
            print_members(&list_members(conn)?);
        }
        MemberCommand::Search { query } => {
            session.require(Permission::ViewMembers)?;
            print_members(&search_members(conn, &query)?);
        }
        MemberCommand::Show { member } => {
            session.require(Permission::ViewMembers)?;
            let member = resolve_member(conn, &member)?;
            println!("{}  {}", member.member_code, member.display_name());
            println!("  Status:   {}", member.status);
            println!("  Joined:   {}", member.join_date);
            println!("  Address:  {}", member.address);
            println!("  Contact:  {}", member.contact_number);
            if let Some(email) = &member.email {
                println!("  Email:    {}", email);
            }
            println!("\n  Savings");
            for account in accounts_for_member(conn, member.id)? {
                println!(
                    "    {}  {:>14}  {}",
                    account.account_number,
                    format_amount(account.balance),
                    account.status
                );
            }
            println!("\n  Loans");
            for loan in coop_records::entities::loan::loans_for_member(conn, member.id)? {
                println!(
                    "    {}  {:>14}  {:>14}  {}",
                    loan.loan_number,
                    format_amount(loan.principal),
                    format_amount(loan.outstanding_principal),
                    loan.status
                );
            }
        }
        MemberCommand::Update { member, address, contact, email } => {
            session.require(Permission::ManageMembers)?;
            let member = resolve_member(conn, &member)?;
            let updated = update_member(
                conn,
                member.id,
                &MemberUpdate {
                    address,
                    contact_number: contact,
                    email,
                },
                actor,
            )?;
            println!("✓ {} updated", updated.member_code);
        }
        MemberCommand::Status { member, status } => {
            session.require(Permission::ManageMembers)?;
            let member = resolve_member(conn, &member)?;
            let updated = set_member_status(conn, member.id, status, actor)?;
            println!("✓ {} is now {}", updated.member_code, updated.status);
        }
    }
    Ok(())
}

fn print_members(members: &[coop_records::Member]) {
    println!("{:<10} {:<32} {:<11} {:<16} STATUS", "CODE", "NAME", "JOINED", "CONTACT");
    for m in members {
        println!(
            "{:<10} {:<32} {:<11} {:<16} {}",
            m.member_code,
            m.display_name(),
            m.join_date,
            m.contact_number,
            m.status
        );
    }
    println!("{} member(s)", members.len());
}

// ============================================================================
// SAVINGS
// ============================================================================

fn run_savings(conn: &Connection, session: &Session, cmd: SavingsCommand) -> Result<()> {
    let actor = session.username();

    match cmd {
        SavingsCommand::Open { member, date } => {
            session.require(Permission::PostTransactions)?;
            let member = resolve_member(conn, &member)?;
            let account = open_account(conn, member.id, date.unwrap_or_else(today), actor)?;
            println!("✓ Opened {} for {}", account.account_number, member.display_name());
        }
        SavingsCommand::List => {
            session.require(Permission::ViewMembers)?;
            println!("{:<11} {:>8} {:>16} {:<13} STATUS", "ACCOUNT", "MEMBER", "BALANCE", "LAST ACTIVITY");
            for a in list_accounts(conn)? {
                println!(
                    "{:<11} {:>8} {:>16} {:<13} {}",
                    a.account_number,
                    a.member_id,
                    format_amount(a.balance),
                    a.last_activity,
                    a.status
                );
            }
        }
        SavingsCommand::Deposit(args) => {
            session.require(Permission::PostTransactions)?;
            let account = resolve_account(conn, &args.target)?;
            let tx = deposit(conn, account.id, args.amount, args.date.unwrap_or_else(today), &args.reference, actor)?;
            println!(
                "✓ Deposited {} to {}; balance {}",
                format_amount(tx.amount),
                account.account_number,
                format_amount(tx.balance_after)
            );
        }
        SavingsCommand::Withdraw(args) => {
            session.require(Permission::PostTransactions)?;
            let account = resolve_account(conn, &args.target)?;
            let tx = withdraw(conn, account.id, args.amount, args.date.unwrap_or_else(today), &args.reference, actor)?;
            println!(
                "✓ Withdrew {} from {}; balance {}",
                format_amount(tx.amount),
                account.account_number,
                format_amount(tx.balance_after)
            );
        }
        SavingsCommand::Statement { account } => {
            session.require(Permission::ViewMembers)?;
            let account = resolve_account(conn, &account)?;
            println!("Statement of {} ({})", account.account_number, account.status);
            println!("{:<11} {:<12} {:<14} {:>14} {:>14} {:>14}", "DATE", "TYPE", "REFERENCE", "DEBIT", "CREDIT", "BALANCE");
            for tx in account_transactions(conn, AccountKind::Savings, account.id)? {
                let (debit, credit) = if tx.tx_type.is_credit() {
                    (String::new(), format_amount(tx.amount))
                } else {
                    (format_amount(tx.amount), String::new())
                };
                println!(
                    "{:<11} {:<12} {:<14} {:>14} {:>14} {:>14}",
                    tx.tx_date,
                    tx.tx_type,
                    tx.reference,
                    debit,
                    credit,
                    format_amount(tx.balance_after)
                );
            }
        }
        SavingsCommand::Close { account, date } => {
            session.require(Permission::PostTransactions)?;
            let account = resolve_account(conn, &account)?;
            let (payout, closed) = close_out_account(conn, account.id, date.unwrap_or_else(today), actor)?;
            if let Some(tx) = payout {
                println!("✓ Paid out {}", format_amount(tx.amount));
            }
            println!("✓ {} closed", closed.account_number);
        }
    }
    Ok(())
}

// ============================================================================
// LOANS
// ============================================================================

fn run_loan(conn: &Connection, config: &Config, session: &Session, cmd: LoanCommand) -> Result<()> {
    let actor = session.username();

    match cmd {
        LoanCommand::Apply(args) => {
            session.require(Permission::ManageLoans)?;
            let member = resolve_member(conn, &args.member)?;
            let loan = apply_for_loan(
                conn,
                &LoanApplication {
                    member_id: member.id,
                    principal: args.principal,
                    annual_rate: args.rate,
                    term_months: args.term,
                    method: args.method,
                    purpose: args.purpose,
                    applied_on: args.date.unwrap_or_else(today),
                },
                &config.loans,
                actor,
            )?;
            println!("✓ Loan {} filed for {} (Pending)", loan.loan_number, member.display_name());
            println!("  Principal:       {:>14}", format_amount(loan.principal));
            println!("  RLPF:            {:>14}", format_amount(loan.rlpf));
            println!("  Service charge:  {:>14}", format_amount(loan.service_charge));
            println!("  Net proceeds:    {:>14}", format_amount(loan.net_proceeds));
            if let Some(left) = borrowing_capacity(conn, member.id, &config.loans)? {
                println!("  Remaining capacity: {}", format_amount(left));
            }
        }
        LoanCommand::Approve { loan } => {
            session.require(Permission::ApproveLoans)?;
            let loan = approve_loan(conn, resolve_loan(conn, &loan)?.id, actor)?;
            println!("✓ {} approved", loan.loan_number);
        }
        LoanCommand::Reject { loan, reason } => {
            session.require(Permission::ApproveLoans)?;
            let loan = reject_loan(conn, resolve_loan(conn, &loan)?.id, &reason, actor)?;
            println!("✓ {} rejected", loan.loan_number);
        }
        LoanCommand::Release { loan, date } => {
            session.require(Permission::ReleaseLoans)?;
            let (loan, _) = release_loan(conn, resolve_loan(conn, &loan)?.id, date.unwrap_or_else(today), actor)?;
            println!("✓ {} released; net proceeds {}", loan.loan_number, format_amount(loan.net_proceeds));
        }
        LoanCommand::Pay(args) => {
            session.require(Permission::PostTransactions)?;
            let loan = resolve_loan(conn, &args.target)?;
            let receipt = post_loan_payment(
                conn,
                loan.id,
                args.amount,
                args.date.unwrap_or_else(today),
                &args.reference,
                actor,
            )?;
            println!(
                "✓ {} paid on {}: interest {}, principal {}; outstanding {}",
                format_amount(receipt.transaction.amount),
                receipt.loan.loan_number,
                format_amount(receipt.interest_applied),
                format_amount(receipt.principal_applied),
                format_amount(receipt.loan.outstanding_principal)
            );
            if receipt.loan.status == LoanStatus::Paid {
                println!("🎉 {} fully paid", receipt.loan.loan_number);
            }
        }
        LoanCommand::Schedule { loan } => {
            session.require(Permission::ViewMembers)?;
            let loan = resolve_loan(conn, &loan)?;
            println!(
                "{}  {} over {} months at {}% ({})",
                loan.loan_number,
                format_amount(loan.principal),
                loan.term_months,
                loan.annual_rate * Decimal::ONE_HUNDRED,
                loan.interest_method
            );
            println!("{:>3} {:<11} {:>12} {:>12} {:>12} {:>12} {:>14}", "#", "DUE", "PRINCIPAL", "INTEREST", "AMOUNT", "PAID", "BALANCE");
            for i in get_schedule(conn, loan.id)? {
                println!(
                    "{:>3} {:<11} {:>12} {:>12} {:>12} {:>12} {:>14}",
                    i.installment,
                    i.due_date,
                    format_amount(i.principal),
                    format_amount(i.interest),
                    format_amount(i.amount_due),
                    format_amount(i.principal_paid + i.interest_paid),
                    format_amount(i.balance_after)
                );
            }
        }
        LoanCommand::List { status } => {
            session.require(Permission::ViewMembers)?;
            let loans = match status {
                Some(s) => loans_by_status(conn, s)?,
                None => list_loans(conn)?,
            };
            println!("{:<11} {:>8} {:>14} {:>5} {:<12} {:>14} STATUS", "LOAN", "MEMBER", "PRINCIPAL", "TERM", "METHOD", "OUTSTANDING");
            for l in &loans {
                println!(
                    "{:<11} {:>8} {:>14} {:>5} {:<12} {:>14} {}",
                    l.loan_number,
                    l.member_id,
                    format_amount(l.principal),
                    l.term_months,
                    l.interest_method,
                    format_amount(l.outstanding_principal),
                    l.status
                );
            }
        }
        LoanCommand::Show { loan, as_of } => {
            session.require(Permission::ViewMembers)?;
            let loan = resolve_loan(conn, &loan)?;
            let balance = loan_balance(conn, loan.id, as_of.unwrap_or_else(today))?;
            println!("{}  {}  ({})", loan.loan_number, loan.purpose, loan.status);
            println!("  Applied:          {}", loan.applied_on);
            if let Some(by) = &loan.approved_by {
                println!("  Approved by:      {}", by);
            }
            if let Some(on) = loan.released_on {
                println!("  Released:         {}", on);
            }
            println!("  Outstanding:      {:>14}", format_amount(balance.outstanding_principal));
            println!("  Unpaid interest:  {:>14}", format_amount(balance.unpaid_interest));
            if let Some(next) = &balance.next_due {
                println!("  Next due:         {} ({})", next.due_date, format_amount(next.remaining()));
            }
            if balance.overdue_installments > 0 {
                println!(
                    "  ⚠️  {} installment(s) overdue: {}",
                    balance.overdue_installments,
                    format_amount(balance.overdue_amount)
                );
            }
        }
    }
    Ok(())
}

// ============================================================================
// INTEREST & DORMANCY
// ============================================================================

fn run_interest(conn: &Connection, session: &Session, cmd: InterestCommand) -> Result<()> {
    match cmd {
        InterestCommand::Accrue { period } => {
            session.require(Permission::RunInterest)?;
            let summary = accrue_interest(conn, period.unwrap_or_else(last_month), session.username())?;
            println!(
                "✓ Interest for {}: {} account(s) credited, total {}",
                summary.period,
                summary.posted.len(),
                format_amount(summary.total())
            );
            println!(
                "  {} already credited, {} below minimum balance",
                summary.already_credited, summary.below_minimum
            );
            if summary.not_yet_open + summary.posted_after_period > 0 {
                println!(
                    "  {} opened after the period, {} with postings after month end",
                    summary.not_yet_open, summary.posted_after_period
                );
            }
        }
        InterestCommand::Settings => {
            session.require(Permission::ViewReports)?;
            print_settings(conn)?;
        }
        InterestCommand::Set { rate, min_balance, maintaining_balance, dormancy_months } => {
            session.require(Permission::ManageSettings)?;
            update_interest_settings(
                conn,
                &SettingsUpdate {
                    annual_rate: rate,
                    min_balance_for_interest: min_balance,
                    maintaining_balance,
                    dormancy_months,
                },
                session.username(),
            )?;
            println!("✓ Settings updated");
            print_settings(conn)?;
        }
    }
    Ok(())
}

fn print_settings(conn: &Connection) -> Result<()> {
    let s = get_interest_settings(conn)?;
    println!("  Annual rate:          {}%", s.annual_rate * Decimal::ONE_HUNDRED);
    println!("  Min balance (interest): {}", format_amount(s.min_balance_for_interest));
    println!("  Maintaining balance:  {}", format_amount(s.maintaining_balance));
    println!("  Dormant after:        {} months", s.dormancy_months);
    println!("  Last changed by {} at {}", s.updated_by, s.updated_at);
    Ok(())
}

fn run_dormant(conn: &Connection, session: &Session, cmd: DormantCommand) -> Result<()> {
    match cmd {
        DormantCommand::Scan { as_of } => {
            session.require(Permission::RunInterest)?;
            let flagged = scan_dormant_accounts(conn, as_of.unwrap_or_else(today), session.username())?;
            for a in &flagged {
                println!("  {}  last activity {}  {}", a.account_number, a.last_activity, format_amount(a.balance));
            }
            println!("✓ {} account(s) flagged dormant", flagged.len());
        }
        DormantCommand::List { all } => {
            session.require(Permission::ViewReports)?;
            for d in list_dormant_accounts(conn, !all)? {
                println!(
                    "  {}  flagged {}  last activity {}  {:>14}  {}",
                    d.account_number,
                    d.flagged_on,
                    d.last_activity,
                    format_amount(d.balance),
                    d.reactivated_on
                        .map(|r| format!("reactivated {}", r))
                        .unwrap_or_else(|| "dormant".to_string())
                );
            }
        }
    }
    Ok(())
}

// ============================================================================
// REPORTS
// ============================================================================

fn run_reconcile(conn: &Connection, session: &Session) -> Result<()> {
    session.require(Permission::ViewReports)?;
    let report = ReconciliationEngine::new().reconcile_all(conn)?;

    println!("⚖️  {}", report.summary());
    println!(
        "  Journals: debits {}  credits {}",
        format_amount(report.total_debits),
        format_amount(report.total_credits)
    );
    for check in &report.controls {
        println!(
            "  {} {}: ledger {}  subsidiary {}",
            if check.matches() { "✓" } else { "✗" },
            check.account,
            format_amount(check.ledger_balance),
            format_amount(check.subsidiary_total)
        );
    }
    for d in report.discrepancies() {
        println!("  ✗ {:?} {}: {}", d.category, d.subject, d.description);
    }

    if !report.is_clean() {
        bail!("reconciliation found discrepancies");
    }
    println!("✅ Books reconcile");
    Ok(())
}

fn run_export(conn: &Connection, session: &Session, cmd: ExportCommand) -> Result<()> {
    session.require(Permission::ViewReports)?;

    let (rows, out) = match cmd {
        ExportCommand::Schedule { loan, out } => {
            let loan = resolve_loan(conn, &loan)?;
            (export_schedule_to_file(conn, loan.id, &out)?, out)
        }
        ExportCommand::Statement { account, out } => {
            let account = resolve_account(conn, &account)?;
            (export_statement_to_file(conn, account.id, &out)?, out)
        }
        ExportCommand::Members { out } => (export_members_to_file(conn, &out)?, out),
    };

    println!("✓ {} row(s) written to {}", rows, out.display());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(conn: &Connection) -> Result<()> {
    let mut app = ui::App::load(conn)?;
    ui::run_ui(conn, &mut app)
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_conn: &Connection) -> Result<()> {
    bail!("TUI mode not available; rebuild with --features tui")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_posting_amounts() {
        let cli = Cli::try_parse_from([
            "coop-records", "--user", "teller1", "savings", "deposit", "SA-000001", "1,500.50",
            "--reference", "OR-7",
        ])
        .unwrap();

        match cli.command {
            Commands::Savings(SavingsCommand::Deposit(args)) => {
                assert_eq!(args.target, "SA-000001");
                assert_eq!(args.amount, Decimal::new(150050, 2));
                assert_eq!(args.reference, "OR-7");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.user.as_deref(), Some("teller1"));
    }

    #[test]
    fn test_parses_loan_application() {
        let cli = Cli::try_parse_from([
            "coop-records", "loan", "apply", "M-000001", "20000", "--rate", "12%", "--term", "12",
            "--method", "diminishing", "--purpose", "Tricycle",
        ])
        .unwrap();

        match cli.command {
            Commands::Loan(LoanCommand::Apply(args)) => {
                assert_eq!(args.rate, Decimal::new(12, 2));
                assert_eq!(args.method, InterestMethod::Diminishing);
                assert_eq!(args.term, 12);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_settings_accept_zero_balance() {
        let cli = Cli::try_parse_from([
            "coop-records", "interest", "set", "--maintaining-balance", "0", "--min-balance", "1,000",
        ])
        .unwrap();

        match cli.command {
            Commands::Interest(InterestCommand::Set { min_balance, maintaining_balance, .. }) => {
                assert_eq!(maintaining_balance, Some(Decimal::ZERO));
                assert_eq!(min_balance, Some(Decimal::new(1000, 0)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_amount() {
        let result = Cli::try_parse_from(["coop-records", "savings", "withdraw", "SA-000001", "0"]);
        assert!(result.is_err());
    }
}
