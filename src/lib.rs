// Cooperative Records - Core Library
// Exposes all modules for use in CLI, TUI, API server, and tests

pub mod error;
pub mod config;
pub mod money;
pub mod db;
pub mod validation;
pub mod entities;
pub mod auth;
pub mod amortization;
pub mod ledger;
pub mod interest;
pub mod loans;
pub mod reconciliation;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use config::{Config, LoanPolicy, LoggingConfig, SavingsConfig};
pub use db::{open_database, setup_database, Event, insert_event, get_events_for_entity};
pub use validation::{ValidationError, ValidationResult};
pub use entities::{
    Member, MemberStatus, MemberUpdate, NewMember,
    SavingsAccount, AccountStatus,
    Loan, LoanStatus, Installment,
    User, NewUser, Role, Permission,
};
pub use auth::{authenticate, bootstrap_admin, Session};
pub use amortization::{
    compute_schedule, AmortizationRow, AmortizationSchedule, Deductions, InterestMethod, LoanTerms,
};
pub use ledger::{GlAccount, JournalLine, LedgerTransaction, TrialBalance, TxType};
pub use interest::{AccrualSummary, DormantRecord, InterestSettings, SettingsUpdate};
pub use loans::{LoanApplication, LoanBalance, PaymentReceipt};
pub use reconciliation::{
    AccountReconciliation, ControlCheck, Discrepancy, DiscrepancyCategory,
    ReconciliationEngine, ReconciliationReport, ReconciliationResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
