// 🚨 Errors - one taxonomy for every records operation

use rust_decimal::Decimal;
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds in {account}: balance {balance}, requested {requested}, maintaining balance {maintaining}")]
    InsufficientFunds {
        account: String,
        balance: Decimal,
        requested: Decimal,
        maintaining: Decimal,
    },

    #[error("account {0} is dormant")]
    AccountDormant(String),

    #[error("account {0} is closed")]
    AccountClosed(String),

    #[error("member {0} is not active")]
    MemberInactive(String),

    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("loan limit exceeded: requested {requested}, allowed {allowed}")]
    LoanLimitExceeded { requested: Decimal, allowed: Decimal },

    #[error("payment of {paid} exceeds remaining due of {remaining}")]
    Overpayment { paid: Decimal, remaining: Decimal },

    #[error("permission denied: {0} is required")]
    PermissionDenied(String),

    #[error("invalid username or password")]
    AuthenticationFailed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
