//! Application configuration loading.
//!
//! Configuration is read from a TOML file (every section optional) with
//! `.env` / environment overrides for the database location.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "coop.toml";
pub const DB_PATH_ENV: &str = "COOP_DB_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub savings: SavingsConfig,
    #[serde(default)]
    pub loans: LoanPolicy,
}

impl Config {
    /// Load configuration from `path` (or `coop.toml` in the working directory).
    ///
    /// A missing default file yields the built-in defaults; a missing file that
    /// was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            if !db_path.trim().is_empty() {
                config.database.path = PathBuf::from(db_path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.savings.annual_rate < Decimal::ZERO || self.savings.annual_rate > Decimal::ONE {
            return Err(Error::Config(format!(
                "savings.annual_rate must be between 0 and 1, got {}",
                self.savings.annual_rate
            )));
        }
        if self.savings.dormancy_months == 0 {
            return Err(Error::Config("savings.dormancy_months must be at least 1".into()));
        }
        if self.loans.rlpf_rate < Decimal::ZERO || self.loans.service_charge_rate < Decimal::ZERO {
            return Err(Error::Config("loan deduction rates cannot be negative".into()));
        }
        if self.loans.max_term_months == 0 {
            return Err(Error::Config("loans.max_term_months must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("coop.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Seed values for the `interest_settings` row written by `init`.
#[derive(Debug, Clone, Deserialize)]
pub struct SavingsConfig {
    #[serde(default = "default_savings_rate")]
    pub annual_rate: Decimal,
    #[serde(default = "default_min_balance_for_interest")]
    pub min_balance_for_interest: Decimal,
    #[serde(default = "default_maintaining_balance")]
    pub maintaining_balance: Decimal,
    #[serde(default = "default_dormancy_months")]
    pub dormancy_months: u32,
}

fn default_savings_rate() -> Decimal {
    Decimal::new(2, 2) // 2% p.a.
}

fn default_min_balance_for_interest() -> Decimal {
    Decimal::from(500)
}

fn default_maintaining_balance() -> Decimal {
    Decimal::from(100)
}

fn default_dormancy_months() -> u32 {
    24
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            annual_rate: default_savings_rate(),
            min_balance_for_interest: default_min_balance_for_interest(),
            maintaining_balance: default_maintaining_balance(),
            dormancy_months: default_dormancy_months(),
        }
    }
}

/// Loan origination policy.
#[derive(Debug, Clone, Deserialize)]
pub struct LoanPolicy {
    /// RLPF rate per year of term (0.01 = 1% of principal per year).
    #[serde(default = "default_rlpf_rate")]
    pub rlpf_rate: Decimal,
    /// One-time service charge as a fraction of principal.
    #[serde(default = "default_service_charge_rate")]
    pub service_charge_rate: Decimal,
    /// Principal may not exceed this multiple of the member's savings (0 disables).
    #[serde(default = "default_max_loan_to_savings_ratio")]
    pub max_loan_to_savings_ratio: Decimal,
    #[serde(default = "default_max_term_months")]
    pub max_term_months: u32,
}

fn default_rlpf_rate() -> Decimal {
    Decimal::new(1, 2)
}

fn default_service_charge_rate() -> Decimal {
    Decimal::new(2, 2)
}

fn default_max_loan_to_savings_ratio() -> Decimal {
    Decimal::from(3)
}

fn default_max_term_months() -> u32 {
    60
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            rlpf_rate: default_rlpf_rate(),
            service_charge_rate: default_service_charge_rate(),
            max_loan_to_savings_ratio: default_max_loan_to_savings_ratio(),
            max_term_months: default_max_term_months(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl LoggingConfig {
    /// Initialize the tracing subscriber; `RUST_LOG` wins over the configured level.
    ///
    /// Logs go to stderr so command output on stdout stays clean.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                let _ = fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
            _ => {
                let _ = fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.database.path, PathBuf::from("coop.db"));
        assert_eq!(config.savings.annual_rate, dec!(0.02));
        assert_eq!(config.loans.max_term_months, 60);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [database]
            path = "/var/lib/coop/records.db"

            [loans]
            rlpf_rate = "0.015"
            max_term_months = 36
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/var/lib/coop/records.db"));
        assert_eq!(config.loans.rlpf_rate, dec!(0.015));
        assert_eq!(config.loans.max_term_months, 36);
        assert_eq!(config.loans.service_charge_rate, dec!(0.02));
        assert_eq!(config.savings.dormancy_months, 24);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config::from_toml("[savings]\nannual_rate = \"1.5\"\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config::from_toml("[savings]\ndormancy_months = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        assert!(matches!(Config::from_toml("[database"), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\nformat = \"json\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::from_file(Path::new("/nonexistent/coop.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
