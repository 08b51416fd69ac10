use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::config::SavingsConfig;
use crate::error::Result;
use crate::money::to_sql_text;

/// Tables that `table_count` is allowed to look at
pub const TABLES: &[&str] = &[
    "users",
    "user_permissions",
    "members",
    "savings_accounts",
    "transactions",
    "journals",
    "loans",
    "loan_amortization",
    "interest_settings",
    "dormant_accounts",
    "events",
];

/// Event for the audit trail - every state change on the books leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Open (or create) the single-file database and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases silently stay in "memory" mode
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Users & permissions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            last_login TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_permissions (
            user_id INTEGER NOT NULL REFERENCES users(id),
            permission TEXT NOT NULL,
            granted_by TEXT NOT NULL,
            granted_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id, permission)
        )",
        [],
    )?;

    // ==========================================================================
    // Members & savings
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_code TEXT UNIQUE NOT NULL,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            birth_date TEXT,
            address TEXT NOT NULL,
            contact_number TEXT NOT NULL,
            email TEXT,
            join_date TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS savings_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_number TEXT UNIQUE NOT NULL,
            member_id INTEGER NOT NULL REFERENCES members(id),
            balance TEXT NOT NULL,
            status TEXT NOT NULL,
            opened_on TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            closed_on TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS interest_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            annual_rate TEXT NOT NULL,
            min_balance_for_interest TEXT NOT NULL,
            maintaining_balance TEXT NOT NULL,
            dormancy_months INTEGER NOT NULL,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dormant_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES savings_accounts(id),
            flagged_on TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            balance TEXT NOT NULL,
            reactivated_on TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Loans
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS loans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            loan_number TEXT UNIQUE NOT NULL,
            member_id INTEGER NOT NULL REFERENCES members(id),
            principal TEXT NOT NULL,
            annual_rate TEXT NOT NULL,
            term_months INTEGER NOT NULL,
            interest_method TEXT NOT NULL,
            rlpf TEXT NOT NULL,
            service_charge TEXT NOT NULL,
            net_proceeds TEXT NOT NULL,
            outstanding_principal TEXT NOT NULL,
            status TEXT NOT NULL,
            purpose TEXT NOT NULL,
            applied_on TEXT NOT NULL,
            approved_by TEXT,
            released_on TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS loan_amortization (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            loan_id INTEGER NOT NULL REFERENCES loans(id),
            installment INTEGER NOT NULL,
            due_date TEXT NOT NULL,
            principal TEXT NOT NULL,
            interest TEXT NOT NULL,
            amount_due TEXT NOT NULL,
            principal_paid TEXT NOT NULL DEFAULT '0',
            interest_paid TEXT NOT NULL DEFAULT '0',
            balance_after TEXT NOT NULL,
            UNIQUE(loan_id, installment)
        )",
        [],
    )?;

    // ==========================================================================
    // Ledger: account transactions + general-ledger journal lines
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_uuid TEXT UNIQUE NOT NULL,
            account_kind TEXT NOT NULL,
            account_id INTEGER NOT NULL,
            member_id INTEGER NOT NULL REFERENCES members(id),
            tx_type TEXT NOT NULL,
            amount TEXT NOT NULL,
            balance_after TEXT NOT NULL,
            tx_date TEXT NOT NULL,
            reference TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS journals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_id INTEGER NOT NULL REFERENCES transactions(id),
            entry_date TEXT NOT NULL,
            gl_account TEXT NOT NULL,
            debit TEXT NOT NULL,
            credit TEXT NOT NULL,
            memo TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_members_name ON members(last_name, first_name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_savings_member ON savings_accounts(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_loans_member ON loans(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tx_account ON transactions(account_kind, account_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_journals_tx ON journals(tx_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    seed_interest_settings(conn, &SavingsConfig::default())?;

    debug!("schema verified");
    Ok(())
}

/// Write the interest settings row if it does not exist yet
pub fn seed_interest_settings(conn: &Connection, savings: &SavingsConfig) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO interest_settings (
            id, annual_rate, min_balance_for_interest, maintaining_balance,
            dormancy_months, updated_by, updated_at
        ) VALUES (1, ?1, ?2, ?3, ?4, 'system', ?5)",
        params![
            to_sql_text(savings.annual_rate),
            to_sql_text(savings.min_balance_for_interest),
            to_sql_text(savings.maintaining_balance),
            savings.dormancy_months,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(inserted > 0)
}

/// Next human-readable code for a table: `M-000001`, `SA-000002`, ...
pub(crate) fn next_code(conn: &Connection, table: &str, prefix: &str) -> Result<String> {
    let next: i64 = conn.query_row(
        &format!("SELECT COALESCE(MAX(id), 0) + 1 FROM {}", table),
        [],
        |row| row.get(0),
    )?;
    Ok(format!("{}-{:06}", prefix, next))
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Shorthand used by every mutating operation
pub(crate) fn record_event(
    conn: &Connection,
    event_type: &str,
    entity_type: &str,
    entity_id: impl ToString,
    data: serde_json::Value,
    actor: &str,
) -> Result<()> {
    let event = Event::new(event_type, entity_type, &entity_id.to_string(), data, actor);
    insert_event(conn, &event)
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Row count of one of the known tables
pub fn table_count(conn: &Connection, table: &str) -> Result<i64> {
    if !TABLES.contains(&table) {
        return Err(crate::error::Error::not_found("table", table));
    }
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        for table in TABLES {
            assert_eq!(table_count(&conn, table).unwrap(), if *table == "interest_settings" { 1 } else { 0 });
        }
    }

    #[test]
    fn test_seed_interest_settings_only_once() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let inserted = seed_interest_settings(&conn, &SavingsConfig::default()).unwrap();
        assert!(!inserted, "setup_database already seeded the row");
        assert_eq!(table_count(&conn, "interest_settings").unwrap(), 1);
    }

    #[test]
    fn test_table_count_rejects_unknown_table() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert!(table_count(&conn, "sqlite_master; DROP TABLE users").is_err());
    }

    #[test]
    fn test_next_code() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(next_code(&conn, "members", "M").unwrap(), "M-000001");
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "test_event",
            "member",
            "42",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();
        record_event(&conn, "second_event", "member", 42, serde_json::json!({}), "clerk").unwrap();

        let events = get_events_for_entity(&conn, "member", "42").unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "second_event");
        assert_eq!(events[1].event_type, "test_event");
        assert_eq!(events[1].actor, "test_actor");
        assert_eq!(events[1].data["test"], "data");
    }

    #[test]
    fn test_open_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coop.db");

        {
            let conn = open_database(&path).unwrap();
            record_event(&conn, "opened", "database", "1", serde_json::json!({}), "test").unwrap();
        }

        let conn = open_database(&path).unwrap();
        assert_eq!(table_count(&conn, "events").unwrap(), 1);
    }
}
