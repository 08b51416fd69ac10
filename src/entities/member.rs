// 👥 Member Registry - the people who own the cooperative
//
// Member code (M-000001) is the identity printed on passbooks and forms;
// the integer id is the foreign key everything else points at.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::db::{next_code, record_event};
use crate::error::{Error, Result};
use crate::money::get_parsed;
use crate::validation::validate_member;

// ============================================================================
// MEMBER STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// In good standing - may save and borrow
    Active,

    /// Temporarily inactive (e.g. unpaid share capital) - may save, may not borrow
    Inactive,

    /// Left the cooperative - no new accounts or loans
    Withdrawn,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "Active",
            MemberStatus::Inactive => "Inactive",
            MemberStatus::Withdrawn => "Withdrawn",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(MemberStatus::Active),
            "inactive" => Ok(MemberStatus::Inactive),
            "withdrawn" => Ok(MemberStatus::Withdrawn),
            other => Err(format!("unknown member status '{}'", other)),
        }
    }
}

// ============================================================================
// MEMBER ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub member_code: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub address: String,
    pub contact_number: String,
    pub email: Option<String>,
    pub join_date: NaiveDate,
    pub status: MemberStatus,
}

impl Member {
    /// "Dela Cruz, Maria S."
    pub fn display_name(&self) -> String {
        match self.middle_name.as_deref().and_then(|m| m.chars().next()) {
            Some(initial) => format!("{}, {} {}.", self.last_name, self.first_name, initial),
            None => format!("{}, {}", self.last_name, self.first_name),
        }
    }

    pub fn can_borrow(&self) -> bool {
        self.status == MemberStatus::Active
    }

    pub fn can_open_account(&self) -> bool {
        self.status != MemberStatus::Withdrawn
    }
}

/// Form data for registering a member
#[derive(Debug, Clone)]
pub struct NewMember {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub address: String,
    pub contact_number: String,
    pub email: Option<String>,
    pub join_date: NaiveDate,
}

/// Editable contact details; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct MemberUpdate {
    pub address: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
}

const MEMBER_COLUMNS: &str = "id, member_code, first_name, middle_name, last_name, birth_date,
    address, contact_number, email, join_date, status";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        member_code: row.get(1)?,
        first_name: row.get(2)?,
        middle_name: row.get(3)?,
        last_name: row.get(4)?,
        birth_date: row.get(5)?,
        address: row.get(6)?,
        contact_number: row.get(7)?,
        email: row.get(8)?,
        join_date: row.get(9)?,
        status: get_parsed(row, 10)?,
    })
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn create_member(conn: &Connection, new: &NewMember, actor: &str) -> Result<Member> {
    validate_member(new).map_err(Error::Validation)?;

    let code = next_code(conn, "members", "M")?;
    let email = new.email.as_ref().map(|e| e.trim().to_lowercase());

    conn.execute(
        "INSERT INTO members (
            member_code, first_name, middle_name, last_name, birth_date,
            address, contact_number, email, join_date, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            code,
            new.first_name.trim(),
            new.middle_name.as_deref().map(str::trim),
            new.last_name.trim(),
            new.birth_date,
            new.address.trim(),
            new.contact_number.trim(),
            email,
            new.join_date,
            MemberStatus::Active.as_str(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(
        conn,
        "member_registered",
        "member",
        id,
        serde_json::json!({ "member_code": code }),
        actor,
    )?;
    info!(member_code = %code, "member registered");

    get_member(conn, id)
}

pub fn get_member(conn: &Connection, id: i64) -> Result<Member> {
    conn.query_row(
        &format!("SELECT {} FROM members WHERE id = ?1", MEMBER_COLUMNS),
        [id],
        member_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("member", id))
}

pub fn find_member_by_code(conn: &Connection, code: &str) -> Result<Member> {
    conn.query_row(
        &format!("SELECT {} FROM members WHERE member_code = ?1", MEMBER_COLUMNS),
        [code.trim().to_uppercase()],
        member_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("member", code))
}

/// Resolve either a numeric id ("12") or a member code ("M-000012")
pub fn resolve_member(conn: &Connection, key: &str) -> Result<Member> {
    match key.trim().parse::<i64>() {
        Ok(id) => get_member(conn, id),
        Err(_) => find_member_by_code(conn, key),
    }
}

pub fn list_members(conn: &Connection) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM members ORDER BY last_name, first_name, id",
        MEMBER_COLUMNS
    ))?;

    let members = stmt
        .query_map([], member_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(members)
}

/// Case-insensitive search over names and member code
pub fn search_members(conn: &Connection, query: &str) -> Result<Vec<Member>> {
    let pattern = format!("%{}%", query.trim().to_lowercase());
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM members
         WHERE lower(first_name) LIKE ?1
            OR lower(last_name) LIKE ?1
            OR lower(first_name || ' ' || last_name) LIKE ?1
            OR lower(member_code) LIKE ?1
         ORDER BY last_name, first_name, id",
        MEMBER_COLUMNS
    ))?;

    let members = stmt
        .query_map([pattern], member_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(members)
}

pub fn update_member(conn: &Connection, id: i64, update: &MemberUpdate, actor: &str) -> Result<Member> {
    let current = get_member(conn, id)?;

    let candidate = NewMember {
        first_name: current.first_name.clone(),
        middle_name: current.middle_name.clone(),
        last_name: current.last_name.clone(),
        birth_date: current.birth_date,
        address: update.address.clone().unwrap_or(current.address.clone()),
        contact_number: update
            .contact_number
            .clone()
            .unwrap_or(current.contact_number.clone()),
        email: update.email.clone().or(current.email.clone()),
        join_date: current.join_date,
    };
    validate_member(&candidate).map_err(Error::Validation)?;

    conn.execute(
        "UPDATE members SET address = ?1, contact_number = ?2, email = ?3 WHERE id = ?4",
        params![
            candidate.address.trim(),
            candidate.contact_number.trim(),
            candidate.email.as_ref().map(|e| e.trim().to_lowercase()),
            id
        ],
    )?;

    record_event(
        conn,
        "member_updated",
        "member",
        id,
        serde_json::json!({
            "address": update.address,
            "contact_number": update.contact_number,
            "email": update.email,
        }),
        actor,
    )?;

    get_member(conn, id)
}

pub fn set_member_status(conn: &Connection, id: i64, status: MemberStatus, actor: &str) -> Result<Member> {
    let current = get_member(conn, id)?;

    if current.status == MemberStatus::Withdrawn && status != MemberStatus::Withdrawn {
        return Err(Error::InvalidTransition {
            entity: format!("member {}", current.member_code),
            from: current.status.to_string(),
            to: status.to_string(),
        });
    }

    conn.execute(
        "UPDATE members SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;

    record_event(
        conn,
        "member_status_changed",
        "member",
        id,
        serde_json::json!({ "from": current.status.as_str(), "to": status.as_str() }),
        actor,
    )?;
    info!(member_code = %current.member_code, from = %current.status, to = %status, "member status changed");

    get_member(conn, id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::setup_database;

    pub(crate) fn sample_member(first: &str, last: &str) -> NewMember {
        NewMember {
            first_name: first.to_string(),
            middle_name: Some("Reyes".to_string()),
            last_name: last.to_string(),
            birth_date: NaiveDate::from_ymd_opt(1980, 6, 1),
            address: "Brgy. Poblacion".to_string(),
            contact_number: "0917 555 0000".to_string(),
            email: None,
            join_date: NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
        }
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_create_member_assigns_code() {
        let conn = setup();

        let first = create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();
        let second = create_member(&conn, &sample_member("Ana", "Reyes"), "clerk").unwrap();

        assert_eq!(first.member_code, "M-000001");
        assert_eq!(second.member_code, "M-000002");
        assert_eq!(first.status, MemberStatus::Active);
        assert_eq!(first.display_name(), "Santos, Juan R.");
    }

    #[test]
    fn test_create_member_rejects_invalid_form() {
        let conn = setup();
        let mut form = sample_member("", "Santos");
        form.email = Some("nope".to_string());

        match create_member(&conn, &form, "clerk") {
            Err(Error::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_by_id_and_code() {
        let conn = setup();
        let member = create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();

        assert_eq!(resolve_member(&conn, "1").unwrap().id, member.id);
        assert_eq!(resolve_member(&conn, "m-000001").unwrap().id, member.id);
        assert!(matches!(resolve_member(&conn, "M-999999"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_search_members() {
        let conn = setup();
        create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();
        create_member(&conn, &sample_member("Ana", "Reyes"), "clerk").unwrap();
        create_member(&conn, &sample_member("Juana", "Bautista"), "clerk").unwrap();

        let found = search_members(&conn, "JUAN").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].last_name, "Bautista");

        assert_eq!(search_members(&conn, "juan santos").unwrap().len(), 1);
        assert_eq!(search_members(&conn, "000002").unwrap()[0].first_name, "Ana");
    }

    #[test]
    fn test_update_member_contact_details() {
        let conn = setup();
        let member = create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();

        let update = MemberUpdate {
            email: Some("Juan@Example.com".to_string()),
            ..Default::default()
        };
        let updated = update_member(&conn, member.id, &update, "clerk").unwrap();

        assert_eq!(updated.email.as_deref(), Some("juan@example.com"));
        assert_eq!(updated.address, member.address);
    }

    #[test]
    fn test_withdrawn_member_cannot_be_reactivated() {
        let conn = setup();
        let member = create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();

        let withdrawn = set_member_status(&conn, member.id, MemberStatus::Withdrawn, "manager").unwrap();
        assert!(!withdrawn.can_open_account());
        assert!(!withdrawn.can_borrow());

        let result = set_member_status(&conn, member.id, MemberStatus::Active, "manager");
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn test_member_events_recorded() {
        let conn = setup();
        let member = create_member(&conn, &sample_member("Juan", "Santos"), "clerk").unwrap();
        set_member_status(&conn, member.id, MemberStatus::Inactive, "manager").unwrap();

        let events = crate::db::get_events_for_entity(&conn, "member", &member.id.to_string()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "member_status_changed");
        assert_eq!(events[1].actor, "clerk");
    }
}
