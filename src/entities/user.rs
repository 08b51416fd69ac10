// 🔑 Users, Roles & Permissions
//
// Effective permissions = role defaults ∪ explicit grants.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::auth::{generate_salt, hash_password};
use crate::db::record_event;
use crate::error::{Error, Result};
use crate::money::get_parsed;
use crate::validation::{validate_new_user, validate_password};

// ============================================================================
// PERMISSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    ManageUsers,
    ManageMembers,
    ViewMembers,
    PostTransactions,
    ManageLoans,
    ApproveLoans,
    ReleaseLoans,
    RunInterest,
    ManageSettings,
    ViewReports,
}

impl Permission {
    pub const ALL: [Permission; 10] = [
        Permission::ManageUsers,
        Permission::ManageMembers,
        Permission::ViewMembers,
        Permission::PostTransactions,
        Permission::ManageLoans,
        Permission::ApproveLoans,
        Permission::ReleaseLoans,
        Permission::RunInterest,
        Permission::ManageSettings,
        Permission::ViewReports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "manage_users",
            Permission::ManageMembers => "manage_members",
            Permission::ViewMembers => "view_members",
            Permission::PostTransactions => "post_transactions",
            Permission::ManageLoans => "manage_loans",
            Permission::ApproveLoans => "approve_loans",
            Permission::ReleaseLoans => "release_loans",
            Permission::RunInterest => "run_interest",
            Permission::ManageSettings => "manage_settings",
            Permission::ViewReports => "view_reports",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Manager,
    Teller,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Manager => "Manager",
            Role::Teller => "Teller",
            Role::Viewer => "Viewer",
        }
    }

    pub fn default_permissions(&self) -> BTreeSet<Permission> {
        use Permission::*;

        let perms: &[Permission] = match self {
            Role::Admin => &Permission::ALL,
            Role::Manager => &[
                ManageMembers,
                ViewMembers,
                PostTransactions,
                ManageLoans,
                ApproveLoans,
                ReleaseLoans,
                RunInterest,
                ManageSettings,
                ViewReports,
            ],
            Role::Teller => &[ManageMembers, ViewMembers, PostTransactions, ManageLoans, ViewReports],
            Role::Viewer => &[ViewMembers, ViewReports],
        };

        perms.iter().copied().collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "teller" => Ok(Role::Teller),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

// ============================================================================
// USER ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub salt: String,
    pub active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub password: String,
}

const USER_COLUMNS: &str = "id, username, full_name, role, password_hash, salt, active, last_login";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        role: get_parsed(row, 3)?,
        password_hash: row.get(4)?,
        salt: row.get(5)?,
        active: row.get(6)?,
        last_login: row.get(7)?,
    })
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn create_user(conn: &Connection, new: &NewUser, actor: &str) -> Result<User> {
    validate_new_user(new).map_err(Error::Validation)?;

    let username = new.username.trim().to_lowercase();
    if find_user(conn, &username)?.is_some() {
        return Err(Error::Validation(vec![crate::validation::ValidationError {
            field: "username".to_string(),
            message: format!("'{}' is already taken", username),
            context: "User".to_string(),
        }]));
    }

    let salt = generate_salt();
    let hash = hash_password(&new.password, &salt);

    conn.execute(
        "INSERT INTO users (username, full_name, role, password_hash, salt, active)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![username, new.full_name.trim(), new.role.as_str(), hash, salt],
    )?;
    let id = conn.last_insert_rowid();

    record_event(
        conn,
        "user_created",
        "user",
        id,
        serde_json::json!({ "username": username, "role": new.role.as_str() }),
        actor,
    )?;
    info!(username = %username, role = %new.role, "user created");

    get_user(conn, id)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("user", id))
}

pub fn find_user(conn: &Connection, username: &str) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            [username.trim().to_lowercase()],
            user_from_row,
        )
        .optional()?)
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<User> {
    find_user(conn, username)?.ok_or_else(|| Error::not_found("user", username))
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS))?;
    let users = stmt
        .query_map([], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

pub fn set_active(conn: &Connection, user_id: i64, active: bool, actor: &str) -> Result<User> {
    let user = get_user(conn, user_id)?;
    conn.execute(
        "UPDATE users SET active = ?1 WHERE id = ?2",
        params![active, user_id],
    )?;

    record_event(
        conn,
        if active { "user_activated" } else { "user_deactivated" },
        "user",
        user_id,
        serde_json::json!({ "username": user.username }),
        actor,
    )?;
    info!(username = %user.username, active, "user activation changed");

    get_user(conn, user_id)
}

pub fn change_password(conn: &Connection, user_id: i64, new_password: &str, actor: &str) -> Result<()> {
    validate_password(new_password).map_err(Error::Validation)?;
    let user = get_user(conn, user_id)?;

    let salt = generate_salt();
    let hash = hash_password(new_password, &salt);
    conn.execute(
        "UPDATE users SET password_hash = ?1, salt = ?2 WHERE id = ?3",
        params![hash, salt, user_id],
    )?;

    record_event(
        conn,
        "password_changed",
        "user",
        user_id,
        serde_json::json!({ "username": user.username }),
        actor,
    )?;
    Ok(())
}

pub(crate) fn touch_last_login(conn: &Connection, user_id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE users SET last_login = ?1 WHERE id = ?2",
        params![at, user_id],
    )?;
    Ok(())
}

// ============================================================================
// PERMISSIONS
// ============================================================================

pub fn granted_permissions(conn: &Connection, user_id: i64) -> Result<BTreeSet<Permission>> {
    let mut stmt = conn.prepare("SELECT permission FROM user_permissions WHERE user_id = ?1")?;
    let perms = stmt
        .query_map([user_id], |row| get_parsed::<Permission>(row, 0))?
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(perms)
}

pub fn effective_permissions(conn: &Connection, user: &User) -> Result<BTreeSet<Permission>> {
    let mut perms = user.role.default_permissions();
    perms.extend(granted_permissions(conn, user.id)?);
    Ok(perms)
}

/// Grant an extra permission; granting twice is a no-op
pub fn grant_permission(conn: &Connection, user_id: i64, permission: Permission, actor: &str) -> Result<bool> {
    get_user(conn, user_id)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO user_permissions (user_id, permission, granted_by) VALUES (?1, ?2, ?3)",
        params![user_id, permission.as_str(), actor],
    )?;

    if inserted > 0 {
        record_event(
            conn,
            "permission_granted",
            "user",
            user_id,
            serde_json::json!({ "permission": permission.as_str() }),
            actor,
        )?;
    }
    Ok(inserted > 0)
}

/// Revoke an explicit grant (role defaults are not affected)
pub fn revoke_permission(conn: &Connection, user_id: i64, permission: Permission, actor: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM user_permissions WHERE user_id = ?1 AND permission = ?2",
        params![user_id, permission.as_str()],
    )?;

    if removed > 0 {
        record_event(
            conn,
            "permission_revoked",
            "user",
            user_id,
            serde_json::json!({ "permission": permission.as_str() }),
            actor,
        )?;
    }
    Ok(removed > 0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::setup_database;

    pub(crate) fn sample_user(username: &str, role: Role) -> NewUser {
        NewUser {
            username: username.to_string(),
            full_name: format!("{} Test", username),
            role,
            password: "passw0rd-123".to_string(),
        }
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_role_defaults() {
        assert_eq!(Role::Admin.default_permissions().len(), Permission::ALL.len());
        assert!(!Role::Manager.default_permissions().contains(&Permission::ManageUsers));
        assert!(Role::Teller.default_permissions().contains(&Permission::PostTransactions));
        assert!(!Role::Teller.default_permissions().contains(&Permission::ApproveLoans));
        assert_eq!(Role::Viewer.default_permissions().len(), 2);
    }

    #[test]
    fn test_permission_parsing() {
        assert_eq!("approve-loans".parse::<Permission>().unwrap(), Permission::ApproveLoans);
        assert_eq!("VIEW_REPORTS".parse::<Permission>().unwrap(), Permission::ViewReports);
        assert!("launch_rockets".parse::<Permission>().is_err());
    }

    #[test]
    fn test_create_user_hashes_password() {
        let conn = setup();
        let user = create_user(&conn, &sample_user("Teller1", Role::Teller), "admin").unwrap();

        assert_eq!(user.username, "teller1");
        assert_ne!(user.password_hash, "passw0rd-123");
        assert_eq!(user.salt.len(), 32);
        assert!(user.active);
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let conn = setup();
        create_user(&conn, &sample_user("teller1", Role::Teller), "admin").unwrap();

        let result = create_user(&conn, &sample_user("TELLER1", Role::Viewer), "admin");
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(count_users(&conn).unwrap(), 1);
    }

    #[test]
    fn test_grant_and_revoke() {
        let conn = setup();
        let user = create_user(&conn, &sample_user("teller1", Role::Teller), "admin").unwrap();

        assert!(!effective_permissions(&conn, &user).unwrap().contains(&Permission::ApproveLoans));

        assert!(grant_permission(&conn, user.id, Permission::ApproveLoans, "admin").unwrap());
        assert!(!grant_permission(&conn, user.id, Permission::ApproveLoans, "admin").unwrap());
        assert!(effective_permissions(&conn, &user).unwrap().contains(&Permission::ApproveLoans));

        assert!(revoke_permission(&conn, user.id, Permission::ApproveLoans, "admin").unwrap());
        assert!(!effective_permissions(&conn, &user).unwrap().contains(&Permission::ApproveLoans));

        // Role defaults survive a revoke of something never granted explicitly
        assert!(!revoke_permission(&conn, user.id, Permission::PostTransactions, "admin").unwrap());
        assert!(effective_permissions(&conn, &user).unwrap().contains(&Permission::PostTransactions));
    }

    #[test]
    fn test_change_password_rotates_salt() {
        let conn = setup();
        let user = create_user(&conn, &sample_user("teller1", Role::Teller), "admin").unwrap();

        change_password(&conn, user.id, "n3w-secret-pass", "teller1").unwrap();
        let updated = get_user(&conn, user.id).unwrap();

        assert_ne!(updated.salt, user.salt);
        assert_ne!(updated.password_hash, user.password_hash);
        assert!(matches!(
            change_password(&conn, user.id, "short", "teller1"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_deactivate_user() {
        let conn = setup();
        let user = create_user(&conn, &sample_user("viewer1", Role::Viewer), "admin").unwrap();

        let user = set_active(&conn, user.id, false, "admin").unwrap();
        assert!(!user.active);
        assert_eq!(list_users(&conn).unwrap().len(), 1);
    }
}
