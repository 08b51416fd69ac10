// 🔐 Authentication - salted digest passwords and permission-checked sessions

use chrono::Utc;
use rand::RngCore;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::db::record_event;
use crate::entities::user::{
    count_users, create_user, effective_permissions, find_user, touch_last_login, NewUser,
    Permission, Role, User,
};
use crate::error::{Error, Result};

/// Digest iterations applied over salt ‖ password
pub const HASH_ROUNDS: u32 = 10_000;

const SALT_BYTES: usize = 16;

/// 16 random bytes, hex encoded
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();

    for _ in 1..HASH_ROUNDS {
        digest = Sha256::new()
            .chain_update(salt.as_bytes())
            .chain_update(digest)
            .finalize();
    }

    format!("{:x}", digest)
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let computed = hash_password(password, salt);
    constant_time_eq(computed.as_bytes(), expected_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// SESSION
// ============================================================================

/// An authenticated user with their effective permissions resolved once
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub permissions: BTreeSet<Permission>,
}

impl Session {
    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.has(permission) {
            Ok(())
        } else {
            warn!(username = %self.user.username, permission = %permission, "permission denied");
            Err(Error::PermissionDenied(permission.to_string()))
        }
    }
}

/// Check credentials; unknown users, inactive users and wrong passwords all fail alike
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<Session> {
    let user = match find_user(conn, username)? {
        Some(user) if user.active && verify_password(password, &user.salt, &user.password_hash) => user,
        _ => {
            warn!(username = %username, "login failed");
            record_event(
                conn,
                "login_failed",
                "user",
                username.trim().to_lowercase(),
                serde_json::json!({}),
                "system",
            )?;
            return Err(Error::AuthenticationFailed);
        }
    };

    touch_last_login(conn, user.id, Utc::now())?;
    record_event(conn, "login", "user", user.id, serde_json::json!({}), &user.username)?;
    info!(username = %user.username, role = %user.role, "login");

    let permissions = effective_permissions(conn, &user)?;
    Ok(Session { user, permissions })
}

/// Create the first administrator; refuses once any user exists
pub fn bootstrap_admin(conn: &Connection, username: &str, full_name: &str, password: &str) -> Result<User> {
    if count_users(conn)? > 0 {
        return Err(Error::InvalidTransition {
            entity: "user registry".to_string(),
            from: "initialized".to_string(),
            to: "bootstrap".to_string(),
        });
    }

    create_user(
        conn,
        &NewUser {
            username: username.to_string(),
            full_name: full_name.to_string(),
            role: Role::Admin,
            password: password.to_string(),
        },
        "system",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::user::tests::sample_user;
    use crate::entities::user::{grant_permission, set_active};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_hash_is_deterministic_for_same_salt() {
        let salt = generate_salt();
        assert_eq!(hash_password("secret123", &salt), hash_password("secret123", &salt));
        assert_eq!(hash_password("secret123", &salt).len(), 64);
    }

    #[test]
    fn test_different_salts_give_different_hashes() {
        let a = generate_salt();
        let b = generate_salt();
        assert_ne!(a, b);
        assert_ne!(hash_password("secret123", &a), hash_password("secret123", &b));
    }

    #[test]
    fn test_verify_password() {
        let salt = generate_salt();
        let hash = hash_password("correct horse 1", &salt);

        assert!(verify_password("correct horse 1", &salt, &hash));
        assert!(!verify_password("correct horse 2", &salt, &hash));
        assert!(!verify_password("correct horse 1", &generate_salt(), &hash));
        assert!(!verify_password("correct horse 1", &salt, "deadbeef"));
    }

    #[test]
    fn test_authenticate_success_resolves_permissions() {
        let conn = setup();
        let user = create_user(&conn, &sample_user("teller1", Role::Teller), "admin").unwrap();
        grant_permission(&conn, user.id, Permission::RunInterest, "admin").unwrap();

        let session = authenticate(&conn, "Teller1", "passw0rd-123").unwrap();

        assert_eq!(session.username(), "teller1");
        assert!(session.require(Permission::PostTransactions).is_ok());
        assert!(session.require(Permission::RunInterest).is_ok());
        assert!(matches!(
            session.require(Permission::ApproveLoans),
            Err(Error::PermissionDenied(_))
        ));
        assert!(crate::entities::user::get_user(&conn, user.id).unwrap().last_login.is_some());
    }

    #[test]
    fn test_authenticate_failures_look_alike() {
        let conn = setup();
        let user = create_user(&conn, &sample_user("teller1", Role::Teller), "admin").unwrap();

        assert!(matches!(authenticate(&conn, "teller1", "wrong-pass1"), Err(Error::AuthenticationFailed)));
        assert!(matches!(authenticate(&conn, "nobody", "passw0rd-123"), Err(Error::AuthenticationFailed)));

        set_active(&conn, user.id, false, "admin").unwrap();
        assert!(matches!(authenticate(&conn, "teller1", "passw0rd-123"), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_bootstrap_admin_only_once() {
        let conn = setup();
        let admin = bootstrap_admin(&conn, "admin", "Administrator", "admin-pass-1").unwrap();
        assert_eq!(admin.role, Role::Admin);

        assert!(bootstrap_admin(&conn, "admin2", "Second", "admin-pass-2").is_err());

        let session = authenticate(&conn, "admin", "admin-pass-1").unwrap();
        assert!(Permission::ALL.iter().all(|p| session.has(*p)));
    }
}
