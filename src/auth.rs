//! Accounts, sessions and role claims.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::Utc;
use pbkdf2::pbkdf2_hmac;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::Config;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};

/// Ordered so that `max()` yields the primary role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Prefect,
    Faculty,
    Admin,
}

pub const STAFF: &[Role] = &[Role::Admin, Role::Faculty];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "prefect" => Some(Self::Prefect),
            "faculty" => Some(Self::Faculty),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Prefect => "prefect",
            Self::Faculty => "faculty",
            Self::Admin => "admin",
        }
    }
}

/// The authenticated user a request runs as.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub roles: Vec<Role>,
    pub token: String,
}

impl Caller {
    pub fn primary_role(&self) -> Role {
        self.roles.iter().copied().max().unwrap_or(Role::Student)
    }

    pub fn has_any(&self, roles: &[Role]) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }

    pub fn is_staff(&self) -> bool {
        self.has_any(STAFF)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let roles: Vec<&str> = self.roles.iter().map(|r| r.as_str()).collect();
        json!({
            "id": self.user_id,
            "email": self.email,
            "fullName": self.full_name,
            "roles": roles,
            "primaryRole": self.primary_role().as_str(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: i64,
}

impl Session {
    pub fn to_json(&self) -> serde_json::Value {
        let expires = chrono::DateTime::from_timestamp(self.expires_at, 0)
            .map(|d| d.to_rfc3339())
            .unwrap_or_default();
        json!({ "token": self.token, "expiresAt": expires })
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Returns `(hash, salt)`, both base64.
pub fn hash_password(password: &str, iterations: u32) -> (String, String) {
    let salt = *Uuid::new_v4().as_bytes();
    let key = derive_key(password, &salt, iterations);
    (B64.encode(key), B64.encode(salt))
}

pub fn verify_password(password: &str, hash: &str, salt: &str, iterations: u32) -> bool {
    let (Ok(expected), Ok(salt)) = (B64.decode(hash), B64.decode(salt)) else {
        return false;
    };
    let key = derive_key(password, &salt, iterations.max(1));
    expected.len() == key.len()
        && expected
            .iter()
            .zip(key.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn validate_email(email: &str) -> AppResult<String> {
    let e = email.trim().to_lowercase();
    let valid = match e.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(AppError::validation("email", "must be an email address"));
    }
    Ok(e)
}

fn validate_password(config: &Config, field: &str, password: &str) -> AppResult<()> {
    if password.chars().count() < config.min_password_len {
        return Err(AppError::validation(
            field,
            format!("must be at least {} characters", config.min_password_len),
        ));
    }
    Ok(())
}

pub fn roles_for(conn: &Connection, user_id: &str) -> AppResult<Vec<Role>> {
    let mut stmt = conn.prepare("SELECT role FROM user_roles WHERE user_id = ?")?;
    let raw = stmt
        .query_map([user_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut roles: Vec<Role> = raw.iter().filter_map(|s| Role::parse(s)).collect();
    roles.sort();
    roles.reverse();
    Ok(roles)
}

fn load_caller(conn: &Connection, user_id: &str, token: &str) -> AppResult<Caller> {
    let (email, full_name): (String, String) = conn
        .query_row(
            "SELECT u.email, COALESCE(p.full_name, '')
             FROM auth_users u LEFT JOIN profiles p ON p.id = u.id
             WHERE u.id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or(AppError::Unauthenticated)?;
    Ok(Caller {
        user_id: user_id.to_string(),
        email,
        full_name,
        roles: roles_for(conn, user_id)?,
        token: token.to_string(),
    })
}

fn create_session(conn: &Connection, config: &Config, user_id: &str) -> AppResult<Session> {
    let token = Uuid::new_v4().simple().to_string();
    let expires_at = Utc::now()
        .timestamp()
        .saturating_add(config.session_ttl_minutes.saturating_mul(60));
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (&token, user_id, now_rfc3339(), expires_at),
    )?;
    Ok(Session { token, expires_at })
}

pub fn grant_role(conn: &Connection, user_id: &str, role: Role) -> AppResult<bool> {
    let now = now_rfc3339();
    let n = conn.execute(
        "INSERT OR IGNORE INTO user_roles(id, user_id, role, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), user_id, role.as_str(), &now, &now),
    )?;
    Ok(n > 0)
}

pub fn sign_up(
    conn: &Connection,
    config: &Config,
    email: &str,
    password: &str,
    full_name: &str,
) -> AppResult<(Caller, Session)> {
    let email = validate_email(email)?;
    validate_password(config, "password", password)?;
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::validation("fullName", "is required"));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM auth_users WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()?;
    if taken.is_some() {
        return Err(AppError::Conflict("an account with this email already exists".into()));
    }

    let user_id = Uuid::new_v4().to_string();
    let (hash, salt) = hash_password(password, config.pbkdf2_iterations);
    let now = now_rfc3339();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO auth_users(id, email, password_hash, password_salt, iterations, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&user_id, &email, &hash, &salt, config.pbkdf2_iterations, &now, &now),
    )?;
    tx.execute(
        "INSERT INTO profiles(id, full_name, email, created_at, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&user_id, full_name, &email, &now, &now),
    )?;
    grant_role(&tx, &user_id, Role::Student)?;
    if config.bootstrap_admin.as_deref() == Some(email.as_str()) {
        grant_role(&tx, &user_id, Role::Admin)?;
        tracing::info!(user_id = %user_id, "bootstrap admin granted");
    }
    let session = create_session(&tx, config, &user_id)?;
    tx.commit()?;

    tracing::info!(user_id = %user_id, "account created");
    let caller = load_caller(conn, &user_id, &session.token)?;
    Ok((caller, session))
}

pub fn sign_in(
    conn: &Connection,
    config: &Config,
    email: &str,
    password: &str,
) -> AppResult<(Caller, Session)> {
    let email = email.trim().to_lowercase();
    let record: Option<(String, String, String, u32)> = conn
        .query_row(
            "SELECT id, password_hash, password_salt, iterations FROM auth_users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((user_id, hash, salt, iterations)) = record else {
        tracing::info!("sign-in rejected: unknown email");
        return Err(AppError::InvalidCredentials);
    };
    if !verify_password(password, &hash, &salt, iterations) {
        tracing::info!(user_id = %user_id, "sign-in rejected: wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let session = create_session(conn, config, &user_id)?;
    tracing::info!(user_id = %user_id, "signed in");
    let caller = load_caller(conn, &user_id, &session.token)?;
    Ok((caller, session))
}

/// Resolve a session token; expired sessions are removed and treated as absent.
pub fn lookup_session(conn: &Connection, token: &str) -> AppResult<Option<Caller>> {
    let found: Option<(String, i64)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((user_id, expires_at)) = found else {
        return Ok(None);
    };
    if expires_at <= Utc::now().timestamp() {
        conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
        tracing::debug!(user_id = %user_id, "session expired");
        return Ok(None);
    }
    match load_caller(conn, &user_id, token) {
        Ok(c) => Ok(Some(c)),
        Err(AppError::Unauthenticated) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn sign_out(conn: &Connection, token: &str) -> AppResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(())
}

pub fn change_password(
    conn: &Connection,
    config: &Config,
    caller: &Caller,
    current: &str,
    next: &str,
) -> AppResult<()> {
    let (hash, salt, iterations): (String, String, u32) = conn.query_row(
        "SELECT password_hash, password_salt, iterations FROM auth_users WHERE id = ?",
        [&caller.user_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    if !verify_password(current, &hash, &salt, iterations) {
        return Err(AppError::validation("currentPassword", "is incorrect"));
    }
    validate_password(config, "newPassword", next)?;

    let (hash, salt) = hash_password(next, config.pbkdf2_iterations);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE auth_users SET password_hash = ?, password_salt = ?, iterations = ?, updated_at = ?
         WHERE id = ?",
        (&hash, &salt, config.pbkdf2_iterations, now_rfc3339(), &caller.user_id),
    )?;
    // Other devices have to sign in again.
    tx.execute(
        "DELETE FROM sessions WHERE user_id = ? AND token <> ?",
        (&caller.user_id, &caller.token),
    )?;
    tx.commit()?;
    tracing::info!(user_id = %caller.user_id, "password changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_config() -> Config {
        Config {
            pbkdf2_iterations: 10,
            bootstrap_admin: Some("head@school.edu".into()),
            ..Config::default()
        }
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn primary_role_is_highest_role() {
        let mut caller = Caller {
            user_id: "u".into(),
            email: "u@x.io".into(),
            full_name: "U".into(),
            roles: vec![],
            token: "t".into(),
        };
        assert_eq!(caller.primary_role(), Role::Student);
        caller.roles = vec![Role::Student, Role::Prefect];
        assert_eq!(caller.primary_role(), Role::Prefect);
        caller.roles = vec![Role::Prefect, Role::Admin, Role::Faculty];
        assert_eq!(caller.primary_role(), Role::Admin);
        assert!(caller.is_staff());
    }

    #[test]
    fn password_hash_verifies_only_the_right_password() {
        let (hash, salt) = hash_password("correct horse", 10);
        assert!(verify_password("correct horse", &hash, &salt, 10));
        assert!(!verify_password("wrong horse", &hash, &salt, 10));
        assert!(!verify_password("correct horse", &hash, &salt, 11));
        assert!(!verify_password("correct horse", "%%%", &salt, 10));
    }

    #[test]
    fn sign_up_then_sign_in_and_out() {
        let conn = conn();
        let cfg = test_config();
        let (caller, session) =
            sign_up(&conn, &cfg, "Ana@School.edu", "password1", "Ana Cruz").unwrap();
        assert_eq!(caller.email, "ana@school.edu");
        assert_eq!(caller.roles, vec![Role::Student]);
        assert!(lookup_session(&conn, &session.token).unwrap().is_some());

        let e = sign_up(&conn, &cfg, "ana@school.edu", "password1", "Again").unwrap_err();
        assert_eq!(e.code(), "conflict");

        assert_eq!(
            sign_in(&conn, &cfg, "ana@school.edu", "nope-nope").unwrap_err().code(),
            "invalid_credentials"
        );
        assert_eq!(
            sign_in(&conn, &cfg, "nobody@school.edu", "password1").unwrap_err().code(),
            "invalid_credentials"
        );
        let (_, second) = sign_in(&conn, &cfg, " ANA@school.edu ", "password1").unwrap();

        sign_out(&conn, &second.token).unwrap();
        assert!(lookup_session(&conn, &second.token).unwrap().is_none());
        assert!(lookup_session(&conn, &session.token).unwrap().is_some());
    }

    #[test]
    fn sign_up_validates_input() {
        let conn = conn();
        let cfg = test_config();
        let cases = [
            ("not-an-email", "password1", "A", "email"),
            ("a@b.io", "short", "A", "password"),
            ("a@b.io", "password1", "  ", "fullName"),
        ];
        for (email, pw, name, field) in cases {
            match sign_up(&conn, &cfg, email, pw, name) {
                Err(AppError::Validation { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected validation error, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn email_only_needs_local_part_and_domain() {
        assert_eq!(validate_email(" Admin@Localhost ").unwrap(), "admin@localhost");
        assert!(validate_email("a@b.io").is_ok());
        for bad in ["@localhost", "admin@", "a@b@c", "plain"] {
            assert!(validate_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn long_ttl_session_expiry_does_not_overflow() {
        let conn = conn();
        let mut cfg = test_config();
        cfg.session_ttl_minutes = i64::MAX;
        let (caller, session) =
            sign_up(&conn, &cfg, "long@school.edu", "password1", "Long").unwrap();
        assert!(session.expires_at > Utc::now().timestamp());
        let found = lookup_session(&conn, &session.token).unwrap().expect("session is live");
        assert_eq!(found.user_id, caller.user_id);
    }

    #[test]
    fn bootstrap_email_becomes_admin() {
        let conn = conn();
        let (caller, _) =
            sign_up(&conn, &test_config(), "head@school.edu", "password1", "Head").unwrap();
        assert_eq!(caller.primary_role(), Role::Admin);
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let conn = conn();
        let (_, session) =
            sign_up(&conn, &test_config(), "old@school.edu", "password1", "Old").unwrap();
        conn.execute(
            "UPDATE sessions SET expires_at = 0 WHERE token = ?",
            [&session.token],
        )
        .unwrap();
        assert!(lookup_session(&conn, &session.token).unwrap().is_none());
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn change_password_keeps_current_session_only() {
        let conn = conn();
        let cfg = test_config();
        let (caller, first) = sign_up(&conn, &cfg, "p@school.edu", "password1", "P").unwrap();
        let (_, other) = sign_in(&conn, &cfg, "p@school.edu", "password1").unwrap();

        let e = change_password(&conn, &cfg, &caller, "wrong-one", "password2").unwrap_err();
        assert_eq!(e.code(), "validation_failed");
        change_password(&conn, &cfg, &caller, "password1", "password2").unwrap();

        assert!(lookup_session(&conn, &first.token).unwrap().is_some());
        assert!(lookup_session(&conn, &other.token).unwrap().is_none());
        assert!(sign_in(&conn, &cfg, "p@school.edu", "password2").is_ok());
    }
}
