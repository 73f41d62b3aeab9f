use std::path::{Path, PathBuf};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::sqlite::configure_connection;

use super::device::{detect_device, DeviceClass};
use super::fingerprint;

const ACCOUNTS_SCHEMA: &str = include_str!("../../../sql/accounts.sql");

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open session database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on session database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("session path not configured")]
    MissingStore,
    #[error("account '{0}' already exists")]
    AccountExists(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("failed to hash password: {0}")]
    PasswordHash(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub max_devices: i64,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub role: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Account {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let expires_at: Option<NaiveDateTime> = row.get("expires_at")?;
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            max_devices: row.get("max_devices")?,
            active: row.get::<_, i64>("active")? != 0,
            expires_at: expires_at.map(|dt| Utc.from_utc_datetime(&dt)),
            role: row.get("role")?,
            created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub max_devices: i64,
    pub role: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewAccount {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            max_devices: 2,
            role: "user".to_string(),
            expires_at: None,
        }
    }

    pub fn max_devices(mut self, value: i64) -> Self {
        self.max_devices = value.max(1);
        self
    }

    pub fn role(mut self, value: impl Into<String>) -> Self {
        self.role = value.into();
        self
    }

    pub fn expires_at(mut self, value: DateTime<Utc>) -> Self {
        self.expires_at = Some(value);
        self
    }
}

/// Field-wise account mutation; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub password: Option<String>,
    pub max_devices: Option<i64>,
    pub active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceSession {
    pub id: String,
    pub account_id: String,
    pub fingerprint: String,
    pub device_name: String,
    pub device_class: DeviceClass,
    pub remote_addr: String,
    pub user_agent: String,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl DeviceSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_activity: Option<NaiveDateTime> = row.get("last_activity")?;
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            fingerprint: row.get("fingerprint")?,
            device_name: row.get("device_name")?,
            device_class: row
                .get::<_, String>("device_class")?
                .parse()
                .unwrap_or(DeviceClass::Unknown),
            remote_addr: row.get("remote_addr")?,
            user_agent: row.get("user_agent")?,
            last_activity: last_activity.map(|dt| Utc.from_utc_datetime(&dt)),
            created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }
}

/// Result of a credential check. `valid` speaks about identity only;
/// `can_connect` is false for a disabled or expired account so the caller
/// can show an account-status message instead of a generic auth failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthOutcome {
    pub valid: bool,
    pub can_connect: bool,
    pub message: String,
    pub account_id: Option<String>,
    pub current_devices: i64,
    pub max_devices: i64,
}

impl AuthOutcome {
    fn rejected(message: &str) -> Self {
        Self {
            valid: false,
            can_connect: false,
            message: message.to_string(),
            account_id: None,
            current_devices: 0,
            max_devices: 0,
        }
    }

    fn blocked(message: &str, account_id: String, max_devices: i64) -> Self {
        Self {
            valid: true,
            can_connect: false,
            message: message.to_string(),
            account_id: Some(account_id),
            current_devices: 0,
            max_devices,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Admission {
    Admitted { session: DeviceSession },
    LimitExceeded { current: i64, max: i64 },
}

impl Admission {
    pub fn allowed(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteSessionStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteSessionStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteSessionStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> SessionResult<SqliteSessionStore> {
        let path = self.path.ok_or(SessionError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteSessionStore { path, flags })
    }
}

/// Accounts plus their live device sessions. Admission counting is
/// read-then-insert without a cross-request lock: concurrent admissions
/// for the same new fingerprint may race past the count check, bounded by
/// the window between the two statements. The limit is best-effort by
/// design.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteSessionStore {
    pub fn builder() -> SqliteSessionStoreBuilder {
        SqliteSessionStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> SessionResult<Self> {
        SqliteSessionStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> SessionResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            SessionError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| SessionError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> SessionResult<()> {
        let conn = self.open()?;
        conn.execute_batch(ACCOUNTS_SCHEMA)?;
        Ok(())
    }

    pub fn create_account(&self, account: NewAccount) -> SessionResult<Account> {
        let conn = self.open()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM accounts WHERE username = ?1",
                [&account.username],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(SessionError::AccountExists(account.username));
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO accounts (id, username, password_hash, max_devices, active, expires_at, role, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)",
            params![
                id,
                &account.username,
                hash_password(&account.password)?,
                account.max_devices.max(1),
                account.expires_at.map(|dt| dt.naive_utc()),
                &account.role,
                Utc::now().naive_utc(),
            ],
        )?;
        info!(username = %account.username, "account created");
        self.account_by_id(&id)
    }

    pub fn account_by_id(&self, id: &str) -> SessionResult<Account> {
        let conn = self.open()?;
        conn.query_row("SELECT * FROM accounts WHERE id = ?1", [id], |row| {
            Account::from_row(row)
        })
        .optional()?
        .ok_or_else(|| SessionError::AccountNotFound(id.to_string()))
    }

    pub fn account_by_username(&self, username: &str) -> SessionResult<Option<Account>> {
        let conn = self.open()?;
        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE username = ?1",
                [username],
                |row| Account::from_row(row),
            )
            .optional()?;
        Ok(account)
    }

    pub fn list_accounts(&self) -> SessionResult<Vec<Account>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM accounts ORDER BY created_at DESC")?;
        let accounts = stmt
            .query_map([], |row| Account::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    pub fn update_account(&self, id: &str, update: AccountUpdate) -> SessionResult<Account> {
        let password_hash = match &update.password {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE accounts SET
                password_hash = COALESCE(?2, password_hash),
                max_devices = COALESCE(?3, max_devices),
                active = COALESCE(?4, active),
                expires_at = COALESCE(?5, expires_at),
                role = COALESCE(?6, role)
             WHERE id = ?1",
            params![
                id,
                password_hash,
                update.max_devices,
                update.active.map(i64::from),
                update.expires_at.map(|dt| dt.naive_utc()),
                update.role,
            ],
        )?;
        if affected == 0 {
            return Err(SessionError::AccountNotFound(id.to_string()));
        }
        self.account_by_id(id)
    }

    /// Deleting an account cascades to its sessions.
    pub fn delete_account(&self, id: &str) -> SessionResult<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM device_sessions WHERE account_id = ?1", [id])?;
        let affected = conn.execute("DELETE FROM accounts WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(SessionError::AccountNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Checks identity first and account standing second: unknown users
    /// and bad passwords short-circuit before activity or expiry are
    /// consulted.
    pub fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> SessionResult<AuthOutcome> {
        let conn = self.open()?;
        let record: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM accounts WHERE username = ?1",
                [username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((account_id, password_hash)) = record else {
            return Ok(AuthOutcome::rejected("unknown account"));
        };
        if !verify_password(password, &password_hash) {
            return Ok(AuthOutcome::rejected("invalid password"));
        }

        let account = self.account_by_id(&account_id)?;
        if !account.active {
            return Ok(AuthOutcome::blocked(
                "account disabled",
                account.id,
                account.max_devices,
            ));
        }
        if let Some(expires_at) = account.expires_at {
            if expires_at < Utc::now() {
                return Ok(AuthOutcome::blocked(
                    "account expired",
                    account.id,
                    account.max_devices,
                ));
            }
        }

        let current_devices = self.session_count(&account.id)?;
        Ok(AuthOutcome {
            valid: true,
            can_connect: true,
            message: "credentials valid".to_string(),
            account_id: Some(account.id),
            current_devices,
            max_devices: account.max_devices,
        })
    }

    /// Admits a device under the per-account concurrency limit. A known
    /// (account, fingerprint) pair refreshes its session and never counts
    /// against the limit; a new fingerprint is admitted only below
    /// `max_devices` live sessions.
    pub fn admit(
        &self,
        account_id: &str,
        user_agent: &str,
        remote_addr: &str,
        max_devices: i64,
    ) -> SessionResult<Admission> {
        let print = fingerprint(user_agent, remote_addr);
        let conn = self.open()?;
        let now = Utc::now().naive_utc();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM device_sessions WHERE account_id = ?1 AND fingerprint = ?2",
                params![account_id, print],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(session_id) = existing {
            conn.execute(
                "UPDATE device_sessions
                 SET last_activity = ?2, remote_addr = ?3, user_agent = ?4
                 WHERE id = ?1",
                params![session_id, now, remote_addr, user_agent],
            )?;
            let session = conn.query_row(
                "SELECT * FROM device_sessions WHERE id = ?1",
                [&session_id],
                |row| DeviceSession::from_row(row),
            )?;
            debug!(account = account_id, fingerprint = %print, "session refreshed");
            return Ok(Admission::Admitted { session });
        }

        let current = self.session_count(account_id)?;
        if current >= max_devices {
            info!(
                account = account_id,
                current,
                max = max_devices,
                "device limit exceeded"
            );
            return Ok(Admission::LimitExceeded {
                current,
                max: max_devices,
            });
        }

        let (device_name, device_class) = detect_device(user_agent);
        let session_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO device_sessions
                (id, account_id, fingerprint, device_name, device_class,
                 remote_addr, user_agent, last_activity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                session_id,
                account_id,
                print,
                device_name,
                device_class.as_str(),
                remote_addr,
                user_agent,
                now,
            ],
        )?;
        let session = conn.query_row(
            "SELECT * FROM device_sessions WHERE id = ?1",
            [&session_id],
            |row| DeviceSession::from_row(row),
        )?;
        info!(account = account_id, device = %session.device_name, "session registered");
        Ok(Admission::Admitted { session })
    }

    pub fn session_count(&self, account_id: &str) -> SessionResult<i64> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM device_sessions WHERE account_id = ?1",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn list_devices(&self, account_id: &str) -> SessionResult<Vec<DeviceSession>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM device_sessions WHERE account_id = ?1 ORDER BY last_activity DESC",
        )?;
        let sessions = stmt
            .query_map([account_id], |row| DeviceSession::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub fn disconnect(&self, account_id: &str, fingerprint: &str) -> SessionResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "DELETE FROM device_sessions WHERE account_id = ?1 AND fingerprint = ?2",
            params![account_id, fingerprint],
        )?;
        Ok(affected > 0)
    }

    pub fn disconnect_all(&self, account_id: &str) -> SessionResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "DELETE FROM device_sessions WHERE account_id = ?1",
            [account_id],
        )?;
        Ok(affected)
    }

    /// Removes every session idle for longer than `timeout`. Invoked by
    /// an external scheduler, never self-scheduled.
    pub fn sweep_idle(&self, timeout: Duration) -> SessionResult<usize> {
        let threshold = (Utc::now() - timeout).naive_utc();
        let conn = self.open()?;
        let affected = conn.execute(
            "DELETE FROM device_sessions WHERE last_activity < ?1",
            [threshold],
        )?;
        if affected > 0 {
            info!(removed = affected, "idle sessions swept");
        }
        Ok(affected)
    }
}

fn hash_password(password: &str) -> SessionResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| SessionError::PasswordHash(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
