use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::board::models::*;
use crate::errors::{SourceError, SourceResult};

/// Settings key holding the token of the logged-in session.
const SESSION_KEY: &str = "session_token";
const MIN_PASSWORD_LEN: usize = 6;

/// Attach a description to SQLite failures, turning them into `INTERNAL`
/// source errors.
trait SqlContext<T> {
    fn sql_context(self, what: &str) -> SourceResult<T>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn sql_context(self, what: &str) -> SourceResult<T> {
        self.map_err(|e| SourceError::internal(format!("{}: {}", what, e)))
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn hash_password(salt: &str, password: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{}:{}", salt, password)))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> SourceResult<()> {
    if looks_like_email(email) {
        Ok(())
    } else {
        Err(SourceError::validation(format!(
            "'{}' is not a valid email address",
            email.trim()
        )))
    }
}

fn require_title(title: &str, what: &str) -> SourceResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(SourceError::validation(format!("{} title is required", what)));
    }
    Ok(title.to_string())
}

/// SQLite-backed board storage.
pub struct LocalDb {
    conn: Connection,
}

impl LocalDb {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> SourceResult<Self> {
        let conn = Connection::open(path).sql_context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> SourceResult<Self> {
        let conn = Connection::open_in_memory()
            .sql_context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SourceResult<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .sql_context("Failed to enable foreign keys")?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> SourceResult<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    password_salt TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS dashboards (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    background TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS dashboard_members (
                    dashboard_id TEXT NOT NULL REFERENCES dashboards(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    is_owner INTEGER NOT NULL DEFAULT 0,
                    joined_at TEXT NOT NULL,
                    PRIMARY KEY (dashboard_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS columns (
                    id TEXT PRIMARY KEY,
                    dashboard_id TEXT NOT NULL REFERENCES dashboards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    archived INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS cards (
                    id TEXT PRIMARY KEY,
                    dashboard_id TEXT NOT NULL REFERENCES dashboards(id) ON DELETE CASCADE,
                    column_id TEXT NOT NULL REFERENCES columns(id) ON DELETE CASCADE,
                    number INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    details TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS invitations (
                    id TEXT PRIMARY KEY,
                    dashboard_id TEXT NOT NULL REFERENCES dashboards(id) ON DELETE CASCADE,
                    inviter_id TEXT NOT NULL,
                    inviter_email TEXT NOT NULL,
                    invitee_email TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_members_user ON dashboard_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_columns_dashboard ON columns(dashboard_id, position);
                CREATE INDEX IF NOT EXISTS idx_cards_column ON cards(column_id, position);
                CREATE INDEX IF NOT EXISTS idx_invitations_invitee ON invitations(invitee_email, status);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_invitations_one_pending
                    ON invitations(dashboard_id, invitee_email)
                    WHERE status = 'pending';
                ",
            )
            .sql_context("Failed to create tables")
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> SourceResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .sql_context("Failed to read setting")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SourceResult<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
                params![key, value],
            )
            .sql_context("Failed to write setting")?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> SourceResult<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .sql_context("Failed to delete setting")?;
        Ok(())
    }

    // ── Auth ──────────────────────────────────────────────────────────

    /// The user owning the persisted session, if one is logged in.
    pub fn current_user(&self) -> SourceResult<Option<User>> {
        let Some(token) = self.get_setting(SESSION_KEY)? else {
            return Ok(None);
        };
        self.conn
            .query_row(
                "SELECT u.id, u.email, u.name FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                params![token],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
            .sql_context("Failed to resolve session")
    }

    pub fn require_user(&self) -> SourceResult<User> {
        self.current_user()?
            .ok_or_else(|| SourceError::unauthorized("Not logged in"))
    }

    pub fn register(&self, registration: &Registration) -> SourceResult<AuthSession> {
        validate_email(&registration.email)?;
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(SourceError::validation("Name is required"));
        }
        if registration.password.len() < MIN_PASSWORD_LEN {
            return Err(SourceError::validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let email = normalize_email(&registration.email);
        if self.find_user_by_email(&email)?.is_some() {
            return Err(SourceError::conflict(format!(
                "An account for {} already exists",
                email
            )));
        }

        let user = User {
            id: new_id(),
            email,
            name: name.to_string(),
        };
        let salt = Uuid::new_v4().simple().to_string();
        self.conn
            .execute(
                "INSERT INTO users (id, email, name, password_salt, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.email,
                    user.name,
                    salt,
                    hash_password(&salt, &registration.password),
                    Utc::now()
                ],
            )
            .sql_context("Failed to insert user")?;
        self.open_session(user)
    }

    pub fn login(&self, credentials: &Credentials) -> SourceResult<AuthSession> {
        let email = normalize_email(&credentials.email);
        let row: Option<(User, String, String)> = self
            .conn
            .query_row(
                "SELECT id, email, name, password_salt, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok((
                        User {
                            id: row.get(0)?,
                            email: row.get(1)?,
                            name: row.get(2)?,
                        },
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()
            .sql_context("Failed to look up user")?;
        match row {
            Some((user, salt, hash)) if hash_password(&salt, &credentials.password) == hash => {
                self.open_session(user)
            }
            _ => Err(SourceError::unauthorized("Invalid email or password")),
        }
    }

    fn open_session(&self, user: User) -> SourceResult<AuthSession> {
        let token = Uuid::new_v4().simple().to_string();
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![token, user.id, Utc::now()],
            )
            .sql_context("Failed to create session")?;
        self.set_setting(SESSION_KEY, &token)?;
        Ok(AuthSession { user, token })
    }

    /// Drop the persisted session. Logging out twice is not an error.
    pub fn logout(&self) -> SourceResult<()> {
        if let Some(token) = self.get_setting(SESSION_KEY)? {
            self.conn
                .execute("DELETE FROM sessions WHERE token = ?1", params![token])
                .sql_context("Failed to delete session")?;
        }
        self.delete_setting(SESSION_KEY)
    }

    pub fn change_password(
        &self,
        user: &User,
        current: &str,
        new_password: &str,
    ) -> SourceResult<()> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(SourceError::validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let (salt, hash): (String, String) = self
            .conn
            .query_row(
                "SELECT password_salt, password_hash FROM users WHERE id = ?1",
                params![user.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .sql_context("Failed to look up user")?;
        if hash_password(&salt, current) != hash {
            return Err(SourceError::unauthorized("Current password is incorrect"));
        }
        let salt = Uuid::new_v4().simple().to_string();
        self.conn
            .execute(
                "UPDATE users SET password_salt = ?1, password_hash = ?2 WHERE id = ?3",
                params![salt, hash_password(&salt, new_password), user.id],
            )
            .sql_context("Failed to update password")?;
        Ok(())
    }

    fn find_user_by_email(&self, email: &str) -> SourceResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name FROM users WHERE email = ?1",
                params![normalize_email(email)],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
            .sql_context("Failed to look up user")
    }

    // ── Access checks ─────────────────────────────────────────────────

    /// Returns `true` if the user owns the dashboard. Fails with `NOT_FOUND`
    /// for unknown dashboards and `FORBIDDEN` for non-members.
    fn check_membership(&self, user: &User, dashboard_id: &str) -> SourceResult<bool> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM dashboards WHERE id = ?1",
                params![dashboard_id],
                |row| row.get(0),
            )
            .sql_context("Failed to look up dashboard")?;
        if !exists {
            return Err(SourceError::not_found(format!(
                "Dashboard {} not found",
                dashboard_id
            )));
        }
        let is_owner: Option<bool> = self
            .conn
            .query_row(
                "SELECT is_owner FROM dashboard_members WHERE dashboard_id = ?1 AND user_id = ?2",
                params![dashboard_id, user.id],
                |row| row.get(0),
            )
            .optional()
            .sql_context("Failed to look up membership")?;
        is_owner.ok_or_else(|| {
            SourceError::forbidden(format!(
                "You are not a member of dashboard {}",
                dashboard_id
            ))
        })
    }

    fn require_owner(&self, user: &User, dashboard_id: &str) -> SourceResult<()> {
        if self.check_membership(user, dashboard_id)? {
            Ok(())
        } else {
            Err(SourceError::forbidden(format!(
                "Only owners can manage dashboard {}",
                dashboard_id
            )))
        }
    }

    // ── Dashboards ────────────────────────────────────────────────────

    pub fn list_dashboards(&self, user: &User) -> SourceResult<Vec<Dashboard>> {
        let ids: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT d.id FROM dashboards d
                     JOIN dashboard_members m ON m.dashboard_id = d.id
                     WHERE m.user_id = ?1
                     ORDER BY d.created_at, d.id",
                )
                .sql_context("Failed to prepare list_dashboards")?;
            let rows = stmt
                .query_map(params![user.id], |row| row.get(0))
                .sql_context("Failed to query dashboards")?;
            rows.collect::<rusqlite::Result<_>>()
                .sql_context("Failed to read dashboard row")?
        };
        let mut dashboards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(dashboard) = self.load_dashboard(&id)? {
                dashboards.push(dashboard);
            }
        }
        Ok(dashboards)
    }

    pub fn get_dashboard(&self, user: &User, dashboard_id: &str) -> SourceResult<Dashboard> {
        self.check_membership(user, dashboard_id)?;
        self.require_dashboard(dashboard_id)
    }

    pub fn create_dashboard(&self, user: &User, new: &NewDashboard) -> SourceResult<Dashboard> {
        let title = require_title(&new.title, "Dashboard")?;
        let id = new_id();
        let now = Utc::now();
        let tx = self
            .conn
            .unchecked_transaction()
            .sql_context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO dashboards (id, title, background, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, new.background, now],
        )
        .sql_context("Failed to insert dashboard")?;
        tx.execute(
            "INSERT INTO dashboard_members (dashboard_id, user_id, is_owner, joined_at)
             VALUES (?1, ?2, 1, ?3)",
            params![id, user.id, now],
        )
        .sql_context("Failed to insert dashboard owner")?;
        tx.commit().sql_context("Failed to commit dashboard")?;
        self.require_dashboard(&id)
    }

    pub fn update_dashboard(
        &self,
        user: &User,
        dashboard_id: &str,
        patch: &DashboardPatch,
    ) -> SourceResult<Dashboard> {
        self.check_membership(user, dashboard_id)?;
        if let Some(title) = &patch.title {
            let title = require_title(title, "Dashboard")?;
            self.conn
                .execute(
                    "UPDATE dashboards SET title = ?1 WHERE id = ?2",
                    params![title, dashboard_id],
                )
                .sql_context("Failed to update dashboard title")?;
        }
        if let Some(background) = &patch.background {
            self.conn
                .execute(
                    "UPDATE dashboards SET background = ?1 WHERE id = ?2",
                    params![background, dashboard_id],
                )
                .sql_context("Failed to update dashboard background")?;
        }
        self.require_dashboard(dashboard_id)
    }

    pub fn delete_dashboard(&self, user: &User, dashboard_id: &str) -> SourceResult<()> {
        self.require_owner(user, dashboard_id)?;
        self.conn
            .execute("DELETE FROM dashboards WHERE id = ?1", params![dashboard_id])
            .sql_context("Failed to delete dashboard")?;
        Ok(())
    }

    fn require_dashboard(&self, dashboard_id: &str) -> SourceResult<Dashboard> {
        self.load_dashboard(dashboard_id)?.ok_or_else(|| {
            SourceError::not_found(format!("Dashboard {} not found", dashboard_id))
        })
    }

    fn load_dashboard(&self, dashboard_id: &str) -> SourceResult<Option<Dashboard>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, background, created_at FROM dashboards WHERE id = ?1",
                params![dashboard_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                    ))
                },
            )
            .optional()
            .sql_context("Failed to query dashboard")?;
        let Some((id, title, background, created_at)) = row else {
            return Ok(None);
        };
        let (members, owner_ids) = self.load_members(&id)?;
        let columns = self.load_columns(&id)?;
        let invitations = self.load_dashboard_invitations(&id)?;
        Ok(Some(Dashboard {
            id,
            title,
            created_at,
            owner_ids,
            members,
            columns,
            background,
            invitations,
        }))
    }

    fn load_members(&self, dashboard_id: &str) -> SourceResult<(Vec<User>, Vec<String>)> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.email, u.name, m.is_owner FROM dashboard_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.dashboard_id = ?1
                 ORDER BY m.joined_at, u.email",
            )
            .sql_context("Failed to prepare load_members")?;
        let rows = stmt
            .query_map(params![dashboard_id], |row| {
                Ok((
                    User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                    },
                    row.get::<_, bool>(3)?,
                ))
            })
            .sql_context("Failed to query members")?;
        let mut members = Vec::new();
        let mut owner_ids = Vec::new();
        for row in rows {
            let (user, is_owner) = row.sql_context("Failed to read member row")?;
            if is_owner {
                owner_ids.push(user.id.clone());
            }
            members.push(user);
        }
        Ok((members, owner_ids))
    }

    // ── Columns ───────────────────────────────────────────────────────

    fn load_columns(&self, dashboard_id: &str) -> SourceResult<Vec<Column>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, position FROM columns
                 WHERE dashboard_id = ?1 AND archived = 0
                 ORDER BY position, id",
            )
            .sql_context("Failed to prepare load_columns")?;
        let rows = stmt
            .query_map(params![dashboard_id], |row| {
                Ok(Column {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    order: row.get(2)?,
                    cards: Vec::new(),
                    archived: false,
                })
            })
            .sql_context("Failed to query columns")?;
        let mut columns = Vec::new();
        for row in rows {
            let mut column = row.sql_context("Failed to read column row")?;
            column.cards = self.load_cards(&column.id)?;
            columns.push(column);
        }
        Ok(columns)
    }

    fn get_column(&self, dashboard_id: &str, column_id: &str) -> SourceResult<Column> {
        let column = self
            .conn
            .query_row(
                "SELECT id, title, position, archived FROM columns
                 WHERE id = ?1 AND dashboard_id = ?2",
                params![column_id, dashboard_id],
                |row| {
                    Ok(Column {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        order: row.get(2)?,
                        cards: Vec::new(),
                        archived: row.get(3)?,
                    })
                },
            )
            .optional()
            .sql_context("Failed to query column")?;
        let mut column = column.ok_or_else(|| {
            SourceError::not_found(format!("Column {} not found", column_id))
        })?;
        column.cards = self.load_cards(&column.id)?;
        Ok(column)
    }

    pub fn create_column(
        &self,
        user: &User,
        dashboard_id: &str,
        new: &NewColumn,
    ) -> SourceResult<Column> {
        self.check_membership(user, dashboard_id)?;
        let title = require_title(&new.title, "Column")?;
        let max_pos: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM columns WHERE dashboard_id = ?1",
                params![dashboard_id],
                |row| row.get(0),
            )
            .sql_context("Failed to get max column position")?;
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO columns (id, dashboard_id, title, position) VALUES (?1, ?2, ?3, ?4)",
                params![id, dashboard_id, title, max_pos + 1],
            )
            .sql_context("Failed to insert column")?;
        self.get_column(dashboard_id, &id)
    }

    pub fn update_column(
        &self,
        user: &User,
        dashboard_id: &str,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> SourceResult<Column> {
        self.check_membership(user, dashboard_id)?;
        self.get_column(dashboard_id, column_id)?;
        if let Some(title) = &patch.title {
            let title = require_title(title, "Column")?;
            self.conn
                .execute(
                    "UPDATE columns SET title = ?1 WHERE id = ?2",
                    params![title, column_id],
                )
                .sql_context("Failed to update column title")?;
        }
        if let Some(archived) = patch.archived {
            self.conn
                .execute(
                    "UPDATE columns SET archived = ?1 WHERE id = ?2",
                    params![archived, column_id],
                )
                .sql_context("Failed to update column archive flag")?;
        }
        self.get_column(dashboard_id, column_id)
    }

    pub fn delete_column(&self, user: &User, dashboard_id: &str, column_id: &str) -> SourceResult<()> {
        self.check_membership(user, dashboard_id)?;
        let count = self
            .conn
            .execute(
                "DELETE FROM columns WHERE id = ?1 AND dashboard_id = ?2",
                params![column_id, dashboard_id],
            )
            .sql_context("Failed to delete column")?;
        if count == 0 {
            return Err(SourceError::not_found(format!(
                "Column {} not found",
                column_id
            )));
        }
        Ok(())
    }

    /// Assign each visible column its index in `ordered_ids`. The list must
    /// name every visible column exactly once. Archived columns are numbered
    /// after the visible ones so positions stay unique.
    pub fn update_column_order(
        &self,
        user: &User,
        dashboard_id: &str,
        ordered_ids: &[String],
    ) -> SourceResult<()> {
        self.check_membership(user, dashboard_id)?;
        let mut current: Vec<String> = self
            .load_columns(dashboard_id)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let mut requested = ordered_ids.to_vec();
        current.sort();
        requested.sort();
        if current != requested {
            return Err(SourceError::validation(
                "Column order must list every column of the dashboard exactly once",
            ));
        }

        let archived: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT id FROM columns WHERE dashboard_id = ?1 AND archived = 1
                     ORDER BY position, id",
                )
                .sql_context("Failed to prepare archived column query")?;
            let rows = stmt
                .query_map(params![dashboard_id], |row| row.get(0))
                .sql_context("Failed to query archived columns")?;
            rows.collect::<Result<_, _>>()
                .sql_context("Failed to read archived column row")?
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .sql_context("Failed to begin transaction")?;
        for (position, id) in ordered_ids.iter().chain(archived.iter()).enumerate() {
            tx.execute(
                "UPDATE columns SET position = ?1 WHERE id = ?2",
                params![position as i64, id],
            )
            .sql_context("Failed to update column position")?;
        }
        tx.commit().sql_context("Failed to commit column order")
    }

    // ── Cards ─────────────────────────────────────────────────────────

    fn load_cards(&self, column_id: &str) -> SourceResult<Vec<Card>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, number, title, column_id, details FROM cards
                 WHERE column_id = ?1 ORDER BY position, number",
            )
            .sql_context("Failed to prepare load_cards")?;
        let rows = stmt
            .query_map(params![column_id], CardRow::from_row)
            .sql_context("Failed to query cards")?;
        let mut cards = Vec::new();
        for row in rows {
            cards.push(row.sql_context("Failed to read card row")?.into_card()?);
        }
        Ok(cards)
    }

    fn get_card(&self, dashboard_id: &str, card_id: &str) -> SourceResult<Card> {
        let row = self
            .conn
            .query_row(
                "SELECT id, number, title, column_id, details FROM cards
                 WHERE id = ?1 AND dashboard_id = ?2",
                params![card_id, dashboard_id],
                CardRow::from_row,
            )
            .optional()
            .sql_context("Failed to query card")?;
        row.ok_or_else(|| SourceError::not_found(format!("Card {} not found", card_id)))?
            .into_card()
    }

    fn ordered_card_ids(&self, column_id: &str) -> SourceResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM cards WHERE column_id = ?1 ORDER BY position, number")
            .sql_context("Failed to prepare ordered_card_ids")?;
        let rows = stmt
            .query_map(params![column_id], |row| row.get(0))
            .sql_context("Failed to query card ids")?;
        rows.collect::<rusqlite::Result<_>>()
            .sql_context("Failed to read card id")
    }

    fn rewrite_positions(conn: &Connection, card_ids: &[String]) -> SourceResult<()> {
        for (position, id) in card_ids.iter().enumerate() {
            conn.execute(
                "UPDATE cards SET position = ?1 WHERE id = ?2",
                params![position as i64, id],
            )
            .sql_context("Failed to update card position")?;
        }
        Ok(())
    }

    pub fn create_card(&self, user: &User, dashboard_id: &str, new: &NewCard) -> SourceResult<Card> {
        self.check_membership(user, dashboard_id)?;
        let title = require_title(&new.title, "Card")?;
        self.get_column(dashboard_id, &new.column_id)?;
        let next_number: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(number), 0) + 1 FROM cards WHERE dashboard_id = ?1",
                params![dashboard_id],
                |row| row.get(0),
            )
            .sql_context("Failed to get next card number")?;
        let next_position: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM cards WHERE column_id = ?1",
                params![new.column_id],
                |row| row.get(0),
            )
            .sql_context("Failed to get next card position")?;
        let details = serde_json::to_string(&new.details)
            .map_err(|e| SourceError::internal(format!("Failed to encode card details: {}", e)))?;
        let id = new_id();
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO cards (id, dashboard_id, column_id, number, title, position, details, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![id, dashboard_id, new.column_id, next_number, title, next_position, details, now],
            )
            .sql_context("Failed to insert card")?;
        self.get_card(dashboard_id, &id)
    }

    pub fn update_card(
        &self,
        user: &User,
        dashboard_id: &str,
        card_id: &str,
        patch: &CardPatch,
    ) -> SourceResult<Card> {
        self.check_membership(user, dashboard_id)?;
        self.get_card(dashboard_id, card_id)?;
        let now = Utc::now();
        if let Some(title) = &patch.title {
            let title = require_title(title, "Card")?;
            self.conn
                .execute(
                    "UPDATE cards SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, now, card_id],
                )
                .sql_context("Failed to update card title")?;
        }
        if let Some(details) = &patch.details {
            let details = serde_json::to_string(details).map_err(|e| {
                SourceError::internal(format!("Failed to encode card details: {}", e))
            })?;
            self.conn
                .execute(
                    "UPDATE cards SET details = ?1, updated_at = ?2 WHERE id = ?3",
                    params![details, now, card_id],
                )
                .sql_context("Failed to update card details")?;
        }
        self.get_card(dashboard_id, card_id)
    }

    pub fn delete_card(&self, user: &User, dashboard_id: &str, card_id: &str) -> SourceResult<()> {
        self.check_membership(user, dashboard_id)?;
        let card = self.get_card(dashboard_id, card_id)?;
        self.conn
            .execute("DELETE FROM cards WHERE id = ?1", params![card_id])
            .sql_context("Failed to delete card")?;
        let remaining = self.ordered_card_ids(&card.column_id)?;
        Self::rewrite_positions(&self.conn, &remaining)
    }

    /// Place `card_id` at `destination_index` of `to_column_id`.
    ///
    /// The card's stored column is authoritative: a retried move whose card
    /// already sits in the destination column is re-applied there instead of
    /// failing.
    pub fn move_card(
        &self,
        user: &User,
        dashboard_id: &str,
        from_column_id: &str,
        to_column_id: &str,
        card_id: &str,
        destination_index: usize,
    ) -> SourceResult<()> {
        self.check_membership(user, dashboard_id)?;
        let card = self.get_card(dashboard_id, card_id)?;
        self.get_column(dashboard_id, to_column_id)?;
        if card.column_id != from_column_id && card.column_id != to_column_id {
            return Err(SourceError::conflict(format!(
                "Card {} is no longer in column {}",
                card_id, from_column_id
            )));
        }

        let mut source_ids = self.ordered_card_ids(&card.column_id)?;
        source_ids.retain(|id| id != card_id);
        let mut dest_ids = if card.column_id == to_column_id {
            source_ids.clone()
        } else {
            self.ordered_card_ids(to_column_id)?
        };
        if destination_index > dest_ids.len() {
            return Err(SourceError::validation(format!(
                "Destination index {} is out of range for column {}",
                destination_index, to_column_id
            )));
        }
        dest_ids.insert(destination_index, card_id.to_string());

        let tx = self
            .conn
            .unchecked_transaction()
            .sql_context("Failed to begin transaction")?;
        if card.column_id != to_column_id {
            tx.execute(
                "UPDATE cards SET column_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_column_id, Utc::now(), card_id],
            )
            .sql_context("Failed to move card")?;
            Self::rewrite_positions(&tx, &source_ids)?;
        }
        Self::rewrite_positions(&tx, &dest_ids)?;
        tx.commit().sql_context("Failed to commit card move")
    }

    // ── Invitations & membership ──────────────────────────────────────

    const INVITATION_COLUMNS: &'static str = "i.id, i.dashboard_id, d.title, i.inviter_id, i.inviter_email, i.invitee_email, i.status, i.created_at";

    fn load_dashboard_invitations(&self, dashboard_id: &str) -> SourceResult<Vec<Invitation>> {
        self.query_invitations(
            &format!(
                "SELECT {} FROM invitations i JOIN dashboards d ON d.id = i.dashboard_id
                 WHERE i.dashboard_id = ?1 ORDER BY i.created_at, i.id",
                Self::INVITATION_COLUMNS
            ),
            dashboard_id,
        )
    }

    fn query_invitations(&self, sql: &str, arg: &str) -> SourceResult<Vec<Invitation>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .sql_context("Failed to prepare invitation query")?;
        let rows = stmt
            .query_map(params![arg], InvitationRow::from_row)
            .sql_context("Failed to query invitations")?;
        let mut invitations = Vec::new();
        for row in rows {
            invitations.push(
                row.sql_context("Failed to read invitation row")?
                    .into_invitation()?,
            );
        }
        Ok(invitations)
    }

    fn get_invitation(&self, invitation_id: &str) -> SourceResult<Invitation> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM invitations i JOIN dashboards d ON d.id = i.dashboard_id
                     WHERE i.id = ?1",
                    Self::INVITATION_COLUMNS
                ),
                params![invitation_id],
                InvitationRow::from_row,
            )
            .optional()
            .sql_context("Failed to query invitation")?;
        row.ok_or_else(|| {
            SourceError::not_found(format!("Invitation {} not found", invitation_id))
        })?
        .into_invitation()
    }

    /// Invite `email` to the dashboard. Re-inviting an address with a pending
    /// invitation returns that invitation instead of creating another.
    pub fn invite(&self, user: &User, dashboard_id: &str, email: &str) -> SourceResult<Invitation> {
        self.check_membership(user, dashboard_id)?;
        validate_email(email)?;
        let email = normalize_email(email);

        let already_member: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM dashboard_members m JOIN users u ON u.id = m.user_id
                 WHERE m.dashboard_id = ?1 AND u.email = ?2",
                params![dashboard_id, email],
                |row| row.get(0),
            )
            .sql_context("Failed to check membership")?;
        if already_member {
            return Err(SourceError::conflict(format!(
                "{} is already a member of this dashboard",
                email
            )));
        }

        let pending: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM invitations
                 WHERE dashboard_id = ?1 AND invitee_email = ?2 AND status = 'pending'",
                params![dashboard_id, email],
                |row| row.get(0),
            )
            .optional()
            .sql_context("Failed to look up pending invitation")?;
        if let Some(id) = pending {
            return self.get_invitation(&id);
        }

        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO invitations (id, dashboard_id, inviter_id, inviter_email, invitee_email, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
                params![id, dashboard_id, user.id, user.email, email, Utc::now()],
            )
            .sql_context("Failed to insert invitation")?;
        self.get_invitation(&id)
    }

    /// Pending invitations addressed to `user`.
    pub fn list_invitations(&self, user: &User) -> SourceResult<Vec<Invitation>> {
        self.query_invitations(
            &format!(
                "SELECT {} FROM invitations i JOIN dashboards d ON d.id = i.dashboard_id
                 WHERE i.invitee_email = ?1 AND i.status = 'pending'
                 ORDER BY i.created_at, i.id",
                Self::INVITATION_COLUMNS
            ),
            &normalize_email(&user.email),
        )
    }

    fn invitation_for(&self, user: &User, invitation_id: &str) -> SourceResult<Invitation> {
        let invitation = self.get_invitation(invitation_id)?;
        if !invitation.is_for(&user.email) {
            return Err(SourceError::forbidden(format!(
                "Invitation {} is addressed to someone else",
                invitation_id
            )));
        }
        Ok(invitation)
    }

    fn set_invitation_status(&self, invitation_id: &str, status: InvitationStatus) -> SourceResult<()> {
        self.conn
            .execute(
                "UPDATE invitations SET status = ?1 WHERE id = ?2",
                params![status.as_str(), invitation_id],
            )
            .sql_context("Failed to update invitation status")?;
        Ok(())
    }

    pub fn accept_invitation(&self, user: &User, invitation_id: &str) -> SourceResult<Dashboard> {
        let invitation = self.invitation_for(user, invitation_id)?;
        match invitation.status {
            InvitationStatus::Rejected => {
                return Err(SourceError::conflict(format!(
                    "Invitation {} was already rejected",
                    invitation_id
                )));
            }
            InvitationStatus::Pending => {
                self.set_invitation_status(invitation_id, InvitationStatus::Accepted)?
            }
            InvitationStatus::Accepted => {}
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO dashboard_members (dashboard_id, user_id, is_owner, joined_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![invitation.dashboard_id, user.id, Utc::now()],
            )
            .sql_context("Failed to add dashboard member")?;
        self.require_dashboard(&invitation.dashboard_id)
    }

    pub fn reject_invitation(&self, user: &User, invitation_id: &str) -> SourceResult<Invitation> {
        let invitation = self.invitation_for(user, invitation_id)?;
        match invitation.status {
            InvitationStatus::Accepted => Err(SourceError::conflict(format!(
                "Invitation {} was already accepted",
                invitation_id
            ))),
            InvitationStatus::Rejected => Ok(invitation),
            InvitationStatus::Pending => {
                self.set_invitation_status(invitation_id, InvitationStatus::Rejected)?;
                self.get_invitation(invitation_id)
            }
        }
    }

    /// Remove a member. Owners manage membership; any member may remove
    /// themselves. Owners themselves cannot be removed.
    pub fn remove_member(&self, user: &User, dashboard_id: &str, user_id: &str) -> SourceResult<Dashboard> {
        if user.id != user_id {
            self.require_owner(user, dashboard_id)?;
        } else {
            self.check_membership(user, dashboard_id)?;
        }
        let target_is_owner: Option<bool> = self
            .conn
            .query_row(
                "SELECT is_owner FROM dashboard_members WHERE dashboard_id = ?1 AND user_id = ?2",
                params![dashboard_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .sql_context("Failed to look up member")?;
        match target_is_owner {
            None => Err(SourceError::not_found(format!(
                "User {} is not a member of dashboard {}",
                user_id, dashboard_id
            ))),
            Some(true) => Err(SourceError::validation("Dashboard owners cannot be removed")),
            Some(false) => {
                self.conn
                    .execute(
                        "DELETE FROM dashboard_members WHERE dashboard_id = ?1 AND user_id = ?2",
                        params![dashboard_id, user_id],
                    )
                    .sql_context("Failed to remove member")?;
                self.require_dashboard(dashboard_id)
            }
        }
    }
}

// ── Row structs ───────────────────────────────────────────────────────

/// Intermediate row struct for cards; `details` is JSON text.
struct CardRow {
    id: String,
    number: i64,
    title: String,
    column_id: String,
    details: String,
}

impl CardRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            number: row.get(1)?,
            title: row.get(2)?,
            column_id: row.get(3)?,
            details: row.get(4)?,
        })
    }

    fn into_card(self) -> SourceResult<Card> {
        let details: CardDetails = serde_json::from_str(&self.details).map_err(|e| {
            SourceError::internal(format!("Failed to parse details of card {}: {}", self.id, e))
        })?;
        Ok(Card {
            id: self.id,
            number: self.number,
            title: self.title,
            column_id: self.column_id,
            details,
        })
    }
}

/// Intermediate row struct for invitations.
struct InvitationRow {
    id: String,
    dashboard_id: String,
    dashboard_title: String,
    inviter_id: String,
    inviter_email: String,
    invitee_email: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl InvitationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            dashboard_title: row.get(2)?,
            inviter_id: row.get(3)?,
            inviter_email: row.get(4)?,
            invitee_email: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_invitation(self) -> SourceResult<Invitation> {
        let status = InvitationStatus::from_str(&self.status).map_err(SourceError::internal)?;
        Ok(Invitation {
            id: self.id,
            dashboard_id: self.dashboard_id,
            dashboard_title: Some(self.dashboard_title),
            inviter_id: self.inviter_id,
            inviter_email: self.inviter_email,
            invitee_email: self.invitee_email,
            status,
            created_at: self.created_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
