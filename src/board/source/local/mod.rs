//! Embedded SQLite backend. Lets the board run without a server; every
//! operation checks the persisted session the same way a remote API would.

pub mod db;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use self::db::LocalDb;
use super::DataSource;
use crate::board::models::*;
use crate::errors::{SourceError, SourceResult};

/// Async-safe handle to the local database.
///
/// Wraps `LocalDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<LocalDb>>,
}

impl DbHandle {
    pub fn new(db: LocalDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> SourceResult<R>
    where
        F: FnOnce(&LocalDb) -> SourceResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| SourceError::internal(format!("DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| SourceError::internal(format!("DB task panicked: {}", e)))?
    }

    /// Like [`call`](Self::call), but resolves the logged-in user first.
    async fn as_user<F, R>(&self, f: F) -> SourceResult<R>
    where
        F: FnOnce(&LocalDb, &User) -> SourceResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |db| {
            let user = db.require_user()?;
            f(db, &user)
        })
        .await
    }
}

/// [`DataSource`] over a [`LocalDb`].
#[derive(Clone)]
pub struct LocalSource {
    db: DbHandle,
}

impl LocalSource {
    pub fn open(path: &Path) -> SourceResult<Self> {
        Ok(Self {
            db: DbHandle::new(LocalDb::new(path)?),
        })
    }

    pub fn new_in_memory() -> SourceResult<Self> {
        Ok(Self {
            db: DbHandle::new(LocalDb::new_in_memory()?),
        })
    }

    /// The user owning the persisted session, if any.
    pub async fn current_user(&self) -> SourceResult<Option<User>> {
        self.db.call(|db| db.current_user()).await
    }
}

#[async_trait]
impl DataSource for LocalSource {
    async fn login(&self, credentials: &Credentials) -> SourceResult<AuthSession> {
        let credentials = credentials.clone();
        self.db.call(move |db| db.login(&credentials)).await
    }

    async fn register(&self, registration: &Registration) -> SourceResult<AuthSession> {
        let registration = registration.clone();
        self.db.call(move |db| db.register(&registration)).await
    }

    async fn logout(&self) -> SourceResult<()> {
        self.db.call(|db| db.logout()).await
    }

    async fn change_password(&self, current: &str, new_password: &str) -> SourceResult<()> {
        let (current, new_password) = (current.to_string(), new_password.to_string());
        self.db
            .as_user(move |db, user| db.change_password(user, &current, &new_password))
            .await
    }

    async fn get_dashboards(&self) -> SourceResult<Vec<Dashboard>> {
        self.db.as_user(|db, user| db.list_dashboards(user)).await
    }

    async fn get_dashboard(&self, dashboard_id: &str) -> SourceResult<Dashboard> {
        let dashboard_id = dashboard_id.to_string();
        self.db
            .as_user(move |db, user| db.get_dashboard(user, &dashboard_id))
            .await
    }

    async fn create_dashboard(&self, new: &NewDashboard) -> SourceResult<Dashboard> {
        let new = new.clone();
        self.db
            .as_user(move |db, user| db.create_dashboard(user, &new))
            .await
    }

    async fn update_dashboard(
        &self,
        dashboard_id: &str,
        patch: &DashboardPatch,
    ) -> SourceResult<Dashboard> {
        let (dashboard_id, patch) = (dashboard_id.to_string(), patch.clone());
        self.db
            .as_user(move |db, user| db.update_dashboard(user, &dashboard_id, &patch))
            .await
    }

    async fn delete_dashboard(&self, dashboard_id: &str) -> SourceResult<()> {
        let dashboard_id = dashboard_id.to_string();
        self.db
            .as_user(move |db, user| db.delete_dashboard(user, &dashboard_id))
            .await
    }

    async fn create_column(&self, dashboard_id: &str, new: &NewColumn) -> SourceResult<Column> {
        let (dashboard_id, new) = (dashboard_id.to_string(), new.clone());
        self.db
            .as_user(move |db, user| db.create_column(user, &dashboard_id, &new))
            .await
    }

    async fn update_column(
        &self,
        dashboard_id: &str,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> SourceResult<Column> {
        let (dashboard_id, column_id, patch) =
            (dashboard_id.to_string(), column_id.to_string(), patch.clone());
        self.db
            .as_user(move |db, user| db.update_column(user, &dashboard_id, &column_id, &patch))
            .await
    }

    async fn delete_column(&self, dashboard_id: &str, column_id: &str) -> SourceResult<()> {
        let (dashboard_id, column_id) = (dashboard_id.to_string(), column_id.to_string());
        self.db
            .as_user(move |db, user| db.delete_column(user, &dashboard_id, &column_id))
            .await
    }

    async fn update_column_order(
        &self,
        dashboard_id: &str,
        ordered_column_ids: &[String],
    ) -> SourceResult<()> {
        let (dashboard_id, ids) = (dashboard_id.to_string(), ordered_column_ids.to_vec());
        self.db
            .as_user(move |db, user| db.update_column_order(user, &dashboard_id, &ids))
            .await
    }

    async fn create_card(&self, dashboard_id: &str, new: &NewCard) -> SourceResult<Card> {
        let (dashboard_id, new) = (dashboard_id.to_string(), new.clone());
        self.db
            .as_user(move |db, user| db.create_card(user, &dashboard_id, &new))
            .await
    }

    async fn update_card(
        &self,
        dashboard_id: &str,
        card_id: &str,
        patch: &CardPatch,
    ) -> SourceResult<Card> {
        let (dashboard_id, card_id, patch) =
            (dashboard_id.to_string(), card_id.to_string(), patch.clone());
        self.db
            .as_user(move |db, user| db.update_card(user, &dashboard_id, &card_id, &patch))
            .await
    }

    async fn delete_card(&self, dashboard_id: &str, card_id: &str) -> SourceResult<()> {
        let (dashboard_id, card_id) = (dashboard_id.to_string(), card_id.to_string());
        self.db
            .as_user(move |db, user| db.delete_card(user, &dashboard_id, &card_id))
            .await
    }

    async fn move_card(
        &self,
        dashboard_id: &str,
        from_column_id: &str,
        to_column_id: &str,
        card_id: &str,
        destination_index: usize,
    ) -> SourceResult<()> {
        let dashboard_id = dashboard_id.to_string();
        let from = from_column_id.to_string();
        let to = to_column_id.to_string();
        let card_id = card_id.to_string();
        self.db
            .as_user(move |db, user| {
                db.move_card(user, &dashboard_id, &from, &to, &card_id, destination_index)
            })
            .await
    }

    async fn invite_to_dashboard(
        &self,
        dashboard_id: &str,
        email: &str,
    ) -> SourceResult<Invitation> {
        let (dashboard_id, email) = (dashboard_id.to_string(), email.to_string());
        self.db
            .as_user(move |db, user| db.invite(user, &dashboard_id, &email))
            .await
    }

    async fn list_invitations(&self) -> SourceResult<Vec<Invitation>> {
        self.db.as_user(|db, user| db.list_invitations(user)).await
    }

    async fn accept_invitation(&self, invitation_id: &str) -> SourceResult<Dashboard> {
        let invitation_id = invitation_id.to_string();
        self.db
            .as_user(move |db, user| db.accept_invitation(user, &invitation_id))
            .await
    }

    async fn reject_invitation(&self, invitation_id: &str) -> SourceResult<Invitation> {
        let invitation_id = invitation_id.to_string();
        self.db
            .as_user(move |db, user| db.reject_invitation(user, &invitation_id))
            .await
    }

    async fn remove_member(&self, dashboard_id: &str, user_id: &str) -> SourceResult<Dashboard> {
        let (dashboard_id, user_id) = (dashboard_id.to_string(), user_id.to_string());
        self.db
            .as_user(move |db, user| db.remove_member(user, &dashboard_id, &user_id))
            .await
    }
}
