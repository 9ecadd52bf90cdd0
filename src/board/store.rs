//! The board store: the single writer of the in-memory board view.
//!
//! State is published through a `tokio::sync::watch` channel. Optimistic
//! mutations (card moves, column reorders) are applied before the backend
//! answers and rolled back from a snapshot on failure; every other mutation
//! waits for the backend and commits its canonical answer.
//!
//! No public method returns an error. Failures land in
//! [`BoardState::error`]; optimistic calls additionally report a
//! [`SyncOutcome`] and confirmed calls return `None`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, watch};

use super::models::*;
use super::mutation::*;
use super::source::DataSource;
use crate::errors::BoardError;

/// Everything a UI renders. `columns` is the working copy of the current
/// dashboard's visible columns, ascending by `order`.
#[derive(Debug, Clone, Default)]
pub struct BoardState {
    pub user: Option<User>,
    pub dashboards: Vec<Dashboard>,
    pub current_dashboard: Option<Dashboard>,
    pub columns: Vec<Column>,
    pub invitations: Vec<Invitation>,
    pub loading: bool,
    pub error: Option<String>,
}

impl BoardState {
    pub fn current_dashboard_id(&self) -> Option<&str> {
        self.current_dashboard.as_ref().map(|d| d.id.as_str())
    }

    fn is_current(&self, dashboard_id: &str) -> bool {
        self.current_dashboard_id() == Some(dashboard_id)
    }

    /// The current dashboard or the cached list entry with this id.
    pub fn find_dashboard(&self, dashboard_id: &str) -> Option<&Dashboard> {
        self.current_dashboard
            .as_ref()
            .filter(|d| d.id == dashboard_id)
            .or_else(|| self.dashboards.iter().find(|d| d.id == dashboard_id))
    }

    /// Columns of a locally known dashboard; the working set for the current
    /// one.
    pub fn columns_of(&self, dashboard_id: &str) -> Option<&[Column]> {
        if self.is_current(dashboard_id) {
            return Some(&self.columns);
        }
        self.dashboards
            .iter()
            .find(|d| d.id == dashboard_id)
            .map(|d| d.columns.as_slice())
    }

    /// Copy the working columns into the current dashboard and its list entry.
    pub(crate) fn sync_current(&mut self) {
        let Some(current) = self.current_dashboard.as_mut() else {
            return;
        };
        current.columns = self.columns.clone();
        if let Some(entry) = self.dashboards.iter_mut().find(|d| d.id == current.id) {
            entry.columns = self.columns.clone();
        }
    }

    /// Make `dashboard` current, replacing the working columns wholesale.
    pub(crate) fn set_current(&mut self, mut dashboard: Dashboard) {
        let mut columns: Vec<Column> = dashboard
            .columns
            .iter()
            .filter(|c| !c.archived)
            .cloned()
            .collect();
        sort_columns(&mut columns);
        dashboard.columns = columns.clone();
        self.columns = columns;
        match self.dashboards.iter_mut().find(|d| d.id == dashboard.id) {
            Some(entry) => *entry = dashboard.clone(),
            None => self.dashboards.push(dashboard.clone()),
        }
        self.current_dashboard = Some(dashboard);
    }

    /// Fold a dashboard returned by the backend into the state. For the
    /// current dashboard the working columns are kept.
    pub(crate) fn merge_dashboard(&mut self, mut dashboard: Dashboard) {
        if self.is_current(&dashboard.id) {
            dashboard.columns = self.columns.clone();
            self.current_dashboard = Some(dashboard.clone());
        }
        match self.dashboards.iter_mut().find(|d| d.id == dashboard.id) {
            Some(entry) => *entry = dashboard,
            None => self.dashboards.push(dashboard),
        }
    }

    /// Edit the columns of a dashboard: the working set if it is current,
    /// otherwise its cached list entry.
    pub(crate) fn edit_columns(&mut self, dashboard_id: &str, f: impl FnOnce(&mut Vec<Column>)) {
        if self.is_current(dashboard_id) {
            f(&mut self.columns);
            self.sync_current();
        } else if let Some(entry) = self.dashboards.iter_mut().find(|d| d.id == dashboard_id) {
            f(&mut entry.columns);
        }
    }

    /// Edit dashboard metadata on both the current dashboard and its list
    /// entry.
    pub(crate) fn edit_dashboard(&mut self, dashboard_id: &str, mut f: impl FnMut(&mut Dashboard)) {
        if let Some(current) = self.current_dashboard.as_mut().filter(|d| d.id == dashboard_id) {
            f(current);
        }
        if let Some(entry) = self.dashboards.iter_mut().find(|d| d.id == dashboard_id) {
            f(entry);
        }
    }
}

/// What happened to an optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing would change; the backend was not called.
    Noop,
    /// Applied locally and confirmed by the backend.
    Committed,
    /// Applied locally, refused by the backend, snapshot restored.
    RolledBack,
    /// Refused locally before any state change or backend call.
    Rejected,
}

/// One async lock per dashboard, held by an optimistic mutation from snapshot
/// to reconciliation.
#[derive(Default)]
struct DashboardLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DashboardLocks {
    fn lock_for(&self, dashboard_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Entries only the map still references have no holder or waiter.
        locks.retain(|id, lock| id == dashboard_id || Arc::strong_count(lock) > 1);
        locks.entry(dashboard_id.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct StoreInner {
    source: Arc<dyn DataSource>,
    state: watch::Sender<BoardState>,
    locks: DashboardLocks,
    in_flight: AtomicUsize,
}

/// Keeps `loading` true while at least one confirmed call is pending.
struct LoadingGuard<'a> {
    inner: &'a StoreInner,
}

impl<'a> LoadingGuard<'a> {
    fn new(inner: &'a StoreInner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.state.send_if_modified(|state| {
            let changed = !state.loading;
            state.loading = true;
            changed
        });
        Self { inner }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.inner.state.send_if_modified(|state| {
            let loading = remaining > 0;
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }
}

/// Cheaply cloneable handle to one board session.
#[derive(Clone)]
pub struct BoardStore {
    inner: Arc<StoreInner>,
}

impl BoardStore {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source,
                state: watch::Sender::new(BoardState::default()),
                locks: DashboardLocks::default(),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// A copy of the current state.
    pub fn state(&self) -> BoardState {
        self.inner.state.borrow().clone()
    }

    /// Observe every state change.
    pub fn subscribe(&self) -> watch::Receiver<BoardState> {
        self.inner.state.subscribe()
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|state| state.error.take().is_some());
    }

    fn fail(&self, op: &str, err: BoardError) {
        tracing::warn!(op, error = %err, "Board mutation failed");
        self.inner.state.send_modify(|state| {
            state.error = Some(err.to_string());
        });
    }

    fn active_dashboard_id(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .current_dashboard_id()
            .map(String::from)
    }

    async fn run_optimistic<M: OptimisticMutation>(&self, mutation: M) -> SyncOutcome {
        let Some(dashboard_id) = self.active_dashboard_id() else {
            self.fail(mutation.name(), BoardError::NoActiveDashboard);
            return SyncOutcome::Rejected;
        };
        let lock = self.inner.locks.lock_for(&dashboard_id);
        let _serialized = lock.lock().await;

        let mut planned: Result<Option<(M::Request, Snapshot)>, BoardError> = Ok(None);
        self.inner.state.send_if_modified(|state| {
            if !state.is_current(&dashboard_id) {
                planned = Err(BoardError::NoActiveDashboard);
                return false;
            }
            match mutation.plan(&state.columns) {
                Ok(Some(request)) => {
                    let snapshot = Snapshot::capture(&dashboard_id, &state.columns);
                    mutation.apply(&mut state.columns, &request);
                    state.sync_current();
                    state.error = None;
                    planned = Ok(Some((request, snapshot)));
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    planned = Err(e);
                    false
                }
            }
        });

        let (request, snapshot) = match planned {
            Ok(Some(planned)) => planned,
            Ok(None) => {
                tracing::debug!(
                    op = mutation.name(),
                    dashboard_id = %dashboard_id,
                    "No-op mutation skipped"
                );
                return SyncOutcome::Noop;
            }
            Err(e) => {
                self.fail(mutation.name(), e);
                return SyncOutcome::Rejected;
            }
        };

        tracing::debug!(
            op = mutation.name(),
            dashboard_id = %dashboard_id,
            "Dispatching optimistic mutation"
        );
        match mutation
            .dispatch(self.inner.source.as_ref(), &dashboard_id, &request)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    op = mutation.name(),
                    dashboard_id = %dashboard_id,
                    "Optimistic mutation committed"
                );
                SyncOutcome::Committed
            }
            Err(err) => {
                tracing::warn!(
                    op = mutation.name(),
                    dashboard_id = %dashboard_id,
                    code = %err.code,
                    error = %err,
                    "Backend refused optimistic mutation, rolling back"
                );
                self.inner.state.send_modify(|state| {
                    snapshot.restore(state);
                    state.error = Some(err.message.clone());
                });
                SyncOutcome::RolledBack
            }
        }
    }

    async fn run_confirmed<M: ConfirmedMutation>(&self, mutation: M) -> Option<M::Output> {
        let lock = mutation
            .dashboard_scope()
            .map(|dashboard_id| self.inner.locks.lock_for(dashboard_id));
        let _serialized = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let local = {
            let state = self.inner.state.borrow();
            mutation
                .validate(&state)
                .map(|()| mutation.resolve_locally(&state))
        };
        match local {
            Err(e) => {
                self.fail(mutation.name(), e);
                return None;
            }
            Ok(Some(output)) => {
                tracing::debug!(op = mutation.name(), "Resolved from local state");
                return Some(output);
            }
            Ok(None) => {}
        }

        let _loading = LoadingGuard::new(&self.inner);
        tracing::debug!(op = mutation.name(), "Dispatching confirmed mutation");
        let result = match mutation.dispatch(self.inner.source.as_ref()).await {
            Ok(output) => mutation.verify(&output).map(|()| output),
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(output) => {
                self.inner.state.send_modify(|state| {
                    mutation.commit(state, &output);
                    state.error = None;
                });
                tracing::info!(op = mutation.name(), "Mutation committed");
                Some(output)
            }
            Err(err) => {
                self.fail(mutation.name(), err);
                None
            }
        }
    }

    /// Confirmed mutation scoped to the current dashboard.
    async fn on_current<M, F>(&self, op: &str, build: F) -> Option<M::Output>
    where
        M: ConfirmedMutation,
        F: FnOnce(String) -> M,
    {
        match self.active_dashboard_id() {
            Some(dashboard_id) => self.run_confirmed(build(dashboard_id)).await,
            None => {
                self.fail(op, BoardError::NoActiveDashboard);
                None
            }
        }
    }

    // ── Optimistic ────────────────────────────────────────────────────

    pub async fn move_card(
        &self,
        from_column_id: &str,
        to_column_id: &str,
        from_index: usize,
        to_index: usize,
    ) -> SyncOutcome {
        self.run_optimistic(MoveCard {
            from_column_id: from_column_id.to_string(),
            to_column_id: to_column_id.to_string(),
            from_index,
            to_index,
        })
        .await
    }

    pub async fn update_column_order(&self, ordered_ids: Vec<String>) -> SyncOutcome {
        self.run_optimistic(ReorderColumns { ordered_ids }).await
    }

    // ── Auth ──────────────────────────────────────────────────────────

    pub async fn login(&self, credentials: Credentials) -> Option<AuthSession> {
        self.run_confirmed(Login(credentials)).await
    }

    pub async fn register(&self, registration: Registration) -> Option<AuthSession> {
        self.run_confirmed(Register(registration)).await
    }

    pub async fn logout(&self) -> bool {
        self.run_confirmed(Logout).await.is_some()
    }

    pub async fn change_password(&self, current: &str, new_password: &str) -> bool {
        self.run_confirmed(ChangePassword {
            current: current.to_string(),
            new_password: new_password.to_string(),
        })
        .await
        .is_some()
    }

    // ── Dashboards ────────────────────────────────────────────────────

    pub async fn load_dashboards(&self) -> Option<Vec<Dashboard>> {
        self.run_confirmed(LoadDashboards).await
    }

    /// Re-fetch and switch to a dashboard, discarding local-only edits.
    pub async fn set_current_dashboard(&self, dashboard_id: &str) -> Option<Dashboard> {
        self.run_confirmed(SelectDashboard {
            dashboard_id: dashboard_id.to_string(),
        })
        .await?;
        self.state()
            .current_dashboard
            .filter(|d| d.id == dashboard_id)
    }

    pub async fn create_dashboard(&self, new: NewDashboard) -> Option<Dashboard> {
        self.run_confirmed(CreateDashboard(new)).await
    }

    pub async fn update_dashboard(
        &self,
        dashboard_id: &str,
        patch: DashboardPatch,
    ) -> Option<Dashboard> {
        self.run_confirmed(UpdateDashboard {
            dashboard_id: dashboard_id.to_string(),
            patch,
        })
        .await
    }

    pub async fn delete_dashboard(&self, dashboard_id: &str) -> bool {
        self.run_confirmed(DeleteDashboard {
            dashboard_id: dashboard_id.to_string(),
        })
        .await
        .is_some()
    }

    // ── Columns & cards (current dashboard) ───────────────────────────

    pub async fn add_column(&self, title: &str) -> Option<Column> {
        let column = NewColumn {
            title: title.trim().to_string(),
        };
        self.on_current("add_column", |dashboard_id| AddColumn {
            dashboard_id,
            column,
        })
        .await
    }

    pub async fn update_column(&self, column_id: &str, title: &str) -> Option<Column> {
        let patch = ColumnPatch {
            title: Some(title.trim().to_string()),
            archived: None,
        };
        self.on_current("update_column", |dashboard_id| UpdateColumn {
            dashboard_id,
            column_id: column_id.to_string(),
            patch,
        })
        .await
    }

    pub async fn archive_column(&self, column_id: &str) -> Option<Column> {
        self.on_current("archive_column", |dashboard_id| ArchiveColumn {
            dashboard_id,
            column_id: column_id.to_string(),
        })
        .await
    }

    pub async fn delete_column(&self, column_id: &str) -> bool {
        self.on_current("delete_column", |dashboard_id| DeleteColumn {
            dashboard_id,
            column_id: column_id.to_string(),
        })
        .await
        .is_some()
    }

    pub async fn add_card(&self, card: NewCard) -> Option<Card> {
        self.on_current("add_card", |dashboard_id| AddCard { dashboard_id, card })
            .await
    }

    pub async fn update_card(&self, card_id: &str, patch: CardPatch) -> Option<Card> {
        self.on_current("update_card", |dashboard_id| UpdateCard {
            dashboard_id,
            card_id: card_id.to_string(),
            patch,
        })
        .await
    }

    pub async fn delete_card(&self, card_id: &str) -> bool {
        self.on_current("delete_card", |dashboard_id| DeleteCard {
            dashboard_id,
            card_id: card_id.to_string(),
        })
        .await
        .is_some()
    }

    // ── Invitations & membership ──────────────────────────────────────

    pub async fn invite_to_dashboard(&self, dashboard_id: &str, email: &str) -> Option<Invitation> {
        self.run_confirmed(InviteToDashboard {
            dashboard_id: dashboard_id.to_string(),
            email: email.to_string(),
        })
        .await
    }

    /// Pending invitations addressed to the logged-in user.
    pub async fn load_invitations(&self) -> Option<Vec<Invitation>> {
        self.run_confirmed(LoadInvitations).await
    }

    pub async fn accept_invitation(&self, invitation_id: &str) -> Option<Dashboard> {
        self.run_confirmed(AcceptInvitation {
            invitation_id: invitation_id.to_string(),
        })
        .await
    }

    pub async fn reject_invitation(&self, invitation_id: &str) -> Option<Invitation> {
        self.run_confirmed(RejectInvitation {
            invitation_id: invitation_id.to_string(),
        })
        .await
    }

    pub async fn remove_member(&self, dashboard_id: &str, user_id: &str) -> Option<Dashboard> {
        self.run_confirmed(RemoveMember {
            dashboard_id: dashboard_id.to_string(),
            user_id: user_id.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::fixtures::*;
    use crate::board::source::local::LocalSource;
    use crate::board::source::mock::MockSource;
    use crate::errors::SourceError;

    async fn store_with(columns: Vec<Column>) -> (BoardStore, Arc<MockSource>) {
        let mock = Arc::new(MockSource::new(vec![dashboard("d1", columns)]));
        let store = BoardStore::new(mock.clone());
        assert!(store.set_current_dashboard("d1").await.is_some());
        (store, mock)
    }

    fn two_columns() -> Vec<Column> {
        vec![column("A", 0, &["c1", "c2"]), column("B", 1, &[])]
    }

    #[tokio::test]
    async fn test_same_slot_move_makes_no_call_and_no_change() {
        let (store, mock) = store_with(two_columns()).await;
        let rx = store.subscribe();

        assert_eq!(store.move_card("A", "A", 1, 1).await, SyncOutcome::Noop);
        assert_eq!(mock.call_count("move_card"), 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_unchanged_column_order_makes_no_call() {
        let (store, mock) = store_with(two_columns()).await;
        let outcome = store
            .update_column_order(vec!["A".into(), "B".into()])
            .await;
        assert_eq!(outcome, SyncOutcome::Noop);
        assert_eq!(mock.call_count("update_column_order"), 0);
    }

    #[tokio::test]
    async fn test_move_is_visible_before_backend_answers_then_rolls_back() {
        let (store, mock) = store_with(two_columns()).await;
        mock.hold_next();
        mock.fail_next(SourceError::network("connection reset"));

        let task = tokio::spawn({
            let store = store.clone();
            async move { store.move_card("A", "B", 0, 0).await }
        });
        mock.wait_for_call().await;
        assert_eq!(
            layout(&store.state().columns),
            expect_layout(&[("A", &["c2"]), ("B", &["c1"])])
        );

        mock.release();
        assert_eq!(task.await.unwrap(), SyncOutcome::RolledBack);
        let state = store.state();
        assert_eq!(
            layout(&state.columns),
            expect_layout(&[("A", &["c1", "c2"]), ("B", &[])])
        );
        assert_eq!(state.columns[0].cards[0].column_id, "A");
        assert_eq!(state.error.as_deref(), Some("connection reset"));
        assert_eq!(
            layout(&state.current_dashboard.unwrap().columns),
            layout(&state.columns)
        );
    }

    #[tokio::test]
    async fn test_successful_move_commits() {
        let (store, mock) = store_with(two_columns()).await;
        assert_eq!(store.move_card("A", "B", 0, 0).await, SyncOutcome::Committed);

        let state = store.state();
        assert_eq!(
            layout(&state.columns),
            expect_layout(&[("A", &["c2"]), ("B", &["c1"])])
        );
        assert!(state.error.is_none());
        assert_eq!(mock.call_count("move_card"), 1);
        let persisted = mock.dashboard("d1").unwrap();
        assert_eq!(layout(&persisted.columns), layout(&state.columns));
    }

    #[tokio::test]
    async fn test_invalid_move_is_rejected_without_call() {
        let (store, mock) = store_with(two_columns()).await;
        assert_eq!(store.move_card("A", "B", 5, 0).await, SyncOutcome::Rejected);
        assert_eq!(mock.call_count("move_card"), 0);
        let state = store.state();
        assert!(state.error.unwrap().contains("out of range"));
        assert_eq!(
            layout(&state.columns),
            expect_layout(&[("A", &["c1", "c2"]), ("B", &[])])
        );
    }

    #[tokio::test]
    async fn test_reorder_columns_assigns_orders() {
        let (store, mock) = store_with(vec![
            column("X", 0, &[]),
            column("Y", 1, &[]),
            column("Z", 2, &[]),
        ])
        .await;
        let outcome = store
            .update_column_order(vec!["Z".into(), "X".into(), "Y".into()])
            .await;
        assert_eq!(outcome, SyncOutcome::Committed);

        let orders: Vec<(String, i64)> = store
            .state()
            .columns
            .into_iter()
            .map(|c| (c.id, c.order))
            .collect();
        assert_eq!(
            orders,
            vec![("Z".into(), 0), ("X".into(), 1), ("Y".into(), 2)]
        );
        assert_eq!(mock.call_count("update_column_order"), 1);
    }

    #[tokio::test]
    async fn test_partial_column_order_never_drops_columns() {
        let (store, mock) = store_with(vec![column("X", 0, &[]), column("Y", 1, &[])]).await;
        let outcome = store.update_column_order(vec!["Y".into()]).await;
        assert_eq!(outcome, SyncOutcome::Rejected);
        assert_eq!(store.state().columns.len(), 2);
        assert_eq!(mock.call_count("update_column_order"), 0);
    }

    #[tokio::test]
    async fn test_reorder_rollback_restores_orders() {
        let (store, mock) = store_with(vec![column("X", 0, &[]), column("Y", 1, &[])]).await;
        mock.fail_next(SourceError::forbidden("read-only board"));
        let outcome = store
            .update_column_order(vec!["Y".into(), "X".into()])
            .await;
        assert_eq!(outcome, SyncOutcome::RolledBack);
        let ids: Vec<String> = store.state().columns.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn test_set_current_dashboard_discards_local_edits() {
        let (store, _mock) = store_with(two_columns()).await;
        store.inner.state.send_modify(|state| {
            state.columns[0].cards.clear();
            state.columns.pop();
        });

        store.set_current_dashboard("d1").await.unwrap();
        assert_eq!(
            layout(&store.state().columns),
            expect_layout(&[("A", &["c1", "c2"]), ("B", &[])])
        );
    }

    #[tokio::test]
    async fn test_set_current_dashboard_unknown_id_sets_error() {
        let (store, _mock) = store_with(two_columns()).await;
        assert!(store.set_current_dashboard("nope").await.is_none());
        let state = store.state();
        assert!(state.error.unwrap().contains("nope"));
        assert_eq!(state.current_dashboard.unwrap().id, "d1");
    }

    #[tokio::test]
    async fn test_overlapping_moves_are_serialized() {
        let (store, mock) = store_with(two_columns()).await;
        mock.hold_next();
        mock.fail_next(SourceError::timeout("slow backend"));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.move_card("A", "B", 0, 0).await }
        });
        mock.wait_for_call().await;

        let second = tokio::spawn({
            let store = store.clone();
            async move { store.move_card("A", "A", 0, 1).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The second move waits for the first to settle.
        assert_eq!(mock.call_count("move_card"), 1);

        mock.release();
        assert_eq!(first.await.unwrap(), SyncOutcome::RolledBack);
        assert_eq!(second.await.unwrap(), SyncOutcome::Committed);
        assert_eq!(
            layout(&store.state().columns),
            expect_layout(&[("A", &["c2", "c1"]), ("B", &[])])
        );
    }

    #[tokio::test]
    async fn test_confirmed_mutation_waits_for_inflight_move() {
        let (store, mock) = store_with(two_columns()).await;
        mock.hold_next();
        mock.fail_next(SourceError::network("connection reset"));

        let moving = tokio::spawn({
            let store = store.clone();
            async move { store.move_card("A", "B", 0, 0).await }
        });
        mock.wait_for_call().await;

        let adding = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .add_card(NewCard {
                        column_id: "B".into(),
                        title: "Late card".into(),
                        details: CardDetails::default(),
                    })
                    .await
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mock.call_count("create_card"), 0);

        mock.release();
        assert_eq!(moving.await.unwrap(), SyncOutcome::RolledBack);
        let card = adding.await.unwrap().unwrap();
        assert_eq!(card.id, "card-1");

        let expected = expect_layout(&[("A", &["c1", "c2"]), ("B", &["card-1"])]);
        assert_eq!(layout(&store.state().columns), expected);
        assert_eq!(layout(&mock.dashboard("d1").unwrap().columns), expected);
    }

    #[test]
    fn test_settled_dashboard_locks_are_pruned() {
        let locks = DashboardLocks::default();
        let held = locks.lock_for("d1");
        drop(locks.lock_for("d2"));
        drop(locks.lock_for("d3"));
        assert_eq!(locks.len(), 2);

        drop(held);
        drop(locks.lock_for("d4"));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_load_dashboards_rejects_ownerless_members() {
        let mut broken = dashboard("d1", two_columns());
        broken.members.clear();
        let mock = Arc::new(MockSource::new(vec![broken]));
        let store = BoardStore::new(mock.clone());

        assert!(store.load_dashboards().await.is_none());
        let state = store.state();
        assert!(state.dashboards.is_empty());
        assert!(state.error.unwrap().contains("not a member"));
        assert!(store.set_current_dashboard("d1").await.is_none());
        assert!(store.state().current_dashboard.is_none());
    }

    #[tokio::test]
    async fn test_optimistic_mutation_without_dashboard_is_rejected() {
        let store = BoardStore::new(Arc::new(MockSource::new(Vec::new())));
        assert_eq!(store.move_card("A", "B", 0, 0).await, SyncOutcome::Rejected);
        assert_eq!(
            store.state().error.as_deref(),
            Some(BoardError::NoActiveDashboard.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_add_column_commits_backend_entity() {
        let (store, mock) = store_with(two_columns()).await;
        let column = store.add_column("Review").await.unwrap();
        assert_eq!(column.order, 2);
        let state = store.state();
        assert_eq!(state.columns.last().unwrap().title, "Review");
        assert!(!state.loading);
        assert_eq!(mock.call_count("create_column"), 1);
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected_before_network() {
        let (store, mock) = store_with(two_columns()).await;
        assert!(store.add_column("   ").await.is_none());
        assert!(store.state().error.unwrap().contains("title"));
        assert_eq!(mock.call_count("create_column"), 0);
    }

    #[tokio::test]
    async fn test_failed_confirmed_mutation_leaves_state_and_sets_error() {
        let (store, mock) = store_with(two_columns()).await;
        mock.fail_next(SourceError::internal("database is locked"));
        let before = layout(&store.state().columns);

        let created = store
            .add_card(NewCard {
                column_id: "B".into(),
                title: "New".into(),
                details: CardDetails::default(),
            })
            .await;
        assert!(created.is_none());
        let state = store.state();
        assert_eq!(layout(&state.columns), before);
        assert_eq!(state.error.as_deref(), Some("database is locked"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_loading_is_true_while_confirmed_call_pending() {
        let (store, mock) = store_with(two_columns()).await;
        mock.hold_next();
        let task = tokio::spawn({
            let store = store.clone();
            async move { store.load_dashboards().await }
        });
        mock.wait_for_call().await;
        assert!(store.state().loading);
        mock.release();
        assert!(task.await.unwrap().is_some());
        assert!(!store.state().loading);
    }

    #[tokio::test]
    async fn test_card_crud_updates_working_set() {
        let (store, _mock) = store_with(two_columns()).await;
        let card = store
            .add_card(NewCard {
                column_id: "B".into(),
                title: "Write docs".into(),
                details: CardDetails::default(),
            })
            .await
            .unwrap();
        assert_eq!(store.state().columns[1].cards[0].id, card.id);

        let updated = store
            .update_card(
                &card.id,
                CardPatch {
                    title: Some("Write more docs".into()),
                    details: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Write more docs");
        assert_eq!(store.state().columns[1].cards[0].title, "Write more docs");

        assert!(store.delete_card(&card.id).await);
        assert!(store.state().columns[1].cards.is_empty());
    }

    #[tokio::test]
    async fn test_archive_and_delete_column() {
        let (store, mock) = store_with(vec![
            column("A", 0, &[]),
            column("B", 1, &[]),
            column("C", 2, &[]),
        ])
        .await;
        let archived = store.archive_column("A").await.unwrap();
        assert!(archived.archived);
        assert!(mock.dashboard("d1").unwrap().columns[0].archived);
        assert!(store.delete_column("B").await);

        let ids: Vec<String> = store.state().columns.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["C"]);
    }

    #[tokio::test]
    async fn test_invite_twice_dispatches_once() {
        let (store, mock) = store_with(two_columns()).await;
        let first = store
            .invite_to_dashboard("d1", "bob@example.com")
            .await
            .unwrap();
        let second = store
            .invite_to_dashboard("d1", "Bob@Example.com")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(mock.call_count("invite_to_dashboard"), 1);

        let pending = store
            .state()
            .current_dashboard
            .unwrap()
            .invitations
            .iter()
            .filter(|i| i.status == InvitationStatus::Pending)
            .count();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn test_delete_current_dashboard_clears_selection() {
        let (store, _mock) = store_with(two_columns()).await;
        assert!(store.delete_dashboard("d1").await);
        let state = store.state();
        assert!(state.current_dashboard.is_none());
        assert!(state.columns.is_empty());
        assert!(state.dashboards.is_empty());
    }

    #[tokio::test]
    async fn test_logout_resets_state() {
        let (store, _mock) = store_with(two_columns()).await;
        store
            .login(Credentials {
                email: "owner@example.com".into(),
                password: "secret".into(),
            })
            .await
            .unwrap();
        assert!(store.state().user.is_some());
        assert!(store.logout().await);
        let state = store.state();
        assert!(state.user.is_none());
        assert!(state.dashboards.is_empty());
        assert!(state.current_dashboard.is_none());
    }

    #[tokio::test]
    async fn test_error_is_cleared_by_next_success() {
        let (store, _mock) = store_with(two_columns()).await;
        store.add_column("").await;
        assert!(store.state().error.is_some());
        store.add_column("Next").await.unwrap();
        assert!(store.state().error.is_none());

        store.add_column("").await;
        store.clear_error();
        assert!(store.state().error.is_none());
    }

    #[tokio::test]
    async fn test_store_against_local_backend() {
        let source = Arc::new(LocalSource::new_in_memory().unwrap());
        let store = BoardStore::new(source);
        store
            .register(Registration {
                email: "alice@example.com".into(),
                password: "hunter22".into(),
                name: "Alice".into(),
            })
            .await
            .unwrap();
        let dashboard = store
            .create_dashboard(NewDashboard {
                title: "Sprint".into(),
                background: None,
            })
            .await
            .unwrap();
        store.set_current_dashboard(&dashboard.id).await.unwrap();
        let todo = store.add_column("Todo").await.unwrap();
        let done = store.add_column("Done").await.unwrap();
        store
            .add_card(NewCard {
                column_id: todo.id.clone(),
                title: "First".into(),
                details: CardDetails::default(),
            })
            .await
            .unwrap();

        assert_eq!(
            store.move_card(&todo.id, &done.id, 0, 0).await,
            SyncOutcome::Committed
        );
        // A fresh fetch agrees with the optimistic state.
        let fresh = store.set_current_dashboard(&dashboard.id).await.unwrap();
        assert!(fresh.columns[0].cards.is_empty());
        assert_eq!(fresh.columns[1].cards[0].title, "First");
        assert_eq!(fresh.columns[1].cards[0].column_id, done.id);
    }
}
