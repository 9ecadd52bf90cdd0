//! Typed board mutations.
//!
//! Two classes, enforced by the type system:
//! - [`OptimisticMutation`]: applied to the working columns before the
//!   backend answers; the store snapshots the columns first and restores them
//!   if the call fails. Only card moves and column reorders are optimistic.
//! - [`ConfirmedMutation`]: validated locally, dispatched, and committed from
//!   the canonical entity the backend returns. Nothing to roll back.

use async_trait::async_trait;

use super::models::*;
use super::source::DataSource;
use super::store::BoardState;
use crate::errors::{BoardError, SourceResult};

// ── Optimistic mutations ──────────────────────────────────────────────

#[async_trait]
pub trait OptimisticMutation: Send + Sync {
    /// What the backend call needs, resolved from the pre-mutation columns.
    type Request: Send + Sync;

    fn name(&self) -> &'static str;

    /// Validate against the working columns. `Ok(None)` means the mutation
    /// would change nothing and must not be dispatched.
    fn plan(&self, columns: &[Column]) -> Result<Option<Self::Request>, BoardError>;

    /// Apply a planned mutation. Infallible once `plan` succeeded.
    fn apply(&self, columns: &mut Vec<Column>, request: &Self::Request);

    async fn dispatch(
        &self,
        source: &dyn DataSource,
        dashboard_id: &str,
        request: &Self::Request,
    ) -> SourceResult<()>;
}

/// Owned copy of a dashboard's working columns taken before an optimistic
/// apply.
#[derive(Debug, Clone)]
pub struct Snapshot {
    dashboard_id: String,
    columns: Vec<Column>,
}

impl Snapshot {
    pub fn capture(dashboard_id: &str, columns: &[Column]) -> Self {
        Self {
            dashboard_id: dashboard_id.to_string(),
            columns: columns.to_vec(),
        }
    }

    /// Replace the working columns with the snapshot. Returns `false` when
    /// the user has switched dashboards since; the fresh fetch then already
    /// reflects the backend and is left alone.
    pub fn restore(self, state: &mut BoardState) -> bool {
        if state.current_dashboard_id() != Some(self.dashboard_id.as_str()) {
            return false;
        }
        state.columns = self.columns;
        state.sync_current();
        true
    }
}

/// Move a card from `(from_column_id, from_index)` to
/// `(to_column_id, to_index)`. `to_index` addresses the destination list
/// after the card has been removed from its source.
#[derive(Debug, Clone)]
pub struct MoveCard {
    pub from_column_id: String,
    pub to_column_id: String,
    pub from_index: usize,
    pub to_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCardRequest {
    pub card_id: String,
    pub from_column_id: String,
    pub to_column_id: String,
    pub destination_index: usize,
}

#[async_trait]
impl OptimisticMutation for MoveCard {
    type Request = MoveCardRequest;

    fn name(&self) -> &'static str {
        "move_card"
    }

    fn plan(&self, columns: &[Column]) -> Result<Option<MoveCardRequest>, BoardError> {
        if self.from_column_id == self.to_column_id && self.from_index == self.to_index {
            return Ok(None);
        }
        let find = |id: &str| {
            columns
                .iter()
                .find(|c| c.id == id)
                .ok_or_else(|| BoardError::ColumnNotFound { id: id.to_string() })
        };
        let source = find(&self.from_column_id)?;
        let destination = find(&self.to_column_id)?;

        let card = source.cards.get(self.from_index).ok_or_else(|| {
            BoardError::CardIndexOutOfRange {
                column_id: source.id.clone(),
                index: self.from_index,
            }
        })?;
        let room = if source.id == destination.id {
            destination.cards.len() - 1
        } else {
            destination.cards.len()
        };
        if self.to_index > room {
            return Err(BoardError::CardIndexOutOfRange {
                column_id: destination.id.clone(),
                index: self.to_index,
            });
        }

        Ok(Some(MoveCardRequest {
            card_id: card.id.clone(),
            from_column_id: self.from_column_id.clone(),
            to_column_id: self.to_column_id.clone(),
            destination_index: self.to_index,
        }))
    }

    fn apply(&self, columns: &mut Vec<Column>, request: &MoveCardRequest) {
        let Some(source) = columns.iter_mut().find(|c| c.id == request.from_column_id) else {
            return;
        };
        let mut card = source.cards.remove(self.from_index);
        card.column_id = request.to_column_id.clone();
        if let Some(destination) = columns.iter_mut().find(|c| c.id == request.to_column_id) {
            destination.cards.insert(request.destination_index, card);
        }
    }

    async fn dispatch(
        &self,
        source: &dyn DataSource,
        dashboard_id: &str,
        request: &MoveCardRequest,
    ) -> SourceResult<()> {
        source
            .move_card(
                dashboard_id,
                &request.from_column_id,
                &request.to_column_id,
                &request.card_id,
                request.destination_index,
            )
            .await
    }
}

/// Give every column the order of its position in `ordered_ids`.
#[derive(Debug, Clone)]
pub struct ReorderColumns {
    pub ordered_ids: Vec<String>,
}

#[async_trait]
impl OptimisticMutation for ReorderColumns {
    type Request = Vec<String>;

    fn name(&self) -> &'static str {
        "update_column_order"
    }

    fn plan(&self, columns: &[Column]) -> Result<Option<Vec<String>>, BoardError> {
        let mut current = columns.to_vec();
        sort_columns(&mut current);
        if current.iter().map(|c| &c.id).eq(self.ordered_ids.iter()) {
            return Ok(None);
        }

        let mut requested: Vec<&str> = self.ordered_ids.iter().map(String::as_str).collect();
        let mut known: Vec<&str> = columns.iter().map(|c| c.id.as_str()).collect();
        requested.sort_unstable();
        known.sort_unstable();
        if requested != known {
            return Err(BoardError::validation(
                "Column order must list every column of the dashboard exactly once",
            ));
        }
        Ok(Some(self.ordered_ids.clone()))
    }

    fn apply(&self, columns: &mut Vec<Column>, ordered_ids: &Vec<String>) {
        for column in columns.iter_mut() {
            if let Some(position) = ordered_ids.iter().position(|id| *id == column.id) {
                column.order = position as i64;
            }
        }
        sort_columns(columns);
    }

    async fn dispatch(
        &self,
        source: &dyn DataSource,
        dashboard_id: &str,
        ordered_ids: &Vec<String>,
    ) -> SourceResult<()> {
        source.update_column_order(dashboard_id, ordered_ids).await
    }
}

// ── Confirmed mutations ───────────────────────────────────────────────

#[async_trait]
pub trait ConfirmedMutation: Send + Sync {
    type Output: Clone + Send;

    fn name(&self) -> &'static str;

    /// The dashboard this mutation touches. Scoped mutations queue behind an
    /// in-flight optimistic mutation on the same dashboard.
    fn dashboard_scope(&self) -> Option<&str> {
        None
    }

    /// Reject the request before any network call.
    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        Ok(())
    }

    /// Answer from local state when it already holds the result.
    fn resolve_locally(&self, _state: &BoardState) -> Option<Self::Output> {
        None
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Self::Output>;

    /// Check the backend's answer before it reaches the state.
    fn verify(&self, _output: &Self::Output) -> Result<(), BoardError> {
        Ok(())
    }

    /// Fold the backend's canonical answer into the state.
    fn commit(&self, state: &mut BoardState, output: &Self::Output);
}

fn require_title(title: &str, what: &str) -> Result<(), BoardError> {
    if title.trim().is_empty() {
        return Err(BoardError::validation(format!("{} title is required", what)));
    }
    Ok(())
}

fn require_email(email: &str) -> Result<(), BoardError> {
    if !looks_like_email(email) {
        return Err(BoardError::validation(format!(
            "'{}' is not a valid email address",
            email.trim()
        )));
    }
    Ok(())
}

/// Fails when the dashboard is loaded locally and lacks the column. Unknown
/// dashboards are left to the backend.
fn require_column(state: &BoardState, dashboard_id: &str, column_id: &str) -> Result<(), BoardError> {
    match state.columns_of(dashboard_id) {
        Some(columns) if !columns.iter().any(|c| c.id == column_id) => {
            Err(BoardError::ColumnNotFound {
                id: column_id.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn require_card(state: &BoardState, dashboard_id: &str, card_id: &str) -> Result<(), BoardError> {
    match state.columns_of(dashboard_id) {
        Some(columns) if !columns.iter().any(|c| c.position_of(card_id).is_some()) => {
            Err(BoardError::CardNotFound {
                id: card_id.to_string(),
            })
        }
        _ => Ok(()),
    }
}

// Auth

pub struct Login(pub Credentials);

#[async_trait]
impl ConfirmedMutation for Login {
    type Output = AuthSession;

    fn name(&self) -> &'static str {
        "login"
    }

    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        require_email(&self.0.email)?;
        if self.0.password.is_empty() {
            return Err(BoardError::validation("Password is required"));
        }
        Ok(())
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<AuthSession> {
        source.login(&self.0).await
    }

    fn commit(&self, state: &mut BoardState, session: &AuthSession) {
        state.user = Some(session.user.clone());
    }
}

pub struct Register(pub Registration);

#[async_trait]
impl ConfirmedMutation for Register {
    type Output = AuthSession;

    fn name(&self) -> &'static str {
        "register"
    }

    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        require_email(&self.0.email)?;
        if self.0.name.trim().is_empty() {
            return Err(BoardError::validation("Name is required"));
        }
        if self.0.password.is_empty() {
            return Err(BoardError::validation("Password is required"));
        }
        Ok(())
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<AuthSession> {
        source.register(&self.0).await
    }

    fn commit(&self, state: &mut BoardState, session: &AuthSession) {
        state.user = Some(session.user.clone());
    }
}

pub struct Logout;

#[async_trait]
impl ConfirmedMutation for Logout {
    type Output = ();

    fn name(&self) -> &'static str {
        "logout"
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<()> {
        source.logout().await
    }

    fn commit(&self, state: &mut BoardState, _: &()) {
        *state = BoardState::default();
    }
}

pub struct ChangePassword {
    pub current: String,
    pub new_password: String,
}

#[async_trait]
impl ConfirmedMutation for ChangePassword {
    type Output = ();

    fn name(&self) -> &'static str {
        "change_password"
    }

    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        if self.new_password.is_empty() {
            return Err(BoardError::validation("New password is required"));
        }
        if self.new_password == self.current {
            return Err(BoardError::validation(
                "New password must differ from the current one",
            ));
        }
        Ok(())
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<()> {
        source
            .change_password(&self.current, &self.new_password)
            .await
    }

    fn commit(&self, _state: &mut BoardState, _: &()) {}
}

// Dashboards

pub struct LoadDashboards;

#[async_trait]
impl ConfirmedMutation for LoadDashboards {
    type Output = Vec<Dashboard>;

    fn name(&self) -> &'static str {
        "load_dashboards"
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Vec<Dashboard>> {
        source.get_dashboards().await
    }

    fn verify(&self, dashboards: &Vec<Dashboard>) -> Result<(), BoardError> {
        dashboards.iter().try_for_each(Dashboard::check_invariants)
    }

    fn commit(&self, state: &mut BoardState, dashboards: &Vec<Dashboard>) {
        state.dashboards = dashboards.clone();
    }
}

/// Re-fetch the dashboard list and make `dashboard_id` current, discarding
/// any local-only edits to its columns.
pub struct SelectDashboard {
    pub dashboard_id: String,
}

#[async_trait]
impl ConfirmedMutation for SelectDashboard {
    type Output = Vec<Dashboard>;

    fn name(&self) -> &'static str {
        "set_current_dashboard"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Vec<Dashboard>> {
        source.get_dashboards().await
    }

    fn verify(&self, dashboards: &Vec<Dashboard>) -> Result<(), BoardError> {
        dashboards.iter().try_for_each(Dashboard::check_invariants)?;
        if !dashboards.iter().any(|d| d.id == self.dashboard_id) {
            return Err(BoardError::DashboardNotFound {
                id: self.dashboard_id.clone(),
            });
        }
        Ok(())
    }

    fn commit(&self, state: &mut BoardState, dashboards: &Vec<Dashboard>) {
        state.dashboards = dashboards.clone();
        if let Some(current) = dashboards.iter().find(|d| d.id == self.dashboard_id) {
            state.set_current(current.clone());
        }
    }
}

pub struct CreateDashboard(pub NewDashboard);

#[async_trait]
impl ConfirmedMutation for CreateDashboard {
    type Output = Dashboard;

    fn name(&self) -> &'static str {
        "create_dashboard"
    }

    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        require_title(&self.0.title, "Dashboard")
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Dashboard> {
        source.create_dashboard(&self.0).await
    }

    fn commit(&self, state: &mut BoardState, dashboard: &Dashboard) {
        state.merge_dashboard(dashboard.clone());
    }
}

pub struct UpdateDashboard {
    pub dashboard_id: String,
    pub patch: DashboardPatch,
}

#[async_trait]
impl ConfirmedMutation for UpdateDashboard {
    type Output = Dashboard;

    fn name(&self) -> &'static str {
        "update_dashboard"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        match &self.patch.title {
            Some(title) => require_title(title, "Dashboard"),
            None => Ok(()),
        }
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Dashboard> {
        source
            .update_dashboard(&self.dashboard_id, &self.patch)
            .await
    }

    fn commit(&self, state: &mut BoardState, dashboard: &Dashboard) {
        state.merge_dashboard(dashboard.clone());
    }
}

pub struct DeleteDashboard {
    pub dashboard_id: String,
}

#[async_trait]
impl ConfirmedMutation for DeleteDashboard {
    type Output = ();

    fn name(&self) -> &'static str {
        "delete_dashboard"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<()> {
        source.delete_dashboard(&self.dashboard_id).await
    }

    fn commit(&self, state: &mut BoardState, _: &()) {
        state.dashboards.retain(|d| d.id != self.dashboard_id);
        if state.current_dashboard_id() == Some(self.dashboard_id.as_str()) {
            state.current_dashboard = None;
            state.columns.clear();
        }
    }
}

// Columns

pub struct AddColumn {
    pub dashboard_id: String,
    pub column: NewColumn,
}

#[async_trait]
impl ConfirmedMutation for AddColumn {
    type Output = Column;

    fn name(&self) -> &'static str {
        "add_column"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, _state: &BoardState) -> Result<(), BoardError> {
        require_title(&self.column.title, "Column")
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Column> {
        source
            .create_column(&self.dashboard_id, &self.column)
            .await
    }

    fn commit(&self, state: &mut BoardState, column: &Column) {
        state.edit_columns(&self.dashboard_id, |columns| {
            columns.retain(|c| c.id != column.id);
            columns.push(column.clone());
            sort_columns(columns);
        });
    }
}

pub struct UpdateColumn {
    pub dashboard_id: String,
    pub column_id: String,
    pub patch: ColumnPatch,
}

#[async_trait]
impl ConfirmedMutation for UpdateColumn {
    type Output = Column;

    fn name(&self) -> &'static str {
        "update_column"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        if let Some(title) = &self.patch.title {
            require_title(title, "Column")?;
        }
        require_column(state, &self.dashboard_id, &self.column_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Column> {
        source
            .update_column(&self.dashboard_id, &self.column_id, &self.patch)
            .await
    }

    fn commit(&self, state: &mut BoardState, column: &Column) {
        state.edit_columns(&self.dashboard_id, |columns| {
            if column.archived {
                columns.retain(|c| c.id != column.id);
                return;
            }
            if let Some(existing) = columns.iter_mut().find(|c| c.id == column.id) {
                // Cards are owned by the working set; only metadata changes here.
                existing.title = column.title.clone();
                existing.order = column.order;
            }
            sort_columns(columns);
        });
    }
}

/// Persist `archived = true` and drop the column from the working set.
pub struct ArchiveColumn {
    pub dashboard_id: String,
    pub column_id: String,
}

#[async_trait]
impl ConfirmedMutation for ArchiveColumn {
    type Output = Column;

    fn name(&self) -> &'static str {
        "archive_column"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        require_column(state, &self.dashboard_id, &self.column_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Column> {
        let patch = ColumnPatch {
            title: None,
            archived: Some(true),
        };
        source
            .update_column(&self.dashboard_id, &self.column_id, &patch)
            .await
    }

    fn commit(&self, state: &mut BoardState, column: &Column) {
        state.edit_columns(&self.dashboard_id, |columns| {
            columns.retain(|c| c.id != column.id);
        });
    }
}

pub struct DeleteColumn {
    pub dashboard_id: String,
    pub column_id: String,
}

#[async_trait]
impl ConfirmedMutation for DeleteColumn {
    type Output = ();

    fn name(&self) -> &'static str {
        "delete_column"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        require_column(state, &self.dashboard_id, &self.column_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<()> {
        source
            .delete_column(&self.dashboard_id, &self.column_id)
            .await
    }

    fn commit(&self, state: &mut BoardState, _: &()) {
        state.edit_columns(&self.dashboard_id, |columns| {
            columns.retain(|c| c.id != self.column_id);
        });
    }
}

// Cards

pub struct AddCard {
    pub dashboard_id: String,
    pub card: NewCard,
}

#[async_trait]
impl ConfirmedMutation for AddCard {
    type Output = Card;

    fn name(&self) -> &'static str {
        "add_card"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        require_title(&self.card.title, "Card")?;
        require_column(state, &self.dashboard_id, &self.card.column_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Card> {
        source.create_card(&self.dashboard_id, &self.card).await
    }

    fn commit(&self, state: &mut BoardState, card: &Card) {
        state.edit_columns(&self.dashboard_id, |columns| {
            if let Some(column) = columns.iter_mut().find(|c| c.id == card.column_id) {
                column.cards.retain(|k| k.id != card.id);
                column.cards.push(card.clone());
            }
        });
    }
}

pub struct UpdateCard {
    pub dashboard_id: String,
    pub card_id: String,
    pub patch: CardPatch,
}

#[async_trait]
impl ConfirmedMutation for UpdateCard {
    type Output = Card;

    fn name(&self) -> &'static str {
        "update_card"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        if let Some(title) = &self.patch.title {
            require_title(title, "Card")?;
        }
        require_card(state, &self.dashboard_id, &self.card_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Card> {
        source
            .update_card(&self.dashboard_id, &self.card_id, &self.patch)
            .await
    }

    fn commit(&self, state: &mut BoardState, card: &Card) {
        state.edit_columns(&self.dashboard_id, |columns| {
            for column in columns.iter_mut() {
                if let Some(existing) = column.cards.iter_mut().find(|k| k.id == card.id) {
                    // Position is owned by the working set.
                    let column_id = existing.column_id.clone();
                    *existing = card.clone();
                    existing.column_id = column_id;
                }
            }
        });
    }
}

pub struct DeleteCard {
    pub dashboard_id: String,
    pub card_id: String,
}

#[async_trait]
impl ConfirmedMutation for DeleteCard {
    type Output = ();

    fn name(&self) -> &'static str {
        "delete_card"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        require_card(state, &self.dashboard_id, &self.card_id)
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<()> {
        source.delete_card(&self.dashboard_id, &self.card_id).await
    }

    fn commit(&self, state: &mut BoardState, _: &()) {
        state.edit_columns(&self.dashboard_id, |columns| {
            for column in columns.iter_mut() {
                column.cards.retain(|k| k.id != self.card_id);
            }
        });
    }
}

// Invitations & membership

/// Invite `email` to a dashboard. A pending invitation already known locally
/// is returned without a second backend call.
pub struct InviteToDashboard {
    pub dashboard_id: String,
    pub email: String,
}

#[async_trait]
impl ConfirmedMutation for InviteToDashboard {
    type Output = Invitation;

    fn name(&self) -> &'static str {
        "invite_to_dashboard"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        require_email(&self.email)?;
        let already_member = state.find_dashboard(&self.dashboard_id).is_some_and(|d| {
            d.members
                .iter()
                .any(|m| m.email.eq_ignore_ascii_case(self.email.trim()))
        });
        if already_member {
            return Err(BoardError::validation(format!(
                "{} is already a member of this dashboard",
                self.email.trim()
            )));
        }
        Ok(())
    }

    fn resolve_locally(&self, state: &BoardState) -> Option<Invitation> {
        state
            .find_dashboard(&self.dashboard_id)?
            .pending_invitation_for(&self.email)
            .cloned()
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Invitation> {
        source
            .invite_to_dashboard(&self.dashboard_id, self.email.trim())
            .await
    }

    fn commit(&self, state: &mut BoardState, invitation: &Invitation) {
        state.edit_dashboard(&self.dashboard_id, |d| {
            d.invitations.retain(|i| i.id != invitation.id);
            d.invitations.push(invitation.clone());
        });
    }
}

pub struct LoadInvitations;

#[async_trait]
impl ConfirmedMutation for LoadInvitations {
    type Output = Vec<Invitation>;

    fn name(&self) -> &'static str {
        "load_invitations"
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Vec<Invitation>> {
        source.list_invitations().await
    }

    fn commit(&self, state: &mut BoardState, invitations: &Vec<Invitation>) {
        state.invitations = invitations.clone();
    }
}

pub struct AcceptInvitation {
    pub invitation_id: String,
}

#[async_trait]
impl ConfirmedMutation for AcceptInvitation {
    type Output = Dashboard;

    fn name(&self) -> &'static str {
        "accept_invitation"
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Dashboard> {
        source.accept_invitation(&self.invitation_id).await
    }

    fn commit(&self, state: &mut BoardState, dashboard: &Dashboard) {
        state.invitations.retain(|i| i.id != self.invitation_id);
        state.merge_dashboard(dashboard.clone());
    }
}

pub struct RejectInvitation {
    pub invitation_id: String,
}

#[async_trait]
impl ConfirmedMutation for RejectInvitation {
    type Output = Invitation;

    fn name(&self) -> &'static str {
        "reject_invitation"
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Invitation> {
        source.reject_invitation(&self.invitation_id).await
    }

    fn commit(&self, state: &mut BoardState, _: &Invitation) {
        state.invitations.retain(|i| i.id != self.invitation_id);
    }
}

pub struct RemoveMember {
    pub dashboard_id: String,
    pub user_id: String,
}

#[async_trait]
impl ConfirmedMutation for RemoveMember {
    type Output = Dashboard;

    fn name(&self) -> &'static str {
        "remove_member"
    }

    fn dashboard_scope(&self) -> Option<&str> {
        Some(&self.dashboard_id)
    }

    fn validate(&self, state: &BoardState) -> Result<(), BoardError> {
        match state.find_dashboard(&self.dashboard_id) {
            Some(d) if d.is_owner(&self.user_id) => {
                Err(BoardError::validation("Dashboard owners cannot be removed"))
            }
            _ => Ok(()),
        }
    }

    async fn dispatch(&self, source: &dyn DataSource) -> SourceResult<Dashboard> {
        source
            .remove_member(&self.dashboard_id, &self.user_id)
            .await
    }

    fn commit(&self, state: &mut BoardState, dashboard: &Dashboard) {
        state.merge_dashboard(dashboard.clone());
    }
}
