//! In-memory [`DataSource`] for store tests: records calls, injects
//! failures and can hold a call open until the test releases it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use super::DataSource;
use crate::board::models::fixtures;
use crate::board::models::*;
use crate::errors::{SourceError, SourceResult};

pub struct MockSource {
    pub user: User,
    dashboards: Mutex<Vec<Dashboard>>,
    invitations: Mutex<Vec<Invitation>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<SourceError>>,
    hold_next: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl MockSource {
    pub fn new(dashboards: Vec<Dashboard>) -> Self {
        Self {
            user: fixtures::user("owner"),
            dashboards: Mutex::new(dashboards),
            invitations: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            hold_next: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// The next call fails with `err` after being recorded.
    pub fn fail_next(&self, err: SourceError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// The next call blocks until [`release`](Self::release).
    pub fn hold_next(&self) {
        self.hold_next.store(true, Ordering::SeqCst);
    }

    /// Wait until a held call has started.
    pub async fn wait_for_call(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn dashboard(&self, id: &str) -> Option<Dashboard> {
        self.dashboards
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn set_invitations(&self, invitations: Vec<Invitation>) {
        *self.invitations.lock().unwrap() = invitations;
    }

    async fn enter(&self, name: &str) -> SourceResult<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_dashboard<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Dashboard) -> SourceResult<R>,
    ) -> SourceResult<R> {
        let mut dashboards = self.dashboards.lock().unwrap();
        let dashboard = dashboards
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| SourceError::not_found(format!("Dashboard {} not found", id)))?;
        f(dashboard)
    }

    fn column_mut<'a>(dashboard: &'a mut Dashboard, id: &str) -> SourceResult<&'a mut Column> {
        dashboard
            .columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SourceError::not_found(format!("Column {} not found", id)))
    }
}

#[async_trait]
impl DataSource for MockSource {
    async fn login(&self, credentials: &Credentials) -> SourceResult<AuthSession> {
        self.enter("login").await?;
        let mut user = self.user.clone();
        user.email = credentials.email.clone();
        Ok(AuthSession {
            user,
            token: "token".into(),
        })
    }

    async fn register(&self, registration: &Registration) -> SourceResult<AuthSession> {
        self.enter("register").await?;
        Ok(AuthSession {
            user: User {
                id: self.user.id.clone(),
                email: registration.email.clone(),
                name: registration.name.clone(),
            },
            token: "token".into(),
        })
    }

    async fn logout(&self) -> SourceResult<()> {
        self.enter("logout").await
    }

    async fn change_password(&self, _current: &str, _new_password: &str) -> SourceResult<()> {
        self.enter("change_password").await
    }

    async fn get_dashboards(&self) -> SourceResult<Vec<Dashboard>> {
        self.enter("get_dashboards").await?;
        Ok(self.dashboards.lock().unwrap().clone())
    }

    async fn get_dashboard(&self, dashboard_id: &str) -> SourceResult<Dashboard> {
        self.enter("get_dashboard").await?;
        self.with_dashboard(dashboard_id, |d| Ok(d.clone()))
    }

    async fn create_dashboard(&self, new: &NewDashboard) -> SourceResult<Dashboard> {
        self.enter("create_dashboard").await?;
        let count = self.dashboards.lock().unwrap().len();
        let mut dashboard = fixtures::dashboard(&format!("new-{}", count + 1), Vec::new());
        dashboard.title = new.title.clone();
        dashboard.background = new.background.clone();
        self.dashboards.lock().unwrap().push(dashboard.clone());
        Ok(dashboard)
    }

    async fn update_dashboard(
        &self,
        dashboard_id: &str,
        patch: &DashboardPatch,
    ) -> SourceResult<Dashboard> {
        self.enter("update_dashboard").await?;
        self.with_dashboard(dashboard_id, |d| {
            if let Some(title) = &patch.title {
                d.title = title.clone();
            }
            if let Some(background) = &patch.background {
                d.background = Some(background.clone());
            }
            Ok(d.clone())
        })
    }

    async fn delete_dashboard(&self, dashboard_id: &str) -> SourceResult<()> {
        self.enter("delete_dashboard").await?;
        self.dashboards.lock().unwrap().retain(|d| d.id != dashboard_id);
        Ok(())
    }

    async fn create_column(&self, dashboard_id: &str, new: &NewColumn) -> SourceResult<Column> {
        self.enter("create_column").await?;
        self.with_dashboard(dashboard_id, |d| {
            let order = d.columns.iter().map(|c| c.order).max().unwrap_or(-1) + 1;
            let mut column = fixtures::column(&format!("col-{}", d.columns.len() + 1), order, &[]);
            column.title = new.title.clone();
            d.columns.push(column.clone());
            Ok(column)
        })
    }

    async fn update_column(
        &self,
        dashboard_id: &str,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> SourceResult<Column> {
        self.enter("update_column").await?;
        self.with_dashboard(dashboard_id, |d| {
            let column = Self::column_mut(d, column_id)?;
            if let Some(title) = &patch.title {
                column.title = title.clone();
            }
            if let Some(archived) = patch.archived {
                column.archived = archived;
            }
            Ok(column.clone())
        })
    }

    async fn delete_column(&self, dashboard_id: &str, column_id: &str) -> SourceResult<()> {
        self.enter("delete_column").await?;
        self.with_dashboard(dashboard_id, |d| {
            d.columns.retain(|c| c.id != column_id);
            Ok(())
        })
    }

    async fn update_column_order(
        &self,
        dashboard_id: &str,
        ordered_column_ids: &[String],
    ) -> SourceResult<()> {
        self.enter("update_column_order").await?;
        self.with_dashboard(dashboard_id, |d| {
            for (index, id) in ordered_column_ids.iter().enumerate() {
                Self::column_mut(d, id)?.order = index as i64;
            }
            sort_columns(&mut d.columns);
            Ok(())
        })
    }

    async fn create_card(&self, dashboard_id: &str, new: &NewCard) -> SourceResult<Card> {
        self.enter("create_card").await?;
        self.with_dashboard(dashboard_id, |d| {
            let number = d
                .columns
                .iter()
                .flat_map(|c| c.cards.iter().map(|k| k.number))
                .max()
                .unwrap_or(0)
                + 1;
            let column = Self::column_mut(d, &new.column_id)?;
            let mut card = fixtures::card(&format!("card-{}", number), &new.column_id);
            card.number = number;
            card.title = new.title.clone();
            card.details = new.details.clone();
            column.cards.push(card.clone());
            Ok(card)
        })
    }

    async fn update_card(
        &self,
        dashboard_id: &str,
        card_id: &str,
        patch: &CardPatch,
    ) -> SourceResult<Card> {
        self.enter("update_card").await?;
        self.with_dashboard(dashboard_id, |d| {
            let card = d
                .columns
                .iter_mut()
                .flat_map(|c| c.cards.iter_mut())
                .find(|k| k.id == card_id)
                .ok_or_else(|| SourceError::not_found(format!("Card {} not found", card_id)))?;
            if let Some(title) = &patch.title {
                card.title = title.clone();
            }
            if let Some(details) = &patch.details {
                card.details = details.clone();
            }
            Ok(card.clone())
        })
    }

    async fn delete_card(&self, dashboard_id: &str, card_id: &str) -> SourceResult<()> {
        self.enter("delete_card").await?;
        self.with_dashboard(dashboard_id, |d| {
            for column in &mut d.columns {
                column.cards.retain(|k| k.id != card_id);
            }
            Ok(())
        })
    }

    async fn move_card(
        &self,
        dashboard_id: &str,
        _from_column_id: &str,
        to_column_id: &str,
        card_id: &str,
        destination_index: usize,
    ) -> SourceResult<()> {
        self.enter("move_card").await?;
        self.with_dashboard(dashboard_id, |d| {
            let mut card = None;
            for column in &mut d.columns {
                if let Some(pos) = column.position_of(card_id) {
                    card = Some(column.cards.remove(pos));
                }
            }
            let mut card =
                card.ok_or_else(|| SourceError::not_found(format!("Card {} not found", card_id)))?;
            card.column_id = to_column_id.to_string();
            let dest = Self::column_mut(d, to_column_id)?;
            let index = destination_index.min(dest.cards.len());
            dest.cards.insert(index, card);
            Ok(())
        })
    }

    async fn invite_to_dashboard(
        &self,
        dashboard_id: &str,
        email: &str,
    ) -> SourceResult<Invitation> {
        self.enter("invite_to_dashboard").await?;
        let user = self.user.clone();
        self.with_dashboard(dashboard_id, |d| {
            if let Some(existing) = d.pending_invitation_for(email) {
                return Ok(existing.clone());
            }
            let invitation = Invitation {
                id: format!("inv-{}", d.invitations.len() + 1),
                dashboard_id: d.id.clone(),
                dashboard_title: Some(d.title.clone()),
                inviter_id: user.id.clone(),
                inviter_email: user.email.clone(),
                invitee_email: email.to_string(),
                status: InvitationStatus::Pending,
                created_at: Utc::now(),
            };
            d.invitations.push(invitation.clone());
            Ok(invitation)
        })
    }

    async fn list_invitations(&self) -> SourceResult<Vec<Invitation>> {
        self.enter("list_invitations").await?;
        Ok(self.invitations.lock().unwrap().clone())
    }

    async fn accept_invitation(&self, invitation_id: &str) -> SourceResult<Dashboard> {
        self.enter("accept_invitation").await?;
        let invitation = self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == invitation_id)
            .cloned()
            .ok_or_else(|| SourceError::not_found(format!("Invitation {} not found", invitation_id)))?;
        let user = self.user.clone();
        self.with_dashboard(&invitation.dashboard_id, |d| {
            if !d.is_member(&user.id) {
                d.members.push(user);
            }
            Ok(d.clone())
        })
    }

    async fn reject_invitation(&self, invitation_id: &str) -> SourceResult<Invitation> {
        self.enter("reject_invitation").await?;
        let mut invitations = self.invitations.lock().unwrap();
        let invitation = invitations
            .iter_mut()
            .find(|i| i.id == invitation_id)
            .ok_or_else(|| SourceError::not_found(format!("Invitation {} not found", invitation_id)))?;
        invitation.status = InvitationStatus::Rejected;
        Ok(invitation.clone())
    }

    async fn remove_member(&self, dashboard_id: &str, user_id: &str) -> SourceResult<Dashboard> {
        self.enter("remove_member").await?;
        self.with_dashboard(dashboard_id, |d| {
            d.members.retain(|m| m.id != user_id);
            Ok(d.clone())
        })
    }
}
