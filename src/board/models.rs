use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BoardError;

/// Implements id-based equality for an entity type.
macro_rules! eq_by_id {
    ($ty:ty) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

eq_by_id!(User);

/// Dashboard members are plain users.
pub type Member = User;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub owner_ids: Vec<String>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub invitations: Vec<Invitation>,
}

eq_by_id!(Dashboard);

impl Dashboard {
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_ids.iter().any(|id| id == user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.id == user_id)
    }

    /// Pending invitation for `email`, if any (case-insensitive).
    pub fn pending_invitation_for(&self, email: &str) -> Option<&Invitation> {
        self.invitations
            .iter()
            .find(|inv| inv.status == InvitationStatus::Pending && inv.is_for(email))
    }

    /// Check the structural invariants of a dashboard received from a backend.
    pub fn check_invariants(&self) -> Result<(), BoardError> {
        if self.owner_ids.is_empty() {
            return Err(BoardError::validation(format!(
                "Dashboard {} has no owner",
                self.id
            )));
        }
        if let Some(owner) = self.owner_ids.iter().find(|id| !self.is_member(id)) {
            return Err(BoardError::validation(format!(
                "Owner {} of dashboard {} is not a member",
                owner, self.id
            )));
        }
        let mut orders: Vec<i64> = self.columns.iter().map(|c| c.order).collect();
        orders.sort_unstable();
        if orders.windows(2).any(|w| w[0] == w[1]) {
            return Err(BoardError::validation(format!(
                "Dashboard {} has duplicate column orders",
                self.id
            )));
        }
        Ok(())
    }
}

/// Sort columns ascending by `order`; ties keep their relative position.
pub fn sort_columns(columns: &mut [Column]) {
    columns.sort_by_key(|c| c.order);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub title: String,
    pub order: i64,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub archived: bool,
}

eq_by_id!(Column);

impl Column {
    pub fn position_of(&self, card_id: &str) -> Option<usize> {
        self.cards.iter().position(|c| c.id == card_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub column_id: String,
    #[serde(flatten)]
    pub details: CardDetails,
}

eq_by_id!(Card);

/// Collaborator-owned card content. The board core never interprets these
/// fields; it carries them unchanged across moves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub checklists: Vec<serde_json::Value>,
    #[serde(default)]
    pub comments: Vec<serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid invitation status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub dashboard_id: String,
    #[serde(default)]
    pub dashboard_title: Option<String>,
    pub inviter_id: String,
    pub inviter_email: String,
    pub invitee_email: String,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

eq_by_id!(Invitation);

impl Invitation {
    pub fn is_for(&self, email: &str) -> bool {
        self.invitee_email.eq_ignore_ascii_case(email.trim())
    }
}

/// Minimal shape check for an email address: `local@domain.tld`.
pub fn looks_like_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

// ── Request payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Returned by `login`/`register`: the authenticated user and a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDashboard {
    pub title: String,
    #[serde(default)]
    pub background: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewColumn {
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub column_id: String,
    pub title: String,
    #[serde(default)]
    pub details: CardDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<CardDetails>,
}
