//! GraphQL backend. Operations POST `{query, variables}` to a single
//! endpoint; the first entry of `errors[]` becomes the returned
//! [`SourceError`], reading `extensions.code` and `extensions.status`.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::DataSource;
use crate::board::models::*;
use crate::errors::{ErrorCode, SourceError, SourceResult};

macro_rules! user_fields {
    () => {
        "fragment UserFields on User { id email name }\n"
    };
}

macro_rules! card_fields {
    () => {
        "fragment CardFields on Card { id number title columnId description members labels checklists comments attachments dueDate }\n"
    };
}

macro_rules! column_fields {
    () => {
        concat!(
            "fragment ColumnFields on Column { id title order archived cards { ...CardFields } }\n",
            card_fields!()
        )
    };
}

macro_rules! invitation_fields {
    () => {
        "fragment InvitationFields on Invitation { id dashboardId dashboardTitle inviterId inviterEmail inviteeEmail status createdAt }\n"
    };
}

macro_rules! dashboard_fields {
    () => {
        concat!(
            "fragment DashboardFields on Dashboard { id title createdAt ownerIds background members { ...UserFields } columns { ...ColumnFields } invitations { ...InvitationFields } }\n",
            user_fields!(),
            column_fields!(),
            invitation_fields!()
        )
    };
}

const LOGIN: &str = concat!(
    "mutation Login($email: String!, $password: String!) { login(email: $email, password: $password) { token user { ...UserFields } } }\n",
    user_fields!()
);
const REGISTER: &str = concat!(
    "mutation Register($email: String!, $password: String!, $name: String!) { register(email: $email, password: $password, name: $name) { token user { ...UserFields } } }\n",
    user_fields!()
);
const LOGOUT: &str = "mutation Logout { logout }";
const CHANGE_PASSWORD: &str = "mutation ChangePassword($currentPassword: String!, $newPassword: String!) { changePassword(currentPassword: $currentPassword, newPassword: $newPassword) }";

const DASHBOARDS: &str = concat!(
    "query Dashboards { dashboards { ...DashboardFields } }\n",
    dashboard_fields!()
);
const DASHBOARD: &str = concat!(
    "query Dashboard($id: ID!) { dashboard(id: $id) { ...DashboardFields } }\n",
    dashboard_fields!()
);
const CREATE_DASHBOARD: &str = concat!(
    "mutation CreateDashboard($input: NewDashboard!) { createDashboard(input: $input) { ...DashboardFields } }\n",
    dashboard_fields!()
);
const UPDATE_DASHBOARD: &str = concat!(
    "mutation UpdateDashboard($id: ID!, $patch: DashboardPatch!) { updateDashboard(id: $id, patch: $patch) { ...DashboardFields } }\n",
    dashboard_fields!()
);
const DELETE_DASHBOARD: &str = "mutation DeleteDashboard($id: ID!) { deleteDashboard(id: $id) }";

const CREATE_COLUMN: &str = concat!(
    "mutation CreateColumn($dashboardId: ID!, $input: NewColumn!) { createColumn(dashboardId: $dashboardId, input: $input) { ...ColumnFields } }\n",
    column_fields!()
);
const UPDATE_COLUMN: &str = concat!(
    "mutation UpdateColumn($dashboardId: ID!, $columnId: ID!, $patch: ColumnPatch!) { updateColumn(dashboardId: $dashboardId, columnId: $columnId, patch: $patch) { ...ColumnFields } }\n",
    column_fields!()
);
const DELETE_COLUMN: &str = "mutation DeleteColumn($dashboardId: ID!, $columnId: ID!) { deleteColumn(dashboardId: $dashboardId, columnId: $columnId) }";
const UPDATE_COLUMN_ORDER: &str = "mutation UpdateColumnOrder($dashboardId: ID!, $columnIds: [ID!]!) { updateColumnOrder(dashboardId: $dashboardId, columnIds: $columnIds) }";

const CREATE_CARD: &str = concat!(
    "mutation CreateCard($dashboardId: ID!, $input: NewCard!) { createCard(dashboardId: $dashboardId, input: $input) { ...CardFields } }\n",
    card_fields!()
);
const UPDATE_CARD: &str = concat!(
    "mutation UpdateCard($dashboardId: ID!, $cardId: ID!, $patch: CardPatch!) { updateCard(dashboardId: $dashboardId, cardId: $cardId, patch: $patch) { ...CardFields } }\n",
    card_fields!()
);
const DELETE_CARD: &str = "mutation DeleteCard($dashboardId: ID!, $cardId: ID!) { deleteCard(dashboardId: $dashboardId, cardId: $cardId) }";
const MOVE_CARD: &str = "mutation MoveCard($dashboardId: ID!, $fromColumnId: ID!, $toColumnId: ID!, $cardId: ID!, $destinationIndex: Int!) { moveCard(dashboardId: $dashboardId, fromColumnId: $fromColumnId, toColumnId: $toColumnId, cardId: $cardId, destinationIndex: $destinationIndex) }";

const INVITE: &str = concat!(
    "mutation Invite($dashboardId: ID!, $email: String!) { inviteToDashboard(dashboardId: $dashboardId, email: $email) { ...InvitationFields } }\n",
    invitation_fields!()
);
const INVITATIONS: &str = concat!(
    "query Invitations { invitations { ...InvitationFields } }\n",
    invitation_fields!()
);
const ACCEPT_INVITATION: &str = concat!(
    "mutation AcceptInvitation($id: ID!) { acceptInvitation(id: $id) { ...DashboardFields } }\n",
    dashboard_fields!()
);
const REJECT_INVITATION: &str = concat!(
    "mutation RejectInvitation($id: ID!) { rejectInvitation(id: $id) { ...InvitationFields } }\n",
    invitation_fields!()
);
const REMOVE_MEMBER: &str = concat!(
    "mutation RemoveMember($dashboardId: ID!, $userId: ID!) { removeMember(dashboardId: $dashboardId, userId: $userId) { ...DashboardFields } }\n",
    dashboard_fields!()
);

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
    #[serde(default)]
    extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorExtensions {
    #[serde(default)]
    code: Option<ErrorCode>,
    #[serde(default)]
    status: Option<u16>,
}

impl From<GraphqlError> for SourceError {
    fn from(err: GraphqlError) -> Self {
        let (code, status) = match err.extensions {
            Some(ext) => (ext.code.unwrap_or(ErrorCode::Unknown), ext.status),
            None => (ErrorCode::Unknown, None),
        };
        SourceError {
            message: err.message,
            code,
            status: status.or_else(|| code.default_status()),
        }
    }
}

fn http_error(status: u16) -> SourceError {
    SourceError::new(
        ErrorCode::from_status(status),
        format!("GraphQL endpoint returned HTTP {}", status),
    )
    .with_status(status)
}

/// Pick `data.<field>` out of a GraphQL response. The first error wins, then
/// a non-2xx status. An absent field is an error; an explicit `null` is not.
fn decode_field<T: DeserializeOwned>(
    field: &str,
    status: u16,
    response: GraphqlResponse,
) -> SourceResult<T> {
    if let Some(first) = response.errors.into_iter().next() {
        return Err(first.into());
    }
    if !(200..300).contains(&status) {
        return Err(http_error(status));
    }
    let value = response
        .data
        .and_then(|mut data| data.get_mut(field).map(Value::take))
        .ok_or_else(|| SourceError::internal(format!("Response is missing '{}'", field)))?;
    serde_json::from_value(value).map_err(|e| {
        SourceError::internal(format!("Malformed '{}' payload: {}", field, e))
    })
}

pub struct GraphqlSource {
    client: reqwest::Client,
    endpoint: String,
    token: RwLock<Option<String>>,
}

impl GraphqlSource {
    pub fn new(endpoint: &str, timeout: Duration, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token: RwLock::new(token),
        })
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    async fn run<T: DeserializeOwned>(
        &self,
        field: &str,
        query: &str,
        variables: Value,
    ) -> SourceResult<T> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::timeout(format!("GraphQL request timed out: {}", e))
            } else {
                SourceError::network(format!("GraphQL request failed: {}", e))
            }
        })?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| SourceError::network(format!("Failed to read GraphQL response: {}", e)))?;

        match serde_json::from_str::<GraphqlResponse>(&text) {
            Ok(parsed) => decode_field(field, status, parsed),
            Err(_) => Err(http_error(status)),
        }
    }
}

#[async_trait]
impl DataSource for GraphqlSource {
    async fn login(&self, credentials: &Credentials) -> SourceResult<AuthSession> {
        let session: AuthSession = self
            .run(
                "login",
                LOGIN,
                json!({ "email": credentials.email, "password": credentials.password }),
            )
            .await?;
        self.set_token(Some(session.token.clone()));
        Ok(session)
    }

    async fn register(&self, registration: &Registration) -> SourceResult<AuthSession> {
        let session: AuthSession = self
            .run(
                "register",
                REGISTER,
                json!({
                    "email": registration.email,
                    "password": registration.password,
                    "name": registration.name,
                }),
            )
            .await?;
        self.set_token(Some(session.token.clone()));
        Ok(session)
    }

    async fn logout(&self) -> SourceResult<()> {
        let _: Value = self.run("logout", LOGOUT, json!({})).await?;
        self.set_token(None);
        Ok(())
    }

    async fn change_password(&self, current: &str, new_password: &str) -> SourceResult<()> {
        let _: Value = self
            .run(
                "changePassword",
                CHANGE_PASSWORD,
                json!({ "currentPassword": current, "newPassword": new_password }),
            )
            .await?;
        Ok(())
    }

    async fn get_dashboards(&self) -> SourceResult<Vec<Dashboard>> {
        self.run("dashboards", DASHBOARDS, json!({})).await
    }

    async fn get_dashboard(&self, dashboard_id: &str) -> SourceResult<Dashboard> {
        self.run("dashboard", DASHBOARD, json!({ "id": dashboard_id }))
            .await
    }

    async fn create_dashboard(&self, new: &NewDashboard) -> SourceResult<Dashboard> {
        self.run("createDashboard", CREATE_DASHBOARD, json!({ "input": new }))
            .await
    }

    async fn update_dashboard(
        &self,
        dashboard_id: &str,
        patch: &DashboardPatch,
    ) -> SourceResult<Dashboard> {
        self.run(
            "updateDashboard",
            UPDATE_DASHBOARD,
            json!({ "id": dashboard_id, "patch": patch }),
        )
        .await
    }

    async fn delete_dashboard(&self, dashboard_id: &str) -> SourceResult<()> {
        let _: Value = self
            .run("deleteDashboard", DELETE_DASHBOARD, json!({ "id": dashboard_id }))
            .await?;
        Ok(())
    }

    async fn create_column(&self, dashboard_id: &str, new: &NewColumn) -> SourceResult<Column> {
        self.run(
            "createColumn",
            CREATE_COLUMN,
            json!({ "dashboardId": dashboard_id, "input": new }),
        )
        .await
    }

    async fn update_column(
        &self,
        dashboard_id: &str,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> SourceResult<Column> {
        self.run(
            "updateColumn",
            UPDATE_COLUMN,
            json!({ "dashboardId": dashboard_id, "columnId": column_id, "patch": patch }),
        )
        .await
    }

    async fn delete_column(&self, dashboard_id: &str, column_id: &str) -> SourceResult<()> {
        let _: Value = self
            .run(
                "deleteColumn",
                DELETE_COLUMN,
                json!({ "dashboardId": dashboard_id, "columnId": column_id }),
            )
            .await?;
        Ok(())
    }

    async fn update_column_order(
        &self,
        dashboard_id: &str,
        ordered_column_ids: &[String],
    ) -> SourceResult<()> {
        let _: Value = self
            .run(
                "updateColumnOrder",
                UPDATE_COLUMN_ORDER,
                json!({ "dashboardId": dashboard_id, "columnIds": ordered_column_ids }),
            )
            .await?;
        Ok(())
    }

    async fn create_card(&self, dashboard_id: &str, new: &NewCard) -> SourceResult<Card> {
        self.run(
            "createCard",
            CREATE_CARD,
            json!({ "dashboardId": dashboard_id, "input": new }),
        )
        .await
    }

    async fn update_card(
        &self,
        dashboard_id: &str,
        card_id: &str,
        patch: &CardPatch,
    ) -> SourceResult<Card> {
        self.run(
            "updateCard",
            UPDATE_CARD,
            json!({ "dashboardId": dashboard_id, "cardId": card_id, "patch": patch }),
        )
        .await
    }

    async fn delete_card(&self, dashboard_id: &str, card_id: &str) -> SourceResult<()> {
        let _: Value = self
            .run(
                "deleteCard",
                DELETE_CARD,
                json!({ "dashboardId": dashboard_id, "cardId": card_id }),
            )
            .await?;
        Ok(())
    }

    async fn move_card(
        &self,
        dashboard_id: &str,
        from_column_id: &str,
        to_column_id: &str,
        card_id: &str,
        destination_index: usize,
    ) -> SourceResult<()> {
        let _: Value = self
            .run(
                "moveCard",
                MOVE_CARD,
                json!({
                    "dashboardId": dashboard_id,
                    "fromColumnId": from_column_id,
                    "toColumnId": to_column_id,
                    "cardId": card_id,
                    "destinationIndex": destination_index,
                }),
            )
            .await?;
        Ok(())
    }

    async fn invite_to_dashboard(
        &self,
        dashboard_id: &str,
        email: &str,
    ) -> SourceResult<Invitation> {
        self.run(
            "inviteToDashboard",
            INVITE,
            json!({ "dashboardId": dashboard_id, "email": email }),
        )
        .await
    }

    async fn list_invitations(&self) -> SourceResult<Vec<Invitation>> {
        self.run("invitations", INVITATIONS, json!({})).await
    }

    async fn accept_invitation(&self, invitation_id: &str) -> SourceResult<Dashboard> {
        self.run(
            "acceptInvitation",
            ACCEPT_INVITATION,
            json!({ "id": invitation_id }),
        )
        .await
    }

    async fn reject_invitation(&self, invitation_id: &str) -> SourceResult<Invitation> {
        self.run(
            "rejectInvitation",
            REJECT_INVITATION,
            json!({ "id": invitation_id }),
        )
        .await
    }

    async fn remove_member(&self, dashboard_id: &str, user_id: &str) -> SourceResult<Dashboard> {
        self.run(
            "removeMember",
            REMOVE_MEMBER,
            json!({ "dashboardId": dashboard_id, "userId": user_id }),
        )
        .await
    }
}
