//! REST backend. Every response body is an `{data?, error?}` envelope;
//! bodies that are not envelopes are classified by HTTP status.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{DataSource, Envelope};
use crate::board::models::*;
use crate::errors::{ErrorCode, SourceError, SourceResult};

pub struct RestSource {
    client: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl RestSource {
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid REST base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("REST base URL cannot carry a path: {}", base_url);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            token: RwLock::new(token),
        })
    }

    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, path: &[&str]) -> RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(path))
            .header("Accept", "application/json");
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SourceResult<T> {
        let resp = builder.send().await.map_err(transport_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        decode_response(status.as_u16(), status.is_success(), &text)
    }

    async fn get<T: DeserializeOwned>(&self, path: &[&str]) -> SourceResult<T> {
        self.execute(self.request(Method::GET, path)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &[&str]) -> SourceResult<T> {
        self.execute(self.request(Method::DELETE, path)).await
    }

    async fn send_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &[&str],
        body: &B,
    ) -> SourceResult<T> {
        self.execute(self.request(method, path).json(body)).await
    }
}

fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::timeout(format!("Request timed out: {}", e))
    } else {
        SourceError::network(format!("Request failed: {}", e))
    }
}

/// Turn an HTTP response into a source result.
fn decode_response<T: DeserializeOwned>(
    status: u16,
    success: bool,
    body: &str,
) -> SourceResult<T> {
    let body = if success && body.trim().is_empty() {
        "{}"
    } else {
        body
    };
    match serde_json::from_str::<Envelope<T>>(body) {
        Ok(envelope) if envelope.error.is_some() || success => {
            envelope.into_result().map_err(|mut e| {
                if e.status.is_none() && !success {
                    e.status = Some(status);
                }
                e
            })
        }
        _ if success => Err(SourceError::internal(format!(
            "Malformed response body (HTTP {})",
            status
        ))),
        _ => {
            let message = if body.trim().is_empty() {
                format!("Request failed with HTTP {}", status)
            } else {
                body.trim().to_string()
            };
            Err(SourceError::new(ErrorCode::from_status(status), message).with_status(status))
        }
    }
}

#[async_trait]
impl DataSource for RestSource {
    async fn login(&self, credentials: &Credentials) -> SourceResult<AuthSession> {
        let session: AuthSession = self
            .send_json(Method::POST, &["auth", "login"], credentials)
            .await?;
        self.set_token(Some(session.token.clone()));
        Ok(session)
    }

    async fn register(&self, registration: &Registration) -> SourceResult<AuthSession> {
        let session: AuthSession = self
            .send_json(Method::POST, &["auth", "register"], registration)
            .await?;
        self.set_token(Some(session.token.clone()));
        Ok(session)
    }

    async fn logout(&self) -> SourceResult<()> {
        self.send_json::<(), _>(Method::POST, &["auth", "logout"], &json!({}))
            .await?;
        self.set_token(None);
        Ok(())
    }

    async fn change_password(&self, current: &str, new_password: &str) -> SourceResult<()> {
        self.send_json(
            Method::POST,
            &["auth", "change-password"],
            &json!({ "currentPassword": current, "newPassword": new_password }),
        )
        .await
    }

    async fn get_dashboards(&self) -> SourceResult<Vec<Dashboard>> {
        self.get(&["dashboards"]).await
    }

    async fn get_dashboard(&self, dashboard_id: &str) -> SourceResult<Dashboard> {
        self.get(&["dashboards", dashboard_id]).await
    }

    async fn create_dashboard(&self, new: &NewDashboard) -> SourceResult<Dashboard> {
        self.send_json(Method::POST, &["dashboards"], new).await
    }

    async fn update_dashboard(
        &self,
        dashboard_id: &str,
        patch: &DashboardPatch,
    ) -> SourceResult<Dashboard> {
        self.send_json(Method::PATCH, &["dashboards", dashboard_id], patch)
            .await
    }

    async fn delete_dashboard(&self, dashboard_id: &str) -> SourceResult<()> {
        self.delete(&["dashboards", dashboard_id]).await
    }

    async fn create_column(&self, dashboard_id: &str, new: &NewColumn) -> SourceResult<Column> {
        self.send_json(
            Method::POST,
            &["dashboards", dashboard_id, "columns"],
            new,
        )
        .await
    }

    async fn update_column(
        &self,
        dashboard_id: &str,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> SourceResult<Column> {
        self.send_json(
            Method::PATCH,
            &["dashboards", dashboard_id, "columns", column_id],
            patch,
        )
        .await
    }

    async fn delete_column(&self, dashboard_id: &str, column_id: &str) -> SourceResult<()> {
        self.delete(&["dashboards", dashboard_id, "columns", column_id])
            .await
    }

    async fn update_column_order(
        &self,
        dashboard_id: &str,
        ordered_column_ids: &[String],
    ) -> SourceResult<()> {
        self.send_json(
            Method::PUT,
            &["dashboards", dashboard_id, "columns", "order"],
            &json!({ "columnIds": ordered_column_ids }),
        )
        .await
    }

    async fn create_card(&self, dashboard_id: &str, new: &NewCard) -> SourceResult<Card> {
        self.send_json(
            Method::POST,
            &["dashboards", dashboard_id, "cards"],
            new,
        )
        .await
    }

    async fn update_card(
        &self,
        dashboard_id: &str,
        card_id: &str,
        patch: &CardPatch,
    ) -> SourceResult<Card> {
        self.send_json(
            Method::PATCH,
            &["dashboards", dashboard_id, "cards", card_id],
            patch,
        )
        .await
    }

    async fn delete_card(&self, dashboard_id: &str, card_id: &str) -> SourceResult<()> {
        self.delete(&["dashboards", dashboard_id, "cards", card_id])
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
        self.send_json(
            Method::POST,
            &["dashboards", dashboard_id, "cards", card_id, "move"],
            &json!({
                "fromColumnId": from_column_id,
                "toColumnId": to_column_id,
                "destinationIndex": destination_index,
            }),
        )
        .await
    }

    async fn invite_to_dashboard(
        &self,
        dashboard_id: &str,
        email: &str,
    ) -> SourceResult<Invitation> {
        self.send_json(
            Method::POST,
            &["dashboards", dashboard_id, "invitations"],
            &json!({ "email": email }),
        )
        .await
    }

    async fn list_invitations(&self) -> SourceResult<Vec<Invitation>> {
        self.get(&["invitations"]).await
    }

    async fn accept_invitation(&self, invitation_id: &str) -> SourceResult<Dashboard> {
        self.send_json(
            Method::POST,
            &["invitations", invitation_id, "accept"],
            &json!({}),
        )
        .await
    }

    async fn reject_invitation(&self, invitation_id: &str) -> SourceResult<Invitation> {
        self.send_json(
            Method::POST,
            &["invitations", invitation_id, "reject"],
            &json!({}),
        )
        .await
    }

    async fn remove_member(&self, dashboard_id: &str, user_id: &str) -> SourceResult<Dashboard> {
        self.delete(&["dashboards", dashboard_id, "members", user_id])
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;

    use super::*;
    use crate::board::models::fixtures;
    use crate::board::store::{BoardStore, SyncOutcome};

    #[derive(Clone, Default)]
    struct Seen {
        bodies: Arc<Mutex<Vec<Value>>>,
        card_ids: Arc<Mutex<Vec<String>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer secret")
    }

    async fn list_dashboards(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "Missing token", "code": "UNAUTHORIZED"}})),
            );
        }
        let dashboard = fixtures::dashboard("d1", vec![fixtures::column("todo", 0, &["c1"])]);
        (StatusCode::OK, Json(json!({ "data": [dashboard] })))
    }

    async fn login(Json(body): Json<Value>) -> Json<Value> {
        let user = fixtures::user("alice");
        assert_eq!(body["email"], "alice@example.com");
        Json(json!({"data": {"user": user, "token": "secret"}}))
    }

    async fn move_card(
        State(seen): State<Seen>,
        Path((_dashboard, card)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        seen.card_ids.lock().unwrap().push(card);
        seen.bodies.lock().unwrap().push(body);
        Json(json!({}))
    }

    async fn invite() -> (StatusCode, Json<Value>) {
        (
            StatusCode::CONFLICT,
            Json(json!({"error": {"message": "Already a member", "code": "CONFLICT"}})),
        )
    }

    async fn slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Json(json!({"data": []}))
    }

    async fn broken() -> (StatusCode, String) {
        (StatusCode::BAD_GATEWAY, "upstream unavailable".to_string())
    }

    async fn two_column_dashboards() -> Json<Value> {
        let dashboard = fixtures::dashboard(
            "d1",
            vec![
                fixtures::column("todo", 0, &["c1"]),
                fixtures::column("done", 1, &[]),
            ],
        );
        Json(json!({ "data": [dashboard] }))
    }

    async fn failing_move() -> (StatusCode, Json<Value>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "data": null })),
        )
    }

    async fn spawn_failing_server() -> String {
        let app = Router::new()
            .route("/dashboards", get(two_column_dashboards))
            .route("/dashboards/{id}/cards/{card}/move", post(failing_move));
        serve(app).await
    }

    async fn spawn_server(seen: Seen) -> String {
        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/dashboards", get(list_dashboards))
            .route("/dashboards/{id}/cards/{card}/move", post(move_card))
            .route("/dashboards/{id}/invitations", post(invite))
            .route("/invitations", get(slow))
            .route("/dashboards/{id}", get(broken))
            .with_state(seen);
        serve(app).await
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn source(base: &str, token: Option<&str>) -> RestSource {
        RestSource::new(base, Duration::from_secs(5), token.map(String::from)).unwrap()
    }

    #[tokio::test]
    async fn test_decodes_data_envelope_with_bearer_token() {
        let base = spawn_server(Seen::default()).await;
        let dashboards = source(&base, Some("secret")).get_dashboards().await.unwrap();
        assert_eq!(dashboards.len(), 1);
        assert_eq!(dashboards[0].columns[0].cards[0].id, "c1");
    }

    #[tokio::test]
    async fn test_error_envelope_keeps_code_and_http_status() {
        let base = spawn_server(Seen::default()).await;
        let err = source(&base, None).get_dashboards().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.status, Some(401));
        assert_eq!(err.message, "Missing token");

        let err = source(&base, Some("secret"))
            .invite_to_dashboard("d1", "bob@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn test_login_stores_token_for_later_requests() {
        let base = spawn_server(Seen::default()).await;
        let rest = source(&base, None);
        let session = rest
            .login(&Credentials {
                email: "alice@example.com".into(),
                password: "hunter22".into(),
            })
            .await
            .unwrap();
        assert_eq!(session.token, "secret");
        assert!(rest.get_dashboards().await.is_ok());
    }

    #[tokio::test]
    async fn test_move_card_sends_final_position() {
        let seen = Seen::default();
        let base = spawn_server(seen.clone()).await;
        source(&base, Some("secret"))
            .move_card("d1", "todo", "done", "c1", 3)
            .await
            .unwrap();
        let bodies = seen.bodies.lock().unwrap();
        assert_eq!(
            bodies[0],
            json!({"fromColumnId": "todo", "toColumnId": "done", "destinationIndex": 3})
        );
    }

    #[tokio::test]
    async fn test_non_envelope_failure_is_classified_by_status() {
        let base = spawn_server(Seen::default()).await;
        let rest = source(&base, Some("secret"));

        let err = rest.get_dashboard("d1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.status, Some(502));
        assert_eq!(err.message, "upstream unavailable");

        let err = rest.delete_card("d1", "c1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_slow_server_maps_to_timeout() {
        let base = spawn_server(Seen::default()).await;
        let rest = RestSource::new(&base, Duration::from_millis(100), None).unwrap();
        let err = rest.list_invitations().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_unreachable_server_maps_to_network() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = source(&format!("http://{}", addr), None)
            .get_dashboards()
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Network);
    }

    #[test]
    fn test_decode_success_without_payload_is_internal() {
        let err = decode_response::<User>(200, true, "not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(decode_response::<()>(204, true, "").is_ok());
        let err = decode_response::<User>(204, true, "").unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_path_segments_are_percent_encoded() {
        let seen = Seen::default();
        let base = spawn_server(seen.clone()).await;
        source(&base, Some("secret"))
            .move_card("d1", "todo", "done", "c/1 x?", 0)
            .await
            .unwrap();
        assert_eq!(*seen.card_ids.lock().unwrap(), vec!["c/1 x?".to_string()]);
    }

    #[test]
    fn test_url_keeps_base_path() {
        let rest = source("http://localhost:8080/api/", None);
        assert_eq!(
            rest.url(&["dashboards", "a b", "cards"]).as_str(),
            "http://localhost:8080/api/dashboards/a%20b/cards"
        );
        assert!(RestSource::new("not a url", Duration::from_secs(1), None).is_err());
    }

    #[tokio::test]
    async fn test_store_rolls_back_move_on_server_error() {
        let base = spawn_failing_server().await;
        let store = BoardStore::new(Arc::new(source(&base, Some("secret"))));
        assert!(store.set_current_dashboard("d1").await.is_some());

        let outcome = store.move_card("todo", "done", 0, 0).await;

        assert_eq!(outcome, SyncOutcome::RolledBack);
        let state = store.state();
        assert_eq!(
            fixtures::layout(&state.columns),
            fixtures::expect_layout(&[("todo", &["c1"]), ("done", &[])])
        );
        assert!(state.error.is_some());
    }
}
