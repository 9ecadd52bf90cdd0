//! Backend contract for the board store.
//!
//! Every backend (local SQLite, REST, GraphQL) implements [`DataSource`].
//! Operations return `SourceResult<T>`: failures are values carrying a
//! [`SourceError`] so the store can roll back deterministically.
//!
//! Position-based operations (`move_card`, `update_column_order`) describe
//! the final layout, never a delta, so repeating a call is harmless.

pub mod graphql;
pub mod local;
#[cfg(test)]
pub(crate) mod mock;
pub mod rest;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::models::*;
use crate::config::{BackendConfig, BackendKind};
use crate::errors::{SourceError, SourceResult};

#[async_trait]
pub trait DataSource: Send + Sync {
    // ── Auth ──────────────────────────────────────────────────────────
    async fn login(&self, credentials: &Credentials) -> SourceResult<AuthSession>;
    async fn register(&self, registration: &Registration) -> SourceResult<AuthSession>;
    async fn logout(&self) -> SourceResult<()>;
    async fn change_password(&self, current: &str, new_password: &str) -> SourceResult<()>;

    // ── Dashboards ────────────────────────────────────────────────────
    async fn get_dashboards(&self) -> SourceResult<Vec<Dashboard>>;
    async fn get_dashboard(&self, dashboard_id: &str) -> SourceResult<Dashboard>;
    async fn create_dashboard(&self, new: &NewDashboard) -> SourceResult<Dashboard>;
    async fn update_dashboard(
        &self,
        dashboard_id: &str,
        patch: &DashboardPatch,
    ) -> SourceResult<Dashboard>;
    async fn delete_dashboard(&self, dashboard_id: &str) -> SourceResult<()>;

    // ── Columns ───────────────────────────────────────────────────────
    async fn create_column(&self, dashboard_id: &str, new: &NewColumn) -> SourceResult<Column>;
    async fn update_column(
        &self,
        dashboard_id: &str,
        column_id: &str,
        patch: &ColumnPatch,
    ) -> SourceResult<Column>;
    async fn delete_column(&self, dashboard_id: &str, column_id: &str) -> SourceResult<()>;
    async fn update_column_order(
        &self,
        dashboard_id: &str,
        ordered_column_ids: &[String],
    ) -> SourceResult<()>;

    // ── Cards ─────────────────────────────────────────────────────────
    async fn create_card(&self, dashboard_id: &str, new: &NewCard) -> SourceResult<Card>;
    async fn update_card(
        &self,
        dashboard_id: &str,
        card_id: &str,
        patch: &CardPatch,
    ) -> SourceResult<Card>;
    async fn delete_card(&self, dashboard_id: &str, card_id: &str) -> SourceResult<()>;
    async fn move_card(
        &self,
        dashboard_id: &str,
        from_column_id: &str,
        to_column_id: &str,
        card_id: &str,
        destination_index: usize,
    ) -> SourceResult<()>;

    // ── Invitations & membership ──────────────────────────────────────
    async fn invite_to_dashboard(&self, dashboard_id: &str, email: &str)
    -> SourceResult<Invitation>;
    async fn list_invitations(&self) -> SourceResult<Vec<Invitation>>;
    async fn accept_invitation(&self, invitation_id: &str) -> SourceResult<Dashboard>;
    async fn reject_invitation(&self, invitation_id: &str) -> SourceResult<Invitation>;
    async fn remove_member(&self, dashboard_id: &str, user_id: &str) -> SourceResult<Dashboard>;
}

/// Wire envelope shared by the remote backends: `{data?, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error: Option<SourceError>,
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Collapse the envelope into a result. A missing payload is accepted only
    /// for types that deserialize from `null` (e.g. `()`).
    pub fn into_result(self) -> SourceResult<T> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match self.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| SourceError::internal("Response carried neither data nor error")),
        }
    }
}

/// Build the configured backend. This is the only place the backend kind is
/// inspected; everything downstream talks to `dyn DataSource`.
pub fn build_source(config: &BackendConfig) -> Result<Arc<dyn DataSource>> {
    let source: Arc<dyn DataSource> = match config.kind {
        BackendKind::Local => {
            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create local database directory")?;
            }
            Arc::new(
                local::LocalSource::open(&config.db_path)
                    .context("Failed to open local board database")?,
            )
        }
        BackendKind::Rest => {
            let base_url = config
                .base_url
                .as_deref()
                .context("REST backend requires backend.base_url")?;
            Arc::new(
                rest::RestSource::new(base_url, config.timeout(), config.token.clone())
                    .context("Failed to build REST client")?,
            )
        }
        BackendKind::Graphql => {
            let endpoint = config
                .graphql_url
                .as_deref()
                .context("GraphQL backend requires backend.graphql_url")?;
            Arc::new(
                graphql::GraphqlSource::new(endpoint, config.timeout(), config.token.clone())
                    .context("Failed to build GraphQL client")?,
            )
        }
    };
    tracing::debug!(backend = config.kind.as_str(), "Board backend selected");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn test_envelope_with_data_is_ok() {
        let env: Envelope<Vec<String>> =
            serde_json::from_str(r#"{"data":["a","b"]}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_envelope_error_wins_over_data() {
        let env: Envelope<String> = serde_json::from_str(
            r#"{"data":"x","error":{"message":"nope","code":"FORBIDDEN","status":403}}"#,
        )
        .unwrap();
        let err = env.into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn test_envelope_unit_payload_may_be_absent() {
        let env: Envelope<()> = serde_json::from_str("{}").unwrap();
        assert!(env.into_result().is_ok());
    }

    #[test]
    fn test_envelope_missing_payload_is_an_error_for_entities() {
        let env: Envelope<User> = serde_json::from_str(r#"{"data":null}"#).unwrap();
        let err = env.into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[test]
    fn test_build_source_local_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig {
            db_path: dir.path().join("nested").join("board.db"),
            ..BackendConfig::default()
        };
        assert!(build_source(&config).is_ok());
        assert!(config.db_path.exists());
    }

    #[test]
    fn test_build_source_rest_requires_base_url() {
        let config = BackendConfig {
            kind: BackendKind::Rest,
            ..BackendConfig::default()
        };
        let err = build_source(&config).err().expect("should fail");
        assert!(err.to_string().contains("base_url"));
    }
}
