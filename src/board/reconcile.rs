//! Drag-and-drop reconciliation.
//!
//! Turns a finished drag gesture into one store call. This layer only
//! classifies the gesture and computes target positions; the store performs
//! every state change.

use serde::{Deserialize, Serialize};

use super::models::{Column, sort_columns};
use super::store::{BoardStore, SyncOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragLocation {
    pub droppable_id: String,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragKind {
    Column,
    Card,
}

/// A finished drag. `destination` is `None` when dropped outside any target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragResult {
    pub source: DragLocation,
    #[serde(default)]
    pub destination: Option<DragLocation>,
    #[serde(rename = "type")]
    pub kind: DragKind,
}

/// The store call a drag resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragAction {
    ReorderColumns(Vec<String>),
    MoveCard {
        from_column_id: String,
        to_column_id: String,
        from_index: usize,
        to_index: usize,
    },
}

/// Classify a drag against the current columns. Returns `None` for gestures
/// that change nothing.
pub fn plan_drag(columns: &[Column], drag: &DragResult) -> Option<DragAction> {
    let destination = drag.destination.as_ref()?;
    match drag.kind {
        DragKind::Column => {
            if drag.source.index == destination.index {
                return None;
            }
            let mut ordered = columns.to_vec();
            sort_columns(&mut ordered);
            let mut ids: Vec<String> = ordered.into_iter().map(|c| c.id).collect();
            if drag.source.index >= ids.len() {
                return None;
            }
            let moved = ids.remove(drag.source.index);
            ids.insert(destination.index.min(ids.len()), moved);
            Some(DragAction::ReorderColumns(ids))
        }
        DragKind::Card => {
            if drag.source.droppable_id == destination.droppable_id
                && drag.source.index == destination.index
            {
                return None;
            }
            Some(DragAction::MoveCard {
                from_column_id: drag.source.droppable_id.clone(),
                to_column_id: destination.droppable_id.clone(),
                from_index: drag.source.index,
                to_index: destination.index,
            })
        }
    }
}

/// Apply a finished drag through the store.
pub async fn reconcile(store: &BoardStore, drag: &DragResult) -> SyncOutcome {
    let state = store.state();
    if state.current_dashboard.is_none() {
        return SyncOutcome::Noop;
    }
    let Some(action) = plan_drag(&state.columns, drag) else {
        return SyncOutcome::Noop;
    };
    tracing::debug!(?action, "Reconciling drag");
    match action {
        DragAction::ReorderColumns(ids) => store.update_column_order(ids).await,
        DragAction::MoveCard {
            from_column_id,
            to_column_id,
            from_index,
            to_index,
        } => {
            store
                .move_card(&from_column_id, &to_column_id, from_index, to_index)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::board::models::fixtures::*;
    use crate::board::source::mock::MockSource;

    fn drag(kind: DragKind, from: (&str, usize), to: Option<(&str, usize)>) -> DragResult {
        DragResult {
            source: DragLocation {
                droppable_id: from.0.into(),
                index: from.1,
            },
            destination: to.map(|(id, index)| DragLocation {
                droppable_id: id.into(),
                index,
            }),
            kind,
        }
    }

    fn columns() -> Vec<Column> {
        vec![
            column("X", 0, &["c1", "c2"]),
            column("Y", 1, &[]),
            column("Z", 2, &[]),
        ]
    }

    #[test]
    fn test_drop_outside_is_noop() {
        assert_eq!(plan_drag(&columns(), &drag(DragKind::Card, ("X", 0), None)), None);
    }

    #[test]
    fn test_column_drag_produces_full_sequence() {
        let action = plan_drag(&columns(), &drag(DragKind::Column, ("board", 2), Some(("board", 0))));
        assert_eq!(
            action,
            Some(DragAction::ReorderColumns(vec![
                "Z".into(),
                "X".into(),
                "Y".into()
            ]))
        );
    }

    #[test]
    fn test_column_drag_same_index_is_noop() {
        let action = plan_drag(&columns(), &drag(DragKind::Column, ("board", 1), Some(("board", 1))));
        assert_eq!(action, None);
    }

    #[test]
    fn test_card_drag_passes_raw_positions() {
        let action = plan_drag(&columns(), &drag(DragKind::Card, ("X", 1), Some(("Z", 0))));
        assert_eq!(
            action,
            Some(DragAction::MoveCard {
                from_column_id: "X".into(),
                to_column_id: "Z".into(),
                from_index: 1,
                to_index: 0,
            })
        );
        let same = plan_drag(&columns(), &drag(DragKind::Card, ("X", 1), Some(("X", 1))));
        assert_eq!(same, None);
    }

    #[test]
    fn test_drag_result_wire_shape() {
        let parsed: DragResult = serde_json::from_value(serde_json::json!({
            "source": { "droppableId": "X", "index": 0 },
            "destination": null,
            "type": "card"
        }))
        .unwrap();
        assert_eq!(parsed.kind, DragKind::Card);
        assert!(parsed.destination.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_without_dashboard_is_noop() {
        let mock = Arc::new(MockSource::new(Vec::new()));
        let store = BoardStore::new(mock.clone());
        let outcome = reconcile(&store, &drag(DragKind::Card, ("X", 0), Some(("Y", 0)))).await;
        assert_eq!(outcome, SyncOutcome::Noop);
        assert!(mock.calls().is_empty());
        assert!(store.state().error.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_drives_store() {
        let mock = Arc::new(MockSource::new(vec![dashboard("d1", columns())]));
        let store = BoardStore::new(mock.clone());
        store.set_current_dashboard("d1").await.unwrap();

        let outcome = reconcile(&store, &drag(DragKind::Card, ("X", 0), Some(("Y", 0)))).await;
        assert_eq!(outcome, SyncOutcome::Committed);
        let outcome = reconcile(&store, &drag(DragKind::Column, ("board", 0), Some(("board", 2)))).await;
        assert_eq!(outcome, SyncOutcome::Committed);

        assert_eq!(
            layout(&store.state().columns),
            expect_layout(&[("Y", &["c1"]), ("Z", &[]), ("X", &["c2"])])
        );
        assert_eq!(mock.call_count("move_card"), 1);
        assert_eq!(mock.call_count("update_column_order"), 1);
    }
}
