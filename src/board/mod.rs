//! Board: optimistic state sync for a Kanban client.
//!
//! ## Overview
//!
//! A [`BoardStore`] holds the in-memory board (dashboards, the working set of
//! columns for the current dashboard, the invitation inbox) and keeps it in
//! step with a backend behind the [`DataSource`] trait. Drag gestures apply
//! locally first and roll back if the backend refuses them; everything else
//! waits for the backend before touching state.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  DragResult  ┌──────────────────────────────────────────────┐
//! │    UI    │ ───────────> │  reconcile.rs  (plan_drag, reconcile)        │
//! │          │ <─────────── │         │                                    │
//! └──────────┘ watch::Recv  │         │ move_card / update_column_order    │
//!                           │         v                                    │
//!                           │  store.rs  (BoardStore, BoardState)          │
//!                           │         │                                    │
//!                           │         │ OptimisticMutation / Confirmed...  │
//!                           │         v                                    │
//!                           │  mutation.rs  (plan, apply, commit)          │
//!                           │         │                                    │
//!                           │         │ dyn DataSource                     │
//!                           │         v                                    │
//!                           │  source/  local (SQLite) │ rest │ graphql    │
//!                           └──────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module           | Responsibility                                        |
//! |------------------|-------------------------------------------------------|
//! | `models`         | Shared types: `Dashboard`, `Column`, `Card`, requests |
//! | `source::local`  | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)   |
//! | `source::rest`   | JSON-over-HTTP client with `{data, error}` envelopes  |
//! | `source::graphql`| GraphQL client; first error becomes a `SourceError`   |
//!
//! ## Typical Flow (drag a card to another column)
//!
//! 1. `reconcile()` turns the drag into `store.move_card(..)`.
//! 2. The store takes the per-dashboard lock, snapshots the columns and
//!    applies the move; subscribers see the new layout immediately.
//! 3. `DataSource::move_card` runs. On success the layout stays; on failure
//!    the snapshot is restored and `state.error` is set.

pub mod models;
pub mod mutation;
pub mod reconcile;
pub mod source;
pub mod store;

pub use models::{Card, Column, Dashboard, Invitation, User};
pub use reconcile::{DragKind, DragLocation, DragResult, reconcile};
pub use source::{DataSource, build_source};
pub use store::{BoardState, BoardStore, SyncOutcome};
