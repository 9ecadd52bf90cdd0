//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                    |
//! |-----------------|-----------------------------------------------------|
//! | `project`       | `Init`                                              |
//! | `config`        | `Config`                                            |
//! | `account`       | `Register`, `Login`, `Logout`                       |
//! | `board`         | `Dashboards`, `Show`, `CreateDashboard`, `AddColumn`, `AddCard`, `MoveCard`, `ReorderColumns` |
//! | `invite`        | `Invite`, `Invitations`, `Accept`, `Reject`         |

pub mod account;
pub mod board;
pub mod config;
pub mod invite;
pub mod project;

pub use account::{cmd_login, cmd_logout, cmd_register};
pub use board::{
    cmd_add_card, cmd_add_column, cmd_create_dashboard, cmd_dashboards, cmd_move_card,
    cmd_reorder_columns, cmd_show,
};
pub use config::cmd_config;
pub use invite::{cmd_accept, cmd_invitations, cmd_invite, cmd_reject};
pub use project::cmd_init;

use anyhow::Result;
use taskboard::board::{BoardStore, build_source};
use taskboard::config::BoardConfig;

/// Build the configured backend and a store on top of it.
pub(crate) fn open_store(config: &BoardConfig) -> Result<BoardStore> {
    let source = build_source(&config.backend())?;
    Ok(BoardStore::new(source))
}

/// Turn a store result into a CLI result, surfacing `state.error` on failure.
pub(crate) fn require<T>(store: &BoardStore, value: Option<T>) -> Result<T> {
    match value {
        Some(value) => Ok(value),
        None => anyhow::bail!(failure_message(store)),
    }
}

pub(crate) fn require_ok(store: &BoardStore, ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        anyhow::bail!(failure_message(store))
    }
}

fn failure_message(store: &BoardStore) -> String {
    store
        .state()
        .error
        .unwrap_or_else(|| "Operation failed".to_string())
}
