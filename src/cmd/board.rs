//! Board commands for dashboards, columns and cards.

use anyhow::Result;
use taskboard::board::models::{CardDetails, NewCard, NewDashboard};
use taskboard::board::{BoardStore, Dashboard, SyncOutcome};
use taskboard::config::BoardConfig;

use super::{open_store, require};

/// Open the store with `dashboard_id` selected.
async fn open_dashboard(config: &BoardConfig, dashboard_id: &str) -> Result<(BoardStore, Dashboard)> {
    let store = open_store(config)?;
    let dashboard = store.set_current_dashboard(dashboard_id).await;
    let dashboard = require(&store, dashboard)?;
    Ok((store, dashboard))
}

fn check_outcome(store: &BoardStore, outcome: SyncOutcome) -> Result<()> {
    match outcome {
        SyncOutcome::Committed | SyncOutcome::Noop => Ok(()),
        SyncOutcome::RolledBack | SyncOutcome::Rejected => {
            let error = store
                .state()
                .error
                .unwrap_or_else(|| "Change was not applied".to_string());
            anyhow::bail!(error)
        }
    }
}

pub async fn cmd_dashboards(config: &BoardConfig) -> Result<()> {
    let store = open_store(config)?;
    let dashboards = store.load_dashboards().await;
    let dashboards = require(&store, dashboards)?;
    if dashboards.is_empty() {
        println!("No dashboards yet. Create one with `taskboard create-dashboard <title>`.");
        return Ok(());
    }
    for dashboard in &dashboards {
        println!(
            "{}  {} {}",
            console::style(&dashboard.id).dim(),
            console::style(&dashboard.title).bold(),
            console::style(format!("({} members)", dashboard.members.len())).dim()
        );
    }
    Ok(())
}

pub async fn cmd_show(config: &BoardConfig, dashboard_id: &str) -> Result<()> {
    let (store, dashboard) = open_dashboard(config, dashboard_id).await?;
    println!("{}", console::style(&dashboard.title).bold().cyan());
    println!();
    let state = store.state();
    if state.columns.is_empty() {
        println!("  (no columns)");
    }
    for column in &state.columns {
        println!(
            "{} {}",
            console::style(&column.title).bold(),
            console::style(&column.id).dim()
        );
        for card in &column.cards {
            println!(
                "  #{:<4} {} {}",
                card.number,
                card.title,
                console::style(&card.id).dim()
            );
        }
    }
    Ok(())
}

pub async fn cmd_create_dashboard(
    config: &BoardConfig,
    title: &str,
    background: Option<String>,
) -> Result<()> {
    let store = open_store(config)?;
    let dashboard = store
        .create_dashboard(NewDashboard {
            title: title.to_string(),
            background,
        })
        .await;
    let dashboard = require(&store, dashboard)?;
    println!("Created dashboard {}", console::style(&dashboard.id).bold());
    Ok(())
}

pub async fn cmd_add_column(config: &BoardConfig, dashboard_id: &str, title: &str) -> Result<()> {
    let (store, _) = open_dashboard(config, dashboard_id).await?;
    let column = store.add_column(title).await;
    let column = require(&store, column)?;
    println!("Created column {}", console::style(&column.id).bold());
    Ok(())
}

pub async fn cmd_add_card(
    config: &BoardConfig,
    dashboard_id: &str,
    column_id: &str,
    title: &str,
    description: Option<&str>,
) -> Result<()> {
    let (store, _) = open_dashboard(config, dashboard_id).await?;
    let card = store
        .add_card(NewCard {
            column_id: column_id.to_string(),
            title: title.to_string(),
            details: CardDetails {
                description: description.unwrap_or_default().to_string(),
                ..CardDetails::default()
            },
        })
        .await;
    let card = require(&store, card)?;
    println!(
        "Created card #{} {}",
        card.number,
        console::style(&card.id).bold()
    );
    Ok(())
}

pub async fn cmd_move_card(
    config: &BoardConfig,
    dashboard_id: &str,
    card_id: &str,
    to_column_id: &str,
    index: Option<usize>,
) -> Result<()> {
    let (store, _) = open_dashboard(config, dashboard_id).await?;
    let state = store.state();
    let Some((from_column_id, from_index)) = state
        .columns
        .iter()
        .find_map(|c| c.position_of(card_id).map(|i| (c.id.clone(), i)))
    else {
        anyhow::bail!("Card not found: {}", card_id);
    };
    let Some(target) = state.columns.iter().find(|c| c.id == to_column_id) else {
        anyhow::bail!("Column not found: {}", to_column_id);
    };
    // Without --index the card goes to the bottom of the target column.
    let last = if from_column_id == to_column_id {
        target.cards.len().saturating_sub(1)
    } else {
        target.cards.len()
    };
    let to_index = index.unwrap_or(last);

    let outcome = store
        .move_card(&from_column_id, to_column_id, from_index, to_index)
        .await;
    check_outcome(&store, outcome)?;
    match outcome {
        SyncOutcome::Noop => println!("Card already in place."),
        _ => println!(
            "Moved card {} to {} at position {}",
            console::style(card_id).bold(),
            console::style(to_column_id).bold(),
            to_index
        ),
    }
    Ok(())
}

pub async fn cmd_reorder_columns(
    config: &BoardConfig,
    dashboard_id: &str,
    column_ids: Vec<String>,
) -> Result<()> {
    let (store, _) = open_dashboard(config, dashboard_id).await?;
    let outcome = store.update_column_order(column_ids).await;
    check_outcome(&store, outcome)?;
    match outcome {
        SyncOutcome::Noop => println!("Column order unchanged."),
        _ => println!("Reordered columns."),
    }
    Ok(())
}
