//! Invitation commands (`taskboard invite`, `invitations`, `accept`, `reject`).

use anyhow::Result;
use taskboard::config::BoardConfig;

use super::{open_store, require};

pub async fn cmd_invite(config: &BoardConfig, dashboard_id: &str, email: &str) -> Result<()> {
    let store = open_store(config)?;
    // Load the list so membership and pending invites are checked locally.
    let dashboards = store.load_dashboards().await;
    require(&store, dashboards)?;
    let invitation = store.invite_to_dashboard(dashboard_id, email).await;
    let invitation = require(&store, invitation)?;
    println!(
        "Invited {} {}",
        invitation.invitee_email,
        console::style(&invitation.id).dim()
    );
    Ok(())
}

pub async fn cmd_invitations(config: &BoardConfig) -> Result<()> {
    let store = open_store(config)?;
    let invitations = store.load_invitations().await;
    let invitations = require(&store, invitations)?;
    if invitations.is_empty() {
        println!("No pending invitations.");
        return Ok(());
    }
    for invitation in &invitations {
        println!(
            "{}  {} from {}",
            console::style(&invitation.id).dim(),
            console::style(
                invitation
                    .dashboard_title
                    .as_deref()
                    .unwrap_or(&invitation.dashboard_id)
            )
            .bold(),
            invitation.inviter_email
        );
    }
    Ok(())
}

pub async fn cmd_accept(config: &BoardConfig, invitation_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let dashboard = store.accept_invitation(invitation_id).await;
    let dashboard = require(&store, dashboard)?;
    println!(
        "Joined dashboard {} {}",
        console::style(&dashboard.title).bold(),
        console::style(&dashboard.id).dim()
    );
    Ok(())
}

pub async fn cmd_reject(config: &BoardConfig, invitation_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let invitation = store.reject_invitation(invitation_id).await;
    require(&store, invitation)?;
    println!("Rejected invitation {}", invitation_id);
    Ok(())
}
