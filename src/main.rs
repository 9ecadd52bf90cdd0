use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::config::{BackendKind, BoardConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Kanban board client with optimistic sync")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Backend to talk to: local, rest, graphql. Overrides taskboard.toml.
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .taskboard/ with a default config and local database
    Init,
    /// Create an account and log in
    Register {
        email: String,
        name: String,
        #[arg(long)]
        password: String,
    },
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// List dashboards you are a member of
    Dashboards,
    /// Print the columns and cards of a dashboard
    Show { dashboard: String },
    CreateDashboard {
        title: String,
        #[arg(long)]
        background: Option<String>,
    },
    AddColumn { dashboard: String, title: String },
    AddCard {
        dashboard: String,
        /// Column id the card is created in
        column: String,
        title: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Move a card to a column, at `--index` or at the end
    MoveCard {
        dashboard: String,
        card: String,
        /// Destination column id
        to: String,
        #[arg(long)]
        index: Option<usize>,
    },
    /// Set the full left-to-right column order
    ReorderColumns {
        dashboard: String,
        #[arg(required = true)]
        column_ids: Vec<String>,
    },
    Invite { dashboard: String, email: String },
    /// List pending invitations addressed to you
    Invitations,
    Accept { invitation: String },
    Reject { invitation: String },
    /// Show, validate or create taskboard.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default taskboard.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = BoardConfig::with_cli_args(project_dir, cli.verbose, cli.backend)?;
    let _log_guard = taskboard::telemetry::init_tracing(&config.logging())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Register {
            email,
            name,
            password,
        } => cmd::cmd_register(&config, email, name, password).await?,
        Commands::Login { email, password } => cmd::cmd_login(&config, email, password).await?,
        Commands::Logout => cmd::cmd_logout(&config).await?,
        Commands::Dashboards => cmd::cmd_dashboards(&config).await?,
        Commands::Show { dashboard } => cmd::cmd_show(&config, dashboard).await?,
        Commands::CreateDashboard { title, background } => {
            cmd::cmd_create_dashboard(&config, title, background.clone()).await?
        }
        Commands::AddColumn { dashboard, title } => {
            cmd::cmd_add_column(&config, dashboard, title).await?
        }
        Commands::AddCard {
            dashboard,
            column,
            title,
            description,
        } => {
            cmd::cmd_add_card(&config, dashboard, column, title, description.as_deref()).await?
        }
        Commands::MoveCard {
            dashboard,
            card,
            to,
            index,
        } => cmd::cmd_move_card(&config, dashboard, card, to, *index).await?,
        Commands::ReorderColumns {
            dashboard,
            column_ids,
        } => cmd::cmd_reorder_columns(&config, dashboard, column_ids.clone()).await?,
        Commands::Invite { dashboard, email } => {
            cmd::cmd_invite(&config, dashboard, email).await?
        }
        Commands::Invitations => cmd::cmd_invitations(&config).await?,
        Commands::Accept { invitation } => cmd::cmd_accept(&config, invitation).await?,
        Commands::Reject { invitation } => cmd::cmd_reject(&config, invitation).await?,
    }

    Ok(())
}
