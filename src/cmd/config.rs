//! Configuration view and validation commands (`taskboard config`).

use anyhow::Result;
use taskboard::config::{BoardConfig, TaskboardToml};

use super::super::ConfigCommands;

fn print_settings(toml: &TaskboardToml) {
    println!("[backend]");
    println!("  kind = \"{}\"", toml.backend.kind);
    println!("  db_path = \"{}\"", toml.backend.db_path.display());
    if let Some(url) = &toml.backend.base_url {
        println!("  base_url = \"{}\"", url);
    }
    if let Some(url) = &toml.backend.graphql_url {
        println!("  graphql_url = \"{}\"", url);
    }
    println!("  timeout_secs = {}", toml.backend.timeout_secs);
    if toml.backend.token.is_some() {
        println!("  token = <set>");
    }
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    if let Some(dir) = &toml.logging.log_dir {
        println!("  log_dir = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(config: &BoardConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Taskboard Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_settings(&TaskboardToml::load(&config_path)?);
            } else {
                println!("No taskboard.toml found at {}", config_path.display());
                println!();
                println!("Run 'taskboard config init' to create one.");
                println!();
            }

            // Effective values include env and CLI overrides.
            println!("Effective values (with env/CLI overrides):");
            let backend = config.backend();
            println!("  backend = \"{}\"", backend.kind);
            println!("  db_path = \"{}\"", backend.db_path.display());
            println!("  log level = \"{}\"", config.logging().level);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
            if !warnings.is_empty() {
                anyhow::bail!("{} configuration warning(s)", warnings.len());
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!(
                    "taskboard.toml already exists at {}",
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if !config.config_dir.exists() {
                std::fs::create_dir_all(&config.config_dir)?;
            }
            TaskboardToml::default().save(&config_path)?;

            println!("Created taskboard.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [backend] kind, base_url, graphql_url, timeout_secs");
            println!("  - [logging] level, json, log_dir");
            println!();
        }
    }

    Ok(())
}
