//! Project initialization (`taskboard init`).

use anyhow::{Context, Result};
use taskboard::board::build_source;
use taskboard::config::{BackendKind, BoardConfig, TaskboardToml};

pub fn cmd_init(config: &BoardConfig) -> Result<()> {
    let config_path = config.config_file();
    let already_initialized = config_path.exists();

    std::fs::create_dir_all(&config.config_dir).with_context(|| {
        format!(
            "Failed to create config directory: {}",
            config.config_dir.display()
        )
    })?;
    if !already_initialized {
        TaskboardToml::default().save(&config_path)?;
    }

    let backend = config.backend();
    if backend.kind == BackendKind::Local {
        // Opening the database runs the migrations.
        build_source(&backend)?;
    }

    if already_initialized {
        println!(
            "Taskboard project already initialized at {}",
            config.config_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    println!(
        "Initialized taskboard project at {}",
        config.config_dir.display()
    );
    println!();
    println!("Created directory structure:");
    println!("  .taskboard/");
    println!("  ├── taskboard.toml  # Backend and logging settings");
    if backend.kind == BackendKind::Local {
        println!("  └── board.db        # Local board database");
    }
    println!();
    println!("Next steps:");
    println!("  1. Run `taskboard register <email> <name> --password <pw>`");
    println!("  2. Run `taskboard create-dashboard <title>`");
    Ok(())
}
