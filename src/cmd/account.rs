//! Account commands (`taskboard register`, `login`, `logout`).

use anyhow::Result;
use taskboard::board::models::{AuthSession, Credentials, Registration};
use taskboard::config::{BackendKind, BoardConfig};

use super::{open_store, require, require_ok};

fn print_session(config: &BoardConfig, verb: &str, session: &AuthSession) {
    println!(
        "{} {} <{}>",
        console::style(verb).green().bold(),
        session.user.name,
        session.user.email
    );
    // The local backend keeps the session in its database; remote backends
    // read the token from config on each run.
    if config.backend().kind != BackendKind::Local {
        println!();
        println!("To stay logged in, set:");
        println!("  export TASKBOARD_TOKEN={}", session.token);
    }
}

pub async fn cmd_register(
    config: &BoardConfig,
    email: &str,
    name: &str,
    password: &str,
) -> Result<()> {
    let store = open_store(config)?;
    let session = store
        .register(Registration {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        })
        .await;
    let session = require(&store, session)?;
    print_session(config, "Registered", &session);
    Ok(())
}

pub async fn cmd_login(config: &BoardConfig, email: &str, password: &str) -> Result<()> {
    let store = open_store(config)?;
    let session = store
        .login(Credentials {
            email: email.to_string(),
            password: password.to_string(),
        })
        .await;
    let session = require(&store, session)?;
    print_session(config, "Logged in as", &session);
    Ok(())
}

pub async fn cmd_logout(config: &BoardConfig) -> Result<()> {
    let store = open_store(config)?;
    let ok = store.logout().await;
    require_ok(&store, ok)?;
    println!("Logged out.");
    Ok(())
}
