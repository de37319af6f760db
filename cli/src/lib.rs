//! `branchport` command line.
//!
//! ## Commands
//!
//! - `branchport assign <client_id> [environment]` prints `APP_PORT=<port>`
//! - `branchport release <client_id> [environment]`
//! - `branchport migrate <client_id> <from_env> <to_env>` prints `APP_PORT=<port>`
//! - `branchport show [environment]` prints `<environment> <client_id> <port>` lines
//!
//! When the environment is omitted it is derived from the client id
//! (`master` → production, `staging` → staging, otherwise development).

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use branchport_registry::config::{AppConfig, ConfigLoader};
use branchport_registry::{DEFAULT_REGISTRY_FILENAME, REGISTRY_PATH_ENV, Registry};
use clap::{Parser, Subcommand};

/// Allocate per-branch application ports for CI jobs.
#[derive(Debug, Parser)]
#[command(name = "branchport", version)]
pub struct Cli {
    /// Registry file shared by every job on this host.
    #[arg(
        long,
        global = true,
        env = REGISTRY_PATH_ENV,
        default_value = DEFAULT_REGISTRY_FILENAME
    )]
    pub registry: PathBuf,

    /// Configuration file (defaults to ./branchport.toml, then
    /// ~/.config/branchport/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Assign a port to a client, reusing its existing one.
    Assign {
        client_id: String,
        environment: Option<String>,
    },
    /// Release a client's port.
    Release {
        client_id: String,
        environment: Option<String>,
    },
    /// Move a client's port to another environment.
    Migrate {
        client_id: String,
        from_env: String,
        to_env: String,
    },
    /// List current assignments.
    Show { environment: Option<String> },
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::new().with_file(path).load(),
        None => ConfigLoader::load_default(),
    };
    config.context("failed to load configuration")
}

/// Run one command, writing its output to `out`.
pub fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let registry = Registry::open(&cli.registry, &config)?;
    tracing::debug!(registry = %cli.registry.display(), command = ?cli.command, "running");

    match cli.command {
        Command::Assign {
            client_id,
            environment,
        } => {
            let environment =
                environment.unwrap_or_else(|| registry.environment_for(&client_id).to_string());
            let port = registry
                .assign(&client_id, &environment)
                .with_context(|| format!("failed to assign a port to {client_id}"))?;
            writeln!(out, "APP_PORT={port}")?;
        }
        Command::Release {
            client_id,
            environment,
        } => {
            let environment =
                environment.unwrap_or_else(|| registry.environment_for(&client_id).to_string());
            registry
                .release(&client_id, &environment)
                .with_context(|| format!("failed to release the port of {client_id}"))?;
        }
        Command::Migrate {
            client_id,
            from_env,
            to_env,
        } => {
            let port = registry
                .migrate(&client_id, &from_env, &to_env)
                .with_context(|| {
                    format!("failed to migrate {client_id} from {from_env} to {to_env}")
                })?;
            writeln!(out, "APP_PORT={port}")?;
        }
        Command::Show { environment } => {
            let state = registry.snapshot()?;
            if let Some(name) = &environment {
                state.environment(name)?;
            }
            for (env, client, port) in state.assignments() {
                if environment.as_deref().is_none_or(|want| want == env) {
                    writeln!(out, "{env} {client} {port}")?;
                }
            }
        }
    }

    Ok(())
}
