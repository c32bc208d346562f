//! SyncEvolution CLI - drives the sync service over an in-process bus, or
//! exports it on the session or system bus
//!
//! Provides commands for:
//! - Listing configured servers and templates
//! - Running a sync and following its progress
//! - Viewing and changing server configurations
//! - Reading sync reports
//! - Printing the interface description of the service
//! - Serving the sync service on a message bus

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use syncevo_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod session;

use commands::{
    config::ConfigCommand, introspect::IntrospectCommand, list::ListCommand,
    reports::ReportsCommand, serve::ServeCommand, sync::SyncCommand,
};
use output::{get_formatter, OutputFormat};
use session::Session;

#[derive(Debug, Parser)]
#[command(name = "syncevolution", version, about = "SyncML synchronization client")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List configured servers and templates
    List(ListCommand),
    /// Synchronize with a server
    Sync(SyncCommand),
    /// Show or change a server configuration
    Config(ConfigCommand),
    /// Show recent sync reports
    Reports(ReportsCommand),
    /// Print the D-Bus interface description
    Introspect(IntrospectCommand),
    /// Export the sync service on a message bus
    Serve(ServeCommand),
}

/// Loads the configuration file; an explicitly given file must exist
fn load_config(explicit: Option<&Path>) -> Result<(Config, PathBuf)> {
    let (config, path) = match explicit {
        Some(path) => (Config::load(path)?, path.to_path_buf()),
        None => {
            let path = Config::default_path();
            (Config::load_or_default(&path), path)
        }
    };
    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("invalid configuration {}: {}", path.display(), details.join("; "));
    }
    Ok((config, path))
}

fn log_filter(verbose: u8, configured: &str) -> EnvFilter {
    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Runs a command against the in-process service
fn run_client(command: Commands, session: &Session, format: OutputFormat) -> Result<()> {
    match command {
        Commands::List(cmd) => cmd.execute(session, format),
        Commands::Sync(cmd) => cmd.execute(session, format),
        Commands::Config(cmd) => cmd.execute(session, format),
        Commands::Reports(cmd) => cmd.execute(session, format),
        Commands::Introspect(cmd) => cmd.execute(session, format),
        Commands::Serve(_) => bail!("serve exports the service and takes no session"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    let (config, config_path) = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            get_formatter(format).error(&format!("{err:#}"));
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, &config.logging.level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Serve(cmd) => cmd.execute(config, config_path),
        command => Session::open(config, Some(config_path))
            .and_then(|session| run_client(command, &session, format)),
    };

    if let Err(err) = result {
        get_formatter(format).error(&format!("{err:#}"));
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use syncevo_core::config::{ConfigBuilder, ServerConfig};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_arguments() {
        let cli = Cli::parse_from([
            "syncevolution",
            "sync",
            "work",
            "calendar",
            "--mode",
            "slow",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Sync(cmd) => {
                assert_eq!(cmd.server, "work");
                assert_eq!(cmd.sources, vec!["calendar".to_string()]);
                assert_eq!(cmd.mode, Some(syncevo_core::domain::SyncMode::Slow));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_serve_arguments() {
        let cli = Cli::parse_from(["syncevolution", "serve", "--bus", "system"]);
        match cli.command {
            Commands::Serve(cmd) => {
                assert_eq!(cmd.bus_address(), syncevo_gdbus::BusAddress::System)
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        ConfigBuilder::new()
            .server("work", ServerConfig::new("http://example.com/sync"))
            .build()
            .save(&path)
            .unwrap();

        let (config, loaded_from) = load_config(Some(&path)).unwrap();
        assert!(config.servers.contains_key("work"));
        assert_eq!(loaded_from, path);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        ConfigBuilder::new()
            .reports_max_reports(0)
            .build()
            .save(&path)
            .unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }
}
