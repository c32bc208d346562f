//! Config command - show, change or remove a server configuration

use anyhow::{bail, Result};
use clap::Args;
use syncevo_dbus::ConfigOption;

use crate::output::{get_formatter, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct ConfigCommand {
    /// Server configuration name
    pub server: String,

    /// Set an option; repeatable
    #[arg(long = "set", value_name = "[SOURCE/]KEY=VALUE")]
    pub set: Vec<String>,

    /// Remove the configuration
    #[arg(long, conflicts_with = "set")]
    pub remove: bool,
}

/// Parses `[source/]key=value`
fn parse_assignment(text: &str) -> Result<ConfigOption> {
    let Some((name, value)) = text.split_once('=') else {
        bail!("expected [SOURCE/]KEY=VALUE, got '{text}'");
    };
    let (source, key) = match name.split_once('/') {
        Some((source, key)) => (source, key),
        None => ("", name),
    };
    if key.is_empty() {
        bail!("missing option name in '{text}'");
    }
    Ok(ConfigOption::new(source, key, value))
}

/// Replaces options with the same source and key, appends the rest
fn merge(options: &mut Vec<ConfigOption>, changes: Vec<ConfigOption>) {
    for change in changes {
        match options
            .iter_mut()
            .find(|o| o.source == change.source && o.key == change.key)
        {
            Some(existing) => existing.value = change.value,
            None => options.push(change),
        }
    }
}

impl ConfigCommand {
    pub fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        if self.remove {
            session.call(|done| session.proxy.remove_server_config(&self.server, done))?;
            formatter.success(&format!("Removed configuration {}", self.server));
            return Ok(());
        }

        if !self.set.is_empty() {
            let changes = self
                .set
                .iter()
                .map(|text| parse_assignment(text))
                .collect::<Result<Vec<_>>>()?;
            // Unknown servers start out from the template of the same name
            let mut options = session
                .call(|done| session.proxy.get_server_config(&self.server, done))
                .unwrap_or_default();
            merge(&mut options, changes);
            session.call(|done| {
                session
                    .proxy
                    .set_server_config(&self.server, options, done)
            })?;
            formatter.success(&format!("Updated configuration {}", self.server));
        }

        let options = session.call(|done| session.proxy.get_server_config(&self.server, done))?;
        if format.is_json() {
            let entries: Vec<_> = options
                .iter()
                .map(|o| serde_json::json!({"source": o.source, "key": o.key, "value": o.value}))
                .collect();
            formatter.print_json(&serde_json::json!({
                "server": self.server,
                "options": entries,
            }));
            return Ok(());
        }

        formatter.success(&format!("Configuration {}", self.server));
        for option in &options {
            if option.source.is_empty() {
                formatter.info(&format!("{} = {}", option.key, option.value));
            } else {
                formatter.info(&format!("{}/{} = {}", option.source, option.key, option.value));
            }
        }
        Ok(())
    }
}
