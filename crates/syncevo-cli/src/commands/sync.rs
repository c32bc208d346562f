//! Sync command - runs a sync session and streams its progress

use std::io::{self, BufRead, Write};
use std::rc::{Rc, Weak};

use anyhow::{Context, Result};
use clap::Args;
use syncevo_core::domain::SyncMode;
use syncevo_dbus::{SourceSelection, SyncevoService};
use tracing::{info, warn};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Server configuration name
    pub server: String,

    /// Sources to sync; all enabled sources when omitted
    pub sources: Vec<String>,

    /// Sync mode overriding the configured one (two-way, slow, refresh-from-server, ...)
    #[arg(long)]
    pub mode: Option<SyncMode>,
}

impl SyncCommand {
    pub fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter: Rc<dyn OutputFormatter> = Rc::from(get_formatter(format));
        let sources = self.selection(session)?;

        let printer = formatter.clone();
        session
            .proxy
            .on_progress(move |server, event| printer.progress(server, &event))?;
        let printer = formatter.clone();
        session
            .proxy
            .on_server_message(move |server, message| printer.server_message(server, message))?;
        let proxy = Rc::downgrade(&session.proxy);
        session
            .proxy
            .on_need_password(move |server| answer_password(&proxy, server))?;

        info!(server = %self.server, sources = sources.len(), "Starting sync");
        session.call(|done| session.proxy.start_sync(&self.server, sources, done))?;

        let reports = session.call(|done| session.proxy.get_sync_reports(&self.server, 1, done))?;
        let status = reports
            .first()
            .and_then(|report| report.get("status").cloned())
            .unwrap_or_else(|| "ok".to_string());
        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "server": self.server,
                "status": status,
            }));
        } else {
            formatter.success(&format!("Sync of {} finished: {}", self.server, status));
        }
        Ok(())
    }

    /// Sources named on the command line, or every enabled source when only
    /// a mode was given
    fn selection(&self, session: &Session) -> Result<Vec<SourceSelection>> {
        if !self.sources.is_empty() {
            return Ok(self
                .sources
                .iter()
                .map(|name| SourceSelection::new(name.as_str(), self.mode))
                .collect());
        }
        let Some(mode) = self.mode else {
            return Ok(Vec::new());
        };

        let options = session.call(|done| session.proxy.get_server_config(&self.server, done))?;
        let mut names: Vec<String> = options
            .into_iter()
            .filter(|o| !o.source.is_empty() && o.key == "sync")
            .filter(|o| o.value.parse::<SyncMode>().is_ok_and(|m| m.is_enabled()))
            .map(|o| o.source)
            .collect();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| SourceSelection::new(name, Some(mode)))
            .collect())
    }
}

/// Prompts for the password on the terminal and hands it to the server.
///
/// Reading stdin blocks the event loop; nothing else is pending while the
/// server waits for the password, so no event is delayed.
fn answer_password(proxy: &Weak<SyncevoService>, server: &str) {
    let Some(proxy) = proxy.upgrade() else {
        return;
    };
    match read_password(server) {
        Ok(Some(password)) => proxy.set_password(server, &password, |result| {
            if let Err(err) = result {
                warn!(error = %err, "Password rejected");
            }
        }),
        Ok(None) | Err(_) => {
            warn!(server, "No password given, aborting sync");
            proxy.abort_sync(server, |result| {
                if let Err(err) = result {
                    warn!(error = %err, "Abort failed");
                }
            });
        }
    }
}

fn read_password(server: &str) -> Result<Option<String>> {
    let mut stderr = io::stderr();
    write!(stderr, "Password for {server}: ").context("failed to write prompt")?;
    stderr.flush().context("failed to write prompt")?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']);
    Ok((read > 0 && !password.is_empty()).then(|| password.to_string()))
}
