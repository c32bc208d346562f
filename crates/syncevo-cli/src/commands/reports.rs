//! Reports command - results of recent syncs

use anyhow::Result;
use clap::Args;

use crate::output::{get_formatter, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct ReportsCommand {
    /// Server configuration name
    pub server: String,

    /// Maximum number of reports, newest first
    #[arg(long, default_value_t = 5)]
    pub count: u32,
}

impl ReportsCommand {
    pub fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let reports = session.call(|done| {
            session
                .proxy
                .get_sync_reports(&self.server, self.count, done)
        })?;

        if format.is_json() {
            formatter.print_json(&serde_json::json!(reports));
            return Ok(());
        }

        if reports.is_empty() {
            formatter.info(&format!("No reports for {}.", self.server));
            return Ok(());
        }
        for report in &reports {
            let field = |key: &str| report.get(key).map(String::as_str).unwrap_or("-");
            formatter.success(&format!(
                "{} {} ({} .. {})",
                self.server,
                field("status"),
                field("start"),
                field("end")
            ));
            if let Some(error) = report.get("error") {
                formatter.info(&format!("error: {error}"));
            }
            for (key, value) in report.iter().filter(|(key, _)| key.starts_with("source-")) {
                formatter.info(&format!("{key}: {value}"));
            }
        }
        Ok(())
    }
}
