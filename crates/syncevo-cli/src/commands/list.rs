//! List command - configured servers and available templates

use anyhow::Result;
use clap::Args;

use crate::output::{get_formatter, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct ListCommand {}

impl ListCommand {
    pub fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let servers: Vec<String> = session.call(|done| session.proxy.get_servers(done))?;
        let templates: Vec<String> = session.call(|done| session.proxy.get_templates(done))?;

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "servers": servers,
                "templates": templates,
            }));
            return Ok(());
        }

        if servers.is_empty() {
            formatter.info("No servers configured.");
        } else {
            formatter.success("Configured servers:");
            for server in &servers {
                formatter.info(server);
            }
        }
        formatter.success("Templates:");
        for template in &templates {
            formatter.info(template);
        }
        Ok(())
    }
}
