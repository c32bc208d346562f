//! Introspect command - prints the interface description of the service

use anyhow::Result;
use clap::Args;
use syncevo_gdbus::introspect::INTROSPECTABLE;
use syncevo_gdbus::{DBusClientCall, DBusObject, DBusRemoteObject, RemoteObject};

use crate::output::{get_formatter, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct IntrospectCommand {}

impl IntrospectCommand {
    pub fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let remote = session.proxy.remote();
        let object = RemoteObject::new(
            session.client.clone(),
            remote.destination(),
            remote.path(),
            INTROSPECTABLE,
        )?;
        let introspect: DBusClientCall<(String,)> = DBusClientCall::new(&object, "Introspect")?;
        let (xml,) = session.call(|done| introspect.call((), done))?;

        if format.is_json() {
            formatter.print_json(&serde_json::json!({ "xml": xml }));
        } else {
            println!("{xml}");
        }
        Ok(())
    }
}
