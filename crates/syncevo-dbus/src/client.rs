//! Client proxy for the sync service
//!
//! Every call is asynchronous: the callback runs once, from the event loop,
//! with the decoded reply or the error. Signals are forwarded to callbacks
//! registered with the `on_*` methods.

use std::collections::BTreeMap;

use syncevo_core::domain::{ProgressEvent, ProgressKind};
use syncevo_gdbus::{Connection, DBusClientCall, RemoteObject, Result, SignalWatch};
use tracing::warn;

use crate::service::{ProgressArgs, DBUS_INTERFACE};
use crate::types::{ConfigOption, SourceSelection};

/// `GetStatus` result: state text and the sources of the running sync
pub type Status = (String, Vec<String>);

/// Typed proxy for `org.syncevolution.Server`
pub struct SyncevoService {
    remote: RemoteObject,
    get_servers: DBusClientCall<(Vec<String>,)>,
    get_templates: DBusClientCall<(Vec<String>,)>,
    get_server_config: DBusClientCall<(Vec<ConfigOption>,)>,
    set_server_config: DBusClientCall<()>,
    remove_server_config: DBusClientCall<()>,
    get_sync_reports: DBusClientCall<(Vec<BTreeMap<String, String>>,)>,
    get_status: DBusClientCall<Status>,
    start_sync: DBusClientCall<()>,
    abort_sync: DBusClientCall<()>,
    set_password: DBusClientCall<()>,
    progress: SignalWatch<ProgressArgs>,
    server_message: SignalWatch<(String, String)>,
    need_password: SignalWatch<(String,)>,
}

impl SyncevoService {
    /// Proxy for the server object at `path` owned by `destination`
    pub fn new(conn: Connection, destination: &str, path: &str) -> Result<Self> {
        let remote = RemoteObject::new(conn, destination, path, DBUS_INTERFACE)?;
        Ok(Self {
            get_servers: DBusClientCall::new(&remote, "GetServers")?,
            get_templates: DBusClientCall::new(&remote, "GetTemplates")?,
            get_server_config: DBusClientCall::new(&remote, "GetServerConfig")?,
            set_server_config: DBusClientCall::new(&remote, "SetServerConfig")?,
            remove_server_config: DBusClientCall::new(&remote, "RemoveServerConfig")?,
            get_sync_reports: DBusClientCall::new(&remote, "GetSyncReports")?,
            get_status: DBusClientCall::new(&remote, "GetStatus")?,
            start_sync: DBusClientCall::new(&remote, "StartSync")?,
            abort_sync: DBusClientCall::new(&remote, "AbortSync")?,
            set_password: DBusClientCall::new(&remote, "SetPassword")?,
            progress: SignalWatch::new(&remote, "Progress")?,
            server_message: SignalWatch::new(&remote, "ServerMessage")?,
            need_password: SignalWatch::new(&remote, "NeedPassword")?,
            remote,
        })
    }

    pub fn remote(&self) -> &RemoteObject {
        &self.remote
    }

    pub fn get_servers(&self, callback: impl FnOnce(Result<Vec<String>>) + 'static) {
        self.get_servers
            .call((), move |result| callback(result.map(|(servers,)| servers)));
    }

    pub fn get_templates(&self, callback: impl FnOnce(Result<Vec<String>>) + 'static) {
        self.get_templates
            .call((), move |result| callback(result.map(|(templates,)| templates)));
    }

    pub fn get_server_config(
        &self,
        server: &str,
        callback: impl FnOnce(Result<Vec<ConfigOption>>) + 'static,
    ) {
        self.get_server_config.call((server.to_string(),), move |result| {
            callback(result.map(|(options,)| options))
        });
    }

    pub fn set_server_config(
        &self,
        server: &str,
        options: Vec<ConfigOption>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        self.set_server_config
            .call((server.to_string(), options), callback);
    }

    pub fn remove_server_config(&self, server: &str, callback: impl FnOnce(Result<()>) + 'static) {
        self.remove_server_config
            .call((server.to_string(),), callback);
    }

    /// Up to `count` reports of `server`, newest first
    pub fn get_sync_reports(
        &self,
        server: &str,
        count: u32,
        callback: impl FnOnce(Result<Vec<BTreeMap<String, String>>>) + 'static,
    ) {
        self.get_sync_reports
            .call((server.to_string(), count), move |result| {
                callback(result.map(|(reports,)| reports))
            });
    }

    pub fn get_status(&self, server: &str, callback: impl FnOnce(Result<Status>) + 'static) {
        self.get_status.call((server.to_string(),), callback);
    }

    /// Starts a sync; `callback` runs when the sync has ended
    pub fn start_sync(
        &self,
        server: &str,
        sources: Vec<SourceSelection>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        self.start_sync
            .call((server.to_string(), sources), callback);
    }

    pub fn abort_sync(&self, server: &str, callback: impl FnOnce(Result<()>) + 'static) {
        self.abort_sync.call((server.to_string(),), callback);
    }

    pub fn set_password(
        &self,
        server: &str,
        password: &str,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        self.set_password
            .call((server.to_string(), password.to_string()), callback);
    }

    /// Forwards `Progress` signals as `(server, event)`
    ///
    /// Events with an unknown type code are logged and dropped.
    pub fn on_progress(&self, callback: impl Fn(&str, ProgressEvent) + 'static) -> Result<()> {
        self.progress.activate(
            move |(server, source, code, extra1, extra2, extra3): ProgressArgs| {
                match ProgressKind::from_code(code) {
                    Ok(kind) => callback(
                        &server,
                        ProgressEvent::source(source, kind, [extra1, extra2, extra3]),
                    ),
                    Err(err) => warn!(%server, code, error = %err, "Ignoring progress event"),
                }
            },
        )
    }

    /// Forwards `ServerMessage` signals as `(server, message)`
    pub fn on_server_message(&self, callback: impl Fn(&str, &str) + 'static) -> Result<()> {
        self.server_message
            .activate(move |(server, message): (String, String)| callback(&server, &message))
    }

    /// Forwards `NeedPassword` signals with the server name
    pub fn on_need_password(&self, callback: impl Fn(&str) + 'static) -> Result<()> {
        self.need_password
            .activate(move |(server,): (String,)| callback(&server))
    }
}
