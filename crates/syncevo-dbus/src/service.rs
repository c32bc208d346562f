//! `org.syncevolution.Server` service object
//!
//! Holds the configuration, the report log and at most one running sync.
//! A sync is advanced one engine step per idle task, so the event loop keeps
//! serving calls while it runs. `StartSync` is asynchronous: its reply goes
//! out when the engine reports the end of the sync.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use syncevo_core::config::{Config, ConfigEntry, ServerConfig};
use syncevo_core::domain::{ProgressEvent, ReportLog, SyncReport, SyncStatus};
use syncevo_core::ports::{SourceRequest, StepOutcome, SyncEngine, SyncRun};
use syncevo_gdbus::{
    Caller, CallerWatch, Connection, DBusError, EmitSignal, ObjectHelper, Out, PeerWatch, Reply,
};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::types::{ConfigOption, SourceSelection};

/// Default well-known name of the service
pub const DBUS_NAME: &str = "org.syncevolution";

/// Default object path of the server object
pub const DBUS_PATH: &str = "/org/syncevolution/Server";

/// Interface exported by the server object
pub const DBUS_INTERFACE: &str = "org.syncevolution.Server";

/// `Progress(server, source, type, extra1, extra2, extra3)`
pub type ProgressArgs = (String, String, i32, i32, i32, i32);

struct ActiveSync {
    server: String,
    client: String,
    run: Box<dyn SyncRun>,
    reply: Reply<()>,
    /// Keeps the client liveness subscription alive
    _watch: PeerWatch,
    waiting_for_password: bool,
}

struct ServerState {
    config: Config,
    config_path: Option<PathBuf>,
    reports: ReportLog,
    active: Option<ActiveSync>,
}

/// The sync service exported on the bus
pub struct SyncServer {
    me: Weak<SyncServer>,
    conn: Connection,
    object: ObjectHelper,
    progress: EmitSignal<ProgressArgs>,
    server_message: EmitSignal<(String, String)>,
    need_password: EmitSignal<(String,)>,
    engine: Box<dyn SyncEngine>,
    state: RefCell<ServerState>,
}

impl SyncServer {
    /// Exports the server object and requests the configured bus name
    pub fn new(
        conn: Connection,
        config: Config,
        engine: Box<dyn SyncEngine>,
    ) -> Result<Rc<Self>, DBusError> {
        let object = ObjectHelper::new(conn.clone(), &config.bus.object_path, DBUS_INTERFACE)?;
        let progress: EmitSignal<ProgressArgs> = EmitSignal::new(&object, "Progress")?;
        let server_message: EmitSignal<(String, String)> =
            EmitSignal::new(&object, "ServerMessage")?;
        let need_password: EmitSignal<(String,)> = EmitSignal::new(&object, "NeedPassword")?;
        object.add_signal(&progress);
        object.add_signal(&server_message);
        object.add_signal(&need_password);

        let service_name = config.bus.service_name.clone();
        let reports = ReportLog::new(config.reports.max_reports as usize);
        let server = Rc::new_cyclic(|me| SyncServer {
            me: me.clone(),
            conn: conn.clone(),
            object,
            progress,
            server_message,
            need_password,
            engine,
            state: RefCell::new(ServerState {
                config,
                config_path: None,
                reports,
                active: None,
            }),
        });
        server.register_methods()?;
        server.object.activate()?;
        conn.request_name(&service_name)?;
        info!(name = %service_name, "Sync service ready");
        Ok(server)
    }

    /// Persists configuration changes made over the bus to `path`
    pub fn set_config_path(&self, path: PathBuf) {
        self.state.borrow_mut().config_path = Some(path);
    }

    pub fn object(&self) -> &ObjectHelper {
        &self.object
    }

    pub fn config(&self) -> Config {
        self.state.borrow().config.clone()
    }

    /// Server name of the running sync, if any
    pub fn active_sync(&self) -> Option<String> {
        self.state
            .borrow()
            .active
            .as_ref()
            .map(|active| active.server.clone())
    }

    fn register_methods(&self) -> Result<(), DBusError> {
        let object = &self.object;

        let me = self.me.clone();
        object.add_method("GetServers", move || -> Result<Vec<String>, ServerError> {
            Ok(upgrade(&me)?.get_servers())
        })?;

        let me = self.me.clone();
        object.add_method("GetTemplates", move || -> Result<Vec<String>, ServerError> {
            Ok(upgrade(&me)?.get_templates())
        })?;

        let me = self.me.clone();
        object.add_method(
            "GetServerConfig",
            move |server: String| -> Result<Vec<ConfigOption>, ServerError> {
                upgrade(&me)?.get_server_config(&server)
            },
        )?;

        let me = self.me.clone();
        object.add_method(
            "SetServerConfig",
            move |server: String, options: Vec<ConfigOption>| -> Result<(), ServerError> {
                upgrade(&me)?.set_server_config(&server, options)
            },
        )?;

        let me = self.me.clone();
        object.add_method(
            "RemoveServerConfig",
            move |server: String| -> Result<(), ServerError> {
                upgrade(&me)?.remove_server_config(&server)
            },
        )?;

        let me = self.me.clone();
        object.add_method(
            "GetSyncReports",
            move |server: String,
                  count: u32|
                  -> Result<Vec<BTreeMap<String, String>>, ServerError> {
                upgrade(&me)?.get_sync_reports(&server, count)
            },
        )?;

        let me = self.me.clone();
        object.add_method(
            "GetStatus",
            move |server: String,
                  status: Out<String>,
                  sources: Out<Vec<String>>|
                  -> Result<(), ServerError> {
                let (text, names) = upgrade(&me)?.get_status(&server)?;
                status.set(text);
                sources.set(names);
                Ok(())
            },
        )?;

        let me = self.me.clone();
        object.add_method(
            "StartSync",
            move |caller: Caller,
                  watch: CallerWatch,
                  server: String,
                  sources: Vec<SourceSelection>,
                  reply: Reply<()>|
                  -> Result<(), ServerError> {
                upgrade(&me)?.start_sync(caller, watch, &server, &sources, reply)
            },
        )?;

        let me = self.me.clone();
        object.add_method("AbortSync", move |server: String| -> Result<(), ServerError> {
            upgrade(&me)?.abort_sync(&server)
        })?;

        let me = self.me.clone();
        object.add_method(
            "SetPassword",
            move |server: String, password: String| -> Result<(), ServerError> {
                upgrade(&me)?.set_password(&server, &password)
            },
        )?;

        Ok(())
    }

    fn get_servers(&self) -> Vec<String> {
        self.state.borrow().config.servers.keys().cloned().collect()
    }

    fn get_templates(&self) -> Vec<String> {
        self.state.borrow().config.templates.keys().cloned().collect()
    }

    fn get_server_config(&self, server: &str) -> Result<Vec<ConfigOption>, ServerError> {
        let state = self.state.borrow();
        let config = state
            .config
            .server_or_template(server)
            .ok_or_else(|| ServerError::NoSuchServer(server.to_string()))?;
        Ok(config
            .to_entries()
            .into_iter()
            .map(ConfigOption::from)
            .collect())
    }

    fn set_server_config(&self, server: &str, options: Vec<ConfigOption>) -> Result<(), ServerError> {
        if server.is_empty() || server.contains('/') {
            return Err(ServerError::InvalidConfig(format!(
                "invalid server name '{server}'"
            )));
        }
        let mut state = self.state.borrow_mut();
        if state.active.as_ref().is_some_and(|a| a.server == server) {
            return Err(ServerError::Busy(server.to_string()));
        }

        let mut config = if options.is_empty() {
            // Creating from the template of the same name
            state
                .config
                .templates
                .get(server)
                .cloned()
                .ok_or_else(|| ServerError::InvalidConfig("no options given".to_string()))?
        } else {
            let entries: Vec<ConfigEntry> = options.into_iter().map(ConfigEntry::from).collect();
            ServerConfig::from_entries(&entries)?
        };
        // The password is never reported, so a round trip must not clear it.
        if config.password.is_empty() {
            if let Some(previous) = state.config.servers.get(server) {
                config.password = previous.password.clone();
            }
        }

        let mut updated = state.config.clone();
        updated.servers.insert(server.to_string(), config);
        let prefix = format!("servers.{server}");
        let errors: Vec<String> = updated
            .validate()
            .into_iter()
            .filter(|e| e.field.starts_with(&prefix))
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(ServerError::InvalidConfig(errors.join("; ")));
        }

        store(state.config_path.as_ref(), &updated)?;
        state.config = updated;
        info!(server, "Server configuration stored");
        Ok(())
    }

    fn remove_server_config(&self, server: &str) -> Result<(), ServerError> {
        let mut state = self.state.borrow_mut();
        if !state.config.servers.contains_key(server) {
            return Err(ServerError::NoSuchServer(server.to_string()));
        }
        if state.active.as_ref().is_some_and(|a| a.server == server) {
            return Err(ServerError::Busy(server.to_string()));
        }
        let mut updated = state.config.clone();
        updated.servers.remove(server);
        store(state.config_path.as_ref(), &updated)?;
        state.config = updated;
        state.reports.remove_server(server);
        info!(server, "Server configuration removed");
        Ok(())
    }

    fn get_sync_reports(
        &self,
        server: &str,
        count: u32,
    ) -> Result<Vec<BTreeMap<String, String>>, ServerError> {
        let state = self.state.borrow();
        if !state.config.servers.contains_key(server) {
            return Err(ServerError::NoSuchServer(server.to_string()));
        }
        Ok(state
            .reports
            .newest(server, count as usize)
            .into_iter()
            .map(SyncReport::to_map)
            .collect())
    }

    fn get_status(&self, server: &str) -> Result<(String, Vec<String>), ServerError> {
        let state = self.state.borrow();
        if let Some(active) = state.active.as_ref().filter(|a| a.server == server) {
            let names = active.run.sources().into_iter().map(|(name, _)| name).collect();
            return Ok((active.run.state(), names));
        }
        if state.config.servers.contains_key(server) {
            Ok(("idle".to_string(), Vec::new()))
        } else {
            Err(ServerError::NoSuchServer(server.to_string()))
        }
    }

    fn start_sync(
        &self,
        caller: Caller,
        watch: CallerWatch,
        server: &str,
        sources: &[SourceSelection],
        reply: Reply<()>,
    ) -> Result<(), ServerError> {
        let mut run = {
            let state = self.state.borrow();
            if let Some(active) = &state.active {
                return Err(ServerError::Busy(active.server.clone()));
            }
            let config = state
                .config
                .servers
                .get(server)
                .ok_or_else(|| ServerError::NoSuchServer(server.to_string()))?;
            let requests = sources
                .iter()
                .map(SourceSelection::to_request)
                .collect::<Result<Vec<SourceRequest>, _>>()?;
            self.engine.start(server, config, &requests)?
        };

        let watch = watch.into_inner();
        if watch.is_disconnected() {
            info!(server, client = %caller, "Client gone before sync started");
            run.abort();
        } else {
            let me = self.me.clone();
            let client = caller.0.clone();
            watch.set_callback(move || {
                if let Some(service) = me.upgrade() {
                    service.client_gone(&client);
                }
            });
        }

        info!(server, client = %caller, "Sync started");
        self.state.borrow_mut().active = Some(ActiveSync {
            server: server.to_string(),
            client: caller.0,
            run,
            reply,
            _watch: watch,
            waiting_for_password: false,
        });
        self.schedule_step();
        Ok(())
    }

    fn abort_sync(&self, server: &str) -> Result<(), ServerError> {
        let resume = {
            let mut state = self.state.borrow_mut();
            let configured = state.config.servers.contains_key(server);
            match state.active.as_mut().filter(|a| a.server == server) {
                Some(active) => {
                    active.run.abort();
                    std::mem::take(&mut active.waiting_for_password)
                }
                None if configured => {
                    return Err(ServerError::NotRunning(server.to_string()));
                }
                None => return Err(ServerError::NoSuchServer(server.to_string())),
            }
        };
        info!(server, "Sync abort requested");
        if resume {
            self.schedule_step();
        }
        Ok(())
    }

    fn set_password(&self, server: &str, password: &str) -> Result<(), ServerError> {
        let resume = {
            let mut state = self.state.borrow_mut();
            let active = state
                .active
                .as_mut()
                .filter(|a| a.server == server)
                .ok_or_else(|| ServerError::NotRunning(server.to_string()))?;
            active.run.set_password(password);
            std::mem::take(&mut active.waiting_for_password)
        };
        debug!(server, "Password received");
        if resume {
            self.schedule_step();
        }
        Ok(())
    }

    fn client_gone(&self, client: &str) {
        let resume = {
            let mut state = self.state.borrow_mut();
            match state.active.as_mut().filter(|a| a.client == client) {
                Some(active) => {
                    info!(server = %active.server, client, "Client disconnected, aborting sync");
                    active.run.abort();
                    std::mem::take(&mut active.waiting_for_password)
                }
                None => false,
            }
        };
        if resume {
            self.schedule_step();
        }
    }

    fn schedule_step(&self) {
        let me = self.me.clone();
        self.conn.idle_add(move || {
            if let Some(service) = me.upgrade() {
                service.step();
            }
        });
    }

    /// Advances the running sync by one engine step
    fn step(&self) {
        let (server, outcome) = {
            let mut state = self.state.borrow_mut();
            let Some(active) = state.active.as_mut() else {
                return;
            };
            (active.server.clone(), active.run.step())
        };

        match outcome {
            StepOutcome::Progress(event) => {
                self.emit_progress(&server, event);
                self.schedule_step();
            }
            StepOutcome::ServerMessage(text) => {
                if let Err(err) = self.server_message.emit((server.clone(), text)) {
                    warn!(%server, error = %err, "Cannot emit ServerMessage");
                }
                self.schedule_step();
            }
            StepOutcome::NeedPassword => {
                let first = {
                    let mut state = self.state.borrow_mut();
                    match state.active.as_mut() {
                        Some(active) => !std::mem::replace(&mut active.waiting_for_password, true),
                        None => false,
                    }
                };
                if first {
                    debug!(%server, "Waiting for password");
                    if let Err(err) = self.need_password.emit((server.clone(),)) {
                        warn!(%server, error = %err, "Cannot emit NeedPassword");
                    }
                }
            }
            StepOutcome::Finished(report) => self.finish(report),
        }
    }

    fn emit_progress(&self, server: &str, event: ProgressEvent) {
        let [extra1, extra2, extra3] = event.extra;
        let args = (
            server.to_string(),
            event.source,
            event.kind.code(),
            extra1,
            extra2,
            extra3,
        );
        if let Err(err) = self.progress.emit(args) {
            warn!(server, error = %err, "Cannot emit Progress");
        }
    }

    fn finish(&self, report: SyncReport) {
        let active = {
            let mut state = self.state.borrow_mut();
            state.reports.push(report.clone());
            state.active.take()
        };
        let Some(active) = active else {
            return;
        };
        info!(server = %active.server, status = %report.status, "Sync finished");
        let sent = match report.status {
            SyncStatus::Ok => active.reply.done(()),
            SyncStatus::Failed(msg) => active.reply.failed(ServerError::SyncFailed(msg)),
            SyncStatus::Aborted => active.reply.failed(ServerError::Aborted(active.server.clone())),
        };
        if let Err(err) = sent {
            warn!(server = %active.server, error = %err, "Cannot reply to StartSync");
        }
    }
}

fn upgrade(me: &Weak<SyncServer>) -> Result<Rc<SyncServer>, ServerError> {
    me.upgrade().ok_or(ServerError::ShuttingDown)
}

fn store(path: Option<&PathBuf>, config: &Config) -> Result<(), ServerError> {
    match path {
        Some(path) => config
            .save(path)
            .map_err(|err| ServerError::Storage(format!("{err:#}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncevo_core::config::ConfigBuilder;
    use syncevo_core::simulated::SimulatedEngine;
    use syncevo_gdbus::LocalBus;

    #[test]
    fn test_dbus_constants() {
        assert_eq!(DBUS_NAME, "org.syncevolution");
        assert_eq!(DBUS_PATH, "/org/syncevolution/Server");
        assert_eq!(DBUS_INTERFACE, "org.syncevolution.Server");
    }

    #[test]
    fn test_interface_signatures() {
        let bus = LocalBus::new();
        let server = SyncServer::new(
            bus.connect(),
            ConfigBuilder::new().build(),
            Box::new(SimulatedEngine::new()),
        )
        .unwrap();
        let info = server.object().interface_info();
        let signature = |name: &str| {
            let method = info.method(name).unwrap();
            (
                method
                    .in_args
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<String>(),
                method
                    .out_args
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<String>(),
            )
        };
        assert_eq!(signature("GetServers"), ("".to_string(), "as".to_string()));
        assert_eq!(
            signature("GetServerConfig"),
            ("s".to_string(), "a(sss)".to_string())
        );
        assert_eq!(
            signature("SetServerConfig"),
            ("sa(sss)".to_string(), "".to_string())
        );
        assert_eq!(
            signature("GetSyncReports"),
            ("su".to_string(), "aa{ss}".to_string())
        );
        assert_eq!(signature("GetStatus"), ("s".to_string(), "sas".to_string()));
        assert_eq!(signature("StartSync"), ("sa(si)".to_string(), "".to_string()));
        assert_eq!(signature("SetPassword"), ("ss".to_string(), "".to_string()));
        let signals: Vec<_> = info.signals.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(signals, vec!["Progress", "ServerMessage", "NeedPassword"]);
        assert!(bus.list_names().contains(&DBUS_NAME.to_string()));
    }
}
