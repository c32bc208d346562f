//! In-process bus hosting the sync service and one client
//!
//! Calls made through [`Session::call`] run the event loop until it is idle,
//! which for `StartSync` means until the sync has ended or waits for input
//! that never comes.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Result};
use syncevo_core::config::Config;
use syncevo_core::simulated::SimulatedEngine;
use syncevo_dbus::{SyncServer, SyncevoService};
use syncevo_gdbus::{Connection, LocalBus};
use tracing::debug;

/// Completion callback handed to a proxy call
pub type Done<T> = Box<dyn FnOnce(syncevo_gdbus::Result<T>)>;

pub struct Session {
    pub bus: LocalBus,
    pub server: Rc<SyncServer>,
    pub client: Connection,
    pub proxy: Rc<SyncevoService>,
}

impl Session {
    /// Starts the service with `config`; changes are saved to `config_path`
    pub fn open(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let bus = LocalBus::new();
        let service_name = config.bus.service_name.clone();
        let object_path = config.bus.object_path.clone();
        let server = SyncServer::new(bus.connect(), config, Box::new(SimulatedEngine::new()))?;
        if let Some(path) = config_path {
            server.set_config_path(path);
        }
        let client = bus.connect();
        let proxy = Rc::new(SyncevoService::new(
            client.clone(),
            &service_name,
            &object_path,
        )?);
        debug!(client = %client.unique_name(), "Session opened");
        Ok(Self {
            bus,
            server,
            client,
            proxy,
        })
    }

    /// Issues a call and runs the loop until its reply arrived
    pub fn call<T: 'static>(&self, start: impl FnOnce(Done<T>)) -> Result<T> {
        let slot: Rc<RefCell<Option<syncevo_gdbus::Result<T>>>> = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        start(Box::new(move |result| {
            *sink.borrow_mut() = Some(result);
        }));
        let steps = self.bus.run_until_idle();
        debug!(steps, "Event loop idle");
        let result = slot.borrow_mut().take();
        match result {
            Some(result) => Ok(result?),
            None => bail!("no reply received"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncevo_core::config::{ConfigBuilder, ServerConfig};

    #[test]
    fn test_call_returns_reply() {
        let config = ConfigBuilder::new()
            .server("work", ServerConfig::new("http://example.com"))
            .build();
        let session = Session::open(config, None).unwrap();
        let servers: Vec<String> = session
            .call(|done| session.proxy.get_servers(done))
            .unwrap();
        assert_eq!(servers, vec!["work".to_string()]);
    }

    #[test]
    fn test_call_maps_remote_errors() {
        let session = Session::open(Config::default(), None).unwrap();
        let err = session
            .call(|done| session.proxy.get_status("nowhere", done))
            .unwrap_err();
        assert!(err.to_string().contains("NoSuchServer"));
    }
}
