//! Serve command - exports the sync service on a message bus

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use syncevo_core::config::Config;
use syncevo_core::simulated::SimulatedEngine;
use syncevo_dbus::SyncServer;
use syncevo_gdbus::{BusAddress, ZbusBus};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    Session,
    System,
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Bus to export the service on
    #[arg(long, value_enum, default_value = "session")]
    pub bus: BusKind,

    /// Connect to the bus daemon at this D-Bus address instead
    #[arg(long, conflicts_with = "bus")]
    pub address: Option<String>,
}

impl ServeCommand {
    pub fn bus_address(&self) -> BusAddress {
        match (&self.address, self.bus) {
            (Some(address), _) => BusAddress::Address(address.clone()),
            (None, BusKind::Session) => BusAddress::Session,
            (None, BusKind::System) => BusAddress::System,
        }
    }

    /// Runs the service until the bus connection goes away
    pub fn execute(&self, config: Config, config_path: PathBuf) -> Result<()> {
        let address = self.bus_address();
        let bus = ZbusBus::connect(&address)
            .with_context(|| format!("cannot connect to {address:?} bus"))?;
        let service_name = config.bus.service_name.clone();
        let server = SyncServer::new(bus.connection(), config, Box::new(SimulatedEngine::new()))
            .with_context(|| format!("cannot export {service_name}"))?;
        server.set_config_path(config_path);

        info!(name = %service_name, peer = %bus.unique_name(), "Serving");
        bus.run()?;
        info!("Bus connection closed, exiting");
        Ok(())
    }
}
