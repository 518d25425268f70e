//! Change a PID setpoint and make sure the controller runs

use crate::commands::config::CliConfig;
use crate::session::{ServerArgs, device};
use anyhow::{Result, bail};
use clap::Args;
use tracing::info;
use ziapi_sdk::prelude::*;

#[derive(Args, Debug)]
pub struct PidCommand {
    /// New setpoint
    #[arg(long, allow_hyphen_values = true)]
    pub setpoint: f64,

    #[arg(long)]
    pub device: Option<String>,

    /// PID index
    #[arg(long, default_value_t = 0)]
    pub pid: u32,
}

/// Setpoint before and after the change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointChange {
    pub old: f64,
    pub new: f64,
}

/// Read the old setpoint, write the new one and enable the controller.
pub fn change_setpoint(conn: &mut Connection, device: &str, pid: u32, setpoint: f64) -> Result<SetpointChange> {
    if !conn.has_option(device, "PID")? {
        bail!("{} has no PID option", device);
    }
    let base = format!("/{}/pids/{}", device, pid);
    let old = conn.get_double(&format!("{}/setpoint", base))?;
    conn.set_double(&format!("{}/setpoint", base), setpoint)?;
    let enabled = conn.sync_set_integer(&format!("{}/enable", base), 1)?;
    if enabled != 1 {
        bail!("{} refused to enable", base);
    }
    let new = conn.get_double(&format!("{}/setpoint", base))?;
    info!(device, pid, old, new, "PID setpoint changed");
    Ok(SetpointChange { old, new })
}

impl PidCommand {
    pub fn execute(&self, server: &ServerArgs, config: &CliConfig) -> Result<()> {
        let device = device(self.device.clone(), config)?;
        let mut conn = server.connect(config)?;
        let change = change_setpoint(&mut conn, &device, self.pid, self.setpoint)?;
        println!("PID {} setpoint: {} -> {}", self.pid, change.old, change.new);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sim(device: SimDeviceConfig) -> Connection {
        let network = SimNetwork::new();
        let server = SimServer::start(SimConfig::default().manual().with_device(device.connected()));
        network.register(Endpoint::localhost(8004), server);
        ConnectionBuilder::new()
            .endpoint(Endpoint::localhost(8004))
            .connector(Arc::new(network.connector()))
            .open()
            .unwrap()
    }

    #[test]
    fn test_change_setpoint() {
        let mut conn = sim(SimDeviceConfig::mf("dev1"));
        let change = change_setpoint(&mut conn, "dev1", 0, 1.5).unwrap();
        assert_eq!(change, SetpointChange { old: 0.0, new: 1.5 });
        assert_eq!(conn.get_integer("/dev1/pids/0/enable").unwrap(), 1);
    }

    #[test]
    fn test_requires_pid_option() {
        let mut conn = sim(SimDeviceConfig::mf("dev1").with_options(&["MD"]));
        assert!(change_setpoint(&mut conn, "dev1", 0, 1.5).is_err());
    }
}
