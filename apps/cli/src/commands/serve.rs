//! Host the simulated Data Server over TCP

use crate::session::interrupt_flag;
use anyhow::{Result, bail};
use clap::Args;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::info;
use ziapi_sdk::transport::sim::{DeviceFamily, TcpHost};
use ziapi_sdk::transport::{SimConfig, SimDeviceConfig, SimServer};

#[derive(Args, Debug)]
pub struct ServeCommand {
    /// Listen port (8004 for MF/UHF servers, 8005 for HF2)
    #[arg(short, long, default_value_t = 8004)]
    pub port: u16,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Simulated device as `serial[:family]`, family one of mf, uhf, hf2; repeatable
    #[arg(short, long = "device", default_value = "dev1234:mf")]
    pub devices: Vec<String>,

    /// Devices start out connected
    #[arg(long)]
    pub connected: bool,

    /// Sessions accepted before new ones are rejected
    #[arg(long, default_value_t = 64)]
    pub max_connections: usize,
}

/// Parse `serial[:family]`.
pub fn parse_device(arg: &str) -> Result<SimDeviceConfig> {
    let (serial, family) = arg.split_once(':').unwrap_or((arg, "mf"));
    let serial = serial.trim();
    if serial.is_empty() {
        bail!("Empty device serial in {:?}", arg);
    }
    let family = match family.trim().to_ascii_lowercase().as_str() {
        "mf" | "mfli" => DeviceFamily::Mf,
        "uhf" | "uhfli" => DeviceFamily::Uhf,
        "hf2" | "hf2li" => DeviceFamily::Hf2,
        other => bail!("Unknown device family {:?}", other),
    };
    Ok(SimDeviceConfig::new(serial, family))
}

impl ServeCommand {
    pub fn sim_config(&self) -> Result<SimConfig> {
        let mut config = SimConfig {
            port: self.port,
            max_connections: self.max_connections,
            ..SimConfig::default()
        };
        for arg in &self.devices {
            let device = parse_device(arg)?;
            config = config.with_device(if self.connected { device.connected() } else { device });
        }
        Ok(config)
    }

    pub fn execute(&self) -> Result<()> {
        let running = interrupt_flag()?;
        let server = SimServer::start(self.sim_config()?);
        let mut host = TcpHost::bind(server.clone(), (self.bind.as_str(), self.port))?;
        println!("Serving {} on {} (Ctrl-C to stop)", self.devices.join(", "), host.endpoint());

        while running.load(Ordering::SeqCst) && host.is_running() {
            std::thread::sleep(Duration::from_millis(100));
        }

        info!(sessions = server.session_count(), "Shutting down");
        host.stop();
        server.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        let d = parse_device("DEV800:hf2").unwrap();
        assert_eq!(d.serial, "dev800");
        assert_eq!(d.family, DeviceFamily::Hf2);
        assert_eq!(parse_device("dev1").unwrap().family, DeviceFamily::Mf);
        assert!(parse_device("dev1:xyz").is_err());
        assert!(parse_device(":uhf").is_err());
    }

    #[test]
    fn test_sim_config() {
        let cmd = ServeCommand {
            port: 8005,
            bind: "127.0.0.1".into(),
            devices: vec!["dev800:hf2".into(), "dev2:uhf".into()],
            connected: true,
            max_connections: 2,
        };
        let config = cmd.sim_config().unwrap();
        assert_eq!(config.port, 8005);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.devices.len(), 2);
        assert!(config.devices.iter().all(|d| d.connected.is_some()));
    }
}
