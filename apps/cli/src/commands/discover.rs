//! Resolve a device and print its discovery properties

use crate::commands::config::CliConfig;
use crate::session::device;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use ziapi_sdk::client::DeviceId;
use ziapi_sdk::prelude::*;

#[derive(Args, Debug)]
pub struct DiscoverCommand {
    /// Device address, e.g. dev1234 (defaults to the configured device)
    pub device: Option<String>,

    /// Static discovery table (overrides config)
    #[arg(long)]
    pub table: Option<PathBuf>,
}

/// Every property of `id` as `(key, value)` pairs.
pub fn properties(discovery: &dyn Discovery, id: &DeviceId) -> Result<Vec<(&'static str, String)>> {
    let mut out = Vec::new();
    for key in ["discoverable", "serverport", "apilevel"] {
        out.push((key, discovery.get_integer(id, key)?.to_string()));
    }
    for key in ["serveraddress", "connected", "interfaces", "devicetype"] {
        let value = discovery.get_string(id, key)?;
        out.push((key, value.lines().collect::<Vec<_>>().join(", ")));
    }
    Ok(out)
}

impl DiscoverCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let address = device(self.device.clone(), config)?;
        let table = self
            .table
            .clone()
            .or_else(|| config.discovery.clone())
            .context("No discovery table; pass --table or run `ziapi-cli config set --discovery ...`")?;
        let discovery = StaticDiscovery::load(&table).with_context(|| format!("Loading {}", table.display()))?;
        let id = discovery.find(&address)?;
        println!("{}", id);
        for (key, value) in properties(&discovery, &id)? {
            println!("  {:<14} {}", key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ziapi_sdk::client::DeviceEntry;

    #[test]
    fn test_properties() {
        let discovery = StaticDiscovery::new()
            .with_device(DeviceEntry::new("dev1234", &Endpoint::localhost(8004), 6).with_interfaces(&["1GbE", "USB"]));
        let id = discovery.find("DEV1234").unwrap();
        let props = properties(&discovery, &id).unwrap();
        assert!(props.contains(&("serverport", "8004".to_string())));
        assert!(props.contains(&("interfaces", "1GbE, USB".to_string())));
        assert!(props.contains(&("connected", String::new())));
    }
}
