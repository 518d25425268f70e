//! Device discovery
//!
//! Resolves a device address such as `dev1234` to the Data Server hosting
//! it, plus a small property bag queried by key:
//!
//! | key             | type    |                                           |
//! |-----------------|---------|-------------------------------------------|
//! | `discoverable`  | integer | 1 if the device answers discovery         |
//! | `serveraddress` | string  | Data Server host                          |
//! | `serverport`    | integer | Data Server port                          |
//! | `apilevel`      | integer | Highest API level the device supports     |
//! | `connected`     | string  | Interface in use, empty when disconnected |
//! | `interfaces`    | string  | Physical interfaces, newline separated    |
//! | `devicetype`    | string  | Instrument type, e.g. `MFLI`              |
//!
//! A static table for fixed setups can be loaded from TOML:
//!
//! ```toml
//! [[device]]
//! id = "dev1234"
//! serveraddress = "127.0.0.1"
//! serverport = 8004
//! apilevel = 4
//! interfaces = ["1GbE"]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use ziapi_driver::ApiError;
use ziapi_transport::{Endpoint, SimNetwork};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Unknown discovery property: {0}")]
    UnknownKey(String),
    #[error("Discovery property {key} is not {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("Discovery config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Canonical device id (lowercase serial)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(address: &str) -> Self {
        Self(address.trim().trim_matches('/').to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address resolution collaborator
pub trait Discovery: Send + Sync {
    fn find(&self, address: &str) -> Result<DeviceId, DiscoveryError>;

    fn get_integer(&self, id: &DeviceId, key: &str) -> Result<i64, DiscoveryError>;

    fn get_string(&self, id: &DeviceId, key: &str) -> Result<String, DiscoveryError>;

    /// Server of `id` built from `serveraddress` and `serverport`.
    fn endpoint(&self, id: &DeviceId) -> Result<Endpoint, DiscoveryError> {
        let host = self.get_string(id, "serveraddress")?;
        let port = self.get_integer(id, "serverport")?;
        let port = u16::try_from(port).map_err(|_| DiscoveryError::WrongType {
            key: "serverport".into(),
            expected: "a port number",
        })?;
        Ok(Endpoint::new(host, port))
    }
}

const INTEGER_KEYS: [&str; 3] = ["discoverable", "serverport", "apilevel"];
const STRING_KEYS: [&str; 4] = ["serveraddress", "connected", "interfaces", "devicetype"];

fn check_key(key: &str, integer: bool) -> Result<String, DiscoveryError> {
    let key = key.trim().to_ascii_lowercase();
    let (mine, other, expected) = if integer {
        (&INTEGER_KEYS[..], &STRING_KEYS[..], "an integer")
    } else {
        (&STRING_KEYS[..], &INTEGER_KEYS[..], "a string")
    };
    if mine.contains(&key.as_str()) {
        Ok(key)
    } else if other.contains(&key.as_str()) {
        Err(DiscoveryError::WrongType { key, expected })
    } else {
        Err(DiscoveryError::UnknownKey(key))
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    Endpoint::DEFAULT_PORT
}

fn default_api_level() -> u8 {
    6
}

/// One entry of a [`StaticDiscovery`] table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub serveraddress: String,
    #[serde(default = "default_port")]
    pub serverport: u16,
    #[serde(default = "default_api_level")]
    pub apilevel: u8,
    #[serde(default)]
    pub connected: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub devicetype: String,
    #[serde(default = "default_true")]
    pub discoverable: bool,
}

impl DeviceEntry {
    pub fn new(id: &str, endpoint: &Endpoint, apilevel: u8) -> Self {
        Self {
            id: DeviceId::new(id).0,
            serveraddress: endpoint.host.clone(),
            serverport: endpoint.port,
            apilevel,
            connected: String::new(),
            interfaces: Vec::new(),
            devicetype: String::new(),
            discoverable: true,
        }
    }

    pub fn with_interfaces(mut self, interfaces: &[&str]) -> Self {
        self.interfaces = interfaces.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct StaticTable {
    #[serde(default)]
    device: Vec<DeviceEntry>,
}

/// Discovery from a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    devices: Vec<DeviceEntry>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, DiscoveryError> {
        let table: StaticTable = toml::from_str(s)?;
        Ok(table.device.into_iter().fold(Self::new(), Self::with_device))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Add or replace an entry.
    pub fn with_device(mut self, mut entry: DeviceEntry) -> Self {
        entry.id = DeviceId::new(&entry.id).0;
        self.devices.retain(|d| d.id != entry.id);
        self.devices.push(entry);
        self
    }

    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    fn entry(&self, id: &DeviceId) -> Result<&DeviceEntry, DiscoveryError> {
        self.devices
            .iter()
            .find(|d| d.id == id.0)
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
    }
}

impl Discovery for StaticDiscovery {
    fn find(&self, address: &str) -> Result<DeviceId, DiscoveryError> {
        let id = DeviceId::new(address);
        match self.entry(&id) {
            Ok(entry) if entry.discoverable => Ok(id),
            _ => Err(DiscoveryError::NotFound(address.to_string())),
        }
    }

    fn get_integer(&self, id: &DeviceId, key: &str) -> Result<i64, DiscoveryError> {
        let key = check_key(key, true)?;
        let entry = self.entry(id)?;
        Ok(match key.as_str() {
            "discoverable" => i64::from(entry.discoverable),
            "serverport" => i64::from(entry.serverport),
            _ => i64::from(entry.apilevel),
        })
    }

    fn get_string(&self, id: &DeviceId, key: &str) -> Result<String, DiscoveryError> {
        let key = check_key(key, false)?;
        let entry = self.entry(id)?;
        Ok(match key.as_str() {
            "serveraddress" => entry.serveraddress.clone(),
            "connected" => entry.connected.clone(),
            "interfaces" => entry.interfaces.join("\n"),
            _ => entry.devicetype.clone(),
        })
    }
}

/// Discovery over the servers of a [`SimNetwork`]
///
/// Properties are read live, so `connected` follows device connects.
#[derive(Debug, Clone)]
pub struct SimDiscovery {
    network: SimNetwork,
}

impl SimDiscovery {
    pub fn new(network: SimNetwork) -> Self {
        Self { network }
    }
}

impl Discovery for SimDiscovery {
    fn find(&self, address: &str) -> Result<DeviceId, DiscoveryError> {
        let id = DeviceId::new(address);
        self.network
            .find_device(id.as_str())
            .map(|_| id)
            .ok_or_else(|| DiscoveryError::NotFound(address.to_string()))
    }

    fn get_integer(&self, id: &DeviceId, key: &str) -> Result<i64, DiscoveryError> {
        let key = check_key(key, true)?;
        let (endpoint, _, device) = self
            .network
            .find_device(id.as_str())
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))?;
        Ok(match key.as_str() {
            "discoverable" => i64::from(device.discoverable),
            "serverport" => i64::from(endpoint.port),
            _ => i64::from(device.api_level),
        })
    }

    fn get_string(&self, id: &DeviceId, key: &str) -> Result<String, DiscoveryError> {
        let key = check_key(key, false)?;
        let (endpoint, server, device) = self
            .network
            .find_device(id.as_str())
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))?;
        Ok(match key.as_str() {
            "serveraddress" => endpoint.host,
            "connected" => server.connected_interface(id.as_str()).unwrap_or_default(),
            "interfaces" => device.interfaces.join("\n"),
            _ => device.family.devtype().to_string(),
        })
    }
}
