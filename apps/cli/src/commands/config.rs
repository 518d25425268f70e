//! Configuration commands
//!
//! Defaults for the server connection, kept in `~/.config/ziapi/config.toml`.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use ziapi_sdk::protocol::ApiLevel;

fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?;
    path.push("ziapi");
    Ok(path)
}

pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default Data Server host
    pub host: Option<String>,

    /// Default Data Server port
    pub port: Option<u16>,

    /// Highest API level to request
    pub api_level: Option<u8>,

    /// Default device, e.g. `dev1234`
    pub device: Option<String>,

    /// Static discovery table used by `discover`
    pub discovery: Option<PathBuf>,
}

impl CliConfig {
    /// Load the user configuration; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Creating config directory")?;
        }
        let content = format!("# ziapi CLI configuration\n\n{}", toml::to_string_pretty(self)?);
        fs::write(path, content).with_context(|| format!("Writing {}", path.display()))
    }

    /// Value of `key` for display, `None` if unset.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match key {
            "host" => self.host.clone(),
            "port" => self.port.map(|p| p.to_string()),
            "api_level" => self.api_level.map(|l| l.to_string()),
            "device" => self.device.clone(),
            "discovery" => self.discovery.as_ref().map(|p| p.display().to_string()),
            _ => bail!("Unknown config key: {}", key),
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set defaults
    Set {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Highest API level to request (1, 4, 5 or 6)
        #[arg(long)]
        api_level: Option<u8>,

        #[arg(long)]
        device: Option<String>,

        /// Static discovery table (TOML)
        #[arg(long)]
        discovery: Option<PathBuf>,
    },

    /// Show the configuration, or a single key
    Show {
        key: Option<String>,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        let path = config_file()?;
        match self {
            ConfigCommand::Set {
                host,
                port,
                api_level,
                device,
                discovery,
            } => {
                let mut config = CliConfig::load_from(&path)?;
                apply(&mut config, host, port, api_level, device, discovery)?;
                config.save_to(&path)?;
                println!("Saved {}", path.display());
                Ok(())
            },
            ConfigCommand::Show { key } => {
                let config = CliConfig::load_from(&path)?;
                match key {
                    Some(key) => println!("{}", config.get(&key)?.unwrap_or_else(|| "(unset)".into())),
                    None => {
                        println!("Config file: {}", path.display());
                        for key in ["host", "port", "api_level", "device", "discovery"] {
                            println!("  {:<10} {}", key, config.get(key)?.unwrap_or_else(|| "(unset)".into()));
                        }
                    },
                }
                Ok(())
            },
        }
    }
}

fn apply(
    config: &mut CliConfig,
    host: Option<String>,
    port: Option<u16>,
    api_level: Option<u8>,
    device: Option<String>,
    discovery: Option<PathBuf>,
) -> Result<()> {
    if let Some(level) = api_level {
        if ApiLevel::try_from(level).is_err() {
            bail!("Unsupported API level {}", level);
        }
        config.api_level = Some(level);
    }
    if host.is_some() {
        config.host = host;
    }
    if port.is_some() {
        config.port = port;
    }
    if let Some(device) = device {
        config.device = Some(device.to_ascii_lowercase());
    }
    if discovery.is_some() {
        config.discovery = discovery;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ziapi").join("config.toml");
        let mut config = CliConfig::default();
        apply(&mut config, Some("10.0.0.5".into()), Some(8005), Some(4), Some("DEV800".into()), None).unwrap();
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.get("device").unwrap().as_deref(), Some("dev800"));
        assert_eq!(loaded.get("api_level").unwrap().as_deref(), Some("4"));
        assert!(loaded.get("colour").is_err());
    }

    #[test]
    fn test_rejects_unknown_api_level() {
        let mut config = CliConfig::default();
        assert!(apply(&mut config, None, None, Some(3), None, None).is_err());
        assert_eq!(config.api_level, None);
    }
}
