//! Connection arguments shared by the commands that talk to a server

use crate::commands::config::CliConfig;
use anyhow::{Context, Result, bail};
use clap::Args;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use ziapi_sdk::prelude::*;

#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Data Server host (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Data Server port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Highest API level to request (overrides config)
    #[arg(long)]
    pub api_level: Option<u8>,
}

impl ServerArgs {
    pub fn endpoint(&self, config: &CliConfig) -> Endpoint {
        let host = self.host.clone().or_else(|| config.host.clone()).unwrap_or_else(|| "localhost".into());
        let port = self.port.or(config.port).unwrap_or(Endpoint::DEFAULT_PORT);
        Endpoint::new(host, port)
    }

    pub fn api_level(&self, config: &CliConfig) -> Result<ApiLevel> {
        let raw = self.api_level.or(config.api_level).unwrap_or(ApiLevel::MAX.into());
        match ApiLevel::try_from(raw) {
            Ok(level) => Ok(level),
            Err(_) => bail!("Unsupported API level {}", raw),
        }
    }

    pub fn connect(&self, config: &CliConfig) -> Result<Connection> {
        let endpoint = self.endpoint(config);
        let level = self.api_level(config)?;
        debug!(%endpoint, ?level, "Connecting");
        let conn = ConnectionBuilder::new()
            .endpoint(endpoint.clone())
            .api_level(level)
            .open()
            .with_context(|| format!("Connecting to {}", endpoint))?;
        Ok(conn)
    }
}

/// Device from the argument or the configured default.
pub fn device(arg: Option<String>, config: &CliConfig) -> Result<String> {
    arg.or_else(|| config.device.clone())
        .map(|d| d.to_ascii_lowercase())
        .context("No device given; pass --device or run `ziapi-cli config set --device ...`")
}

/// Flag cleared by Ctrl-C.
pub fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Installing Ctrl-C handler")?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_override_config() {
        let config = CliConfig {
            host: Some("10.0.0.5".into()),
            port: Some(8005),
            api_level: Some(4),
            ..Default::default()
        };
        let args = ServerArgs {
            port: Some(9000),
            ..Default::default()
        };
        assert_eq!(args.endpoint(&config), Endpoint::new("10.0.0.5", 9000));
        assert_eq!(args.api_level(&config).unwrap(), ApiLevel::V4);
        assert_eq!(ServerArgs::default().endpoint(&CliConfig::default()).port, Endpoint::DEFAULT_PORT);
        assert_eq!(ServerArgs::default().api_level(&CliConfig::default()).unwrap(), ApiLevel::V6);
    }

    #[test]
    fn test_device_fallback() {
        let config = CliConfig {
            device: Some("dev1234".into()),
            ..Default::default()
        };
        assert_eq!(device(Some("DEV9".into()), &config).unwrap(), "dev9");
        assert_eq!(device(None, &config).unwrap(), "dev1234");
        assert!(device(None, &CliConfig::default()).is_err());
    }
}
