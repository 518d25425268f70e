//! Session bootstrap from a device address

use crate::discovery::{DeviceId, Discovery, DiscoveryError};
use std::sync::Arc;
use tracing::{debug, info};
use ziapi_driver::{ApiError, Connection, ConnectionBuilder, ConnectionErrorKind};
use ziapi_protocol::ApiLevel;
use ziapi_transport::Connector;

/// API level used with a device: the lower of what the caller and the
/// device support.
pub fn negotiate_api_level(max_api_level: ApiLevel, device_level: i64) -> Result<ApiLevel, ApiError> {
    let device = u8::try_from(device_level)
        .ok()
        .and_then(ApiLevel::clamp_from)
        .ok_or_else(|| {
            ApiError::connection(
                ConnectionErrorKind::ProtocolMismatch,
                format!("device reports unsupported API level {}", device_level),
            )
        })?;
    Ok(max_api_level.min(device))
}

/// Resolve `address`, open a session to its Data Server and make sure the
/// device is connected.
///
/// A device that is not connected yet is connected on its first interface.
pub fn create_api_session(
    discovery: &dyn Discovery,
    address: &str,
    max_api_level: ApiLevel,
    connector: Arc<dyn Connector>,
) -> Result<(Connection, DeviceId), DiscoveryError> {
    let id = discovery.find(address)?;
    let endpoint = discovery.endpoint(&id)?;
    let level = negotiate_api_level(max_api_level, discovery.get_integer(&id, "apilevel")?)?;
    debug!(device = %id, %endpoint, ?level, "Device resolved");

    let mut conn = ConnectionBuilder::new()
        .endpoint(endpoint)
        .connector(connector)
        .api_level(level)
        .open()?;

    if discovery.get_string(&id, "connected")?.is_empty() {
        let interfaces = discovery.get_string(&id, "interfaces")?;
        let interface = interfaces.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
        conn.connect_device(id.as_str(), interface, "")?;
        info!(device = %id, interface, "Device connected");
    }
    Ok((conn, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate_api_level(ApiLevel::V6, 4).unwrap(), ApiLevel::V4);
        assert_eq!(negotiate_api_level(ApiLevel::V1, 6).unwrap(), ApiLevel::V1);
        assert!(negotiate_api_level(ApiLevel::V6, -1).is_err());
    }
}
