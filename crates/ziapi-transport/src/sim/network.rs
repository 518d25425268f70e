//! In-process loopback network of simulated servers

use super::{SessionId, SimDeviceConfig, SimServer};
use crate::{
    ClientMessage, Connector, Endpoint, RxTransport, ServerMessage, TransportDeviceError,
    TransportDeviceErrorKind, TransportError, TransportPair, TxTransport,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Registry of simulated servers by endpoint
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    servers: Arc<RwLock<BTreeMap<Endpoint, SimServer>>>,
}

fn normalize(endpoint: &Endpoint) -> Endpoint {
    let host = endpoint.host.trim().to_ascii_lowercase();
    let host = if host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        host
    };
    Endpoint::new(host, endpoint.port)
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `server` reachable at `endpoint`, replacing any previous one.
    pub fn register(&self, endpoint: Endpoint, server: SimServer) {
        let endpoint = normalize(&endpoint);
        debug!(%endpoint, "Simulated server registered");
        self.servers.write().insert(endpoint, server);
    }

    pub fn unregister(&self, endpoint: &Endpoint) -> Option<SimServer> {
        self.servers.write().remove(&normalize(endpoint))
    }

    pub fn lookup(&self, endpoint: &Endpoint) -> Option<SimServer> {
        self.servers.read().get(&normalize(endpoint)).cloned()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.servers.read().keys().cloned().collect()
    }

    /// Server hosting the discoverable device `serial`.
    pub fn find_device(&self, serial: &str) -> Option<(Endpoint, SimServer, SimDeviceConfig)> {
        let servers = self.servers.read();
        servers.iter().find_map(|(endpoint, server)| {
            server
                .device(serial)
                .filter(|d| d.discoverable)
                .map(|d| (endpoint.clone(), server.clone(), d))
        })
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            network: self.clone(),
        }
    }
}

/// Connector for endpoints of a [`SimNetwork`]
#[derive(Debug, Clone)]
pub struct SimConnector {
    network: SimNetwork,
}

impl SimConnector {
    pub fn new(network: SimNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }
}

impl Connector for SimConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<TransportPair, TransportError> {
        let Some(server) = self.network.lookup(endpoint) else {
            let target = normalize(endpoint);
            let host_known = self
                .network
                .endpoints()
                .iter()
                .any(|e| e.host == target.host);
            let kind = if host_known {
                TransportDeviceErrorKind::SocketConnect
            } else {
                TransportDeviceErrorKind::HostnameUnresolved
            };
            return Err(TransportDeviceError::new(kind, format!("{}: no server", endpoint)).into());
        };
        if !server.is_running() {
            return Err(TransportDeviceError::new(
                TransportDeviceErrorKind::Refused,
                format!("{}: server stopped", endpoint),
            )
            .into());
        }

        let (session, rx) = server.open_session();
        debug!(%endpoint, session, "Loopback session opened");
        Ok(TransportPair {
            rx: Box::new(SimRx { rx }),
            tx: Box::new(SimTx {
                server,
                session,
                closed: false,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

/// Receiving half of a loopback session
pub struct SimRx {
    rx: Receiver<ServerMessage>,
}

impl RxTransport for SimRx {
    fn receive(&mut self, timeout: Duration) -> Result<ServerMessage, TransportError> {
        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(msg) => Ok(msg),
                Err(TryRecvError::Empty) => Err(TransportError::Timeout),
                Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
            };
        }
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

/// Sending half of a loopback session
pub struct SimTx {
    server: SimServer,
    session: SessionId,
    closed: bool,
}

impl TxTransport for SimTx {
    fn send(&mut self, msg: ClientMessage) -> Result<(), TransportError> {
        if self.closed || !self.server.is_running() {
            return Err(TransportError::Closed);
        }
        if msg == ClientMessage::Goodbye {
            self.closed = true;
        }
        self.server.handle(self.session, msg);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.server.close_session(self.session);
        }
    }
}

impl Drop for SimTx {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimConfig;
    use ziapi_protocol::{ApiLevel, DEFAULT_IMPLEMENTATION, Hello};

    fn network() -> SimNetwork {
        let net = SimNetwork::new();
        net.register(
            Endpoint::new("127.0.0.1", 8004),
            SimServer::start(
                SimConfig::default()
                    .manual()
                    .with_device(SimDeviceConfig::mf("dev1234").with_api_level(4)),
            ),
        );
        net
    }

    #[test]
    fn test_localhost_alias_and_find_device() {
        let net = network();
        assert!(net.lookup(&Endpoint::localhost(8004)).is_some());
        let (ep, _, dev) = net.find_device("DEV1234").unwrap();
        assert_eq!(ep, Endpoint::new("127.0.0.1", 8004));
        assert_eq!(dev.api_level, 4);
        assert!(net.find_device("dev9999").is_none());
    }

    #[test]
    fn test_connect_errors() {
        let connector = network().connector();
        let err = connector
            .connect(&Endpoint::new("10.0.0.1", 8004), Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Device(TransportDeviceError {
                kind: TransportDeviceErrorKind::HostnameUnresolved,
                ..
            })
        ));
        let err = connector
            .connect(&Endpoint::localhost(8005), Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Device(TransportDeviceError {
                kind: TransportDeviceErrorKind::SocketConnect,
                ..
            })
        ));
    }

    #[test]
    fn test_session_lifecycle() {
        let net = network();
        let server = net.lookup(&Endpoint::localhost(8004)).unwrap();
        let mut pair = net
            .connector()
            .connect(&Endpoint::localhost(8004), Duration::from_millis(10))
            .unwrap();
        assert!(matches!(
            pair.rx.receive(Duration::ZERO),
            Err(TransportError::Timeout)
        ));
        pair.tx
            .send(ClientMessage::Hello(Hello {
                api_level: ApiLevel::V6,
                implementation: DEFAULT_IMPLEMENTATION.into(),
                client_version: "test".into(),
            }))
            .unwrap();
        assert!(matches!(
            pair.rx.receive(Duration::from_secs(1)).unwrap(),
            ServerMessage::Welcome(_)
        ));
        assert_eq!(server.session_count(), 1);

        pair.tx.shutdown();
        assert_eq!(server.session_count(), 0);
        assert!(matches!(
            pair.rx.receive(Duration::from_millis(10)),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            pair.tx.send(ClientMessage::Goodbye),
            Err(TransportError::Closed)
        ));
    }
}
