//! Serve a [`SimServer`] over TCP
//!
//! One accept thread plus a reader and a writer thread per connection. The
//! reader feeds decoded client messages into the server; the writer drains
//! the session's outbound channel onto the socket.

use super::SimServer;
use crate::tcp::split_stream;
use crate::{ClientMessage, Endpoint, ServerMessage, TransportError};
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use ziapi_protocol::FrameCodec;

/// Poll interval of the accept loop and connection threads
const POLL: Duration = Duration::from_millis(50);

/// TCP front end of a simulated server
pub struct TcpHost {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TcpHost {
    /// Bind `addr` (port 0 picks a free port) and start accepting.
    pub fn bind(server: SimServer, addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept = {
            let running = running.clone();
            let connections = connections.clone();
            std::thread::Builder::new()
                .name("ziapi-sim-accept".into())
                .spawn(move || accept_loop(listener, server, running, connections))?
        };
        info!(%addr, "Simulated Data Server listening");
        Ok(Self {
            addr,
            running,
            accept: Some(accept),
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting and wait for every connection thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
        let handles: Vec<_> = self.connections.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for TcpHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    server: SimServer,
    running: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Connection accepted");
                match serve_connection(server.clone(), stream, running.clone()) {
                    Ok(mut handles) => {
                        let mut all = connections.lock();
                        all.retain(|h| !h.is_finished());
                        all.append(&mut handles);
                    },
                    Err(e) => warn!(%peer, "Failed to serve connection: {}", e),
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(POLL),
            Err(e) => {
                warn!("Accept failed: {}", e);
                std::thread::sleep(POLL);
            },
        }
    }
}

fn serve_connection(
    server: SimServer,
    stream: TcpStream,
    running: Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>, TransportError> {
    stream.set_nonblocking(false)?;
    let (mut reader, mut writer) = split_stream(stream, FrameCodec::default())?;
    let (session, outbound) = server.open_session();

    let writer_running = running.clone();
    let write = std::thread::Builder::new()
        .name(format!("ziapi-sim-tx-{session}"))
        .spawn(move || {
            loop {
                match outbound.recv_timeout(POLL) {
                    Ok(msg) => {
                        let last = matches!(msg, ServerMessage::Shutdown { .. });
                        if writer.write_message(&msg).is_err() || last {
                            break;
                        }
                    },
                    Err(RecvTimeoutError::Timeout) => {
                        if !writer_running.load(Ordering::Acquire) {
                            break;
                        }
                    },
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            writer.close();
        })?;

    let read = std::thread::Builder::new()
        .name(format!("ziapi-sim-rx-{session}"))
        .spawn(move || {
            loop {
                match reader.read_message::<ClientMessage>(POLL) {
                    Ok(ClientMessage::Goodbye) => break,
                    Ok(msg) => server.handle(session, msg),
                    Err(TransportError::Timeout) => {
                        if !running.load(Ordering::Acquire) || !server.is_running() {
                            break;
                        }
                    },
                    Err(e) => {
                        debug!(session, "Connection ended: {}", e);
                        break;
                    },
                }
            }
            server.close_session(session);
        })?;

    Ok(vec![read, write])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimDeviceConfig};
    use crate::{Connector, TcpConnector};
    use ziapi_protocol::*;

    #[test]
    fn test_request_over_tcp() {
        let server = SimServer::start(
            SimConfig::default()
                .manual()
                .with_device(SimDeviceConfig::mf("dev1").connected()),
        );
        let mut host = TcpHost::bind(server.clone(), "127.0.0.1:0").unwrap();
        let mut pair = TcpConnector::new()
            .connect(&host.endpoint(), Duration::from_secs(1))
            .unwrap();

        pair.tx
            .send(ClientMessage::Hello(Hello {
                api_level: ApiLevel::V6,
                implementation: DEFAULT_IMPLEMENTATION.into(),
                client_version: "test".into(),
            }))
            .unwrap();
        assert!(matches!(
            pair.rx.receive(Duration::from_secs(2)).unwrap(),
            ServerMessage::Welcome(_)
        ));

        pair.tx
            .send(ClientMessage::Request {
                id: 1,
                reply: ReplyMode::Sync,
                body: Request::Get {
                    path: NodePath::new("/dev1/clockbase").unwrap(),
                    expected: ValueType::Double,
                },
            })
            .unwrap();
        assert_eq!(
            pair.rx.receive(Duration::from_secs(2)).unwrap(),
            ServerMessage::Reply {
                id: 1,
                body: Reply::Value(Value::Double(60e6)),
            }
        );

        pair.tx.shutdown();
        host.stop();
        assert_eq!(server.session_count(), 0);
    }
}
