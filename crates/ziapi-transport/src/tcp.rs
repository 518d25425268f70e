//! TCP transport
//!
//! One TCP stream per session, split with `try_clone` into a reader (IO
//! thread) and a writer (caller thread). Frames use [`FrameCodec`].

use crate::{
    ClientMessage, Connector, Endpoint, RxTransport, ServerMessage, TransportDeviceError,
    TransportDeviceErrorKind, TransportError, TransportPair, TxTransport,
};
use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use ziapi_protocol::FrameCodec;

const READ_CHUNK: usize = 64 * 1024;

/// Smallest read timeout handed to the socket (zero means "block forever" there)
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Connector for TCP endpoints
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    codec: FrameCodec,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(codec: FrameCodec) -> Self {
        Self { codec }
    }
}

/// Resolve `endpoint` to socket addresses.
pub fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, TransportDeviceError> {
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| {
            TransportDeviceError::new(
                TransportDeviceErrorKind::HostnameUnresolved,
                format!("{}: {}", endpoint.host, e),
            )
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportDeviceError::new(
            TransportDeviceErrorKind::HostnameUnresolved,
            format!("{} resolved to no addresses", endpoint.host),
        ));
    }
    Ok(addrs)
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<TransportPair, TransportError> {
        let addrs = resolve(endpoint)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    debug!(%addr, "TCP session connected");
                    let (rx, tx) = split_stream(stream, self.codec)?;
                    return Ok(TransportPair {
                        rx: Box::new(rx),
                        tx: Box::new(tx),
                    });
                },
                Err(e) => {
                    trace!(%addr, error = %e, "TCP connect attempt failed");
                    last_err = Some(e);
                },
            }
        }

        let detail = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(TransportDeviceError::new(
            TransportDeviceErrorKind::SocketConnect,
            format!("{}: {}", endpoint, detail),
        )
        .into())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Split a connected stream into frame reader and writer.
pub fn split_stream(
    stream: TcpStream,
    codec: FrameCodec,
) -> Result<(FrameReader<TcpStream>, FrameWriter<TcpStream>), TransportError> {
    stream.set_nodelay(true).map_err(|e| {
        TransportDeviceError::new(TransportDeviceErrorKind::SocketInit, e.to_string())
    })?;
    let reader = stream.try_clone().map_err(|e| {
        TransportDeviceError::new(TransportDeviceErrorKind::SocketInit, e.to_string())
    })?;
    Ok((
        FrameReader::new(reader, codec),
        FrameWriter::new(stream, codec),
    ))
}

/// Streams that can bound a blocking read
pub trait TimedRead: Read + Send {
    fn set_read_deadline(&mut self, timeout: Duration) -> std::io::Result<()>;
}

impl TimedRead for TcpStream {
    fn set_read_deadline(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))
    }
}

/// Stream half that can be shut down from the writer
pub trait Closable: Write + Send {
    fn close(&mut self);
}

impl Closable for TcpStream {
    fn close(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

/// Decodes frames from a byte stream
pub struct FrameReader<S> {
    stream: S,
    codec: FrameCodec,
    buf: BytesMut,
    scratch: Box<[u8]>,
}

impl<S: TimedRead> FrameReader<S> {
    pub fn new(stream: S, codec: FrameCodec) -> Self {
        Self {
            stream,
            codec,
            buf: BytesMut::with_capacity(READ_CHUNK),
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Read the next message, waiting at most `timeout`.
    pub fn read_message<T: DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<T, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.codec.decode(&mut self.buf)? {
                return Ok(msg);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && timeout > Duration::ZERO {
                return Err(TransportError::Timeout);
            }
            self.stream.set_read_deadline(remaining)?;
            match self.stream.read(&mut self.scratch) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => self.buf.extend_from_slice(&self.scratch[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::Timeout);
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::BrokenPipe
                            | ErrorKind::NotConnected
                    ) =>
                {
                    return Err(TransportError::Closed);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<S: TimedRead> RxTransport for FrameReader<S> {
    fn receive(&mut self, timeout: Duration) -> Result<ServerMessage, TransportError> {
        self.read_message(timeout)
    }
}

/// Encodes frames onto a byte stream
pub struct FrameWriter<S> {
    stream: S,
    codec: FrameCodec,
    buf: BytesMut,
    closed: bool,
}

impl<S: Closable> FrameWriter<S> {
    pub fn new(stream: S, codec: FrameCodec) -> Self {
        Self {
            stream,
            codec,
            buf: BytesMut::new(),
            closed: false,
        }
    }

    pub fn write_message<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.buf.clear();
        self.codec.encode(msg, &mut self.buf)?;
        self.stream.write_all(&self.buf).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
                TransportError::Closed
            },
            _ => TransportError::Io(e),
        })?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stream.close();
        }
    }
}

impl<S: Closable> TxTransport for FrameWriter<S> {
    fn send(&mut self, msg: ClientMessage) -> Result<(), TransportError> {
        self.write_message(&msg)
    }

    fn shutdown(&mut self) {
        if !self.closed {
            let _ = self.write_message(&ClientMessage::Goodbye);
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_unresolvable_host() {
        let ep = Endpoint::new("no-such-host.invalid", 8004);
        let err = TcpConnector::new()
            .connect(&ep, Duration::from_millis(200))
            .unwrap_err();
        match err {
            TransportError::Device(e) => {
                assert_eq!(e.kind, TransportDeviceErrorKind::HostnameUnresolved)
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = TcpConnector::new()
            .connect(&Endpoint::new("127.0.0.1", port), Duration::from_millis(200))
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
    fn test_frames_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let (mut rx, mut tx) = split_stream(stream, FrameCodec::default()).unwrap();
            let msg: ClientMessage = rx.read_message(Duration::from_secs(2)).unwrap();
            assert_eq!(msg, ClientMessage::Goodbye);
            tx.write_message(&ServerMessage::Shutdown {
                reason: "bye".into(),
            })
            .unwrap();
        });

        let mut pair = TcpConnector::new()
            .connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(1))
            .unwrap();
        pair.tx.send(ClientMessage::Goodbye).unwrap();
        let reply = pair.rx.receive(Duration::from_secs(2)).unwrap();
        assert_eq!(
            reply,
            ServerMessage::Shutdown {
                reason: "bye".into()
            }
        );
        server.join().unwrap();
        assert!(matches!(
            pair.rx.receive(Duration::from_millis(500)),
            Err(TransportError::Closed) | Err(TransportError::Timeout)
        ));
    }
}
