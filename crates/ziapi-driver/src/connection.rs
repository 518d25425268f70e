//! Session to a Data Server
//!
//! A [`Connection`] owns the sending half of the transport and the consumer
//! half of the event queue; the IO thread owns the receiving half. Every
//! operation takes `&mut self`: a connection belongs to one thread at a time.
//! Use [`Connection::close_handle`] to close it from elsewhere.

use crate::builder::ConnectionBuilder;
use crate::command::{SetMode, SetOutcome, Tag, Timeout};
use crate::config::ConnectionConfig;
use crate::error::{ApiError, ConnectionErrorKind, Outcome, Warning};
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::pipeline::{IoContext, rx_loop};
use crate::queue::{EventQueue, EventSource};
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::subscription::{self, SharedRegistry, SubscriptionRegistry};
use crate::thread::JoinTimeout;
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use ziapi_protocol::*;
use ziapi_transport::{Connector, Endpoint, RxTransport, TransportError, TxTransport};

/// Version of this client, sent in the handshake
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often `reset_to_default` polls the preset busy flag
const PRESET_POLL: Duration = Duration::from_millis(5);

/// What the server told us at handshake
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub session_id: u64,
    pub max_api_level: ApiLevel,
    pub server_version: String,
}

type SharedTx = Arc<Mutex<Box<dyn TxTransport>>>;

/// Closes a connection from another thread
///
/// An in-flight `poll` on the owning thread returns
/// [`ConnectionErrorKind::NotConnected`] shortly after.
#[derive(Clone)]
pub struct CloseHandle {
    state: Arc<AtomicConnectionState>,
    is_running: Arc<AtomicBool>,
    tx: SharedTx,
}

impl CloseHandle {
    /// Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        let first = self.state.close(Ordering::AcqRel);
        // Release: the IO thread sees the closed state once it sees `false`.
        self.is_running.store(false, Ordering::Release);
        let mut tx = self.tx.lock();
        if first {
            // Best effort, the server may be gone already.
            let _ = tx.send(ClientMessage::Goodbye);
        }
        tx.shutdown();
        first
    }

    pub fn is_closed(&self) -> bool {
        !self.state.get(Ordering::Acquire).is_connected()
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle")
            .field("state", &self.state.get(Ordering::Relaxed))
            .finish()
    }
}

/// Client session
pub struct Connection {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    api_level: ApiLevel,
    implementation: String,
    server: ServerInfo,
    tx: SharedTx,
    replies: Receiver<(RequestId, Reply)>,
    events: EventSource,
    registry: SharedRegistry,
    state: Arc<AtomicConnectionState>,
    is_running: Arc<AtomicBool>,
    io_thread: Option<JoinHandle<()>>,
    metrics: Arc<ConnectionMetrics>,
    next_id: RequestId,
    last_error: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("api_level", &self.api_level)
            .field("state", &self.state.get(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn handshake(
    rx: &mut dyn RxTransport,
    tx: &mut dyn TxTransport,
    hello: Hello,
    timeout: Duration,
) -> Result<Welcome, ApiError> {
    let level = hello.api_level;
    tx.send(ClientMessage::Hello(hello))?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ApiError::connection(
                ConnectionErrorKind::HandshakeTimeout,
                format!("no answer within {:?}", timeout),
            ));
        }
        match rx.receive(remaining) {
            Ok(ServerMessage::Welcome(welcome)) => {
                if welcome.max_api_level < level {
                    return Err(ApiError::connection(
                        ConnectionErrorKind::ProtocolMismatch,
                        format!(
                            "API level {} above server maximum {}",
                            level, welcome.max_api_level
                        ),
                    ));
                }
                return Ok(welcome);
            },
            Ok(ServerMessage::Rejected { code, reason }) => {
                let kind = match code {
                    ResultCode::TooManyConnections => ConnectionErrorKind::TooManyConnections,
                    _ => ConnectionErrorKind::ProtocolMismatch,
                };
                return Err(ApiError::connection(kind, reason));
            },
            Ok(other) => trace!(?other, "Ignoring message before handshake"),
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Closed) => {
                return Err(ApiError::connection(
                    ConnectionErrorKind::SocketConnectFailed,
                    "server closed the connection during handshake",
                ));
            },
            Err(e) => return Err(e.into()),
        }
    }
}

/// Major versions must agree; a minor difference is only logged.
fn check_server_version(server: &str) -> Result<(), ApiError> {
    let (Ok(server_v), Ok(client_v)) = (
        semver::Version::parse(server),
        semver::Version::parse(CLIENT_VERSION),
    ) else {
        warn!(server, client = CLIENT_VERSION, "Unparsable version, skipping compatibility check");
        return Ok(());
    };
    if server_v.major != client_v.major {
        return Err(ApiError::connection(
            ConnectionErrorKind::ProtocolMismatch,
            format!("server version {} incompatible with client {}", server_v, client_v),
        ));
    }
    if server_v.minor != client_v.minor {
        warn!(server = %server_v, client = %client_v, "Server and client minor versions differ");
    }
    Ok(())
}

fn unexpected(reply: Reply, operation: &str) -> ApiError {
    ApiError::Protocol(ProtocolError::UnexpectedReply(format!(
        "{}: {:?}",
        operation, reply
    )))
}

fn request_name(body: &Request) -> &'static str {
    match body {
        Request::Get { .. } => "get",
        Request::GetSample { .. } => "get_sample",
        Request::Set { .. } => "set",
        Request::Subscribe { .. } => "subscribe",
        Request::Unsubscribe { .. } => "unsubscribe",
        Request::ListNodes { .. } => "list_nodes",
        Request::RequestValue { .. } => "request_value",
        Request::ConnectDevice { .. } => "connect_device",
        Request::DisconnectDevice { .. } => "disconnect_device",
        Request::Sync => "sync",
        Request::EchoDevice { .. } => "echo_device",
        Request::VectorWrite { .. } => "vector_write",
    }
}

impl Connection {
    /// Open a session with default settings.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use ziapi_driver::Connection;
    /// use ziapi_protocol::ApiLevel;
    /// use ziapi_transport::{Endpoint, TcpConnector};
    ///
    /// let mut conn = Connection::open(
    ///     Endpoint::localhost(8004),
    ///     ApiLevel::V6,
    ///     Arc::new(TcpConnector::new()),
    /// )?;
    /// println!("server {}", conn.server_version()?);
    /// # Ok::<(), ziapi_driver::ApiError>(())
    /// ```
    pub fn open(
        endpoint: Endpoint,
        api_level: ApiLevel,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ApiError> {
        ConnectionBuilder::new()
            .endpoint(endpoint)
            .api_level(api_level)
            .connector(connector)
            .open()
    }

    pub(crate) fn establish(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        api_level: ApiLevel,
        implementation: String,
        config: ConnectionConfig,
    ) -> Result<Self, ApiError> {
        config
            .validate()
            .map_err(|e| ApiError::general(e.to_string()))?;

        debug!(%endpoint, backend = connector.name(), level = %api_level, "Opening session");
        let pair = connector.connect(&endpoint, config.connect_timeout())?;
        let (mut rx, mut tx) = (pair.rx, pair.tx);

        let hello = Hello {
            api_level,
            implementation: implementation.clone(),
            client_version: CLIENT_VERSION.to_string(),
        };
        let welcome = match handshake(rx.as_mut(), tx.as_mut(), hello, config.handshake_timeout())
            .and_then(|w| check_server_version(&w.server_version).map(|_| w))
        {
            Ok(welcome) => welcome,
            Err(e) => {
                tx.shutdown();
                return Err(e);
            },
        };

        let (sink, events) = EventQueue::bounded(config.queue_capacity, config.overflow_policy);
        let (reply_tx, replies) = crossbeam_channel::unbounded();
        let registry: SharedRegistry = Arc::new(ArcSwap::from_pointee(SubscriptionRegistry::new()));
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Connected));
        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(ConnectionMetrics::new());

        let ctx = IoContext {
            sink,
            replies: reply_tx,
            registry: registry.clone(),
            level: api_level,
            state: state.clone(),
            metrics: metrics.clone(),
        };
        let receive_timeout = config.receive_timeout();
        let running = is_running.clone();
        let io_thread = std::thread::Builder::new()
            .name(format!("ziapi-io-{}", welcome.session_id))
            .spawn(move || rx_loop(rx, ctx, receive_timeout, running));
        let io_thread = match io_thread {
            Ok(handle) => handle,
            Err(e) => {
                tx.shutdown();
                return Err(ApiError::Resource {
                    detail: format!("failed to spawn IO thread: {}", e),
                });
            },
        };

        info!(
            %endpoint,
            level = %api_level,
            server_version = %welcome.server_version,
            session = welcome.session_id,
            "Connected to Data Server"
        );
        Ok(Self {
            endpoint,
            connector,
            config,
            api_level,
            implementation,
            server: ServerInfo {
                session_id: welcome.session_id,
                max_api_level: welcome.max_api_level,
                server_version: welcome.server_version,
            },
            tx: Arc::new(Mutex::new(tx)),
            replies,
            events,
            registry,
            state,
            is_running,
            io_thread: Some(io_thread),
            metrics,
            next_id: 1,
            last_error: None,
        })
    }

    /// Builder for another session to the same server with the same settings.
    pub fn session_builder(&self) -> ConnectionBuilder {
        ConnectionBuilder::new()
            .endpoint(self.endpoint.clone())
            .connector(self.connector.clone())
            .api_level(self.api_level)
            .implementation(self.implementation.clone())
            .config(self.config.clone())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn api_level(&self) -> ApiLevel {
        self.api_level
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn is_connected(&self) -> bool {
        self.state.get(Ordering::Acquire).is_connected()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn subscriptions(&self) -> Vec<NodePath> {
        self.registry.load().paths().cloned().collect()
    }

    /// Display text of the most recent failed operation.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            state: self.state.clone(),
            is_running: self.is_running.clone(),
            tx: self.tx.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    /// Run `f` and remember the display text of its error.
    fn track<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let result = f(self);
        if let Err(e) = &result {
            debug!(endpoint = %self.endpoint, "Operation failed: {}", e);
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn ensure_connected(&self, operation: &str) -> Result<(), ApiError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ApiError::not_connected(operation))
        }
    }

    fn send(&mut self, reply: ReplyMode, body: Request) -> Result<RequestId, ApiError> {
        self.ensure_connected(request_name(&body))?;
        let id = self.next_id;
        self.next_id += 1;
        self.tx
            .lock()
            .send(ClientMessage::Request { id, reply, body })?;
        self.metrics.requests_sent.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Send `body` and wait for its reply.
    fn roundtrip(&mut self, body: Request) -> Result<Reply, ApiError> {
        let operation = request_name(&body);
        let path = body.path().map(|p| p.to_string());
        let id = self.send(ReplyMode::Sync, body)?;

        let deadline = Instant::now() + self.config.request_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok((rid, reply)) if rid == id => {
                    return match reply {
                        Reply::Error { code, message } => {
                            Err(ApiError::from_reply(code, message, path.as_deref()))
                        },
                        other => Ok(other),
                    };
                },
                Ok((rid, _)) => {
                    // Answer to a request that already timed out.
                    self.metrics.stale_replies.fetch_add(1, Ordering::Relaxed);
                    trace!(rid, expected = id, "Discarding stale reply");
                },
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ApiError::Timeout {
                        operation: format!("{} {}", operation, path.unwrap_or_default()),
                    });
                },
                Err(RecvTimeoutError::Disconnected) => return Err(ApiError::not_connected(operation)),
            }
        }
    }

    fn expect_ack(&mut self, body: Request) -> Result<(), ApiError> {
        let operation = request_name(&body);
        match self.roundtrip(body)? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(other, operation)),
        }
    }

    // ------------------------------------------------------------------
    // Get
    // ------------------------------------------------------------------

    /// Current value of `path` as `ty`.
    ///
    /// For a wildcard path the server answers with one of the matches; which
    /// one is unspecified.
    pub fn get(&mut self, path: &str, ty: ValueType) -> Result<Value, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            match c.roundtrip(Request::Get { path, expected: ty })? {
                Reply::Value(v) => Ok(v.coerce(ty)?),
                other => Err(unexpected(other, "get")),
            }
        })
    }

    pub fn get_double(&mut self, path: &str) -> Result<f64, ApiError> {
        let value = self.get(path, ValueType::Double)?;
        self.track(|_| value_as(value, ValueType::Double, Value::as_f64))
    }

    pub fn get_integer(&mut self, path: &str) -> Result<i64, ApiError> {
        let value = self.get(path, ValueType::Integer)?;
        self.track(|_| value_as(value, ValueType::Integer, Value::as_i64))
    }

    pub fn get_string(&mut self, path: &str) -> Result<String, ApiError> {
        let value = self.get(path, ValueType::String)?;
        self.track(|_| value_as(value, ValueType::String, |v| v.as_str().map(str::to_string)))
    }

    pub fn get_bytes(&mut self, path: &str) -> Result<Vec<u8>, ApiError> {
        let value = self.get(path, ValueType::Bytes)?;
        self.track(|_| value_as(value, ValueType::Bytes, |v| v.as_bytes().map(<[u8]>::to_vec)))
    }

    /// Complex value as `(real, imag)`.
    pub fn get_complex(&mut self, path: &str) -> Result<(f64, f64), ApiError> {
        let value = self.get(path, ValueType::Complex)?;
        self.track(|_| {
            value_as(value, ValueType::Complex, |v| match v {
                Value::Complex { real, imag } => Some((*real, *imag)),
                _ => None,
            })
        })
    }

    /// Latest streamed sample of a streaming node.
    pub fn get_sample(&mut self, path: &str) -> Result<Payload, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            match c.roundtrip(Request::GetSample { path })? {
                Reply::Sample(payload) => Ok(payload),
                other => Err(unexpected(other, "get_sample")),
            }
        })
    }

    pub fn get_demod_sample(&mut self, path: &str) -> Result<DemodSample, ApiError> {
        let payload = self.get_sample(path)?;
        self.track(|_| last_of(&payload, Payload::as_demod, path))
    }

    pub fn get_dio_sample(&mut self, path: &str) -> Result<DioSample, ApiError> {
        let payload = self.get_sample(path)?;
        self.track(|_| last_of(&payload, Payload::as_dio, path))
    }

    pub fn get_auxin_sample(&mut self, path: &str) -> Result<AuxInSample, ApiError> {
        let payload = self.get_sample(path)?;
        self.track(|_| last_of(&payload, Payload::as_auxin, path))
    }

    /// Clock base of `device`, read from `/<device>/clockbase`.
    pub fn clockbase(&mut self, device: &str) -> Result<ClockBase, ApiError> {
        let rate = self.get_double(&format!("/{}/clockbase", device))?;
        self.track(|_| {
            ClockBase::new(rate)
                .ok_or_else(|| ApiError::general(format!("{}: invalid clock base {}", device, rate)))
        })
    }

    // ------------------------------------------------------------------
    // Set
    // ------------------------------------------------------------------

    /// Write `value` to `path`.
    ///
    /// With [`SetMode::Sync`] the call waits for the server and returns the
    /// effective (possibly clamped) value.
    pub fn set(&mut self, path: &str, value: Value, mode: SetMode) -> Result<SetOutcome, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            let body = Request::Set {
                path,
                value: value.clone(),
            };
            match mode {
                SetMode::Async => {
                    c.send(ReplyMode::None, body)?;
                    Ok(SetOutcome::Accepted)
                },
                SetMode::Sync => match c.roundtrip(body)? {
                    Reply::Effective(v) | Reply::Value(v) => Ok(SetOutcome::Effective(v)),
                    Reply::Ack => Ok(SetOutcome::Effective(value)),
                    other => Err(unexpected(other, "set")),
                },
            }
        })
    }

    pub fn set_double(&mut self, path: &str, value: f64) -> Result<(), ApiError> {
        self.set(path, Value::Double(value), SetMode::Async).map(|_| ())
    }

    pub fn set_integer(&mut self, path: &str, value: i64) -> Result<(), ApiError> {
        self.set(path, Value::Integer(value), SetMode::Async).map(|_| ())
    }

    pub fn set_string(&mut self, path: &str, value: &str) -> Result<(), ApiError> {
        self.set(path, Value::String(value.to_string()), SetMode::Async)
            .map(|_| ())
    }

    pub fn set_bytes(&mut self, path: &str, value: &[u8]) -> Result<(), ApiError> {
        self.set(path, Value::Bytes(value.to_vec()), SetMode::Async)
            .map(|_| ())
    }

    fn sync_set(&mut self, path: &str, value: Value) -> Result<Value, ApiError> {
        match self.set(path, value.clone(), SetMode::Sync)? {
            SetOutcome::Effective(v) => Ok(v),
            SetOutcome::Accepted => Ok(value),
        }
    }

    /// Set and return the effective value.
    pub fn sync_set_double(&mut self, path: &str, value: f64) -> Result<f64, ApiError> {
        let effective = self.sync_set(path, Value::Double(value))?;
        self.track(|_| value_as(effective, ValueType::Double, Value::as_f64))
    }

    pub fn sync_set_integer(&mut self, path: &str, value: i64) -> Result<i64, ApiError> {
        let effective = self.sync_set(path, Value::Integer(value))?;
        self.track(|_| value_as(effective, ValueType::Integer, Value::as_i64))
    }

    pub fn sync_set_string(&mut self, path: &str, value: &str) -> Result<String, ApiError> {
        let effective = self.sync_set(path, Value::String(value.to_string()))?;
        self.track(|_| {
            value_as(effective, ValueType::String, |v| v.as_str().map(str::to_string))
        })
    }

    // ------------------------------------------------------------------
    // Subscriptions and the event queue
    // ------------------------------------------------------------------

    /// Route pushed events on `path` (and below) into the queue.
    ///
    /// Subscribing twice is harmless.
    pub fn subscribe(&mut self, path: &str) -> Result<(), ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.ensure_connected("subscribe")?;
            // Registry first so no event is filtered between ack and update.
            let before = c.registry.load_full();
            subscription::update(&c.registry, |r| r.add(path.clone()));
            let result = c.expect_ack(Request::Subscribe { path });
            if result.is_err() {
                c.registry.store(before);
            }
            result
        })
    }

    /// Stop routing `path` and everything below it.
    ///
    /// Events already queued stay queued; unsubscribing an unknown path
    /// succeeds.
    pub fn unsubscribe(&mut self, path: &str) -> Result<(), ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.ensure_connected("unsubscribe")?;
            let before = c.registry.load_full();
            subscription::update(&c.registry, |r| r.remove(&path));
            let result = c.expect_ack(Request::Unsubscribe { path });
            if result.is_err() {
                c.registry.store(before);
            }
            result
        })
    }

    /// Next queued event.
    ///
    /// `Ok(None)` when nothing arrived within `timeout`. The first event after
    /// an overflow carries [`Warning::Overflow`].
    pub fn poll(&mut self, timeout: Timeout) -> Result<Outcome<Option<Event>>, ApiError> {
        self.track(|c| {
            c.ensure_connected("poll")?;
            match c.events.pop(timeout) {
                Ok(Some(event)) => {
                    let warning = c
                        .events
                        .take_overflow()
                        .map(|dropped| Warning::Overflow { dropped });
                    Ok(Outcome {
                        value: Some(event),
                        warning,
                    })
                },
                Ok(None) => Ok(Outcome::ok(None)),
                Err(_) => Err(ApiError::not_connected("poll")),
            }
        })
    }

    /// [`Connection::poll`] with the integer timeout convention
    /// (negative blocks, zero returns immediately).
    pub fn poll_ms(&mut self, timeout_ms: i64) -> Result<Outcome<Option<Event>>, ApiError> {
        self.poll(Timeout::from_ms(timeout_ms))
    }

    /// Events currently queued.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Push the current value(s) of `path` into the event queue.
    ///
    /// The events bypass subscription routing and are queued before this
    /// returns.
    pub fn request_value(&mut self, path: &str) -> Result<(), ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.expect_ack(Request::RequestValue { path })
        })
    }

    /// Alias of [`Connection::request_value`].
    pub fn get_value_as_poll_data(&mut self, path: &str) -> Result<(), ApiError> {
        self.request_value(path)
    }

    // ------------------------------------------------------------------
    // Node listing
    // ------------------------------------------------------------------

    /// Absolute paths of the nodes selected by `pattern` and `flags`, sorted.
    pub fn list_nodes(
        &mut self,
        pattern: &str,
        flags: ListNodesFlags,
    ) -> Result<Outcome<Vec<NodePath>>, ApiError> {
        self.track(|c| {
            let pattern = NodePath::new(pattern)?;
            match c.roundtrip(Request::ListNodes { pattern, flags })? {
                Reply::Nodes(mut nodes) => {
                    nodes.sort();
                    nodes.dedup();
                    if nodes.is_empty() {
                        Ok(Outcome::warn(nodes, Warning::NotFound))
                    } else {
                        Ok(Outcome::ok(nodes))
                    }
                },
                other => Err(unexpected(other, "list_nodes")),
            }
        })
    }

    /// Like [`Connection::list_nodes`], rendered as text.
    ///
    /// Without [`ListNodesFlags::ABSOLUTE`] names are relative to the
    /// pattern's non-wildcard prefix.
    pub fn list_node_names(
        &mut self,
        pattern: &str,
        flags: ListNodesFlags,
    ) -> Result<Outcome<Vec<String>>, ApiError> {
        let base = NodePath::new(pattern).map(|p| p.concrete_prefix());
        let listed = self.list_nodes(pattern, flags)?;
        let base = self.track(|_| Ok(base?))?;
        Ok(listed.map(|nodes| {
            nodes
                .into_iter()
                .map(|p| {
                    if flags.contains(ListNodesFlags::ABSOLUTE) {
                        p.to_string()
                    } else {
                        p.relative_to(&base).unwrap_or_else(|| p.to_string())
                    }
                })
                .collect()
        }))
    }

    // ------------------------------------------------------------------
    // Async command layer
    // ------------------------------------------------------------------

    /// Send `body` with a tagged reply.
    ///
    /// Below API level 4 there is no async layer: the request runs
    /// synchronously and the outcome carries [`Warning::NoAsync`].
    fn send_tagged(&mut self, body: Request, tag: Tag) -> Result<Outcome<()>, ApiError> {
        if !self.api_level.supports_async() {
            self.roundtrip(body)?;
            return Ok(Outcome::warn((), Warning::NoAsync));
        }
        self.send(ReplyMode::Tagged(tag), body)?;
        Ok(Outcome::ok(()))
    }

    fn set_async(&mut self, path: &str, value: Value, tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.send_tagged(Request::Set { path, value }, tag)
        })
    }

    /// Async set; the server answers with an `AsyncReply` event carrying `tag`.
    pub fn set_double_async(&mut self, path: &str, value: f64, tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.set_async(path, Value::Double(value), tag)
    }

    pub fn set_integer_async(&mut self, path: &str, value: i64, tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.set_async(path, Value::Integer(value), tag)
    }

    pub fn set_bytes_async(&mut self, path: &str, value: &[u8], tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.set_async(path, Value::Bytes(value.to_vec()), tag)
    }

    pub fn subscribe_async(&mut self, path: &str, tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.ensure_connected("subscribe")?;
            subscription::update(&c.registry, |r| r.add(path.clone()));
            c.send_tagged(Request::Subscribe { path }, tag)
        })
    }

    pub fn unsubscribe_async(&mut self, path: &str, tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.ensure_connected("unsubscribe")?;
            subscription::update(&c.registry, |r| r.remove(&path));
            c.send_tagged(Request::Unsubscribe { path }, tag)
        })
    }

    /// Queue the current value of `path`, followed by an `AsyncReply` with `tag`.
    pub fn get_as_event(&mut self, path: &str, tag: Tag) -> Result<Outcome<()>, ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.send_tagged(Request::RequestValue { path }, tag)
        })
    }

    // ------------------------------------------------------------------
    // Devices and server
    // ------------------------------------------------------------------

    /// Attach `serial` to the server; an empty `interface` picks the first one.
    pub fn connect_device(&mut self, serial: &str, interface: &str, params: &str) -> Result<(), ApiError> {
        self.track(|c| {
            c.expect_ack(Request::ConnectDevice {
                serial: serial.to_string(),
                interface: interface.to_string(),
                params: params.to_string(),
            })
        })
    }

    pub fn disconnect_device(&mut self, serial: &str) -> Result<(), ApiError> {
        self.track(|c| {
            c.expect_ack(Request::DisconnectDevice {
                serial: serial.to_string(),
            })
        })
    }

    /// Barrier: returns once every earlier request has been applied.
    pub fn sync(&mut self) -> Result<(), ApiError> {
        self.track(|c| c.expect_ack(Request::Sync))
    }

    pub fn echo_device(&mut self, serial: &str) -> Result<(), ApiError> {
        self.track(|c| {
            c.expect_ack(Request::EchoDevice {
                serial: serial.to_string(),
            })
        })
    }

    pub fn vector_write(&mut self, path: &str, data: VectorElements) -> Result<(), ApiError> {
        self.track(|c| {
            let path = NodePath::new(path)?;
            c.expect_ack(Request::VectorWrite { path, data })
        })
    }

    /// Version string published by the server at `/zi/about/version`.
    pub fn server_version(&mut self) -> Result<String, ApiError> {
        self.get_string("/zi/about/version")
    }

    /// Device type, e.g. `MFLI`.
    pub fn device_family(&mut self, device: &str) -> Result<String, ApiError> {
        self.get_string(&format!("/{}/features/devtype", device))
    }

    pub fn has_option(&mut self, device: &str, option: &str) -> Result<bool, ApiError> {
        let options = self.get_string(&format!("/{}/features/options", device))?;
        Ok(options
            .split_whitespace()
            .any(|o| o.eq_ignore_ascii_case(option)))
    }

    /// Load the factory preset of `device` and wait until it is applied.
    pub fn reset_to_default(&mut self, device: &str) -> Result<(), ApiError> {
        self.sync_set_integer(&format!("/{}/system/preset/index", device), 0)?;
        self.sync_set_integer(&format!("/{}/system/preset/load", device), 1)?;

        let busy = format!("/{}/system/preset/busy", device);
        let deadline = Instant::now() + self.config.request_timeout();
        let sleeper = spin_sleep::SpinSleeper::default();
        while self.get_integer(&busy)? != 0 {
            if Instant::now() >= deadline {
                return self.track(|_| {
                    Err(ApiError::Timeout {
                        operation: format!("reset_to_default {}", device),
                    })
                });
            }
            sleeper.sleep(PRESET_POLL);
        }
        info!(device, "Device reset to default settings");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close the session. Idempotent; also run on drop.
    pub fn close(&mut self) {
        if self.close_handle().close() {
            debug!(endpoint = %self.endpoint, "Closing session");
        }
        if let Some(handle) = self.io_thread.take()
            && let Err(_e) = handle.join_timeout(self.config.join_timeout())
        {
            error!("IO thread failed to shut down within {:?}", self.config.join_timeout());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn value_as<T>(value: Value, ty: ValueType, f: impl FnOnce(&Value) -> Option<T>) -> Result<T, ApiError> {
    f(&value).ok_or_else(|| {
        ApiError::Protocol(ProtocolError::TypeMismatch {
            expected: ty,
            actual: value.value_type(),
        })
    })
}

fn last_of<T: Clone>(
    payload: &Payload,
    accessor: impl FnOnce(&Payload) -> Option<&[T]>,
    path: &str,
) -> Result<T, ApiError> {
    match accessor(payload) {
        Some(samples) => samples.last().cloned().ok_or_else(|| ApiError::NotFound {
            path: path.to_string(),
        }),
        None => Err(ApiError::Protocol(ProtocolError::UnexpectedReply(format!(
            "{} carries {:?}",
            path,
            payload.kind()
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ziapi_transport::{SimConfig, SimDeviceConfig, SimNetwork, SimServer};

    fn setup(level: ApiLevel) -> (SimServer, Connection) {
        let network = SimNetwork::new();
        let server = SimServer::start(
            SimConfig::default()
                .manual()
                .with_device(SimDeviceConfig::mf("dev1").connected()),
        );
        network.register(Endpoint::localhost(8004), server.clone());
        let conn = Connection::open(
            Endpoint::localhost(8004),
            level,
            Arc::new(network.connector()),
        )
        .unwrap();
        (server, conn)
    }

    #[test]
    fn test_typed_getters() {
        let (_server, mut conn) = setup(ApiLevel::V6);
        assert_eq!(conn.get_double("/dev1/clockbase").unwrap(), 60e6);
        assert_eq!(conn.clockbase("dev1").unwrap().ticks_per_second(), 60e6);
        assert_eq!(conn.device_family("dev1").unwrap(), "MFLI");
        assert!(conn.has_option("dev1", "pid").unwrap());
        assert!(!conn.has_option("dev1", "MD").unwrap());
        assert_eq!(conn.server_version().unwrap(), CLIENT_VERSION);
    }

    #[test]
    fn test_errors_are_recorded() {
        let (_server, mut conn) = setup(ApiLevel::V6);
        assert!(conn.last_error().is_none());

        let err = conn.get_double("/dev1/nope").unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert!(conn.last_error().unwrap().contains("/dev1/nope"));

        let err = conn.set_double("bad path!", 1.0).unwrap_err();
        assert!(matches!(err, ApiError::Protocol(ProtocolError::MalformedCommand(_))));

        let err = conn.get_double("/dev1/features/devtype").unwrap_err();
        assert_eq!(err.code(), ResultCode::DataTypeMismatch);

        conn.clear_last_error();
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_read_only_node() {
        let (_server, mut conn) = setup(ApiLevel::V6);
        let err = conn
            .set("/dev1/clockbase", Value::Double(1.0), SetMode::Sync)
            .unwrap_err();
        assert!(matches!(err, ApiError::ReadOnly { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (server, mut conn) = setup(ApiLevel::V6);
        assert_eq!(server.session_count(), 1);
        conn.close();
        conn.close();
        assert!(!conn.is_connected());
        assert_eq!(server.session_count(), 0);
        assert!(matches!(
            conn.get_double("/dev1/clockbase"),
            Err(ApiError::Connection {
                kind: ConnectionErrorKind::NotConnected,
                ..
            })
        ));
    }

    #[test]
    fn test_version_check() {
        assert!(check_server_version(CLIENT_VERSION).is_ok());
        assert!(check_server_version("not a version").is_ok());
        let client = semver::Version::parse(CLIENT_VERSION).unwrap();
        let other_major = format!("{}.0.0", client.major + 1);
        assert!(matches!(
            check_server_version(&other_major),
            Err(ApiError::Connection {
                kind: ConnectionErrorKind::ProtocolMismatch,
                ..
            })
        ));
    }
}
