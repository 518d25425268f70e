//! Simulated Data Server
//!
//! A multi-session Data Server backed by an in-memory node tree. It speaks
//! the same [`ClientMessage`]/[`ServerMessage`] protocol as a real server and
//! is reachable in-process through [`SimNetwork`]/[`SimConnector`] or over
//! TCP through [`TcpHost`].
//!
//! A generator thread produces samples for every connected device once per
//! [`SimConfig::tick`]; with a zero tick the owner drives it with
//! [`SimServer::step`].

pub mod device;
pub mod host;
pub mod network;
pub mod stream;
pub mod tree;

pub use device::{DeviceFamily, SimDeviceConfig};
pub use host::TcpHost;
pub use network::{SimConnector, SimNetwork};
pub use stream::SignalModel;

use crate::{ClientMessage, ServerMessage};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use stream::{DeviceStreams, ScopeTiming};
use tracing::{debug, info, trace, warn};
use tree::{NodeTree, NodeValue};
use ziapi_protocol::*;

/// Session identifier, unique per server
pub type SessionId = u64;

/// Clock base used for `/zi` node timestamps
const SERVER_CLOCKBASE: f64 = 60e6;

/// Simulated server configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Reported through `/zi/about/version` and the handshake
    pub server_version: String,
    pub max_api_level: ApiLevel,
    /// Sessions accepted before `TooManyConnections`
    pub max_connections: usize,
    /// Generator period; zero disables the generator thread
    pub tick: Duration,
    pub scope_block_size: usize,
    pub scope_interval_ticks: u64,
    /// Reported through `/zi/config/port`
    pub port: u16,
    pub devices: Vec<SimDeviceConfig>,
    /// Accepted implementation names
    pub implementations: Vec<String>,
    /// Fixed RNG seed for reproducible noise
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            max_api_level: ApiLevel::MAX,
            max_connections: 64,
            tick: Duration::from_millis(10),
            scope_block_size: 1024,
            scope_interval_ticks: 20,
            port: 8004,
            devices: Vec::new(),
            implementations: vec![DEFAULT_IMPLEMENTATION.to_string()],
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn with_device(mut self, device: SimDeviceConfig) -> Self {
        self.devices.push(device);
        self
    }

    /// Manual stepping through [`SimServer::step`].
    pub fn manual(mut self) -> Self {
        self.tick = Duration::ZERO;
        self
    }
}

struct Session {
    tx: Sender<ServerMessage>,
    /// Set once the handshake completed
    level: Option<ApiLevel>,
    subscriptions: SubscriptionSet,
}

impl Session {
    fn send(&self, msg: ServerMessage) {
        // Receiver gone: the session is being torn down.
        let _ = self.tx.send(msg);
    }

    fn wants(&self, path: &NodePath) -> bool {
        self.subscriptions.is_routed(path)
    }

    /// Route an unsolicited event, adapted to the session's level.
    fn deliver(&self, event: &Event) {
        let Some(level) = self.level else {
            return;
        };
        if !self.wants(&event.path) {
            return;
        }
        if let Some(event) = stream::adapt_for_level(event.clone(), level) {
            self.send(ServerMessage::Event {
                event,
                solicited: false,
            });
        }
    }

    fn deliver_solicited(&self, event: Event) {
        let Some(level) = self.level else {
            return;
        };
        if let Some(event) = stream::adapt_for_level(event, level) {
            self.send(ServerMessage::Event {
                event,
                solicited: true,
            });
        }
    }
}

struct DeviceSlot {
    config: SimDeviceConfig,
    connected: Option<String>,
    streams: DeviceStreams,
}

struct ServerState {
    tree: NodeTree,
    devices: BTreeMap<String, DeviceSlot>,
    sessions: HashMap<SessionId, Session>,
    rng: StdRng,
}

struct Inner {
    config: SimConfig,
    state: Mutex<ServerState>,
    next_session: AtomicU64,
    started: Instant,
    running: AtomicBool,
    /// Requests on this prefix are swallowed without a reply
    stalled: ArcSwapOption<NodePath>,
    model: ArcSwap<SignalModel>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Failure of a single request
type RequestFailure = (ResultCode, String);

fn fail<T>(code: ResultCode, message: impl Into<String>) -> Result<T, RequestFailure> {
    Err((code, message.into()))
}

/// Handle to a simulated Data Server (cheap to clone)
#[derive(Clone)]
pub struct SimServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimServer")
            .field("version", &self.inner.config.server_version)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl SimServer {
    /// Start a server; connected devices are populated immediately.
    pub fn start(config: SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut state = ServerState {
            tree: NodeTree::new(),
            devices: BTreeMap::new(),
            sessions: HashMap::new(),
            rng,
        };
        populate_server_nodes(&config, &mut state.tree);
        for dev in &config.devices {
            let mut slot = DeviceSlot {
                config: dev.clone(),
                connected: None,
                streams: DeviceStreams::new(),
            };
            if let Some(interface) = &dev.connected {
                device::populate(dev, &mut state.tree);
                slot.connected = Some(interface.clone());
            }
            state.devices.insert(dev.serial.clone(), slot);
        }
        refresh_device_lists(&mut state);

        let tick = config.tick;
        let server = Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                next_session: AtomicU64::new(1),
                started: Instant::now(),
                running: AtomicBool::new(true),
                stalled: ArcSwapOption::empty(),
                model: ArcSwap::from_pointee(SignalModel::default()),
                ticker: Mutex::new(None),
            }),
        };

        if !tick.is_zero() {
            let weak = Arc::downgrade(&server.inner);
            let handle = std::thread::Builder::new()
                .name("ziapi-sim-ticker".into())
                .spawn(move || ticker_loop(weak, tick));
            match handle {
                Ok(h) => *server.inner.ticker.lock() = Some(h),
                Err(e) => warn!("Failed to spawn simulator ticker: {}", e),
            }
        }
        info!(
            version = %server.inner.config.server_version,
            devices = server.inner.config.devices.len(),
            "Simulated Data Server started"
        );
        server
    }

    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Open a session; messages for it arrive on the returned receiver.
    pub fn open_session(&self) -> (SessionId, Receiver<ServerMessage>) {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::unbounded();
        if !self.is_running() {
            let _ = tx.send(ServerMessage::Shutdown {
                reason: "server stopped".into(),
            });
            return (id, rx);
        }
        self.inner.state.lock().sessions.insert(
            id,
            Session {
                tx,
                level: None,
                subscriptions: SubscriptionSet::new(),
            },
        );
        debug!(session = id, "Session opened");
        (id, rx)
    }

    pub fn close_session(&self, session: SessionId) {
        if self.inner.state.lock().sessions.remove(&session).is_some() {
            debug!(session, "Session closed");
        }
    }

    /// Sessions currently open (handshake complete or not).
    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    /// Process one message from `session`.
    pub fn handle(&self, session: SessionId, msg: ClientMessage) {
        match msg {
            ClientMessage::Hello(hello) => self.handshake(session, hello),
            ClientMessage::Goodbye => self.close_session(session),
            ClientMessage::Request { id, body, .. } if self.is_stalled_on(&body) => {
                trace!(session, id, "Stalled, request left unanswered");
            },
            ClientMessage::Request { id, reply, body } => self.request(session, id, reply, body),
        }
    }

    /// Stop answering requests, like a server that hangs.
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.store(stalled.then(|| Arc::new(NodePath::root())));
    }

    /// Leave requests on `prefix` and below unanswered; other requests
    /// are served as usual.
    pub fn stall(&self, prefix: NodePath) {
        self.inner.stalled.store(Some(Arc::new(prefix)));
    }

    fn is_stalled_on(&self, body: &Request) -> bool {
        match &*self.inner.stalled.load() {
            None => false,
            Some(prefix) if prefix.is_root() => true,
            Some(prefix) => body.path().is_some_and(|p| prefix.covers(p)),
        }
    }

    fn handshake(&self, session: SessionId, hello: Hello) {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        let established = state.sessions.values().filter(|s| s.level.is_some()).count();
        let Some(s) = state.sessions.get_mut(&session) else {
            return;
        };

        let rejection = if !config
            .implementations
            .iter()
            .any(|i| i.eq_ignore_ascii_case(&hello.implementation))
        {
            Some((
                ResultCode::NotSupported,
                format!("unknown implementation {:?}", hello.implementation),
            ))
        } else if hello.api_level > config.max_api_level {
            Some((
                ResultCode::NotSupported,
                format!(
                    "API level {} above server maximum {}",
                    hello.api_level, config.max_api_level
                ),
            ))
        } else if s.level.is_none() && established >= config.max_connections {
            Some((
                ResultCode::TooManyConnections,
                format!("connection limit {} reached", config.max_connections),
            ))
        } else {
            None
        };

        match rejection {
            Some((code, reason)) => {
                debug!(session, ?code, %reason, "Handshake rejected");
                s.send(ServerMessage::Rejected { code, reason });
            },
            None => {
                s.level = Some(hello.api_level);
                debug!(session, level = %hello.api_level, client = %hello.client_version, "Handshake accepted");
                s.send(ServerMessage::Welcome(Welcome {
                    session_id: session,
                    max_api_level: config.max_api_level,
                    server_version: config.server_version.clone(),
                }));
            },
        }
    }

    fn request(&self, session: SessionId, id: RequestId, mode: ReplyMode, body: Request) {
        let now = self.server_time();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(level) = state.sessions.get(&session).map(|s| s.level) else {
            return;
        };
        if level.is_none() {
            if let Some(s) = state.sessions.get(&session) {
                s.send(ServerMessage::Reply {
                    id,
                    body: Reply::Error {
                        code: ResultCode::Connection,
                        message: "handshake required".into(),
                    },
                });
            }
            return;
        }

        let async_kind = async_command_kind(&body);
        let path = body.path().cloned().unwrap_or_else(NodePath::root);
        trace!(session, id, ?body, "Request");
        let result = self.execute(state, session, body, now);

        let Some(s) = state.sessions.get(&session) else {
            return;
        };
        match (mode, async_kind) {
            (ReplyMode::None, _) => {
                if let Err((code, message)) = &result {
                    trace!(session, id, ?code, %message, "Fire-and-forget request failed");
                }
            },
            (ReplyMode::Tagged(tag), Some(command)) => {
                let code = match &result {
                    Ok(_) => ResultCode::Success,
                    Err((code, _)) => *code,
                };
                let reply = AsyncReply {
                    timestamp: now,
                    sample_timestamp: now,
                    command,
                    result: code,
                    tag,
                    path: path.clone(),
                };
                s.deliver_solicited(Event::new(path, Payload::AsyncReply(vec![reply])));
            },
            (ReplyMode::Sync, _) | (ReplyMode::Tagged(_), None) => {
                let body = match result {
                    Ok(reply) => reply,
                    Err((code, message)) => Reply::Error { code, message },
                };
                s.send(ServerMessage::Reply { id, body });
            },
        }
    }

    fn execute(
        &self,
        state: &mut ServerState,
        session: SessionId,
        body: Request,
        now: Timestamp,
    ) -> Result<Reply, RequestFailure> {
        match body {
            Request::Get { path, expected } => {
                let (_, entry) = state
                    .tree
                    .resolve_first(&path)
                    .ok_or_else(|| (ResultCode::NotFound, path.to_string()))?;
                let value = match &entry.value {
                    NodeValue::Scalar(v) => v.clone(),
                    NodeValue::Vector(v) => tree::vector_as_value(v),
                    NodeValue::Stream(_) => {
                        return fail(
                            ResultCode::DataTypeMismatch,
                            format!("{} is a streaming node", path),
                        );
                    },
                };
                let actual = value.value_type();
                value.coerce(expected).map(Reply::Value).map_err(|_| {
                    (
                        ResultCode::DataTypeMismatch,
                        format!("{} holds {:?}, not {:?}", path, actual, expected),
                    )
                })
            },
            Request::GetSample { path } => {
                let (leaf, entry) = state
                    .tree
                    .resolve_first(&path)
                    .ok_or_else(|| (ResultCode::NotFound, path.to_string()))?;
                if !matches!(entry.value, NodeValue::Stream(_)) {
                    return fail(
                        ResultCode::DataTypeMismatch,
                        format!("{} is not a streaming node", path),
                    );
                }
                let serial = leaf.device().unwrap_or_default();
                state
                    .devices
                    .get(serial)
                    .and_then(|d| d.streams.latest(leaf))
                    .cloned()
                    .map(Reply::Sample)
                    .ok_or_else(|| (ResultCode::Timeout, format!("no sample on {}", path)))
            },
            Request::Set { path, value } => self.set(state, &path, value, now),
            Request::Subscribe { path } => {
                if let Some(s) = state.sessions.get_mut(&session) {
                    s.subscriptions.add(path);
                }
                Ok(Reply::Ack)
            },
            Request::Unsubscribe { path } => {
                if let Some(s) = state.sessions.get_mut(&session) {
                    s.subscriptions.remove(&path);
                }
                Ok(Reply::Ack)
            },
            Request::ListNodes { pattern, flags } => {
                let subs = state
                    .sessions
                    .get(&session)
                    .map(|s| s.subscriptions.clone())
                    .unwrap_or_default();
                let nodes = state.tree.list(&pattern, flags, |p| subs.is_routed(p));
                Ok(Reply::Nodes(nodes))
            },
            Request::RequestValue { path } => {
                let events: Vec<Event> = state
                    .tree
                    .covered(&path)
                    .filter_map(|(p, e)| match &e.value {
                        NodeValue::Scalar(v) => Some(stream::change_event(p.clone(), v, now)),
                        NodeValue::Vector(v) => Some(Event::new(
                            p.clone(),
                            Payload::VectorData(vec![VectorData::single(now, v.clone())]),
                        )),
                        NodeValue::Stream(_) => None,
                    })
                    .collect();
                if events.is_empty() {
                    return fail(ResultCode::NotFound, path.to_string());
                }
                if let Some(s) = state.sessions.get(&session) {
                    for event in events {
                        s.deliver_solicited(event);
                    }
                }
                Ok(Reply::Ack)
            },
            Request::ConnectDevice {
                serial,
                interface,
                params,
            } => self.connect_device(state, &serial, &interface, &params, now),
            Request::DisconnectDevice { serial } => self.disconnect_device(state, &serial, now),
            Request::Sync => Ok(Reply::Ack),
            Request::EchoDevice { serial } => {
                let serial = serial.to_ascii_lowercase();
                match state.devices.get(&serial) {
                    Some(slot) if slot.connected.is_some() => Ok(Reply::Ack),
                    _ => fail(ResultCode::DeviceNotFound, serial),
                }
            },
            Request::VectorWrite { path, data } => {
                state
                    .tree
                    .write_vector(&path, data)
                    .map_err(|code| (code, path.to_string()))?;
                let value = state
                    .tree
                    .get(&path)
                    .map(|e| match &e.value {
                        NodeValue::Vector(v) => v.clone(),
                        _ => VectorElements::U8(Vec::new()),
                    })
                    .unwrap_or(VectorElements::U8(Vec::new()));
                let event = Event::new(
                    path,
                    Payload::VectorData(vec![VectorData::single(now, value)]),
                );
                broadcast(state, &event);
                Ok(Reply::Ack)
            },
        }
    }

    fn set(
        &self,
        state: &mut ServerState,
        path: &NodePath,
        value: Value,
        now: Timestamp,
    ) -> Result<Reply, RequestFailure> {
        let targets: Vec<NodePath> = if path.is_wildcard() {
            state.tree.matching(path).map(|(p, _)| p.clone()).collect()
        } else {
            vec![path.clone()]
        };
        if targets.is_empty() {
            return fail(ResultCode::NotFound, path.to_string());
        }

        let mut first = None;
        for target in targets {
            let effective = match state.tree.set(&target, value.clone()) {
                Ok(v) => v,
                // Wildcard sets skip leaves that do not take the value.
                Err(_) if path.is_wildcard() => continue,
                Err(code) => return fail(code, target.to_string()),
            };
            broadcast(state, &stream::change_event(target.clone(), &effective, now));
            if target.name() == Some("load")
                && target.as_str().ends_with("/system/preset/load")
                && effective.as_i64() == Some(1)
            {
                self.load_preset(state, &target, now);
            }
            first.get_or_insert(effective);
        }
        first
            .map(Reply::Effective)
            .ok_or_else(|| (ResultCode::ReadOnly, path.to_string()))
    }

    /// Restore default settings of the device owning `load_path`.
    fn load_preset(&self, state: &mut ServerState, load_path: &NodePath, now: Timestamp) {
        let Some(serial) = load_path.device().map(str::to_string) else {
            return;
        };
        let Some(slot) = state.devices.get_mut(&serial) else {
            return;
        };
        let Ok(prefix) = NodePath::new(&format!("/{}", serial)) else {
            return;
        };
        state.tree.remove_subtree(&prefix);
        device::populate(&slot.config, &mut state.tree);
        slot.streams.reset();
        info!(device = %serial, "Preset loaded, settings restored");
        // `load` and `busy` read back as 0 once the reset completed.
        broadcast(
            state,
            &stream::change_event(load_path.clone(), &Value::Integer(0), now),
        );
    }

    fn connect_device(
        &self,
        state: &mut ServerState,
        serial: &str,
        interface: &str,
        params: &str,
        now: Timestamp,
    ) -> Result<Reply, RequestFailure> {
        let serial = serial.to_ascii_lowercase();
        let slot = state
            .devices
            .get_mut(&serial)
            .ok_or_else(|| (ResultCode::DeviceNotFound, serial.clone()))?;
        let interface = if interface.is_empty() {
            slot.config.interfaces.first().cloned().unwrap_or_default()
        } else {
            interface.to_string()
        };
        if !slot
            .config
            .interfaces
            .iter()
            .any(|i| i.eq_ignore_ascii_case(&interface))
        {
            return fail(
                ResultCode::DeviceInterface,
                format!("{} has no interface {}", serial, interface),
            );
        }
        match &slot.connected {
            Some(current) if current.eq_ignore_ascii_case(&interface) => return Ok(Reply::Ack),
            Some(current) => {
                return fail(
                    ResultCode::DeviceDifferentInterface,
                    format!("{} already connected on {}", serial, current),
                );
            },
            None => {},
        }
        slot.connected = Some(interface.clone());
        let config = slot.config.clone();
        device::populate(&config, &mut state.tree);
        refresh_device_lists(state);
        info!(device = %serial, %interface, %params, "Device connected");
        tree_change(state, TreeAction::Add, &serial, now);
        Ok(Reply::Ack)
    }

    fn disconnect_device(
        &self,
        state: &mut ServerState,
        serial: &str,
        now: Timestamp,
    ) -> Result<Reply, RequestFailure> {
        let serial = serial.to_ascii_lowercase();
        let Some(slot) = state.devices.get_mut(&serial) else {
            return fail(ResultCode::DeviceNotFound, serial);
        };
        if slot.connected.take().is_none() {
            return Ok(Reply::Ack);
        }
        slot.streams.reset();
        if let Ok(prefix) = NodePath::new(&format!("/{}", serial)) {
            state.tree.remove_subtree(&prefix);
        }
        refresh_device_lists(state);
        info!(device = %serial, "Device disconnected");
        tree_change(state, TreeAction::Remove, &serial, now);
        Ok(Reply::Ack)
    }

    /// Run one generator tick.
    pub fn step(&self) {
        let model = **self.inner.model.load();
        let timing = ScopeTiming {
            block_size: self.inner.config.scope_block_size,
            interval_ticks: self.inner.config.scope_interval_ticks,
        };
        let elapsed = self.inner.started.elapsed().as_secs_f64();

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let mut events = Vec::new();
        for slot in state.devices.values_mut() {
            if slot.connected.is_none() {
                continue;
            }
            let now = Timestamp((elapsed * slot.config.family.clockbase()) as u64);
            let sessions = &state.sessions;
            events.extend(stream::generate(
                &slot.config,
                &state.tree,
                &mut slot.streams,
                now,
                model,
                timing,
                &mut state.rng,
                |p| sessions.values().any(|s| s.wants(p)),
            ));
        }
        for event in &events {
            broadcast(state, event);
        }
    }

    /// Inject an event as if a device produced it.
    pub fn publish(&self, event: Event) {
        let state = self.inner.state.lock();
        broadcast(&state, &event);
    }

    pub fn set_signal_model(&self, model: SignalModel) {
        self.inner.model.store(Arc::new(model));
    }

    pub fn signal_model(&self) -> SignalModel {
        **self.inner.model.load()
    }

    /// Configured devices, connected or not.
    pub fn devices(&self) -> Vec<SimDeviceConfig> {
        self.inner.config.devices.clone()
    }

    pub fn device(&self, serial: &str) -> Option<SimDeviceConfig> {
        let serial = serial.to_ascii_lowercase();
        self.inner
            .config
            .devices
            .iter()
            .find(|d| d.serial == serial)
            .cloned()
    }

    /// Interface `serial` is connected on, if any.
    pub fn connected_interface(&self, serial: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .devices
            .get(&serial.to_ascii_lowercase())
            .and_then(|d| d.connected.clone())
    }

    /// Current value of a node, bypassing any session.
    pub fn value(&self, path: &str) -> Option<Value> {
        let path = NodePath::new(path).ok()?;
        self.inner.state.lock().tree.scalar(&path).cloned()
    }

    /// Stop the generator and notify every session.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<Session> = self.inner.state.lock().sessions.drain().map(|(_, s)| s).collect();
        for s in sessions {
            s.send(ServerMessage::Shutdown {
                reason: "server shutting down".into(),
            });
        }
        if let Some(handle) = self.inner.ticker.lock().take()
            && handle.thread().id() != std::thread::current().id()
        {
            let _ = handle.join();
        }
        info!("Simulated Data Server stopped");
    }

    fn server_time(&self) -> Timestamp {
        Timestamp((self.inner.started.elapsed().as_secs_f64() * SERVER_CLOCKBASE) as u64)
    }
}

fn ticker_loop(inner: Weak<Inner>, tick: Duration) {
    let sleeper = spin_sleep::SpinSleeper::default();
    loop {
        sleeper.sleep(tick);
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.running.load(Ordering::Acquire) {
            break;
        }
        SimServer { inner }.step();
    }
    trace!("Simulator ticker exited");
}

/// Send an unsolicited event to every subscribed session.
fn broadcast(state: &ServerState, event: &Event) {
    for s in state.sessions.values() {
        s.deliver(event);
    }
}

fn tree_change(state: &ServerState, action: TreeAction, serial: &str, now: Timestamp) {
    let Ok(path) = NodePath::new("/zi/devices") else {
        return;
    };
    let event = Event::new(
        path,
        Payload::TreeChange(vec![TreeChange {
            timestamp: now,
            action,
            name: format!("/{}", serial),
        }]),
    );
    broadcast(state, &event);
}

fn async_command_kind(body: &Request) -> Option<AsyncCommandKind> {
    match body {
        Request::Set { value, .. } => Some(match value {
            Value::Double(_) | Value::Complex { .. } => AsyncCommandKind::SetDouble,
            Value::Integer(_) => AsyncCommandKind::SetInteger,
            Value::String(_) | Value::Bytes(_) => AsyncCommandKind::SetBytes,
        }),
        Request::Subscribe { .. } => Some(AsyncCommandKind::Subscribe),
        Request::Unsubscribe { .. } => Some(AsyncCommandKind::Unsubscribe),
        Request::RequestValue { .. } => Some(AsyncCommandKind::GetAsEvent),
        _ => None,
    }
}

fn zi_path(tail: &str) -> Option<NodePath> {
    NodePath::new(&format!("/zi/{}", tail)).ok()
}

fn populate_server_nodes(config: &SimConfig, tree: &mut NodeTree) {
    if let Some(p) = zi_path("about/version") {
        tree.insert_read_only(p, Value::String(config.server_version.clone()));
    }
    if let Some(p) = zi_path("about/revision") {
        tree.insert_read_only(p, Value::Integer(1));
    }
    if let Some(p) = zi_path("config/port") {
        tree.insert_read_only(p, Value::Integer(i64::from(config.port)));
    }
    if let Some(p) = zi_path("devices/connected") {
        tree.insert_read_only(p, Value::String(String::new()));
    }
    if let Some(p) = zi_path("devices/visible") {
        tree.insert_read_only(p, Value::String(String::new()));
    }
    if let Some(p) = zi_path("debug/level") {
        tree.insert_setting(p, Value::Integer(3), Some(tree::Limits::new(0.0, 6.0)));
    }
}

/// Rewrite `/zi/devices/{connected,visible}` from the device table.
fn refresh_device_lists(state: &mut ServerState) {
    let connected: Vec<String> = state
        .devices
        .values()
        .filter(|d| d.connected.is_some())
        .map(|d| d.config.serial.clone())
        .collect();
    let visible: Vec<String> = state
        .devices
        .values()
        .filter(|d| d.config.discoverable)
        .map(|d| d.config.serial.clone())
        .collect();
    // Read-only for clients, so write the entries directly.
    if let Some(p) = zi_path("devices/connected") {
        state
            .tree
            .insert_read_only(p, Value::String(connected.join(",")));
    }
    if let Some(p) = zi_path("devices/visible") {
        state.tree.insert_read_only(p, Value::String(visible.join(",")));
    }
}
