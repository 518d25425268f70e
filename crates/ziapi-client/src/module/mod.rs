//! Module engine
//!
//! A module is a long-running client-side task (sweep, recording, spectrum,
//! ...) with its own session to the Data Server. It is configured through
//! typed parameters and subscriptions, runs on one worker thread while
//! executing, and stores its results as chunks that can be read while the
//! worker is still writing.
//!
//! # Example
//!
//! ```rust,no_run
//! use ziapi_client::module::{Module, ModuleKind};
//! use ziapi_driver::ConnectionBuilder;
//! use ziapi_protocol::Value;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = ConnectionBuilder::new().host("localhost", 8004).open()?;
//! let mut sweep = Module::create(&conn, ModuleKind::Sweeper)?;
//! sweep.set_parameter("sweep/gridnode", Value::String("/dev1/oscs/0/freq".into()))?;
//! sweep.set_parameter("samplecount", Value::Integer(50))?;
//! sweep.subscribe("/dev1/demods/0/sample")?;
//! sweep.execute()?;
//! sweep.wait(Duration::from_secs(30));
//! for (path, chunks) in sweep.read(None)? {
//!     println!("{}: {} sweeps", path, chunks.len());
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
mod kind;
mod params;
mod state;
mod tasks;

pub use buffer::{Chunk, ChunkHeader, ModuleReadout, ResultBuffer};
pub use kind::{ModuleKind, UnknownModuleKind};
pub use params::ModuleParams;
pub use state::{AtomicModuleState, ModuleState};

use crate::error::ModuleError;
use crate::storage::{JsonFileStore, ResultStore, SavedResult};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use spin_sleep::SpinSleeper;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};
use ziapi_driver::{ApiError, CloseHandle, Connection, Timeout, Warning};
use ziapi_protocol::{ChunkFlags, Event, NodePath, Payload, Value};

/// Process-unique module id
pub type ModuleId = u64;

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Poll granularity of the worker; bounds how late a stop request is seen
const POLL_SLICE: Duration = Duration::from_millis(10);

/// State shared between a module and its worker
#[derive(Debug)]
struct Shared {
    state: AtomicModuleState,
    stop: AtomicBool,
    stopped_early: AtomicBool,
    /// f64 bits in [0, 1]
    progress: AtomicU64,
    /// Pending software triggers
    triggers: AtomicU64,
    buffer: Mutex<ResultBuffer>,
    last_error: ArcSwapOption<String>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicModuleState::default(),
            stop: AtomicBool::new(false),
            stopped_early: AtomicBool::new(false),
            progress: AtomicU64::new(0f64.to_bits()),
            triggers: AtomicU64::new(0),
            buffer: Mutex::new(ResultBuffer::new()),
            last_error: ArcSwapOption::empty(),
        }
    }

    fn set_progress(&self, progress: f64) {
        let p = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.progress.store(p.to_bits(), Ordering::Relaxed);
    }

    fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Relaxed))
    }
}

/// What a task sees of its module while running on the worker thread
pub(crate) struct TaskContext<'a> {
    kind: ModuleKind,
    conn: &'a mut Connection,
    params: &'a ModuleParams,
    subscriptions: &'a [NodePath],
    shared: &'a Shared,
    data_loss: bool,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub(crate) fn conn(&mut self) -> &mut Connection {
        &mut *self.conn
    }

    pub(crate) fn params(&self) -> &'a ModuleParams {
        self.params
    }

    pub(crate) fn subscriptions(&self) -> &'a [NodePath] {
        self.subscriptions
    }

    /// Event path matches one of the module's subscriptions.
    pub(crate) fn is_subscribed(&self, path: &NodePath) -> bool {
        self.subscriptions.iter().any(|s| s.covers(path))
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    pub(crate) fn set_progress(&self, progress: f64) {
        self.shared.set_progress(progress);
    }

    /// Consume one pending software trigger.
    pub(crate) fn take_trigger(&self) -> bool {
        self.shared
            .triggers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Next event of the module session, waiting at most `timeout`.
    pub(crate) fn poll(&mut self, timeout: Duration) -> Result<Option<Event>, ModuleError> {
        let outcome = self.conn.poll(Timeout::After(timeout))?;
        if let Some(Warning::Overflow { dropped }) = outcome.warning {
            warn!(module = self.kind.name(), dropped, "Module session dropped events");
            self.data_loss = true;
        }
        Ok(outcome.value)
    }

    /// Discard everything queued so far; returns the number of events.
    pub(crate) fn drain(&mut self) -> Result<usize, ModuleError> {
        let mut n = 0;
        while self.conn.poll(Timeout::Immediate)?.value.is_some() {
            n += 1;
        }
        Ok(n)
    }

    /// Sleep in slices; false if a stop was requested meanwhile.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let sleeper = SpinSleeper::default();
        let deadline = Instant::now() + duration;
        loop {
            if self.should_stop() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            sleeper.sleep(remaining.min(POLL_SLICE));
        }
    }

    /// Chunk flags for a new chunk; adds `DATALOSS` once after an overflow.
    pub(crate) fn chunk_flags(&mut self, finished: bool) -> ChunkFlags {
        let mut flags = ChunkFlags::VALID | ChunkFlags::DATA;
        if finished {
            flags |= ChunkFlags::FINISHED;
        }
        if std::mem::take(&mut self.data_loss) {
            flags |= ChunkFlags::DATALOSS;
        }
        flags
    }

    pub(crate) fn push_chunk(&self, path: NodePath, header: ChunkHeader, events: Vec<Payload>) -> u64 {
        let index = self.shared.buffer.lock().push_chunk(path.clone(), header, events);
        trace!(module = self.kind.name(), %path, index, "Chunk stored");
        index
    }

    pub(crate) fn with_buffer<R>(&self, f: impl FnOnce(&mut ResultBuffer) -> R) -> R {
        f(&mut self.shared.buffer.lock())
    }
}

/// A module instance
pub struct Module {
    id: ModuleId,
    kind: ModuleKind,
    session: Arc<Mutex<Connection>>,
    /// Closes the session without waiting for the worker's lock
    closer: CloseHandle,
    params: ModuleParams,
    subscriptions: Vec<NodePath>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    store: Arc<dyn ResultStore>,
    /// Position of [`Module::next_node`]
    cursor: usize,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl Module {
    /// New module with a dedicated session to `conn`'s server.
    pub fn create(conn: &Connection, kind: ModuleKind) -> Result<Self, ModuleError> {
        let session = conn.session_builder().open()?;
        Ok(Self::with_session(session, kind))
    }

    /// New module running on an already opened session.
    pub fn with_session(session: Connection, kind: ModuleKind) -> Self {
        let id = NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed);
        let closer = session.close_handle();
        info!(module = kind.name(), id, endpoint = %session.endpoint(), "Module created");
        Self {
            id,
            kind,
            session: Arc::new(Mutex::new(session)),
            closer,
            params: ModuleParams::defaults(kind),
            subscriptions: Vec::new(),
            shared: Arc::new(Shared::new()),
            worker: None,
            store: Arc::new(JsonFileStore::new()),
            cursor: 0,
        }
    }

    /// Replace the result store used by [`Module::save`].
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn state(&self) -> ModuleState {
        self.shared.state.get(Ordering::Acquire)
    }

    pub fn subscriptions(&self) -> &[NodePath] {
        &self.subscriptions
    }

    pub fn parameters(&self) -> &ModuleParams {
        &self.params
    }

    fn ensure(&self, operation: &'static str, ok: impl FnOnce(ModuleState) -> bool) -> Result<ModuleState, ModuleError> {
        let state = self.state();
        if ok(state) {
            Ok(state)
        } else {
            Err(ModuleError::InvalidState { operation, state })
        }
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<ModuleState, ModuleError> {
        self.ensure(operation, |s| s != ModuleState::Destroyed)
    }

    fn touch(&self) {
        // Only the first change moves Created to Ready; later ones are no-ops.
        self.shared
            .state
            .transition(ModuleState::Created, ModuleState::Ready, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Set a parameter; `key` may carry the `<kind>/` prefix.
    pub fn set_parameter(&mut self, key: &str, value: Value) -> Result<(), ModuleError> {
        self.ensure("set_parameter", ModuleState::is_configurable)?;
        let key = ModuleParams::normalize(self.kind, key);
        debug!(module = self.kind.name(), %key, ?value, "Module parameter set");
        self.params.set(key, value);
        self.touch();
        Ok(())
    }

    pub fn get_parameter(&self, key: &str) -> Result<Value, ModuleError> {
        self.ensure_alive("get_parameter")?;
        let key = ModuleParams::normalize(self.kind, key);
        self.params
            .get(&key)
            .cloned()
            .ok_or(ModuleError::UnknownParameter { name: key })
    }

    pub fn subscribe(&mut self, path: &str) -> Result<(), ModuleError> {
        self.ensure("subscribe", ModuleState::is_configurable)?;
        let path = NodePath::new(path).map_err(ApiError::from)?;
        if !self.subscriptions.contains(&path) {
            self.subscriptions.push(path);
        }
        self.touch();
        Ok(())
    }

    /// Remove `path` and every subscription below it.
    pub fn unsubscribe(&mut self, path: &str) -> Result<(), ModuleError> {
        self.ensure("unsubscribe", ModuleState::is_configurable)?;
        let path = NodePath::new(path).map_err(ApiError::from)?;
        self.subscriptions.retain(|s| !path.is_ancestor_or_self_of(s));
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Start the worker; returns immediately.
    pub fn execute(&mut self) -> Result<(), ModuleError> {
        let previous = self.ensure("execute", ModuleState::can_execute)?;
        self.join_worker();

        let shared = &self.shared;
        shared.stop.store(false, Ordering::Release);
        shared.stopped_early.store(false, Ordering::Relaxed);
        shared.triggers.store(0, Ordering::Relaxed);
        shared.set_progress(0.0);
        shared.last_error.store(None);
        shared.buffer.lock().clear();
        self.cursor = 0;

        if !shared
            .state
            .transition(previous, ModuleState::Executing, Ordering::AcqRel)
        {
            return Err(ModuleError::InvalidState {
                operation: "execute",
                state: self.state(),
            });
        }

        let kind = self.kind;
        let session = self.session.clone();
        let params = self.params.clone();
        let subscriptions = self.subscriptions.clone();
        let worker_shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("ziapi-{}-{}", kind.name(), self.id))
            .spawn(move || worker_main(kind, session, params, subscriptions, worker_shared));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(module = kind.name(), id = self.id, "Module executing");
                Ok(())
            },
            Err(e) => {
                self.shared
                    .state
                    .transition(ModuleState::Executing, previous, Ordering::AcqRel);
                Err(ModuleError::Spawn(e.to_string()))
            },
        }
    }

    /// Fire a software trigger (recorder kinds only).
    pub fn trigger(&mut self) -> Result<(), ModuleError> {
        if !self.kind.supports_trigger() {
            return Err(ModuleError::NotSupported {
                kind: self.kind,
                operation: "trigger",
            });
        }
        self.ensure("trigger", |s| s == ModuleState::Executing)?;
        self.shared.triggers.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Ask the worker to stop; it moves the module to `Finished`.
    pub fn finish(&mut self) -> Result<(), ModuleError> {
        let state = self.ensure_alive("finish")?;
        if state == ModuleState::Executing {
            self.shared.stopped_early.store(true, Ordering::Relaxed);
            debug!(module = self.kind.name(), id = self.id, "Module stop requested");
        }
        self.shared.stop.store(true, Ordering::Release);
        Ok(())
    }

    /// Fraction of work done, in [0, 1].
    pub fn progress(&self) -> f64 {
        self.shared.progress()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == ModuleState::Finished
    }

    /// The last run ended through [`Module::finish`] rather than on its own.
    pub fn stopped_early(&self) -> bool {
        self.is_finished() && self.shared.stopped_early.load(Ordering::Relaxed)
    }

    /// Block until the module leaves `Executing` or `timeout` passes.
    ///
    /// Returns `true` if the module is no longer executing.
    pub fn wait(&self, timeout: Duration) -> bool {
        let sleeper = SpinSleeper::default();
        let deadline = Instant::now() + timeout;
        while self.state() == ModuleState::Executing {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            sleeper.sleep(remaining.min(Duration::from_millis(2)));
        }
        true
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.load_full().map(|e| (*e).clone())
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Snapshot of all results, or of nodes at or under `path`.
    pub fn read(&self, path: Option<&str>) -> Result<ModuleReadout, ModuleError> {
        self.ensure_alive("read")?;
        let filter = path
            .map(NodePath::new)
            .transpose()
            .map_err(ApiError::from)?;
        Ok(self.shared.buffer.lock().readout(filter.as_ref()))
    }

    pub fn get_chunk(&self, path: &str, index: u64) -> Result<Option<Chunk>, ModuleError> {
        self.ensure_alive("get_chunk")?;
        let path = NodePath::new(path).map_err(ApiError::from)?;
        Ok(self.shared.buffer.lock().get_chunk(&path, index).cloned())
    }

    /// Cursor over result nodes; `None` once past the last, then restarts.
    pub fn next_node(&mut self) -> Result<Option<NodePath>, ModuleError> {
        self.ensure_alive("next_node")?;
        let paths = self.shared.buffer.lock().node_paths();
        match paths.into_iter().nth(self.cursor) {
            Some(path) => {
                self.cursor += 1;
                Ok(Some(path))
            },
            None => {
                self.cursor = 0;
                Ok(None)
            },
        }
    }

    /// Write the current results through the result store into `directory`.
    pub fn save(&self, filename: &str) -> Result<PathBuf, ModuleError> {
        self.ensure_alive("save")?;
        let directory = self.params.str("directory")?.to_string();
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let result = SavedResult {
            module: self.kind.name().to_string(),
            saved_at,
            readout: self.read(None)?,
        };
        Ok(self.store.save(Path::new(&directory), filename, &result)?)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!(module = self.kind.name(), id = self.id, "Module worker panicked");
        }
    }

    fn teardown(&mut self) -> ModuleState {
        let previous = self.shared.state.destroy(Ordering::AcqRel);
        self.shared.stop.store(true, Ordering::Release);
        // Closing first fails any request the worker is blocked on, so the
        // join below cannot hang on an unresponsive server.
        self.closer.close();
        self.join_worker();
        if previous != ModuleState::Destroyed {
            self.session.lock().close();
            debug!(module = self.kind.name(), id = self.id, "Module destroyed");
        }
        previous
    }

    /// Stop and join the worker, close the session. Later calls fail.
    pub fn clear(&mut self) -> Result<(), ModuleError> {
        self.ensure_alive("clear")?;
        self.teardown();
        Ok(())
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn worker_main(
    kind: ModuleKind,
    session: Arc<Mutex<Connection>>,
    params: ModuleParams,
    subscriptions: Vec<NodePath>,
    shared: Arc<Shared>,
) {
    let started = Instant::now();
    let result = catch_panic(|| {
        let mut conn = session.lock();
        run_task(kind, &mut conn, &params, &subscriptions, &shared)
    });

    match &result {
        Ok(()) if !shared.stop.load(Ordering::Acquire) => shared.set_progress(1.0),
        Ok(()) => {},
        Err(e) => {
            warn!(module = kind.name(), "Module task failed: {}", e);
            shared.last_error.store(Some(Arc::new(e.to_string())));
        },
    }
    // A destroyed module stays destroyed.
    shared
        .state
        .transition(ModuleState::Executing, ModuleState::Finished, Ordering::AcqRel);
    debug!(module = kind.name(), elapsed = ?started.elapsed(), "Module worker: loop exited");
}

/// Turn a panic of `task` into a recorded fault.
fn catch_panic(task: impl FnOnce() -> Result<(), ModuleError>) -> Result<(), ModuleError> {
    panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ModuleError::Panicked(message))
    })
}

fn run_task(
    kind: ModuleKind,
    conn: &mut Connection,
    params: &ModuleParams,
    subscriptions: &[NodePath],
    shared: &Shared,
) -> Result<(), ModuleError> {
    let subscribed = subscriptions
        .iter()
        .try_for_each(|path| conn.subscribe(path.as_str()));
    let mut ctx = TaskContext {
        kind,
        conn,
        params,
        subscriptions,
        shared,
        data_loss: false,
    };
    let result = match subscribed {
        Ok(()) => tasks::run(&mut ctx),
        Err(e) => Err(e.into()),
    };

    // Leave the session clean for the next run.
    if ctx.conn.is_connected() {
        for path in ctx.conn.subscriptions() {
            if let Err(e) = ctx.conn.unsubscribe(path.as_str()) {
                debug!(%path, "Module unsubscribe failed: {}", e);
            }
        }
        // Best effort: a failed drain only leaves stale events behind.
        let _ = ctx.drain();
    }
    result
}
