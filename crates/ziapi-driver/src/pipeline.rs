//! IO thread of a connection
//!
//! The receive loop is the only producer of the event queue. Per message:
//!
//! - `Reply` goes to the waiting caller through the reply channel
//! - solicited `Event`s go straight to the queue
//! - pushed `Event`s are filtered by API level and the subscription registry
//! - `Shutdown` or a closed transport ends the loop and marks the connection closed

use crate::metrics::ConnectionMetrics;
use crate::queue::{EventSink, QueueClosed};
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::subscription::SharedRegistry;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};
use ziapi_protocol::{ApiLevel, Event, Reply, RequestId, ServerMessage};
use ziapi_transport::{RxTransport, TransportError};

/// Everything the receive loop shares with its connection
pub struct IoContext {
    pub sink: EventSink,
    pub replies: Sender<(RequestId, Reply)>,
    pub registry: SharedRegistry,
    pub level: ApiLevel,
    pub state: Arc<AtomicConnectionState>,
    pub metrics: Arc<ConnectionMetrics>,
}

/// Receive loop
///
/// Runs until `is_running` is cleared, the server shuts the session down or
/// the transport closes. `receive_timeout` bounds how long a stop request
/// can go unnoticed.
pub fn rx_loop(
    mut rx: Box<dyn RxTransport>,
    ctx: IoContext,
    receive_timeout: Duration,
    is_running: Arc<AtomicBool>,
) {
    loop {
        // Acquire: seeing `false` implies seeing the closer's writes.
        if !is_running.load(Ordering::Acquire) {
            trace!("IO thread: is_running flag is false, exiting");
            break;
        }

        let msg = match rx.receive(receive_timeout) {
            Ok(msg) => msg,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Codec(e)) => {
                ctx.metrics.receive_errors.fetch_add(1, Ordering::Relaxed);
                warn!("IO thread: dropping undecodable message: {}", e);
                continue;
            },
            Err(e) => {
                debug!("IO thread: transport ended: {}", e);
                break;
            },
        };

        match msg {
            ServerMessage::Reply { id, body } => {
                ctx.metrics.replies_received.fetch_add(1, Ordering::Relaxed);
                // No receiver means the connection is tearing down.
                if ctx.replies.send((id, body)).is_err() {
                    break;
                }
            },
            ServerMessage::Event { event, solicited } => {
                if route(&ctx, event, solicited).is_err() {
                    trace!("IO thread: event queue closed");
                    break;
                }
            },
            ServerMessage::Shutdown { reason } => {
                warn!(%reason, "Server closed the session");
                break;
            },
            ServerMessage::Welcome(_) | ServerMessage::Rejected { .. } => {
                trace!("IO thread: ignoring handshake message after handshake");
            },
        }
    }

    ctx.state.set(ConnectionState::Closed, Ordering::Release);
    is_running.store(false, Ordering::Release);
    trace!("IO thread: loop exited");
}

fn route(ctx: &IoContext, event: Event, solicited: bool) -> Result<(), QueueClosed> {
    let metrics = &ctx.metrics;
    metrics.events_received.fetch_add(1, Ordering::Relaxed);

    if !ctx.level.supports(event.kind()) {
        metrics.events_filtered.fetch_add(1, Ordering::Relaxed);
        trace!(kind = ?event.kind(), level = %ctx.level, "Event kind not available at this level");
        return Ok(());
    }
    if !solicited && !ctx.registry.load().is_routed(&event.path) {
        metrics.events_filtered.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    let dropped = ctx.sink.push(event)?;
    metrics.events_routed.fetch_add(1, Ordering::Relaxed);
    if dropped > 0 {
        metrics.events_dropped.fetch_add(dropped, Ordering::Relaxed);
        debug!(dropped, policy = ?ctx.sink.policy(), "Event queue overflow");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Timeout;
    use crate::queue::{EventQueue, EventSource, OverflowPolicy};
    use crate::subscription::{SubscriptionRegistry, update};
    use arc_swap::ArcSwap;
    use crossbeam_channel::Receiver;
    use ziapi_protocol::{NodePath, Payload};

    /// Replays a script, then reports the transport closed.
    struct ScriptedRx(std::vec::IntoIter<ServerMessage>);

    impl RxTransport for ScriptedRx {
        fn receive(&mut self, _timeout: Duration) -> Result<ServerMessage, TransportError> {
            self.0.next().ok_or(TransportError::Closed)
        }
    }

    fn event(path: &str, solicited: bool) -> ServerMessage {
        ServerMessage::Event {
            event: Event::new(NodePath::new(path).unwrap(), Payload::DoubleScalar(vec![1.0])),
            solicited,
        }
    }

    fn run(
        script: Vec<ServerMessage>,
        level: ApiLevel,
        subscribed: &[&str],
    ) -> (EventSource, Receiver<(RequestId, Reply)>, Arc<ConnectionMetrics>, Arc<AtomicConnectionState>) {
        let (sink, source) = EventQueue::bounded(16, OverflowPolicy::DropOldest);
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        let registry: SharedRegistry = Arc::new(ArcSwap::from_pointee(SubscriptionRegistry::new()));
        for p in subscribed {
            update(&registry, |r| r.add(NodePath::new(p).unwrap()));
        }
        let metrics = Arc::new(ConnectionMetrics::new());
        let state = Arc::new(AtomicConnectionState::default());
        let ctx = IoContext {
            sink,
            replies: reply_tx,
            registry,
            level,
            state: state.clone(),
            metrics: metrics.clone(),
        };
        let running = Arc::new(AtomicBool::new(true));
        rx_loop(
            Box::new(ScriptedRx(script.into_iter())),
            ctx,
            Duration::from_millis(1),
            running.clone(),
        );
        assert!(!running.load(Ordering::Acquire));
        (source, reply_rx, metrics, state)
    }

    fn paths(source: &EventSource) -> Vec<String> {
        std::iter::from_fn(|| source.pop(Timeout::Immediate).ok().flatten())
            .map(|e| e.path.to_string())
            .collect()
    }

    #[test]
    fn test_routing_and_solicited_bypass() {
        let (source, _, metrics, state) = run(
            vec![
                event("/dev1/demods/0/sample", false),
                event("/dev1/auxins/0/sample", false),
                event("/dev1/oscs/0/freq", true),
            ],
            ApiLevel::V6,
            &["/dev1/demods"],
        );
        assert_eq!(paths(&source), vec!["/dev1/demods/0/sample", "/dev1/oscs/0/freq"]);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 3);
        assert_eq!(snapshot.events_filtered, 1);
        assert_eq!(state.get(Ordering::Acquire), ConnectionState::Closed);
    }

    #[test]
    fn test_level_filter() {
        let timed = ServerMessage::Event {
            event: Event::new(
                NodePath::new("/dev1/cnts/0/sample").unwrap(),
                Payload::CounterSample(Vec::new()),
            ),
            solicited: false,
        };
        let (source, _, metrics, _) = run(vec![timed], ApiLevel::V1, &["/dev1"]);
        assert!(paths(&source).is_empty());
        assert_eq!(metrics.snapshot().events_filtered, 1);
    }

    #[test]
    fn test_replies_and_shutdown() {
        let (source, replies, _, state) = run(
            vec![
                ServerMessage::Reply {
                    id: 7,
                    body: Reply::Ack,
                },
                ServerMessage::Shutdown {
                    reason: "bye".into(),
                },
                event("/dev1/demods/0/sample", true),
            ],
            ApiLevel::V6,
            &[],
        );
        assert_eq!(replies.try_recv().unwrap(), (7, Reply::Ack));
        // Nothing after the shutdown is processed.
        assert!(paths(&source).is_empty());
        assert!(!state.get(Ordering::Acquire).is_connected());
    }
}
