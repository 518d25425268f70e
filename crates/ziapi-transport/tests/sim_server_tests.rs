//! Simulated Data Server driven by its own generator thread

use serial_test::serial;
use std::time::{Duration, Instant};
use ziapi_transport::sim::{SimDeviceConfig, TcpHost};
use ziapi_transport::*;
use ziapi_protocol::*;

fn hello() -> ClientMessage {
    ClientMessage::Hello(Hello {
        api_level: ApiLevel::V6,
        implementation: DEFAULT_IMPLEMENTATION.into(),
        client_version: "integration".into(),
    })
}

fn subscribe(id: RequestId, path: &str) -> ClientMessage {
    ClientMessage::Request {
        id,
        reply: ReplyMode::Sync,
        body: Request::Subscribe {
            path: NodePath::new(path).unwrap(),
        },
    }
}

/// Collect data events for `window`.
fn collect(pair: &mut TransportPair, window: Duration) -> Vec<Event> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        if let Ok(ServerMessage::Event { event, .. }) = pair.rx.receive(Duration::from_millis(10)) {
            events.push(event);
        }
    }
    events
}

fn connect(connector: &dyn Connector, endpoint: &Endpoint) -> TransportPair {
    let mut pair = connector.connect(endpoint, Duration::from_secs(1)).unwrap();
    pair.tx.send(hello()).unwrap();
    assert!(matches!(
        pair.rx.receive(Duration::from_secs(1)).unwrap(),
        ServerMessage::Welcome(_)
    ));
    pair
}

#[test]
#[serial]
fn test_sessions_only_see_their_subscriptions() {
    let network = SimNetwork::new();
    let endpoint = Endpoint::localhost(8004);
    network.register(
        endpoint.clone(),
        SimServer::start(
            SimConfig::default().with_device(SimDeviceConfig::mf("dev1234").connected()),
        ),
    );
    let connector = network.connector();

    let mut demod = connect(&connector, &endpoint);
    let mut aux = connect(&connector, &endpoint);
    demod.tx.send(subscribe(1, "/dev1234/demods/0/sample")).unwrap();
    aux.tx.send(subscribe(1, "/dev1234/auxins/*/sample")).unwrap();

    let demod_events = collect(&mut demod, Duration::from_millis(200));
    let aux_events = collect(&mut aux, Duration::from_millis(200));

    assert!(!demod_events.is_empty());
    assert!(!aux_events.is_empty());
    assert!(demod_events.iter().all(|e| e.kind() == EventKind::DemodSample));
    assert!(aux_events.iter().all(|e| e.kind() == EventKind::AuxInSample));

    // Device timestamps never go backwards within one node.
    let stamps: Vec<Timestamp> = demod_events
        .iter()
        .flat_map(|e| e.payload.as_demod().unwrap().iter().map(|s| s.timestamp))
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
#[serial]
fn test_tcp_host_streams_scope_blocks() {
    let server = SimServer::start(SimConfig {
        scope_interval_ticks: 2,
        scope_block_size: 256,
        ..SimConfig::default().with_device(SimDeviceConfig::uhf("dev2000").connected())
    });
    let host = TcpHost::bind(server.clone(), "127.0.0.1:0").unwrap();
    let mut pair = connect(&TcpConnector::new(), &host.endpoint());

    pair.tx
        .send(ClientMessage::Request {
            id: 2,
            reply: ReplyMode::None,
            body: Request::Set {
                path: NodePath::new("/dev2000/scopes/0/enable").unwrap(),
                value: Value::Integer(1),
            },
        })
        .unwrap();
    pair.tx.send(subscribe(3, "/dev2000/scopes/0/wave")).unwrap();

    let events = collect(&mut pair, Duration::from_millis(300));
    let waves: Vec<&ScopeWave> = events
        .iter()
        .filter_map(|e| e.payload.as_scope())
        .flatten()
        .collect();
    assert!(waves.iter().any(|w| w.is_last_block()));
    assert!(waves.iter().all(|w| w.total_samples == 2048));
    drop(host);
}

#[test]
#[serial]
fn test_server_shutdown_closes_loopback() {
    let network = SimNetwork::new();
    let endpoint = Endpoint::localhost(8004);
    let server = SimServer::start(SimConfig::default().manual());
    network.register(endpoint.clone(), server.clone());
    let mut pair = connect(&network.connector(), &endpoint);

    server.shutdown();
    assert!(matches!(
        pair.rx.receive(Duration::from_secs(1)).unwrap(),
        ServerMessage::Shutdown { .. }
    ));
    assert!(matches!(
        pair.rx.receive(Duration::from_millis(50)),
        Err(TransportError::Closed)
    ));
    assert!(network.connector().connect(&endpoint, Duration::ZERO).is_err());
}
