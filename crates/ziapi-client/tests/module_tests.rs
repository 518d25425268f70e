//! Module engine against the simulated Data Server

use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use ziapi_client::module::{Module, ModuleKind, ModuleState};
use ziapi_client::{JsonFileStore, ModuleError, ResultStore};
use ziapi_driver::{Connection, ConnectionBuilder};
use ziapi_protocol::*;
use ziapi_transport::{Endpoint, SimConfig, SimDeviceConfig, SimNetwork, SimServer};

const WAIT: Duration = Duration::from_secs(20);

/// Free-running simulator with one connected MF device `dev1`.
fn running() -> (SimServer, Connection) {
    start(SimConfig::default().with_device(SimDeviceConfig::mf("dev1").connected()))
}

fn start(config: SimConfig) -> (SimServer, Connection) {
    let network = SimNetwork::new();
    let server = SimServer::start(config);
    network.register(Endpoint::localhost(8004), server.clone());
    let conn = ConnectionBuilder::new()
        .endpoint(Endpoint::localhost(8004))
        .connector(Arc::new(network.connector()))
        .open()
        .unwrap();
    (server, conn)
}

fn path(p: &str) -> NodePath {
    NodePath::new(p).unwrap()
}

#[test]
#[serial]
fn test_configuration_locked_while_executing() {
    let (_server, conn) = running();
    let mut module = Module::create(&conn, ModuleKind::Recorder).unwrap();
    module.set_parameter("record/endless", Value::Integer(1)).unwrap();
    module.subscribe("/dev1/demods/0/sample").unwrap();
    module.execute().unwrap();
    assert_eq!(module.state(), ModuleState::Executing);

    let err = module.set_parameter("duration", Value::Double(1.0)).unwrap_err();
    assert!(matches!(
        err,
        ModuleError::InvalidState {
            state: ModuleState::Executing,
            ..
        }
    ));
    assert!(matches!(module.subscribe("/dev1/demods/1/sample"), Err(ModuleError::InvalidState { .. })));
    assert!(matches!(module.execute(), Err(ModuleError::InvalidState { .. })));

    module.finish().unwrap();
    assert!(module.wait(WAIT));
    assert_eq!(module.state(), ModuleState::Finished);
    assert!(module.stopped_early());

    // Finished modules are configurable and can run again.
    module.set_parameter("endless", Value::Integer(0)).unwrap();
    module.set_parameter("duration", Value::Double(0.02)).unwrap();
    module.execute().unwrap();
    assert!(module.wait(WAIT));
    assert!(!module.stopped_early());
    assert_eq!(module.progress(), 1.0);
}

#[test]
#[serial]
fn test_scope_module_reassembles_shots() {
    let (_server, mut conn) = running();
    conn.set_integer("/dev1/scopes/0/length", 2048).unwrap();
    conn.set_integer("/dev1/scopes/0/enable", 1).unwrap();

    let mut scope = Module::create(&conn, ModuleKind::ScopeAssembler).unwrap();
    scope.set_parameter("averager/count", Value::Integer(2)).unwrap();
    scope.subscribe("/dev1/scopes/0/wave").unwrap();
    scope.execute().unwrap();
    assert!(scope.wait(WAIT));
    assert!(scope.last_error().is_none());

    let readout = scope.read(None).unwrap();
    let chunks = readout.get(&path("/dev1/scopes/0/wave")).unwrap();
    assert_eq!(chunks.len(), 2);
    for chunk in chunks {
        let samples: u64 = chunk
            .events
            .iter()
            .filter_map(Payload::as_scope)
            .flatten()
            .map(|b| u64::from(b.sample_count))
            .sum();
        assert_eq!(samples, 2048);
        assert!(chunk.is_finished());
    }
    assert_eq!(chunks[0].header.trigger_number, 1);
    assert_eq!(chunks[1].header.trigger_number, 2);
}

#[test]
#[serial]
fn test_sweep_over_oscillator() {
    let (server, conn) = running();
    let mut sweep = Module::create(&conn, ModuleKind::Sweeper).unwrap();
    sweep.set_parameter("sweep/gridnode", Value::String("/dev1/oscs/0/freq".into())).unwrap();
    sweep.set_parameter("start", Value::Double(1e3)).unwrap();
    sweep.set_parameter("stop", Value::Double(1e5)).unwrap();
    sweep.set_parameter("samplecount", Value::Integer(5)).unwrap();
    sweep.set_parameter("xmapping", Value::Integer(1)).unwrap();
    sweep.set_parameter("averaging/sample", Value::Integer(3)).unwrap();
    sweep.subscribe("/dev1/demods/0/sample").unwrap();
    sweep.execute().unwrap();
    assert!(sweep.wait(WAIT));
    assert!(sweep.last_error().is_none(), "{:?}", sweep.last_error());
    assert_eq!(sweep.progress(), 1.0);

    let readout = sweep.read(Some("/dev1/demods")).unwrap();
    let chunks = readout.get(&path("/dev1/demods/0/sample")).unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_finished());
    let wave = &chunks[0].events[0].as_sweeper().unwrap()[0];
    let SweeperData::Demod(points) = &wave.data else {
        panic!("expected demodulator points, got {:?}", wave.data);
    };
    let grid: Vec<f64> = points.iter().map(|p| p.grid).collect();
    assert_eq!(grid.len(), 5);
    assert!((grid[0] - 1e3).abs() < 1e-6);
    assert!((grid[4] - 1e5).abs() < 1e-3);
    assert!(points.iter().all(|p| p.count >= 1 && p.tc > 0.0));

    // The sweep leaves the grid node at its last point.
    assert_eq!(server.value("/dev1/oscs/0/freq"), Some(Value::Double(grid[4])));
}

#[test]
#[serial]
fn test_finish_stops_sweep_early() {
    let (_server, conn) = running();
    let mut sweep = Module::create(&conn, ModuleKind::Sweeper).unwrap();
    sweep.set_parameter("gridnode", Value::String("/dev1/oscs/0/freq".into())).unwrap();
    sweep.set_parameter("samplecount", Value::Integer(1000)).unwrap();
    sweep.set_parameter("settling/time", Value::Double(0.01)).unwrap();
    sweep.subscribe("/dev1/demods/0/sample").unwrap();
    sweep.execute().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    sweep.finish().unwrap();
    assert!(sweep.wait(WAIT));
    assert!(sweep.is_finished());
    assert!(sweep.stopped_early());
    assert!(sweep.progress() < 1.0);

    // Partial sweep is kept but not marked finished.
    let readout = sweep.read(None).unwrap();
    if let Some(chunks) = readout.get(&path("/dev1/demods/0/sample")) {
        assert!(chunks.iter().all(|c| !c.is_finished()));
    }
}

#[test]
#[serial]
fn test_recorder_manual_triggers() {
    let (_server, conn) = running();
    let mut rec = Module::create(&conn, ModuleKind::Recorder).unwrap();
    rec.set_parameter("trigger/type", Value::Integer(2)).unwrap();
    rec.set_parameter("duration", Value::Double(0.05)).unwrap();
    rec.set_parameter("count", Value::Integer(2)).unwrap();
    rec.subscribe("/dev1/demods/0/sample").unwrap();
    rec.execute().unwrap();
    rec.trigger().unwrap();
    rec.trigger().unwrap();
    assert!(rec.wait(WAIT));
    assert!(rec.last_error().is_none());

    let readout = rec.read(None).unwrap();
    let chunks = readout.get(&path("/dev1/demods/0/sample")).unwrap();
    let numbers: Vec<u64> = chunks.iter().map(|c| c.header.trigger_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    for chunk in chunks {
        assert!(chunk.is_finished());
        assert!(chunk.event_count() > 0);
        assert!(chunk.header.created <= chunk.header.changed);
    }
    // Trigger on a finished module is a state error.
    assert!(matches!(rec.trigger(), Err(ModuleError::InvalidState { .. })));
}

#[test]
#[serial]
fn test_data_acquisition_continuous_windows() {
    let (_server, conn) = running();
    let mut daq = Module::create(&conn, ModuleKind::DataAcquisition).unwrap();
    daq.set_parameter("duration", Value::Double(0.05)).unwrap();
    daq.set_parameter("count", Value::Integer(3)).unwrap();
    daq.subscribe("/dev1/demods/0/sample").unwrap();
    daq.execute().unwrap();
    assert!(daq.wait(WAIT));

    let mut indices = Vec::new();
    while let Some(node) = daq.next_node().unwrap() {
        let readout = daq.read(Some(node.as_str())).unwrap();
        for chunk in readout.get(&node).unwrap() {
            indices.push(chunk.index);
            assert_eq!(daq.get_chunk(node.as_str(), chunk.index).unwrap().as_ref(), Some(chunk));
        }
    }
    assert_eq!(indices.len(), 3);
    assert!(indices.windows(2).all(|w| w[0] < w[1]));
}

#[test]
#[serial]
fn test_spectrum_of_demodulator() {
    let (_server, conn) = running();
    let mut fft = Module::create(&conn, ModuleKind::SpectrumZoomFft).unwrap();
    fft.set_parameter("grid/cols", Value::Integer(64)).unwrap();
    fft.set_parameter("window", Value::Integer(3)).unwrap();
    fft.subscribe("/dev1/demods/0/sample").unwrap();
    fft.execute().unwrap();
    assert!(fft.wait(WAIT));
    assert!(fft.last_error().is_none(), "{:?}", fft.last_error());

    let readout = fft.read(None).unwrap();
    let chunk = &readout.get(&path("/dev1/demods/0/sample")).unwrap()[0];
    assert!(chunk.header.flags.contains(ChunkFlags::SPECTRUM | ChunkFlags::FREQDOMAIN));
    let wave = &chunk.events[0].as_spectrum().unwrap()[0];
    assert_eq!(wave.data.len(), 64);
    assert_eq!(wave.header.window, SpectrumWindow::BlackmanHarris);
    // Demodulator rate defaults to 1 kSa/s.
    assert!((wave.header.rate - 1000.0).abs() < 10.0, "rate {}", wave.header.rate);
}

#[test]
fn test_invalid_window_fails_the_run() {
    let (_server, conn) = start(
        SimConfig::default()
            .manual()
            .with_device(SimDeviceConfig::mf("dev1").connected()),
    );
    let mut fft = Module::create(&conn, ModuleKind::SpectrumZoomFft).unwrap();
    fft.set_parameter("window", Value::Integer(7)).unwrap();
    fft.execute().unwrap();
    assert!(fft.wait(WAIT));
    assert!(fft.is_finished());
    assert!(fft.last_error().unwrap().contains("window"));
}

#[test]
fn test_save_results() {
    let (_server, conn) = start(SimConfig::default().manual().with_device(SimDeviceConfig::mf("dev1")));
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new().pretty(true));
    let mut pid = Module::create(&conn, ModuleKind::PidAdvisor).unwrap().with_store(store.clone());
    pid.set_parameter("directory", Value::String(dir.path().display().to_string()))
        .unwrap();
    pid.execute().unwrap();
    assert!(pid.wait(WAIT));

    let file = pid.save("bode").unwrap();
    assert_eq!(file, dir.path().join("bode.json"));
    let saved = store.load(&file).unwrap();
    assert_eq!(saved.module, "pidAdvisor");
    let live = pid.read(None).unwrap();
    assert_eq!(saved.readout.paths().collect::<Vec<_>>(), live.paths().collect::<Vec<_>>());
    assert_eq!(saved.readout.len(), 1);
    assert!(matches!(pid.save("../escape"), Err(ModuleError::Storage(_))));
}

#[test]
fn test_device_settings_save_and_load() {
    let (server, mut conn) = start(
        SimConfig::default()
            .manual()
            .with_device(SimDeviceConfig::mf("dev1").connected()),
    );
    let dir = tempfile::tempdir().unwrap();
    conn.sync_set_double("/dev1/oscs/0/freq", 12345.0).unwrap();

    let mut settings = Module::create(&conn, ModuleKind::DeviceSettings).unwrap();
    settings.set_parameter("device", Value::String("dev1".into())).unwrap();
    settings.set_parameter("directory", Value::String(dir.path().display().to_string()))
        .unwrap();
    settings.set_parameter("filename", Value::String("dev1".into())).unwrap();
    settings.execute().unwrap();
    assert!(settings.wait(WAIT));
    assert!(settings.last_error().is_none(), "{:?}", settings.last_error());

    let text = std::fs::read_to_string(dir.path().join("dev1.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["device"], "dev1");
    assert!(json["settings"].get("oscs/0/freq").is_some());
    assert!(json["settings"].get("features/serial").is_none());

    conn.sync_set_double("/dev1/oscs/0/freq", 1.0).unwrap();
    settings.set_parameter("command", Value::String("load".into())).unwrap();
    settings.execute().unwrap();
    assert!(settings.wait(WAIT));
    assert!(settings.last_error().is_none(), "{:?}", settings.last_error());
    assert_eq!(server.value("/dev1/oscs/0/freq"), Some(Value::Double(12345.0)));
}

#[test]
fn test_multi_device_sync_starts_devices() {
    let (server, conn) = start(
        SimConfig::default()
            .manual()
            .with_device(SimDeviceConfig::mf("dev1").connected())
            .with_device(SimDeviceConfig::mf("dev2").connected()),
    );
    let mut sync = Module::create(&conn, ModuleKind::MultiDeviceSync).unwrap();
    sync.set_parameter("devices", Value::String("dev1,dev2".into())).unwrap();
    sync.execute().unwrap();
    assert!(sync.wait(WAIT));
    assert!(sync.last_error().is_none(), "{:?}", sync.last_error());
    assert_eq!(server.value("/dev2/system/sync/start"), Some(Value::Integer(1)));
}
