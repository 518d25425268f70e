//! Record scope shots with the scope module
//!
//! Runs against an in-process simulated Data Server and prints per-shot
//! statistics. Ctrl-C stops recording and keeps the shots taken so far.

use anyhow::{Result, bail};
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use ziapi_sdk::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "scope_shots")]
#[command(about = "Record scope shots through the scope module")]
struct Args {
    /// Samples per shot
    #[arg(long, default_value = "4096")]
    length: i64,

    /// Number of shots
    #[arg(long, default_value = "4")]
    shots: i64,
}

fn main() -> Result<()> {
    init_logger(DebugLevel::Warning)?;
    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    let network = SimNetwork::new();
    let server = SimServer::start(SimConfig::default().with_device(SimDeviceConfig::uhf("dev2001").connected()));
    network.register(Endpoint::localhost(8004), server.clone());
    let mut conn = ConnectionBuilder::new()
        .endpoint(Endpoint::localhost(8004))
        .connector(Arc::new(network.connector()))
        .open()?;

    conn.set_integer("/dev2001/scopes/0/length", args.length)?;
    conn.set_integer("/dev2001/scopes/0/enable", 1)?;

    let mut scope = Module::create(&conn, ModuleKind::ScopeAssembler)?;
    scope.set_parameter("averager/count", Value::Integer(args.shots))?;
    scope.subscribe("/dev2001/scopes/0/wave")?;
    scope.execute()?;

    while !scope.wait(Duration::from_millis(200)) {
        if !running.load(Ordering::SeqCst) {
            scope.finish()?;
        }
        println!("progress {:.0}%", scope.progress() * 100.0);
    }
    if let Some(err) = scope.last_error() {
        bail!("scope module failed: {}", err);
    }

    let readout = scope.read(None)?;
    for (path, chunks) in readout.iter() {
        for chunk in chunks {
            let samples: Vec<f64> = chunk
                .events
                .iter()
                .filter_map(Payload::as_scope)
                .flatten()
                .flat_map(|block| (0..block.data.len()).filter_map(|i| block.data.get_f64(i)))
                .collect();
            let n = samples.len().max(1) as f64;
            let mean = samples.iter().sum::<f64>() / n;
            let rms = (samples.iter().map(|s| s * s).sum::<f64>() / n).sqrt();
            println!(
                "{} shot {}: {} samples, mean {:.4}, rms {:.4}",
                path,
                chunk.header.trigger_number,
                samples.len(),
                mean,
                rms
            );
        }
    }
    Ok(())
}
