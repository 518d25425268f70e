//! Poll demodulator samples
//!
//! Subscribes one demodulator, polls for a fixed time and prints the mean R
//! of every event. Without `--host` an in-process simulated Data Server is used.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ziapi_sdk::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "poll_demod")]
#[command(about = "Subscribe a demodulator and print the mean magnitude of each event")]
struct Args {
    /// Data Server host (simulated server when omitted)
    #[arg(long)]
    host: Option<String>,

    #[arg(long, default_value = "8004")]
    port: u16,

    #[arg(long, default_value = "dev1234")]
    device: String,

    #[arg(long, default_value = "0")]
    demod: u32,

    /// Poll duration in seconds
    #[arg(long, default_value = "1.0")]
    duration: f64,
}

fn main() -> Result<()> {
    init_logger(DebugLevel::Info)?;
    let args = Args::parse();

    let mut builder = ConnectionBuilder::new();
    let _sim = match &args.host {
        Some(host) => {
            builder = builder.host(host.clone(), args.port);
            None
        },
        None => {
            let network = SimNetwork::new();
            let server = SimServer::start(SimConfig::default().with_device(SimDeviceConfig::mf(&args.device)));
            network.register(Endpoint::localhost(args.port), server.clone());
            builder = builder.endpoint(Endpoint::localhost(args.port)).connector(Arc::new(network.connector()));
            Some(server)
        },
    };

    let mut conn = builder.open()?;
    println!("Connected at API level {:?}", conn.api_level());
    if args.host.is_none() {
        conn.connect_device(&args.device, "1GbE", "")?;
    }

    let device = args.device.to_ascii_lowercase();
    conn.set_integer(&format!("/{}/demods/{}/enable", device, args.demod), 1)?;
    conn.sync()?;
    let sample_path = format!("/{}/demods/{}/sample", device, args.demod);
    conn.subscribe(&sample_path)?;

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration);
    let mut total = 0usize;
    while Instant::now() < deadline {
        let outcome = conn.poll(Timeout::After(Duration::from_millis(100)))?;
        if let Some(warning) = outcome.warning {
            println!("warning: {:?}", warning);
        }
        let Some(event) = outcome.value else { continue };
        if let Some(samples) = event.payload.as_demod() {
            let mean_r = samples.iter().map(|s| s.x.hypot(s.y)).sum::<f64>() / samples.len().max(1) as f64;
            total += samples.len();
            println!("{}: {} samples, mean R = {:.6e} V", event.path, samples.len(), mean_r);
        }
    }

    conn.unsubscribe(&sample_path)?;
    println!("{} samples in {:.1} s", total, args.duration);
    Ok(())
}
