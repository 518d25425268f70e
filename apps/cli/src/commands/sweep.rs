//! Frequency sweep through the sweeper module

use crate::commands::config::CliConfig;
use crate::session::{ServerArgs, device, interrupt_flag};
use anyhow::{Result, bail};
use clap::Args;
use std::sync::atomic::Ordering;
use std::time::Duration;
use ziapi_sdk::prelude::*;
use ziapi_sdk::protocol::SweeperData;

#[derive(Args, Debug)]
pub struct SweepCommand {
    #[arg(long)]
    pub device: Option<String>,

    /// Start frequency in Hz
    #[arg(long, default_value_t = 1e3)]
    pub start: f64,

    /// Stop frequency in Hz
    #[arg(long, default_value_t = 1e5)]
    pub stop: f64,

    #[arg(long, default_value_t = 20)]
    pub points: i64,

    /// Logarithmic grid
    #[arg(long)]
    pub log: bool,

    /// Demodulator to record
    #[arg(long, default_value_t = 0)]
    pub demod: u32,

    /// Oscillator to sweep
    #[arg(long, default_value_t = 0)]
    pub osc: u32,

    /// Settling time per point in seconds
    #[arg(long, default_value_t = 0.0)]
    pub settling: f64,

    /// Samples averaged per point
    #[arg(long, default_value_t = 1)]
    pub averaging: i64,
}

impl SweepCommand {
    pub fn execute(&self, server: &ServerArgs, config: &CliConfig) -> Result<()> {
        let device = device(self.device.clone(), config)?;
        let running = interrupt_flag()?;
        let mut conn = server.connect(config)?;
        conn.set_integer(&format!("/{}/demods/{}/enable", device, self.demod), 1)?;
        conn.sync()?;

        let mut sweep = Module::create(&conn, ModuleKind::Sweeper)?;
        sweep.set_parameter("gridnode", Value::String(format!("/{}/oscs/{}/freq", device, self.osc)))?;
        sweep.set_parameter("start", Value::Double(self.start))?;
        sweep.set_parameter("stop", Value::Double(self.stop))?;
        sweep.set_parameter("samplecount", Value::Integer(self.points))?;
        sweep.set_parameter("xmapping", Value::Integer(i64::from(self.log)))?;
        sweep.set_parameter("settling/time", Value::Double(self.settling))?;
        sweep.set_parameter("averaging/sample", Value::Integer(self.averaging))?;
        let sample = format!("/{}/demods/{}/sample", device, self.demod);
        sweep.subscribe(&sample)?;
        sweep.execute()?;

        while !sweep.wait(Duration::from_millis(250)) {
            if !running.load(Ordering::SeqCst) {
                sweep.finish()?;
            }
            eprint!("\rprogress {:>3.0}%", sweep.progress() * 100.0);
        }
        eprintln!();
        if let Some(err) = sweep.last_error() {
            bail!("Sweep failed: {}", err);
        }
        if sweep.stopped_early() {
            eprintln!("Sweep interrupted, showing partial result");
        }

        let readout = sweep.read(None)?;
        let path = NodePath::new(&sample)?;
        let waves = readout
            .get(&path)
            .into_iter()
            .flatten()
            .flat_map(|chunk| chunk.events.iter())
            .filter_map(Payload::as_sweeper)
            .flatten();
        println!("{:>14} {:>14} {:>10}", "frequency/Hz", "R/V", "phase/deg");
        for wave in waves {
            if let SweeperData::Demod(points) = &wave.data {
                for p in points {
                    println!("{:>14.3} {:>14.6e} {:>10.2}", p.grid, p.r.avg, p.phase.avg.to_degrees());
                }
            }
        }
        Ok(())
    }
}
