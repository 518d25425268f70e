//! Subscribe nodes and print incoming events

use crate::commands::config::CliConfig;
use crate::session::{ServerArgs, interrupt_flag};
use anyhow::Result;
use clap::Args;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use ziapi_sdk::prelude::*;

#[derive(Args, Debug)]
pub struct PollCommand {
    /// Node path or wildcard pattern, repeatable
    #[arg(short, long = "path", required = true)]
    pub paths: Vec<String>,

    /// Poll duration in seconds, 0 polls until Ctrl-C
    #[arg(short, long, default_value_t = 1.0)]
    pub duration: f64,

    /// Timeout of a single poll in milliseconds
    #[arg(long, default_value_t = 100)]
    pub timeout_ms: u64,
}

impl PollCommand {
    pub fn execute(&self, server: &ServerArgs, config: &CliConfig) -> Result<()> {
        let running = interrupt_flag()?;
        let mut conn = server.connect(config)?;
        for path in &self.paths {
            conn.subscribe(path)?;
        }

        let deadline = (self.duration > 0.0).then(|| Instant::now() + Duration::from_secs_f64(self.duration));
        let mut events = 0usize;
        while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
            let outcome = conn.poll(Timeout::After(Duration::from_millis(self.timeout_ms)))?;
            if let Some(warning) = outcome.warning {
                eprintln!("warning: {:?}", warning);
            }
            if let Some(event) = outcome.value {
                events += 1;
                println!("{}", summarize(&event));
            }
        }

        for path in &self.paths {
            conn.unsubscribe(path)?;
        }
        println!("{} events", events);
        Ok(())
    }
}

/// One line describing `event`.
pub fn summarize(event: &Event) -> String {
    let detail = match &event.payload {
        Payload::DemodSample(samples) => {
            let r = samples.iter().map(|s| s.x.hypot(s.y)).sum::<f64>() / samples.len().max(1) as f64;
            format!("mean R {:.6e}", r)
        },
        Payload::DoubleScalar(v) => v.last().map(|v| format!("value {}", v)).unwrap_or_default(),
        Payload::DoubleScalarTimed(v) => v.last().map(|s| format!("value {}", s.value)).unwrap_or_default(),
        Payload::IntegerScalar(v) => v.last().map(|v| format!("value {}", v)).unwrap_or_default(),
        Payload::IntegerScalarTimed(v) => v.last().map(|s| format!("value {}", s.value)).unwrap_or_default(),
        Payload::ScopeWave(blocks) => {
            let samples: u64 = blocks.iter().map(|b| u64::from(b.sample_count)).sum();
            format!("{} samples", samples)
        },
        _ => String::new(),
    };
    format!("{} {:?} x{} {}", event.path, event.kind(), event.count(), detail)
        .trim_end()
        .to_string()
}
