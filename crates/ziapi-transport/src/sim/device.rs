//! Simulated instruments and their node trees

use super::tree::{Limits, NodeTree, StreamKind};
use ziapi_protocol::{NodePath, Value, VectorElements};

/// Instrument family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    Hf2,
    Mf,
    Uhf,
}

impl DeviceFamily {
    pub fn devtype(self) -> &'static str {
        match self {
            DeviceFamily::Hf2 => "HF2LI",
            DeviceFamily::Mf => "MFLI",
            DeviceFamily::Uhf => "UHFLI",
        }
    }

    /// Ticks per second of the device clock
    pub fn clockbase(self) -> f64 {
        match self {
            DeviceFamily::Hf2 => 210e6,
            DeviceFamily::Mf => 60e6,
            DeviceFamily::Uhf => 1.8e9,
        }
    }

    pub fn max_frequency(self) -> f64 {
        match self {
            DeviceFamily::Hf2 => 50e6,
            DeviceFamily::Mf => 5e6,
            DeviceFamily::Uhf => 600e6,
        }
    }

    pub fn demod_count(self) -> u8 {
        match self {
            DeviceFamily::Hf2 => 6,
            DeviceFamily::Mf => 4,
            DeviceFamily::Uhf => 8,
        }
    }

    pub fn osc_count(self) -> u8 {
        match self {
            DeviceFamily::Hf2 => 2,
            DeviceFamily::Mf => 1,
            DeviceFamily::Uhf => 2,
        }
    }

    /// HF2 devices have no preset support
    pub fn has_presets(self) -> bool {
        self != DeviceFamily::Hf2
    }
}

/// Configuration of one simulated instrument
#[derive(Debug, Clone, PartialEq)]
pub struct SimDeviceConfig {
    pub serial: String,
    pub family: DeviceFamily,
    /// Installed options, e.g. `PID`, `IA`
    pub options: Vec<String>,
    /// Physical interfaces, first one preferred
    pub interfaces: Vec<String>,
    /// API level advertised through discovery
    pub api_level: u8,
    /// Interface the device is connected on at server start
    pub connected: Option<String>,
    pub discoverable: bool,
}

impl SimDeviceConfig {
    pub fn new(serial: impl Into<String>, family: DeviceFamily) -> Self {
        let interfaces = match family {
            DeviceFamily::Hf2 => vec!["USB".to_string()],
            _ => vec!["1GbE".to_string(), "USB".to_string()],
        };
        Self {
            serial: serial.into().to_ascii_lowercase(),
            family,
            options: vec!["PID".to_string(), "IA".to_string()],
            interfaces,
            api_level: if family == DeviceFamily::Hf2 { 1 } else { 6 },
            connected: None,
            discoverable: true,
        }
    }

    pub fn mf(serial: impl Into<String>) -> Self {
        Self::new(serial, DeviceFamily::Mf)
    }

    pub fn uhf(serial: impl Into<String>) -> Self {
        Self::new(serial, DeviceFamily::Uhf)
    }

    pub fn hf2(serial: impl Into<String>) -> Self {
        Self::new(serial, DeviceFamily::Hf2)
    }

    pub fn with_api_level(mut self, level: u8) -> Self {
        self.api_level = level;
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Mark the device as connected on its first interface.
    pub fn connected(mut self) -> Self {
        self.connected = self.interfaces.first().cloned();
        self
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }
}

fn path(serial: &str, tail: &str) -> Option<NodePath> {
    NodePath::new(&format!("/{}/{}", serial, tail)).ok()
}

/// Build the node tree of `dev` into `tree`.
pub fn populate(dev: &SimDeviceConfig, tree: &mut NodeTree) {
    let s = dev.serial.as_str();
    let family = dev.family;

    let setting = |tree: &mut NodeTree, tail: &str, value: Value, limits: Option<Limits>| {
        if let Some(p) = path(s, tail) {
            tree.insert_setting(p, value, limits);
        }
    };

    // Identity and clock
    if let Some(p) = path(s, "clockbase") {
        tree.insert_read_only(p, Value::Double(family.clockbase()));
    }
    if let Some(p) = path(s, "features/devtype") {
        tree.insert_read_only(p, Value::String(family.devtype().to_string()));
    }
    if let Some(p) = path(s, "features/options") {
        tree.insert_read_only(p, Value::String(dev.options.join("\n")));
    }
    if let Some(p) = path(s, "features/serial") {
        tree.insert_read_only(p, Value::String(s.to_string()));
    }

    // System
    setting(tree, "system/sync/start", Value::Integer(0), Some(Limits::new(0.0, 1.0)));
    if family.has_presets() {
        setting(tree, "system/preset/index", Value::Integer(0), Some(Limits::new(0.0, 15.0)));
        setting(tree, "system/preset/load", Value::Integer(0), Some(Limits::new(0.0, 1.0)));
        if let Some(p) = path(s, "system/preset/busy") {
            tree.insert_read_only(p, Value::Integer(0));
        }
    }

    // Oscillators
    for osc in 0..family.osc_count() {
        setting(
            tree,
            &format!("oscs/{osc}/freq"),
            Value::Double(100e3),
            Some(Limits::new(0.0, family.max_frequency())),
        );
    }

    // Demodulators (only demod 0 enabled by default)
    for d in 0..family.demod_count() {
        setting(
            tree,
            &format!("demods/{d}/enable"),
            Value::Integer(i64::from(d == 0)),
            Some(Limits::new(0.0, 1.0)),
        );
        setting(
            tree,
            &format!("demods/{d}/rate"),
            Value::Double(1_000.0),
            Some(Limits::new(1.0, 1.0e6)),
        );
        setting(
            tree,
            &format!("demods/{d}/timeconstant"),
            Value::Double(1e-3),
            Some(Limits::new(1e-7, 500.0)),
        );
        setting(
            tree,
            &format!("demods/{d}/order"),
            Value::Integer(3),
            Some(Limits::new(1.0, 8.0)),
        );
        setting(
            tree,
            &format!("demods/{d}/oscselect"),
            Value::Integer(0),
            Some(Limits::new(0.0, f64::from(family.osc_count() - 1))),
        );
        setting(
            tree,
            &format!("demods/{d}/harmonic"),
            Value::Integer(1),
            Some(Limits::new(1.0, 1023.0)),
        );
        setting(tree, &format!("demods/{d}/phaseshift"), Value::Double(0.0), None);
        if let Some(p) = path(s, &format!("demods/{d}/sample")) {
            tree.insert_stream(p, StreamKind::Demod(d));
        }
    }

    // Signal output
    setting(tree, "sigouts/0/on", Value::Integer(1), Some(Limits::new(0.0, 1.0)));
    setting(
        tree,
        "sigouts/0/amplitude",
        Value::Double(0.5),
        Some(Limits::new(-1.0, 1.0)),
    );
    setting(tree, "sigouts/0/range", Value::Double(1.0), Some(Limits::new(0.01, 10.0)));

    // Auxiliary inputs, DIO, counters, triggers
    setting(tree, "auxins/0/averaging", Value::Integer(0), Some(Limits::new(0.0, 15.0)));
    if let Some(p) = path(s, "auxins/0/sample") {
        tree.insert_stream(p, StreamKind::AuxIn(0));
    }
    setting(tree, "dios/0/output", Value::Integer(0), Some(Limits::new(0.0, 4_294_967_295.0)));
    if let Some(p) = path(s, "dios/0/input") {
        tree.insert_stream(p, StreamKind::Dio(0));
    }
    setting(tree, "cnts/0/enable", Value::Integer(0), Some(Limits::new(0.0, 1.0)));
    if let Some(p) = path(s, "cnts/0/sample") {
        tree.insert_stream(p, StreamKind::Counter(0));
    }
    if let Some(p) = path(s, "triggers/in/0/sample") {
        tree.insert_stream(p, StreamKind::Trigger(0));
    }

    // PID controllers
    if dev.has_option("PID") {
        for pid in 0..2u8 {
            setting(tree, &format!("pids/{pid}/enable"), Value::Integer(0), Some(Limits::new(0.0, 1.0)));
            setting(tree, &format!("pids/{pid}/setpoint"), Value::Double(0.0), None);
            setting(tree, &format!("pids/{pid}/p"), Value::Double(1.0), None);
            setting(tree, &format!("pids/{pid}/i"), Value::Double(10.0), None);
            setting(tree, &format!("pids/{pid}/d"), Value::Double(0.0), None);
            setting(tree, &format!("pids/{pid}/center"), Value::Double(100e3), None);
            setting(tree, &format!("pids/{pid}/limitlower"), Value::Double(-1e3), None);
            setting(tree, &format!("pids/{pid}/limitupper"), Value::Double(1e3), None);
            setting(tree, &format!("pids/{pid}/output"), Value::Integer(0), Some(Limits::new(0.0, 7.0)));
            setting(tree, &format!("pids/{pid}/outputchannel"), Value::Integer(0), Some(Limits::new(0.0, 3.0)));
            setting(tree, &format!("pids/{pid}/phaseunwrap"), Value::Integer(0), Some(Limits::new(0.0, 1.0)));
            if let Some(p) = path(s, &format!("pids/{pid}/value")) {
                tree.insert_stream(p, StreamKind::PidValue(pid));
            }
        }
    }

    // Scope
    setting(tree, "scopes/0/enable", Value::Integer(0), Some(Limits::new(0.0, 1.0)));
    setting(tree, "scopes/0/length", Value::Integer(2048), Some(Limits::new(16.0, 16_384.0)));
    setting(tree, "scopes/0/channel", Value::Integer(1), Some(Limits::new(1.0, 3.0)));
    if let Some(p) = path(s, "scopes/0/wave") {
        tree.insert_stream(p, StreamKind::Scope(0));
    }

    // Impedance analyser
    if dev.has_option("IA") && family == DeviceFamily::Mf {
        setting(tree, "imps/0/enable", Value::Integer(0), Some(Limits::new(0.0, 1.0)));
        if let Some(p) = path(s, "imps/0/sample") {
            tree.insert_stream(p, StreamKind::Impedance(0));
        }
    }

    // AWG waveform memory
    if family == DeviceFamily::Uhf {
        if let Some(p) = path(s, "awgs/0/waveform/waves/0") {
            tree.insert_vector(p, VectorElements::Double(Vec::new()));
        }
        if let Some(p) = path(s, "awgs/0/elf/data") {
            tree.insert_vector(p, VectorElements::U8(Vec::new()));
        }
    }
}
