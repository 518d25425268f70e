//! Device settings: save the settable node tree to a file and load it back

use crate::error::ModuleError;
use crate::module::{ChunkHeader, TaskContext};
use crate::storage::{JsonFileStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use ziapi_driver::{SetMode, Timeout};
use ziapi_protocol::{ByteArraySample, ListNodesFlags, NodePath, Payload, Value};

/// Settings file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    pub device: String,
    #[serde(default)]
    pub devtype: String,
    /// Values keyed by path relative to the device
    pub settings: BTreeMap<String, Value>,
}

impl SettingsFile {
    pub fn read(path: &Path) -> Result<Self, StorageError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Latest value carried by a change event.
fn payload_value(payload: &Payload) -> Option<Value> {
    let utf8 = |bytes: &[u8]| match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    };
    match payload {
        Payload::DoubleScalar(v) => v.last().map(|x| Value::Double(*x)),
        Payload::DoubleScalarTimed(v) => v.last().map(|s| Value::Double(s.value)),
        Payload::IntegerScalar(v) => v.last().map(|x| Value::Integer(*x)),
        Payload::IntegerScalarTimed(v) => v.last().map(|s| Value::Integer(s.value)),
        Payload::ComplexScalar(v) => v.last().map(|s| Value::Complex {
            real: s.real,
            imag: s.imag,
        }),
        Payload::ByteArray(bytes) => Some(utf8(bytes)),
        Payload::ByteArrayTimed(v) => v.last().map(|s: &ByteArraySample| utf8(&s.bytes)),
        _ => None,
    }
}

fn settings_path(ctx: &TaskContext<'_>) -> Result<PathBuf, ModuleError> {
    let params = ctx.params();
    let directory = params.str("directory")?;
    let name = JsonFileStore::file_name(params.str("filename")?)?;
    Ok(Path::new(directory).join(name))
}

fn device(ctx: &TaskContext<'_>) -> Result<String, ModuleError> {
    let device = ctx.params().str("device")?.trim().trim_matches('/').to_ascii_lowercase();
    if device.is_empty() || device.contains('/') {
        return Err(ModuleError::invalid_parameter("device", format!("{:?} is not a device", device)));
    }
    Ok(device)
}

fn save(ctx: &mut TaskContext<'_>, device: &str, file: &Path) -> Result<usize, ModuleError> {
    let root = format!("/{}", device);
    let base = NodePath::new(&root).map_err(ziapi_driver::ApiError::from)?;
    let flags = ListNodesFlags::RECURSIVE
        | ListNodesFlags::ABSOLUTE
        | ListNodesFlags::LEAVES_ONLY
        | ListNodesFlags::SETTINGS_ONLY;
    let nodes = ctx.conn().list_nodes(&root, flags)?.value;
    let devtype = ctx
        .conn()
        .get_string(&format!("{}/features/devtype", root))
        .unwrap_or_default();

    // Solicited values go to the queue ahead of anything polled later.
    ctx.drain()?;
    ctx.conn().request_value(&root)?;
    ctx.conn().sync()?;

    let mut settings = BTreeMap::new();
    while let Some(event) = ctx.conn().poll(Timeout::Immediate)?.value {
        if !nodes.contains(&event.path) {
            continue;
        }
        if let Some(value) = payload_value(&event.payload)
            && let Some(relative) = event.path.relative_to(&base)
        {
            settings.insert(relative, value);
        }
    }

    let count = settings.len();
    SettingsFile {
        device: device.to_string(),
        devtype,
        settings,
    }
    .write(file)?;
    info!(device, file = %file.display(), count, "Device settings saved");
    Ok(count)
}

fn load(ctx: &mut TaskContext<'_>, device: &str, file: &Path) -> Result<usize, ModuleError> {
    let saved = SettingsFile::read(file)?;
    if !saved.device.eq_ignore_ascii_case(device) {
        warn!(
            saved = %saved.device,
            device,
            "Loading settings saved from another device"
        );
    }
    let total = saved.settings.len().max(1) as f64;
    let mut applied = 0usize;
    for (i, (relative, value)) in saved.settings.into_iter().enumerate() {
        if ctx.should_stop() {
            break;
        }
        let path = format!("/{}/{}", device, relative);
        match ctx.conn().set(&path, value, SetMode::Sync) {
            Ok(_) => applied += 1,
            Err(e) => warn!(%path, "Setting not applied: {}", e),
        }
        ctx.set_progress((i + 1) as f64 / total);
    }
    info!(device, file = %file.display(), applied, "Device settings loaded");
    Ok(applied)
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let command = ctx.params().str("command")?.trim().to_ascii_lowercase();
    let device = device(ctx)?;
    let file = settings_path(ctx)?;

    let count = match command.as_str() {
        "save" => save(ctx, &device, &file)?,
        "load" => load(ctx, &device, &file)?,
        other => {
            return Err(ModuleError::invalid_parameter(
                "command",
                format!("expected save or load, got {:?}", other),
            ));
        },
    };

    // The path of the file written or read is the module's result.
    let result = NodePath::new(&format!("/{}/settings/{}", device, command)).map_err(ziapi_driver::ApiError::from)?;
    let flags = ctx.chunk_flags(true);
    let header = ChunkHeader::new(ctx.kind().name(), 1, flags);
    let summary = format!("{}\n{}", file.display(), count);
    ctx.push_chunk(result, header, vec![Payload::ByteArray(summary.into_bytes())]);
    Ok(())
}
