//! Persistence of module results

use crate::module::ModuleReadout;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
}

/// Results of one module as written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResult {
    /// Module kind name (`sweep`, `record`, ...)
    pub module: String,
    /// Milliseconds since the Unix epoch
    pub saved_at: u64,
    pub readout: ModuleReadout,
}

/// Where `Module::save` writes to
pub trait ResultStore: Send + Sync + Debug {
    /// Write `result` as `name` under `directory`; returns the file written.
    fn save(&self, directory: &Path, name: &str, result: &SavedResult) -> Result<PathBuf, StorageError>;

    fn load(&self, file: &Path) -> Result<SavedResult, StorageError>;
}

/// One JSON file per save, `<directory>/<name>.json`
#[derive(Debug, Clone, Default)]
pub struct JsonFileStore {
    pretty: bool,
}

impl JsonFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// `name` with a `.json` extension; path separators are rejected.
    pub fn file_name(name: &str) -> Result<String, StorageError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{}.json", name)
        })
    }
}

impl ResultStore for JsonFileStore {
    fn save(&self, directory: &Path, name: &str, result: &SavedResult) -> Result<PathBuf, StorageError> {
        let file = directory.join(Self::file_name(name)?);
        fs::create_dir_all(directory)?;
        let text = if self.pretty {
            serde_json::to_string_pretty(result)?
        } else {
            serde_json::to_string(result)?
        };
        fs::write(&file, text)?;
        info!(file = %file.display(), nodes = result.readout.len(), "Module results saved");
        Ok(file)
    }

    fn load(&self, file: &Path) -> Result<SavedResult, StorageError> {
        let text = fs::read_to_string(file)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ChunkHeader, ResultBuffer};
    use ziapi_protocol::{ChunkFlags, NodePath, Payload};

    fn sample_result() -> SavedResult {
        let mut buf = ResultBuffer::new();
        buf.push_chunk(
            NodePath::new("/dev1/demods/0/sample").unwrap(),
            ChunkHeader::new("record", 1, ChunkFlags::VALID | ChunkFlags::FINISHED),
            vec![Payload::DoubleScalar(vec![0.5, 1.5])],
        );
        SavedResult {
            module: "record".to_string(),
            saved_at: 1,
            readout: buf.readout(None),
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(JsonFileStore::file_name("run1").unwrap(), "run1.json");
        assert_eq!(JsonFileStore::file_name("run1.json").unwrap(), "run1.json");
        assert!(JsonFileStore::file_name("../x").is_err());
        assert!(JsonFileStore::file_name("  ").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");
        let store = JsonFileStore::new().pretty(true);
        let result = sample_result();

        let file = store.save(&target, "run", &result).unwrap();
        assert_eq!(file, target.join("run.json"));
        assert_eq!(store.load(&file).unwrap(), result);
    }
}
