//! Key-value persistence for settings and the run flag.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use pilot_core_types::{LogEntry, RunConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{to_writer_pretty, Map, Value};
use thiserror::Error;

pub const KEY_ALLOW_LISTED_DOMAIN: &str = "allowListedDomain";
pub const KEY_FORM_DEFAULTS: &str = "formDefaults";
pub const KEY_LOG_HISTORY: &str = "logHistory";
pub const KEY_RUN_IN_PROGRESS: &str = "runInProgress";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to (de)serialize '{key}': {reason}")]
    Serde { key: String, reason: String },
}

/// Synchronous key-value store. Every write is durable when the call returns.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Volatile store for tests and rehearsals.
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<Map<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

/// Store backed by one pretty-printed JSON document, rewritten on every write.
pub struct FileKvStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl FileKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&raw).map_err(|err| StoreError::Serde {
                    key: path.display().to_string(),
                    reason: err.to_string(),
                })?
            }
        } else {
            Map::new()
        };
        Ok(Arc::new(Self {
            path,
            data: Mutex::new(data),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, data: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            to_writer_pretty(&mut writer, data)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut guard = self.data.lock();
        guard.insert(key.to_string(), value);
        self.flush(&guard)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.data.lock();
        if guard.remove(key).is_some() {
            self.flush(&guard)?;
        }
        Ok(())
    }
}

/// Typed view over the persisted keys.
#[derive(Clone)]
pub struct PilotStore {
    kv: Arc<dyn KvStore>,
}

impl PilotStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryKvStore::new())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.kv.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| StoreError::Serde {
                    key: key.to_string(),
                    reason: err.to_string(),
                }),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|err| StoreError::Serde {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        self.kv.set(key, value)
    }

    pub fn allow_listed_domain(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .read::<String>(KEY_ALLOW_LISTED_DOMAIN)?
            .map(|domain| domain.trim().to_string())
            .filter(|domain| !domain.is_empty()))
    }

    pub fn set_allow_listed_domain(&self, domain: Option<&str>) -> Result<(), StoreError> {
        match domain.map(str::trim).filter(|d| !d.is_empty()) {
            Some(domain) => self.write(KEY_ALLOW_LISTED_DOMAIN, domain),
            None => self.kv.remove(KEY_ALLOW_LISTED_DOMAIN),
        }
    }

    pub fn form_defaults(&self) -> Result<Option<RunConfig>, StoreError> {
        self.read(KEY_FORM_DEFAULTS)
    }

    pub fn set_form_defaults(&self, config: &RunConfig) -> Result<(), StoreError> {
        self.write(KEY_FORM_DEFAULTS, config)
    }

    pub fn log_history(&self) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.read(KEY_LOG_HISTORY)?.unwrap_or_default())
    }

    pub fn set_log_history(&self, entries: &[LogEntry]) -> Result<(), StoreError> {
        self.write(KEY_LOG_HISTORY, entries)
    }

    pub fn run_in_progress(&self) -> Result<bool, StoreError> {
        Ok(self.read(KEY_RUN_IN_PROGRESS)?.unwrap_or(false))
    }

    pub fn set_run_in_progress(&self, in_progress: bool) -> Result<(), StoreError> {
        self.write(KEY_RUN_IN_PROGRESS, &in_progress)
    }
}
