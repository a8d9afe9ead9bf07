use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::todo::Todo;

/// Slot key holding the serialized collection.
pub const TODOS_KEY: &str = "todos";

/// Durable key-value slots. Each value is written wholesale.
pub trait SlotStore: Send + Sync {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per slot inside `data_dir`.
#[derive(Debug)]
pub struct FileSlotStore {
    pub data_dir: PathBuf,
}

impl FileSlotStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened slot store");
        Ok(Self { data_dir })
    }

    pub fn slot_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl SlotStore for FileSlotStore {
    #[tracing::instrument(skip(self))]
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.slot_path(key);
        if !path.exists() {
            debug!(file = %path.display(), "slot file absent");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.slot_path(key);
        debug!(file = %path.display(), "writing slot atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir).with_context(|| {
            format!("failed to create temp file in {}", self.data_dir.display())
        })?;
        temp.write_all(value.as_bytes())
            .with_context(|| format!("failed writing temp file in {}", self.data_dir.display()))?;
        temp.flush()
            .with_context(|| format!("failed flushing temp file in {}", self.data_dir.display()))?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }
}

/// Process-local slots; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for MemorySlotStore {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Reads the collection from `key`. Absent, blank or corrupt slots all come
/// back as an empty list; only the corrupt case is worth a warning.
#[tracing::instrument(skip(slot))]
pub fn load_todos(slot: &dyn SlotStore, key: &str) -> Vec<Todo> {
    let raw = match slot.read(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "failed reading todo slot; starting empty");
            return Vec::new();
        }
    };

    if raw.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<Todo>>(&raw) {
        Ok(todos) => {
            debug!(count = todos.len(), "loaded todos from slot");
            todos
        }
        Err(err) => {
            warn!(error = %err, "failed parsing todo slot; starting empty");
            Vec::new()
        }
    }
}

#[tracing::instrument(skip(slot, todos), fields(count = todos.len()))]
pub fn save_todos(slot: &dyn SlotStore, key: &str, todos: &[Todo]) -> anyhow::Result<()> {
    let serialized = serde_json::to_string(todos).context("failed serializing todos")?;
    slot.write(key, &serialized)
        .with_context(|| format!("failed writing slot {key}"))
}
