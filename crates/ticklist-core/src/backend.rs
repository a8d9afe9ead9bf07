use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::Config;
use crate::datastore::{self, FileSlotStore, SlotStore, TODOS_KEY};
use crate::remote::{RestTable, TodoTable};
use crate::todo::Todo;

/// Whole-collection persistence into one durable slot.
#[derive(Clone)]
pub struct LocalDurable {
    slot: Arc<dyn SlotStore>,
    key: String,
}

impl LocalDurable {
    pub fn new(slot: Arc<dyn SlotStore>) -> Self {
        Self::with_key(slot, TODOS_KEY)
    }

    pub fn with_key(slot: Arc<dyn SlotStore>, key: impl Into<String>) -> Self {
        Self {
            slot,
            key: key.into(),
        }
    }

    pub fn load(&self) -> Vec<Todo> {
        datastore::load_todos(self.slot.as_ref(), &self.key)
    }

    pub fn save(&self, todos: &[Todo]) -> anyhow::Result<()> {
        datastore::save_todos(self.slot.as_ref(), &self.key, todos)
    }
}

/// Row-per-record persistence in a remote table.
#[derive(Clone)]
pub struct RemoteBackend {
    table: Arc<dyn TodoTable>,
}

impl RemoteBackend {
    pub fn new(table: Arc<dyn TodoTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> Arc<dyn TodoTable> {
        Arc::clone(&self.table)
    }

    /// Remote failures at startup fall back to an empty list.
    pub async fn load(&self) -> Vec<Todo> {
        match self.table.fetch_all().await {
            Ok(todos) => todos,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed fetching remote todos; starting empty");
                Vec::new()
            }
        }
    }
}

/// The persistence strategy for a session, chosen once at startup.
#[derive(Clone)]
pub enum PersistenceBackend {
    LocalDurable(LocalDurable),
    Remote(RemoteBackend),
}

impl PersistenceBackend {
    #[tracing::instrument(skip(cfg, data_dir))]
    pub fn from_config(cfg: &Config, data_dir: &Path) -> anyhow::Result<Self> {
        if let Some(settings) = cfg.remote_settings()? {
            let table = RestTable::new(&settings).context("failed configuring remote store")?;
            info!(
                url = %settings.url,
                table = %settings.table,
                owner = %settings.owner,
                "using remote persistence"
            );
            return Ok(Self::Remote(RemoteBackend::new(Arc::new(table))));
        }

        let slot = FileSlotStore::open(data_dir)?;
        info!(data_dir = %data_dir.display(), "remote store not configured; using local persistence");
        Ok(Self::LocalDurable(LocalDurable::new(Arc::new(slot))))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalDurable(_) => "local",
            Self::Remote(_) => "remote",
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub async fn load(&self) -> Vec<Todo> {
        match self {
            Self::LocalDurable(local) => local.load(),
            Self::Remote(remote) => remote.load().await,
        }
    }
}
