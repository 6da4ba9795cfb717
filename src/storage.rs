//! # Counter Store
//!
//! Persistent counters behind the stat commands (`!cat`, `!catlevel`,
//! `!tlate`). Two independent namespaces, each persisted as one JSON mapping:
//!
//! - `cat`: user id -> [`CatViewRecord`]
//! - `lateness`: subject name -> [`LatenessRecord`]
//!
//! Loads fail open (missing or unreadable data is an empty mapping). Updates
//! are read-modify-write cycles serialized per namespace; a failed write is
//! logged and the in-memory value is kept for the rest of the process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A keyed mapping as stored on disk.
pub type Mapping<R> = BTreeMap<String, R>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Cat,
    Lateness,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Cat => "cat",
            Namespace::Lateness => "lateness",
        }
    }

    /// File names kept compatible with the JSON files the bot has always used.
    fn file_name(self) -> &'static str {
        match self {
            Namespace::Cat => "cat.json",
            Namespace::Lateness => "late.json",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many cat pictures a user has asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatViewRecord {
    pub username: String,
    #[serde(rename = "catViewCount")]
    pub view_count: u64,
}

impl CatViewRecord {
    /// Counts one view and takes the viewer's current username. Counts
    /// saturate at `u64::MAX`.
    pub fn record_view(&mut self, username: &str) {
        self.username = username.to_string();
        self.view_count = self.view_count.saturating_add(1);
    }
}

/// Running lateness tally for one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatenessRecord {
    pub total_minutes_late: u64,
    pub late_count: u64,
}

impl LatenessRecord {
    /// Adds one late arrival. Totals saturate instead of wrapping.
    pub fn record(&mut self, minutes: u64) {
        self.total_minutes_late = self.total_minutes_late.saturating_add(minutes);
        self.late_count = self.late_count.saturating_add(1);
    }
}

/// Storage medium for serialized namespaces.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Raw contents of the namespace, `None` when nothing was ever written.
    async fn read(&self, namespace: Namespace) -> Result<Option<String>>;

    async fn write(&self, namespace: Namespace, contents: String) -> Result<()>;
}

/// One pretty-printed JSON file per namespace inside `data_dir`.
pub struct JsonFileBackend {
    data_dir: PathBuf,
}

impl JsonFileBackend {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        info!("📁 Counter store at: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    fn path_for(&self, namespace: Namespace) -> PathBuf {
        self.data_dir.join(namespace.file_name())
    }
}

#[async_trait]
impl CounterBackend for JsonFileBackend {
    async fn read(&self, namespace: Namespace) -> Result<Option<String>> {
        let path = self.path_for(namespace);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn write(&self, namespace: Namespace, contents: String) -> Result<()> {
        let path = self.path_for(namespace);
        let tmp = path.with_extension("json.tmp");

        // Replace through a sibling file so readers never see a torn mapping.
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// In-memory state of one namespace. `None` until first loaded.
pub struct Ledger<R> {
    namespace: Namespace,
    state: Mutex<Option<Mapping<R>>>,
}

impl<R> Ledger<R> {
    fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            state: Mutex::new(None),
        }
    }
}

/// A record type bound to its namespace.
pub trait CounterRecord: Serialize + DeserializeOwned + Default + Clone + Send + 'static {
    const NAMESPACE: Namespace;

    fn ledger(store: &CounterStore) -> &Ledger<Self>;
}

impl CounterRecord for CatViewRecord {
    const NAMESPACE: Namespace = Namespace::Cat;

    fn ledger(store: &CounterStore) -> &Ledger<Self> {
        &store.cats
    }
}

impl CounterRecord for LatenessRecord {
    const NAMESPACE: Namespace = Namespace::Lateness;

    fn ledger(store: &CounterStore) -> &Ledger<Self> {
        &store.lateness
    }
}

pub struct CounterStore {
    backend: Box<dyn CounterBackend>,
    cats: Ledger<CatViewRecord>,
    lateness: Ledger<LatenessRecord>,
}

impl CounterStore {
    pub fn new(backend: impl CounterBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cats: Ledger::new(Namespace::Cat),
            lateness: Ledger::new(Namespace::Lateness),
        }
    }

    /// Current mapping of `R`'s namespace. Never fails: unreadable data is
    /// logged and treated as empty.
    pub async fn load<R: CounterRecord>(&self) -> Mapping<R> {
        let ledger = R::ledger(self);
        let mut state = ledger.state.lock().await;
        self.prime(ledger.namespace, &mut state).await.clone()
    }

    /// Record stored under `key`, if it was ever touched.
    pub async fn get<R: CounterRecord>(&self, key: &str) -> Option<R> {
        let ledger = R::ledger(self);
        let mut state = ledger.state.lock().await;
        self.prime(ledger.namespace, &mut state).await.get(key).cloned()
    }

    /// Applies `mutate` to the record at `key` (default-created when absent)
    /// and persists the whole namespace. Updates to one namespace are
    /// serialized; a failed write keeps the new value in memory.
    pub async fn update<R, F>(&self, key: &str, mutate: F) -> R
    where
        R: CounterRecord,
        F: FnOnce(&mut R),
    {
        let ledger = R::ledger(self);
        let mut state = ledger.state.lock().await;
        let mapping = self.prime(ledger.namespace, &mut state).await;

        let record = mapping.entry(key.to_string()).or_default();
        mutate(record);
        let updated = record.clone();

        if let Err(e) = self.persist(ledger.namespace, mapping).await {
            error!("💾 Could not persist {} counters: {:?}", ledger.namespace, e);
        }

        updated
    }

    async fn prime<'a, R: CounterRecord>(
        &self,
        namespace: Namespace,
        state: &'a mut Option<Mapping<R>>,
    ) -> &'a mut Mapping<R> {
        if state.is_none() {
            *state = Some(self.read_mapping(namespace).await);
        }
        state.get_or_insert_with(Mapping::new)
    }

    async fn read_mapping<R: CounterRecord>(&self, namespace: Namespace) -> Mapping<R> {
        let contents = match self.backend.read(namespace).await {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                debug!("No stored {} counters yet, starting empty", namespace);
                return Mapping::new();
            }
            Err(e) => {
                warn!("Error reading {} counters, starting empty: {:?}", namespace, e);
                return Mapping::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!("Error parsing {} counters, starting empty: {}", namespace, e);
                Mapping::new()
            }
        }
    }

    async fn persist<R: CounterRecord>(
        &self,
        namespace: Namespace,
        mapping: &Mapping<R>,
    ) -> crate::error::BotResult<()> {
        let contents = serde_json::to_string_pretty(mapping)
            .map_err(|e| crate::error::BotError::Persistence(e.to_string()))?;
        self.backend
            .write(namespace, contents)
            .await
            .map_err(|e| crate::error::BotError::Persistence(format!("{e:#}")))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend kept in memory, with switchable write failures.
    #[derive(Default)]
    pub struct MemoryBackend {
        files: parking_lot::Mutex<HashMap<Namespace, String>>,
        fail_writes: AtomicBool,
    }

    impl MemoryBackend {
        pub fn with_contents(namespace: Namespace, contents: &str) -> Self {
            let backend = Self::default();
            backend.files.lock().insert(namespace, contents.to_string());
            backend
        }

        pub fn failing() -> Self {
            let backend = Self::default();
            backend.fail_writes.store(true, Ordering::SeqCst);
            backend
        }
    }

    #[async_trait]
    impl CounterBackend for MemoryBackend {
        async fn read(&self, namespace: Namespace) -> Result<Option<String>> {
            tokio::task::yield_now().await;
            Ok(self.files.lock().get(&namespace).cloned())
        }

        async fn write(&self, namespace: Namespace, contents: String) -> Result<()> {
            // Give other tasks a chance to interleave with the write.
            tokio::task::yield_now().await;
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("disk unavailable");
            }
            self.files.lock().insert(namespace, contents);
            Ok(())
        }
    }
}
