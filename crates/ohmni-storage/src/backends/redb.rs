//! Redb storage backend.
//!
//! Keeps device records and an append-only telemetry log in a redb embedded
//! database. All database work runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use ohmni_core::{ConnectionStatus, DeviceId, TelemetrySample};

use crate::error::{Error, Result};
use crate::repository::DeviceRepository;
use crate::telemetry::TelemetryStore;

// device id -> JSON-encoded ConnectionStatus
const DEVICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

// (device id, sequence) -> JSON-encoded TelemetrySample
const TELEMETRY_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("telemetry");

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const TELEMETRY_SEQ_KEY: &str = "telemetry_seq";

/// Configuration for [`RedbStore`].
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbStoreConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbStoreConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Throwaway database in the temp directory, removed on drop.
    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
        }
    }
}

/// Durable telemetry store and device repository.
pub struct RedbStore {
    db: Arc<Database>,
    path: String,
    temp_path: Option<PathBuf>,
}

impl RedbStore {
    pub fn new(config: RedbStoreConfig) -> Result<Self> {
        let (db, temp_path) = if config.path == ":memory:" {
            let temp_path = std::env::temp_dir().join(format!("ohmni_{}.redb", uuid::Uuid::new_v4()));
            (Database::create(&temp_path)?, Some(temp_path))
        } else {
            let path_ref = Path::new(&config.path);
            if config.create_dirs {
                if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
            }
            (Database::create(path_ref)?, None)
        };

        // Create every table up front so readers never hit a missing table.
        let txn = db.begin_write()?;
        {
            txn.open_table(DEVICES_TABLE)?;
            txn.open_table(TELEMETRY_TABLE)?;
            txn.open_table(META_TABLE)?;
        }
        txn.commit()?;

        tracing::debug!(path = %config.path, "Opened redb store");

        Ok(Self {
            db: Arc::new(db),
            path: config.path,
            temp_path,
        })
    }

    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbStoreConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    /// Temporary store, mostly for tests.
    pub fn memory() -> Result<Self> {
        Self::new(RedbStoreConfig::memory())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_persistent(&self) -> bool {
        self.temp_path.is_none()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

fn append_sample(db: &Database, sample: &TelemetrySample) -> Result<()> {
    let encoded = serde_json::to_vec(sample)?;
    let txn = db.begin_write()?;
    {
        let mut meta = txn.open_table(META_TABLE)?;
        let seq = meta
            .get(TELEMETRY_SEQ_KEY)?
            .map(|v| v.value())
            .unwrap_or(0)
            + 1;
        meta.insert(TELEMETRY_SEQ_KEY, seq)?;

        let mut telemetry = txn.open_table(TELEMETRY_TABLE)?;
        telemetry.insert((sample.device_id.as_str(), seq), encoded.as_slice())?;
    }
    txn.commit()?;
    Ok(())
}

type SampleRow<'a> = std::result::Result<
    (
        redb::AccessGuard<'a, (&'static str, u64)>,
        redb::AccessGuard<'a, &'static [u8]>,
    ),
    redb::StorageError,
>;

fn decode_rows<'a>(
    rows: impl Iterator<Item = SampleRow<'a>>,
    limit: usize,
) -> Result<Vec<TelemetrySample>> {
    let mut samples = Vec::new();
    for row in rows.take(limit) {
        let (_, value) = row?;
        samples.push(serde_json::from_slice(value.value())?);
    }
    Ok(samples)
}

/// Samples of one device in sequence order, newest first when `newest_first`.
fn read_samples(
    db: &Database,
    device_id: &str,
    newest_first: bool,
    limit: Option<usize>,
) -> Result<Vec<TelemetrySample>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(TELEMETRY_TABLE)?;
    let range = table.range((device_id, 0u64)..=(device_id, u64::MAX))?;
    let limit = limit.unwrap_or(usize::MAX);

    if newest_first {
        decode_rows(range.rev(), limit)
    } else {
        decode_rows(range, limit)
    }
}

fn delete_samples(db: &Database, device_id: &str) -> Result<usize> {
    let txn = db.begin_write()?;
    let removed = {
        let mut table = txn.open_table(TELEMETRY_TABLE)?;
        let mut seqs = Vec::new();
        for item in table.range((device_id, 0u64)..=(device_id, u64::MAX))? {
            let (key, _) = item?;
            seqs.push(key.value().1);
        }
        for seq in &seqs {
            table.remove((device_id, *seq))?;
        }
        seqs.len()
    };
    txn.commit()?;
    Ok(removed)
}

#[async_trait]
impl TelemetryStore for RedbStore {
    async fn append(&self, sample: TelemetrySample) -> Result<()> {
        self.blocking(move |db| append_sample(db, &sample)).await
    }

    async fn latest(&self, device_id: &str) -> Result<Option<TelemetrySample>> {
        let device_id = device_id.to_string();
        let mut samples = self
            .blocking(move |db| read_samples(db, &device_id, true, Some(1)))
            .await?;
        Ok(samples.pop())
    }

    async fn all(&self, device_id: &str) -> Result<Option<Vec<TelemetrySample>>> {
        let device_id = device_id.to_string();
        let samples = self
            .blocking(move |db| read_samples(db, &device_id, false, None))
            .await?;
        Ok(if samples.is_empty() { None } else { Some(samples) })
    }

    async fn remove(&self, device_id: &str) -> Result<usize> {
        let device_id = device_id.to_string();
        self.blocking(move |db| delete_samples(db, &device_id)).await
    }

    fn kind(&self) -> &'static str {
        "redb"
    }
}

#[async_trait]
impl DeviceRepository for RedbStore {
    async fn find_device(&self, device_id: &str) -> Result<Option<ConnectionStatus>> {
        let device_id = device_id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(DEVICES_TABLE)?;
            match table.get(device_id.as_str())? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        connected: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if device_id.is_empty() {
            return Err(Error::InvalidInput("empty device id".to_string()));
        }
        let status = ConnectionStatus {
            device_id: DeviceId::from(device_id),
            connected,
            last_seen,
        };
        self.blocking(move |db| {
            let encoded = serde_json::to_vec(&status)?;
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(DEVICES_TABLE)?;
                table.insert(status.device_id.as_str(), encoded.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_telemetry(&self, sample: &TelemetrySample) -> Result<()> {
        let sample = sample.clone();
        self.blocking(move |db| append_sample(db, &sample)).await
    }

    async fn query_telemetry(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetrySample>> {
        let device_id = device_id.to_string();
        self.blocking(move |db| read_samples(db, &device_id, true, Some(limit)))
            .await
    }

    async fn delete_device(&self, device_id: &str) -> Result<bool> {
        let device_id = device_id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let existed = {
                let mut table = txn.open_table(DEVICES_TABLE)?;
                let removed = table.remove(device_id.as_str())?;
                removed.is_some()
            };
            txn.commit()?;
            let samples = delete_samples(db, &device_id)?;
            Ok(existed || samples > 0)
        })
        .await
    }

    async fn list_devices(&self) -> Result<Vec<ConnectionStatus>> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(DEVICES_TABLE)?;
            let mut devices = Vec::new();
            for item in table.iter()? {
                let (_, value) = item?;
                devices.push(serde_json::from_slice::<ConnectionStatus>(value.value())?);
            }
            Ok(devices)
        })
        .await
    }
}

impl Drop for RedbStore {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if let Err(e) = std::fs::remove_file(temp_path) {
                tracing::debug!(
                    "Failed to remove temporary database file {}: {}",
                    temp_path.display(),
                    e
                );
            }
        }
    }
}
