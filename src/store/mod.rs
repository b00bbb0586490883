//! The store: shared storage plus per-context handles.
//!
//! A [`Store`] owns the version history, the optional on-disk commit log and
//! the notification manager. It is `Send + Sync` and shared through `Arc`.
//! Work happens through a [`StoreHandle`], which pins a snapshot for reading
//! or holds the write transaction.

mod handle;

pub use handle::{HandleConfig, StoreHandle};
pub(crate) use handle::ViewContext;

use crate::error::{Result, StoreError};
use crate::notifications::{
    NotificationManager, ObjectChanges, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};
use crate::schema::{ObjectSchema, Schema};
use crate::snapshot::{ChangeSet, ReadView, Snapshot, VersionedStore, WriteTransaction};
use crate::tables::Table;
use crate::types::{StoreStats, TableId, Version};
use crate::wal::{CommitEntry, CommitLog};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Object types. Leave empty to use the schema stored on disk.
    pub schema: Schema,

    /// Keep everything in memory and ignore `path`.
    pub in_memory: bool,

    /// fsync the commit log on every commit.
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
            schema: Schema::default(),
            in_memory: false,
            sync_on_commit: true,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"LKD\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const SCHEMA_FILE: &str = "schema.bin";
const LOG_FILE: &str = "commits.log";
const LOCK_FILE: &str = "LOCK";

/// An object store.
///
/// Provides a unified interface for:
/// - Opening, creating and locking the on-disk files
/// - Publishing commits (log first, then snapshot, then notifications)
/// - Subscribing to commit notifications
/// - Compacting the commit log
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access. None when in memory.
    _lock_file: Option<File>,

    schema: Arc<Schema>,

    /// Object type name to table.
    table_ids: HashMap<String, TableId>,

    versions: VersionedStore,

    /// Commit log. None when in memory.
    log: Option<CommitLog>,

    notifications: NotificationManager,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.in_memory {
            Self::in_memory(config.schema)
        } else if config.path.join(MANIFEST_FILE).exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// A store that lives only as long as the process.
    pub fn in_memory(schema: Schema) -> Result<Self> {
        schema.validate()?;
        let versions = VersionedStore::new(&schema);
        Ok(Self::assemble(
            StoreConfig {
                in_memory: true,
                schema: schema.clone(),
                ..Default::default()
            },
            None,
            schema,
            versions,
            None,
        ))
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        config.schema.validate()?;

        // Create directory structure
        fs::create_dir_all(&config.path)?;

        // Acquire lock
        let lock_file = Self::acquire_lock(&config.path)?;

        Self::write_manifest(&config.path)?;
        Self::write_schema(&config.path, &config.schema)?;

        let (log, _) = CommitLog::open(config.path.join(LOG_FILE), config.sync_on_commit)?;
        let schema = config.schema.clone();
        let versions = VersionedStore::new(&schema);

        info!(path = %config.path.display(), types = schema.objects.len(), "store created");
        Ok(Self::assemble(
            config,
            Some(lock_file),
            schema,
            versions,
            Some(log),
        ))
    }

    /// Open an existing store and replay its commit log.
    pub fn open(config: StoreConfig) -> Result<Self> {
        // Verify manifest
        Self::verify_manifest(&config.path)?;

        // Acquire lock
        let lock_file = Self::acquire_lock(&config.path)?;

        let stored = Self::read_schema(&config.path)?;
        let schema = if config.schema.objects.is_empty() {
            stored
        } else if config.schema == stored {
            config.schema.clone()
        } else {
            return Err(StoreError::SchemaMismatch);
        };
        schema.validate()?;

        let (log, entries) = CommitLog::open(config.path.join(LOG_FILE), config.sync_on_commit)?;
        let mut tables = Self::empty_tables(&schema);
        let mut version = Version(0);
        let mut next_key = 1;
        for entry in &entries {
            entry.apply(&mut tables)?;
            version = entry.version;
            next_key = next_key.max(entry.next_key);
        }
        let versions = VersionedStore::from_tables(tables, version, next_key);

        info!(
            path = %config.path.display(),
            version = version.0,
            entries = entries.len(),
            "store opened"
        );
        Ok(Self::assemble(
            config,
            Some(lock_file),
            schema,
            versions,
            Some(log),
        ))
    }

    fn assemble(
        config: StoreConfig,
        lock_file: Option<File>,
        schema: Schema,
        versions: VersionedStore,
        log: Option<CommitLog>,
    ) -> Self {
        let table_ids = schema
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name.clone(), TableId(i as u32)))
            .collect();
        Self {
            config,
            _lock_file: lock_file,
            schema: Arc::new(schema),
            table_ids,
            versions,
            log,
            notifications: NotificationManager::new(),
        }
    }

    fn empty_tables(schema: &Schema) -> Vec<Table> {
        schema
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| Table::new(TableId(i as u32), Arc::new(o.clone())))
            .collect()
    }

    /// A handle with default settings.
    pub fn handle(self: &Arc<Self>) -> StoreHandle {
        StoreHandle::new(Arc::clone(self))
    }

    /// A handle with explicit settings.
    pub fn handle_with(self: &Arc<Self>, config: HandleConfig) -> StoreHandle {
        StoreHandle::with_config(Arc::clone(self), config)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Table holding objects of `object_type`.
    pub fn table_id(&self, object_type: &str) -> Result<TableId> {
        self.table_ids
            .get(object_type)
            .copied()
            .ok_or_else(|| StoreError::UnknownObjectType(object_type.to_string()))
    }

    pub(crate) fn object_schema(&self, table: TableId) -> &ObjectSchema {
        &self.schema.objects[table.index()]
    }

    /// Latest committed version.
    pub fn version(&self) -> Version {
        self.versions.version()
    }

    /// Pin the latest committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.versions.begin_read()
    }

    pub(crate) fn versions(&self) -> &VersionedStore {
        &self.versions
    }

    /// Make a transaction durable and visible.
    ///
    /// The log entry is written before the snapshot is published, so a
    /// failed append leaves the store at its previous version.
    pub(crate) fn commit(&self, txn: WriteTransaction) -> Result<Arc<Snapshot>> {
        if let Some(log) = &self.log {
            let entry = CommitEntry::from_changes(
                txn.base_version().next(),
                txn.changes(),
                &txn,
                self.versions.next_key(),
            )?;
            log.append(&entry)?;
        }

        let (snapshot, changes) = self.versions.commit(txn)?;
        self.notifications
            .broadcast_commit(snapshot.version(), &self.describe(&changes));
        Ok(snapshot)
    }

    fn describe(&self, changes: &ChangeSet) -> Vec<ObjectChanges> {
        changes
            .iter()
            .map(|(table, c)| ObjectChanges {
                object_type: self.object_schema(table).name.clone(),
                inserted: c.inserted.iter().copied().collect(),
                modified: c.modified.iter().copied().collect(),
                deleted: c.deleted.iter().copied().collect(),
                cleared: c.cleared,
            })
            .collect()
    }

    // --- Notifications ---

    /// Receive an event for every later commit.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.notifications.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.notifications.unsubscribe(id)
    }

    // --- Store Operations ---

    /// Rewrite the commit log as a single checkpoint of the latest version.
    ///
    /// Fails with [`StoreError::WriteConflict`] while any handle has a write
    /// transaction open.
    pub fn compact(&self) -> Result<()> {
        let Some(log) = &self.log else {
            return Ok(());
        };
        let _permit = self
            .versions
            .try_acquire()
            .ok_or(StoreError::WriteConflict)?;
        let snapshot = self.versions.begin_read();
        let before = log.size_bytes()?;
        log.rewrite(&[CommitEntry::checkpoint(
            snapshot.as_ref(),
            self.versions.next_key(),
        )])?;
        info!(
            version = snapshot.version().0,
            before,
            after = log.size_bytes()?,
            "commit log compacted"
        );
        Ok(())
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let snapshot = self.versions.begin_read();
        Ok(StoreStats {
            version: snapshot.version(),
            object_count: snapshot.object_count(),
            table_count: snapshot.tables().len() as u64,
            pinned_versions: self.versions.pinned_versions(),
            log_size_bytes: match &self.log {
                Some(log) => log.size_bytes()?,
                None => 0,
            },
        })
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        if let Some(log) = &self.log {
            log.sync()?;
        }
        Ok(())
    }

    /// Get the store path. None when in memory.
    pub fn path(&self) -> Option<&Path> {
        (!self.config.in_memory).then_some(self.config.path.as_path())
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join(MANIFEST_FILE))?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    /// Schema as MessagePack followed by its CRC32.
    fn write_schema(path: &Path, schema: &Schema) -> Result<()> {
        let encoded = rmp_serde::to_vec(schema)?;
        let mut file = File::create(path.join(SCHEMA_FILE))?;
        file.write_all(&encoded)?;
        file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_schema(path: &Path) -> Result<Schema> {
        let mut data = Vec::new();
        File::open(path.join(SCHEMA_FILE))?.read_to_end(&mut data)?;
        if data.len() < 4 {
            return Err(StoreError::InvalidFormat("Schema file too short".into()));
        }

        let (encoded, crc) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let computed = crc32fast::hash(encoded);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }
        Ok(rmp_serde::from_slice(encoded)?)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        if let Err(e) = self.sync() {
            debug!(error = %e, "sync on drop failed");
        }
    }
}
