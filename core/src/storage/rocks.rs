use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::journal::{JournalError, TransferJournal};
use super::registry::{InstitutionRecord, InstitutionRegistry, RegistryError};
use crate::settlement::state::{TransferId, TransferRecord};

const CF_INSTITUTIONS: &str = "institutions";
const CF_TRANSFERS: &str = "transfers";

/// RocksDB-backed registry and journal. Values are JSON.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Opens the database at the specified path, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = vec![
            ColumnFamilyDescriptor::new(CF_INSTITUTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), families)
            .with_context(|| format!("Failed to open RocksDB at {}", path.as_ref().display()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, String> {
        let handle = self
            .db
            .cf_handle(cf)
            .ok_or_else(|| format!("column family '{}' missing", cf))?;
        match self.db.get_cf(handle, key).map_err(|e| e.to_string())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| e.to_string()),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<(), String> {
        let handle = self
            .db
            .cf_handle(cf)
            .ok_or_else(|| format!("column family '{}' missing", cf))?;
        let bytes = serde_json::to_vec(value).map_err(|e| e.to_string())?;
        self.db.put_cf(handle, key, bytes).map_err(|e| e.to_string())
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>, String> {
        let handle = self
            .db
            .cf_handle(cf)
            .ok_or_else(|| format!("column family '{}' missing", cf))?;
        self.db
            .iterator_cf(handle, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(|e| e.to_string())?;
                serde_json::from_slice(&value).map_err(|e| e.to_string())
            })
            .collect()
    }
}

impl InstitutionRegistry for RocksStore {
    fn get(&self, id: &str) -> Result<InstitutionRecord, RegistryError> {
        self.get_json(CF_INSTITUTIONS, id.as_bytes())
            .map_err(RegistryError::Storage)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn put(&self, id: &str, record: InstitutionRecord) -> Result<(), RegistryError> {
        self.put_json(CF_INSTITUTIONS, id.as_bytes(), &record)
            .map_err(RegistryError::Storage)
    }

    fn list(&self) -> Result<Vec<InstitutionRecord>, RegistryError> {
        self.scan_json(CF_INSTITUTIONS).map_err(RegistryError::Storage)
    }
}

impl TransferJournal for RocksStore {
    fn save(&self, record: &TransferRecord) -> Result<(), JournalError> {
        self.put_json(CF_TRANSFERS, record.id.as_str().as_bytes(), record)
            .map_err(JournalError::Storage)
    }

    fn load(&self, id: &TransferId) -> Result<TransferRecord, JournalError> {
        self.get_json(CF_TRANSFERS, id.as_str().as_bytes())
            .map_err(JournalError::Storage)?
            .ok_or_else(|| JournalError::NotFound(id.clone()))
    }

    fn list(&self) -> Result<Vec<TransferRecord>, JournalError> {
        let mut records: Vec<TransferRecord> =
            self.scan_json(CF_TRANSFERS).map_err(JournalError::Storage)?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
