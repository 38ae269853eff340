pub mod journal;
pub mod registry;
pub mod rocks;

use std::sync::Arc;

use anyhow::Result;
use log::info;

use mintbridge_config::{DatabaseConfig, StorageBackend};

pub use journal::{JournalError, MemoryJournal, TransferJournal};
pub use registry::{InstitutionRecord, InstitutionRegistry, MemoryRegistry, RegistryError};
pub use rocks::RocksStore;

/// Registry and journal handles for the configured backend
pub fn open_backend(
    config: &DatabaseConfig,
) -> Result<(Arc<dyn InstitutionRegistry>, Arc<dyn TransferJournal>)> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok((Arc::new(MemoryRegistry::new()), Arc::new(MemoryJournal::new())))
        }
        StorageBackend::Rocksdb => {
            info!("Opening RocksDB at {}", config.path);
            let store = RocksStore::open(&config.path)?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
    }
}
