use dashmap::DashMap;
use thiserror::Error;

use crate::settlement::state::{TransferId, TransferRecord};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("transfer {0} not found")]
    NotFound(TransferId),
    #[error("journal storage error: {0}")]
    Storage(String),
}

/// Durable record of every transfer state transition
pub trait TransferJournal: Send + Sync {
    fn save(&self, record: &TransferRecord) -> Result<(), JournalError>;
    fn load(&self, id: &TransferId) -> Result<TransferRecord, JournalError>;
    fn list(&self) -> Result<Vec<TransferRecord>, JournalError>;
}

#[derive(Default)]
pub struct MemoryJournal {
    records: DashMap<TransferId, TransferRecord>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferJournal for MemoryJournal {
    fn save(&self, record: &TransferRecord) -> Result<(), JournalError> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, id: &TransferId) -> Result<TransferRecord, JournalError> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| JournalError::NotFound(id.clone()))
    }

    fn list(&self) -> Result<Vec<TransferRecord>, JournalError> {
        let mut records: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
