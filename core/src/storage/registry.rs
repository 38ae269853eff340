use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionRecord {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub settlement_address: Address,
    /// Institutions this one may send to
    #[serde(default)]
    pub connected: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl InstitutionRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
        settlement_address: Address,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            symbol: symbol.into(),
            settlement_address,
            connected: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_connected_to(&self, other: &str) -> bool {
        self.connected.iter().any(|id| id == other)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("institution {0} not found")]
    NotFound(String),
    #[error("registry storage error: {0}")]
    Storage(String),
}

/// Institution metadata lookup, injected into the orchestrator and the API
pub trait InstitutionRegistry: Send + Sync {
    fn get(&self, id: &str) -> Result<InstitutionRecord, RegistryError>;
    fn put(&self, id: &str, record: InstitutionRecord) -> Result<(), RegistryError>;
    fn list(&self) -> Result<Vec<InstitutionRecord>, RegistryError>;
}

#[derive(Default)]
pub struct MemoryRegistry {
    records: DashMap<String, InstitutionRecord>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstitutionRegistry for MemoryRegistry {
    fn get(&self, id: &str) -> Result<InstitutionRecord, RegistryError> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn put(&self, id: &str, record: InstitutionRecord) -> Result<(), RegistryError> {
        self.records.insert(id.to_string(), record);
        Ok(())
    }

    fn list(&self) -> Result<Vec<InstitutionRecord>, RegistryError> {
        let mut records: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
