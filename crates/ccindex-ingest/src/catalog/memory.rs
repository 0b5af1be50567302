//! In-memory catalog engine with scripted failures

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::schema::{ColumnDef, ColumnType, StructuralChange, TableSchema};
use super::{CatalogEngine, CatalogError};
use crate::transport::TransportError;

/// A scripted failure for one registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail as if the upstream answered `503 Slow Down`.
    Throttle,
    /// Fail with a non-transient error.
    Fail(String),
}

/// A catalog call, as recorded by [`InMemoryCatalog::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A registration attempt, successful or not.
    Register(String),
    /// A structural change that was applied.
    Apply(String),
}

#[derive(Debug, Default)]
struct MemoryTable {
    schema: TableSchema,
    files: Vec<String>,
    markers: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    faults: HashMap<String, VecDeque<Fault>>,
    failing_markers: HashSet<String>,
    events: Vec<Event>,
}

/// Catalog held in memory.
///
/// Every file is assumed to carry `file_columns`. Registration attempts and
/// applied changes are journaled in call order so callers can assert on
/// sequencing.
#[derive(Debug)]
pub struct InMemoryCatalog {
    file_columns: Vec<ColumnDef>,
    state: Mutex<State>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::with_file_columns(vec![
            ColumnDef::new("url_surtkey", ColumnType::Varchar),
            ColumnDef::new("url", ColumnType::Varchar),
            ColumnDef::new("fetch_time", ColumnType::Timestamp),
            ColumnDef::new("fetch_status", ColumnType::Integer),
            ColumnDef::new("warc_filename", ColumnType::Varchar),
        ])
    }

    pub fn with_file_columns(file_columns: Vec<ColumnDef>) -> Self {
        Self {
            file_columns,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `table` directly, as if by an earlier run.
    pub fn seed_table(&self, table: &str, partition_by: &[String]) {
        let schema = TableSchema::from_file(self.file_columns.clone(), partition_by);
        self.lock().tables.insert(
            table.to_string(),
            MemoryTable {
                schema,
                ..MemoryTable::default()
            },
        );
    }

    /// Record `location` as registered without going through `register_file`.
    pub fn seed_file(&self, table: &str, location: &str) {
        let mut state = self.lock();
        let entry = state.tables.entry(table.to_string()).or_default();
        if !entry.files.iter().any(|f| f == location) {
            entry.files.push(location.to_string());
        }
    }

    /// Queue `fault` for the next registration attempt of `location`.
    pub fn inject(&self, location: &str, fault: Fault) {
        self.lock()
            .faults
            .entry(location.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Make every attempt to apply `marker` fail.
    pub fn fail_change(&self, marker: &str) {
        self.lock().failing_markers.insert(marker.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Every registration attempt, successful or not, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Register(location) => Some(location),
                Event::Apply(_) => None,
            })
            .collect()
    }

    /// Registered locations of `table` in registration order.
    pub fn registered(&self, table: &str) -> Vec<String> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.files.clone())
            .unwrap_or_default()
    }

    /// Markers applied through `apply_change`, in call order.
    pub fn applied_log(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Apply(marker) => Some(marker),
                Event::Register(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl CatalogEngine for InMemoryCatalog {
    async fn table_exists(&self, table: &str) -> Result<bool, CatalogError> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn create_table_from_file(
        &self,
        table: &str,
        _location: &str,
        partition_by: &[String],
    ) -> Result<TableSchema, CatalogError> {
        let mut state = self.lock();
        if state.tables.contains_key(table) {
            return Err(CatalogError::TableExists(table.to_string()));
        }

        let schema = TableSchema::from_file(self.file_columns.clone(), partition_by);
        state.tables.insert(
            table.to_string(),
            MemoryTable {
                schema: schema.clone(),
                ..MemoryTable::default()
            },
        );
        Ok(schema)
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema, CatalogError> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    async fn list_files(&self, table: &str) -> Result<HashSet<String>, CatalogError> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.files.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn register_file(
        &self,
        table: &str,
        location: &str,
        _allow_missing: bool,
    ) -> Result<(), CatalogError> {
        let mut state = self.lock();
        state.events.push(Event::Register(location.to_string()));

        match state.faults.get_mut(location).and_then(VecDeque::pop_front) {
            Some(Fault::Throttle) => {
                return Err(CatalogError::Transport(TransportError::Throttled {
                    location: location.to_string(),
                    status: 503,
                }));
            },
            Some(Fault::Fail(message)) => return Err(CatalogError::Injected(message)),
            None => {},
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
        if !entry.files.iter().any(|f| f == location) {
            entry.files.push(location.to_string());
        }
        Ok(())
    }

    async fn applied_changes(&self, table: &str) -> Result<HashSet<String>, CatalogError> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.markers.clone())
            .unwrap_or_default())
    }

    async fn apply_change(
        &self,
        table: &str,
        marker: &str,
        change: &StructuralChange,
    ) -> Result<(), CatalogError> {
        let mut state = self.lock();
        if state.failing_markers.contains(marker) {
            return Err(CatalogError::Injected(format!("apply {}", marker)));
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
        if entry.markers.contains(marker) {
            return Ok(());
        }
        entry.schema.apply(table, change)?;
        entry.markers.insert(marker.to_string());
        state.events.push(Event::Apply(marker.to_string()));
        Ok(())
    }
}
