//! Registry adapter over a tabular store.
//!
//! [`SheetRegistry`] maps [`UserRecord`]s onto rows of any [`TabularStore`].
//! [`MemorySheet`] is the bundled store: an in-process table that can mirror
//! itself to a JSON file so approvals survive a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::rows::{self, RecordField};
use super::{Registry, RegistryError, UserId, UserRecord};

/// Row-level CRUD on a sheet whose first column is the user id.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Find the first row whose key column equals `key`.
    async fn find_row(&self, key: &str) -> Result<Option<(usize, Vec<String>)>, RegistryError>;

    async fn append_row(&self, row: Vec<String>) -> Result<(), RegistryError>;

    async fn update_row(&self, index: usize, row: Vec<String>) -> Result<(), RegistryError>;

    async fn update_cell(&self, index: usize, column: usize, value: String) -> Result<(), RegistryError>;
}

#[async_trait]
impl<T: TabularStore + ?Sized> TabularStore for Arc<T> {
    async fn find_row(&self, key: &str) -> Result<Option<(usize, Vec<String>)>, RegistryError> {
        (**self).find_row(key).await
    }

    async fn append_row(&self, row: Vec<String>) -> Result<(), RegistryError> {
        (**self).append_row(row).await
    }

    async fn update_row(&self, index: usize, row: Vec<String>) -> Result<(), RegistryError> {
        (**self).update_row(index, row).await
    }

    async fn update_cell(&self, index: usize, column: usize, value: String) -> Result<(), RegistryError> {
        (**self).update_cell(index, column, value).await
    }
}

pub struct SheetRegistry<S> {
    store: S,
}

impl<S: TabularStore> SheetRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: TabularStore> Registry for SheetRegistry<S> {
    async fn find(&self, user_id: UserId) -> Result<Option<UserRecord>, RegistryError> {
        match self.store.find_row(&user_id.to_string()).await? {
            Some((_, row)) => rows::decode(&row).map(Some),
            None => Ok(None),
        }
    }

    // Find-then-write is not atomic in the store. Callers hold the user's
    // session or decision lock, so writes for one user never interleave.
    async fn upsert(&self, record: &UserRecord) -> Result<(), RegistryError> {
        let row = rows::encode(record);
        match self.store.find_row(&record.user_id.to_string()).await? {
            Some((index, _)) => {
                debug!(user_id = record.user_id, row = index, "Updating registry row in place");
                self.store.update_row(index, row).await
            }
            None => {
                debug!(user_id = record.user_id, "Appending new registry row");
                self.store.append_row(row).await
            }
        }
    }

    async fn update_field(
        &self,
        user_id: UserId,
        field: RecordField,
        value: &str,
    ) -> Result<(), RegistryError> {
        rows::validate_value(field, value)?;
        let (index, _) = self
            .store
            .find_row(&user_id.to_string())
            .await?
            .ok_or(RegistryError::NotFound { user_id })?;
        self.store
            .update_cell(index, field.column(), value.to_string())
            .await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SheetFile {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// In-process table, optionally mirrored to a JSON file after every write.
#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: RwLock<Vec<Vec<String>>>,
    path: Option<PathBuf>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed sheet, loading existing rows if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let rows = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: SheetFile = serde_json::from_slice(&bytes).map_err(|e| {
                    RegistryError::Storage(format!("cannot parse {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), rows = file.rows.len(), "Loaded registry sheet");
                file.rows
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(RegistryError::Storage(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(Self {
            rows: RwLock::new(rows),
            path: Some(path),
        })
    }

    /// Snapshot of every row, in sheet order.
    pub async fn rows(&self) -> Vec<Vec<String>> {
        self.rows.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn persist(&self, rows: &[Vec<String>]) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = SheetFile {
            columns: RecordField::headers(),
            rows: rows.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| RegistryError::Storage(format!("cannot write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| RegistryError::Storage(format!("cannot replace {}: {e}", path.display())))
    }
}

#[async_trait]
impl TabularStore for MemorySheet {
    async fn find_row(&self, key: &str) -> Result<Option<(usize, Vec<String>)>, RegistryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .position(|row| row.first().map(|cell| cell.trim()) == Some(key))
            .map(|index| (index, rows[index].clone())))
    }

    async fn append_row(&self, row: Vec<String>) -> Result<(), RegistryError> {
        let mut rows = self.rows.write().await;
        rows.push(row);
        self.persist(&rows).await
    }

    async fn update_row(&self, index: usize, row: Vec<String>) -> Result<(), RegistryError> {
        let mut rows = self.rows.write().await;
        let slot = rows
            .get_mut(index)
            .ok_or_else(|| RegistryError::Storage(format!("row {index} out of range")))?;
        *slot = row;
        self.persist(&rows).await
    }

    async fn update_cell(&self, index: usize, column: usize, value: String) -> Result<(), RegistryError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(index)
            .ok_or_else(|| RegistryError::Storage(format!("row {index} out of range")))?;
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = value;
        self.persist(&rows).await
    }
}
