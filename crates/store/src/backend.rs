use crate::StoreError;
use std::collections::HashMap;
use std::sync::RwLock;

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Filters,
    FilterOutputs,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Filters, Collection::FilterOutputs];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Filters => "filters",
            Collection::FilterOutputs => "filterOutputs",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Collection::Filters => 0,
            Collection::FilterOutputs => 1,
        }
    }
}

/// Callback run inside a backend write transaction.
///
/// Receives the current value (if any) and returns the value to store, or
/// `None` to leave the document untouched. Returning an error aborts the
/// transaction without writing.
pub type Mutation<'a> = dyn FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>, StoreError> + 'a;

/// Keyed document storage underneath [`crate::FilterStore`].
///
/// Implementations must run [`DocumentBackend::modify`] as one atomic
/// read-modify-write: no other write to the same collection may interleave
/// between reading the current value and storing the new one.
pub trait DocumentBackend: Send + Sync {
    /// Retrieve a document by key.
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Store a new document. Fails with [`StoreError::AlreadyExists`] if the key is taken.
    fn insert(&self, collection: Collection, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Atomically read, transform and write back one document.
    fn modify(
        &self,
        collection: Collection,
        key: &str,
        mutation: &mut Mutation<'_>,
    ) -> Result<(), StoreError>;
}

/// Configuration for selecting and building a backend.
///
/// ```
/// use store::BackendConfig;
///
/// let memory = BackendConfig::in_memory();
/// let disk = BackendConfig::redb("/data/filters.redb");
/// ```
#[derive(Clone, Debug, Default)]
pub enum BackendConfig {
    /// Redb database file at `path`.
    Redb { path: String },
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    /// Redb when a path is configured, otherwise in-memory.
    pub fn from_path(path: Option<&str>) -> Self {
        match path {
            Some(p) if !p.trim().is_empty() => BackendConfig::redb(p),
            _ => BackendConfig::InMemory,
        }
    }

    /// Build the backend based on the configuration.
    pub fn build(&self) -> Result<Box<dyn DocumentBackend>, StoreError> {
        match self {
            BackendConfig::InMemory => Ok(Box::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Box::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(StoreError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

/// An in-memory backend with one `RwLock`ed map per collection.
pub struct InMemoryBackend {
    collections: [RwLock<HashMap<String, Vec<u8>>>; 2],
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: [RwLock::new(HashMap::new()), RwLock::new(HashMap::new())],
        }
    }

    fn map(&self, collection: Collection) -> &RwLock<HashMap<String, Vec<u8>>> {
        &self.collections[collection.slot()]
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBackend for InMemoryBackend {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self
            .map(collection)
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        Ok(guard.get(key).cloned())
    }

    fn insert(&self, collection: Collection, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self
            .map(collection)
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        if guard.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        guard.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn modify(
        &self,
        collection: Collection,
        key: &str,
        mutation: &mut Mutation<'_>,
    ) -> Result<(), StoreError> {
        // The write lock spans the read and the write.
        let mut guard = self
            .map(collection)
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        if let Some(updated) = mutation(guard.get(key).map(Vec::as_slice))? {
            guard.insert(key.to_string(), updated);
        }
        Ok(())
    }
}

#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use redb::RedbBackend;
