//! Redb backend for filter documents.
//!
//! One table per collection, keyed by document id, values are the JSON
//! encoded documents. Every [`DocumentBackend::modify`] call is a single redb
//! write transaction, and redb admits one writer at a time, so the
//! read-compare-write of a conditional update cannot interleave with another.

use crate::backend::{Collection, DocumentBackend, Mutation};
use crate::StoreError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const FILTERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("filters");
const OUTPUTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("filterOutputs");

fn table(collection: Collection) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match collection {
        Collection::Filters => FILTERS_TABLE,
        Collection::FilterOutputs => OUTPUTS_TABLE,
    }
}

/// Persistent backend over a single redb file.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create the database at `path`, creating both tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::backend(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        for collection in Collection::ALL {
            write_txn
                .open_table(table(collection))
                .map_err(|e| StoreError::backend(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::backend(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl DocumentBackend for RedbBackend {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let table = read_txn
            .open_table(table(collection))
            .map_err(|e| StoreError::backend(e.to_string()))?;

        match table
            .get(key)
            .map_err(|e| StoreError::backend(e.to_string()))?
        {
            Some(value) => Ok(Some(value.value().to_vec())),
            None => Ok(None),
        }
    }

    fn insert(&self, collection: Collection, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.modify(collection, key, &mut |current| match current {
            Some(_) => Err(StoreError::AlreadyExists(key.to_string())),
            None => Ok(Some(value.to_vec())),
        })
    }

    fn modify(
        &self,
        collection: Collection,
        key: &str,
        mutation: &mut Mutation<'_>,
    ) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::backend(e.to_string()))?;

        {
            let mut table = write_txn
                .open_table(table(collection))
                .map_err(|e| StoreError::backend(e.to_string()))?;
            let current = table
                .get(key)
                .map_err(|e| StoreError::backend(e.to_string()))?
                .map(|v| v.value().to_vec());

            let updated = match mutation(current.as_deref()) {
                Ok(updated) => updated,
                Err(err) => {
                    drop(table);
                    write_txn
                        .abort()
                        .map_err(|e| StoreError::backend(e.to_string()))?;
                    return Err(err);
                }
            };

            if let Some(updated) = updated {
                table
                    .insert(key, updated.as_slice())
                    .map_err(|e| StoreError::backend(e.to_string()))?;
            }
        }

        write_txn
            .commit()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn roundtrip_per_collection() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(temp_file.path()).unwrap();

        backend.insert(Collection::Filters, "f1", b"filter").unwrap();
        backend
            .insert(Collection::FilterOutputs, "f1", b"output")
            .unwrap();

        assert_eq!(
            backend.get(Collection::Filters, "f1").unwrap(),
            Some(b"filter".to_vec())
        );
        assert_eq!(
            backend.get(Collection::FilterOutputs, "f1").unwrap(),
            Some(b"output".to_vec())
        );
        assert_eq!(backend.get(Collection::Filters, "missing").unwrap(), None);
    }

    #[test]
    fn insert_twice_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(temp_file.path()).unwrap();

        backend.insert(Collection::Filters, "f1", b"a").unwrap();
        let err = backend.insert(Collection::Filters, "f1", b"b").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(
            backend.get(Collection::Filters, "f1").unwrap(),
            Some(b"a".to_vec())
        );
    }

    #[test]
    fn aborted_modify_keeps_previous_value() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(temp_file.path()).unwrap();
        backend.insert(Collection::Filters, "f1", b"a").unwrap();

        let err = backend
            .modify(Collection::Filters, "f1", &mut |_| {
                Err(StoreError::Conflict("f1".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        backend
            .modify(Collection::Filters, "f1", &mut |current| {
                assert_eq!(current, Some(&b"a"[..]));
                Ok(Some(b"b".to_vec()))
            })
            .unwrap();
        assert_eq!(
            backend.get(Collection::Filters, "f1").unwrap(),
            Some(b"b".to_vec())
        );
    }

    #[test]
    fn reopen_preserves_documents() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let backend = RedbBackend::open(temp_file.path()).unwrap();
            backend.insert(Collection::Filters, "f1", b"kept").unwrap();
        }
        let backend = RedbBackend::open(temp_file.path()).unwrap();
        assert_eq!(
            backend.get(Collection::Filters, "f1").unwrap(),
            Some(b"kept".to_vec())
        );
    }
}
