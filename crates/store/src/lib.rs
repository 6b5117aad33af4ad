//! # Filter store
//!
//! Durable keyed storage for filter blueprints (collection `filters`) and
//! filter outputs (collection `filterOutputs`).
//!
//! Every blueprint write is a compare-and-set keyed on the blueprint's ETag:
//! the change is projected onto the currently persisted document inside one
//! backend transaction, the next ETag is hashed from the projected document,
//! and document, ETag and write timestamp are stored together. Of two writers
//! holding the same ETag exactly one succeeds; the other sees
//! [`StoreError::Conflict`].
//!
//! Writes that leave a blueprint's content unchanged (re-adding an option that
//! is already selected, say) are not persisted and return the current ETag.
//!
//! ```
//! use model::{Blueprint, DatasetRef, Dimension, ETagSelector};
//! use store::FilterStore;
//!
//! let store = FilterStore::in_memory();
//! let stored = store
//!     .add_filter(Blueprint::new(
//!         "f-1",
//!         DatasetRef::new("cpih01", "time-series", 1),
//!         "i-1",
//!         vec![],
//!     ))
//!     .unwrap();
//!
//! let etag = store
//!     .add_dimension(
//!         "f-1",
//!         Dimension::new("geography", ["K02000001"]),
//!         &ETagSelector::exact(stored.etag.clone()),
//!     )
//!     .unwrap();
//! assert_ne!(etag, stored.etag);
//!
//! // The old ETag is now stale.
//! assert!(store.get_filter("f-1", &ETagSelector::exact(stored.etag)).is_err());
//! ```

use model::{
    blueprint_etag, Blueprint, BlueprintState, DatasetRef, Dimension, ETagSelector, Event, Output,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

mod backend;

pub use backend::{BackendConfig, Collection, DocumentBackend, InMemoryBackend, Mutation};
#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;

/// Errors raised by the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("filter blueprint not found: {0}")]
    FilterNotFound(String),

    #[error("filter output not found: {0}")]
    OutputNotFound(String),

    #[error("conflict: filter blueprint {0} has been modified")]
    Conflict(String),

    #[error("dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("filter blueprint {0} has already been submitted")]
    Submitted(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Source of unique, strictly increasing write timestamps (Unix nanoseconds).
#[derive(Debug, Default)]
pub struct WriteClock {
    last: AtomicU64,
}

impl WriteClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, greater than every timestamp handed out before.
    pub fn next(&self) -> u64 {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map_or(0, |n| n.max(0) as u64);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Blueprint-level change applied by [`FilterStore::update_filter`].
///
/// Only the fields a blueprint update may touch are representable here;
/// dimensions have their own targeted operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterUpdate {
    /// New dataset version (id and edition must match the stored ones).
    pub dataset: Option<DatasetRef>,
    pub instance_id: Option<String>,
    /// Ignored once the stored blueprint is published.
    pub published: Option<bool>,
    /// Appended to the stored events.
    pub events: Vec<Event>,
    pub state: Option<BlueprintState>,
    pub filter_output_id: Option<String>,
}

impl FilterUpdate {
    pub fn is_empty(&self) -> bool {
        *self == FilterUpdate::default()
    }

    pub fn apply(&self, blueprint: &mut Blueprint) {
        if let Some(dataset) = &self.dataset {
            blueprint.dataset = dataset.clone();
        }
        if let Some(instance_id) = &self.instance_id {
            blueprint.instance_id = instance_id.clone();
        }
        if let Some(published) = self.published {
            if !blueprint.is_published() {
                blueprint.published = Some(published);
            }
        }
        blueprint.events.extend(self.events.iter().cloned());
        if let Some(state) = self.state {
            blueprint.state = state;
        }
        if let Some(output_id) = &self.filter_output_id {
            blueprint.filter_output_id = Some(output_id.clone());
        }
    }
}

/// Blueprint and output storage over a [`DocumentBackend`].
pub struct FilterStore {
    backend: Box<dyn DocumentBackend>,
    clock: WriteClock,
}

impl FilterStore {
    pub fn new(backend: Box<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            clock: WriteClock::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryBackend::new()))
    }

    pub fn open(config: &BackendConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.build()?))
    }

    /// Read a blueprint. A concrete selector must match the stored ETag.
    pub fn get_filter(&self, id: &str, selector: &ETagSelector) -> Result<Blueprint, StoreError> {
        let bytes = self
            .backend
            .get(Collection::Filters, id)?
            .ok_or_else(|| StoreError::FilterNotFound(id.to_string()))?;
        let blueprint: Blueprint = decode(&bytes)?;
        if !selector.matches(&blueprint.etag) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        Ok(blueprint)
    }

    /// Persist a new blueprint, assigning its ETag and write timestamp.
    pub fn add_filter(&self, mut blueprint: Blueprint) -> Result<Blueprint, StoreError> {
        blueprint.etag = blueprint_etag(&blueprint);
        blueprint.unique_timestamp = self.clock.next();
        blueprint.last_updated = chrono::Utc::now();
        self.backend
            .insert(Collection::Filters, &blueprint.id, &encode(&blueprint)?)?;
        debug!(filter_id = %blueprint.id, etag = %blueprint.etag, "Stored filter blueprint");
        Ok(blueprint)
    }

    /// Apply a blueprint-level change under `selector`.
    pub fn update_filter(
        &self,
        id: &str,
        update: &FilterUpdate,
        selector: &ETagSelector,
    ) -> Result<Blueprint, StoreError> {
        self.modify_filter(id, selector, |blueprint| {
            update.apply(blueprint);
            Ok(())
        })
    }

    /// Append `dimension`, or replace the option set of the same-named one.
    pub fn add_dimension(
        &self,
        id: &str,
        dimension: Dimension,
        selector: &ETagSelector,
    ) -> Result<String, StoreError> {
        let updated = self.modify_filter(id, selector, |blueprint| {
            ensure_editable(blueprint)?;
            blueprint.upsert_dimension(dimension.clone());
            Ok(())
        })?;
        Ok(updated.etag)
    }

    pub fn remove_dimension(
        &self,
        id: &str,
        name: &str,
        selector: &ETagSelector,
    ) -> Result<String, StoreError> {
        let updated = self.modify_filter(id, selector, |blueprint| {
            ensure_editable(blueprint)?;
            if !blueprint.remove_dimension(name) {
                return Err(StoreError::DimensionNotFound(name.to_string()));
            }
            Ok(())
        })?;
        Ok(updated.etag)
    }

    /// Union `options` into an existing dimension.
    pub fn add_dimension_options(
        &self,
        id: &str,
        name: &str,
        options: &[String],
        selector: &ETagSelector,
    ) -> Result<String, StoreError> {
        let updated = self.modify_filter(id, selector, |blueprint| {
            ensure_editable(blueprint)?;
            let dimension = blueprint
                .dimension_mut(name)
                .ok_or_else(|| StoreError::DimensionNotFound(name.to_string()))?;
            dimension.add_options(options.iter().cloned());
            Ok(())
        })?;
        Ok(updated.etag)
    }

    /// Remove `options` from an existing dimension; absent options are ignored.
    pub fn remove_dimension_options(
        &self,
        id: &str,
        name: &str,
        options: &[String],
        selector: &ETagSelector,
    ) -> Result<String, StoreError> {
        let updated = self.modify_filter(id, selector, |blueprint| {
            ensure_editable(blueprint)?;
            let dimension = blueprint
                .dimension_mut(name)
                .ok_or_else(|| StoreError::DimensionNotFound(name.to_string()))?;
            dimension.remove_options(options);
            Ok(())
        })?;
        Ok(updated.etag)
    }

    pub fn get_output(&self, id: &str) -> Result<Output, StoreError> {
        let bytes = self
            .backend
            .get(Collection::FilterOutputs, id)?
            .ok_or_else(|| StoreError::OutputNotFound(id.to_string()))?;
        decode(&bytes)
    }

    pub fn add_output(&self, mut output: Output) -> Result<Output, StoreError> {
        output.unique_timestamp = self.clock.next();
        self.backend
            .insert(Collection::FilterOutputs, &output.id, &encode(&output)?)?;
        debug!(
            filter_output_id = %output.id,
            filter_id = %output.filter_id,
            "Stored filter output"
        );
        Ok(output)
    }

    /// Read-modify-write an output in one transaction.
    ///
    /// `change` runs against the stored document; an error from it aborts the
    /// write and is returned unchanged.
    pub fn update_output<F, E>(&self, id: &str, mut change: F) -> Result<Output, E>
    where
        F: FnMut(&mut Output) -> Result<(), E>,
        E: From<StoreError>,
    {
        let mut rejected: Option<E> = None;
        let mut written: Option<Output> = None;

        let result = self
            .backend
            .modify(Collection::FilterOutputs, id, &mut |current| {
                let bytes = current.ok_or_else(|| StoreError::OutputNotFound(id.to_string()))?;
                let mut output: Output = decode(bytes)?;
                if let Err(err) = change(&mut output) {
                    rejected = Some(err);
                    return Err(StoreError::Backend("update rejected".into()));
                }
                output.unique_timestamp = self.clock.next().max(output.unique_timestamp + 1);
                output.last_updated = chrono::Utc::now();
                let bytes = encode(&output)?;
                written = Some(output);
                Ok(Some(bytes))
            });

        if let Some(err) = rejected {
            return Err(err);
        }
        result?;
        written.ok_or_else(|| StoreError::OutputNotFound(id.to_string()).into())
    }

    pub fn add_output_event(&self, id: &str, event: Event) -> Result<Output, StoreError> {
        self.update_output(id, |output| {
            output.events.push(event.clone());
            Ok::<(), StoreError>(())
        })
    }

    fn modify_filter<F>(
        &self,
        id: &str,
        selector: &ETagSelector,
        mut change: F,
    ) -> Result<Blueprint, StoreError>
    where
        F: FnMut(&mut Blueprint) -> Result<(), StoreError>,
    {
        let mut outcome: Option<Blueprint> = None;

        self.backend
            .modify(Collection::Filters, id, &mut |current| {
                let bytes = current.ok_or_else(|| StoreError::FilterNotFound(id.to_string()))?;
                let mut blueprint: Blueprint = decode(bytes)?;
                if !selector.matches(&blueprint.etag) {
                    return Err(StoreError::Conflict(id.to_string()));
                }

                let previous = blueprint.etag.clone();
                change(&mut blueprint)?;
                let next = blueprint_etag(&blueprint);
                if next == previous {
                    outcome = Some(blueprint);
                    return Ok(None);
                }

                blueprint.etag = next;
                blueprint.unique_timestamp =
                    self.clock.next().max(blueprint.unique_timestamp + 1);
                blueprint.last_updated = chrono::Utc::now();
                let bytes = encode(&blueprint)?;
                outcome = Some(blueprint);
                Ok(Some(bytes))
            })?;

        let blueprint = outcome.ok_or_else(|| StoreError::FilterNotFound(id.to_string()))?;
        debug!(filter_id = %id, etag = %blueprint.etag, "Updated filter blueprint");
        Ok(blueprint)
    }
}

fn ensure_editable(blueprint: &Blueprint) -> Result<(), StoreError> {
    if blueprint.is_submitted() {
        return Err(StoreError::Submitted(blueprint.id.clone()));
    }
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}
