//! # Filter model
//!
//! Document types shared by every layer of the filter API: editable filter
//! [`Blueprint`]s, the [`Output`]s materialised from them on submission, and
//! the lifecycle [`Event`]s recorded against both.
//!
//! The crate also owns the ETag engine. A blueprint's ETag is a pure function
//! of its observable content (see [`blueprint_etag`]), so the store can
//! compute the post-write ETag before committing and a reader can always
//! re-derive it from the stored document.
//!
//! ```
//! use model::{blueprint_etag, Blueprint, DatasetRef, Dimension, ETagSelector};
//!
//! let blueprint = Blueprint::new(
//!     "filter-1",
//!     DatasetRef::new("cpih01", "time-series", 1),
//!     "instance-1",
//!     vec![Dimension::new("aggregate", ["cpih1dim1A0"])],
//! );
//! let etag = blueprint_etag(&blueprint);
//! assert!(ETagSelector::exact(etag.clone()).matches(&etag));
//! assert!(ETagSelector::Any.matches(&etag));
//! ```

mod etag;
mod events;
mod types;

pub use etag::{blueprint_etag, output_etag, ETagSelector, ANY};
pub use events::{Event, EventError, EventRequest, EventType};
pub use types::{
    dedup_options, Artefact, Blueprint, BlueprintState, DatasetRef, Dimension, DownloadFormat,
    Downloads, Output, OutputState, FLEXIBLE_DATASET_TYPE, FLEXIBLE_TYPE,
};

/// Generate a fresh document id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
