//! # Filter services
//!
//! The control-plane logic of the filter API, independent of HTTP:
//!
//! - [`BlueprintService`]: create, read and update filter blueprints, the
//!   published visibility rule, and submission.
//! - [`DimensionEditor`]: dimension and option edits, including JSON-Patch
//!   style option list edits with partial success.
//! - [`OutputService`]: filter output reads with link redaction, artefact
//!   updates, completion and lifecycle events.
//!
//! Every edit is validated against the dataset catalog through the
//! [`Validator`] before it reaches the store, and every store write carries
//! the ETag the edit was based on. Catalog calls never happen while a store
//! transaction is open.

use catalog::{BatchConfig, DatasetCatalog};
use queue::OutputQueue;
use std::sync::Arc;
use store::FilterStore;

mod blueprints;
mod dimensions;
mod error;
pub mod metrics;
mod outputs;
pub mod patch;
mod validator;

pub use blueprints::{BlueprintService, BlueprintUpdate, DatasetUpdate, NewBlueprint};
pub use dimensions::DimensionEditor;
pub use error::{ServiceError, ServiceResult};
pub use outputs::{ArtefactUpdate, DownloadsUpdate, OutputService, OutputUpdate};
pub use patch::{parse_patch, PatchError, PatchOp, PatchOperation};
pub use validator::Validator;

/// Who is calling, as established by the surrounding middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller {
    /// Authenticated user or service.
    pub authenticated: bool,
    /// Presented the download-service credential.
    pub download_service: bool,
}

impl Caller {
    pub const ANONYMOUS: Caller = Caller {
        authenticated: false,
        download_service: false,
    };

    pub fn authenticated() -> Self {
        Caller {
            authenticated: true,
            download_service: false,
        }
    }
}

/// Tunables shared by the services.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub batch: BatchConfig,
    /// Maximum option ids across all operations of one patch request.
    pub max_patch_options: usize,
    /// Base URL artefact `href`s are built from.
    pub download_service_url: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            max_patch_options: 1000,
            download_service_url: "http://localhost:23600".to_string(),
        }
    }
}

/// Collaborators every service needs.
pub(crate) struct Context {
    pub store: Arc<FilterStore>,
    pub catalog: Arc<dyn DatasetCatalog>,
    pub queue: Arc<dyn OutputQueue>,
    pub validator: Validator,
    pub settings: ServiceSettings,
}

/// The three services wired over one set of collaborators.
#[derive(Clone)]
pub struct FilterServices {
    pub blueprints: BlueprintService,
    pub dimensions: DimensionEditor,
    pub outputs: OutputService,
}

impl FilterServices {
    pub fn new(
        store: Arc<FilterStore>,
        catalog: Arc<dyn DatasetCatalog>,
        queue: Arc<dyn OutputQueue>,
        settings: ServiceSettings,
    ) -> Self {
        let validator = Validator::new(catalog.clone(), settings.batch);
        let context = Arc::new(Context {
            store,
            catalog,
            queue,
            validator,
            settings,
        });
        let blueprints = BlueprintService::new(context.clone());
        Self {
            dimensions: DimensionEditor::new(context.clone(), blueprints.clone()),
            outputs: OutputService::new(context),
            blueprints,
        }
    }
}
