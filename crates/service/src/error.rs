use crate::patch::{PatchError, PatchOperation};
use catalog::CatalogError;
use store::StoreError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the filter services.
///
/// Status codes are assigned by the HTTP layer; some variants map to
/// different codes depending on whether the request was a read or a write.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("filter blueprint not found: {0}")]
    FilterNotFound(String),

    #[error("filter output not found: {0}")]
    OutputNotFound(String),

    #[error("filter blueprint {0} has been modified since it was read")]
    Conflict(String),

    #[error("dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("option not found: {0}")]
    OptionNotFound(String),

    #[error("incorrect dimensions chosen: {}", .0.join(", "))]
    IncorrectDimensions(Vec<String>),

    #[error("incorrect dimension options chosen for {dimension}: {}", .options.join(", "))]
    IncorrectDimensionOptions {
        dimension: String,
        options: Vec<String>,
    },

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("forbidden from updating the following fields: {}", .0.join(", "))]
    Forbidden(Vec<String>),

    #[error("filter blueprint {0} has already been submitted")]
    AlreadySubmitted(String),

    #[error("caller is not authenticated")]
    Unauthorised,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Patch(#[from] PatchError),

    /// A patch stopped part-way; `successful` were applied, `etag` is current.
    #[error(
        "patch stopped after {count} successful operation(s): {error}",
        count = .successful.len()
    )]
    PatchFailed {
        successful: Vec<PatchOperation>,
        etag: String,
        error: Box<ServiceError>,
    },

    #[error("dataset catalog error: {0}")]
    Catalog(CatalogError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::FilterNotFound(id) => ServiceError::FilterNotFound(id),
            StoreError::OutputNotFound(id) => ServiceError::OutputNotFound(id),
            StoreError::Conflict(id) => ServiceError::Conflict(id),
            StoreError::DimensionNotFound(name) => ServiceError::DimensionNotFound(name),
            StoreError::Submitted(id) => ServiceError::AlreadySubmitted(id),
            other => ServiceError::Store(other),
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::VersionNotFound(v) | CatalogError::DatasetNotFound(v) => {
                ServiceError::VersionNotFound(v)
            }
            CatalogError::DimensionNotFound(name) => ServiceError::IncorrectDimensions(vec![name]),
            other => ServiceError::Catalog(other),
        }
    }
}

impl ServiceError {
    /// The error that decides the response status, looking through a partial patch.
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::PatchFailed { error, .. } => error.root(),
            other => other,
        }
    }
}
