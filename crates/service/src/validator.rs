use crate::error::{ServiceError, ServiceResult};
use catalog::{get_options_batched, BatchConfig, DatasetCatalog};
use model::{dedup_options, DatasetRef, Dimension};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Checks dimension names and option ids against the dataset catalog.
#[derive(Clone)]
pub struct Validator {
    catalog: Arc<dyn DatasetCatalog>,
    batch: BatchConfig,
}

impl Validator {
    pub fn new(catalog: Arc<dyn DatasetCatalog>, batch: BatchConfig) -> Self {
        Self { catalog, batch }
    }

    /// Confirm `name` is declared on the version and every id in `ids` is one
    /// of its options.
    ///
    /// Unknown dimensions yield [`ServiceError::IncorrectDimensions`]; unknown
    /// options are accumulated across all batches and reported together as
    /// [`ServiceError::IncorrectDimensionOptions`].
    pub async fn validate_dimension_and_options(
        &self,
        dataset: &DatasetRef,
        name: &str,
        ids: &[String],
    ) -> ServiceResult<()> {
        let declared = self.declared_dimensions(dataset).await?;
        if !declared.contains(name) {
            return Err(ServiceError::IncorrectDimensions(vec![name.to_string()]));
        }
        self.validate_options(dataset, name, ids).await
    }

    /// Validate a whole set of dimensions, reporting every unknown name at once.
    pub async fn validate_dimensions(
        &self,
        dataset: &DatasetRef,
        dimensions: &[Dimension],
    ) -> ServiceResult<()> {
        if dimensions.is_empty() {
            return Ok(());
        }
        let declared = self.declared_dimensions(dataset).await?;
        let unknown: Vec<String> = dimensions
            .iter()
            .filter(|d| !declared.contains(d.name.as_str()))
            .map(|d| d.name.clone())
            .collect();
        if !unknown.is_empty() {
            return Err(ServiceError::IncorrectDimensions(unknown));
        }
        for dimension in dimensions {
            self.validate_options(dataset, &dimension.name, &dimension.options)
                .await?;
        }
        Ok(())
    }

    async fn declared_dimensions(&self, dataset: &DatasetRef) -> ServiceResult<HashSet<String>> {
        Ok(self
            .catalog
            .get_version_dimensions(dataset)
            .await?
            .into_iter()
            .map(|d| d.name)
            .collect())
    }

    async fn validate_options(
        &self,
        dataset: &DatasetRef,
        name: &str,
        ids: &[String],
    ) -> ServiceResult<()> {
        let ids = dedup_options(ids.iter().cloned());
        if ids.is_empty() {
            return Ok(());
        }

        let mut missing: HashSet<String> = HashSet::new();
        get_options_batched(
            self.catalog.as_ref(),
            dataset,
            name,
            &ids,
            self.batch,
            |requested, found| {
                missing.extend(requested.iter().filter(|id| !found.contains(id)).cloned());
                Ok(())
            },
        )
        .await?;

        if missing.is_empty() {
            debug!(dataset = %dataset, dimension = name, options = ids.len(), "Options valid");
            return Ok(());
        }
        let options: Vec<String> = ids.into_iter().filter(|id| missing.contains(id)).collect();
        Err(ServiceError::IncorrectDimensionOptions {
            dimension: name.to_string(),
            options,
        })
    }
}
