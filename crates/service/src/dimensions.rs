use crate::blueprints::BlueprintService;
use crate::error::{ServiceError, ServiceResult};
use crate::patch::{check_size, PatchOp, PatchOperation};
use crate::{metrics, Caller, Context};
use model::{dedup_options, Blueprint, Dimension, ETagSelector};
use std::sync::Arc;
use tracing::{debug, info};

/// Dimension and option edits on a blueprint.
///
/// Every edit reads the blueprint under the caller's selector, validates new
/// options against the catalog with no store transaction open, and then
/// writes conditionally on the ETag it read.
#[derive(Clone)]
pub struct DimensionEditor {
    context: Arc<Context>,
    blueprints: BlueprintService,
}

impl DimensionEditor {
    pub(crate) fn new(context: Arc<Context>, blueprints: BlueprintService) -> Self {
        Self {
            context,
            blueprints,
        }
    }

    async fn read(
        &self,
        id: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<Blueprint> {
        self.blueprints.get(id, selector, caller).await
    }

    pub async fn list_dimensions(
        &self,
        id: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<(Vec<Dimension>, String)> {
        let blueprint = self.read(id, selector, caller).await?;
        Ok((blueprint.dimensions, blueprint.etag))
    }

    pub async fn get_dimension(
        &self,
        id: &str,
        name: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<(Dimension, String)> {
        let blueprint = self.read(id, selector, caller).await?;
        let dimension = blueprint
            .dimension(name)
            .cloned()
            .ok_or_else(|| ServiceError::DimensionNotFound(name.to_string()))?;
        Ok((dimension, blueprint.etag))
    }

    /// Add a dimension, or replace the options of an existing one.
    pub async fn add_dimension(
        &self,
        id: &str,
        dimension: Dimension,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<(Dimension, String)> {
        let blueprint = self.read(id, selector, caller).await?;
        ensure_editable(&blueprint)?;

        let dimension = Dimension {
            options: dedup_options(dimension.options),
            name: dimension.name,
        };
        self.context
            .validator
            .validate_dimension_and_options(&blueprint.dataset, &dimension.name, &dimension.options)
            .await?;

        let etag = self.context.store.add_dimension(
            id,
            dimension.clone(),
            &ETagSelector::exact(blueprint.etag),
        )?;
        info!(filter_id = %id, dimension = %dimension.name, %etag, "Added dimension");
        Ok((dimension, etag))
    }

    pub async fn remove_dimension(
        &self,
        id: &str,
        name: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<String> {
        let blueprint = self.read(id, selector, caller).await?;
        ensure_editable(&blueprint)?;
        if blueprint.dimension(name).is_none() {
            return Err(ServiceError::DimensionNotFound(name.to_string()));
        }

        let etag = self
            .context
            .store
            .remove_dimension(id, name, &ETagSelector::exact(blueprint.etag))?;
        info!(filter_id = %id, dimension = name, %etag, "Removed dimension");
        Ok(etag)
    }

    pub async fn list_options(
        &self,
        id: &str,
        name: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<(Vec<String>, String)> {
        let (dimension, etag) = self.get_dimension(id, name, selector, caller).await?;
        Ok((dimension.options, etag))
    }

    /// Confirm `option` is selected on the dimension; returns the current ETag.
    pub async fn get_option(
        &self,
        id: &str,
        name: &str,
        option: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<String> {
        let (dimension, etag) = self.get_dimension(id, name, selector, caller).await?;
        if !dimension.has_option(option) {
            return Err(ServiceError::OptionNotFound(option.to_string()));
        }
        Ok(etag)
    }

    /// Add one option. Adding an option that is already selected changes
    /// nothing and does not consult the catalog.
    pub async fn add_option(
        &self,
        id: &str,
        name: &str,
        option: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<String> {
        let blueprint = self.read(id, selector, caller).await?;
        let dimension = blueprint
            .dimension(name)
            .ok_or_else(|| ServiceError::DimensionNotFound(name.to_string()))?;
        ensure_editable(&blueprint)?;
        if dimension.has_option(option) {
            return Ok(blueprint.etag);
        }

        let ids = vec![option.to_string()];
        self.context
            .validator
            .validate_dimension_and_options(&blueprint.dataset, name, &ids)
            .await?;

        let etag = self.context.store.add_dimension_options(
            id,
            name,
            &ids,
            &ETagSelector::exact(blueprint.etag.clone()),
        )?;
        debug!(filter_id = %id, dimension = name, option, %etag, "Added option");
        Ok(etag)
    }

    pub async fn remove_option(
        &self,
        id: &str,
        name: &str,
        option: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<String> {
        let blueprint = self.read(id, selector, caller).await?;
        let dimension = blueprint
            .dimension(name)
            .ok_or_else(|| ServiceError::DimensionNotFound(name.to_string()))?;
        if !dimension.has_option(option) {
            return Err(ServiceError::OptionNotFound(option.to_string()));
        }
        ensure_editable(&blueprint)?;

        let etag = self.context.store.remove_dimension_options(
            id,
            name,
            &[option.to_string()],
            &ETagSelector::exact(blueprint.etag.clone()),
        )?;
        debug!(filter_id = %id, dimension = name, option, %etag, "Removed option");
        Ok(etag)
    }

    /// Apply patch operations in order, each as its own conditional write.
    ///
    /// Each write is conditioned on the ETag produced by the previous one, so
    /// a concurrent edit stops the patch with a conflict. On failure the
    /// operations already applied and the ETag after them are reported in
    /// [`ServiceError::PatchFailed`].
    pub async fn patch(
        &self,
        id: &str,
        name: &str,
        operations: Vec<PatchOperation>,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<(Vec<PatchOperation>, String)> {
        check_size(&operations, self.context.settings.max_patch_options)?;

        let blueprint = self.read(id, selector, caller).await?;
        let mut current = blueprint
            .dimension(name)
            .cloned()
            .ok_or_else(|| ServiceError::DimensionNotFound(name.to_string()))?;
        ensure_editable(&blueprint)?;

        let mut etag = blueprint.etag.clone();
        let mut successful = Vec::with_capacity(operations.len());
        for operation in operations {
            match self
                .apply_operation(&blueprint, &mut current, &operation, &etag)
                .await
            {
                Ok(next) => {
                    etag = next;
                    metrics::record_patch_operation(operation.op.as_str());
                    successful.push(operation);
                }
                Err(error) => {
                    info!(
                        filter_id = %id,
                        dimension = name,
                        applied = successful.len(),
                        error = %error,
                        "Patch stopped"
                    );
                    return Err(ServiceError::PatchFailed {
                        successful,
                        etag,
                        error: Box::new(error),
                    });
                }
            }
        }

        info!(
            filter_id = %id,
            dimension = name,
            operations = successful.len(),
            %etag,
            "Patched dimension"
        );
        Ok((successful, etag))
    }

    async fn apply_operation(
        &self,
        blueprint: &Blueprint,
        current: &mut Dimension,
        operation: &PatchOperation,
        etag: &str,
    ) -> ServiceResult<String> {
        let values: Vec<String> = dedup_options(
            operation
                .value
                .iter()
                .filter(|v| !v.trim().is_empty())
                .cloned(),
        );
        let selector = ETagSelector::exact(etag);

        match operation.op {
            PatchOp::Remove => {
                if values.is_empty() {
                    return Ok(etag.to_string());
                }
                let next = self.context.store.remove_dimension_options(
                    &blueprint.id,
                    &current.name,
                    &values,
                    &selector,
                )?;
                current.remove_options(values.as_slice());
                Ok(next)
            }
            PatchOp::Add => {
                let new: Vec<String> = values
                    .into_iter()
                    .filter(|v| !current.has_option(v))
                    .collect();
                if new.is_empty() {
                    return Ok(etag.to_string());
                }
                self.context
                    .validator
                    .validate_dimension_and_options(&blueprint.dataset, &current.name, &new)
                    .await?;
                let next = self.context.store.add_dimension_options(
                    &blueprint.id,
                    &current.name,
                    &new,
                    &selector,
                )?;
                current.add_options(new);
                Ok(next)
            }
        }
    }
}

fn ensure_editable(blueprint: &Blueprint) -> ServiceResult<()> {
    if blueprint.is_submitted() {
        return Err(ServiceError::AlreadySubmitted(blueprint.id.clone()));
    }
    Ok(())
}
