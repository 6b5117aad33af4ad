use crate::error::{ServiceError, ServiceResult};
use crate::{metrics, Caller, Context};
use chrono::Utc;
use model::{
    dedup_options, new_id, Blueprint, BlueprintState, DatasetRef, Dimension, ETagSelector, Event,
    EventRequest, EventType, Output,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use store::{FilterUpdate, StoreError};
use tracing::{info, warn};

/// Request to create a blueprint.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBlueprint {
    pub dataset: DatasetRef,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Dataset fields of a blueprint update. Only `version` may differ from the
/// stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetUpdate {
    pub id: Option<String>,
    pub edition: Option<String>,
    pub version: Option<u32>,
}

/// Body of a blueprint update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlueprintUpdate {
    #[serde(default)]
    pub dataset: Option<DatasetUpdate>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub published: Option<bool>,
    #[serde(default)]
    pub events: Vec<EventRequest>,
}

impl BlueprintUpdate {
    /// Fields the update tries to change that callers may not change.
    fn forbidden_fields(&self, current: &Blueprint) -> Vec<String> {
        let mut fields = Vec::new();
        if let Some(dataset) = &self.dataset {
            if dataset.id.as_ref().is_some_and(|id| *id != current.dataset.id) {
                fields.push("dataset.id".to_string());
            }
            if dataset
                .edition
                .as_ref()
                .is_some_and(|edition| *edition != current.dataset.edition)
            {
                fields.push("dataset.edition".to_string());
            }
        }
        if self
            .instance_id
            .as_ref()
            .is_some_and(|instance| *instance != current.instance_id)
        {
            fields.push("instance_id".to_string());
        }
        if self.published.is_some_and(|p| Some(p) != current.published) {
            fields.push("published".to_string());
        }
        fields
    }

    fn new_version(&self, current: &Blueprint) -> Option<u32> {
        self.dataset
            .as_ref()
            .and_then(|d| d.version)
            .filter(|v| *v != current.dataset.version)
    }
}

/// Creation, retrieval, update and submission of filter blueprints.
#[derive(Clone)]
pub struct BlueprintService {
    context: Arc<Context>,
}

impl BlueprintService {
    pub(crate) fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    /// Create a blueprint over a dataset version, optionally submitting it.
    pub async fn create(
        &self,
        request: NewBlueprint,
        submit: bool,
        caller: Caller,
    ) -> ServiceResult<Blueprint> {
        let NewBlueprint {
            dataset,
            dimensions,
            kind,
        } = request;

        let version = self
            .context
            .catalog
            .get_version(&dataset, caller.authenticated)
            .await?;
        let dimensions = normalise_dimensions(dimensions)?;
        self.context
            .validator
            .validate_dimensions(&dataset, &dimensions)
            .await?;

        let mut blueprint =
            Blueprint::new(new_id(), dataset, version.instance_id.clone(), dimensions);
        blueprint.published = Some(version.is_published());
        blueprint.kind = kind;

        let stored = self.context.store.add_filter(blueprint)?;
        metrics::record_created();
        info!(
            filter_id = %stored.id,
            dataset = %stored.dataset,
            dimensions = stored.dimensions.len(),
            "Created filter blueprint"
        );

        if submit {
            return self.submit(stored).await;
        }
        Ok(stored)
    }

    /// Read a blueprint, applying the published visibility rule.
    ///
    /// An unpublished blueprint whose version has since been published is
    /// promoted to published with a conditional write before it is returned.
    pub async fn get(
        &self,
        id: &str,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<Blueprint> {
        let blueprint = self.context.store.get_filter(id, selector)?;
        if blueprint.is_published() || caller.authenticated {
            return Ok(blueprint);
        }
        self.promote(blueprint).await
    }

    async fn promote(&self, blueprint: Blueprint) -> ServiceResult<Blueprint> {
        let id = blueprint.id.clone();
        match self
            .context
            .catalog
            .get_version(&blueprint.dataset, false)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Err(ServiceError::FilterNotFound(id)),
            Err(e) => return Err(e.into()),
        }

        let update = FilterUpdate {
            published: Some(true),
            ..Default::default()
        };
        match self
            .context
            .store
            .update_filter(&id, &update, &ETagSelector::exact(blueprint.etag))
        {
            Ok(promoted) => Ok(promoted),
            // Another writer got there first; a concurrent promotion is not a miss.
            Err(StoreError::Conflict(_)) => {
                match self.context.store.get_filter(&id, &ETagSelector::Any) {
                    Ok(current) if current.is_published() => Ok(current),
                    Ok(_) | Err(StoreError::FilterNotFound(_)) => {
                        Err(ServiceError::FilterNotFound(id))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                warn!(
                    filter_id = %id,
                    error = %e,
                    "Failed to promote filter blueprint to published"
                );
                Err(ServiceError::FilterNotFound(id))
            }
        }
    }

    /// Apply an update: append events and optionally move to another
    /// version of the same dataset edition, then optionally submit.
    pub async fn update(
        &self,
        id: &str,
        update: BlueprintUpdate,
        submit: bool,
        selector: &ETagSelector,
        caller: Caller,
    ) -> ServiceResult<Blueprint> {
        let current = self.context.store.get_filter(id, selector)?;

        let forbidden = update.forbidden_fields(&current);
        if !forbidden.is_empty() {
            return Err(ServiceError::Forbidden(forbidden));
        }

        let events = update
            .events
            .iter()
            .map(|e| e.validate())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

        let mut change = FilterUpdate {
            events,
            ..Default::default()
        };

        if let Some(version) = update.new_version(&current) {
            if current.is_submitted() {
                return Err(ServiceError::AlreadySubmitted(current.id));
            }
            let dataset = current.dataset.with_version(version);
            let found = self
                .context
                .catalog
                .get_version(&dataset, caller.authenticated)
                .await?;
            self.context
                .validator
                .validate_dimensions(&dataset, &current.dimensions)
                .await?;
            change.dataset = Some(dataset);
            change.instance_id = Some(found.instance_id.clone());
            change.published = Some(found.is_published());
        }

        if submit && current.is_submitted() {
            return Err(ServiceError::AlreadySubmitted(current.id));
        }

        let updated = if change.is_empty() {
            current
        } else {
            let etag = ETagSelector::exact(current.etag.clone());
            let updated = self.context.store.update_filter(id, &change, &etag)?;
            info!(filter_id = %id, etag = %updated.etag, "Updated filter blueprint");
            updated
        };

        if submit {
            return self.submit(updated).await;
        }
        Ok(updated)
    }

    /// Create the blueprint's output, mark the blueprint submitted and
    /// enqueue the output.
    ///
    /// A failed enqueue is logged and counted; the output remains and the
    /// submission still succeeds.
    async fn submit(&self, blueprint: Blueprint) -> ServiceResult<Blueprint> {
        if blueprint.is_submitted() {
            return Err(ServiceError::AlreadySubmitted(blueprint.id));
        }

        // The output goes in first so a failed insert leaves the blueprint
        // editable and the submit can be retried.
        let now = Utc::now();
        let output_id = new_id();
        self.context
            .store
            .add_output(Output::from_blueprint(output_id.clone(), &blueprint, now))?;

        let change = FilterUpdate {
            state: Some(BlueprintState::Submitted),
            filter_output_id: Some(output_id.clone()),
            events: vec![Event::new(EventType::FilterOutputCreated, now)],
            ..Default::default()
        };
        let submitted = self
            .context
            .store
            .update_filter(&blueprint.id, &change, &ETagSelector::exact(blueprint.etag.clone()))
            .inspect_err(|e| {
                warn!(
                    filter_id = %blueprint.id,
                    filter_output_id = %output_id,
                    error = %e,
                    "Filter blueprint changed during submit, output left unreferenced"
                );
            })?;
        metrics::record_submitted();
        info!(
            filter_id = %submitted.id,
            filter_output_id = %output_id,
            "Submitted filter blueprint"
        );

        if let Err(e) = self.context.queue.enqueue(&output_id).await {
            metrics::record_dispatch_failure();
            warn!(
                filter_id = %submitted.id,
                filter_output_id = %output_id,
                error = %e,
                "Failed to enqueue filter submission"
            );
        }

        Ok(submitted)
    }
}

/// Reject duplicate or empty dimension names and collapse duplicate options.
fn normalise_dimensions(dimensions: Vec<Dimension>) -> ServiceResult<Vec<Dimension>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(dimensions.len());
    for dimension in dimensions {
        if dimension.name.trim().is_empty() {
            return Err(ServiceError::BadRequest("dimension name is empty".into()));
        }
        if !seen.insert(dimension.name.clone()) {
            return Err(ServiceError::BadRequest(format!(
                "duplicate dimension name: {}",
                dimension.name
            )));
        }
        out.push(Dimension {
            options: dedup_options(dimension.options),
            name: dimension.name,
        });
    }
    Ok(out)
}
