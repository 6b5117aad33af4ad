use crate::blueprints::DatasetUpdate;
use crate::error::{ServiceError, ServiceResult};
use crate::{metrics, Caller, Context};
use chrono::Utc;
use model::{Artefact, DownloadFormat, EventRequest, Output};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Partial artefact; omitted fields keep their stored values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtefactUpdate {
    pub size: Option<String>,
    pub public: Option<String>,
    pub private: Option<String>,
    pub skipped: Option<bool>,
}

impl ArtefactUpdate {
    fn merge_into(&self, artefact: &mut Artefact) {
        if let Some(size) = &self.size {
            artefact.size = size.clone();
        }
        if let Some(public) = &self.public {
            artefact.public = public.clone();
        }
        if let Some(private) = &self.private {
            artefact.private = private.clone();
        }
        if let Some(skipped) = self.skipped {
            artefact.skipped = skipped;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadsUpdate {
    pub csv: Option<ArtefactUpdate>,
    pub xls: Option<ArtefactUpdate>,
}

impl DownloadsUpdate {
    fn get(&self, format: DownloadFormat) -> Option<&ArtefactUpdate> {
        match format {
            DownloadFormat::Csv => self.csv.as_ref(),
            DownloadFormat::Xls => self.xls.as_ref(),
        }
    }
}

/// Body of an output update. Only `downloads` may be supplied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputUpdate {
    pub dataset: Option<DatasetUpdate>,
    pub instance_id: Option<String>,
    pub filter_id: Option<String>,
    pub downloads: Option<DownloadsUpdate>,
}

impl OutputUpdate {
    fn forbidden_fields(&self, stored: &Output) -> Vec<String> {
        let mut fields = Vec::new();
        if let Some(dataset) = &self.dataset {
            if dataset.id.is_some() {
                fields.push("dataset.id".to_string());
            }
            if dataset.edition.is_some() {
                fields.push("dataset.edition".to_string());
            }
            if dataset.version.is_some() {
                fields.push("dataset.version".to_string());
            }
        }
        if self.instance_id.is_some() {
            fields.push("instance_id".to_string());
        }
        if self.filter_id.is_some() {
            fields.push("filter_id".to_string());
        }
        if stored.is_published() {
            if let Some(downloads) = &self.downloads {
                for format in DownloadFormat::ALL {
                    let overwrites_private = downloads
                        .get(format)
                        .is_some_and(|a| a.private.is_some())
                        && stored
                            .downloads
                            .get(format)
                            .is_some_and(|a| !a.private.is_empty());
                    if overwrites_private {
                        fields.push(format!("downloads.{}.private", format.key()));
                    }
                }
            }
        }
        fields
    }
}

/// Reads and updates of filter outputs.
#[derive(Clone)]
pub struct OutputService {
    context: Arc<Context>,
}

impl OutputService {
    pub(crate) fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    /// Read an output. Links are redacted unless the caller is the download
    /// service; unpublished outputs are hidden from anonymous callers.
    pub fn get(&self, id: &str, caller: Caller) -> ServiceResult<Output> {
        let output = self.context.store.get_output(id)?;
        if !output.is_published() && !caller.authenticated && !caller.download_service {
            return Err(ServiceError::OutputNotFound(id.to_string()));
        }
        Ok(present(output, caller))
    }

    /// Merge artefact updates and complete the output once both artefacts
    /// are ready.
    pub fn update(&self, id: &str, update: &OutputUpdate, caller: Caller) -> ServiceResult<Output> {
        if !caller.authenticated {
            return Err(ServiceError::Unauthorised);
        }

        let download_url = self
            .context
            .settings
            .download_service_url
            .trim_end_matches('/')
            .to_string();
        let mut completed = false;

        let output = self.context.store.update_output(id, |output: &mut Output| {
            let forbidden = update.forbidden_fields(output);
            if !forbidden.is_empty() {
                return Err(ServiceError::Forbidden(forbidden));
            }

            if let Some(downloads) = &update.downloads {
                for format in DownloadFormat::ALL {
                    let Some(change) = downloads.get(format) else {
                        continue;
                    };
                    let slot = output.downloads.slot_mut(format);
                    let mut artefact = slot.take().unwrap_or_default();
                    change.merge_into(&mut artefact);
                    artefact.href = format!(
                        "{download_url}/downloads/filter-outputs/{}.{}",
                        output.id,
                        format.extension()
                    );
                    *slot = Some(artefact);
                }
            }

            completed = output.complete_if_ready(Utc::now());
            Ok(())
        })?;

        if completed {
            metrics::record_completed();
            info!(filter_output_id = %id, "Filter output completed");
        } else {
            info!(filter_output_id = %id, "Updated filter output");
        }
        Ok(present(output, caller))
    }

    /// Append a lifecycle event.
    pub fn add_event(&self, id: &str, event: &EventRequest, caller: Caller) -> ServiceResult<()> {
        if !caller.authenticated {
            return Err(ServiceError::Unauthorised);
        }
        let event = event
            .validate()
            .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        self.context.store.add_output_event(id, event.clone())?;
        info!(filter_output_id = %id, event = %event.kind, "Added filter output event");
        Ok(())
    }
}

fn present(output: Output, caller: Caller) -> Output {
    if caller.download_service {
        output
    } else {
        output.redacted()
    }
}
