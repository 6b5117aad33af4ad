//! Persisted document types for filter blueprints and filter outputs.
//!
//! Both documents share the same core shape: a dataset version reference, the
//! instance resolved from it, an ordered list of [`Dimension`] selections and a
//! list of lifecycle [`Event`]s. Outputs additionally carry [`Downloads`].
//!
//! The JSON field names are the wire names used by the HTTP surface and the
//! on-disk documents, so these types are serialized unchanged into the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{Event, EventType};

/// Type tag marking a blueprint that belongs to the sibling "flexible" service.
pub const FLEXIBLE_TYPE: &str = "flexible";

/// Dataset type served by the sibling "flexible" service.
pub const FLEXIBLE_DATASET_TYPE: &str = "cantabular_flexible_table";

/// Reference to a single version of a published dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub id: String,
    pub edition: String,
    pub version: u32,
}

impl DatasetRef {
    pub fn new(id: impl Into<String>, edition: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            edition: edition.into(),
            version,
        }
    }

    /// Same dataset and edition, different version.
    pub fn with_version(&self, version: u32) -> Self {
        Self {
            id: self.id.clone(),
            edition: self.edition.clone(),
            version,
        }
    }
}

impl std::fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.id, self.edition, self.version)
    }
}

/// Editing state of a blueprint. `Submitted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlueprintState {
    #[default]
    Created,
    Submitted,
}

impl BlueprintState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlueprintState::Created => "created",
            BlueprintState::Submitted => "submitted",
        }
    }
}

/// Processing state of a filter output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    #[default]
    Created,
    Completed,
}

impl OutputState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputState::Created => "created",
            OutputState::Completed => "completed",
        }
    }
}

/// A named dimension selection and the option ids chosen on it.
///
/// `options` behaves as a set: inserts collapse duplicates and keep the first
/// position an option was seen at. Clients must not rely on ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Dimension {
    pub fn new<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dimension = Self {
            name: name.into(),
            options: Vec::new(),
        };
        dimension.add_options(options);
        dimension
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// Union `options` into this dimension. Returns `true` if anything was added.
    pub fn add_options<I, S>(&mut self, options: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.options.len();
        for option in options {
            let option = option.into();
            if !self.has_option(&option) {
                self.options.push(option);
            }
        }
        self.options.len() != before
    }

    /// Remove the given options, ignoring any that are absent.
    /// Returns `true` if anything was removed.
    pub fn remove_options<S: AsRef<str>>(&mut self, options: &[S]) -> bool {
        let before = self.options.len();
        self.options
            .retain(|existing| !options.iter().any(|o| o.as_ref() == existing));
        self.options.len() != before
    }
}

/// Deduplicate ids preserving first occurrence and drop empty strings.
pub fn dedup_options<I, S>(options: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for option in options {
        let option = option.into();
        if !option.is_empty() && !out.contains(&option) {
            out.push(option);
        }
    }
    out
}

/// Editable filter specification over one dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(rename = "filter_id")]
    pub id: String,
    pub instance_id: String,
    pub dataset: DatasetRef,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub state: BlueprintState,
    /// Tri-state: `None` means the flag has not been determined yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_output_id: Option<String>,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub unique_timestamp: u64,
    pub last_updated: DateTime<Utc>,
}

impl Blueprint {
    /// Fresh, unsaved blueprint. The store assigns the ETag and write timestamp.
    pub fn new(
        id: impl Into<String>,
        dataset: DatasetRef,
        instance_id: impl Into<String>,
        dimensions: Vec<Dimension>,
    ) -> Self {
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            dataset,
            dimensions,
            events: Vec::new(),
            state: BlueprintState::Created,
            published: None,
            kind: String::new(),
            filter_output_id: None,
            etag: String::new(),
            unique_timestamp: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut Dimension> {
        self.dimensions.iter_mut().find(|d| d.name == name)
    }

    /// Append `dimension`, or replace the option set of the same-named one.
    pub fn upsert_dimension(&mut self, dimension: Dimension) {
        match self.dimension_mut(&dimension.name) {
            Some(existing) => existing.options = dimension.options,
            None => self.dimensions.push(dimension),
        }
    }

    /// Remove a dimension by name. Returns `false` if it was absent.
    pub fn remove_dimension(&mut self, name: &str) -> bool {
        let before = self.dimensions.len();
        self.dimensions.retain(|d| d.name != name);
        self.dimensions.len() != before
    }

    pub fn is_submitted(&self) -> bool {
        self.state == BlueprintState::Submitted
    }

    pub fn is_published(&self) -> bool {
        self.published == Some(true)
    }

    pub fn is_flexible(&self) -> bool {
        self.kind == FLEXIBLE_TYPE
    }
}

/// One download artefact of a filter output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artefact {
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub public: String,
    #[serde(default)]
    pub private: String,
    #[serde(default)]
    pub skipped: bool,
}

impl Artefact {
    /// An artefact counts as delivered once it has a link or was skipped.
    pub fn is_ready(&self) -> bool {
        !self.href.is_empty() || self.skipped
    }

    /// Blank out the public and private links.
    pub fn redact(&mut self) {
        self.public.clear();
        self.private.clear();
    }
}

/// Download file format of an artefact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    Csv,
    Xls,
}

impl DownloadFormat {
    pub const ALL: [DownloadFormat; 2] = [DownloadFormat::Csv, DownloadFormat::Xls];

    /// Key of the artefact inside `downloads`.
    pub fn key(&self) -> &'static str {
        match self {
            DownloadFormat::Csv => "csv",
            DownloadFormat::Xls => "xls",
        }
    }

    /// File extension served by the download service.
    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Csv => "csv",
            DownloadFormat::Xls => "xlsx",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv: Option<Artefact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xls: Option<Artefact>,
}

impl Downloads {
    pub fn get(&self, format: DownloadFormat) -> Option<&Artefact> {
        match format {
            DownloadFormat::Csv => self.csv.as_ref(),
            DownloadFormat::Xls => self.xls.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, format: DownloadFormat) -> &mut Option<Artefact> {
        match format {
            DownloadFormat::Csv => &mut self.csv,
            DownloadFormat::Xls => &mut self.xls,
        }
    }

    /// Both artefacts present with a link or explicitly skipped.
    pub fn is_complete(&self) -> bool {
        DownloadFormat::ALL
            .iter()
            .all(|f| self.get(*f).is_some_and(Artefact::is_ready))
    }

    pub fn redact(&mut self) {
        for artefact in [self.csv.as_mut(), self.xls.as_mut()].into_iter().flatten() {
            artefact.redact();
        }
    }
}

/// Materialised product of a submitted blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: String,
    /// Blueprint this output was submitted from.
    pub filter_id: String,
    pub instance_id: String,
    pub dataset: DatasetRef,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub state: OutputState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub downloads: Downloads,
    #[serde(default)]
    pub unique_timestamp: u64,
    pub last_updated: DateTime<Utc>,
}

impl Output {
    /// Derive a new output from `blueprint`, stamped with a `FilterOutputCreated` event.
    pub fn from_blueprint(
        id: impl Into<String>,
        blueprint: &Blueprint,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            filter_id: blueprint.id.clone(),
            instance_id: blueprint.instance_id.clone(),
            dataset: blueprint.dataset.clone(),
            dimensions: blueprint.dimensions.clone(),
            events: vec![Event::new(EventType::FilterOutputCreated, now)],
            state: OutputState::Created,
            published: blueprint.published,
            kind: blueprint.kind.clone(),
            downloads: Downloads::default(),
            unique_timestamp: 0,
            last_updated: now,
        }
    }

    pub fn is_published(&self) -> bool {
        self.published == Some(true)
    }

    pub fn is_flexible(&self) -> bool {
        self.kind == FLEXIBLE_TYPE
    }

    /// Move to `completed` when both artefacts are ready.
    ///
    /// Returns `true` only on the transition itself; an already completed
    /// output is left untouched so repeated calls add no further events.
    pub fn complete_if_ready(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == OutputState::Completed || !self.downloads.is_complete() {
            return false;
        }
        self.state = OutputState::Completed;
        self.events
            .push(Event::new(EventType::FilterOutputCompleted, now));
        true
    }

    /// Copy with public and private links removed.
    pub fn redacted(&self) -> Self {
        let mut output = self.clone();
        output.downloads.redact();
        output
    }
}
