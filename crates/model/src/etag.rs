//! ETag engine.
//!
//! An ETag is a SHA-256 digest over the observable content of a blueprint
//! (or output). The store computes the next ETag by applying a change to the
//! current document in memory and hashing the result, then writes document
//! and ETag together.
//!
//! # Algorithm
//!
//! ```text
//! SHA-256(0x00 || field_1 || 0x1f || field_2 || 0x1f || ...)
//! ```
//!
//! Every variable-length field is length-prefixed so that adjacent fields can
//! never be confused. Option lists are sorted before hashing because their
//! order is not observable by clients; dimension order is.

use sha2::{Digest, Sha256};

use crate::events::Event;
use crate::types::{Artefact, Blueprint, DatasetRef, Dimension, Output};

/// Selector value that accepts whatever ETag is currently stored.
pub const ANY: &str = "*";

/// Condition attached to a read or write of a blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ETagSelector {
    /// Skip the concurrency check.
    #[default]
    Any,
    /// Stored ETag must equal this value.
    Exact(String),
}

impl ETagSelector {
    /// Parse an `If-Match` header value.
    ///
    /// Surrounding quotes and a weak `W/` prefix are ignored; `*` is [`ETagSelector::Any`].
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == ANY {
            return ETagSelector::Any;
        }
        let unweak = trimmed.strip_prefix("W/").unwrap_or(trimmed);
        let unquoted = unweak
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(unweak);
        ETagSelector::Exact(unquoted.to_string())
    }

    pub fn exact(etag: impl Into<String>) -> Self {
        ETagSelector::Exact(etag.into())
    }

    pub fn matches(&self, stored: &str) -> bool {
        match self {
            ETagSelector::Any => true,
            ETagSelector::Exact(expected) => expected == stored,
        }
    }
}

impl std::fmt::Display for ETagSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ETagSelector::Any => f.write_str(ANY),
            ETagSelector::Exact(etag) => f.write_str(etag),
        }
    }
}

struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    fn new(discriminator: u8) -> Self {
        let mut inner = Sha256::new();
        inner.update([discriminator]);
        Self { inner }
    }

    fn str(&mut self, value: &str) -> &mut Self {
        self.inner.update((value.len() as u64).to_be_bytes());
        self.inner.update(value.as_bytes());
        self.inner.update([0x1f]);
        self
    }

    fn u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self.inner.update([0x1f]);
        self
    }

    fn flag(&mut self, value: Option<bool>) -> &mut Self {
        let byte = match value {
            None => 0u8,
            Some(false) => 1,
            Some(true) => 2,
        };
        self.inner.update([byte, 0x1f]);
        self
    }

    fn dataset(&mut self, dataset: &DatasetRef) -> &mut Self {
        self.str(&dataset.id)
            .str(&dataset.edition)
            .u64(u64::from(dataset.version))
    }

    fn dimensions(&mut self, dimensions: &[Dimension]) -> &mut Self {
        self.u64(dimensions.len() as u64);
        for dimension in dimensions {
            let mut options: Vec<&str> = dimension.options.iter().map(String::as_str).collect();
            options.sort_unstable();
            options.dedup();
            self.str(&dimension.name).u64(options.len() as u64);
            for option in options {
                self.str(option);
            }
        }
        self
    }

    fn events(&mut self, events: &[Event]) -> &mut Self {
        self.u64(events.len() as u64);
        for event in events {
            self.str(event.kind.as_str())
                .str(&event.time.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true));
        }
        self
    }

    fn artefact(&mut self, artefact: Option<&Artefact>) -> &mut Self {
        match artefact {
            None => self.u64(0),
            Some(a) => self
                .u64(1)
                .str(&a.href)
                .str(&a.size)
                .str(&a.public)
                .str(&a.private)
                .flag(Some(a.skipped)),
        }
    }

    fn finish(&mut self) -> String {
        hex::encode(self.inner.clone().finalize())
    }
}

/// Compute the ETag of a blueprint from its observable fields.
///
/// The stored ETag, write timestamp and `last_updated` are excluded, so
/// re-hashing a stored blueprint yields its stored ETag.
pub fn blueprint_etag(blueprint: &Blueprint) -> String {
    ContentHasher::new(0x00)
        .str(&blueprint.id)
        .dataset(&blueprint.dataset)
        .str(&blueprint.instance_id)
        .str(blueprint.state.as_str())
        .flag(blueprint.published)
        .dimensions(&blueprint.dimensions)
        .events(&blueprint.events)
        .str(&blueprint.kind)
        .str(blueprint.filter_output_id.as_deref().unwrap_or(""))
        .finish()
}

/// Compute the content ETag reported on output responses.
pub fn output_etag(output: &Output) -> String {
    ContentHasher::new(0x01)
        .str(&output.id)
        .str(&output.filter_id)
        .dataset(&output.dataset)
        .str(&output.instance_id)
        .str(output.state.as_str())
        .flag(output.published)
        .dimensions(&output.dimensions)
        .events(&output.events)
        .str(&output.kind)
        .artefact(output.downloads.csv.as_ref())
        .artefact(output.downloads.xls.as_ref())
        .finish()
}
