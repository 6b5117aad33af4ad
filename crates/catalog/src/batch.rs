use crate::{CatalogError, DatasetCatalog};
use futures::stream::{self, BoxStream, StreamExt};
use model::DatasetRef;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Bounds on a batched option lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum ids per catalog request.
    pub batch_size: usize,
    /// Maximum catalog requests in flight for one lookup.
    pub max_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_workers: 10,
        }
    }
}

/// Look `ids` up in batches of at most `batch_size`, with at most
/// `max_workers` requests in flight.
///
/// `handle_batch` receives each batch's requested ids and the ids the
/// catalog confirmed, in completion order. The first failing batch (or
/// `handle_batch` error) stops new batches from starting; batches already in
/// flight run to completion and are discarded before the error is returned.
pub async fn get_options_batched<C, F>(
    catalog: &C,
    dataset: &DatasetRef,
    dimension: &str,
    ids: &[String],
    config: BatchConfig,
    mut handle_batch: F,
) -> Result<(), CatalogError>
where
    C: DatasetCatalog + ?Sized,
    F: FnMut(&[String], Vec<String>) -> Result<(), CatalogError>,
{
    if ids.is_empty() {
        return Ok(());
    }

    let batch_size = config.batch_size.max(1);
    let max_workers = config.max_workers.max(1);
    let aborted = AtomicBool::new(false);
    let aborted = &aborted;

    debug!(
        dataset = %dataset,
        dimension,
        ids = ids.len(),
        batch_size,
        max_workers,
        "Checking dimension options"
    );

    // The stream is boxed so the generator below does not hold the closure
    // type across an await; otherwise rustc's higher-ranked `Send` inference
    // fails when this future is awaited from an axum handler
    // (rust-lang/rust#64552).
    let mut batches: BoxStream<'_, (&[String], Option<Result<Vec<String>, CatalogError>>)> =
        stream::iter(ids.chunks(batch_size))
            .map(|chunk| async move {
                if aborted.load(Ordering::Acquire) {
                    return (chunk, None);
                }
                let found = catalog.get_options(dataset, dimension, chunk).await;
                (chunk, Some(found))
            })
            .buffer_unordered(max_workers)
            .boxed();

    let mut first_error: Option<CatalogError> = None;
    while let Some((chunk, outcome)) = batches.next().await {
        let Some(outcome) = outcome else { continue };
        if first_error.is_some() {
            continue;
        }
        let result = outcome.and_then(|found| handle_batch(chunk, found));
        if let Err(err) = result {
            aborted.store(true, Ordering::Release);
            first_error = Some(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
