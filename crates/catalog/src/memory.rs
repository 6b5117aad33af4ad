use crate::{CatalogError, Dataset, DatasetCatalog, Version, VersionDimension, PUBLISHED_STATE};
use async_trait::async_trait;
use model::DatasetRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct VersionFixture {
    version: Option<Version>,
    /// Declared dimensions in declaration order.
    dimensions: Vec<(String, Vec<String>)>,
}

/// Fixture-backed catalog for tests and local runs.
///
/// Also records how many option lookups it served and how many overlapped,
/// so fan-out limits can be asserted.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    datasets: RwLock<HashMap<String, Dataset>>,
    versions: RwLock<HashMap<DatasetRef, VersionFixture>>,
    latency: Option<Duration>,
    option_requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, id: &str, kind: &str) -> Self {
        self.put_dataset(Dataset {
            id: id.to_string(),
            kind: kind.to_string(),
            state: PUBLISHED_STATE.to_string(),
        });
        self
    }

    pub fn with_version(self, dataset: &DatasetRef, instance_id: &str, published: bool) -> Self {
        self.put_version(dataset, instance_id, published);
        self
    }

    pub fn with_dimension<I, S>(self, dataset: &DatasetRef, name: &str, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.put_dimension(dataset, name, options);
        self
    }

    /// Delay every option lookup by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn put_dataset(&self, dataset: Dataset) {
        if let Ok(mut guard) = self.datasets.write() {
            guard.insert(dataset.id.clone(), dataset);
        }
    }

    /// Add or replace a version, e.g. to publish it after the fact.
    pub fn put_version(&self, dataset: &DatasetRef, instance_id: &str, published: bool) {
        if let Ok(mut guard) = self.versions.write() {
            let state = if published { PUBLISHED_STATE } else { "associated" };
            guard.entry(dataset.clone()).or_default().version = Some(Version {
                instance_id: instance_id.to_string(),
                state: state.to_string(),
            });
        }
    }

    pub fn put_dimension<I, S>(&self, dataset: &DatasetRef, name: &str, options: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut guard) = self.versions.write() {
            let fixture = guard.entry(dataset.clone()).or_default();
            let options: Vec<String> = options.into_iter().map(Into::into).collect();
            match fixture.dimensions.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => existing.extend(options),
                None => fixture.dimensions.push((name.to_string(), options)),
            }
        }
    }

    /// Number of option lookups served so far.
    pub fn option_requests(&self) -> usize {
        self.option_requests.load(Ordering::SeqCst)
    }

    /// Highest number of option lookups that ran at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn fixture(&self, dataset: &DatasetRef) -> Result<VersionFixture, CatalogError> {
        let guard = self
            .versions
            .read()
            .map_err(|_| CatalogError::Transport("poisoned lock".into()))?;
        guard
            .get(dataset)
            .filter(|f| f.version.is_some())
            .cloned()
            .ok_or_else(|| CatalogError::VersionNotFound(dataset.to_string()))
    }
}

#[async_trait]
impl DatasetCatalog for InMemoryCatalog {
    async fn get_dataset(&self, id: &str) -> Result<Dataset, CatalogError> {
        let guard = self
            .datasets
            .read()
            .map_err(|_| CatalogError::Transport("poisoned lock".into()))?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::DatasetNotFound(id.to_string()))
    }

    async fn get_version(
        &self,
        dataset: &DatasetRef,
        authenticated: bool,
    ) -> Result<Version, CatalogError> {
        let fixture = self.fixture(dataset)?;
        let version = fixture
            .version
            .ok_or_else(|| CatalogError::VersionNotFound(dataset.to_string()))?;
        version.visible_to(dataset, authenticated)
    }

    async fn get_version_dimensions(
        &self,
        dataset: &DatasetRef,
    ) -> Result<Vec<VersionDimension>, CatalogError> {
        let fixture = self.fixture(dataset)?;
        Ok(fixture
            .dimensions
            .into_iter()
            .map(|(name, _)| VersionDimension {
                name,
                label: String::new(),
            })
            .collect())
    }

    async fn get_options(
        &self,
        dataset: &DatasetRef,
        dimension: &str,
        ids: &[String],
    ) -> Result<Vec<String>, CatalogError> {
        self.option_requests.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.fixture(dataset).and_then(|fixture| {
            let (_, options) = fixture
                .dimensions
                .iter()
                .find(|(name, _)| name == dimension)
                .ok_or_else(|| CatalogError::DimensionNotFound(dimension.to_string()))?;
            Ok(ids
                .iter()
                .filter(|id| options.contains(id))
                .cloned()
                .collect())
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> DatasetRef {
        DatasetRef::new("cpih01", "time-series", 1)
    }

    #[tokio::test]
    async fn serves_fixtures() {
        let catalog = InMemoryCatalog::new()
            .with_dataset("cpih01", "filterable")
            .with_version(&dataset(), "inst-1", true)
            .with_dimension(&dataset(), "age", ["1", "2"])
            .with_dimension(&dataset(), "sex", ["m"]);

        assert_eq!(catalog.get_dataset("cpih01").await.unwrap().kind, "filterable");
        assert_eq!(
            catalog.get_version(&dataset(), false).await.unwrap().instance_id,
            "inst-1"
        );
        let names: Vec<_> = catalog
            .get_version_dimensions(&dataset())
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["age", "sex"]);

        let found = catalog
            .get_options(&dataset(), "age", &["2".into(), "9".into()])
            .await
            .unwrap();
        assert_eq!(found, vec!["2"]);
    }

    #[tokio::test]
    async fn missing_version_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.get_version(&dataset(), true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn publishing_later_makes_version_visible() {
        let catalog = InMemoryCatalog::new().with_version(&dataset(), "inst-1", false);
        assert!(catalog.get_version(&dataset(), false).await.is_err());
        catalog.put_version(&dataset(), "inst-1", true);
        assert!(catalog.get_version(&dataset(), false).await.is_ok());
    }
}
