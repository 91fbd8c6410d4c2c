//! Where labeled pairs come from.

use std::collections::BTreeMap;

use pair_store::{pairs_prefix, ObjectStore, PairRecord, StoreError, DATASETS_BUCKET};

/// Read access to the labeled pairs of named datasets.
pub trait EmbeddingSource: Send + Sync {
    /// Keys of every pair record in the dataset, in a stable order.
    fn list_pairs(&self, dataset_name: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch and decode one pair record.
    fn read_pair(&self, dataset_name: &str, key: &str) -> Result<PairRecord, StoreError>;
}

/// Pairs stored as JSON objects under `{dataset}/pairs/` in an object store.
pub struct ObjectStoreSource<S> {
    store: S,
    bucket: String,
}

impl<S: ObjectStore> ObjectStoreSource<S> {
    /// Read from the shared datasets bucket.
    pub fn new(store: S) -> Self {
        Self::with_bucket(store, DATASETS_BUCKET)
    }

    pub fn with_bucket(store: S, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

impl<S: ObjectStore> EmbeddingSource for ObjectStoreSource<S> {
    fn list_pairs(&self, dataset_name: &str) -> Result<Vec<String>, StoreError> {
        let keys = self.store.list(&self.bucket, &pairs_prefix(dataset_name))?;
        Ok(keys.into_iter().filter(|k| k.ends_with(".json")).collect())
    }

    fn read_pair(&self, _dataset_name: &str, key: &str) -> Result<PairRecord, StoreError> {
        let bytes = self.store.get(&self.bucket, key)?;
        PairRecord::from_json(key, &bytes)
    }
}

/// Pairs held in memory, keyed by insertion index. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemorySource {
    datasets: BTreeMap<String, Vec<PairRecord>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source holding a single dataset.
    pub fn with_dataset(dataset_name: &str, pairs: Vec<PairRecord>) -> Self {
        let mut source = Self::new();
        source.insert(dataset_name, pairs);
        source
    }

    pub fn insert(&mut self, dataset_name: &str, pairs: Vec<PairRecord>) {
        self.datasets.insert(dataset_name.to_string(), pairs);
    }

    fn key(index: usize) -> String {
        format!("{index:08}")
    }
}

impl EmbeddingSource for InMemorySource {
    fn list_pairs(&self, dataset_name: &str) -> Result<Vec<String>, StoreError> {
        let pairs = self.datasets.get(dataset_name).ok_or_else(|| StoreError::NotFound {
            bucket: "memory".to_string(),
            path: dataset_name.to_string(),
        })?;
        Ok((0..pairs.len()).map(Self::key).collect())
    }

    fn read_pair(&self, dataset_name: &str, key: &str) -> Result<PairRecord, StoreError> {
        let not_found = || StoreError::NotFound {
            bucket: "memory".to_string(),
            path: format!("{dataset_name}/{key}"),
        };
        let index: usize = key.parse().map_err(|_| not_found())?;
        self.datasets
            .get(dataset_name)
            .and_then(|pairs| pairs.get(index))
            .cloned()
            .ok_or_else(not_found)
    }
}
