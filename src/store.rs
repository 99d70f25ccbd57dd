use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{decode_coordinates, decode_sparse_vector, decode_string_table};
use crate::coalesce::Coalescer;
use crate::config::{Config, FallbackPolicy, StoreConfig};
use crate::domain::{Category, Cell, FeatureKey};
use crate::error::FeatureError;
use crate::metadata::{METADATA_KEY, MetadataIndex};
use crate::source::ByteSource;

pub const CELL_IDS_KEY: &str = "base/cell_ids.bin";
pub const COORDINATES_KEY: &str = "base/coordinates.bin";
pub const SLICES_KEY: &str = "base/sections.bin";
pub const REGIONS_KEY: &str = "base/celltypes.bin";

/// Feature vectors are indexed by cell position.
#[derive(Debug)]
pub struct BaseData {
    cells: Vec<Cell>,
    positions: HashMap<String, usize>,
}

impl BaseData {
    pub fn new(cells: Vec<Cell>) -> Result<Self, FeatureError> {
        let mut positions = HashMap::with_capacity(cells.len());
        for (position, cell) in cells.iter().enumerate() {
            if positions.insert(cell.id.clone(), position).is_some() {
                return Err(FeatureError::malformed(
                    0,
                    format!("unique cell ids, found duplicate {}", cell.id),
                ));
            }
        }
        Ok(Self { cells, positions })
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn index_of(&self, cell_id: &str) -> Option<usize> {
        self.positions.get(cell_id).copied()
    }

    pub fn cell(&self, cell_id: &str) -> Option<&Cell> {
        self.index_of(cell_id).map(|position| &self.cells[position])
    }
}

/// Dense, read-only view of a decoded feature. Clones share the cached buffer.
#[derive(Clone, PartialEq)]
pub struct FeatureVector(Arc<[f32]>);

impl FeatureVector {
    pub fn zeros(len: usize) -> Self {
        Self(Arc::from(vec![0.0_f32; len]))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn value_for(&self, base: &BaseData, cell_id: &str) -> Option<f32> {
        base.index_of(cell_id)
            .and_then(|position| self.0.get(position).copied())
    }

    pub fn non_zero(&self) -> usize {
        self.0.iter().filter(|value| **value != 0.0).count()
    }

    pub fn shares_buffer(&self, other: &FeatureVector) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(Arc::from(values))
    }
}

impl Deref for FeatureVector {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureVector")
            .field("len", &self.0.len())
            .field("non_zero", &self.non_zero())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub initialized: bool,
    pub cells: usize,
    pub genes: usize,
    pub tfs: usize,
    pub cached_features: usize,
    pub raw_buffers: usize,
    pub pending_loads: usize,
    pub cache_generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchSummary {
    pub requested: usize,
    pub ready: usize,
    pub failed: usize,
}

#[derive(Clone)]
struct Dataset {
    metadata: Arc<MetadataIndex>,
    base: Arc<BaseData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DatasetKey;

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dataset")
    }
}

pub struct FeatureStore<S: ByteSource> {
    source: S,
    config: StoreConfig,
    dataset: Coalescer<DatasetKey, Dataset>,
    raw: Coalescer<FeatureKey, Arc<[u8]>>,
    decoded: Coalescer<FeatureKey, FeatureVector>,
}

impl FeatureStore<Box<dyn ByteSource>> {
    pub fn from_config(config: &Config) -> Result<Self, FeatureError> {
        Ok(Self::new(config.source.open()?, config.store.clone()))
    }
}

impl<S: ByteSource> FeatureStore<S> {
    pub fn new(source: S, config: StoreConfig) -> Self {
        let timeout = config.wait_timeout();
        Self {
            source,
            config,
            dataset: Coalescer::new(timeout),
            raw: Coalescer::new(timeout),
            decoded: Coalescer::new(timeout),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Concurrent and repeated calls share one load. A failed load is retried by the next call.
    pub fn initialize(&self) -> Result<Arc<BaseData>, FeatureError> {
        let dataset = self.dataset.get_or_load(&DatasetKey, || {
            self.load_dataset()
                .map_err(|err| FeatureError::InitializationFailed(Box::new(err)))
        })?;
        Ok(dataset.base)
    }

    pub fn is_initialized(&self) -> bool {
        self.dataset.contains(&DatasetKey)
    }

    pub fn base_data(&self) -> Result<Arc<BaseData>, FeatureError> {
        Ok(self.ready()?.base)
    }

    pub fn metadata(&self) -> Result<Arc<MetadataIndex>, FeatureError> {
        Ok(self.ready()?.metadata)
    }

    /// Dense vector for `name`, aligned with [`BaseData::cells`].
    pub fn load_feature(
        &self,
        name: &str,
        category: Category,
    ) -> Result<FeatureVector, FeatureError> {
        let dataset = self.ready()?;
        if self.config.strict_names {
            dataset.metadata.validate(name, category)?;
        }
        let cell_count = dataset.base.len();
        let key = FeatureKey::new(name, category);
        let outcome = self
            .decoded
            .get_or_load(&key, || self.decode_feature(&key, cell_count));
        match outcome {
            Ok(vector) => {
                self.release_raw(&key, &vector);
                Ok(vector)
            }
            Err(err)
                if self.config.fallback == FallbackPolicy::ZeroFill
                    && err.is_recoverable_load_failure() =>
            {
                warn!(feature = %key, error = %err, "feature unavailable, using zero vector");
                Ok(FeatureVector::zeros(cell_count))
            }
            Err(err) => Err(err),
        }
    }

    /// Like [`FeatureStore::load_feature`] with the category taken from the metadata index,
    /// or inferred from the name when the index does not list it.
    pub fn load_feature_auto(&self, name: &str) -> Result<FeatureVector, FeatureError> {
        let category = self.metadata()?.category_of(name);
        self.load_feature(name, category)
    }

    pub fn load_multiple_features<N: AsRef<str>>(
        &self,
        names: &[N],
        category: Category,
    ) -> Result<HashMap<String, FeatureVector>, FeatureError> {
        self.ready()?;
        let distinct: BTreeSet<&str> = names.iter().map(|name| name.as_ref()).collect();
        distinct
            .into_par_iter()
            .map(|name| {
                self.load_feature(name, category)
                    .map(|vector| (name.to_string(), vector))
            })
            .collect()
    }

    /// Fetches raw records without decoding them.
    pub fn prefetch<N: AsRef<str>>(
        &self,
        names: &[N],
        category: Category,
    ) -> Result<PrefetchSummary, FeatureError> {
        let dataset = self.ready()?;
        let distinct: BTreeSet<&str> = names.iter().map(|name| name.as_ref()).collect();
        if self.config.strict_names {
            for name in &distinct {
                dataset.metadata.validate(name, category)?;
            }
        }
        let requested = distinct.len();
        let failed = distinct
            .into_par_iter()
            .map(|name| FeatureKey::new(name, category))
            .filter(|key| !self.decoded.is_pending_or_resident(key))
            .filter(|key| !self.prefetch_raw(key))
            .count();
        Ok(PrefetchSummary {
            requested,
            ready: requested - failed,
            failed,
        })
    }

    pub fn is_cached(&self, name: &str, category: Category) -> bool {
        self.decoded.contains(&FeatureKey::new(name, category))
    }

    pub fn stats(&self) -> StoreStats {
        let decoded = self.decoded.stats();
        let raw = self.raw.stats();
        let mut stats = StoreStats {
            cached_features: decoded.resident,
            raw_buffers: raw.resident,
            pending_loads: decoded.pending + raw.pending,
            cache_generation: decoded.generation,
            ..StoreStats::default()
        };
        if let Some(dataset) = self.dataset.get(&DatasetKey) {
            stats.initialized = true;
            stats.cells = dataset.base.len();
            stats.genes = dataset.metadata.total(Category::Gene);
            stats.tfs = dataset.metadata.total(Category::TfActivity);
        }
        stats
    }

    pub fn clear_cache(&self) {
        self.raw.clear();
        let generation = self.decoded.clear();
        info!(generation, "feature cache cleared");
    }

    fn ready(&self) -> Result<Dataset, FeatureError> {
        self.dataset
            .get(&DatasetKey)
            .ok_or(FeatureError::NotInitialized)
    }

    fn prefetch_raw(&self, key: &FeatureKey) -> bool {
        let outcome = self.raw.get_or_load(key, || {
            // A load may have decoded the record since the caller checked.
            if self.decoded.contains(key) {
                return Err(FeatureError::LoadAbandoned {
                    key: key.to_string(),
                });
            }
            self.fetch_raw(key)
        });
        if self.decoded.contains(key) {
            self.raw.evict(key);
            return true;
        }
        match outcome {
            Ok(_) => true,
            Err(err) => {
                debug!(feature = %key, error = %err, "prefetch failed");
                false
            }
        }
    }

    // Raw bytes are released only once the decoded tier holds this vector.
    fn release_raw(&self, key: &FeatureKey, vector: &FeatureVector) {
        let stored = self
            .decoded
            .get(key)
            .is_some_and(|cached| cached.shares_buffer(vector));
        if stored {
            self.raw.evict(key);
        }
    }

    fn fetch_raw(&self, key: &FeatureKey) -> Result<Arc<[u8]>, FeatureError> {
        let resource = key.resource_key();
        debug!(%resource, "fetching feature record");
        self.source.fetch(&resource).map(Arc::from)
    }

    fn decode_feature(
        &self,
        key: &FeatureKey,
        cell_count: usize,
    ) -> Result<FeatureVector, FeatureError> {
        let bytes = self.raw.get_or_load(key, || self.fetch_raw(key))?;
        let decoded = match decode_sparse_vector(&bytes, cell_count, self.config.index_policy) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.raw.evict(key);
                return Err(err);
            }
        };
        if decoded.skipped > 0 {
            warn!(
                feature = %key,
                skipped = decoded.skipped,
                cell_count,
                "dropped out-of-range cell indices"
            );
        }
        Ok(FeatureVector::from(decoded.values))
    }

    fn load_dataset(&self) -> Result<Dataset, FeatureError> {
        let metadata = MetadataIndex::parse(&self.source.fetch(METADATA_KEY)?)?;
        let ids = decode_string_table(&self.source.fetch(CELL_IDS_KEY)?)?;
        let coordinates = decode_coordinates(&self.source.fetch(COORDINATES_KEY)?)?;
        let slices = decode_string_table(&self.source.fetch(SLICES_KEY)?)?;
        let regions = decode_string_table(&self.source.fetch(REGIONS_KEY)?)?;

        for (what, len) in [
            ("coordinates", coordinates.len()),
            ("slice labels", slices.len()),
            ("region labels", regions.len()),
        ] {
            if len != ids.len() {
                return Err(FeatureError::malformed(
                    0,
                    format!("{} {what} to match cell ids, found {len}", ids.len()),
                ));
            }
        }

        if let Some(total_cells) = metadata.document().total_cells {
            if total_cells != ids.len() {
                warn!(
                    declared = total_cells,
                    loaded = ids.len(),
                    "metadata cell count disagrees with base data"
                );
            }
        }

        let cells = ids
            .into_iter()
            .zip(coordinates)
            .zip(slices.into_iter().zip(regions))
            .map(|((id, (x, y)), (slice, region))| Cell {
                id,
                x,
                y,
                slice,
                region,
            })
            .collect();
        let base = BaseData::new(cells)?;

        info!(
            cells = base.len(),
            genes = metadata.total(Category::Gene),
            tfs = metadata.total(Category::TfActivity),
            "dataset initialized"
        );
        Ok(Dataset {
            metadata: Arc::new(metadata),
            base: Arc::new(base),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::codec::{encode_coordinates, encode_sparse_vector, encode_string_table};
    use crate::source::MemoryByteSource;

    const METADATA: &str =
        r#"{"genes": {"total": 1, "features": ["Shh"]}, "tfs": {"total": 0, "features": []}}"#;

    fn source() -> MemoryByteSource {
        MemoryByteSource::new()
            .with(METADATA_KEY, METADATA.as_bytes().to_vec())
            .with(CELL_IDS_KEY, encode_string_table(&["c0", "c1"]))
            .with(COORDINATES_KEY, encode_coordinates(&[(0.0, 1.0), (2.0, 3.0)]))
            .with(SLICES_KEY, encode_string_table(&["E13", "E13"]))
            .with(REGIONS_KEY, encode_string_table(&["palate", "tongue"]))
            .with("genes/Shh.bin", encode_sparse_vector(&[(1, 4.5)]))
    }

    #[test]
    fn base_data_requires_initialize() {
        let store = FeatureStore::new(source(), StoreConfig::default());
        assert_matches!(store.base_data(), Err(FeatureError::NotInitialized));
        assert_matches!(
            store.load_feature("Shh", Category::Gene),
            Err(FeatureError::NotInitialized)
        );
        assert!(!store.stats().initialized);
    }

    #[test]
    fn cached_vectors_share_one_buffer() {
        let store = FeatureStore::new(source(), StoreConfig::default());
        let base = store.initialize().unwrap();
        let first = store.load_feature("Shh", Category::Gene).unwrap();
        let second = store.load_feature("Shh", Category::Gene).unwrap();
        assert!(first.shares_buffer(&second));
        assert_eq!(first.value_for(&base, "c1"), Some(4.5));
        assert_eq!(store.stats().raw_buffers, 0);
    }

    #[test]
    fn duplicate_cell_ids_are_rejected() {
        let store = FeatureStore::new(
            source().with(CELL_IDS_KEY, encode_string_table(&["c0", "c0"])),
            StoreConfig::default(),
        );
        let err = store.initialize().unwrap_err();
        assert_matches!(err, FeatureError::InitializationFailed(inner) if inner.is_malformed());
    }
}
