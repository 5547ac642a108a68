//! Coordinate map manager
//!
//! The manager owns every coordinate map it creates, keyed by
//! [`CoordinateMapKey`]. Callers hold keys and read-only views; maps are
//! never removed or renumbered while the manager lives, so row indices and
//! keys handed out earlier stay valid.
//!
//! A new map is built off to the side and published under the write lock
//! only once it is complete, so a failed call never leaves a partial map
//! behind.

use crate::config::ManagerConfig;
use crate::coordinate::{Coordinate, CoordinateBatch, CoordinateMapKey, TensorStride, quantize};
use crate::error::{Error, Result};
use crate::kernel_map::{KernelMap, KernelMapGenerator};
use crate::map::{CoordinateMap, InsertionMaps, RowIndex};
use crate::region::Stencil;
use crate::runtime::{self, Allocator, try_reserve, try_vec};
use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use smallvec::smallvec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-input `(input rows, output rows)` lists
pub type RowPairs = (Vec<RowIndex>, Vec<RowIndex>);

/// Everything that identifies a kernel map
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct KernelMapQuery {
    in_key: CoordinateMapKey,
    out_key: CoordinateMapKey,
    stencil: Stencil,
    is_transpose: bool,
    is_pool: bool,
}

/// Read-only view of one map's coordinates
#[derive(Clone, Debug)]
pub struct CoordinateView {
    map: Arc<dyn CoordinateMap>,
}

impl CoordinateView {
    /// Rows in row-index order
    pub fn batch(&self) -> CoordinateBatch<'_> {
        self.map.coordinates()
    }

    /// Row `index`, or `None` past the end
    pub fn row(&self, index: usize) -> Option<&[i32]> {
        self.map.row(index)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.map.size()
    }

    /// Whether the map has no rows
    pub fn is_empty(&self) -> bool {
        self.map.size() == 0
    }

    /// Width of each row
    pub fn coordinate_size(&self) -> usize {
        self.map.coordinate_size()
    }

    /// Look up coordinates in the viewed map
    pub fn find(&self, queries: CoordinateBatch<'_>) -> Result<Vec<Option<RowIndex>>> {
        self.map.find(queries)
    }

    /// Copy the rows into a flat row-major buffer
    pub fn to_vec(&self) -> Vec<i32> {
        self.map.coordinates().as_slice().to_vec()
    }
}

/// Registry of coordinate maps and kernel map generator
pub struct CoordinateManager {
    config: ManagerConfig,
    allocator: Box<dyn Allocator>,
    #[cfg(feature = "rayon")]
    pool: rayon::ThreadPool,
    maps: RwLock<BTreeMap<CoordinateMapKey, Arc<dyn CoordinateMap>>>,
    kernel_maps: Mutex<AHashMap<KernelMapQuery, Arc<KernelMap>>>,
}

impl CoordinateManager {
    /// Create an empty manager
    ///
    /// Fails with `InvalidRank` for a zero dimension and
    /// `BackendUnavailable` when the configured backend is absent.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        #[cfg(feature = "rayon")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads())
            .thread_name(|i| format!("sparse-coord-{}", i))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build worker pool: {}", e)))?;

        tracing::debug!(
            dimension = config.dimension(),
            backend = config.backend().name(),
            allocator = config.allocator().name(),
            num_threads = config.num_threads(),
            "created coordinate manager"
        );

        Ok(Self {
            allocator: runtime::create_allocator(config.allocator()),
            config,
            #[cfg(feature = "rayon")]
            pool,
            maps: RwLock::new(BTreeMap::new()),
            kernel_maps: Mutex::new(AHashMap::new()),
        })
    }

    /// Create a manager for `dimension` spatial axes from the current defaults
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        Self::new(ManagerConfig::new(dimension))
    }

    /// Configuration fixed at construction
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of spatial axes
    pub fn dimension(&self) -> usize {
        self.config.dimension()
    }

    /// Scratch allocator used for kernel map generation
    pub fn allocator(&self) -> &dyn Allocator {
        &*self.allocator
    }

    /// Run `f` on the manager's worker pool.
    fn install<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
        #[cfg(feature = "rayon")]
        {
            self.pool.install(f)
        }
        #[cfg(not(feature = "rayon"))]
        {
            f()
        }
    }

    fn get(&self, key: &CoordinateMapKey) -> Result<Arc<dyn CoordinateMap>> {
        self.maps
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownKey { key: key.clone() })
    }

    /// Whether a map exists under `key`
    pub fn contains(&self, key: &CoordinateMapKey) -> bool {
        self.maps.read().contains_key(key)
    }

    /// All keys, in key order
    pub fn keys(&self) -> Vec<CoordinateMapKey> {
        self.maps.read().keys().cloned().collect()
    }

    /// Number of rows of the map under `key`
    pub fn size(&self, key: &CoordinateMapKey) -> Result<usize> {
        Ok(self.get(key)?.size())
    }

    /// Read-only view of the coordinates under `key`
    pub fn get_coordinates(&self, key: &CoordinateMapKey) -> Result<CoordinateView> {
        Ok(CoordinateView { map: self.get(key)? })
    }

    /// Number of kernel maps held in the cache
    pub fn cached_kernel_maps(&self) -> usize {
        self.kernel_maps.lock().len()
    }

    fn check_tensor_stride(&self, tensor_stride: &[u32], arg: &'static str) -> Result<()> {
        if tensor_stride.len() != self.dimension() {
            return Err(Error::invalid_argument(
                arg,
                format!(
                    "expected {} entries, got {}",
                    self.dimension(),
                    tensor_stride.len()
                ),
            ));
        }
        if tensor_stride.contains(&0) {
            return Err(Error::invalid_argument(arg, "every entry must be > 0"));
        }
        Ok(())
    }

    fn build_map(
        &self,
        coordinates: CoordinateBatch<'_>,
    ) -> Result<(Box<dyn CoordinateMap>, InsertionMaps)> {
        let mut map = runtime::create_map(self.config.backend(), self.config.coordinate_size())?;
        let maps = map.insert_and_map(coordinates)?;
        Ok((map, maps))
    }

    /// Publish a finished map; fails if the key was taken meanwhile.
    fn publish(&self, key: &CoordinateMapKey, map: Box<dyn CoordinateMap>) -> Result<()> {
        let mut maps = self.maps.write();
        if maps.contains_key(key) {
            return Err(Error::DuplicateKey { key: key.clone() });
        }
        maps.insert(key.clone(), Arc::from(map));
        Ok(())
    }

    /// Publish a derived map unless an equal key appeared meanwhile.
    fn publish_derived(&self, key: &CoordinateMapKey, map: Box<dyn CoordinateMap>) {
        self.maps
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::from(map));
    }

    /// Insert a raw batch as a new map at `(tensor_stride, label)`
    ///
    /// Returns the new key with the unique and inverse maps of the batch.
    /// Fails with `DuplicateKey` if the key already exists.
    pub fn insert_and_map(
        &self,
        coordinates: CoordinateBatch<'_>,
        tensor_stride: &[u32],
        label: &str,
    ) -> Result<(CoordinateMapKey, InsertionMaps)> {
        self.check_tensor_stride(tensor_stride, "tensor_stride")?;
        let key = CoordinateMapKey::new(tensor_stride, label);
        if self.contains(&key) {
            return Err(Error::DuplicateKey { key });
        }

        let (map, maps) = self.build_map(coordinates)?;
        let size = map.size();
        self.publish(&key, map)?;
        tracing::debug!(
            key = %key,
            input_rows = coordinates.len(),
            unique_rows = size,
            "inserted coordinate map"
        );
        Ok((key, maps))
    }

    /// Derive the map at `stride` times the tensor stride of `key`
    ///
    /// Every spatial component is quantized down to a multiple of the new
    /// tensor stride and the result is deduplicated. If a map already
    /// exists under the derived key it is returned unchanged.
    pub fn stride(&self, key: &CoordinateMapKey, stride: &[u32]) -> Result<CoordinateMapKey> {
        let source = self.get(key)?;
        if key.tensor_stride().is_origin() {
            return Err(Error::invalid_argument(
                "key",
                "the origin map has no spatial extent to stride",
            ));
        }
        self.check_tensor_stride(stride, "stride")?;
        let tensor_stride = key.tensor_stride().checked_mul(stride).ok_or_else(|| {
            Error::invalid_argument(
                "stride",
                format!("{} times {:?} overflows", key.tensor_stride(), stride),
            )
        })?;
        let target = key.with_stride(tensor_stride);
        if self.contains(&target) {
            tracing::trace!(key = %target, "strided map already present");
            return Ok(target);
        }

        let quantized = self.quantize_rows(source.coordinates(), target.tensor_stride())?;
        let batch = CoordinateBatch::new(&quantized, self.config.coordinate_size())?;
        let (map, _) = self.build_map(batch)?;
        let size = map.size();
        self.publish_derived(&target, map);
        tracing::debug!(
            source = %key,
            key = %target,
            rows = size,
            "derived strided coordinate map"
        );
        Ok(target)
    }

    /// Copy `rows`, quantizing every spatial component to `tensor_stride`.
    fn quantize_rows(
        &self,
        rows: CoordinateBatch<'_>,
        tensor_stride: &TensorStride,
    ) -> Result<Vec<i32>> {
        let width = rows.coordinate_size();
        let mut out = try_vec(rows.as_slice().len())?;
        out.extend_from_slice(rows.as_slice());
        let quantize_row = |row: &mut [i32]| {
            for (value, &s) in row[1..].iter_mut().zip(tensor_stride.iter()) {
                *value = quantize(*value, s);
            }
        };
        self.install(|| {
            #[cfg(feature = "rayon")]
            out.par_chunks_exact_mut(width).for_each(quantize_row);
            #[cfg(not(feature = "rayon"))]
            out.chunks_exact_mut(width).for_each(quantize_row);
        });
        Ok(out)
    }

    /// Key of the origin map, creating it on first use
    ///
    /// The origin map holds one row per batch index found in the maps that
    /// exist when it is first requested, with every spatial axis zeroed.
    pub fn origin(&self) -> Result<CoordinateMapKey> {
        let key = CoordinateMapKey::origin(self.dimension());
        if self.contains(&key) {
            return Ok(key);
        }

        let width = self.config.coordinate_size();
        let mut rows = Vec::new();
        {
            let maps = self.maps.read();
            if maps.is_empty() {
                return Err(Error::invalid_argument(
                    "origin",
                    "the manager holds no coordinate maps to collapse",
                ));
            }
            let mut seen = AHashSet::new();
            for map in maps.values() {
                for row in map.coordinates().rows() {
                    if seen.insert(row[0]) {
                        try_reserve(&mut rows, width)?;
                        rows.push(row[0]);
                        rows.resize(rows.len() + width - 1, 0);
                    }
                }
            }
        }

        let (map, _) = self.build_map(CoordinateBatch::new(&rows, width)?)?;
        let size = map.size();
        self.publish_derived(&key, map);
        tracing::debug!(key = %key, batches = size, "derived origin map");
        Ok(key)
    }

    /// Pair every row of `key` with the origin row of its batch index
    ///
    /// The result has a single offset and is what global pooling scatters
    /// with. Rows whose batch index is absent from the origin map (added
    /// after the origin was derived) have no pair.
    pub fn origin_map(&self, key: &CoordinateMapKey) -> Result<KernelMap> {
        let source = self.get(key)?;
        let origin_key = self.origin()?;
        let origin = self.get(&origin_key)?;

        let rows = source.coordinates();
        let mut lookup: Coordinate = smallvec![0; rows.coordinate_size()];
        let mut in_rows = try_vec(rows.len())?;
        let mut out_rows = try_vec(rows.len())?;
        for (r, row) in rows.rows().enumerate() {
            lookup[0] = row[0];
            if let Some(hit) = origin.find_row(&lookup) {
                in_rows.push(r as RowIndex);
                out_rows.push(hit);
            }
        }
        KernelMap::from_parts(vec![in_rows], vec![out_rows])
    }

    /// Map every row of a fine map onto the coarse map row that covers it
    ///
    /// The tensor stride of `in_key` must divide that of `out_key`. Rows
    /// whose covering coordinate is absent from the coarse map are skipped.
    pub fn stride_map(
        &self,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
    ) -> Result<RowPairs> {
        let input = self.get(in_key)?;
        let output = self.get(out_key)?;
        if !in_key.tensor_stride().divides(out_key.tensor_stride()) {
            return Err(Error::invalid_argument(
                "out_key",
                format!(
                    "tensor stride {} is not a multiple of {}",
                    out_key.tensor_stride(),
                    in_key.tensor_stride()
                ),
            ));
        }

        let rows = input.coordinates();
        let tensor_stride = out_key.tensor_stride();
        let mut lookup: Coordinate = smallvec![0; rows.coordinate_size()];
        let mut in_rows = try_vec(rows.len())?;
        let mut out_rows = try_vec(rows.len())?;
        for (r, row) in rows.rows().enumerate() {
            lookup[0] = row[0];
            for (slot, (&value, &s)) in lookup[1..]
                .iter_mut()
                .zip(row[1..].iter().zip(tensor_stride.iter()))
            {
                *slot = quantize(value, s);
            }
            if let Some(hit) = output.find_row(&lookup) {
                in_rows.push(r as RowIndex);
                out_rows.push(hit);
            }
        }
        Ok((in_rows, out_rows))
    }

    /// Create the union of several maps at one tensor stride
    ///
    /// The new map is stored under `(shared stride, label)`. For each input,
    /// in order, the result lists its rows and the union rows they landed on.
    pub fn union(
        &self,
        keys: &[CoordinateMapKey],
        label: &str,
    ) -> Result<(CoordinateMapKey, Vec<RowPairs>)> {
        let first = keys
            .first()
            .ok_or_else(|| Error::invalid_argument("keys", "at least one key is required"))?;
        let sources = keys
            .iter()
            .map(|k| self.get(k))
            .collect::<Result<Vec<_>>>()?;
        if let Some(other) = keys
            .iter()
            .find(|k| k.tensor_stride() != first.tensor_stride())
        {
            return Err(Error::invalid_argument(
                "keys",
                format!(
                    "all maps must share a tensor stride, got {} and {}",
                    first.tensor_stride(),
                    other.tensor_stride()
                ),
            ));
        }
        let key = CoordinateMapKey::new(first.tensor_stride().clone(), label);
        if self.contains(&key) {
            return Err(Error::DuplicateKey { key });
        }

        let total: usize = sources.iter().map(|m| m.coordinates().as_slice().len()).sum();
        let mut all = try_vec(total)?;
        for source in &sources {
            all.extend_from_slice(source.coordinates().as_slice());
        }
        let (map, maps) = self.build_map(CoordinateBatch::new(
            &all,
            self.config.coordinate_size(),
        )?)?;
        let size = map.size();
        self.publish(&key, map)?;

        let mut start = 0;
        let pairs = sources
            .iter()
            .map(|source| {
                let n = source.size();
                let in_rows = (0..n as RowIndex).collect();
                let out_rows = maps.inverse_map[start..start + n].to_vec();
                start += n;
                (in_rows, out_rows)
            })
            .collect();
        tracing::debug!(key = %key, inputs = keys.len(), rows = size, "created union map");
        Ok((key, pairs))
    }

    /// Row indices of `key` grouped by batch index, ascending
    pub fn row_indices_per_batch(
        &self,
        key: &CoordinateMapKey,
    ) -> Result<BTreeMap<i32, Vec<RowIndex>>> {
        let map = self.get(key)?;
        let mut groups: BTreeMap<i32, Vec<RowIndex>> = BTreeMap::new();
        for (r, row) in map.coordinates().rows().enumerate() {
            groups.entry(row[0]).or_default().push(r as RowIndex);
        }
        Ok(groups)
    }

    /// Distinct batch indices of `key`, ascending
    pub fn batch_indices(&self, key: &CoordinateMapKey) -> Result<Vec<i32>> {
        Ok(self.row_indices_per_batch(key)?.into_keys().collect())
    }

    /// Kernel map between two maps for a stencil
    ///
    /// For a forward map the output tensor stride must equal the input
    /// tensor stride times the stencil stride; for a transposed map the
    /// roles are swapped. `is_pool` marks pooling queries and keeps them
    /// apart from convolution queries in the cache.
    pub fn kernel_map(
        &self,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
        stencil: &Stencil,
        is_transpose: bool,
        is_pool: bool,
    ) -> Result<Arc<KernelMap>> {
        let input = self.get(in_key)?;
        let output = self.get(out_key)?;
        let region = stencil.region(self.dimension())?;

        let (fine, coarse) = if is_transpose {
            (out_key.tensor_stride(), in_key.tensor_stride())
        } else {
            (in_key.tensor_stride(), out_key.tensor_stride())
        };
        if fine.checked_mul(stencil.stride()).as_ref() != Some(coarse) {
            return Err(Error::invalid_argument(
                "stride",
                format!(
                    "tensor stride {} with stride {:?} does not reach {}",
                    fine,
                    stencil.stride(),
                    coarse
                ),
            ));
        }

        let query = KernelMapQuery {
            in_key: in_key.clone(),
            out_key: out_key.clone(),
            stencil: stencil.clone(),
            is_transpose,
            is_pool,
        };
        if self.config.cache_kernel_maps() {
            if let Some(cached) = self.kernel_maps.lock().get(&query) {
                tracing::trace!(in_key = %in_key, out_key = %out_key, "kernel map cache hit");
                return Ok(Arc::clone(cached));
            }
        }

        let allocator = self.allocator();
        let mode = self.config.kernel_map_mode();
        let kernel_map = self.install(|| {
            KernelMapGenerator::new(&*input, &*output, &region)
                .scale(fine)
                .transpose(is_transpose)
                .mode(mode)
                .allocator(allocator)
                .generate()
        })?;
        tracing::debug!(
            in_key = %in_key,
            out_key = %out_key,
            volume = kernel_map.volume(),
            pairs = kernel_map.total_pairs(),
            is_transpose,
            is_pool,
            "generated kernel map"
        );

        let kernel_map = Arc::new(kernel_map);
        if self.config.cache_kernel_maps() {
            let mut cache = self.kernel_maps.lock();
            return Ok(Arc::clone(cache.entry(query).or_insert(kernel_map)));
        }
        Ok(kernel_map)
    }
}

impl fmt::Display for CoordinateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "CoordinateManager(dimension={}, backend={}, threads={})",
            self.dimension(),
            self.config.backend().name(),
            self.config.num_threads()
        )?;
        for (key, map) in self.maps.read().iter() {
            writeln!(f, "  {} -> {} rows", key, map.size())?;
        }
        Ok(())
    }
}

impl fmt::Debug for CoordinateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinateManager")
            .field("config", &self.config)
            .field("maps", &self.maps.read().len())
            .field("cached_kernel_maps", &self.cached_kernel_maps())
            .finish()
    }
}
