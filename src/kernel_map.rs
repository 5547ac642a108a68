//! Kernel map generation
//!
//! A kernel map lists, for every stencil offset, the (input row, output row)
//! pairs a sparse convolution gathers from and scatters to. Offsets appear
//! in region order and every offset is present, even with no pairs.
//!
//! # Relation
//!
//! Forward (convolution, pooling): the input map is traversed and, at
//! offset `k`, input row `i` pairs with output row `o` when
//! `in[i] + k * in_stride == out[o]` on every spatial axis with equal batch
//! index (`k` already carries the dilation).
//!
//! Transpose: the output map is traversed and output row `o` pairs with
//! input row `i` when `out[o] + k * out_stride == in[i]`.
//!
//! Pairs within one offset are ordered by the traversed row, ascending, so
//! the result does not depend on the number of worker threads.

use crate::coordinate::{Coordinate, STACK_DIMS};
use crate::error::{Error, Result};
use crate::map::{CoordinateMap, RowIndex};
use crate::region::Region;
use crate::runtime::{Allocator, DirectAllocator, try_vec};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use smallvec::{SmallVec, smallvec};

/// Marks a traversed row with no partner in scratch buffers
const MISS: RowIndex = RowIndex::MAX;

/// Traversal strategy for kernel map generation
///
/// Both modes produce identical kernel maps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum KernelMapMode {
    /// One lookup pass per offset through a scratch buffer
    #[default]
    SpeedOptimized,
    /// Count pass then fill pass, no scratch buffer
    MemoryOptimized,
}

/// Per-offset input/output row pairs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelMap {
    in_maps: Vec<Vec<RowIndex>>,
    out_maps: Vec<Vec<RowIndex>>,
}

impl KernelMap {
    /// Build from per-offset `(in_rows, out_rows)` lists.
    ///
    /// Fails if any pair of lists differs in length.
    pub fn from_parts(in_maps: Vec<Vec<RowIndex>>, out_maps: Vec<Vec<RowIndex>>) -> Result<Self> {
        if in_maps.len() != out_maps.len()
            || in_maps.iter().zip(&out_maps).any(|(i, o)| i.len() != o.len())
        {
            return Err(Error::invalid_argument(
                "kernel_map",
                "input and output row lists must pair up",
            ));
        }
        Ok(Self { in_maps, out_maps })
    }

    /// Number of offsets
    pub fn volume(&self) -> usize {
        self.in_maps.len()
    }

    /// Input rows at offset `k`
    ///
    /// # Panics
    ///
    /// Panics if `k >= self.volume()`.
    pub fn in_rows(&self, k: usize) -> &[RowIndex] {
        &self.in_maps[k]
    }

    /// Output rows at offset `k`
    ///
    /// # Panics
    ///
    /// Panics if `k >= self.volume()`.
    pub fn out_rows(&self, k: usize) -> &[RowIndex] {
        &self.out_maps[k]
    }

    /// `(in_rows, out_rows)` at offset `k`, or `None` past the end
    pub fn get(&self, k: usize) -> Option<(&[RowIndex], &[RowIndex])> {
        Some((self.in_maps.get(k)?, self.out_maps.get(k)?))
    }

    /// Iterate `(in_rows, out_rows)` in offset order
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&[RowIndex], &[RowIndex])> {
        self.in_maps
            .iter()
            .zip(&self.out_maps)
            .map(|(i, o)| (i.as_slice(), o.as_slice()))
    }

    /// Total number of pairs over all offsets
    pub fn total_pairs(&self) -> usize {
        self.in_maps.iter().map(Vec::len).sum()
    }
}

/// Computes kernel maps between two coordinate maps
///
/// Generation fans out over offsets on the current rayon pool; call it
/// inside `ThreadPool::install` to pick the pool.
pub struct KernelMapGenerator<'a> {
    input: &'a dyn CoordinateMap,
    output: &'a dyn CoordinateMap,
    region: &'a Region,
    scale: SmallVec<[i64; STACK_DIMS]>,
    is_transpose: bool,
    mode: KernelMapMode,
    allocator: Option<&'a dyn Allocator>,
}

impl<'a> KernelMapGenerator<'a> {
    /// Forward generator with unit scale
    pub fn new(
        input: &'a dyn CoordinateMap,
        output: &'a dyn CoordinateMap,
        region: &'a Region,
    ) -> Self {
        Self {
            input,
            output,
            region,
            scale: smallvec![1; region.dimension()],
            is_transpose: false,
            mode: KernelMapMode::default(),
            allocator: None,
        }
    }

    /// Tensor stride of the traversed map (input forward, output transposed)
    pub fn scale(mut self, tensor_stride: &[u32]) -> Self {
        self.scale = tensor_stride.iter().map(|&s| i64::from(s)).collect();
        self
    }

    /// Generate the transposed relation
    pub fn transpose(mut self, is_transpose: bool) -> Self {
        self.is_transpose = is_transpose;
        self
    }

    /// Traversal strategy
    pub fn mode(mut self, mode: KernelMapMode) -> Self {
        self.mode = mode;
        self
    }

    /// Allocator for scratch buffers
    pub fn allocator(mut self, allocator: &'a dyn Allocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    fn validate(&self) -> Result<()> {
        let width = self.region.dimension() + 1;
        for (name, map) in [("input", self.input), ("output", self.output)] {
            if map.coordinate_size() != width {
                return Err(Error::invalid_argument(
                    name,
                    format!(
                        "map rows have width {}, region expects {}",
                        map.coordinate_size(),
                        width
                    ),
                ));
            }
        }
        if self.scale.len() != self.region.dimension() {
            return Err(Error::invalid_argument(
                "tensor_stride",
                format!(
                    "{} entries for a {}-dimensional region",
                    self.scale.len(),
                    self.region.dimension()
                ),
            ));
        }
        Ok(())
    }

    /// Compute the kernel map
    pub fn generate(&self) -> Result<KernelMap> {
        self.validate()?;
        let offsets = self.region.offsets();
        let direct = DirectAllocator;
        let allocator = self.allocator.unwrap_or(&direct);

        #[cfg(feature = "rayon")]
        let pairs = offsets
            .par_iter()
            .map(|offset| self.pairs_at(offset, allocator))
            .collect::<Result<Vec<_>>>()?;
        #[cfg(not(feature = "rayon"))]
        let pairs = offsets
            .iter()
            .map(|offset| self.pairs_at(offset, allocator))
            .collect::<Result<Vec<_>>>()?;

        let (traversed, matched): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let (in_maps, out_maps) = if self.is_transpose {
            (matched, traversed)
        } else {
            (traversed, matched)
        };
        Ok(KernelMap { in_maps, out_maps })
    }

    fn traversal(&self) -> (&dyn CoordinateMap, &dyn CoordinateMap) {
        if self.is_transpose {
            (self.output, self.input)
        } else {
            (self.input, self.output)
        }
    }

    /// Write `row + offset * scale` into `candidate`; false if it leaves i32.
    #[inline]
    fn candidate(&self, row: &[i32], offset: &[i32], candidate: &mut Coordinate) -> bool {
        candidate[0] = row[0];
        for axis in 0..offset.len() {
            let value = i64::from(row[axis + 1]) + i64::from(offset[axis]) * self.scale[axis];
            match i32::try_from(value) {
                Ok(v) => candidate[axis + 1] = v,
                Err(_) => return false,
            }
        }
        true
    }

    fn lookup(
        &self,
        target: &dyn CoordinateMap,
        row: &[i32],
        offset: &[i32],
        candidate: &mut Coordinate,
    ) -> Option<RowIndex> {
        if self.candidate(row, offset, candidate) {
            target.find_row(candidate)
        } else {
            None
        }
    }

    /// `(traversed rows, matched rows)` for one offset.
    fn pairs_at(
        &self,
        offset: &[i32],
        allocator: &dyn Allocator,
    ) -> Result<(Vec<RowIndex>, Vec<RowIndex>)> {
        let (traversal, target) = self.traversal();
        let rows = traversal.coordinates();
        let mut candidate: Coordinate = smallvec![0; rows.coordinate_size()];

        match self.mode {
            KernelMapMode::SpeedOptimized => {
                let mut hits = allocator.acquire(rows.len())?;
                hits.extend(rows.rows().map(|row| {
                    self.lookup(target, row, offset, &mut candidate)
                        .unwrap_or(MISS)
                }));
                let count = hits.iter().filter(|&&h| h != MISS).count();
                let mut traversed = try_vec(count)?;
                let mut matched = try_vec(count)?;
                for (r, &hit) in hits.iter().enumerate() {
                    if hit != MISS {
                        traversed.push(r as RowIndex);
                        matched.push(hit);
                    }
                }
                allocator.release(hits);
                Ok((traversed, matched))
            }
            KernelMapMode::MemoryOptimized => {
                let count = rows
                    .rows()
                    .filter(|row| self.lookup(target, row, offset, &mut candidate).is_some())
                    .count();
                let mut traversed = try_vec(count)?;
                let mut matched = try_vec(count)?;
                for (r, row) in rows.rows().enumerate() {
                    if let Some(hit) = self.lookup(target, row, offset, &mut candidate) {
                        traversed.push(r as RowIndex);
                        matched.push(hit);
                    }
                }
                Ok((traversed, matched))
            }
        }
    }
}
