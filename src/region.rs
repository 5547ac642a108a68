//! Convolution and pooling stencils
//!
//! A [`Stencil`] is what callers describe: kernel size, stride, dilation,
//! region type and (for custom regions) an explicit offset list. A
//! [`Region`] is the validated form that enumerates the stencil offsets.
//!
//! # Offset order
//!
//! Kernel maps are indexed by offset rank and numeric kernels index their
//! weights the same way, so the order below is part of the contract:
//!
//! - `HyperCube`: Cartesian product, first spatial axis varying fastest.
//!   Odd kernel sizes are centered (`-(k-1)/2 ..= (k-1)/2`); even kernel
//!   sizes are anchored low (`-(k-1) ..= 0`).
//! - `HyperCross`: the zero offset, then for each axis in turn the non-zero
//!   positions of that axis in ascending order.
//! - `Custom`: the caller's offsets, in the caller's order.
//!
//! A kernel size of 1 on every axis always yields the single zero offset.

use crate::coordinate::STACK_DIMS;
use crate::error::{Error, Result};
use smallvec::{SmallVec, smallvec};
use std::iter::FusedIterator;

/// One stencil offset, one component per spatial axis
pub type Offset = SmallVec<[i32; STACK_DIMS]>;

/// Geometric shape of a stencil
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RegionType {
    /// Full hypercube around the center
    #[default]
    HyperCube,
    /// Plus-shaped: offsets with at most one non-zero axis
    HyperCross,
    /// Explicit offset list supplied by the caller
    Custom,
}

/// Caller-facing stencil configuration
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Stencil {
    kernel_size: SmallVec<[u32; STACK_DIMS]>,
    stride: SmallVec<[u32; STACK_DIMS]>,
    dilation: SmallVec<[u32; STACK_DIMS]>,
    region_type: RegionType,
    offsets: Vec<i32>,
}

impl Stencil {
    /// Hypercube stencil with unit stride and dilation
    pub fn new(kernel_size: &[u32]) -> Self {
        let dimension = kernel_size.len();
        Self {
            kernel_size: kernel_size.iter().copied().collect(),
            stride: smallvec![1; dimension],
            dilation: smallvec![1; dimension],
            region_type: RegionType::HyperCube,
            offsets: Vec::new(),
        }
    }

    /// Same kernel size on every axis
    pub fn isotropic(dimension: usize, kernel_size: u32) -> Self {
        Self::new(&vec![kernel_size; dimension])
    }

    /// Set the per-axis stride
    pub fn with_stride(mut self, stride: &[u32]) -> Self {
        self.stride = stride.iter().copied().collect();
        self
    }

    /// Set the per-axis dilation
    pub fn with_dilation(mut self, dilation: &[u32]) -> Self {
        self.dilation = dilation.iter().copied().collect();
        self
    }

    /// Set the region type
    pub fn with_region_type(mut self, region_type: RegionType) -> Self {
        self.region_type = region_type;
        self
    }

    /// Use an explicit, row-major offset list (one row per offset)
    ///
    /// Switches the region type to `Custom`. Offsets are in units of the
    /// traversed map's tensor stride, like every other region type, but
    /// dilation is not applied. The kernel size still decides the collapse
    /// rule: size 1 on every axis yields the zero offset only.
    pub fn with_offsets(mut self, offsets: Vec<i32>) -> Self {
        self.offsets = offsets;
        self.region_type = RegionType::Custom;
        self
    }

    /// Per-axis kernel size
    pub fn kernel_size(&self) -> &[u32] {
        &self.kernel_size
    }

    /// Per-axis stride
    pub fn stride(&self) -> &[u32] {
        &self.stride
    }

    /// Per-axis dilation
    pub fn dilation(&self) -> &[u32] {
        &self.dilation
    }

    /// Requested region type
    pub fn region_type(&self) -> RegionType {
        self.region_type
    }

    /// Custom offsets, row-major
    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    /// Number of spatial axes
    pub fn dimension(&self) -> usize {
        self.kernel_size.len()
    }

    /// Validate against `dimension` and build the offset region
    pub fn region(&self, dimension: usize) -> Result<Region> {
        validate_axes(&self.stride, dimension, "stride")?;
        Region::new(
            &self.kernel_size,
            &self.dilation,
            self.region_type,
            &self.offsets,
            dimension,
        )
    }
}

/// Check that a per-axis vector has `dimension` strictly positive entries.
fn validate_axes(values: &[u32], dimension: usize, name: &str) -> Result<()> {
    if values.len() != dimension {
        return Err(Error::invalid_stencil(format!(
            "{} has {} entries, expected {}",
            name,
            values.len(),
            dimension
        )));
    }
    if let Some(axis) = values.iter().position(|&v| v == 0) {
        return Err(Error::invalid_stencil(format!(
            "{} must be > 0 on every axis, got 0 on axis {}",
            name, axis
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Axis {
    /// Lowest kernel position, in kernel units
    low: i32,
    size: u32,
    dilation: i32,
}

impl Axis {
    fn new(size: u32, dilation: u32) -> Result<Self> {
        let low = if size % 2 == 1 {
            -(((size - 1) / 2) as i64)
        } else {
            -((size - 1) as i64)
        };
        let high = low + i64::from(size) - 1;
        let reach = low.abs().max(high) * i64::from(dilation);
        if reach > i64::from(i32::MAX) {
            return Err(Error::invalid_stencil(format!(
                "kernel size {} with dilation {} exceeds the coordinate range",
                size, dilation
            )));
        }
        Ok(Self {
            low: low as i32,
            size,
            dilation: dilation as i32,
        })
    }

    #[inline]
    fn value(&self, position: u32) -> i32 {
        (self.low + position as i32) * self.dilation
    }

    /// Value of the `rank`-th non-zero position, ascending.
    #[inline]
    fn nonzero_value(&self, rank: u32) -> i32 {
        let zero = (-self.low) as u32;
        let position = if rank < zero { rank } else { rank + 1 };
        self.value(position)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Shape {
    Cube,
    Cross,
    Custom(Vec<i32>),
}

/// Validated stencil region that enumerates offsets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    axes: SmallVec<[Axis; STACK_DIMS]>,
    shape: Shape,
    volume: usize,
}

impl Region {
    /// Build a region for `dimension` spatial axes.
    ///
    /// Fails with `InvalidStencil` on zero kernel size or dilation, vectors
    /// whose length is not `dimension`, or a malformed custom offset list.
    pub fn new(
        kernel_size: &[u32],
        dilation: &[u32],
        region_type: RegionType,
        offsets: &[i32],
        dimension: usize,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidRank { dimension });
        }
        validate_axes(kernel_size, dimension, "kernel_size")?;
        validate_axes(dilation, dimension, "dilation")?;

        let axes = kernel_size
            .iter()
            .zip(dilation)
            .map(|(&k, &d)| Axis::new(k, d))
            .collect::<Result<SmallVec<_>>>()?;

        if kernel_size.iter().all(|&k| k == 1) {
            return Ok(Self {
                axes,
                shape: Shape::Cube,
                volume: 1,
            });
        }

        let (shape, volume) = match region_type {
            RegionType::HyperCube => {
                let volume = kernel_size
                    .iter()
                    .try_fold(1usize, |acc, &k| acc.checked_mul(k as usize))
                    .ok_or_else(|| Error::invalid_stencil("kernel volume overflows"))?;
                (Shape::Cube, volume)
            }
            RegionType::HyperCross => {
                let volume = kernel_size
                    .iter()
                    .try_fold(1usize, |acc, &k| acc.checked_add(k as usize - 1))
                    .ok_or_else(|| Error::invalid_stencil("kernel volume overflows"))?;
                (Shape::Cross, volume)
            }
            RegionType::Custom => {
                if offsets.is_empty() || offsets.len() % dimension != 0 {
                    return Err(Error::invalid_stencil(format!(
                        "custom offsets must be a non-empty list of rows of width {}, got {} values",
                        dimension,
                        offsets.len()
                    )));
                }
                (Shape::Custom(offsets.to_vec()), offsets.len() / dimension)
            }
        };

        Ok(Self {
            axes,
            shape,
            volume,
        })
    }

    /// Region type actually enumerated (after the size-1 collapse)
    pub fn region_type(&self) -> RegionType {
        match self.shape {
            Shape::Cube => RegionType::HyperCube,
            Shape::Cross => RegionType::HyperCross,
            Shape::Custom(_) => RegionType::Custom,
        }
    }

    /// Number of spatial axes
    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    /// Number of offsets
    pub fn volume(&self) -> usize {
        self.volume
    }

    /// Offset at rank `index`, or `None` past the end
    pub fn offset(&self, index: usize) -> Option<Offset> {
        if index >= self.volume {
            return None;
        }
        let offset = match &self.shape {
            Shape::Cube => {
                let mut rest = index;
                self.axes
                    .iter()
                    .map(|axis| {
                        let size = axis.size as usize;
                        let position = (rest % size) as u32;
                        rest /= size;
                        axis.value(position)
                    })
                    .collect()
            }
            Shape::Cross => {
                let mut offset: Offset = smallvec![0; self.axes.len()];
                if index > 0 {
                    let mut rank = index - 1;
                    for (slot, axis) in offset.iter_mut().zip(&self.axes) {
                        let count = (axis.size - 1) as usize;
                        if rank < count {
                            *slot = axis.nonzero_value(rank as u32);
                            break;
                        }
                        rank -= count;
                    }
                }
                offset
            }
            Shape::Custom(offsets) => {
                let d = self.axes.len();
                Offset::from_slice(&offsets[index * d..(index + 1) * d])
            }
        };
        Some(offset)
    }

    /// Iterate over offsets in rank order
    ///
    /// The iterator is lazy and can be cloned to restart from any point.
    pub fn iter(&self) -> RegionIter<'_> {
        RegionIter {
            region: self,
            next: 0,
        }
    }

    /// Collect every offset
    pub fn offsets(&self) -> Vec<Offset> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a Region {
    type Item = Offset;
    type IntoIter = RegionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a region's offsets
#[derive(Clone, Debug)]
pub struct RegionIter<'a> {
    region: &'a Region,
    next: usize,
}

impl Iterator for RegionIter<'_> {
    type Item = Offset;

    fn next(&mut self) -> Option<Offset> {
        let offset = self.region.offset(self.next)?;
        self.next += 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.region.volume - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RegionIter<'_> {}

impl FusedIterator for RegionIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(region: &Region) -> Vec<Vec<i32>> {
        region.iter().map(|o| o.to_vec()).collect()
    }

    fn cube(kernel_size: &[u32], dilation: &[u32]) -> Region {
        let d = kernel_size.len();
        Region::new(kernel_size, dilation, RegionType::HyperCube, &[], d).unwrap()
    }

    #[test]
    fn test_hypercube_order() {
        let region = cube(&[3, 3], &[1, 1]);
        assert_eq!(region.volume(), 9);
        assert_eq!(
            offsets(&region),
            vec![
                vec![-1, -1],
                vec![0, -1],
                vec![1, -1],
                vec![-1, 0],
                vec![0, 0],
                vec![1, 0],
                vec![-1, 1],
                vec![0, 1],
                vec![1, 1],
            ]
        );
    }

    #[test]
    fn test_hypercube_dilation() {
        let region = cube(&[3], &[2]);
        assert_eq!(offsets(&region), vec![vec![-2], vec![0], vec![2]]);
    }

    #[test]
    fn test_even_kernel_anchored_low() {
        let region = cube(&[2, 4], &[1, 1]);
        assert_eq!(region.volume(), 8);
        let all = offsets(&region);
        assert_eq!(all[0], vec![-1, -3]);
        assert_eq!(all[1], vec![0, -3]);
        assert_eq!(all[7], vec![0, 0]);
    }

    #[test]
    fn test_hypercross() {
        let region = Region::new(&[3, 5], &[1, 1], RegionType::HyperCross, &[], 2).unwrap();
        assert_eq!(region.volume(), 1 + 2 + 4);
        assert_eq!(
            offsets(&region),
            vec![
                vec![0, 0],
                vec![-1, 0],
                vec![1, 0],
                vec![0, -2],
                vec![0, -1],
                vec![0, 1],
                vec![0, 2],
            ]
        );
    }

    #[test]
    fn test_hypercross_volume_isotropic() {
        let region = Region::new(&[3, 3, 3], &[1, 1, 1], RegionType::HyperCross, &[], 3).unwrap();
        assert_eq!(region.volume(), 1 + 3 * 2);
        for offset in &region {
            assert!(offset.iter().filter(|&&v| v != 0).count() <= 1);
        }
    }

    #[test]
    fn test_custom_offsets_used_as_is() {
        let custom = [0, 0, 2, -1, 5, 5];
        let region = Region::new(&[3, 3], &[4, 4], RegionType::Custom, &custom, 2).unwrap();
        assert_eq!(offsets(&region), vec![vec![0, 0], vec![2, -1], vec![5, 5]]);
    }

    #[test]
    fn test_kernel_size_one_collapses() {
        for region_type in [
            RegionType::HyperCube,
            RegionType::HyperCross,
            RegionType::Custom,
        ] {
            let region = Region::new(&[1, 1, 1], &[1, 1, 1], region_type, &[1, 1, 1], 3).unwrap();
            assert_eq!(region.volume(), 1);
            assert_eq!(region.region_type(), RegionType::HyperCube);
            assert_eq!(offsets(&region), vec![vec![0, 0, 0]]);
        }
    }

    #[test]
    fn test_iterator_restartable() {
        let region = cube(&[3, 3, 3], &[1, 1, 1]);
        let mut iter = region.iter();
        iter.next();
        let rest = iter.clone();
        assert_eq!(iter.len(), 26);
        assert_eq!(iter.count(), rest.count());
        assert_eq!(region.iter().count(), 27);
    }

    #[test]
    fn test_invalid_stencils() {
        let err = Region::new(&[0, 3], &[1, 1], RegionType::HyperCube, &[], 2).unwrap_err();
        assert!(matches!(err, Error::InvalidStencil { .. }));
        let err = Region::new(&[3, 3], &[1], RegionType::HyperCube, &[], 2).unwrap_err();
        assert!(matches!(err, Error::InvalidStencil { .. }));
        let err = Region::new(&[3, 3], &[1, 1], RegionType::Custom, &[1, 2, 3], 2).unwrap_err();
        assert!(matches!(err, Error::InvalidStencil { .. }));
        let err = Stencil::isotropic(2, 3)
            .with_stride(&[2, 0])
            .region(2)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStencil { .. }));
        let err = Stencil::isotropic(3, 3).region(2).unwrap_err();
        assert!(matches!(err, Error::InvalidStencil { .. }));
    }

    #[test]
    fn test_stencil_builder() {
        let stencil = Stencil::isotropic(3, 2)
            .with_stride(&[2, 2, 2])
            .with_dilation(&[1, 1, 1]);
        assert_eq!(stencil.dimension(), 3);
        assert_eq!(stencil.region_type(), RegionType::HyperCube);
        assert_eq!(stencil.region(3).unwrap().volume(), 8);

        let custom = stencil.clone().with_offsets(vec![0, 0, 0, 1, 0, 0]);
        assert_eq!(custom.region_type(), RegionType::Custom);
        assert_eq!(custom.region(3).unwrap().volume(), 2);
    }
}
