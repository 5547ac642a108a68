//! Tensor stride type: per-axis spacing of active sites

use smallvec::SmallVec;
use std::fmt;
use std::iter::FromIterator;
use std::ops::Deref;

/// Stack allocation threshold for spatial axes
/// Voxel grids are 2D-4D, so we stack-allocate up to 4
pub(crate) const STACK_DIMS: usize = 4;

/// Spatial tensor stride of a coordinate map, one entry per spatial axis
///
/// The origin map is the only map with a zero stride.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TensorStride(SmallVec<[u32; STACK_DIMS]>);

impl TensorStride {
    /// Same stride `value` on each of `dimension` axes.
    pub fn uniform(dimension: usize, value: u32) -> Self {
        Self(SmallVec::from_elem(value, dimension))
    }

    /// Stride of the origin (batch-collapsed) map.
    pub fn origin(dimension: usize) -> Self {
        Self::uniform(dimension, 0)
    }

    /// View stride as a slice.
    pub fn as_slice(&self) -> &[u32] {
        self.0.as_slice()
    }

    /// Number of spatial axes.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the origin stride.
    #[inline]
    pub fn is_origin(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|&s| s == 0)
    }

    /// Element-wise product, `None` on length mismatch or overflow.
    pub fn checked_mul(&self, multiplier: &[u32]) -> Option<Self> {
        if multiplier.len() != self.0.len() {
            return None;
        }
        self.0
            .iter()
            .zip(multiplier)
            .map(|(&s, &m)| s.checked_mul(m))
            .collect::<Option<SmallVec<_>>>()
            .map(Self)
    }

    /// Whether every axis of `self` divides the matching axis of `coarser`.
    pub fn divides(&self, coarser: &TensorStride) -> bool {
        self.0.len() == coarser.0.len()
            && self
                .0
                .iter()
                .zip(coarser.0.iter())
                .all(|(&fine, &coarse)| fine != 0 && coarse % fine == 0)
    }
}

impl Deref for TensorStride {
    type Target = [u32];

    fn deref(&self) -> &Self::Target {
        self.0.as_slice()
    }
}

impl fmt::Debug for TensorStride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for TensorStride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl AsRef<[u32]> for TensorStride {
    fn as_ref(&self) -> &[u32] {
        self.0.as_slice()
    }
}

impl From<Vec<u32>> for TensorStride {
    fn from(value: Vec<u32>) -> Self {
        Self(value.into_iter().collect())
    }
}

impl From<&[u32]> for TensorStride {
    fn from(value: &[u32]) -> Self {
        Self(value.iter().copied().collect())
    }
}

impl<const N: usize> From<[u32; N]> for TensorStride {
    fn from(value: [u32; N]) -> Self {
        Self(value.into_iter().collect())
    }
}

impl FromIterator<u32> for TensorStride {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
