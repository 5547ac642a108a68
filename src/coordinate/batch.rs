//! Row-major coordinate batches

use crate::error::{Error, Result};
use std::slice::ChunksExact;

/// Borrowed, row-major batch of integer coordinates
///
/// Each row is `coordinate_size` values wide: the batch index followed by
/// the spatial position. This is the shape every insertion, lookup and
/// export in the crate speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinateBatch<'a> {
    data: &'a [i32],
    coordinate_size: usize,
}

impl<'a> CoordinateBatch<'a> {
    /// Wrap a flat buffer whose rows are `coordinate_size` wide.
    ///
    /// Fails if the width is zero or does not divide the buffer length.
    pub fn new(data: &'a [i32], coordinate_size: usize) -> Result<Self> {
        if coordinate_size == 0 {
            return Err(Error::invalid_argument(
                "coordinate_size",
                "coordinate rows must have at least one element",
            ));
        }
        if data.len() % coordinate_size != 0 {
            return Err(Error::invalid_argument(
                "coordinates",
                format!(
                    "buffer of {} values is not a whole number of rows of width {}",
                    data.len(),
                    coordinate_size
                ),
            ));
        }
        Ok(Self {
            data,
            coordinate_size,
        })
    }

    /// Empty batch of the given row width.
    pub(crate) fn empty(coordinate_size: usize) -> Self {
        Self {
            data: &[],
            coordinate_size,
        }
    }

    /// Width of each row (spatial dimension + 1).
    #[inline]
    pub fn coordinate_size(&self) -> usize {
        self.coordinate_size
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.coordinate_size
    }

    /// Whether the batch holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `index`, or `None` past the end.
    #[inline]
    pub fn row(&self, index: usize) -> Option<&'a [i32]> {
        let start = index.checked_mul(self.coordinate_size)?;
        self.data.get(start..start + self.coordinate_size)
    }

    /// Iterate over rows in order.
    pub fn rows(&self) -> ChunksExact<'a, i32> {
        self.data.chunks_exact(self.coordinate_size)
    }

    /// The underlying flat buffer.
    #[inline]
    pub fn as_slice(&self) -> &'a [i32] {
        self.data
    }

    /// Gather rows by index into a new flat buffer.
    ///
    /// Panics if an index is out of bounds.
    pub fn gather(&self, indices: &[u32]) -> Vec<i32> {
        let mut out = Vec::with_capacity(indices.len() * self.coordinate_size);
        for &i in indices {
            let start = i as usize * self.coordinate_size;
            out.extend_from_slice(&self.data[start..start + self.coordinate_size]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_rows() {
        let data = [0, 1, 1, 2, 2, 3];
        let batch = CoordinateBatch::new(&data, 2).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.row(1), Some(&[1, 2][..]));
        assert_eq!(batch.row(3), None);
        assert_eq!(batch.rows().count(), 3);
    }

    #[test]
    fn test_batch_rejects_ragged_buffer() {
        assert!(matches!(
            CoordinateBatch::new(&[0, 1, 2], 2),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(CoordinateBatch::new(&[], 0).is_err());
        assert!(CoordinateBatch::new(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_gather() {
        let data = [0, 1, 1, 2, 2, 3];
        let batch = CoordinateBatch::new(&data, 2).unwrap();
        assert_eq!(batch.gather(&[2, 0, 2]), vec![2, 3, 0, 1, 2, 3]);
    }
}
