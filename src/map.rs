//! Coordinate map interface
//!
//! A coordinate map is the deduplicated, append-only set of coordinates at
//! one tensor stride. Rows are numbered in order of first appearance and
//! never renumbered, so row indices are safe to hold across calls.
//!
//! Backends implement [`CoordinateMap`]; the manager and the kernel map
//! generator only ever talk to the trait.

use crate::coordinate::CoordinateBatch;
use crate::error::{Error, Result};
use crate::runtime::MapBackend;
use std::fmt;

/// Row index inside a coordinate map
pub type RowIndex = u32;

/// Largest number of rows a single map (or insertion batch) may hold
pub const MAX_ROWS: usize = RowIndex::MAX as usize;

/// Result of inserting a raw coordinate batch
///
/// `unique_map[j]` is the raw row that first produced map row `j` of this
/// insertion; `inverse_map[i]` is the map row raw row `i` folded into.
/// For an insertion into an empty map, gathering the raw batch by
/// `unique_map` and then by `inverse_map` reproduces the raw batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsertionMaps {
    /// First raw row of each new map row
    pub unique_map: Vec<RowIndex>,
    /// Map row of each raw row
    pub inverse_map: Vec<RowIndex>,
}

/// Matched subset of a batch lookup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchFind {
    /// Query rows that were found, ascending
    pub valid_query_index: Vec<RowIndex>,
    /// Map row of each found query
    pub query_result: Vec<RowIndex>,
}

impl BatchFind {
    /// Number of matched queries
    pub fn len(&self) -> usize {
        self.valid_query_index.len()
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.valid_query_index.is_empty()
    }
}

/// Deduplicating coordinate set with stable row indices
pub trait CoordinateMap: Send + Sync + fmt::Debug {
    /// Backend holding this map
    fn backend(&self) -> MapBackend;

    /// Width of each coordinate row (spatial dimension + 1)
    fn coordinate_size(&self) -> usize;

    /// Number of rows
    fn size(&self) -> usize;

    /// Insert a raw batch, deduplicating against the map and itself
    ///
    /// Either every row is committed or, on error, the map is unchanged.
    fn insert_and_map(&mut self, coordinates: CoordinateBatch<'_>) -> Result<InsertionMaps>;

    /// Look up a single coordinate
    fn find_row(&self, coordinate: &[i32]) -> Option<RowIndex>;

    /// All rows in row-index order
    fn coordinates(&self) -> CoordinateBatch<'_>;

    /// Look up every query row; misses are `None`
    fn find(&self, queries: CoordinateBatch<'_>) -> Result<Vec<Option<RowIndex>>> {
        check_width(self.coordinate_size(), &queries)?;
        Ok(queries.rows().map(|q| self.find_row(q)).collect())
    }

    /// Look up every query row, keeping only the hits
    ///
    /// Query batches longer than [`MAX_ROWS`] fail with `AllocationFailure`,
    /// since their indices would not fit a [`RowIndex`].
    fn find_batch(&self, queries: CoordinateBatch<'_>) -> Result<BatchFind> {
        check_row_limit(0, queries.len())?;
        let found = self.find(queries)?;
        let mut result = BatchFind::default();
        for (i, hit) in found.into_iter().enumerate() {
            if let Some(row) = hit {
                result.valid_query_index.push(i as RowIndex);
                result.query_result.push(row);
            }
        }
        Ok(result)
    }

    /// Row `index`, or `None` past the end
    fn row(&self, index: usize) -> Option<&[i32]> {
        self.coordinates().row(index)
    }

    /// Whether `coordinate` is in the map
    fn contains(&self, coordinate: &[i32]) -> bool {
        self.find_row(coordinate).is_some()
    }
}

/// Reject a batch whose row width differs from the map's.
pub(crate) fn check_width(coordinate_size: usize, batch: &CoordinateBatch<'_>) -> Result<()> {
    if batch.coordinate_size() != coordinate_size {
        return Err(Error::invalid_argument(
            "coordinates",
            format!(
                "expected rows of width {}, got {}",
                coordinate_size,
                batch.coordinate_size()
            ),
        ));
    }
    Ok(())
}

/// Reject growing a row set of `existing` rows by `additional` past [`MAX_ROWS`].
pub(crate) fn check_row_limit(existing: usize, additional: usize) -> Result<()> {
    match existing.checked_add(additional) {
        Some(total) if total <= MAX_ROWS => Ok(()),
        _ => Err(Error::allocation_failure::<RowIndex>(
            existing.saturating_add(additional),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_limit() {
        assert!(check_row_limit(0, 0).is_ok());
        assert!(check_row_limit(MAX_ROWS - 10, 10).is_ok());
        assert!(matches!(
            check_row_limit(MAX_ROWS - 10, 11),
            Err(Error::AllocationFailure { .. })
        ));
        assert!(matches!(
            check_row_limit(1, MAX_ROWS),
            Err(Error::AllocationFailure { .. })
        ));
        assert!(check_row_limit(usize::MAX, 1).is_err());
    }
}
