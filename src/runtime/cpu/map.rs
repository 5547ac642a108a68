//! Host-memory coordinate map

use crate::coordinate::{Coordinate, CoordinateBatch};
use crate::error::{Error, Result};
use crate::map::{CoordinateMap, InsertionMaps, RowIndex, check_row_limit, check_width};
use crate::runtime::{MapBackend, try_reserve, try_vec};
use ahash::AHashMap;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::fmt;

/// Batch lookups below this many queries stay on the calling thread
#[cfg(feature = "rayon")]
const PARALLEL_FIND_THRESHOLD: usize = 1 << 14;

/// Coordinate map backed by a host hash table
///
/// Rows live in one flat row-major buffer; the hash index maps each
/// coordinate to its row.
pub struct CpuCoordinateMap {
    coordinate_size: usize,
    coordinates: Vec<i32>,
    index: AHashMap<Coordinate, RowIndex>,
}

impl CpuCoordinateMap {
    /// Create an empty map for rows of width `coordinate_size`
    pub fn new(coordinate_size: usize) -> Self {
        Self {
            coordinate_size,
            coordinates: Vec::new(),
            index: AHashMap::new(),
        }
    }

    /// Create a map and insert `coordinates` into it
    pub fn from_batch(coordinates: CoordinateBatch<'_>) -> Result<(Self, InsertionMaps)> {
        let mut map = Self::new(coordinates.coordinate_size());
        let maps = map.insert_and_map(coordinates)?;
        Ok((map, maps))
    }
}

impl CoordinateMap for CpuCoordinateMap {
    fn backend(&self) -> MapBackend {
        MapBackend::Cpu
    }

    fn coordinate_size(&self) -> usize {
        self.coordinate_size
    }

    fn size(&self) -> usize {
        self.index.len()
    }

    fn insert_and_map(&mut self, coordinates: CoordinateBatch<'_>) -> Result<InsertionMaps> {
        check_width(self.coordinate_size, &coordinates)?;
        let n = coordinates.len();
        check_row_limit(self.size(), n)?;

        // Reserve worst case up front: nothing below may fail once rows are
        // being committed.
        let mut unique_map = try_vec(n)?;
        let mut inverse_map = try_vec(n)?;
        try_reserve(&mut self.coordinates, n * self.coordinate_size)?;
        self.index
            .try_reserve(n)
            .map_err(|_| Error::allocation_failure::<(Coordinate, RowIndex)>(n))?;

        for (i, row) in coordinates.rows().enumerate() {
            match self.index.entry(Coordinate::from_slice(row)) {
                Entry::Occupied(entry) => inverse_map.push(*entry.get()),
                Entry::Vacant(entry) => {
                    let next = (self.coordinates.len() / self.coordinate_size) as RowIndex;
                    entry.insert(next);
                    self.coordinates.extend_from_slice(row);
                    unique_map.push(i as RowIndex);
                    inverse_map.push(next);
                }
            }
        }

        unique_map.shrink_to_fit();
        Ok(InsertionMaps {
            unique_map,
            inverse_map,
        })
    }

    #[inline]
    fn find_row(&self, coordinate: &[i32]) -> Option<RowIndex> {
        self.index.get(coordinate).copied()
    }

    fn coordinates(&self) -> CoordinateBatch<'_> {
        CoordinateBatch::new(&self.coordinates, self.coordinate_size)
            .unwrap_or_else(|_| CoordinateBatch::empty(self.coordinate_size))
    }

    fn find(&self, queries: CoordinateBatch<'_>) -> Result<Vec<Option<RowIndex>>> {
        check_width(self.coordinate_size, &queries)?;
        #[cfg(feature = "rayon")]
        if queries.len() >= PARALLEL_FIND_THRESHOLD {
            return Ok(queries
                .as_slice()
                .par_chunks_exact(self.coordinate_size)
                .map(|q| self.find_row(q))
                .collect());
        }
        Ok(queries.rows().map(|q| self.find_row(q)).collect())
    }
}

impl fmt::Debug for CpuCoordinateMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuCoordinateMap")
            .field("coordinate_size", &self.coordinate_size)
            .field("size", &self.size())
            .finish()
    }
}
