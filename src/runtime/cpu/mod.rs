//! CPU backend
//!
//! Coordinate maps live in host memory behind an `ahash` index. Batch
//! lookups fan out over rayon when the `rayon` feature is enabled.

mod map;

pub use map::CpuCoordinateMap;
