//! # sparse-coord
//!
//! **Coordinate bookkeeping for sparse convolution on voxel grids.**
//!
//! sparse-coord keeps the sets of active sites of sparse tensors and computes
//! the gather/scatter index lists that sparse convolution, transposed
//! convolution and pooling run on. It does no arithmetic on feature values.
//!
//! ## Concepts
//!
//! - **Coordinate**: a row of `D + 1` integers, the batch index followed by
//!   `D` spatial components in absolute units
//! - **Coordinate map**: a deduplicated, append-only set of coordinates at
//!   one tensor stride, with stable row indices
//! - **Key**: `(tensor stride, label)`, naming one map inside a manager
//! - **Kernel map**: for each stencil offset, the (input row, output row)
//!   pairs a convolution uses
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sparse_coord::prelude::*;
//!
//! let manager = CoordinateManager::with_dimension(2)?;
//! let data = [0, 0, 0, 0, 0, 1, 0, 1, 1];
//! let (key, _) = manager.insert_and_map(CoordinateBatch::new(&data, 3)?, &[1, 1], "")?;
//!
//! let coarse = manager.stride(&key, &[2, 2])?;
//! let stencil = Stencil::isotropic(2, 2).with_stride(&[2, 2]);
//! let pooling = manager.kernel_map(&key, &coarse, &stencil, false, true)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): multi-threaded kernel map generation and lookups

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinate;
pub mod error;
pub mod kernel_map;
pub mod manager;
pub mod map;
pub mod region;
pub mod runtime;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::coordinate::{CoordinateBatch, CoordinateMapKey, TensorStride};
    pub use crate::error::{Error, Result};
    pub use crate::kernel_map::{KernelMap, KernelMapMode};
    pub use crate::manager::{CoordinateManager, CoordinateView};
    pub use crate::map::{CoordinateMap, InsertionMaps, RowIndex};
    pub use crate::region::{RegionType, Stencil};
    pub use crate::runtime::{AllocatorType, MapBackend};
}
