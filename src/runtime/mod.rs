//! Coordinate map backends
//!
//! This module selects where coordinate maps live and how scratch memory
//! for kernel map generation is obtained.
//!
//! # Architecture
//!
//! ```text
//! MapBackend (where maps live)
//! ├── Cpu  -> CpuCoordinateMap (host hash map)
//! └── Cuda -> device-resident maps (not compiled into this build)
//! Allocator (scratch index buffers)
//! ├── PooledAllocator
//! └── DirectAllocator
//! ```
//!
//! The selection is made once, when a manager is constructed.

mod allocator;
pub mod cpu;

pub use allocator::{
    Allocator, AllocatorType, DirectAllocator, PooledAllocator, create_allocator,
};
pub(crate) use allocator::{try_reserve, try_vec};

use crate::error::{Error, Result};
use crate::map::CoordinateMap;
use cpu::CpuCoordinateMap;

/// Where coordinate maps are stored and queried
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MapBackend {
    /// Host memory hash maps
    #[default]
    Cpu,
    /// Device-resident maps with device-parallel insertion and lookup
    Cuda,
}

impl MapBackend {
    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }

    /// Whether maps can be created on this backend in this process
    pub fn is_available(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Cuda => is_cuda_available(),
        }
    }

    /// Fail with `BackendUnavailable` unless the backend can be used
    pub fn ensure_available(self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::BackendUnavailable {
                backend: self.name(),
            })
        }
    }
}

/// Whether a device backend is present
///
/// This build carries no device coordinate map, so no device is ever found.
pub fn is_cuda_available() -> bool {
    false
}

/// Backend the process-wide defaults start from
pub fn preferred_backend() -> MapBackend {
    if is_cuda_available() {
        MapBackend::Cuda
    } else {
        MapBackend::Cpu
    }
}

/// Create an empty coordinate map on `backend`
pub(crate) fn create_map(
    backend: MapBackend,
    coordinate_size: usize,
) -> Result<Box<dyn CoordinateMap>> {
    backend.ensure_available()?;
    match backend {
        MapBackend::Cpu => Ok(Box::new(CpuCoordinateMap::new(coordinate_size))),
        MapBackend::Cuda => Err(Error::BackendUnavailable {
            backend: backend.name(),
        }),
    }
}
