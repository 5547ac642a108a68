//! Manager configuration and process-wide defaults
//!
//! A [`ManagerConfig`] is built from the current process-wide [`Defaults`]
//! and then owned by the manager. Changing the defaults later affects only
//! managers constructed afterwards.

use crate::error::{Error, Result};
use crate::kernel_map::KernelMapMode;
use crate::runtime::{AllocatorType, MapBackend, preferred_backend};
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

/// Upper bound on the default worker count
pub const MAX_DEFAULT_THREADS: usize = 20;

/// Environment variable read for the default worker count
pub const THREAD_HINT_VAR: &str = "OMP_NUM_THREADS";

/// Process-wide defaults for new managers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Defaults {
    /// Coordinate map backend
    pub backend: MapBackend,
    /// Scratch allocator strategy
    pub allocator: AllocatorType,
    /// Kernel map traversal strategy
    pub kernel_map_mode: KernelMapMode,
    /// Worker count; `None` derives it from the environment
    pub num_threads: Option<usize>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            backend: preferred_backend(),
            allocator: AllocatorType::Pooled,
            kernel_map_mode: KernelMapMode::SpeedOptimized,
            num_threads: None,
        }
    }
}

static DEFAULTS: OnceLock<RwLock<Defaults>> = OnceLock::new();

fn defaults_cell() -> &'static RwLock<Defaults> {
    DEFAULTS.get_or_init(|| RwLock::new(Defaults::default()))
}

/// Snapshot of the current process-wide defaults
pub fn defaults() -> Defaults {
    *defaults_cell().read()
}

/// Set the default coordinate map backend
pub fn set_default_backend(backend: MapBackend) {
    defaults_cell().write().backend = backend;
}

/// Set the default scratch allocator strategy
pub fn set_default_allocator(allocator: AllocatorType) {
    defaults_cell().write().allocator = allocator;
}

/// Set the default kernel map traversal strategy
pub fn set_default_kernel_map_mode(mode: KernelMapMode) {
    defaults_cell().write().kernel_map_mode = mode;
}

/// Set the default worker count; `None` restores the environment-derived value
pub fn set_default_num_threads(num_threads: Option<usize>) {
    defaults_cell().write().num_threads = num_threads;
}

/// Restore the built-in defaults
pub fn reset_defaults() {
    *defaults_cell().write() = Defaults::default();
}

/// Worker count from `OMP_NUM_THREADS` or the available parallelism, capped
pub fn default_num_threads() -> usize {
    thread_count_from_hint(std::env::var(THREAD_HINT_VAR).ok().as_deref())
}

fn thread_count_from_hint(hint: Option<&str>) -> usize {
    hint.and_then(|h| h.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
        .min(MAX_DEFAULT_THREADS)
}

/// Configuration owned by one coordinate manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    dimension: usize,
    backend: MapBackend,
    allocator: AllocatorType,
    kernel_map_mode: KernelMapMode,
    num_threads: usize,
    cache_kernel_maps: bool,
}

impl ManagerConfig {
    /// Configuration for `dimension` spatial axes, seeded from the current defaults
    pub fn new(dimension: usize) -> Self {
        let defaults = defaults();
        Self {
            dimension,
            backend: defaults.backend,
            allocator: defaults.allocator,
            kernel_map_mode: defaults.kernel_map_mode,
            num_threads: defaults.num_threads.unwrap_or_else(default_num_threads),
            cache_kernel_maps: true,
        }
    }

    /// Override the coordinate map backend
    pub fn with_backend(mut self, backend: MapBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Override the scratch allocator strategy
    pub fn with_allocator(mut self, allocator: AllocatorType) -> Self {
        self.allocator = allocator;
        self
    }

    /// Override the kernel map traversal strategy
    pub fn with_kernel_map_mode(mut self, mode: KernelMapMode) -> Self {
        self.kernel_map_mode = mode;
        self
    }

    /// Override the worker count
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Enable or disable the kernel map cache
    pub fn with_kernel_map_cache(mut self, enabled: bool) -> Self {
        self.cache_kernel_maps = enabled;
        self
    }

    /// Number of spatial axes
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Width of a coordinate row
    pub fn coordinate_size(&self) -> usize {
        self.dimension + 1
    }

    /// Coordinate map backend
    pub fn backend(&self) -> MapBackend {
        self.backend
    }

    /// Scratch allocator strategy
    pub fn allocator(&self) -> AllocatorType {
        self.allocator
    }

    /// Kernel map traversal strategy
    pub fn kernel_map_mode(&self) -> KernelMapMode {
        self.kernel_map_mode
    }

    /// Worker count
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Whether kernel maps are cached
    pub fn cache_kernel_maps(&self) -> bool {
        self.cache_kernel_maps
    }

    /// Check rank, worker count and backend availability
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidRank {
                dimension: self.dimension,
            });
        }
        if self.num_threads == 0 {
            return Err(Error::invalid_argument(
                "num_threads",
                "at least one worker thread is required",
            ));
        }
        self.backend.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_hint() {
        assert_eq!(thread_count_from_hint(Some("4")), 4);
        assert_eq!(thread_count_from_hint(Some(" 3 ")), 3);
        assert_eq!(thread_count_from_hint(Some("64")), MAX_DEFAULT_THREADS);
        let fallback = thread_count_from_hint(Some("zero"));
        assert!((1..=MAX_DEFAULT_THREADS).contains(&fallback));
        assert_eq!(thread_count_from_hint(Some("0")), fallback);
        assert_eq!(thread_count_from_hint(None), fallback);
    }

    #[test]
    fn test_config_overrides() {
        let config = ManagerConfig::new(3)
            .with_allocator(AllocatorType::Direct)
            .with_kernel_map_mode(KernelMapMode::MemoryOptimized)
            .with_num_threads(2)
            .with_kernel_map_cache(false);
        assert_eq!(config.coordinate_size(), 4);
        assert_eq!(config.allocator(), AllocatorType::Direct);
        assert_eq!(config.kernel_map_mode(), KernelMapMode::MemoryOptimized);
        assert_eq!(config.num_threads(), 2);
        assert!(!config.cache_kernel_maps());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            ManagerConfig::new(0).validate(),
            Err(Error::InvalidRank { dimension: 0 })
        ));
        assert!(ManagerConfig::new(2).with_num_threads(0).validate().is_err());
        assert!(matches!(
            ManagerConfig::new(2)
                .with_backend(MapBackend::Cuda)
                .validate(),
            Err(Error::BackendUnavailable { .. })
        ));
    }
}
