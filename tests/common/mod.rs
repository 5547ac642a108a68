//! Common test utilities
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparse_coord::config::ManagerConfig;
use sparse_coord::coordinate::CoordinateBatch;
use sparse_coord::manager::CoordinateManager;

/// Create a manager for `dimension` spatial axes with a fixed worker count
pub fn create_manager(dimension: usize, num_threads: usize) -> CoordinateManager {
    CoordinateManager::new(ManagerConfig::new(dimension).with_num_threads(num_threads))
        .expect("manager construction")
}

/// Wrap a flat buffer as a batch of `width`-wide rows
pub fn batch(data: &[i32], width: usize) -> CoordinateBatch<'_> {
    CoordinateBatch::new(data, width).expect("well-formed batch")
}

/// Random coordinates: `rows` rows over `batches` batch indices, spatial
/// components in `-extent..extent`. Duplicates are likely by construction.
pub fn random_coordinates(
    seed: u64,
    rows: usize,
    dimension: usize,
    batches: i32,
    extent: i32,
) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(rows * (dimension + 1));
    for _ in 0..rows {
        data.push(rng.random_range(0..batches));
        for _ in 0..dimension {
            data.push(rng.random_range(-extent..extent));
        }
    }
    data
}

/// Gather `width`-wide rows of `data` by `indices`
pub fn gather(data: &[i32], width: usize, indices: &[u32]) -> Vec<i32> {
    indices
        .iter()
        .flat_map(|&i| {
            let start = i as usize * width;
            data[start..start + width].iter().copied()
        })
        .collect()
}
