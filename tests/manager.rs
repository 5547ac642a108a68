//! Integration tests for the coordinate manager

mod common;

use common::{batch, create_manager, random_coordinates};
use sparse_coord::config::ManagerConfig;
use sparse_coord::coordinate::CoordinateMapKey;
use sparse_coord::error::Error;
use sparse_coord::manager::CoordinateManager;
use sparse_coord::region::Stencil;
use sparse_coord::runtime::MapBackend;
use std::sync::Arc;

#[test]
fn test_stride_is_memoized() {
    let manager = create_manager(3, 2);
    let data = random_coordinates(1, 1_000, 3, 2, 32);
    let (key, _) = manager.insert_and_map(batch(&data, 4), &[1, 1, 1], "").unwrap();

    let first = manager.stride(&key, &[2, 2, 2]).unwrap();
    let rows = manager.get_coordinates(&first).unwrap().to_vec();
    let second = manager.stride(&key, &[2, 2, 2]).unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.get_coordinates(&second).unwrap().to_vec(), rows);
    assert_eq!(manager.keys().len(), 2);

    for row in rows.chunks_exact(4) {
        assert!(row[1..].iter().all(|c| c.rem_euclid(2) == 0));
    }
}

#[test]
fn test_anisotropic_stride() {
    let manager = create_manager(2, 2);
    let data = [0, 3, 3, 0, 5, -5];
    let (key, _) = manager.insert_and_map(batch(&data, 3), &[1, 2], "t").unwrap();
    let strided = manager.stride(&key, &[4, 1]).unwrap();
    assert_eq!(strided.tensor_stride().as_slice(), &[4, 2]);
    assert_eq!(strided.label(), "t");
    assert_eq!(
        manager.get_coordinates(&strided).unwrap().to_vec(),
        vec![0, 0, 2, 0, 4, -6]
    );
}

#[test]
fn test_unknown_key_creates_nothing() {
    let manager = create_manager(2, 2);
    let (key, _) = manager.insert_and_map(batch(&[0, 0, 0], 3), &[1, 1], "").unwrap();
    let missing = CoordinateMapKey::new([4, 4], "");
    let stencil = Stencil::isotropic(2, 3);

    assert!(matches!(
        manager.kernel_map(&key, &missing, &stencil, false, false),
        Err(Error::UnknownKey { .. })
    ));
    assert!(matches!(
        manager.stride(&missing, &[2, 2]),
        Err(Error::UnknownKey { .. })
    ));
    assert!(matches!(
        manager.get_coordinates(&missing),
        Err(Error::UnknownKey { .. })
    ));
    assert_eq!(manager.keys(), vec![key]);
    assert_eq!(manager.cached_kernel_maps(), 0);
}

#[test]
fn test_invalid_stencil_leaves_cache_empty() {
    let manager = create_manager(2, 2);
    let (key, _) = manager.insert_and_map(batch(&[0, 0, 0], 3), &[1, 1], "").unwrap();
    let stencil = Stencil::new(&[3, 0]);
    assert!(matches!(
        manager.kernel_map(&key, &key, &stencil, false, false),
        Err(Error::InvalidStencil { .. })
    ));
    assert_eq!(manager.cached_kernel_maps(), 0);
}

#[test]
fn test_labels_separate_maps() {
    let manager = create_manager(1, 2);
    let (a, _) = manager.insert_and_map(batch(&[0, 0], 2), &[1], "a").unwrap();
    let (b, _) = manager.insert_and_map(batch(&[0, 0, 0, 1], 2), &[1], "b").unwrap();
    assert_ne!(a, b);
    assert_eq!(manager.size(&a).unwrap(), 1);
    assert_eq!(manager.size(&b).unwrap(), 2);
    assert!(matches!(
        manager.insert_and_map(batch(&[0, 9], 2), &[1], "b"),
        Err(Error::DuplicateKey { .. })
    ));
    assert_eq!(manager.size(&b).unwrap(), 2);
}

#[test]
fn test_origin_collapses_batches() {
    let manager = create_manager(2, 2);
    let data = random_coordinates(8, 400, 2, 5, 10);
    let (key, _) = manager.insert_and_map(batch(&data, 3), &[1, 1], "").unwrap();
    let origin = manager.origin().unwrap();
    assert_eq!(origin, CoordinateMapKey::origin(2));

    let batches = manager.batch_indices(&key).unwrap();
    let view = manager.get_coordinates(&origin).unwrap();
    assert_eq!(view.len(), batches.len());
    let mut origin_batches: Vec<i32> = view.batch().rows().map(|r| r[0]).collect();
    assert!(view.batch().rows().all(|r| r[1..].iter().all(|&c| c == 0)));
    origin_batches.sort_unstable();
    assert_eq!(origin_batches, batches);

    let km = manager.origin_map(&key).unwrap();
    assert_eq!(km.total_pairs(), manager.size(&key).unwrap());
    let per_batch = manager.row_indices_per_batch(&key).unwrap();
    for (&b, rows) in &per_batch {
        let target = view.find(batch(&[b, 0, 0], 3)).unwrap()[0].unwrap();
        for &r in rows {
            let k = km.in_rows(0).iter().position(|&i| i == r).unwrap();
            assert_eq!(km.out_rows(0)[k], target);
        }
    }
}

#[test]
fn test_union_of_labels() {
    let manager = create_manager(2, 2);
    let left = random_coordinates(30, 200, 2, 2, 5);
    let right = random_coordinates(31, 200, 2, 2, 5);
    let (a, _) = manager.insert_and_map(batch(&left, 3), &[1, 1], "left").unwrap();
    let (b, _) = manager.insert_and_map(batch(&right, 3), &[1, 1], "right").unwrap();
    let (key, pairs) = manager.union(&[a.clone(), b.clone()], "both").unwrap();

    let union = manager.get_coordinates(&key).unwrap();
    for (source, (in_rows, out_rows)) in [a, b].iter().zip(&pairs) {
        let view = manager.get_coordinates(source).unwrap();
        assert_eq!(in_rows.len(), view.len());
        for (&i, &o) in in_rows.iter().zip(out_rows) {
            assert_eq!(view.row(i as usize), union.row(o as usize));
        }
    }
}

#[test]
fn test_concurrent_inserts() {
    let manager = Arc::new(create_manager(2, 4));
    std::thread::scope(|s| {
        for t in 0..8u64 {
            let manager = Arc::clone(&manager);
            s.spawn(move || {
                let data = random_coordinates(t, 500, 2, 2, 8);
                let label = format!("worker-{}", t);
                let (key, _) = manager.insert_and_map(batch(&data, 3), &[1, 1], &label).unwrap();
                manager.stride(&key, &[2, 2]).unwrap();
                manager
                    .kernel_map(&key, &key, &Stencil::isotropic(2, 3), false, false)
                    .unwrap();
            });
        }
    });
    assert_eq!(manager.keys().len(), 16);
    assert_eq!(manager.cached_kernel_maps(), 8);
}

#[test]
fn test_cache_can_be_disabled() {
    let config = ManagerConfig::new(1).with_num_threads(1).with_kernel_map_cache(false);
    let manager = CoordinateManager::new(config).unwrap();
    let (key, _) = manager.insert_and_map(batch(&[0, 0, 0, 1], 2), &[1], "").unwrap();
    let stencil = Stencil::isotropic(1, 3);
    let a = manager.kernel_map(&key, &key, &stencil, false, false).unwrap();
    let b = manager.kernel_map(&key, &key, &stencil, false, false).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a, b);
    assert_eq!(manager.cached_kernel_maps(), 0);
}

#[test]
fn test_construction_errors() {
    assert!(matches!(
        CoordinateManager::with_dimension(0),
        Err(Error::InvalidRank { dimension: 0 })
    ));
    let config = ManagerConfig::new(3).with_backend(MapBackend::Cuda);
    assert!(matches!(
        CoordinateManager::new(config),
        Err(Error::BackendUnavailable { backend: "cuda" })
    ));
}
