//! Результаты на устройстве совпадают с эталонным умножением на CPU поэлементно

use opencl_matrix::device::{ComputeBackend, HandleKind};
use opencl_matrix::matrix::{initialize_matrices, MatrixType};
use opencl_matrix::{DeviceConfig, DeviceEnvironment, DiscoveryFailure, HostBackend, Matrix, MatrixError};
use std::sync::Arc;

fn host_environment(config: DeviceConfig) -> (Arc<HostBackend>, DeviceEnvironment) {
    let host = Arc::new(HostBackend::new());
    let backend: Arc<dyn ComputeBackend> = host.clone();
    let env = DeviceEnvironment::initialize(backend, config).expect("host device initializes");
    (host, env)
}

#[test]
fn example_scenario_matches_on_both_paths() {
    let (_host, env) = host_environment(DeviceConfig::default());
    let a = Matrix::from_rows(2, 3, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
    let b = Matrix::from_rows(3, 2, &[vec![7, 8], vec![9, 10], vec![11, 12]]).unwrap();
    let expected = Matrix::from_rows(2, 2, &[vec![58, 64], vec![139, 154]]).unwrap();

    assert_eq!(a.multiply_cpu(&b).unwrap(), expected);
    assert_eq!(a.multiply_offload(&b, &env).unwrap(), expected);
}

#[test]
fn identity_is_neutral_on_device() {
    let (_host, env) = host_environment(DeviceConfig::default());
    let m = Matrix::from_rows(2, 2, &[vec![-4, 11], vec![0, 7]]).unwrap();
    let identity = Matrix::from_rows(2, 2, &[vec![1, 0], vec![0, 1]]).unwrap();
    assert_eq!(m.multiply_offload(&identity, &env).unwrap(), m);
}

#[test]
fn random_square_matrices_match_cpu() {
    let (_host, env) = host_environment(DeviceConfig::default().with_local_work_size(Some([4, 4])));
    let (a, b) = initialize_matrices(MatrixType::Random, 16);
    assert_eq!(a.multiply_offload(&b, &env).unwrap(), a.multiply_cpu(&b).unwrap());
}

#[test]
fn overflowing_products_wrap_identically() {
    let (_host, env) = host_environment(DeviceConfig::default());
    let a = Matrix::from_vec(1, 2, vec![i32::MAX, i32::MIN]).unwrap();
    let b = Matrix::from_vec(2, 1, vec![3, 5]).unwrap();
    assert_eq!(a.multiply_offload(&b, &env).unwrap(), a.multiply_cpu(&b).unwrap());
}

#[test]
fn mismatched_shapes_fail_on_both_paths() {
    let (_host, env) = host_environment(DeviceConfig::default());
    let a = Matrix::zeros(2, 3);
    let b = Matrix::zeros(2, 2);
    assert!(matches!(a.multiply_cpu(&b), Err(MatrixError::DimensionMismatch { .. })));
    assert!(matches!(a.multiply_offload(&b, &env), Err(MatrixError::DimensionMismatch { .. })));
}

#[test]
fn zero_sized_operands_never_reach_the_device() {
    let (host, env) = host_environment(DeviceConfig::default());
    let empty = Matrix::new();
    assert_eq!(empty.multiply_offload(&empty, &env).unwrap(), Matrix::new());
    assert_eq!(empty.multiply_cpu(&empty).unwrap(), Matrix::new());

    let c = Matrix::zeros(0, 4).multiply_offload(&Matrix::zeros(4, 3), &env).unwrap();
    assert!(c.is_empty());
    assert_eq!(host.dispatch_count(), 0);
    assert!(!host.release_log().contains(&HandleKind::Buffer));
}

#[test]
fn fallback_uses_cpu_only_when_device_is_missing() {
    let env = DeviceEnvironment::unavailable(DiscoveryFailure::NoPlatform, DeviceConfig::default());
    let a = Matrix::from_vec(2, 2, vec![1, 2, 3, 4]).unwrap();

    assert!(a.multiply_offload(&a, &env).unwrap_err().is_device_unavailable());
    assert_eq!(a.multiply_or_fallback(&a, &env).unwrap(), a.multiply_cpu(&a).unwrap());

    let b = Matrix::zeros(3, 3);
    assert!(matches!(
        a.multiply_or_fallback(&b, &env),
        Err(MatrixError::DimensionMismatch { .. })
    ));
}

#[test]
fn one_environment_serves_many_multiplications() {
    let (host, env) = host_environment(DeviceConfig::default());
    let env = Arc::new(env);
    let a = Matrix::from_vec(3, 3, (1..=9).collect()).unwrap();
    let expected = a.multiply_cpu(&a).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let env = Arc::clone(&env);
            let a = a.clone();
            std::thread::spawn(move || a.multiply_offload(&a, &env).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }

    assert_eq!(host.dispatch_count(), 4);
    // контекст, очередь, программа и ядро остаются, буферы освобождены
    assert_eq!(host.live_handles(), 4);
}
