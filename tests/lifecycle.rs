//! Объекты устройства создаются один раз и освобождаются ровно один раз

use opencl_matrix::device::{ComputeBackend, HandleKind};
use opencl_matrix::{DeviceConfig, DeviceEnvironment, DeviceError, DeviceState, DiscoveryFailure, HostBackend, Matrix};
use std::sync::Arc;

fn initialize(host: &Arc<HostBackend>) -> Result<DeviceEnvironment, DeviceError> {
    let backend: Arc<dyn ComputeBackend> = host.clone();
    DeviceEnvironment::initialize(backend, DeviceConfig::default())
}

#[test]
fn repeated_environments_do_not_leak() {
    let host = Arc::new(HostBackend::new());
    let a = Matrix::from_vec(2, 2, vec![1, 1, 1, 1]).unwrap();
    for _ in 0..50 {
        let env = initialize(&host).unwrap();
        a.multiply_offload(&a, &env).unwrap();
        assert_eq!(host.live_handles(), 4);
    }
    assert_eq!(host.live_handles(), 0);

    let log = host.release_log();
    assert_eq!(log.iter().filter(|k| **k == HandleKind::Context).count(), 50);
    assert_eq!(log.iter().filter(|k| **k == HandleKind::Kernel).count(), 50);
    assert_eq!(log.iter().filter(|k| **k == HandleKind::Buffer).count(), 150);
}

#[test]
fn matrices_own_no_device_resources() {
    let host = Arc::new(HostBackend::new());
    let env = initialize(&host).unwrap();
    let before = host.live_handles();
    for i in 0..100 {
        let m = Matrix::zeros(i % 5, 3);
        drop(m.transpose());
    }
    let result = Matrix::from_vec(1, 1, vec![2]).unwrap().multiply_offload(&Matrix::from_vec(1, 1, vec![21]).unwrap(), &env);
    assert_eq!(result.unwrap().get(0, 0).unwrap(), 42);
    assert_eq!(host.live_handles(), before);
}

#[test]
fn degraded_environment_owns_nothing() {
    for host in [HostBackend::new().with_platforms(0), HostBackend::new().with_devices(0)] {
        let host = Arc::new(host);
        let env = initialize(&host).unwrap();
        assert!(matches!(env.state(), DeviceState::Degraded(_)));
        drop(env);
        assert_eq!(host.live_handles(), 0);
        assert!(host.release_log().is_empty());
    }
}

#[test]
fn build_failure_surfaces_compiler_log() {
    let host = Arc::new(HostBackend::new().with_build_failure("error: use of undeclared identifier 'sum'"));
    let err = initialize(&host).unwrap_err();
    assert!(err.to_string().contains("undeclared identifier"));
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn unavailable_environment_reports_reason() {
    let env = DeviceEnvironment::unavailable(DiscoveryFailure::RuntimeMissing("libOpenCL.so".into()), DeviceConfig::default());
    assert!(!env.is_ready());
    assert_eq!(env.state(), DeviceState::Degraded(DiscoveryFailure::RuntimeMissing("libOpenCL.so".into())));
}
