//! Проверка на настоящем OpenCL

use opencl_matrix::matrix::{initialize_matrices, MatrixType};
use opencl_matrix::{DeviceConfig, DeviceEnvironment};

#[test]
#[ignore = "requires OpenCL runtime - run with --ignored on GPU machine"]
fn real_device_matches_cpu() {
    let _ = env_logger::builder().is_test(true).try_init();
    let env = DeviceEnvironment::open_cl(DeviceConfig::default()).expect("OpenCL environment");
    if !env.is_ready() {
        eprintln!("Skipped: no OpenCL device ({:?})", env.state());
        return;
    }

    let (a, b) = initialize_matrices(MatrixType::Random, 64);
    assert_eq!(a.multiply_offload(&b, &env).unwrap(), a.multiply_cpu(&b).unwrap());
}

#[test]
fn open_cl_environment_offloads_or_falls_back() {
    let env = match DeviceEnvironment::open_cl(DeviceConfig::default()) {
        Ok(env) => env,
        // Сборка ядра или создание объектов на настоящем драйвере не удались
        Err(e) => panic!("OpenCL runtime present but initialization failed: {e}"),
    };
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4);
    let expected = a.multiply_cpu(&b).unwrap();

    if env.is_ready() {
        assert!(env.info().is_some());
        assert!(env.backend().is_some());
        assert_eq!(a.multiply_offload(&b, &env).unwrap(), expected);
    } else {
        assert!(env.info().is_none());
        assert!(env.backend().is_none());
        assert!(a.multiply_offload(&b, &env).unwrap_err().is_device_unavailable());
    }
    assert_eq!(a.multiply_or_fallback(&b, &env).unwrap(), expected);
}
