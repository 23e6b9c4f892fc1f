//! Запуск умножения матриц на устройстве

use super::backend::{BufferAccess, DeviceHandle, HandleKind, KernelArg};
use super::environment::DeviceEnvironment;
use crate::error::{MatrixError, Result};
use crate::matrix::Matrix;
use log::debug;

/// Выполняет одно умножение через окружение устройства
///
/// Вызовы из разных потоков сериализуются блокировкой окружения.
#[derive(Debug, Clone, Copy)]
pub struct OffloadDispatcher<'env> {
    env: &'env DeviceEnvironment,
}

fn kernel_int(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| MatrixError::TooLarge(value))
}

impl<'env> OffloadDispatcher<'env> {
    pub fn new(env: &'env DeviceEnvironment) -> Self {
        Self { env }
    }

    /// Вычисляет `a * b` на устройстве
    ///
    /// Проверки выполняются в порядке: совпадение внутренних размерностей,
    /// пустой результат (возвращается без обращения к устройству),
    /// готовность устройства.
    pub fn multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        a.check_multipliable(b)?;

        let (rows_a, cols_a) = a.shape();
        let cols_b = b.cols();
        if rows_a == 0 || cols_b == 0 || cols_a == 0 {
            return Matrix::try_zeros(rows_a, cols_b);
        }

        let rows_arg = kernel_int(rows_a)?;
        let cols_a_arg = kernel_int(cols_a)?;
        let cols_b_arg = kernel_int(cols_b)?;
        let result_len = rows_a
            .checked_mul(cols_b)
            .ok_or(MatrixError::TooLarge(rows_a.saturating_mul(cols_b)))?;

        let resources = self.env.lock_resources()?;
        let backend = &resources.backend;

        let a_buffer = DeviceHandle::new(
            backend,
            HandleKind::Buffer,
            backend.create_buffer(resources.context.raw(), BufferAccess::ReadOnly, a.len(), Some(a.as_slice()))?,
        );
        let b_buffer = DeviceHandle::new(
            backend,
            HandleKind::Buffer,
            backend.create_buffer(resources.context.raw(), BufferAccess::ReadOnly, b.len(), Some(b.as_slice()))?,
        );
        let c_buffer = DeviceHandle::new(
            backend,
            HandleKind::Buffer,
            backend.create_buffer(resources.context.raw(), BufferAccess::WriteOnly, result_len, None)?,
        );

        let kernel = resources.kernel.raw();
        let args = [
            KernelArg::Buffer(a_buffer.raw()),
            KernelArg::Buffer(b_buffer.raw()),
            KernelArg::Buffer(c_buffer.raw()),
            KernelArg::Int(rows_arg),
            KernelArg::Int(cols_a_arg),
            KernelArg::Int(cols_b_arg),
        ];
        for (index, arg) in (0u32..).zip(args) {
            backend.set_kernel_arg(kernel, index, arg)?;
        }

        let global = [rows_a, cols_b];
        let max_work_group_size = self.env.info().map_or(0, |info| info.max_work_group_size);
        let local = self.env.config().local_size_for(global, max_work_group_size);
        debug!("Dispatching {rows_a}x{cols_b} grid (local {local:?}), shared dimension {cols_a}");

        let queue = resources.queue.raw();
        backend.enqueue_kernel_2d(queue, kernel, global, local)?;
        backend.finish(queue)?;

        let mut result = vec![0i32; result_len];
        backend.read_buffer(queue, c_buffer.raw(), &mut result)?;

        if self.env.config().echo_results {
            for (index, value) in result.iter().enumerate() {
                debug!("c[{}][{}] = {value}", index / cols_b, index % cols_b);
            }
        }

        // Буферы освобождаются здесь, до возврата результата
        drop(c_buffer);
        drop(b_buffer);
        drop(a_buffer);

        Matrix::from_vec(rows_a, cols_b, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ComputeBackend, DeviceConfig, HostBackend, HostCall};
    use crate::error::{DeviceError, DiscoveryFailure};
    use std::sync::Arc;

    fn host_env(host: &Arc<HostBackend>, config: DeviceConfig) -> DeviceEnvironment {
        let backend: Arc<dyn ComputeBackend> = host.clone();
        DeviceEnvironment::initialize(backend, config).unwrap()
    }

    #[test]
    fn multiplies_example_matrices() {
        let host = Arc::new(HostBackend::new());
        let env = host_env(&host, DeviceConfig::default());
        let a = Matrix::from_rows(2, 3, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let b = Matrix::from_rows(3, 2, &[vec![7, 8], vec![9, 10], vec![11, 12]]).unwrap();

        let c = env.dispatcher().multiply(&a, &b).unwrap();
        assert_eq!(c, Matrix::from_rows(2, 2, &[vec![58, 64], vec![139, 154]]).unwrap());
    }

    #[test]
    fn buffers_are_released_before_returning() {
        let host = Arc::new(HostBackend::new());
        let env = host_env(&host, DeviceConfig::default());
        let a = Matrix::from_vec(2, 2, vec![1, 2, 3, 4]).unwrap();

        env.dispatcher().multiply(&a, &a).unwrap();
        assert_eq!(host.live_handles(), 4);
        assert_eq!(
            host.release_log(),
            vec![HandleKind::Buffer, HandleKind::Buffer, HandleKind::Buffer]
        );
    }

    #[test]
    fn degraded_environment_refuses_to_dispatch() {
        let env = DeviceEnvironment::unavailable(DiscoveryFailure::NoDevice, DeviceConfig::default());
        let a = Matrix::from_vec(1, 1, vec![3]).unwrap();
        let err = env.dispatcher().multiply(&a, &a).unwrap_err();
        assert!(matches!(err, MatrixError::Device(DeviceError::Unavailable(DiscoveryFailure::NoDevice))));
        assert!(err.is_device_unavailable());
    }

    #[test]
    fn shape_checks_run_before_the_readiness_check() {
        let env = DeviceEnvironment::unavailable(DiscoveryFailure::NoPlatform, DeviceConfig::default());
        assert!(matches!(
            env.dispatcher().multiply(&Matrix::zeros(2, 3), &Matrix::zeros(2, 2)),
            Err(MatrixError::DimensionMismatch { .. })
        ));
        let c = env.dispatcher().multiply(&Matrix::zeros(2, 0), &Matrix::zeros(0, 3)).unwrap();
        assert_eq!(c, Matrix::zeros(2, 3));
    }

    #[test]
    fn mismatched_shapes_are_rejected_before_touching_the_device() {
        let host = Arc::new(HostBackend::new());
        let env = host_env(&host, DeviceConfig::default());
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 2);
        assert!(matches!(
            env.dispatcher().multiply(&a, &b),
            Err(MatrixError::DimensionMismatch { .. })
        ));
        assert_eq!(host.dispatch_count(), 0);
    }

    #[test]
    fn empty_operands_skip_dispatch() {
        let host = Arc::new(HostBackend::new());
        let env = host_env(&host, DeviceConfig::default());
        let c = env.dispatcher().multiply(&Matrix::zeros(0, 3), &Matrix::zeros(3, 2)).unwrap();
        assert_eq!(c.shape(), (0, 2));
        assert!(c.is_empty());
        assert_eq!(host.dispatch_count(), 0);
    }

    #[test]
    fn runtime_chosen_local_size_when_configured_one_does_not_fit() {
        let host = Arc::new(HostBackend::new());
        let env = host_env(&host, DeviceConfig::default().with_local_work_size(Some([2, 2])));
        let a = Matrix::from_vec(3, 1, vec![1, 2, 3]).unwrap();
        let b = Matrix::from_vec(1, 3, vec![4, 5, 6]).unwrap();
        let c = env.dispatcher().multiply(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[4, 5, 6, 8, 10, 12, 12, 15, 18]);
    }

    #[test]
    fn failed_dispatch_releases_its_buffers() {
        let a = Matrix::from_vec(2, 2, vec![1, 2, 3, 4]).unwrap();
        for call in [HostCall::SetKernelArg, HostCall::Enqueue, HostCall::Finish, HostCall::ReadBuffer] {
            let host = Arc::new(HostBackend::new().with_failure(call));
            let env = host_env(&host, DeviceConfig::default());

            let err = env.dispatcher().multiply(&a, &a).unwrap_err();
            assert!(matches!(err, MatrixError::Device(DeviceError::Call { .. })), "{call:?}: {err}");
            assert_eq!(host.live_handles(), 4, "{call:?}");
            assert_eq!(
                host.release_log(),
                vec![HandleKind::Buffer, HandleKind::Buffer, HandleKind::Buffer],
                "{call:?}"
            );
        }
    }

    #[test]
    fn failed_buffer_creation_leaves_environment_usable() {
        let host = Arc::new(HostBackend::new().with_failure(HostCall::CreateBuffer));
        let env = host_env(&host, DeviceConfig::default());
        let a = Matrix::from_vec(1, 1, vec![2]).unwrap();

        assert!(env.dispatcher().multiply(&a, &a).is_err());
        assert_eq!(host.live_handles(), 4);
        assert!(env.is_ready());
    }
}
