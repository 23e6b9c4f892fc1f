//! Окружение устройства: платформа, устройство, контекст, очередь и ядро
//!
//! Окружение создаётся один раз и разделяется между матрицами через
//! `Arc<DeviceEnvironment>`. Если устройство не найдено, окружение
//! остаётся в деградированном состоянии и отказывается запускать ядро.

use super::backend::{ComputeBackend, DeviceHandle, HandleKind};
use super::config::DeviceConfig;
use super::dispatch::OffloadDispatcher;
use crate::error::{DeviceError, DeviceResult, DiscoveryFailure};
use crate::matrix::kernels::{MATRIX_MULTIPLY_KERNEL, MATRIX_MULTIPLY_KERNEL_NAME};
use crate::opencl::OpenClBackend;
use log::{debug, error, info};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Сведения о выбранном устройстве
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub backend: String,
    pub platform_name: String,
    pub device_name: String,
    pub max_work_group_size: usize,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} [{}] (max work group size {})",
            self.platform_name, self.device_name, self.backend, self.max_work_group_size
        )
    }
}

/// Состояние окружения
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Ready,
    Degraded(DiscoveryFailure),
}

/// Объекты устройства, принадлежащие окружению
///
/// Поля уничтожаются в порядке объявления: ядро, программа, очередь, контекст.
pub(crate) struct DeviceResources {
    pub(crate) kernel: DeviceHandle,
    pub(crate) _program: DeviceHandle,
    pub(crate) queue: DeviceHandle,
    pub(crate) context: DeviceHandle,
    pub(crate) backend: Arc<dyn ComputeBackend>,
}

enum EnvironmentState {
    Ready {
        // Блокировка сериализует запуски: аргументы ядра общие для всех вызовов
        resources: Mutex<DeviceResources>,
        info: DeviceInfo,
    },
    Degraded(DiscoveryFailure),
}

/// Долгоживущее окружение для запуска ядра умножения
pub struct DeviceEnvironment {
    config: DeviceConfig,
    state: EnvironmentState,
}

impl DeviceEnvironment {
    /// Инициализирует окружение на первой платформе и первом устройстве
    ///
    /// Отсутствие платформы или устройства не является ошибкой: окружение
    /// возвращается в состоянии [`DeviceState::Degraded`]. Ошибки создания
    /// контекста, очереди, программы и ядра, а также ошибка сборки ядра
    /// возвращаются как `Err`; уже созданные объекты при этом освобождаются.
    pub fn initialize(backend: Arc<dyn ComputeBackend>, config: DeviceConfig) -> DeviceResult<Self> {
        let platforms = match backend.platforms() {
            Ok(platforms) => platforms,
            Err(e) => {
                error!("Error: failed to enumerate compute platforms: {e}");
                return Ok(Self::unavailable(DiscoveryFailure::RuntimeMissing(e.to_string()), config));
            }
        };
        let Some(&platform) = platforms.first() else {
            error!("Error: No OpenCL platforms available.");
            return Ok(Self::unavailable(DiscoveryFailure::NoPlatform, config));
        };

        let devices = match backend.devices(platform, config.device_type) {
            Ok(devices) => devices,
            Err(e) => {
                error!("Error: failed to enumerate devices: {e}");
                return Ok(Self::unavailable(DiscoveryFailure::NoDevice, config));
            }
        };
        let Some(&device) = devices.first() else {
            error!("Error: No {:?} devices available.", config.device_type);
            return Ok(Self::unavailable(DiscoveryFailure::NoDevice, config));
        };

        let info = DeviceInfo {
            backend: backend.name().to_string(),
            platform_name: backend.platform_name(platform).unwrap_or_else(|_| "unknown".to_string()),
            device_name: backend.device_name(device).unwrap_or_else(|_| "unknown".to_string()),
            max_work_group_size: backend.max_work_group_size(device).unwrap_or(0),
        };
        info!("Using compute device: {info}");

        let context = DeviceHandle::new(&backend, HandleKind::Context, backend.create_context(device)?);
        let queue = DeviceHandle::new(
            &backend,
            HandleKind::Queue,
            backend.create_queue(context.raw(), device)?,
        );

        debug!("Compiling kernel {MATRIX_MULTIPLY_KERNEL_NAME}");
        let program = DeviceHandle::new(
            &backend,
            HandleKind::Program,
            backend.create_program(context.raw(), MATRIX_MULTIPLY_KERNEL)?,
        );
        if let Err(e) = backend.build_program(program.raw(), device, config.build_options.as_deref()) {
            error!("Error building program: {e}");
            return Err(e);
        }
        let kernel = DeviceHandle::new(
            &backend,
            HandleKind::Kernel,
            backend.create_kernel(program.raw(), MATRIX_MULTIPLY_KERNEL_NAME)?,
        );

        Ok(Self {
            config,
            state: EnvironmentState::Ready {
                resources: Mutex::new(DeviceResources {
                    kernel,
                    _program: program,
                    queue,
                    context,
                    backend,
                }),
                info,
            },
        })
    }

    /// Окружение на настоящем OpenCL; без библиотеки OpenCL окружение деградирует
    pub fn open_cl(config: DeviceConfig) -> DeviceResult<Self> {
        match OpenClBackend::load() {
            Ok(backend) => Self::initialize(Arc::new(backend), config),
            Err(e) => {
                error!("Error: OpenCL runtime is not available: {e}");
                Ok(Self::unavailable(DiscoveryFailure::RuntimeMissing(e.to_string()), config))
            }
        }
    }

    /// Окружение без устройства
    pub fn unavailable(reason: DiscoveryFailure, config: DeviceConfig) -> Self {
        Self {
            config,
            state: EnvironmentState::Degraded(reason),
        }
    }

    pub fn state(&self) -> DeviceState {
        match &self.state {
            EnvironmentState::Ready { .. } => DeviceState::Ready,
            EnvironmentState::Degraded(reason) => DeviceState::Degraded(reason.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EnvironmentState::Ready { .. })
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        match &self.state {
            EnvironmentState::Ready { info, .. } => Some(info),
            EnvironmentState::Degraded(_) => None,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Вычислительная граница готового окружения
    pub fn backend(&self) -> Option<Arc<dyn ComputeBackend>> {
        match &self.state {
            EnvironmentState::Ready { resources, .. } => {
                let resources = resources.lock().unwrap_or_else(PoisonError::into_inner);
                Some(Arc::clone(&resources.backend))
            }
            EnvironmentState::Degraded(_) => None,
        }
    }

    /// Диспетчер умножения поверх этого окружения
    pub fn dispatcher(&self) -> OffloadDispatcher<'_> {
        OffloadDispatcher::new(self)
    }

    /// Захватывает ресурсы устройства на время одного запуска
    pub(crate) fn lock_resources(&self) -> DeviceResult<MutexGuard<'_, DeviceResources>> {
        match &self.state {
            EnvironmentState::Ready { resources, .. } => resources
                .lock()
                .map_err(|e| DeviceError::LockPoisoned(e.to_string())),
            EnvironmentState::Degraded(reason) => Err(DeviceError::Unavailable(reason.clone())),
        }
    }
}

impl fmt::Debug for DeviceEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEnvironment")
            .field("state", &self.state())
            .field("info", &self.info())
            .field("config", &self.config)
            .finish()
    }
}
