//! Модуль вычислительного устройства
//!
//! Предоставляет:
//! - Границу [`ComputeBackend`] над примитивами OpenCL
//! - Окружение устройства с однократной компиляцией ядра
//! - Диспетчер умножения матриц на устройстве
//! - Программное устройство для запасного пути и тестов

mod backend;
mod config;
mod dispatch;
mod environment;
mod host;

pub use backend::{BufferAccess, ComputeBackend, DeviceHandle, HandleKind, KernelArg, RawHandle};
pub use config::{DeviceConfig, DeviceType, DEFAULT_LOCAL_WORK_SIZE};
pub use dispatch::OffloadDispatcher;
pub use environment::{DeviceEnvironment, DeviceInfo, DeviceState};
pub use host::{HostBackend, HostCall};
pub use crate::opencl::OpenClBackend;
