//! Граница между диспетчером и исполняющей средой устройства
//!
//! [`ComputeBackend`] перечисляет ровно те примитивы OpenCL, которые нужны
//! для умножения матриц: поиск платформ и устройств, контекст, очередь,
//! компиляция программы, буферы, аргументы ядра, запуск 2D-сетки,
//! синхронизация и освобождение объектов.

use super::config::DeviceType;
use crate::error::DeviceResult;
use std::fmt;
use std::sync::Arc;

/// Непрозрачный дескриптор объекта устройства; 0 означает null
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawHandle(pub usize);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn from_ptr(ptr: *mut std::ffi::c_void) -> Self {
        RawHandle(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0)
    }
}

/// Вид освобождаемого объекта
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

/// Режим доступа ядра к буферу
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
}

/// Значение аргумента ядра
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Buffer(RawHandle),
    Int(i32),
}

/// Примитивы гетерогенной вычислительной среды (эквивалент OpenCL)
///
/// Все размеры буферов задаются в элементах `i32`. Платформы и устройства
/// не освобождаются; остальные объекты освобождаются через [`Self::release`].
pub trait ComputeBackend: Send + Sync {
    /// Короткое имя реализации для диагностики
    fn name(&self) -> &str;

    fn platforms(&self) -> DeviceResult<Vec<RawHandle>>;

    fn devices(&self, platform: RawHandle, device_type: DeviceType) -> DeviceResult<Vec<RawHandle>>;

    fn platform_name(&self, platform: RawHandle) -> DeviceResult<String>;

    fn device_name(&self, device: RawHandle) -> DeviceResult<String>;

    fn max_work_group_size(&self, device: RawHandle) -> DeviceResult<usize>;

    fn create_context(&self, device: RawHandle) -> DeviceResult<RawHandle>;

    fn create_queue(&self, context: RawHandle, device: RawHandle) -> DeviceResult<RawHandle>;

    fn create_program(&self, context: RawHandle, source: &str) -> DeviceResult<RawHandle>;

    /// Собирает программу; при ошибке возвращает `DeviceError::KernelBuild` с логом компилятора
    fn build_program(&self, program: RawHandle, device: RawHandle, options: Option<&str>) -> DeviceResult<()>;

    fn create_kernel(&self, program: RawHandle, name: &str) -> DeviceResult<RawHandle>;

    /// Создаёт буфер на `len` элементов, при наличии `host` копирует данные хоста
    fn create_buffer(
        &self,
        context: RawHandle,
        access: BufferAccess,
        len: usize,
        host: Option<&[i32]>,
    ) -> DeviceResult<RawHandle>;

    fn set_kernel_arg(&self, kernel: RawHandle, index: u32, arg: KernelArg) -> DeviceResult<()>;

    /// Ставит ядро в очередь на 2D-сетку; `local == None` оставляет выбор драйверу
    fn enqueue_kernel_2d(
        &self,
        queue: RawHandle,
        kernel: RawHandle,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> DeviceResult<()>;

    /// Блокирует до завершения всех команд очереди
    fn finish(&self, queue: RawHandle) -> DeviceResult<()>;

    /// Блокирующее чтение `out.len()` элементов из буфера
    fn read_buffer(&self, queue: RawHandle, buffer: RawHandle, out: &mut [i32]) -> DeviceResult<()>;

    fn release(&self, kind: HandleKind, handle: RawHandle) -> DeviceResult<()>;
}

/// Владеющая обёртка над объектом устройства
///
/// Освобождает объект ровно один раз при уничтожении. Null-дескриптор
/// освобождается как no-op. Ошибки освобождения только логируются.
pub struct DeviceHandle {
    backend: Arc<dyn ComputeBackend>,
    kind: HandleKind,
    raw: RawHandle,
}

impl DeviceHandle {
    pub fn new(backend: &Arc<dyn ComputeBackend>, kind: HandleKind, raw: RawHandle) -> Self {
        Self {
            backend: Arc::clone(backend),
            kind,
            raw,
        }
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("backend", &self.backend.name())
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .finish()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.raw.is_null() {
            return;
        }
        if let Err(e) = self.backend.release(self.kind, self.raw) {
            log::warn!("failed to release {:?} {:?}: {e}", self.kind, self.raw);
        }
        self.raw = RawHandle::NULL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostBackend;

    #[test]
    fn null_handle_release_is_noop() {
        let host = Arc::new(HostBackend::new());
        let backend: Arc<dyn ComputeBackend> = host.clone();
        drop(DeviceHandle::new(&backend, HandleKind::Buffer, RawHandle::NULL));
        assert!(host.release_log().is_empty());
    }

    #[test]
    fn handle_is_released_once_on_drop() {
        let host = Arc::new(HostBackend::new());
        let backend: Arc<dyn ComputeBackend> = host.clone();
        let device = host.devices(host.platforms().unwrap()[0], DeviceType::All).unwrap()[0];
        let raw = backend.create_context(device).unwrap();
        let handle = DeviceHandle::new(&backend, HandleKind::Context, raw);
        assert_eq!(host.live_handles(), 1);
        drop(handle);
        assert_eq!(host.live_handles(), 0);
        assert_eq!(host.release_log(), vec![HandleKind::Context]);
    }
}
