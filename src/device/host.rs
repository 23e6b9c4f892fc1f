//! Программное устройство: эмуляция объектной модели OpenCL в памяти хоста
//!
//! Используется как запасное устройство и в тестах. Ведёт таблицу живых
//! объектов, поэтому утечки и повторные освобождения обнаруживаются сразу.
//! Единственное ядро, которое умеет исполнять устройство, это
//! [`MATRIX_MULTIPLY_KERNEL_NAME`]; каждая ячейка сетки вычисляется
//! отдельным эмулированным work-item.

use super::backend::{BufferAccess, ComputeBackend, HandleKind, KernelArg, RawHandle};
use super::config::DeviceType;
use crate::error::{DeviceError, DeviceResult};
use crate::matrix::kernels::{MATRIX_MULTIPLY_ARG_COUNT, MATRIX_MULTIPLY_KERNEL_NAME};
use crate::opencl::types::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

const PLATFORM_BASE: usize = 0x1000;
const DEVICE_BASE: usize = 0x2000;
const OBJECT_BASE: usize = 0x10_0000;
const HOST_MAX_WORK_GROUP_SIZE: usize = 256;

#[derive(Debug)]
enum HostObject {
    Context,
    Queue,
    Program { source: String, built: bool },
    Kernel { name: String, args: Vec<Option<KernelArg>> },
    Buffer { data: Vec<i32>, access: BufferAccess },
}

impl HostObject {
    fn kind(&self) -> HandleKind {
        match self {
            HostObject::Context => HandleKind::Context,
            HostObject::Queue => HandleKind::Queue,
            HostObject::Program { .. } => HandleKind::Program,
            HostObject::Kernel { .. } => HandleKind::Kernel,
            HostObject::Buffer { .. } => HandleKind::Buffer,
        }
    }
}

#[derive(Debug, Default)]
struct HostState {
    next_handle: usize,
    objects: HashMap<usize, HostObject>,
    release_log: Vec<HandleKind>,
    dispatches: usize,
}

impl HostState {
    fn insert(&mut self, object: HostObject) -> RawHandle {
        self.next_handle += 1;
        let handle = OBJECT_BASE + self.next_handle;
        self.objects.insert(handle, object);
        RawHandle(handle)
    }

    fn get(&self, handle: RawHandle, kind: HandleKind, call: &'static str) -> DeviceResult<&HostObject> {
        match self.objects.get(&handle.0) {
            Some(object) if object.kind() == kind => Ok(object),
            _ => Err(DeviceError::Call {
                call,
                code: invalid_code(kind),
            }),
        }
    }

    fn buffer(&self, handle: RawHandle) -> DeviceResult<&[i32]> {
        match self.objects.get(&handle.0) {
            Some(HostObject::Buffer { data, .. }) => Ok(data.as_slice()),
            _ => Err(DeviceError::Call {
                call: "clEnqueueNDRangeKernel",
                code: CL_INVALID_MEM_OBJECT,
            }),
        }
    }
}

fn invalid_code(kind: HandleKind) -> cl_int {
    match kind {
        HandleKind::Context => CL_INVALID_CONTEXT,
        HandleKind::Queue => CL_INVALID_COMMAND_QUEUE,
        HandleKind::Program => CL_INVALID_PROGRAM,
        HandleKind::Kernel => CL_INVALID_KERNEL,
        HandleKind::Buffer => CL_INVALID_MEM_OBJECT,
    }
}

/// Вызов программного устройства, в который можно внедрить отказ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCall {
    CreateContext,
    CreateQueue,
    CreateProgram,
    CreateKernel,
    CreateBuffer,
    SetKernelArg,
    Enqueue,
    Finish,
    ReadBuffer,
}

impl HostCall {
    fn name(self) -> &'static str {
        match self {
            HostCall::CreateContext => "clCreateContext",
            HostCall::CreateQueue => "clCreateCommandQueue",
            HostCall::CreateProgram => "clCreateProgramWithSource",
            HostCall::CreateKernel => "clCreateKernel",
            HostCall::CreateBuffer => "clCreateBuffer",
            HostCall::SetKernelArg => "clSetKernelArg",
            HostCall::Enqueue => "clEnqueueNDRangeKernel",
            HostCall::Finish => "clFinish",
            HostCall::ReadBuffer => "clEnqueueReadBuffer",
        }
    }
}

/// Программное устройство с внедряемыми отказами
#[derive(Debug)]
pub struct HostBackend {
    platform_count: usize,
    device_count: usize,
    build_failure: Option<String>,
    failures: HashSet<HostCall>,
    state: Mutex<HostState>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// Одна платформа с одним устройством
    pub fn new() -> Self {
        Self {
            platform_count: 1,
            device_count: 1,
            build_failure: None,
            failures: HashSet::new(),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_platforms(mut self, count: usize) -> Self {
        self.platform_count = count;
        self
    }

    pub fn with_devices(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    /// Любая сборка программы завершится ошибкой с данным логом
    pub fn with_build_failure(mut self, log: impl Into<String>) -> Self {
        self.build_failure = Some(log.into());
        self
    }

    /// Вызов `call` всегда завершается ошибкой `CL_OUT_OF_RESOURCES`
    pub fn with_failure(mut self, call: HostCall) -> Self {
        self.failures.insert(call);
        self
    }

    /// Число неосвобождённых объектов
    pub fn live_handles(&self) -> usize {
        self.lock().map(|s| s.objects.len()).unwrap_or(0)
    }

    /// Виды освобождённых объектов в порядке освобождения
    pub fn release_log(&self) -> Vec<HandleKind> {
        self.lock().map(|s| s.release_log.clone()).unwrap_or_default()
    }

    /// Число запусков ядра
    pub fn dispatch_count(&self) -> usize {
        self.lock().map(|s| s.dispatches).unwrap_or(0)
    }

    fn lock(&self) -> DeviceResult<MutexGuard<'_, HostState>> {
        self.state
            .lock()
            .map_err(|e| DeviceError::LockPoisoned(e.to_string()))
    }

    fn inject(&self, call: HostCall) -> DeviceResult<()> {
        if self.failures.contains(&call) {
            return Err(DeviceError::Call {
                call: call.name(),
                code: CL_OUT_OF_RESOURCES,
            });
        }
        Ok(())
    }

    fn check_device(&self, device: RawHandle, call: &'static str) -> DeviceResult<()> {
        let index = device.0.wrapping_sub(DEVICE_BASE);
        if device.0 < DEVICE_BASE || index >= self.device_count {
            return Err(DeviceError::Call {
                call,
                code: CL_INVALID_DEVICE,
            });
        }
        Ok(())
    }
}

/// Эмуляция `matrix_multiply`: один проход на каждый work-item сетки
fn run_matrix_multiply(
    a: &[i32],
    b: &[i32],
    c: &mut [i32],
    global: [usize; 2],
    cols_a: usize,
    cols_b: usize,
) -> DeviceResult<()> {
    let out_of_resources = DeviceError::Call {
        call: "clEnqueueNDRangeKernel",
        code: CL_OUT_OF_RESOURCES,
    };
    for row in 0..global[0] {
        for col in 0..global[1] {
            let mut sum = 0i32;
            for k in 0..cols_a {
                let (Some(&x), Some(&y)) = (a.get(row * cols_a + k), b.get(k * cols_b + col)) else {
                    return Err(out_of_resources);
                };
                sum = sum.wrapping_add(x.wrapping_mul(y));
            }
            match c.get_mut(row * cols_b + col) {
                Some(cell) => *cell = sum,
                None => return Err(out_of_resources),
            }
        }
    }
    Ok(())
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> DeviceResult<Vec<RawHandle>> {
        Ok((0..self.platform_count).map(|i| RawHandle(PLATFORM_BASE + i)).collect())
    }

    fn devices(&self, platform: RawHandle, _device_type: DeviceType) -> DeviceResult<Vec<RawHandle>> {
        if platform.0 < PLATFORM_BASE || platform.0 - PLATFORM_BASE >= self.platform_count {
            return Err(DeviceError::Call {
                call: "clGetDeviceIDs",
                code: CL_INVALID_VALUE,
            });
        }
        Ok((0..self.device_count).map(|i| RawHandle(DEVICE_BASE + i)).collect())
    }

    fn platform_name(&self, _platform: RawHandle) -> DeviceResult<String> {
        Ok("Host emulation".to_string())
    }

    fn device_name(&self, device: RawHandle) -> DeviceResult<String> {
        self.check_device(device, "clGetDeviceInfo")?;
        Ok(format!("host-device-{}", device.0 - DEVICE_BASE))
    }

    fn max_work_group_size(&self, device: RawHandle) -> DeviceResult<usize> {
        self.check_device(device, "clGetDeviceInfo")?;
        Ok(HOST_MAX_WORK_GROUP_SIZE)
    }

    fn create_context(&self, device: RawHandle) -> DeviceResult<RawHandle> {
        self.inject(HostCall::CreateContext)?;
        self.check_device(device, "clCreateContext")?;
        Ok(self.lock()?.insert(HostObject::Context))
    }

    fn create_queue(&self, context: RawHandle, device: RawHandle) -> DeviceResult<RawHandle> {
        self.inject(HostCall::CreateQueue)?;
        self.check_device(device, "clCreateCommandQueue")?;
        let mut state = self.lock()?;
        state.get(context, HandleKind::Context, "clCreateCommandQueue")?;
        Ok(state.insert(HostObject::Queue))
    }

    fn create_program(&self, context: RawHandle, source: &str) -> DeviceResult<RawHandle> {
        self.inject(HostCall::CreateProgram)?;
        let mut state = self.lock()?;
        state.get(context, HandleKind::Context, "clCreateProgramWithSource")?;
        Ok(state.insert(HostObject::Program {
            source: source.to_string(),
            built: false,
        }))
    }

    fn build_program(&self, program: RawHandle, device: RawHandle, _options: Option<&str>) -> DeviceResult<()> {
        self.check_device(device, "clBuildProgram")?;
        let mut state = self.lock()?;
        match state.objects.get_mut(&program.0) {
            Some(HostObject::Program { source, built }) => {
                if let Some(log) = &self.build_failure {
                    return Err(DeviceError::KernelBuild {
                        code: CL_BUILD_PROGRAM_FAILURE,
                        log: log.clone(),
                    });
                }
                if !source.contains("__kernel") {
                    return Err(DeviceError::KernelBuild {
                        code: CL_BUILD_PROGRAM_FAILURE,
                        log: "error: program defines no __kernel functions".to_string(),
                    });
                }
                *built = true;
                Ok(())
            }
            _ => Err(DeviceError::Call {
                call: "clBuildProgram",
                code: CL_INVALID_PROGRAM,
            }),
        }
    }

    fn create_kernel(&self, program: RawHandle, name: &str) -> DeviceResult<RawHandle> {
        self.inject(HostCall::CreateKernel)?;
        let mut state = self.lock()?;
        let (source, built) = match state.objects.get(&program.0) {
            Some(HostObject::Program { source, built }) => (source, *built),
            _ => {
                return Err(DeviceError::Call {
                    call: "clCreateKernel",
                    code: CL_INVALID_PROGRAM,
                })
            }
        };
        if !built {
            return Err(DeviceError::Call {
                call: "clCreateKernel",
                code: CL_INVALID_PROGRAM_EXECUTABLE,
            });
        }
        if !source.contains(&format!("__kernel void {name}(")) {
            return Err(DeviceError::Call {
                call: "clCreateKernel",
                code: CL_INVALID_KERNEL_NAME,
            });
        }
        Ok(state.insert(HostObject::Kernel {
            name: name.to_string(),
            args: vec![None; MATRIX_MULTIPLY_ARG_COUNT],
        }))
    }

    fn create_buffer(
        &self,
        context: RawHandle,
        access: BufferAccess,
        len: usize,
        host: Option<&[i32]>,
    ) -> DeviceResult<RawHandle> {
        self.inject(HostCall::CreateBuffer)?;
        if len == 0 {
            return Err(DeviceError::Call {
                call: "clCreateBuffer",
                code: CL_INVALID_BUFFER_SIZE,
            });
        }
        let data = match host {
            Some(data) if data.len() == len => data.to_vec(),
            Some(_) => {
                return Err(DeviceError::Call {
                    call: "clCreateBuffer",
                    code: CL_INVALID_VALUE,
                })
            }
            None => vec![0; len],
        };
        let mut state = self.lock()?;
        state.get(context, HandleKind::Context, "clCreateBuffer")?;
        Ok(state.insert(HostObject::Buffer { data, access }))
    }

    fn set_kernel_arg(&self, kernel: RawHandle, index: u32, arg: KernelArg) -> DeviceResult<()> {
        self.inject(HostCall::SetKernelArg)?;
        let mut state = self.lock()?;
        if let KernelArg::Buffer(buffer) = arg {
            state.get(buffer, HandleKind::Buffer, "clSetKernelArg")?;
        }
        match state.objects.get_mut(&kernel.0) {
            Some(HostObject::Kernel { args, .. }) => match args.get_mut(index as usize) {
                Some(slot) => {
                    *slot = Some(arg);
                    Ok(())
                }
                None => Err(DeviceError::Call {
                    call: "clSetKernelArg",
                    code: CL_INVALID_ARG_INDEX,
                }),
            },
            _ => Err(DeviceError::Call {
                call: "clSetKernelArg",
                code: CL_INVALID_KERNEL,
            }),
        }
    }

    fn enqueue_kernel_2d(
        &self,
        queue: RawHandle,
        kernel: RawHandle,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> DeviceResult<()> {
        self.inject(HostCall::Enqueue)?;
        let mut state = self.lock()?;
        state.get(queue, HandleKind::Queue, "clEnqueueNDRangeKernel")?;
        let (name, args) = match state.objects.get(&kernel.0) {
            Some(HostObject::Kernel { name, args }) => (name, args),
            _ => {
                return Err(DeviceError::Call {
                    call: "clEnqueueNDRangeKernel",
                    code: CL_INVALID_KERNEL,
                })
            }
        };
        if name != MATRIX_MULTIPLY_KERNEL_NAME {
            return Err(DeviceError::Call {
                call: "clEnqueueNDRangeKernel",
                code: CL_INVALID_KERNEL,
            });
        }
        if let Some([lx, ly]) = local {
            if lx == 0 || ly == 0 || global[0] % lx != 0 || global[1] % ly != 0 || lx * ly > HOST_MAX_WORK_GROUP_SIZE {
                return Err(DeviceError::Call {
                    call: "clEnqueueNDRangeKernel",
                    code: CL_INVALID_WORK_GROUP_SIZE,
                });
            }
        }

        let mut bound = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            match arg {
                Some(arg) => bound.push(*arg),
                None => return Err(DeviceError::UnboundArgument { index: index as u32 }),
            }
        }
        let invalid_args = DeviceError::Call {
            call: "clEnqueueNDRangeKernel",
            code: CL_INVALID_KERNEL_ARGS,
        };
        let [KernelArg::Buffer(a), KernelArg::Buffer(b), KernelArg::Buffer(c), KernelArg::Int(_rows_a), KernelArg::Int(cols_a), KernelArg::Int(cols_b)] =
            bound[..]
        else {
            return Err(invalid_args);
        };
        let (Ok(cols_a), Ok(cols_b)) = (usize::try_from(cols_a), usize::try_from(cols_b)) else {
            return Err(invalid_args);
        };

        let lhs = state.buffer(a)?.to_vec();
        let rhs = state.buffer(b)?.to_vec();
        let mut out = match state.objects.get(&c.0) {
            Some(HostObject::Buffer { data, access }) if *access == BufferAccess::WriteOnly => data.clone(),
            _ => {
                return Err(DeviceError::Call {
                    call: "clEnqueueNDRangeKernel",
                    code: CL_INVALID_MEM_OBJECT,
                })
            }
        };
        run_matrix_multiply(&lhs, &rhs, &mut out, global, cols_a, cols_b)?;
        if let Some(HostObject::Buffer { data, .. }) = state.objects.get_mut(&c.0) {
            *data = out;
        }
        state.dispatches += 1;
        Ok(())
    }

    fn finish(&self, queue: RawHandle) -> DeviceResult<()> {
        self.inject(HostCall::Finish)?;
        // Команды исполняются синхронно в enqueue
        self.lock()?.get(queue, HandleKind::Queue, "clFinish").map(|_| ())
    }

    fn read_buffer(&self, queue: RawHandle, buffer: RawHandle, out: &mut [i32]) -> DeviceResult<()> {
        self.inject(HostCall::ReadBuffer)?;
        let state = self.lock()?;
        state.get(queue, HandleKind::Queue, "clEnqueueReadBuffer")?;
        match state.objects.get(&buffer.0) {
            Some(HostObject::Buffer { data, .. }) if data.len() >= out.len() => {
                out.copy_from_slice(&data[..out.len()]);
                Ok(())
            }
            Some(HostObject::Buffer { .. }) => Err(DeviceError::Call {
                call: "clEnqueueReadBuffer",
                code: CL_INVALID_VALUE,
            }),
            _ => Err(DeviceError::Call {
                call: "clEnqueueReadBuffer",
                code: CL_INVALID_MEM_OBJECT,
            }),
        }
    }

    fn release(&self, kind: HandleKind, handle: RawHandle) -> DeviceResult<()> {
        if handle.is_null() {
            return Ok(());
        }
        let mut state = self.lock()?;
        match state.objects.get(&handle.0) {
            Some(object) if object.kind() == kind => {
                state.objects.remove(&handle.0);
                state.release_log.push(kind);
                Ok(())
            }
            _ => Err(DeviceError::InvalidHandle(handle.0)),
        }
    }
}
