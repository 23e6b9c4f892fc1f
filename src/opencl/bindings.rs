//! Низкоуровневые привязки к OpenCL API
//!
//! Библиотека OpenCL загружается во время выполнения, поэтому крейт
//! собирается и работает на машинах без ICD-загрузчика: отсутствие
//! библиотеки превращается в обычную ошибку, а не в ошибку линковки.

use super::callbacks::ContextNotifyCallback;
use super::types::*;
use crate::error::{DeviceError, DeviceResult};
use libloading::Library;
use std::ffi::{c_char, c_void};

/// Имена, под которыми ищется библиотека OpenCL
pub const LIBRARY_CANDIDATES: &[&str] = &[
    "libOpenCL.so.1",
    "libOpenCL.so",
    "OpenCL.dll",
    "/System/Library/Frameworks/OpenCL.framework/OpenCL",
];

pub type ClGetPlatformIDs =
    unsafe extern "C" fn(num_entries: cl_uint, platforms: *mut cl_platform_id, num_platforms: *mut cl_uint) -> cl_int;

pub type ClGetPlatformInfo = unsafe extern "C" fn(
    platform: cl_platform_id,
    param_name: cl_platform_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClGetDeviceIDs = unsafe extern "C" fn(
    platform: cl_platform_id,
    device_type: cl_device_type,
    num_entries: cl_uint,
    devices: *mut cl_device_id,
    num_devices: *mut cl_uint,
) -> cl_int;

pub type ClGetDeviceInfo = unsafe extern "C" fn(
    device: cl_device_id,
    param_name: cl_device_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClCreateContext = unsafe extern "C" fn(
    properties: *const cl_context_properties,
    num_devices: cl_uint,
    devices: *const cl_device_id,
    pfn_notify: ContextNotifyCallback,
    user_data: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_context;

pub type ClCreateCommandQueue = unsafe extern "C" fn(
    context: cl_context,
    device: cl_device_id,
    properties: cl_command_queue_properties,
    errcode_ret: *mut cl_int,
) -> cl_command_queue;

pub type ClCreateProgramWithSource = unsafe extern "C" fn(
    context: cl_context,
    count: cl_uint,
    strings: *const *const c_char,
    lengths: *const usize,
    errcode_ret: *mut cl_int,
) -> cl_program;

pub type ClBuildProgram = unsafe extern "C" fn(
    program: cl_program,
    num_devices: cl_uint,
    device_list: *const cl_device_id,
    options: *const c_char,
    pfn_notify: Option<unsafe extern "C" fn(cl_program, *mut c_void)>,
    user_data: *mut c_void,
) -> cl_int;

pub type ClGetProgramBuildInfo = unsafe extern "C" fn(
    program: cl_program,
    device: cl_device_id,
    param_name: cl_program_build_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

pub type ClCreateKernel =
    unsafe extern "C" fn(program: cl_program, kernel_name: *const c_char, errcode_ret: *mut cl_int) -> cl_kernel;

pub type ClCreateBuffer = unsafe extern "C" fn(
    context: cl_context,
    flags: cl_mem_flags,
    size: usize,
    host_ptr: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_mem;

pub type ClSetKernelArg =
    unsafe extern "C" fn(kernel: cl_kernel, arg_index: cl_uint, arg_size: usize, arg_value: *const c_void) -> cl_int;

pub type ClEnqueueNDRangeKernel = unsafe extern "C" fn(
    command_queue: cl_command_queue,
    kernel: cl_kernel,
    work_dim: cl_uint,
    global_work_offset: *const usize,
    global_work_size: *const usize,
    local_work_size: *const usize,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

pub type ClEnqueueReadBuffer = unsafe extern "C" fn(
    command_queue: cl_command_queue,
    buffer: cl_mem,
    blocking_read: cl_bool,
    offset: usize,
    size: usize,
    ptr: *mut c_void,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

pub type ClFinish = unsafe extern "C" fn(command_queue: cl_command_queue) -> cl_int;

pub type ClRelease = unsafe extern "C" fn(handle: *mut c_void) -> cl_int;

/// Таблица функций OpenCL, разрешённых из динамической библиотеки
pub struct OpenClApi {
    pub get_platform_ids: ClGetPlatformIDs,
    pub get_platform_info: ClGetPlatformInfo,
    pub get_device_ids: ClGetDeviceIDs,
    pub get_device_info: ClGetDeviceInfo,
    pub create_context: ClCreateContext,
    pub create_command_queue: ClCreateCommandQueue,
    pub create_program_with_source: ClCreateProgramWithSource,
    pub build_program: ClBuildProgram,
    pub get_program_build_info: ClGetProgramBuildInfo,
    pub create_kernel: ClCreateKernel,
    pub create_buffer: ClCreateBuffer,
    pub set_kernel_arg: ClSetKernelArg,
    pub enqueue_nd_range_kernel: ClEnqueueNDRangeKernel,
    pub enqueue_read_buffer: ClEnqueueReadBuffer,
    pub finish: ClFinish,
    pub release_mem_object: ClRelease,
    pub release_kernel: ClRelease,
    pub release_program: ClRelease,
    pub release_command_queue: ClRelease,
    pub release_context: ClRelease,
    // Указатели на функции валидны, пока библиотека загружена
    _lib: Library,
}

impl OpenClApi {
    /// Загружает первую найденную библиотеку OpenCL и разрешает символы
    pub fn load() -> DeviceResult<Self> {
        let lib = load_library()?;
        unsafe {
            Ok(Self {
                get_platform_ids: symbol(&lib, "clGetPlatformIDs")?,
                get_platform_info: symbol(&lib, "clGetPlatformInfo")?,
                get_device_ids: symbol(&lib, "clGetDeviceIDs")?,
                get_device_info: symbol(&lib, "clGetDeviceInfo")?,
                create_context: symbol(&lib, "clCreateContext")?,
                create_command_queue: symbol(&lib, "clCreateCommandQueue")?,
                create_program_with_source: symbol(&lib, "clCreateProgramWithSource")?,
                build_program: symbol(&lib, "clBuildProgram")?,
                get_program_build_info: symbol(&lib, "clGetProgramBuildInfo")?,
                create_kernel: symbol(&lib, "clCreateKernel")?,
                create_buffer: symbol(&lib, "clCreateBuffer")?,
                set_kernel_arg: symbol(&lib, "clSetKernelArg")?,
                enqueue_nd_range_kernel: symbol(&lib, "clEnqueueNDRangeKernel")?,
                enqueue_read_buffer: symbol(&lib, "clEnqueueReadBuffer")?,
                finish: symbol(&lib, "clFinish")?,
                release_mem_object: symbol(&lib, "clReleaseMemObject")?,
                release_kernel: symbol(&lib, "clReleaseKernel")?,
                release_program: symbol(&lib, "clReleaseProgram")?,
                release_command_queue: symbol(&lib, "clReleaseCommandQueue")?,
                release_context: symbol(&lib, "clReleaseContext")?,
                _lib: lib,
            })
        }
    }
}

fn load_library() -> DeviceResult<Library> {
    for candidate in LIBRARY_CANDIDATES {
        // Только поиск библиотеки, код инициализации OpenCL ICD безопасен
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            log::debug!("loaded OpenCL library from {candidate}");
            return Ok(lib);
        }
    }
    Err(DeviceError::LibraryLoad {
        tried: LIBRARY_CANDIDATES.join(", "),
    })
}

/// Разрешает символ; тип `T` обязан совпадать с сигнатурой из заголовков OpenCL
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> DeviceResult<T> {
    let mut c_name = Vec::with_capacity(name.len() + 1);
    c_name.extend_from_slice(name.as_bytes());
    c_name.push(0);
    let sym = lib
        .get::<T>(&c_name)
        .map_err(|source| DeviceError::MissingSymbol { symbol: name, source })?;
    Ok(*sym)
}
