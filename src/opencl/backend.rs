//! Реализация [`ComputeBackend`] поверх настоящего OpenCL

use super::bindings::OpenClApi;
use super::callbacks::log_context_callback;
use super::types::*;
use crate::device::{BufferAccess, ComputeBackend, DeviceType, HandleKind, KernelArg, RawHandle};
use crate::error::{DeviceError, DeviceResult};
use std::ffi::{c_char, c_void, CString};
use std::ptr;

/// Среда OpenCL, загруженная из системного ICD-загрузчика
pub struct OpenClBackend {
    api: OpenClApi,
}

impl OpenClBackend {
    /// Загружает библиотеку OpenCL
    pub fn load() -> DeviceResult<Self> {
        Ok(Self { api: OpenClApi::load()? })
    }

    fn build_log(&self, program: cl_program, device: cl_device_id) -> String {
        let mut log_size: usize = 0;
        let status = unsafe {
            (self.api.get_program_build_info)(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                0,
                ptr::null_mut(),
                &mut log_size,
            )
        };
        if status != CL_SUCCESS || log_size == 0 {
            return String::new();
        }

        let mut build_log = vec![0u8; log_size];
        let status = unsafe {
            (self.api.get_program_build_info)(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                log_size,
                build_log.as_mut_ptr() as *mut c_void,
                ptr::null_mut(),
            )
        };
        if status != CL_SUCCESS {
            return String::new();
        }
        c_bytes_to_string(&build_log)
    }

    fn device_info_bytes(&self, device: RawHandle, param: cl_device_info) -> DeviceResult<Vec<u8>> {
        let mut size = 0usize;
        cl_check!(
            "clGetDeviceInfo",
            (self.api.get_device_info)(device.as_ptr(), param, 0, ptr::null_mut(), &mut size)
        )?;
        let mut value = vec![0u8; size];
        cl_check!(
            "clGetDeviceInfo",
            (self.api.get_device_info)(
                device.as_ptr(),
                param,
                size,
                value.as_mut_ptr() as *mut c_void,
                ptr::null_mut()
            )
        )?;
        Ok(value)
    }
}

/// Строка из буфера с завершающим нулём
fn c_bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

fn byte_len(len: usize) -> usize {
    len * std::mem::size_of::<i32>()
}

impl ComputeBackend for OpenClBackend {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> DeviceResult<Vec<RawHandle>> {
        let mut num_platforms: cl_uint = 0;
        let status = unsafe { (self.api.get_platform_ids)(0, ptr::null_mut(), &mut num_platforms) };
        // ICD-загрузчик без драйверов сообщает CL_PLATFORM_NOT_FOUND_KHR
        if status == CL_PLATFORM_NOT_FOUND_KHR || (status == CL_SUCCESS && num_platforms == 0) {
            return Ok(Vec::new());
        }
        if status != CL_SUCCESS {
            return Err(DeviceError::Call {
                call: "clGetPlatformIDs",
                code: status,
            });
        }

        let mut platform_ids: Vec<cl_platform_id> = vec![ptr::null_mut(); num_platforms as usize];
        cl_check!(
            "clGetPlatformIDs",
            (self.api.get_platform_ids)(num_platforms, platform_ids.as_mut_ptr(), ptr::null_mut())
        )?;
        Ok(platform_ids.into_iter().map(RawHandle::from_ptr).collect())
    }

    fn devices(&self, platform: RawHandle, device_type: DeviceType) -> DeviceResult<Vec<RawHandle>> {
        let mut num_devices: cl_uint = 0;
        let status = unsafe {
            (self.api.get_device_ids)(platform.as_ptr(), device_type.as_cl(), 0, ptr::null_mut(), &mut num_devices)
        };
        if status == CL_DEVICE_NOT_FOUND || (status == CL_SUCCESS && num_devices == 0) {
            return Ok(Vec::new());
        }
        if status != CL_SUCCESS {
            return Err(DeviceError::Call {
                call: "clGetDeviceIDs",
                code: status,
            });
        }

        let mut device_ids: Vec<cl_device_id> = vec![ptr::null_mut(); num_devices as usize];
        cl_check!(
            "clGetDeviceIDs",
            (self.api.get_device_ids)(
                platform.as_ptr(),
                device_type.as_cl(),
                num_devices,
                device_ids.as_mut_ptr(),
                ptr::null_mut()
            )
        )?;
        Ok(device_ids.into_iter().map(RawHandle::from_ptr).collect())
    }

    fn platform_name(&self, platform: RawHandle) -> DeviceResult<String> {
        let mut size = 0usize;
        cl_check!(
            "clGetPlatformInfo",
            (self.api.get_platform_info)(platform.as_ptr(), CL_PLATFORM_NAME, 0, ptr::null_mut(), &mut size)
        )?;
        let mut value = vec![0u8; size];
        cl_check!(
            "clGetPlatformInfo",
            (self.api.get_platform_info)(
                platform.as_ptr(),
                CL_PLATFORM_NAME,
                size,
                value.as_mut_ptr() as *mut c_void,
                ptr::null_mut()
            )
        )?;
        Ok(c_bytes_to_string(&value))
    }

    fn device_name(&self, device: RawHandle) -> DeviceResult<String> {
        let value = self.device_info_bytes(device, CL_DEVICE_NAME)?;
        Ok(c_bytes_to_string(&value))
    }

    fn max_work_group_size(&self, device: RawHandle) -> DeviceResult<usize> {
        let mut max_work_group_size = 0usize;
        cl_check!(
            "clGetDeviceInfo",
            (self.api.get_device_info)(
                device.as_ptr(),
                CL_DEVICE_MAX_WORK_GROUP_SIZE,
                std::mem::size_of::<usize>(),
                &mut max_work_group_size as *mut _ as *mut c_void,
                ptr::null_mut()
            )
        )?;
        Ok(max_work_group_size)
    }

    fn create_context(&self, device: RawHandle) -> DeviceResult<RawHandle> {
        let device_id: cl_device_id = device.as_ptr();
        let context = cl_create!("clCreateContext", |err| (self.api.create_context)(
            ptr::null(),
            1,
            &device_id,
            Some(log_context_callback),
            ptr::null_mut(),
            &mut err
        ))?;
        Ok(RawHandle::from_ptr(context))
    }

    fn create_queue(&self, context: RawHandle, device: RawHandle) -> DeviceResult<RawHandle> {
        let queue = cl_create!("clCreateCommandQueue", |err| (self.api.create_command_queue)(
            context.as_ptr(),
            device.as_ptr(),
            0,
            &mut err
        ))?;
        Ok(RawHandle::from_ptr(queue))
    }

    fn create_program(&self, context: RawHandle, source: &str) -> DeviceResult<RawHandle> {
        let source_ptr = source.as_ptr() as *const c_char;
        let source_len = source.len();
        let program = cl_create!("clCreateProgramWithSource", |err| (self.api.create_program_with_source)(
            context.as_ptr(),
            1,
            &source_ptr,
            &source_len,
            &mut err
        ))?;
        Ok(RawHandle::from_ptr(program))
    }

    fn build_program(&self, program: RawHandle, device: RawHandle, options: Option<&str>) -> DeviceResult<()> {
        let options = options
            .map(CString::new)
            .transpose()
            .map_err(|_| DeviceError::Call {
                call: "clBuildProgram",
                code: CL_INVALID_BUILD_OPTIONS,
            })?;
        let device_id: cl_device_id = device.as_ptr();
        let build_status = unsafe {
            (self.api.build_program)(
                program.as_ptr(),
                1,
                &device_id,
                options.as_ref().map_or(ptr::null(), |o| o.as_ptr()),
                None,
                ptr::null_mut(),
            )
        };
        if build_status != CL_SUCCESS {
            return Err(DeviceError::KernelBuild {
                code: build_status,
                log: self.build_log(program.as_ptr(), device_id),
            });
        }
        Ok(())
    }

    fn create_kernel(&self, program: RawHandle, name: &str) -> DeviceResult<RawHandle> {
        let kernel_name = CString::new(name).map_err(|_| DeviceError::Call {
            call: "clCreateKernel",
            code: CL_INVALID_KERNEL_NAME,
        })?;
        let kernel = cl_create!("clCreateKernel", |err| (self.api.create_kernel)(
            program.as_ptr(),
            kernel_name.as_ptr(),
            &mut err
        ))?;
        Ok(RawHandle::from_ptr(kernel))
    }

    fn create_buffer(
        &self,
        context: RawHandle,
        access: BufferAccess,
        len: usize,
        host: Option<&[i32]>,
    ) -> DeviceResult<RawHandle> {
        let mut flags = match access {
            BufferAccess::ReadOnly => CL_MEM_READ_ONLY,
            BufferAccess::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        let host_ptr = match host {
            Some(data) => {
                debug_assert_eq!(data.len(), len);
                flags |= CL_MEM_COPY_HOST_PTR;
                // CL_MEM_COPY_HOST_PTR только читает из указателя
                data.as_ptr() as *mut c_void
            }
            None => ptr::null_mut(),
        };
        let buffer = cl_create!("clCreateBuffer", |err| (self.api.create_buffer)(
            context.as_ptr(),
            flags,
            byte_len(len),
            host_ptr,
            &mut err
        ))?;
        Ok(RawHandle::from_ptr(buffer))
    }

    fn set_kernel_arg(&self, kernel: RawHandle, index: u32, arg: KernelArg) -> DeviceResult<()> {
        match arg {
            KernelArg::Buffer(buffer) => {
                let mem: cl_mem = buffer.as_ptr();
                cl_check!(
                    "clSetKernelArg",
                    (self.api.set_kernel_arg)(
                        kernel.as_ptr(),
                        index,
                        std::mem::size_of::<cl_mem>(),
                        &mem as *const _ as *const c_void
                    )
                )
            }
            KernelArg::Int(value) => cl_check!(
                "clSetKernelArg",
                (self.api.set_kernel_arg)(
                    kernel.as_ptr(),
                    index,
                    std::mem::size_of::<cl_int>(),
                    &value as *const _ as *const c_void
                )
            ),
        }
    }

    fn enqueue_kernel_2d(
        &self,
        queue: RawHandle,
        kernel: RawHandle,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> DeviceResult<()> {
        let local_ptr = local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        cl_check!(
            "clEnqueueNDRangeKernel",
            (self.api.enqueue_nd_range_kernel)(
                queue.as_ptr(),
                kernel.as_ptr(),
                2,
                ptr::null(),
                global.as_ptr(),
                local_ptr,
                0,
                ptr::null(),
                ptr::null_mut()
            )
        )
    }

    fn finish(&self, queue: RawHandle) -> DeviceResult<()> {
        cl_check!("clFinish", (self.api.finish)(queue.as_ptr()))
    }

    fn read_buffer(&self, queue: RawHandle, buffer: RawHandle, out: &mut [i32]) -> DeviceResult<()> {
        cl_check!(
            "clEnqueueReadBuffer",
            (self.api.enqueue_read_buffer)(
                queue.as_ptr(),
                buffer.as_ptr(),
                CL_TRUE,
                0,
                byte_len(out.len()),
                out.as_mut_ptr() as *mut c_void,
                0,
                ptr::null(),
                ptr::null_mut()
            )
        )
    }

    fn release(&self, kind: HandleKind, handle: RawHandle) -> DeviceResult<()> {
        if handle.is_null() {
            return Ok(());
        }
        let (call, release) = match kind {
            HandleKind::Buffer => ("clReleaseMemObject", self.api.release_mem_object),
            HandleKind::Kernel => ("clReleaseKernel", self.api.release_kernel),
            HandleKind::Program => ("clReleaseProgram", self.api.release_program),
            HandleKind::Queue => ("clReleaseCommandQueue", self.api.release_command_queue),
            HandleKind::Context => ("clReleaseContext", self.api.release_context),
        };
        let code = unsafe { release(handle.as_ptr()) };
        if code != CL_SUCCESS {
            return Err(DeviceError::Call { call, code });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_strings_are_trimmed_at_nul() {
        assert_eq!(c_bytes_to_string(b"NVIDIA CUDA\0\0\0"), "NVIDIA CUDA");
        assert_eq!(c_bytes_to_string(b"no terminator"), "no terminator");
        assert_eq!(c_bytes_to_string(b""), "");
    }

    #[test]
    #[ignore = "requires an OpenCL runtime"]
    fn lists_platforms_of_real_runtime() {
        let backend = match OpenClBackend::load() {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("Skipped: {e}");
                return;
            }
        };
        let platforms = backend.platforms().unwrap();
        for platform in platforms {
            eprintln!("platform: {}", backend.platform_name(platform).unwrap());
        }
    }
}
