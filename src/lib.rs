//! Integer matrix multiplication on the CPU and offloaded to OpenCL devices

// Макросы объявлены первыми, чтобы быть видимыми во всех модулях крейта
#[macro_use]
mod macros {
    /// Макрос для обработки ошибок OpenCL (коды возврата)
    #[macro_export]
    macro_rules! cl_check {
        ($call:literal, $expr:expr) => {{
            let code = unsafe { $expr };
            if code != $crate::opencl::types::CL_SUCCESS {
                Err($crate::error::DeviceError::Call { call: $call, code })
            } else {
                Ok(())
            }
        }};
    }

    /// Макрос для функций OpenCL, создающих объекты (код ошибки через errcode_ret)
    #[macro_export]
    macro_rules! cl_create {
        ($call:literal, |$err:ident| $expr:expr) => {{
            let mut $err: $crate::opencl::types::cl_int = $crate::opencl::types::CL_SUCCESS;
            let obj = unsafe { $expr };
            if $err != $crate::opencl::types::CL_SUCCESS {
                Err($crate::error::DeviceError::Call { call: $call, code: $err })
            } else if obj.is_null() {
                Err($crate::error::DeviceError::NullHandle { call: $call })
            } else {
                Ok(obj)
            }
        }};
    }
}

pub mod device;
pub mod error;
pub mod matrix;
pub mod opencl;
pub mod utils;

// Реэкспорт основных типов для удобства
pub use device::{
    ComputeBackend, DeviceConfig, DeviceEnvironment, DeviceInfo, DeviceState, DeviceType, HostBackend, HostCall,
    OffloadDispatcher, OpenClBackend,
};
pub use error::{DeviceError, DiscoveryFailure, MatrixError};
pub use matrix::{Matrix, MatrixType};
