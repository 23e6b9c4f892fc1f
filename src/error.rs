//! Типы ошибок крейта

use thiserror::Error;

/// Причина, по которой вычислительное устройство не было найдено
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryFailure {
    #[error("no OpenCL platforms available")]
    NoPlatform,

    #[error("no devices available on the selected platform")]
    NoDevice,

    #[error("compute runtime is not available: {0}")]
    RuntimeMissing(String),
}

/// Ошибки уровня устройства
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("compute device unavailable: {0}")]
    Unavailable(DiscoveryFailure),

    #[error("failed to load OpenCL library (tried {tried})")]
    LibraryLoad { tried: String },

    #[error("failed to resolve OpenCL symbol {symbol}: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("OpenCL call {call} failed with error code {code}")]
    Call { call: &'static str, code: i32 },

    #[error("OpenCL call {call} returned a null handle")]
    NullHandle { call: &'static str },

    #[error("kernel build failed with error code {code}:\n{log}")]
    KernelBuild { code: i32, log: String },

    #[error("unknown or already released device handle {0:#x}")]
    InvalidHandle(usize),

    #[error("kernel argument {index} is not bound")]
    UnboundArgument { index: u32 },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Ошибки матричных операций
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("matrix data does not match the declared shape {rows}x{cols}: {detail}")]
    InvalidData {
        rows: usize,
        cols: usize,
        detail: String,
    },

    #[error("element ({row}, {col}) is outside of a {rows}x{cols} matrix")]
    OutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("cannot multiply {lhs_rows}x{lhs_cols} by {rhs_rows}x{rhs_cols}: inner dimensions differ")]
    DimensionMismatch {
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    #[error("dimension {0} does not fit the kernel's int arguments")]
    TooLarge(usize),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl MatrixError {
    /// Истина, если операция не выполнена из-за отсутствия устройства
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, MatrixError::Device(DeviceError::Unavailable(_)))
    }
}

pub type Result<T> = std::result::Result<T, MatrixError>;
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
