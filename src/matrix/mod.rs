//! Модуль для работы с матрицами
//!
//! Предоставляет:
//! - Плотную целочисленную матрицу
//! - Операции над матрицами (эталонное умножение на CPU)
//! - Исходный код ядра OpenCL

mod dense;
mod types;
pub mod kernels;
pub mod operations;

pub use dense::Matrix;
pub use kernels::{MATRIX_MULTIPLY_KERNEL, MATRIX_MULTIPLY_KERNEL_NAME};
pub use operations::{compare_results, cpu_matrix_multiply, initialize_matrices};
pub use types::{Comparison, MatrixType};
