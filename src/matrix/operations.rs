//! Операции над матрицами

use super::dense::Matrix;
use super::types::{Comparison, MatrixType};
use rand::Rng;

/// Диапазон значений случайных матриц; сумма произведений не переполняет `i32`
/// при размерах до нескольких тысяч
pub const RANDOM_RANGE: std::ops::RangeInclusive<i32> = -100..=100;

/// Инициализирует матрицы заданного типа и размера
pub fn initialize_matrices(matrix_type: MatrixType, size: usize) -> (Matrix, Matrix) {
    let matrix_elements = size * size;
    let (a, b) = match matrix_type {
        MatrixType::OnesAndTwos => (vec![1; matrix_elements], vec![2; matrix_elements]),
        MatrixType::ThreesAndFours => (vec![3; matrix_elements], vec![4; matrix_elements]),
        MatrixType::Random => {
            let mut rng = rand::thread_rng();
            let a: Vec<i32> = (0..matrix_elements).map(|_| rng.gen_range(RANDOM_RANGE)).collect();
            let b: Vec<i32> = (0..matrix_elements).map(|_| rng.gen_range(RANDOM_RANGE)).collect();
            (a, b)
        }
    };
    (Matrix::from_raw(size, size, a), Matrix::from_raw(size, size, b))
}

/// CPU реализация матричного умножения
///
/// `a` размера `m x k`, `b` размера `k x n`, `c` размера `m x n`, все по строкам.
/// Арифметика с переполнением по модулю 2^32, как у `int` в ядре OpenCL.
pub fn cpu_matrix_multiply(a: &[i32], b: &[i32], c: &mut [i32], m: usize, k: usize, n: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(c.len(), m * n);

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0i32;
            for p in 0..k {
                sum = sum.wrapping_add(a[i * k + p].wrapping_mul(b[p * n + j]));
            }
            c[i * n + j] = sum;
        }
    }
}

/// Сравнивает результаты GPU и CPU вычислений
pub fn compare_results(gpu_result: &[i32], cpu_result: &[i32]) -> Comparison {
    let mut comparison = Comparison {
        mismatches: gpu_result.len().abs_diff(cpu_result.len()),
        max_abs_diff: 0,
    };
    for (&gpu, &cpu) in gpu_result.iter().zip(cpu_result) {
        let diff = (i64::from(gpu) - i64::from(cpu)).unsigned_abs();
        if diff > 0 {
            comparison.mismatches += 1;
            comparison.max_abs_diff = comparison.max_abs_diff.max(diff);
        }
    }
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_matrices_multiply_to_scaled_size() {
        let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4);
        let c = a.multiply_cpu(&b).unwrap();
        assert!(c.as_slice().iter().all(|&v| v == 8));

        let (a, b) = initialize_matrices(MatrixType::ThreesAndFours, 3);
        let c = a.multiply_cpu(&b).unwrap();
        assert!(c.as_slice().iter().all(|&v| v == 36));
    }

    #[test]
    fn random_matrices_stay_in_range() {
        let (a, b) = initialize_matrices(MatrixType::Random, 8);
        assert_eq!(a.shape(), (8, 8));
        assert!(a.as_slice().iter().chain(b.as_slice()).all(|v| RANDOM_RANGE.contains(v)));
    }

    #[test]
    fn overflow_wraps_like_device_int() {
        let mut c = [0];
        cpu_matrix_multiply(&[i32::MAX, 1], &[2, 2], &mut c, 1, 2, 1);
        assert_eq!(c[0], i32::MAX.wrapping_mul(2).wrapping_add(2));
    }

    #[test]
    fn comparison_reports_mismatches() {
        assert!(compare_results(&[1, 2, 3], &[1, 2, 3]).is_match());
        let cmp = compare_results(&[1, 5, 3], &[1, 2, -3]);
        assert_eq!(cmp.mismatches, 2);
        assert_eq!(cmp.max_abs_diff, 6);
        assert_eq!(compare_results(&[1], &[1, 2]).mismatches, 1);
    }
}
