//! Плотная целочисленная матрица

use super::operations::cpu_matrix_multiply;
use crate::device::DeviceEnvironment;
use crate::error::{MatrixError, Result};
use ndarray::Array2;
use std::fmt;

/// Двумерная матрица `i32`, хранимая по строкам
///
/// Матрица владеет только своими данными. Возможность вычислять на
/// устройстве передаётся в операции явно через [`DeviceEnvironment`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
}

impl Matrix {
    /// Пустая матрица 0x0
    pub fn new() -> Self {
        Self::default()
    }

    /// Матрица заданной формы, заполненная нулями
    ///
    /// # Panics
    ///
    /// Если `rows * cols` не помещается в `usize`; см. [`Matrix::try_zeros`].
    pub fn zeros(rows: usize, cols: usize) -> Self {
        match Self::try_zeros(rows, cols) {
            Ok(matrix) => matrix,
            Err(e) => panic!("{e}"),
        }
    }

    /// Нулевая матрица с проверкой размера
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or(MatrixError::TooLarge(rows.saturating_mul(cols)))?;
        Ok(Self {
            rows,
            cols,
            data: vec![0; len],
        })
    }

    /// Матрица из строк; требуется ровно `rows` строк длины `cols`
    pub fn from_rows(rows: usize, cols: usize, data: &[Vec<i32>]) -> Result<Self> {
        if data.len() != rows {
            return Err(MatrixError::InvalidData {
                rows,
                cols,
                detail: format!("expected {rows} rows, got {}", data.len()),
            });
        }
        if let Some((index, row)) = data.iter().enumerate().find(|(_, row)| row.len() != cols) {
            return Err(MatrixError::InvalidData {
                rows,
                cols,
                detail: format!("row {index} has {} elements", row.len()),
            });
        }
        Ok(Self {
            rows,
            cols,
            data: data.concat(),
        })
    }

    /// Матрица из плоского буфера по строкам длины `rows * cols`
    pub fn from_vec(rows: usize, cols: usize, data: Vec<i32>) -> Result<Self> {
        if Some(data.len()) != rows.checked_mul(cols) {
            return Err(MatrixError::InvalidData {
                rows,
                cols,
                detail: format!("expected {} elements, got {}", rows.saturating_mul(cols), data.len()),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub(crate) fn from_raw(rows: usize, cols: usize, data: Vec<i32>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Количество элементов
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<i32> {
        self.data
    }

    fn check_index(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.rows || col >= self.cols {
            return Err(MatrixError::OutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<i32> {
        let index = self.check_index(row, col)?;
        Ok(self.data[index])
    }

    pub fn set(&mut self, row: usize, col: usize, value: i32) -> Result<()> {
        let index = self.check_index(row, col)?;
        self.data[index] = value;
        Ok(())
    }

    /// Строка `row` как срез
    pub fn row(&self, row: usize) -> Result<&[i32]> {
        if row >= self.rows {
            return Err(MatrixError::OutOfRange {
                row,
                col: 0,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(&self.data[row * self.cols..(row + 1) * self.cols])
    }

    pub fn transpose(&self) -> Matrix {
        let mut result = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                result.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        result
    }

    pub(crate) fn check_multipliable(&self, other: &Matrix) -> Result<()> {
        if self.cols != other.rows {
            return Err(MatrixError::DimensionMismatch {
                lhs_rows: self.rows,
                lhs_cols: self.cols,
                rhs_rows: other.rows,
                rhs_cols: other.cols,
            });
        }
        Ok(())
    }

    /// Умножение тройным циклом на CPU
    pub fn multiply_cpu(&self, other: &Matrix) -> Result<Matrix> {
        self.check_multipliable(other)?;
        let mut result = Matrix::try_zeros(self.rows, other.cols)?;
        cpu_matrix_multiply(&self.data, &other.data, &mut result.data, self.rows, self.cols, other.cols);
        Ok(result)
    }

    /// Умножение на устройстве окружения `env`
    pub fn multiply_offload(&self, other: &Matrix, env: &DeviceEnvironment) -> Result<Matrix> {
        env.dispatcher().multiply(self, other)
    }

    /// Умножение на устройстве, а без устройства на CPU
    ///
    /// Несовпадение размерностей и ошибки запуска не маскируются.
    pub fn multiply_or_fallback(&self, other: &Matrix, env: &DeviceEnvironment) -> Result<Matrix> {
        match self.multiply_offload(other, env) {
            Err(e) if e.is_device_unavailable() => {
                log::warn!("{e}; falling back to CPU multiplication");
                self.multiply_cpu(other)
            }
            result => result,
        }
    }

    pub fn to_array2(&self) -> Array2<i32> {
        Array2::from_shape_fn((self.rows, self.cols), |(i, j)| self.data[i * self.cols + j])
    }

    /// Печатает матрицу в stdout
    pub fn print(&self) {
        print!("{self}");
        if self.rows > 0 {
            println!();
        }
    }
}

impl From<Array2<i32>> for Matrix {
    fn from(array: Array2<i32>) -> Self {
        let (rows, cols) = array.dim();
        Self::from_raw(rows, cols, array.iter().copied().collect())
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.rows {
            if i > 0 {
                writeln!(f)?;
            }
            for j in 0..self.cols {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", self.data[i * self.cols + j])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn example_a() -> Matrix {
        Matrix::from_rows(2, 3, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap()
    }

    fn example_b() -> Matrix {
        Matrix::from_rows(3, 2, &[vec![7, 8], vec![9, 10], vec![11, 12]]).unwrap()
    }

    #[test]
    fn default_is_empty() {
        let m = Matrix::new();
        assert_eq!(m.shape(), (0, 0));
        assert!(m.is_empty());
        assert_eq!(m.to_string(), "");
    }

    #[test]
    fn zeros_has_requested_shape() {
        let m = Matrix::zeros(2, 4);
        assert_eq!(m.len(), 8);
        assert!(m.as_slice().iter().all(|&v| v == 0));
        assert!(Matrix::zeros(0, 5).is_empty());
    }

    #[test]
    fn oversized_zero_matrix_is_rejected() {
        assert!(matches!(
            Matrix::try_zeros(usize::MAX, 2),
            Err(MatrixError::TooLarge(usize::MAX))
        ));
        assert_eq!(Matrix::try_zeros(usize::MAX, 0).unwrap().shape(), (usize::MAX, 0));
    }

    #[test]
    fn empty_product_with_huge_outer_dimensions_is_an_error() {
        let a = Matrix::try_zeros(usize::MAX, 0).unwrap();
        let b = Matrix::try_zeros(0, 2).unwrap();
        assert!(matches!(a.multiply_cpu(&b), Err(MatrixError::TooLarge(_))));
    }

    #[test]
    fn from_rows_validates_shape() {
        assert!(matches!(
            Matrix::from_rows(3, 2, &[vec![1, 2], vec![3, 4]]),
            Err(MatrixError::InvalidData { .. })
        ));
        assert!(matches!(
            Matrix::from_rows(2, 2, &[vec![1, 2], vec![3]]),
            Err(MatrixError::InvalidData { .. })
        ));
        assert!(Matrix::from_vec(2, 2, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn element_access_is_bounds_checked() {
        let mut m = example_a();
        assert_eq!(m.get(1, 2).unwrap(), 6);
        m.set(0, 1, 20).unwrap();
        assert_eq!(m.get(0, 1).unwrap(), 20);
        assert!(matches!(m.get(2, 0), Err(MatrixError::OutOfRange { row: 2, col: 0, .. })));
        assert!(matches!(m.set(0, 3, 1), Err(MatrixError::OutOfRange { .. })));
        assert_eq!(m.row(1).unwrap(), &[4, 5, 6]);
        assert!(m.row(2).is_err());
    }

    #[test]
    fn transpose_swaps_indices() {
        let a = example_a();
        let t = a.transpose();
        assert_eq!(t.shape(), (3, 2));
        for i in 0..2 {
            for j in 0..3 {
                assert_eq!(t.get(j, i).unwrap(), a.get(i, j).unwrap());
            }
        }
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn cpu_multiply_matches_known_product() {
        let c = example_a().multiply_cpu(&example_b()).unwrap();
        assert_eq!(c, Matrix::from_rows(2, 2, &[vec![58, 64], vec![139, 154]]).unwrap());
    }

    #[test]
    fn cpu_multiply_rejects_mismatched_shapes() {
        let a = example_a();
        let b = Matrix::zeros(2, 2);
        assert!(matches!(
            a.multiply_cpu(&b),
            Err(MatrixError::DimensionMismatch { lhs_cols: 3, rhs_rows: 2, .. })
        ));
    }

    #[test]
    fn identity_leaves_matrix_unchanged() {
        let m = Matrix::from_rows(2, 2, &[vec![5, -7], vec![3, 9]]).unwrap();
        let identity = Matrix::from_rows(2, 2, &[vec![1, 0], vec![0, 1]]).unwrap();
        assert_eq!(m.multiply_cpu(&identity).unwrap(), m);
    }

    #[test]
    fn display_separates_columns_and_rows() {
        assert_eq!(example_a().to_string(), "1 2 3\n4 5 6");
    }

    #[test]
    fn ndarray_round_trip() {
        let arr = array![[1, 2, 3], [4, 5, 6]];
        let m = Matrix::from(arr.clone());
        assert_eq!(m, example_a());
        assert_eq!(m.to_array2(), arr);
        // Транспонированный вид ndarray не хранится по строкам
        assert_eq!(Matrix::from(arr.t().to_owned()), example_a().transpose());
    }
}
