//! Типы матриц и связанные структуры

/// Тип матриц для вычислений
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixType {
    /// Матрицы заполненные 1 и 2
    OnesAndTwos,
    /// Матрицы заполненные 3 и 4
    ThreesAndFours,
    /// Случайно заполненные матрицы
    Random,
}

/// Итог поэлементного сравнения двух результатов
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Comparison {
    /// Количество различающихся элементов
    pub mismatches: usize,
    /// Максимальная разница по модулю
    pub max_abs_diff: u64,
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        self.mismatches == 0
    }
}
