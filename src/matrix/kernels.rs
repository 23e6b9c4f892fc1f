//! OpenCL ядра для матричных операций

/// Имя точки входа ядра умножения
pub const MATRIX_MULTIPLY_KERNEL_NAME: &str = "matrix_multiply";

/// Исходный код ядра для матричного умножения
///
/// Один work-item вычисляет одну ячейку результата. Аргументы:
/// `a`, `b`, `c`, `rows_a`, `cols_a`, `cols_b`. Переполнение `int`
/// не проверяется.
pub static MATRIX_MULTIPLY_KERNEL: &str = r#"
__kernel void matrix_multiply(
    __global const int* a,
    __global const int* b,
    __global int* c,
    const int rows_a,
    const int cols_a,
    const int cols_b
) {
    const int row = get_global_id(0);
    const int col = get_global_id(1);

    int sum = 0;
    for (int k = 0; k < cols_a; k++) {
        sum += a[row * cols_a + k] * b[k * cols_b + col];
    }

    c[row * cols_b + col] = sum;
}
"#;

/// Число аргументов ядра умножения
pub const MATRIX_MULTIPLY_ARG_COUNT: usize = 6;
