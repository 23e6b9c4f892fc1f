//! Пример использования библиотеки

use anyhow::{Context, Result};
use opencl_matrix::{DeviceConfig, DeviceEnvironment, Matrix};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Пример матриц
    let matrix_a = Matrix::from_rows(2, 3, &[vec![1, 2, 3], vec![4, 5, 6]])?;
    let matrix_b = Matrix::from_rows(3, 2, &[vec![7, 8], vec![9, 10], vec![11, 12]])?;

    println!("Матрица A:");
    matrix_a.print();
    println!("Матрица B:");
    matrix_b.print();

    let result_cpu = matrix_a.multiply_cpu(&matrix_b).context("Ошибка умножения на CPU")?;
    println!("Результат (CPU):");
    result_cpu.print();

    // Окружение устройства создаётся один раз и используется всеми умножениями
    let env = DeviceEnvironment::open_cl(DeviceConfig::default()).context("Ошибка инициализации OpenCL")?;
    match env.info() {
        Some(info) => println!("Устройство: {info}"),
        None => println!("Устройство OpenCL недоступно: {:?}", env.state()),
    }

    match matrix_a.multiply_offload(&matrix_b, &env) {
        Ok(result) => {
            println!("Результат (OpenCL):");
            result.print();
            println!(
                "Результаты GPU и CPU {}",
                if result == result_cpu { "совпадают" } else { "различаются" }
            );
        }
        Err(e) if e.is_device_unavailable() => {
            println!("Результат (OpenCL): недоступен ({e}), используется CPU");
            matrix_a.multiply_or_fallback(&matrix_b, &env)?.print();
        }
        Err(e) => return Err(e).context("Ошибка умножения на устройстве"),
    }

    println!("Транспонированная A:");
    matrix_a.transpose().print();

    Ok(())
}
