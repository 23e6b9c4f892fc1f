//! Тестирование производительности умножения матриц на GPU

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use opencl_matrix::{
    matrix::{compare_results, initialize_matrices, MatrixType},
    utils::{measure_time, speedup},
    DeviceConfig, DeviceEnvironment, DeviceType,
};
use prettytable::{row, Table};
use std::time::Duration;

const MATRIX_SIZE: usize = 512;
const NUM_ITERATIONS: u64 = 10;
const WORK_GROUP_SIZE: usize = 16;

fn progress_bar(len: u64, label: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}")
            .context("Неверный шаблон прогресса")?
            .progress_chars("#>-"),
    );
    pb.set_message(label.to_string());
    Ok(pb)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Выбор типа матриц
    let matrix_type = MatrixType::Random;

    println!("Начало выполнения программы умножения матриц на GPU");
    println!("Размер матриц: {}x{}", MATRIX_SIZE, MATRIX_SIZE);
    println!("Размер рабочей группы: {}x{}", WORK_GROUP_SIZE, WORK_GROUP_SIZE);
    println!("\nИнициализация OpenCL...");

    let config = DeviceConfig::default()
        .with_device_type(DeviceType::All)
        .with_local_work_size(Some([WORK_GROUP_SIZE, WORK_GROUP_SIZE]));
    let env = DeviceEnvironment::open_cl(config).context("Ошибка инициализации OpenCL")?;
    let Some(info) = env.info() else {
        bail!("Устройство OpenCL недоступно: {:?}", env.state());
    };
    println!("Устройство: {info}");

    println!("\nПодготовка данных для умножения матриц...");
    let (a, b) = initialize_matrices(matrix_type, MATRIX_SIZE);

    println!("\nЗапуск вычислений на GPU...");
    let pb = progress_bar(NUM_ITERATIONS, "GPU")?;
    let mut gpu_total = Duration::ZERO;
    let mut gpu_result = None;
    for _ in 0..NUM_ITERATIONS {
        let (result, elapsed) = measure_time(|| a.multiply_offload(&b, &env));
        gpu_result = Some(result.context("Ошибка умножения на устройстве")?);
        gpu_total += elapsed;
        pb.inc(1);
    }
    pb.finish_with_message("GPU завершено");

    println!("\nЗапуск вычислений на CPU...");
    let pb = progress_bar(NUM_ITERATIONS, "CPU")?;
    let mut cpu_total = Duration::ZERO;
    let mut cpu_result = None;
    for _ in 0..NUM_ITERATIONS {
        let (result, elapsed) = measure_time(|| a.multiply_cpu(&b));
        cpu_result = Some(result.context("Ошибка умножения на CPU")?);
        cpu_total += elapsed;
        pb.inc(1);
    }
    pb.finish_with_message("CPU завершено");

    let (Some(gpu_result), Some(cpu_result)) = (gpu_result, cpu_result) else {
        bail!("Нет результатов для сравнения");
    };
    let comparison = compare_results(gpu_result.as_slice(), cpu_result.as_slice());

    let gpu_avg = gpu_total / NUM_ITERATIONS as u32;
    let cpu_avg = cpu_total / NUM_ITERATIONS as u32;
    let ratio = speedup(cpu_avg, gpu_avg);

    let mut table = Table::new();
    table.add_row(row!["Метрика", "Значение"]);
    table.add_row(row!["Среднее время GPU", format!("{:?}", gpu_avg)]);
    table.add_row(row!["Среднее время CPU", format!("{:?}", cpu_avg)]);
    table.add_row(row!["GPU быстрее CPU в", format!("{:.2} раз", ratio)]);
    table.add_row(row!["Различающихся элементов", comparison.mismatches]);
    table.add_row(row!["Максимальная разница", comparison.max_abs_diff]);

    println!("\nИтоговая статистика:");
    table.printstd();
    println!(
        "Результаты GPU и CPU {}",
        if comparison.is_match() { "совпадают" } else { "различаются" }
    );

    Ok(())
}
