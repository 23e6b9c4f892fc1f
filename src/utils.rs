//! Вспомогательные функции для замеров

use std::time::{Duration, Instant};

/// Измеряет время выполнения функции
pub fn measure_time<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// Во сколько раз `baseline` медленнее `candidate`
pub fn speedup(baseline: Duration, candidate: Duration) -> f64 {
    let candidate = candidate.as_secs_f64();
    if candidate == 0.0 {
        return f64::INFINITY;
    }
    baseline.as_secs_f64() / candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speedup_is_ratio_of_durations() {
        let s = speedup(Duration::from_millis(30), Duration::from_millis(10));
        assert!((s - 3.0).abs() < 1e-9);
    }
}
