//! Настройки инициализации устройства и запуска ядра

use crate::opencl::types::{
    cl_device_type, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};

/// Тип устройства, среди которых выбирается первое доступное
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    All,
    Gpu,
    Cpu,
    Accelerator,
}

impl DeviceType {
    pub fn as_cl(self) -> cl_device_type {
        match self {
            DeviceType::All => CL_DEVICE_TYPE_ALL,
            DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        }
    }
}

/// Размер рабочей группы по умолчанию: один work-item на группу
pub const DEFAULT_LOCAL_WORK_SIZE: [usize; 2] = [1, 1];

/// Конфигурация окружения устройства
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Какие устройства рассматривать при выборе
    pub device_type: DeviceType,
    /// Локальный размер рабочей группы; `None` оставляет выбор драйверу
    pub local_work_size: Option<[usize; 2]>,
    /// Выводить каждую ячейку результата в лог на уровне debug
    pub echo_results: bool,
    /// Опции компилятора OpenCL
    pub build_options: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::All,
            local_work_size: Some(DEFAULT_LOCAL_WORK_SIZE),
            echo_results: false,
            build_options: None,
        }
    }
}

impl DeviceConfig {
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_local_work_size(mut self, local_work_size: Option<[usize; 2]>) -> Self {
        self.local_work_size = local_work_size;
        self
    }

    pub fn with_echo_results(mut self, echo_results: bool) -> Self {
        self.echo_results = echo_results;
        self
    }

    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = Some(options.into());
        self
    }

    /// Локальный размер для сетки `global`, если он её делит и влезает в группу
    pub fn local_size_for(&self, global: [usize; 2], max_work_group_size: usize) -> Option<[usize; 2]> {
        let [lx, ly] = self.local_work_size?;
        if lx == 0 || ly == 0 {
            return None;
        }
        if global[0] % lx != 0 || global[1] % ly != 0 {
            log::debug!("local size {lx}x{ly} does not divide grid {}x{}, letting the runtime choose", global[0], global[1]);
            return None;
        }
        if max_work_group_size > 0 && lx * ly > max_work_group_size {
            log::debug!("local size {lx}x{ly} exceeds device limit {max_work_group_size}, letting the runtime choose");
            return None;
        }
        Some([lx, ly])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_unit_work_groups() {
        let config = DeviceConfig::default();
        assert_eq!(config.device_type, DeviceType::All);
        assert_eq!(config.local_size_for([2, 3], 256), Some([1, 1]));
        assert!(!config.echo_results);
    }

    #[test]
    fn non_dividing_local_size_is_dropped() {
        let config = DeviceConfig::default().with_local_work_size(Some([4, 4]));
        assert_eq!(config.local_size_for([8, 6], 256), None);
        assert_eq!(config.local_size_for([8, 8], 256), Some([4, 4]));
        assert_eq!(config.local_size_for([8, 8], 8), None);
    }

    #[test]
    fn device_type_maps_to_cl_constants() {
        assert_eq!(DeviceType::Gpu.as_cl(), CL_DEVICE_TYPE_GPU);
        assert_eq!(DeviceType::All.as_cl(), CL_DEVICE_TYPE_ALL);
    }
}
