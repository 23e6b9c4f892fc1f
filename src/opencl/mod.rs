//! Модуль для работы с OpenCL
//!
//! Содержит низкоуровневые привязки, загружаемые во время выполнения,
//! и реализацию [`crate::device::ComputeBackend`] поверх них.

pub mod backend;
pub mod bindings;
pub mod callbacks;
pub mod types;

pub use backend::OpenClBackend;
