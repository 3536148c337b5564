//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod static_sector_adapter;

#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
