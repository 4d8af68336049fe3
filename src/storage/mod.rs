//! Storage location resolver
//!
//! Owns the single persisted storage-root configuration:
//! - read-through resolution for every write and serve
//! - lazy creation of the default configuration
//! - admin-only reconfiguration with directory creation and a write check

mod resolver;
mod settings;

pub use resolver::StorageResolver;
pub use settings::{normalize_path, StorageDefaults, StorageSettings, StorageUpdate};
