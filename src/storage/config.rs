//! Configuration for storage backends

use std::env;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::storage::local_store::LocalObjectStorage;
use crate::storage::mock_store::MockObjectStorage;
use crate::storage::{ChunkTransport, ObjectStorage, StorageError};

/// Environment variable overriding the configured backend
pub const BACKEND_ENV: &str = "STORAGE_BACKEND";

/// Available storage backends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    #[default]
    Local,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "fs" | "file" => Ok(StorageBackend::Local),
            "mock" | "memory" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

impl StorageBackend {
    /// Backend requested through the environment, if any
    pub fn from_env() -> Option<Self> {
        let value = env::var(BACKEND_ENV).ok()?;
        match value.parse::<StorageBackend>() {
            Ok(backend) => {
                info!("Using storage backend from environment: {:?}", backend);
                Some(backend)
            }
            Err(e) => {
                warn!("Invalid storage backend in environment: {}. Keeping configured backend.", e);
                None
            }
        }
    }
}

/// Handles on one backend, seen through both of its interfaces
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStorage>,
    pub chunks: Arc<dyn ChunkTransport>,
}

/// Create the storage backend described by the configuration
pub fn create_backends(config: &StorageConfig) -> Result<Backends, StorageError> {
    match config.backend {
        StorageBackend::Local => {
            info!(
                "Using local storage backend with base_path: {}, temp_path: {}",
                config.base_path, config.temp_path
            );
            let store = Arc::new(LocalObjectStorage::new(config)?);
            Ok(Backends { objects: store.clone(), chunks: store })
        }
        StorageBackend::Mock => {
            info!("Using in-memory storage backend");
            let store = Arc::new(MockObjectStorage::with_layout(config.chunk_size, config.replicas));
            Ok(Backends { objects: store.clone(), chunks: store })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("LOCAL".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("mock".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);
        assert_eq!("Memory".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);

        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_storage_backend_default() {
        assert_eq!(StorageBackend::default(), StorageBackend::Local);
    }

    #[test]
    fn test_create_backends() {
        let dir = tempfile::tempdir().unwrap();
        let local = StorageConfig {
            backend: StorageBackend::Local,
            base_path: dir.path().join("storage").display().to_string(),
            temp_path: dir.path().join("temp").display().to_string(),
            ..StorageConfig::default()
        };
        let mock = StorageConfig { backend: StorageBackend::Mock, ..StorageConfig::default() };

        assert!(create_backends(&local).is_ok());
        assert!(dir.path().join("storage").exists());
        assert!(create_backends(&mock).is_ok());
    }
}
