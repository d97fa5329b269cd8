//! Application State Management
//!
//! This module provides the application state that contains the object
//! controller and its dependencies, following the dependency injection pattern.

use std::sync::Arc;

use log::info;

use crate::config::AppConfig;
use crate::metadata::{ContainerInfoSource, StaticContainerInfo};
use crate::service::ObjectController;
use crate::storage::config::{create_backends, Backends};
use crate::storage::mock_store::MockObjectStorage;
use crate::storage::StorageError;

/// Application state shared by every worker
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ObjectController>,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        info!("Initializing application state with configuration");
        let backends = create_backends(&config.storage)?;
        let containers: Arc<dyn ContainerInfoSource> =
            Arc::new(StaticContainerInfo::with_policy(config.storage.default_policy.clone()));

        info!("Application state initialized successfully");
        Ok(Self::with_backends(config, backends, containers))
    }

    /// Assemble the state around already built backends
    pub fn with_backends(config: &AppConfig, backends: Backends, containers: Arc<dyn ContainerInfoSource>) -> Self {
        let controller = Arc::new(ObjectController::new(
            backends.objects,
            backends.chunks,
            containers,
            config.timeouts.clone(),
            config.storage.max_object_size,
        ));
        Self { controller }
    }

    /// Default configuration over the given in-memory backend
    pub fn with_mock(store: Arc<MockObjectStorage>) -> Self {
        let config = AppConfig::default();
        let backends = Backends { objects: store.clone(), chunks: store };
        let containers = Arc::new(StaticContainerInfo::with_policy(config.storage.default_policy.clone()));
        Self::with_backends(&config, backends, containers)
    }

    /// Create application state for testing with a fresh in-memory backend
    pub fn new_for_testing() -> Self {
        Self::with_mock(Arc::new(MockObjectStorage::new()))
    }
}
