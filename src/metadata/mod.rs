//! Container Metadata Lookup
//!
//! The upload path asks for the container's storage policy before
//! allocating chunks. The lookup is a trait so it can be
//! replaced by a directory service client or a test double.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// Properties of a container relevant to object writes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Storage policy applied to new contents
    pub storage_policy: Option<String>,
}

/// Source of container properties
#[async_trait]
pub trait ContainerInfoSource: Send + Sync {
    async fn container_info(&self, account: &str, container: &str) -> Result<ContainerInfo, StorageError>;
}

/// Container properties held in memory: one default plus per-container overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticContainerInfo {
    default: ContainerInfo,
    overrides: Arc<RwLock<HashMap<(String, String), ContainerInfo>>>,
}

impl StaticContainerInfo {
    pub fn new(default: ContainerInfo) -> Self {
        Self {
            default,
            overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Every container uses `policy`
    pub fn with_policy(policy: Option<String>) -> Self {
        Self::new(ContainerInfo { storage_policy: policy })
    }

    pub fn set_container(&self, account: &str, container: &str, info: ContainerInfo) {
        let mut overrides = self.overrides.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        overrides.insert((account.to_string(), container.to_string()), info);
    }
}

#[async_trait]
impl ContainerInfoSource for StaticContainerInfo {
    async fn container_info(&self, account: &str, container: &str) -> Result<ContainerInfo, StorageError> {
        let overrides = self.overrides.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let info = overrides
            .get(&(account.to_string(), container.to_string()))
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        debug!("Container {}/{} uses policy {:?}", account, container, info.storage_policy);
        Ok(info)
    }
}
