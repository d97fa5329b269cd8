//! Rewrites object paths so they address the derived container

use actix_web::http::header::HeaderMap;
use log::debug;
use thiserror::Error;

use crate::autocontainer::{should_bypass, ContainerBuilder, HashError};
use crate::config::AutocontainerConfig;

const API_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("path '{0}' does not name an account and an object")]
    InvalidPath(String),
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Outcome of routing a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Leave the request as it is
    Unchanged,
    /// Path (without query string) the request must be sent to
    Rewritten(String),
}

/// Maps `/{account}/{object}` (or a bare object path when a default account
/// is configured) to `/v1/{account}/{container}/{object}`.
#[derive(Debug, Clone)]
pub struct ContainerRouter {
    default_account: Option<String>,
    builder: ContainerBuilder,
}

impl ContainerRouter {
    pub fn new(default_account: Option<String>, builder: ContainerBuilder) -> Self {
        Self { default_account: default_account.filter(|a| !a.is_empty()), builder }
    }

    pub fn from_config(config: &AutocontainerConfig) -> Result<Self, crate::autocontainer::FormatError> {
        Ok(Self::new(config.default_account.clone(), ContainerBuilder::from_config(config)?))
    }

    pub fn builder(&self) -> &ContainerBuilder {
        &self.builder
    }

    /// Compute where a request for `path` has to go.
    pub fn route(&self, path: &str, headers: &HeaderMap, query: &str) -> Result<Routed, RouteError> {
        if should_bypass(headers, query) {
            debug!("Autocontainer bypassed for {}", path);
            return Ok(Routed::Unchanged);
        }

        let (account, object) = match &self.default_account {
            Some(account) => (account.as_str(), path.trim_matches('/')),
            None => split_account_object(path)?,
        };
        if object.is_empty() {
            return Err(RouteError::InvalidPath(path.to_string()));
        }

        let container = self.builder.derive(object)?;
        let rewritten = format!("/{}/{}/{}/{}", API_VERSION, account, container, object);
        debug!("Autocontainer rewrote {} to {}", path, rewritten);
        Ok(Routed::Rewritten(rewritten))
    }
}

/// Split `/{account}/{object...}`. A path already in the
/// `/v1/{account}/{container}/{object...}` form loses its container segment.
fn split_account_object(path: &str) -> Result<(&str, &str), RouteError> {
    let invalid = || RouteError::InvalidPath(path.to_string());
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;

    let (account, object) = match rest.split_once('/') {
        Some((API_VERSION, versioned)) => {
            let mut parts = versioned.splitn(3, '/');
            let account = parts.next().unwrap_or_default();
            let _container = parts.next().ok_or_else(invalid)?;
            let object = parts.next().ok_or_else(invalid)?;
            (account, object)
        }
        Some((account, object)) => (account, object),
        None => return Err(invalid()),
    };

    if account.is_empty() || object.is_empty() {
        return Err(invalid());
    }
    Ok((account, object))
}
