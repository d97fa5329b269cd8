//! The object a request operates on

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully qualified object name, plus the version the client asked for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectTarget {
    pub account: String,
    pub container: String,
    pub object: String,
    /// Content version, latest when unset
    pub version: Option<String>,
}

impl ObjectTarget {
    pub fn new(account: impl Into<String>, container: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            object: object.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Tag the log records of the current request with this object
    pub fn log_context(&self) {
        log_mdc::insert("account", &self.account);
        log_mdc::insert("container", &self.container);
        log_mdc::insert("object", &self.object);
    }
}

impl fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.container, self.object)?;
        if let Some(version) = &self.version {
            write!(f, "@{}", version)?;
        }
        Ok(())
    }
}
