//! Container derivation from object paths
//!
//! Objects are spread over containers whose names are computed from the object
//! path: a window of the path is flattened, its leading digits are parsed, masked
//! and rendered through a printf-style template. Requests can opt out through
//! the bypass header or query parameter.

pub mod bypass;
pub mod format;
pub mod middleware;
pub mod router;

use thiserror::Error;

use crate::config::AutocontainerConfig;
pub use bypass::should_bypass;
pub use format::{ContainerFormat, FormatError};
pub use router::{ContainerRouter, RouteError, Routed};

/// Error raised when a path cannot be turned into a container name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("no leading digits in '{window}' (from path '{path}')")]
    MalformedPath { path: String, window: String },
}

/// Parse the leading run of decimal digit characters in `radix`, ignoring
/// whatever follows, like libc's `strtoull`.
/// Accumulation wraps modulo 2^64.
pub fn strtoll(value: &str, radix: u32) -> Option<u64> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    let mut parsed = None;
    for c in value.chars() {
        if !c.is_ascii_digit() {
            break;
        }
        let digit = c.to_digit(radix)?;
        let acc: u64 = parsed.unwrap_or(0);
        parsed = Some(acc.wrapping_mul(radix as u64).wrapping_add(digit as u64));
    }
    parsed
}

/// Computes container names from object paths.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    offset: usize,
    size: Option<usize>,
    mask: u64,
    base: u32,
    format: ContainerFormat,
}

impl ContainerBuilder {
    pub fn new(offset: usize, size: Option<usize>, mask: u64, base: u32, format: ContainerFormat) -> Self {
        Self {
            offset,
            // a zero size means "up to the end of the path"
            size: size.filter(|s| *s > 0),
            mask,
            base,
            format,
        }
    }

    pub fn from_config(config: &AutocontainerConfig) -> Result<Self, FormatError> {
        let format = config.format.parse::<ContainerFormat>()?;
        Ok(Self::new(config.offset, config.size, config.mask, config.base, format))
    }

    /// Derive the container name for `path`.
    pub fn derive(&self, path: &str) -> Result<String, HashError> {
        let bytes = path.as_bytes();
        let start = self.offset.min(bytes.len());
        let end = match self.size {
            Some(size) => start.saturating_add(size).min(bytes.len()),
            None => bytes.len(),
        };
        let flat: String = String::from_utf8_lossy(&bytes[start..end])
            .chars()
            .filter(|c| *c != '/')
            .collect();

        let value = strtoll(&flat, self.base).ok_or_else(|| HashError::MalformedPath {
            path: path.to_string(),
            window: flat.clone(),
        })?;
        Ok(self.format.render(value & self.mask))
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new(0, None, 0xFFFF_FFFF_FF00_00FF, 16, ContainerFormat::default())
    }
}
