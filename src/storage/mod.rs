//! Storage Backend Abstraction
//!
//! This module describes the chunk-based object storage the gateway talks
//! to. Objects are written in two steps: the backend first prepares the
//! content (allocating chunk endpoints), then the gateway streams data to those
//! chunks and commits the result. Backends own their connection handling and
//! thread safety; the gateway only shares them behind `Arc`.

pub mod config;
pub mod local_store;
pub mod mock_store;


use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds reported by storage backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("no such object: {0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("etag mismatch: {0}")]
    EtagMismatch(String),
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            std::io::ErrorKind::TimedOut => StorageError::Timeout(e.to_string()),
            _ => StorageError::Io(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Internal(format!("corrupted object index: {}", e))
    }
}

/// Single-pass, finite stream of object data
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Metadata of a stored object, as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Content identifier
    pub id: String,
    /// MD5 of the object data, lowercase hex
    pub hash: String,
    pub mime_type: String,
    pub length: u64,
    /// Creation time, seconds since the epoch
    pub ctime: i64,
    pub version: i64,
    pub deleted: bool,
    pub policy: Option<String>,
    pub chunk_size: u64,
    /// User metadata (`X-Object-Meta-*` without the prefix)
    pub properties: HashMap<String, String>,
}

/// Where a piece of the object must be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub url: String,
    /// Metachunk position; replicas share a position
    pub pos: u32,
    /// Capacity of the chunk in bytes
    pub size: u64,
}

/// A chunk as actually written, reported back on commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub url: String,
    pub pos: u32,
    pub size: u64,
    pub hash: String,
}

/// What the gateway asks the backend to prepare
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentRequest {
    pub size: u64,
    pub mime_type: String,
    pub policy: Option<String>,
}

/// Final step of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCommit {
    pub metadata: ObjectMetadata,
    pub chunks: Vec<ChunkReceipt>,
    /// Refuse the commit when the object already exists
    pub if_none_match: bool,
}

/// Byte range requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`, inclusive
    Bounded(u64, u64),
    /// `bytes=start-`
    From(u64),
    /// `bytes=-n`, the last n bytes
    Suffix(u64),
}

impl ByteRange {
    /// Resolve against an object length into an inclusive `(first, last)` pair.
    pub fn resolve(&self, length: u64) -> Result<(u64, u64), StorageError> {
        let unsatisfiable = || StorageError::RangeNotSatisfiable(format!("{:?} of {} bytes", self, length));
        if length == 0 {
            return Err(unsatisfiable());
        }
        match *self {
            ByteRange::Bounded(start, end) if start <= end && start < length => Ok((start, end.min(length - 1))),
            ByteRange::From(start) if start < length => Ok((start, length - 1)),
            ByteRange::Suffix(n) if n > 0 => Ok((length.saturating_sub(n), length - 1)),
            _ => Err(unsatisfiable()),
        }
    }
}

/// Object data returned by a fetch
pub struct FetchedObject {
    pub metadata: ObjectMetadata,
    /// Inclusive byte range actually served, when a range was requested
    pub range: Option<(u64, u64)>,
    pub body: ByteStream,
}

/// Object-level operations of the storage backend
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Metadata of an object
    async fn object_show(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<ObjectMetadata, StorageError>;

    /// Metadata and data of an object
    async fn object_fetch(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
        range: Option<ByteRange>,
    ) -> Result<FetchedObject, StorageError>;

    async fn object_delete(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Allocate chunks for a new content
    async fn content_prepare(
        &self,
        account: &str,
        container: &str,
        object: &str,
        request: &ContentRequest,
    ) -> Result<(ObjectMetadata, Vec<ChunkDescriptor>), StorageError>;

    /// Make a fully written content visible
    async fn content_create(
        &self,
        account: &str,
        container: &str,
        object: &str,
        commit: &ContentCommit,
    ) -> Result<ObjectMetadata, StorageError>;

    /// Release the chunks of a content that will never be committed. Chunks
    /// that were never written are skipped.
    async fn content_abort(
        &self,
        account: &str,
        container: &str,
        object: &str,
        chunks: &[ChunkDescriptor],
    ) -> Result<(), StorageError>;
}

/// Sink for the data of one chunk
#[async_trait]
pub trait ChunkWriter: Send {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError>;

    /// Flush and close the chunk
    async fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

/// Opens writers on chunk endpoints
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn open(&self, chunk: &ChunkDescriptor) -> Result<Box<dyn ChunkWriter>, StorageError>;
}
