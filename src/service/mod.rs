//! Object request pipeline
//!
//! `ObjectController` validates requests, drives the storage backend and maps
//! its outcome to HTTP responses. It keeps no per-request state: every call
//! gets its own target, headers and body.

pub mod headers;
pub mod target;
pub mod upload;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actix_web::error::PayloadError;
use actix_web::http::header::{self, HeaderMap};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};

use crate::config::TimeoutConfig;
use crate::error::GatewayError;
use crate::metadata::ContainerInfoSource;
use crate::storage::{
    ByteRange, ByteStream, ChunkDescriptor, ChunkTransport, ContentCommit, ContentRequest, ObjectStorage, StorageError,
};

pub use target::ObjectTarget;

/// Handles object requests against one storage backend
pub struct ObjectController {
    objects: Arc<dyn ObjectStorage>,
    chunks: Arc<dyn ChunkTransport>,
    containers: Arc<dyn ContainerInfoSource>,
    timeouts: TimeoutConfig,
    max_object_size: u64,
}

impl ObjectController {
    pub fn new(
        objects: Arc<dyn ObjectStorage>,
        chunks: Arc<dyn ChunkTransport>,
        containers: Arc<dyn ContainerInfoSource>,
        timeouts: TimeoutConfig,
        max_object_size: u64,
    ) -> Self {
        Self {
            objects,
            chunks,
            containers,
            timeouts,
            max_object_size,
        }
    }

    fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.backend_ms)
    }

    /// Run a backend call under the backend deadline
    async fn backend<T, F>(&self, operation: &str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.backend_timeout(), call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} did not answer within {:?}", operation, self.backend_timeout());
                Err(StorageError::Timeout(format!("{} exceeded {:?}", operation, self.backend_timeout())))
            }
        }
    }

    /// Release the chunks of an upload that will not be committed
    async fn abort(&self, target: &ObjectTarget, chunks: &[ChunkDescriptor]) {
        let aborted = self
            .backend(
                "content_abort",
                self.objects
                    .content_abort(&target.account, &target.container, &target.object, chunks),
            )
            .await;
        match aborted {
            Ok(()) => debug!("Released {} chunks of {}", chunks.len(), target),
            Err(e) => warn!("Could not release chunks of {}: {}", target, e),
        }
    }

    /// Delete an object. Deleting a missing object succeeds.
    pub async fn delete(&self, target: &ObjectTarget) -> Result<HttpResponse, GatewayError> {
        target.log_context();
        let deleted = self
            .backend(
                "object_delete",
                self.objects
                    .object_delete(&target.account, &target.container, &target.object, target.version()),
            )
            .await;

        match deleted {
            Ok(()) => info!("Deleted {}", target),
            Err(StorageError::NotFound(_)) => debug!("Delete of missing object {}", target),
            Err(e) => {
                error!("Failed to delete {}: {}", target, e);
                return Err(e.into());
            }
        }
        Ok(HttpResponse::NoContent().finish())
    }

    /// Object metadata as headers, without a body
    pub async fn head(&self, target: &ObjectTarget) -> Result<HttpResponse, GatewayError> {
        target.log_context();
        let metadata = self
            .backend(
                "object_show",
                self.objects
                    .object_show(&target.account, &target.container, &target.object, target.version()),
            )
            .await
            .map_err(|e| log_failure("HEAD", target, e))?;
        if metadata.deleted {
            return Err(GatewayError::NotFound);
        }

        let mut builder = HttpResponse::Ok();
        headers::apply_metadata(&mut builder, &metadata);
        Ok(builder
            .no_chunking(metadata.length)
            .streaming(futures::stream::empty::<Result<Bytes, StorageError>>()))
    }

    /// Stream an object, or the requested part of it
    pub async fn get(&self, target: &ObjectTarget, range: Option<ByteRange>) -> Result<HttpResponse, GatewayError> {
        target.log_context();
        let fetched = self
            .backend(
                "object_fetch",
                self.objects
                    .object_fetch(&target.account, &target.container, &target.object, target.version(), range),
            )
            .await
            .map_err(|e| log_failure("GET", target, e))?;
        if fetched.metadata.deleted {
            return Err(GatewayError::NotFound);
        }

        let length = fetched.metadata.length;
        let mut builder = match fetched.range {
            Some(_) => HttpResponse::build(StatusCode::PARTIAL_CONTENT),
            None => HttpResponse::Ok(),
        };
        headers::apply_metadata(&mut builder, &fetched.metadata);
        let served = match fetched.range {
            Some((first, last)) => {
                builder.insert_header((header::CONTENT_RANGE, format!("bytes {}-{}/{}", first, last, length)));
                last - first + 1
            }
            None => length,
        };
        debug!("Serving {} bytes of {}", served, target);

        let body = with_read_deadline(fetched.body, self.backend_timeout(), target.to_string());
        Ok(builder.no_chunking(served).streaming(body))
    }

    /// Store a new object from the request body
    pub async fn put<S>(&self, target: &ObjectTarget, request: &HeaderMap, body: S) -> Result<HttpResponse, GatewayError>
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + Unpin,
    {
        target.log_context();
        let size = headers::content_length(request)?;
        if size > self.max_object_size {
            return Err(GatewayError::TooLarge { size, limit: self.max_object_size });
        }
        let if_none_match = headers::if_none_match(request)?;
        let expected_etag = headers::expected_etag(request);
        let properties = headers::object_properties(request);

        let info = self
            .backend("container_info", self.containers.container_info(&target.account, &target.container))
            .await
            .map_err(GatewayError::from_upload)?;
        let content = ContentRequest {
            size,
            mime_type: headers::content_type(request),
            policy: info.storage_policy,
        };
        let (mut metadata, chunks) = self
            .backend(
                "content_prepare",
                self.objects
                    .content_prepare(&target.account, &target.container, &target.object, &content),
            )
            .await
            .map_err(|e| {
                error!("Failed to prepare {}: {}", target, e);
                GatewayError::from_upload(e)
            })?;
        debug!("Prepared {} chunks for {} ({} bytes)", chunks.len(), target, size);

        let outcome = match upload::stream_body(
            self.chunks.as_ref(),
            &chunks,
            size,
            body,
            Duration::from_millis(self.timeouts.client_read_ms),
            Duration::from_millis(self.timeouts.chunk_write_ms),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Upload of {} failed: {}", target, e);
                self.abort(target, &chunks).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected_etag {
            if expected != outcome.hash {
                warn!("Etag mismatch on {}: client sent {}, body hashes to {}", target, expected, outcome.hash);
                self.abort(target, &chunks).await;
                return Err(GatewayError::EtagMismatch { expected, computed: outcome.hash });
            }
        }

        metadata.hash = outcome.hash;
        metadata.length = outcome.written;
        metadata.properties = properties;
        let commit = ContentCommit { metadata, chunks: outcome.receipts, if_none_match };
        let created = match self
            .backend(
                "content_create",
                self.objects
                    .content_create(&target.account, &target.container, &target.object, &commit),
            )
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!("Failed to commit {}: {}", target, e);
                // a timed out commit may still land
                if !matches!(e, StorageError::Timeout(_)) {
                    self.abort(target, &chunks).await;
                }
                return Err(GatewayError::from_upload(e));
            }
        };

        info!("Created {} ({} bytes, etag {})", target, created.length, created.hash);
        Ok(HttpResponse::Created()
            .insert_header((header::ETAG, headers::quoted_etag(&created.hash)))
            .insert_header((header::LAST_MODIFIED, headers::http_date(created.ctime)))
            .insert_header((headers::OBJECT_VERSION, created.version.to_string()))
            .finish())
    }
}

fn log_failure(method: &str, target: &ObjectTarget, err: StorageError) -> GatewayError {
    match &err {
        StorageError::NotFound(_) => debug!("{} {}: not found", method, target),
        StorageError::RangeNotSatisfiable(_) => debug!("{} {}: {}", method, target, err),
        _ => error!("{} {} failed: {}", method, target, err),
    }
    err.into()
}

/// Fail the body stream when the backend stalls. Headers are already sent by
/// then, so the error aborts the connection.
fn with_read_deadline(body: ByteStream, deadline: Duration, name: String) -> ByteStream {
    Box::pin(futures::stream::unfold(Some(body), move |state| {
        let name = name.clone();
        async move {
            let mut body = state?;
            match tokio::time::timeout(deadline, body.next()).await {
                Ok(Some(Ok(piece))) => Some((Ok(piece), Some(body))),
                Ok(Some(Err(e))) => {
                    error!("Reading {} failed mid-stream: {}", name, e);
                    Some((Err(e), None))
                }
                Ok(None) => None,
                Err(_) => {
                    error!("Reading {} stalled for {:?}", name, deadline);
                    Some((Err(StorageError::Timeout(format!("read of {} stalled", name))), None))
                }
            }
        }
    }))
}
