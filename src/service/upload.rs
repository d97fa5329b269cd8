//! Streaming of a client body into prepared chunks
//!
//! Metachunks are filled in position order. Every replica of a position
//! receives the same pieces, at most `PIECE_SIZE` bytes at a time, so memory
//! use does not grow with the object size.

use std::collections::BTreeMap;
use std::time::Duration;

use actix_web::error::PayloadError;
use bytes::Bytes;
use futures::future::try_join_all;
use futures::{Stream, StreamExt};
use log::{debug, warn};
use tokio::time::timeout;

use crate::error::GatewayError;
use crate::storage::{ChunkDescriptor, ChunkReceipt, ChunkTransport, ChunkWriter};

pub const PIECE_SIZE: usize = 64 * 1024;

/// What was written, ready to be committed
#[derive(Debug)]
pub struct UploadOutcome {
    pub receipts: Vec<ChunkReceipt>,
    /// MD5 of the whole body, lowercase hex
    pub hash: String,
    pub written: u64,
}

/// Client body with a deadline on every read
pub struct BodyReader<S> {
    body: S,
    pending: Bytes,
    read_timeout: Duration,
}

impl<S> BodyReader<S>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + Unpin,
{
    pub fn new(body: S, read_timeout: Duration) -> Self {
        Self { body, pending: Bytes::new(), read_timeout }
    }

    /// Up to `max` bytes, `None` once the body is over
    pub async fn next_piece(&mut self, max: usize) -> Result<Option<Bytes>, GatewayError> {
        while self.pending.is_empty() {
            match timeout(self.read_timeout, self.body.next()).await {
                Err(_) => return Err(GatewayError::ClientReadTimeout),
                Ok(None) => return Ok(None),
                Ok(Some(Err(e))) => return Err(classify_payload_error(e)),
                Ok(Some(Ok(bytes))) => self.pending = bytes,
            }
        }
        let take = max.min(self.pending.len());
        Ok(Some(self.pending.split_to(take)))
    }
}

/// Map a body read failure to the client-facing error
pub fn classify_payload_error(err: PayloadError) -> GatewayError {
    match err {
        PayloadError::Incomplete(_) => GatewayError::ClientDisconnect(err.to_string()),
        PayloadError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => GatewayError::ClientReadTimeout,
        PayloadError::Io(e) => GatewayError::ClientDisconnect(e.to_string()),
        other => GatewayError::Internal(other.to_string()),
    }
}

struct ReplicaWriter {
    descriptor: ChunkDescriptor,
    writer: Box<dyn ChunkWriter>,
}

async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T, GatewayError>
where
    F: std::future::Future<Output = Result<T, crate::storage::StorageError>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result.map_err(GatewayError::from_transfer),
        Err(_) => Err(GatewayError::TransferTimeout(format!("{} exceeded {:?}", what, deadline))),
    }
}

/// Copy `size` bytes of `body` into `chunks`
pub async fn stream_body<S>(
    transport: &dyn ChunkTransport,
    chunks: &[ChunkDescriptor],
    size: u64,
    body: S,
    client_read_timeout: Duration,
    chunk_write_timeout: Duration,
) -> Result<UploadOutcome, GatewayError>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + Unpin,
{
    let mut positions: BTreeMap<u32, Vec<&ChunkDescriptor>> = BTreeMap::new();
    for chunk in chunks {
        positions.entry(chunk.pos).or_default().push(chunk);
    }
    if positions.is_empty() {
        return Err(GatewayError::Internal("backend prepared no chunks".to_string()));
    }

    let mut reader = BodyReader::new(body, client_read_timeout);
    let mut whole = md5::Context::new();
    let mut written = 0u64;
    let mut receipts = Vec::with_capacity(chunks.len());

    for (pos, replicas) in positions {
        // every byte is in, remaining positions stay unused
        if written == size && !receipts.is_empty() {
            debug!("Body complete before metachunk {}", pos);
            break;
        }

        let mut writers = Vec::with_capacity(replicas.len());
        for descriptor in replicas {
            let writer = with_deadline(chunk_write_timeout, "chunk open", transport.open(descriptor)).await?;
            writers.push(ReplicaWriter { descriptor: descriptor.clone(), writer });
        }

        let capacity = writers.first().map(|w| w.descriptor.size).unwrap_or(0);
        let target = capacity.min(size - written);
        let mut chunk_hash = md5::Context::new();
        let mut chunk_written = 0u64;
        while chunk_written < target {
            let want = (target - chunk_written).min(PIECE_SIZE as u64) as usize;
            let piece = match reader.next_piece(want).await? {
                Some(piece) => piece,
                None => {
                    warn!("Client body ended after {} of {} bytes", written, size);
                    return Err(GatewayError::ClientDisconnect(format!(
                        "body ended after {} of {} bytes",
                        written, size
                    )));
                }
            };

            try_join_all(writers.iter_mut().map(|replica| {
                with_deadline(chunk_write_timeout, "chunk write", replica.writer.write(piece.clone()))
            }))
            .await?;

            whole.consume(&piece);
            chunk_hash.consume(&piece);
            chunk_written += piece.len() as u64;
            written += piece.len() as u64;
        }

        let hash = hex::encode(chunk_hash.compute().0).to_uppercase();
        let hash = &hash;
        let done = try_join_all(writers.into_iter().map(|replica| async move {
            with_deadline(chunk_write_timeout, "chunk close", replica.writer.finish()).await?;
            Ok::<_, GatewayError>(ChunkReceipt {
                url: replica.descriptor.url,
                pos: replica.descriptor.pos,
                size: chunk_written,
                hash: hash.clone(),
            })
        }))
        .await?;
        receipts.extend(done);
        debug!("Metachunk {} written ({} bytes)", pos, chunk_written);
    }

    if written != size {
        return Err(GatewayError::Internal(format!(
            "prepared chunks hold {} bytes, {} announced",
            written, size
        )));
    }

    Ok(UploadOutcome {
        receipts,
        hash: hex::encode(whole.compute().0),
        written,
    })
}
