//! In-memory implementation of the storage backend
//!
//! Used by the tests and by the `Mock` backend setting. Every operation is
//! counted, and failures can be injected per operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use log::{debug, info};

use crate::storage::{
    ByteRange, ChunkDescriptor, ChunkTransport, ChunkWriter, ContentCommit, ContentRequest, FetchedObject,
    ObjectMetadata, ObjectStorage, StorageError,
};

const STREAM_PIECE: usize = 64 * 1024;

type ObjectKey = (String, String, String);

fn key(account: &str, container: &str, object: &str) -> ObjectKey {
    (account.to_string(), container.to_string(), object.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct StoredObject {
    metadata: ObjectMetadata,
    data: Bytes,
}

#[derive(Debug, Default)]
struct Faults {
    show: Option<StorageError>,
    delete: Option<StorageError>,
    prepare: Option<StorageError>,
    commit: Option<StorageError>,
    chunk_write: Option<StorageError>,
    chunk_write_delay: Option<Duration>,
    fetch_body: Option<StorageError>,
}

/// In-memory storage backend
pub struct MockObjectStorage {
    objects: Arc<Mutex<HashMap<ObjectKey, StoredObject>>>,
    chunks: Arc<Mutex<HashMap<String, Bytes>>>,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
    faults: Arc<Mutex<Faults>>,
    chunk_size: u64,
    replicas: u32,
    next_id: AtomicU64,
}

impl MockObjectStorage {
    pub fn new() -> Self {
        Self::with_layout(1024 * 1024, 1)
    }

    /// Backend splitting contents in `chunk_size` metachunks of `replicas` copies
    pub fn with_layout(chunk_size: u64, replicas: u32) -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            chunks: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(Faults::default())),
            chunk_size: chunk_size.max(1),
            replicas: replicas.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of times `operation` was invoked
    pub fn calls(&self, operation: &str) -> usize {
        lock(&self.calls).get(operation).copied().unwrap_or(0)
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Data of a stored object
    pub fn object_data(&self, account: &str, container: &str, object: &str) -> Option<Bytes> {
        lock(&self.objects).get(&key(account, container, object)).map(|o| o.data.clone())
    }

    /// Chunks written but not yet committed
    pub fn pending_chunks(&self) -> usize {
        lock(&self.chunks).len()
    }

    /// Store an object directly, bypassing the upload path
    pub fn insert_object(&self, account: &str, container: &str, object: &str, data: &[u8], mime_type: &str) {
        let now = Utc::now();
        let metadata = ObjectMetadata {
            id: self.new_id(),
            hash: hex::encode(md5::compute(data).0),
            mime_type: mime_type.to_string(),
            length: data.len() as u64,
            ctime: now.timestamp(),
            version: now.timestamp_micros(),
            deleted: false,
            policy: None,
            chunk_size: self.chunk_size,
            properties: HashMap::new(),
        };
        let stored = StoredObject { metadata, data: Bytes::copy_from_slice(data) };
        lock(&self.objects).insert(key(account, container, object), stored);
    }

    pub fn fail_show(&self, err: StorageError) {
        lock(&self.faults).show = Some(err);
    }

    pub fn fail_delete(&self, err: StorageError) {
        lock(&self.faults).delete = Some(err);
    }

    pub fn fail_prepare(&self, err: StorageError) {
        lock(&self.faults).prepare = Some(err);
    }

    pub fn fail_commit(&self, err: StorageError) {
        lock(&self.faults).commit = Some(err);
    }

    pub fn fail_chunk_writes(&self, err: StorageError) {
        lock(&self.faults).chunk_write = Some(err);
    }

    pub fn delay_chunk_writes(&self, delay: Duration) {
        lock(&self.faults).chunk_write_delay = Some(delay);
    }

    /// Make fetched bodies break after their first piece
    pub fn fail_fetch_body(&self, err: StorageError) {
        lock(&self.faults).fetch_body = Some(err);
    }

    /// Clear all data, counters and injected faults
    pub fn clear(&self) {
        lock(&self.objects).clear();
        lock(&self.chunks).clear();
        lock(&self.calls).clear();
        *lock(&self.faults) = Faults::default();
    }

    fn count(&self, operation: &'static str) {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;
    }

    fn new_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{:032X}", id)
    }

    fn lookup(&self, account: &str, container: &str, object: &str, version: Option<&str>) -> Result<StoredObject, StorageError> {
        let objects = lock(&self.objects);
        let stored = objects
            .get(&key(account, container, object))
            .filter(|o| !o.metadata.deleted)
            .filter(|o| version.map_or(true, |v| v == o.metadata.version.to_string()))
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}/{}", account, container, object)))?;
        Ok(stored.clone())
    }
}

impl Default for MockObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    async fn object_show(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<ObjectMetadata, StorageError> {
        self.count("object_show");
        if let Some(err) = lock(&self.faults).show.clone() {
            return Err(err);
        }
        Ok(self.lookup(account, container, object, version)?.metadata)
    }

    async fn object_fetch(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
        range: Option<ByteRange>,
    ) -> Result<FetchedObject, StorageError> {
        self.count("object_fetch");
        let stored = self.lookup(account, container, object, version)?;
        let length = stored.metadata.length;

        let (data, served) = match range {
            Some(range) => {
                let (first, last) = range.resolve(length)?;
                (stored.data.slice(first as usize..=last as usize), Some((first, last)))
            }
            None => (stored.data.clone(), None),
        };

        let mut pieces: Vec<Result<Bytes, StorageError>> = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + STREAM_PIECE).min(data.len());
            pieces.push(Ok(data.slice(offset..end)));
            offset = end;
        }
        if let Some(err) = lock(&self.faults).fetch_body.clone() {
            pieces.truncate(1);
            pieces.push(Err(err));
        }

        Ok(FetchedObject {
            metadata: stored.metadata,
            range: served,
            body: Box::pin(futures::stream::iter(pieces)),
        })
    }

    async fn object_delete(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<(), StorageError> {
        self.count("object_delete");
        if let Some(err) = lock(&self.faults).delete.clone() {
            return Err(err);
        }
        self.lookup(account, container, object, version)?;
        lock(&self.objects).remove(&key(account, container, object));
        info!("Mock: deleted {}/{}/{}", account, container, object);
        Ok(())
    }

    async fn content_prepare(
        &self,
        account: &str,
        container: &str,
        object: &str,
        request: &ContentRequest,
    ) -> Result<(ObjectMetadata, Vec<ChunkDescriptor>), StorageError> {
        self.count("content_prepare");
        if let Some(err) = lock(&self.faults).prepare.clone() {
            return Err(err);
        }

        let id = self.new_id();
        let positions = request.size.div_ceil(self.chunk_size).max(1);
        let mut chunks = Vec::new();
        for pos in 0..positions {
            let size = request.size.saturating_sub(pos * self.chunk_size).min(self.chunk_size);
            for replica in 0..self.replicas {
                chunks.push(ChunkDescriptor {
                    url: format!("mock://chunks/{}/{}.{}", id, pos, replica),
                    pos: pos as u32,
                    size,
                });
            }
        }

        let now = Utc::now();
        let metadata = ObjectMetadata {
            id,
            mime_type: request.mime_type.clone(),
            length: request.size,
            ctime: now.timestamp(),
            version: now.timestamp_micros(),
            policy: Some(request.policy.clone().unwrap_or_else(|| "SINGLE".to_string())),
            chunk_size: self.chunk_size,
            ..ObjectMetadata::default()
        };
        debug!(
            "Mock: prepared {} chunks for {}/{}/{} ({} bytes)",
            chunks.len(),
            account,
            container,
            object,
            request.size
        );
        Ok((metadata, chunks))
    }

    async fn content_create(
        &self,
        account: &str,
        container: &str,
        object: &str,
        commit: &ContentCommit,
    ) -> Result<ObjectMetadata, StorageError> {
        self.count("content_create");
        if let Some(err) = lock(&self.faults).commit.clone() {
            return Err(err);
        }

        let object_key = key(account, container, object);
        if commit.if_none_match && lock(&self.objects).contains_key(&object_key) {
            return Err(StorageError::PreconditionFailed(format!("{}/{}/{} exists", account, container, object)));
        }

        let mut receipts = commit.chunks.clone();
        receipts.sort_by_key(|r| r.pos);
        receipts.dedup_by_key(|r| r.pos);

        let mut data = BytesMut::with_capacity(commit.metadata.length as usize);
        {
            let mut chunks = lock(&self.chunks);
            for receipt in &receipts {
                let chunk = chunks
                    .get(&receipt.url)
                    .ok_or_else(|| StorageError::Internal(format!("chunk {} was never written", receipt.url)))?;
                data.extend_from_slice(chunk);
            }
            for receipt in &commit.chunks {
                chunks.remove(&receipt.url);
            }
        }

        let hash = hex::encode(md5::compute(&data).0);
        if hash != commit.metadata.hash {
            return Err(StorageError::EtagMismatch(format!("declared {}, stored {}", commit.metadata.hash, hash)));
        }

        let metadata = commit.metadata.clone();
        lock(&self.objects).insert(object_key, StoredObject { metadata: metadata.clone(), data: data.freeze() });
        info!("Mock: created {}/{}/{} ({} bytes)", account, container, object, metadata.length);
        Ok(metadata)
    }

    async fn content_abort(
        &self,
        account: &str,
        container: &str,
        object: &str,
        chunks: &[ChunkDescriptor],
    ) -> Result<(), StorageError> {
        self.count("content_abort");
        let mut pending = lock(&self.chunks);
        let released = chunks.iter().filter(|c| pending.remove(&c.url).is_some()).count();
        debug!("Mock: released {} chunks of {}/{}/{}", released, account, container, object);
        Ok(())
    }
}

#[async_trait]
impl ChunkTransport for MockObjectStorage {
    async fn open(&self, chunk: &ChunkDescriptor) -> Result<Box<dyn ChunkWriter>, StorageError> {
        self.count("chunk_open");
        Ok(Box::new(MockChunkWriter {
            url: chunk.url.clone(),
            buffer: BytesMut::new(),
            chunks: Arc::clone(&self.chunks),
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct MockChunkWriter {
    url: String,
    buffer: BytesMut,
    chunks: Arc<Mutex<HashMap<String, Bytes>>>,
    faults: Arc<Mutex<Faults>>,
}

#[async_trait]
impl ChunkWriter for MockChunkWriter {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        let (delay, failure) = {
            let faults = lock(&self.faults);
            (faults.chunk_write_delay, faults.chunk_write.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let MockChunkWriter { url, buffer, chunks, .. } = *self;
        lock(&chunks).insert(url, buffer.freeze());
        Ok(())
    }
}
