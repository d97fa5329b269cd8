//! Local filesystem storage backend
//!
//! Chunks are plain files under `{base_path}/chunks`, objects are JSON index
//! files under `{base_path}/objects` naming their chunks. Index files are
//! written to `temp_path` first and renamed into place.

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::storage::{
    ByteRange, ByteStream, ChunkDescriptor, ChunkReceipt, ChunkTransport, ChunkWriter, ContentCommit,
    ContentRequest, FetchedObject, ObjectMetadata, ObjectStorage, StorageError,
};

const URL_SCHEME: &str = "file://";
const READ_BLOCK: u64 = 64 * 1024;

/// What an object index file holds
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectIndex {
    account: String,
    container: String,
    object: String,
    metadata: ObjectMetadata,
    chunks: Vec<ChunkReceipt>,
}

impl ObjectIndex {
    /// One receipt per position, in position order
    fn data_chunks(&self) -> Vec<&ChunkReceipt> {
        let mut by_pos: HashMap<u32, &ChunkReceipt> = HashMap::new();
        for chunk in &self.chunks {
            by_pos.entry(chunk.pos).or_insert(chunk);
        }
        let mut chunks: Vec<&ChunkReceipt> = by_pos.into_values().collect();
        chunks.sort_by_key(|c| c.pos);
        chunks
    }
}

/// Filesystem implementation of the storage backend
pub struct LocalObjectStorage {
    chunk_path: PathBuf,
    object_path: PathBuf,
    temp_path: PathBuf,
    chunk_size: u64,
    replicas: u32,
    /// Held from the existence check to the index rename
    commit_lock: Mutex<()>,
    sequence: AtomicU64,
}

impl LocalObjectStorage {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let base = PathBuf::from(&config.base_path);
        let chunk_path = base.join("chunks");
        let object_path = base.join("objects");
        let temp_path = PathBuf::from(&config.temp_path);
        for dir in [&chunk_path, &object_path, &temp_path] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                info!("Created storage directory: {}", dir.display());
            }
        }

        Ok(Self {
            chunk_path,
            object_path,
            temp_path,
            chunk_size: config.chunk_size.max(1),
            replicas: config.replicas.max(1),
            commit_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
        })
    }

    fn index_name(account: &str, container: &str, object: &str) -> String {
        let digest = md5::compute(format!("{}/{}/{}", account, container, object));
        format!("{}.json", hex::encode(digest.0))
    }

    fn index_path(&self, account: &str, container: &str, object: &str) -> PathBuf {
        self.object_path.join(Self::index_name(account, container, object))
    }

    /// Chunk file behind a `file://` URL, refusing anything outside the chunk directory
    fn chunk_file(&self, url: &str) -> Result<PathBuf, StorageError> {
        let name = url
            .strip_prefix(URL_SCHEME)
            .map(Path::new)
            .and_then(|p| p.file_name())
            .ok_or_else(|| StorageError::BadRequest(format!("not a local chunk url: {}", url)))?;
        Ok(self.chunk_path.join(name))
    }

    async fn read_index(&self, account: &str, container: &str, object: &str) -> Result<Option<ObjectIndex>, StorageError> {
        match fs::read(self.index_path(account, container, object)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn live_index(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<ObjectIndex, StorageError> {
        self.read_index(account, container, object)
            .await?
            .filter(|index| !index.metadata.deleted)
            .filter(|index| version.map_or(true, |v| v == index.metadata.version.to_string()))
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}/{}", account, container, object)))
    }

    async fn write_index(&self, index: &ObjectIndex) -> Result<(), StorageError> {
        let name = Self::index_name(&index.account, &index.container, &index.object);
        let temp = self.temp_path.join(format!("{}.{}", name, Utc::now().timestamp_nanos_opt().unwrap_or_default()));
        fs::write(&temp, serde_json::to_vec(index)?).await?;
        fs::rename(&temp, self.object_path.join(name)).await?;
        Ok(())
    }

    /// Remove chunk files, skipping the ones already gone
    async fn remove_chunks<'a>(&self, urls: impl Iterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        for url in urls {
            let outcome = match self.chunk_file(url) {
                Ok(path) => fs::remove_file(path).await.map_err(StorageError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => removed += 1,
                Err(StorageError::NotFound(_)) => {}
                Err(e) => warn!("Could not remove chunk {}: {}", url, e),
            }
        }
        removed
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn object_show(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<ObjectMetadata, StorageError> {
        Ok(self.live_index(account, container, object, version).await?.metadata)
    }

    async fn object_fetch(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
        range: Option<ByteRange>,
    ) -> Result<FetchedObject, StorageError> {
        let index = self.live_index(account, container, object, version).await?;
        let length = index.metadata.length;
        let served = range.map(|r| r.resolve(length)).transpose()?;
        let (first, last) = match served {
            Some(bounds) => bounds,
            None if length == 0 => (0, 0),
            None => (0, length - 1),
        };

        let mut segments = VecDeque::new();
        let mut chunk_start = 0u64;
        for chunk in index.data_chunks() {
            let chunk_end = chunk_start + chunk.size;
            if length > 0 && chunk.size > 0 && chunk_start <= last && chunk_end > first {
                let skip = first.saturating_sub(chunk_start);
                let take = (last + 1).min(chunk_end) - (chunk_start + skip);
                segments.push_back(Segment { path: self.chunk_file(&chunk.url)?, skip, take });
            }
            chunk_start = chunk_end;
        }

        Ok(FetchedObject {
            metadata: index.metadata,
            range: served,
            body: read_segments(segments),
        })
    }

    async fn object_delete(
        &self,
        account: &str,
        container: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<(), StorageError> {
        let index = self.live_index(account, container, object, version).await?;
        fs::remove_file(self.index_path(account, container, object)).await?;
        self.remove_chunks(index.chunks.iter().map(|c| c.url.as_str())).await;
        info!("Deleted {}/{}/{} ({} chunks)", account, container, object, index.chunks.len());
        Ok(())
    }

    async fn content_prepare(
        &self,
        account: &str,
        container: &str,
        object: &str,
        request: &ContentRequest,
    ) -> Result<(ObjectMetadata, Vec<ChunkDescriptor>), StorageError> {
        let now = Utc::now();
        let id = hex::encode(
            md5::compute(format!(
                "{}/{}/{}/{}/{}",
                account,
                container,
                object,
                now.timestamp_nanos_opt().unwrap_or_default(),
                self.sequence.fetch_add(1, Ordering::Relaxed)
            ))
            .0,
        )
        .to_uppercase();

        let positions = request.size.div_ceil(self.chunk_size).max(1);
        let mut chunks = Vec::new();
        for pos in 0..positions {
            let size = request.size.saturating_sub(pos * self.chunk_size).min(self.chunk_size);
            for replica in 0..self.replicas {
                let path = self.chunk_path.join(format!("{}.{}.{}", id, pos, replica));
                chunks.push(ChunkDescriptor {
                    url: format!("{}{}", URL_SCHEME, path.display()),
                    pos: pos as u32,
                    size,
                });
            }
        }

        let metadata = ObjectMetadata {
            id,
            mime_type: request.mime_type.clone(),
            length: request.size,
            ctime: now.timestamp(),
            version: now.timestamp_micros(),
            policy: request.policy.clone(),
            chunk_size: self.chunk_size,
            ..ObjectMetadata::default()
        };
        Ok((metadata, chunks))
    }

    async fn content_create(
        &self,
        account: &str,
        container: &str,
        object: &str,
        commit: &ContentCommit,
    ) -> Result<ObjectMetadata, StorageError> {
        let _guard = self.commit_lock.lock().await;
        let previous = self.read_index(account, container, object).await?.filter(|i| !i.metadata.deleted);
        if commit.if_none_match && previous.is_some() {
            self.remove_chunks(commit.chunks.iter().map(|c| c.url.as_str())).await;
            return Err(StorageError::PreconditionFailed(format!("{}/{}/{} exists", account, container, object)));
        }

        let index = ObjectIndex {
            account: account.to_string(),
            container: container.to_string(),
            object: object.to_string(),
            metadata: commit.metadata.clone(),
            chunks: commit.chunks.clone(),
        };
        let written: u64 = index.data_chunks().iter().map(|c| c.size).sum();
        if written != commit.metadata.length {
            return Err(StorageError::Internal(format!(
                "chunks hold {} bytes, content declares {}",
                written, commit.metadata.length
            )));
        }

        self.write_index(&index).await?;
        if let Some(previous) = previous {
            self.remove_chunks(previous.chunks.iter().map(|c| c.url.as_str())).await;
        }
        debug!("Committed {}/{}/{} as {}", account, container, object, index.metadata.id);
        Ok(index.metadata)
    }

    async fn content_abort(
        &self,
        account: &str,
        container: &str,
        object: &str,
        chunks: &[ChunkDescriptor],
    ) -> Result<(), StorageError> {
        let removed = self.remove_chunks(chunks.iter().map(|c| c.url.as_str())).await;
        debug!("Released {} chunk files of {}/{}/{}", removed, account, container, object);
        Ok(())
    }
}

#[async_trait]
impl ChunkTransport for LocalObjectStorage {
    async fn open(&self, chunk: &ChunkDescriptor) -> Result<Box<dyn ChunkWriter>, StorageError> {
        let path = self.chunk_file(&chunk.url)?;
        let file = File::create(&path).await?;
        Ok(Box::new(LocalChunkWriter { file }))
    }
}

struct LocalChunkWriter {
    file: File,
}

#[async_trait]
impl ChunkWriter for LocalChunkWriter {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        self.file.write_all(&data).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), StorageError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Part of a chunk file to stream
struct Segment {
    path: PathBuf,
    skip: u64,
    take: u64,
}

struct ReadState {
    segments: VecDeque<Segment>,
    current: Option<(File, u64)>,
}

fn read_segments(segments: VecDeque<Segment>) -> ByteStream {
    let state = ReadState { segments, current: None };
    Box::pin(futures::stream::try_unfold(state, next_block))
}

async fn next_block(mut state: ReadState) -> Result<Option<(Bytes, ReadState)>, StorageError> {
    loop {
        if let Some((file, remaining)) = state.current.as_mut() {
            if *remaining > 0 {
                let mut buf = vec![0u8; (*remaining).min(READ_BLOCK) as usize];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Err(StorageError::Internal("chunk file shorter than recorded".to_string()));
                }
                buf.truncate(n);
                *remaining -= n as u64;
                return Ok(Some((Bytes::from(buf), state)));
            }
        }
        state.current = None;

        let Some(segment) = state.segments.pop_front() else {
            return Ok(None);
        };
        let mut file = File::open(&segment.path).await?;
        file.seek(SeekFrom::Start(segment.skip)).await?;
        state.current = Some((file, segment.take));
    }
}
