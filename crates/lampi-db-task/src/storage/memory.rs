//! In-memory [`ObjectStore`] for tests.
//!
//! Objects are served in fixed-size chunks so consumers see a real stream, and
//! every open stream is counted, which lets tests check that a failed restore
//! closed all of the object streams it had opened.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ObjectBody, ObjectStore};
use crate::error::{RestoreError, RestoreResult};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct MemoryStore {
    bucket: String,
    objects: HashMap<String, Bytes>,
    versions: HashMap<(String, String), Bytes>,
    fail_after: HashMap<String, usize>,
    unavailable: bool,
    chunk_size: usize,
    open_streams: Arc<AtomicUsize>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: HashMap::new(),
            versions: HashMap::new(),
            fail_after: HashMap::new(),
            unavailable: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            open_streams: Arc::new(AtomicUsize::new(0)),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Latest version of `key`
    pub fn with_object(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.objects.insert(key.into(), data.into());
        self
    }

    /// A specific object version, only served when that version is requested
    pub fn with_version(
        mut self,
        key: impl Into<String>,
        version: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.versions.insert((key.into(), version.into()), data.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Break the stream of `key` with a connection reset after `bytes` bytes
    pub fn failing_after(mut self, key: impl Into<String>, bytes: usize) -> Self {
        self.fail_after.insert(key.into(), bytes);
        self
    }

    /// Every fetch fails as if the store could not be reached
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of object streams opened and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Keys passed to `fetch`, in call order
    pub fn fetched_keys(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lookup(&self, key: &str, version: Option<&str>) -> Option<Bytes> {
        match version {
            Some(version) => self
                .versions
                .get(&(key.to_string(), version.to_string()))
                .cloned(),
            None => self.objects.get(key).cloned(),
        }
    }

    fn chunks(&self, key: &str, data: Bytes) -> Vec<io::Result<Bytes>> {
        let limit = self.fail_after.get(key).copied();
        let readable = limit.map_or(data.len(), |limit| limit.min(data.len()));

        let mut chunks: Vec<io::Result<Bytes>> = Vec::new();
        let mut offset = 0;
        while offset < readable {
            let end = (offset + self.chunk_size).min(readable);
            chunks.push(Ok(data.slice(offset..end)));
            offset = end;
        }

        if limit.is_some() {
            chunks.push(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("connection reset while reading {}", key),
            )));
        }

        chunks
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn fetch(&self, key: &str, version: Option<&str>) -> RestoreResult<ObjectBody> {
        self.fetched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(key.to_string());

        if self.unavailable {
            return Err(RestoreError::ObjectStoreUnavailable {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: "store marked unavailable".into(),
            });
        }

        let data = self
            .lookup(key, version)
            .ok_or_else(|| RestoreError::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                version: version.map(str::to_string),
            })?;

        let length = data.len() as i64;
        let guard = OpenStream::new(Arc::clone(&self.open_streams));
        let stream = futures::stream::iter(self.chunks(key, data)).map(move |chunk| {
            let _open = &guard;
            chunk
        });

        Ok(ObjectBody::new(key, Some(length), stream))
    }
}

struct OpenStream {
    counter: Arc<AtomicUsize>,
}

impl OpenStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
