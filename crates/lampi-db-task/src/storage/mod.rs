//! Object storage access
//!
//! The restore pipeline only ever needs one capability from object storage:
//! "give me the body of this key (at this version) as a stream". That is the
//! [`ObjectStore`] trait. [`S3Storage`] implements it on top of `aws-sdk-s3`,
//! and [`memory::MemoryStore`] implements it in memory for tests.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::get_object::GetObjectError,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::io;
use tracing::{debug, info, instrument};

use crate::error::{RestoreError, RestoreResult};

pub mod config;
pub mod memory;

pub use config::StorageConfig;

const MAX_PREALLOCATION: i64 = 1 << 20;

/// Read access to a single bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every key is resolved against
    fn bucket(&self) -> &str;

    /// Open the body of `key`, optionally pinned to an object `version`.
    ///
    /// The returned body is a one-shot stream; nothing is buffered up front.
    async fn fetch(&self, key: &str, version: Option<&str>) -> RestoreResult<ObjectBody>;
}

/// Streaming body of a fetched object. Consumable exactly once.
pub struct ObjectBody {
    key: String,
    content_length: Option<i64>,
    stream: BoxStream<'static, io::Result<Bytes>>,
}

impl ObjectBody {
    pub fn new<S>(key: impl Into<String>, content_length: Option<i64>, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            key: key.into(),
            content_length,
            stream: stream.boxed(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Size reported by the store, if any
    pub fn content_length(&self) -> Option<i64> {
        self.content_length
    }

    /// Next chunk of the body, `None` once the object is exhausted
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.stream.next().await
    }

    /// Collect the whole body. Only for small objects such as the manifest.
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let capacity = self.content_length.unwrap_or(0).clamp(0, MAX_PREALLOCATION) as usize;
        let mut data = Vec::with_capacity(capacity);
        while let Some(chunk) = self.next_chunk().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    /// Collect the whole body as UTF-8 text
    pub async fn read_to_string(self) -> io::Result<String> {
        let data = self.read_to_end().await?;
        String::from_utf8(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// S3 (or S3-compatible) object store
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: StorageConfig) -> lampi_common::Result<Self> {
        config.validate()?;
        debug!("Initializing storage with config: {:?}", config);

        let mut builder = match config.static_credentials() {
            Some((access_key, secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "lampi-storage");
                aws_sdk_s3::Config::builder()
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            },
            None => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn classify_error(
        &self,
        key: &str,
        version: Option<&str>,
        err: SdkError<GetObjectError, impl std::fmt::Debug>,
    ) -> RestoreError {
        if is_not_found(&err) {
            return RestoreError::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                version: version.map(str::to_string),
            };
        }

        RestoreError::ObjectStoreUnavailable {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: DisplayErrorContext(&err).to_string().into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn fetch(&self, key: &str, version: Option<&str>) -> RestoreResult<ObjectBody> {
        debug!("Getting stream from s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version.map(str::to_string))
            .send()
            .await
            .map_err(|err| self.classify_error(key, version, err))?;

        let content_length = response.content_length();
        Ok(ObjectBody::new(key, content_length, byte_stream_chunks(response.body)))
    }
}

fn is_not_found<R>(err: &SdkError<GetObjectError, R>) -> bool {
    match err {
        SdkError::ServiceError(service) => {
            let err = service.err();
            err.is_no_such_key() || matches!(err.code(), Some("NoSuchVersion") | Some("NotFound"))
        },
        _ => false,
    }
}

/// Adapt the SDK body into a chunk stream without collecting it
fn byte_stream_chunks(body: ByteStream) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures::stream::try_unfold(body, |mut body| async move {
        match body.try_next().await {
            Ok(Some(chunk)) => Ok(Some((chunk, body))),
            Ok(None) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    })
}
