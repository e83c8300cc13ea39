use lampi_common::env::{first_of, optional_env, parsed_or};
use lampi_common::{LampiError, Result};

/// Bucket the Koodisto export lands in when nothing else is configured.
pub const DEFAULT_BUCKET: &str = "oph-lampi-local";

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials. When both are absent the default AWS provider
    /// chain (environment, profile, container role) is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: optional_env("S3_ENDPOINT"),
            region: optional_env("S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: optional_env("S3_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            access_key: first_of(&["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"]),
            secret_key: first_of(&["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"]),
            path_style: parsed_or("S3_PATH_STYLE", false)?,
        })
    }

    /// S3-compatible local endpoint (MinIO, LocalStack) with static credentials
    pub fn for_local(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            path_style: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(LampiError::Config("S3 bucket cannot be empty".to_string()));
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(LampiError::Config(
                "S3 access key and secret key must be set together".to_string(),
            ));
        }

        Ok(())
    }

    pub(crate) fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .finish()
    }
}
