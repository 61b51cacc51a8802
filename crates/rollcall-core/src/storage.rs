//! Storage layer for the member directory
//!
//! The whole directory is stored as one JSON document, either in a local
//! file (atomic replace) or in Cloudflare R2 / AWS S3.

use crate::config::BroadcastSettings;
use crate::directory::ChatDirectory;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

/// Object key of the directory document in R2.
pub const DIRECTORY_OBJECT_KEY: &str = "directory/members.json";

const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Every known chat, keyed by chat id.
pub type DirectorySnapshot = BTreeMap<i64, ChatDirectory>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Interface for member directory storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Load the full directory; a missing document is an empty directory
    async fn load_directory(&self) -> Result<DirectorySnapshot, StorageError>;
    /// Replace the stored directory with `snapshot`
    async fn save_directory(&self, snapshot: &DirectorySnapshot) -> Result<(), StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// Directory stored in a local JSON file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(TEMP_FILE_SUFFIX);
        PathBuf::from(name)
    }
}

#[async_trait]
impl DirectoryStore for JsonFileStore {
    async fn load_directory(&self) -> Result<DirectorySnapshot, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(DirectorySnapshot::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No directory file at {}, starting empty", self.path.display());
                Ok(DirectorySnapshot::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_directory(&self, snapshot: &DirectorySnapshot) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Readers never observe a partial document
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        match tokio::fs::create_dir_all(dir).await {
            Ok(()) => {
                info!("Member directory file: {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("Directory location {} is not writable: {e}", dir.display());
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}

/// R2-backed storage implementation
pub struct R2Storage {
    client: Client,
    bucket: String,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &BroadcastSettings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }

    /// Save data as JSON to R2
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization or S3 upload fails.
    pub async fn save_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        let body_bytes = serde_json::to_vec_pretty(data)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body_bytes))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        Ok(())
    }

    /// Load data from JSON in R2
    ///
    /// # Errors
    ///
    /// Returns an error if S3 download or JSON deserialization fails.
    pub async fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();
                Ok(Some(serde_json::from_slice(&data)?))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }
}

#[async_trait]
impl DirectoryStore for R2Storage {
    async fn load_directory(&self) -> Result<DirectorySnapshot, StorageError> {
        Ok(self
            .load_json(DIRECTORY_OBJECT_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save_directory(&self, snapshot: &DirectorySnapshot) -> Result<(), StorageError> {
        self.save_json(DIRECTORY_OBJECT_KEY, snapshot).await
    }

    /// Check connection to R2 storage
    async fn check_connection(&self) -> Result<(), String> {
        match self.client.list_buckets().send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("R2 connectivity test failed: {e:#?}");
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}
