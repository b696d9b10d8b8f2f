//! # Storage
//!
//! Byte-level access to catalog descriptions and data files that live on the
//! local filesystem or in Amazon S3. The backend is picked from the locator:
//! `s3://bucket/key` goes to S3, anything else is a local path.
//!
//! Array stores cannot be read from a byte stream, so remote data files are
//! staged into a temporary file with [`stage_to_tempfile`] before opening.
//!
//! ```rust,no_run
//! use geocat::storage::{StorageBackend, StorageFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = StorageFactory::from_path("s3://climate-archive/catalogs/era5.yaml").await?;
//!     let description = storage.read("s3://climate-archive/catalogs/era5.yaml").await?;
//!     println!("{} bytes", description.len());
//!     Ok(())
//! }
//! ```

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use log::debug;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;

/// Errors raised by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AWS S3 GetObject error: {0}")]
    S3GetObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>),

    #[error("AWS S3 PutObject error: {0}")]
    S3PutObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>),

    #[error("AWS S3 HeadObject error: {0}")]
    S3HeadObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>),

    #[error("AWS ByteStream error: {0}")]
    ByteStream(String),

    #[error("Invalid S3 path format: {0}")]
    InvalidS3Path(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Uniform async access to stored objects
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads a whole object.
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Writes a whole object, creating parent directories for local paths.
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;
}

#[derive(Debug, Clone)]
pub struct LocalStorage;

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        match fs::read(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::PathNotFound(path.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StorageError::PermissionDenied(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::write(path, data).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StorageError::PermissionDenied(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// S3 backend; credentials come from the AWS SDK default chain.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    pub async fn new() -> StorageResult<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Ok(S3Storage {
            client: S3Client::new(&config),
        })
    }

    /// Splits `s3://bucket/key` into bucket and key.
    pub fn parse_s3_path(s3_path: &str) -> StorageResult<(String, String)> {
        let Some(without_scheme) = s3_path.strip_prefix("s3://") else {
            return Err(StorageError::InvalidS3Path(format!(
                "S3 path must start with 's3://': {}",
                s3_path
            )));
        };
        match without_scheme.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(StorageError::InvalidS3Path(format!(
                "Expected 's3://bucket/key': {}",
                s3_path
            ))),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Storage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let (bucket, key) = Self::parse_s3_path(path)?;
        debug!("Fetching s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                aws_sdk_s3::error::SdkError::ServiceError(service_err)
                    if service_err.err().is_no_such_key() =>
                {
                    StorageError::PathNotFound(path.to_string())
                }
                _ => StorageError::S3GetObject(e),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ByteStream(e.to_string()))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let (bucket, key) = Self::parse_s3_path(path)?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data.to_vec()))
            .send()
            .await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let (bucket, key) = Self::parse_s3_path(path)?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(service_err))
                if service_err.err().is_not_found() =>
            {
                Ok(false)
            }
            Err(e) => Err(StorageError::S3HeadObject(e)),
        }
    }
}

#[derive(Debug)]
pub enum Storage {
    Local(LocalStorage),
    S3(S3Storage),
}

#[async_trait::async_trait]
impl StorageBackend for Storage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        match self {
            Storage::Local(storage) => storage.read(path).await,
            Storage::S3(storage) => storage.read(path).await,
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        match self {
            Storage::Local(storage) => storage.write(path, data).await,
            Storage::S3(storage) => storage.write(path, data).await,
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self {
            Storage::Local(storage) => storage.exists(path).await,
            Storage::S3(storage) => storage.exists(path).await,
        }
    }
}

/// Picks a storage backend from a locator.
pub struct StorageFactory;

impl StorageFactory {
    pub async fn from_path(path: &str) -> StorageResult<Storage> {
        if Self::is_s3_path(path) {
            Ok(Storage::S3(S3Storage::new().await?))
        } else {
            Ok(Storage::Local(LocalStorage))
        }
    }

    pub fn is_s3_path(path: &str) -> bool {
        path.starts_with("s3://")
    }

    pub fn is_local_path(path: &str) -> bool {
        !Self::is_s3_path(path)
    }
}

/// Copies an object into a temporary file that keeps the locator's extension.
/// The file is deleted when the returned handle is dropped.
pub async fn stage_to_tempfile(locator: &str) -> StorageResult<NamedTempFile> {
    let storage = StorageFactory::from_path(locator).await?;
    let data = storage.read(locator).await?;

    let suffix = Path::new(locator)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix("geocat-")
        .suffix(&suffix)
        .tempfile()?;
    fs::write(staged.path(), &data).await?;
    debug!(
        "Staged {} ({} bytes) at {}",
        locator,
        data.len(),
        staged.path().display()
    );
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_write_read() -> Result<(), Box<dyn std::error::Error>> {
        let storage = LocalStorage;
        let temp_dir = TempDir::new()?;
        let file_path = temp_dir.path().join("catalogs").join("era5.yaml");
        let file_path_str = file_path.to_str().unwrap();

        storage.write(file_path_str, b"sources: {}").await?;
        assert_eq!(storage.read(file_path_str).await?, b"sources: {}");
        assert!(storage.exists(file_path_str).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let storage = LocalStorage;
        let result = storage.read("/nonexistent/catalog.yaml").await;
        assert!(matches!(result, Err(StorageError::PathNotFound(_))));
        assert!(!storage.exists("/nonexistent/catalog.yaml").await?);
        Ok(())
    }

    #[test]
    fn test_s3_path_parsing() {
        let (bucket, key) = S3Storage::parse_s3_path("s3://climate-archive/era5/t2m.nc").unwrap();
        assert_eq!(bucket, "climate-archive");
        assert_eq!(key, "era5/t2m.nc");

        assert!(S3Storage::parse_s3_path("http://bucket/file.nc").is_err());
        assert!(S3Storage::parse_s3_path("s3://").is_err());
        assert!(S3Storage::parse_s3_path("s3://bucket").is_err());
        assert!(S3Storage::parse_s3_path("s3:///file.nc").is_err());
    }

    #[tokio::test]
    async fn test_storage_factory_path_detection() -> Result<(), Box<dyn std::error::Error>> {
        assert!(StorageFactory::is_s3_path("s3://bucket/catalog.yaml"));
        assert!(StorageFactory::is_local_path("catalogs/era5.yaml"));

        let local = StorageFactory::from_path("/data/catalog.yaml").await?;
        assert!(matches!(local, Storage::Local(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_local_file_keeps_extension() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("obs.csv");
        std::fs::write(&source, "x,y\n1,4\n")?;

        let staged = stage_to_tempfile(source.to_str().unwrap()).await?;
        assert_eq!(staged.path().extension().and_then(|e| e.to_str()), Some("csv"));
        assert_eq!(std::fs::read_to_string(staged.path())?, "x,y\n1,4\n");

        let staged_path = staged.path().to_path_buf();
        drop(staged);
        assert!(!staged_path.exists());
        Ok(())
    }
}
