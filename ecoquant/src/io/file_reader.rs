// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Reads service configuration and model weights from local disk or S3.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::io::FileReaderResult;

const S3_SCHEME: &str = "s3://";

type ReadFuture<'a, T> = Pin<Box<dyn Future<Output = FileReaderResult<T>> + Send + 'a>>;

/// Returns true when the path points at an S3 object.
pub fn is_s3_path(path: &str) -> bool {
    path.starts_with(S3_SCHEME)
}

/// Storage-agnostic access to a file addressed by a path string.
pub trait FileReader: Send + Sync {
    fn read_bytes<'a>(&'a self, path: &'a str) -> ReadFuture<'a, Vec<u8>>;

    /// Reads the file as UTF-8 text.
    fn read_string<'a>(&'a self, path: &'a str) -> ReadFuture<'a, String> {
        Box::pin(async move {
            let bytes = self.read_bytes(path).await?;
            Ok(String::from_utf8(bytes)?)
        })
    }

    /// Copies the file to `local_path`, creating parent directories as needed.
    fn download_to_file<'a>(&'a self, path: &'a str, local_path: &'a Path) -> ReadFuture<'a, ()> {
        Box::pin(async move {
            let bytes = self.read_bytes(path).await?;
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(local_path, bytes).await?;
            Ok(())
        })
    }
}

/// Picks the reader matching the path scheme. AWS credentials are only loaded for `s3://` paths.
pub async fn reader_for(path: &str) -> Box<dyn FileReader> {
    if is_s3_path(path) {
        let aws_config = aws_config::load_from_env().await;
        Box::new(S3Reader::new(aws_sdk_s3::Client::new(&aws_config)))
    } else {
        Box::new(LocalReader)
    }
}

#[derive(Debug, Default)]
pub struct LocalReader;

impl FileReader for LocalReader {
    fn read_bytes<'a>(&'a self, path: &'a str) -> ReadFuture<'a, Vec<u8>> {
        Box::pin(async move { Ok(tokio::fs::read(path).await?) })
    }
}

#[derive(Debug)]
pub struct S3Reader {
    client: Arc<aws_sdk_s3::Client>,
}

impl S3Reader {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        S3Reader {
            client: Arc::new(client),
        }
    }

    /// Splits `s3://bucket/key/path` into `(bucket, key/path)`.
    fn parse_s3_path(s3_path: &str) -> FileReaderResult<(String, String)> {
        let location = s3_path
            .strip_prefix(S3_SCHEME)
            .ok_or("S3 path must start with s3://")?;
        match location.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(format!("S3 path {} needs both a bucket and a key", s3_path).into()),
        }
    }
}

impl FileReader for S3Reader {
    fn read_bytes<'a>(&'a self, path: &'a str) -> ReadFuture<'a, Vec<u8>> {
        let client = Arc::clone(&self.client);

        Box::pin(async move {
            let (bucket, key) = Self::parse_s3_path(path)?;
            let object = client.get_object().bucket(bucket).key(key).send().await?;
            let body = object.body.collect().await?;
            Ok(body.into_bytes().to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_file(content: &[u8]) -> PathBuf {
        let path = env::temp_dir().join(format!("ecoquant_reader_{}", uuid::Uuid::new_v4()));
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_local_config_read() {
        let path = scratch_file(br#"{"upload_dir": "uploads"}"#);

        let reader = reader_for(path.to_str().unwrap()).await;
        let content = reader.read_string(path.to_str().unwrap()).await.unwrap();

        assert_eq!(content, r#"{"upload_dir": "uploads"}"#);
        fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_rejected() {
        let path = scratch_file(&[0xff, 0xfe, 0x00]);

        let result = LocalReader.read_string(path.to_str().unwrap()).await;

        assert!(result.is_err());
        assert_eq!(
            LocalReader.read_bytes(path.to_str().unwrap()).await.unwrap(),
            vec![0xff, 0xfe, 0x00]
        );
        fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_download_creates_model_dir() {
        let source = scratch_file(b"{\"layer1\": {}}");
        let root = env::temp_dir().join(format!("ecoquant_download_{}", uuid::Uuid::new_v4()));
        let target = root.join("models").join("mlp.json");

        LocalReader
            .download_to_file(source.to_str().unwrap(), &target)
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"layer1\": {}}");
        fs::remove_file(source).unwrap();
        fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        assert!(LocalReader
            .read_bytes("/definitely/not/here/config.json")
            .await
            .is_err());
    }

    #[test]
    fn test_s3_path_parsing() {
        let (bucket, key) = S3Reader::parse_s3_path("s3://ecoquant-models/v2/mlp.json").unwrap();
        assert_eq!(bucket, "ecoquant-models");
        assert_eq!(key, "v2/mlp.json");

        assert!(S3Reader::parse_s3_path("trained_models/mlp.json").is_err());
        assert!(S3Reader::parse_s3_path("s3://bucket-only").is_err());
        assert!(S3Reader::parse_s3_path("s3:///key-without-bucket").is_err());
        assert!(is_s3_path("s3://b/k"));
        assert!(!is_s3_path("trained_models/mlp.json"));
    }
}
