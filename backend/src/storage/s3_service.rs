use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum ImageStoreError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Invalid file format")]
    InvalidFormat,
}

/// Object storage for the source images of recorded scans.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put_image(&self, key: &str, image_data: &[u8], mime_type: &str) -> Result<(), ImageStoreError>;
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

pub fn extract_file_extension(mime_type: &str) -> Result<&'static str, ImageStoreError> {
    match mime_type {
        "image/jpeg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        "image/heic" => Ok("heic"),
        _ => Err(ImageStoreError::InvalidFormat),
    }
}

/// Key under which a user's scan image is stored. Identical images share a key.
pub fn image_key(user_id: &str, image_data: &[u8], mime_type: &str) -> Result<String, ImageStoreError> {
    let extension = extract_file_extension(mime_type)?;
    Ok(format!(
        "images/{}/{}.{}",
        user_id,
        calculate_image_hash(image_data),
        extension
    ))
}

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self { client, bucket_name }
    }
}

#[async_trait]
impl ImageStore for S3Service {
    async fn put_image(&self, key: &str, image_data: &[u8], mime_type: &str) -> Result<(), ImageStoreError> {
        let body = ByteStream::from(image_data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .content_type(mime_type)
            .send()
            .await
            .map_err(|e| ImageStoreError::S3(e.to_string()))?;

        Ok(())
    }
}

/// Keeps uploaded images in memory, keyed like the bucket.
#[derive(Clone, Default)]
pub struct MemoryImageStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put_image(&self, key: &str, image_data: &[u8], _mime_type: &str) -> Result<(), ImageStoreError> {
        self.objects
            .lock()
            .map_err(|_| ImageStoreError::S3("memory image store lock poisoned".to_string()))?
            .insert(key.to_string(), image_data.to_vec());
        Ok(())
    }
}
