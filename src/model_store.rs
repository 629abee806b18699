use crate::config::ModelStoreConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    error::SdkError, operation::get_object::GetObjectError, primitives::ByteStreamError, Client,
};
use std::io::Write;
use tempfile::TempPath;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("Failed to download model artifact: {0}")]
    Download(#[from] SdkError<GetObjectError>),
    #[error("Failed to read model artifact body: {0}")]
    Body(#[from] ByteStreamError),
    #[error("Failed to persist model artifact: {0}")]
    Persist(#[from] std::io::Error),
}

/// Handle on the object store holding the model artifact.
///
/// Credentials and region come from the environment through the SDK's
/// default provider chain; only the bucket and object key are configured.
pub struct ModelStore {
    client: Client,
    bucket: String,
    object_key: String,
}

impl ModelStore {
    pub async fn new(config: &ModelStoreConfig) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = Client::new(&sdk_config);

        Self {
            client,
            bucket: config.bucket.clone(),
            object_key: config.object_key.clone(),
        }
    }

    /// Downloads the artifact and writes it to a uniquely-named temp file.
    ///
    /// The returned path owns the file: dropping it removes the artifact
    /// from disk, so callers keep it alive until the model is loaded.
    pub async fn fetch_artifact(&self) -> Result<TempPath, ModelStoreError> {
        tracing::info!(
            "Downloading model artifact from s3://{}/{}",
            self.bucket,
            self.object_key
        );

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.object_key)
            .send()
            .await?;

        let data = object.body.collect().await?.into_bytes();
        tracing::info!("Model artifact downloaded ({} bytes)", data.len());

        let path = persist_artifact(&data)?;
        tracing::info!("Model artifact written to {:?}", path);

        Ok(path)
    }
}

fn persist_artifact(data: &[u8]) -> Result<TempPath, std::io::Error> {
    let mut file = tempfile::Builder::new()
        .prefix("model-")
        .suffix(".onnx")
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;

    Ok(file.into_temp_path())
}
