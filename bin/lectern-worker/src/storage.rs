//! S3-compatible object storage, through an opendal operator.
//!
//! Objects move through the local job workspace as whole files: lecture
//! recordings are small enough that streaming buys nothing, and ffmpeg wants
//! a real path anyway.

use std::path::Path;

use opendal::{services, Operator};

use crate::config::Config;
use crate::error::WorkerError;

#[derive(Clone, Debug)]
pub struct ObjectStorage {
    op: Operator,
}

impl ObjectStorage {
    pub fn from_config(cfg: &Config) -> Result<Self, opendal::Error> {
        let builder = services::S3::default()
            .endpoint(&cfg.s3_endpoint)
            .region(&cfg.s3_region)
            .bucket(&cfg.s3_bucket)
            .access_key_id(&cfg.s3_access_key)
            .secret_access_key(&cfg.s3_secret_key);
        Ok(Self {
            op: Operator::new(builder)?.finish(),
        })
    }

    /// Download the object at `key` into `local`.
    pub async fn fetch(&self, key: &str, local: &Path) -> Result<(), WorkerError> {
        let data = self.op.read(key).await?;
        tokio::fs::write(local, data.to_bytes()).await?;
        Ok(())
    }

    /// Upload the file at `local` under `key`.
    pub async fn store(
        &self,
        key: &str,
        local: &Path,
        content_type: &str,
    ) -> Result<(), WorkerError> {
        let data = tokio::fs::read(local).await?;
        self.op
            .write_with(key, data)
            .content_type(content_type)
            .await?;
        Ok(())
    }
}
