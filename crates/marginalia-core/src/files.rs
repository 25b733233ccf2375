//! Local filesystem implementation of [`FileStore`].

use std::path::Path;

use async_trait::async_trait;

use crate::traits::FileStore;
use crate::{Error, Result};

/// Reads attachments straight from the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::FileUnavailable(format!("{} not found", path.display())))?;
        if !metadata.is_file() {
            return Err(Error::FileUnavailable(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(Error::FileUnavailable(format!("{} is empty", path.display())));
        }
        Ok(tokio::fs::read(path).await?)
    }
}
