//! Asynchronous file reading used by the registry

use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Reads straight from disk through tokio
#[derive(Debug, Default, Clone)]
pub struct TokioFileReader;

#[async_trait]
impl FileReader for TokioFileReader {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}
