//! Split generation engines.
//!
//! An engine turns a bundle and a [`SplitRequest`] into unsigned split
//! APKs. Signing and caching happen in the coordinator.

mod command;
mod layout;

pub use command::CommandEngine;
pub use layout::LayoutEngine;

use crate::error::{SplitError, SplitResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use splitstore_core::config::EngineConfig;
use splitstore_core::{SplitApk, SplitRequest};
use splitstore_storage::ByteStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Bundle bytes handed to an engine, read from storage on demand.
pub struct BundleSource {
    stream: ByteStream,
    size_hint: usize,
}

impl BundleSource {
    pub fn from_stream(stream: ByteStream, size_hint: usize) -> Self {
        Self { stream, size_hint }
    }

    /// Collect the whole bundle into memory.
    pub async fn into_bytes(mut self) -> SplitResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size_hint);
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Copy the bundle into a new file at `path` chunk by chunk. Returns the
    /// number of bytes written.
    pub async fn write_to(mut self, path: &Path) -> SplitResult<u64> {
        let io_failure = |e: std::io::Error| SplitError::Generation(format!("failed to stage bundle: {e}"));
        let mut file = tokio::fs::File::create(path).await.map_err(io_failure)?;
        let mut written = 0u64;
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_failure)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_failure)?;
        Ok(written)
    }
}

impl From<Bytes> for BundleSource {
    fn from(bytes: Bytes) -> Self {
        let size_hint = bytes.len();
        let stream = futures::stream::once(async move { Ok(bytes) });
        Self::from_stream(Box::pin(stream), size_hint)
    }
}

/// Produces unsigned split APKs for one device request.
#[async_trait]
pub trait SplitEngine: Send + Sync + 'static {
    async fn generate(
        &self,
        bundle: BundleSource,
        request: &SplitRequest,
    ) -> SplitResult<Vec<SplitApk>>;

    /// Engine name for logging.
    fn name(&self) -> &'static str;
}

/// Build the engine selected by configuration.
pub fn from_config(config: &EngineConfig) -> Arc<dyn SplitEngine> {
    match config {
        EngineConfig::Builtin => Arc::new(LayoutEngine::new()),
        EngineConfig::Command {
            program,
            args,
            timeout_secs,
        } => Arc::new(CommandEngine::new(
            program.clone(),
            args.clone(),
            Duration::from_secs(*timeout_secs),
        )),
    }
}
