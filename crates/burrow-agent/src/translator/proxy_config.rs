//! Reverse-proxy dynamic configuration
//!
//! The control plane renders the router configuration; this module pulls it
//! and writes it where the reverse proxy watches for changes. The file is
//! only rewritten when the content differs, and always via a temporary file
//! and a rename so the proxy never reads a partial document.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use burrow_core::GatewayError;

use crate::remote::{log_remote_failure, HybridClient};

/// Something that can regenerate the reverse-proxy configuration
#[async_trait]
pub trait ProxyConfigReloader: Send + Sync {
    async fn reload(&self) -> anyhow::Result<()>;
}

/// Where the rendered configuration comes from
#[async_trait]
pub trait ProxyConfigSource: Send + Sync {
    async fn fetch_proxy_config(&self) -> Result<String, GatewayError>;
}

#[async_trait]
impl ProxyConfigSource for HybridClient {
    async fn fetch_proxy_config(&self) -> Result<String, GatewayError> {
        HybridClient::fetch_proxy_config(self).await
    }
}

pub struct ProxyConfigManager {
    source: Arc<dyn ProxyConfigSource>,
    path: PathBuf,
    // serializes reloads from the monitor and from control messages
    last_written: Mutex<Option<String>>,
}

impl ProxyConfigManager {
    pub fn new(source: Arc<dyn ProxyConfigSource>, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
            last_written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch and write the configuration. Returns whether the file changed.
    pub async fn refresh(&self) -> anyhow::Result<bool> {
        let mut last_written = self.last_written.lock().await;

        let content = self.source.fetch_proxy_config().await?;
        if last_written.as_deref() == Some(content.as_str()) {
            return Ok(false);
        }

        // the file may have been written by an earlier run
        if last_written.is_none() {
            if let Ok(existing) = tokio::fs::read_to_string(&self.path).await {
                if existing == content {
                    *last_written = Some(content);
                    return Ok(false);
                }
            }
        }

        write_atomically(&self.path, &content).await?;
        tracing::info!("Updated reverse proxy configuration at {}", self.path.display());
        *last_written = Some(content);
        Ok(true)
    }

    /// Refresh every `interval` until `cancel` fires
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = manager.refresh().await {
                    match e.downcast_ref::<GatewayError>() {
                        Some(remote) => log_remote_failure("Failed to fetch reverse proxy configuration", remote),
                        None => tracing::warn!("Failed to update reverse proxy configuration: {:#}", e),
                    }
                }
            }

            tracing::debug!("Reverse proxy config monitor stopped");
        })
    }
}

#[async_trait]
impl ProxyConfigReloader for ProxyConfigManager {
    async fn reload(&self) -> anyhow::Result<()> {
        self.refresh().await.map(|_| ())
    }
}

async fn write_atomically(path: &Path, content: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {:?} into place", tmp))?;
    Ok(())
}
