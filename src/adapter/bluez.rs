//! BlueZ host collaborators
//!
//! BlueZ has no interactive permission prompt: access to the adapter is
//! governed by D-Bus policy. A capability therefore counts as granted when a
//! session and the default adapter can be obtained.

use super::gate::{Capability, CapabilityHost, RadioHost};
use anyhow::Result;
use async_trait::async_trait;
use bluer::Adapter;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Capability and radio host backed by the default BlueZ adapter
pub struct BluezHost {
    /// Cached adapter from the last successful session
    adapter: Mutex<Option<Adapter>>,
}

impl BluezHost {
    pub fn new() -> Self {
        Self {
            adapter: Mutex::new(None),
        }
    }

    /// Get the default Bluetooth adapter, opening a session if needed
    async fn adapter(&self) -> Result<Adapter> {
        let mut cached = self.adapter.lock().await;
        if let Some(adapter) = cached.as_ref() {
            return Ok(adapter.clone());
        }

        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("[BT] Using adapter {}", adapter.name());
        *cached = Some(adapter.clone());
        Ok(adapter)
    }

    async fn forget_adapter(&self) {
        *self.adapter.lock().await = None;
    }
}

impl Default for BluezHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHost for BluezHost {
    async fn check_grant(&self, _capability: Capability) -> bool {
        self.adapter().await.is_ok()
    }

    async fn request_grant(&self, capabilities: &[Capability]) -> HashMap<Capability, bool> {
        // Drop a stale adapter so the request really retries the session
        self.forget_adapter().await;
        let granted = match self.adapter().await {
            Ok(_) => true,
            Err(e) => {
                warn!("[BT] BlueZ adapter unavailable: {}", e);
                false
            }
        };
        capabilities.iter().map(|&c| (c, granted)).collect()
    }
}

#[async_trait]
impl RadioHost for BluezHost {
    async fn is_enabled(&self) -> bool {
        match self.adapter().await {
            Ok(adapter) => adapter.is_powered().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn request_enable(&self) -> bool {
        let adapter = match self.adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("[BT] Cannot power adapter: {}", e);
                return false;
            }
        };

        if let Err(e) = adapter.set_powered(true).await {
            warn!("[BT] Powering {} failed: {}", adapter.name(), e);
            return false;
        }
        adapter.is_powered().await.unwrap_or(false)
    }
}
