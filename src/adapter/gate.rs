//! Adapter gate - capability grants and radio state from the host

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Host capabilities required before the radio may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Basic radio use
    Use,
    /// Administrative control (power, settings)
    Admin,
    /// Opening connections to peers
    Connect,
}

/// Every grant a connection attempt needs
pub const REQUIRED_CAPABILITIES: [Capability; 3] =
    [Capability::Use, Capability::Admin, Capability::Connect];

/// Host permission subsystem
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    /// Whether a single capability is currently granted
    async fn check_grant(&self, capability: Capability) -> bool;

    /// Run the host's grant flow; may take arbitrarily long
    async fn request_grant(&self, capabilities: &[Capability]) -> HashMap<Capability, bool>;
}

/// Host radio enable flow
#[async_trait]
pub trait RadioHost: Send + Sync {
    async fn is_enabled(&self) -> bool;

    /// Ask the host to switch the radio on; true once enabled
    async fn request_enable(&self) -> bool;
}

/// Combines the host collaborators into the checks the manager needs
#[derive(Clone)]
pub struct AdapterGate {
    capabilities: Arc<dyn CapabilityHost>,
    radio: Arc<dyn RadioHost>,
}

impl AdapterGate {
    pub fn new(capabilities: Arc<dyn CapabilityHost>, radio: Arc<dyn RadioHost>) -> Self {
        Self {
            capabilities,
            radio,
        }
    }

    /// Build a gate from one value acting as both collaborators
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: CapabilityHost + RadioHost + 'static,
    {
        Self::new(host.clone(), host)
    }

    /// True only if every required capability is held
    pub async fn has_authorization(&self) -> bool {
        for capability in REQUIRED_CAPABILITIES {
            if !self.capabilities.check_grant(capability).await {
                debug!("[GATE] Missing capability {:?}", capability);
                return false;
            }
        }
        true
    }

    /// Run the host grant flow for all required capabilities
    ///
    /// A capability missing from the host's answer counts as denied.
    pub async fn request_authorization(&self) -> bool {
        info!("[GATE] Requesting capabilities {:?}", REQUIRED_CAPABILITIES);
        let answers = self
            .capabilities
            .request_grant(&REQUIRED_CAPABILITIES)
            .await;
        let granted = REQUIRED_CAPABILITIES
            .iter()
            .all(|c| answers.get(c).copied().unwrap_or(false));
        info!("[GATE] Capabilities granted: {}", granted);
        granted
    }

    pub async fn is_radio_enabled(&self) -> bool {
        self.radio.is_enabled().await
    }

    pub async fn request_radio_enable(&self) -> bool {
        info!("[GATE] Requesting radio enable");
        let enabled = self.radio.request_enable().await;
        info!("[GATE] Radio enabled: {}", enabled);
        enabled
    }
}

/// Host with fixed answers (used with the TCP simulation transport)
#[derive(Debug, Clone, Copy)]
pub struct StaticHost {
    pub granted: bool,
    pub radio_enabled: bool,
}

impl StaticHost {
    /// Everything granted, radio on
    pub fn ready() -> Self {
        Self {
            granted: true,
            radio_enabled: true,
        }
    }
}

#[async_trait]
impl CapabilityHost for StaticHost {
    async fn check_grant(&self, _capability: Capability) -> bool {
        self.granted
    }

    async fn request_grant(&self, capabilities: &[Capability]) -> HashMap<Capability, bool> {
        capabilities.iter().map(|&c| (c, self.granted)).collect()
    }
}

#[async_trait]
impl RadioHost for StaticHost {
    async fn is_enabled(&self) -> bool {
        self.radio_enabled
    }

    async fn request_enable(&self) -> bool {
        self.radio_enabled
    }
}
