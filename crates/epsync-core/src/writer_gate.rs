//! Active-node check
//!
//! Only the active member of a sync-failover group may change shared
//! configuration. A stand-alone device is always the writer.

use tracing::{debug, warn};

use crate::traits::DeviceClient;

/// Substring of the failover status reported by an active member
pub const ACTIVE_MARKER: &str = "status ACTIVE";

/// Decides whether this node may write configuration
pub struct WriterGate<'a> {
    device: &'a dyn DeviceClient,
    ha_enabled: bool,
}

impl<'a> WriterGate<'a> {
    pub fn new(device: &'a dyn DeviceClient, ha_enabled: bool) -> Self {
        Self { device, ha_enabled }
    }

    /// Whether this node is the writer
    ///
    /// Fails closed: if the status probe fails, the node is not the writer.
    pub async fn is_writer(&self) -> bool {
        if !self.ha_enabled {
            debug!("Stand-alone device, writer by definition");
            return true;
        }

        match self.device.failover_status().await {
            Ok(status) => {
                let active = status.contains(ACTIVE_MARKER);
                debug!("Failover status reports active={}", active);
                active
            }
            Err(e) => {
                warn!("Failover status probe failed ({}), treating node as standby", e);
                false
            }
        }
    }
}
