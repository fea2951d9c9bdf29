//! Forwarding-plane adapter contract.
//!
//! The reconciliation loop drives the packet-processing engine through this
//! narrow interface. Session mutations must be idempotent: adding a route
//! that already exists and removing one that does not are both no-ops for a
//! conforming implementation.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::config::IfaceConfig;
use crate::Result;

/// Contract between the reconciliation loop and the packet-processing engine.
///
/// Connectivity is established by the implementation's constructor; a failure
/// there is fatal to the process.
#[async_trait]
pub trait ForwardingPlane: Send + Sync + 'static {
    /// Installs the subscriber route for `address` via `iface`. Idempotent.
    async fn add_session(&self, address: Ipv4Addr, iface: u32) -> Result<()>;

    /// Removes the subscriber route for `address` via `iface`. Removing a
    /// route that does not exist is a no-op, not an error.
    async fn remove_session(&self, address: Ipv4Addr, iface: u32) -> Result<()>;

    /// Returns the configured flex-id tag for an interface, used only for
    /// circuit-id query replies.
    fn flex_id(&self, iface: u32) -> Option<String>;

    /// Releases all resources, blocking until done.
    async fn close(&self) -> Result<()>;
}

/// Forwarding plane that only logs session mutations.
///
/// Used when the daemon is built without a real adapter; flex-ids are still
/// served from the configured interface table so query callouts get answered.
pub struct LoggingPlane {
    flex_ids: HashMap<u32, String>,
}

impl LoggingPlane {
    /// Creates a logging plane serving flex-ids from the interface table.
    pub fn new(ifaces: &[IfaceConfig]) -> Self {
        Self {
            flex_ids: ifaces
                .iter()
                .map(|i| (i.id, i.flex_id.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl ForwardingPlane for LoggingPlane {
    async fn add_session(&self, address: Ipv4Addr, iface: u32) -> Result<()> {
        tracing::info!(%address, iface, "add session (logging plane)");
        Ok(())
    }

    async fn remove_session(&self, address: Ipv4Addr, iface: u32) -> Result<()> {
        tracing::info!(%address, iface, "remove session (logging plane)");
        Ok(())
    }

    fn flex_id(&self, iface: u32) -> Option<String> {
        self.flex_ids.get(&iface).cloned()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
