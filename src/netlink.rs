//! Netlink forwarding plane.
//!
//! Programs subscriber `/32` routes into the Linux kernel via rtnetlink.
//! Routes are marked with a dedicated protocol number so that routes left
//! behind by a previous run can be identified and swept at startup.
//!
//! # Example
//!
//! ```no_run
//! # use rustbng::netlink::NetlinkPlane;
//! # use rustbng::IfaceConfig;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ifaces = vec![IfaceConfig {
//!     id: 10,
//!     link: "ge0.100".to_string(),
//!     flex_id: "cpe-10".to_string(),
//! }];
//!
//! let plane = NetlinkPlane::new(&ifaces).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::route::RouteProtocol;
use rtnetlink::Handle;

use crate::config::IfaceConfig;
use crate::forwarding::ForwardingPlane;
use crate::{Error, Result};

/// Protocol number used to mark routes installed by this daemon.
/// This allows identifying and cleaning up stale subscriber routes.
pub const BNG_RT_PROTO: u8 = 254;

#[derive(Debug)]
struct ResolvedIface {
    link_index: u32,
    flex_id: String,
}

/// Forwarding plane that installs subscriber routes into the kernel.
pub struct NetlinkPlane {
    handle: Handle,
    ifaces: HashMap<u32, ResolvedIface>,
}

impl NetlinkPlane {
    /// Connects to netlink, resolves every configured device, and sweeps
    /// subscriber routes left behind by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured device cannot be found; the caller
    /// treats this as fatal.
    pub async fn new(ifaces: &[IfaceConfig]) -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);

        let mut resolved = HashMap::new();
        for iface in ifaces {
            let link_index = Self::get_link_index(&handle, &iface.link).await?;
            resolved.insert(
                iface.id,
                ResolvedIface {
                    link_index,
                    flex_id: iface.flex_id.clone(),
                },
            );
        }

        let plane = Self {
            handle,
            ifaces: resolved,
        };

        plane.cleanup_stale_routes().await?;

        tracing::info!(ifaces = plane.ifaces.len(), "netlink forwarding plane ready");
        Ok(plane)
    }

    /// Gets the interface index for a link by name.
    async fn get_link_index(handle: &Handle, name: &str) -> Result<u32> {
        let mut links = handle.link().get().match_name(name.to_string()).execute();

        if let Some(link) = links.try_next().await.map_err(netlink_err)? {
            Ok(link.header.index)
        } else {
            Err(Error::Netlink(format!("cannot find device '{}'", name)))
        }
    }

    fn link_index(&self, iface: u32) -> Result<u32> {
        self.ifaces
            .get(&iface)
            .map(|i| i.link_index)
            .ok_or_else(|| Error::Netlink(format!("no configured interface with id {}", iface)))
    }

    /// Removes all subscriber routes marked with [`BNG_RT_PROTO`].
    pub async fn cleanup_stale_routes(&self) -> Result<()> {
        let mut routes = self.handle.route().get(rtnetlink::IpVersion::V4).execute();
        let mut to_delete = Vec::new();

        while let Some(route) = routes.try_next().await.map_err(netlink_err)? {
            if route.header.protocol == RouteProtocol::Other(BNG_RT_PROTO) {
                to_delete.push(route);
            }
        }

        for route in to_delete {
            tracing::debug!("removing stale subscriber route");
            if let Err(e) = self.handle.route().del(route).execute().await {
                tracing::warn!(error = %e, "failed to remove stale subscriber route");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ForwardingPlane for NetlinkPlane {
    async fn add_session(&self, address: Ipv4Addr, iface: u32) -> Result<()> {
        let link_index = self.link_index(iface)?;

        let result = self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(address, 32)
            .output_interface(link_index)
            .protocol(RouteProtocol::Other(BNG_RT_PROTO))
            .execute()
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(%address, iface, "subscriber route installed");
                Ok(())
            }
            Err(rtnetlink::Error::NetlinkError(ref msg))
                if msg.to_io().kind() == std::io::ErrorKind::AlreadyExists =>
            {
                tracing::debug!(%address, iface, "subscriber route already installed");
                Ok(())
            }
            Err(e) => Err(Error::Netlink(format!(
                "cannot add route to {}/32: {}",
                address, e
            ))),
        }
    }

    async fn remove_session(&self, address: Ipv4Addr, iface: u32) -> Result<()> {
        let mut routes = self.handle.route().get(rtnetlink::IpVersion::V4).execute();

        while let Some(route) = routes.try_next().await.map_err(netlink_err)? {
            let matches_protocol = route.header.protocol == RouteProtocol::Other(BNG_RT_PROTO);

            let matches_dest = route.attributes.iter().any(|attr| {
                use netlink_packet_route::route::{RouteAddress, RouteAttribute};
                if let RouteAttribute::Destination(RouteAddress::Inet(addr)) = attr {
                    *addr == address
                } else {
                    false
                }
            }) && route.header.destination_prefix_length == 32;

            if matches_protocol && matches_dest {
                self.handle.route().del(route).execute().await.map_err(|e| {
                    Error::Netlink(format!("cannot remove route to {}/32: {}", address, e))
                })?;
                tracing::debug!(%address, iface, "subscriber route removed");
                return Ok(());
            }
        }

        // Route not found is not an error
        tracing::debug!(%address, iface, "subscriber route not found (already removed?)");
        Ok(())
    }

    fn flex_id(&self, iface: u32) -> Option<String> {
        self.ifaces.get(&iface).map(|i| i.flex_id.clone())
    }

    async fn close(&self) -> Result<()> {
        // The netlink connection task ends when the handle is dropped.
        Ok(())
    }
}

fn netlink_err(e: rtnetlink::Error) -> Error {
    Error::Netlink(e.to_string())
}
