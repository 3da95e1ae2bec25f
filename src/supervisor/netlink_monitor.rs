// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Netlink-based interface and route change monitoring
//!
//! Subscribes to the link, IPv4 address and IPv4 route multicast groups.
//! Link and address notifications only tell the event loop to re-read the
//! interface list; route notifications are translated into
//! [`ZebraEvent::RouteAdd`] / [`ZebraEvent::RouteDelete`] directly.
//!
//! ```ignore
//! let handle = spawn_netlink_monitor(event_tx.clone(), logger.clone());
//! // On shutdown:
//! handle.abort();
//! ```

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use futures::stream::{StreamExt, TryStreamExt};
use ipnetwork::Ipv4Network;
use netlink_packet_core::NetlinkPayload;
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage, RouteType};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{AsyncSocket, SocketAddr};
use tokio::sync::mpsc;

use crate::logging::{Facility, Logger};
use crate::protocols::rib::{Route, RouteOrigin};
use crate::protocols::ProtocolEvent;
use crate::zebra::ZebraEvent;
use crate::{log_debug, log_info, log_warning};

/// Main routing table id
const RT_TABLE_MAIN: u32 = 254;

/// Spawn a background task feeding kernel link, address and route changes
/// into the event loop.
pub fn spawn_netlink_monitor(
    event_tx: mpsc::Sender<ProtocolEvent>,
    logger: Logger,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_netlink_monitor(&event_tx, &logger).await {
            log_warning!(
                logger,
                Facility::Zebra,
                "netlink monitor exited with error: {:#}",
                e
            );
        }
    })
}

async fn run_netlink_monitor(event_tx: &mpsc::Sender<ProtocolEvent>, logger: &Logger) -> Result<()> {
    let (mut connection, handle, mut messages) =
        rtnetlink::new_connection().context("failed to open netlink connection")?;

    let groups = rtnetlink::constants::RTMGRP_LINK
        | rtnetlink::constants::RTMGRP_IPV4_IFADDR
        | rtnetlink::constants::RTMGRP_IPV4_ROUTE;
    connection
        .socket_mut()
        .socket_mut()
        .bind(&SocketAddr::new(0, groups))
        .context("failed to bind netlink socket")?;

    tokio::spawn(connection);

    // Routes present before we subscribed
    let mut dump = Box::pin(handle.route().get(rtnetlink::IpVersion::V4).execute());
    let mut dumped = 0usize;
    while let Some(message) = dump.try_next().await.context("route dump failed")? {
        if let Some(route) = route_from_message(&message) {
            dumped += 1;
            if event_tx
                .send(ProtocolEvent::Zebra(ZebraEvent::RouteAdd(route)))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }

    log_info!(
        logger,
        Facility::Zebra,
        "netlink monitor started, {} routes loaded",
        dumped
    );

    while let Some((message, _)) = messages.next().await {
        let event = match message.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link))
            | NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)) => {
                log_debug!(
                    logger,
                    Facility::Zebra,
                    "netlink: link {} changed",
                    link.header.index
                );
                Some(ProtocolEvent::InterfacesChanged)
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(addr))
            | NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelAddress(addr)) => {
                log_debug!(
                    logger,
                    Facility::Zebra,
                    "netlink: address changed on link {}",
                    addr.header.index
                );
                Some(ProtocolEvent::InterfacesChanged)
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
                route_from_message(&route).map(|r| ProtocolEvent::Zebra(ZebraEvent::RouteAdd(r)))
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelRoute(route)) => {
                route_from_message(&route)
                    .map(|r| ProtocolEvent::Zebra(ZebraEvent::RouteDelete(r)))
            }
            _ => None,
        };

        if let Some(event) = event {
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    }

    log_info!(logger, Facility::Zebra, "netlink monitor stopped");
    Ok(())
}

/// Translate a main-table IPv4 unicast route. Routes without an output
/// interface (blackhole, multipath without a primary hop) are skipped.
pub(crate) fn route_from_message(message: &RouteMessage) -> Option<Route> {
    let header = &message.header;
    if header.address_family != AddressFamily::Inet || header.kind != RouteType::Unicast {
        return None;
    }

    let mut table = u32::from(header.table);
    let mut destination = Ipv4Addr::UNSPECIFIED;
    let mut gateway = Ipv4Addr::UNSPECIFIED;
    let mut oif = None;
    for attr in &message.attributes {
        match attr {
            RouteAttribute::Table(t) => table = *t,
            RouteAttribute::Destination(RouteAddress::Inet(addr)) => destination = *addr,
            RouteAttribute::Gateway(RouteAddress::Inet(addr)) => gateway = *addr,
            RouteAttribute::Oif(index) => oif = Some(*index),
            _ => {}
        }
    }
    if table != RT_TABLE_MAIN {
        return None;
    }

    let prefix = Ipv4Network::new(destination, header.destination_prefix_length).ok()?;
    Some(Route::new(prefix, gateway, oif?, RouteOrigin::Kernel))
}
