// src/parser.rs
//! Five-tuple extraction from captured Ethernet frames.

use std::net::IpAddr;

use etherparse::{LinkSlice, NetSlice, SlicedPacket, TransportSlice, VlanSlice};
use thiserror::Error;

use crate::models::{FiveTuple, LayerPath, Transport};

/// Why a frame could not be turned into a flow key. None of these are
/// reported to the user; the packet is simply not counted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame could not be sliced")]
    Malformed,

    #[error("no network layer")]
    NoNetworkLayer,

    #[error("no transport layer")]
    NoTransportLayer,
}

/// Decode an Ethernet II frame into its five-tuple.
///
/// With `include_layers` set, the returned tuple also records every layer
/// below the transport header, so otherwise identical flows arriving with
/// different encapsulation are tracked separately.
pub fn extract_five_tuple(data: &[u8], include_layers: bool) -> Result<FiveTuple, DecodeError> {
    let sliced = SlicedPacket::from_ethernet(data).map_err(|_| DecodeError::Malformed)?;

    let (src, dst) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        None => return Err(DecodeError::NoNetworkLayer),
    };

    let (proto, sport, dport) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (Transport::Tcp, tcp.source_port(), tcp.destination_port()),
        Some(TransportSlice::Udp(udp)) => (Transport::Udp, udp.source_port(), udp.destination_port()),
        // ICMP carries no ports and is not a flow for fanout hashing purposes
        _ => return Err(DecodeError::NoTransportLayer),
    };

    let flow = FiveTuple::new(proto, src, sport, dst, dport);
    if include_layers {
        Ok(flow.with_layers(layer_path(&sliced)))
    } else {
        Ok(flow)
    }
}

fn layer_path(sliced: &SlicedPacket<'_>) -> LayerPath {
    let mut path = LayerPath::new();

    match &sliced.link {
        Some(LinkSlice::Ethernet2(_)) => path.push("Ethernet"),
        Some(_) => path.push("Link"),
        None => {}
    }

    match &sliced.vlan {
        Some(VlanSlice::SingleVlan(_)) => path.push("Dot1Q"),
        Some(VlanSlice::DoubleVlan(_)) => {
            path.push("Dot1Q");
            path.push("Dot1Q");
        }
        None => {}
    }

    match &sliced.net {
        Some(NetSlice::Ipv4(_)) => path.push("IPv4"),
        Some(NetSlice::Ipv6(_)) => path.push("IPv6"),
        None => {}
    }

    path
}
