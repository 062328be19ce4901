//! Flow identity types shared by the capture workers and the aggregator.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// 1-based identity of a capture worker.
pub type WorkerId = u16;

/// Transport protocols a flow can be keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("TCP"),
            Transport::Udp => f.write_str("UDP"),
        }
    }
}

/// Ordered names of the layers a packet carried below its transport header,
/// e.g. `Ethernet/Dot1Q/IPv4`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerPath(Vec<&'static str>);

impl LayerPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: &'static str) {
        self.0.push(layer);
    }

    pub fn layers(&self) -> &[&'static str] {
        &self.0
    }
}

impl From<Vec<&'static str>> for LayerPath {
    fn from(layers: Vec<&'static str>) -> Self {
        Self(layers)
    }
}

impl fmt::Display for LayerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// One direction of a flow. Equality covers every field, layers included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub proto: Transport,
    pub src: IpAddr,
    pub sport: u16,
    pub dst: IpAddr,
    pub dport: u16,
    pub layers: Option<LayerPath>,
}

impl FiveTuple {
    pub fn new(proto: Transport, src: IpAddr, sport: u16, dst: IpAddr, dport: u16) -> Self {
        Self {
            proto,
            src,
            sport,
            dst,
            dport,
            layers: None,
        }
    }

    pub fn with_layers(mut self, layers: LayerPath) -> Self {
        self.layers = Some(layers);
        self
    }

    /// The same flow seen from the other end. Layers are carried over as-is.
    pub fn reverse(&self) -> FiveTuple {
        FiveTuple {
            proto: self.proto,
            src: self.dst,
            sport: self.dport,
            dst: self.src,
            dport: self.sport,
            layers: self.layers.clone(),
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.proto,
            SocketAddr::new(self.src, self.sport),
            SocketAddr::new(self.dst, self.dport)
        )?;
        if let Some(layers) = &self.layers {
            write!(f, " [{}]", layers)?;
        }
        Ok(())
    }
}

/// A flow as seen by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub worker: WorkerId,
    pub flow: FiveTuple,
}

impl Observation {
    pub fn new(worker: WorkerId, flow: FiveTuple) -> Self {
        Self { worker, flow }
    }
}
