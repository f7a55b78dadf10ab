//! Network-characteristics model: topology shape, process placement,
//! per-tier link bandwidth and latency, and the derived quantities the
//! collective optimizer consumes. Built once per process group and
//! immutable afterwards except for recorded measurements.

pub mod bandwidth;
pub mod model;
pub mod topology;

pub use bandwidth::{Bandwidth, BandwidthTrait};
pub use model::{Coord, LinkTiers, NetworkModel, Tier, TopologyKind};
pub use topology::{TopoSpec, TopologyError};
