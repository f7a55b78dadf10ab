//! The network model proper: placement, hop distances, link tiers and the
//! derived scalars feeding algorithm selection. Distance and placement are
//! computed per topology variant after a single kind check; there is no
//! dynamic dispatch on the hot path.

use log::warn;

use crate::bandwidth::{Bandwidth, BandwidthTrait};
use crate::topology::{TopoSpec, TopologyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    FatTree,
    Torus2d,
    Torus3d,
    Dragonfly,
    Flat,
}

/// Topology-specific location of a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coord {
    FatTree { pod: usize, edge: usize, slot: usize },
    Torus2d { x: usize, y: usize },
    Torus3d { x: usize, y: usize, z: usize },
    Dragonfly { group: usize, router: usize, host: usize },
    Flat { host: usize },
}

/// The three levels of the link hierarchy, innermost first. Fat-tree:
/// compute-edge / edge-agg / agg-core. Torus: dimension links / wraparound
/// links / unused. Dragonfly: intra-router / intra-group / global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Edge = 0,
    Aggregation = 1,
    Core = 2,
}

pub const ALL_TIERS: [Tier; 3] = [Tier::Edge, Tier::Aggregation, Tier::Core];

/// Per-tier bandwidth and latency. Measured samples that break the tier
/// monotonicity invariant are recorded as-is and the tier flagged.
#[derive(Debug, Clone)]
pub struct LinkTiers {
    bandwidth: [Bandwidth; 3],
    latency_us: [f64; 3],
    flagged: [bool; 3],
}

impl LinkTiers {
    fn defaults(kind: TopologyKind) -> Self {
        let bandwidth = match kind {
            TopologyKind::FatTree => [10.gbps(), 40.gbps(), 40.gbps()],
            TopologyKind::Torus2d | TopologyKind::Torus3d => {
                [10.gbps(), 10.gbps(), 10.gbps()]
            }
            TopologyKind::Dragonfly => [10.gbps(), 40.gbps(), 40.gbps()],
            TopologyKind::Flat => [10.gbps(), 10.gbps(), 10.gbps()],
        };
        LinkTiers {
            bandwidth,
            latency_us: [1.0, 2.0, 5.0],
            flagged: [false; 3],
        }
    }

    #[inline]
    pub fn bandwidth(&self, tier: Tier) -> Bandwidth {
        self.bandwidth[tier as usize]
    }

    #[inline]
    pub fn latency_us(&self, tier: Tier) -> f64 {
        self.latency_us[tier as usize]
    }

    #[inline]
    pub fn low_confidence(&self, tier: Tier) -> bool {
        self.flagged[tier as usize]
    }

    pub fn flag(&mut self, tier: Tier) {
        self.flagged[tier as usize] = true;
    }

    /// Record a measured sample for one tier. The value is kept even when
    /// it violates monotonicity; the offending tier is flagged instead.
    pub fn record_measured(
        &mut self,
        tier: Tier,
        bandwidth: Option<Bandwidth>,
        latency_us: Option<f64>,
    ) {
        if let Some(bw) = bandwidth {
            self.bandwidth[tier as usize] = bw;
        }
        if let Some(lat) = latency_us {
            self.latency_us[tier as usize] = lat;
        }
        self.check_monotone();
    }

    // Outer tiers are no faster per-hop than inner ones.
    fn check_monotone(&mut self) {
        for w in 0..2 {
            if self.latency_us[w + 1] < self.latency_us[w] {
                warn!(
                    "tier latency not monotone: {:?} {} us < {:?} {} us",
                    ALL_TIERS[w + 1],
                    self.latency_us[w + 1],
                    ALL_TIERS[w],
                    self.latency_us[w],
                );
                self.flagged[w + 1] = true;
            }
        }
    }
}

/// The network characteristics of one process group.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    spec: TopoSpec,
    kind: TopologyKind,
    world: usize,
    placement: Vec<Coord>,
    tiers: LinkTiers,
}

impl NetworkModel {
    pub fn new(spec: TopoSpec) -> Result<Self, TopologyError> {
        spec.validate()?;
        let world = spec.num_hosts();
        let kind = match spec {
            TopoSpec::FatTree { .. } => TopologyKind::FatTree,
            TopoSpec::Torus2d { .. } => TopologyKind::Torus2d,
            TopoSpec::Torus3d { .. } => TopologyKind::Torus3d,
            TopoSpec::Dragonfly { .. } => TopologyKind::Dragonfly,
            TopoSpec::Flat { .. } => TopologyKind::Flat,
        };
        let placement = (0..world).map(|r| Self::coord_of(&spec, r)).collect();
        Ok(NetworkModel {
            tiers: LinkTiers::defaults(kind),
            spec,
            kind,
            world,
            placement,
        })
    }

    fn coord_of(spec: &TopoSpec, rank: usize) -> Coord {
        match *spec {
            TopoSpec::FatTree { k } => {
                let half = k / 2;
                Coord::FatTree {
                    pod: rank / (half * half),
                    edge: rank / half % half,
                    slot: rank % half,
                }
            }
            TopoSpec::Torus2d { y, .. } => Coord::Torus2d {
                x: rank / y,
                y: rank % y,
            },
            TopoSpec::Torus3d { y, z, .. } => Coord::Torus3d {
                x: rank / (y * z),
                y: rank / z % y,
                z: rank % z,
            },
            TopoSpec::Dragonfly { routers, hosts, .. } => Coord::Dragonfly {
                group: rank / (routers * hosts),
                router: rank / hosts % routers,
                host: rank % hosts,
            },
            TopoSpec::Flat { .. } => Coord::Flat { host: rank },
        }
    }

    #[inline]
    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    #[inline]
    pub fn spec(&self) -> &TopoSpec {
        &self.spec
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.world
    }

    #[inline]
    pub fn placement(&self, rank: usize) -> Coord {
        self.placement[rank]
    }

    #[inline]
    pub fn tiers(&self) -> &LinkTiers {
        &self.tiers
    }

    pub fn record_tier_measurement(
        &mut self,
        tier: Tier,
        bandwidth: Option<Bandwidth>,
        latency_us: Option<f64>,
        low_confidence: bool,
    ) {
        self.tiers.record_measured(tier, bandwidth, latency_us);
        if low_confidence {
            self.tiers.flag(tier);
        }
    }

    /// Hop count between two ranks under the topology's routing.
    pub fn distance(&self, a: usize, b: usize) -> usize {
        if a == b {
            return 0;
        }
        match (self.placement[a], self.placement[b]) {
            (
                Coord::FatTree {
                    pod: pa, edge: ea, ..
                },
                Coord::FatTree {
                    pod: pb, edge: eb, ..
                },
            ) => {
                if pa == pb && ea == eb {
                    2
                } else if pa == pb {
                    4
                } else {
                    6
                }
            }
            (Coord::Torus2d { x: xa, y: ya }, Coord::Torus2d { x: xb, y: yb }) => {
                let (dx, dy) = match self.spec {
                    TopoSpec::Torus2d { x, y } => (x, y),
                    _ => unreachable!(),
                };
                wrap_dist(xa, xb, dx) + wrap_dist(ya, yb, dy)
            }
            (
                Coord::Torus3d {
                    x: xa,
                    y: ya,
                    z: za,
                },
                Coord::Torus3d {
                    x: xb,
                    y: yb,
                    z: zb,
                },
            ) => {
                let (dx, dy, dz) = match self.spec {
                    TopoSpec::Torus3d { x, y, z } => (x, y, z),
                    _ => unreachable!(),
                };
                wrap_dist(xa, xb, dx) + wrap_dist(ya, yb, dy) + wrap_dist(za, zb, dz)
            }
            (
                Coord::Dragonfly {
                    group: ga,
                    router: ra,
                    ..
                },
                Coord::Dragonfly {
                    group: gb,
                    router: rb,
                    ..
                },
            ) => {
                if ga == gb && ra == rb {
                    1
                } else if ga == gb {
                    2
                } else {
                    3
                }
            }
            (Coord::Flat { .. }, Coord::Flat { .. }) => 1,
            _ => unreachable!("placement variants always match the model kind"),
        }
    }

    /// Outermost tier a message between two ranks crosses, None for a == b.
    pub fn path_tier(&self, a: usize, b: usize) -> Option<Tier> {
        if a == b {
            return None;
        }
        let tier = match (self.placement[a], self.placement[b]) {
            (Coord::FatTree { .. }, Coord::FatTree { .. }) => match self.distance(a, b) {
                2 => Tier::Edge,
                4 => Tier::Aggregation,
                _ => Tier::Core,
            },
            (Coord::Torus2d { x: xa, y: ya }, Coord::Torus2d { x: xb, y: yb }) => {
                let (dx, dy) = match self.spec {
                    TopoSpec::Torus2d { x, y } => (x, y),
                    _ => unreachable!(),
                };
                if uses_wrap(xa, xb, dx) || uses_wrap(ya, yb, dy) {
                    Tier::Aggregation
                } else {
                    Tier::Edge
                }
            }
            (
                Coord::Torus3d {
                    x: xa,
                    y: ya,
                    z: za,
                },
                Coord::Torus3d {
                    x: xb,
                    y: yb,
                    z: zb,
                },
            ) => {
                let (dx, dy, dz) = match self.spec {
                    TopoSpec::Torus3d { x, y, z } => (x, y, z),
                    _ => unreachable!(),
                };
                if uses_wrap(xa, xb, dx) || uses_wrap(ya, yb, dy) || uses_wrap(za, zb, dz) {
                    Tier::Aggregation
                } else {
                    Tier::Edge
                }
            }
            (Coord::Dragonfly { .. }, Coord::Dragonfly { .. }) => match self.distance(a, b) {
                1 => Tier::Edge,
                2 => Tier::Aggregation,
                _ => Tier::Core,
            },
            _ => Tier::Edge,
        };
        Some(tier)
    }

    /// Per-message latency between two ranks, in microseconds.
    pub fn latency_us(&self, a: usize, b: usize) -> f64 {
        match self.path_tier(a, b) {
            Some(tier) => self.tiers.latency_us(tier),
            None => 0.0,
        }
    }

    /// Largest hop count between any two ranks.
    pub fn diameter(&self) -> usize {
        match self.spec {
            TopoSpec::FatTree { k } => {
                if self.world <= k / 2 {
                    2
                } else if self.world <= k / 2 * (k / 2) {
                    4
                } else {
                    6
                }
            }
            TopoSpec::Torus2d { x, y } => x / 2 + y / 2,
            TopoSpec::Torus3d { x, y, z } => x / 2 + y / 2 + z / 2,
            TopoSpec::Dragonfly { groups, .. } => {
                if groups > 1 {
                    3
                } else {
                    2
                }
            }
            TopoSpec::Flat { .. } => 1,
        }
    }

    /// Whether the topology exposes a long linear structure worth
    /// streaming a pipeline along.
    pub fn has_linear_structure(&self) -> bool {
        matches!(self.kind, TopologyKind::Torus2d | TopologyKind::Torus3d)
    }

    /// Minimum aggregate bandwidth across any cut splitting the machine in
    /// half.
    pub fn bisection_bandwidth(&self) -> Bandwidth {
        match self.spec {
            // rearrangeably non-blocking: every host can cross the cut
            TopoSpec::FatTree { .. } => {
                self.tiers.bandwidth(Tier::Edge) * (self.world / 2)
            }
            TopoSpec::Torus2d { x, y } => {
                let bw = self.tiers.bandwidth(Tier::Edge);
                let cut_x = bw * (2 * y);
                let cut_y = bw * (2 * x);
                cut_x.min(cut_y)
            }
            TopoSpec::Torus3d { x, y, z } => {
                let bw = self.tiers.bandwidth(Tier::Edge);
                let cut_x = bw * (2 * y * z);
                let cut_y = bw * (2 * x * z);
                let cut_z = bw * (2 * x * y);
                cut_x.min(cut_y).min(cut_z)
            }
            TopoSpec::Dragonfly { groups, .. } => {
                // one global link per group pair crosses the cut
                self.tiers.bandwidth(Tier::Core) * ((groups / 2) * (groups - groups / 2))
            }
            TopoSpec::Flat { nhosts } => {
                self.tiers.bandwidth(Tier::Edge) * ((nhosts / 2) * (nhosts - nhosts / 2))
            }
        }
    }

    /// Per-message latency of the innermost tier, in seconds. The alpha of
    /// the alpha/beta cost model.
    #[inline]
    pub fn alpha_secs(&self) -> f64 {
        self.tiers.latency_us(Tier::Edge) * 1e-6
    }

    /// Inverse bandwidth of the innermost tier, in seconds per byte. The
    /// beta of the alpha/beta cost model.
    #[inline]
    pub fn beta_secs_per_byte(&self) -> f64 {
        self.tiers.bandwidth(Tier::Edge).secs_per_byte()
    }
}

#[inline]
fn wrap_dist(a: usize, b: usize, extent: usize) -> usize {
    let d = if a > b { a - b } else { b - a };
    d.min(extent - d)
}

#[inline]
fn uses_wrap(a: usize, b: usize, extent: usize) -> bool {
    let d = if a > b { a - b } else { b - a };
    extent - d < d
}
