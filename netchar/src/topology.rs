//! Topology shape parameters. The shape is supplied at model-construction
//! time by the operator or the simulator scenario, never auto-discovered.

use serde::{Deserialize, Serialize};
use structopt::StructOpt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("fat-tree arity must be even and positive, got k={0}")]
    BadArity(usize),
    #[error("torus dimensions must all be positive, got {0}")]
    BadTorusDims(String),
    #[error("dragonfly shape must be positive in every level, got {groups}x{routers}x{hosts}")]
    BadDragonflyShape {
        groups: usize,
        routers: usize,
        hosts: usize,
    },
    #[error("topology has no hosts")]
    NoHosts,
}

/// Topology kind and its shape parameters.
#[derive(Debug, Clone, StructOpt, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum TopoSpec {
    /// k-ary fat-tree: k pods of k/2 edge and k/2 aggregation switches, (k/2)^2 cores
    FatTree {
        /// Switch arity, must be even
        k: usize,
    },

    /// 2D torus with wrap-around links in both dimensions
    Torus2d {
        /// Extent of the first dimension
        x: usize,
        /// Extent of the second dimension
        y: usize,
    },

    /// 3D torus with wrap-around links in all dimensions
    Torus3d {
        /// Extent of the first dimension
        x: usize,
        /// Extent of the second dimension
        y: usize,
        /// Extent of the third dimension
        z: usize,
    },

    /// Dragonfly: all-to-all groups of routers, one global link per group pair
    Dragonfly {
        /// Number of groups
        groups: usize,
        /// Routers per group
        routers: usize,
        /// Hosts per router
        hosts: usize,
    },

    /// Flat mesh, every pair of hosts one hop apart
    Flat {
        /// Number of hosts
        nhosts: usize,
    },
}

impl TopoSpec {
    pub fn validate(&self) -> Result<(), TopologyError> {
        match *self {
            TopoSpec::FatTree { k } => {
                if k == 0 || k % 2 != 0 {
                    return Err(TopologyError::BadArity(k));
                }
            }
            TopoSpec::Torus2d { x, y } => {
                if x == 0 || y == 0 {
                    return Err(TopologyError::BadTorusDims(format!("{}x{}", x, y)));
                }
            }
            TopoSpec::Torus3d { x, y, z } => {
                if x == 0 || y == 0 || z == 0 {
                    return Err(TopologyError::BadTorusDims(format!("{}x{}x{}", x, y, z)));
                }
            }
            TopoSpec::Dragonfly {
                groups,
                routers,
                hosts,
            } => {
                if groups == 0 || routers == 0 || hosts == 0 {
                    return Err(TopologyError::BadDragonflyShape {
                        groups,
                        routers,
                        hosts,
                    });
                }
            }
            TopoSpec::Flat { nhosts } => {
                if nhosts == 0 {
                    return Err(TopologyError::NoHosts);
                }
            }
        }
        if self.num_hosts() == 0 {
            return Err(TopologyError::NoHosts);
        }
        Ok(())
    }

    /// Number of compute hosts, i.e. the world size of the process group.
    pub fn num_hosts(&self) -> usize {
        match *self {
            TopoSpec::FatTree { k } => k * (k / 2) * (k / 2),
            TopoSpec::Torus2d { x, y } => x * y,
            TopoSpec::Torus3d { x, y, z } => x * y * z,
            TopoSpec::Dragonfly {
                groups,
                routers,
                hosts,
            } => groups * routers * hosts,
            TopoSpec::Flat { nhosts } => nhosts,
        }
    }
}

impl std::fmt::Display for TopoSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TopoSpec::FatTree { k } => write!(f, "fattree_{}", k),
            TopoSpec::Torus2d { x, y } => write!(f, "torus2d_{}x{}", x, y),
            TopoSpec::Torus3d { x, y, z } => write!(f, "torus3d_{}x{}x{}", x, y, z),
            TopoSpec::Dragonfly {
                groups,
                routers,
                hosts,
            } => write!(f, "dragonfly_{}x{}x{}", groups, routers, hosts),
            TopoSpec::Flat { nhosts } => write!(f, "flat_{}", nhosts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_counts() {
        assert_eq!(TopoSpec::FatTree { k: 4 }.num_hosts(), 16);
        assert_eq!(TopoSpec::Torus2d { x: 4, y: 4 }.num_hosts(), 16);
        assert_eq!(TopoSpec::Torus3d { x: 2, y: 3, z: 4 }.num_hosts(), 24);
        assert_eq!(
            TopoSpec::Dragonfly {
                groups: 3,
                routers: 4,
                hosts: 2
            }
            .num_hosts(),
            24
        );
        assert_eq!(TopoSpec::Flat { nhosts: 7 }.num_hosts(), 7);
    }

    #[test]
    fn odd_arity_rejected() {
        assert_eq!(
            TopoSpec::FatTree { k: 3 }.validate(),
            Err(TopologyError::BadArity(3))
        );
        assert_eq!(
            TopoSpec::FatTree { k: 0 }.validate(),
            Err(TopologyError::BadArity(0))
        );
        assert!(TopoSpec::FatTree { k: 4 }.validate().is_ok());
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(TopoSpec::Torus2d { x: 0, y: 4 }.validate().is_err());
        assert!(TopoSpec::Torus3d { x: 2, y: 2, z: 0 }.validate().is_err());
        assert!(TopoSpec::Flat { nhosts: 0 }.validate().is_err());
        assert!(TopoSpec::Dragonfly {
            groups: 2,
            routers: 0,
            hosts: 1
        }
        .validate()
        .is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(TopoSpec::FatTree { k: 4 }.to_string(), "fattree_4");
        assert_eq!(
            TopoSpec::Torus2d { x: 4, y: 4 }.to_string(),
            "torus2d_4x4"
        );
    }
}
