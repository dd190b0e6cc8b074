//! Adjacency constructors.
//!
//! Each constructor maps node vectors `(B, N, D)` and an optional
//! [`NodeMask`] to a non-negative `(B, N, N)` interaction matrix:
//!
//! | key | constructor | symmetric |
//! |-----|-------------|-----------|
//! | `identity`, `eye` | [`ConstantAdjacency`] self-loops | yes |
//! | `ones`, `constant` | [`ConstantAdjacency`] complete graph | yes |
//! | `chain` | [`ConstantAdjacency`] previous/next neighbours | yes |
//! | `learned` | [`LearnedAdjacency`] | when configured |
//! | `physics` | [`PhysicsAdjacency`] | yes |
//! | `hybrid` | [`HybridAdjacency`] | no |
//!
//! Whatever the variant, rows and columns belonging to padding nodes are
//! exactly zero in the output.

mod constant;
mod hybrid;
mod learned;
mod matrix_activation;
mod physics;

use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::batch::NodeMask;
use crate::config::NmpConfig;
use crate::error::{ComponentKind, Error, Result};

pub use constant::{ConstantAdjacency, ConstantKind};
pub use hybrid::HybridAdjacency;
pub use learned::{DistanceKind, LearnedAdjacency};
pub use matrix_activation::{masked_softmax, MatrixActivation};
pub use physics::PhysicsAdjacency;

/// Computes a pairwise interaction matrix for a batch of graphs.
pub trait AdjacencyMatrix {
    /// `nodes`: `(B, N, D)`; returns `(B, N, N)`.
    ///
    /// Without a mask every node is valid.
    fn compute(&self, nodes: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor>;
}

/// Adjacency family named by a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacencyKind {
    Identity,
    Ones,
    Chain,
    Learned,
    Physics,
    Hybrid,
}

impl FromStr for AdjacencyKind {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "identity" | "eye" => Ok(AdjacencyKind::Identity),
            "ones" | "one" | "constant" => Ok(AdjacencyKind::Ones),
            "chain" => Ok(AdjacencyKind::Chain),
            "learned" => Ok(AdjacencyKind::Learned),
            "physics" | "phy" => Ok(AdjacencyKind::Physics),
            "hybrid" | "phy-learned" => Ok(AdjacencyKind::Hybrid),
            other => Err(Error::unknown(ComponentKind::Adjacency, other)),
        }
    }
}

impl fmt::Display for AdjacencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdjacencyKind::Identity => "identity",
            AdjacencyKind::Ones => "ones",
            AdjacencyKind::Chain => "chain",
            AdjacencyKind::Learned => "learned",
            AdjacencyKind::Physics => "physics",
            AdjacencyKind::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Any adjacency constructor.
#[derive(Debug, Clone)]
pub enum Adjacency {
    Constant(ConstantAdjacency),
    Learned(LearnedAdjacency),
    Physics(PhysicsAdjacency),
    Hybrid(HybridAdjacency),
}

impl Adjacency {
    /// Build the constructor named by `key`.
    ///
    /// `dim_in` is the width of the vectors the constructor will see: raw
    /// features on the fixed schedule, hidden states on the dynamic one.
    pub fn from_key(key: &str, dim_in: usize, config: &NmpConfig, vb: VarBuilder) -> Result<Self> {
        let adjacency = match key.parse::<AdjacencyKind>()? {
            AdjacencyKind::Identity => {
                Adjacency::Constant(ConstantAdjacency::new(ConstantKind::Identity))
            }
            AdjacencyKind::Ones => Adjacency::Constant(ConstantAdjacency::new(ConstantKind::Ones)),
            AdjacencyKind::Chain => Adjacency::Constant(ConstantAdjacency::new(ConstantKind::Chain)),
            AdjacencyKind::Learned => {
                Adjacency::Learned(LearnedAdjacency::new(dim_in, &config.learned, vb)?)
            }
            AdjacencyKind::Physics => {
                Adjacency::Physics(PhysicsAdjacency::new(&config.physics, vb)?)
            }
            AdjacencyKind::Hybrid => Adjacency::Hybrid(HybridAdjacency::new(
                dim_in,
                &config.hybrid,
                &config.learned,
                &config.physics,
                vb,
            )?),
        };
        Ok(adjacency)
    }

    pub fn kind(&self) -> AdjacencyKind {
        match self {
            Adjacency::Constant(c) => match c.kind() {
                ConstantKind::Identity => AdjacencyKind::Identity,
                ConstantKind::Ones => AdjacencyKind::Ones,
                ConstantKind::Chain => AdjacencyKind::Chain,
            },
            Adjacency::Learned(_) => AdjacencyKind::Learned,
            Adjacency::Physics(_) => AdjacencyKind::Physics,
            Adjacency::Hybrid(_) => AdjacencyKind::Hybrid,
        }
    }
}

impl AdjacencyMatrix for Adjacency {
    fn compute(&self, nodes: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        match self {
            Adjacency::Constant(adj) => adj.compute(nodes, mask),
            Adjacency::Learned(adj) => adj.compute(nodes, mask),
            Adjacency::Physics(adj) => adj.compute(nodes, mask),
            Adjacency::Hybrid(adj) => adj.compute(nodes, mask),
        }
    }
}
