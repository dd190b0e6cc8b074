//! Learned pairwise-similarity adjacency.
//!
//! Nodes are (optionally) projected into a comparison space and scored by
//! a negative distance:
//!
//! ```text
//! q_i = W_q x_i        k_j = W_k x_j        (W_q = W_k when symmetric)
//! s_ij = -d(q_i, k_j) / T
//! A = act(s)           act in {exp, masked row softmax}
//! ```
//!
//! With `symmetric` the scores are averaged with their transpose before
//! the activation, so `A[b,i,j] == A[b,j,i]` holds bit for bit.

use std::str::FromStr;

use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::batch::NodeMask;
use crate::config::LearnedConfig;
use crate::error::{ComponentKind, Error, Result};

use super::matrix_activation::MatrixActivation;
use super::AdjacencyMatrix;

/// Keeps the norm differentiable at zero distance.
const NORM_EPS: f64 = 1e-8;

/// Pairwise distance used for the raw score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceKind {
    /// `|q_i - k_j|²`
    NegativeSquare,
    /// `sqrt(|q_i - k_j|² + ε)`
    NegativeNorm,
}

impl FromStr for DistanceKind {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "negative_square" | "nsq" => Ok(DistanceKind::NegativeSquare),
            "negative_norm" | "nnorm" => Ok(DistanceKind::NegativeNorm),
            other => Err(Error::unknown(ComponentKind::Distance, other)),
        }
    }
}

#[derive(Debug, Clone)]
enum Projection {
    Identity,
    Shared(Linear),
    Separate { query: Linear, key: Linear },
}

/// Adjacency from learned node similarities.
#[derive(Debug, Clone)]
pub struct LearnedAdjacency {
    projection: Projection,
    distance: DistanceKind,
    temperature: f64,
    symmetric: bool,
    activation: MatrixActivation,
}

impl LearnedAdjacency {
    /// Build from config; `dim_in` is the width of the vectors compared.
    pub fn new(dim_in: usize, config: &LearnedConfig, vb: VarBuilder) -> Result<Self> {
        let distance = config.distance.parse()?;
        let activation: MatrixActivation = config.activation.parse()?;
        if !(config.temperature > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be positive, got {}",
                config.temperature
            )));
        }
        if config.symmetric && activation == MatrixActivation::Softmax {
            return Err(Error::InvalidConfig(
                "symmetric learned adjacency cannot use a row softmax".to_string(),
            ));
        }

        let projection = match config.dim {
            None => Projection::Identity,
            Some(dim) if config.symmetric => Projection::Shared(linear(dim_in, dim, vb.pp("proj"))?),
            Some(dim) => Projection::Separate {
                query: linear(dim_in, dim, vb.pp("query"))?,
                key: linear(dim_in, dim, vb.pp("key"))?,
            },
        };

        Ok(Self {
            projection,
            distance,
            temperature: config.temperature,
            symmetric: config.symmetric,
            activation,
        })
    }

    /// Raw scores `-d(q_i, k_j) / T` before symmetrisation and activation.
    pub fn scores(&self, nodes: &Tensor) -> Result<Tensor> {
        let (query, key) = match &self.projection {
            Projection::Identity => (nodes.clone(), nodes.clone()),
            Projection::Shared(proj) => {
                let q = proj.forward(nodes)?;
                (q.clone(), q)
            }
            Projection::Separate { query, key } => (query.forward(nodes)?, key.forward(nodes)?),
        };

        // (B, N, 1, D) - (B, 1, N, D) -> (B, N, N)
        let diff = query.unsqueeze(2)?.broadcast_sub(&key.unsqueeze(1)?)?;
        let sq = diff.sqr()?.sum(D::Minus1)?;
        let dist = match self.distance {
            DistanceKind::NegativeSquare => sq,
            DistanceKind::NegativeNorm => (sq + NORM_EPS)?.sqrt()?,
        };
        Ok(dist.affine(-1.0 / self.temperature, 0.0)?)
    }
}

impl AdjacencyMatrix for LearnedAdjacency {
    fn compute(&self, nodes: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let mut scores = self.scores(nodes)?;
        if self.symmetric {
            scores = ((&scores + scores.transpose(1, 2)?)? * 0.5)?;
        }
        self.activation.apply(&scores, mask)
    }
}
