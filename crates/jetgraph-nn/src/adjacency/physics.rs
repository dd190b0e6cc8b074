//! Physics-kernel adjacency over raw particle features.
//!
//! Uses a kt-style distance between particles:
//!
//! ```text
//! ΔR²_ij = Δη² + Δφ²                      Δφ wrapped to [-π, π]
//! d_ij   = min(pT_i^{2α}, pT_j^{2α}) · ΔR²_ij / R²
//! A_ij   = exp(-d_ij)
//! ```
//!
//! `α = 1` gives the kt measure, `α = 0` Cambridge/Aachen, `α = -1` anti-kt.
//! The kernel is symmetric in `i, j` by construction.

use std::f64::consts::PI;

use candle_core::Tensor;
use candle_nn::{Init, VarBuilder};

use crate::batch::NodeMask;
use crate::config::PhysicsConfig;
use crate::error::{Error, Result};

use super::matrix_activation::apply_pair_mask;
use super::AdjacencyMatrix;

/// Lower bound on transverse momentum before taking its log.
const MIN_PT: f64 = 1e-6;
/// Upper bound on `2α log pT`, keeps `pT^{2α}` near 1e30 at most so
/// `weight · ΔR²` stays finite when `ΔR² = 0`.
const MAX_LOG_WEIGHT: f64 = 69.0;

/// Adjacency from angular separation and transverse momentum.
#[derive(Debug, Clone)]
pub struct PhysicsAdjacency {
    alpha: Tensor,
    r: Tensor,
    eta_index: usize,
    phi_index: usize,
    pt_index: usize,
}

impl PhysicsAdjacency {
    /// `alpha` and `r` are registered as variables when `trainable`.
    pub fn new(config: &PhysicsConfig, vb: VarBuilder) -> Result<Self> {
        if !(config.r > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "physics radius must be positive, got {}",
                config.r
            )));
        }
        let (alpha, r) = if config.trainable {
            (
                vb.get_with_hints(1, "alpha", Init::Const(config.alpha))?,
                vb.get_with_hints(1, "r", Init::Const(config.r))?,
            )
        } else {
            (
                Tensor::new(&[config.alpha], vb.device())?.to_dtype(vb.dtype())?,
                Tensor::new(&[config.r], vb.device())?.to_dtype(vb.dtype())?,
            )
        };
        Ok(Self {
            alpha,
            r,
            eta_index: config.eta_index,
            phi_index: config.phi_index,
            pt_index: config.pt_index,
        })
    }

    pub fn alpha(&self) -> &Tensor {
        &self.alpha
    }

    pub fn radius(&self) -> &Tensor {
        &self.r
    }

    /// Pairwise `ΔR²`, shape `(B, N, N)`.
    pub fn delta_r2(&self, particles: &Tensor) -> Result<Tensor> {
        let eta = particles.narrow(2, self.eta_index, 1)?;
        let phi = particles.narrow(2, self.phi_index, 1)?;

        let deta = eta.broadcast_sub(&eta.transpose(1, 2)?)?;
        let dphi = phi.broadcast_sub(&phi.transpose(1, 2)?)?;
        let turns = dphi.affine(1.0 / (2.0 * PI), 0.0)?.round()?;
        let dphi = (dphi - turns.affine(2.0 * PI, 0.0)?)?;

        Ok((deta.sqr()? + dphi.sqr()?)?)
    }
}

impl AdjacencyMatrix for PhysicsAdjacency {
    fn compute(&self, particles: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let (_, _, f) = particles.dims3()?;
        let largest = self.eta_index.max(self.phi_index).max(self.pt_index);
        if largest >= f {
            return Err(Error::shape("particle features", format!("> {largest}"), f));
        }

        let dr2 = self.delta_r2(particles)?;

        // pT^{2α} = exp(2α log pT)
        let log_pt = particles
            .narrow(2, self.pt_index, 1)?
            .maximum(MIN_PT)?
            .log()?;
        let scaled = log_pt
            .broadcast_mul(&self.alpha.affine(2.0, 0.0)?)?
            .minimum(MAX_LOG_WEIGHT)?
            .exp()?;
        let weight = scaled.broadcast_minimum(&scaled.transpose(1, 2)?)?;

        let d = (weight * dr2)?.broadcast_div(&self.r.sqr()?)?;
        apply_pair_mask(&d.neg()?.exp()?, mask)
    }
}
