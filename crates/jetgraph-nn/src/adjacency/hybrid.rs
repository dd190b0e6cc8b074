//! Convex mixture of the physics kernel and a learned similarity.

use candle_core::{Tensor, D};
use candle_nn::{Init, VarBuilder};
use tracing::{debug, enabled, Level};

use crate::batch::NodeMask;
use crate::config::{HybridConfig, LearnedConfig, PhysicsConfig};
use crate::error::Result;

use super::learned::LearnedAdjacency;
use super::matrix_activation::{apply_pair_mask, MatrixActivation};
use super::physics::PhysicsAdjacency;
use super::AdjacencyMatrix;

/// `act(x · physics + (1 - x) · learned)` with `x = sigmoid(raw)`.
#[derive(Debug, Clone)]
pub struct HybridAdjacency {
    physics: PhysicsAdjacency,
    learned: LearnedAdjacency,
    raw: Tensor,
    activation: MatrixActivation,
}

impl HybridAdjacency {
    pub fn new(
        dim_in: usize,
        hybrid: &HybridConfig,
        learned: &LearnedConfig,
        physics: &PhysicsConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let activation = hybrid.matrix_activation.parse()?;
        let raw = if hybrid.learned_tradeoff {
            vb.get_with_hints(1, "physics_component", Init::Const(hybrid.physics_component))?
        } else {
            Tensor::new(&[hybrid.physics_component], vb.device())?.to_dtype(vb.dtype())?
        };
        Ok(Self {
            physics: PhysicsAdjacency::new(physics, vb.pp("physics"))?,
            learned: LearnedAdjacency::new(dim_in, learned, vb.pp("learned"))?,
            raw,
            activation,
        })
    }

    /// Physics weight `x` as a `(1,)` tensor.
    pub fn mixing_tensor(&self) -> Result<Tensor> {
        Ok(candle_nn::ops::sigmoid(&self.raw)?)
    }

    /// Physics weight `x`.
    pub fn mixing(&self) -> Result<f64> {
        let x = self
            .mixing_tensor()?
            .to_dtype(candle_core::DType::F64)?
            .squeeze(D::Minus1)?
            .to_scalar::<f64>()?;
        Ok(x)
    }

    pub fn physics(&self) -> &PhysicsAdjacency {
        &self.physics
    }

    pub fn learned(&self) -> &LearnedAdjacency {
        &self.learned
    }
}

impl AdjacencyMatrix for HybridAdjacency {
    fn compute(&self, nodes: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let x = self.mixing_tensor()?;
        if enabled!(Level::DEBUG) {
            debug!(mixing = self.mixing()?, "hybrid adjacency");
        }

        let physics = self.physics.compute(nodes, mask)?;
        let learned = self.learned.compute(nodes, mask)?;
        let mixed = (physics.broadcast_mul(&x)? + learned.broadcast_mul(&x.affine(-1.0, 1.0)?)?)?;

        let out = self.activation.apply(&mixed, mask)?;
        apply_pair_mask(&out, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn jets() -> (Tensor, NodeMask) {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1f32, (2, 4, 7), &device)
            .unwrap()
            .abs()
            .unwrap();
        let mask = NodeMask::from_lengths(&[4, 2], 4, &device).unwrap();
        (x, mask)
    }

    fn hybrid(physics_component: f64, activation: &str) -> (VarMap, HybridAdjacency) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = HybridConfig {
            physics_component,
            learned_tradeoff: false,
            matrix_activation: activation.to_string(),
        };
        let learned = LearnedConfig {
            dim: Some(3),
            ..Default::default()
        };
        let adj =
            HybridAdjacency::new(7, &config, &learned, &PhysicsConfig::default(), vb).unwrap();
        (varmap, adj)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn test_limits() {
        let (x, mask) = jets();

        let (_vm, adj) = hybrid(30.0, "none");
        let physics = adj.physics().compute(&x, Some(&mask)).unwrap();
        let out = adj.compute(&x, Some(&mask)).unwrap();
        assert!(max_abs_diff(&out, &physics) < 1e-6);

        let (_vm, adj) = hybrid(-30.0, "none");
        let learned = adj.learned().compute(&x, Some(&mask)).unwrap();
        let out = adj.compute(&x, Some(&mask)).unwrap();
        assert!(max_abs_diff(&out, &learned) < 1e-6);
    }

    #[test]
    fn test_mixing_default_half() {
        let (_vm, adj) = hybrid(0.0, "softmax");
        assert!((adj.mixing().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_output_masked() {
        let (x, mask) = jets();
        let (_vm, adj) = hybrid(0.0, "softmax");
        let a = adj.compute(&x, Some(&mask)).unwrap().to_vec3::<f32>().unwrap();
        for i in 0..2 {
            let total: f32 = a[1][i].iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
        assert_eq!(a[1][2], vec![0.0; 4]);
        assert_eq!(a[1][0][3], 0.0);
    }

    #[test]
    fn test_learned_tradeoff_is_a_var() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = HybridConfig {
            learned_tradeoff: true,
            ..Default::default()
        };
        HybridAdjacency::new(
            7,
            &config,
            &LearnedConfig::default(),
            &PhysicsConfig::default(),
            vb,
        )
        .unwrap();
        assert_eq!(varmap.all_vars().len(), 1);
    }
}
