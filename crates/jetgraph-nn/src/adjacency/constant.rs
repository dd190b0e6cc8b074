//! Fixed adjacency patterns that ignore node features.

use candle_core::{Device, Tensor};

use crate::batch::NodeMask;
use crate::error::Result;

use super::matrix_activation::apply_pair_mask;
use super::AdjacencyMatrix;

/// Which fixed pattern to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantKind {
    /// Self-loops only.
    Identity,
    /// Every node connected to every node.
    Ones,
    /// Self-loops plus the previous and next node in input order.
    Chain,
}

/// Feature-independent adjacency.
#[derive(Debug, Clone)]
pub struct ConstantAdjacency {
    kind: ConstantKind,
}

impl ConstantAdjacency {
    pub fn new(kind: ConstantKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ConstantKind {
        self.kind
    }

    fn pattern(&self, n: usize, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .map(|(i, j)| {
                let on = match self.kind {
                    ConstantKind::Identity => i == j,
                    ConstantKind::Ones => true,
                    ConstantKind::Chain => i.abs_diff(j) <= 1,
                };
                if on {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        Ok(Tensor::from_vec(data, (n, n), device)?)
    }
}

impl AdjacencyMatrix for ConstantAdjacency {
    fn compute(&self, nodes: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let (b, n, _) = nodes.dims3()?;
        let matrix = self
            .pattern(n, nodes.device())?
            .to_dtype(nodes.dtype())?
            .unsqueeze(0)?
            .broadcast_as((b, n, n))?
            .contiguous()?;
        apply_pair_mask(&matrix, mask)
    }
}
