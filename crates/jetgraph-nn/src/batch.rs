//! Dense batches of variable-size graphs.
//!
//! Graphs with different node counts are padded to a common `max_nodes`
//! and paired with a [`NodeMask`]:
//!
//! ```text
//! features: (B, N, F)   zero rows for padding
//! nodes:    (B, N, 1)   1.0 = real node, 0.0 = padding
//! pairs:    (B, N, N)   nodes ⊗ nodes, 1.0 only where both ends are real
//! ```
//!
//! Every quantity touching padded positions must be multiplied by one of
//! these masks before it is summed, averaged or normalised.

use candle_core::{DType, Device, Tensor, D};

use crate::error::{Error, Result};

/// Node and pair masks for one batch.
///
/// Built once per forward call and passed down explicitly.
#[derive(Debug, Clone)]
pub struct NodeMask {
    nodes: Tensor,
    pairs: Tensor,
}

impl NodeMask {
    /// Wrap a node mask of shape `(B, N)` or `(B, N, 1)`.
    pub fn new(nodes: Tensor) -> Result<Self> {
        let dims = nodes.dims().to_vec();
        let nodes = match dims.as_slice() {
            [_, _] => nodes.unsqueeze(2)?,
            [_, _, 1] => nodes,
            other => return Err(Error::shape("node mask", "(B, N) or (B, N, 1)", other)),
        };
        let nodes = nodes.to_dtype(DType::F32)?;
        let pairs = nodes.broadcast_mul(&nodes.transpose(1, 2)?)?;
        Ok(Self { nodes, pairs })
    }

    /// Mask where graph `b` owns its first `lengths[b]` nodes.
    pub fn from_lengths(lengths: &[usize], max_nodes: usize, device: &Device) -> Result<Self> {
        if let Some(&too_long) = lengths.iter().find(|&&len| len > max_nodes) {
            return Err(Error::shape("graph length", format!("<= {max_nodes}"), too_long));
        }
        let data: Vec<f32> = lengths
            .iter()
            .flat_map(|&len| (0..max_nodes).map(move |i| if i < len { 1.0 } else { 0.0 }))
            .collect();
        Self::new(Tensor::from_vec(data, (lengths.len(), max_nodes), device)?)
    }

    /// Mask with every node valid.
    pub fn full(batch: usize, max_nodes: usize, device: &Device) -> Result<Self> {
        Self::new(Tensor::ones((batch, max_nodes, 1), DType::F32, device)?)
    }

    /// Node mask `(B, N, 1)`.
    pub fn nodes(&self) -> &Tensor {
        &self.nodes
    }

    /// Pair mask `(B, N, N)`.
    pub fn pairs(&self) -> &Tensor {
        &self.pairs
    }

    /// Pair mask as a `u8` condition for `where_cond`.
    pub fn valid_pairs(&self) -> Result<Tensor> {
        Ok(self.pairs.ne(0f32)?)
    }

    /// Number of valid nodes per graph, `(B, 1)`.
    pub fn counts(&self) -> Result<Tensor> {
        Ok(self.nodes.sum(1)?)
    }

    /// Number of valid nodes per graph.
    pub fn lengths(&self) -> Result<Vec<usize>> {
        let counts = self.nodes.squeeze(D::Minus1)?.sum(1)?.to_vec1::<f32>()?;
        Ok(counts.into_iter().map(|c| c.round() as usize).collect())
    }

    fn pad_to(&self, max_nodes: usize) -> Result<Self> {
        let n = self.nodes.dim(1)?;
        Self::new(self.nodes.pad_with_zeros(1, 0, max_nodes - n)?)
    }
}

/// Padded node features plus their mask.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    features: Tensor,
    mask: Option<NodeMask>,
}

impl GraphBatch {
    /// Wrap a `(B, N, F)` feature tensor.
    ///
    /// Without a mask every node is treated as valid.
    pub fn new(features: Tensor, mask: Option<NodeMask>) -> Result<Self> {
        let (b, n, _) = features.dims3()?;
        if let Some(mask) = &mask {
            let (mb, mn, _) = mask.nodes().dims3()?;
            if (mb, mn) != (b, n) {
                return Err(Error::shape("node mask", (b, n, 1), (mb, mn, 1)));
            }
        }
        Ok(Self { features, mask })
    }

    /// Collate graphs given as per-node feature rows.
    ///
    /// Pads with zero rows up to the largest graph in the batch.
    pub fn from_graphs(graphs: &[Vec<Vec<f32>>], device: &Device) -> Result<Self> {
        let feature_dim = graphs
            .iter()
            .flat_map(|g| g.first())
            .map(Vec::len)
            .next()
            .ok_or_else(|| Error::InvalidConfig("batch contains no nodes".to_string()))?;
        let max_nodes = graphs.iter().map(Vec::len).max().unwrap_or(0);

        let mut data = Vec::with_capacity(graphs.len() * max_nodes * feature_dim);
        let mut lengths = Vec::with_capacity(graphs.len());
        for graph in graphs {
            for row in graph {
                if row.len() != feature_dim {
                    return Err(Error::shape("node feature row", feature_dim, row.len()));
                }
                data.extend_from_slice(row);
            }
            data.extend(std::iter::repeat(0.0).take((max_nodes - graph.len()) * feature_dim));
            lengths.push(graph.len());
        }

        let features = Tensor::from_vec(data, (graphs.len(), max_nodes, feature_dim), device)?;
        let mask = NodeMask::from_lengths(&lengths, max_nodes, device)?;
        Self::new(features, Some(mask))
    }

    /// Re-pad to `max_nodes` with extra all-zero, masked-out nodes.
    pub fn pad_to(&self, max_nodes: usize) -> Result<Self> {
        let (b, n, _) = self.features.dims3()?;
        if max_nodes < n {
            return Err(Error::shape("padded node count", format!(">= {n}"), max_nodes));
        }
        let mask = match &self.mask {
            Some(mask) => mask.pad_to(max_nodes)?,
            None => NodeMask::full(b, n, self.features.device())?.pad_to(max_nodes)?,
        };
        let features = self.features.pad_with_zeros(1, 0, max_nodes - n)?;
        Self::new(features, Some(mask))
    }

    pub fn features(&self) -> &Tensor {
        &self.features
    }

    pub fn mask(&self) -> Option<&NodeMask> {
        self.mask.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.features.dims()[0]
    }

    pub fn max_nodes(&self) -> usize {
        self.features.dims()[1]
    }

    pub fn feature_dim(&self) -> usize {
        self.features.dims()[2]
    }
}
