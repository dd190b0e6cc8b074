//! Message-passing convolutional layers.
//!
//! One iteration over a dense, masked batch:
//!
//! 1. **Message**: `msg_j = act(W h_j)`
//! 2. **Aggregate**: `m_i = Σ_j A_ij msg_j` (sum) or the same divided by
//!    `Σ_j A_ij` (mean)
//! 3. **Update**: `h_i' = UPDATE(h_i, m_i)`, then padding rows are zeroed
//!
//! ```text
//! h_i^{(l+1)} = mask_i · UPDATE(h_i^{(l)}, AGGREGATE({A_ij · MESSAGE(h_j^{(l)})}))
//! ```
//!
//! [`MessagePassing`] drives the iterations, with one shared layer (tied)
//! or one layer per iteration (untied).

use std::str::FromStr;

use candle_core::{Tensor, D};
use candle_nn::rnn::{gru, GRUConfig, GRUState, GRU, RNN};
use candle_nn::{linear, Linear, Module, VarBuilder};
use tracing::trace;

use crate::activation::Activation;
use crate::batch::NodeMask;
use crate::depth::Depth;
use crate::error::{ComponentKind, Error, Result};

/// Guards the mean against rows with zero total weight.
const DEGREE_EPS: f64 = 1e-6;

/// How incoming messages are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// `Σ_j A_ij msg_j`
    Sum,
    /// `Σ_j A_ij msg_j / Σ_j A_ij`
    Mean,
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "sum" => Ok(Aggregation::Sum),
            "mean" => Ok(Aggregation::Mean),
            other => Err(Error::unknown(ComponentKind::Aggregation, other)),
        }
    }
}

/// Node update rule, chosen by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// GRU cell: message as input, hidden state as state.
    Gru,
    /// `h + act(W m)`
    Residual,
    /// `act(W_self h + W_msg m)`
    Replace,
}

impl FromStr for UpdateKind {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "gru" => Ok(UpdateKind::Gru),
            "residual" => Ok(UpdateKind::Residual),
            "replace" | "simple" => Ok(UpdateKind::Replace),
            other => Err(Error::unknown(ComponentKind::Update, other)),
        }
    }
}

#[derive(Debug, Clone)]
enum Update {
    Gru(GRU),
    Residual(Linear),
    Replace { own: Linear, incoming: Linear },
}

/// A single message-passing iteration.
#[derive(Debug, Clone)]
pub struct MessagePassingLayer {
    message: Linear,
    update: Update,
    aggregation: Aggregation,
    activation: Activation,
}

impl MessagePassingLayer {
    /// Create a layer operating on `hidden`-wide node states.
    pub fn new(
        hidden: usize,
        aggregation: Aggregation,
        update: UpdateKind,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let message = linear(hidden, hidden, vb.pp("message"))?;
        let update = match update {
            UpdateKind::Gru => {
                Update::Gru(gru(hidden, hidden, GRUConfig::default(), vb.pp("gru"))?)
            }
            UpdateKind::Residual => Update::Residual(linear(hidden, hidden, vb.pp("update"))?),
            UpdateKind::Replace => Update::Replace {
                own: linear(hidden, hidden, vb.pp("own"))?,
                incoming: linear(hidden, hidden, vb.pp("incoming"))?,
            },
        };
        Ok(Self {
            message,
            update,
            aggregation,
            activation,
        })
    }

    /// Aggregated messages `m`, shape `(B, N, hidden)`.
    pub fn aggregate(&self, h: &Tensor, adjacency: &Tensor) -> Result<Tensor> {
        let msg = self.activation.apply(&self.message.forward(h)?)?;
        let summed = adjacency.contiguous()?.matmul(&msg.contiguous()?)?;
        match self.aggregation {
            Aggregation::Sum => Ok(summed),
            Aggregation::Mean => {
                let degree = (adjacency.sum_keepdim(D::Minus1)? + DEGREE_EPS)?;
                Ok(summed.broadcast_div(&degree)?)
            }
        }
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `h`: Node states (B x N x hidden)
    /// - `adjacency`: Masked adjacency (B x N x N)
    /// - `mask`: Node mask; `None` treats every node as valid
    ///
    /// # Returns
    /// - Updated node states (B x N x hidden), padding rows zero
    pub fn forward(&self, h: &Tensor, adjacency: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let m = self.aggregate(h, adjacency)?;
        let next = match &self.update {
            Update::Gru(cell) => {
                let (b, n, hidden) = h.dims3()?;
                let state = GRUState {
                    h: h.reshape((b * n, hidden))?,
                };
                let state = cell.step(&m.reshape((b * n, hidden))?, &state)?;
                state.h.reshape((b, n, hidden))?
            }
            Update::Residual(lin) => (h + self.activation.apply(&lin.forward(&m)?)?)?,
            Update::Replace { own, incoming } => {
                let pre = (own.forward(h)? + incoming.forward(&m)?)?;
                self.activation.apply(&pre)?
            }
        };
        match mask {
            Some(mask) => Ok(next.broadcast_mul(mask.nodes())?),
            None => Ok(next),
        }
    }
}

/// Where each iteration's adjacency comes from.
pub enum AdjacencySource<'a> {
    /// Computed once before the first iteration.
    Fixed(Tensor),
    /// Recomputed from the current hidden state at every iteration.
    Dynamic(&'a dyn Fn(&Tensor) -> Result<Tensor>),
}

/// Layers for every iteration.
#[derive(Debug, Clone)]
pub enum Layers {
    /// One layer reused `iters` times.
    Tied(MessagePassingLayer),
    /// An independent layer per iteration.
    Untied(Vec<MessagePassingLayer>),
}

/// Runs `iters` message-passing iterations.
#[derive(Debug, Clone)]
pub struct MessagePassing {
    layers: Layers,
    iters: usize,
}

impl MessagePassing {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hidden: usize,
        iters: usize,
        tied: bool,
        aggregation: Aggregation,
        update: UpdateKind,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let layers = if tied && iters > 0 {
            Layers::Tied(MessagePassingLayer::new(
                hidden,
                aggregation,
                update,
                activation,
                vb.pp("layer"),
            )?)
        } else {
            let layers = (0..iters)
                .map(|i| {
                    MessagePassingLayer::new(
                        hidden,
                        aggregation,
                        update,
                        activation,
                        vb.pp(format!("layers.{i}")),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            Layers::Untied(layers)
        };
        Ok(Self { layers, iters })
    }

    pub fn iters(&self) -> usize {
        self.iters
    }

    pub fn is_tied(&self) -> bool {
        matches!(self.layers, Layers::Tied(_))
    }

    fn layer(&self, iter: usize) -> &MessagePassingLayer {
        match &self.layers {
            Layers::Tied(layer) => layer,
            Layers::Untied(layers) => &layers[iter],
        }
    }

    /// Iterate from the embedded state `h`.
    ///
    /// Returns the final state and the adjacency used by the last
    /// iteration (the fixed adjacency when there are no iterations, `None`
    /// for a dynamic source that was never evaluated).
    pub fn run(
        &self,
        h: Tensor,
        source: AdjacencySource<'_>,
        mask: Option<&NodeMask>,
        depth: Depth,
    ) -> Result<(Tensor, Option<Tensor>)> {
        if let Depth::Truncated { detached } = depth {
            if detached >= self.iters.max(1) {
                return Err(Error::InvalidConfig(format!(
                    "cannot detach {detached} of {} iterations",
                    self.iters
                )));
            }
        }

        let mut h = h;
        let (mut adjacency, dynamic) = match source {
            AdjacencySource::Fixed(a) => (Some(a), None),
            AdjacencySource::Dynamic(f) => (None, Some(f)),
        };

        for iter in 0..self.iters {
            if depth.detaches_before(iter) {
                trace!(iter, "detaching message-passing state");
                h = h.detach();
                adjacency = adjacency.map(|a| a.detach());
            }
            let a = match dynamic {
                Some(compute) => compute(&h)?,
                None => match &adjacency {
                    Some(a) => a.clone(),
                    None => return Err(Error::InvalidConfig("no adjacency".to_string())),
                },
            };
            h = self.layer(iter).forward(&h, &a, mask)?;
            adjacency = Some(a);
        }
        Ok((h, adjacency))
    }
}
