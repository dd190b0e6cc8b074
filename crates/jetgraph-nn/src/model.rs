//! End-to-end message-passing models.
//!
//! [`Nmp`] is the jet classifier/regressor:
//!
//! ```text
//! features -> embed -> [adjacency, message-pass] x iters -> readout
//! ```
//!
//! [`GraphGen`] drops the readout and returns the adjacency implied by the
//! final hidden state.

use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use crate::activation::Activation;
use crate::adjacency::{Adjacency, AdjacencyMatrix, LearnedAdjacency};
use crate::batch::{GraphBatch, NodeMask};
use crate::config::{LearnedConfig, NmpConfig};
use crate::conv::{AdjacencySource, MessagePassing};
use crate::depth::{resolve_tied, Depth, VariableDepth};
use crate::embedding::{Embedding, Positional};
use crate::error::{ComponentKind, Error, Result};
use crate::readout::{GraphReadout, Readout};

/// When the adjacency is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once per forward call, from the raw node features.
    Fixed,
    /// Before every iteration, from the current hidden state.
    Dynamic,
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "fixed" => Ok(Schedule::Fixed),
            "dynamic" => Ok(Schedule::Dynamic),
            other => Err(Error::unknown(ComponentKind::Schedule, other)),
        }
    }
}

/// Total number of scalar parameters registered in `varmap`.
pub fn parameter_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|var| var.elem_count()).sum()
}

/// Prediction plus the last adjacency, for diagnostics.
#[derive(Debug, Clone)]
pub struct NmpOutput {
    /// `(B, target)`, or `(B, heads, target)` for the `mult` readout.
    pub prediction: Tensor,
    /// Adjacency of the last iteration, `(B, N, N)`.
    pub adjacency: Option<Tensor>,
}

/// Neural message-passing model over jets.
#[derive(Debug, Clone)]
pub struct Nmp {
    config: NmpConfig,
    embedding: Embedding,
    adjacency: Adjacency,
    schedule: Schedule,
    message_passing: MessagePassing,
    readout: Readout,
    variable_depth: Option<VariableDepth>,
}

impl Nmp {
    /// Validate `config` and register every parameter under `vb`.
    pub fn new(config: NmpConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let activation: Activation = config.activation.parse()?;
        let schedule: Schedule = config.schedule.parse()?;
        let tied = resolve_tied(config.variable_depth, config.tied);

        let embedding = Embedding::new(
            config.features,
            config.hidden,
            config.embedding_layers,
            activation,
            config.positional(),
            vb.pp("embedding"),
        )?;
        let dim_in = match schedule {
            Schedule::Fixed => config.features,
            Schedule::Dynamic => config.hidden,
        };
        let adjacency = Adjacency::from_key(&config.adjacency, dim_in, &config, vb.pp("adjacency"))?;
        let message_passing = MessagePassing::new(
            config.hidden,
            config.iters,
            tied,
            config.aggregation.parse()?,
            config.update.parse()?,
            activation,
            vb.pp("mp"),
        )?;
        let readout = Readout::from_key(
            &config.readout,
            config.hidden,
            config.target_dim,
            &config,
            vb.pp("readout"),
        )?;
        let variable_depth = config
            .variable_depth
            .then(|| VariableDepth::new(config.iters, config.seed));

        debug!(
            adjacency = %adjacency.kind(),
            schedule = ?schedule,
            iters = config.iters,
            tied,
            readout = %config.readout,
            "built message-passing model"
        );

        Ok(Self {
            config,
            embedding,
            adjacency,
            schedule,
            message_passing,
            readout,
            variable_depth,
        })
    }

    /// Build with fresh parameters in `varmap` and log their count.
    pub fn from_varmap(config: NmpConfig, varmap: &VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        info!(parameters = parameter_count(varmap), "Number of parameters");
        Ok(model)
    }

    pub fn config(&self) -> &NmpConfig {
        &self.config
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    pub fn message_passing(&self) -> &MessagePassing {
        &self.message_passing
    }

    /// Forward pass with gradient through every iteration.
    pub fn forward(&self, batch: &GraphBatch) -> Result<NmpOutput> {
        self.forward_with_depth(batch, Depth::Full)
    }

    /// Training forward pass.
    ///
    /// In variable-depth mode this draws a fresh truncation point.
    pub fn forward_train(&mut self, batch: &GraphBatch) -> Result<NmpOutput> {
        let depth = match self.variable_depth.as_mut() {
            Some(draws) => draws.draw(),
            None => Depth::Full,
        };
        debug!(?depth, "training forward");
        self.forward_with_depth(batch, depth)
    }

    /// Forward pass with an explicit gradient truncation.
    pub fn forward_with_depth(&self, batch: &GraphBatch, depth: Depth) -> Result<NmpOutput> {
        let x = batch.features();
        let mask = batch.mask();
        let h = self.embedding.forward(x, mask)?;

        let (h, adjacency) = match self.schedule {
            Schedule::Fixed => {
                let a = self.adjacency.compute(x, mask)?;
                self.message_passing
                    .run(h, AdjacencySource::Fixed(a), mask, depth)?
            }
            Schedule::Dynamic => {
                let compute = |h: &Tensor| self.adjacency.compute(h, mask);
                self.message_passing
                    .run(h, AdjacencySource::Dynamic(&compute), mask, depth)?
            }
        };

        let prediction = self.readout.reduce(&h, mask)?;
        Ok(NmpOutput {
            prediction,
            adjacency,
        })
    }
}

/// Generates a graph over the input nodes.
///
/// Every iteration compares the first `spatial_dims` hidden channels with a
/// sharp learned similarity and message-passes over the result.
#[derive(Debug, Clone)]
pub struct GraphGen {
    embedding: Embedding,
    adjacency: LearnedAdjacency,
    message_passing: MessagePassing,
    spatial_dims: usize,
    variable_depth: Option<VariableDepth>,
}

impl GraphGen {
    pub const SPATIAL_DIMS: usize = 3;
    pub const TEMPERATURE: f64 = 0.01;

    pub fn new(config: &NmpConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if config.hidden < Self::SPATIAL_DIMS {
            return Err(Error::InvalidConfig(format!(
                "graph generation needs hidden >= {}, got {}",
                Self::SPATIAL_DIMS,
                config.hidden
            )));
        }
        let activation: Activation = config.activation.parse()?;
        let tied = resolve_tied(config.variable_depth, config.tied);

        let embedding = Embedding::new(
            config.features,
            config.hidden,
            config.embedding_layers,
            activation,
            if config.trainable_positional {
                Positional::Trainable
            } else {
                Positional::Fixed
            },
            vb.pp("embedding"),
        )?;
        let learned = LearnedConfig {
            temperature: Self::TEMPERATURE,
            ..Default::default()
        };
        let adjacency = LearnedAdjacency::new(Self::SPATIAL_DIMS, &learned, vb.pp("adjacency"))?;
        let message_passing = MessagePassing::new(
            config.hidden,
            config.iters,
            tied,
            config.aggregation.parse()?,
            config.update.parse()?,
            activation,
            vb.pp("mp"),
        )?;

        Ok(Self {
            embedding,
            adjacency,
            message_passing,
            spatial_dims: Self::SPATIAL_DIMS,
            variable_depth: config
                .variable_depth
                .then(|| VariableDepth::new(config.iters, config.seed)),
        })
    }

    fn spatial_adjacency(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let spatial = h.narrow(2, 0, self.spatial_dims)?;
        self.adjacency.compute(&spatial, mask)
    }

    /// Generated adjacency `(B, N, N)`.
    pub fn forward(&self, batch: &GraphBatch) -> Result<Tensor> {
        self.forward_with_depth(batch, Depth::Full)
    }

    pub fn forward_train(&mut self, batch: &GraphBatch) -> Result<Tensor> {
        let depth = match self.variable_depth.as_mut() {
            Some(draws) => draws.draw(),
            None => Depth::Full,
        };
        self.forward_with_depth(batch, depth)
    }

    pub fn forward_with_depth(&self, batch: &GraphBatch, depth: Depth) -> Result<Tensor> {
        let mask = batch.mask();
        let h = self.embedding.forward(batch.features(), mask)?;
        let compute = |h: &Tensor| self.spatial_adjacency(h, mask);
        let (h, _) = self
            .message_passing
            .run(h, AdjacencySource::Dynamic(&compute), mask, depth)?;
        self.spatial_adjacency(&h, mask)
    }
}
