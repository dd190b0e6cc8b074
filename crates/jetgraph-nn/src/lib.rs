//! Neural message passing over particle jets.
//!
//! `jetgraph-nn` learns graph representations of jets: each particle is a
//! node, an adjacency matrix is built per jet (fixed, learned, physics
//! motivated, or a mixture), hidden states are propagated for a few
//! iterations, and a readout reduces the nodes to a prediction. Batches of
//! jets with different multiplicities are padded and masked so padding
//! never leaks into real outputs.
//!
//! # Modules
//!
//! - [`batch`]: Padding and node/pair masks
//! - [`embedding`]: Per-node embedding and positional encoding
//! - [`adjacency`]: Adjacency constructors (identity, ones, chain, learned, physics, hybrid)
//! - [`conv`]: Message-passing layer and iteration driver (GRU, residual, replace updates)
//! - [`depth`]: Variable-depth gradient truncation
//! - [`readout`]: Graph-level readouts (DTNN, simple, classification, ensemble, Set2Vec)
//! - [`model`]: [`Nmp`] and [`GraphGen`]
//! - [`config`]: Serialisable model configuration
//!
//! # Example: Jet Classifier Forward Pass
//!
//! ```rust,ignore
//! use candle_core::Device;
//! use candle_nn::VarMap;
//! use jetgraph_nn::{GraphBatch, Nmp, NmpConfig};
//!
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let config = NmpConfig::default()
//!     .with_hidden(32)
//!     .with_adjacency("physics")
//!     .with_readout("clf");
//! let model = Nmp::from_varmap(config, &varmap, &device)?;
//!
//! // two jets, 7 features per particle
//! let batch = GraphBatch::from_graphs(&jets, &device)?;
//! let out = model.forward(&batch)?;
//! let probabilities = out.prediction; // (2, 1)
//! ```

pub mod activation;
pub mod adjacency;
pub mod batch;
pub mod config;
pub mod conv;
pub mod depth;
pub mod embedding;
pub mod error;
pub mod model;
pub mod readout;

pub use activation::Activation;
pub use adjacency::{Adjacency, AdjacencyKind, AdjacencyMatrix, MatrixActivation};
pub use batch::{GraphBatch, NodeMask};
pub use config::{HybridConfig, LearnedConfig, NmpConfig, PhysicsConfig};
pub use conv::{Aggregation, MessagePassing, MessagePassingLayer, UpdateKind};
pub use depth::{Depth, VariableDepth};
pub use embedding::{Embedding, Positional, PositionalEncoding};
pub use error::{ComponentKind, Error, Result};
pub use model::{parameter_count, GraphGen, Nmp, NmpOutput, Schedule};
pub use readout::{GraphReadout, Readout, ReadoutKind};
