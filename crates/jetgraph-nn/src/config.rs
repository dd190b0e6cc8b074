//! Model configuration.
//!
//! Every interchangeable component is selected by a string key so a
//! configuration can live in a JSON file next to an experiment. Keys are
//! parsed (and rejected) in [`NmpConfig::validate`], before any parameter is
//! allocated.
//!
//! # Example
//!
//! ```rust,ignore
//! use jetgraph_nn::config::NmpConfig;
//!
//! let config = NmpConfig::default()
//!     .with_hidden(32)
//!     .with_iters(2)
//!     .with_adjacency("physics")
//!     .with_readout("clf");
//! config.validate()?;
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::adjacency::{AdjacencyKind, DistanceKind, MatrixActivation};
use crate::conv::{Aggregation, UpdateKind};
use crate::embedding::Positional;
use crate::error::{Error, Result};
use crate::model::Schedule;
use crate::readout::ReadoutKind;

/// Learned pairwise-similarity adjacency settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnedConfig {
    /// `negative_square` or `negative_norm` (default: `negative_square`).
    pub distance: String,
    /// Score temperature, must be positive (default: 1.0).
    pub temperature: f64,
    /// Symmetrise scores before the activation (default: false).
    pub symmetric: bool,
    /// `exp` or `softmax` (default: `exp`).
    pub activation: String,
    /// Projection width; `None` compares the inputs directly.
    pub dim: Option<usize>,
}

impl Default for LearnedConfig {
    fn default() -> Self {
        Self {
            distance: "negative_square".to_string(),
            temperature: 1.0,
            symmetric: false,
            activation: "exp".to_string(),
            dim: None,
        }
    }
}

/// Physics-kernel adjacency settings.
///
/// The indices locate pseudorapidity, azimuth and transverse momentum in
/// the raw particle feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub alpha: f64,
    pub r: f64,
    /// Learn `alpha` and `r` (default: false).
    pub trainable: bool,
    pub eta_index: usize,
    pub phi_index: usize,
    pub pt_index: usize,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            r: 1.0,
            trainable: false,
            eta_index: 1,
            phi_index: 2,
            pt_index: 5,
        }
    }
}

/// Physics/learned mixture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    /// Raw mixing value; the physics weight is `sigmoid(physics_component)`.
    pub physics_component: f64,
    /// Learn the mixing value (default: false).
    pub learned_tradeoff: bool,
    /// Applied to the mixture: `softmax`, `exp` or `none`.
    pub matrix_activation: String,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            physics_component: 0.0,
            learned_tradeoff: false,
            matrix_activation: "softmax".to_string(),
        }
    }
}

/// Message-passing model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmpConfig {
    /// Raw node feature dimension (default: 7).
    pub features: usize,
    /// Hidden dimension (default: 64).
    pub hidden: usize,
    /// Message-passing iterations (default: 3).
    pub iters: usize,
    /// Linear layers in the embedding (default: 1).
    pub embedding_layers: usize,
    /// Add a sinusoid position table to the embedding (default: false).
    pub positional_encoding: bool,
    /// Learn the position table instead of keeping it fixed (default: false).
    pub trainable_positional: bool,
    pub activation: String,
    pub adjacency: String,
    /// `fixed` or `dynamic` (default: `fixed`).
    pub schedule: String,
    /// `gru`, `residual` or `replace` (default: `gru`).
    pub update: String,
    /// `sum` or `mean` (default: `sum`).
    pub aggregation: String,
    pub readout: String,
    /// Readout output size (default: 1).
    pub target_dim: usize,
    /// Heads in the `mult` readout (default: 2).
    pub n_readouts: usize,
    /// Attention steps in the `set` readout (default: 3).
    pub set_steps: usize,
    /// One message-passing layer shared by every iteration (default: false).
    pub tied: bool,
    /// Stochastic truncated-gradient depth (default: false).
    pub variable_depth: bool,
    /// Seed for the depth draw (default: 42).
    pub seed: u64,
    pub learned: LearnedConfig,
    pub physics: PhysicsConfig,
    pub hybrid: HybridConfig,
}

impl Default for NmpConfig {
    fn default() -> Self {
        Self {
            features: 7,
            hidden: 64,
            iters: 3,
            embedding_layers: 1,
            positional_encoding: false,
            trainable_positional: false,
            activation: "tanh".to_string(),
            adjacency: "learned".to_string(),
            schedule: "fixed".to_string(),
            update: "gru".to_string(),
            aggregation: "sum".to_string(),
            readout: "dtnn".to_string(),
            target_dim: 1,
            n_readouts: 2,
            set_steps: 3,
            tied: false,
            variable_depth: false,
            seed: 42,
            learned: LearnedConfig::default(),
            physics: PhysicsConfig::default(),
            hybrid: HybridConfig::default(),
        }
    }
}

impl NmpConfig {
    pub fn with_features(mut self, features: usize) -> Self {
        self.features = features;
        self
    }

    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_iters(mut self, iters: usize) -> Self {
        self.iters = iters;
        self
    }

    pub fn with_embedding_layers(mut self, layers: usize) -> Self {
        self.embedding_layers = layers;
        self
    }

    pub fn with_positional_encoding(mut self, enabled: bool) -> Self {
        self.positional_encoding = enabled;
        self
    }

    pub fn with_trainable_positional(mut self, trainable: bool) -> Self {
        self.trainable_positional = trainable;
        self
    }

    /// Position table mode for the embedding.
    pub fn positional(&self) -> Positional {
        match (self.positional_encoding, self.trainable_positional) {
            (false, _) => Positional::Off,
            (true, false) => Positional::Fixed,
            (true, true) => Positional::Trainable,
        }
    }

    pub fn with_activation(mut self, key: &str) -> Self {
        self.activation = key.to_string();
        self
    }

    pub fn with_adjacency(mut self, key: &str) -> Self {
        self.adjacency = key.to_string();
        self
    }

    pub fn with_schedule(mut self, key: &str) -> Self {
        self.schedule = key.to_string();
        self
    }

    pub fn with_update(mut self, key: &str) -> Self {
        self.update = key.to_string();
        self
    }

    pub fn with_aggregation(mut self, key: &str) -> Self {
        self.aggregation = key.to_string();
        self
    }

    pub fn with_readout(mut self, key: &str) -> Self {
        self.readout = key.to_string();
        self
    }

    pub fn with_target_dim(mut self, target_dim: usize) -> Self {
        self.target_dim = target_dim;
        self
    }

    pub fn with_n_readouts(mut self, n: usize) -> Self {
        self.n_readouts = n;
        self
    }

    pub fn with_set_steps(mut self, steps: usize) -> Self {
        self.set_steps = steps;
        self
    }

    pub fn with_tied(mut self, tied: bool) -> Self {
        self.tied = tied;
        self
    }

    pub fn with_variable_depth(mut self, enabled: bool) -> Self {
        self.variable_depth = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_learned(mut self, learned: LearnedConfig) -> Self {
        self.learned = learned;
        self
    }

    pub fn with_physics(mut self, physics: PhysicsConfig) -> Self {
        self.physics = physics;
        self
    }

    pub fn with_hybrid(mut self, hybrid: HybridConfig) -> Self {
        self.hybrid = hybrid;
        self
    }

    /// Load and validate a JSON config file.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Parse every key and check numeric ranges.
    pub fn validate(&self) -> Result<()> {
        self.activation.parse::<Activation>()?;
        let adjacency: AdjacencyKind = self.adjacency.parse()?;
        let schedule: Schedule = self.schedule.parse()?;
        self.update.parse::<UpdateKind>()?;
        self.aggregation.parse::<Aggregation>()?;
        let readout: ReadoutKind = self.readout.parse()?;

        if self.features == 0 {
            return Err(Error::InvalidConfig("features must be positive".to_string()));
        }
        if self.hidden == 0 {
            return Err(Error::InvalidConfig("hidden must be positive".to_string()));
        }
        if self.embedding_layers == 0 {
            return Err(Error::InvalidConfig(
                "embedding_layers must be at least 1".to_string(),
            ));
        }
        if self.target_dim == 0 {
            return Err(Error::InvalidConfig("target_dim must be positive".to_string()));
        }
        if readout == ReadoutKind::Mult && self.n_readouts == 0 {
            return Err(Error::InvalidConfig(
                "mult readout needs at least one head".to_string(),
            ));
        }
        if readout == ReadoutKind::Set && self.set_steps == 0 {
            return Err(Error::InvalidConfig(
                "set readout needs at least one step".to_string(),
            ));
        }

        if matches!(adjacency, AdjacencyKind::Learned | AdjacencyKind::Hybrid) {
            self.validate_learned()?;
        }
        if matches!(adjacency, AdjacencyKind::Physics | AdjacencyKind::Hybrid) {
            if schedule == Schedule::Dynamic {
                return Err(Error::InvalidConfig(format!(
                    "{} adjacency reads raw particle features and needs the fixed schedule",
                    self.adjacency
                )));
            }
            self.validate_physics()?;
        }
        if adjacency == AdjacencyKind::Hybrid {
            self.hybrid.matrix_activation.parse::<MatrixActivation>()?;
            if !self.hybrid.physics_component.is_finite() {
                return Err(Error::InvalidConfig(
                    "hybrid physics_component must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn validate_learned(&self) -> Result<()> {
        let learned = &self.learned;
        learned.distance.parse::<DistanceKind>()?;
        let activation: MatrixActivation = learned.activation.parse()?;
        if !(learned.temperature > 0.0 && learned.temperature.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be positive, got {}",
                learned.temperature
            )));
        }
        if learned.dim == Some(0) {
            return Err(Error::InvalidConfig(
                "learned projection dim must be positive".to_string(),
            ));
        }
        if learned.symmetric && activation == MatrixActivation::Softmax {
            return Err(Error::InvalidConfig(
                "symmetric learned adjacency cannot use a row softmax".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_physics(&self) -> Result<()> {
        let physics = &self.physics;
        if !(physics.r > 0.0 && physics.r.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "physics radius must be positive, got {}",
                physics.r
            )));
        }
        if !physics.alpha.is_finite() {
            return Err(Error::InvalidConfig("physics alpha must be finite".to_string()));
        }
        let largest = physics
            .eta_index
            .max(physics.phi_index)
            .max(physics.pt_index);
        if largest >= self.features {
            return Err(Error::shape(
                "physics feature index",
                format!("< {}", self.features),
                largest,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        NmpConfig::default().validate().unwrap();
    }

    #[test]
    fn test_unknown_key_named_in_error() {
        let err = NmpConfig::default()
            .with_adjacency("bogus")
            .validate()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bogus"));
        assert!(msg.contains("adjacency"));

        let err = NmpConfig::default().with_readout("pool").validate().unwrap_err();
        assert!(err.to_string().contains("readout"));
    }

    #[test]
    fn test_symmetric_softmax_rejected() {
        let learned = LearnedConfig {
            symmetric: true,
            activation: "softmax".to_string(),
            ..Default::default()
        };
        let err = NmpConfig::default().with_learned(learned).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_physics_needs_fixed_schedule() {
        let config = NmpConfig::default()
            .with_adjacency("physics")
            .with_schedule("dynamic");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_physics_index_out_of_range() {
        let config = NmpConfig::default().with_features(4).with_adjacency("physics");
        assert!(matches!(config.validate(), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_positional_mode() {
        let config = NmpConfig::default();
        assert_eq!(config.positional(), Positional::Off);
        assert_eq!(config.clone().with_trainable_positional(true).positional(), Positional::Off);

        let config = config.with_positional_encoding(true);
        assert_eq!(config.positional(), Positional::Fixed);
        assert_eq!(config.with_trainable_positional(true).positional(), Positional::Trainable);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NmpConfig =
            serde_json::from_str(r#"{"hidden": 16, "learned": {"temperature": 0.5}}"#).unwrap();
        assert_eq!(config.hidden, 16);
        assert_eq!(config.iters, 3);
        assert_eq!(config.learned.temperature, 0.5);
        assert_eq!(config.learned.distance, "negative_square");
    }

    #[test]
    fn test_json_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("jetgraph-config-{}.json", std::process::id()));
        let config = NmpConfig::default().with_readout("set").with_tied(true);
        config.to_json(&path).unwrap();
        let loaded = NmpConfig::from_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
