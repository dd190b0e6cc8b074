//! Variable-depth gradient truncation.
//!
//! In variable-depth mode each forward call picks how many leading
//! message-passing iterations run without a learning signal. The forward
//! values are the same as a full-gradient pass; only the backward graph is
//! cut: after `detached` iterations the hidden state (and adjacency) are
//! detached and the remaining iterations run with gradient.
//!
//! ```text
//! Truncated { detached: 2 }, iters = 4
//!
//! embed -> it0 -> it1 -| detach |-> it2 -> it3 -> readout
//!          no gradient           gradient
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// How gradient flows through the message-passing iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    /// Every iteration (and the embedding) receives gradient.
    #[default]
    Full,
    /// The first `detached` iterations receive no gradient.
    Truncated { detached: usize },
}

impl Depth {
    /// Whether the state is cut right before iteration `iter`.
    pub fn detaches_before(&self, iter: usize) -> bool {
        matches!(self, Depth::Truncated { detached } if *detached == iter && iter > 0)
    }
}

/// Seeded source of per-call [`Depth`] draws.
#[derive(Debug, Clone)]
pub struct VariableDepth {
    rng: StdRng,
    iters: usize,
}

impl VariableDepth {
    pub fn new(iters: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            iters,
        }
    }

    /// Draw `detached` uniformly from `0..iters`.
    pub fn draw(&mut self) -> Depth {
        if self.iters == 0 {
            return Depth::Full;
        }
        Depth::Truncated {
            detached: self.rng.random_range(0..self.iters),
        }
    }
}

/// Variable depth runs every iteration through the same layer.
pub(crate) fn resolve_tied(variable_depth: bool, tied: bool) -> bool {
    if variable_depth && !tied {
        warn!("variable depth requested with untied layers, using tied layers");
        return true;
    }
    tied
}
