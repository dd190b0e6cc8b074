//! Elementwise nonlinearities selectable by key.

use std::str::FromStr;

use candle_core::Tensor;

use crate::error::{ComponentKind, Error, Result};

/// Nonlinearity used by embeddings, message transforms and updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Tanh,
    Relu,
    /// LeakyReLU with the given negative slope.
    LeakyRelu(f64),
    Sigmoid,
    Identity,
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        let out = match self {
            Activation::Tanh => xs.tanh()?,
            Activation::Relu => xs.relu()?,
            Activation::LeakyRelu(slope) => candle_nn::ops::leaky_relu(xs, *slope)?,
            Activation::Sigmoid => candle_nn::ops::sigmoid(xs)?,
            Activation::Identity => xs.clone(),
        };
        Ok(out)
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            "leaky_relu" | "leakyrelu" => Ok(Activation::LeakyRelu(0.01)),
            "sigmoid" => Ok(Activation::Sigmoid),
            "identity" | "linear" | "none" => Ok(Activation::Identity),
            other => Err(Error::unknown(ComponentKind::Activation, other)),
        }
    }
}
