//! Graph-level readouts.
//!
//! Reduce final node states `(B, N, hidden)` to one output per graph:
//!
//! - `dtnn`: `fc2(tanh(fc1 h))`, mean over nodes
//! - `simple`: `tanh(fc h)`, mean over nodes
//! - `clf`: mean over nodes, then `sigmoid(fc ·)`, output `(B, 1)`
//! - `mult`: several `simple` heads stacked, output `(B, heads, target)`
//! - `set`: [`Set2Vec`] attention pooling
//!
//! Means are taken over valid nodes when a mask is given, so a head never
//! sees padding even though per-node biases make padded rows nonzero.

mod set2vec;

use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::batch::NodeMask;
use crate::config::NmpConfig;
use crate::error::{ComponentKind, Error, Result};

pub use set2vec::Set2Vec;

/// Reduces node states to a graph-level output.
pub trait GraphReadout {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor>;
}

/// Readout family named by a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadoutKind {
    Dtnn,
    Simple,
    Clf,
    Mult,
    Set,
}

impl FromStr for ReadoutKind {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "dtnn" => Ok(ReadoutKind::Dtnn),
            "simple" => Ok(ReadoutKind::Simple),
            "clf" => Ok(ReadoutKind::Clf),
            "mult" => Ok(ReadoutKind::Mult),
            "set" => Ok(ReadoutKind::Set),
            other => Err(Error::unknown(ComponentKind::Readout, other)),
        }
    }
}

/// Mean over the node axis, restricted to valid nodes when masked.
///
/// Graphs with no valid node pool to zero.
pub fn mean_nodes(x: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
    match mask {
        None => Ok(x.mean(1)?),
        Some(mask) => {
            let total = x.broadcast_mul(mask.nodes())?.sum(1)?;
            let count = mask.counts()?.maximum(1.0)?;
            Ok(total.broadcast_div(&count)?)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DtnnReadout {
    fc1: Linear,
    fc2: Linear,
}

impl DtnnReadout {
    pub fn new(hidden: usize, target: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(hidden, hidden, vb.pp("fc1"))?,
            fc2: linear(hidden, target, vb.pp("fc2"))?,
        })
    }
}

impl GraphReadout for DtnnReadout {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let x = self.fc2.forward(&self.fc1.forward(h)?.tanh()?)?;
        mean_nodes(&x, mask)
    }
}

#[derive(Debug, Clone)]
pub struct SimpleReadout {
    fc: Linear,
}

impl SimpleReadout {
    pub fn new(hidden: usize, target: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: linear(hidden, target, vb.pp("fc"))?,
        })
    }
}

impl GraphReadout for SimpleReadout {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        mean_nodes(&self.fc.forward(h)?.tanh()?, mask)
    }
}

/// Binary classification head producing a probability per graph.
#[derive(Debug, Clone)]
pub struct ClassificationReadout {
    fc: Linear,
}

impl ClassificationReadout {
    pub fn new(hidden: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: linear(hidden, 1, vb.pp("fc"))?,
        })
    }
}

impl GraphReadout for ClassificationReadout {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let pooled = mean_nodes(h, mask)?;
        Ok(candle_nn::ops::sigmoid(&self.fc.forward(&pooled)?)?)
    }
}

/// Independent `simple` heads stacked on axis 1.
#[derive(Debug, Clone)]
pub struct MultipleReadout {
    heads: Vec<SimpleReadout>,
}

impl MultipleReadout {
    pub fn new(hidden: usize, target: usize, heads: usize, vb: VarBuilder) -> Result<Self> {
        if heads == 0 {
            return Err(Error::InvalidConfig(
                "mult readout needs at least one head".to_string(),
            ));
        }
        let heads = (0..heads)
            .map(|i| SimpleReadout::new(hidden, target, vb.pp(format!("heads.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { heads })
    }
}

impl GraphReadout for MultipleReadout {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let outs = self
            .heads
            .iter()
            .map(|head| head.reduce(h, mask))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&outs, 1)?)
    }
}

impl GraphReadout for Set2Vec {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        self.forward(h, mask)
    }
}

/// Any readout head.
#[derive(Debug, Clone)]
pub enum Readout {
    Dtnn(DtnnReadout),
    Simple(SimpleReadout),
    Clf(ClassificationReadout),
    Mult(MultipleReadout),
    Set(Set2Vec),
}

impl Readout {
    /// Build the head named by `key`.
    pub fn from_key(
        key: &str,
        hidden: usize,
        target: usize,
        config: &NmpConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let readout = match key.parse::<ReadoutKind>()? {
            ReadoutKind::Dtnn => Readout::Dtnn(DtnnReadout::new(hidden, target, vb)?),
            ReadoutKind::Simple => Readout::Simple(SimpleReadout::new(hidden, target, vb)?),
            ReadoutKind::Clf => Readout::Clf(ClassificationReadout::new(hidden, vb)?),
            ReadoutKind::Mult => {
                Readout::Mult(MultipleReadout::new(hidden, target, config.n_readouts, vb)?)
            }
            ReadoutKind::Set => {
                Readout::Set(Set2Vec::new(hidden, target, hidden, config.set_steps, vb)?)
            }
        };
        Ok(readout)
    }
}

impl GraphReadout for Readout {
    fn reduce(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        match self {
            Readout::Dtnn(r) => r.reduce(h, mask),
            Readout::Simple(r) => r.reduce(h, mask),
            Readout::Clf(r) => r.reduce(h, mask),
            Readout::Mult(r) => r.reduce(h, mask),
            Readout::Set(r) => r.reduce(h, mask),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(key: &str) -> (VarMap, Readout) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = NmpConfig::default().with_n_readouts(3);
        let readout = Readout::from_key(key, 4, 2, &config, vb).unwrap();
        (varmap, readout)
    }

    #[test]
    fn test_output_shapes() {
        let h = Tensor::randn(0f32, 1f32, (5, 6, 4), &Device::Cpu).unwrap();
        for (key, dims) in [
            ("dtnn", vec![5, 2]),
            ("simple", vec![5, 2]),
            ("clf", vec![5, 1]),
            ("mult", vec![5, 3, 2]),
            ("set", vec![5, 2]),
        ] {
            let (_vm, readout) = build(key);
            let out = readout.reduce(&h, None).unwrap();
            assert_eq!(out.dims(), dims.as_slice(), "{key}");
        }
    }

    #[test]
    fn test_clf_is_probability() {
        let (_vm, readout) = build("clf");
        let h = (Tensor::randn(0f32, 1f32, (8, 3, 4), &Device::Cpu).unwrap() * 100.0).unwrap();
        let p = readout.reduce(&h, None).unwrap().flatten_all().unwrap();
        for v in p.to_vec1::<f32>().unwrap() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_masked_mean_excludes_padding() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[[1f32, 2.0], [3.0, 4.0], [100.0, 100.0]]], &device).unwrap();
        let mask = NodeMask::from_lengths(&[2], 3, &device).unwrap();
        let mean = mean_nodes(&x, Some(&mask)).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(mean, vec![vec![2.0, 3.0]]);

        let empty = NodeMask::from_lengths(&[0], 3, &device).unwrap();
        let mean = mean_nodes(&x, Some(&empty)).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(mean, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn test_unknown_readout() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let err = Readout::from_key("attention", 4, 1, &NmpConfig::default(), vb).unwrap_err();
        assert!(err.to_string().contains("readout variant `attention`"));
    }
}
