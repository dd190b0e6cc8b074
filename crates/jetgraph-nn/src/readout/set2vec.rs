//! Set2Vec: order-invariant pooling by repeated attention.
//!
//! ```text
//! M      = W_m h                          memory, (B, N, d)
//! q*_0   = 0
//! q_t    = LSTM(q*_{t-1})
//! a_t    = softmax_i(M_i · q_t)          over valid nodes only
//! r_t    = Σ_i a_t,i M_i
//! q*_t   = [q_t, r_t]
//! out    = W_o q*_T
//! ```
//!
//! Vinyals et al., "Order Matters: Sequence to Sequence for Sets", ICLR 2016.

use candle_core::{Tensor, D};
use candle_nn::rnn::{lstm, LSTMConfig, LSTM, RNN};
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::batch::NodeMask;
use crate::error::{Error, Result};

const MASKED_SCORE: f64 = -1e9;
const ATTENTION_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct Set2Vec {
    memory: Linear,
    lstm: LSTM,
    output: Linear,
    steps: usize,
    memory_dim: usize,
}

impl Set2Vec {
    pub fn new(
        hidden: usize,
        target: usize,
        memory_dim: usize,
        steps: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if steps == 0 {
            return Err(Error::InvalidConfig(
                "set readout needs at least one step".to_string(),
            ));
        }
        Ok(Self {
            memory: linear(hidden, memory_dim, vb.pp("memory"))?,
            lstm: lstm(2 * memory_dim, memory_dim, LSTMConfig::default(), vb.pp("lstm"))?,
            output: linear(2 * memory_dim, target, vb.pp("output"))?,
            steps,
            memory_dim,
        })
    }

    /// Attention weights over nodes, `(B, N)`.
    fn attend(memory: &Tensor, query: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let scores = memory.matmul(&query.unsqueeze(2)?)?.squeeze(2)?;
        let Some(mask) = mask else {
            return Ok(candle_nn::ops::softmax(&scores, D::Minus1)?);
        };
        let valid = mask.nodes().squeeze(2)?;
        let penalty = valid.affine(-MASKED_SCORE, MASKED_SCORE)?;
        let masked = (scores.mul(&valid)? + penalty)?;
        let max = masked.max_keepdim(D::Minus1)?;
        let weights = masked.broadcast_sub(&max)?.exp()?.mul(&valid)?;
        let total = (weights.sum_keepdim(D::Minus1)? + ATTENTION_EPS)?;
        Ok(weights.broadcast_div(&total)?)
    }

    pub fn forward(&self, h: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let (b, _, _) = h.dims3()?;
        let memory = self.memory.forward(h)?.contiguous()?;

        let mut state = self.lstm.zero_state(b)?;
        let mut q_star = Tensor::zeros((b, 2 * self.memory_dim), h.dtype(), h.device())?;
        for _ in 0..self.steps {
            state = self.lstm.step(&q_star, &state)?;
            let query = state.h().contiguous()?;
            let attention = Self::attend(&memory, &query, mask)?;
            let read = attention.unsqueeze(1)?.matmul(&memory)?.squeeze(1)?;
            q_star = Tensor::cat(&[&query, &read], 1)?;
        }
        Ok(self.output.forward(&q_star)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn set2vec(varmap: &VarMap) -> Set2Vec {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        Set2Vec::new(4, 2, 4, 3, vb).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let varmap = VarMap::new();
        let s2v = set2vec(&varmap);
        let h = Tensor::randn(0f32, 1f32, (3, 5, 4), &Device::Cpu).unwrap();
        assert_eq!(s2v.forward(&h, None).unwrap().dims(), &[3, 2]);
    }

    #[test]
    fn test_padding_ignored() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let s2v = set2vec(&varmap);

        let h = Tensor::randn(0f32, 1f32, (1, 2, 4), &device).unwrap();
        let short = s2v.forward(&h, None).unwrap().to_vec2::<f32>().unwrap();

        let padded = h.pad_with_zeros(1, 0, 3).unwrap();
        let mask = NodeMask::from_lengths(&[2], 5, &device).unwrap();
        let long = s2v.forward(&padded, Some(&mask)).unwrap().to_vec2::<f32>().unwrap();

        for (a, b) in short[0].iter().zip(&long[0]) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_steps_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(Set2Vec::new(4, 1, 4, 0, vb).is_err());
    }
}
