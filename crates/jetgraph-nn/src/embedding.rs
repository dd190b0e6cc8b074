//! Per-node embedding from raw features to the hidden width.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Init, Linear, Module, VarBuilder};

use crate::activation::Activation;
use crate::batch::NodeMask;
use crate::error::{Error, Result};

/// How node positions enter the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Positional {
    #[default]
    Off,
    /// Constant sinusoid table.
    Fixed,
    /// Sinusoid table plus a learned offset initialised to zero.
    Trainable,
}

/// Sinusoid position table.
///
/// Row 0 is all zeros, so the first node is left untouched; row `p > 0`
/// holds `sin` in even and `cos` in odd columns of
/// `p / 10000^(2⌊j/2⌋ / hidden)`.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    table: Tensor,
    offset: Option<Tensor>,
}

impl PositionalEncoding {
    /// Longest sequence the table covers.
    pub const MAX_POSITIONS: usize = 1000;

    pub fn new(hidden: usize, device: &Device) -> Result<Self> {
        let mut data = vec![0f32; Self::MAX_POSITIONS * hidden];
        for pos in 1..Self::MAX_POSITIONS {
            for j in 0..hidden {
                let exponent = (2 * (j / 2)) as f64 / hidden as f64;
                let angle = pos as f64 / 10000f64.powf(exponent);
                let value = if j % 2 == 0 { angle.sin() } else { angle.cos() };
                data[pos * hidden + j] = value as f32;
            }
        }
        let table = Tensor::from_vec(data, (Self::MAX_POSITIONS, hidden), device)?;
        Ok(Self {
            table,
            offset: None,
        })
    }

    /// Table registered as `offset` under `vb`, starting at the sinusoid.
    pub fn trainable(hidden: usize, vb: VarBuilder) -> Result<Self> {
        let mut encoding = Self::new(hidden, vb.device())?;
        encoding.table = encoding.table.to_dtype(vb.dtype())?;
        encoding.offset = Some(vb.get_with_hints(
            (Self::MAX_POSITIONS, hidden),
            "offset",
            Init::Const(0.0),
        )?);
        Ok(encoding)
    }

    pub fn is_trainable(&self) -> bool {
        self.offset.is_some()
    }

    /// Current `(MAX_POSITIONS, hidden)` table.
    pub fn table(&self) -> Result<Tensor> {
        match &self.offset {
            Some(offset) => Ok((&self.table + offset)?),
            None => Ok(self.table.clone()),
        }
    }

    /// Position vectors for `n` nodes, shape `(1, n, hidden)`.
    pub fn encode(&self, n: usize) -> Result<Tensor> {
        if n > Self::MAX_POSITIONS {
            return Err(Error::shape(
                "positional encoding length",
                format!("<= {}", Self::MAX_POSITIONS),
                n,
            ));
        }
        let rows = self.table.narrow(0, 0, n)?;
        let rows = match &self.offset {
            Some(offset) => (rows + offset.narrow(0, 0, n)?)?,
            None => rows,
        };
        Ok(rows.unsqueeze(0)?)
    }
}

/// Stack of Linear layers with an activation after each.
#[derive(Debug, Clone)]
pub struct Embedding {
    layers: Vec<Linear>,
    activation: Activation,
    features: usize,
    positional: Option<PositionalEncoding>,
}

impl Embedding {
    /// # Arguments
    /// - `features`: raw node feature width
    /// - `hidden`: output width
    /// - `layers`: number of Linear layers (at least 1)
    /// - `positional`: whether and how to add the position table
    pub fn new(
        features: usize,
        hidden: usize,
        layers: usize,
        activation: Activation,
        positional: Positional,
        vb: VarBuilder,
    ) -> Result<Self> {
        if layers == 0 {
            return Err(Error::InvalidConfig(
                "embedding needs at least one layer".to_string(),
            ));
        }
        let layers = (0..layers)
            .map(|i| {
                let dim_in = if i == 0 { features } else { hidden };
                linear(dim_in, hidden, vb.pp(format!("layers.{i}")))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let positional = match positional {
            Positional::Off => None,
            Positional::Fixed => Some(PositionalEncoding::new(hidden, vb.device())?),
            Positional::Trainable => {
                Some(PositionalEncoding::trainable(hidden, vb.pp("positional"))?)
            }
        };
        Ok(Self {
            layers,
            activation,
            features,
            positional,
        })
    }

    /// Embed `(B, N, features)` into `(B, N, hidden)`, padding rows zero.
    pub fn forward(&self, x: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        let (_, n, f) = x.dims3()?;
        if f != self.features {
            return Err(Error::shape("node features", self.features, f));
        }

        let mut h = x.clone();
        for layer in &self.layers {
            h = self.activation.apply(&layer.forward(&h)?)?;
        }
        if let Some(positional) = &self.positional {
            let pos = positional.encode(n)?.to_dtype(h.dtype())?;
            h = h.broadcast_add(&pos)?;
        }
        match mask {
            Some(mask) => Ok(h.broadcast_mul(mask.nodes())?),
            None => Ok(h),
        }
    }
}
