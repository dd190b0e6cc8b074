//! Activations that turn raw pairwise scores into non-negative weights.

use std::str::FromStr;

use candle_core::{Tensor, D};

use crate::batch::NodeMask;
use crate::error::{ComponentKind, Error, Result};

/// Added to row sums before normalising.
const SOFTMAX_EPS: f64 = 1e-12;
/// Score assigned to masked columns before the row max is taken.
const MASKED_SCORE: f64 = -1e9;

/// Score-to-weight activation applied to a `(B, N, N)` matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixActivation {
    /// Row softmax over valid columns.
    Softmax,
    /// Elementwise `exp`.
    Exp,
    /// Scores passed through unchanged.
    None,
}

impl MatrixActivation {
    /// Apply the activation; entries touching padding come out exactly 0.
    pub fn apply(&self, scores: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
        match self {
            MatrixActivation::Softmax => masked_softmax(scores, mask),
            MatrixActivation::Exp => apply_pair_mask(&scores.exp()?, mask),
            MatrixActivation::None => apply_pair_mask(scores, mask),
        }
    }
}

impl FromStr for MatrixActivation {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "softmax" | "mask_softmax" => Ok(MatrixActivation::Softmax),
            "exp" => Ok(MatrixActivation::Exp),
            "none" | "identity" => Ok(MatrixActivation::None),
            other => Err(Error::unknown(ComponentKind::MatrixActivation, other)),
        }
    }
}

/// Zero every entry outside the pair mask, if any.
///
/// Selects rather than multiplies, so a non-finite value on a padded pair
/// still comes out as 0.
pub(crate) fn apply_pair_mask(matrix: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
    match mask {
        Some(mask) => {
            let valid = mask.valid_pairs()?.broadcast_as(matrix.shape())?;
            Ok(valid.where_cond(matrix, &matrix.zeros_like()?)?)
        }
        None => Ok(matrix.clone()),
    }
}

/// Row softmax restricted to valid columns.
///
/// Rows with no valid column resolve to all zeros.
pub fn masked_softmax(scores: &Tensor, mask: Option<&NodeMask>) -> Result<Tensor> {
    let Some(mask) = mask else {
        return Ok(candle_nn::ops::softmax(scores, D::Minus1)?);
    };
    let pairs = mask.pairs();
    let valid = mask.valid_pairs()?.broadcast_as(scores.shape())?;

    let floor = scores.zeros_like()?.affine(1.0, MASKED_SCORE)?;
    let masked = valid.where_cond(scores, &floor)?;
    let row_max = masked.max_keepdim(D::Minus1)?;
    let weights = masked
        .broadcast_sub(&row_max)?
        .exp()?
        .broadcast_mul(pairs)?;
    let total = (weights.sum_keepdim(D::Minus1)? + SOFTMAX_EPS)?;
    Ok(weights.broadcast_div(&total)?)
}
