//! Bilinear resizing as two matrix products.
//!
//! Resizing `(B, C, H, W) -> (B, C, H', W')` is `R_h · X · R_wᵀ` where each
//! row of `R` holds the two interpolation weights of one output coordinate.
//! Only matmul and reshape are involved, so gradients flow through the resize
//! on every backend.

use burn::prelude::*;
use burn::tensor::TensorData;
use gain_core::ImageSize;
use serde::{Deserialize, Serialize};

/// How output coordinates map back onto the input grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    /// `src = dst * in / out`, the legacy TensorFlow `resize_bilinear` mapping.
    Legacy,
    /// `src = dst * (in - 1) / (out - 1)`, the mapping of an order-1 spline zoom.
    Corners,
}

/// Interpolation weights for one axis, row-major `(out_len, in_len)`.
///
/// Every row sums to one.
#[must_use]
pub fn interpolation_matrix(in_len: usize, out_len: usize, alignment: Alignment) -> Vec<f32> {
    let mut weights = vec![0.0f32; out_len * in_len];
    if in_len == 0 || out_len == 0 {
        return weights;
    }

    let scale = match alignment {
        Alignment::Legacy => in_len as f64 / out_len as f64,
        Alignment::Corners if out_len > 1 => (in_len - 1) as f64 / (out_len - 1) as f64,
        Alignment::Corners => 0.0,
    };
    let last = (in_len - 1) as f64;

    for dst in 0..out_len {
        let src = (dst as f64 * scale).min(last);
        let lower = src.floor() as usize;
        let upper = (lower + 1).min(in_len - 1);
        let frac = (src - lower as f64) as f32;

        let row = &mut weights[dst * in_len..(dst + 1) * in_len];
        row[lower] += 1.0 - frac;
        row[upper] += frac;
    }

    weights
}

/// Resize a `(B, C, H, W)` tensor to `size` with bilinear interpolation.
///
/// Returns the input unchanged when it already has the requested size.
pub fn resize_bilinear<B: Backend>(
    x: Tensor<B, 4>,
    size: ImageSize,
    alignment: Alignment,
) -> Tensor<B, 4> {
    let [batch, channels, in_h, in_w] = x.dims();
    let [out_h, out_w] = size.as_array();
    if in_h == out_h && in_w == out_w {
        return x;
    }

    let device = x.device();
    let n = batch * channels;

    let rows = Tensor::<B, 2>::from_data(
        TensorData::new(interpolation_matrix(in_h, out_h, alignment), [out_h, in_h]),
        &device,
    );
    let cols = Tensor::<B, 2>::from_data(
        TensorData::new(interpolation_matrix(in_w, out_w, alignment), [out_w, in_w]),
        &device,
    )
    .transpose();

    let flat = x.reshape([n, in_h, in_w]);
    let out = rows.unsqueeze::<3>().repeat_dim(0, n).matmul(flat);
    let out = out.matmul(cols.unsqueeze::<3>().repeat_dim(0, n));

    out.reshape([batch, channels, out_h, out_w])
}
