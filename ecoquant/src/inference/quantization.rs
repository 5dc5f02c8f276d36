// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Dynamic INT8 quantization of weighted layers.
//!
//! Weights are quantized once, symmetrically per tensor, when a network is converted.
//! Activations are quantized per batch at inference time from their observed range,
//! multiplied in integer arithmetic with i32 accumulation, and scaled back to f32.
//! The product loop is portable Rust over contiguous int8 rows and relies on the
//! compiler to vectorise it.

use tract_onnx::prelude::tract_ndarray::{Array1, Array2};

const INT8_MAX: f32 = 127.0;

/// Scale mapping `[-max_abs, max_abs]` onto `[-127, 127]`.
pub(crate) fn symmetric_scale(values: &Array2<f32>) -> f32 {
    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max_abs > 0.0 && max_abs.is_finite() {
        max_abs / INT8_MAX
    } else {
        1.0
    }
}

pub(crate) fn quantize_value(value: f32, scale: f32) -> i8 {
    (value / scale).round().clamp(-INT8_MAX, INT8_MAX) as i8
}

/// Integer dot product of two int8 rows with i32 accumulation.
///
/// Each product fits in i16, and the sum cannot overflow for rows shorter than
/// `i32::MAX / (127 * 127)` elements.
#[inline]
pub(crate) fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    a.iter()
        .zip(b)
        .map(|(&x, &w)| i32::from(i16::from(x) * i16::from(w)))
        .sum()
}

/// A dense kernel holding int8 weights.
#[derive(Debug, Clone)]
pub(crate) struct QuantizedLinear {
    /// Row-major `(out, in)`, so each output reads one contiguous weight row.
    weight: Vec<i8>,
    in_features: usize,
    out_features: usize,
    weight_scale: f32,
    bias: Array1<f32>,
}

impl QuantizedLinear {
    /// `weight_t` is `(in, out)`, as held by the float layer.
    pub(crate) fn from_float(weight_t: &Array2<f32>, bias: &Array1<f32>) -> Self {
        let weight_scale = symmetric_scale(weight_t);
        QuantizedLinear {
            weight: weight_t
                .t()
                .iter()
                .map(|&w| quantize_value(w, weight_scale))
                .collect(),
            in_features: weight_t.nrows(),
            out_features: weight_t.ncols(),
            weight_scale,
            bias: bias.clone(),
        }
    }

    pub(crate) fn in_features(&self) -> usize {
        self.in_features
    }

    pub(crate) fn out_features(&self) -> usize {
        self.out_features
    }

    pub(crate) fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        debug_assert_eq!(x.ncols(), self.in_features);
        let x_scale = symmetric_scale(x);
        let x_q: Vec<i8> = x.iter().map(|&v| quantize_value(v, x_scale)).collect();
        let output_scale = x_scale * self.weight_scale;

        let mut output = Array2::<f32>::zeros((x.nrows(), self.out_features));
        if self.in_features == 0 {
            output += &self.bias;
            return output;
        }
        for (row, mut out_row) in x_q.chunks_exact(self.in_features).zip(output.rows_mut()) {
            for ((out, weights), bias) in out_row
                .iter_mut()
                .zip(self.weight.chunks_exact(self.in_features))
                .zip(self.bias.iter())
            {
                *out = dot_i8(row, weights) as f32 * output_scale + bias;
            }
        }
        output
    }
}
