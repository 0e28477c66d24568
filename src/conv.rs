// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Convolution index enumeration.
//!
//! Lists, in a fixed nested order, every scalar multiplication a 2D
//! convolution performs as an (input coordinate, weight coordinate) pair.
//! The order is part of the output format: the pairs file and the
//! fault-injection index file are both written in exactly this order.
//!
//! Loop nest (outermost first):
//!
//! ```text
//! filter       in [0, kernel[0])
//! output row   in [0, output[1])
//! output col   in [0, output[2])
//! channel in   in [0, input[3])
//! kernel row   in [0, kernel[1])
//! kernel col   in [0, kernel[2])
//! ```

use serde::{Deserialize, Serialize};

use crate::coord::{InputCoord, OutputPosition, WeightCoord};

/// A 4D tensor shape as reported by the model.
///
/// Negative dimensions (unknown sizes in the model export) are clamped to 0
/// so they enumerate nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorShape(pub [usize; 4]);

impl TensorShape {
    /// Build from model metadata. Shapes that are not rank 4 yield `None`.
    pub fn from_dims(dims: &[i64]) -> Option<Self> {
        if dims.len() != 4 {
            return None;
        }
        let mut shape = [0usize; 4];
        for (s, &d) in shape.iter_mut().zip(dims) {
            *s = d.max(0) as usize;
        }
        Some(TensorShape(shape))
    }

    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }
}

impl std::ops::Index<usize> for TensorShape {
    type Output = usize;

    fn index(&self, i: usize) -> &usize {
        &self.0[i]
    }
}

/// Convolution stride as (height, width). Both must be at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stride {
    pub h: usize,
    pub w: usize,
}

impl Default for Stride {
    fn default() -> Self {
        Stride { h: 1, w: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    #[default]
    Valid,
    Same,
}

/// Padding descriptor. The per-side amounts only matter in `same` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Padding {
    pub mode: PaddingMode,
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    pub fn valid() -> Self {
        Padding::default()
    }

    pub fn same(top: usize, bottom: usize, left: usize, right: usize) -> Self {
        Padding { mode: PaddingMode::Same, top, bottom, left, right }
    }
}

/// Everything the enumerator needs to know about one convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub kernel: TensorShape,
    pub input: TensorShape,
    pub output: TensorShape,
    pub stride: Stride,
    pub padding: Padding,
}

/// One scalar multiplication of the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplicationRecord {
    pub input: InputCoord,
    pub weight: WeightCoord,
}

impl ConvGeometry {
    /// Input shape with `same` padding folded into the spatial dimensions.
    pub fn effective_input_shape(&self) -> TensorShape {
        let mut shape = self.input;
        if self.padding.mode == PaddingMode::Same {
            shape.0[1] += self.padding.top + self.padding.bottom;
            shape.0[2] += self.padding.left + self.padding.right;
        }
        shape
    }

    /// Loop bounds, outermost first.
    fn bounds(&self) -> [usize; 6] {
        let input = self.effective_input_shape();
        [
            self.kernel[0],
            self.output[1],
            self.output[2],
            input[3],
            self.kernel[1],
            self.kernel[2],
        ]
    }

    /// Multiplications per output value (channels in × kernel rows × kernel cols).
    pub fn mults_per_output(&self) -> usize {
        self.bounds()[3..].iter().product()
    }

    pub fn multiplication_count(&self) -> usize {
        self.bounds().iter().product()
    }

    /// Iterate over the multiplications in canonical order.
    pub fn multiplications(&self) -> MultiplicationIter {
        MultiplicationIter {
            bounds: self.bounds(),
            stride: self.stride,
            next: 0,
            total: self.multiplication_count(),
        }
    }

    /// Multiplications grouped by the output value they accumulate into, in
    /// canonical order. Output positions use batch 1.
    pub fn output_groups(&self) -> Vec<OutputGroup> {
        let per_output = self.mults_per_output();
        let [filters, rows, cols, ..] = self.bounds();
        let mut groups = Vec::with_capacity(filters * rows * cols);
        let mut iter = self.multiplications();
        for filter in 0..filters {
            for row in 0..rows {
                for col in 0..cols {
                    groups.push(OutputGroup {
                        position: OutputPosition::new(1, row, col, filter),
                        records: iter.by_ref().take(per_output).collect(),
                    });
                }
            }
        }
        groups
    }
}

/// All multiplications feeding one output value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGroup {
    pub position: OutputPosition,
    pub records: Vec<MultiplicationRecord>,
}

/// Lazy canonical-order enumeration, see [`ConvGeometry::multiplications`].
pub struct MultiplicationIter {
    bounds: [usize; 6],
    stride: Stride,
    next: usize,
    total: usize,
}

impl MultiplicationIter {
    fn record_at(&self, mut flat: usize) -> MultiplicationRecord {
        let mut idx = [0usize; 6];
        for d in (0..6).rev() {
            idx[d] = flat % self.bounds[d];
            flat /= self.bounds[d];
        }
        let [filter, out_row, out_col, channel, k_row, k_col] = idx;
        // stride is 1-based: a stride of 1 adds nothing
        MultiplicationRecord {
            input: InputCoord::new(
                0,
                k_row + out_row + self.stride.h - 1,
                k_col + out_col + self.stride.w - 1,
                channel,
            ),
            weight: WeightCoord::new(filter, k_row, k_col, channel),
        }
    }
}

impl Iterator for MultiplicationIter {
    type Item = MultiplicationRecord;

    fn next(&mut self) -> Option<MultiplicationRecord> {
        if self.next >= self.total {
            return None;
        }
        let record = self.record_at(self.next);
        self.next += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for MultiplicationIter {}

/// Every multiplication of the convolution, in canonical order.
///
/// Zero-sized dimensions give an empty result. Padding amounts are not
/// checked against the output shape.
pub fn enumerate_multiplications(
    kernel: TensorShape,
    input: TensorShape,
    output: TensorShape,
    stride: Stride,
    padding: Padding,
) -> Vec<MultiplicationRecord> {
    ConvGeometry { kernel, input, output, stride, padding }
        .multiplications()
        .collect()
}
