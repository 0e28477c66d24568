// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Static description of the supported networks.
//!
//! The model export says what the interpreter holds; this says what it is
//! expected to hold. [`crate::validate`] compares the two.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::conv::{Padding, Stride};
use crate::error::{Error, Result};

/// Expected shape of one convolution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvLayerSpec {
    /// `<operation><occurrence>`, e.g. `conv1`.
    pub name: String,
    /// Position of the layer's operator in the interpreter's op table.
    pub op_index: usize,
    /// Number of filters (output channels).
    pub filters: usize,
    /// Square kernel side.
    pub kernel: usize,
    #[serde(default)]
    pub stride: Stride,
    #[serde(default)]
    pub padding: Padding,
}

/// Affine quantization of the network input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputQuantization {
    pub zero_point: i32,
    pub scale: f32,
}

impl InputQuantization {
    pub fn dequantize(&self, q: i8) -> f32 {
        (q as i32 - self.zero_point) as f32 * self.scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    pub rows: usize,
    pub cols: usize,
}

/// A supported network: where its export lives and which layers to target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    /// Model export file, relative to the pretrained model directory.
    pub model_file: PathBuf,
    pub target_layers: Vec<String>,
    pub layers: Vec<ConvLayerSpec>,
    pub input_quantization: InputQuantization,
    pub input_image: ImageDims,
}

impl NetworkSpec {
    /// LeNet-5 with three 5×5 valid convolutions; `conv1` is the target.
    pub fn lenet5() -> Self {
        let conv = |name: &str, op_index, filters| ConvLayerSpec {
            name: name.to_string(),
            op_index,
            filters,
            kernel: 5,
            stride: Stride::default(),
            padding: Padding::valid(),
        };
        NetworkSpec {
            name: "lenet5".to_string(),
            model_file: PathBuf::from("lenet5_quantized.json"),
            target_layers: vec!["conv1".to_string()],
            layers: vec![conv("conv1", 0, 6), conv("conv2", 4, 16), conv("conv3", 8, 120)],
            input_quantization: InputQuantization {
                zero_point: -128,
                scale: 1.0 / 255.0,
            },
            input_image: ImageDims { rows: 32, cols: 32 },
        }
    }

    /// Look up a layer by name, ignoring case.
    pub fn conv_layer(&self, name: &str) -> Result<&ConvLayerSpec> {
        self.layers
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::MissingKey(format!("layer `{}` of network `{}`", name, self.name)))
    }

    pub fn target_layer_specs(&self) -> Result<Vec<&ConvLayerSpec>> {
        self.target_layers.iter().map(|l| self.conv_layer(l)).collect()
    }

    /// The first target layer; stages that work on a single layer use it.
    pub fn primary_layer(&self) -> Result<&ConvLayerSpec> {
        let name = self
            .target_layers
            .first()
            .ok_or_else(|| Error::MissingKey(format!("target layer of network `{}`", self.name)))?;
        self.conv_layer(name)
    }
}

/// Networks available without any configuration.
pub fn builtin_networks() -> Vec<NetworkSpec> {
    vec![NetworkSpec::lenet5()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenet5_layers() {
        let net = NetworkSpec::lenet5();
        let conv2 = net.conv_layer("CONV2").unwrap();
        assert_eq!((conv2.op_index, conv2.filters, conv2.kernel), (4, 16, 5));
        assert_eq!(net.primary_layer().unwrap().name, "conv1");
        assert!(matches!(net.conv_layer("conv9"), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_dequantize() {
        let q = InputQuantization { zero_point: -128, scale: 0.5 };
        assert_eq!(q.dequantize(-128), 0.0);
        assert_eq!(q.dequantize(0), 64.0);
    }

    #[test]
    fn test_layer_spec_from_toml() {
        let spec: ConvLayerSpec = toml::from_str(
            r#"
name = "conv1"
op_index = 0
filters = 8
kernel = 3
stride = { h = 1, w = 1 }
padding = { mode = "same", top = 1, bottom = 1, left = 1, right = 1 }
"#,
        )
        .unwrap();
        assert_eq!(spec.padding, Padding::same(1, 1, 1, 1));
    }
}
