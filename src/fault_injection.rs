// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Files for the in-the-loop fault injection campaign.
//!
//! - `<model>_<layer>_mul_indexes.json`: every multiplication of the layer
//!   as `[[0, row, col, ch], [filter, k_row, k_col, ch]]`, canonical order;
//! - `<model>_<layer>_mults.txt`: the operand values of those
//!   multiplications for one input image, one `0xIIIIIIII 0xWWWWWWWW` line
//!   each, sign-extended to 32 bits.

use std::path::Path;

use crate::conv::{ConvGeometry, TensorShape};
use crate::error::{Error, Result};
use crate::layout::OutputLayout;
use crate::model::ModelInspector;
use crate::network::ConvLayerSpec;
use crate::validate::resolve_conv_layer;

pub type MulIndex = ([usize; 4], [usize; 4]);

pub fn mul_indexes(geometry: &ConvGeometry) -> Vec<MulIndex> {
    geometry
        .multiplications()
        .map(|r| (r.input.to_array(), r.weight.to_array()))
        .collect()
}

pub fn save_mul_indexes(geometry: &ConvGeometry, path: &Path) -> Result<usize> {
    let indexes = mul_indexes(geometry);
    let text = serde_json::to_string(&indexes).map_err(|e| Error::json(path, e))?;
    std::fs::write(path, text).map_err(|e| Error::io(path, e))?;
    Ok(indexes.len())
}

pub fn load_mul_indexes(path: &Path) -> Result<Vec<MulIndex>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| Error::json(path, e))
}

/// A dense int8 tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Int8Tensor {
    pub shape: TensorShape,
    pub data: Vec<i8>,
}

impl Int8Tensor {
    pub fn new(shape: TensorShape, data: Vec<i8>) -> Result<Self> {
        if data.len() < shape.num_elements() {
            return Err(Error::ContractViolation(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape.0,
                shape.num_elements(),
                data.len()
            )));
        }
        let mut data = data;
        data.truncate(shape.num_elements());
        Ok(Int8Tensor { shape, data })
    }

    pub fn get(&self, idx: [usize; 4]) -> Option<i8> {
        let mut flat = 0;
        for (i, (&x, &dim)) in idx.iter().zip(&self.shape.0).enumerate() {
            if x >= dim {
                return None;
            }
            flat = if i == 0 { x } else { flat * dim + x };
        }
        self.data.get(flat).copied()
    }
}

/// Parse a hex dump, two hex digits per value, ignoring whitespace.
pub fn parse_hex_bytes(text: &str) -> std::result::Result<Vec<i8>, String> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(s, 16)
                .map(|b| b as i8)
                .map_err(|_| format!("malformed hex byte `{}`", s))
        })
        .collect()
}

pub fn load_hex_tensor(path: &Path, shape: TensorShape) -> Result<Int8Tensor> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let data = parse_hex_bytes(&content).map_err(|msg| Error::parse(path, 1, msg))?;
    Int8Tensor::new(shape, data)
}

fn word(value: i8) -> String {
    format!("0x{:08X}", value as i32 as u32)
}

/// One `<input> <weight>` line per multiplication.
pub fn render_mults(indexes: &[MulIndex], input: &Int8Tensor, weight: &Int8Tensor) -> Result<String> {
    let mut out = String::with_capacity(indexes.len() * 22);
    for (i, w) in indexes {
        let iv = input.get(*i).ok_or_else(|| {
            Error::ContractViolation(format!("input index {:?} outside tensor {:?}", i, input.shape.0))
        })?;
        let wv = weight.get(*w).ok_or_else(|| {
            Error::ContractViolation(format!("weight index {:?} outside tensor {:?}", w, weight.shape.0))
        })?;
        out.push_str(&word(iv));
        out.push(' ');
        out.push_str(&word(wv));
        out.push('\n');
    }
    Ok(out)
}

/// Write the index file and the operand file of `spec`'s layer.
///
/// `input_tensor` overrides the default input tensor hex dump location.
pub fn manage_fault_injection_files(
    model: &dyn ModelInspector,
    spec: &ConvLayerSpec,
    layout: &OutputLayout,
    input_tensor: Option<&Path>,
) -> Result<()> {
    let layer = resolve_conv_layer(model, spec)?;
    let timer = clilog::stimer!("fault injection files");

    let index_path = layout.mul_indexes_file(&spec.name);
    let n = save_mul_indexes(&layer.geometry, &index_path)?;
    clilog::info!("{} multiplication indexes saved to {}", n, index_path.display());

    // the index file is the interface between the two halves; read it back
    let indexes = load_mul_indexes(&index_path)?;
    let weight = Int8Tensor::new(layer.geometry.kernel, layer.kernel_values()?.to_vec())?;
    let default_input = layout.input_tensor_file(&spec.name);
    let input_path = input_tensor.unwrap_or(&default_input);
    let input = load_hex_tensor(input_path, layer.geometry.input)?;

    let mults_path = layout.mults_file(&spec.name);
    let text = render_mults(&indexes, &input, &weight)?;
    std::fs::write(&mults_path, text).map_err(|e| Error::io(&mults_path, e))?;
    clilog::info!("multiplication operands saved to {}", mults_path.display());

    clilog::finish!(timer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::{Padding, Stride};
    use crate::network::NetworkSpec;
    use crate::validate::tests::lenet_like_model;
    use crate::weights::WeightFormat;

    #[test]
    fn test_tensor_get() {
        let t = Int8Tensor::new(TensorShape([2, 2, 2, 2]), (0..16).collect()).unwrap();
        assert_eq!(t.get([0, 0, 0, 0]), Some(0));
        assert_eq!(t.get([0, 0, 0, 1]), Some(1));
        assert_eq!(t.get([0, 1, 0, 0]), Some(4));
        assert_eq!(t.get([1, 1, 1, 1]), Some(15));
        assert_eq!(t.get([0, 2, 0, 0]), None);
        assert!(Int8Tensor::new(TensorShape([1, 2, 2, 1]), vec![1, 2]).is_err());

        // trailing values past the shape are dropped
        let t = Int8Tensor::new(TensorShape([1, 2, 2, 1]), vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(t.data, vec![1, 2, 3, 4]);
        assert_eq!(t.get([0, 1, 1, 0]), Some(4));
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("ff 01\n80 7f\n"), Ok(vec![-1, 1, -128, 127]));
        assert!(parse_hex_bytes("fff").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_render_mults() {
        let geometry = ConvGeometry {
            kernel: TensorShape([1, 1, 2, 1]),
            input: TensorShape([1, 1, 3, 1]),
            output: TensorShape([1, 1, 2, 1]),
            stride: Stride::default(),
            padding: Padding::valid(),
        };
        let indexes = mul_indexes(&geometry);
        assert_eq!(indexes[1], ([0, 0, 1, 0], [0, 0, 1, 0]));
        let input = Int8Tensor::new(geometry.input, vec![-111, -75, 25]).unwrap();
        let weight = Int8Tensor::new(geometry.kernel, vec![-51, 25]).unwrap();
        let text = render_mults(&indexes, &input, &weight).unwrap();
        assert_eq!(
            text,
            "0xFFFFFF91 0xFFFFFFCD\n0xFFFFFFB5 0x00000019\n0xFFFFFFB5 0xFFFFFFCD\n0x00000019 0x00000019\n"
        );

        let short = Int8Tensor::new(TensorShape([1, 1, 1, 1]), vec![0]).unwrap();
        assert!(matches!(
            render_mults(&indexes, &short, &weight),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_manage_files() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "lenet5");
        layout.create_dirs(WeightFormat::Binary, &["conv1"]).unwrap();
        let model = lenet_like_model(1);
        let mut network = NetworkSpec::lenet5();
        network.layers[0].filters = 1;
        let spec = network.conv_layer("conv1").unwrap();

        let image: String = (0..32)
            .map(|r| (0..32).map(|c| format!("{:02x}", (r * 32 + c) % 256)).collect::<Vec<_>>().join(" ") + "\n")
            .collect();
        std::fs::write(layout.input_tensor_file("conv1"), image).unwrap();

        manage_fault_injection_files(&model, spec, &layout, None).unwrap();
        let indexes = load_mul_indexes(&layout.mul_indexes_file("conv1")).unwrap();
        assert_eq!(indexes.len(), 19600);
        assert_eq!(indexes[0], ([0, 0, 0, 0], [0, 0, 0, 0]));

        let mults = std::fs::read_to_string(layout.mults_file("conv1")).unwrap();
        let lines: Vec<&str> = mults.lines().collect();
        assert_eq!(lines.len(), 19600);
        let w0 = model.tensors[1].data.as_ref().unwrap()[0];
        assert_eq!(lines[0], format!("0x00000000 {}", word(w0)));
        // second kernel column reads pixel (0, 1)
        assert!(lines[1].starts_with("0x00000001 "));
    }
}
