// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Weight encodings and the per-layer weight dump.
//!
//! A dump holds one kernel value per line in kernel table order, so the
//! line number is the flat weight index decoded by [`crate::weight_index`].

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::layout::OutputLayout;
use crate::model::ModelInspector;
use crate::network::NetworkSpec;
use crate::validate::resolve_conv_layer;

/// Text encoding of one weight in a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WeightFormat {
    /// 32-character two's-complement binary string, MSB first.
    #[default]
    Binary,
    /// Signed decimal.
    Int8,
    /// 8 lowercase hex digits of the sign-extended 32-bit word.
    Hex,
}

impl WeightFormat {
    pub fn name(self) -> &'static str {
        match self {
            WeightFormat::Binary => "binary",
            WeightFormat::Int8 => "int8",
            WeightFormat::Hex => "hex",
        }
    }
}

impl FromStr for WeightFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(WeightFormat::Binary),
            "int8" => Ok(WeightFormat::Int8),
            "hex" => Ok(WeightFormat::Hex),
            other => Err(Error::UnsupportedFormat(format!(
                "weight format `{}` (expected binary, int8 or hex)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sign-extended 32-bit two's-complement binary string.
pub fn int8_to_binary32(value: i8) -> String {
    format!("{:032b}", value as i32 as u32)
}

/// Sign-extended 32-bit word as 8 lowercase hex digits.
pub fn int8_to_hex_word(value: i8) -> String {
    format!("{:08x}", value as i32 as u32)
}

pub fn encode_weight(value: i8, format: WeightFormat) -> String {
    match format {
        WeightFormat::Binary => int8_to_binary32(value),
        WeightFormat::Int8 => value.to_string(),
        WeightFormat::Hex => int8_to_hex_word(value),
    }
}

/// Render a dump: one encoded value per line, no newline after the last.
pub fn render_weight_dump(values: &[i8], format: WeightFormat) -> String {
    values
        .iter()
        .map(|&v| encode_weight(v, format))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_weight_dump(path: &Path, values: &[i8], format: WeightFormat) -> Result<()> {
    std::fs::write(path, render_weight_dump(values, format)).map_err(|e| Error::io(path, e))
}

/// Dump the kernel of every target layer of `network` in `format`.
///
/// Returns the written files.
pub fn save_model_weights(
    model: &dyn ModelInspector,
    network: &NetworkSpec,
    format: WeightFormat,
    layout: &OutputLayout,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for spec in network.target_layer_specs()? {
        let layer = resolve_conv_layer(model, spec)?;
        let values = layer.kernel_values()?;
        let path = layout.weight_dump(format, &spec.name);
        write_weight_dump(&path, values, format)?;
        clilog::info!(
            "saved {} weights of {} ({}) to {}",
            values.len(),
            spec.name,
            format,
            path.display()
        );
        written.push(path);
    }
    Ok(written)
}
