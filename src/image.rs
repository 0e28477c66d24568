// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Input images rebuilt from gathered ATPG patterns.
//!
//! Two products:
//!
//! - the *fill-with-pattern* (FWP) image, where every pixel holds a pattern
//!   found for some weight that pixel is multiplied with;
//! - a C header for the embedded test harness, where each weight's positive
//!   and negative pattern is placed at one dedicated pixel and every other
//!   pixel is zero.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::coord::{InputCoord, WeightCoord};
use crate::error::{Error, Result};
use crate::layout::OutputLayout;
use crate::network::{ImageDims, InputQuantization, NetworkSpec};
use crate::patterns::{load_patterns, load_positions, PatternRecord};
use crate::weight_index::SignVariant;

/// Batch index of the input coordinates in the positions files.
const IMAGE_BATCH: usize = 1;

/// Custom image kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomImageMode {
    /// Fill with pattern.
    Fwp,
}

impl std::str::FromStr for CustomImageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FWP" => Ok(CustomImageMode::Fwp),
            other => Err(Error::UnsupportedFormat(format!("custom image mode `{}`", other))),
        }
    }
}

pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Low byte of a pattern as two lowercase hex digits.
pub fn pattern_to_hex_byte(pattern: &PatternRecord) -> String {
    format!("{:02x}", pattern.value() & 0xFF)
}

fn pixel_key(row: usize, col: usize) -> InputCoord {
    InputCoord::new(IMAGE_BATCH, row, col, 0)
}

/// For every input position, the distinct pattern bytes usable there, in
/// first-seen order.
pub fn fwp_input_options(
    patterns: &[PatternRecord],
    positions: &IndexMap<WeightCoord, Vec<InputCoord>>,
) -> Result<IndexMap<InputCoord, Vec<String>>> {
    let mut options: IndexMap<InputCoord, Vec<String>> = IndexMap::new();
    for pattern in patterns {
        let inputs = positions
            .get(&pattern.weight)
            .ok_or_else(|| Error::MissingKey(format!("input positions of weight {}", pattern.weight)))?;
        let hex = pattern_to_hex_byte(pattern);
        for input in inputs {
            let slot = options.entry(*input).or_default();
            if !slot.contains(&hex) {
                slot.push(hex.clone());
            }
        }
    }
    Ok(options)
}

/// A quantized image and its dequantized values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FwpImage {
    pub bytes: Vec<Vec<i8>>,
    pub values: Vec<Vec<f32>>,
}

fn parse_hex_byte(hex: &str) -> Result<i8> {
    u8::from_str_radix(hex, 16)
        .map(|b| b as i8)
        .map_err(|_| Error::Serde(format!("malformed hex byte `{}`", hex)))
}

/// Pick a random usable pattern for every pixel. Pixels no pattern applies
/// to borrow one from a random pixel that has patterns.
pub fn build_fwp_image(
    options: &IndexMap<InputCoord, Vec<String>>,
    dims: ImageDims,
    quant: InputQuantization,
    rng: &mut impl Rng,
) -> Result<FwpImage> {
    if options.is_empty() {
        return Err(Error::MissingKey("any input position with a pattern".to_string()));
    }
    let mut bytes = Vec::with_capacity(dims.rows);
    let mut values = Vec::with_capacity(dims.rows);
    for x in 0..dims.rows {
        let mut byte_row = Vec::with_capacity(dims.cols);
        let mut value_row = Vec::with_capacity(dims.cols);
        for y in 0..dims.cols {
            let candidates = match options.get(&pixel_key(x, y)) {
                Some(c) => c,
                None => &options[rng.gen_range(0..options.len())],
            };
            let byte = parse_hex_byte(&candidates[rng.gen_range(0..candidates.len())])?;
            byte_row.push(byte);
            value_row.push(quant.dequantize(byte));
        }
        bytes.push(byte_row);
        values.push(value_row);
    }
    Ok(FwpImage { bytes, values })
}

/// One row per line, two hex digits per pixel, space separated.
pub fn render_image_hex(bytes: &[Vec<i8>]) -> String {
    let mut out = String::new();
    for row in bytes {
        let line: Vec<String> = row.iter().map(|&b| format!("{:02x}", b as u8)).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| Error::io(path, e))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string(value).map_err(|e| Error::json(path, e))?;
    write_file(path, &text)
}

/// Build and save the FWP image of `network` from the gathered patterns and
/// the all-positions file.
pub fn generate_fwp_image(
    network: &NetworkSpec,
    layout: &OutputLayout,
    seed: Option<u64>,
) -> Result<FwpImage> {
    let patterns = load_patterns(&layout.patterns_file())?;
    let positions = load_positions(&layout.all_positions_file())?;
    let options = fwp_input_options(&patterns, &positions)?;

    let options_doc: IndexMap<String, &Vec<String>> =
        options.iter().map(|(k, v)| (k.to_string(), v)).collect();
    write_json(&layout.fwp_possibilities_file(), &options_doc)?;
    clilog::info!(
        "{} input positions have at least one suitable pattern",
        options.len()
    );

    let mut rng = make_rng(seed);
    let image = build_fwp_image(&options, network.input_image, network.input_quantization, &mut rng)?;
    write_file(&layout.fwp_image_hex(), &render_image_hex(&image.bytes))?;
    write_json(&layout.fwp_image_json(), &image.values)?;
    clilog::info!("FWP image saved to {}", layout.fwp_image_hex().display());
    Ok(image)
}

pub fn generate_custom_input_image(
    mode: CustomImageMode,
    network: &NetworkSpec,
    layout: &OutputLayout,
    seed: Option<u64>,
) -> Result<()> {
    match mode {
        CustomImageMode::Fwp => generate_fwp_image(network, layout, seed).map(|_| ()),
    }
}

/// Pixels dedicated to one weight's positive and negative pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailablePositions {
    pub positive: InputCoord,
    pub negative: InputCoord,
}

impl AvailablePositions {
    pub fn get(&self, sign: SignVariant) -> InputCoord {
        match sign {
            SignVariant::Positive => self.positive,
            SignVariant::Negative => self.negative,
        }
    }
}

/// Give every weight two distinct pixels among the positions it is
/// multiplied with, never handing out a pixel twice.
pub fn choose_available_positions(
    positions: &IndexMap<WeightCoord, Vec<InputCoord>>,
    rng: &mut impl Rng,
) -> Result<IndexMap<WeightCoord, AvailablePositions>> {
    let mut taken: HashSet<InputCoord> = HashSet::new();
    let mut chosen = IndexMap::with_capacity(positions.len());
    for (weight, inputs) in positions {
        let mut free: Vec<InputCoord> = inputs.iter().filter(|i| !taken.contains(*i)).copied().collect();
        if free.len() < 2 {
            return Err(Error::MissingKey(format!(
                "two free input positions for weight {} ({} left)",
                weight,
                free.len()
            )));
        }
        let positive = free.swap_remove(rng.gen_range(0..free.len()));
        let negative = free.swap_remove(rng.gen_range(0..free.len()));
        taken.insert(positive);
        taken.insert(negative);
        chosen.insert(*weight, AvailablePositions { positive, negative });
    }
    Ok(chosen)
}

/// `{"<weight>": ["<positive input>", "<negative input>"]}`
pub fn render_available_positions(chosen: &IndexMap<WeightCoord, AvailablePositions>) -> Result<String> {
    let doc: IndexMap<String, [String; 2]> = chosen
        .iter()
        .map(|(w, p)| (w.to_string(), [p.positive.to_string(), p.negative.to_string()]))
        .collect();
    serde_json::to_string_pretty(&doc).map_err(|e| Error::Serde(e.to_string()))
}

pub fn load_available_positions(path: &Path) -> Result<IndexMap<WeightCoord, AvailablePositions>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let doc: IndexMap<String, [String; 2]> =
        serde_json::from_str(&content).map_err(|e| Error::json(path, e))?;
    let malformed = |key: &str| Error::Serde(format!("{}: malformed coordinate `{}`", path.display(), key));
    let mut chosen = IndexMap::with_capacity(doc.len());
    for (weight, [positive, negative]) in doc {
        chosen.insert(
            weight.parse().map_err(|_| malformed(&weight))?,
            AvailablePositions {
                positive: positive.parse().map_err(|_| malformed(&positive))?,
                negative: negative.parse().map_err(|_| malformed(&negative))?,
            },
        );
    }
    Ok(chosen)
}

pub fn save_available_positions(layout: &OutputLayout, seed: Option<u64>) -> Result<usize> {
    let positions = load_positions(&layout.all_positions_file())?;
    let mut rng = make_rng(seed);
    let chosen = choose_available_positions(&positions, &mut rng)?;
    let path = layout.available_positions_file();
    write_file(&path, &render_available_positions(&chosen)?)?;
    clilog::info!("{} weights placed, saved to {}", chosen.len(), path.display());
    Ok(chosen.len())
}

/// Value of pixel (`x`, `y`) in the header: the low byte of the pattern of
/// whichever weight owns the pixel, or `0x0`.
fn header_pixel(
    x: usize,
    y: usize,
    chosen: &IndexMap<WeightCoord, AvailablePositions>,
    patterns: &[PatternRecord],
) -> String {
    let mut value = None;
    for (weight, places) in chosen {
        for sign in SignVariant::ALL {
            let p = places.get(sign);
            if p.row != x || p.col != y {
                continue;
            }
            if let Some(pattern) = patterns
                .iter()
                .find(|r| r.sign == Some(sign) && r.weight == *weight)
            {
                value = Some(format!("{:#04x}", pattern.value() & 0xFF));
            }
        }
    }
    value.unwrap_or_else(|| "0x0".to_string())
}

/// C header holding the input image as an int8 array.
pub fn render_input_header(
    model: &str,
    dims: ImageDims,
    chosen: &IndexMap<WeightCoord, AvailablePositions>,
    patterns: &[PatternRecord],
) -> String {
    let guard = format!("TENSORFLOW_LITE_MICRO_{}_INPUT_H_", model.to_uppercase());
    let mut out = format!("#ifndef {guard}\n#define {guard}\n\n#include <cstdint>\n\n");
    out.push_str(&format!(
        "const unsigned int {}_input_data_size = {} * {};\n\n",
        model, dims.rows, dims.cols
    ));
    out.push_str(&format!(
        "const int8_t {m}_input_data[{m}_input_data_size] = {{\n\t",
        m = model
    ));

    let mut rows = Vec::with_capacity(dims.cols);
    for y in 0..dims.cols {
        let row: Vec<String> = (0..dims.rows)
            .map(|x| header_pixel(x, y, chosen, patterns))
            .collect();
        rows.push(row.join(", "));
    }
    out.push_str(&rows.join(", \n\t"));
    out.push_str("\n};\n\n#endif");
    out
}

pub fn save_input_header(network: &NetworkSpec, layout: &OutputLayout) -> Result<()> {
    let chosen = load_available_positions(&layout.available_positions_file())?;
    let patterns = load_patterns(&layout.patterns_file())?;
    let header = render_input_header(layout.model(), network.input_image, &chosen, &patterns);
    let path = layout.input_header();
    write_file(&path, &header)?;
    clilog::info!("input header saved to {}", path.display());
    Ok(())
}
