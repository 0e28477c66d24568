// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Gathered ATPG patterns and the input positions they can be applied at.
//!
//! The patterns file collects, per weight script, the input operand found by
//! the ATPG tool:
//!
//! ```text
//! positive_input_pattern_0_3_4_0 : 00000000000000000000000001011010
//! negative_input_pattern_0_3_4_0 : 11111111111111111111111110100110
//! ```
//!
//! A pattern found for weight `w` is useful at every input position that
//! the convolution multiplies with `w`. [`gather_pattern_input_positions`]
//! joins the patterns with the pairs file on the weight coordinate.

use std::path::Path;

use indexmap::IndexMap;

use crate::conv::OutputGroup;
use crate::coord::{InputCoord, WeightCoord};
use crate::error::{Error, Result};
use crate::layout::OutputLayout;
use crate::network::NetworkSpec;
use crate::pairs::load_input_weight_pairs;
use crate::weight_index::SignVariant;

/// One line of the patterns file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRecord {
    /// `None` for names without a `positive`/`negative` prefix.
    pub sign: Option<SignVariant>,
    pub weight: WeightCoord,
    /// Input operand, MSB first.
    pub bits: String,
}

impl PatternRecord {
    /// Parse `<sign>_input_pattern_<f>_<r>_<c>_<ch> : <bits>`.
    ///
    /// The coordinate is taken from the 4th to 7th `_`-separated fields of
    /// the name and the bit string from the third whitespace-separated token.
    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || tokens[1] != ":" {
            return Err(format!("expected `<name> : <bits>`, got `{}`", line));
        }
        let fields: Vec<&str> = tokens[0].split('_').collect();
        let weight = fields
            .get(3..7)
            .and_then(WeightCoord::from_fields)
            .ok_or_else(|| format!("no weight coordinate in pattern name `{}`", tokens[0]))?;
        let sign = match fields[0] {
            "positive" => Some(SignVariant::Positive),
            "negative" => Some(SignVariant::Negative),
            _ => None,
        };
        let bits = tokens[2];
        if bits.is_empty() || !bits.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(format!("pattern `{}` is not a binary string", bits));
        }
        Ok(PatternRecord { sign, weight, bits: bits.to_string() })
    }

    /// Numeric value of the pattern bits, truncated to the low 32 bits.
    pub fn value(&self) -> u32 {
        self.bits
            .bytes()
            .fold(0u32, |acc, b| (acc << 1) | (b - b'0') as u32)
    }
}

/// Parse a patterns file. Blank lines are skipped; anything else that does
/// not parse is an error.
pub fn parse_patterns(path: &Path, content: &str) -> Result<Vec<PatternRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| PatternRecord::parse_line(l).map_err(|msg| Error::parse(path, i + 1, msg)))
        .collect()
}

pub fn load_patterns(path: &Path) -> Result<Vec<PatternRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_patterns(path, &content)
}

/// Every input coordinate each weight is multiplied with, in pairs-file order.
pub fn inputs_by_weight(groups: &[OutputGroup]) -> IndexMap<WeightCoord, Vec<InputCoord>> {
    let mut index: IndexMap<WeightCoord, Vec<InputCoord>> = IndexMap::new();
    for record in groups.iter().flat_map(|g| &g.records) {
        index.entry(record.weight).or_default().push(record.input);
    }
    index
}

/// For each weight that has a pattern, the input positions the pattern can
/// be applied at. Weights appear once, in order of their first pattern.
/// Weights absent from the pairs are reported and left out.
pub fn gather_pattern_input_positions(
    patterns: &[PatternRecord],
    groups: &[OutputGroup],
) -> IndexMap<WeightCoord, Vec<InputCoord>> {
    let index = inputs_by_weight(groups);
    let mut positions = IndexMap::new();
    for pattern in patterns {
        if positions.contains_key(&pattern.weight) {
            continue;
        }
        match index.get(&pattern.weight) {
            Some(inputs) => {
                positions.insert(pattern.weight, inputs.clone());
            }
            None => clilog::warn!(
                PAT_NO_PAIRS,
                "pattern weight {} is never multiplied in this layer",
                pattern.weight
            ),
        }
    }
    positions
}

/// `{"<weight>": ["<input>", ...]}`, the all-positions file format.
pub fn render_positions(positions: &IndexMap<WeightCoord, Vec<InputCoord>>) -> Result<String> {
    let doc: IndexMap<String, Vec<String>> = positions
        .iter()
        .map(|(w, inputs)| (w.to_string(), inputs.iter().map(|i| i.to_string()).collect()))
        .collect();
    serde_json::to_string(&doc).map_err(|e| Error::Serde(e.to_string()))
}

pub fn load_positions(path: &Path) -> Result<IndexMap<WeightCoord, Vec<InputCoord>>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let doc: IndexMap<String, Vec<String>> =
        serde_json::from_str(&content).map_err(|e| Error::json(path, e))?;
    let malformed = |key: &str| Error::Serde(format!("{}: malformed coordinate `{}`", path.display(), key));
    let mut positions = IndexMap::with_capacity(doc.len());
    for (weight, inputs) in doc {
        let weight: WeightCoord = weight.parse().map_err(|_| malformed(&weight))?;
        let inputs = inputs
            .iter()
            .map(|i| i.parse::<InputCoord>().map_err(|_| malformed(i)))
            .collect::<Result<Vec<_>>>()?;
        positions.insert(weight, inputs);
    }
    Ok(positions)
}

/// Join the gathered patterns with the primary layer's pairs file and save
/// the all-positions file. Returns the number of weights covered.
pub fn save_pattern_input_positions(network: &NetworkSpec, layout: &OutputLayout) -> Result<usize> {
    let layer = network.primary_layer()?;
    let patterns = load_patterns(&layout.patterns_file())?;
    let groups = load_input_weight_pairs(&layout.pairs_file(&layer.name))?;
    let positions = gather_pattern_input_positions(&patterns, &groups);

    let path = layout.all_positions_file();
    std::fs::write(&path, render_positions(&positions)?).map_err(|e| Error::io(&path, e))?;
    clilog::info!(
        "{} patterns cover {} weights, positions saved to {}",
        patterns.len(),
        positions.len(),
        path.display()
    );
    Ok(positions.len())
}
