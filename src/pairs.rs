// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! (input, weight) pairs file.
//!
//! For every output value of a layer, the list of (input, weight) pairs
//! multiplied to produce it:
//!
//! ```json
//! [
//!   {
//!     "1_0_0_0": [
//!       { "1,0,0,0": "0,0,0,0" },
//!       { "1,0,1,0": "0,0,1,0" }
//!     ]
//!   }
//! ]
//! ```
//!
//! Keys are output positions, inner keys input coordinates (batch 1) and
//! inner values weight coordinates.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::conv::{MultiplicationRecord, OutputGroup};
use crate::coord::{InputCoord, OutputPosition, WeightCoord};
use crate::error::{Error, Result};
use crate::layout::OutputLayout;
use crate::model::ModelInspector;
use crate::network::NetworkSpec;
use crate::validate::resolve_conv_layer;

type PairsDocument = Vec<IndexMap<String, Vec<IndexMap<String, String>>>>;

/// Batch index written into the pairs file.
const PAIRS_BATCH: usize = 1;

fn to_document(groups: &[OutputGroup]) -> PairsDocument {
    groups
        .iter()
        .map(|g| {
            let pairs = g
                .records
                .iter()
                .map(|r| {
                    let mut pair = IndexMap::with_capacity(1);
                    pair.insert(
                        r.input.with_batch(PAIRS_BATCH).to_string(),
                        r.weight.to_string(),
                    );
                    pair
                })
                .collect();
            let mut entry = IndexMap::with_capacity(1);
            entry.insert(g.position.to_string(), pairs);
            entry
        })
        .collect()
}

/// Pretty-printed (2-space indent) JSON of `groups`.
pub fn render_pairs(groups: &[OutputGroup]) -> Result<String> {
    serde_json::to_string_pretty(&to_document(groups)).map_err(|e| Error::Serde(e.to_string()))
}

/// Parse a pairs file back into typed groups, in file order.
pub fn parse_pairs(path: &Path, content: &str) -> Result<Vec<OutputGroup>> {
    let doc: PairsDocument = serde_json::from_str(content).map_err(|e| Error::json(path, e))?;
    let bad = |what: &str, key: &str| {
        Error::Serde(format!("{}: malformed {} `{}`", path.display(), what, key))
    };

    let mut groups = Vec::with_capacity(doc.len());
    for entry in doc {
        for (position, pairs) in entry {
            let position: OutputPosition =
                position.parse().map_err(|_| bad("output position", &position))?;
            let mut records = Vec::with_capacity(pairs.len());
            for pair in pairs {
                for (input, weight) in pair {
                    let input: InputCoord = input.parse().map_err(|_| bad("input coordinate", &input))?;
                    let weight: WeightCoord =
                        weight.parse().map_err(|_| bad("weight coordinate", &weight))?;
                    records.push(MultiplicationRecord { input, weight });
                }
            }
            groups.push(OutputGroup { position, records });
        }
    }
    Ok(groups)
}

pub fn load_input_weight_pairs(path: &Path) -> Result<Vec<OutputGroup>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_pairs(path, &content)
}

/// Write the pairs file of every target layer of `network`.
pub fn save_input_weight_pairs(
    model: &dyn ModelInspector,
    network: &NetworkSpec,
    layout: &OutputLayout,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for spec in network.target_layer_specs()? {
        let layer = resolve_conv_layer(model, spec)?;
        let groups = layer.geometry.output_groups();
        let path = layout.pairs_file(&spec.name);
        std::fs::write(&path, render_pairs(&groups)?).map_err(|e| Error::io(&path, e))?;
        clilog::info!(
            "{}: TOTAL MULTS: {} ({} outputs) saved to {}",
            spec.name,
            layer.geometry.multiplication_count(),
            groups.len(),
            path.display()
        );
        written.push(path);
    }
    Ok(written)
}
