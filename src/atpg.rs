// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! ATPG script generation for the `cve2_multdiv_fast` multiplier.
//!
//! One script per trained weight. Each script fixes `op_b_i` (the weight
//! operand) to the weight's 32-bit two's-complement value, fixes the
//! sign-extension bits `op_a_i[31:7]` of the int8 input operand, and asks
//! the tool for stuck-at patterns on the remaining input bits.

use std::path::Path;

use crate::config::AtpgScriptConfig;
use crate::error::{Error, Result};
use crate::layout::OutputLayout;
use crate::network::NetworkSpec;
use crate::weight_index::{script_file_name, signed_script_file_name, SignVariant};
use crate::weights::WeightFormat;

/// Operand width of the multiplier ports.
pub const OPERAND_BITS: usize = 32;

/// Lowest `op_a_i` bit that only carries the int8 sign extension.
const INPUT_SIGN_EXTENSION_LSB: usize = 7;

/// Which scripts to emit per weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptVariant {
    /// `weight_<...>.tcl`, input sign-extension bits tied to 0.
    Unsigned,
    /// `<sign>_input_weight_<...>.tcl`, sign-extension bits tied to the sign.
    Signed(SignVariant),
}

impl ScriptVariant {
    pub fn file_name(self, flat_index: usize) -> String {
        match self {
            ScriptVariant::Unsigned => script_file_name(flat_index),
            ScriptVariant::Signed(sign) => signed_script_file_name(flat_index, sign),
        }
    }

    fn input_extension_bit(self) -> char {
        match self {
            ScriptVariant::Unsigned => '0',
            ScriptVariant::Signed(sign) => sign.extension_bit(),
        }
    }

    /// Variants to emit for a run.
    pub fn for_mode(signed: bool) -> Vec<ScriptVariant> {
        if signed {
            SignVariant::ALL.iter().map(|&s| ScriptVariant::Signed(s)).collect()
        } else {
            vec![ScriptVariant::Unsigned]
        }
    }
}

/// Check that `bits` is a 32-digit binary string.
pub fn parse_weight_bits(bits: &str) -> Option<&str> {
    let bits = bits.trim_end_matches(['\n', '\r']);
    if bits.len() == OPERAND_BITS && bits.bytes().all(|b| b == b'0' || b == b'1') {
        Some(bits)
    } else {
        None
    }
}

/// Commands of one script, in file order. `weight_bits` is MSB first:
/// character `k` constrains `op_b_i[31-k]`.
pub fn script_commands(
    weight_bits: &str,
    variant: ScriptVariant,
    cfg: &AtpgScriptConfig,
) -> Vec<String> {
    let mut content = vec![
        "set_environment_viewer -instance_names".to_string(),
        "set_messages -log tmax_unconstrained.log -replace".to_string(),
        format!("read_netlist {}", cfg.netlist),
        format!("read_netlist {}", cfg.cell_library),
        format!("run_build_model {}", cfg.top_module),
    ];

    // op_a_i: input constrained bits
    let ext = variant.input_extension_bit();
    for i in (INPUT_SIGN_EXTENSION_LSB..OPERAND_BITS).rev() {
        content.push(format!("add_pi_constraints {} op_a_i[{}]", ext, i));
    }

    // op_b_i: weight constrained bits
    for (k, bit) in weight_bits.chars().enumerate() {
        content.push(format!("add_pi_constraints {} op_b_i[{}]", bit, OPERAND_BITS - 1 - k));
    }

    content.extend(
        [
            "add_pi_constraints 1 { signed_mode_i[0] signed_mode_i[1] }",
            "add_po_masks valid_o",
            "run_drc",
            "read_faults ./flist.txt -maintain_detection",
            "set_atpg -merge high",
            "set_faults -model stuck",
            "run_atpg -auto",
            "write_patterns mul_patterns.txt -format stil -internal -replace",
            "write_faults ./flist.txt -replace -all",
            "report_summaries > ./summaries.txt",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    content
}

/// Write one script per line of a binary weight dump into `out_dir`.
///
/// Returns the number of scripts written.
pub fn write_scripts_from_dump(
    dump: &Path,
    out_dir: &Path,
    variants: &[ScriptVariant],
    cfg: &AtpgScriptConfig,
) -> Result<usize> {
    let content = std::fs::read_to_string(dump).map_err(|e| Error::io(dump, e))?;
    let mut count = 0;
    for (line_number, line) in content.lines().enumerate() {
        let bits = parse_weight_bits(line).ok_or_else(|| {
            Error::parse(dump, line_number + 1, format!("expected 32 binary digits, got `{}`", line))
        })?;
        for &variant in variants {
            let path = out_dir.join(variant.file_name(line_number));
            let mut script = script_commands(bits, variant, cfg).join("\n");
            script.push('\n');
            std::fs::write(&path, script).map_err(|e| Error::io(&path, e))?;
            count += 1;
        }
    }
    Ok(count)
}

/// Generate the scripts for every target layer of `network` from its binary
/// weight dump.
///
/// Script names only carry the decoded weight coordinate, so two target
/// layers write into the same names; the last layer wins.
pub fn save_atpg_scripts(
    network: &NetworkSpec,
    cfg: &AtpgScriptConfig,
    layout: &OutputLayout,
) -> Result<usize> {
    let variants = ScriptVariant::for_mode(cfg.signed);
    let out_dir = layout.atpg_scripts_dir();
    let mut total = 0;
    for layer in &network.target_layers {
        let dump = layout.weight_dump(WeightFormat::Binary, layer);
        let n = write_scripts_from_dump(&dump, &out_dir, &variants, cfg)?;
        clilog::info!("{}: {} atpg scripts written to {}", layer, n, out_dir.display());
        total += n;
    }
    Ok(total)
}
