// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Flat weight index ↔ weight coordinate.
//!
//! A weight dump carries no coordinates: line `n` holds the `n`-th kernel
//! value. The decoder recovers `(channels_out, height, width, filters)` from
//! `n` with radix 5 for width and height, so it is only meaningful for 5×5
//! single-input-channel kernels (LeNet-5 `conv1`). `filters` is always 0.

use crate::coord::WeightCoord;

/// Radix of the two lowest-order dimensions (width, then height).
pub const KERNEL_RADIX: usize = 5;

/// Which input sign a generated script constrains the other operand to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignVariant {
    Positive,
    Negative,
}

impl SignVariant {
    /// 0 = positive, 1 = negative.
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(SignVariant::Positive),
            1 => Some(SignVariant::Negative),
            _ => None,
        }
    }

    /// Prefix used in script and pattern names, e.g. `positive`.
    pub fn prefix(self) -> &'static str {
        match self {
            SignVariant::Positive => "positive",
            SignVariant::Negative => "negative",
        }
    }

    /// Sign-extension bit of an int8 operand with this sign.
    pub fn extension_bit(self) -> char {
        match self {
            SignVariant::Positive => '0',
            SignVariant::Negative => '1',
        }
    }

    pub const ALL: [SignVariant; 2] = [SignVariant::Positive, SignVariant::Negative];
}

/// Decode a weight dump line number into its weight coordinate.
///
/// The first five indices are handled before the general mixed-radix step,
/// which agrees with it because `0 / 5 == 0 % 5 == 0`.
pub fn decode_linear_index(flat_index: usize) -> WeightCoord {
    let mut channels_out = 0;
    let mut height = 0;
    let width;

    if flat_index < KERNEL_RADIX {
        width = flat_index;
    } else {
        width = flat_index % KERNEL_RADIX;
        let q = flat_index / KERNEL_RADIX;
        if q >= KERNEL_RADIX {
            height = q % KERNEL_RADIX;
            channels_out = q / KERNEL_RADIX;
        } else {
            height = q;
        }
    }

    WeightCoord::new(channels_out, height, width, 0)
}

/// Inverse of [`decode_linear_index`]. Coordinates the decoder can never
/// produce (non-zero `filters`, height or width past the radix) give `None`.
pub fn encode_weight_coord(coord: WeightCoord) -> Option<usize> {
    if coord.channel != 0 || coord.row >= KERNEL_RADIX || coord.col >= KERNEL_RADIX {
        return None;
    }
    Some((coord.filter * KERNEL_RADIX + coord.row) * KERNEL_RADIX + coord.col)
}

/// Script file name for the weight on dump line `flat_index`:
/// `weight_<co>_<h>_<w>_<f>.tcl`.
pub fn script_file_name(flat_index: usize) -> String {
    format!("weight_{}.tcl", decode_linear_index(flat_index).underscored())
}

/// Signed variant of [`script_file_name`]:
/// `positive_input_weight_<...>.tcl` or `negative_input_weight_<...>.tcl`.
/// The sign never takes part in the decode.
pub fn signed_script_file_name(flat_index: usize, sign: SignVariant) -> String {
    format!(
        "{}_input_weight_{}.tcl",
        sign.prefix(),
        decode_linear_index(flat_index).underscored()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(c: WeightCoord) -> (usize, usize, usize, usize) {
        (c.filter, c.row, c.col, c.channel)
    }

    #[test]
    fn test_decode_boundaries() {
        assert_eq!(tuple(decode_linear_index(0)), (0, 0, 0, 0));
        assert_eq!(tuple(decode_linear_index(4)), (0, 0, 4, 0));
        assert_eq!(tuple(decode_linear_index(5)), (0, 1, 0, 0));
        assert_eq!(tuple(decode_linear_index(24)), (0, 4, 4, 0));
        assert_eq!(tuple(decode_linear_index(25)), (1, 0, 0, 0));
        assert_eq!(tuple(decode_linear_index(149)), (5, 4, 4, 0));
    }

    #[test]
    fn test_small_branch_matches_general_rule() {
        for n in 0..KERNEL_RADIX {
            let general = (n / 25, (n / 5) % 5, n % 5, 0);
            assert_eq!(tuple(decode_linear_index(n)), general);
        }
    }

    #[test]
    fn test_roundtrip() {
        for co in 0..10 {
            for h in 0..5 {
                for w in 0..5 {
                    let coord = WeightCoord::new(co, h, w, 0);
                    let flat = encode_weight_coord(coord).unwrap();
                    assert_eq!(decode_linear_index(flat), coord);
                }
            }
        }
        assert_eq!(encode_weight_coord(WeightCoord::new(0, 5, 0, 0)), None);
        assert_eq!(encode_weight_coord(WeightCoord::new(0, 0, 0, 1)), None);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(script_file_name(19), "weight_0_3_4_0.tcl");
        assert_eq!(script_file_name(25), "weight_1_0_0_0.tcl");
        assert_eq!(
            signed_script_file_name(19, SignVariant::Positive),
            "positive_input_weight_0_3_4_0.tcl"
        );
        assert_eq!(
            signed_script_file_name(19, SignVariant::from_flag(1).unwrap()),
            "negative_input_weight_0_3_4_0.tcl"
        );
        assert_eq!(SignVariant::from_flag(2), None);
    }
}
