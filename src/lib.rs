// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! ATPG and fault-injection artifacts for the multiplier of a quantized CNN.
//!
//! The flow for one network:
//!
//! 1. [`weights`] dumps the trained kernel of each target layer;
//! 2. [`atpg`] turns the binary dump into one ATPG script per weight, with
//!    the weight fixed on the multiplier's `op_b_i` port;
//! 3. [`pairs`] enumerates every (input, weight) multiplication of the
//!    layer ([`conv`]) grouped by output position;
//! 4. after the ATPG runs, [`patterns`] joins the found input patterns with
//!    the pairs to get the pixels each pattern can be applied at;
//! 5. [`image`] builds input images from those patterns;
//! 6. [`fault_injection`] writes the multiplication indexes and operand
//!    values used by the fault-injection harness.
//!
//! Every stage reads the layer through [`validate::resolve_conv_layer`],
//! which checks the model export against the [`network`] description.

pub mod atpg;
pub mod config;
pub mod conv;
pub mod coord;
pub mod error;
pub mod fault_injection;
pub mod image;
pub mod layout;
pub mod model;
pub mod network;
pub mod pairs;
pub mod patterns;
pub mod validate;
pub mod weight_index;
pub mod weights;
