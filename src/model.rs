// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Quantized model metadata.
//!
//! The tool never runs the network. It only needs what an interpreter
//! reports about it: the tensor table, the operator table, and the raw int8
//! contents of constant tensors. [`ModelInspector`] is that capability;
//! [`JsonModel`] reads it from a JSON export of the interpreter tables:
//!
//! ```json
//! {
//!   "tensors": [
//!     { "index": 1, "name": "conv1/kernel", "shape": [6, 5, 5, 1], "data": [12, -3, ...] }
//!   ],
//!   "ops": [
//!     { "index": 0, "op": "CONV_2D", "inputs": [0, 1, 2], "outputs": [3] }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One row of the interpreter's tensor table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorDetail {
    pub index: i64,
    #[serde(default)]
    pub name: String,
    pub shape: Vec<i64>,
    /// Raw int8 contents, only present for constant tensors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<i8>>,
}

/// One row of the interpreter's operator table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpDetail {
    pub index: i64,
    #[serde(default)]
    pub op: String,
    pub inputs: Vec<i64>,
    pub outputs: Vec<i64>,
}

/// Read access to a loaded model's tables. Tables are addressed by
/// position; the `index` each row reports is checked against that position
/// by [`crate::validate`].
pub trait ModelInspector {
    fn tensor_details(&self) -> &[TensorDetail];

    fn ops_details(&self) -> &[OpDetail];

    /// Raw int8 contents of the tensor at table position `position`.
    fn tensor_data(&self, position: usize) -> Option<&[i8]> {
        self.tensor_details()
            .get(position)
            .and_then(|t| t.data.as_deref())
    }
}

/// Model tables deserialized from a JSON export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonModel {
    pub tensors: Vec<TensorDetail>,
    pub ops: Vec<OpDetail>,
}

impl JsonModel {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let model: JsonModel =
            serde_json::from_str(&content).map_err(|e| Error::json(path, e))?;
        clilog::debug!(
            "loaded model {}: {} tensors, {} ops",
            path.display(),
            model.tensors.len(),
            model.ops.len()
        );
        Ok(model)
    }
}

impl ModelInspector for JsonModel {
    fn tensor_details(&self) -> &[TensorDetail] {
        &self.tensors
    }

    fn ops_details(&self) -> &[OpDetail] {
        &self.ops
    }
}
