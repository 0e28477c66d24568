// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Output tree of one network.
//!
//! ```text
//! <root>/<model>/
//!   weights_<format>/<model>_<layer>_weights.txt
//!   input_weight_pairs/<model>_<layer>_input_weight_pairs.json
//!   atpg_scripts/weight_<co>_<h>_<w>_<f>.tcl
//!   atpg_patterns_gathered/<model>_patterns.txt            (from the ATPG runs)
//!   atpg_patterns_gathered/<model>_patterns_all_positions.json
//!   atpg_patterns_gathered/<model>_patterns_available_positions.json
//!   input_images/<model>_FWP_input_possibilities.json
//!   input_images/<model>_FWP_input_image.{hex,json}
//!   input_images/<model>_input.h
//!   FI_files/<layer>/<model>_<layer>_{mul_indexes.json,mults.txt,input_tensor.hex}
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::weights::WeightFormat;

#[derive(Debug, Clone)]
pub struct OutputLayout {
    model_dir: PathBuf,
    model: String,
}

impl OutputLayout {
    pub fn new(output_root: &Path, model: &str) -> Self {
        OutputLayout {
            model_dir: output_root.join(model),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Create every output directory. Existing directories are kept.
    pub fn create_dirs(&self, format: WeightFormat, layers: &[&str]) -> Result<()> {
        let mut dirs = vec![
            self.weights_dir(format),
            self.pairs_dir(),
            self.atpg_scripts_dir(),
            self.patterns_dir(),
            self.input_images_dir(),
        ];
        dirs.extend(layers.iter().map(|l| self.fault_injection_dir(l)));
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn weights_dir(&self, format: WeightFormat) -> PathBuf {
        self.model_dir.join(format!("weights_{}", format.name()))
    }

    pub fn weight_dump(&self, format: WeightFormat, layer: &str) -> PathBuf {
        self.weights_dir(format)
            .join(format!("{}_{}_weights.txt", self.model, layer))
    }

    pub fn pairs_dir(&self) -> PathBuf {
        self.model_dir.join("input_weight_pairs")
    }

    pub fn pairs_file(&self, layer: &str) -> PathBuf {
        self.pairs_dir()
            .join(format!("{}_{}_input_weight_pairs.json", self.model, layer))
    }

    pub fn atpg_scripts_dir(&self) -> PathBuf {
        self.model_dir.join("atpg_scripts")
    }

    pub fn patterns_dir(&self) -> PathBuf {
        self.model_dir.join("atpg_patterns_gathered")
    }

    /// Patterns gathered from the ATPG runs; an input, never written here.
    pub fn patterns_file(&self) -> PathBuf {
        self.patterns_dir().join(format!("{}_patterns.txt", self.model))
    }

    pub fn all_positions_file(&self) -> PathBuf {
        self.patterns_dir()
            .join(format!("{}_patterns_all_positions.json", self.model))
    }

    pub fn available_positions_file(&self) -> PathBuf {
        self.patterns_dir()
            .join(format!("{}_patterns_available_positions.json", self.model))
    }

    pub fn input_images_dir(&self) -> PathBuf {
        self.model_dir.join("input_images")
    }

    pub fn fwp_possibilities_file(&self) -> PathBuf {
        self.input_images_dir()
            .join(format!("{}_FWP_input_possibilities.json", self.model))
    }

    pub fn fwp_image_hex(&self) -> PathBuf {
        self.input_images_dir()
            .join(format!("{}_FWP_input_image.hex", self.model))
    }

    pub fn fwp_image_json(&self) -> PathBuf {
        self.input_images_dir()
            .join(format!("{}_FWP_input_image.json", self.model))
    }

    pub fn input_header(&self) -> PathBuf {
        self.input_images_dir().join(format!("{}_input.h", self.model))
    }

    pub fn fault_injection_dir(&self, layer: &str) -> PathBuf {
        self.model_dir.join("FI_files").join(layer)
    }

    pub fn mul_indexes_file(&self, layer: &str) -> PathBuf {
        self.fault_injection_dir(layer)
            .join(format!("{}_{}_mul_indexes.json", self.model, layer))
    }

    pub fn mults_file(&self, layer: &str) -> PathBuf {
        self.fault_injection_dir(layer)
            .join(format!("{}_{}_mults.txt", self.model, layer))
    }

    /// Default location of a layer's input tensor hex dump.
    pub fn input_tensor_file(&self, layer: &str) -> PathBuf {
        self.fault_injection_dir(layer)
            .join(format!("{}_{}_input_tensor.hex", self.model, layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = OutputLayout::new(Path::new("/out"), "lenet5");
        assert_eq!(
            layout.weight_dump(WeightFormat::Binary, "conv1"),
            PathBuf::from("/out/lenet5/weights_binary/lenet5_conv1_weights.txt")
        );
        assert_eq!(
            layout.pairs_file("conv1"),
            PathBuf::from("/out/lenet5/input_weight_pairs/lenet5_conv1_input_weight_pairs.json")
        );
        assert_eq!(
            layout.mults_file("conv1"),
            PathBuf::from("/out/lenet5/FI_files/conv1/lenet5_conv1_mults.txt")
        );
    }

    #[test]
    fn test_create_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "lenet5");
        layout.create_dirs(WeightFormat::Hex, &["conv1"]).unwrap();
        assert!(layout.weights_dir(WeightFormat::Hex).is_dir());
        assert!(layout.atpg_scripts_dir().is_dir());
        assert!(layout.fault_injection_dir("conv1").is_dir());
        // idempotent
        layout.create_dirs(WeightFormat::Hex, &["conv1"]).unwrap();
    }
}
