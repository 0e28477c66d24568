// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Project configuration file (`cnn-atpg.toml`) support.
//!
//! Holds the output/model directories, the ATPG script skeleton parameters,
//! the image generation settings and any networks beyond the built-in ones.
//! CLI arguments always override config file values.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::network::{builtin_networks, NetworkSpec};

/// Config file name searched for by [`ProjectConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "cnn-atpg.toml";

/// Project configuration loaded from `cnn-atpg.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub paths: PathsConfig,
    pub run: RunConfig,
    pub atpg: AtpgScriptConfig,
    pub image: ImageConfig,
    /// Extra networks. A network named like a built-in one replaces it.
    pub networks: Vec<NetworkSpec>,
}

/// Where models are read from and artifacts are written to.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the output tree. Defaults to `./outputs`.
    pub output_root: Option<PathBuf>,
    /// Directory holding the model exports. Defaults to `./models/pretrained_models`.
    pub pretrained_models: Option<PathBuf>,
}

/// Defaults for the per-run selections.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Network name, e.g. `lenet5`.
    pub model: Option<String>,
    /// Layer of interest for single-layer stages.
    pub layer: Option<String>,
    /// Weight dump encoding: `binary`, `int8` or `hex`.
    pub weight_format: Option<String>,
}

/// Parameters of the generated ATPG script skeleton. Paths are relative to
/// the directory the ATPG tool runs in, so they are never resolved.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AtpgScriptConfig {
    /// Gate-level netlist of the multiplier/divider.
    pub netlist: String,
    /// Cell library netlist.
    pub cell_library: String,
    /// Top module passed to `run_build_model`.
    pub top_module: String,
    /// Emit one script per sign of the other operand instead of one unsigned script.
    pub signed: bool,
}

impl Default for AtpgScriptConfig {
    fn default() -> Self {
        AtpgScriptConfig {
            netlist: "./syn/out/cve2_multdiv_fast.v".to_string(),
            cell_library: "./syn/techlib/NangateOpenCellLibrary.v".to_string(),
            top_module: "cve2_multdiv_fast_RV32M3".to_string(),
            signed: false,
        }
    }
}

/// Custom input image generation settings.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ImageConfig {
    /// RNG seed; omit for a fresh random image on every run.
    pub seed: Option<u64>,
}

impl ProjectConfig {
    /// Nearest `cnn-atpg.toml` in the working directory or one of its
    /// ancestors, with paths resolved. A file that fails to parse is
    /// reported and ignored.
    pub fn discover() -> Option<(Self, PathBuf)> {
        let cwd = std::env::current_dir().ok()?;
        let path = cwd
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|p| p.is_file())?;
        match Self::load_resolved(&path) {
            Ok(config) => Some((config, path)),
            Err(e) => {
                clilog::warn!("ignoring {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content).map_err(|e| Error::Serde(format!("{}: {}", path.display(), e)))
    }

    /// [`Self::load`], then anchor relative paths at the file's directory.
    pub fn load_resolved(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(config)
    }

    pub fn resolve_paths(&mut self, config_dir: &Path) {
        for p in [&mut self.paths.output_root, &mut self.paths.pretrained_models] {
            anchor(p, config_dir);
        }
    }

    pub fn output_root(&self) -> PathBuf {
        self.paths
            .output_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("./outputs"))
    }

    pub fn pretrained_models(&self) -> PathBuf {
        self.paths
            .pretrained_models
            .clone()
            .unwrap_or_else(|| PathBuf::from("./models/pretrained_models"))
    }

    /// Find a network by name, configured networks first.
    pub fn network(&self, name: &str) -> Result<NetworkSpec> {
        self.networks
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .or_else(|| builtin_networks().into_iter().find(|n| n.name == name))
            .ok_or_else(|| Error::MissingKey(format!("network `{}`", name)))
    }
}

fn anchor(path: &mut Option<PathBuf>, base: &Path) {
    if let Some(p) = path.as_mut().filter(|p| p.is_relative()) {
        *p = base.join(&*p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config: ProjectConfig = toml::from_str("").unwrap();
        assert!(config.paths.output_root.is_none());
        assert!(config.networks.is_empty());
        assert_eq!(config.atpg, AtpgScriptConfig::default());
        assert_eq!(config.output_root(), PathBuf::from("./outputs"));
        assert_eq!(config.network("lenet5").unwrap().name, "lenet5");
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[paths]
output_root = "build/outputs"
pretrained_models = "/opt/models"

[run]
model = "tiny"
layer = "conv1"
weight_format = "hex"

[atpg]
top_module = "cve2_multdiv_fast_RV32M2"
signed = true

[image]
seed = 42

[[networks]]
name = "tiny"
model_file = "tiny.json"
target_layers = ["conv1"]
input_quantization = { zero_point = 0, scale = 1.0 }
input_image = { rows = 8, cols = 8 }

[[networks.layers]]
name = "conv1"
op_index = 0
filters = 2
kernel = 3
"#;
        let config: ProjectConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.weight_format.as_deref(), Some("hex"));
        assert!(config.atpg.signed);
        assert_eq!(config.atpg.netlist, "./syn/out/cve2_multdiv_fast.v");
        assert_eq!(config.atpg.top_module, "cve2_multdiv_fast_RV32M2");
        assert_eq!(config.image.seed, Some(42));
        let tiny = config.network("tiny").unwrap();
        assert_eq!(tiny.layers[0].kernel, 3);
        assert_eq!(tiny.input_image.rows, 8);
        assert!(matches!(config.network("alexnet"), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_path_resolution() {
        let toml_str = r#"
[paths]
output_root = "build/outputs"
pretrained_models = "/absolute/models"
"#;
        let mut config: ProjectConfig = toml::from_str(toml_str).unwrap();
        config.resolve_paths(Path::new("/project/dir"));

        assert_eq!(config.output_root(), PathBuf::from("/project/dir/build/outputs"));
        assert_eq!(config.pretrained_models(), PathBuf::from("/absolute/models"));
    }

    #[test]
    fn test_load_resolved() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[paths]\npretrained_models = \"models\"\n").unwrap();
        let config = ProjectConfig::load_resolved(&path).unwrap();
        assert_eq!(config.pretrained_models(), tmp.path().join("models"));
        assert_eq!(config.output_root(), PathBuf::from("./outputs"));

        std::fs::write(&path, "[paths\n").unwrap();
        assert!(matches!(ProjectConfig::load_resolved(&path), Err(Error::Serde(_))));
    }
}
