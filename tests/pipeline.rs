// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! End-to-end run of every stage on a synthetic single-filter LeNet-5 export.

use std::path::Path;

use cnn_atpg::atpg::save_atpg_scripts;
use cnn_atpg::config::{AtpgScriptConfig, ProjectConfig};
use cnn_atpg::fault_injection::{load_mul_indexes, manage_fault_injection_files};
use cnn_atpg::image::{
    generate_fwp_image, load_available_positions, save_available_positions, save_input_header,
};
use cnn_atpg::layout::OutputLayout;
use cnn_atpg::model::{JsonModel, OpDetail, TensorDetail};
use cnn_atpg::network::NetworkSpec;
use cnn_atpg::pairs::{load_input_weight_pairs, save_input_weight_pairs};
use cnn_atpg::patterns::{load_positions, save_pattern_input_positions};
use cnn_atpg::weights::{save_model_weights, WeightFormat};

fn synthetic_model() -> JsonModel {
    let kernel: Vec<i8> = (0..25).map(|i| (i * 11 % 256 - 128) as i8).collect();
    JsonModel {
        tensors: vec![
            TensorDetail { index: 0, name: "serving_default_input".into(), shape: vec![1, 32, 32, 1], data: None },
            TensorDetail { index: 1, name: "conv1/kernel".into(), shape: vec![1, 5, 5, 1], data: Some(kernel) },
            TensorDetail { index: 2, name: "conv1/bias".into(), shape: vec![1], data: None },
            TensorDetail { index: 3, name: "conv1/relu".into(), shape: vec![1, 28, 28, 1], data: None },
        ],
        ops: vec![OpDetail { index: 0, op: "CONV_2D".into(), inputs: vec![0, 1, 2], outputs: vec![3] }],
    }
}

fn single_filter_lenet() -> NetworkSpec {
    let mut network = NetworkSpec::lenet5();
    network.layers[0].filters = 1;
    network
}

fn write_model(dir: &Path, model: &JsonModel) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("lenet5_quantized.json"),
        serde_json::to_string(model).unwrap(),
    )
    .unwrap();
}

const PATTERNS: &str = "\
positive_input_pattern_0_0_0_0 : 00000000000000000000000001011010
negative_input_pattern_0_0_0_0 : 11111111111111111111111110100110
positive_input_pattern_0_2_3_0 : 00000000000000000000000000000111
negative_input_pattern_0_2_3_0 : 11111111111111111111111111110000
";

#[test]
fn full_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let models_dir = tmp.path().join("models");
    write_model(&models_dir, &synthetic_model());
    let network = single_filter_lenet();
    let model = JsonModel::load(&models_dir.join(&network.model_file)).unwrap();

    let layout = OutputLayout::new(&tmp.path().join("outputs"), &network.name);
    layout.create_dirs(WeightFormat::Binary, &["conv1"]).unwrap();

    // weights and scripts
    let dumps = save_model_weights(&model, &network, WeightFormat::Binary, &layout).unwrap();
    let dump = std::fs::read_to_string(&dumps[0]).unwrap();
    assert_eq!(dump.lines().count(), 25);
    assert!(!dump.ends_with('\n'));
    let written = save_atpg_scripts(&network, &AtpgScriptConfig::default(), &layout).unwrap();
    assert_eq!(written, 25);
    let last = std::fs::read_to_string(layout.atpg_scripts_dir().join("weight_0_4_4_0.tcl")).unwrap();
    assert_eq!(last.lines().count(), 72);

    // pairs
    save_input_weight_pairs(&model, &network, &layout).unwrap();
    let groups = load_input_weight_pairs(&layout.pairs_file("conv1")).unwrap();
    assert_eq!(groups.iter().map(|g| g.records.len()).sum::<usize>(), 19600);

    // patterns found by the ATPG runs
    std::fs::write(layout.patterns_file(), PATTERNS).unwrap();
    assert_eq!(save_pattern_input_positions(&network, &layout).unwrap(), 2);
    let positions = load_positions(&layout.all_positions_file()).unwrap();
    assert!(positions.values().all(|inputs| inputs.len() == 28 * 28));

    // images
    let image = generate_fwp_image(&network, &layout, Some(11)).unwrap();
    assert_eq!(image.bytes.len(), 32);
    let allowed: [i8; 4] = [0x5a, 0xa6u8 as i8, 0x07, 0xf0u8 as i8];
    assert!(image.bytes.iter().flatten().all(|b| allowed.contains(b)));
    assert!(layout.fwp_image_json().is_file());

    assert_eq!(save_available_positions(&layout, Some(11)).unwrap(), 2);
    let chosen = load_available_positions(&layout.available_positions_file()).unwrap();
    save_input_header(&network, &layout).unwrap();
    let header = std::fs::read_to_string(layout.input_header()).unwrap();
    assert!(header.starts_with("#ifndef TENSORFLOW_LITE_MICRO_LENET5_INPUT_H_\n"));
    assert!(header.ends_with("\n};\n\n#endif"));
    let nonzero = header.matches("0x5a").count()
        + header.matches("0xa6").count()
        + header.matches("0x07").count()
        + header.matches("0xf0").count();
    assert_eq!(nonzero, 2 * chosen.len());

    // fault injection on the FWP image
    std::fs::copy(layout.fwp_image_hex(), layout.input_tensor_file("conv1")).unwrap();
    manage_fault_injection_files(&model, network.primary_layer().unwrap(), &layout, None).unwrap();
    let indexes = load_mul_indexes(&layout.mul_indexes_file("conv1")).unwrap();
    let mults = std::fs::read_to_string(layout.mults_file("conv1")).unwrap();
    assert_eq!(mults.lines().count(), indexes.len());
    let (input, _) = indexes[0];
    let first = mults.lines().next().unwrap();
    let expected = format!("0x{:08X}", image.bytes[input[1]][input[2]] as i32 as u32);
    assert!(first.starts_with(&expected));
}

#[test]
fn contract_violation_stops_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let network = NetworkSpec::lenet5();
    let layout = OutputLayout::new(tmp.path(), &network.name);
    layout.create_dirs(WeightFormat::Binary, &[]).unwrap();

    // export has one filter, LeNet-5 expects six
    let err = save_input_weight_pairs(&synthetic_model(), &network, &layout).unwrap_err();
    assert!(err.to_string().contains("filters"));
    assert!(!layout.pairs_file("conv1").exists());
}

#[test]
fn config_network_and_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cnn-atpg.toml");
    std::fs::write(
        &path,
        r#"
[paths]
output_root = "out"

[run]
model = "lenet5"
"#,
    )
    .unwrap();
    let mut config = ProjectConfig::load(&path).unwrap();
    config.resolve_paths(tmp.path());
    assert_eq!(config.output_root(), tmp.path().join("out"));
    assert_eq!(config.network("lenet5").unwrap().target_layers, vec!["conv1"]);
}
