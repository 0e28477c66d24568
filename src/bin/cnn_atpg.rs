// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Unified CLI for the CNN multiplier ATPG flow.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cnn_atpg::atpg::save_atpg_scripts;
use cnn_atpg::config::ProjectConfig;
use cnn_atpg::error::Result;
use cnn_atpg::fault_injection::manage_fault_injection_files;
use cnn_atpg::image::{
    generate_custom_input_image, save_available_positions, save_input_header, CustomImageMode,
};
use cnn_atpg::layout::OutputLayout;
use cnn_atpg::model::JsonModel;
use cnn_atpg::network::{ConvLayerSpec, NetworkSpec};
use cnn_atpg::pairs::save_input_weight_pairs;
use cnn_atpg::patterns::save_pattern_input_positions;
use cnn_atpg::weights::{save_model_weights, WeightFormat};

#[derive(Parser)]
#[command(
    name = "cnn-atpg",
    about = "ATPG scripts and fault-injection files for the multiplier of a quantized CNN",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to project configuration file.
    ///
    /// If not specified, cnn-atpg searches for `cnn-atpg.toml` in the current
    /// directory and parent directories. CLI arguments override config file values.
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (can be repeated: -vv for trace level).
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (can be repeated: -qq for error level).
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Network to work on, e.g. `lenet5`.
    ///
    /// Can also be set via `run.model` in cnn-atpg.toml. Defaults to lenet5.
    #[clap(short, long, global = true)]
    model: Option<String>,

    /// Layer for single-layer stages (fault injection).
    ///
    /// Can also be set via `run.layer` in cnn-atpg.toml. Defaults to the
    /// network's first target layer.
    #[clap(short, long, global = true)]
    layer: Option<String>,

    /// Root of the output tree.
    ///
    /// Can also be set via `paths.output_root` in cnn-atpg.toml.
    #[clap(long, global = true)]
    output_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the trained weights of every target layer.
    Weights(WeightsArgs),

    /// Write one ATPG script per weight from the binary weight dump.
    ///
    /// Run `cnn-atpg weights --weight-format binary` first.
    AtpgScripts(AtpgArgs),

    /// Enumerate the (input, weight) pairs of every target layer.
    Pairs,

    /// Join the gathered ATPG patterns with the pairs of the first target layer.
    ///
    /// Expects `<model>_patterns.txt` in the `atpg_patterns_gathered` directory.
    GatherPositions,

    /// Build a custom input image from the gathered patterns.
    CustomImage(ImageArgs),

    /// Reserve one positive and one negative pixel per weight.
    AvailablePositions(SeedArgs),

    /// Emit the C header holding the pattern input image.
    InputHeader,

    /// Write the multiplication index and operand files of a layer.
    FaultInjection(FaultInjectionArgs),

    /// Run every stage whose inputs are present.
    ///
    /// Model stages always run. Pattern stages run once the gathered patterns
    /// file exists, fault injection once the layer's input tensor exists.
    All(AllArgs),
}

#[derive(Parser)]
struct WeightsArgs {
    /// Weight encoding: binary, int8 or hex.
    ///
    /// Can also be set via `run.weight_format` in cnn-atpg.toml. Defaults to binary.
    #[clap(long)]
    weight_format: Option<String>,
}

#[derive(Parser)]
struct AtpgArgs {
    /// Emit a positive and a negative input script per weight.
    ///
    /// Can also be set via `atpg.signed` in cnn-atpg.toml.
    #[clap(long)]
    signed: bool,
}

#[derive(Parser)]
struct SeedArgs {
    /// RNG seed. Can also be set via `image.seed` in cnn-atpg.toml.
    #[clap(long)]
    seed: Option<u64>,
}

#[derive(Parser)]
struct ImageArgs {
    /// Image kind. Only `FWP` (fill with pattern) is supported.
    #[clap(long, default_value = "FWP")]
    mode: String,

    #[clap(flatten)]
    seed: SeedArgs,
}

#[derive(Parser)]
struct FaultInjectionArgs {
    /// Input tensor hex dump.
    ///
    /// Defaults to `FI_files/<layer>/<model>_<layer>_input_tensor.hex`.
    #[clap(long)]
    input_tensor: Option<PathBuf>,
}

#[derive(Parser)]
struct AllArgs {
    #[clap(flatten)]
    weights: WeightsArgs,

    #[clap(flatten)]
    atpg: AtpgArgs,

    #[clap(flatten)]
    seed: SeedArgs,

    #[clap(flatten)]
    fault_injection: FaultInjectionArgs,
}

/// `-v` wins over `-q` when both are given.
fn log_level(verbose: u8, quiet: u8) -> simplelog::LevelFilter {
    use simplelog::LevelFilter;
    match (verbose, quiet) {
        (0, 0) => LevelFilter::Info,
        (0, 1) => LevelFilter::Warn,
        (0, _) => LevelFilter::Error,
        (1, _) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use simplelog::*;
    let config = ConfigBuilder::new()
        .set_location_level(LevelFilter::Debug)
        .set_thread_level(LevelFilter::Trace)
        .build();
    if let Err(e) = TermLogger::init(log_level(verbose, quiet), config, TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("logger not installed: {}", e);
    }
    clilog::set_max_print_count(clilog::Level::Warn, "PAT_NO_PAIRS", 5);
}

/// `--config` if given, else the discovered `cnn-atpg.toml`, else defaults.
fn load_config(config_path: Option<&PathBuf>) -> Result<ProjectConfig> {
    if let Some(path) = config_path {
        let config = ProjectConfig::load_resolved(path)?;
        clilog::info!("config: {}", path.display());
        return Ok(config);
    }
    Ok(match ProjectConfig::discover() {
        Some((config, path)) => {
            clilog::info!("config (discovered): {}", path.display());
            config
        }
        None => ProjectConfig::default(),
    })
}

/// Everything a stage needs, with CLI values merged over the config file.
struct Session {
    config: ProjectConfig,
    network: NetworkSpec,
    layout: OutputLayout,
    layer: Option<String>,
}

impl Session {
    fn new(cli_model: Option<String>, cli_layer: Option<String>, cli_output_root: Option<PathBuf>, config: ProjectConfig) -> Result<Self> {
        let model = cli_model
            .or_else(|| config.run.model.clone())
            .unwrap_or_else(|| "lenet5".to_string());
        let network = config.network(&model)?;
        let output_root = cli_output_root.unwrap_or_else(|| config.output_root());
        let layout = OutputLayout::new(&output_root, &network.name);
        let layer = cli_layer.or_else(|| config.run.layer.clone());
        clilog::debug!("network {} with output tree {}", network.name, layout.model_dir().display());
        Ok(Session { config, network, layout, layer })
    }

    fn load_model(&self) -> Result<JsonModel> {
        JsonModel::load(&self.config.pretrained_models().join(&self.network.model_file))
    }

    fn layer_spec(&self) -> Result<&ConvLayerSpec> {
        match &self.layer {
            Some(name) => self.network.conv_layer(name),
            None => self.network.primary_layer(),
        }
    }

    fn weight_format(&self, cli: Option<String>) -> Result<WeightFormat> {
        cli.or_else(|| self.config.run.weight_format.clone())
            .map(|f| f.parse())
            .unwrap_or(Ok(WeightFormat::Binary))
    }

    fn seed(&self, args: &SeedArgs) -> Option<u64> {
        args.seed.or(self.config.image.seed)
    }

    fn prepare(&self, format: WeightFormat) -> Result<()> {
        let spec = self.layer_spec()?;
        let mut fi_layers: Vec<&str> = self.network.target_layers.iter().map(|s| s.as_str()).collect();
        if !fi_layers.contains(&spec.name.as_str()) {
            fi_layers.push(&spec.name);
        }
        self.layout.create_dirs(format, &fi_layers)?;
        if format != WeightFormat::Binary {
            self.layout.create_dirs(WeightFormat::Binary, &fi_layers)?;
        }
        Ok(())
    }

    fn atpg_config(&self, args: &AtpgArgs) -> cnn_atpg::config::AtpgScriptConfig {
        let mut cfg = self.config.atpg.clone();
        cfg.signed |= args.signed;
        cfg
    }
}

fn cmd_weights(session: &Session, args: WeightsArgs) -> Result<()> {
    let format = session.weight_format(args.weight_format)?;
    session.prepare(format)?;
    let model = session.load_model()?;
    save_model_weights(&model, &session.network, format, &session.layout)?;
    Ok(())
}

fn cmd_atpg_scripts(session: &Session, args: AtpgArgs) -> Result<()> {
    session.prepare(WeightFormat::Binary)?;
    save_atpg_scripts(&session.network, &session.atpg_config(&args), &session.layout)?;
    Ok(())
}

fn cmd_pairs(session: &Session) -> Result<()> {
    session.prepare(WeightFormat::Binary)?;
    let model = session.load_model()?;
    save_input_weight_pairs(&model, &session.network, &session.layout)?;
    Ok(())
}

fn cmd_custom_image(session: &Session, args: ImageArgs) -> Result<()> {
    let mode: CustomImageMode = args.mode.parse()?;
    session.prepare(WeightFormat::Binary)?;
    generate_custom_input_image(mode, &session.network, &session.layout, session.seed(&args.seed))
}

fn cmd_fault_injection(session: &Session, args: FaultInjectionArgs) -> Result<()> {
    session.prepare(WeightFormat::Binary)?;
    let model = session.load_model()?;
    manage_fault_injection_files(
        &model,
        session.layer_spec()?,
        &session.layout,
        args.input_tensor.as_deref(),
    )
}

fn cmd_all(session: &Session, args: AllArgs) -> Result<()> {
    let format = session.weight_format(args.weights.weight_format)?;
    session.prepare(format)?;
    let model = session.load_model()?;
    let timer = clilog::stimer!("all stages");

    // the scripts always need the binary dump
    save_model_weights(&model, &session.network, WeightFormat::Binary, &session.layout)?;
    if format != WeightFormat::Binary {
        save_model_weights(&model, &session.network, format, &session.layout)?;
    }
    save_atpg_scripts(&session.network, &session.atpg_config(&args.atpg), &session.layout)?;
    save_input_weight_pairs(&model, &session.network, &session.layout)?;

    if session.layout.patterns_file().exists() {
        let seed = session.seed(&args.seed);
        save_pattern_input_positions(&session.network, &session.layout)?;
        generate_custom_input_image(CustomImageMode::Fwp, &session.network, &session.layout, seed)?;
        save_available_positions(&session.layout, seed)?;
        save_input_header(&session.network, &session.layout)?;
    } else {
        clilog::info!(
            "no gathered patterns at {}, skipping pattern stages",
            session.layout.patterns_file().display()
        );
    }

    let spec = session.layer_spec()?;
    let input_tensor = args
        .fault_injection
        .input_tensor
        .unwrap_or_else(|| session.layout.input_tensor_file(&spec.name));
    if input_tensor.exists() {
        manage_fault_injection_files(&model, spec, &session.layout, Some(&input_tensor))?;
    } else {
        clilog::info!(
            "no input tensor at {}, skipping fault injection files",
            input_tensor.display()
        );
    }

    clilog::finish!(timer);
    Ok(())
}

fn run(cli: Cli, config: ProjectConfig) -> Result<()> {
    let session = Session::new(cli.model, cli.layer, cli.output_root, config)?;
    match cli.command {
        Commands::Weights(args) => cmd_weights(&session, args),
        Commands::AtpgScripts(args) => cmd_atpg_scripts(&session, args),
        Commands::Pairs => cmd_pairs(&session),
        Commands::GatherPositions => {
            session.prepare(WeightFormat::Binary)?;
            save_pattern_input_positions(&session.network, &session.layout).map(|_| ())
        }
        Commands::CustomImage(args) => cmd_custom_image(&session, args),
        Commands::AvailablePositions(args) => {
            session.prepare(WeightFormat::Binary)?;
            save_available_positions(&session.layout, session.seed(&args)).map(|_| ())
        }
        Commands::InputHeader => {
            session.prepare(WeightFormat::Binary)?;
            save_input_header(&session.network, &session.layout)
        }
        Commands::FaultInjection(args) => cmd_fault_injection(&session, args),
        Commands::All(args) => cmd_all(&session, args),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = load_config(cli.config.as_ref()).and_then(|config| run(cli, config));
    if let Err(e) = result {
        clilog::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplelog::LevelFilter;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, 0), LevelFilter::Info);
        assert_eq!(log_level(0, 1), LevelFilter::Warn);
        assert_eq!(log_level(0, 3), LevelFilter::Error);
        assert_eq!(log_level(1, 0), LevelFilter::Debug);
        assert_eq!(log_level(2, 0), LevelFilter::Trace);
        assert_eq!(log_level(1, 2), LevelFilter::Debug);
    }

    #[test]
    fn test_cli_merges_over_config() {
        let cli = Cli::parse_from(["cnn-atpg", "fault-injection", "--layer", "conv2", "--output-root", "/tmp/o"]);
        let mut config = ProjectConfig::default();
        config.run.layer = Some("conv1".to_string());
        let session = Session::new(cli.model, cli.layer, cli.output_root, config).unwrap();
        assert_eq!(session.layer_spec().unwrap().name, "conv2");
        assert_eq!(session.layout.model_dir(), std::path::Path::new("/tmp/o/lenet5"));
    }

    #[test]
    fn test_unknown_layer_rejected_up_front() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let session = Session::new(None, Some("conv9".into()), Some(root.clone()), ProjectConfig::default()).unwrap();
        assert!(session.prepare(WeightFormat::Binary).is_err());
        assert!(!root.join("lenet5").exists());
    }
}
