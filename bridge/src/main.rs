//! `picturesque`: provision the generation runtime and cartoonize photos from
//! the command line.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bridge::core::job::{ExportFormat, GenerationParams};
use bridge::core::naming::suggested_export_name;
use bridge::core::progress::Progress;
use bridge::core::style::Style;
use bridge::io::config::{BridgeConfig, load_config, write_config};
use bridge::io::layout::{RuntimeLayout, resolve_home};
use bridge::io::model_cache::model_cache_hint;
use bridge::{Bridge, BridgeError, exit_codes, logging};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "picturesque",
    version,
    about = "Turn photos into cartoons with a locally run diffusion model"
)]
struct Cli {
    /// Runtime home (defaults to $PICTURESQUE_HOME or the platform data dir).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the Python environment, install pinned dependencies, write worker scripts.
    Setup {
        /// Reinstall dependencies and rewrite scripts even if already set up.
        #[arg(short, long)]
        force: bool,
    },
    /// Cartoonize one image.
    Generate(GenerateArgs),
    /// Print the runtime layout.
    Paths,
    /// Print the effective configuration.
    Config {
        /// Write the default configuration to `<home>/config.toml`.
        #[arg(long)]
        write_default: bool,
    },
}

#[derive(Args, Debug, Default)]
struct GenerateArgs {
    /// Input photo.
    input: PathBuf,
    /// anime, comic, pixar, sketch, or watercolor.
    #[arg(long)]
    style: Option<String>,
    /// Extra prompt text appended to the style preset.
    #[arg(long)]
    prompt_extra: Option<String>,
    #[arg(long)]
    strength: Option<f64>,
    #[arg(long)]
    guidance_scale: Option<f64>,
    #[arg(long)]
    steps: Option<f64>,
    /// Negative for a random seed.
    #[arg(long, allow_negative_numbers = true)]
    seed: Option<i64>,
    /// Long-edge limit for the input, in pixels.
    #[arg(long)]
    max_resolution: Option<f64>,
    #[arg(long)]
    output_scale: Option<f64>,
    /// png or jpeg.
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    jpeg_quality: Option<f64>,
    /// Copy the result into this directory under a timestamped name.
    #[arg(long)]
    save_to: Option<PathBuf>,
}

impl GenerateArgs {
    fn to_params(&self) -> GenerationParams {
        let mut params = GenerationParams::for_input(&self.input);
        if let Some(style) = &self.style {
            params.style = style.clone();
        }
        if let Some(extra) = &self.prompt_extra {
            params.prompt_extra = extra.clone();
        }
        if let Some(format) = &self.format {
            params.export_format = format.clone();
        }
        params.strength = self.strength.unwrap_or(params.strength);
        params.guidance_scale = self.guidance_scale.unwrap_or(params.guidance_scale);
        params.steps = self.steps.unwrap_or(params.steps);
        params.seed = self.seed.unwrap_or(params.seed);
        params.max_resolution = self.max_resolution.unwrap_or(params.max_resolution);
        params.output_scale = self.output_scale.unwrap_or(params.output_scale);
        params.jpeg_quality = self.jpeg_quality.unwrap_or(params.jpeg_quality);
        params
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        let code = err
            .downcast_ref::<BridgeError>()
            .map(|err| exit_codes::for_kind(err.kind()))
            .unwrap_or(exit_codes::INVALID);
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let layout = RuntimeLayout::new(resolve_home(cli.home)?);
    match cli.command {
        Command::Setup { force } => cmd_setup(layout, force).await,
        Command::Generate(args) => cmd_generate(layout, args).await,
        Command::Paths => cmd_paths(&layout),
        Command::Config { write_default } => cmd_config(&layout, write_default),
    }
}

fn open_bridge(layout: RuntimeLayout) -> Result<Bridge> {
    let config = load_config(&layout.config_path)?;
    Ok(Bridge::new(layout, config))
}

async fn cmd_setup(layout: RuntimeLayout, force: bool) -> Result<()> {
    let bridge = open_bridge(layout)?;
    eprintln!("Setting up runtime in {}...", bridge.layout().root.display());
    let report = if force {
        bridge.reprovision().await?
    } else {
        bridge.initialize().await?
    };
    println!("{}", report.message());
    println!("state: {}", bridge.provision_state());
    println!("{}", model_cache_hint(&bridge.config().model_id));
    Ok(())
}

async fn cmd_generate(layout: RuntimeLayout, args: GenerateArgs) -> Result<()> {
    let bridge = open_bridge(layout)?;
    let params = args.to_params();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                Progress::Stage(stage) => eprintln!("{stage}"),
                Progress::Percent(percent) => eprintln!("  {percent}%"),
            }
        }
    });
    let result = bridge.generate_with_progress(params, Some(tx)).await;
    if let Err(err) = printer.await {
        warn!(err = %err, "progress printer failed");
    }
    let output = result?;
    println!("{}", output.output_path.display());

    if let Some(dir) = &args.save_to {
        let format = ExportFormat::resolve(args.format.as_deref().unwrap_or("png"));
        let name = suggested_export_name(
            Some(&args.input),
            format,
            chrono::Local::now().naive_local(),
        );
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let dest = dir.join(name);
        fs::copy(&output.output_path, &dest).with_context(|| {
            format!(
                "copy {} to {}",
                output.output_path.display(),
                dest.display()
            )
        })?;
        println!("{}", dest.display());
    }
    Ok(())
}

fn cmd_paths(layout: &RuntimeLayout) -> Result<()> {
    let config = load_config(&layout.config_path)?;
    println!("home         {}", layout.root.display());
    println!("config       {}", layout.config_path.display());
    println!("venv         {}", layout.venv_dir.display());
    println!("interpreter  {}", config.worker_interpreter(layout).display());
    println!("scripts      {}", layout.scripts_dir.display());
    println!("temp         {}", layout.temp_dir.display());
    println!("outputs      {}", layout.outputs_dir.display());
    println!("models       {}", layout.models_dir.display());
    println!(
        "styles       {}",
        Style::ALL.map(|style| style.as_str()).join(", ")
    );
    Ok(())
}

fn cmd_config(layout: &RuntimeLayout, write_default: bool) -> Result<()> {
    if write_default {
        write_config(&layout.config_path, &BridgeConfig::default())?;
        eprintln!("wrote {}", layout.config_path.display());
    }
    let config = load_config(&layout.config_path)?;
    print!(
        "{}",
        toml::to_string_pretty(&config).context("serialize config toml")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setup() {
        let cli = Cli::parse_from(["picturesque", "setup"]);
        assert!(matches!(cli.command, Command::Setup { force: false }));
        assert!(cli.home.is_none());
    }

    #[test]
    fn parse_generate_with_negative_seed() {
        let cli = Cli::parse_from([
            "picturesque",
            "generate",
            "photo.jpg",
            "--style",
            "comic",
            "--seed",
            "-1",
            "--format",
            "jpeg",
            "--home",
            "/tmp/ph",
        ]);
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/ph")));
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let params = args.to_params();
        assert_eq!(params.input_path, PathBuf::from("photo.jpg"));
        assert_eq!(params.style, "comic");
        assert_eq!(params.seed, -1);
        assert_eq!(params.export_format, "jpeg");
        assert_eq!(params.steps, 30.0);
    }

    #[test]
    fn unset_flags_keep_defaults() {
        let args = GenerateArgs {
            input: PathBuf::from("a.png"),
            ..Default::default()
        };
        assert_eq!(args.to_params(), GenerationParams::for_input("a.png"));
    }
}
