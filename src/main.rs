use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use voxchat::app::{AudioInput, ChatOptions, run_chat, run_replay};
use voxchat::audio::capture::list_input_devices;
use voxchat::audio::host::suppress_audio_warnings;
use voxchat::cli::{Cli, Commands, ConfigAction};
use voxchat::config::Config;
use voxchat::playback::list_output_devices;
use voxchat::session::SessionSummary;

fn main() -> Result<()> {
    let cli = Cli::parse();
    voxchat::logging::init(cli.verbose, cli.quiet)?;

    // Must run before any thread exists; it edits the environment.
    suppress_audio_warnings();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        None => {
            let config = load_config(&cli)?;
            let input = match (&cli.input_file, cli.listen_only) {
                (_, true) => AudioInput::None,
                (Some(path), false) => AudioInput::File(path.clone()),
                (None, false) => AudioInput::Microphone,
            };
            let options = ChatOptions {
                input,
                wait_for_ready: !cli.no_wait,
                show_status: cli.show_status,
                quiet: cli.quiet,
            };
            let summary = run_chat(&config, options).await?;
            print_summary(&summary, cli.quiet);
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Replay { file, wav }) => {
            let config = load_config(&cli)?;
            let summary = run_replay(&config, file, wav.as_deref(), cli.quiet)
                .with_context(|| format!("Failed to replay {}", file.display()))?;
            print_summary(&summary, cli.quiet);
            if let Some(out) = wav
                && !cli.quiet
            {
                eprintln!("{} {}", "Wrote".green(), out.display());
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &cli)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "voxchat",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn config_path(custom_path: Option<&Path>) -> PathBuf {
    custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// Load configuration from file or use defaults.
///
/// Priority order (highest first):
/// 1. Command-line flags
/// 2. Environment variables (VOXCHAT_*)
/// 3. Custom config path from CLI (--config), which must exist
/// 4. Default config path (~/.config/voxchat/config.toml)
/// 5. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(cli.apply_overrides(config.with_env_overrides()))
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("Input devices:");
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("Output devices:");
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    let path = config_path(cli.config.as_deref());

    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Warning:".yellow(), e);
            }
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                eprintln!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
                std::process::exit(1);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, Config::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Created".green(), path.display());
        }
    }
    Ok(())
}

fn print_summary(summary: &SessionSummary, quiet: bool) {
    if quiet {
        return;
    }
    eprintln!();
    eprintln!("{}", "Session summary".bold());
    for line in summary.to_string().lines() {
        eprintln!("  {}", line);
    }
    if summary.playback.starvations > 0 {
        eprintln!(
            "  {}",
            "Playback ran dry; try a larger --jitter.".yellow()
        );
    }
}
