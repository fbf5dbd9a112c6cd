//! bmcfw - BMC firmware image tool
//!
//! Offline companion to the firmware update engine: parse and validate
//! images, compute the checksums the engine compares, show the component
//! table and check update configuration files. Nothing here touches hardware.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bmcfw_image::ImageFormat;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Algorithm;

#[derive(Parser)]
#[command(name = "bmcfw")]
#[command(about = "BMC firmware image tool - inspect images and compute checksums offline")]
#[command(version)]
#[command(long_about = "
bmcfw validates firmware images for BMC-managed voltage regulators, CPLDs,
the host BIOS and the PCIe switch with the same parsers the update engine
uses, and computes the checksums devices report after programming.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a firmware image
    Inspect {
        /// Image format; guessed from the file name and content when omitted
        #[arg(short, long)]
        format: Option<ImageFormat>,
        /// Image file, or a directory of PCIe switch sub-images
        file: PathBuf,
    },

    /// Compute a checksum over a file
    Checksum {
        /// Checksum algorithm
        #[arg(short, long, value_enum)]
        algo: Algorithm,
        /// CRC-8 seed
        #[arg(long, default_value_t = 0)]
        seed: u8,
        /// Input file
        file: PathBuf,
    },

    /// Show the updatable component table
    Components {
        /// Server slot
        #[arg(short, long, default_value_t = 1)]
        slot: u8,
    },

    /// Validate an update configuration file
    Config {
        /// JSON configuration; prints the defaults when omitted
        file: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bmcfw={log_level},bmcfw_image={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match execute_command(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(error::exit_code(&e))
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Inspect { format, file } => commands::inspect::execute(file, *format, cli.json),
        Commands::Checksum { algo, seed, file } => {
            commands::checksum::execute(*algo, file, *seed, cli.json)
        }
        Commands::Components { slot } => commands::components::execute(*slot, cli.json),
        Commands::Config { file } => commands::config::execute(file.as_deref(), cli.json),
        Commands::Completion { shell } => {
            completion::generate_completion(*shell);
            Ok(())
        }
    }
}
