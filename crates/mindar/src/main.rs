//! mindar command-line launcher
//!
//! Runs the per-subject cortical thickness workflow and loads pipeline
//! results into the mindar database.

use clap::{Parser, Subcommand};
use mindar_logging::{init_logging, LogConfig};
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "mindar", about = "Load neuroimaging pipeline results into the mindar database")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Workflow ===
    /// Run the cortical thickness workflow for subjects of a subject list
    Run(cli::run::RunArgs),

    // === Loading ===
    /// Load every result of a pipeline found in the results bucket
    Upload(cli::upload::UploadArgs),

    /// Load missing ACT outputs for a list of dataset ids
    Check(cli::check::CheckArgs),

    /// Load ABIDE phenotype rows from a CSV export
    ImportSubjects(cli::import_subjects::ImportSubjectsArgs),

    /// Register image03 scans from a CSV export
    ImportImages(cli::import_images::ImportImagesArgs),

    // === Inspection ===
    /// Write a subject list for a range of image03 ids
    Sublist(cli::sublist::SublistArgs),

    /// Unpack subjects' scans and write a C-PAC subject list
    CpacSublist(cli::cpac_sublist::CpacSublistArgs),

    /// Show workflow run status rows
    Status(cli::status::StatusArgs),

    /// Show resolved configuration
    Config(cli::config::ConfigArgs),
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => cli::run::run(args),
        Commands::Upload(args) => cli::upload::run(args),
        Commands::Check(args) => cli::check::run(args),
        Commands::ImportSubjects(args) => cli::import_subjects::run(args),
        Commands::ImportImages(args) => cli::import_images::run(args),
        Commands::Sublist(args) => cli::sublist::run(args),
        Commands::CpacSublist(args) => cli::cpac_sublist::run(args),
        Commands::Status(args) => cli::status::run(args),
        Commands::Config(args) => cli::config::run(args),
    }
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Upload(args) => args.json,
        Commands::Status(args) => args.json,
        Commands::Config(args) => args.json,
        _ => false,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    let _log_guard = match init_logging(LogConfig {
        app_name: "mindar",
        verbose: cli.verbose,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: {:#}", err);
            None
        }
    };

    match run_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
