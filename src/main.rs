// src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use quadgen::generator::Generator;
use quadgen::kmsg::KmsgWriter;
use quadgen::signature::SignatureVerifier;

#[derive(Parser)]
#[command(name = "quadgen")]
#[command(author, version, about = "systemd generator for declarative podman units", long_about = None)]
struct Cli {
    /// Generate user-session units from per-user search directories
    #[arg(long)]
    user: bool,

    /// Print generated units to stdout instead of writing them
    #[arg(long)]
    dryrun: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log to stderr instead of /dev/kmsg
    #[arg(long)]
    no_kmsg_log: bool,

    /// Write the referenced image names, one per line, to this path
    #[arg(long, value_name = "PATH")]
    list_images: Option<PathBuf>,

    /// Output directories as passed by systemd (normal, early, late);
    /// only the first is used
    #[arg(value_name = "OUTPUT_DIR", num_args = 0..=3)]
    output_dirs: Vec<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    // Dry runs are interactive; keep their logs off kmsg
    let writer = KmsgWriter::new(!cli.no_kmsg_log && !cli.dryrun);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .with_writer(writer)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let output_dir = cli.output_dirs.first().cloned();
    if output_dir.is_none() && !cli.dryrun && cli.list_images.is_none() {
        anyhow::bail!("no output directory given");
    }

    let verifier = SignatureVerifier::from_env().context("loading trusted keys")?;
    if verifier.is_some() {
        debug!("signature verification enabled");
    }

    let generator = Generator {
        output_dir,
        dry_run: cli.dryrun,
        is_user: cli.user,
        list_images: cli.list_images.clone(),
        verifier,
    };
    generator.run().context("generating units")?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
