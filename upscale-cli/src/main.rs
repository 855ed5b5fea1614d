//! Upscale CLI - Command-line interface for neural super-resolution.

mod commands;
mod settings;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{CmdEnqueue, CmdImage, CmdSimd, CmdStatus, CmdWorker};

/// Command-line arguments for the upscale tool.
#[derive(Parser, Debug)]
#[command(name = "upscale")]
#[command(version)]
#[command(about = "Neural super-resolution for images and videos")]
#[command(long_about = "Upscale runs super-resolution models over still images and \n\
    drives a queue of video upscale jobs through frame extraction, per-frame \n\
    inference and re-muxing.\n\n\
    EXAMPLES:\n    \
    upscale image -i small.png -o large.png --scale 2\n    \
    upscale image -i small.png -o large.png --models models.json --model esrgan-x4\n    \
    upscale enqueue -q queue.json --video <ID> --model esrgan-x4\n    \
    upscale worker -q queue.json -c worker.json --once\n    \
    upscale simd --json")]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upscale one image
    Image(CmdImage),
    /// Process queued video jobs
    Worker(CmdWorker),
    /// Queue a video upscale
    Enqueue(CmdEnqueue),
    /// Show queued jobs
    Status(CmdStatus),
    /// Show the SIMD conversion path
    Simd(CmdSimd),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Image(cmd) => cmd.run(),
        Command::Worker(cmd) => cmd.run(),
        Command::Enqueue(cmd) => cmd.run(),
        Command::Status(cmd) => cmd.run(),
        Command::Simd(cmd) => cmd.run(),
    }
}
