//! Headless playback CLI around the player engine.
//!
//! `play` decodes a local file or http(s) URL and paces it in real time
//! against a null sink, a WAV capture sink, or (with the `device` feature)
//! the default output device. `probe` prints container metadata as JSON.

mod cli;
mod runtime;
mod sinks;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    match args.cmd {
        cli::Command::Play(play) => runtime::run_play(play),
        cli::Command::Probe { url } => runtime::run_probe(&url),
    }
}
