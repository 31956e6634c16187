use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "player", version = VERSION, about = "Headless media playback engine")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file or http(s) URL and report engine events
    Play(PlayArgs),

    /// Open a source and print its media info as JSON
    Probe {
        /// Path or http(s) URL
        url: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct PlayArgs {
    /// Path or http(s) URL
    pub url: String,

    /// Initial position in milliseconds
    #[arg(long, default_value_t = 0)]
    pub start_ms: i64,

    /// Converge seeks on the exact target instead of the nearest key frame
    #[arg(long)]
    pub accurate_seek: bool,

    /// Playback speed factor (0.25..=4.0)
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Linear volume gain (0.0..=1.0)
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// Start muted
    #[arg(long)]
    pub mute: bool,

    /// Times to play through (0 = loop forever)
    #[arg(long = "loop", default_value_t = 1)]
    pub loop_count: u32,

    /// Write decoded audio to a WAV file instead of discarding it
    #[arg(long)]
    pub wav_out: Option<PathBuf>,

    /// Play through the default output device
    #[cfg(feature = "device")]
    #[arg(long)]
    pub device: bool,

    /// Log a status line once per second
    #[arg(long)]
    pub status: bool,

    /// Print engine events as JSON lines on stdout
    #[arg(long)]
    pub json_events: bool,

    /// Engine option as key=value; repeatable
    #[arg(long = "opt", value_parser = parse_key_value)]
    pub opts: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_args_parse() {
        let args = Args::parse_from([
            "player",
            "play",
            "--loop",
            "0",
            "--accurate-seek",
            "--opt",
            "sync-type=external",
            "--opt",
            "framedrop=1",
            "clip.flac",
        ]);
        let Command::Play(play) = args.cmd else {
            panic!("expected play");
        };
        assert_eq!(play.url, "clip.flac");
        assert_eq!(play.loop_count, 0);
        assert!(play.accurate_seek);
        assert_eq!(
            play.opts,
            vec![
                ("sync-type".to_string(), "external".to_string()),
                ("framedrop".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_opt_is_rejected() {
        assert!(Args::try_parse_from(["player", "play", "--opt", "no-equals", "clip.flac"]).is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
