//! CLI runtime: builds a player around the Symphonia engine and drives it
//! from the event queue until completion, error, or Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use player_core::config::KEY_ACCURATE_SEEK_ENABLE;
use player_core::demux::{DemuxerFactory, OpenOptions};
use player_core::output::{NullRendererFactory, RendererFactory};
use player_core::pipeline::Collaborators;
use player_core::player::Player;
use player_core::probe::SymphoniaEngine;
use player_types::{ConfigValue, EventDetail, EventKind, PlayerEvent};

use crate::cli::PlayArgs;
use crate::sinks::WavRendererFactory;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub fn run_play(args: PlayArgs) -> Result<()> {
    let engine = SymphoniaEngine::new();
    let player = Player::new(Collaborators {
        demuxer_factory: engine.clone(),
        decoder_factory: engine,
        renderer_factory: pick_renderer_factory(&args),
    });

    player.set_data_source(&args.url)?;
    player.set_loop(args.loop_count)?;
    if args.accurate_seek {
        player.set_config(KEY_ACCURATE_SEEK_ENABLE, ConfigValue::I32(1))?;
    }
    for (key, value) in &args.opts {
        player.set_config(key, coerce(value))?;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("install signal handler")?;
    }

    player.prepare_async()?;

    let mut last_status = Instant::now();
    loop {
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!("interrupted, stopping");
            break;
        }
        if let Some(event) = player.poll_event(POLL_INTERVAL) {
            if args.json_events {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            } else {
                report(&event);
            }
            match event.kind {
                EventKind::Prepared => {
                    if args.start_ms > 0 {
                        player.seek_to(args.start_ms, args.accurate_seek)?;
                    }
                    if args.speed != 1.0 {
                        player.set_speed(args.speed)?;
                    }
                    player.set_volume(args.volume)?;
                    if args.mute {
                        player.set_mute(true)?;
                    }
                    player.start()?;
                }
                EventKind::Completed => break,
                EventKind::Error => bail!("playback failed with code {}", event.arg1),
                _ => {}
            }
        }
        if args.status && last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            log_status(&player);
        }
    }

    let _ = player.stop();
    Ok(())
}

pub fn run_probe(url: &str) -> Result<()> {
    let engine = SymphoniaEngine::new();
    let interrupt = Arc::new(AtomicBool::new(false));
    let (_demuxer, media) = engine
        .open(url, &OpenOptions::default(), &interrupt)
        .with_context(|| format!("probe {url}"))?;
    println!("{}", serde_json::to_string_pretty(&media)?);
    Ok(())
}

fn pick_renderer_factory(args: &PlayArgs) -> Arc<dyn RendererFactory> {
    if let Some(path) = &args.wav_out {
        return Arc::new(WavRendererFactory::new(path.clone()));
    }
    #[cfg(feature = "device")]
    if args.device {
        return Arc::new(crate::sinks::CpalRendererFactory);
    }
    Arc::new(NullRendererFactory)
}

fn coerce(raw: &str) -> ConfigValue {
    if let Ok(v) = raw.parse::<i64>() {
        return ConfigValue::I64(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return ConfigValue::F64(v);
    }
    ConfigValue::Str(raw.to_string())
}

fn report(event: &PlayerEvent) {
    match event.kind {
        EventKind::Prepared => tracing::info!(duration_ms = event.arg1, "prepared"),
        EventKind::StateChanged => tracing::debug!(state = event.arg1, "state changed"),
        EventKind::Completed => tracing::info!("playback complete"),
        EventKind::SeekComplete => tracing::info!(position_ms = event.arg1, "seek complete"),
        EventKind::AccurateSeekComplete => {
            tracing::info!(position_ms = event.arg1, "accurate seek converged");
        }
        EventKind::BufferingStart => tracing::info!("buffering"),
        EventKind::BufferingUpdate => tracing::debug!(percent = event.arg1, "buffering"),
        EventKind::BufferingEnd => tracing::info!("buffering done"),
        EventKind::VideoSizeChanged => {
            tracing::info!(width = event.arg1, height = event.arg2, "video size");
        }
        EventKind::FirstVideoFrame => tracing::info!("first video frame"),
        EventKind::FirstAudioFrame => tracing::info!("first audio samples"),
        EventKind::DecoderOpened => {
            if let Some(EventDetail::Decoder(info)) = &event.detail {
                tracing::info!(codec = %info.codec, mode = ?info.mode, "decoder opened");
            }
        }
        EventKind::UrlChanged => {
            if let Some(EventDetail::Text(url)) = &event.detail {
                tracing::info!(%url, "source moved");
            }
        }
        EventKind::CacheStats => {
            if let Some(EventDetail::Cache(stats)) = &event.detail {
                tracing::debug!(
                    fetched_bytes = stats.fetched_bytes,
                    requests = stats.requests,
                    cache_hit_bytes = stats.cache_hit_bytes,
                    "source stats"
                );
            }
        }
        EventKind::Error => {
            let message = match &event.detail {
                Some(EventDetail::Text(text)) => text.as_str(),
                _ => "engine error",
            };
            tracing::error!(code = event.arg1, io = event.arg2, "{message}");
        }
    }
}

fn log_status(player: &Player) {
    let status = player.status_snapshot();
    tracing::info!(
        state = ?status.state,
        position_ms = status.position_ms.unwrap_or(-1),
        duration_ms = status.duration_ms.unwrap_or(-1),
        buffer_percent = status.buffer_percent,
        buffered_bytes = status.buffered_bytes,
        underruns = status.underruns,
        dropped_frames = status.dropped_frames,
        late_frames = status.late_frames,
        "status"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_values_coerce_by_shape() {
        assert_eq!(coerce("42"), ConfigValue::I64(42));
        assert_eq!(coerce("1.5"), ConfigValue::F64(1.5));
        assert_eq!(coerce("external"), ConfigValue::Str("external".into()));
    }
}
