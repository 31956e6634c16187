//! Playback configuration.
//!
//! Hosts stage a flat key/value table on the facade before `prepare_async`;
//! the pipeline resolves it once into a [`PlayerConfig`] snapshot that fans
//! out to every stage. Unknown keys are retained untouched so hosts can
//! namespace their own settings.

use std::collections::HashMap;
use std::time::Duration;

use player_types::{ConfigValue, DecoderPreference, SyncMode};

pub const KEY_MAX_BUFFER_SIZE: &str = "max-buffer-size";
pub const KEY_MIN_FRAMES: &str = "min-frames";
pub const KEY_BUFFER_FLOOR_MS: &str = "buffer-floor-ms";
pub const KEY_FIRST_HIGH_WATER_MS: &str = "first-high-water-ms";
pub const KEY_NEXT_HIGH_WATER_MS: &str = "next-high-water-ms";
pub const KEY_LAST_HIGH_WATER_MS: &str = "last-high-water-ms";
pub const KEY_ACCURATE_SEEK_ENABLE: &str = "accurate-seek-enable";
pub const KEY_ACCURATE_SEEK_TIMEOUT: &str = "accurate-seek-timeout";
pub const KEY_FRAMEDROP: &str = "framedrop";
pub const KEY_FRAMEDROP_MAX_CONSECUTIVE: &str = "framedrop-max-consecutive";
pub const KEY_DECODER_ERROR_THRESHOLD: &str = "decoder-error-threshold";
pub const KEY_SYNC_TYPE: &str = "sync-type";
pub const KEY_LOOP: &str = "loop";
pub const KEY_START_ON_PREPARED: &str = "start-on-prepared";
pub const KEY_VIDEO_FRAME_QUEUE_SIZE: &str = "video-frame-queue-size";
pub const KEY_AUDIO_FRAME_QUEUE_SIZE: &str = "audio-frame-queue-size";
pub const KEY_MAX_FRAME_DURATION_MS: &str = "max-frame-duration-ms";
pub const KEY_MAX_DESYNC_MS: &str = "max-desync-ms";
pub const KEY_OPEN_RETRY_COUNT: &str = "open-retry-count";
pub const KEY_READ_RETRY_COUNT: &str = "read-retry-count";
pub const KEY_SEEK_BUFFER_FRAMES: &str = "seek-buffer-frames";
pub const KEY_DECODER_PREFERENCE: &str = "decoder-preference";

/// Delay between source open attempts.
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Delay between transient read retries.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Resolved configuration snapshot applied at prepare time.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Byte cap across both packet queues before the read gate closes.
    pub max_buffer_bytes: u64,
    /// Per-stream packet-count ceiling that closes the gate regardless of bytes.
    pub min_packet_count: usize,
    /// Per-stream buffered-duration floor that must hold before the byte cap
    /// alone can close the gate.
    pub buffer_floor_ms: i64,
    pub first_high_water_ms: i64,
    pub next_high_water_ms: i64,
    pub last_high_water_ms: i64,
    pub accurate_seek: bool,
    pub accurate_seek_timeout: Duration,
    pub framedrop: bool,
    pub framedrop_max_consecutive: u32,
    pub decoder_error_threshold: u32,
    pub sync_mode: SyncMode,
    /// Number of times to play through (0 = loop forever).
    pub loop_count: u32,
    pub start_on_prepared: bool,
    pub video_queue_frames: usize,
    pub audio_queue_frames: usize,
    /// Clamp for pts deltas when pacing video.
    pub max_frame_duration_ms: i64,
    /// Desync beyond this re-anchors instead of correcting.
    pub max_desync_ms: i64,
    pub open_retry_count: u32,
    pub read_retry_count: u32,
    /// Complete GOPs retained for decoder recovery replay.
    pub replay_gops: usize,
    pub decoder_preference: DecoderPreference,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            max_buffer_bytes: 15 * 1024 * 1024,
            min_packet_count: 50_000,
            buffer_floor_ms: 100,
            first_high_water_ms: 100,
            next_high_water_ms: 1_000,
            last_high_water_ms: 5_000,
            accurate_seek: false,
            accurate_seek_timeout: Duration::from_millis(5_000),
            framedrop: true,
            framedrop_max_consecutive: 4,
            decoder_error_threshold: 5,
            sync_mode: SyncMode::Audio,
            loop_count: 1,
            start_on_prepared: false,
            video_queue_frames: 3,
            audio_queue_frames: 9,
            max_frame_duration_ms: 10_000,
            max_desync_ms: 10_000,
            open_retry_count: 3,
            read_retry_count: 3,
            replay_gops: 2,
            decoder_preference: DecoderPreference::Auto,
        }
    }
}

impl PlayerConfig {
    /// Resolve a host table against the defaults. Type mismatches keep the
    /// default and log a warning; unknown keys are ignored here.
    pub fn resolve(table: &HashMap<String, ConfigValue>) -> Self {
        let mut cfg = PlayerConfig::default();
        for (key, value) in table {
            match key.as_str() {
                KEY_MAX_BUFFER_SIZE => set_u64(&mut cfg.max_buffer_bytes, key, value),
                KEY_MIN_FRAMES => set_usize(&mut cfg.min_packet_count, key, value),
                KEY_BUFFER_FLOOR_MS => set_i64(&mut cfg.buffer_floor_ms, key, value),
                KEY_FIRST_HIGH_WATER_MS => set_i64(&mut cfg.first_high_water_ms, key, value),
                KEY_NEXT_HIGH_WATER_MS => set_i64(&mut cfg.next_high_water_ms, key, value),
                KEY_LAST_HIGH_WATER_MS => set_i64(&mut cfg.last_high_water_ms, key, value),
                KEY_ACCURATE_SEEK_ENABLE => set_bool(&mut cfg.accurate_seek, key, value),
                KEY_ACCURATE_SEEK_TIMEOUT => {
                    if let Some(ms) = value.as_i64().filter(|ms| *ms > 0) {
                        cfg.accurate_seek_timeout = Duration::from_millis(ms as u64);
                    } else {
                        warn_type(key, value);
                    }
                }
                KEY_FRAMEDROP => set_bool(&mut cfg.framedrop, key, value),
                KEY_FRAMEDROP_MAX_CONSECUTIVE => set_u32(&mut cfg.framedrop_max_consecutive, key, value),
                KEY_DECODER_ERROR_THRESHOLD => set_u32(&mut cfg.decoder_error_threshold, key, value),
                KEY_SYNC_TYPE => match value.as_str() {
                    Some("audio") => cfg.sync_mode = SyncMode::Audio,
                    Some("video") => cfg.sync_mode = SyncMode::Video,
                    Some("external") => cfg.sync_mode = SyncMode::External,
                    _ => warn_type(key, value),
                },
                KEY_LOOP => set_u32(&mut cfg.loop_count, key, value),
                KEY_START_ON_PREPARED => set_bool(&mut cfg.start_on_prepared, key, value),
                KEY_VIDEO_FRAME_QUEUE_SIZE => set_usize(&mut cfg.video_queue_frames, key, value),
                KEY_AUDIO_FRAME_QUEUE_SIZE => set_usize(&mut cfg.audio_queue_frames, key, value),
                KEY_MAX_FRAME_DURATION_MS => set_i64(&mut cfg.max_frame_duration_ms, key, value),
                KEY_MAX_DESYNC_MS => set_i64(&mut cfg.max_desync_ms, key, value),
                KEY_OPEN_RETRY_COUNT => set_u32(&mut cfg.open_retry_count, key, value),
                KEY_READ_RETRY_COUNT => set_u32(&mut cfg.read_retry_count, key, value),
                KEY_SEEK_BUFFER_FRAMES => set_usize(&mut cfg.replay_gops, key, value),
                KEY_DECODER_PREFERENCE => match value.as_str() {
                    Some("auto") => cfg.decoder_preference = DecoderPreference::Auto,
                    Some("hardware") => cfg.decoder_preference = DecoderPreference::Hardware,
                    Some("software") => cfg.decoder_preference = DecoderPreference::Software,
                    _ => warn_type(key, value),
                },
                _ => {}
            }
        }
        cfg
    }
}

fn warn_type(key: &str, value: &ConfigValue) {
    tracing::warn!(key, ?value, "config value has wrong type, keeping default");
}

fn set_i64(slot: &mut i64, key: &str, value: &ConfigValue) {
    match value.as_i64() {
        Some(v) if v >= 0 => *slot = v,
        _ => warn_type(key, value),
    }
}

fn set_u64(slot: &mut u64, key: &str, value: &ConfigValue) {
    match value.as_i64() {
        Some(v) if v >= 0 => *slot = v as u64,
        _ => warn_type(key, value),
    }
}

fn set_u32(slot: &mut u32, key: &str, value: &ConfigValue) {
    match value.as_i64() {
        Some(v) if (0..=i64::from(u32::MAX)).contains(&v) => *slot = v as u32,
        _ => warn_type(key, value),
    }
}

fn set_usize(slot: &mut usize, key: &str, value: &ConfigValue) {
    match value.as_i64() {
        Some(v) if v > 0 => *slot = v as usize,
        _ => warn_type(key, value),
    }
}

fn set_bool(slot: &mut bool, key: &str, value: &ConfigValue) {
    match value.as_i64() {
        Some(v) => *slot = v != 0,
        None => warn_type(key, value),
    }
}
