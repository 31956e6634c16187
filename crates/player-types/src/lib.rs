use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a player instance.
///
/// Transitions are driven by the facade; hosts observe them through
/// [`EventKind::StateChanged`] events and the status snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Fresh instance, no data source set.
    #[default]
    Idle,
    /// Data source set, not yet prepared.
    Initialized,
    /// `prepare_async` in flight.
    Preparing,
    /// Media opened, stages built, ready to start.
    Prepared,
    /// Actively playing.
    Started,
    /// Playback paused by the host.
    Paused,
    /// Natural end of media reached (no loop budget left).
    Completed,
    /// Stopped by the host; pipeline torn down.
    Stopped,
    /// A fatal error was reported; pipeline torn down.
    Error,
}

/// Stream kind of a track, packet, or decode stage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Which clock drives A/V synchronization.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Follow the audio clock (default; falls back when audio is absent).
    #[default]
    Audio,
    /// Follow the video clock.
    Video,
    /// Follow the free-running external clock.
    External,
}

/// Decoder implementation preference passed to the decoder factory.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecoderPreference {
    /// Factory decides; failed opens retry with the alternate mode.
    #[default]
    Auto,
    Hardware,
    Software,
}

/// How an opened decoder actually runs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecoderMode {
    Hardware,
    Software,
}

/// Description of an opened decoder, reported with [`EventKind::DecoderOpened`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecoderInfo {
    /// Stream the decoder serves.
    pub kind: TrackKind,
    /// Codec name (for example `flac`, `h264`).
    pub codec: String,
    /// Hardware or software operation.
    pub mode: DecoderMode,
}

/// Per-track metadata produced by the demuxer at open time.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackInfo {
    /// Demuxer-scoped track identifier.
    pub id: u32,
    /// Audio or video.
    pub kind: Option<TrackKind>,
    /// Codec name (for example `aac`, `h264`).
    pub codec: Option<String>,
    /// Codec profile, if the container reports one.
    pub profile: Option<String>,
    /// Out-of-band codec configuration (SPS/PPS, ASC, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extradata: Vec<u8>,
    /// Video width in pixels.
    pub width: Option<u32>,
    /// Video height in pixels.
    pub height: Option<u32>,
    /// Video frame rate in frames per second.
    pub frame_rate: Option<f64>,
    /// Audio sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Audio channel count.
    pub channels: Option<u16>,
    /// Track bit rate in bits per second, if known.
    pub bit_rate: Option<u64>,
}

/// Container-level metadata produced by the demuxer at open time.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    /// Total duration in milliseconds, if the container reports one.
    pub duration_ms: Option<i64>,
    /// Overall bit rate in bits per second, if known.
    pub bit_rate: Option<u64>,
    /// Container format name (for example `flac`, `isomp4`).
    pub container: Option<String>,
    /// All tracks found in the container.
    pub tracks: Vec<TrackInfo>,
}

impl MediaInfo {
    /// First track of the given kind, if present.
    pub fn track(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == Some(kind))
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.track(kind).is_some()
    }
}

/// Network/cache telemetry reported by the source collaborator.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceStats {
    /// Total size of the resource in bytes, if known.
    pub total_bytes: Option<u64>,
    /// Bytes fetched from the transport so far.
    pub fetched_bytes: u64,
    /// Ranged requests issued so far.
    pub requests: u64,
    /// Bytes served from the local block cache.
    pub cache_hit_bytes: u64,
}

/// Opaque handle to a host-owned render surface.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// Host-facing event kinds. The wire code of each kind is stable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Media opened and stages built; `arg1` = duration ms (or -1).
    Prepared,
    /// Lifecycle transition; `arg1` = new state code.
    StateChanged,
    /// Natural completion with no loop budget left.
    Completed,
    /// Seek finished at the demuxer level; `arg1` = requested position ms.
    SeekComplete,
    /// Accurate seek converged; `arg1` = achieved position ms.
    AccurateSeekComplete,
    /// Buffering began; renderers hold.
    BufferingStart,
    /// Buffering progress; `arg1` = percent (0..=100).
    BufferingUpdate,
    /// Buffering finished; renderers resume.
    BufferingEnd,
    /// Video dimensions known or changed; `arg1` = width, `arg2` = height.
    VideoSizeChanged,
    /// First video frame rendered for the current generation.
    FirstVideoFrame,
    /// First audio samples delivered for the current generation.
    FirstAudioFrame,
    /// A decoder was opened; detail carries [`DecoderInfo`].
    DecoderOpened,
    /// The source switched to a different effective URL (redirect).
    UrlChanged,
    /// Periodic source cache/network statistics; detail carries [`SourceStats`].
    CacheStats,
    /// Fatal or surfaced error; `arg1` = stable error code.
    Error,
}

impl EventKind {
    /// Stable integer code for hosts that switch on numbers.
    pub fn code(self) -> i32 {
        match self {
            EventKind::Prepared => 1,
            EventKind::StateChanged => 2,
            EventKind::Completed => 3,
            EventKind::SeekComplete => 4,
            EventKind::AccurateSeekComplete => 5,
            EventKind::BufferingStart => 6,
            EventKind::BufferingUpdate => 7,
            EventKind::BufferingEnd => 8,
            EventKind::VideoSizeChanged => 9,
            EventKind::FirstVideoFrame => 10,
            EventKind::FirstAudioFrame => 11,
            EventKind::DecoderOpened => 12,
            EventKind::UrlChanged => 13,
            EventKind::CacheStats => 14,
            EventKind::Error => 15,
        }
    }
}

/// Structured payload attached to some events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventDetail {
    /// Human-readable text (error causes, new URLs).
    Text(String),
    /// Opened media description.
    Media(MediaInfo),
    /// Opened decoder description.
    Decoder(DecoderInfo),
    /// Source transport statistics.
    Cache(SourceStats),
}

/// One host-facing notification.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlayerEvent {
    pub kind: EventKind,
    /// Primary integer argument; meaning depends on `kind`.
    pub arg1: i64,
    /// Secondary integer argument; meaning depends on `kind`.
    pub arg2: i64,
    /// Optional structured payload.
    pub detail: Option<EventDetail>,
}

impl PlayerEvent {
    pub fn new(kind: EventKind) -> Self {
        PlayerEvent { kind, arg1: 0, arg2: 0, detail: None }
    }

    pub fn with_args(kind: EventKind, arg1: i64, arg2: i64) -> Self {
        PlayerEvent { kind, arg1, arg2, detail: None }
    }
}

/// Typed configuration value for the flat key/value table applied before
/// prepare. Unknown keys are retained so hosts can namespace their own.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValue {
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
}

impl ConfigValue {
    /// Integer view used by numeric keys; strings do not coerce.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::I32(v) => Some(i64::from(*v)),
            ConfigValue::I64(v) => Some(*v),
            ConfigValue::F64(v) => Some(*v as i64),
            ConfigValue::Str(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::I32(v) => Some(f64::from(*v)),
            ConfigValue::I64(v) => Some(*v as f64),
            ConfigValue::F64(v) => Some(*v),
            ConfigValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Point-in-time snapshot of a player instance, built by the facade for
/// telemetry endpoints and the CLI status line.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Master-clock position in milliseconds, if a clock is available.
    pub position_ms: Option<i64>,
    /// Media duration in milliseconds, if known.
    pub duration_ms: Option<i64>,
    /// `true` while the buffering gate holds the renderers.
    pub buffering: bool,
    /// Last buffering percentage reported (0..=100).
    pub buffer_percent: i32,
    /// Buffered audio duration in the packet queue (ms).
    pub audio_buffered_ms: i64,
    /// Buffered video duration in the packet queue (ms).
    pub video_buffered_ms: i64,
    /// Buffered bytes across both packet queues.
    pub buffered_bytes: u64,
    /// Video frames dropped by the framedrop gate.
    pub dropped_frames: u64,
    /// Packets/frames discarded due to stale generation serials.
    pub stale_discards: u64,
    /// Audio fill underruns observed.
    pub underruns: u64,
    /// Video frames that rendered late beyond the sync dead band.
    pub late_frames: u64,
    /// Playback speed factor.
    pub speed: f64,
    /// Linear volume gain (0.0..=1.0).
    pub volume: f32,
    /// `true` when audio output is muted.
    pub muted: bool,
    /// Remaining loop budget (None = infinite).
    pub loops_remaining: Option<u32>,
    /// Opened decoders.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decoders: Vec<DecoderInfo>,
    /// Source transport statistics, if the collaborator reports them.
    pub source: Option<SourceStats>,
}

/// Engine error with a stable wire code per variant.
///
/// Errors discovered asynchronously inside stage threads surface exactly once
/// as [`EventKind::Error`] events carrying [`PlayerError::code`]; facade calls
/// return them directly.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("operation not allowed in state {0:?}")]
    InvalidState(LifecycleState),
    #[error("failed to open source: {0}")]
    OpenFailed(String),
    #[error("failed to open source: http status {0}")]
    OpenFailedHttp(u16),
    #[error("no usable stream info in source")]
    StreamInfoNotFound,
    #[error("decoder init failed: {0}")]
    DecoderInit(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("read failed: {0}")]
    ReadFrame(String),
    #[error("render failed: {0}")]
    RenderFailed(String),
    #[error("seek failed: {0}")]
    SeekFailed(String),
    #[error("operation interrupted")]
    Interrupted,
    #[error("unsupported media: {0}")]
    Unsupported(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// Stable integer code carried in [`EventKind::Error`] events.
    pub fn code(&self) -> i32 {
        match self {
            PlayerError::InvalidState(_) => -10001,
            PlayerError::OpenFailed(_) => -10002,
            PlayerError::OpenFailedHttp(_) => -10003,
            PlayerError::StreamInfoNotFound => -10004,
            PlayerError::DecoderInit(_) => -10005,
            PlayerError::DecodeFailed(_) => -10006,
            PlayerError::ReadFrame(_) => -10007,
            PlayerError::RenderFailed(_) => -10008,
            PlayerError::SeekFailed(_) => -10009,
            PlayerError::Interrupted => -10010,
            PlayerError::Unsupported(_) => -10011,
            PlayerError::Io(_) => -10012,
        }
    }
}

impl LifecycleState {
    /// Stable integer code used in [`EventKind::StateChanged`] events.
    pub fn code(self) -> i32 {
        match self {
            LifecycleState::Idle => 0,
            LifecycleState::Initialized => 1,
            LifecycleState::Preparing => 2,
            LifecycleState::Prepared => 3,
            LifecycleState::Started => 4,
            LifecycleState::Paused => 5,
            LifecycleState::Completed => 6,
            LifecycleState::Stopped => 7,
            LifecycleState::Error => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_codes_are_unique() {
        let kinds = [
            EventKind::Prepared,
            EventKind::StateChanged,
            EventKind::Completed,
            EventKind::SeekComplete,
            EventKind::AccurateSeekComplete,
            EventKind::BufferingStart,
            EventKind::BufferingUpdate,
            EventKind::BufferingEnd,
            EventKind::VideoSizeChanged,
            EventKind::FirstVideoFrame,
            EventKind::FirstAudioFrame,
            EventKind::DecoderOpened,
            EventKind::UrlChanged,
            EventKind::CacheStats,
            EventKind::Error,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(PlayerError::OpenFailed("x".into()).code(), -10002);
        assert_eq!(PlayerError::ReadFrame("x".into()).code(), -10007);
        assert_eq!(
            PlayerError::InvalidState(LifecycleState::Idle).code(),
            -10001
        );
    }

    #[test]
    fn config_value_coercions() {
        assert_eq!(ConfigValue::I32(7).as_i64(), Some(7));
        assert_eq!(ConfigValue::F64(1.5).as_f64(), Some(1.5));
        assert_eq!(ConfigValue::Str("audio".into()).as_i64(), None);
        assert_eq!(ConfigValue::Str("audio".into()).as_str(), Some("audio"));
    }

    #[test]
    fn media_info_track_lookup() {
        let info = MediaInfo {
            tracks: vec![
                TrackInfo { id: 0, kind: Some(TrackKind::Video), ..Default::default() },
                TrackInfo { id: 1, kind: Some(TrackKind::Audio), ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(info.track(TrackKind::Audio).map(|t| t.id), Some(1));
        assert!(info.has_track(TrackKind::Video));
    }

    #[test]
    fn player_event_serializes_snake_case() {
        let ev = PlayerEvent::with_args(EventKind::VideoSizeChanged, 1920, 1080);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("video_size_changed"));
    }
}
