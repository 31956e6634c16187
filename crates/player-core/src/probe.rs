//! Symphonia-backed default collaborators.
//!
//! [`SymphoniaEngine`] implements both the demuxer factory and the decoder
//! factory: probing a source captures the exact codec parameters per track,
//! and decoder opens for the same engine reuse them instead of reconstructing
//! from the generic track metadata. Local files and HTTP range sources are
//! both supported; video decode is out of this engine's scope and must come
//! from a host-provided factory.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{self, CODEC_TYPE_NULL, CodecParameters, CodecType, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use player_types::{
    DecoderInfo, DecoderMode, DecoderPreference, MediaInfo, PlayerError, SourceStats, TrackInfo,
    TrackKind,
};

use crate::decode::{AudioDecoder, DecoderFactory, VideoDecoder};
use crate::demux::{DemuxRead, Demuxer, DemuxerFactory, OpenOptions};
use crate::frame::{AudioFrame, NO_PTS, Packet};
use crate::http::{HttpReader, HttpReaderConfig, HttpTelemetry};

fn time_to_ms(time: Time) -> i64 {
    time.seconds as i64 * 1000 + (time.frac * 1000.0) as i64
}

fn ts_to_ms(time_base: Option<TimeBase>, ts: u64) -> i64 {
    match time_base {
        Some(tb) => time_to_ms(tb.calc_time(ts)),
        None => NO_PTS,
    }
}

fn ms_to_time(ms: i64) -> Time {
    let ms = ms.max(0) as u64;
    Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0)
}

/// Codec label used in track metadata and decoder info.
fn codec_label(codec: CodecType) -> Option<String> {
    let name = match codec {
        codecs::CODEC_TYPE_FLAC => "flac",
        codecs::CODEC_TYPE_MP3 => "mp3",
        codecs::CODEC_TYPE_AAC => "aac",
        codecs::CODEC_TYPE_ALAC => "alac",
        codecs::CODEC_TYPE_VORBIS => "vorbis",
        codecs::CODEC_TYPE_OPUS => "opus",
        codecs::CODEC_TYPE_PCM_S16LE => "pcm_s16le",
        codecs::CODEC_TYPE_PCM_S16BE => "pcm_s16be",
        codecs::CODEC_TYPE_PCM_S24LE => "pcm_s24le",
        codecs::CODEC_TYPE_PCM_S32LE => "pcm_s32le",
        codecs::CODEC_TYPE_PCM_F32LE => "pcm_f32le",
        codecs::CODEC_TYPE_PCM_U8 => "pcm_u8",
        _ => return None,
    };
    Some(name.to_string())
}

fn codec_type_from_label(label: &str) -> Option<CodecType> {
    let codec = match label {
        "flac" => codecs::CODEC_TYPE_FLAC,
        "mp3" => codecs::CODEC_TYPE_MP3,
        "aac" => codecs::CODEC_TYPE_AAC,
        "alac" => codecs::CODEC_TYPE_ALAC,
        "vorbis" => codecs::CODEC_TYPE_VORBIS,
        "opus" => codecs::CODEC_TYPE_OPUS,
        "pcm_s16le" => codecs::CODEC_TYPE_PCM_S16LE,
        "pcm_s16be" => codecs::CODEC_TYPE_PCM_S16BE,
        "pcm_s24le" => codecs::CODEC_TYPE_PCM_S24LE,
        "pcm_s32le" => codecs::CODEC_TYPE_PCM_S32LE,
        "pcm_f32le" => codecs::CODEC_TYPE_PCM_F32LE,
        "pcm_u8" => codecs::CODEC_TYPE_PCM_U8,
        _ => return None,
    };
    Some(codec)
}

fn track_info_from(track: &Track) -> TrackInfo {
    let p = &track.codec_params;
    TrackInfo {
        id: track.id,
        kind: Some(TrackKind::Audio),
        codec: codec_label(p.codec),
        profile: None,
        extradata: p.extra_data.as_deref().map(<[u8]>::to_vec).unwrap_or_default(),
        width: None,
        height: None,
        frame_rate: None,
        sample_rate: p.sample_rate,
        channels: p.channels.map(|c| c.count() as u16),
        bit_rate: None,
    }
}

fn duration_ms_of(params: &CodecParameters) -> Option<i64> {
    let frames = params.n_frames?;
    match params.time_base {
        Some(tb) => Some(time_to_ms(tb.calc_time(frames))),
        None => {
            let rate = params.sample_rate.filter(|r| *r > 0)?;
            Some((frames.saturating_mul(1000) / u64::from(rate)) as i64)
        }
    }
}

/// Demuxer and decoder factory over Symphonia, audio sources only.
pub struct SymphoniaEngine {
    http_config: HttpReaderConfig,
    /// Codec parameters captured at probe time, keyed by track id.
    probed: Mutex<HashMap<u32, CodecParameters>>,
}

impl SymphoniaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(SymphoniaEngine {
            http_config: HttpReaderConfig::default(),
            probed: Mutex::new(HashMap::new()),
        })
    }

    fn open_source(
        &self,
        url: &str,
        opts: &OpenOptions,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<(Box<dyn MediaSource>, Option<Arc<HttpTelemetry>>), PlayerError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let mut config = self.http_config.clone();
            if let Some(timeout) = opts.io_timeout {
                config.timeout = timeout;
            }
            let reader = HttpReader::new(url.to_string(), config, interrupt.clone());
            let telemetry = reader.telemetry();
            return Ok((Box::new(reader), Some(telemetry)));
        }
        let path = url.strip_prefix("file://").unwrap_or(url);
        let file = File::open(path).map_err(|e| PlayerError::OpenFailed(format!("{path}: {e}")))?;
        Ok((Box::new(file), None))
    }

    /// Codec parameters captured for `track_id` during the last open.
    fn probed_params(&self, track_id: u32) -> Option<CodecParameters> {
        self.probed.lock().unwrap().get(&track_id).cloned()
    }
}

impl DemuxerFactory for SymphoniaEngine {
    fn open(
        &self,
        url: &str,
        opts: &OpenOptions,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<(Box<dyn Demuxer>, MediaInfo), PlayerError> {
        let (source, telemetry) = self.open_source(url, opts, interrupt)?;

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(url.split('?').next().unwrap_or(url))
            .extension()
            .and_then(|e| e.to_str())
        {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| classify_open_error(e, telemetry.as_deref()))?;
        let mut format = probed.format;

        let tracks: Vec<&Track> = format
            .tracks()
            .iter()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .collect();
        if tracks.is_empty() {
            return Err(PlayerError::StreamInfoNotFound);
        }

        {
            let mut g = self.probed.lock().unwrap();
            g.clear();
            for track in &tracks {
                g.insert(track.id, track.codec_params.clone());
            }
        }

        let duration_ms = tracks.iter().find_map(|t| duration_ms_of(&t.codec_params));
        let info = MediaInfo {
            duration_ms,
            bit_rate: None,
            container: hint_container(url),
            tracks: tracks.iter().map(|t| track_info_from(t)).collect(),
        };

        let timing: HashMap<u32, Option<TimeBase>> = tracks
            .iter()
            .map(|t| (t.id, t.codec_params.time_base))
            .collect();

        if let Some(start_ms) = opts.start_ms.filter(|ms| *ms > 0) {
            let _ = format.seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: ms_to_time(start_ms),
                    track_id: None,
                },
            );
        }

        let demuxer = SymphoniaDemuxer {
            format,
            timing,
            telemetry,
            interrupt: interrupt.clone(),
            eof: false,
        };
        tracing::info!(url, ?duration_ms, tracks = info.tracks.len(), "source opened");
        Ok((Box::new(demuxer), info))
    }
}

fn classify_open_error(err: SymphoniaError, telemetry: Option<&HttpTelemetry>) -> PlayerError {
    if let Some(status) = telemetry.and_then(HttpTelemetry::last_http_error) {
        return PlayerError::OpenFailedHttp(status);
    }
    match err {
        SymphoniaError::IoError(e) if e.kind() == io::ErrorKind::Interrupted => {
            PlayerError::Interrupted
        }
        SymphoniaError::Unsupported(what) => PlayerError::Unsupported(what.to_string()),
        other => PlayerError::OpenFailed(other.to_string()),
    }
}

/// Container label derived from the url extension.
fn hint_container(url: &str) -> Option<String> {
    Path::new(url.split('?').next().unwrap_or(url))
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    timing: HashMap<u32, Option<TimeBase>>,
    telemetry: Option<Arc<HttpTelemetry>>,
    interrupt: Arc<AtomicBool>,
    eof: bool,
}

impl Demuxer for SymphoniaDemuxer {
    fn read_packet(&mut self) -> Result<DemuxRead, PlayerError> {
        if self.interrupt.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(PlayerError::Interrupted);
        }
        if self.eof {
            return Ok(DemuxRead::Eof);
        }
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    return Ok(DemuxRead::Eof);
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::Interrupted => {
                    return Err(PlayerError::Interrupted);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return Ok(DemuxRead::Eof);
                }
                Err(e) => return Err(PlayerError::ReadFrame(e.to_string())),
            };
            // Packets from tracks we did not announce are skipped.
            let Some(time_base) = self.timing.get(&packet.track_id()).copied() else {
                continue;
            };
            let pts_ms = ts_to_ms(time_base, packet.ts());
            let mut out = Packet::new(TrackKind::Audio, packet.buf().to_vec(), pts_ms);
            out.duration_ms = match time_base {
                Some(tb) => time_to_ms(tb.calc_time(packet.dur())),
                None => NO_PTS,
            };
            return Ok(DemuxRead::Packet(out));
        }
    }

    fn seek(&mut self, target_ms: i64) -> Result<(), PlayerError> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: ms_to_time(target_ms),
                    track_id: None,
                },
            )
            .map_err(|e| PlayerError::SeekFailed(e.to_string()))?;
        self.eof = false;
        Ok(())
    }

    fn io_error(&self) -> Option<i32> {
        self.telemetry
            .as_deref()
            .and_then(HttpTelemetry::last_http_error)
            .map(i32::from)
    }

    fn effective_url(&self) -> Option<String> {
        self.telemetry.as_deref().and_then(HttpTelemetry::effective_url)
    }

    fn stats(&self) -> SourceStats {
        self.telemetry
            .as_deref()
            .map(HttpTelemetry::stats)
            .unwrap_or_default()
    }
}

/// Codec parameters rebuilt from generic track metadata, for decoder opens
/// that did not go through this engine's probe.
fn params_from_track(track: &TrackInfo) -> Result<CodecParameters, PlayerError> {
    let label = track
        .codec
        .as_deref()
        .ok_or_else(|| PlayerError::DecoderInit("track carries no codec name".into()))?;
    let codec = codec_type_from_label(label)
        .ok_or_else(|| PlayerError::Unsupported(format!("codec {label}")))?;

    let mut params = CodecParameters::new();
    params.for_codec(codec);
    if let Some(rate) = track.sample_rate {
        params.with_sample_rate(rate);
        params.with_time_base(TimeBase::new(1, rate));
    }
    if let Some(count) = track.channels.filter(|c| (1..=32).contains(c)) {
        let mask = (1u32 << count) - 1;
        if let Some(channels) = symphonia::core::audio::Channels::from_bits(mask) {
            params.with_channels(channels);
        }
    }
    if !track.extradata.is_empty() {
        params.with_extra_data(track.extradata.clone().into_boxed_slice());
    }
    Ok(params)
}

struct SymphoniaAudioDecoder {
    decoder: Box<dyn codecs::Decoder>,
    codec: String,
    time_base: Option<TimeBase>,
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn decode(&mut self, packet: &Packet, out: &mut Vec<AudioFrame>) -> Result<(), PlayerError> {
        // The container timestamp only matters for the frame pts; feed a
        // synthetic one derived from it.
        let ts = match (self.time_base, packet.pts_ms) {
            (Some(tb), pts) if pts != NO_PTS => {
                (pts.max(0) as u64).saturating_mul(u64::from(tb.denom)) / 1000 / u64::from(tb.numer)
            }
            _ => 0,
        };
        let sym_packet =
            symphonia::core::formats::Packet::new_from_slice(0, ts, 0, &packet.data);
        let decoded = self
            .decoder
            .decode(&sym_packet)
            .map_err(|e| PlayerError::DecodeFailed(e.to_string()))?;
        if decoded.frames() == 0 {
            return Ok(());
        }
        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        out.push(AudioFrame {
            pts_ms: packet.pts_ms,
            serial: packet.serial,
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            samples: samples.samples().to_vec(),
        });
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }

    fn info(&self) -> DecoderInfo {
        DecoderInfo {
            kind: TrackKind::Audio,
            codec: self.codec.clone(),
            mode: DecoderMode::Software,
        }
    }
}

impl DecoderFactory for SymphoniaEngine {
    fn open_audio(
        &self,
        track: &TrackInfo,
        _preference: DecoderPreference,
    ) -> Result<Box<dyn AudioDecoder>, PlayerError> {
        let params = match self.probed_params(track.id) {
            Some(p) => p,
            None => params_from_track(track)?,
        };
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PlayerError::DecoderInit(e.to_string()))?;
        let codec = codec_label(params.codec).unwrap_or_else(|| "unknown".to_string());
        tracing::debug!(codec, track = track.id, "audio decoder opened");
        Ok(Box::new(SymphoniaAudioDecoder {
            decoder,
            codec,
            time_base: params.time_base,
        }))
    }

    fn open_video(
        &self,
        _track: &TrackInfo,
        _preference: DecoderPreference,
    ) -> Result<Box<dyn VideoDecoder>, PlayerError> {
        Err(PlayerError::Unsupported(
            "video decode requires a host decoder factory".into(),
        ))
    }
}
