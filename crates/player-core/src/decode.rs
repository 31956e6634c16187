//! Per-stream decode processors.
//!
//! One thread per present stream pulls packets, drives the decoder
//! collaborator, gates the decoded frames (generation serial, accurate-seek
//! convergence, framedrop under load) and pushes survivors into the frame
//! queue. Flush markers reset the decoder in band; EOF markers drain
//! decoder-internal delay and mark the stream finished for the source
//! controller's completion check.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use player_types::{DecoderInfo, DecoderPreference, EventDetail, EventKind, PlayerError, SyncMode, TrackInfo, TrackKind};

use crate::clock::effective_sync_mode;
use crate::config::PlayerConfig;
use crate::frame::{AudioFrame, NO_PTS, Packet, VideoFrame};
use crate::message::Notifier;
use crate::queue::{FramePush, FrameQueue, PacketEntry, PacketPop, PacketQueue};
use crate::state::{PlaybackShared, SeekAdmit};

/// Pop timeout keeping the loops responsive to abort.
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// How far a video frame may lag the master clock before the framedrop gate
/// discards it, in milliseconds.
const FRAMEDROP_LAG_MS: f64 = 40.0;

/// Cap on the replay cache so a keyframe-less stream cannot grow it forever.
const MAX_GOP_PACKETS: usize = 600;

/// Synchronous audio decoder collaborator. Internal delay surfaces via
/// `drain`; there are no callbacks.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet, out: &mut Vec<AudioFrame>) -> Result<(), PlayerError>;

    fn drain(&mut self, _out: &mut Vec<AudioFrame>) -> Result<(), PlayerError> {
        Ok(())
    }

    fn flush(&mut self);

    fn info(&self) -> DecoderInfo;
}

/// Synchronous video decoder collaborator, same shape as [`AudioDecoder`].
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet, out: &mut Vec<VideoFrame>) -> Result<(), PlayerError>;

    fn drain(&mut self, _out: &mut Vec<VideoFrame>) -> Result<(), PlayerError> {
        Ok(())
    }

    fn flush(&mut self);

    fn info(&self) -> DecoderInfo;
}

/// Opens decoders at prepare time and again on reset-and-recover.
pub trait DecoderFactory: Send + Sync {
    fn open_audio(
        &self,
        track: &TrackInfo,
        preference: DecoderPreference,
    ) -> Result<Box<dyn AudioDecoder>, PlayerError>;

    fn open_video(
        &self,
        track: &TrackInfo,
        preference: DecoderPreference,
    ) -> Result<Box<dyn VideoDecoder>, PlayerError>;
}

/// Everything one processor thread needs.
pub struct DecodeContext {
    pub shared: Arc<PlaybackShared>,
    pub config: Arc<PlayerConfig>,
    pub notifier: Notifier,
    pub factory: Arc<dyn DecoderFactory>,
    pub track: TrackInfo,
}

/// Owned handle to one decode thread.
pub struct DecodeProcessor {
    join: Option<JoinHandle<()>>,
}

impl DecodeProcessor {
    /// Join the thread. The caller must have aborted the queues first.
    pub fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// The alternate implementation tried when a decoder open fails.
fn fallback_preference(preference: DecoderPreference) -> DecoderPreference {
    match preference {
        DecoderPreference::Software => DecoderPreference::Hardware,
        DecoderPreference::Auto | DecoderPreference::Hardware => DecoderPreference::Software,
    }
}

fn announce_decoder(ctx: &DecodeContext, info: &DecoderInfo) {
    ctx.shared.record_decoder(info.clone());
    ctx.notifier.with_detail(
        EventKind::DecoderOpened,
        0,
        0,
        EventDetail::Decoder(info.clone()),
    );
}

/// Verdict of the per-frame policy gates shared by both streams.
enum Gate {
    Deliver,
    DeliverAndAnnounce { achieved_ms: i64 },
    Drop,
}

fn seek_gate(shared: &PlaybackShared, kind: TrackKind, pts_ms: i64) -> Gate {
    match shared.seek.admit(kind, pts_ms) {
        SeekAdmit::Pass | SeekAdmit::Deliver => Gate::Deliver,
        SeekAdmit::Drop => {
            shared.seek_drops.fetch_add(1, Ordering::Relaxed);
            Gate::Drop
        }
        SeekAdmit::Complete { achieved_ms } => Gate::DeliverAndAnnounce { achieved_ms },
    }
}

/// Blocking frame-queue push that stays responsive to abort. Returns `false`
/// once the queue is gone.
fn push_frame<T>(queue: &FrameQueue<T>, shared: &PlaybackShared, mut frame: T) -> bool {
    loop {
        match queue.push(frame, POP_TIMEOUT) {
            FramePush::Pushed => return true,
            FramePush::Aborted => return false,
            FramePush::Timeout(f) => {
                if shared.abort.load(Ordering::Acquire) {
                    return false;
                }
                frame = f;
            }
        }
    }
}

/// Spawn the audio decode thread.
pub fn spawn_audio(
    ctx: DecodeContext,
    packets: Arc<PacketQueue>,
    frames: Arc<FrameQueue<AudioFrame>>,
) -> DecodeProcessor {
    let join = thread::Builder::new()
        .name("audio-decode".into())
        .spawn(move || audio_loop(ctx, packets, frames))
        .expect("spawn audio decode thread");
    DecodeProcessor { join: Some(join) }
}

fn open_audio_decoder(ctx: &DecodeContext) -> Option<Box<dyn AudioDecoder>> {
    let preference = ctx.config.decoder_preference;
    match ctx.factory.open_audio(&ctx.track, preference) {
        Ok(decoder) => Some(decoder),
        Err(first) => {
            let alternate = fallback_preference(preference);
            tracing::warn!(?preference, ?alternate, "audio decoder open failed, retrying: {first}");
            match ctx.factory.open_audio(&ctx.track, alternate) {
                Ok(decoder) => Some(decoder),
                Err(second) => {
                    ctx.notifier
                        .fatal(&PlayerError::DecoderInit(second.to_string()));
                    None
                }
            }
        }
    }
}

fn audio_loop(ctx: DecodeContext, packets: Arc<PacketQueue>, frames: Arc<FrameQueue<AudioFrame>>) {
    let Some(mut decoder) = open_audio_decoder(&ctx) else {
        return;
    };
    announce_decoder(&ctx, &decoder.info());

    let shared = &ctx.shared;
    let mut serial = packets.serial();
    let mut last_pts = NO_PTS;
    let mut out = Vec::new();

    loop {
        match packets.pop(POP_TIMEOUT) {
            PacketPop::Aborted => break,
            PacketPop::Timeout => {
                if shared.abort.load(Ordering::Acquire) {
                    break;
                }
            }
            PacketPop::Entry(PacketEntry::Flush { serial: next }) => {
                decoder.flush();
                serial = next;
                last_pts = NO_PTS;
            }
            PacketPop::Entry(PacketEntry::Eof { serial: eof_serial }) => {
                if eof_serial != serial {
                    continue;
                }
                out.clear();
                if let Err(e) = decoder.drain(&mut out) {
                    tracing::debug!("audio drain error: {e}");
                }
                for frame in out.drain(..) {
                    if !deliver_audio(&ctx, &frames, frame, serial, &mut last_pts) {
                        return;
                    }
                }
                if let Some(achieved_ms) = shared.seek.resign(TrackKind::Audio, last_pts) {
                    ctx.notifier
                        .with_args(EventKind::AccurateSeekComplete, achieved_ms, 0);
                }
                shared.stream_finished(TrackKind::Audio, serial);
                frames.wakeup();
                tracing::debug!(serial, "audio stream drained");
            }
            PacketPop::Entry(PacketEntry::Data(packet)) => {
                if packet.serial != serial {
                    shared.stale_discards.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                out.clear();
                if let Err(e) = decoder.decode(&packet, &mut out) {
                    // Audio glitches are skipped, not recovered.
                    tracing::debug!(pts_ms = packet.pts_ms, "audio decode error: {e}");
                    continue;
                }
                for frame in out.drain(..) {
                    if !deliver_audio(&ctx, &frames, frame, serial, &mut last_pts) {
                        return;
                    }
                }
            }
        }
    }
}

fn deliver_audio(
    ctx: &DecodeContext,
    frames: &FrameQueue<AudioFrame>,
    mut frame: AudioFrame,
    serial: u64,
    last_pts: &mut i64,
) -> bool {
    frame.serial = serial;
    if frame.pts_ms != NO_PTS {
        *last_pts = frame.pts_ms;
    }
    match seek_gate(&ctx.shared, TrackKind::Audio, frame.pts_ms) {
        Gate::Drop => true,
        Gate::Deliver => push_frame(frames, &ctx.shared, frame),
        Gate::DeliverAndAnnounce { achieved_ms } => {
            ctx.notifier
                .with_args(EventKind::AccurateSeekComplete, achieved_ms, 0);
            push_frame(frames, &ctx.shared, frame)
        }
    }
}

/// Spawn the video decode thread.
pub fn spawn_video(
    ctx: DecodeContext,
    packets: Arc<PacketQueue>,
    frames: Arc<FrameQueue<VideoFrame>>,
) -> DecodeProcessor {
    let join = thread::Builder::new()
        .name("video-decode".into())
        .spawn(move || video_loop(ctx, packets, frames))
        .expect("spawn video decode thread");
    DecodeProcessor { join: Some(join) }
}

fn open_video_decoder(
    ctx: &DecodeContext,
    preference: DecoderPreference,
) -> Option<Box<dyn VideoDecoder>> {
    match ctx.factory.open_video(&ctx.track, preference) {
        Ok(decoder) => Some(decoder),
        Err(first) => {
            let alternate = fallback_preference(preference);
            tracing::warn!(?preference, ?alternate, "video decoder open failed, retrying: {first}");
            match ctx.factory.open_video(&ctx.track, alternate) {
                Ok(decoder) => Some(decoder),
                Err(second) => {
                    ctx.notifier
                        .fatal(&PlayerError::DecoderInit(second.to_string()));
                    None
                }
            }
        }
    }
}

struct VideoPolicy {
    consecutive_drops: u32,
    decode_errors: u32,
    /// Packets since the last keyframe, replayed after a decoder reset.
    gop: Vec<Packet>,
}

impl VideoPolicy {
    fn new() -> Self {
        VideoPolicy {
            consecutive_drops: 0,
            decode_errors: 0,
            gop: Vec::new(),
        }
    }

    fn on_flush(&mut self) {
        self.consecutive_drops = 0;
        self.decode_errors = 0;
        self.gop.clear();
    }

    fn cache_packet(&mut self, packet: &Packet) {
        if packet.keyframe {
            self.gop.clear();
        }
        if self.gop.len() < MAX_GOP_PACKETS {
            self.gop.push(packet.clone());
        }
    }
}

fn video_loop(ctx: DecodeContext, packets: Arc<PacketQueue>, frames: Arc<FrameQueue<VideoFrame>>) {
    let Some(mut decoder) = open_video_decoder(&ctx, ctx.config.decoder_preference) else {
        return;
    };
    announce_decoder(&ctx, &decoder.info());

    let shared = ctx.shared.clone();
    let mut serial = packets.serial();
    let mut last_pts = NO_PTS;
    let mut policy = VideoPolicy::new();
    let mut out = Vec::new();

    loop {
        match packets.pop(POP_TIMEOUT) {
            PacketPop::Aborted => break,
            PacketPop::Timeout => {
                if shared.abort.load(Ordering::Acquire) {
                    break;
                }
            }
            PacketPop::Entry(PacketEntry::Flush { serial: next }) => {
                decoder.flush();
                serial = next;
                last_pts = NO_PTS;
                policy.on_flush();
            }
            PacketPop::Entry(PacketEntry::Eof { serial: eof_serial }) => {
                if eof_serial != serial {
                    continue;
                }
                out.clear();
                if let Err(e) = decoder.drain(&mut out) {
                    tracing::debug!("video drain error: {e}");
                }
                for frame in out.drain(..) {
                    if !deliver_video(&ctx, &frames, frame, serial, &mut last_pts, &mut policy) {
                        return;
                    }
                }
                if let Some(achieved_ms) = shared.seek.resign(TrackKind::Video, last_pts) {
                    ctx.notifier
                        .with_args(EventKind::AccurateSeekComplete, achieved_ms, 0);
                }
                shared.stream_finished(TrackKind::Video, serial);
                frames.wakeup();
                tracing::debug!(serial, "video stream drained");
            }
            PacketPop::Entry(PacketEntry::Data(packet)) => {
                if packet.serial != serial {
                    shared.stale_discards.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                policy.cache_packet(&packet);
                out.clear();
                match decoder.decode(&packet, &mut out) {
                    Ok(()) => {
                        if packet.keyframe {
                            policy.decode_errors = 0;
                        }
                        for frame in out.drain(..) {
                            if !deliver_video(&ctx, &frames, frame, serial, &mut last_pts, &mut policy)
                            {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        policy.decode_errors += 1;
                        tracing::debug!(
                            errors = policy.decode_errors,
                            pts_ms = packet.pts_ms,
                            "video decode error: {e}"
                        );
                        if policy.decode_errors > ctx.config.decoder_error_threshold {
                            match recover_video_decoder(&ctx, &mut policy) {
                                Some(fresh) => decoder = fresh,
                                None => return,
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Reset-and-recover: re-create the decoder and replay the cached group of
/// pictures to rebuild reference state. Replay output is discarded; the
/// frames were already delivered or dropped the first time around.
fn recover_video_decoder(
    ctx: &DecodeContext,
    policy: &mut VideoPolicy,
) -> Option<Box<dyn VideoDecoder>> {
    tracing::warn!(
        errors = policy.decode_errors,
        replay_packets = policy.gop.len(),
        "video decoder error threshold crossed, resetting"
    );
    let mut decoder = open_video_decoder(ctx, ctx.config.decoder_preference)?;
    let mut scratch = Vec::new();
    for packet in &policy.gop {
        scratch.clear();
        if let Err(e) = decoder.decode(packet, &mut scratch) {
            tracing::debug!(pts_ms = packet.pts_ms, "replay decode error: {e}");
        }
    }
    policy.decode_errors = 0;
    announce_decoder(ctx, &decoder.info());
    Some(decoder)
}

fn deliver_video(
    ctx: &DecodeContext,
    frames: &FrameQueue<VideoFrame>,
    mut frame: VideoFrame,
    serial: u64,
    last_pts: &mut i64,
    policy: &mut VideoPolicy,
) -> bool {
    let shared = &ctx.shared;
    frame.serial = serial;
    if frame.pts_ms != NO_PTS {
        *last_pts = frame.pts_ms;
    }

    let announce = match seek_gate(shared, TrackKind::Video, frame.pts_ms) {
        Gate::Drop => return true,
        Gate::Deliver => None,
        Gate::DeliverAndAnnounce { achieved_ms } => Some(achieved_ms),
    };

    // Framedrop under load: only when video is not driving the sync and no
    // seek is converging, and never more than the consecutive bound.
    if announce.is_none() && ctx.config.framedrop && !shared.seek.is_pending() {
        let mode = effective_sync_mode(
            shared.sync_mode(),
            shared.audio_clock.is_available(),
            shared.video_clock.is_available(),
        );
        if mode != SyncMode::Video && frame.pts_ms != NO_PTS {
            let master = shared.master_clock_ms();
            if !master.is_nan() && (frame.pts_ms as f64) < master - FRAMEDROP_LAG_MS {
                if policy.consecutive_drops < ctx.config.framedrop_max_consecutive {
                    policy.consecutive_drops += 1;
                    shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                // Force one frame through to bound drift.
                policy.consecutive_drops = 0;
            } else {
                policy.consecutive_drops = 0;
            }
        }
    }

    if let Some(achieved_ms) = announce {
        ctx.notifier
            .with_args(EventKind::AccurateSeekComplete, achieved_ms, 0);
    }
    push_frame(frames, shared, frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EventQueue;
    use crate::queue::FramePop;
    use player_types::DecoderMode;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Audio decoder that turns every packet into one 20 ms frame.
    struct ScriptedAudioDecoder;

    impl AudioDecoder for ScriptedAudioDecoder {
        fn decode(&mut self, packet: &Packet, out: &mut Vec<AudioFrame>) -> Result<(), PlayerError> {
            out.push(AudioFrame {
                pts_ms: packet.pts_ms,
                serial: 0,
                sample_rate: 48_000,
                channels: 2,
                samples: vec![0.0; 1920],
            });
            Ok(())
        }

        fn flush(&mut self) {}

        fn info(&self) -> DecoderInfo {
            DecoderInfo {
                kind: TrackKind::Audio,
                codec: "pcm".into(),
                mode: DecoderMode::Software,
            }
        }
    }

    /// Video decoder that errors on marked packets and records what it saw.
    struct ScriptedVideoDecoder {
        seen: Arc<Mutex<Vec<i64>>>,
        fail_below_zero_pts: bool,
    }

    impl VideoDecoder for ScriptedVideoDecoder {
        fn decode(&mut self, packet: &Packet, out: &mut Vec<VideoFrame>) -> Result<(), PlayerError> {
            self.seen.lock().unwrap().push(packet.pts_ms);
            if self.fail_below_zero_pts && packet.pts_ms < 0 {
                return Err(PlayerError::DecodeFailed("scripted failure".into()));
            }
            out.push(VideoFrame::software(packet.pts_ms, 16, 16, vec![0; 16]));
            Ok(())
        }

        fn flush(&mut self) {}

        fn info(&self) -> DecoderInfo {
            DecoderInfo {
                kind: TrackKind::Video,
                codec: "raw".into(),
                mode: DecoderMode::Software,
            }
        }
    }

    struct ScriptedFactory {
        video_opens: AtomicUsize,
        video_seen: Arc<Mutex<Vec<i64>>>,
        fail_below_zero_pts: bool,
    }

    impl ScriptedFactory {
        fn new(fail_below_zero_pts: bool) -> Self {
            ScriptedFactory {
                video_opens: AtomicUsize::new(0),
                video_seen: Arc::new(Mutex::new(Vec::new())),
                fail_below_zero_pts,
            }
        }
    }

    impl DecoderFactory for ScriptedFactory {
        fn open_audio(
            &self,
            _track: &TrackInfo,
            _preference: DecoderPreference,
        ) -> Result<Box<dyn AudioDecoder>, PlayerError> {
            Ok(Box::new(ScriptedAudioDecoder))
        }

        fn open_video(
            &self,
            _track: &TrackInfo,
            _preference: DecoderPreference,
        ) -> Result<Box<dyn VideoDecoder>, PlayerError> {
            self.video_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedVideoDecoder {
                seen: self.video_seen.clone(),
                fail_below_zero_pts: self.fail_below_zero_pts,
            }))
        }
    }

    fn context(factory: Arc<ScriptedFactory>, config: PlayerConfig) -> (DecodeContext, Arc<EventQueue>) {
        let events = EventQueue::new();
        let shared = Arc::new(PlaybackShared::new(SyncMode::Audio));
        shared.has_audio.store(true, Ordering::Release);
        (
            DecodeContext {
                shared,
                config: Arc::new(config),
                notifier: Notifier::new(events.clone()),
                factory,
                track: TrackInfo::default(),
            },
            events,
        )
    }

    fn audio_packet(pts_ms: i64) -> Packet {
        Packet::new(TrackKind::Audio, vec![0u8; 8], pts_ms)
    }

    fn video_packet(pts_ms: i64, keyframe: bool) -> Packet {
        let mut p = Packet::new(TrackKind::Video, vec![0u8; 8], pts_ms);
        p.keyframe = keyframe;
        p
    }

    #[test]
    fn stale_packets_never_become_frames() {
        let factory = Arc::new(ScriptedFactory::new(false));
        let (ctx, _events) = context(factory, PlayerConfig::default());
        let shared = ctx.shared.clone();
        let packets = Arc::new(PacketQueue::new(1));
        let frames = Arc::new(FrameQueue::new(16));

        packets.push(audio_packet(0));
        packets.push(audio_packet(20));
        packets.push_flush(2);
        packets.push(audio_packet(1000));

        let processor = spawn_audio(ctx, packets.clone(), frames.clone());

        // Only the post-flush packet may come through. The first two carry
        // serial 1 but the processor starts at the queue's current serial,
        // which the flush bumped to 2 before the thread popped anything.
        let frame = loop {
            match frames.pop(Duration::from_secs(1)) {
                FramePop::Frame(f) => break f,
                FramePop::Timeout | FramePop::Wakeup => continue,
                FramePop::Aborted => panic!("aborted"),
            }
        };
        assert_eq!(frame.pts_ms, 1000);
        assert_eq!(frame.serial, 2);
        assert_eq!(shared.stale_discards.load(Ordering::Relaxed), 2);

        shared.abort.store(true, Ordering::Release);
        packets.abort();
        frames.abort();
        processor.join();
    }

    #[test]
    fn accurate_seek_drops_early_frames_and_announces() {
        let factory = Arc::new(ScriptedFactory::new(false));
        let (ctx, events) = context(factory, PlayerConfig::default());
        let shared = ctx.shared.clone();
        shared.seek.arm(500, Duration::from_secs(2), true, false, 1);

        let packets = Arc::new(PacketQueue::new(1));
        let frames = Arc::new(FrameQueue::new(16));
        for pts in [440, 460, 480, 500, 520] {
            packets.push(audio_packet(pts));
        }
        let processor = spawn_audio(ctx, packets.clone(), frames.clone());

        let first = loop {
            match frames.pop(Duration::from_secs(1)) {
                FramePop::Frame(f) => break f,
                FramePop::Timeout | FramePop::Wakeup => continue,
                FramePop::Aborted => panic!("aborted"),
            }
        };
        assert_eq!(first.pts_ms, 500);
        assert_eq!(shared.seek_drops.load(Ordering::Relaxed), 3);

        let announced = loop {
            let ev = events.poll(Duration::from_secs(1)).expect("event");
            if ev.kind == EventKind::AccurateSeekComplete {
                break ev.arg1;
            }
        };
        assert_eq!(announced, 500);

        shared.abort.store(true, Ordering::Release);
        packets.abort();
        frames.abort();
        processor.join();
    }

    #[test]
    fn eof_marks_stream_finished_and_wakes_consumer() {
        let factory = Arc::new(ScriptedFactory::new(false));
        let (ctx, _events) = context(factory, PlayerConfig::default());
        let shared = ctx.shared.clone();
        let packets = Arc::new(PacketQueue::new(1));
        let frames: Arc<FrameQueue<AudioFrame>> = Arc::new(FrameQueue::new(4));

        packets.push(audio_packet(0));
        packets.push_eof();
        let processor = spawn_audio(ctx, packets.clone(), frames.clone());

        let mut got_frame = false;
        let mut got_wakeup = false;
        for _ in 0..20 {
            match frames.pop(Duration::from_millis(200)) {
                FramePop::Frame(_) => got_frame = true,
                FramePop::Wakeup => {
                    got_wakeup = true;
                    break;
                }
                FramePop::Timeout => {}
                FramePop::Aborted => panic!("aborted"),
            }
        }
        assert!(got_frame && got_wakeup);
        assert_eq!(shared.audio_finished_serial.load(Ordering::Relaxed), 1);

        shared.abort.store(true, Ordering::Release);
        packets.abort();
        frames.abort();
        processor.join();
    }

    #[test]
    fn framedrop_discards_late_frames_but_bounds_the_run() {
        let factory = Arc::new(ScriptedFactory::new(false));
        let mut config = PlayerConfig::default();
        config.framedrop_max_consecutive = 2;
        let (ctx, _events) = context(factory, config);
        let shared = ctx.shared.clone();
        shared.has_video.store(true, Ordering::Release);
        // Master (audio) clock far ahead of every frame below.
        shared.audio_clock.set(10_000.0, 1);

        let packets = Arc::new(PacketQueue::new(1));
        let frames: Arc<FrameQueue<VideoFrame>> = Arc::new(FrameQueue::new(16));
        for pts in [0, 40, 80, 120, 160, 200] {
            packets.push(video_packet(pts, pts == 0));
        }
        let processor = spawn_video(ctx, packets.clone(), frames.clone());

        // Two dropped, one forced through, repeating.
        let forced = loop {
            match frames.pop(Duration::from_secs(1)) {
                FramePop::Frame(f) => break f,
                FramePop::Timeout | FramePop::Wakeup => continue,
                FramePop::Aborted => panic!("aborted"),
            }
        };
        assert_eq!(forced.pts_ms, 80);
        assert!(shared.dropped_frames.load(Ordering::Relaxed) >= 2);

        shared.abort.store(true, Ordering::Release);
        packets.abort();
        frames.abort();
        processor.join();
    }

    #[test]
    fn error_threshold_triggers_reset_and_gop_replay() {
        let factory = Arc::new(ScriptedFactory::new(true));
        let mut config = PlayerConfig::default();
        config.decoder_error_threshold = 2;
        config.framedrop = false;
        let (ctx, _events) = context(factory.clone(), config);
        let shared = ctx.shared.clone();
        shared.has_video.store(true, Ordering::Release);

        let packets = Arc::new(PacketQueue::new(1));
        let frames: Arc<FrameQueue<VideoFrame>> = Arc::new(FrameQueue::new(64));
        // A healthy keyframe group, then three scripted failures (pts < 0)
        // to cross the threshold, then a healthy packet.
        packets.push(video_packet(0, true));
        packets.push(video_packet(40, false));
        for bad in [-1, -2, -3] {
            packets.push(video_packet(bad, false));
        }
        packets.push(video_packet(80, false));

        let processor = spawn_video(ctx, packets.clone(), frames.clone());

        let mut delivered = Vec::new();
        while delivered.len() < 3 {
            match frames.pop(Duration::from_secs(2)) {
                FramePop::Frame(f) => delivered.push(f.pts_ms),
                FramePop::Timeout | FramePop::Wakeup => continue,
                FramePop::Aborted => panic!("aborted"),
            }
        }
        assert_eq!(delivered, vec![0, 40, 80]);
        // The factory was asked for a second decoder after the threshold.
        assert_eq!(factory.video_opens.load(Ordering::SeqCst), 2);
        // The replay fed the cached group (including the failing entries)
        // back through the fresh decoder.
        let seen = factory.video_seen.lock().unwrap().clone();
        let replays = seen.iter().filter(|p| **p == 0).count();
        assert!(replays >= 2, "keyframe not replayed: {seen:?}");

        shared.abort.store(true, Ordering::Release);
        packets.abort();
        frames.abort();
        processor.join();
    }
}
