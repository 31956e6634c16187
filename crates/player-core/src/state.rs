//! Shared per-player state visible to every stage thread.
//!
//! One `Arc<PlaybackShared>` is handed to the source controller, both decode
//! processors, and both render schedulers. Ownership stays unidirectional:
//! stages read and update this block and publish events, they never hold a
//! reference back to the facade.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use player_types::{DecoderInfo, SourceStats, SyncMode, TrackKind};

use crate::clock::{Clock, effective_sync_mode};
use crate::frame::NO_PTS;

/// Convergence state of one stream during an accurate seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamSeek {
    /// Stream absent or not participating.
    NotInvolved,
    /// Still discarding frames before the target.
    Seeking,
    /// Reached a frame at or past the target.
    Done(i64),
}

#[derive(Debug)]
struct AccurateSeek {
    target_ms: i64,
    deadline: Instant,
    serial: u64,
    audio: StreamSeek,
    video: StreamSeek,
}

impl AccurateSeek {
    fn stream_mut(&mut self, kind: TrackKind) -> &mut StreamSeek {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    fn peer(&self, kind: TrackKind) -> StreamSeek {
        match kind {
            TrackKind::Audio => self.video,
            TrackKind::Video => self.audio,
        }
    }

    fn achieved(&self) -> i64 {
        let mut achieved = self.target_ms;
        for s in [self.audio, self.video] {
            if let StreamSeek::Done(pts) = s {
                achieved = achieved.max(pts);
            }
        }
        achieved
    }
}

/// Verdict of the accurate-seek gate for one decoded frame.
#[derive(Debug, PartialEq, Eq)]
pub enum SeekAdmit {
    /// No accurate seek pending; deliver normally.
    Pass,
    /// Frame precedes the target; discard it.
    Drop,
    /// This call completed the convergence (or the deadline expired);
    /// deliver the frame and announce the achieved position.
    Complete { achieved_ms: i64 },
    /// Converged while the peer finished the protocol; just deliver.
    Deliver,
}

/// Accurate-seek convergence block: one lock, one condvar per stream.
///
/// Decode processors call [`SeekSync::admit`] for every decoded frame. The
/// first stream to cross the target waits (bounded by the armed deadline)
/// for the other; whichever call completes the pair reports the achieved
/// position for the accurate-seek-complete event.
pub struct SeekSync {
    inner: Mutex<Option<AccurateSeek>>,
    audio_cv: Condvar,
    video_cv: Condvar,
}

impl SeekSync {
    pub fn new() -> Self {
        SeekSync {
            inner: Mutex::new(None),
            audio_cv: Condvar::new(),
            video_cv: Condvar::new(),
        }
    }

    /// Arm convergence for a new seek generation. Replaces any pending
    /// request; stale waiters notice the serial change and bail out.
    pub fn arm(&self, target_ms: i64, timeout: Duration, has_audio: bool, has_video: bool, serial: u64) {
        let mut g = self.inner.lock().unwrap();
        *g = Some(AccurateSeek {
            target_ms,
            deadline: Instant::now() + timeout,
            serial,
            audio: if has_audio { StreamSeek::Seeking } else { StreamSeek::NotInvolved },
            video: if has_video { StreamSeek::Seeking } else { StreamSeek::NotInvolved },
        });
        self.audio_cv.notify_all();
        self.video_cv.notify_all();
    }

    /// Drop any pending request and release all waiters.
    pub fn cancel(&self) {
        let mut g = self.inner.lock().unwrap();
        *g = None;
        self.audio_cv.notify_all();
        self.video_cv.notify_all();
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Target of the pending request, if one is armed.
    pub fn pending_target(&self) -> Option<i64> {
        self.inner.lock().unwrap().as_ref().map(|r| r.target_ms)
    }

    /// Gate one decoded frame. May block until the peer stream converges or
    /// the armed deadline passes, never longer.
    pub fn admit(&self, kind: TrackKind, pts_ms: i64) -> SeekAdmit {
        enum Phase {
            Pass,
            Drop,
            CompleteNow,
            WaitPeer { serial: u64 },
        }

        let mut g = self.inner.lock().unwrap();
        let phase = match g.as_mut() {
            None => Phase::Pass,
            Some(req) => {
                let pts = if pts_ms == NO_PTS { req.target_ms } else { pts_ms };
                if pts < req.target_ms {
                    Phase::Drop
                } else {
                    *req.stream_mut(kind) = StreamSeek::Done(pts);
                    if req.peer(kind) == StreamSeek::Seeking {
                        Phase::WaitPeer { serial: req.serial }
                    } else {
                        Phase::CompleteNow
                    }
                }
            }
        };

        match phase {
            Phase::Pass => SeekAdmit::Pass,
            Phase::Drop => SeekAdmit::Drop,
            Phase::CompleteNow => {
                let achieved_ms = g.take().map(|r| r.achieved()).unwrap_or(pts_ms);
                self.audio_cv.notify_all();
                self.video_cv.notify_all();
                SeekAdmit::Complete { achieved_ms }
            }
            Phase::WaitPeer { serial } => loop {
                let deadline = match g.as_ref() {
                    Some(r) if r.serial == serial => r.deadline,
                    // Completed by the peer, or replaced by a newer seek.
                    _ => return SeekAdmit::Deliver,
                };
                let now = Instant::now();
                if now >= deadline {
                    let achieved_ms = g.take().map(|r| r.achieved()).unwrap_or(pts_ms);
                    self.audio_cv.notify_all();
                    self.video_cv.notify_all();
                    tracing::warn!(achieved_ms, "accurate seek deadline expired");
                    return SeekAdmit::Complete { achieved_ms };
                }
                let cv = match kind {
                    TrackKind::Audio => &self.audio_cv,
                    TrackKind::Video => &self.video_cv,
                };
                let (guard, _res) = cv.wait_timeout(g, deadline - now).unwrap();
                g = guard;
            },
        }
    }

    /// Declare a stream converged without a qualifying frame (EOF before the
    /// target). Returns the achieved position when this completed the pair.
    pub fn resign(&self, kind: TrackKind, pts_ms: i64) -> Option<i64> {
        let mut g = self.inner.lock().unwrap();
        match g.as_mut() {
            None => return None,
            Some(req) => {
                let pts = if pts_ms == NO_PTS { req.target_ms } else { pts_ms };
                *req.stream_mut(kind) = StreamSeek::Done(pts);
                if req.peer(kind) == StreamSeek::Seeking {
                    return None;
                }
            }
        }
        let achieved = g.take().map(|r| r.achieved());
        self.audio_cv.notify_all();
        self.video_cv.notify_all();
        achieved
    }
}

impl Default for SeekSync {
    fn default() -> Self {
        SeekSync::new()
    }
}

/// Shared state for one player instance.
pub struct PlaybackShared {
    pub audio_clock: Clock,
    pub video_clock: Clock,
    pub external_clock: Clock,
    sync_mode: Mutex<SyncMode>,

    /// Current generation serial; bumped by the seek protocol.
    pub serial: AtomicU64,
    pub paused: AtomicBool,
    pub buffering: AtomicBool,
    pub abort: AtomicBool,

    pub has_audio: AtomicBool,
    pub has_video: AtomicBool,
    /// Generation whose EOF the audio decoder finished draining.
    pub audio_finished_serial: AtomicU64,
    pub video_finished_serial: AtomicU64,
    first_audio_serial: AtomicU64,
    first_video_serial: AtomicU64,

    pub dropped_frames: AtomicU64,
    pub stale_discards: AtomicU64,
    pub underruns: AtomicU64,
    pub late_frames: AtomicU64,
    pub seek_drops: AtomicU64,

    pub audio_buffered_ms: AtomicI64,
    pub video_buffered_ms: AtomicI64,
    pub buffered_bytes: AtomicU64,
    pub buffer_percent: AtomicI32,

    volume_bits: AtomicU32,
    speed_bits: AtomicU64,
    pub muted: AtomicBool,

    pub seek_pending: AtomicBool,
    pub seek_target_ms: AtomicI64,
    pub seek: SeekSync,

    decoders: Mutex<Vec<DecoderInfo>>,
    source_stats: Mutex<Option<SourceStats>>,
}

impl PlaybackShared {
    pub fn new(sync_mode: SyncMode) -> Self {
        PlaybackShared {
            audio_clock: Clock::new(),
            video_clock: Clock::new(),
            external_clock: Clock::new(),
            sync_mode: Mutex::new(sync_mode),
            serial: AtomicU64::new(1),
            paused: AtomicBool::new(false),
            buffering: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            has_audio: AtomicBool::new(false),
            has_video: AtomicBool::new(false),
            audio_finished_serial: AtomicU64::new(0),
            video_finished_serial: AtomicU64::new(0),
            first_audio_serial: AtomicU64::new(0),
            first_video_serial: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            stale_discards: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            late_frames: AtomicU64::new(0),
            seek_drops: AtomicU64::new(0),
            audio_buffered_ms: AtomicI64::new(0),
            video_buffered_ms: AtomicI64::new(0),
            buffered_bytes: AtomicU64::new(0),
            buffer_percent: AtomicI32::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            speed_bits: AtomicU64::new(1.0f64.to_bits()),
            muted: AtomicBool::new(false),
            seek_pending: AtomicBool::new(false),
            seek_target_ms: AtomicI64::new(0),
            seek: SeekSync::new(),
            decoders: Mutex::new(Vec::new()),
            source_stats: Mutex::new(None),
        }
    }

    pub fn sync_mode(&self) -> SyncMode {
        *self.sync_mode.lock().unwrap()
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        *self.sync_mode.lock().unwrap() = mode;
    }

    pub fn current_serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Advance to the next generation and return it.
    pub fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Projected master-clock position, `NAN` when no clock is live.
    pub fn master_clock_ms(&self) -> f64 {
        let mode = effective_sync_mode(
            self.sync_mode(),
            self.audio_clock.is_available(),
            self.video_clock.is_available(),
        );
        match mode {
            SyncMode::Audio => self.audio_clock.get(),
            SyncMode::Video => self.video_clock.get(),
            SyncMode::External => self.external_clock.get(),
        }
    }

    /// Pause or resume every clock together with the shared flag.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        self.audio_clock.pause(paused);
        self.video_clock.pause(paused);
        self.external_clock.pause(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed_bits.store(speed.to_bits(), Ordering::Release);
        self.audio_clock.set_speed(speed);
        self.video_clock.set_speed(speed);
        self.external_clock.set_speed(speed);
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Acquire))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }

    /// `true` the first time the flag is claimed for `serial`.
    pub fn mark_first_audio(&self, serial: u64) -> bool {
        self.first_audio_serial.swap(serial, Ordering::AcqRel) != serial
    }

    pub fn mark_first_video(&self, serial: u64) -> bool {
        self.first_video_serial.swap(serial, Ordering::AcqRel) != serial
    }

    pub fn stream_finished(&self, kind: TrackKind, serial: u64) {
        match kind {
            TrackKind::Audio => self.audio_finished_serial.store(serial, Ordering::Release),
            TrackKind::Video => self.video_finished_serial.store(serial, Ordering::Release),
        }
    }

    /// Every present stream has drained the given generation's EOF.
    pub fn all_streams_finished(&self, serial: u64) -> bool {
        let audio_done = !self.has_audio.load(Ordering::Acquire)
            || self.audio_finished_serial.load(Ordering::Acquire) == serial;
        let video_done = !self.has_video.load(Ordering::Acquire)
            || self.video_finished_serial.load(Ordering::Acquire) == serial;
        audio_done && video_done
    }

    pub fn record_decoder(&self, info: DecoderInfo) {
        let mut g = self.decoders.lock().unwrap();
        g.retain(|d| d.kind != info.kind);
        g.push(info);
    }

    pub fn decoder_infos(&self) -> Vec<DecoderInfo> {
        self.decoders.lock().unwrap().clone()
    }

    pub fn set_source_stats(&self, stats: SourceStats) {
        *self.source_stats.lock().unwrap() = Some(stats);
    }

    pub fn source_stats(&self) -> Option<SourceStats> {
        self.source_stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn admit_passes_when_not_armed() {
        let sync = SeekSync::new();
        assert_eq!(sync.admit(TrackKind::Audio, 100), SeekAdmit::Pass);
    }

    #[test]
    fn admit_drops_frames_before_target() {
        let sync = SeekSync::new();
        sync.arm(1000, Duration::from_secs(1), true, true, 2);
        assert_eq!(sync.admit(TrackKind::Video, 400), SeekAdmit::Drop);
        assert_eq!(sync.admit(TrackKind::Audio, 999), SeekAdmit::Drop);
        assert!(sync.is_pending());
    }

    #[test]
    fn pair_converges_and_reports_achieved_position() {
        let sync = Arc::new(SeekSync::new());
        sync.arm(1000, Duration::from_secs(5), true, true, 2);
        let start = Arc::new(Barrier::new(2));

        let audio = {
            let sync = sync.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                sync.admit(TrackKind::Audio, 1005)
            })
        };

        start.wait();
        thread::sleep(Duration::from_millis(50));
        let video = sync.admit(TrackKind::Video, 1020);

        let audio = audio.join().unwrap();
        let outcomes = [audio, video];
        assert!(
            outcomes
                .iter()
                .any(|o| *o == SeekAdmit::Complete { achieved_ms: 1020 }),
            "one side must complete: {outcomes:?}"
        );
        assert!(outcomes.iter().any(|o| *o == SeekAdmit::Deliver));
        assert!(!sync.is_pending());
    }

    #[test]
    fn single_stream_completes_alone() {
        let sync = SeekSync::new();
        sync.arm(500, Duration::from_secs(1), false, true, 2);
        assert_eq!(
            sync.admit(TrackKind::Video, 510),
            SeekAdmit::Complete { achieved_ms: 510 }
        );
    }

    #[test]
    fn deadline_bounds_the_wait() {
        let sync = SeekSync::new();
        sync.arm(1000, Duration::from_millis(150), true, true, 2);
        let begun = Instant::now();
        let outcome = sync.admit(TrackKind::Video, 1001);
        let waited = begun.elapsed();
        assert_eq!(outcome, SeekAdmit::Complete { achieved_ms: 1001 });
        assert!(waited < Duration::from_millis(600), "waited {waited:?}");
        assert!(!sync.is_pending());
    }

    #[test]
    fn resign_completes_the_pair() {
        let sync = Arc::new(SeekSync::new());
        sync.arm(1000, Duration::from_secs(5), true, true, 2);

        let video = {
            let sync = sync.clone();
            thread::spawn(move || sync.admit(TrackKind::Video, 1002))
        };
        thread::sleep(Duration::from_millis(50));
        let achieved = sync.resign(TrackKind::Audio, 980);
        let video = video.join().unwrap();

        match (achieved, video) {
            (Some(ms), SeekAdmit::Deliver) => assert_eq!(ms, 1002),
            (None, SeekAdmit::Complete { achieved_ms }) => assert_eq!(achieved_ms, 1002),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!sync.is_pending());
    }

    #[test]
    fn cancel_releases_waiters() {
        let sync = Arc::new(SeekSync::new());
        sync.arm(1000, Duration::from_secs(10), true, true, 2);

        let video = {
            let sync = sync.clone();
            thread::spawn(move || sync.admit(TrackKind::Video, 1500))
        };
        thread::sleep(Duration::from_millis(50));
        sync.cancel();
        assert_eq!(video.join().unwrap(), SeekAdmit::Deliver);
    }

    #[test]
    fn shared_tracks_generation_and_finish() {
        let shared = PlaybackShared::new(SyncMode::Audio);
        shared.has_audio.store(true, Ordering::Release);
        shared.has_video.store(true, Ordering::Release);

        assert_eq!(shared.current_serial(), 1);
        let s = shared.next_serial();
        assert_eq!(s, 2);
        assert!(!shared.all_streams_finished(s));
        shared.stream_finished(TrackKind::Audio, s);
        shared.stream_finished(TrackKind::Video, s);
        assert!(shared.all_streams_finished(s));
    }

    #[test]
    fn first_frame_flags_fire_once_per_serial() {
        let shared = PlaybackShared::new(SyncMode::Audio);
        assert!(shared.mark_first_video(1));
        assert!(!shared.mark_first_video(1));
        assert!(shared.mark_first_video(2));
        assert!(!shared.mark_first_video(2));
    }

    #[test]
    fn master_clock_falls_back_when_audio_is_dark() {
        let shared = PlaybackShared::new(SyncMode::Audio);
        assert!(shared.master_clock_ms().is_nan());
        shared.video_clock.set(750.0, 1);
        let pos = shared.master_clock_ms();
        assert!(pos >= 750.0 && pos < 1000.0);
        shared.audio_clock.set(400.0, 1);
        let pos = shared.master_clock_ms();
        assert!(pos >= 400.0 && pos < 700.0);
    }

    #[test]
    fn tunables_round_trip() {
        let shared = PlaybackShared::new(SyncMode::Audio);
        shared.set_volume(0.25);
        assert!((shared.volume() - 0.25).abs() < f32::EPSILON);
        shared.set_volume(7.0);
        assert!((shared.volume() - 1.0).abs() < f32::EPSILON);
        shared.set_speed(1.5);
        assert!((shared.speed() - 1.5).abs() < f64::EPSILON);
    }
}
