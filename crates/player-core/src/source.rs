//! Source controller: the read thread.
//!
//! Owns the demuxer collaborator. Opens the source with bounded retries,
//! pumps packets into the per-stream queues under a dual byte/count
//! backpressure gate, drives the buffering watermark policy, runs the
//! seek/flush protocol, and detects completion (including loop restarts)
//! once every stream has drained its EOF.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use player_types::{EventDetail, EventKind, MediaInfo, PlayerError, TrackKind};

use crate::buffering::WatermarkTracker;
use crate::config::{OPEN_RETRY_DELAY, PlayerConfig, READ_RETRY_DELAY};
use crate::demux::{DemuxRead, Demuxer, DemuxerFactory, OpenOptions};
use crate::message::Notifier;
use crate::queue::PacketQueue;
use crate::state::PlaybackShared;

/// Wait slice while the buffer gate holds the read thread.
const GATE_WAIT: Duration = Duration::from_millis(10);
/// Wait slice while idling at EOF or after a fatal read error.
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// Cadence of cache/network telemetry events.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// A host seek handed to the read thread.
#[derive(Clone, Copy, Debug)]
pub struct SeekRequest {
    pub target_ms: i64,
    pub accurate: bool,
}

struct ControlState {
    seek: Option<SeekRequest>,
    aborted: bool,
}

/// Control side of the read thread: seek requests and abort, with a condvar
/// the loop parks on whenever it has nothing to read.
pub struct SourceControl {
    inner: Mutex<ControlState>,
    cv: Condvar,
}

impl SourceControl {
    pub fn new() -> Arc<Self> {
        Arc::new(SourceControl {
            inner: Mutex::new(ControlState {
                seek: None,
                aborted: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// Stage a seek; a later request replaces an unserviced one.
    pub fn request_seek(&self, request: SeekRequest) {
        let mut g = self.inner.lock().unwrap();
        g.seek = Some(request);
        self.cv.notify_all();
    }

    pub fn has_pending_seek(&self) -> bool {
        self.inner.lock().unwrap().seek.is_some()
    }

    fn take_seek(&self) -> Option<SeekRequest> {
        self.inner.lock().unwrap().seek.take()
    }

    pub fn abort(&self) {
        let mut g = self.inner.lock().unwrap();
        g.aborted = true;
        self.cv.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().unwrap().aborted
    }

    /// Park until `timeout`, a new seek, or abort.
    fn wait(&self, timeout: Duration) {
        let g = self.inner.lock().unwrap();
        if g.aborted || g.seek.is_some() {
            return;
        }
        let _ = self.cv.wait_timeout(g, timeout).unwrap();
    }
}

/// Open a source with bounded retries and a fixed delay between attempts.
/// HTTP failures keep their classification; only interruption short-circuits.
pub fn open_with_retries(
    factory: &dyn DemuxerFactory,
    url: &str,
    opts: &OpenOptions,
    interrupt: &Arc<std::sync::atomic::AtomicBool>,
    attempts: u32,
) -> Result<(Box<dyn Demuxer>, MediaInfo), PlayerError> {
    let attempts = attempts.max(1);
    let mut last_err = PlayerError::OpenFailed("no attempt made".into());
    for attempt in 1..=attempts {
        match factory.open(url, opts, interrupt) {
            Ok(opened) => return Ok(opened),
            Err(PlayerError::Interrupted) => return Err(PlayerError::Interrupted),
            Err(e) => {
                tracing::warn!(attempt, attempts, url, "source open failed: {e}");
                last_err = e;
                if attempt < attempts {
                    thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }
    Err(last_err)
}

/// Everything the read thread needs besides the demuxer itself.
pub struct SourceContext {
    pub shared: Arc<PlaybackShared>,
    pub config: Arc<PlayerConfig>,
    pub notifier: Notifier,
    pub audio_packets: Option<Arc<PacketQueue>>,
    pub video_packets: Option<Arc<PacketQueue>>,
}

impl SourceContext {
    fn present_queues(&self) -> impl Iterator<Item = &Arc<PacketQueue>> {
        self.audio_packets.iter().chain(self.video_packets.iter())
    }
}

/// Owned handle to the read thread.
pub struct SourceController {
    control: Arc<SourceControl>,
    join: Option<JoinHandle<()>>,
}

impl SourceController {
    /// Start the read thread over an already opened demuxer.
    pub fn spawn(
        demuxer: Box<dyn Demuxer>,
        ctx: SourceContext,
        control: Arc<SourceControl>,
    ) -> Self {
        let thread_control = control.clone();
        let join = thread::Builder::new()
            .name("source-read".into())
            .spawn(move || {
                ReadLoop::new(demuxer, ctx, thread_control).run();
            })
            .expect("spawn source read thread");
        SourceController {
            control,
            join: Some(join),
        }
    }

    pub fn control(&self) -> Arc<SourceControl> {
        self.control.clone()
    }

    /// Abort and join. The caller sets the demuxer interrupt flag first so a
    /// blocked read returns promptly.
    pub fn stop(mut self) {
        self.control.abort();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct ReadLoop {
    demuxer: Box<dyn Demuxer>,
    ctx: SourceContext,
    control: Arc<SourceControl>,
    watermark: WatermarkTracker,
    eof: bool,
    completed: bool,
    read_errors: u32,
    /// Loop restarts left; `None` loops forever.
    loops_left: Option<u32>,
    last_stats: Instant,
    url_announced: bool,
}

impl ReadLoop {
    fn new(demuxer: Box<dyn Demuxer>, ctx: SourceContext, control: Arc<SourceControl>) -> Self {
        let watermark = WatermarkTracker::new(&ctx.config);
        let loops_left = match ctx.config.loop_count {
            0 => None,
            n => Some(n - 1),
        };
        ReadLoop {
            demuxer,
            ctx,
            control,
            watermark,
            eof: false,
            completed: false,
            read_errors: 0,
            loops_left,
            last_stats: Instant::now(),
            url_announced: false,
        }
    }

    fn run(mut self) {
        // Initial fill counts as the first buffering trigger.
        self.begin_buffering();
        loop {
            if self.control.is_aborted() || self.ctx.shared.abort.load(Ordering::Acquire) {
                break;
            }
            if let Some(request) = self.control.take_seek() {
                self.perform_seek(request, true);
                continue;
            }
            if self.eof {
                self.eof_tick();
                continue;
            }
            if self.buffer_gate_full() {
                self.control.wait(GATE_WAIT);
                self.publish_buffer_stats();
                continue;
            }

            match self.demuxer.read_packet() {
                Ok(DemuxRead::Packet(packet)) => {
                    self.read_errors = 0;
                    self.enqueue(packet);
                    self.publish_buffer_stats();
                    self.buffering_tick();
                    self.url_tick();
                    self.stats_tick();
                }
                Ok(DemuxRead::Eof) => {
                    tracing::debug!("source reached eof");
                    for queue in self.ctx.present_queues() {
                        queue.push_eof();
                    }
                    self.eof = true;
                    self.end_buffering();
                }
                Err(PlayerError::Interrupted) => {}
                Err(e) => self.on_read_error(e),
            }
        }
        self.demuxer.close();
    }

    fn enqueue(&mut self, packet: crate::frame::Packet) {
        // During an accurate seek, non-reference video frames before the
        // target cannot affect convergence; skip the decode work entirely.
        if packet.track == TrackKind::Video && !packet.reference {
            if let Some(target_ms) = self.ctx.shared.seek.pending_target() {
                if packet.pts_ms != crate::frame::NO_PTS && packet.pts_ms < target_ms {
                    self.ctx.shared.seek_drops.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        let queue = match packet.track {
            TrackKind::Audio => self.ctx.audio_packets.as_ref(),
            TrackKind::Video => self.ctx.video_packets.as_ref(),
        };
        if let Some(queue) = queue {
            queue.push(packet);
        }
    }

    /// `true` while backpressure should stall the reader: either the byte cap
    /// with every present stream above its floor, or every present stream at
    /// the packet-count ceiling. A pending seek always opens the gate.
    fn buffer_gate_full(&self) -> bool {
        if self.control.has_pending_seek() {
            return false;
        }
        let config = &self.ctx.config;
        let mut total_bytes = 0u64;
        let mut all_above_floor = true;
        let mut all_at_ceiling = true;
        let mut any_present = false;
        for queue in self.ctx.present_queues() {
            any_present = true;
            total_bytes += queue.bytes();
            if queue.duration_ms() < config.buffer_floor_ms {
                all_above_floor = false;
            }
            if queue.len() < config.min_packet_count {
                all_at_ceiling = false;
            }
        }
        if !any_present {
            return false;
        }
        (total_bytes > config.max_buffer_bytes && all_above_floor) || all_at_ceiling
    }

    /// Buffered duration of the scarcest present stream.
    fn min_buffered_ms(&self) -> i64 {
        self.ctx
            .present_queues()
            .map(|q| q.duration_ms())
            .min()
            .unwrap_or(0)
    }

    fn publish_buffer_stats(&self) {
        let shared = &self.ctx.shared;
        if let Some(q) = &self.ctx.audio_packets {
            shared.audio_buffered_ms.store(q.duration_ms(), Ordering::Relaxed);
        }
        if let Some(q) = &self.ctx.video_packets {
            shared.video_buffered_ms.store(q.duration_ms(), Ordering::Relaxed);
        }
        let bytes = self.ctx.present_queues().map(|q| q.bytes()).sum();
        shared.buffered_bytes.store(bytes, Ordering::Relaxed);
    }

    fn begin_buffering(&mut self) {
        if self.watermark.begin() {
            self.ctx.shared.buffering.store(true, Ordering::Release);
            self.ctx.notifier.event(EventKind::BufferingStart);
        }
    }

    fn end_buffering(&mut self) {
        if self.watermark.end() {
            self.ctx.shared.buffering.store(false, Ordering::Release);
            self.ctx.shared.buffer_percent.store(100, Ordering::Relaxed);
            self.ctx.notifier.event(EventKind::BufferingEnd);
        }
    }

    fn buffering_tick(&mut self) {
        let buffered_ms = self.min_buffered_ms();
        if self.watermark.is_buffering() {
            if let Some(percent) = self.watermark.progress(buffered_ms) {
                self.ctx.shared.buffer_percent.store(percent, Ordering::Relaxed);
                self.ctx
                    .notifier
                    .with_args(EventKind::BufferingUpdate, i64::from(percent), 0);
            }
            if self.watermark.is_satisfied(buffered_ms) {
                self.end_buffering();
            }
        } else if !self.eof
            && buffered_ms == 0
            && self.ctx.present_queues().all(|q| q.is_empty())
        {
            // The decoders outran the source; hold the renderers.
            self.begin_buffering();
        }
    }

    /// One-shot: surface the transport's post-redirect URL to the host.
    fn url_tick(&mut self) {
        if self.url_announced {
            return;
        }
        if let Some(url) = self.demuxer.effective_url() {
            tracing::info!(url = url.as_str(), "source redirected");
            self.ctx
                .notifier
                .with_detail(EventKind::UrlChanged, 0, 0, EventDetail::Text(url));
            self.url_announced = true;
        }
    }

    fn stats_tick(&mut self) {
        if self.last_stats.elapsed() < STATS_INTERVAL {
            return;
        }
        self.last_stats = Instant::now();
        let stats = self.demuxer.stats();
        self.ctx.shared.set_source_stats(stats.clone());
        self.ctx
            .notifier
            .with_detail(EventKind::CacheStats, 0, 0, EventDetail::Cache(stats));
    }

    fn perform_seek(&mut self, request: SeekRequest, announce: bool) {
        let shared = &self.ctx.shared;
        if let Err(e) = self.demuxer.seek(request.target_ms) {
            tracing::warn!(target_ms = request.target_ms, "demuxer seek failed: {e}");
            self.ctx.notifier.error(&PlayerError::SeekFailed(e.to_string()));
            shared.seek_pending.store(false, Ordering::Release);
            return;
        }

        let serial = shared.next_serial();
        for queue in self.ctx.present_queues() {
            queue.flush();
            queue.push_flush(serial);
        }
        shared.audio_clock.invalidate();
        shared.video_clock.invalidate();
        shared.external_clock.set(request.target_ms as f64, serial);

        if request.accurate && self.ctx.config.accurate_seek {
            shared.seek.arm(
                request.target_ms,
                self.ctx.config.accurate_seek_timeout,
                self.ctx.audio_packets.is_some(),
                self.ctx.video_packets.is_some(),
                serial,
            );
        } else {
            shared.seek.cancel();
        }

        self.eof = false;
        self.completed = false;
        self.read_errors = 0;
        if self.watermark.on_seek() {
            shared.buffering.store(true, Ordering::Release);
            self.ctx.notifier.event(EventKind::BufferingStart);
        }
        shared.seek_pending.store(false, Ordering::Release);
        if announce {
            self.ctx
                .notifier
                .with_args(EventKind::SeekComplete, request.target_ms, 0);
        }
        tracing::info!(target_ms = request.target_ms, serial, accurate = request.accurate, "seek performed");
    }

    /// At EOF: watch for completion (or loop restart), then idle until a
    /// seek or abort arrives.
    fn eof_tick(&mut self) {
        let shared = &self.ctx.shared;
        let serial = shared.current_serial();
        let drained = self.ctx.present_queues().all(|q| q.is_empty());
        if !self.completed && drained && shared.all_streams_finished(serial) {
            match self.loops_left {
                Some(0) => {
                    self.completed = true;
                    self.ctx.notifier.event(EventKind::Completed);
                    tracing::info!("playback completed");
                }
                remaining => {
                    self.loops_left = remaining.map(|n| n - 1);
                    tracing::info!(loops_left = ?self.loops_left, "loop restart");
                    self.perform_seek(
                        SeekRequest {
                            target_ms: 0,
                            accurate: false,
                        },
                        false,
                    );
                    return;
                }
            }
        }
        self.publish_buffer_stats();
        self.control.wait(IDLE_WAIT);
    }

    fn on_read_error(&mut self, err: PlayerError) {
        self.read_errors += 1;
        tracing::warn!(errors = self.read_errors, "source read error: {err}");
        if self.read_errors <= self.ctx.config.read_retry_count {
            thread::sleep(READ_RETRY_DELAY);
            return;
        }

        let cause = i64::from(self.demuxer.io_error().unwrap_or(0));
        let surfaced = PlayerError::ReadFrame(err.to_string());
        self.ctx.notifier.with_detail(
            EventKind::Error,
            i64::from(surfaced.code()),
            cause,
            EventDetail::Text(surfaced.to_string()),
        );

        // Idle rather than busy-loop; a seek revives the source.
        loop {
            if self.control.is_aborted() || self.ctx.shared.abort.load(Ordering::Acquire) {
                return;
            }
            if self.control.has_pending_seek() {
                self.read_errors = 0;
                return;
            }
            self.control.wait(IDLE_WAIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Packet;
    use crate::message::EventQueue;
    use crate::queue::{PacketEntry, PacketPop};
    use player_types::SyncMode;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Demuxer producing 20 ms audio packets from a fixed timeline, with
    /// scriptable failures.
    struct ScriptedDemuxer {
        pts_ms: i64,
        end_ms: i64,
        reads: Arc<AtomicUsize>,
        seeks: Arc<Mutex<Vec<i64>>>,
        fail_reads: usize,
        effective_url: Option<String>,
    }

    impl ScriptedDemuxer {
        fn new(end_ms: i64) -> Self {
            ScriptedDemuxer {
                pts_ms: 0,
                end_ms,
                reads: Arc::new(AtomicUsize::new(0)),
                seeks: Arc::new(Mutex::new(Vec::new())),
                fail_reads: 0,
                effective_url: None,
            }
        }
    }

    impl Demuxer for ScriptedDemuxer {
        fn read_packet(&mut self) -> Result<DemuxRead, PlayerError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads > 0 {
                self.fail_reads -= 1;
                return Err(PlayerError::Io(std::io::Error::other("scripted")));
            }
            if self.pts_ms >= self.end_ms {
                return Ok(DemuxRead::Eof);
            }
            let mut packet = Packet::new(TrackKind::Audio, vec![0u8; 64], self.pts_ms);
            packet.duration_ms = 20;
            self.pts_ms += 20;
            Ok(DemuxRead::Packet(packet))
        }

        fn seek(&mut self, target_ms: i64) -> Result<(), PlayerError> {
            self.seeks.lock().unwrap().push(target_ms);
            self.pts_ms = target_ms;
            Ok(())
        }

        fn io_error(&self) -> Option<i32> {
            Some(-5)
        }

        fn effective_url(&self) -> Option<String> {
            self.effective_url.clone()
        }
    }

    struct Rig {
        shared: Arc<PlaybackShared>,
        events: Arc<EventQueue>,
        queue: Arc<PacketQueue>,
        control: Arc<SourceControl>,
        controller: SourceController,
    }

    fn rig_with(demuxer: ScriptedDemuxer, config: PlayerConfig) -> Rig {
        let shared = Arc::new(PlaybackShared::new(SyncMode::Audio));
        shared.has_audio.store(true, Ordering::Release);
        let events = EventQueue::new();
        let queue = Arc::new(PacketQueue::new(shared.current_serial()));
        let control = SourceControl::new();
        let ctx = SourceContext {
            shared: shared.clone(),
            config: Arc::new(config),
            notifier: Notifier::new(events.clone()),
            audio_packets: Some(queue.clone()),
            video_packets: None,
        };
        let controller = SourceController::spawn(Box::new(demuxer), ctx, control.clone());
        Rig {
            shared,
            events,
            queue,
            control,
            controller,
        }
    }

    fn wait_event(events: &EventQueue, kind: EventKind) -> player_types::PlayerEvent {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(ev) = events.poll(Duration::from_millis(100)) {
                if ev.kind == kind {
                    return ev;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for {kind:?}");
        }
    }

    #[test]
    fn seek_flushes_and_bumps_generation() {
        let demuxer = ScriptedDemuxer::new(60_000);
        let seeks = demuxer.seeks.clone();
        let rig = rig_with(demuxer, PlayerConfig::default());

        wait_event(&rig.events, EventKind::BufferingStart);
        rig.control.request_seek(SeekRequest {
            target_ms: 30_000,
            accurate: false,
        });
        let ev = wait_event(&rig.events, EventKind::SeekComplete);
        assert_eq!(ev.arg1, 30_000);
        assert_eq!(seeks.lock().unwrap().as_slice(), &[30_000]);
        assert_eq!(rig.shared.current_serial(), 2);

        // Everything before the in-band flush marker was discarded; the
        // marker itself carries the new generation.
        let mut saw_flush = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while !saw_flush && Instant::now() < deadline {
            match rig.queue.pop(Duration::from_millis(50)) {
                PacketPop::Entry(PacketEntry::Flush { serial }) => {
                    assert_eq!(serial, 2);
                    saw_flush = true;
                }
                PacketPop::Entry(PacketEntry::Data(p)) => {
                    assert_eq!(p.serial, 2, "pre-flush data must not survive");
                }
                _ => {}
            }
        }
        assert!(saw_flush);

        rig.shared.abort.store(true, Ordering::Release);
        rig.controller.stop();
    }

    #[test]
    fn exhausted_read_retries_surface_one_error_and_idle() {
        let mut demuxer = ScriptedDemuxer::new(60_000);
        demuxer.fail_reads = 10;
        let reads = demuxer.reads.clone();
        let mut config = PlayerConfig::default();
        config.read_retry_count = 3;
        let rig = rig_with(demuxer, config);

        let ev = wait_event(&rig.events, EventKind::Error);
        assert_eq!(ev.arg1, -10007);
        assert_eq!(ev.arg2, -5);

        // Idling, not busy-spinning: the read counter stops moving.
        let after_error = reads.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(reads.load(Ordering::SeqCst), after_error);

        // A seek revives the source.
        rig.control.request_seek(SeekRequest {
            target_ms: 0,
            accurate: false,
        });
        wait_event(&rig.events, EventKind::SeekComplete);

        rig.shared.abort.store(true, Ordering::Release);
        rig.controller.stop();
    }

    #[test]
    fn completion_fires_once_after_streams_drain() {
        let demuxer = ScriptedDemuxer::new(100);
        let rig = rig_with(demuxer, PlayerConfig::default());

        // Drain the packet queue like a decode thread would, then declare
        // the stream finished.
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut eof_serial = None;
        while eof_serial.is_none() && Instant::now() < deadline {
            match rig.queue.pop(Duration::from_millis(50)) {
                PacketPop::Entry(PacketEntry::Eof { serial }) => eof_serial = Some(serial),
                _ => {}
            }
        }
        let serial = eof_serial.expect("eof marker");
        rig.shared.stream_finished(TrackKind::Audio, serial);

        wait_event(&rig.events, EventKind::Completed);

        rig.shared.abort.store(true, Ordering::Release);
        rig.controller.stop();
    }

    #[test]
    fn loop_count_restarts_before_completion() {
        let demuxer = ScriptedDemuxer::new(100);
        let seeks = demuxer.seeks.clone();
        let mut config = PlayerConfig::default();
        config.loop_count = 2;
        let rig = rig_with(demuxer, config);

        // First pass drains and restarts at zero instead of completing.
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            match rig.queue.pop(Duration::from_millis(50)) {
                PacketPop::Entry(PacketEntry::Eof { serial }) => {
                    rig.shared.stream_finished(TrackKind::Audio, serial);
                }
                PacketPop::Entry(PacketEntry::Flush { .. }) => break,
                _ => {}
            }
            assert!(Instant::now() < deadline, "no loop restart");
        }
        assert_eq!(seeks.lock().unwrap().as_slice(), &[0]);

        rig.shared.abort.store(true, Ordering::Release);
        rig.controller.stop();
    }

    #[test]
    fn byte_cap_stalls_the_reader() {
        let demuxer = ScriptedDemuxer::new(600_000);
        let reads = demuxer.reads.clone();
        let mut config = PlayerConfig::default();
        config.max_buffer_bytes = 1024; // 16 packets of 64 bytes
        config.buffer_floor_ms = 20;
        let rig = rig_with(demuxer, config);

        thread::sleep(Duration::from_millis(400));
        let stalled = reads.load(Ordering::SeqCst);
        assert!(stalled < 60, "reader not gated: {stalled} reads");

        // Draining reopens the gate.
        for _ in 0..10 {
            let _ = rig.queue.pop(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(200));
        assert!(reads.load(Ordering::SeqCst) > stalled);

        rig.shared.abort.store(true, Ordering::Release);
        rig.controller.stop();
    }

    #[test]
    fn redirected_source_announces_its_url_once() {
        let mut demuxer = ScriptedDemuxer::new(60_000);
        demuxer.effective_url = Some("http://cdn.example/clip.flac".into());
        let rig = rig_with(demuxer, PlayerConfig::default());

        let ev = wait_event(&rig.events, EventKind::UrlChanged);
        assert_eq!(
            ev.detail,
            Some(EventDetail::Text("http://cdn.example/clip.flac".into()))
        );

        // Later reads must not repeat the announcement.
        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            if let Some(ev) = rig.events.poll(Duration::from_millis(50)) {
                assert_ne!(ev.kind, EventKind::UrlChanged, "announced twice");
            }
        }

        rig.shared.abort.store(true, Ordering::Release);
        rig.controller.stop();
    }

    #[test]
    fn open_retries_reports_last_failure() {
        struct FailingFactory {
            calls: AtomicUsize,
        }
        impl DemuxerFactory for FailingFactory {
            fn open(
                &self,
                _url: &str,
                _opts: &OpenOptions,
                _interrupt: &Arc<AtomicBool>,
            ) -> Result<(Box<dyn Demuxer>, MediaInfo), PlayerError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(PlayerError::OpenFailedHttp(503))
            }
        }

        let factory = FailingFactory {
            calls: AtomicUsize::new(0),
        };
        let interrupt = Arc::new(AtomicBool::new(false));
        let err = open_with_retries(&factory, "http://x/y", &OpenOptions::default(), &interrupt, 3)
            .unwrap_err();
        assert_eq!(err.code(), -10003);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    }
}
