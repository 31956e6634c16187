//! Video render scheduler.
//!
//! One thread pops decoded frames and paces them against the master clock:
//! a dead band around the nominal frame duration absorbs jitter, frames
//! behind the band render immediately and count as late, frames ahead sleep
//! the residual in bounded slices, and desync beyond the configured limit
//! re-anchors instead of correcting. The renderer collaborator is owned by
//! this thread; surface re-targets arrive over a command channel and apply
//! between frames.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use player_types::{EventKind, SurfaceHandle, SyncMode};

use crate::clock::effective_sync_mode;
use crate::config::PlayerConfig;
use crate::frame::{NO_PTS, VideoFrame};
use crate::message::Notifier;
use crate::output::VideoRenderer;
use crate::queue::{FramePop, FrameQueue};
use crate::state::PlaybackShared;

const POP_TIMEOUT: Duration = Duration::from_millis(100);
/// Pause/buffering poll interval.
const HOLD_SLICE: Duration = Duration::from_millis(10);
/// Upper bound on one pacing sleep before re-checking the world.
const MAX_SLEEP_SLICE_MS: f64 = 100.0;
/// Dead-band bounds around the nominal frame duration.
const SYNC_BAND_MIN_MS: f64 = 40.0;
const SYNC_BAND_MAX_MS: f64 = 100.0;
/// Fallback nominal duration when the stream carries no usable pts deltas.
const DEFAULT_FRAME_MS: f64 = 40.0;

/// Pacing verdict for one frame against the master clock.
#[derive(Debug, PartialEq)]
enum Pace {
    /// On time (inside the dead band, or no master to compare against).
    Render,
    /// Behind by more than the band; render immediately and count it late.
    RenderLate,
    /// Ahead; sleep this many milliseconds before rendering.
    Wait(f64),
    /// Desync beyond the hard limit; render now and re-anchor.
    Resync,
}

/// Pure pacing decision. `diff_ms` is `frame pts − master clock` (positive
/// means the frame is early), `duration_ms` the nominal frame duration.
fn pace_frame(diff_ms: f64, duration_ms: f64, max_desync_ms: f64) -> Pace {
    if diff_ms.is_nan() {
        return Pace::Render;
    }
    if diff_ms.abs() > max_desync_ms {
        return Pace::Resync;
    }
    let band = duration_ms.clamp(SYNC_BAND_MIN_MS, SYNC_BAND_MAX_MS);
    if diff_ms < -band {
        Pace::RenderLate
    } else if diff_ms > band {
        Pace::Wait(diff_ms)
    } else if diff_ms > 0.0 {
        Pace::Wait(diff_ms)
    } else {
        Pace::Render
    }
}

enum VideoCommand {
    SetSurface(Option<SurfaceHandle>),
}

/// Everything the render thread needs.
pub struct VideoContext {
    pub shared: Arc<PlaybackShared>,
    pub config: Arc<PlayerConfig>,
    pub notifier: Notifier,
}

/// Owned handle to the video render thread.
pub struct VideoScheduler {
    commands: Sender<VideoCommand>,
    join: Option<JoinHandle<()>>,
}

impl VideoScheduler {
    pub fn spawn(
        renderer: Box<dyn VideoRenderer>,
        ctx: VideoContext,
        frames: Arc<FrameQueue<VideoFrame>>,
    ) -> Self {
        let (tx, rx) = unbounded();
        let join = thread::Builder::new()
            .name("video-render".into())
            .spawn(move || render_loop(renderer, ctx, frames, rx))
            .expect("spawn video render thread");
        VideoScheduler {
            commands: tx,
            join: Some(join),
        }
    }

    /// Re-target rendering to a new host surface between frames.
    pub fn set_surface(&self, surface: Option<SurfaceHandle>) {
        let _ = self.commands.send(VideoCommand::SetSurface(surface));
    }

    /// Join the thread. The caller must have aborted the frame queue first.
    pub fn stop(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn render_loop(
    mut renderer: Box<dyn VideoRenderer>,
    ctx: VideoContext,
    frames: Arc<FrameQueue<VideoFrame>>,
    commands: Receiver<VideoCommand>,
) {
    let shared = &ctx.shared;
    let mut last_pts = NO_PTS;
    let mut last_size = (0u32, 0u32);

    loop {
        drain_commands(&commands, renderer.as_mut());
        let mut frame = match frames.pop(POP_TIMEOUT) {
            FramePop::Aborted => break,
            FramePop::Wakeup => continue,
            FramePop::Timeout => {
                if shared.abort.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            FramePop::Frame(f) => f,
        };

        if frame.serial != shared.current_serial() {
            shared.stale_discards.fetch_add(1, Ordering::Relaxed);
            last_pts = NO_PTS;
            continue;
        }

        // Hold while paused or buffering; a seek invalidates the held frame.
        while (shared.is_paused() || shared.buffering.load(Ordering::Acquire))
            && !shared.abort.load(Ordering::Acquire)
            && frame.serial == shared.current_serial()
        {
            drain_commands(&commands, renderer.as_mut());
            thread::sleep(HOLD_SLICE);
        }
        if shared.abort.load(Ordering::Acquire) {
            break;
        }
        if frame.serial != shared.current_serial() {
            shared.stale_discards.fetch_add(1, Ordering::Relaxed);
            last_pts = NO_PTS;
            continue;
        }

        let duration_ms = nominal_duration_ms(&frame, last_pts, ctx.config.max_frame_duration_ms);

        if frame.pts_ms != NO_PTS {
            // Pace against the master unless video is the master itself.
            let mode = effective_sync_mode(
                shared.sync_mode(),
                shared.audio_clock.is_available(),
                shared.video_clock.is_available(),
            );
            if mode != SyncMode::Video {
                if !pace_against_master(&ctx, &frame, duration_ms) {
                    break;
                }
                if frame.serial != shared.current_serial() {
                    shared.stale_discards.fetch_add(1, Ordering::Relaxed);
                    last_pts = NO_PTS;
                    continue;
                }
            }
            shared.video_clock.set(frame.pts_ms as f64, frame.serial);
            last_pts = frame.pts_ms;
        }

        if (frame.width, frame.height) != last_size && frame.width > 0 {
            last_size = (frame.width, frame.height);
            ctx.notifier.with_args(
                EventKind::VideoSizeChanged,
                i64::from(frame.width),
                i64::from(frame.height),
            );
        }

        if let Err(e) = renderer.render(&frame) {
            tracing::warn!(pts_ms = frame.pts_ms, "render error: {e}");
        } else if shared.mark_first_video(frame.serial) {
            ctx.notifier.event(EventKind::FirstVideoFrame);
        }
        frame.release();
    }

    renderer.close();
}

fn drain_commands(commands: &Receiver<VideoCommand>, renderer: &mut dyn VideoRenderer) {
    while let Ok(command) = commands.try_recv() {
        match command {
            VideoCommand::SetSurface(surface) => {
                tracing::debug!(?surface, "video surface re-target");
                renderer.set_surface(surface);
            }
        }
    }
}

fn nominal_duration_ms(frame: &VideoFrame, last_pts: i64, max_frame_duration_ms: i64) -> f64 {
    let delta = if last_pts != NO_PTS && frame.pts_ms > last_pts {
        (frame.pts_ms - last_pts) as f64
    } else if frame.duration_ms != NO_PTS && frame.duration_ms > 0 {
        frame.duration_ms as f64
    } else {
        DEFAULT_FRAME_MS
    };
    delta.clamp(1.0, max_frame_duration_ms as f64)
}

/// Sleep until the frame is due, re-checking the world in bounded slices.
/// Returns `false` on abort.
fn pace_against_master(ctx: &VideoContext, frame: &VideoFrame, duration_ms: f64) -> bool {
    let shared = &ctx.shared;
    let max_desync = ctx.config.max_desync_ms as f64;
    loop {
        if shared.abort.load(Ordering::Acquire) {
            return false;
        }
        if frame.serial != shared.current_serial() {
            return true;
        }
        let diff = frame.pts_ms as f64 - shared.master_clock_ms();
        match pace_frame(diff, duration_ms, max_desync) {
            Pace::Render => return true,
            Pace::RenderLate => {
                shared.late_frames.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            Pace::Resync => {
                tracing::warn!(diff_ms = diff, "video desync beyond limit, re-anchoring");
                shared
                    .external_clock
                    .set(frame.pts_ms as f64, frame.serial);
                return true;
            }
            Pace::Wait(remaining_ms) => {
                let slice = remaining_ms.min(MAX_SLEEP_SLICE_MS).max(1.0);
                thread::sleep(Duration::from_millis(slice as u64));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EventQueue;
    use crate::output::NullVideoRenderer;
    use crate::queue::FramePush;
    use std::time::Instant;

    #[test]
    fn pace_inside_the_dead_band_renders() {
        assert_eq!(pace_frame(0.0, 40.0, 10_000.0), Pace::Render);
        assert_eq!(pace_frame(-39.0, 40.0, 10_000.0), Pace::Render);
        assert_eq!(pace_frame(f64::NAN, 40.0, 10_000.0), Pace::Render);
    }

    #[test]
    fn pace_band_follows_frame_duration_within_bounds() {
        // Short frames clamp the band up to 40 ms.
        assert_eq!(pace_frame(-39.0, 16.0, 10_000.0), Pace::Render);
        assert_eq!(pace_frame(-41.0, 16.0, 10_000.0), Pace::RenderLate);
        // Long frames clamp it down to 100 ms.
        assert_eq!(pace_frame(-99.0, 500.0, 10_000.0), Pace::Render);
        assert_eq!(pace_frame(-101.0, 500.0, 10_000.0), Pace::RenderLate);
    }

    #[test]
    fn pace_early_frames_wait_out_the_difference() {
        match pace_frame(250.0, 40.0, 10_000.0) {
            Pace::Wait(ms) => assert!((ms - 250.0).abs() < f64::EPSILON),
            other => panic!("unexpected {other:?}"),
        }
        match pace_frame(20.0, 40.0, 10_000.0) {
            Pace::Wait(ms) => assert!((ms - 20.0).abs() < f64::EPSILON),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pace_beyond_max_desync_resyncs() {
        assert_eq!(pace_frame(11_000.0, 40.0, 10_000.0), Pace::Resync);
        assert_eq!(pace_frame(-11_000.0, 40.0, 10_000.0), Pace::Resync);
    }

    fn rig() -> (VideoContext, Arc<FrameQueue<VideoFrame>>, Arc<EventQueue>) {
        let shared = Arc::new(PlaybackShared::new(SyncMode::Audio));
        shared.has_video.store(true, Ordering::Release);
        let events = EventQueue::new();
        (
            VideoContext {
                shared,
                config: Arc::new(PlayerConfig::default()),
                notifier: Notifier::new(events.clone()),
            },
            Arc::new(FrameQueue::new(4)),
            events,
        )
    }

    fn push_frame(frames: &FrameQueue<VideoFrame>, pts_ms: i64, serial: u64) {
        let mut frame = VideoFrame::software(pts_ms, 320, 240, vec![0; 64]);
        frame.serial = serial;
        assert!(matches!(
            frames.push(frame, Duration::from_secs(1)),
            FramePush::Pushed
        ));
    }

    fn drain_kinds(events: &EventQueue) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Some(ev) = events.poll(Duration::from_millis(10)) {
            kinds.push(ev.kind);
        }
        kinds
    }

    #[test]
    fn renders_frames_and_announces_size_and_first_frame() {
        let (ctx, frames, events) = rig();
        let shared = ctx.shared.clone();
        // Master clock running so frames at small pts are due immediately.
        shared.audio_clock.set(0.0, 1);

        let renderer = NullVideoRenderer::new();
        let rendered = renderer.rendered_frames();
        let scheduler = VideoScheduler::spawn(Box::new(renderer), ctx, frames.clone());

        push_frame(&frames, 0, 1);
        push_frame(&frames, 40, 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        while rendered.load(Ordering::Relaxed) < 2 {
            assert!(Instant::now() < deadline, "frames not rendered");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(shared.video_clock.is_available());

        let kinds = drain_kinds(&events);
        assert!(kinds.contains(&EventKind::FirstVideoFrame));
        assert!(kinds.contains(&EventKind::VideoSizeChanged));
        // Size is announced once while it stays constant.
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::VideoSizeChanged).count(),
            1
        );

        shared.abort.store(true, Ordering::Release);
        frames.abort();
        scheduler.stop();
    }

    #[test]
    fn stale_frames_are_skipped_without_rendering() {
        let (ctx, frames, _events) = rig();
        let shared = ctx.shared.clone();
        shared.audio_clock.set(0.0, 2);
        shared.next_serial();

        let renderer = NullVideoRenderer::new();
        let rendered = renderer.rendered_frames();
        let scheduler = VideoScheduler::spawn(Box::new(renderer), ctx, frames.clone());

        push_frame(&frames, 0, 1);
        push_frame(&frames, 0, 2);

        let deadline = Instant::now() + Duration::from_secs(2);
        while rendered.load(Ordering::Relaxed) < 1 {
            assert!(Instant::now() < deadline, "frame not rendered");
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rendered.load(Ordering::Relaxed), 1);
        assert_eq!(shared.stale_discards.load(Ordering::Relaxed), 1);

        shared.abort.store(true, Ordering::Release);
        frames.abort();
        scheduler.stop();
    }

    #[test]
    fn late_frames_render_immediately_and_are_counted() {
        let (ctx, frames, _events) = rig();
        let shared = ctx.shared.clone();
        // Master far ahead of the frames.
        shared.audio_clock.set(5_000.0, 1);

        let renderer = NullVideoRenderer::new();
        let rendered = renderer.rendered_frames();
        let scheduler = VideoScheduler::spawn(Box::new(renderer), ctx, frames.clone());

        push_frame(&frames, 0, 1);
        push_frame(&frames, 40, 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        while rendered.load(Ordering::Relaxed) < 2 {
            assert!(Instant::now() < deadline, "late frames not rendered");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(shared.late_frames.load(Ordering::Relaxed) >= 2);

        shared.abort.store(true, Ordering::Release);
        frames.abort();
        scheduler.stop();
    }

    #[test]
    fn early_frames_wait_for_the_master() {
        let (ctx, frames, _events) = rig();
        let shared = ctx.shared.clone();
        shared.audio_clock.set(0.0, 1);

        let renderer = NullVideoRenderer::new();
        let rendered = renderer.rendered_frames();
        let scheduler = VideoScheduler::spawn(Box::new(renderer), ctx, frames.clone());

        // 400 ms early: must not render right away.
        push_frame(&frames, 400, 1);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(rendered.load(Ordering::Relaxed), 0);

        let deadline = Instant::now() + Duration::from_secs(2);
        while rendered.load(Ordering::Relaxed) < 1 {
            assert!(Instant::now() < deadline, "early frame never rendered");
            thread::sleep(Duration::from_millis(20));
        }

        shared.abort.store(true, Ordering::Release);
        frames.abort();
        scheduler.stop();
    }

    #[test]
    fn pause_holds_rendering_until_resume() {
        let (ctx, frames, _events) = rig();
        let shared = ctx.shared.clone();
        shared.audio_clock.set(0.0, 1);
        shared.set_paused(true);

        let renderer = NullVideoRenderer::new();
        let rendered = renderer.rendered_frames();
        let scheduler = VideoScheduler::spawn(Box::new(renderer), ctx, frames.clone());

        push_frame(&frames, 0, 1);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(rendered.load(Ordering::Relaxed), 0);

        shared.set_paused(false);
        let deadline = Instant::now() + Duration::from_secs(2);
        while rendered.load(Ordering::Relaxed) < 1 {
            assert!(Instant::now() < deadline, "frame not rendered after resume");
            thread::sleep(Duration::from_millis(10));
        }

        shared.abort.store(true, Ordering::Release);
        frames.abort();
        scheduler.stop();
    }
}
