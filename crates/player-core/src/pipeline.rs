//! Pipeline orchestrator.
//!
//! Builds the stage graph for one prepared source in a fixed order: shared
//! state, queues, source open (with retries), decode processors for the
//! present tracks, render schedulers, then the read loop. Teardown runs in
//! reverse and is idempotent: raise the abort and interrupt flags, abort
//! every queue, join the stage threads, close the collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use player_types::{MediaInfo, PlayerError, SurfaceHandle, TrackKind};

use crate::audio::{AudioScheduler, FillHandle};
use crate::config::PlayerConfig;
use crate::decode::{self, DecodeContext, DecodeProcessor, DecoderFactory};
use crate::demux::{DemuxerFactory, OpenOptions};
use crate::frame::{AudioFrame, VideoFrame};
use crate::message::{EventQueue, Notifier};
use crate::output::{AudioSpec, RendererFactory};
use crate::queue::{FrameQueue, PacketQueue};
use crate::source::{self, SeekRequest, SourceContext, SourceControl, SourceController};
use crate::state::PlaybackShared;
use crate::video::{VideoContext, VideoScheduler};

/// The replaceable boundaries of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub demuxer_factory: Arc<dyn DemuxerFactory>,
    pub decoder_factory: Arc<dyn DecoderFactory>,
    pub renderer_factory: Arc<dyn RendererFactory>,
}

/// One prepared playback session.
pub struct Pipeline {
    shared: Arc<PlaybackShared>,
    config: Arc<PlayerConfig>,
    media: MediaInfo,
    interrupt: Arc<AtomicBool>,
    source_control: Arc<SourceControl>,

    audio_packets: Option<Arc<PacketQueue>>,
    video_packets: Option<Arc<PacketQueue>>,
    audio_frames: Option<Arc<FrameQueue<AudioFrame>>>,
    video_frames: Option<Arc<FrameQueue<VideoFrame>>>,

    source: Option<SourceController>,
    audio_decode: Option<DecodeProcessor>,
    video_decode: Option<DecodeProcessor>,
    audio_scheduler: Option<AudioScheduler>,
    video_scheduler: Option<VideoScheduler>,
    torn_down: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("media", &self.media)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Open the source and spin up every stage. The pipeline comes up paused;
    /// the facade releases it on `start`.
    pub fn build(
        url: &str,
        config: Arc<PlayerConfig>,
        collaborators: &Collaborators,
        events: Arc<EventQueue>,
        surface: Option<SurfaceHandle>,
    ) -> Result<Pipeline, PlayerError> {
        let notifier = Notifier::new(events);
        let interrupt = Arc::new(AtomicBool::new(false));

        let (demuxer, media) = source::open_with_retries(
            collaborators.demuxer_factory.as_ref(),
            url,
            &OpenOptions::default(),
            &interrupt,
            config.open_retry_count.max(1),
        )?;

        let audio_track = media.track(TrackKind::Audio).cloned();
        let video_track = media.track(TrackKind::Video).cloned();
        if audio_track.is_none() && video_track.is_none() {
            return Err(PlayerError::StreamInfoNotFound);
        }

        let shared = Arc::new(PlaybackShared::new(config.sync_mode));
        shared
            .has_audio
            .store(audio_track.is_some(), Ordering::Release);
        shared
            .has_video
            .store(video_track.is_some(), Ordering::Release);
        shared.set_paused(true);

        let serial = shared.current_serial();
        let audio_packets = audio_track
            .as_ref()
            .map(|_| Arc::new(PacketQueue::new(serial)));
        let video_packets = video_track
            .as_ref()
            .map(|_| Arc::new(PacketQueue::new(serial)));
        let audio_frames = audio_track
            .as_ref()
            .map(|_| Arc::new(FrameQueue::new(config.audio_queue_frames)));
        let video_frames = video_track
            .as_ref()
            .map(|_| Arc::new(FrameQueue::new(config.video_queue_frames)));

        let audio_decode = match (&audio_track, &audio_packets, &audio_frames) {
            (Some(track), Some(packets), Some(frames)) => Some(decode::spawn_audio(
                DecodeContext {
                    shared: shared.clone(),
                    config: config.clone(),
                    notifier: notifier.clone(),
                    factory: collaborators.decoder_factory.clone(),
                    track: track.clone(),
                },
                packets.clone(),
                frames.clone(),
            )),
            _ => None,
        };
        let video_decode = match (&video_track, &video_packets, &video_frames) {
            (Some(track), Some(packets), Some(frames)) => Some(decode::spawn_video(
                DecodeContext {
                    shared: shared.clone(),
                    config: config.clone(),
                    notifier: notifier.clone(),
                    factory: collaborators.decoder_factory.clone(),
                    track: track.clone(),
                },
                packets.clone(),
                frames.clone(),
            )),
            _ => None,
        };

        let audio_scheduler = match (&audio_track, &audio_frames) {
            (Some(track), Some(frames)) => {
                let preferred = AudioSpec {
                    sample_rate: track.sample_rate.unwrap_or(48_000),
                    channels: track.channels.unwrap_or(2),
                };
                let handle = FillHandle::new(shared.clone(), frames.clone(), notifier.clone());
                Some(AudioScheduler::start(
                    collaborators.renderer_factory.create_audio_sink(),
                    preferred,
                    handle,
                )?)
            }
            _ => None,
        };
        let video_scheduler = video_frames.as_ref().map(|frames| {
            let scheduler = VideoScheduler::spawn(
                collaborators.renderer_factory.create_video_renderer(),
                VideoContext {
                    shared: shared.clone(),
                    config: config.clone(),
                    notifier: notifier.clone(),
                },
                frames.clone(),
            );
            scheduler.set_surface(surface);
            scheduler
        });

        let source_control = SourceControl::new();
        let source = SourceController::spawn(
            demuxer,
            SourceContext {
                shared: shared.clone(),
                config: config.clone(),
                notifier,
                audio_packets: audio_packets.clone(),
                video_packets: video_packets.clone(),
            },
            source_control.clone(),
        );

        tracing::info!(
            url,
            audio = audio_track.is_some(),
            video = video_track.is_some(),
            duration_ms = ?media.duration_ms,
            "pipeline built"
        );

        Ok(Pipeline {
            shared,
            config,
            media,
            interrupt,
            source_control,
            audio_packets,
            video_packets,
            audio_frames,
            video_frames,
            source: Some(source),
            audio_decode,
            video_decode,
            audio_scheduler,
            video_scheduler,
            torn_down: false,
        })
    }

    pub fn shared(&self) -> &Arc<PlaybackShared> {
        &self.shared
    }

    pub fn media(&self) -> &MediaInfo {
        &self.media
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Pause or resume the renderers (clocks freeze with them).
    pub fn set_paused(&mut self, paused: bool) {
        self.shared.set_paused(paused);
        if let Some(scheduler) = self.audio_scheduler.as_mut() {
            scheduler.pause(paused);
        }
    }

    /// Stage a seek; the source thread runs the flush protocol.
    pub fn seek(&self, target_ms: i64, accurate: bool) {
        self.shared.seek_pending.store(true, Ordering::Release);
        self.shared.seek_target_ms.store(target_ms, Ordering::Release);
        self.source_control
            .request_seek(SeekRequest { target_ms, accurate });
    }

    pub fn set_speed(&self, speed: f64) {
        self.shared.set_speed(speed);
    }

    pub fn set_surface(&self, surface: Option<SurfaceHandle>) {
        if let Some(scheduler) = &self.video_scheduler {
            scheduler.set_surface(surface);
        }
    }

    /// Playback position: the staged target while a seek is in flight,
    /// otherwise the master clock.
    pub fn position_ms(&self) -> Option<i64> {
        if self.shared.seek_pending.load(Ordering::Acquire) {
            return Some(self.shared.seek_target_ms.load(Ordering::Acquire));
        }
        let master = self.shared.master_clock_ms();
        master.is_finite().then_some(master.max(0.0) as i64)
    }

    /// Tear every stage down. Idempotent; safe to call from `Drop`.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        tracing::debug!("pipeline teardown");

        self.shared.abort.store(true, Ordering::Release);
        self.interrupt.store(true, Ordering::Release);
        self.shared.seek.cancel();

        for queue in [&self.audio_packets, &self.video_packets].into_iter().flatten() {
            queue.abort();
        }
        if let Some(frames) = &self.audio_frames {
            frames.abort();
        }
        if let Some(frames) = &self.video_frames {
            frames.abort();
        }

        if let Some(source) = self.source.take() {
            source.stop();
        }
        if let Some(processor) = self.audio_decode.take() {
            processor.join();
        }
        if let Some(processor) = self.video_decode.take() {
            processor.join();
        }
        if let Some(scheduler) = self.audio_scheduler.take() {
            scheduler.stop();
        }
        if let Some(scheduler) = self.video_scheduler.take() {
            scheduler.stop();
        }

        if let Some(frames) = &self.audio_frames {
            frames.flush();
        }
        if let Some(frames) = &self.video_frames {
            frames.flush();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}
