//! Audio render scheduling: the pull-model fill engine.
//!
//! The sink collaborator calls [`FillHandle::fill`] on its own cadence (a
//! device callback or a pacing thread). The engine serves interleaved `f32`
//! at the sink's layout: it pops decoded frames non-blockingly, discards
//! stale generations, converts layout and rate through [`SamplePipeline`],
//! applies volume, and re-anchors the audio clock at every frame boundary.
//! While paused or buffering it serves silence and touches nothing.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use player_types::{EventKind, PlayerError};

use crate::frame::{AudioFrame, NO_PTS};
use crate::message::Notifier;
use crate::output::{AudioSink, AudioSpec, SinkConfig};
use crate::queue::{FramePop, FrameQueue};
use crate::resample::SamplePipeline;
use crate::state::PlaybackShared;

struct FillState {
    sink: Option<SinkConfig>,
    pipeline: Option<SamplePipeline>,
    /// Converted sink-layout samples awaiting delivery.
    pending: Vec<f32>,
    cursor: usize,
    /// Generation of the samples in `pending`.
    serial: u64,
    src_rate: u32,
    src_channels: u16,
}

struct FillInner {
    shared: Arc<PlaybackShared>,
    frames: Arc<FrameQueue<AudioFrame>>,
    notifier: Notifier,
    state: Mutex<FillState>,
}

/// Cloneable pull handle given to the audio sink.
#[derive(Clone)]
pub struct FillHandle {
    inner: Arc<FillInner>,
}

impl FillHandle {
    pub fn new(
        shared: Arc<PlaybackShared>,
        frames: Arc<FrameQueue<AudioFrame>>,
        notifier: Notifier,
    ) -> Self {
        FillHandle {
            inner: Arc::new(FillInner {
                shared,
                frames,
                notifier,
                state: Mutex::new(FillState {
                    sink: None,
                    pipeline: None,
                    pending: Vec::new(),
                    cursor: 0,
                    serial: 0,
                    src_rate: 0,
                    src_channels: 0,
                }),
            }),
        }
    }

    /// Install the layout the sink actually opened with. Until this runs the
    /// handle serves silence.
    pub fn configure(&self, config: SinkConfig) {
        let mut state = self.inner.state.lock().unwrap();
        state.sink = Some(config);
        state.pipeline = None;
        state.pending.clear();
        state.cursor = 0;
    }

    /// Drop converted samples that have not reached the sink yet.
    pub fn discard(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.pending.clear();
        state.cursor = 0;
        state.pipeline = None;
    }

    /// Serve interleaved `f32` samples at the sink layout. The whole buffer
    /// is always written; the return value is how many samples carry signal,
    /// the rest is silence.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let shared = &self.inner.shared;
        if out.is_empty() || shared.abort.load(Ordering::Acquire) {
            return 0;
        }
        if shared.is_paused() || shared.buffering.load(Ordering::Acquire) {
            return 0;
        }

        let mut state = self.inner.state.lock().unwrap();
        let Some(sink) = state.sink else {
            return 0;
        };

        let speed = shared.speed();
        if let Some(pipeline) = state.pipeline.as_mut() {
            pipeline.set_speed(speed);
        }

        let mut written = 0;
        while written < out.len() {
            if state.cursor < state.pending.len() {
                let available = state.pending.len() - state.cursor;
                let take = available.min(out.len() - written);
                out[written..written + take]
                    .copy_from_slice(&state.pending[state.cursor..state.cursor + take]);
                state.cursor += take;
                written += take;
                continue;
            }

            state.pending.clear();
            state.cursor = 0;
            match self.inner.frames.pop(Duration::ZERO) {
                FramePop::Frame(frame) => self.ingest(&mut state, &sink, frame, speed, written),
                FramePop::Wakeup | FramePop::Timeout | FramePop::Aborted => break,
            }
        }

        let gain = if shared.muted.load(Ordering::Acquire) {
            0.0
        } else {
            shared.volume()
        };
        if (gain - 1.0).abs() > f32::EPSILON {
            for sample in &mut out[..written] {
                *sample *= gain;
            }
        }

        if written < out.len() && state.serial != 0 {
            let finished =
                shared.audio_finished_serial.load(Ordering::Acquire) == shared.current_serial();
            if !finished {
                shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        written
    }

    /// Convert one decoded frame into pending sink-layout samples.
    /// `queued_out` is how many samples this fill already placed ahead of
    /// the frame.
    fn ingest(
        &self,
        state: &mut FillState,
        sink: &SinkConfig,
        frame: AudioFrame,
        speed: f64,
        queued_out: usize,
    ) {
        let shared = &self.inner.shared;
        if frame.serial != shared.current_serial() {
            shared.stale_discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if frame.sample_rate == 0 || frame.channels == 0 {
            return;
        }

        let layout_changed = frame.sample_rate != state.src_rate
            || frame.channels != state.src_channels
            || frame.serial != state.serial;
        if layout_changed || state.pipeline.is_none() {
            let mut pipeline = SamplePipeline::new(
                frame.sample_rate,
                sink.spec.sample_rate,
                sink.spec.channels as usize,
            );
            pipeline.set_speed(speed);
            state.pipeline = Some(pipeline);
            state.src_rate = frame.sample_rate;
            state.src_channels = frame.channels;
        }
        state.serial = frame.serial;

        if shared.mark_first_audio(frame.serial) {
            self.inner.notifier.event(EventKind::FirstAudioFrame);
        }
        if frame.pts_ms != NO_PTS {
            // Samples already queued ahead of this frame play first, on top
            // of the sink's own latency.
            let queued = queued_out + (state.pending.len() - state.cursor);
            let queued_ms = (queued / sink.spec.channels.max(1) as usize) as i64 * 1000
                / i64::from(sink.spec.sample_rate.max(1));
            shared.audio_clock.set(
                (frame.pts_ms - sink.latency_ms - queued_ms) as f64,
                frame.serial,
            );
        }

        let converted;
        let samples: &[f32] = if frame.channels == sink.spec.channels {
            &frame.samples
        } else {
            converted = remap_channels(&frame.samples, frame.channels, sink.spec.channels);
            &converted
        };
        let pipeline = state.pipeline.as_mut().unwrap();
        pipeline.process(samples, &mut state.pending);
    }
}

/// Naive channel-count conversion: missing channels repeat the last source
/// channel, extra channels are dropped.
fn remap_channels(input: &[f32], src: u16, dst: u16) -> Vec<f32> {
    let src = src.max(1) as usize;
    let dst = dst.max(1) as usize;
    let frames = input.len() / src;
    let mut out = Vec::with_capacity(frames * dst);
    for frame in input.chunks_exact(src) {
        for c in 0..dst {
            out.push(frame[c.min(src - 1)]);
        }
    }
    out
}

/// Owns the sink collaborator for one pipeline run.
pub struct AudioScheduler {
    sink: Box<dyn AudioSink>,
    handle: FillHandle,
}

impl AudioScheduler {
    /// Open the sink against the stream's native layout and wire the handle.
    pub fn start(
        mut sink: Box<dyn AudioSink>,
        preferred: AudioSpec,
        handle: FillHandle,
    ) -> Result<Self, PlayerError> {
        let config = sink.open(preferred, handle.clone())?;
        handle.configure(config);
        tracing::info!(
            rate = config.spec.sample_rate,
            channels = config.spec.channels,
            latency_ms = config.latency_ms,
            "audio sink opened"
        );
        Ok(AudioScheduler { sink, handle })
    }

    pub fn pause(&mut self, paused: bool) {
        self.sink.pause(paused);
    }

    pub fn flush(&mut self) {
        self.handle.discard();
        self.sink.flush();
    }

    pub fn stop(mut self) {
        self.sink.close();
    }
}
