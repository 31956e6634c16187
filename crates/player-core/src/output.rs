//! Renderer and sink collaborator contracts, plus headless implementations.
//!
//! Audio output follows a pull model: the sink calls the engine's
//! [`FillHandle`] for interleaved `f32` samples on its own cadence. Video
//! output is push: the render scheduler hands frames to a [`VideoRenderer`]
//! after pacing them against the master clock. The null implementations run
//! without any audio or display hardware and keep wall-clock pacing, which is
//! what the tests and headless CLI runs use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use player_types::{PlayerError, SurfaceHandle};

use crate::audio::FillHandle;
use crate::frame::VideoFrame;

/// Interleaved `f32` stream layout at a sink boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_millis()) / 1000;
        frames as usize * self.channels as usize
    }
}

/// What the sink actually opened with.
#[derive(Clone, Copy, Debug)]
pub struct SinkConfig {
    /// Layout the sink pulls in. May differ from the requested spec; the
    /// fill engine converts.
    pub spec: AudioSpec,
    /// Output latency the clock must subtract, in milliseconds.
    pub latency_ms: i64,
}

/// Pull-model audio output collaborator.
pub trait AudioSink: Send {
    /// Open the output and start pulling through `handle`. `preferred` is the
    /// stream's native layout; the sink reports what it really opened with.
    fn open(&mut self, preferred: AudioSpec, handle: FillHandle) -> Result<SinkConfig, PlayerError>;

    /// Stop or resume pulling. The engine keeps serving silence while the
    /// renderers are paused, so a sink may also keep pulling.
    fn pause(&mut self, paused: bool);

    /// Discard any sink-internal buffer.
    fn flush(&mut self) {}

    /// Idempotent.
    fn close(&mut self) {}
}

/// Push-model video output collaborator.
pub trait VideoRenderer: Send {
    fn render(&mut self, frame: &VideoFrame) -> Result<(), PlayerError>;

    /// Re-target to a new host surface; `None` detaches.
    fn set_surface(&mut self, _surface: Option<SurfaceHandle>) {}

    /// Idempotent.
    fn close(&mut self) {}
}

/// Builds the session's output collaborators at prepare time.
pub trait RendererFactory: Send + Sync {
    fn create_audio_sink(&self) -> Box<dyn AudioSink>;
    fn create_video_renderer(&self) -> Box<dyn VideoRenderer>;
}

const NULL_SINK_PERIOD: Duration = Duration::from_millis(20);

/// Headless audio sink: a pacing thread pulls real-time-sized buffers and
/// throws the samples away.
pub struct NullAudioSink {
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl NullAudioSink {
    pub fn new() -> Self {
        NullAudioSink {
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }
}

impl Default for NullAudioSink {
    fn default() -> Self {
        NullAudioSink::new()
    }
}

impl AudioSink for NullAudioSink {
    fn open(&mut self, preferred: AudioSpec, handle: FillHandle) -> Result<SinkConfig, PlayerError> {
        let paused = self.paused.clone();
        let stop = self.stop.clone();
        let samples = preferred.samples_for(NULL_SINK_PERIOD).max(preferred.channels as usize);
        let join = thread::Builder::new()
            .name("null-audio-sink".into())
            .spawn(move || {
                let mut buf = vec![0.0f32; samples];
                while !stop.load(Ordering::Acquire) {
                    if !paused.load(Ordering::Acquire) {
                        handle.fill(&mut buf);
                    }
                    thread::sleep(NULL_SINK_PERIOD);
                }
            })
            .map_err(|e| PlayerError::RenderFailed(format!("spawn sink thread: {e}")))?;
        self.join = Some(join);
        Ok(SinkConfig {
            spec: preferred,
            latency_ms: NULL_SINK_PERIOD.as_millis() as i64 * 2,
        })
    }

    fn pause(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for NullAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Headless video renderer: counts frames, keeps the last surface.
pub struct NullVideoRenderer {
    rendered: Arc<AtomicU64>,
    surface: Option<SurfaceHandle>,
}

impl NullVideoRenderer {
    pub fn new() -> Self {
        NullVideoRenderer {
            rendered: Arc::new(AtomicU64::new(0)),
            surface: None,
        }
    }

    /// Counter handle for tests and telemetry.
    pub fn rendered_frames(&self) -> Arc<AtomicU64> {
        self.rendered.clone()
    }
}

impl Default for NullVideoRenderer {
    fn default() -> Self {
        NullVideoRenderer::new()
    }
}

impl VideoRenderer for NullVideoRenderer {
    fn render(&mut self, _frame: &VideoFrame) -> Result<(), PlayerError> {
        self.rendered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_surface(&mut self, surface: Option<SurfaceHandle>) {
        self.surface = surface;
    }
}

/// Factory producing the null outputs.
pub struct NullRendererFactory;

impl RendererFactory for NullRendererFactory {
    fn create_audio_sink(&self) -> Box<dyn AudioSink> {
        Box::new(NullAudioSink::new())
    }

    fn create_video_renderer(&self) -> Box<dyn VideoRenderer> {
        Box::new(NullVideoRenderer::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_spec_sizes_buffers() {
        let spec = AudioSpec { sample_rate: 48_000, channels: 2 };
        assert_eq!(spec.samples_for(Duration::from_millis(20)), 1920);
        assert_eq!(spec.samples_for(Duration::from_millis(1000)), 96_000);
    }

    #[test]
    fn null_renderer_counts_frames() {
        let mut renderer = NullVideoRenderer::new();
        let counter = renderer.rendered_frames();
        let frame = VideoFrame::software(0, 4, 4, vec![0; 16]);
        renderer.render(&frame).unwrap();
        renderer.render(&frame).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}
