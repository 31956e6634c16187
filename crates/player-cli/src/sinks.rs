//! CLI-side output collaborators.
//!
//! The WAV sink keeps the null sink's real-time pull cadence but appends the
//! pulled samples to a file, so a headless run still exercises the clock and
//! buffering paths with real pacing.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use player_core::audio::FillHandle;
use player_core::output::{
    AudioSink, AudioSpec, NullVideoRenderer, RendererFactory, SinkConfig, VideoRenderer,
};
use player_types::PlayerError;

const WAV_PERIOD: Duration = Duration::from_millis(20);

/// Pulls real-time-sized buffers and appends them to a WAV file. Buffering
/// and underrun gaps are skipped rather than written as silence.
pub struct WavAudioSink {
    path: PathBuf,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WavAudioSink {
    pub fn new(path: PathBuf) -> Self {
        WavAudioSink {
            path,
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }
}

impl AudioSink for WavAudioSink {
    fn open(&mut self, preferred: AudioSpec, handle: FillHandle) -> Result<SinkConfig, PlayerError> {
        let spec = hound::WavSpec {
            channels: preferred.channels,
            sample_rate: preferred.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| PlayerError::RenderFailed(format!("create {:?}: {e}", self.path)))?;
        let paused = self.paused.clone();
        let stop = self.stop.clone();
        let samples = preferred
            .samples_for(WAV_PERIOD)
            .max(preferred.channels as usize);
        let join = thread::Builder::new()
            .name("wav-sink".into())
            .spawn(move || {
                let mut buf = vec![0.0f32; samples];
                while !stop.load(Ordering::Acquire) {
                    if !paused.load(Ordering::Acquire) {
                        let written = handle.fill(&mut buf);
                        for &sample in &buf[..written] {
                            let _ = writer.write_sample(sample);
                        }
                    }
                    thread::sleep(WAV_PERIOD);
                }
                if let Err(e) = writer.finalize() {
                    tracing::warn!("wav finalize: {e}");
                }
            })
            .map_err(|e| PlayerError::RenderFailed(format!("spawn sink thread: {e}")))?;
        self.join = Some(join);
        Ok(SinkConfig {
            spec: preferred,
            latency_ms: WAV_PERIOD.as_millis() as i64 * 2,
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

impl Drop for WavAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// WAV capture sink paired with the headless video renderer.
pub struct WavRendererFactory {
    path: PathBuf,
}

impl WavRendererFactory {
    pub fn new(path: PathBuf) -> Self {
        WavRendererFactory { path }
    }
}

impl RendererFactory for WavRendererFactory {
    fn create_audio_sink(&self) -> Box<dyn AudioSink> {
        Box::new(WavAudioSink::new(self.path.clone()))
    }

    fn create_video_renderer(&self) -> Box<dyn VideoRenderer> {
        Box::new(NullVideoRenderer::new())
    }
}

#[cfg(feature = "device")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{Sender, bounded};

    enum SinkCommand {
        Pause(bool),
        Close,
    }

    /// Default-device output. The stream lives on a dedicated thread because
    /// cpal streams are not `Send`.
    pub struct CpalAudioSink {
        commands: Option<Sender<SinkCommand>>,
        join: Option<JoinHandle<()>>,
    }

    impl CpalAudioSink {
        pub fn new() -> Self {
            CpalAudioSink {
                commands: None,
                join: None,
            }
        }
    }

    impl Default for CpalAudioSink {
        fn default() -> Self {
            CpalAudioSink::new()
        }
    }

    impl AudioSink for CpalAudioSink {
        fn open(
            &mut self,
            preferred: AudioSpec,
            handle: FillHandle,
        ) -> Result<SinkConfig, PlayerError> {
            let (cmd_tx, cmd_rx) = bounded::<SinkCommand>(4);
            let (ready_tx, ready_rx) = bounded::<Result<SinkConfig, PlayerError>>(1);
            let join = thread::Builder::new()
                .name("cpal-sink".into())
                .spawn(move || match open_stream(preferred, handle) {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok(config));
                        loop {
                            match cmd_rx.recv() {
                                Ok(SinkCommand::Pause(true)) => {
                                    let _ = stream.pause();
                                }
                                Ok(SinkCommand::Pause(false)) => {
                                    let _ = stream.play();
                                }
                                Ok(SinkCommand::Close) | Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .map_err(|e| PlayerError::RenderFailed(format!("spawn sink thread: {e}")))?;
            self.join = Some(join);
            self.commands = Some(cmd_tx);
            ready_rx
                .recv()
                .map_err(|_| PlayerError::RenderFailed("sink thread exited".into()))?
        }

        fn pause(&mut self, paused: bool) {
            if let Some(commands) = &self.commands {
                let _ = commands.send(SinkCommand::Pause(paused));
            }
        }

        fn close(&mut self) {
            if let Some(commands) = self.commands.take() {
                let _ = commands.send(SinkCommand::Close);
            }
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }

    impl Drop for CpalAudioSink {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn open_stream(
        preferred: AudioSpec,
        handle: FillHandle,
    ) -> Result<(cpal::Stream, SinkConfig), PlayerError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::RenderFailed("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlayerError::RenderFailed(format!("device config: {e}")))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(PlayerError::Unsupported(format!(
                "device sample format {:?}",
                supported.sample_format()
            )));
        }
        let config: cpal::StreamConfig = supported.into();
        let spec = AudioSpec {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        tracing::info!(rate_hz = spec.sample_rate, channels = spec.channels, "output device");
        let _ = preferred;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    handle.fill(data);
                },
                |e| tracing::warn!("output stream error: {e}"),
                None,
            )
            .map_err(|e| PlayerError::RenderFailed(format!("open output stream: {e}")))?;
        stream
            .play()
            .map_err(|e| PlayerError::RenderFailed(format!("start output stream: {e}")))?;
        // Device latency is not reported through this API; assume two periods.
        Ok((stream, SinkConfig { spec, latency_ms: 40 }))
    }

    /// Default-device sink paired with the headless video renderer.
    pub struct CpalRendererFactory;

    impl RendererFactory for CpalRendererFactory {
        fn create_audio_sink(&self) -> Box<dyn AudioSink> {
            Box::new(CpalAudioSink::new())
        }

        fn create_video_renderer(&self) -> Box<dyn VideoRenderer> {
            Box::new(NullVideoRenderer::new())
        }
    }
}

#[cfg(feature = "device")]
pub use device::{CpalAudioSink, CpalRendererFactory};
