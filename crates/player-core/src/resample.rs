//! Sample-rate and playback-speed conversion for the audio fill path.
//!
//! One Rubato async sinc resampler covers both concerns: the conversion ratio
//! is `sink_rate / (stream_rate * speed)`, adjusted at runtime when the host
//! changes playback speed. When the ratio is exactly 1 the pipeline is a
//! plain copy.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Input chunk size in frames for the steady-state loop.
const CHUNK_FRAMES: usize = 1024;

/// Runtime ratio headroom. Covers playback speeds from 0.25x to 4x without
/// rebuilding the resampler.
const RATIO_HEADROOM: f64 = 4.0;

/// Interleaved `f32` converter from the stream layout to the sink layout.
pub struct SamplePipeline {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    speed: f64,
    resampler: Option<Box<dyn Resampler<f32>>>,
    scratch: Vec<f32>,
}

impl SamplePipeline {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        SamplePipeline {
            src_rate: src_rate.max(1),
            dst_rate: dst_rate.max(1),
            channels: channels.max(1),
            speed: 1.0,
            resampler: None,
            scratch: Vec::new(),
        }
    }

    fn ratio(&self) -> f64 {
        f64::from(self.dst_rate) / (f64::from(self.src_rate) * self.speed)
    }

    fn is_passthrough(&self) -> bool {
        self.resampler.is_none() && (self.ratio() - 1.0).abs() < f64::EPSILON
    }

    /// Change the playback speed factor. Ramped into the running resampler;
    /// out-of-headroom values are clamped by Rubato.
    pub fn set_speed(&mut self, speed: f64) {
        if speed <= 0.0 || (speed - self.speed).abs() < f64::EPSILON {
            return;
        }
        self.speed = speed;
        let ratio = self.ratio();
        if let Some(resampler) = self.resampler.as_mut() {
            if let Err(e) = resampler.set_resample_ratio(ratio, true) {
                tracing::warn!(ratio, "resample ratio change rejected: {e}");
            }
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    fn ensure_resampler(&mut self) -> bool {
        if self.resampler.is_some() {
            return true;
        }
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        match Async::<f32>::new_sinc(
            self.ratio(),
            RATIO_HEADROOM,
            &params,
            CHUNK_FRAMES,
            self.channels,
            FixedAsync::Input,
        ) {
            Ok(r) => {
                self.scratch = vec![0.0; r.output_frames_max() * self.channels];
                self.resampler = Some(Box::new(r));
                true
            }
            Err(e) => {
                tracing::error!("resampler init error: {e}");
                false
            }
        }
    }

    /// Convert `input` (interleaved, stream rate) and append the produced
    /// sink-rate samples to `out`. Falls back to a copy when conversion is
    /// unavailable.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }
        if !self.ensure_resampler() {
            out.extend_from_slice(input);
            return;
        }

        let channels = self.channels;
        for chunk in input.chunks(CHUNK_FRAMES * channels) {
            let frames = chunk.len() / channels;
            if frames == 0 {
                continue;
            }
            let input_adapter = match InterleavedSlice::new(chunk, channels, frames) {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!("interleaved slice (input) error: {e}");
                    return;
                }
            };
            let resampler = self.resampler.as_mut().unwrap();
            let scratch_frames = self.scratch.len() / channels;
            let mut output_adapter =
                match InterleavedSlice::new_mut(&mut self.scratch, channels, scratch_frames) {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::error!("interleaved slice (output) error: {e}");
                        return;
                    }
                };
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: (frames < CHUNK_FRAMES).then_some(frames),
            };
            match resampler.process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            {
                Ok((_consumed, produced)) => {
                    out.extend_from_slice(&self.scratch[..produced * channels]);
                }
                Err(e) => {
                    tracing::error!("resampler process error: {e}");
                    return;
                }
            }
        }
    }
}
