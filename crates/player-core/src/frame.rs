//! Queue payloads: compressed packets and decoded frames.

use std::fmt;
use std::sync::Arc;

use player_types::TrackKind;

/// Sentinel for an unknown pts/dts/duration.
pub const NO_PTS: i64 = i64::MIN;

/// One compressed packet as read from the demuxer.
#[derive(Clone, Debug)]
pub struct Packet {
    pub track: TrackKind,
    pub data: Vec<u8>,
    /// Presentation timestamp in milliseconds, or [`NO_PTS`].
    pub pts_ms: i64,
    /// Decode timestamp in milliseconds, or [`NO_PTS`].
    pub dts_ms: i64,
    /// Packet duration in milliseconds, or [`NO_PTS`].
    pub duration_ms: i64,
    /// Starts a decodable group (video key frame).
    pub keyframe: bool,
    /// `false` when no later packet references this one, so it can be
    /// discarded without corrupting decode. Reported by the demuxer.
    pub reference: bool,
    /// Generation serial stamped when the packet enters its queue.
    pub serial: u64,
}

impl Packet {
    pub fn new(track: TrackKind, data: Vec<u8>, pts_ms: i64) -> Self {
        Packet {
            track,
            data,
            pts_ms,
            dts_ms: pts_ms,
            duration_ms: NO_PTS,
            keyframe: track == TrackKind::Audio,
            reference: true,
            serial: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Releases platform-owned frame storage back to its producer.
///
/// Attached by decoders that hand out [`FrameStorage::Hardware`] or
/// [`FrameStorage::CodecSlot`] frames; software storage needs none.
pub trait FrameReleaser: Send + Sync {
    fn release(&self, storage: &FrameStorage);
}

/// Backing storage of a decoded video frame.
pub enum FrameStorage {
    /// Engine-owned pixel bytes.
    Software(Vec<u8>),
    /// Platform image handle owned by the producer.
    Hardware(u64),
    /// Output slot inside a codec-owned frame pool.
    CodecSlot { handle: u64, index: u32 },
    /// Storage already handed back.
    Released,
}

impl fmt::Debug for FrameStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStorage::Software(data) => write!(f, "Software({} bytes)", data.len()),
            FrameStorage::Hardware(h) => write!(f, "Hardware({h:#x})"),
            FrameStorage::CodecSlot { handle, index } => {
                write!(f, "CodecSlot({handle:#x}, {index})")
            }
            FrameStorage::Released => write!(f, "Released"),
        }
    }
}

/// One decoded video frame. Dropping the frame releases its storage exactly
/// once; `release` may also be called explicitly.
pub struct VideoFrame {
    pub pts_ms: i64,
    pub duration_ms: i64,
    pub width: u32,
    pub height: u32,
    pub serial: u64,
    storage: FrameStorage,
    releaser: Option<Arc<dyn FrameReleaser>>,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("pts_ms", &self.pts_ms)
            .field("duration_ms", &self.duration_ms)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("serial", &self.serial)
            .field("storage", &self.storage)
            .field("releaser", &self.releaser.is_some())
            .finish()
    }
}

impl VideoFrame {
    /// Frame backed by engine-owned pixel data.
    pub fn software(pts_ms: i64, width: u32, height: u32, data: Vec<u8>) -> Self {
        VideoFrame {
            pts_ms,
            duration_ms: NO_PTS,
            width,
            height,
            serial: 0,
            storage: FrameStorage::Software(data),
            releaser: None,
        }
    }

    /// Frame backed by producer-owned storage; `releaser` runs exactly once.
    pub fn external(
        pts_ms: i64,
        width: u32,
        height: u32,
        storage: FrameStorage,
        releaser: Arc<dyn FrameReleaser>,
    ) -> Self {
        VideoFrame {
            pts_ms,
            duration_ms: NO_PTS,
            width,
            height,
            serial: 0,
            storage,
            releaser: Some(releaser),
        }
    }

    pub fn storage(&self) -> &FrameStorage {
        &self.storage
    }

    /// Hand the storage back to its producer. Idempotent.
    pub fn release(&mut self) {
        let storage = std::mem::replace(&mut self.storage, FrameStorage::Released);
        if matches!(storage, FrameStorage::Released) {
            return;
        }
        if let Some(releaser) = &self.releaser {
            releaser.release(&storage);
        }
    }
}

impl Drop for VideoFrame {
    fn drop(&mut self) {
        self.release();
    }
}

/// One decoded audio frame: interleaved `f32` samples.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    pub pts_ms: i64,
    pub serial: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as i64 * 1000) / i64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReleaser(AtomicUsize);

    impl FrameReleaser for CountingReleaser {
        fn release(&self, _storage: &FrameStorage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn release_runs_exactly_once() {
        let releaser = Arc::new(CountingReleaser(AtomicUsize::new(0)));
        let mut frame = VideoFrame::external(
            0,
            16,
            16,
            FrameStorage::CodecSlot { handle: 0xbeef, index: 3 },
            releaser.clone(),
        );
        frame.release();
        frame.release();
        drop(frame);
        assert_eq!(releaser.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_external_storage() {
        let releaser = Arc::new(CountingReleaser(AtomicUsize::new(0)));
        {
            let _frame = VideoFrame::external(
                0,
                16,
                16,
                FrameStorage::Hardware(0x10),
                releaser.clone(),
            );
        }
        assert_eq!(releaser.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn audio_frame_duration_from_layout() {
        let frame = AudioFrame {
            pts_ms: 0,
            serial: 0,
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.0; 9600],
        };
        assert_eq!(frame.frames(), 4800);
        assert_eq!(frame.duration_ms(), 100);
    }
}
