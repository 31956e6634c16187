//! Demuxer collaborator contract.
//!
//! The source controller drives a [`Demuxer`] it obtained from a
//! [`DemuxerFactory`]; container parsing, network I/O, and
//! reference-frame detection all live behind this seam. Packets report
//! their own keyframe/reference flags so the engine's discard rules stay
//! codec-agnostic.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use player_types::{MediaInfo, PlayerError, SourceStats};

use crate::frame::Packet;

/// Options applied when opening a source.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Position to land on right after open, in milliseconds.
    pub start_ms: Option<i64>,
    /// Per-request transport timeout for network sources.
    pub io_timeout: Option<Duration>,
    /// Extra request headers for network sources, `Name: value` form.
    pub headers: Vec<String>,
}

/// One successful demuxer read.
#[derive(Debug)]
pub enum DemuxRead {
    Packet(Packet),
    /// Container exhausted. Further reads keep returning `Eof` until `seek`.
    Eof,
}

pub trait Demuxer: Send {
    /// Blocking read of the next packet in container order. The interrupt
    /// flag passed at open time must make a blocked read return promptly
    /// with [`PlayerError::Interrupted`].
    fn read_packet(&mut self) -> Result<DemuxRead, PlayerError>;

    fn seek(&mut self, target_ms: i64) -> Result<(), PlayerError>;

    /// Sticky transport error code observed by the I/O layer, if any.
    fn io_error(&self) -> Option<i32> {
        None
    }

    /// URL the transport actually ended up at, when a redirect moved it
    /// away from the one opened.
    fn effective_url(&self) -> Option<String> {
        None
    }

    /// Cache/network telemetry, where the transport tracks it.
    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }

    /// Idempotent.
    fn close(&mut self) {}
}

impl std::fmt::Debug for dyn Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Demuxer")
    }
}

pub trait DemuxerFactory: Send + Sync {
    fn open(
        &self,
        url: &str,
        opts: &OpenOptions,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<(Box<dyn Demuxer>, MediaInfo), PlayerError>;
}
