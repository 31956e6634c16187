//! Playback clocks and master-clock selection.
//!
//! Each sync domain (audio, video, external) carries one [`Clock`]: the last
//! anchored pts plus the wall time elapsed since the anchor, scaled by the
//! speed factor. A clock freezes while paused and reports `NAN` until first
//! anchored, which lets consumers fall back to another domain.

use std::sync::Mutex;
use std::time::Instant;

use player_types::SyncMode;

#[derive(Debug)]
struct ClockInner {
    pts_ms: f64,
    anchored_at: Instant,
    speed: f64,
    paused: bool,
    serial: u64,
    available: bool,
}

impl ClockInner {
    fn projected(&self) -> f64 {
        if self.paused {
            self.pts_ms
        } else {
            self.pts_ms + self.anchored_at.elapsed().as_secs_f64() * 1000.0 * self.speed
        }
    }
}

/// Drift-compensated clock for one sync domain.
pub struct Clock {
    inner: Mutex<ClockInner>,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            inner: Mutex::new(ClockInner {
                pts_ms: 0.0,
                anchored_at: Instant::now(),
                speed: 1.0,
                paused: false,
                serial: 0,
                available: false,
            }),
        }
    }

    /// Anchor the clock at `pts_ms` as of now and adopt `serial`.
    pub fn set(&self, pts_ms: f64, serial: u64) {
        let mut g = self.inner.lock().unwrap();
        g.pts_ms = pts_ms;
        g.anchored_at = Instant::now();
        g.serial = serial;
        g.available = true;
    }

    /// Projected position in milliseconds; `NAN` while unanchored.
    pub fn get(&self) -> f64 {
        let g = self.inner.lock().unwrap();
        if !g.available {
            return f64::NAN;
        }
        g.projected()
    }

    /// Freeze or resume projection. Resuming re-anchors so paused wall time
    /// does not count.
    pub fn pause(&self, paused: bool) {
        let mut g = self.inner.lock().unwrap();
        if g.paused == paused {
            return;
        }
        if paused {
            if g.available {
                g.pts_ms = g.projected();
            }
            g.paused = true;
        } else {
            g.anchored_at = Instant::now();
            g.paused = false;
        }
    }

    /// Change the speed factor. Time already accrued keeps its old scale.
    pub fn set_speed(&self, speed: f64) {
        let mut g = self.inner.lock().unwrap();
        if g.available && !g.paused {
            g.pts_ms = g.projected();
            g.anchored_at = Instant::now();
        }
        g.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().unwrap().speed
    }

    pub fn serial(&self) -> u64 {
        self.inner.lock().unwrap().serial
    }

    /// Drop the anchor; `get` reports `NAN` until the next `set`.
    pub fn invalidate(&self) {
        self.inner.lock().unwrap().available = false;
    }

    pub fn is_available(&self) -> bool {
        self.inner.lock().unwrap().available
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

/// Effective sync domain given the configured mode and which clocks are live.
///
/// The preferred domain wins while its clock is anchored; otherwise fall back
/// audio, then video, then the free-running external clock.
pub fn effective_sync_mode(configured: SyncMode, audio_live: bool, video_live: bool) -> SyncMode {
    match configured {
        SyncMode::Audio if audio_live => SyncMode::Audio,
        SyncMode::Video if video_live => SyncMode::Video,
        SyncMode::External => SyncMode::External,
        _ if audio_live => SyncMode::Audio,
        _ if video_live => SyncMode::Video,
        _ => SyncMode::External,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn unanchored_clock_reports_nan() {
        let clock = Clock::new();
        assert!(clock.get().is_nan());
        clock.set(1000.0, 1);
        assert!(!clock.get().is_nan());
        clock.invalidate();
        assert!(clock.get().is_nan());
    }

    #[test]
    fn running_clock_is_monotonic() {
        let clock = Clock::new();
        clock.set(500.0, 1);
        let mut last = clock.get();
        for _ in 0..50 {
            let now = clock.get();
            assert!(now >= last);
            last = now;
        }
        assert!(last >= 500.0);
    }

    #[test]
    fn pause_freezes_projection() {
        let clock = Clock::new();
        clock.set(100.0, 1);
        clock.pause(true);
        let frozen = clock.get();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.get(), frozen);
        clock.pause(false);
        thread::sleep(Duration::from_millis(20));
        assert!(clock.get() > frozen);
    }

    #[test]
    fn speed_change_does_not_rewind() {
        let clock = Clock::new();
        clock.set(0.0, 1);
        thread::sleep(Duration::from_millis(20));
        let before = clock.get();
        clock.set_speed(0.25);
        let after = clock.get();
        assert!(after >= before - 1.0, "before={before} after={after}");
    }

    #[test]
    fn doubled_speed_advances_faster() {
        let a = Clock::new();
        let b = Clock::new();
        a.set(0.0, 1);
        b.set(0.0, 1);
        b.set_speed(2.0);
        thread::sleep(Duration::from_millis(50));
        assert!(b.get() > a.get());
    }

    #[test]
    fn sync_mode_fallback_order() {
        use SyncMode::*;
        assert_eq!(effective_sync_mode(Audio, true, true), Audio);
        assert_eq!(effective_sync_mode(Audio, false, true), Video);
        assert_eq!(effective_sync_mode(Audio, false, false), External);
        assert_eq!(effective_sync_mode(Video, true, false), Audio);
        assert_eq!(effective_sync_mode(Video, false, true), Video);
        assert_eq!(effective_sync_mode(External, true, true), External);
    }
}
