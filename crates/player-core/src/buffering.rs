//! Buffering watermark policy.
//!
//! The source controller feeds this tracker with buffered durations and asks
//! it when to start and stop holding the renderers. Each buffering trigger
//! escalates the active high-water mark (first, next, last, capped) so a
//! connection that keeps stalling buffers deeper each time; a seek resets the
//! escalation. Progress reports are throttled to ten-point steps.

use crate::config::PlayerConfig;

/// Minimum percentage step between emitted progress reports.
const PROGRESS_STEP: i32 = 10;

pub struct WatermarkTracker {
    marks_ms: [i64; 3],
    /// Buffering triggers since the last seek, saturating at the last mark.
    triggers: usize,
    buffering: bool,
    last_percent: i32,
}

impl WatermarkTracker {
    pub fn new(config: &PlayerConfig) -> Self {
        WatermarkTracker {
            marks_ms: [
                config.first_high_water_ms.max(1),
                config.next_high_water_ms.max(1),
                config.last_high_water_ms.max(1),
            ],
            triggers: 0,
            buffering: false,
            last_percent: -1,
        }
    }

    /// High-water mark currently in effect, in milliseconds.
    pub fn active_mark_ms(&self) -> i64 {
        let tier = self.triggers.saturating_sub(1).min(self.marks_ms.len() - 1);
        self.marks_ms[tier]
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Enter buffering. Returns `true` when this call started it (the caller
    /// raises the shared flag and emits buffering-start exactly then).
    pub fn begin(&mut self) -> bool {
        if self.buffering {
            return false;
        }
        self.buffering = true;
        self.last_percent = -1;
        self.triggers = self.triggers.saturating_add(1);
        tracing::debug!(
            trigger = self.triggers,
            mark_ms = self.active_mark_ms(),
            "buffering started"
        );
        true
    }

    /// Progress against the active mark. Returns a percentage to report when
    /// it moved at least a full step (or reached 100) since the last report.
    pub fn progress(&mut self, buffered_ms: i64) -> Option<i32> {
        if !self.buffering {
            return None;
        }
        let percent = ((buffered_ms.max(0) * 100) / self.active_mark_ms()).min(100) as i32;
        if percent < self.last_percent + PROGRESS_STEP && percent < 100 {
            return None;
        }
        if percent <= self.last_percent {
            return None;
        }
        self.last_percent = percent;
        Some(percent)
    }

    /// `true` once the buffered duration reaches the active mark.
    pub fn is_satisfied(&self, buffered_ms: i64) -> bool {
        buffered_ms >= self.active_mark_ms()
    }

    /// Leave buffering. Returns `true` when this call ended it.
    pub fn end(&mut self) -> bool {
        if !self.buffering {
            return false;
        }
        self.buffering = false;
        true
    }

    /// A seek resets the escalation to the first-tier mark and restarts
    /// buffering for the new position.
    pub fn on_seek(&mut self) -> bool {
        self.triggers = 0;
        self.buffering = false;
        self.begin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> WatermarkTracker {
        WatermarkTracker::new(&PlayerConfig::default())
    }

    #[test]
    fn repeated_triggers_escalate_and_cap() {
        let mut t = tracker();
        assert!(t.begin());
        assert_eq!(t.active_mark_ms(), 100);
        assert!(t.end());
        assert!(t.begin());
        assert_eq!(t.active_mark_ms(), 1_000);
        assert!(t.end());
        for _ in 0..5 {
            assert!(t.begin());
            assert!(t.end());
        }
        assert_eq!(t.active_mark_ms(), 5_000);
    }

    #[test]
    fn escalation_never_lowers_the_mark() {
        let mut t = tracker();
        let mut previous = 0;
        for _ in 0..10 {
            t.begin();
            let mark = t.active_mark_ms();
            assert!(mark >= previous);
            previous = mark;
            t.end();
        }
    }

    #[test]
    fn seek_resets_to_first_tier() {
        let mut t = tracker();
        for _ in 0..4 {
            t.begin();
            t.end();
        }
        assert_eq!(t.active_mark_ms(), 5_000);
        assert!(t.on_seek());
        assert!(t.is_buffering());
        assert_eq!(t.active_mark_ms(), 100);
    }

    #[test]
    fn progress_is_throttled_to_ten_point_steps() {
        let mut t = tracker();
        t.begin();
        assert_eq!(t.progress(0), Some(0));
        assert_eq!(t.progress(5), None);
        assert_eq!(t.progress(12), Some(12));
        assert_eq!(t.progress(19), None);
        assert_eq!(t.progress(50), Some(50));
        assert_eq!(t.progress(100), Some(100));
        assert_eq!(t.progress(100), None);
    }

    #[test]
    fn satisfaction_follows_the_active_mark() {
        let mut t = tracker();
        t.begin();
        assert!(!t.is_satisfied(99));
        assert!(t.is_satisfied(100));
        t.end();
        t.begin();
        assert!(!t.is_satisfied(100));
        assert!(t.is_satisfied(1_000));
    }

    #[test]
    fn begin_and_end_fire_once() {
        let mut t = tracker();
        assert!(t.begin());
        assert!(!t.begin());
        assert!(t.end());
        assert!(!t.end());
    }
}
