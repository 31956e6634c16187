//! Host-facing player facade.
//!
//! One lock serializes the externally observable lifecycle; blocking work
//! (source open, thread joins) always happens with the lock released.
//! `prepare_async` builds the pipeline on a background thread and reports
//! through the event queue; lifecycle-changing events (completed, error)
//! update the facade as the host polls them.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use player_types::{
    ConfigValue, EventKind, LifecycleState, PlayerError, PlayerEvent, PlayerStatus, SurfaceHandle,
};

use crate::config::{KEY_LOOP, PlayerConfig};
use crate::message::{EventQueue, Notifier};
use crate::pipeline::{Collaborators, Pipeline};

struct PlayerInner {
    state: LifecycleState,
    released: bool,
    /// Bumped by reset/stop so an in-flight prepare discards its result.
    epoch: u64,
    url: Option<String>,
    table: HashMap<String, ConfigValue>,
    collaborators: Collaborators,
    surface: Option<SurfaceHandle>,
    volume: f32,
    muted: bool,
    speed: f64,
    pipeline: Option<Pipeline>,
    last_position_ms: i64,
}

impl PlayerInner {
    fn ensure_live(&self) -> Result<(), PlayerError> {
        if self.released {
            return Err(PlayerError::InvalidState(self.state));
        }
        Ok(())
    }
}

/// A single player instance.
pub struct Player {
    inner: Arc<Mutex<PlayerInner>>,
    events: Arc<EventQueue>,
}

impl Player {
    pub fn new(collaborators: Collaborators) -> Self {
        Player {
            inner: Arc::new(Mutex::new(PlayerInner {
                state: LifecycleState::Idle,
                released: false,
                epoch: 0,
                url: None,
                table: HashMap::new(),
                collaborators,
                surface: None,
                volume: 1.0,
                muted: false,
                speed: 1.0,
                pipeline: None,
                last_position_ms: 0,
            })),
            events: EventQueue::new(),
        }
    }

    /// The shared event queue, for hosts that run their own dispatch thread.
    pub fn event_queue(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    fn transition(&self, inner: &mut PlayerInner, state: LifecycleState) {
        if inner.state == state {
            return;
        }
        tracing::debug!(from = ?inner.state, to = ?state, "lifecycle transition");
        inner.state = state;
        self.events.push(PlayerEvent::with_args(
            EventKind::StateChanged,
            i64::from(state.code()),
            0,
        ));
    }

    pub fn set_data_source(&self, url: &str) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        if g.state != LifecycleState::Idle {
            return Err(PlayerError::InvalidState(g.state));
        }
        g.url = Some(url.to_string());
        self.transition(&mut g, LifecycleState::Initialized);
        Ok(())
    }

    /// Stage a configuration value; resolved once at prepare time.
    pub fn set_config(&self, key: &str, value: ConfigValue) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        if !matches!(g.state, LifecycleState::Idle | LifecycleState::Initialized) {
            return Err(PlayerError::InvalidState(g.state));
        }
        g.table.insert(key.to_string(), value);
        Ok(())
    }

    /// Loop budget (0 = forever). Effective at the next prepare.
    pub fn set_loop(&self, count: u32) -> Result<(), PlayerError> {
        self.set_config(KEY_LOOP, ConfigValue::I64(i64::from(count)))
    }

    /// Open the source and build the pipeline on a background thread.
    /// Completion surfaces as a `Prepared` event (or `Error`).
    pub fn prepare_async(&self) -> Result<(), PlayerError> {
        let (url, config, collaborators, surface, epoch) = {
            let mut g = self.inner.lock().unwrap();
            g.ensure_live()?;
            if g.state != LifecycleState::Initialized {
                return Err(PlayerError::InvalidState(g.state));
            }
            self.transition(&mut g, LifecycleState::Preparing);
            (
                g.url.clone().unwrap_or_default(),
                Arc::new(PlayerConfig::resolve(&g.table)),
                g.collaborators.clone(),
                g.surface,
                g.epoch,
            )
        };

        let inner = self.inner.clone();
        let events = self.events.clone();
        thread::Builder::new()
            .name("player-prepare".into())
            .spawn(move || {
                let result =
                    Pipeline::build(&url, config.clone(), &collaborators, events.clone(), surface);
                let superseded;
                {
                    let mut g = inner.lock().unwrap();
                    superseded = g.epoch != epoch || g.state != LifecycleState::Preparing;
                    if !superseded {
                        match result {
                            Ok(pipeline) => {
                                let shared = pipeline.shared().clone();
                                shared.set_volume(g.volume);
                                shared.muted.store(g.muted, Ordering::Release);
                                shared.set_speed(g.speed);
                                let duration_ms = pipeline.media().duration_ms;
                                g.pipeline = Some(pipeline);
                                g.state = LifecycleState::Prepared;
                                events.push(PlayerEvent::with_args(
                                    EventKind::StateChanged,
                                    i64::from(LifecycleState::Prepared.code()),
                                    0,
                                ));
                                events.push(PlayerEvent::with_args(
                                    EventKind::Prepared,
                                    duration_ms.unwrap_or(-1),
                                    0,
                                ));
                                if config.start_on_prepared {
                                    g.pipeline.as_mut().unwrap().set_paused(false);
                                    g.state = LifecycleState::Started;
                                    events.push(PlayerEvent::with_args(
                                        EventKind::StateChanged,
                                        i64::from(LifecycleState::Started.code()),
                                        0,
                                    ));
                                }
                                return;
                            }
                            Err(e) => {
                                tracing::error!("prepare failed: {e}");
                                g.state = LifecycleState::Error;
                                events.push(PlayerEvent::with_args(
                                    EventKind::StateChanged,
                                    i64::from(LifecycleState::Error.code()),
                                    0,
                                ));
                                Notifier::new(events.clone()).error(&e);
                                return;
                            }
                        }
                    }
                }
                // Superseded by reset/stop: the built pipeline (if any) is
                // torn down outside the facade lock.
                if let Ok(mut pipeline) = result {
                    pipeline.teardown();
                }
            })
            .expect("spawn prepare thread");
        Ok(())
    }

    pub fn start(&self) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        match g.state {
            LifecycleState::Started => Ok(()),
            LifecycleState::Prepared | LifecycleState::Paused => {
                if let Some(pipeline) = g.pipeline.as_mut() {
                    pipeline.set_paused(false);
                }
                self.transition(&mut g, LifecycleState::Started);
                Ok(())
            }
            LifecycleState::Completed => {
                // Replay from the top.
                if let Some(pipeline) = g.pipeline.as_mut() {
                    pipeline.seek(0, false);
                    pipeline.set_paused(false);
                }
                self.transition(&mut g, LifecycleState::Started);
                Ok(())
            }
            state => Err(PlayerError::InvalidState(state)),
        }
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        match g.state {
            LifecycleState::Paused => Ok(()),
            LifecycleState::Started => {
                if let Some(pipeline) = g.pipeline.as_mut() {
                    pipeline.set_paused(true);
                }
                self.transition(&mut g, LifecycleState::Paused);
                Ok(())
            }
            state => Err(PlayerError::InvalidState(state)),
        }
    }

    /// Stage a seek; completion surfaces as `SeekComplete` (and, when the
    /// accurate protocol is armed, `AccurateSeekComplete`).
    pub fn seek_to(&self, target_ms: i64, accurate: bool) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        match g.state {
            LifecycleState::Prepared
            | LifecycleState::Started
            | LifecycleState::Paused
            | LifecycleState::Completed => {
                let Some(pipeline) = g.pipeline.as_ref() else {
                    return Err(PlayerError::InvalidState(g.state));
                };
                pipeline.seek(target_ms.max(0), accurate);
                if g.state == LifecycleState::Completed {
                    self.transition(&mut g, LifecycleState::Paused);
                }
                Ok(())
            }
            state => Err(PlayerError::InvalidState(state)),
        }
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), PlayerError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PlayerError::Unsupported(format!("speed {speed}")));
        }
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        let speed = speed.clamp(0.25, 4.0);
        g.speed = speed;
        if let Some(pipeline) = g.pipeline.as_ref() {
            pipeline.set_speed(speed);
        }
        Ok(())
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        g.volume = volume.clamp(0.0, 1.0);
        if let Some(pipeline) = g.pipeline.as_ref() {
            pipeline.shared().set_volume(g.volume);
        }
        Ok(())
    }

    pub fn set_mute(&self, muted: bool) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        g.muted = muted;
        if let Some(pipeline) = g.pipeline.as_ref() {
            pipeline.shared().muted.store(muted, Ordering::Release);
        }
        Ok(())
    }

    pub fn set_surface(&self, surface: Option<SurfaceHandle>) -> Result<(), PlayerError> {
        let mut g = self.inner.lock().unwrap();
        g.ensure_live()?;
        g.surface = surface;
        if let Some(pipeline) = g.pipeline.as_ref() {
            pipeline.set_surface(surface);
        }
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().unwrap().state
    }

    pub fn duration_ms(&self) -> Option<i64> {
        let g = self.inner.lock().unwrap();
        g.pipeline.as_ref().and_then(|p| p.media().duration_ms)
    }

    /// Current position: the staged target while a seek is pending, then the
    /// master clock, then the last position observed.
    pub fn current_position_ms(&self) -> i64 {
        let mut g = self.inner.lock().unwrap();
        if let Some(position) = g.pipeline.as_ref().and_then(Pipeline::position_ms) {
            g.last_position_ms = position;
        }
        g.last_position_ms
    }

    pub fn status_snapshot(&self) -> PlayerStatus {
        let mut g = self.inner.lock().unwrap();
        let mut status = PlayerStatus {
            state: g.state,
            duration_ms: None,
            position_ms: None,
            speed: g.speed,
            volume: g.volume,
            muted: g.muted,
            ..PlayerStatus::default()
        };
        let g = &mut *g;
        let Some(pipeline) = g.pipeline.as_ref() else {
            return status;
        };
        let shared = pipeline.shared();
        status.position_ms = pipeline.position_ms();
        if let Some(position) = status.position_ms {
            g.last_position_ms = position;
        }
        status.duration_ms = pipeline.media().duration_ms;
        status.buffering = shared.buffering.load(Ordering::Acquire);
        status.buffer_percent = shared.buffer_percent.load(Ordering::Relaxed);
        status.audio_buffered_ms = shared.audio_buffered_ms.load(Ordering::Relaxed);
        status.video_buffered_ms = shared.video_buffered_ms.load(Ordering::Relaxed);
        status.buffered_bytes = shared.buffered_bytes.load(Ordering::Relaxed);
        status.dropped_frames = shared.dropped_frames.load(Ordering::Relaxed);
        status.stale_discards = shared.stale_discards.load(Ordering::Relaxed);
        status.underruns = shared.underruns.load(Ordering::Relaxed);
        status.late_frames = shared.late_frames.load(Ordering::Relaxed);
        status.loops_remaining = match pipeline.config().loop_count {
            0 => None,
            n => Some(n),
        };
        status.decoders = shared.decoder_infos();
        status.source = shared.source_stats();
        status
    }

    /// Poll the next event, applying lifecycle updates as it passes through.
    pub fn poll_event(&self, timeout: Duration) -> Option<PlayerEvent> {
        let event = self.events.poll(timeout)?;
        let mut dead_pipeline = None;
        {
            let mut g = self.inner.lock().unwrap();
            match event.kind {
                EventKind::Completed => {
                    if matches!(g.state, LifecycleState::Started | LifecycleState::Paused) {
                        if let Some(pipeline) = g.pipeline.as_mut() {
                            pipeline.set_paused(true);
                        }
                        self.transition(&mut g, LifecycleState::Completed);
                    }
                }
                EventKind::Error => {
                    if !matches!(
                        g.state,
                        LifecycleState::Idle | LifecycleState::Stopped | LifecycleState::Error
                    ) {
                        dead_pipeline = g.pipeline.take();
                        self.transition(&mut g, LifecycleState::Error);
                    }
                }
                EventKind::SeekComplete => {
                    g.last_position_ms = event.arg1;
                }
                _ => {}
            }
        }
        if let Some(mut pipeline) = dead_pipeline {
            pipeline.teardown();
        }
        Some(event)
    }

    /// Tear the pipeline down and end the session. A stopped player can only
    /// be `reset`.
    pub fn stop(&self) -> Result<(), PlayerError> {
        let pipeline = {
            let mut g = self.inner.lock().unwrap();
            g.ensure_live()?;
            match g.state {
                LifecycleState::Idle | LifecycleState::Stopped => {
                    return Err(PlayerError::InvalidState(g.state));
                }
                _ => {}
            }
            g.epoch += 1;
            let pipeline = g.pipeline.take();
            self.transition(&mut g, LifecycleState::Stopped);
            pipeline
        };
        if let Some(mut pipeline) = pipeline {
            pipeline.teardown();
        }
        Ok(())
    }

    /// Return to `Idle`, dropping the source, config, and queued events.
    pub fn reset(&self) -> Result<(), PlayerError> {
        let pipeline = {
            let mut g = self.inner.lock().unwrap();
            g.ensure_live()?;
            g.epoch += 1;
            g.url = None;
            g.table.clear();
            g.surface = None;
            g.volume = 1.0;
            g.muted = false;
            g.speed = 1.0;
            g.last_position_ms = 0;
            g.state = LifecycleState::Idle;
            g.pipeline.take()
        };
        self.events.clear();
        if let Some(mut pipeline) = pipeline {
            pipeline.teardown();
        }
        Ok(())
    }

    /// Terminal: tear everything down and close the event queue. Every later
    /// call returns the invalid-state error.
    pub fn release(&self) {
        let pipeline = {
            let mut g = self.inner.lock().unwrap();
            if g.released {
                return;
            }
            g.released = true;
            g.epoch += 1;
            g.state = LifecycleState::Stopped;
            g.pipeline.take()
        };
        if let Some(mut pipeline) = pipeline {
            pipeline.teardown();
        }
        self.events.close();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.release();
    }
}
