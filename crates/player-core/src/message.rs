//! Host-facing event queue.
//!
//! Stage threads publish through a cloneable [`Notifier`]; the host drains
//! [`PlayerEvent`]s from the shared [`EventQueue`] on its own dispatch
//! thread. Plain `VecDeque` under a mutex: no pooling, no callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use player_types::{EventDetail, EventKind, PlayerError, PlayerEvent};

struct EventInner {
    events: VecDeque<PlayerEvent>,
    closed: bool,
}

pub struct EventQueue {
    inner: Mutex<EventInner>,
    cv: Condvar,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(EventQueue {
            inner: Mutex::new(EventInner {
                events: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        })
    }

    pub fn push(&self, event: PlayerEvent) {
        let mut g = self.inner.lock().unwrap();
        if g.closed {
            return;
        }
        g.events.push_back(event);
        self.cv.notify_one();
    }

    /// Pop the next event, blocking up to `timeout`. Returns `None` on
    /// timeout, or immediately once the queue is closed and drained.
    pub fn poll(&self, timeout: Duration) -> Option<PlayerEvent> {
        let mut g = self.inner.lock().unwrap();
        let mut timed_out = false;
        loop {
            if let Some(event) = g.events.pop_front() {
                return Some(event);
            }
            if g.closed || timed_out {
                return None;
            }
            let (guard, res) = self.cv.wait_timeout(g, timeout).unwrap();
            g = guard;
            timed_out = res.timed_out();
        }
    }

    /// Discard queued events without closing.
    pub fn clear(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    /// Stop accepting events and release pollers. Idempotent.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        self.cv.notify_all();
    }

    /// Reopen after a close (facade reset reuses the queue).
    pub fn reopen(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = false;
        g.events.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Publishing handle given to every stage.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<EventQueue>,
    fatal_sent: Arc<AtomicBool>,
}

impl Notifier {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Notifier {
            queue,
            fatal_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn event(&self, kind: EventKind) {
        self.queue.push(PlayerEvent::new(kind));
    }

    pub fn with_args(&self, kind: EventKind, arg1: i64, arg2: i64) {
        self.queue.push(PlayerEvent::with_args(kind, arg1, arg2));
    }

    pub fn with_detail(&self, kind: EventKind, arg1: i64, arg2: i64, detail: EventDetail) {
        self.queue.push(PlayerEvent {
            kind,
            arg1,
            arg2,
            detail: Some(detail),
        });
    }

    /// Publish an error event carrying the stable code and cause text.
    pub fn error(&self, err: &PlayerError) {
        self.with_detail(
            EventKind::Error,
            i64::from(err.code()),
            0,
            EventDetail::Text(err.to_string()),
        );
    }

    /// Publish an error event at most once per pipeline run. Later fatal
    /// reports from other stages are logged and swallowed.
    pub fn fatal(&self, err: &PlayerError) {
        if self.fatal_sent.swap(true, Ordering::AcqRel) {
            tracing::debug!(code = err.code(), "suppressed duplicate fatal: {err}");
            return;
        }
        self.error(err);
    }
}
