//! Inter-stage queues.
//!
//! `PacketQueue` sits between the read thread and one decode processor:
//! unbounded but byte- and duration-accounted, with flush and EOF markers
//! traveling in band so generation boundaries stay ordered with the data.
//! `FrameQueue` sits between a decode processor and a render scheduler:
//! fixed capacity, blocking on both ends, with an abort path that never
//! strands a waiter.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::frame::{NO_PTS, Packet};

/// In-band packet queue entry.
#[derive(Debug)]
pub enum PacketEntry {
    Data(Packet),
    /// Generation boundary. Decoders flush and adopt the carried serial.
    Flush { serial: u64 },
    /// End of stream for the carried generation.
    Eof { serial: u64 },
}

/// Outcome of a timed packet pop.
#[derive(Debug)]
pub enum PacketPop {
    Entry(PacketEntry),
    Timeout,
    Aborted,
}

struct PacketInner {
    entries: VecDeque<PacketEntry>,
    bytes: u64,
    duration_ms: i64,
    serial: u64,
    aborted: bool,
}

/// Unbounded, accounted packet queue with in-band markers.
pub struct PacketQueue {
    inner: Mutex<PacketInner>,
    cv: Condvar,
}

/// Duration a data packet contributes to the queue accounting.
fn accounted_ms(packet: &Packet) -> i64 {
    if packet.duration_ms == NO_PTS {
        0
    } else {
        packet.duration_ms.max(0)
    }
}

impl PacketQueue {
    pub fn new(serial: u64) -> Self {
        PacketQueue {
            inner: Mutex::new(PacketInner {
                entries: VecDeque::new(),
                bytes: 0,
                duration_ms: 0,
                serial,
                aborted: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Enqueue a data packet stamped with the current serial. Never blocks.
    /// Returns `false` once the queue is aborted.
    pub fn push(&self, mut packet: Packet) -> bool {
        let mut g = self.inner.lock().unwrap();
        if g.aborted {
            return false;
        }
        packet.serial = g.serial;
        g.bytes += packet.size() as u64;
        g.duration_ms += accounted_ms(&packet);
        g.entries.push_back(PacketEntry::Data(packet));
        self.cv.notify_one();
        true
    }

    /// Append a flush marker and adopt `serial` as the current generation.
    pub fn push_flush(&self, serial: u64) {
        let mut g = self.inner.lock().unwrap();
        g.serial = serial;
        g.entries.push_back(PacketEntry::Flush { serial });
        self.cv.notify_one();
    }

    /// Append an EOF marker for the current generation.
    pub fn push_eof(&self) {
        let mut g = self.inner.lock().unwrap();
        let serial = g.serial;
        g.entries.push_back(PacketEntry::Eof { serial });
        self.cv.notify_one();
    }

    /// Pop the next entry, blocking up to `timeout` while empty.
    pub fn pop(&self, timeout: Duration) -> PacketPop {
        let mut g = self.inner.lock().unwrap();
        let mut timed_out = false;
        loop {
            if g.aborted {
                return PacketPop::Aborted;
            }
            if let Some(entry) = g.entries.pop_front() {
                if let PacketEntry::Data(packet) = &entry {
                    g.bytes = g.bytes.saturating_sub(packet.size() as u64);
                    g.duration_ms = (g.duration_ms - accounted_ms(packet)).max(0);
                }
                return PacketPop::Entry(entry);
            }
            if timed_out {
                return PacketPop::Timeout;
            }
            let (guard, res) = self.cv.wait_timeout(g, timeout).unwrap();
            g = guard;
            timed_out = res.timed_out();
        }
    }

    /// Drop all data and EOF entries. Flush markers already in the queue are
    /// preserved in order, so downstream flush detection never misses one.
    /// Returns the number of entries removed.
    pub fn flush(&self) -> usize {
        let mut g = self.inner.lock().unwrap();
        let drained: Vec<PacketEntry> = g.entries.drain(..).collect();
        let mut removed = 0;
        for entry in drained {
            match entry {
                PacketEntry::Flush { serial } => g.entries.push_back(PacketEntry::Flush { serial }),
                _ => removed += 1,
            }
        }
        g.bytes = 0;
        g.duration_ms = 0;
        removed
    }

    /// `true` when the next entry is a flush marker.
    pub fn front_is_flush(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().entries.front(),
            Some(PacketEntry::Flush { .. })
        )
    }

    /// Abort the queue: wake all waiters, drop subsequent pushes. Idempotent.
    pub fn abort(&self) {
        let mut g = self.inner.lock().unwrap();
        g.aborted = true;
        self.cv.notify_all();
    }

    /// Reactivate after an abort, adopting `serial`.
    pub fn start(&self, serial: u64) {
        let mut g = self.inner.lock().unwrap();
        g.aborted = false;
        g.serial = serial;
    }

    pub fn serial(&self) -> u64 {
        self.inner.lock().unwrap().serial
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted payload bytes currently queued.
    pub fn bytes(&self) -> u64 {
        self.inner.lock().unwrap().bytes
    }

    /// Accounted payload duration currently queued, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.inner.lock().unwrap().duration_ms
    }

    fn marker_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| matches!(e, PacketEntry::Flush { .. }))
            .count()
    }
}

/// Outcome of a timed frame push.
#[derive(Debug)]
pub enum FramePush<T> {
    Pushed,
    /// Queue stayed full; the frame is handed back for retry.
    Timeout(T),
    Aborted,
}

/// Outcome of a timed frame pop.
#[derive(Debug)]
pub enum FramePop<T> {
    Frame(T),
    /// Released by a one-shot `wakeup` with no frame available.
    Wakeup,
    Timeout,
    Aborted,
}

struct FrameInner<T> {
    frames: VecDeque<T>,
    wakeup_pending: bool,
    aborted: bool,
}

/// Bounded frame queue between a decode processor and a render scheduler.
pub struct FrameQueue<T> {
    capacity: usize,
    inner: Mutex<FrameInner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        FrameQueue {
            capacity: capacity.max(1),
            inner: Mutex::new(FrameInner {
                frames: VecDeque::new(),
                wakeup_pending: false,
                aborted: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Push a frame, blocking up to `timeout` while the queue is full.
    pub fn push(&self, frame: T, timeout: Duration) -> FramePush<T> {
        let mut g = self.inner.lock().unwrap();
        let mut timed_out = false;
        loop {
            if g.aborted {
                return FramePush::Aborted;
            }
            if g.frames.len() < self.capacity {
                g.frames.push_back(frame);
                self.not_empty.notify_one();
                return FramePush::Pushed;
            }
            if timed_out {
                return FramePush::Timeout(frame);
            }
            let (guard, res) = self.not_full.wait_timeout(g, timeout).unwrap();
            g = guard;
            timed_out = res.timed_out();
        }
    }

    /// Pop a frame, blocking up to `timeout` while the queue is empty.
    pub fn pop(&self, timeout: Duration) -> FramePop<T> {
        let mut g = self.inner.lock().unwrap();
        let mut timed_out = false;
        loop {
            if g.aborted {
                return FramePop::Aborted;
            }
            if let Some(frame) = g.frames.pop_front() {
                self.not_full.notify_one();
                return FramePop::Frame(frame);
            }
            if g.wakeup_pending {
                g.wakeup_pending = false;
                return FramePop::Wakeup;
            }
            if timed_out {
                return FramePop::Timeout;
            }
            let (guard, res) = self.not_empty.wait_timeout(g, timeout).unwrap();
            g = guard;
            timed_out = res.timed_out();
        }
    }

    /// Release exactly one blocked popper without delivering a frame.
    pub fn wakeup(&self) {
        let mut g = self.inner.lock().unwrap();
        g.wakeup_pending = true;
        self.not_empty.notify_one();
    }

    /// Drop every queued frame (their storage is released on drop).
    pub fn flush(&self) {
        let mut g = self.inner.lock().unwrap();
        g.frames.clear();
        self.not_full.notify_all();
    }

    /// Abort both directions. Idempotent.
    pub fn abort(&self) {
        let mut g = self.inner.lock().unwrap();
        g.aborted = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Reactivate after an abort.
    pub fn start(&self) {
        let mut g = self.inner.lock().unwrap();
        g.aborted = false;
        g.wakeup_pending = false;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use player_types::TrackKind;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn packet(pts_ms: i64, bytes: usize) -> Packet {
        let mut p = Packet::new(TrackKind::Audio, vec![0u8; bytes], pts_ms);
        p.duration_ms = 20;
        p
    }

    #[test]
    fn push_stamps_current_serial() {
        let q = PacketQueue::new(1);
        q.push(packet(0, 4));
        q.push_flush(2);
        q.push(packet(20, 4));

        match q.pop(Duration::from_millis(10)) {
            PacketPop::Entry(PacketEntry::Data(p)) => assert_eq!(p.serial, 1),
            other => panic!("unexpected {other:?}"),
        }
        match q.pop(Duration::from_millis(10)) {
            PacketPop::Entry(PacketEntry::Flush { serial }) => assert_eq!(serial, 2),
            other => panic!("unexpected {other:?}"),
        }
        match q.pop(Duration::from_millis(10)) {
            PacketPop::Entry(PacketEntry::Data(p)) => assert_eq!(p.serial, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn accounting_tracks_bytes_and_duration() {
        let q = PacketQueue::new(1);
        q.push(packet(0, 100));
        q.push(packet(20, 50));
        assert_eq!(q.bytes(), 150);
        assert_eq!(q.duration_ms(), 40);

        let _ = q.pop(Duration::from_millis(10));
        assert_eq!(q.bytes(), 50);
        assert_eq!(q.duration_ms(), 20);

        q.flush();
        assert_eq!(q.bytes(), 0);
        assert_eq!(q.duration_ms(), 0);
    }

    #[test]
    fn flush_preserves_markers() {
        let q = PacketQueue::new(1);
        q.push(packet(0, 8));
        q.push_flush(2);
        q.push(packet(0, 8));
        q.push_flush(3);
        q.push(packet(0, 8));
        q.push_eof();
        assert_eq!(q.marker_count(), 2);

        for _ in 0..3 {
            q.flush();
            assert_eq!(q.marker_count(), 2);
        }
        assert_eq!(q.len(), 2);
        assert!(q.front_is_flush());
    }

    #[test]
    fn pop_times_out_on_empty() {
        let q = PacketQueue::new(1);
        match q.pop(Duration::from_millis(20)) {
            PacketPop::Timeout => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn abort_unblocks_popper_and_rejects_push() {
        let q = Arc::new(PacketQueue::new(1));
        let ready = Arc::new(Barrier::new(2));

        let q2 = q.clone();
        let ready2 = ready.clone();
        let popper = thread::spawn(move || {
            ready2.wait();
            q2.pop(Duration::from_secs(5))
        });

        ready.wait();
        thread::sleep(Duration::from_millis(20));
        q.abort();
        q.abort();

        match popper.join().unwrap() {
            PacketPop::Aborted => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(!q.push(packet(0, 4)));

        q.start(5);
        assert!(q.push(packet(0, 4)));
        assert_eq!(q.serial(), 5);
    }

    #[test]
    fn frame_queue_never_exceeds_capacity() {
        let q = Arc::new(FrameQueue::new(3));
        let start = Arc::new(Barrier::new(3));

        let producer = {
            let q = q.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for i in 0..200 {
                    let mut frame = i;
                    loop {
                        match q.push(frame, Duration::from_millis(50)) {
                            FramePush::Pushed => break,
                            FramePush::Timeout(f) => frame = f,
                            FramePush::Aborted => return,
                        }
                    }
                }
            })
        };

        let watcher = {
            let q = q.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..500 {
                    assert!(q.len() <= q.capacity());
                    thread::yield_now();
                }
            })
        };

        start.wait();
        let mut received = 0;
        while received < 200 {
            match q.pop(Duration::from_millis(100)) {
                FramePop::Frame(_) => received += 1,
                FramePop::Timeout => {}
                other => panic!("unexpected {other:?}"),
            }
        }

        producer.join().unwrap();
        watcher.join().unwrap();
    }

    #[test]
    fn wakeup_releases_one_popper() {
        let q: Arc<FrameQueue<u32>> = Arc::new(FrameQueue::new(2));
        let start = Arc::new(Barrier::new(3));

        let mut poppers = Vec::new();
        for _ in 0..2 {
            let q = q.clone();
            let start = start.clone();
            poppers.push(thread::spawn(move || {
                start.wait();
                q.pop(Duration::from_millis(400))
            }));
        }

        start.wait();
        thread::sleep(Duration::from_millis(50));
        q.wakeup();

        let mut wakeups = 0;
        let mut timeouts = 0;
        for popper in poppers {
            match popper.join().unwrap() {
                FramePop::Wakeup => wakeups += 1,
                FramePop::Timeout => timeouts += 1,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(wakeups, 1);
        assert_eq!(timeouts, 1);
    }

    #[test]
    fn frame_queue_abort_unblocks_both_sides() {
        let q: Arc<FrameQueue<u32>> = Arc::new(FrameQueue::new(1));
        assert!(matches!(
            q.push(1, Duration::from_millis(10)),
            FramePush::Pushed
        ));

        let pusher = {
            let q = q.clone();
            thread::spawn(move || q.push(2, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        q.abort();
        assert!(matches!(pusher.join().unwrap(), FramePush::Aborted));
        assert!(matches!(q.pop(Duration::from_millis(10)), FramePop::Aborted));
    }
}
