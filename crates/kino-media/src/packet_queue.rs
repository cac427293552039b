// crates/kino-media/src/packet_queue.rs
//
// Thread-safe FIFO of demuxed packets shared between the reader and one
// decoder worker. Every entry is stamped with the queue's serial at enqueue
// time; inserting the Flush sentinel bumps the serial first, so anything
// queued after a flush is recognizably from the new epoch and in-flight
// work keyed to the old serial can be discarded.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use ffmpeg_the_third as ffmpeg;

/// One slot of a packet queue: a real demuxed packet, the in-band flush
/// sentinel ("codec state invalid, reset"), or the null packet ("no more
/// input for this stream, drain the decoder").
pub enum QueuedPacket {
    Packet(ffmpeg::Packet),
    Flush,
    Null { stream_index: usize },
}

impl QueuedPacket {
    fn payload_size(&self) -> usize {
        match self {
            QueuedPacket::Packet(p) => p.size(),
            _ => 0,
        }
    }

    fn duration(&self) -> i64 {
        match self {
            QueuedPacket::Packet(p) => p.duration(),
            _ => 0,
        }
    }
}

/// Outcome of a `get`.
pub enum PacketGet {
    /// A packet and the serial it was stamped with.
    Packet(QueuedPacket, i32),
    /// Queue empty and the caller asked not to block.
    Empty,
    /// The queue was aborted while getting.
    Aborted,
}

struct Entry {
    pkt: QueuedPacket,
    serial: i32,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Entry>,
    /// Payload bytes plus per-entry overhead.
    size: usize,
    /// Summed packet duration, in the stream's timebase.
    duration: i64,
}

/// Counters mirrored out of the lock for backpressure and the status line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub nb_packets: usize,
    pub size: usize,
    pub duration: i64,
}

pub struct PacketQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    /// Epoch counter; written under the mutex, readable lock-free by the
    /// clocks, frame queues and decoders observing this queue.
    serial: Arc<AtomicI32>,
    abort: Arc<AtomicBool>,
}

impl PacketQueue {
    /// A new queue starts aborted; `start` arms it.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cond: Condvar::new(),
            serial: Arc::new(AtomicI32::new(0)),
            abort: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn serial(&self) -> i32 {
        self.serial.load(Ordering::Relaxed)
    }

    /// Shared handle for collaborators that key off this queue's epoch.
    pub fn serial_handle(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.serial)
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            nb_packets: inner.queue.len(),
            size: inner.size,
            duration: inner.duration,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().queue.is_empty()
    }

    /// Append a packet. Fails (dropping the packet) if the queue is aborted.
    /// Putting `Flush` increments the serial before the entry is stamped.
    pub fn put(&self, pkt: QueuedPacket) -> Result<(), ()> {
        let mut inner = self.inner.lock().unwrap();
        if self.abort.load(Ordering::Relaxed) {
            return Err(());
        }

        if matches!(pkt, QueuedPacket::Flush) {
            self.serial.fetch_add(1, Ordering::Relaxed);
        }

        inner.size += pkt.payload_size() + mem::size_of::<Entry>();
        inner.duration += pkt.duration();
        inner.queue.push_back(Entry {
            serial: self.serial.load(Ordering::Relaxed),
            pkt,
        });

        self.cond.notify_one();
        Ok(())
    }

    /// Enqueue the decoder-drain signal for `stream_index`.
    pub fn put_null(&self, stream_index: usize) -> Result<(), ()> {
        self.put(QueuedPacket::Null { stream_index })
    }

    /// Pop the head packet, waiting when empty if `block`.
    pub fn get(&self, block: bool) -> PacketGet {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if self.abort.load(Ordering::Relaxed) {
                return PacketGet::Aborted;
            }
            if let Some(entry) = inner.queue.pop_front() {
                inner.size -= entry.pkt.payload_size() + mem::size_of::<Entry>();
                inner.duration -= entry.pkt.duration();
                return PacketGet::Packet(entry.pkt, entry.serial);
            }
            if !block {
                return PacketGet::Empty;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Release every packet and reset the counters. The serial is NOT
    /// touched here; the reader follows a flush with a Flush sentinel,
    /// which is what advances the epoch.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.size = 0;
        inner.duration = 0;
    }

    /// Arm the queue: clear abort and open a fresh epoch.
    pub fn start(&self) {
        {
            let _inner = self.inner.lock().unwrap();
            self.abort.store(false, Ordering::Relaxed);
        }
        let _ = self.put(QueuedPacket::Flush);
    }

    /// Raise abort and wake every waiter. The queue stays inspectable but
    /// accepts no new work until restarted.
    pub fn abort(&self) {
        let _inner = self.inner.lock().unwrap();
        self.abort.store(true, Ordering::Relaxed);
        self.cond.notify_all();
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn starts_aborted_and_put_fails() {
        let q = PacketQueue::new();
        assert!(q.is_aborted());
        assert!(q.put_null(0).is_err());
        assert_eq!(q.stats().nb_packets, 0);
    }

    #[test]
    fn flush_sentinel_bumps_serial_before_stamping() {
        let q = PacketQueue::new();
        q.start(); // serial 0 -> 1
        assert_eq!(q.serial(), 1);

        q.put_null(0).unwrap();
        q.put(QueuedPacket::Flush).unwrap(); // -> 2
        q.put_null(0).unwrap();
        assert_eq!(q.serial(), 2);

        // The start-flush itself is stamped with the new epoch.
        match q.get(false) {
            PacketGet::Packet(QueuedPacket::Flush, serial) => assert_eq!(serial, 1),
            _ => panic!("expected the start flush"),
        }
        match q.get(false) {
            PacketGet::Packet(QueuedPacket::Null { .. }, serial) => assert_eq!(serial, 1),
            _ => panic!("expected pre-flush null"),
        }
        match q.get(false) {
            PacketGet::Packet(QueuedPacket::Flush, serial) => assert_eq!(serial, 2),
            _ => panic!("expected flush"),
        }
        match q.get(false) {
            PacketGet::Packet(QueuedPacket::Null { .. }, serial) => assert_eq!(serial, 2),
            _ => panic!("expected post-flush null"),
        }
    }

    #[test]
    fn serial_counts_flushes() {
        let q = PacketQueue::new();
        q.start();
        let initial = q.serial();
        for _ in 0..5 {
            q.put(QueuedPacket::Flush).unwrap();
        }
        assert_eq!(q.serial(), initial + 5);
    }

    #[test]
    fn counters_track_contents() {
        let q = PacketQueue::new();
        q.start();
        let empty_after_start = q.stats();
        q.put_null(3).unwrap();
        let with_null = q.stats();
        assert_eq!(with_null.nb_packets, empty_after_start.nb_packets + 1);
        assert!(with_null.size > empty_after_start.size);

        q.flush();
        let flushed = q.stats();
        assert_eq!(flushed.nb_packets, 0);
        assert_eq!(flushed.size, 0);
        assert_eq!(flushed.duration, 0);
        // Flushing alone never advances the epoch.
        assert_eq!(q.serial(), 1);
    }

    #[test]
    fn nonblocking_get_on_empty_returns_empty() {
        let q = PacketQueue::new();
        q.start();
        let _ = q.get(false); // start flush
        assert!(matches!(q.get(false), PacketGet::Empty));
    }

    #[test]
    fn abort_wakes_blocked_getter() {
        let q = Arc::new(PacketQueue::new());
        q.start();
        let _ = q.get(false); // drain the start flush

        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.get(true));

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        q.abort();
        assert!(matches!(handle.join().unwrap(), PacketGet::Aborted));
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
