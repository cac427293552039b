// crates/kino-media/src/frame_queue.rs
//
// Bounded ring of decoded frames between one decoder worker and one
// renderer. In keep-last mode the most recently consumed frame stays
// readable at the read index ("peek last") until the following frame is
// retired, which lets the renderer redraw after a resize without holding
// an extra copy.
//
// The queue observes its producer PacketQueue's abort flag and serial
// through shared atomics; it never owns the packet queue.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use kino_core::config::FRAME_QUEUE_SIZE;

use crate::packet_queue::PacketQueue;

/// Implemented by the entry types queued here; the serial ties an entry to
/// a packet-queue epoch, the byte position feeds byte-mode seeking.
pub trait QueuedFrame: Send + Sync {
    fn serial(&self) -> i32;

    fn byte_pos(&self) -> i64 {
        -1
    }
}

struct Ring<T> {
    slots: Vec<Option<Arc<T>>>,
    rindex: usize,
    windex: usize,
    size: usize,
    /// 1 once the keep-last slot has been handed out; folded into every
    /// read-side index computation.
    rindex_shown: usize,
}

pub struct FrameQueue<T> {
    inner: Mutex<Ring<T>>,
    cond: Condvar,
    pkt_serial: Arc<AtomicI32>,
    pkt_abort: Arc<AtomicBool>,
    max_size: usize,
    keep_last: bool,
}

impl<T: QueuedFrame> FrameQueue<T> {
    pub fn new(pktq: &PacketQueue, max_size: usize, keep_last: bool) -> Self {
        let max_size = max_size.min(FRAME_QUEUE_SIZE);
        Self {
            inner: Mutex::new(Ring {
                slots: (0..max_size).map(|_| None).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
            }),
            cond: Condvar::new(),
            pkt_serial: pktq.serial_handle(),
            pkt_abort: pktq.abort_handle(),
            max_size,
            keep_last,
        }
    }

    fn aborted(&self) -> bool {
        self.pkt_abort.load(Ordering::Relaxed)
    }

    /// Wake every waiter so they can observe an abort.
    pub fn signal(&self) {
        let _inner = self.inner.lock().unwrap();
        self.cond.notify_all();
    }

    /// Block until a slot is free, then enqueue. Errs when the producer
    /// queue aborts while waiting.
    pub fn push(&self, frame: T) -> Result<(), ()> {
        let mut inner = self.inner.lock().unwrap();
        while inner.size >= self.max_size && !self.aborted() {
            inner = self.cond.wait(inner).unwrap();
        }
        if self.aborted() {
            return Err(());
        }

        let windex = inner.windex;
        inner.slots[windex] = Some(Arc::new(frame));
        inner.windex = (windex + 1) % self.max_size;
        inner.size += 1;
        self.cond.notify_all();
        Ok(())
    }

    /// Block until an undisplayed frame is available and return it.
    pub fn peek_readable(&self) -> Option<Arc<T>> {
        let mut inner = self.inner.lock().unwrap();
        while inner.size <= inner.rindex_shown && !self.aborted() {
            inner = self.cond.wait(inner).unwrap();
        }
        if self.aborted() {
            return None;
        }
        let idx = (inner.rindex + inner.rindex_shown) % self.max_size;
        inner.slots[idx].clone()
    }

    /// The frame `next` would act on, without blocking.
    pub fn peek(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock().unwrap();
        inner.slots[(inner.rindex + inner.rindex_shown) % self.max_size].clone()
    }

    /// The frame after that, for duration estimation and late-drop checks.
    pub fn peek_next(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock().unwrap();
        inner.slots[(inner.rindex + inner.rindex_shown + 1) % self.max_size].clone()
    }

    /// The last frame handed out, the one currently on screen.
    pub fn peek_last(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock().unwrap();
        inner.slots[inner.rindex].clone()
    }

    /// Like `peek_last`, but only once a frame has actually been shown.
    pub fn last_shown(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock().unwrap();
        if inner.rindex_shown == 0 {
            return None;
        }
        inner.slots[inner.rindex].clone()
    }

    /// Consume the current frame. In keep-last mode the first call only
    /// marks the slot as shown; later calls retire the shown slot and
    /// advance.
    pub fn next(&self) {
        let mut inner = self.inner.lock().unwrap();
        if self.keep_last && inner.rindex_shown == 0 {
            inner.rindex_shown = 1;
            return;
        }
        if inner.size == 0 {
            return;
        }
        let rindex = inner.rindex;
        inner.slots[rindex] = None;
        inner.rindex = (rindex + 1) % self.max_size;
        inner.size -= 1;
        self.cond.notify_all();
    }

    /// Frames queued and not yet displayed.
    pub fn nb_remaining(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.size - inner.rindex_shown
    }

    /// Byte position of the frame on screen, if it belongs to the current
    /// packet-queue epoch. Feeds byte-mode seeking.
    pub fn last_shown_pos(&self) -> i64 {
        let inner = self.inner.lock().unwrap();
        if inner.rindex_shown == 0 {
            return -1;
        }
        match &inner.slots[inner.rindex] {
            Some(f) if f.serial() == self.pkt_serial.load(Ordering::Relaxed) => f.byte_pos(),
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    struct Stub {
        n: i64,
        serial: i32,
    }

    impl QueuedFrame for Stub {
        fn serial(&self) -> i32 {
            self.serial
        }

        fn byte_pos(&self) -> i64 {
            self.n
        }
    }

    fn armed_queue(max_size: usize, keep_last: bool) -> (Arc<PacketQueue>, Arc<FrameQueue<Stub>>) {
        let pq = Arc::new(PacketQueue::new());
        pq.start();
        let fq = Arc::new(FrameQueue::new(&pq, max_size, keep_last));
        (pq, fq)
    }

    #[test]
    fn bounded_and_ordered() {
        let (_pq, fq) = armed_queue(3, false);
        for n in 0..3 {
            fq.push(Stub { n, serial: 1 }).unwrap();
        }
        assert_eq!(fq.nb_remaining(), 3);
        for n in 0..3 {
            let f = fq.peek_readable().unwrap();
            assert_eq!(f.n, n);
            fq.next();
        }
        assert_eq!(fq.nb_remaining(), 0);
    }

    #[test]
    fn writer_blocks_when_full_until_reader_advances() {
        let (_pq, fq) = armed_queue(2, false);
        fq.push(Stub { n: 0, serial: 1 }).unwrap();
        fq.push(Stub { n: 1, serial: 1 }).unwrap();

        let fq2 = Arc::clone(&fq);
        let writer = std::thread::spawn(move || {
            let started = Instant::now();
            fq2.push(Stub { n: 2, serial: 1 }).unwrap();
            started.elapsed()
        });

        std::thread::sleep(Duration::from_millis(30));
        fq.peek_readable().unwrap();
        fq.next(); // frees a slot

        let blocked_for = writer.join().unwrap();
        assert!(blocked_for >= Duration::from_millis(20));
        // The freshly pushed frame is observable.
        assert_eq!(fq.nb_remaining(), 2);
    }

    #[test]
    fn keep_last_discipline() {
        let n_frames = 3;
        let (_pq, fq) = armed_queue(3, true);
        for n in 0..n_frames {
            fq.push(Stub { n, serial: 1 }).unwrap();
        }

        // First cycle shows frame 0 but retires nothing.
        assert_eq!(fq.peek_readable().unwrap().n, 0);
        fq.next();
        assert_eq!(fq.peek_last().unwrap().n, 0);
        assert_eq!(fq.nb_remaining(), 2);

        // Subsequent cycles retire the shown slot and advance.
        assert_eq!(fq.peek_readable().unwrap().n, 1);
        fq.next();
        assert_eq!(fq.peek_last().unwrap().n, 1);

        assert_eq!(fq.peek_readable().unwrap().n, 2);
        fq.next();
        // Everything consumed; the last frame is still peekable.
        assert_eq!(fq.nb_remaining(), 0);
        assert_eq!(fq.peek_last().unwrap().n, n_frames - 1);
    }

    #[test]
    fn last_shown_pos_requires_current_serial() {
        let (pq, fq) = armed_queue(3, true);
        assert_eq!(fq.last_shown_pos(), -1);

        fq.push(Stub { n: 7070, serial: pq.serial() }).unwrap();
        fq.peek_readable().unwrap();
        fq.next();
        assert_eq!(fq.last_shown_pos(), 7070);

        // A flush opens a new epoch; the shown frame no longer counts.
        let _ = pq.put(crate::packet_queue::QueuedPacket::Flush);
        assert_eq!(fq.last_shown_pos(), -1);
    }

    #[test]
    fn abort_unblocks_both_sides() {
        let (pq, fq) = armed_queue(1, false);

        let fq2 = Arc::clone(&fq);
        let reader = std::thread::spawn(move || fq2.peek_readable());

        std::thread::sleep(Duration::from_millis(20));
        pq.abort();
        fq.signal();
        assert!(reader.join().unwrap().is_none());

        // Push against an aborted producer fails immediately.
        assert!(fq.push(Stub { n: 0, serial: 0 }).is_err());
    }
}
