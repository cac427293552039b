// crates/kino-core/src/clock.rs
//
// A Clock is a PTS that keeps running between updates: it stores the drift
// against wall time at the last set() and extrapolates linearly at the
// configured speed. A serial stamped at set() time ties the reading to a
// packet-queue epoch; once the queue's serial moves on, the clock reads NaN
// until re-stamped.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::NOSYNC_THRESHOLD;

/// Monotonic wall time in seconds, relative to the first call in the process.
pub fn wall_time() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Which clock the other streams chase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    Audio,
    Video,
    External,
}

impl SyncMode {
    /// Resolve the configured preference against the streams actually open.
    pub fn effective(self, has_audio: bool, has_video: bool) -> SyncMode {
        match self {
            SyncMode::Audio if has_audio => SyncMode::Audio,
            SyncMode::Video if has_video => SyncMode::Video,
            _ => SyncMode::External,
        }
    }
}

#[derive(Clone, Copy)]
struct Cell {
    pts: f64,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    serial: i32,
    paused: bool,
}

pub struct Clock {
    cell: Mutex<Cell>,
    /// Serial of the packet queue this clock is based on. Observation only;
    /// the queue owns the value.
    queue_serial: Arc<AtomicI32>,
    /// The external clock points the handle at its own serial, so it can
    /// only be invalidated by an explicit NaN set.
    own_serial: bool,
}

impl Clock {
    /// A clock tied to a packet queue's serial.
    pub fn new(queue_serial: Arc<AtomicI32>) -> Self {
        let clock = Self {
            cell: Mutex::new(Cell {
                pts: f64::NAN,
                pts_drift: f64::NAN,
                last_updated: wall_time(),
                speed: 1.0,
                serial: -1,
                paused: false,
            }),
            queue_serial,
            own_serial: false,
        };
        clock.set(f64::NAN, -1);
        clock
    }

    /// A clock that tracks its own serial (the external clock).
    pub fn standalone() -> Self {
        let mut clock = Self::new(Arc::new(AtomicI32::new(-1)));
        clock.own_serial = true;
        clock
    }

    pub fn get(&self) -> f64 {
        let cell = self.cell.lock();
        if self.queue_serial.load(Ordering::Relaxed) != cell.serial {
            return f64::NAN;
        }
        if cell.paused {
            cell.pts
        } else {
            let time = wall_time();
            cell.pts_drift + time - (time - cell.last_updated) * (1.0 - cell.speed)
        }
    }

    pub fn set_at(&self, pts: f64, serial: i32, time: f64) {
        let mut cell = self.cell.lock();
        cell.pts = pts;
        cell.last_updated = time;
        cell.pts_drift = pts - time;
        cell.serial = serial;
        if self.own_serial {
            self.queue_serial.store(serial, Ordering::Relaxed);
        }
    }

    pub fn set(&self, pts: f64, serial: i32) {
        self.set_at(pts, serial, wall_time());
    }

    /// Re-stamps at the current reading before switching rate, so get()
    /// is continuous across the change.
    pub fn set_speed(&self, speed: f64) {
        let serial = self.serial();
        self.set(self.get(), serial);
        self.cell.lock().speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.cell.lock().speed
    }

    /// The raw pts of the last set(), without extrapolation.
    pub fn pts(&self) -> f64 {
        self.cell.lock().pts
    }

    pub fn serial(&self) -> i32 {
        self.cell.lock().serial
    }

    pub fn last_updated(&self) -> f64 {
        self.cell.lock().last_updated
    }

    pub fn paused(&self) -> bool {
        self.cell.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.cell.lock().paused = paused;
    }

    /// Adopt the slave's reading when this clock is unset or has drifted
    /// beyond the discontinuity threshold. Used to keep the external clock
    /// tracking whichever media clock leads.
    pub fn sync_to_slave(&self, slave: &Clock) {
        let clock = self.get();
        let slave_clock = slave.get();
        if !slave_clock.is_nan()
            && (clock.is_nan() || (clock - slave_clock).abs() > NOSYNC_THRESHOLD)
        {
            self.set(slave_clock, slave.serial());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_clock(serial: i32) -> (Clock, Arc<AtomicI32>) {
        let qs = Arc::new(AtomicI32::new(serial));
        (Clock::new(Arc::clone(&qs)), qs)
    }

    #[test]
    fn unset_clock_reads_nan() {
        let (clock, _qs) = queue_clock(0);
        assert!(clock.get().is_nan());
    }

    #[test]
    fn stale_serial_reads_nan() {
        let (clock, qs) = queue_clock(3);
        clock.set(10.0, 3);
        assert!(!clock.get().is_nan());
        qs.store(4, Ordering::Relaxed);
        assert!(clock.get().is_nan());
    }

    #[test]
    fn paused_clock_holds_its_pts() {
        let (clock, _qs) = queue_clock(1);
        clock.set(5.0, 1);
        clock.set_paused(true);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(clock.get(), 5.0);
    }

    #[test]
    fn running_clock_advances() {
        let (clock, _qs) = queue_clock(1);
        clock.set(100.0, 1);
        std::thread::sleep(std::time::Duration::from_millis(30));
        let v = clock.get();
        assert!(v > 100.0 && v < 101.0, "got {v}");
    }

    #[test]
    fn speed_change_is_continuous() {
        let (clock, _qs) = queue_clock(1);
        clock.set(42.0, 1);
        let before = clock.get();
        clock.set_speed(0.9);
        let after = clock.get();
        assert!((after - before).abs() < 1e-3, "step of {}", after - before);
    }

    #[test]
    fn standalone_clock_never_goes_stale_by_itself() {
        let clock = Clock::standalone();
        clock.set(1.5, 7);
        assert!(!clock.get().is_nan());
        clock.set(2.5, 8);
        assert!(!clock.get().is_nan());
    }

    #[test]
    fn slave_sync_adopts_when_unset_or_far() {
        let ext = Clock::standalone();
        let (aud, _qs) = queue_clock(2);
        aud.set(30.0, 2);
        ext.sync_to_slave(&aud);
        assert!((ext.get() - 30.0).abs() < 0.05);

        // Within the threshold nothing happens.
        aud.set(31.0, 2);
        ext.sync_to_slave(&aud);
        assert!((ext.get() - 30.0).abs() < 0.05);
    }

    #[test]
    fn effective_sync_mode_falls_back() {
        assert_eq!(SyncMode::Audio.effective(true, true), SyncMode::Audio);
        assert_eq!(SyncMode::Audio.effective(false, true), SyncMode::External);
        assert_eq!(SyncMode::Video.effective(true, true), SyncMode::Video);
        assert_eq!(SyncMode::Video.effective(true, false), SyncMode::External);
        assert_eq!(SyncMode::External.effective(true, true), SyncMode::External);
    }
}
