// crates/kino-core/src/config.rs
//
// Immutable playback configuration plus the compile-time tunables that the
// queueing and synchronization machinery is calibrated against.

use crate::clock::SyncMode;

/// Total bytes across all packet queues before the reader stops reading.
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;
/// Per-stream packet count considered "enough" for backpressure purposes.
pub const MIN_FRAMES: usize = 25;

/// External-clock speed control reacts to queue depth crossing these.
pub const EXTERNAL_CLOCK_MIN_FRAMES: usize = 2;
pub const EXTERNAL_CLOCK_MAX_FRAMES: usize = 10;

/// No correction below this, full correction above (seconds).
pub const SYNC_THRESHOLD_MIN: f64 = 0.04;
pub const SYNC_THRESHOLD_MAX: f64 = 0.1;
/// Frames longer than this are duplicated rather than waited out (seconds).
pub const SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;
/// Beyond this the timestamps are considered discontinuous; no correction.
pub const NOSYNC_THRESHOLD: f64 = 10.0;

/// Measurements accumulated before audio compensation kicks in.
pub const AUDIO_DIFF_AVG_NB: usize = 20;
/// Maximum per-frame audio sample-count correction, in percent.
pub const SAMPLE_CORRECTION_PERCENT_MAX: i32 = 10;

pub const EXTERNAL_CLOCK_SPEED_MIN: f64 = 0.900;
pub const EXTERNAL_CLOCK_SPEED_MAX: f64 = 1.010;
pub const EXTERNAL_CLOCK_SPEED_STEP: f64 = 0.001;

/// Default sleep between refresh-pump polls (seconds).
pub const REFRESH_RATE: f64 = 0.01;

pub const VIDEO_PICTURE_QUEUE_SIZE: usize = 3;
pub const SUBPICTURE_QUEUE_SIZE: usize = 16;
pub const SAMPLE_QUEUE_SIZE: usize = 9;
/// Hard ceiling on any frame queue; the ring is allocated at this size.
pub const FRAME_QUEUE_SIZE: usize = max3(
    SAMPLE_QUEUE_SIZE,
    VIDEO_PICTURE_QUEUE_SIZE,
    SUBPICTURE_QUEUE_SIZE,
);

/// Volume is an integer on 0..=MAX_VOLUME; keys step it by 0.75 dB.
pub const MAX_VOLUME: i32 = 128;
pub const VOLUME_STEP_DB: f64 = 0.75;

/// One volume-key press: move `volume` by `sign` × 0.75 dB on the integer
/// mixer scale. Near zero the dB step rounds back onto the same integer,
/// so movement is forced by at least one count.
pub fn stepped_volume(volume: i32, sign: i32) -> i32 {
    let level = if volume > 0 {
        20.0 * (volume as f64 / MAX_VOLUME as f64).log10()
    } else {
        -1000.0
    };
    let stepped =
        (MAX_VOLUME as f64 * 10f64.powf((level + sign as f64 * VOLUME_STEP_DB) / 20.0)).round()
            as i32;
    let new = if stepped == volume { volume + sign } else { stepped };
    new.clamp(0, MAX_VOLUME)
}

/// Audio device buffer sizing, in sample frames per callback.
pub const AUDIO_MIN_BUFFER_SIZE: usize = 512;
pub const AUDIO_MAX_CALLBACKS_PER_SEC: u32 = 30;

const fn max3(a: usize, b: usize, c: usize) -> usize {
    let ab = if a > b { a } else { b };
    if ab > c {
        ab
    } else {
        c
    }
}

/// What to do with video frames that are already late when their turn comes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDrop {
    /// Drop only when video is not the master clock.
    Auto,
    On,
    Off,
}

impl FrameDrop {
    pub fn drops(self, master_is_video: bool) -> bool {
        match self {
            FrameDrop::On => true,
            FrameDrop::Off => false,
            FrameDrop::Auto => !master_is_video,
        }
    }
}

/// Everything the player needs to know up front. Built once in main and
/// never mutated afterwards; runtime-mutable state lives on the player.
#[derive(Clone, Debug)]
pub struct Config {
    pub sync: SyncMode,
    pub framedrop: FrameDrop,
    /// None = decide from the realtime flag after open.
    pub infinite_buffer: Option<bool>,
    /// 1 = play once, 0 = loop forever, n = n passes.
    pub loop_count: u32,
    /// Quit when playback reaches the end.
    pub autoexit: bool,
    /// Play range, in microseconds of stream time.
    pub start_time_us: Option<i64>,
    pub play_duration_us: Option<i64>,
    /// 0..=100, mapped onto the 0..=MAX_VOLUME mixer scale.
    pub startup_volume: i32,
    /// None = decide from the container (discontinuous timestamps, not ogg).
    pub seek_by_bytes: Option<bool>,
    pub show_status: bool,
    /// None = overwrite video PTS with the best-effort timestamp,
    /// Some(false) = use the decode timestamp, Some(true) = trust the codec.
    pub reorder_pts: Option<bool>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub subtitle_codec: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncMode::Audio,
            framedrop: FrameDrop::Auto,
            infinite_buffer: None,
            loop_count: 1,
            autoexit: false,
            start_time_us: None,
            play_duration_us: None,
            startup_volume: 100,
            seek_by_bytes: None,
            show_status: true,
            reorder_pts: None,
            audio_codec: None,
            video_codec: None,
            subtitle_codec: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_queue_ceiling_is_the_largest_queue() {
        assert_eq!(FRAME_QUEUE_SIZE, 16);
        assert!(VIDEO_PICTURE_QUEUE_SIZE <= FRAME_QUEUE_SIZE);
        assert!(SAMPLE_QUEUE_SIZE <= FRAME_QUEUE_SIZE);
    }

    #[test]
    fn volume_steps_are_invertible_in_db() {
        // A step up then down lands back on the same integer across the
        // usable range.
        for v in [8, 32, 64, 100] {
            let up = stepped_volume(v, 1);
            assert!(up > v, "step up from {v} went to {up}");
            assert_eq!(stepped_volume(up, -1), v);
        }
    }

    #[test]
    fn volume_saturates_at_the_ends() {
        assert_eq!(stepped_volume(MAX_VOLUME, 1), MAX_VOLUME);
        assert_eq!(stepped_volume(0, -1), 0);
        // Escapes zero when stepping up.
        assert!(stepped_volume(0, 1) > 0);
    }

    #[test]
    fn framedrop_auto_follows_master() {
        assert!(FrameDrop::Auto.drops(false));
        assert!(!FrameDrop::Auto.drops(true));
        assert!(FrameDrop::On.drops(true));
        assert!(!FrameDrop::Off.drops(false));
    }
}
