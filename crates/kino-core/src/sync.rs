// crates/kino-core/src/sync.rs
//
// The drift-compensation math, kept free of pipeline types so it can be
// exercised directly: video target-delay, audio sample-count compensation,
// external-clock speed control.

use crate::config::{
    AUDIO_DIFF_AVG_NB, EXTERNAL_CLOCK_SPEED_MAX, EXTERNAL_CLOCK_SPEED_MIN,
    EXTERNAL_CLOCK_SPEED_STEP, NOSYNC_THRESHOLD, SAMPLE_CORRECTION_PERCENT_MAX,
    SYNC_FRAMEDUP_THRESHOLD, SYNC_THRESHOLD_MAX, SYNC_THRESHOLD_MIN,
};

/// Adjust the nominal frame delay so video chases the master clock.
///
/// `delay` is the nominal duration between the frame being shown and the
/// next one; `diff` is video clock minus master clock (NaN when either is
/// unset). The threshold scales with the delay itself, clipped to the
/// correction band. Differences beyond `max_frame_duration` are treated as
/// timestamp discontinuities and left alone.
pub fn compute_target_delay(delay: f64, diff: f64, max_frame_duration: f64) -> f64 {
    let sync_threshold = delay.clamp(SYNC_THRESHOLD_MIN, SYNC_THRESHOLD_MAX);

    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return delay;
    }

    if diff <= -sync_threshold {
        // Behind the master: shorten, down to showing immediately.
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > SYNC_FRAMEDUP_THRESHOLD {
        // Ahead with a long frame: wait the difference out.
        delay + diff
    } else if diff >= sync_threshold {
        // Ahead with a short frame: duplicate it.
        2.0 * delay
    } else {
        delay
    }
}

/// Exponentially weighted tracker for the audio-vs-master difference.
///
/// Only consulted when audio is not the master. Accumulates
/// `AUDIO_DIFF_AVG_NB` measurements before acting, then nudges the wanted
/// sample count within ±`SAMPLE_CORRECTION_PERCENT_MAX` percent whenever the
/// averaged difference exceeds the hardware-buffer threshold.
pub struct AudioDiffTracker {
    cum: f64,
    avg_coef: f64,
    avg_count: usize,
    /// Correction deadband, seconds; normally the hardware buffer length.
    threshold: f64,
}

impl AudioDiffTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            cum: 0.0,
            avg_coef: (0.01f64.ln() / AUDIO_DIFF_AVG_NB as f64).exp(),
            avg_count: 0,
            threshold,
        }
    }

    pub fn reset(&mut self) {
        self.cum = 0.0;
        self.avg_count = 0;
    }

    /// The number of samples the resampler should produce for a frame of
    /// `nb_samples` at `src_rate`, given `diff` = audio clock − master clock.
    pub fn wanted_samples(&mut self, diff: f64, nb_samples: usize, src_rate: u32) -> usize {
        if diff.is_nan() || diff.abs() >= NOSYNC_THRESHOLD {
            // Probably initial PTS errors; start the estimate over.
            self.reset();
            return nb_samples;
        }

        self.cum = diff + self.avg_coef * self.cum;
        if self.avg_count < AUDIO_DIFF_AVG_NB {
            self.avg_count += 1;
            return nb_samples;
        }

        let avg_diff = self.cum * (1.0 - self.avg_coef);
        if avg_diff.abs() < self.threshold {
            return nb_samples;
        }

        let wanted = nb_samples as i64 + (diff * src_rate as f64) as i64;
        let min = nb_samples as i64 * (100 - SAMPLE_CORRECTION_PERCENT_MAX) as i64 / 100;
        let max = nb_samples as i64 * (100 + SAMPLE_CORRECTION_PERCENT_MAX) as i64 / 100;
        wanted.clamp(min, max) as usize
    }
}

/// One step of external-clock speed control, driven by packet-queue depth:
/// starving queues slow the clock, well-stocked queues speed it up, and
/// anything in between decays the speed back toward 1.0.
pub fn adjust_external_clock_speed(speed: f64, starving: bool, well_stocked: bool) -> f64 {
    if starving {
        (speed - EXTERNAL_CLOCK_SPEED_STEP).max(EXTERNAL_CLOCK_SPEED_MIN)
    } else if well_stocked {
        (speed + EXTERNAL_CLOCK_SPEED_STEP).min(EXTERNAL_CLOCK_SPEED_MAX)
    } else if speed != 1.0 {
        speed + EXTERNAL_CLOCK_SPEED_STEP * (1.0 - speed) / (1.0 - speed).abs()
    } else {
        speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_FRAME: f64 = 10.0;

    #[test]
    fn in_band_delay_is_untouched() {
        assert_eq!(compute_target_delay(0.04, 0.0, MAX_FRAME), 0.04);
        assert_eq!(compute_target_delay(0.04, 0.03, MAX_FRAME), 0.04);
    }

    #[test]
    fn behind_master_shortens_delay() {
        assert!((compute_target_delay(0.04, -0.05, MAX_FRAME) - 0.0).abs() < 1e-9);
        assert!((compute_target_delay(0.2, -0.12, MAX_FRAME) - 0.08).abs() < 1e-9);
    }

    #[test]
    fn ahead_with_long_frame_waits_it_out() {
        let d = compute_target_delay(0.2, 0.15, MAX_FRAME);
        assert!((d - 0.35).abs() < 1e-9);
    }

    #[test]
    fn ahead_with_short_frame_duplicates() {
        let d = compute_target_delay(0.04, 0.05, MAX_FRAME);
        assert!((d - 0.08).abs() < 1e-9);
    }

    #[test]
    fn discontinuity_is_ignored() {
        assert_eq!(compute_target_delay(0.04, 20.0, MAX_FRAME), 0.04);
        assert_eq!(compute_target_delay(0.04, f64::NAN, MAX_FRAME), 0.04);
    }

    #[test]
    fn audio_tracker_warms_up_before_correcting() {
        let mut t = AudioDiffTracker::new(0.05);
        for _ in 0..AUDIO_DIFF_AVG_NB {
            assert_eq!(t.wanted_samples(0.5, 1024, 48_000), 1024);
        }
        // Warmed up: a persistent 0.5 s lead clamps to +10 %.
        assert_eq!(t.wanted_samples(0.5, 1024, 48_000), 1126);
    }

    #[test]
    fn audio_tracker_clamps_both_ways() {
        let mut t = AudioDiffTracker::new(0.01);
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            t.wanted_samples(-0.5, 1024, 48_000);
        }
        assert_eq!(t.wanted_samples(-0.5, 1024, 48_000), 921);
    }

    #[test]
    fn audio_tracker_resets_on_discontinuity() {
        let mut t = AudioDiffTracker::new(0.01);
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            t.wanted_samples(0.2, 1024, 48_000);
        }
        // A wild diff resets the accumulator; the next calls warm up again.
        assert_eq!(t.wanted_samples(30.0, 1024, 48_000), 1024);
        assert_eq!(t.wanted_samples(0.2, 1024, 48_000), 1024);
    }

    #[test]
    fn small_averaged_diff_is_left_alone() {
        let mut t = AudioDiffTracker::new(0.25);
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            t.wanted_samples(0.003, 1024, 48_000);
        }
        assert_eq!(t.wanted_samples(0.003, 1024, 48_000), 1024);
    }

    #[test]
    fn external_speed_bounds() {
        let mut s = 1.0;
        for _ in 0..1000 {
            s = adjust_external_clock_speed(s, true, false);
        }
        assert!((s - EXTERNAL_CLOCK_SPEED_MIN).abs() < 1e-9);

        for _ in 0..1000 {
            s = adjust_external_clock_speed(s, false, true);
        }
        assert!((s - EXTERNAL_CLOCK_SPEED_MAX).abs() < 1e-9);
    }

    #[test]
    fn external_speed_decays_toward_unity() {
        let fast = adjust_external_clock_speed(1.005, false, false);
        assert!(fast < 1.005);
        let slow = adjust_external_clock_speed(0.995, false, false);
        assert!(slow > 0.995);
        assert_eq!(adjust_external_clock_speed(1.0, false, false), 1.0);
    }
}
