// crates/kino-media/src/audio.rs
//
// The pull side of audio playback. The device backend (a cpal stream in the
// UI crate) calls AudioRenderer::fill from its callback thread; everything
// here runs in that callback. Frames come out of the sample queue, get
// resampled to the device format, and the audio clock is stamped from what
// actually left for the hardware.

use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi;
use log::{debug, error, warn};

use kino_core::clock::wall_time;
use kino_core::config::{AUDIO_MIN_BUFFER_SIZE, MAX_VOLUME};
use kino_core::sync::AudioDiffTracker;

use crate::error::PlayerError;
use crate::frame_queue::QueuedFrame;
use crate::player::Player;

/// One concrete PCM shape: rate, channel count/layout, sample format.
#[derive(Clone, Copy, PartialEq)]
pub struct AudioParams {
    pub freq: u32,
    pub channels: u16,
    pub layout: ffmpeg::ChannelLayout,
    pub format: ffmpeg::format::Sample,
}

impl AudioParams {
    pub fn packed_f32(freq: u32, channels: u16) -> Self {
        Self {
            freq,
            channels,
            layout: ffmpeg::ChannelLayout::default(channels as i32),
            format: ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.format.bytes()
    }

    pub fn bytes_per_sec(&self) -> usize {
        self.freq as usize * self.frame_size()
    }
}

/// What the device backend negotiated.
#[derive(Clone, Copy, Debug)]
pub struct AudioHwParams {
    pub freq: u32,
    pub channels: u16,
    /// One device buffer, in bytes of packed f32.
    pub buffer_bytes: usize,
}

/// The audio device seam. The engine asks for a shape, the backend answers
/// with what the hardware accepted, then the renderer is handed over to be
/// driven from the device's callback.
pub trait AudioOutput: Send {
    fn open(&mut self, wanted_rate: u32, wanted_channels: u16)
        -> Result<AudioHwParams, PlayerError>;
    fn start(&mut self, renderer: AudioRenderer) -> Result<(), PlayerError>;
    fn close(&mut self);
}

/// Walk the fallback table until the device opens: degrade the channel
/// count first ({0,0,1,6,2,6,4,6} indexed by the failing count), then step
/// down through the standard sample rates with the wanted channel count
/// restored.
pub fn open_audio_device(
    out: &mut dyn AudioOutput,
    wanted_channels: u16,
    wanted_rate: u32,
) -> Result<(AudioParams, usize), PlayerError> {
    const NEXT_NB_CHANNELS: [u16; 8] = [0, 0, 1, 6, 2, 6, 4, 6];
    const NEXT_SAMPLE_RATES: [u32; 5] = [0, 44100, 48000, 96000, 192000];

    let wanted_channels = match std::env::var("SDL_AUDIO_CHANNELS") {
        Ok(env) => env.parse().unwrap_or(wanted_channels),
        Err(_) => wanted_channels,
    };
    if wanted_rate == 0 || wanted_channels == 0 {
        return Err(PlayerError::Device("invalid sample rate or channel count".into()));
    }

    let mut rate_idx = NEXT_SAMPLE_RATES.len() - 1;
    while rate_idx > 0 && NEXT_SAMPLE_RATES[rate_idx] >= wanted_rate {
        rate_idx -= 1;
    }

    let mut channels = wanted_channels;
    let mut rate = wanted_rate;
    loop {
        match out.open(rate, channels) {
            Ok(hw) => {
                let tgt = AudioParams::packed_f32(hw.freq, hw.channels);
                return Ok((tgt, hw.buffer_bytes));
            }
            Err(e) => {
                warn!("[audio] open ({channels} channels, {rate} Hz): {e}");
                channels = NEXT_NB_CHANNELS[channels.min(7) as usize];
                if channels == 0 {
                    rate = NEXT_SAMPLE_RATES[rate_idx];
                    if rate_idx > 0 {
                        rate_idx -= 1;
                    }
                    channels = wanted_channels;
                    if rate == 0 {
                        return Err(PlayerError::Device(
                            "no more combinations to try, audio open failed".into(),
                        ));
                    }
                }
            }
        }
    }
}

/// Packed view of an audio frame's samples. The data plane of a packed
/// frame can be larger than its populated region, so the slice is sized
/// from the sample count rather than the plane length.
fn packed_f32(frame: &ffmpeg::frame::Audio) -> &[f32] {
    debug_assert!(frame.is_packed());
    unsafe {
        std::slice::from_raw_parts(
            (*frame.as_ptr()).data[0] as *const f32,
            frame.samples() * frame.channels() as usize,
        )
    }
}

pub struct AudioRenderer {
    player: Arc<Player>,
    /// Format of the frames currently coming out of the decoder.
    src: AudioParams,
    /// Device format; fixed for the life of the stream.
    tgt: AudioParams,
    swr: Option<ffmpeg::software::resampling::Context>,
    diff: AudioDiffTracker,
    /// One hardware buffer, bytes.
    hw_buf_size: usize,
    buf: Vec<f32>,
    buf_index: usize,
    /// PTS at the end of the last decoded frame; what the hardware is
    /// playing lags this by the buffered amount.
    audio_clock: f64,
    audio_clock_serial: i32,
    callback_time: f64,
}

impl AudioRenderer {
    pub(crate) fn new(player: Arc<Player>, src: AudioParams, tgt: AudioParams, hw_buf_size: usize) -> Self {
        // Correction below one hardware buffer of drift would disappear
        // into scheduling noise.
        let threshold = hw_buf_size as f64 / tgt.bytes_per_sec() as f64;
        Self {
            player,
            src,
            tgt,
            swr: None,
            diff: AudioDiffTracker::new(threshold),
            hw_buf_size,
            buf: Vec::new(),
            buf_index: 0,
            audio_clock: f64::NAN,
            audio_clock_serial: -1,
            callback_time: 0.0,
        }
    }

    /// Fill one device buffer with packed f32 samples. Never blocks for
    /// longer than half a hardware buffer; stalls produce silence.
    pub fn fill(&mut self, out: &mut [f32]) {
        self.callback_time = wall_time();

        let volume = self.player.volume();
        let muted = self.player.muted();
        let gain = volume as f32 / MAX_VOLUME as f32;

        let mut filled = 0;
        while filled < out.len() {
            if self.buf_index >= self.buf.len() {
                match self.decode_frame() {
                    Some(n) if n > 0 => self.buf_index = 0,
                    _ => {
                        // Stall or pause: a minimum chunk of silence.
                        let n = (out.len() - filled)
                            .min(AUDIO_MIN_BUFFER_SIZE * self.tgt.channels as usize);
                        out[filled..filled + n].fill(0.0);
                        filled += n;
                        continue;
                    }
                }
            }

            let n = (self.buf.len() - self.buf_index).min(out.len() - filled);
            let chunk = &self.buf[self.buf_index..self.buf_index + n];
            if muted {
                out[filled..filled + n].fill(0.0);
            } else if volume == MAX_VOLUME {
                out[filled..filled + n].copy_from_slice(chunk);
            } else {
                for (dst, src) in out[filled..filled + n].iter_mut().zip(chunk) {
                    *dst = src * gain;
                }
            }
            filled += n;
            self.buf_index += n;
        }

        // The hardware is assumed to hold two buffers beyond what we have
        // not yet handed over.
        if !self.audio_clock.is_nan() {
            let unplayed = (2 * self.hw_buf_size
                + (self.buf.len() - self.buf_index) * std::mem::size_of::<f32>())
                as f64
                / self.tgt.bytes_per_sec() as f64;
            self.player.audclk.set_at(
                self.audio_clock - unplayed,
                self.audio_clock_serial,
                self.callback_time,
            );
            self.player.extclk.sync_to_slave(&self.player.audclk);
        }
    }

    /// Decode one frame into the internal buffer; None means "emit silence"
    /// (paused, stalled, aborted, or a resample failure).
    fn decode_frame(&mut self) -> Option<usize> {
        if self.player.paused() {
            return None;
        }

        // Bounded poll instead of a blocking wait: the device thread must
        // keep producing even when the pipeline stalls.
        while self.player.sampq.nb_remaining() == 0 {
            let budget = self.hw_buf_size as f64 / self.tgt.bytes_per_sec() as f64 / 2.0;
            if wall_time() - self.callback_time > budget {
                return None;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let af = loop {
            let f = self.player.sampq.peek_readable()?;
            self.player.sampq.next();
            if f.serial() == self.player.audioq.serial() {
                break f;
            }
        };

        let wanted = self.synchronize(af.frame.samples(), af.frame.rate());
        if let Err(e) = self.configure_swr(&af.frame, wanted) {
            error!("[audio] resampler: {e}");
            return None;
        }

        self.buf.clear();
        if let Some(swr) = self.swr.as_mut() {
            if wanted != af.frame.samples() {
                let in_rate = af.frame.rate().max(1) as i64;
                let delta =
                    (wanted as i64 - af.frame.samples() as i64) * self.tgt.freq as i64 / in_rate;
                let distance = wanted as i64 * self.tgt.freq as i64 / in_rate;
                let ret = unsafe {
                    ffi::swr_set_compensation(
                        swr.as_mut_ptr(),
                        delta as libc::c_int,
                        distance as libc::c_int,
                    )
                };
                if ret < 0 {
                    error!("[audio] swr_set_compensation() failed");
                    return None;
                }
            }

            let mut resampled = ffmpeg::frame::Audio::empty();
            if let Err(e) = swr.run(&af.frame, &mut resampled) {
                error!("[audio] swr_convert() failed: {e}");
                return None;
            }
            self.buf.extend_from_slice(packed_f32(&resampled));
        } else {
            self.buf.extend_from_slice(packed_f32(&af.frame));
        }

        self.audio_clock = if af.pts.is_nan() {
            f64::NAN
        } else {
            af.pts + af.frame.samples() as f64 / af.frame.rate().max(1) as f64
        };
        self.audio_clock_serial = af.serial;

        Some(self.buf.len())
    }

    /// The number of samples this frame should resolve to: the frame's own
    /// count when audio is the master, a nudged count chasing the master
    /// clock otherwise.
    fn synchronize(&mut self, nb_samples: usize, src_rate: u32) -> usize {
        if self.player.master_is_audio() {
            return nb_samples;
        }
        let diff = self.player.audclk.get() - self.player.master_clock();
        self.diff.wanted_samples(diff, nb_samples, src_rate)
    }

    /// (Re)build the resampler when the source shape changes, or when a
    /// sample-count correction is needed and no resampler exists yet.
    fn configure_swr(
        &mut self,
        frame: &ffmpeg::frame::Audio,
        wanted: usize,
    ) -> Result<(), ffmpeg::Error> {
        let frame_params = AudioParams {
            freq: frame.rate(),
            channels: frame.channels(),
            layout: frame.channel_layout(),
            format: frame.format(),
        };

        let needs_rebuild = frame_params != self.src
            || (wanted != frame.samples() && self.swr.is_none());
        if !needs_rebuild {
            return Ok(());
        }

        if frame_params == self.tgt && wanted == frame.samples() {
            debug!("[audio] source matches device format, no resampler");
            self.swr = None;
        } else {
            self.swr = Some(ffmpeg::software::resampling::Context::get(
                frame_params.format,
                frame_params.layout,
                frame_params.freq,
                self.tgt.format,
                self.tgt.layout,
                self.tgt.freq,
            )?);
        }
        self.src = frame_params;
        Ok(())
    }
}
