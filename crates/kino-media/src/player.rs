// crates/kino-media/src/player.rs
//
// The Player owns the whole pipeline: three packet queues, three frame
// queues, three clocks, and the reader thread that feeds everything. It is
// shared behind an Arc between the UI thread, the decoder workers, the
// audio callback and the reader; the mutable pieces are atomics and small
// locked cells.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi::AV_TIME_BASE;
use log::{info, warn};
use parking_lot::Mutex as StateMutex;

use kino_core::clock::{wall_time, Clock, SyncMode};
use kino_core::config::{
    stepped_volume, Config, MAX_VOLUME, SAMPLE_QUEUE_SIZE, SUBPICTURE_QUEUE_SIZE,
    VIDEO_PICTURE_QUEUE_SIZE,
};
use kino_core::helpers::time::format_hms;

use crate::audio::AudioOutput;
use crate::frame_queue::FrameQueue;
use crate::frames::{AudioSample, SubtitleFrame, VideoPicture};
use crate::packet_queue::PacketQueue;
use crate::reader;

/// The reader parks on this between work; decoders poke it when their queue
/// drains, the UI when it files a seek or pause.
pub struct ReaderWake {
    lock: Mutex<()>,
    cond: Condvar,
}

impl ReaderWake {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()), cond: Condvar::new() }
    }

    pub fn notify(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_one();
    }

    pub fn wait_timeout(&self, timeout: Duration) {
        let guard = self.lock.lock().unwrap();
        let _ = self.cond.wait_timeout(guard, timeout).unwrap();
    }
}

impl Default for ReaderWake {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SeekRequest {
    /// Target in AV_TIME_BASE units, or a byte offset.
    pub target: i64,
    /// Signed distance of a relative seek; bounds which side the demuxer
    /// may land on. 0 for absolute seeks.
    pub rel: i64,
    pub by_bytes: bool,
}

/// Commands the reader executes because it owns the demuxer context.
pub enum ReaderCmd {
    CycleStream(ffmpeg::media::Type),
}

pub enum PlayerEvent {
    /// Playback ran out with autoexit set.
    Eof,
    /// Fatal error; the UI should tear down.
    Error(String),
    /// The source video size (or aspect) became known or changed.
    VideoSize { width: u32, height: u32, sar: ffmpeg::Rational },
    Title(String),
}

#[derive(Clone, Copy, Debug)]
pub struct ChapterInfo {
    /// Chapter start in AV_TIME_BASE units.
    pub start_us: i64,
}

#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    pub duration_us: Option<i64>,
    pub start_time_us: Option<i64>,
    pub bit_rate: i64,
    pub size_bytes: Option<i64>,
    pub chapters: Vec<ChapterInfo>,
    pub realtime: bool,
    pub seek_by_bytes: bool,
}

pub struct Player {
    pub config: Config,
    pub filename: String,

    pub audioq: Arc<PacketQueue>,
    pub videoq: Arc<PacketQueue>,
    pub subtitleq: Arc<PacketQueue>,

    pub pictq: FrameQueue<VideoPicture>,
    pub sampq: FrameQueue<AudioSample>,
    pub subpq: FrameQueue<SubtitleFrame>,

    pub audclk: Clock,
    pub vidclk: Clock,
    pub extclk: Clock,

    abort: AtomicBool,
    paused: AtomicBool,
    step: AtomicBool,
    muted: AtomicBool,
    volume: AtomicI32,
    force_refresh: AtomicBool,

    /// Stream indices of the open components, -1 when closed. Written by
    /// the reader, read everywhere.
    audio_stream: AtomicI32,
    video_stream: AtomicI32,
    subtitle_stream: AtomicI32,

    frame_drops_early: AtomicUsize,
    frame_drops_late: AtomicUsize,
    faulty_dts: AtomicUsize,
    faulty_pts: AtomicUsize,

    /// Byte position of the last packet read; byte-seek fallback when no
    /// frame position is known yet.
    last_read_pos: AtomicI64,

    seek_req: StateMutex<Option<SeekRequest>>,
    pub read_wake: Arc<ReaderWake>,

    /// 10 s for containers with discontinuous timestamps, 3600 otherwise;
    /// set by the reader after open.
    max_frame_duration: StateMutex<f64>,
    /// Wall-clock schedule of the frame on screen; owned by the video
    /// refresh, nudged by pause/resume.
    frame_timer: StateMutex<f64>,
    source: StateMutex<SourceInfo>,
    last_video_size: StateMutex<(u32, u32, ffmpeg::Rational)>,

    events_tx: Sender<PlayerEvent>,
    cmd_tx: Sender<ReaderCmd>,
    read_handle: StateMutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Build the pipeline and spawn the reader. Open failures surface as a
    /// PlayerEvent::Error on the returned channel.
    pub fn open(
        config: Config,
        filename: String,
        audio_out: Box<dyn AudioOutput>,
    ) -> (Arc<Player>, Receiver<PlayerEvent>) {
        let audioq = Arc::new(PacketQueue::new());
        let videoq = Arc::new(PacketQueue::new());
        let subtitleq = Arc::new(PacketQueue::new());

        let pictq = FrameQueue::new(&videoq, VIDEO_PICTURE_QUEUE_SIZE, true);
        let sampq = FrameQueue::new(&audioq, SAMPLE_QUEUE_SIZE, true);
        let subpq = FrameQueue::new(&subtitleq, SUBPICTURE_QUEUE_SIZE, false);

        let audclk = Clock::new(audioq.serial_handle());
        let vidclk = Clock::new(videoq.serial_handle());
        let extclk = Clock::standalone();

        let (events_tx, events_rx) = unbounded();
        let (cmd_tx, cmd_rx) = unbounded();

        let startup_volume = config.startup_volume.clamp(0, 100);
        if startup_volume != config.startup_volume {
            warn!("[player] volume {} out of range, clamped", config.startup_volume);
        }
        let volume = (MAX_VOLUME * startup_volume / 100).clamp(0, MAX_VOLUME);

        let player = Arc::new(Player {
            config,
            filename,
            audioq,
            videoq,
            subtitleq,
            pictq,
            sampq,
            subpq,
            audclk,
            vidclk,
            extclk,
            abort: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            step: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            volume: AtomicI32::new(volume),
            force_refresh: AtomicBool::new(false),
            audio_stream: AtomicI32::new(-1),
            video_stream: AtomicI32::new(-1),
            subtitle_stream: AtomicI32::new(-1),
            frame_drops_early: AtomicUsize::new(0),
            frame_drops_late: AtomicUsize::new(0),
            faulty_dts: AtomicUsize::new(0),
            faulty_pts: AtomicUsize::new(0),
            last_read_pos: AtomicI64::new(-1),
            seek_req: StateMutex::new(None),
            read_wake: Arc::new(ReaderWake::new()),
            max_frame_duration: StateMutex::new(3600.0),
            frame_timer: StateMutex::new(0.0),
            source: StateMutex::new(SourceInfo::default()),
            last_video_size: StateMutex::new((0, 0, ffmpeg::Rational(0, 1))),
            events_tx,
            cmd_tx,
            read_handle: StateMutex::new(None),
        });

        let handle = reader::spawn(Arc::clone(&player), cmd_rx, audio_out);
        *player.read_handle.lock() = Some(handle);

        (player, events_rx)
    }

    // ── Clocks ───────────────────────────────────────────────────────────

    pub fn has_audio(&self) -> bool {
        self.audio_stream.load(Ordering::Relaxed) >= 0
    }

    pub fn has_video(&self) -> bool {
        self.video_stream.load(Ordering::Relaxed) >= 0
    }

    pub fn has_subtitles(&self) -> bool {
        self.subtitle_stream.load(Ordering::Relaxed) >= 0
    }

    pub fn master_sync(&self) -> SyncMode {
        self.config.sync.effective(self.has_audio(), self.has_video())
    }

    pub fn master_is_video(&self) -> bool {
        self.master_sync() == SyncMode::Video
    }

    pub fn master_is_audio(&self) -> bool {
        self.master_sync() == SyncMode::Audio
    }

    pub fn master_clock(&self) -> f64 {
        match self.master_sync() {
            SyncMode::Audio => self.audclk.get(),
            SyncMode::Video => self.vidclk.get(),
            SyncMode::External => self.extclk.get(),
        }
    }

    pub fn max_frame_duration(&self) -> f64 {
        *self.max_frame_duration.lock()
    }

    pub(crate) fn set_max_frame_duration(&self, value: f64) {
        *self.max_frame_duration.lock() = value;
    }

    pub fn frame_timer(&self) -> f64 {
        *self.frame_timer.lock()
    }

    pub fn set_frame_timer(&self, value: f64) {
        *self.frame_timer.lock() = value;
    }

    // ── Pause / step ─────────────────────────────────────────────────────

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn stepping(&self) -> bool {
        self.step.load(Ordering::Relaxed)
    }

    /// Flip pause, keeping the clocks and the frame schedule continuous.
    pub(crate) fn stream_toggle_pause(&self) {
        let was_paused = self.paused.load(Ordering::Relaxed);
        if was_paused {
            // The frame on screen keeps its slot; shift its schedule past
            // the gap the pause introduced.
            {
                let mut timer = self.frame_timer.lock();
                *timer += wall_time() - self.vidclk.last_updated();
            }
            self.vidclk.set_paused(false);
            self.vidclk.set(self.vidclk.get(), self.vidclk.serial());
        }
        self.extclk.set(self.extclk.get(), self.extclk.serial());

        let now_paused = !was_paused;
        self.paused.store(now_paused, Ordering::Relaxed);
        self.audclk.set_paused(now_paused);
        self.vidclk.set_paused(now_paused);
        self.extclk.set_paused(now_paused);
        self.read_wake.notify();
    }

    pub fn toggle_pause(&self) {
        self.stream_toggle_pause();
        self.step.store(false, Ordering::Relaxed);
    }

    /// Advance exactly one video frame, unpausing for its duration.
    pub fn step_to_next_frame(&self) {
        if self.paused() {
            self.stream_toggle_pause();
        }
        self.step.store(true, Ordering::Relaxed);
    }

    // ── Volume / mute ────────────────────────────────────────────────────

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn toggle_mute(&self) {
        self.muted.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn volume(&self) -> i32 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Step the volume by `sign` × 0.75 dB on the integer mixer scale.
    pub fn update_volume(&self, sign: i32) {
        let volume = self.volume.load(Ordering::Relaxed);
        self.volume.store(stepped_volume(volume, sign), Ordering::Relaxed);
    }

    // ── Seeking ──────────────────────────────────────────────────────────

    /// File a seek request; ignored while one is already pending.
    pub fn seek_to(&self, target: i64, rel: i64, by_bytes: bool) {
        let mut req = self.seek_req.lock();
        if req.is_none() {
            *req = Some(SeekRequest { target, rel, by_bytes });
            self.read_wake.notify();
        }
    }

    pub(crate) fn take_seek_request(&self) -> Option<SeekRequest> {
        self.seek_req.lock().take()
    }

    pub(crate) fn pending_seek_target(&self) -> Option<i64> {
        let req: Option<SeekRequest> = *self.seek_req.lock();
        req.map(|r| r.target)
    }

    /// Relative seek by `incr` seconds (or its byte-rate equivalent when
    /// the source seeks by bytes).
    pub fn seek_incr(&self, incr: f64) {
        let source = self.source.lock().clone();
        if source.seek_by_bytes {
            let mut pos = -1i64;
            if self.has_video() {
                pos = self.pictq.last_shown_pos();
            }
            if pos < 0 && self.has_audio() {
                pos = self.sampq.last_shown_pos();
            }
            if pos < 0 {
                pos = self.last_read_pos.load(Ordering::Relaxed).max(0);
            }
            let byte_incr = if source.bit_rate > 0 {
                incr * source.bit_rate as f64 / 8.0
            } else {
                incr * 180_000.0
            };
            self.seek_to(pos + byte_incr as i64, byte_incr as i64, true);
        } else {
            let mut pos = self.master_clock();
            if pos.is_nan() {
                pos = self
                    .pending_seek_target()
                    .map(|t| t as f64 / AV_TIME_BASE as f64)
                    .unwrap_or(0.0);
            }
            pos += incr;
            // Never seek below the container's start time.
            if let Some(start) = source.start_time_us {
                let start_s = start as f64 / AV_TIME_BASE as f64;
                if pos < start_s {
                    pos = start_s;
                }
            }
            self.seek_to(
                (pos * AV_TIME_BASE as f64) as i64,
                (incr * AV_TIME_BASE as f64) as i64,
                false,
            );
        }
    }

    /// Absolute seek to a fraction of the input (mouse drag on the
    /// window), by bytes when timestamps are unusable.
    pub fn seek_fraction(&self, frac: f64) {
        let frac = frac.clamp(0.0, 1.0);
        let source = self.source.lock().clone();

        if source.seek_by_bytes || source.duration_us.is_none() {
            if let Some(size) = source.size_bytes {
                self.seek_to((size as f64 * frac) as i64, 0, true);
            }
            return;
        }

        let duration_us = source.duration_us.unwrap_or(0);
        let total_s = duration_us as f64 / AV_TIME_BASE as f64;
        info!(
            "Seek to {:2.0}% ({}) of total duration ({})",
            frac * 100.0,
            format_hms(frac * total_s),
            format_hms(total_s),
        );

        let mut ts = (frac * duration_us as f64) as i64;
        if let Some(start) = source.start_time_us {
            ts += start;
        }
        self.seek_to(ts, 0, false);
    }

    /// Seek to the current chapter plus `incr`; ±10 min when the container
    /// has at most one chapter.
    pub fn seek_chapter(&self, incr: i32) {
        let source = self.source.lock().clone();
        if source.chapters.len() <= 1 {
            self.seek_incr(incr as f64 * 600.0);
            return;
        }

        // Scan for the first chapter starting past the playhead; when none
        // does (playhead in the last chapter) the index stays one past the
        // end, so stepping back lands on that last chapter.
        let pos_us = (self.master_clock() * AV_TIME_BASE as f64) as i64;
        let mut current = source.chapters.len() as i32;
        for (i, ch) in source.chapters.iter().enumerate() {
            if pos_us < ch.start_us {
                current = i as i32 - 1;
                break;
            }
        }

        let target = (current + incr).max(0);
        if target as usize >= source.chapters.len() {
            return;
        }
        info!("Seeking to chapter {target}");
        self.seek_to(source.chapters[target as usize].start_us, 0, false);
    }

    // ── Stream switching ─────────────────────────────────────────────────

    pub fn cycle_stream(&self, kind: ffmpeg::media::Type) {
        let _ = self.cmd_tx.send(ReaderCmd::CycleStream(kind));
        self.read_wake.notify();
    }

    // ── Refresh / stats plumbing ─────────────────────────────────────────

    pub fn force_refresh(&self) -> bool {
        self.force_refresh.swap(false, Ordering::Relaxed)
    }

    pub fn request_refresh(&self) {
        self.force_refresh.store(true, Ordering::Relaxed);
    }

    pub fn count_early_drop(&self) {
        self.frame_drops_early.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_late_drop(&self) {
        self.frame_drops_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_drops(&self) -> (usize, usize) {
        (
            self.frame_drops_early.load(Ordering::Relaxed),
            self.frame_drops_late.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn count_faulty_timestamps(&self, missing_dts: bool, missing_pts: bool) {
        if missing_dts {
            self.faulty_dts.fetch_add(1, Ordering::Relaxed);
        }
        if missing_pts {
            self.faulty_pts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Frames that arrived without a usable DTS / PTS; shown on the status
    /// line.
    pub fn faulty_timestamps(&self) -> (usize, usize) {
        (
            self.faulty_dts.load(Ordering::Relaxed),
            self.faulty_pts.load(Ordering::Relaxed),
        )
    }

    /// Called by the video refresh once the single stepped frame has been
    /// scheduled; re-enters pause.
    pub fn step_done(&self) {
        if self.stepping() && !self.paused() {
            self.stream_toggle_pause();
        }
    }

    pub fn source(&self) -> SourceInfo {
        self.source.lock().clone()
    }

    pub(crate) fn set_source(&self, info: SourceInfo) {
        *self.source.lock() = info;
    }

    pub(crate) fn set_last_read_pos(&self, pos: i64) {
        self.last_read_pos.store(pos, Ordering::Relaxed);
    }

    pub(crate) fn set_stream_index(&self, kind: ffmpeg::media::Type, index: i32) {
        match kind {
            ffmpeg::media::Type::Audio => self.audio_stream.store(index, Ordering::Relaxed),
            ffmpeg::media::Type::Video => self.video_stream.store(index, Ordering::Relaxed),
            ffmpeg::media::Type::Subtitle => self.subtitle_stream.store(index, Ordering::Relaxed),
            _ => {}
        }
    }

    pub fn stream_index(&self, kind: ffmpeg::media::Type) -> i32 {
        match kind {
            ffmpeg::media::Type::Audio => self.audio_stream.load(Ordering::Relaxed),
            ffmpeg::media::Type::Video => self.video_stream.load(Ordering::Relaxed),
            ffmpeg::media::Type::Subtitle => self.subtitle_stream.load(Ordering::Relaxed),
            _ => -1,
        }
    }

    pub(crate) fn send_event(&self, event: PlayerEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Dedupe and forward video geometry so the UI can size its window.
    pub(crate) fn notify_video_size(&self, width: u32, height: u32, sar: ffmpeg::Rational) {
        let mut last = self.last_video_size.lock();
        if *last == (width, height, sar) {
            return;
        }
        *last = (width, height, sar);
        let _ = self.events_tx.send(PlayerEvent::VideoSize { width, height, sar });
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Tear down in reverse dependency order: stop the reader (which closes
    /// its components, joining the decoder workers), then the queues are
    /// left inert for drop.
    pub fn shutdown(&self) {
        self.abort.store(true, Ordering::Relaxed);
        self.audioq.abort();
        self.videoq.abort();
        self.subtitleq.abort();
        self.pictq.signal();
        self.sampq.signal();
        self.subpq.signal();
        self.read_wake.notify();

        if let Some(handle) = self.read_handle.lock().take() {
            if let Err(e) = handle.join() {
                warn!("[player] reader panicked: {e:?}");
            }
        }
    }
}
