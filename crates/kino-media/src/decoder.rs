// crates/kino-media/src/decoder.rs
//
// The decoder driver and the per-stream worker loops.
//
// One driver iteration serializes three steps against the codec's internal
// FIFO: drain any decoded output, fetch the next input packet (dropping
// packets from stale epochs), submit it. The flush sentinel resets codec
// state in-band; the null packet puts the codec into drain mode so the tail
// of the stream comes out.

use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::Rescale;
use log::{debug, error, warn};

use kino_core::config::NOSYNC_THRESHOLD;

use crate::frames::{ass_event_text, AudioSample, SubtitleFrame, VideoPicture};
use crate::helpers::stream::{frame_pkt_dts, subtitle_pts};
use crate::packet_queue::{PacketGet, PacketQueue, QueuedPacket};
use crate::player::{Player, ReaderWake};

pub enum DecodeStatus {
    /// A frame (or subtitle) was produced.
    Frame,
    /// The codec drained to end of stream for the current epoch.
    Eof,
    /// The input queue was aborted; the worker should exit.
    Aborted,
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == libc::EAGAIN)
}

pub struct Decoder {
    queue: Arc<PacketQueue>,
    read_wake: Arc<ReaderWake>,
    /// Serial of the last packet handed to the codec.
    pub pkt_serial: i32,
    /// Set to the draining epoch's serial once the codec returns EOS;
    /// shared so the reader can detect end-of-playback.
    finished: Arc<AtomicI32>,
    /// Packet the codec refused with EAGAIN (API-violation workaround) or
    /// a null packet being re-submitted while a subtitle codec drains.
    pending: Option<QueuedPacket>,
    /// Audio bookkeeping for streams whose packets carry no PTS.
    start_pts: Option<i64>,
    start_pts_tb: ffmpeg::Rational,
    next_pts: Option<i64>,
    next_pts_tb: ffmpeg::Rational,
    /// Byte offset of the last submitted packet; stamped onto output frames.
    last_pkt_pos: i64,
}

impl Decoder {
    pub fn new(queue: Arc<PacketQueue>, read_wake: Arc<ReaderWake>) -> Self {
        Self {
            queue,
            read_wake,
            pkt_serial: -1,
            finished: Arc::new(AtomicI32::new(0)),
            pending: None,
            start_pts: None,
            start_pts_tb: ffmpeg::Rational(0, 1),
            next_pts: None,
            next_pts_tb: ffmpeg::Rational(0, 1),
            last_pkt_pos: -1,
        }
    }

    /// Seed the synthesized-PTS origin (used for audio in containers that
    /// cannot seek back to regenerate timestamps).
    pub fn set_start_pts(&mut self, pts: i64, tb: ffmpeg::Rational) {
        self.start_pts = Some(pts);
        self.start_pts_tb = tb;
    }

    pub fn finished_handle(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.finished)
    }

    /// Next packet of the current epoch, or None on abort. Signals the
    /// reader before blocking on an empty queue.
    fn fetch_packet(&mut self) -> Option<QueuedPacket> {
        loop {
            if self.queue.is_empty() {
                self.read_wake.notify();
            }

            let (pkt, serial) = if let Some(p) = self.pending.take() {
                (p, self.pkt_serial)
            } else {
                match self.queue.get(true) {
                    PacketGet::Aborted => return None,
                    PacketGet::Empty => continue,
                    PacketGet::Packet(p, s) => {
                        self.pkt_serial = s;
                        (p, s)
                    }
                }
            };

            if serial == self.queue.serial() {
                return Some(pkt);
            }
            // A flush happened after this packet was queued; it belongs to
            // a discarded epoch.
        }
    }

    fn on_flush_sentinel(&mut self) {
        self.finished.store(0, Ordering::Relaxed);
        self.next_pts = self.start_pts;
        self.next_pts_tb = self.start_pts_tb;
    }

    /// Drive a video codec until it yields a frame. `reorder_pts`:
    /// None = overwrite PTS with the best-effort timestamp, Some(false) =
    /// use the decode timestamp, Some(true) = keep the codec's PTS.
    pub fn decode_video(
        &mut self,
        codec: &mut ffmpeg::decoder::Video,
        frame: &mut ffmpeg::frame::Video,
        reorder_pts: Option<bool>,
    ) -> DecodeStatus {
        loop {
            if self.queue.serial() == self.pkt_serial {
                loop {
                    if self.queue.is_aborted() {
                        return DecodeStatus::Aborted;
                    }
                    match codec.receive_frame(frame) {
                        Ok(()) => {
                            match reorder_pts {
                                None => {
                                    let ts = frame.timestamp();
                                    frame.set_pts(ts);
                                }
                                Some(false) => {
                                    let dts = frame_pkt_dts(frame);
                                    frame.set_pts(dts);
                                }
                                Some(true) => {}
                            }
                            return DecodeStatus::Frame;
                        }
                        Err(ffmpeg::Error::Eof) => {
                            self.finished.store(self.pkt_serial, Ordering::Relaxed);
                            codec.flush();
                            return DecodeStatus::Eof;
                        }
                        Err(e) if is_again(&e) => break,
                        Err(e) => {
                            warn!("[video] receive_frame: {e}");
                            break;
                        }
                    }
                }
            }

            let pkt = match self.fetch_packet() {
                Some(p) => p,
                None => return DecodeStatus::Aborted,
            };
            self.submit(codec, pkt, "video");
        }
    }

    /// Drive an audio codec until it yields a frame, rewriting PTS into a
    /// 1/sample_rate timebase and synthesizing it from the running sample
    /// count when the stream carries none.
    pub fn decode_audio(
        &mut self,
        codec: &mut ffmpeg::decoder::Audio,
        frame: &mut ffmpeg::frame::Audio,
        stream_tb: ffmpeg::Rational,
    ) -> DecodeStatus {
        loop {
            if self.queue.serial() == self.pkt_serial {
                loop {
                    if self.queue.is_aborted() {
                        return DecodeStatus::Aborted;
                    }
                    match codec.receive_frame(frame) {
                        Ok(()) => {
                            let tb = ffmpeg::Rational(1, frame.rate() as i32);
                            if let Some(pts) = frame.pts() {
                                frame.set_pts(Some(pts.rescale(stream_tb, tb)));
                            } else if let Some(next) = self.next_pts {
                                frame.set_pts(Some(next.rescale(self.next_pts_tb, tb)));
                            }
                            if let Some(pts) = frame.pts() {
                                self.next_pts = Some(pts + frame.samples() as i64);
                                self.next_pts_tb = tb;
                            }
                            return DecodeStatus::Frame;
                        }
                        Err(ffmpeg::Error::Eof) => {
                            self.finished.store(self.pkt_serial, Ordering::Relaxed);
                            codec.flush();
                            return DecodeStatus::Eof;
                        }
                        Err(e) if is_again(&e) => break,
                        Err(e) => {
                            warn!("[audio] receive_frame: {e}");
                            break;
                        }
                    }
                }
            }

            let pkt = match self.fetch_packet() {
                Some(p) => p,
                None => return DecodeStatus::Aborted,
            };
            self.submit(codec, pkt, "audio");
        }
    }

    /// Submit one packet to an audio/video codec, with the pending-packet
    /// retry for codecs that reject input despite a completed drain.
    fn submit<D>(&mut self, codec: &mut D, pkt: QueuedPacket, tag: &str)
    where
        D: std::ops::DerefMut<Target = ffmpeg::decoder::Opened>,
    {
        match pkt {
            QueuedPacket::Flush => {
                codec.flush();
                self.on_flush_sentinel();
            }
            QueuedPacket::Null { .. } => {
                if let Err(e) = codec.send_eof() {
                    if !matches!(e, ffmpeg::Error::Eof) {
                        warn!("[{tag}] send_eof: {e}");
                    }
                }
            }
            QueuedPacket::Packet(p) => {
                self.last_pkt_pos = p.position() as i64;
                match codec.send_packet(&p) {
                    Ok(()) => {}
                    Err(e) if is_again(&e) => {
                        error!(
                            "[{tag}] receive_frame and send_packet both returned EAGAIN, \
                             which is an API violation"
                        );
                        self.pending = Some(QueuedPacket::Packet(p));
                    }
                    Err(e) => warn!("[{tag}] send_packet: {e}"),
                }
            }
        }
    }

    /// Drive a subtitle codec. The one-shot API produces zero or one
    /// subtitle per packet; a null packet is re-submitted while frames keep
    /// coming, then signals end of stream.
    pub fn decode_subtitle(
        &mut self,
        codec: &mut ffmpeg::decoder::Subtitle,
        out: &mut ffmpeg::codec::subtitle::Subtitle,
    ) -> DecodeStatus {
        loop {
            let pkt = match self.fetch_packet() {
                Some(p) => p,
                None => return DecodeStatus::Aborted,
            };

            match pkt {
                QueuedPacket::Flush => {
                    codec.flush();
                    self.on_flush_sentinel();
                }
                QueuedPacket::Null { stream_index } => {
                    let drain = ffmpeg::Packet::empty();
                    match codec.decode(&drain, out) {
                        Ok(true) => {
                            // Keep draining on the next call.
                            self.pending = Some(QueuedPacket::Null { stream_index });
                            return DecodeStatus::Frame;
                        }
                        Ok(false) => {
                            self.finished.store(self.pkt_serial, Ordering::Relaxed);
                            codec.flush();
                            return DecodeStatus::Eof;
                        }
                        Err(e) => {
                            warn!("[subtitle] drain: {e}");
                            self.finished.store(self.pkt_serial, Ordering::Relaxed);
                            return DecodeStatus::Eof;
                        }
                    }
                }
                QueuedPacket::Packet(p) => {
                    self.last_pkt_pos = p.position() as i64;
                    match codec.decode(&p, out) {
                        Ok(true) => return DecodeStatus::Frame,
                        Ok(false) => {}
                        Err(e) => warn!("[subtitle] decode: {e}"),
                    }
                }
            }
        }
    }
}

// ── Worker loops ──────────────────────────────────────────────────────────────

/// Video decode worker: drains frames, applies the early-drop policy, and
/// feeds the picture queue.
pub fn run_video_decoder(
    player: Arc<Player>,
    mut codec: ffmpeg::decoder::Video,
    mut dec: Decoder,
    stream_tb: ffmpeg::Rational,
    frame_rate: ffmpeg::Rational,
    stream_sar: ffmpeg::Rational,
) {
    let mut frame = ffmpeg::frame::Video::empty();
    let nominal_duration = if frame_rate.numerator() != 0 && frame_rate.denominator() != 0 {
        f64::from(ffmpeg::Rational(frame_rate.denominator(), frame_rate.numerator()))
    } else {
        0.0
    };

    loop {
        match dec.decode_video(&mut codec, &mut frame, player.config.reorder_pts) {
            DecodeStatus::Aborted => break,
            DecodeStatus::Eof => continue,
            DecodeStatus::Frame => {}
        }

        let dpts = match frame.pts() {
            Some(pts) => pts as f64 * f64::from(stream_tb),
            None => f64::NAN,
        };
        player.count_faulty_timestamps(frame_pkt_dts(&frame).is_none(), frame.pts().is_none());

        // Late already at decode time: drop before it ever reaches the
        // picture queue.
        if player.config.framedrop.drops(player.master_is_video()) && !dpts.is_nan() {
            let diff = dpts - player.master_clock();
            if !diff.is_nan()
                && diff.abs() < NOSYNC_THRESHOLD
                && diff < 0.0
                && dec.pkt_serial == player.vidclk.serial()
                && !player.videoq.is_empty()
            {
                debug!("[video] drop early, queue={}", player.videoq.stats().nb_packets);
                player.count_early_drop();
                continue;
            }
        }

        let sar = if frame_has_sar(&frame) {
            frame_sar(&frame)
        } else {
            stream_sar
        };

        let picture = VideoPicture {
            pts: dpts,
            duration: nominal_duration,
            pos: dec.last_pkt_pos,
            serial: dec.pkt_serial,
            width: frame.width(),
            height: frame.height(),
            sar,
            frame: mem::replace(&mut frame, ffmpeg::frame::Video::empty()),
        };
        player.notify_video_size(picture.width, picture.height, sar);
        if player.pictq.push(picture).is_err() {
            break;
        }
    }
    debug!("[video] decoder exiting");
}

fn frame_has_sar(frame: &ffmpeg::frame::Video) -> bool {
    let sar = frame_sar(frame);
    sar.numerator() != 0
}

fn frame_sar(frame: &ffmpeg::frame::Video) -> ffmpeg::Rational {
    unsafe { (*frame.as_ptr()).sample_aspect_ratio.into() }
}

/// Audio decode worker: rewrites PTS into seconds and feeds the sample queue.
pub fn run_audio_decoder(
    player: Arc<Player>,
    mut codec: ffmpeg::decoder::Audio,
    mut dec: Decoder,
    stream_tb: ffmpeg::Rational,
) {
    let mut frame = ffmpeg::frame::Audio::empty();
    loop {
        match dec.decode_audio(&mut codec, &mut frame, stream_tb) {
            DecodeStatus::Aborted => break,
            DecodeStatus::Eof => continue,
            DecodeStatus::Frame => {}
        }

        let rate = frame.rate().max(1);
        let sample = AudioSample {
            pts: match frame.pts() {
                Some(pts) => pts as f64 / rate as f64,
                None => f64::NAN,
            },
            duration: frame.samples() as f64 / rate as f64,
            pos: dec.last_pkt_pos,
            serial: dec.pkt_serial,
            frame: mem::replace(&mut frame, ffmpeg::frame::Audio::empty()),
        };
        if player.sampq.push(sample).is_err() {
            break;
        }
    }
    debug!("[audio] decoder exiting");
}

/// Subtitle decode worker: flattens events to text lines at decode time so
/// the queue holds plain data.
pub fn run_subtitle_decoder(
    player: Arc<Player>,
    mut codec: ffmpeg::decoder::Subtitle,
    mut dec: Decoder,
) {
    let mut warned_bitmap = false;
    loop {
        let mut sub = ffmpeg::codec::subtitle::Subtitle::new();
        match dec.decode_subtitle(&mut codec, &mut sub) {
            DecodeStatus::Aborted => break,
            DecodeStatus::Eof => continue,
            DecodeStatus::Frame => {}
        }

        let mut lines = Vec::new();
        for rect in sub.rects() {
            match rect {
                ffmpeg::codec::subtitle::Rect::Text(text) => lines.push(text.get().to_string()),
                ffmpeg::codec::subtitle::Rect::Ass(ass) => {
                    let line = ass_event_text(ass.get());
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                ffmpeg::codec::subtitle::Rect::Bitmap(_) => {
                    if !warned_bitmap {
                        warn!("[subtitle] bitmap subtitles are not rendered");
                        warned_bitmap = true;
                    }
                }
                _ => {}
            }
        }

        let pts = match subtitle_pts(&sub) {
            Some(pts) => pts as f64 / ffmpeg::ffi::AV_TIME_BASE as f64,
            None => 0.0,
        };

        let entry = SubtitleFrame {
            lines,
            pts,
            start_display: sub.start() as f64 / 1000.0,
            end_display: sub.end() as f64 / 1000.0,
            serial: dec.pkt_serial,
            width: 0,
            height: 0,
        };
        if player.subpq.push(entry).is_err() {
            break;
        }
    }
    debug!("[subtitle] decoder exiting");
}
