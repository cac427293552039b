// crates/kino-media/src/reader.rs
//
// The reader thread: opens the input, picks the best streams, opens one
// decoder component per stream, then loops pulling packets from the demuxer
// into the packet queues. Everything that needs the demuxer context runs
// here: seeking, pause hand-off to network protocols, attached-picture
// queueing, and stream switching.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi::AV_TIME_BASE;
use ffmpeg::media::Type;
use ffmpeg::Rescale;
use log::{error, info, warn};

use kino_core::config::{MAX_QUEUE_SIZE, MIN_FRAMES};

use crate::audio::{open_audio_device, AudioOutput, AudioRenderer};
use crate::decoder::{run_audio_decoder, run_subtitle_decoder, run_video_decoder, Decoder};
use crate::error::PlayerError;
use crate::helpers::seek::{seek_file, seek_to};
use crate::helpers::stream as streamh;
use crate::packet_queue::{PacketQueue, QueuedPacket};
use crate::player::{ChapterInfo, Player, PlayerEvent, ReaderCmd, SeekRequest, SourceInfo};

pub(crate) fn spawn(
    player: Arc<Player>,
    cmd_rx: Receiver<ReaderCmd>,
    audio_out: Box<dyn AudioOutput>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("read".into())
        .spawn(move || run(player, cmd_rx, audio_out))
        .expect("spawn reader thread")
}

/// One open stream component: its queue, its worker, and the marker the
/// worker raises when the codec drains.
struct Component {
    stream_index: usize,
    queue: Arc<PacketQueue>,
    finished: Arc<AtomicI32>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Streams {
    audio: Option<Component>,
    video: Option<Component>,
    subtitle: Option<Component>,
    last_audio: i32,
    last_video: i32,
    last_subtitle: i32,
}

fn run(player: Arc<Player>, cmd_rx: Receiver<ReaderCmd>, mut audio_out: Box<dyn AudioOutput>) {
    let mut ictx = match ffmpeg::format::input(&player.filename) {
        Ok(ictx) => ictx,
        Err(e) => {
            error!("[reader] failed to open {}: {e}", player.filename);
            player.send_event(PlayerEvent::Error(format!("failed to open {}: {e}", player.filename)));
            return;
        }
    };

    configure_source(&player, &mut ictx);

    let mut streams = Streams::default();
    open_best_streams(&player, &mut ictx, &mut streams, &mut audio_out);

    if streams.audio.is_none() && streams.video.is_none() {
        player.send_event(PlayerEvent::Error(format!(
            "failed to open {}: no playable streams",
            player.filename
        )));
    } else {
        read_loop(&player, &mut ictx, &mut streams, &cmd_rx, &mut audio_out);
    }

    // Reverse of open: components (each aborts its queue and joins its
    // worker), then the demuxer context drops with this frame.
    for kind in [Type::Audio, Type::Video, Type::Subtitle] {
        close_component(&player, &mut ictx, &mut streams, kind, &mut audio_out);
    }
}

/// Probe the container and publish everything the UI and the seek logic
/// need before the first packet is read.
fn configure_source(player: &Arc<Player>, ictx: &mut ffmpeg::format::context::Input) {
    for (index, stream) in ictx.streams().enumerate() {
        info!(
            "[reader] stream #{index}: {:?} {:?}",
            stream.parameters().medium(),
            stream.parameters().id(),
        );
    }

    let format_name = ictx.format().name().to_string();
    let discontinuous = streamh::has_discontinuous_ts(ictx);
    let seek_by_bytes = player
        .config
        .seek_by_bytes
        .unwrap_or(discontinuous && format_name != "ogg");
    player.set_max_frame_duration(if discontinuous { 10.0 } else { 3600.0 });

    let duration = ictx.duration();
    let chapters: Vec<ChapterInfo> = ictx
        .chapters()
        .map(|ch| ChapterInfo {
            start_us: ch.start().rescale(ch.time_base(), ffmpeg::Rational(1, AV_TIME_BASE)),
        })
        .collect();

    let realtime = matches!(format_name.as_str(), "rtp" | "rtsp" | "sdp")
        || player.filename.starts_with("rtp:")
        || player.filename.starts_with("udp:");

    if let Some(title) = ictx.metadata().get("title") {
        player.send_event(PlayerEvent::Title(format!("{title} - {}", player.filename)));
    }

    player.set_source(SourceInfo {
        duration_us: (duration != ffmpeg::ffi::AV_NOPTS_VALUE).then_some(duration),
        start_time_us: streamh::start_time(ictx),
        bit_rate: streamh::bit_rate(ictx),
        size_bytes: streamh::io_size(ictx),
        chapters,
        realtime,
        seek_by_bytes,
    });

    // Honor a requested start position before anything is decoded.
    if let Some(start) = player.config.start_time_us {
        let target = start + streamh::start_time(ictx).unwrap_or(0);
        if let Err(e) = seek_to(ictx, target) {
            warn!(
                "[reader] {}: could not seek to position {:.3}: {e}",
                player.filename,
                target as f64 / AV_TIME_BASE as f64
            );
        }
    }
}

/// av_find_best_stream for each kind, preferring the audio related to the
/// chosen video and the subtitle related to the chosen audio.
fn open_best_streams(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    streams: &mut Streams,
    audio_out: &mut Box<dyn AudioOutput>,
) {
    let video = streamh::find_best_stream(ictx, Type::Video, -1, -1);
    let audio = streamh::find_best_stream(
        ictx,
        Type::Audio,
        -1,
        video.map_or(-1, |i| i as i32),
    );
    let subtitle = streamh::find_best_stream(
        ictx,
        Type::Subtitle,
        -1,
        audio.or(video).map_or(-1, |i| i as i32),
    );

    // Give the UI the source geometry before the first decoded frame.
    if let Some(index) = video {
        if let Some(st) = ictx.stream(index) {
            let (w, h) = unsafe {
                let p = st.parameters().as_ptr();
                ((*p).width as u32, (*p).height as u32)
            };
            let sar = streamh::guess_sample_aspect_ratio(ictx, &st);
            if w > 0 {
                player.notify_video_size(w, h, sar);
            }
        }
    }

    for (kind, index) in [(Type::Audio, audio), (Type::Video, video), (Type::Subtitle, subtitle)] {
        if let Some(index) = index {
            open_component(player, ictx, streams, kind, index, audio_out);
        }
    }
}

fn open_component(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    streams: &mut Streams,
    kind: Type,
    stream_index: usize,
    audio_out: &mut Box<dyn AudioOutput>,
) {
    match stream_component_open(player, ictx, kind, stream_index, audio_out) {
        Ok(component) => {
            streamh::set_discard(ictx, stream_index, false);
            player.set_stream_index(kind, stream_index as i32);
            match kind {
                Type::Audio => {
                    streams.last_audio = stream_index as i32;
                    streams.audio = Some(component);
                }
                Type::Video => {
                    streams.last_video = stream_index as i32;
                    streams.video = Some(component);
                }
                Type::Subtitle => {
                    streams.last_subtitle = stream_index as i32;
                    streams.subtitle = Some(component);
                }
                _ => {}
            }
        }
        Err(e) => warn!("[reader] cannot open {kind:?} stream #{stream_index}: {e}"),
    }
}

/// Build the codec, arm the packet queue, and hand both to a worker thread.
fn stream_component_open(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    kind: Type,
    stream_index: usize,
    audio_out: &mut Box<dyn AudioOutput>,
) -> Result<Component, PlayerError> {
    let stream = ictx
        .stream(stream_index)
        .ok_or_else(|| PlayerError::Resource(format!("stream #{stream_index} disappeared")))?;
    let stream_tb = stream.time_base();
    let stream_start = stream.start_time();

    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| PlayerError::decode(format!("stream #{stream_index} params"), e))?;

    let forced = match kind {
        Type::Audio => player.config.audio_codec.as_deref(),
        Type::Video => player.config.video_codec.as_deref(),
        Type::Subtitle => player.config.subtitle_codec.as_deref(),
        _ => None,
    };
    let opened = {
        let decoder = ctx.decoder();
        match forced.and_then(ffmpeg::decoder::find_by_name) {
            Some(codec) => decoder.open_as(codec),
            None => {
                if let Some(name) = forced {
                    warn!("[reader] no codec could be found with name '{name}'");
                }
                decoder.open()
            }
        }
        .map_err(|e| PlayerError::decode(format!("open decoder for stream #{stream_index}"), e))?
    };

    match kind {
        Type::Audio => {
            let codec = opened
                .audio()
                .map_err(|e| PlayerError::decode("audio decoder", e))?;
            let (tgt, hw_buf_size) =
                open_audio_device(audio_out.as_mut(), codec.channels(), codec.rate())?;

            player.audioq.start();
            let mut dec = Decoder::new(Arc::clone(&player.audioq), Arc::clone(&player.read_wake));
            if streamh::cannot_seek_back(ictx) && stream_start != ffmpeg::ffi::AV_NOPTS_VALUE {
                dec.set_start_pts(stream_start, stream_tb);
            }
            let finished = dec.finished_handle();

            // The renderer assumes the source matches the device until the
            // first frame proves otherwise.
            let renderer = AudioRenderer::new(Arc::clone(player), tgt, tgt, hw_buf_size);

            let worker = {
                let player = Arc::clone(player);
                thread::Builder::new()
                    .name("audio-dec".into())
                    .spawn(move || run_audio_decoder(player, codec, dec, stream_tb))
                    .map_err(|e| PlayerError::Resource(format!("spawn audio worker: {e}")))?
            };
            audio_out.start(renderer)?;

            Ok(Component { stream_index, queue: Arc::clone(&player.audioq), finished, worker })
        }
        Type::Video => {
            let codec = opened
                .video()
                .map_err(|e| PlayerError::decode("video decoder", e))?;
            let frame_rate = streamh::guess_frame_rate(ictx, &ictx.stream(stream_index).unwrap());
            let sar =
                streamh::guess_sample_aspect_ratio(ictx, &ictx.stream(stream_index).unwrap());

            player.videoq.start();
            let dec = Decoder::new(Arc::clone(&player.videoq), Arc::clone(&player.read_wake));
            let finished = dec.finished_handle();

            let worker = {
                let player = Arc::clone(player);
                thread::Builder::new()
                    .name("video-dec".into())
                    .spawn(move || {
                        run_video_decoder(player, codec, dec, stream_tb, frame_rate, sar)
                    })
                    .map_err(|e| PlayerError::Resource(format!("spawn video worker: {e}")))?
            };

            Ok(Component { stream_index, queue: Arc::clone(&player.videoq), finished, worker })
        }
        Type::Subtitle => {
            let codec = opened
                .subtitle()
                .map_err(|e| PlayerError::decode("subtitle decoder", e))?;

            player.subtitleq.start();
            let dec = Decoder::new(Arc::clone(&player.subtitleq), Arc::clone(&player.read_wake));
            let finished = dec.finished_handle();

            let worker = {
                let player = Arc::clone(player);
                thread::Builder::new()
                    .name("sub-dec".into())
                    .spawn(move || run_subtitle_decoder(player, codec, dec))
                    .map_err(|e| PlayerError::Resource(format!("spawn subtitle worker: {e}")))?
            };

            Ok(Component {
                stream_index,
                queue: Arc::clone(&player.subtitleq),
                finished,
                worker,
            })
        }
        other => Err(PlayerError::Resource(format!("unsupported stream kind {other:?}"))),
    }
}

/// Abort the component's queue, wake and join its worker, and release the
/// queued packets. The audio path also closes the device.
fn close_component(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    streams: &mut Streams,
    kind: Type,
    audio_out: &mut Box<dyn AudioOutput>,
) {
    let component = match kind {
        Type::Audio => streams.audio.take(),
        Type::Video => streams.video.take(),
        Type::Subtitle => streams.subtitle.take(),
        _ => None,
    };
    let Some(component) = component else { return };

    component.queue.abort();
    match kind {
        Type::Audio => player.sampq.signal(),
        Type::Video => player.pictq.signal(),
        Type::Subtitle => player.subpq.signal(),
        _ => {}
    }
    if component.worker.join().is_err() {
        warn!("[reader] {kind:?} worker panicked");
    }
    if kind == Type::Audio {
        audio_out.close();
    }
    component.queue.flush();
    streamh::set_discard(ictx, component.stream_index, true);
    player.set_stream_index(kind, -1);
}

fn read_loop(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    streams: &mut Streams,
    cmd_rx: &Receiver<ReaderCmd>,
    audio_out: &mut Box<dyn AudioOutput>,
) {
    let mut last_paused = false;
    let mut eof = false;
    let mut queue_attachments = true;
    let mut loops_left = player.config.loop_count;
    let format_name = ictx.format().name().to_string();
    let infinite_buffer = player
        .config
        .infinite_buffer
        .unwrap_or_else(|| player.source().realtime);

    loop {
        if player.is_aborted() {
            break;
        }

        while let Ok(ReaderCmd::CycleStream(kind)) = cmd_rx.try_recv() {
            cycle_stream(player, ictx, streams, kind, audio_out);
        }

        let paused = player.paused();
        if paused != last_paused {
            last_paused = paused;
            if paused {
                let _ = ictx.pause();
            } else {
                let _ = ictx.play();
            }
        }
        if paused && (format_name == "rtsp" || player.filename.starts_with("mmsh:")) {
            // Reading more packets from these servers while paused fills
            // their send window; back off instead.
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        if let Some(req) = player.take_seek_request() {
            execute_seek(player, ictx, streams, req);
            queue_attachments = true;
            eof = false;
            if player.paused() {
                player.step_to_next_frame();
            }
        }

        if queue_attachments {
            queue_attached_picture(ictx, streams);
            queue_attachments = false;
        }

        if !infinite_buffer && queues_are_full(ictx, streams) {
            player.read_wake.wait_timeout(Duration::from_millis(10));
            continue;
        }

        if !player.paused() && playback_done(player, streams) {
            // loops_left counts down in place, so once it hits 1 the
            // restart arm stays dead (0 means loop forever).
            if loops_left != 1
                && (loops_left == 0 || {
                    loops_left -= 1;
                    loops_left > 0
                })
            {
                player.seek_to(player.config.start_time_us.unwrap_or(0), 0, false);
            } else if player.config.autoexit {
                player.send_event(PlayerEvent::Eof);
                break;
            }
        }

        match ictx.packets().next() {
            Some(Ok((stream, packet))) => {
                eof = false;
                dispatch_packet(player, streams, &stream, packet);
            }
            Some(Err(ffmpeg::Error::Eof)) | None => {
                if !eof {
                    // Drain each active decoder exactly once per EOF.
                    if let Some(c) = &streams.video {
                        let _ = c.queue.put_null(c.stream_index);
                    }
                    if let Some(c) = &streams.audio {
                        let _ = c.queue.put_null(c.stream_index);
                    }
                    if let Some(c) = &streams.subtitle {
                        let _ = c.queue.put_null(c.stream_index);
                    }
                    eof = true;
                }
                player.read_wake.wait_timeout(Duration::from_millis(10));
            }
            Some(Err(e)) => {
                warn!("[reader] {}: read error: {e}", player.filename);
                if streamh::io_error(ictx) {
                    error!("[reader] {}: giving up on input", player.filename);
                    break;
                }
                player.read_wake.wait_timeout(Duration::from_millis(10));
            }
        }
    }
}

/// Run the container seek bounded by the request direction, then flush every
/// active queue and restamp the external clock into the new epoch.
fn execute_seek(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    streams: &Streams,
    req: SeekRequest,
) {
    // The +-2 keeps the bound strictly on the near side of the target
    // despite the rounding done when the request was built.
    let min = if req.rel > 0 { req.target - req.rel + 2 } else { i64::MIN };
    let max = if req.rel < 0 { req.target - req.rel - 2 } else { i64::MAX };

    match seek_file(ictx, min, req.target, max, req.by_bytes) {
        Err(e) => error!("[reader] {}: error while seeking: {e}", player.filename),
        Ok(()) => {
            for component in [&streams.audio, &streams.subtitle, &streams.video]
                .into_iter()
                .flatten()
            {
                component.queue.flush();
                let _ = component.queue.put(QueuedPacket::Flush);
            }
            if req.by_bytes {
                player.extclk.set(f64::NAN, 0);
            } else {
                player.extclk.set(req.target as f64 / AV_TIME_BASE as f64, 0);
            }
        }
    }
}

/// Album art is delivered as a one-shot attached picture: queue it once
/// (plus a drain signal) at open and again after every seek.
fn queue_attached_picture(ictx: &ffmpeg::format::context::Input, streams: &Streams) {
    let Some(video) = &streams.video else { return };
    let Some(st) = ictx.stream(video.stream_index) else { return };
    if !st
        .disposition()
        .contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC)
    {
        return;
    }
    if let Some(pkt) = streamh::attached_pic(&st) {
        let _ = video.queue.put(QueuedPacket::Packet(pkt));
        let _ = video.queue.put_null(video.stream_index);
    }
}

/// The backpressure predicate, with the precedence written out: a stream is
/// ready iff it is closed, aborted, an attached picture, or has more than
/// MIN_FRAMES packets covering more than a second (or an unknown span).
fn stream_ready(aborted: bool, attached_pic: bool, nb_packets: usize, queued_secs: Option<f64>) -> bool {
    aborted
        || attached_pic
        || (nb_packets > MIN_FRAMES && queued_secs.map_or(true, |secs| secs > 1.0))
}

fn component_ready(ictx: &ffmpeg::format::context::Input, component: &Option<Component>) -> bool {
    let Some(component) = component else { return true };
    let Some(st) = ictx.stream(component.stream_index) else { return true };
    let stats = component.queue.stats();
    let queued_secs = (stats.duration != 0)
        .then(|| f64::from(st.time_base()) * stats.duration as f64);
    stream_ready(
        component.queue.is_aborted(),
        st.disposition()
            .contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC),
        stats.nb_packets,
        queued_secs,
    )
}

fn queues_are_full(ictx: &ffmpeg::format::context::Input, streams: &Streams) -> bool {
    let total: usize = [&streams.audio, &streams.video, &streams.subtitle]
        .into_iter()
        .flatten()
        .map(|c| c.queue.stats().size)
        .sum();
    total > MAX_QUEUE_SIZE
        || (component_ready(ictx, &streams.audio)
            && component_ready(ictx, &streams.video)
            && component_ready(ictx, &streams.subtitle))
}

/// Every active decoder has drained its epoch and its frame queue is empty.
fn playback_done(player: &Arc<Player>, streams: &Streams) -> bool {
    let audio_done = streams.audio.as_ref().map_or(true, |c| {
        c.finished.load(Ordering::Relaxed) == c.queue.serial() && player.sampq.nb_remaining() == 0
    });
    let video_done = streams.video.as_ref().map_or(true, |c| {
        c.finished.load(Ordering::Relaxed) == c.queue.serial() && player.pictq.nb_remaining() == 0
    });
    audio_done && video_done
}

/// Apply the play-range filter: a packet is playable when no duration limit
/// is set, or its timestamp (relative to the stream start) falls within
/// [start_time, start_time + duration].
fn packet_in_play_range(
    start_time_us: Option<i64>,
    play_duration_us: Option<i64>,
    pkt_ts: Option<i64>,
    stream_start: i64,
    tb: ffmpeg::Rational,
) -> bool {
    let Some(duration_us) = play_duration_us else { return true };
    let base = if stream_start != ffmpeg::ffi::AV_NOPTS_VALUE { stream_start } else { 0 };
    let ts_secs = (pkt_ts.unwrap_or(0) - base) as f64 * f64::from(tb);
    let start_secs = start_time_us.unwrap_or(0) as f64 / AV_TIME_BASE as f64;
    ts_secs - start_secs <= duration_us as f64 / AV_TIME_BASE as f64
}

fn dispatch_packet(
    player: &Arc<Player>,
    streams: &Streams,
    stream: &ffmpeg::format::stream::Stream,
    packet: ffmpeg::Packet,
) {
    player.set_last_read_pos(packet.position() as i64);

    let index = stream.index();
    let in_range = packet_in_play_range(
        player.config.start_time_us,
        player.config.play_duration_us,
        packet.pts().or_else(|| packet.dts()),
        stream.start_time(),
        stream.time_base(),
    );

    if let Some(c) = &streams.audio {
        if index == c.stream_index && in_range {
            let _ = c.queue.put(QueuedPacket::Packet(packet));
            return;
        }
    }
    if let Some(c) = &streams.video {
        if index == c.stream_index
            && in_range
            && !stream
                .disposition()
                .contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC)
        {
            let _ = c.queue.put(QueuedPacket::Packet(packet));
            return;
        }
    }
    if let Some(c) = &streams.subtitle {
        if index == c.stream_index && in_range {
            let _ = c.queue.put(QueuedPacket::Packet(packet));
        }
    }
}

/// Close the current stream of `kind` and open the next one of the same
/// kind, scanning direct stream indices and wrapping around. Subtitles may
/// cycle to "none".
fn cycle_stream(
    player: &Arc<Player>,
    ictx: &mut ffmpeg::format::context::Input,
    streams: &mut Streams,
    kind: Type,
    audio_out: &mut Box<dyn AudioOutput>,
) {
    let nb_streams = ictx.streams().count() as i32;
    let (start_index, old_index) = match kind {
        Type::Audio => (streams.last_audio, streams.audio.as_ref().map(|c| c.stream_index as i32)),
        Type::Video => (streams.last_video, streams.video.as_ref().map(|c| c.stream_index as i32)),
        Type::Subtitle => {
            (streams.last_subtitle, streams.subtitle.as_ref().map(|c| c.stream_index as i32))
        }
        _ => return,
    };

    let mut stream_index = start_index;
    let next = loop {
        stream_index += 1;
        if stream_index >= nb_streams {
            if kind == Type::Subtitle {
                streams.last_subtitle = -1;
                break None;
            }
            if start_index == -1 {
                return;
            }
            stream_index = 0;
        }
        if stream_index == start_index {
            return;
        }

        let Some(st) = ictx.stream(stream_index as usize) else { continue };
        if st.parameters().medium() == kind {
            // Audio candidates without a usable format are scanned past.
            if kind == Type::Audio && !streamh::audio_params_valid(&st) {
                continue;
            }
            break Some(stream_index as usize);
        }
    };

    info!(
        "[reader] switch {kind:?} stream from #{} to #{}",
        old_index.unwrap_or(-1),
        next.map(|i| i as i32).unwrap_or(-1),
    );

    close_component(player, ictx, streams, kind, audio_out);
    if let Some(index) = next {
        open_component(player, ictx, streams, kind, index, audio_out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_or_aborted_streams_are_always_ready() {
        // A missing component is handled by component_ready; here the
        // aborted and attached-picture shortcuts.
        assert!(stream_ready(true, false, 0, None));
        assert!(stream_ready(false, true, 0, None));
    }

    #[test]
    fn readiness_needs_count_and_span() {
        // Not enough packets.
        assert!(!stream_ready(false, false, MIN_FRAMES, Some(10.0)));
        // Enough packets, unknown span counts as ready.
        assert!(stream_ready(false, false, MIN_FRAMES + 1, None));
        // Enough packets but under a second of media: keep reading.
        assert!(!stream_ready(false, false, MIN_FRAMES + 1, Some(0.5)));
        assert!(stream_ready(false, false, MIN_FRAMES + 1, Some(1.5)));
    }

    #[test]
    fn play_range_unlimited_without_duration() {
        assert!(packet_in_play_range(None, None, Some(1_000_000), 0, ffmpeg::Rational(1, 1000)));
    }

    #[test]
    fn play_range_filters_past_the_window() {
        let tb = ffmpeg::Rational(1, 1000); // ms timebase
        let one_sec = Some(1_000_000i64);
        // 0.5 s into the stream with a 1 s window: in range.
        assert!(packet_in_play_range(None, one_sec, Some(500), 0, tb));
        // 2 s in: out of range.
        assert!(!packet_in_play_range(None, one_sec, Some(2_000), 0, tb));
        // Window offset by start_time: 2 s is in range again.
        assert!(packet_in_play_range(Some(1_500_000), one_sec, Some(2_000), 0, tb));
    }
}
