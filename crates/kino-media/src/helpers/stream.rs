// crates/kino-media/src/helpers/stream.rs
//
// Small accessors for container and frame fields the safe bindings do not
// surface. Each reads a single field or calls one libavformat helper; all
// pointer use stays inside this module.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi;
use ffmpeg::packet::Mut;

/// av_find_best_stream with a related-stream hint, so audio selection can
/// prefer the track belonging to the chosen video (and subtitles the track
/// belonging to the chosen audio).
pub fn find_best_stream(
    ictx: &ffmpeg::format::context::Input,
    kind: ffmpeg::media::Type,
    wanted: i32,
    related: i32,
) -> Option<usize> {
    let index = unsafe {
        ffi::av_find_best_stream(
            ictx.as_ptr() as *mut _,
            kind.into(),
            wanted,
            related,
            std::ptr::null_mut(),
            0,
        )
    };
    (index >= 0).then_some(index as usize)
}

/// The container has discontinuous timestamps (enables byte seeking and the
/// short max-frame-duration).
pub fn has_discontinuous_ts(ictx: &ffmpeg::format::context::Input) -> bool {
    let flags = unsafe { (*(*ictx.as_ptr()).iformat).flags };
    flags & ffi::AVFMT_TS_DISCONT as i32 != 0
}

/// The demuxer cannot regenerate timestamps by seeking backwards; audio PTS
/// synthesis then has to be seeded from the stream start time.
pub fn cannot_seek_back(ictx: &ffmpeg::format::context::Input) -> bool {
    let flags = unsafe { (*(*ictx.as_ptr()).iformat).flags };
    flags
        & (ffi::AVFMT_NOBINSEARCH as i32
            | ffi::AVFMT_NOGENSEARCH as i32
            | ffi::AVFMT_NO_BYTE_SEEK as i32)
        != 0
}

/// Tell the demuxer whether to bother parsing a stream's packets at all.
pub fn set_discard(ictx: &mut ffmpeg::format::context::Input, index: usize, discard_all: bool) {
    unsafe {
        let ctx = ictx.as_mut_ptr();
        if index >= (*ctx).nb_streams as usize {
            return;
        }
        let st = *(*ctx).streams.add(index);
        (*st).discard = if discard_all {
            ffi::AVDiscard::AVDISCARD_ALL
        } else {
            ffi::AVDiscard::AVDISCARD_DEFAULT
        };
    }
}

pub fn start_time(ictx: &ffmpeg::format::context::Input) -> Option<i64> {
    let v = unsafe { (*ictx.as_ptr()).start_time };
    (v != ffi::AV_NOPTS_VALUE).then_some(v)
}

pub fn bit_rate(ictx: &ffmpeg::format::context::Input) -> i64 {
    unsafe { (*ictx.as_ptr()).bit_rate }
}

/// A hard error on the I/O context; reading will not recover.
pub fn io_error(ictx: &ffmpeg::format::context::Input) -> bool {
    unsafe {
        let pb = (*ictx.as_ptr()).pb;
        !pb.is_null() && (*pb).error != 0
    }
}

/// Total byte size of the input, when the I/O layer knows it.
pub fn io_size(ictx: &ffmpeg::format::context::Input) -> Option<i64> {
    unsafe {
        let pb = (*ictx.as_ptr()).pb;
        if pb.is_null() {
            return None;
        }
        let size = ffi::avio_size(pb);
        (size >= 0).then_some(size)
    }
}

pub fn guess_frame_rate(
    ictx: &ffmpeg::format::context::Input,
    stream: &ffmpeg::format::stream::Stream,
) -> ffmpeg::Rational {
    unsafe {
        ffi::av_guess_frame_rate(
            ictx.as_ptr() as *mut _,
            stream.as_ptr() as *mut _,
            std::ptr::null_mut(),
        )
        .into()
    }
}

pub fn guess_sample_aspect_ratio(
    ictx: &ffmpeg::format::context::Input,
    stream: &ffmpeg::format::stream::Stream,
) -> ffmpeg::Rational {
    unsafe {
        ffi::av_guess_sample_aspect_ratio(
            ictx.as_ptr() as *mut _,
            stream.as_ptr() as *mut _,
            std::ptr::null_mut(),
        )
        .into()
    }
}

/// An audio stream is only switchable-to when its parameters carry a
/// usable format.
pub fn audio_params_valid(stream: &ffmpeg::format::stream::Stream) -> bool {
    unsafe {
        let p = stream.parameters().as_ptr();
        (*p).sample_rate != 0 && (*p).channels != 0
    }
}

/// A refcounted copy of a stream's attached picture (album art), if any.
pub fn attached_pic(stream: &ffmpeg::format::stream::Stream) -> Option<ffmpeg::Packet> {
    unsafe {
        let st = stream.as_ptr();
        if (*st).attached_pic.data.is_null() {
            return None;
        }
        let mut pkt = ffmpeg::Packet::empty();
        if ffi::av_packet_ref(pkt.as_mut_ptr(), &(*st).attached_pic) < 0 {
            return None;
        }
        Some(pkt)
    }
}

/// The decode timestamp carried alongside a decoded frame.
pub fn frame_pkt_dts(frame: &ffmpeg::frame::Video) -> Option<i64> {
    let v = unsafe { (*frame.as_ptr()).pkt_dts };
    (v != ffi::AV_NOPTS_VALUE).then_some(v)
}

/// Event time of a decoded subtitle, in AV_TIME_BASE units.
pub fn subtitle_pts(sub: &ffmpeg::codec::subtitle::Subtitle) -> Option<i64> {
    let v = unsafe { (*sub.as_ptr()).pts };
    (v != ffi::AV_NOPTS_VALUE).then_some(v)
}
