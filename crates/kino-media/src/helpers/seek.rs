// crates/kino-media/src/helpers/seek.rs
//
// Bounded-seek wrapper over avformat_seek_file.
//
// All reader-side seeks route through here so the min/target/max contract
// and the byte-mode flag live in one place. The bounds matter: when the
// user seeks relative, the direction of the request constrains which side
// of the target the demuxer may land on, otherwise a keyframe-aligned
// landing can jump the "wrong" way past the position the user started from.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi;

/// Seek within `[min_ts, max_ts]` aiming at `target`, all in AV_TIME_BASE
/// units (or plain byte offsets when `by_bytes`).
pub fn seek_file(
    ictx: &mut ffmpeg::format::context::Input,
    min_ts: i64,
    target: i64,
    max_ts: i64,
    by_bytes: bool,
) -> Result<(), ffmpeg::Error> {
    let flags = if by_bytes { ffi::AVSEEK_FLAG_BYTE } else { 0 };
    let ret = unsafe {
        ffi::avformat_seek_file(ictx.as_mut_ptr(), -1, min_ts, target, max_ts, flags)
    };
    if ret < 0 {
        Err(ffmpeg::Error::from(ret))
    } else {
        Ok(())
    }
}

/// Unbounded seek to `target_us` (AV_TIME_BASE units), used for the
/// start-time option and loop restarts.
pub fn seek_to(
    ictx: &mut ffmpeg::format::context::Input,
    target_us: i64,
) -> Result<(), ffmpeg::Error> {
    seek_file(ictx, i64::MIN, target_us, i64::MAX, false)
}
