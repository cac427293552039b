// crates/kino-media/src/frames.rs
//
// The entry types carried by the three frame queues. Entries are immutable
// once queued; render-side bookkeeping (what is uploaded where) belongs to
// the renderers.

use ffmpeg_the_third as ffmpeg;

use crate::frame_queue::QueuedFrame;

/// A decoded video frame plus everything the refresh loop needs without
/// touching the pixel data.
pub struct VideoPicture {
    pub frame: ffmpeg::frame::Video,
    /// Presentation time in seconds; NaN when the stream carries none.
    pub pts: f64,
    /// Nominal frame duration from the stream frame rate; 0 when unknown.
    pub duration: f64,
    /// Byte offset of the packet that produced this frame.
    pub pos: i64,
    pub serial: i32,
    pub width: u32,
    pub height: u32,
    pub sar: ffmpeg::Rational,
}

impl QueuedFrame for VideoPicture {
    fn serial(&self) -> i32 {
        self.serial
    }

    fn byte_pos(&self) -> i64 {
        self.pos
    }
}

/// A decoded audio frame; pts is already rewritten into seconds.
pub struct AudioSample {
    pub frame: ffmpeg::frame::Audio,
    pub pts: f64,
    pub duration: f64,
    pub pos: i64,
    pub serial: i32,
}

impl QueuedFrame for AudioSample {
    fn serial(&self) -> i32 {
        self.serial
    }

    fn byte_pos(&self) -> i64 {
        self.pos
    }
}

/// A decoded subtitle event, flattened to displayable text lines.
pub struct SubtitleFrame {
    pub lines: Vec<String>,
    /// Event base time in seconds.
    pub pts: f64,
    /// Display window, seconds relative to `pts`.
    pub start_display: f64,
    pub end_display: f64,
    pub serial: i32,
    /// Coded dimensions when the codec reports them; 0 means "use the
    /// video size".
    pub width: u32,
    pub height: u32,
}

impl QueuedFrame for SubtitleFrame {
    fn serial(&self) -> i32 {
        self.serial
    }
}

/// Pull the display text out of an ASS event payload.
///
/// Dialogue packets arrive as `ReadOrder,Layer,Style,Name,MarginL,MarginR,
/// MarginV,Effect,Text`; everything before the ninth field is layout we do
/// not render. Override tags in braces are stripped and `\N` becomes a line
/// break.
pub fn ass_event_text(event: &str) -> String {
    let text = event.splitn(9, ',').nth(8).unwrap_or(event);

    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => in_tag = true,
            '}' => in_tag = false,
            _ if in_tag => {}
            '\\' if matches!(chars.peek(), Some('N') | Some('n')) => {
                chars.next();
                out.push('\n');
            }
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ass_event_keeps_only_the_text_field() {
        let event = "0,0,Default,,0,0,0,,Hello there";
        assert_eq!(ass_event_text(event), "Hello there");
    }

    #[test]
    fn ass_text_may_itself_contain_commas() {
        let event = "1,0,Default,,0,0,0,,Well, hello, again";
        assert_eq!(ass_event_text(event), "Well, hello, again");
    }

    #[test]
    fn ass_override_tags_are_stripped() {
        let event = r"0,0,Default,,0,0,0,,{\i1}emphasis{\i0} plain\Nsecond line";
        assert_eq!(ass_event_text(event), "emphasis plain\nsecond line");
    }
}
