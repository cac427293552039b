// crates/kino-ui/src/video.rs
//
// Video surface: converts decoded frames to RGBA through a cached scaling
// context, uploads into a streaming egui texture, and paints into a
// SAR-correct centered rect. Subtitle text is painted as an overlay.

use egui::{Color32, FontId, Pos2, Rect, TextureHandle, TextureOptions};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use log::error;

use kino_media::frames::VideoPicture;

/// Scale `pic_w`×`pic_h` with sample aspect `sar` to fit `panel`, centered,
/// widths rounded down to even pixels.
pub fn display_rect(panel: Rect, pic_w: u32, pic_h: u32, sar: ffmpeg::Rational) -> Rect {
    let mut aspect = if sar.numerator() > 0 { f64::from(sar) } else { 0.0 };
    if aspect <= 0.0 {
        aspect = 1.0;
    }
    aspect *= pic_w.max(1) as f64 / pic_h.max(1) as f64;

    let mut height = panel.height() as f64;
    let mut width = (height * aspect).round() as i64 & !1;
    if width as f32 > panel.width() {
        width = panel.width() as i64;
        height = ((width as f64 / aspect).round() as i64 & !1) as f64;
    }

    Rect::from_center_size(
        panel.center(),
        egui::vec2((width.max(1)) as f32, (height.max(1.0) as i64) as f32),
    )
}

/// Identity of an uploaded frame; a re-peek of the keep-last slot must not
/// trigger another upload.
#[derive(PartialEq, Clone, Copy)]
struct FrameId {
    serial: i32,
    pts_bits: u64,
    pos: i64,
}

impl FrameId {
    fn of(pic: &VideoPicture) -> Self {
        Self { serial: pic.serial, pts_bits: pic.pts.to_bits(), pos: pic.pos }
    }
}

pub struct VideoSurface {
    texture: Option<TextureHandle>,
    scaler: Option<SwsContext>,
    scaler_key: (ffmpeg::format::Pixel, u32, u32),
    uploaded: Option<FrameId>,
}

impl VideoSurface {
    pub fn new() -> Self {
        Self {
            texture: None,
            scaler: None,
            scaler_key: (ffmpeg::format::Pixel::None, 0, 0),
            uploaded: None,
        }
    }

    /// Convert and upload `pic` unless it is already on the texture.
    pub fn upload(&mut self, ctx: &egui::Context, pic: &VideoPicture) {
        let id = FrameId::of(pic);
        if self.uploaded == Some(id) && self.texture.is_some() {
            return;
        }

        let (w, h) = (pic.width, pic.height);
        if w == 0 || h == 0 {
            return;
        }

        let key = (pic.frame.format(), w, h);
        if self.scaler.is_none() || self.scaler_key != key {
            match SwsContext::get(
                pic.frame.format(),
                w,
                h,
                ffmpeg::format::Pixel::RGBA,
                w,
                h,
                Flags::BILINEAR,
            ) {
                Ok(scaler) => {
                    self.scaler = Some(scaler);
                    self.scaler_key = key;
                }
                Err(e) => {
                    error!("[video] cannot initialize the conversion context: {e}");
                    return;
                }
            }
        }

        let mut rgba = ffmpeg::util::frame::video::Video::empty();
        if let Err(e) = self.scaler.as_mut().unwrap().run(&pic.frame, &mut rgba) {
            error!("[video] pixel conversion failed: {e}");
            return;
        }

        // Destripe: copy only visible pixels, not stride padding.
        let stride = rgba.stride(0);
        let raw = rgba.data(0);
        let row_bytes = w as usize * 4;
        let data: Vec<u8> = (0..h as usize)
            .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
            .copied()
            .collect();

        let image = egui::ColorImage::from_rgba_unmultiplied([w as usize, h as usize], &data);
        match &mut self.texture {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => self.texture = Some(ctx.load_texture("video", image, TextureOptions::LINEAR)),
        }
        self.uploaded = Some(id);
    }

    pub fn paint(&self, painter: &egui::Painter, rect: Rect) {
        if let Some(texture) = &self.texture {
            painter.image(
                texture.id(),
                rect,
                Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                Color32::WHITE,
            );
        }
    }
}

/// Paint subtitle lines near the bottom of the video rect, with a dim
/// backdrop so they stay readable over bright frames.
pub fn paint_subtitle(painter: &egui::Painter, rect: Rect, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let text = lines.join("\n");
    let font = FontId::proportional((rect.height() * 0.045).clamp(14.0, 32.0));
    let anchor = Pos2::new(rect.center().x, rect.max.y - rect.height() * 0.06);

    let galley = painter.layout(
        text,
        font,
        Color32::WHITE,
        rect.width() * 0.9,
    );
    let text_rect = egui::Align2::CENTER_BOTTOM.anchor_size(anchor, galley.size());
    painter.rect_filled(text_rect.expand(6.0), 4.0, Color32::from_black_alpha(140));
    painter.galley(text_rect.min, galley, Color32::WHITE);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: f32, h: f32) -> Rect {
        Rect::from_min_size(Pos2::ZERO, egui::vec2(w, h))
    }

    #[test]
    fn square_pixels_fill_matching_panel() {
        let r = display_rect(rect(1280.0, 720.0), 1280, 720, ffmpeg::Rational(1, 1));
        assert_eq!(r.width(), 1280.0);
        assert_eq!(r.height(), 720.0);
    }

    #[test]
    fn tall_panel_letterboxes_vertically() {
        let r = display_rect(rect(640.0, 1000.0), 1280, 720, ffmpeg::Rational(1, 1));
        assert_eq!(r.width(), 640.0);
        assert!((r.height() - 360.0).abs() <= 2.0);
        // Centered.
        assert!((r.center().y - 500.0).abs() < 0.5);
    }

    #[test]
    fn anamorphic_sar_widens_the_picture() {
        // 720x576 at 16:11 SAR displays wider than square pixels would.
        let square = display_rect(rect(4000.0, 576.0), 720, 576, ffmpeg::Rational(1, 1));
        let wide = display_rect(rect(4000.0, 576.0), 720, 576, ffmpeg::Rational(16, 11));
        assert!(wide.width() > square.width());
    }

    #[test]
    fn widths_are_even() {
        let r = display_rect(rect(4000.0, 500.0), 1279, 717, ffmpeg::Rational(1, 1));
        assert_eq!(r.height(), 500.0);
        assert_eq!(r.width() as i64 % 2, 0);
    }
}
