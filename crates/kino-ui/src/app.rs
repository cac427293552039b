// crates/kino-ui/src/app.rs
//
// KinoApp drives everything that happens on the UI thread: key and mouse
// dispatch, the video refresh pump (frame scheduling, late drops, subtitle
// eviction), painting, and the status line. eframe's update() is the
// refresh tick; request_repaint_after carries the computed remaining time.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use egui::{Color32, Key, PointerButton, Pos2, Sense, ViewportCommand};
use ffmpeg_the_third as ffmpeg;
use log::error;

use kino_core::clock::{wall_time, SyncMode};
use kino_core::config::{
    EXTERNAL_CLOCK_MAX_FRAMES, EXTERNAL_CLOCK_MIN_FRAMES, REFRESH_RATE, SYNC_THRESHOLD_MAX,
};
use kino_core::sync::{adjust_external_clock_speed, compute_target_delay};
use kino_media::frames::VideoPicture;
use kino_media::{Player, PlayerEvent};

use crate::video::{display_rect, paint_subtitle, VideoSurface};

pub struct KinoApp {
    player: Arc<Player>,
    events: Receiver<PlayerEvent>,
    exit_code: Arc<AtomicI32>,
    surface: VideoSurface,
    fullscreen: bool,
    /// The window is resized to the source geometry once, then left alone.
    sized_to_video: bool,
    last_status: f64,
}

impl KinoApp {
    pub fn new(
        player: Arc<Player>,
        events: Receiver<PlayerEvent>,
        exit_code: Arc<AtomicI32>,
    ) -> Self {
        Self {
            player,
            events,
            exit_code,
            surface: VideoSurface::new(),
            fullscreen: false,
            sized_to_video: false,
            last_status: 0.0,
        }
    }

    fn drain_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                PlayerEvent::Eof => ctx.send_viewport_cmd(ViewportCommand::Close),
                PlayerEvent::Error(msg) => {
                    error!("{msg}");
                    self.exit_code.store(1, Ordering::Relaxed);
                    ctx.send_viewport_cmd(ViewportCommand::Close);
                }
                PlayerEvent::VideoSize { width, height, sar } => {
                    if !self.sized_to_video && width > 0 && height > 0 {
                        self.sized_to_video = true;
                        let panel = egui::Rect::from_min_size(
                            Pos2::ZERO,
                            egui::vec2(16384.0, height as f32),
                        );
                        let r = display_rect(panel, width, height, sar);
                        ctx.send_viewport_cmd(ViewportCommand::InnerSize(egui::vec2(
                            r.width(),
                            r.height(),
                        )));
                    }
                    self.player.request_refresh();
                }
                PlayerEvent::Title(title) => {
                    ctx.send_viewport_cmd(ViewportCommand::Title(title))
                }
            }
        }
    }

    fn toggle_fullscreen(&mut self, ctx: &egui::Context) {
        self.fullscreen = !self.fullscreen;
        ctx.send_viewport_cmd(ViewportCommand::Fullscreen(self.fullscreen));
        self.player.request_refresh();
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        let pressed = |k: Key| ctx.input(|i| i.key_pressed(k));

        if pressed(Key::Q) || pressed(Key::Escape) {
            ctx.send_viewport_cmd(ViewportCommand::Close);
            return;
        }
        if pressed(Key::F) {
            self.toggle_fullscreen(ctx);
        }
        if pressed(Key::P) || pressed(Key::Space) {
            self.player.toggle_pause();
        }
        if pressed(Key::M) {
            self.player.toggle_mute();
        }
        if pressed(Key::Num0) {
            self.player.update_volume(1);
        }
        if pressed(Key::Num9) {
            self.player.update_volume(-1);
        }
        if pressed(Key::S) {
            self.player.step_to_next_frame();
        }
        if pressed(Key::A) {
            self.player.cycle_stream(ffmpeg::media::Type::Audio);
        }
        if pressed(Key::V) {
            self.player.cycle_stream(ffmpeg::media::Type::Video);
        }
        if pressed(Key::T) {
            self.player.cycle_stream(ffmpeg::media::Type::Subtitle);
        }
        if pressed(Key::C) {
            self.player.cycle_stream(ffmpeg::media::Type::Video);
            self.player.cycle_stream(ffmpeg::media::Type::Audio);
            self.player.cycle_stream(ffmpeg::media::Type::Subtitle);
        }
        if pressed(Key::ArrowLeft) {
            self.player.seek_incr(-10.0);
        }
        if pressed(Key::ArrowRight) {
            self.player.seek_incr(10.0);
        }
        if pressed(Key::ArrowUp) {
            self.player.seek_incr(60.0);
        }
        if pressed(Key::ArrowDown) {
            self.player.seek_incr(-60.0);
        }
        if pressed(Key::PageUp) {
            self.player.seek_chapter(1);
        }
        if pressed(Key::PageDown) {
            self.player.seek_chapter(-1);
        }
    }

    fn handle_mouse(&mut self, ctx: &egui::Context, response: &egui::Response, panel: egui::Rect) {
        if response.double_clicked() {
            self.toggle_fullscreen(ctx);
        }
        if response.clicked_by(PointerButton::Secondary)
            || response.dragged_by(PointerButton::Secondary)
        {
            if let Some(pos) = response.interact_pointer_pos() {
                let frac = ((pos.x - panel.left()) / panel.width()).clamp(0.0, 1.0);
                self.player.seek_fraction(frac as f64);
            }
        }
    }

    /// External clock speed control: slow down when either media queue is
    /// close to empty, speed up when both are well stocked.
    fn check_external_clock_speed(&self) {
        let p = &self.player;
        let starving = (p.has_video()
            && p.videoq.stats().nb_packets <= EXTERNAL_CLOCK_MIN_FRAMES)
            || (p.has_audio() && p.audioq.stats().nb_packets <= EXTERNAL_CLOCK_MIN_FRAMES);
        let stocked = (!p.has_video() || p.videoq.stats().nb_packets > EXTERNAL_CLOCK_MAX_FRAMES)
            && (!p.has_audio() || p.audioq.stats().nb_packets > EXTERNAL_CLOCK_MAX_FRAMES);

        let speed = p.extclk.speed();
        let adjusted = adjust_external_clock_speed(speed, starving, stocked);
        if adjusted != speed {
            p.extclk.set_speed(adjusted);
        }
    }

    /// One tick of the frame scheduler. Decides whether the head frame's
    /// time has come, retires stale-epoch and late frames, updates the
    /// video clock, and leaves the next wake-up in `remaining_time`.
    fn video_refresh(&self, remaining_time: &mut f64) {
        let p = &self.player;

        if !p.paused() && p.master_sync() == SyncMode::External && p.source().realtime {
            self.check_external_clock_speed();
        }

        if !p.has_video() {
            return;
        }

        loop {
            if p.pictq.nb_remaining() == 0 {
                break;
            }

            let Some(vp) = p.pictq.peek() else { break };
            if vp.serial != p.videoq.serial() {
                p.pictq.next();
                continue;
            }
            let lastvp = p.pictq.peek_last().unwrap_or_else(|| Arc::clone(&vp));

            if lastvp.serial != vp.serial {
                // New epoch: schedule from now, not from the stale timer.
                p.set_frame_timer(wall_time());
            }

            if p.paused() {
                break;
            }

            let last_duration = vp_duration(&lastvp, &vp, p.max_frame_duration());
            let diff = if p.master_is_video() {
                f64::NAN
            } else {
                p.vidclk.get() - p.master_clock()
            };
            let delay = compute_target_delay(last_duration, diff, p.max_frame_duration());

            let time = wall_time();
            if time < p.frame_timer() + delay {
                *remaining_time = (p.frame_timer() + delay - time).min(*remaining_time);
                break;
            }

            p.set_frame_timer(p.frame_timer() + delay);
            if delay > 0.0 && time - p.frame_timer() > SYNC_THRESHOLD_MAX {
                // Stall recovery: too far behind schedule to catch up.
                p.set_frame_timer(time);
            }

            if !vp.pts.is_nan() {
                p.vidclk.set(vp.pts, vp.serial);
                p.extclk.sync_to_slave(&p.vidclk);
            }

            if p.pictq.nb_remaining() > 1 {
                if let Some(nextvp) = p.pictq.peek_next() {
                    let duration = vp_duration(&vp, &nextvp, p.max_frame_duration());
                    if !p.stepping()
                        && p.config.framedrop.drops(p.master_is_video())
                        && time > p.frame_timer() + duration
                    {
                        p.count_late_drop();
                        p.pictq.next();
                        continue;
                    }
                }
            }

            if p.has_subtitles() {
                self.evict_subtitles();
            }

            p.pictq.next();
            p.step_done();
            break;
        }
    }

    /// Retire subtitles whose epoch is gone, whose display window ended, or
    /// whose successor's window already began.
    fn evict_subtitles(&self) {
        let p = &self.player;
        while p.subpq.nb_remaining() > 0 {
            let Some(sp) = p.subpq.peek() else { break };
            let sp2 = if p.subpq.nb_remaining() > 1 { p.subpq.peek_next() } else { None };

            let vpts = p.vidclk.pts();
            let expired = sp.serial != p.subtitleq.serial()
                || vpts > sp.pts + sp.end_display
                || sp2.map_or(false, |next| vpts > next.pts + next.start_display);
            if expired {
                p.subpq.next();
            } else {
                break;
            }
        }
    }

    fn paint(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(Color32::BLACK))
            .show(ctx, |ui| {
                let panel = ui.max_rect();
                let response = ui.interact(panel, ui.id().with("video"), Sense::click_and_drag());
                self.handle_mouse(ctx, &response, panel);

                let Some(vp) = self.player.pictq.last_shown() else { return };
                self.surface.upload(ctx, &vp);
                let rect = display_rect(panel, vp.width, vp.height, vp.sar);
                self.surface.paint(ui.painter(), rect);

                if let Some(sp) = self.player.subpq.peek() {
                    if sp.serial == self.player.subtitleq.serial()
                        && vp.pts >= sp.pts + sp.start_display
                    {
                        paint_subtitle(ui.painter(), rect, &sp.lines);
                    }
                }
            });
    }

    fn show_status(&mut self) {
        let now = wall_time();
        if self.last_status != 0.0 && now - self.last_status < 0.03 {
            return;
        }
        self.last_status = now;

        let p = &self.player;
        let aq = if p.has_audio() { p.audioq.stats().size } else { 0 };
        let vq = if p.has_video() { p.videoq.stats().size } else { 0 };
        let sq = if p.has_subtitles() { p.subtitleq.stats().size } else { 0 };

        let (label, diff) = if p.has_audio() && p.has_video() {
            ("A-V", p.audclk.get() - p.vidclk.get())
        } else if p.has_video() {
            ("M-V", p.master_clock() - p.vidclk.get())
        } else if p.has_audio() {
            ("M-A", p.master_clock() - p.audclk.get())
        } else {
            ("   ", 0.0)
        };
        let (early, late) = p.frame_drops();
        let (faulty_dts, faulty_pts) = p.faulty_timestamps();

        eprint!(
            "{:7.2} {}:{:7.3} fd={:4} aq={:5}KB vq={:5}KB sq={:5}B f={}/{}   \r",
            p.master_clock(),
            label,
            diff,
            early + late,
            aq / 1024,
            vq / 1024,
            sq,
            faulty_dts,
            faulty_pts,
        );
    }
}

/// Time between a frame and its successor; the nominal frame duration when
/// the gap is unusable, zero across an epoch boundary.
fn vp_duration(vp: &VideoPicture, nextvp: &VideoPicture, max_frame_duration: f64) -> f64 {
    if vp.serial != nextvp.serial {
        return 0.0;
    }
    let duration = nextvp.pts - vp.pts;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        vp.duration
    } else {
        duration
    }
}

impl eframe::App for KinoApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events(ctx);
        self.handle_keys(ctx);

        let mut remaining_time = REFRESH_RATE;
        let forced = self.player.force_refresh();
        if !self.player.paused() || forced {
            self.video_refresh(&mut remaining_time);
        }

        self.paint(ctx);

        if self.player.config.show_status {
            self.show_status();
        }

        ctx.request_repaint_after(Duration::from_secs_f64(remaining_time.max(0.0)));
    }
}
