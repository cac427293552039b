// crates/kino-ui/src/main.rs

mod app;
mod audio_device;
mod video;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use kino_core::config::Config;
use kino_media::Player;

use crate::audio_device::CpalAudioOutput;

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    std::process::exit(123);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(input) = std::env::args().nth(1) else {
        eprintln!("usage: kino <input>");
        std::process::exit(-1);
    };

    if let Err(e) = ffmpeg_the_third::init() {
        eprintln!("FFmpeg init failed: {e}");
        std::process::exit(1);
    }

    #[cfg(unix)]
    unsafe {
        let handler = sigterm_handler as extern "C" fn(libc::c_int);
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }

    let config = Config::default();
    let (player, events) = Player::open(config, input.clone(), Box::new(CpalAudioOutput::new()));

    // 0 on a clean quit; the app flips it to 1 on a fatal player error.
    let exit_code = Arc::new(AtomicI32::new(0));

    let native_options = eframe::NativeOptions {
        centered: true,
        viewport: egui::ViewportBuilder::default()
            .with_title(&input)
            .with_inner_size([640.0, 480.0])
            .with_min_inner_size([160.0, 90.0]),
        ..Default::default()
    };

    let app_player = Arc::clone(&player);
    let app_exit = Arc::clone(&exit_code);
    let result = eframe::run_native(
        "kino",
        native_options,
        Box::new(move |_cc| Ok(Box::new(app::KinoApp::new(app_player, events, app_exit)))),
    );

    player.shutdown();

    if let Err(e) = result {
        eprintln!("window error: {e}");
        std::process::exit(1);
    }
    if player.config.show_status {
        eprintln!();
    }
    std::process::exit(exit_code.load(Ordering::Relaxed));
}
