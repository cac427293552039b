// crates/kino-ui/src/audio_device.rs
//
// cpal implementation of the engine's AudioOutput seam. cpal streams are
// not Send, so a dedicated owner thread holds the device and the stream;
// the trait methods (called from the reader thread) post commands to it
// and wait for the reply where the caller needs one.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{error, info};

use kino_core::config::{AUDIO_MAX_CALLBACKS_PER_SEC, AUDIO_MIN_BUFFER_SIZE};
use kino_media::{AudioHwParams, AudioOutput, AudioRenderer, PlayerError};

enum DeviceCmd {
    Open {
        rate: u32,
        channels: u16,
        reply: Sender<Result<AudioHwParams, PlayerError>>,
    },
    Start {
        renderer: AudioRenderer,
        reply: Sender<Result<(), PlayerError>>,
    },
    Close,
    Shutdown,
}

pub struct CpalAudioOutput {
    tx: Sender<DeviceCmd>,
    owner: Option<JoinHandle<()>>,
}

impl CpalAudioOutput {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let owner = std::thread::Builder::new()
            .name("audio-dev".into())
            .spawn(move || owner_thread(rx))
            .expect("spawn audio device thread");
        Self { tx, owner: Some(owner) }
    }
}

impl AudioOutput for CpalAudioOutput {
    fn open(&mut self, wanted_rate: u32, wanted_channels: u16) -> Result<AudioHwParams, PlayerError> {
        let (reply, answer) = bounded(1);
        self.tx
            .send(DeviceCmd::Open { rate: wanted_rate, channels: wanted_channels, reply })
            .map_err(|_| PlayerError::Device("audio device thread gone".into()))?;
        answer
            .recv()
            .map_err(|_| PlayerError::Device("audio device thread gone".into()))?
    }

    fn start(&mut self, renderer: AudioRenderer) -> Result<(), PlayerError> {
        let (reply, answer) = bounded(1);
        self.tx
            .send(DeviceCmd::Start { renderer, reply })
            .map_err(|_| PlayerError::Device("audio device thread gone".into()))?;
        answer
            .recv()
            .map_err(|_| PlayerError::Device("audio device thread gone".into()))?
    }

    fn close(&mut self) {
        let _ = self.tx.send(DeviceCmd::Close);
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        let _ = self.tx.send(DeviceCmd::Shutdown);
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}

struct OwnedDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

fn owner_thread(rx: Receiver<DeviceCmd>) {
    let mut opened: Option<OwnedDevice> = None;
    let mut stream: Option<cpal::Stream> = None;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            DeviceCmd::Open { rate, channels, reply } => {
                stream = None;
                let result = open_device(rate, channels);
                if let Ok((device, hw)) = &result {
                    opened = Some(OwnedDevice { device: device.clone(), config: stream_config(hw) });
                }
                let _ = reply.send(result.map(|(_, hw)| hw));
            }
            DeviceCmd::Start { renderer, reply } => {
                let _ = reply.send(start_stream(&opened, &mut stream, renderer));
            }
            DeviceCmd::Close => {
                stream = None;
                opened = None;
            }
            DeviceCmd::Shutdown => break,
        }
    }
    drop(stream);
}

/// Size the device buffer the way the refresh math expects: at least the
/// minimum, and no more callbacks per second than the ceiling allows. The
/// per-callback count rounds to 2^(floor(log2 x) + 1), one power of two
/// above even an exact power-of-two input.
fn buffer_frames(rate: u32) -> u32 {
    let per_callback = (rate / AUDIO_MAX_CALLBACKS_PER_SEC).max(1);
    (AUDIO_MIN_BUFFER_SIZE as u32).max(2 << (31 - per_callback.leading_zeros()))
}

fn stream_config(hw: &AudioHwParams) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: hw.channels,
        sample_rate: cpal::SampleRate(hw.freq),
        buffer_size: cpal::BufferSize::Fixed(buffer_frames(hw.freq)),
    }
}

fn open_device(rate: u32, channels: u16) -> Result<(cpal::Device, AudioHwParams), PlayerError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::Device("no output device available".into()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| PlayerError::Device(format!("query output configs: {e}")))?
        .any(|range| {
            range.channels() == channels
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= rate
                && rate <= range.max_sample_rate().0
        });
    if !supported {
        return Err(PlayerError::Device(format!(
            "{channels} channels at {rate} Hz not supported"
        )));
    }

    let frames = buffer_frames(rate);
    let hw = AudioHwParams {
        freq: rate,
        channels,
        buffer_bytes: frames as usize * channels as usize * std::mem::size_of::<f32>(),
    };
    info!("[audio] device open: {channels} ch, {rate} Hz, {frames} frames/buffer");
    Ok((device, hw))
}

fn start_stream(
    opened: &Option<OwnedDevice>,
    stream: &mut Option<cpal::Stream>,
    mut renderer: AudioRenderer,
) -> Result<(), PlayerError> {
    let Some(owned) = opened else {
        return Err(PlayerError::Device("start before open".into()));
    };

    let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.fill(data);
    let err_fn = |e| error!("[audio] stream error: {e}");

    let built = owned
        .device
        .build_output_stream(&owned.config, data_fn, err_fn, None)
        .map_err(|e| PlayerError::Device(format!("build output stream: {e}")))?;

    built
        .play()
        .map_err(|e| PlayerError::Device(format!("start output stream: {e}")))?;
    *stream = Some(built);
    Ok(())
}
