// crates/kino-media/src/error.rs
//
// Typed failure kinds for the engine. Per-packet decode problems are logged
// and skipped at the call site; these surface the failures that end a
// component or the whole player.

use ffmpeg_the_third as ffmpeg;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// Opening, reading or seeking the input failed.
    #[error("input: {context}: {source}")]
    Input {
        context: String,
        #[source]
        source: ffmpeg::Error,
    },

    /// The codec rejected setup or produced nothing usable.
    #[error("decode: {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: ffmpeg::Error,
    },

    /// Allocation failure or an operation against an aborted queue.
    #[error("resource: {0}")]
    Resource(String),

    /// Pixel or sample format the renderers cannot take.
    #[error("unsupported format: {0}")]
    Format(String),

    /// The audio or video device refused to open.
    #[error("device: {0}")]
    Device(String),
}

impl PlayerError {
    pub fn input(context: impl Into<String>, source: ffmpeg::Error) -> Self {
        Self::Input { context: context.into(), source }
    }

    pub fn decode(context: impl Into<String>, source: ffmpeg::Error) -> Self {
        Self::Decode { context: context.into(), source }
    }
}
