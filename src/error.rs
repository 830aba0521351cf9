use std::io;

use thiserror::Error;

use crate::capture::frame::PixelFormat;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the ISI capture driver
#[derive(Debug, Error)]
pub enum Error {
    #[error("pixel format {0} is not supported by the ISI output stage")]
    UnsupportedFormat(PixelFormat),

    #[error("upscale not supported: requested {requested_width}x{requested_height}, source delivers {source_width}x{source_height}")]
    UpscaleNotSupported {
        requested_width: u32,
        requested_height: u32,
        source_width: u32,
        source_height: u32,
    },

    #[error("invalid frame geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("invalid buffer: {0}")]
    InvalidBuffer(&'static str),

    #[error("ISI requires {required} primed frame buffers, have {primed}")]
    InsufficientBuffers { primed: usize, required: usize },

    #[error("source I/O error: {0}")]
    Io(#[from] io::Error),

    /// Dequeue timed out; expected under polling
    #[error("no buffer ready")]
    NoBufferReady,

    #[error("a buffer signal is already registered")]
    AlreadyRegistered,

    #[error("operation not allowed while streaming")]
    StreamActive,

    #[error("buffer pool full ({capacity} buffers in circulation)")]
    PoolFull { capacity: usize },
}
