//! Frame buffer pipeline for the i.MX Image Sensing Interface (ISI)
//!
//! The consumer owns [`FrameBuffer`]s and lends them to the driver with
//! [`Isi::enqueue`]; the ISI writes frames into them by DMA, and the frame-done
//! interrupt moves completed buffers to a ready queue drained by
//! [`Isi::dequeue`]. When the consumer runs out of free buffers the hardware
//! is pointed at a reserved drop sentinel, so frames are dropped instead of
//! overwriting buffers the consumer still believes it owns.

pub mod capture;
pub mod error;
pub mod hal;
pub mod pipeline;
pub mod sim;
pub mod source;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Format, FrameBuffer, Isi, IsiOptions, PixelFormat, SignalResult, StreamState};
pub use error::{Error, Result};
pub use pipeline::{StatsSnapshot, Timeout};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Buffers allocated by the consumer, sentinel included
    pub buffer_count: usize,
    pub pool_capacity: usize,
    pub dequeue_timeout_ms: u64,
    /// Format forced onto the source instead of reading it back
    pub input: Option<Format>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub sensor_name: String,
    pub sensor_format: PixelFormat,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub fps: u32,
    /// Frames to capture before stopping, 0 runs until interrupted
    pub frames: u64,
    /// Time the consumer holds each frame, to provoke starvation
    pub consumer_delay_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::RGB565,
            width: 640,
            height: 400,
            buffer_count: 4,
            pool_capacity: 8,
            dequeue_timeout_ms: 100,
            input: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sensor_name: "pcsi".into(),
            sensor_format: PixelFormat::UYVY,
            sensor_width: 1280,
            sensor_height: 800,
            fps: 30,
            frames: 300,
            consumer_delay_ms: 0,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then `ISI__SECTION__KEY` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("ISI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl CaptureConfig {
    pub fn output_format(&self) -> Format {
        Format::new(self.format, self.width, self.height)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn isi_options(&self) -> IsiOptions {
        IsiOptions {
            pool_capacity: self.pool_capacity,
            input_format: self.input,
            ..IsiOptions::default()
        }
    }
}

impl SimulationConfig {
    pub fn sensor_format(&self) -> Format {
        Format::new(self.sensor_format, self.sensor_width, self.sensor_height)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}
