//! Upstream video source feeding the ISI (sensor or CSI bridge)

use std::io;

use crate::capture::frame::{Format, PixelFormat};

/// Range of geometries a source can produce in one pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatCap {
    pub pixelformat: PixelFormat,
    pub width_min: u32,
    pub width_max: u32,
    pub height_min: u32,
    pub height_max: u32,
    pub width_step: u32,
    pub height_step: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caps {
    pub format_caps: Vec<FormatCap>,
    /// Buffers that must be queued before streaming can start
    pub min_buffer_count: usize,
}

/// Device upstream of the ISI. All calls are synchronous.
pub trait VideoSource: Send {
    fn name(&self) -> &str;

    fn get_format(&mut self) -> io::Result<Format>;

    fn set_format(&mut self, format: &Format) -> io::Result<()>;

    fn get_caps(&mut self) -> io::Result<Caps>;

    fn stream_start(&mut self) -> io::Result<()>;

    fn stream_stop(&mut self) -> io::Result<()>;
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_format(&mut self) -> io::Result<Format> {
        (**self).get_format()
    }

    fn set_format(&mut self, format: &Format) -> io::Result<()> {
        (**self).set_format(format)
    }

    fn get_caps(&mut self) -> io::Result<Caps> {
        (**self).get_caps()
    }

    fn stream_start(&mut self) -> io::Result<()> {
        (**self).stream_start()
    }

    fn stream_stop(&mut self) -> io::Result<()> {
        (**self).stream_stop()
    }
}
