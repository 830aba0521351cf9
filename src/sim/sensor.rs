//! Fixed-mode camera sensor feeding the ISI

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::capture::frame::Format;
use crate::source::{Caps, FormatCap, VideoSource};
use crate::utils::lock;

/// State shared between a [`SimulatedSensor`] and whoever drives it
#[derive(Debug)]
pub struct SensorState {
    format: Mutex<Format>,
    streaming: AtomicBool,
    starts: AtomicUsize,
    fail_format: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl SensorState {
    pub fn format(&self) -> Format {
        *lock(&self.format)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Successful stream starts so far
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn fail_format(&self, fail: bool) {
        self.fail_format.store(fail, Ordering::Release);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Release);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::Release);
    }
}

pub struct SimulatedSensor {
    name: String,
    state: Arc<SensorState>,
}

impl SimulatedSensor {
    pub fn new(name: impl Into<String>, mut format: Format) -> Self {
        if format.pitch == 0 {
            // the sensor only drives 16 bpp formats
            format.pitch = format.width * 2;
        }
        Self {
            name: name.into(),
            state: Arc::new(SensorState {
                format: Mutex::new(format),
                streaming: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                fail_format: AtomicBool::new(false),
                fail_start: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> Arc<SensorState> {
        self.state.clone()
    }

    fn check(flag: &AtomicBool, what: &str) -> io::Result<()> {
        if flag.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("sensor {what} failed"),
            ));
        }
        Ok(())
    }
}

impl VideoSource for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_format(&mut self) -> io::Result<Format> {
        Self::check(&self.state.fail_format, "get_format")?;
        Ok(self.state.format())
    }

    fn set_format(&mut self, format: &Format) -> io::Result<()> {
        Self::check(&self.state.fail_format, "set_format")?;
        debug!(sensor = %self.name, "format {}x{} {}", format.width, format.height, format.pixelformat);
        *lock(&self.state.format) = *format;
        Ok(())
    }

    fn get_caps(&mut self) -> io::Result<Caps> {
        let format = self.state.format();
        Ok(Caps {
            format_caps: vec![FormatCap {
                pixelformat: format.pixelformat,
                width_min: format.width,
                width_max: format.width,
                height_min: format.height,
                height_max: format.height,
                width_step: 0,
                height_step: 0,
            }],
            min_buffer_count: 1,
        })
    }

    fn stream_start(&mut self) -> io::Result<()> {
        Self::check(&self.state.fail_start, "stream_start")?;
        self.state.streaming.store(true, Ordering::Release);
        self.state.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stream_stop(&mut self) -> io::Result<()> {
        self.state.streaming.store(false, Ordering::Release);
        Self::check(&self.state.fail_stop, "stream_stop")
    }
}
