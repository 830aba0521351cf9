use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Frame buffer handed between the consumer and the ISI.
///
/// The memory belongs to whoever holds the handle. While the buffer sits in a
/// queue or is bound to a hardware slot the driver holds it, and the ISI DMA
/// writes straight into it; nothing is ever copied.
pub struct FrameBuffer {
    data: BytesMut,

    /// Bytes of valid image data
    pub bytesused: usize,

    /// Capture timestamp, uptime of the driver when the frame completed
    pub timestamp: Duration,

    /// Per-stream frame counter, counting dropped frames too
    pub sequence: u64,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self::from_bytes(BytesMut::zeroed(size))
    }

    /// Wrap memory the consumer already owns
    pub fn from_bytes(data: BytesMut) -> Self {
        Self {
            data,
            bytesused: 0,
            timestamp: Duration::ZERO,
            sequence: 0,
        }
    }

    /// Address the ISI writes to
    pub fn addr(&self) -> usize {
        self.data.as_ptr() as usize
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Captured image bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.bytesused.min(self.data.len())]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    pub fn into_bytes(self) -> BytesMut {
        self.data
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("capacity", &self.capacity())
            .field("bytesused", &self.bytesused)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// FourCC pixel format code
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    pub const RGB24: Self = Self::new(b"RGB3");
    pub const RGB565: Self = Self::new(b"RGBP");
    pub const XRGB32: Self = Self::new(b"BX24");
    pub const YUYV: Self = Self::new(b"YUYV");
    pub const UYVY: Self = Self::new(b"UYVY");

    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Colour family the format belongs to, if the ISI knows it
    pub fn color_family(self) -> Option<ColorFamily> {
        match self {
            Self::YUYV | Self::UYVY => Some(ColorFamily::Yuv),
            Self::RGB24 | Self::RGB565 | Self::XRGB32 => Some(ColorFamily::Rgb),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            let c = if byte.is_ascii_graphic() { byte as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({self})")
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let code: [u8; 4] = value
            .as_bytes()
            .try_into()
            .map_err(|_| format!("fourcc must be exactly 4 bytes, got {value:?}"))?;
        Ok(Self::new(&code))
    }
}

impl From<PixelFormat> for String {
    fn from(value: PixelFormat) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFamily {
    Rgb,
    Yuv,
}

/// Image geometry and layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub pixelformat: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Line pitch in bytes
    #[serde(default)]
    pub pitch: u32,
}

impl Format {
    pub fn new(pixelformat: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixelformat,
            width,
            height,
            pitch: 0,
        }
    }

    /// Bytes of one full frame
    pub fn frame_size(&self) -> usize {
        self.pitch as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_round_trips_through_strings() {
        let fmt = PixelFormat::try_from("YUYV".to_string()).unwrap();
        assert_eq!(fmt, PixelFormat::YUYV);
        assert_eq!(String::from(fmt), "YUYV");
        assert!(PixelFormat::try_from("YUV".to_string()).is_err());
    }

    #[test]
    fn color_families() {
        assert_eq!(PixelFormat::UYVY.color_family(), Some(ColorFamily::Yuv));
        assert_eq!(PixelFormat::RGB565.color_family(), Some(ColorFamily::Rgb));
        assert_eq!(PixelFormat::new(b"GREY").color_family(), None);
    }

    #[test]
    fn buffer_address_is_stable_across_moves() {
        let buf = FrameBuffer::new(64);
        let addr = buf.addr();
        let moved = Box::new(buf);
        assert_eq!(moved.addr(), addr);
        assert_eq!(moved.capacity(), 64);
        assert!(moved.data().is_empty());
    }
}
