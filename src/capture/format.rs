//! Output format negotiation

use tracing::{debug, info};

use crate::capture::frame::{ColorFamily, Format, PixelFormat};
use crate::error::{Error, Result};
use crate::hal::{ChannelConfig, CscConfig, CscMode, OutputFormat, ScalerConfig};

/// Maps a fourcc onto the layout the ISI writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormatEntry {
    pub fourcc: PixelFormat,
    pub isi_format: OutputFormat,
    pub bits_per_pixel: u8,
}

/// Immutable format and colour conversion tables
#[derive(Debug, Clone, Copy)]
pub struct FormatTable {
    pub outputs: &'static [OutputFormatEntry],
    pub yuv_to_rgb: CscConfig,
    pub rgb_to_yuv: CscConfig,
}

const ISI_OUTPUT_FORMATS: &[OutputFormatEntry] = &[
    OutputFormatEntry {
        fourcc: PixelFormat::RGB24,
        isi_format: OutputFormat::Rgb888,
        bits_per_pixel: 24,
    },
    OutputFormatEntry {
        fourcc: PixelFormat::RGB565,
        isi_format: OutputFormat::Rgb565,
        bits_per_pixel: 16,
    },
    OutputFormatEntry {
        fourcc: PixelFormat::YUYV,
        isi_format: OutputFormat::Yuv422OnePlane8,
        bits_per_pixel: 16,
    },
    OutputFormatEntry {
        fourcc: PixelFormat::XRGB32,
        isi_format: OutputFormat::Argb8888,
        bits_per_pixel: 32,
    },
];

// BT.601 limited range
const CSC_YUV_TO_RGB: CscConfig = CscConfig {
    mode: CscMode::YCbCr2Rgb,
    a: [1.164, 0.0, 1.596],
    b: [1.164, -0.392, -0.813],
    c: [1.164, 2.017, 0.0],
    d: [-16, -128, -128],
};

const CSC_RGB_TO_YUV: CscConfig = CscConfig {
    mode: CscMode::Rgb2YCbCr,
    a: [0.257, 0.504, 0.098],
    b: [-0.148, -0.291, 0.439],
    c: [0.439, -0.368, -0.071],
    d: [16, 128, 128],
};

impl FormatTable {
    /// Tables of the i.MX ISI output stage
    pub const fn isi() -> Self {
        Self {
            outputs: ISI_OUTPUT_FORMATS,
            yuv_to_rgb: CSC_YUV_TO_RGB,
            rgb_to_yuv: CSC_RGB_TO_YUV,
        }
    }

    pub fn lookup(&self, fourcc: PixelFormat) -> Option<&OutputFormatEntry> {
        self.outputs.iter().find(|entry| entry.fourcc == fourcc)
    }
}

impl Default for FormatTable {
    fn default() -> Self {
        Self::isi()
    }
}

/// Result of a successful negotiation, ready to be written to the ISI
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Negotiated {
    pub output: Format,
    pub input: Format,
    pub channel: ChannelConfig,
    pub scaler: ScalerConfig,
    /// Only set when input and output colour families differ
    pub csc: Option<CscConfig>,
}

impl Negotiated {
    pub fn frame_size(&self) -> usize {
        self.output.frame_size()
    }
}

pub struct FormatNegotiator {
    table: FormatTable,
}

impl FormatNegotiator {
    pub fn new(table: FormatTable) -> Self {
        Self { table }
    }

    /// Check a requested output format against the table
    pub fn lookup(&self, fourcc: PixelFormat) -> Result<&OutputFormatEntry> {
        self.table.lookup(fourcc).ok_or_else(|| {
            debug!("pixelformat {} not supported", fourcc);
            Error::UnsupportedFormat(fourcc)
        })
    }

    /// Derive the output layout for `requested` fed from `input`.
    ///
    /// Pure; nothing is written to hardware.
    pub fn negotiate(&self, requested: &Format, input: &Format) -> Result<Negotiated> {
        let entry = self.lookup(requested.pixelformat)?;
        let invalid = Error::InvalidGeometry {
            width: requested.width,
            height: requested.height,
        };
        if requested.width == 0 || requested.height == 0 {
            return Err(invalid);
        }

        info!(
            "input pixelformat: {}, wxh: {}x{}",
            input.pixelformat, input.width, input.height
        );
        info!(
            "output pixelformat: {}, wxh: {}x{}",
            requested.pixelformat, requested.width, requested.height
        );

        if requested.width > input.width || requested.height > input.height {
            return Err(Error::UpscaleNotSupported {
                requested_width: requested.width,
                requested_height: requested.height,
                source_width: input.width,
                source_height: input.height,
            });
        }

        let pitch = requested
            .width
            .checked_mul(u32::from(entry.bits_per_pixel))
            .map(|bits| bits / 8)
            .ok_or(invalid)?;
        let output = Format {
            pitch,
            ..*requested
        };

        let channel = ChannelConfig {
            bypassed: false,
            input_width: input.width,
            input_height: input.height,
            output_format: entry.isi_format,
            output_line_pitch: pitch,
        };

        let scaler = ScalerConfig {
            input_width: input.width,
            input_height: input.height,
            output_width: output.width,
            output_height: output.height,
        };

        let csc = match (
            output.pixelformat.color_family(),
            input.pixelformat.color_family(),
        ) {
            (Some(ColorFamily::Yuv), Some(ColorFamily::Rgb)) => Some(self.table.rgb_to_yuv),
            (Some(ColorFamily::Rgb), Some(ColorFamily::Yuv)) => Some(self.table.yuv_to_rgb),
            _ => None,
        };

        Ok(Negotiated {
            output,
            input: *input,
            channel,
            scaler,
            csc,
        })
    }
}

impl Default for FormatNegotiator {
    fn default() -> Self {
        Self::new(FormatTable::isi())
    }
}
