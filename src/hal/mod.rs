//! ISI register contract
//!
//! The driver core only talks to the peripheral through [`IsiRegisters`]. The
//! bit layout of the interrupt registers is fixed by the silicon; everything
//! else (channel, scaler and CSC programming) is passed down as plain config
//! structs and written by the implementation in one shot.

use std::sync::Arc;

/// Frame received, raised once per completed output frame
pub const INT_FRAME_RECEIVED: u32 = 1 << 14;
/// Line received
pub const INT_LINE_RECEIVED: u32 = 1 << 15;

/// Number of hardware output buffer address registers
pub const OUTPUT_SLOTS: usize = 2;

/// Output pixel layouts the ISI can write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Rgb888,
    Rgb565,
    Yuv422OnePlane8,
    Argb8888,
}

/// Channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub bypassed: bool,
    pub input_width: u32,
    pub input_height: u32,
    pub output_format: OutputFormat,
    pub output_line_pitch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalerConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CscMode {
    YCbCr2Rgb,
    Rgb2YCbCr,
}

/// Colour space conversion coefficients, as the CSC block consumes them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CscConfig {
    pub mode: CscMode,
    pub a: [f32; 3],
    pub b: [f32; 3],
    pub c: [f32; 3],
    pub d: [i16; 3],
}

/// Register level access to one ISI channel
pub trait IsiRegisters: Send + Sync {
    /// Reset the channel to its power-on configuration
    fn init(&self);

    fn set_channel_config(&self, config: &ChannelConfig);

    fn set_scaler_config(&self, config: &ScalerConfig);

    fn set_csc_config(&self, config: &CscConfig);

    fn enable_csc(&self, enable: bool);

    /// Program the Y plane address of output buffer `slot`
    fn set_output_buffer_addr(&self, slot: usize, addr: usize);

    fn interrupt_status(&self) -> u32;

    fn clear_interrupt_status(&self, mask: u32);

    fn enable_interrupts(&self, mask: u32);

    /// Mask the given sources, returning the enable mask in force before
    fn disable_interrupts(&self, mask: u32) -> u32;

    /// Assert the channel run bit
    fn start(&self);

    /// Deassert the channel run bit
    fn stop(&self);

    /// Flush and invalidate the data cache over a DMA target
    fn flush_and_invalidate_dcache(&self, addr: usize, len: usize);
}

impl<T: IsiRegisters + ?Sized> IsiRegisters for Arc<T> {
    fn init(&self) {
        (**self).init()
    }

    fn set_channel_config(&self, config: &ChannelConfig) {
        (**self).set_channel_config(config)
    }

    fn set_scaler_config(&self, config: &ScalerConfig) {
        (**self).set_scaler_config(config)
    }

    fn set_csc_config(&self, config: &CscConfig) {
        (**self).set_csc_config(config)
    }

    fn enable_csc(&self, enable: bool) {
        (**self).enable_csc(enable)
    }

    fn set_output_buffer_addr(&self, slot: usize, addr: usize) {
        (**self).set_output_buffer_addr(slot, addr)
    }

    fn interrupt_status(&self) -> u32 {
        (**self).interrupt_status()
    }

    fn clear_interrupt_status(&self, mask: u32) {
        (**self).clear_interrupt_status(mask)
    }

    fn enable_interrupts(&self, mask: u32) {
        (**self).enable_interrupts(mask)
    }

    fn disable_interrupts(&self, mask: u32) -> u32 {
        (**self).disable_interrupts(mask)
    }

    fn start(&self) {
        (**self).start()
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn flush_and_invalidate_dcache(&self, addr: usize, len: usize) {
        (**self).flush_and_invalidate_dcache(addr, len)
    }
}

/// Masks interrupt sources for its lifetime.
///
/// On drop the sources are unmasked again, but only those that were enabled
/// when the guard was taken.
pub struct IrqMask<'a, R: IsiRegisters + ?Sized> {
    regs: &'a R,
    restore: u32,
}

impl<'a, R: IsiRegisters + ?Sized> IrqMask<'a, R> {
    pub fn new(regs: &'a R, mask: u32) -> Self {
        let previous = regs.disable_interrupts(mask);
        Self {
            regs,
            restore: previous & mask,
        }
    }
}

impl<R: IsiRegisters + ?Sized> Drop for IrqMask<'_, R> {
    fn drop(&mut self) {
        if self.restore != 0 {
            self.regs.enable_interrupts(self.restore);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedIsi;

    #[test]
    fn mask_guard_restores_only_enabled_sources() {
        let hw = SimulatedIsi::new();

        {
            let _guard = IrqMask::new(&hw, INT_FRAME_RECEIVED);
            assert_eq!(hw.interrupt_enable() & INT_FRAME_RECEIVED, 0);
        }
        assert_eq!(hw.interrupt_enable() & INT_FRAME_RECEIVED, 0);

        hw.enable_interrupts(INT_FRAME_RECEIVED | INT_LINE_RECEIVED);
        {
            let _guard = IrqMask::new(&hw, INT_FRAME_RECEIVED);
            assert_eq!(hw.interrupt_enable(), INT_LINE_RECEIVED);
        }
        assert_eq!(
            hw.interrupt_enable(),
            INT_FRAME_RECEIVED | INT_LINE_RECEIVED
        );
    }
}
