//! Register-level model of one ISI channel

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::trace;

use crate::hal::{
    ChannelConfig, CscConfig, IsiRegisters, ScalerConfig, INT_FRAME_RECEIVED, OUTPUT_SLOTS,
};
use crate::utils::{lock, Addr};

type Isr = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Config {
    channel: Option<ChannelConfig>,
    scaler: Option<ScalerConfig>,
    csc: Option<CscConfig>,
}

/// Hosted stand-in for the ISI peripheral.
///
/// Interrupts behave like a single interrupt line on a uniprocessor: the
/// attached handler runs while the line lock is held, and masking takes the
/// same lock, so once `disable_interrupts` returns no handler is running or
/// will start until the source is unmasked. A source raised while masked stays
/// latched and is delivered when it is unmasked.
#[derive(Default)]
pub struct SimulatedIsi {
    status: AtomicU32,
    enable: AtomicU32,
    running: AtomicBool,
    csc_enabled: AtomicBool,
    out_addr: [AtomicUsize; OUTPUT_SLOTS],
    config: Mutex<Config>,
    line: Mutex<Option<Isr>>,
    inits: AtomicUsize,
    flushes: AtomicUsize,
    flushed_bytes: AtomicU64,
    frames: AtomicU64,
}

impl SimulatedIsi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect the interrupt service routine
    pub fn attach_isr(&self, isr: impl Fn() + Send + Sync + 'static) {
        *lock(&self.line) = Some(Box::new(isr));
    }

    /// The channel finished writing a frame. Returns whether the handler ran.
    pub fn frame_done(&self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.raise(INT_FRAME_RECEIVED)
    }

    /// Latch arbitrary status bits and deliver if any are unmasked
    pub fn raise(&self, bits: u32) -> bool {
        self.status.fetch_or(bits, Ordering::AcqRel);
        let line = lock(&self.line);
        self.deliver(&line)
    }

    fn deliver(&self, line: &Option<Isr>) -> bool {
        let pending = self.status.load(Ordering::Acquire) & self.enable.load(Ordering::Acquire);
        match line {
            Some(isr) if pending != 0 => {
                isr();
                true
            }
            _ => false,
        }
    }

    pub fn interrupt_enable(&self) -> u32 {
        self.enable.load(Ordering::Acquire)
    }

    pub fn pending_status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Value of an output buffer address register, 0 if never written
    pub fn output_addr(&self, slot: usize) -> usize {
        self.out_addr[slot].load(Ordering::Acquire)
    }

    pub fn channel_config(&self) -> Option<ChannelConfig> {
        lock(&self.config).channel
    }

    pub fn scaler_config(&self) -> Option<ScalerConfig> {
        lock(&self.config).scaler
    }

    pub fn csc_config(&self) -> Option<CscConfig> {
        lock(&self.config).csc
    }

    pub fn csc_enabled(&self) -> bool {
        self.csc_enabled.load(Ordering::Acquire)
    }

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn flushed_bytes(&self) -> u64 {
        self.flushed_bytes.load(Ordering::Relaxed)
    }

    /// Frames the channel produced while running
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl IsiRegisters for SimulatedIsi {
    fn init(&self) {
        self.inits.fetch_add(1, Ordering::Relaxed);
        *lock(&self.config) = Config::default();
        self.csc_enabled.store(false, Ordering::Release);
    }

    fn set_channel_config(&self, config: &ChannelConfig) {
        lock(&self.config).channel = Some(*config);
    }

    fn set_scaler_config(&self, config: &ScalerConfig) {
        lock(&self.config).scaler = Some(*config);
    }

    fn set_csc_config(&self, config: &CscConfig) {
        lock(&self.config).csc = Some(*config);
    }

    fn enable_csc(&self, enable: bool) {
        self.csc_enabled.store(enable, Ordering::Release);
    }

    fn set_output_buffer_addr(&self, slot: usize, addr: usize) {
        trace!(slot, addr = %Addr(addr), "output buffer address");
        self.out_addr[slot].store(addr, Ordering::Release);
    }

    fn interrupt_status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    fn clear_interrupt_status(&self, mask: u32) {
        self.status.fetch_and(!mask, Ordering::AcqRel);
    }

    fn enable_interrupts(&self, mask: u32) {
        let line = lock(&self.line);
        self.enable.fetch_or(mask, Ordering::AcqRel);
        self.deliver(&line);
    }

    fn disable_interrupts(&self, mask: u32) -> u32 {
        let _line = lock(&self.line);
        self.enable.fetch_and(!mask, Ordering::AcqRel)
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn flush_and_invalidate_dcache(&self, _addr: usize, len: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }
}
