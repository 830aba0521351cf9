//! ISI capture driver
//!
//! Couples the ISI output stage to a free/ready queue pair. The consumer
//! enqueues empty [`FrameBuffer`]s and dequeues filled ones; the frame-done
//! interrupt ([`Isi::handle_interrupt`]) retires the slot the hardware just
//! finished and primes it with the next free buffer, or with the drop sentinel
//! when the consumer has none left.
//!
//! Locking: control operations serialize on the control mutex. The slot table
//! has its own mutex, which the interrupt handler takes. Normal context takes
//! it under the control lock, and only while the stream is stopped or the
//! frame interrupt is masked; the diagnostic accessors mask it too. Normal
//! context never touches the interrupt mask while holding the slot lock.
//!
//! Every buffer the driver holds is at least one negotiated frame long, so the
//! hardware never writes past the end of a consumer buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::format::{FormatNegotiator, FormatTable, Negotiated};
use crate::capture::frame::{Format, FrameBuffer};
use crate::capture::slots::{Retired, SlotTable};
use crate::error::{Error, Result};
use crate::hal::{IrqMask, IsiRegisters, INT_FRAME_RECEIVED, OUTPUT_SLOTS};
use crate::pipeline::queues::{FreeQueue, ReadyQueue, Timeout};
use crate::pipeline::stats::{CaptureStats, StatsSnapshot};
use crate::source::{Caps, VideoSource};
use crate::utils::{lock, Addr};

/// The ISI needs both output slots primed before it can start
pub const MIN_BUFFERS: usize = OUTPUT_SLOTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Started,
}

/// Raised on the registered signal after every frame-done interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalResult {
    BufferDone,
    FrameDropped,
}

pub type BufferSignal = flume::Sender<SignalResult>;

/// Negotiated output plus the source format read back from upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub output: Option<Format>,
    pub upstream: Format,
}

#[derive(Debug, Clone)]
pub struct IsiOptions {
    /// Buffers that may circulate through the driver at once
    pub pool_capacity: usize,
    /// Format forced onto the source before every negotiation
    pub input_format: Option<Format>,
    pub table: FormatTable,
}

impl Default for IsiOptions {
    fn default() -> Self {
        Self {
            pool_capacity: 16,
            input_format: None,
            table: FormatTable::isi(),
        }
    }
}

struct Control<S> {
    state: StreamState,
    source: S,
    negotiated: Option<Negotiated>,
}

pub struct Isi<R: IsiRegisters, S: VideoSource> {
    regs: R,
    negotiator: FormatNegotiator,
    input_format: Option<Format>,
    control: Mutex<Control<S>>,
    slots: Mutex<SlotTable>,
    free: FreeQueue,
    ready: ReadyQueue,
    signal: ArcSwapOption<BufferSignal>,
    streaming: AtomicBool,
    frame_size: AtomicUsize,
    in_flight: AtomicUsize,
    pool_capacity: usize,
    sequence: AtomicU64,
    stats: CaptureStats,
    epoch: Instant,
}

impl<R: IsiRegisters, S: VideoSource> Isi<R, S> {
    pub fn new(regs: R, source: S, options: IsiOptions) -> Self {
        let pool_capacity = options.pool_capacity.max(MIN_BUFFERS);
        info!(
            "ISI init succeeded, source from {}, pool capacity {}",
            source.name(),
            pool_capacity
        );

        Self {
            regs,
            negotiator: FormatNegotiator::new(options.table),
            input_format: options.input_format,
            control: Mutex::new(Control {
                state: StreamState::Stopped,
                source,
                negotiated: None,
            }),
            slots: Mutex::new(SlotTable::new()),
            free: FreeQueue::new(pool_capacity),
            ready: ReadyQueue::new(pool_capacity),
            signal: ArcSwapOption::empty(),
            streaming: AtomicBool::new(false),
            frame_size: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            pool_capacity,
            sequence: AtomicU64::new(0),
            stats: CaptureStats::new(),
            epoch: Instant::now(),
        }
    }

    /// Negotiate and program the output format. Stream must be stopped.
    ///
    /// On success the active index is reset and any primed slot buffers go
    /// back to the free queue; the drop sentinel stays reserved.
    #[instrument(skip(self))]
    pub fn set_format(&self, requested: &Format) -> Result<Format> {
        let mut control = lock(&self.control);
        if control.state == StreamState::Started {
            return Err(Error::StreamActive);
        }

        self.negotiator.lookup(requested.pixelformat)?;

        let input = match self.input_format {
            Some(forced) => {
                control.source.set_format(&forced)?;
                forced
            }
            None => control.source.get_format()?,
        };

        let negotiated = self.negotiator.negotiate(requested, &input)?;

        let frame_size = negotiated.frame_size();
        let sentinel_too_small = lock(&self.slots)
            .sentinel_capacity()
            .is_some_and(|capacity| capacity < frame_size);
        if sentinel_too_small {
            return Err(Error::InvalidBuffer(
                "drop sentinel is smaller than the requested frame",
            ));
        }
        if self.holds_buffer_smaller_than(frame_size) {
            return Err(Error::InvalidBuffer(
                "queued buffers are smaller than the requested frame",
            ));
        }

        self.program(&negotiated);
        self.frame_size.store(frame_size, Ordering::Release);
        control.negotiated = Some(negotiated);
        self.reclaim_slots();

        Ok(negotiated.output)
    }

    /// Whether a slot or free queue buffer could not hold `frame_size` bytes.
    /// Only called while stopped.
    fn holds_buffer_smaller_than(&self, frame_size: usize) -> bool {
        let slots = lock(&self.slots);
        let queued: Vec<FrameBuffer> = std::iter::from_fn(|| self.free.pop()).collect();
        let too_small = slots
            .bound_capacities()
            .chain(queued.iter().map(FrameBuffer::capacity))
            .any(|capacity| capacity < frame_size);
        for buffer in queued {
            self.push_free(buffer);
        }
        too_small
    }

    fn program(&self, negotiated: &Negotiated) {
        self.regs.init();
        self.regs.set_channel_config(&negotiated.channel);

        // no flip, crop or alpha insertion
        self.regs.set_scaler_config(&negotiated.scaler);

        self.regs.enable_csc(false);
        if let Some(csc) = &negotiated.csc {
            self.regs.set_csc_config(csc);
            self.regs.enable_csc(true);
            debug!(mode = ?csc.mode, "colour space conversion enabled");
        }
    }

    pub fn get_format(&self) -> Result<FormatInfo> {
        let mut control = lock(&self.control);
        let upstream = control.source.get_format()?;
        Ok(FormatInfo {
            output: control.negotiated.map(|n| n.output),
            upstream,
        })
    }

    /// Source capabilities, with the ISI's own buffer requirement
    pub fn get_caps(&self) -> Result<Caps> {
        let mut control = lock(&self.control);
        let mut caps = control.source.get_caps()?;
        for cap in &caps.format_caps {
            debug!("source pixelformat: {}", cap.pixelformat);
        }
        caps.min_buffer_count = MIN_BUFFERS;
        Ok(caps)
    }

    /// Hand an empty buffer to the driver
    #[instrument(skip_all, fields(addr = %Addr(buffer.addr())))]
    pub fn enqueue(&self, mut buffer: FrameBuffer) -> Result<()> {
        let frame_size = self.frame_size.load(Ordering::Acquire);
        if buffer.capacity() == 0 {
            return Err(Error::InvalidBuffer("zero length"));
        }
        if buffer.capacity() < frame_size {
            return Err(Error::InvalidBuffer("smaller than the negotiated frame"));
        }
        buffer.bytesused = frame_size;

        let control = lock(&self.control);
        match control.state {
            StreamState::Stopped => self.prime_or_queue(buffer)?,
            StreamState::Started => self.queue_while_streaming(buffer)?,
        }
        self.stats.buffer_enqueued();
        Ok(())
    }

    /// Prime phase: sentinel first, then both slots, then the free queue.
    /// Buffers queue behind anything already waiting in the free queue.
    fn prime_or_queue(&self, buffer: FrameBuffer) -> Result<()> {
        let mut slots = lock(&self.slots);

        if !slots.has_sentinel() {
            debug!(addr = %Addr(buffer.addr()), "reserved drop sentinel");
            slots.reserve_sentinel(buffer);
            return Ok(());
        }

        self.reserve_pool_entry()?;
        if !self.free.is_empty() {
            self.push_free(buffer);
            return Ok(());
        }
        match slots.prime(buffer) {
            Ok(slot) => {
                debug!(slot, "primed output slot");
            }
            Err(buffer) => self.push_free(buffer),
        }
        Ok(())
    }

    /// Steady state: the frame interrupt is masked while the free queue is
    /// touched
    fn queue_while_streaming(&self, buffer: FrameBuffer) -> Result<()> {
        self.reserve_pool_entry()?;
        let _masked = IrqMask::new(&self.regs, INT_FRAME_RECEIVED);
        self.push_free(buffer);
        Ok(())
    }

    fn reserve_pool_entry(&self) -> Result<()> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.pool_capacity).then_some(n + 1)
            })
            .map(drop)
            .map_err(|_| Error::PoolFull {
                capacity: self.pool_capacity,
            })
    }

    fn push_free(&self, buffer: FrameBuffer) {
        // Queues are sized to the pool, so this only fails if the
        // circulation count is wrong.
        if let Err(buffer) = self.free.push(buffer) {
            error!(addr = %Addr(buffer.addr()), "free queue overflow, buffer released");
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn reclaim_slots(&self) {
        let reclaimed: Vec<FrameBuffer> = lock(&self.slots).unbind_all().collect();
        for buffer in reclaimed {
            self.push_free(buffer);
        }
    }

    /// Take a completed buffer, waiting up to `timeout`
    pub fn dequeue(&self, timeout: impl Into<Timeout>) -> Result<FrameBuffer> {
        let buffer = self
            .ready
            .pop(timeout.into())
            .ok_or(Error::NoBufferReady)?;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.stats.buffer_dequeued();
        Ok(buffer)
    }

    #[instrument(skip(self))]
    pub fn stream_start(&self) -> Result<()> {
        let mut control = lock(&self.control);
        if control.state == StreamState::Started {
            debug!("already streaming");
            return Ok(());
        }

        {
            let mut slots = lock(&self.slots);
            // slot buffers reclaimed by the last stop wait in the free queue
            while slots.primed() < MIN_BUFFERS {
                let Some(buffer) = self.free.pop() else { break };
                if let Err(buffer) = slots.prime(buffer) {
                    self.push_free(buffer);
                    break;
                }
            }

            let primed = slots.primed();
            if primed != MIN_BUFFERS {
                error!("ISI requires at least two frame buffers");
                return Err(Error::InsufficientBuffers {
                    primed,
                    required: MIN_BUFFERS,
                });
            }

            slots.reset_index();
            for (slot, addr) in slots.addresses().into_iter().enumerate() {
                if let Some(addr) = addr {
                    self.regs.set_output_buffer_addr(slot, addr);
                }
            }
        }

        self.sequence.store(0, Ordering::Relaxed);
        self.streaming.store(true, Ordering::Release);
        control.state = StreamState::Started;

        self.regs.clear_interrupt_status(INT_FRAME_RECEIVED);
        self.regs.enable_interrupts(INT_FRAME_RECEIVED);
        self.regs.start();

        if let Err(e) = control.source.stream_start() {
            error!("source {} stream start failed: {}", control.source.name(), e);
            self.disarm();
            control.state = StreamState::Stopped;
            return Err(e.into());
        }

        info!("streaming started");
        Ok(())
    }

    /// Stop capture. Queued buffers stay where they are; slot buffers go back
    /// to the free queue.
    #[instrument(skip(self))]
    pub fn stream_stop(&self) -> Result<()> {
        let mut control = lock(&self.control);
        if control.state == StreamState::Stopped {
            debug!("already stopped");
            return Ok(());
        }

        if let Err(e) = control.source.stream_stop() {
            warn!("source {} stream stop failed: {}", control.source.name(), e);
        }

        self.disarm();
        control.state = StreamState::Stopped;
        self.reclaim_slots();

        info!("streaming stopped");
        Ok(())
    }

    fn disarm(&self) {
        self.regs.stop();
        self.regs.disable_interrupts(INT_FRAME_RECEIVED);
        self.regs.clear_interrupt_status(INT_FRAME_RECEIVED);
        self.streaming.store(false, Ordering::Release);
    }

    /// Register or clear the buffer-ready signal
    pub fn set_signal(&self, signal: Option<BufferSignal>) -> Result<()> {
        let _control = lock(&self.control);
        if signal.is_some() && self.signal.load().is_some() {
            return Err(Error::AlreadyRegistered);
        }
        self.signal.store(signal.map(Arc::new));
        Ok(())
    }

    /// Frame-done interrupt service routine
    pub fn handle_interrupt(&self) {
        let status = self.regs.interrupt_status();
        self.regs.clear_interrupt_status(status);

        if status & INT_FRAME_RECEIVED == 0 {
            self.stats.spurious_interrupt();
            return;
        }
        if !self.streaming.load(Ordering::Acquire) {
            return;
        }

        let frame_size = self.frame_size.load(Ordering::Acquire);
        let mut slots = lock(&self.slots);
        let index = slots.active_index();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut recycled = None;
        let result = match slots.retire() {
            Retired::Completed(mut buffer) => {
                buffer.timestamp = self.epoch.elapsed();
                buffer.sequence = sequence;
                buffer.bytesused = frame_size;
                self.regs
                    .flush_and_invalidate_dcache(buffer.addr(), buffer.bytesused);

                match self.ready.push(buffer) {
                    Ok(()) => {
                        self.stats.frame_completed();
                        SignalResult::BufferDone
                    }
                    Err(buffer) => {
                        error!(slot = index, "ready queue full, recycling buffer");
                        recycled = Some(buffer);
                        self.stats.frame_dropped();
                        SignalResult::FrameDropped
                    }
                }
            }
            Retired::Dropped => {
                self.stats.frame_dropped();
                SignalResult::FrameDropped
            }
        };

        let next = recycled.or_else(|| self.pop_free_fitting(frame_size));
        if next.is_none() {
            self.stats.starved();
            warn!(slot = index, "No available input buffer, drop frame");
        }

        match slots.rebind(next) {
            Some(addr) => self.regs.set_output_buffer_addr(index, addr),
            None => error!(slot = index, "no drop sentinel reserved"),
        }
        slots.advance();
        drop(slots);

        if let Some(signal) = &*self.signal.load() {
            let _ = signal.try_send(result);
        }
    }

    /// Next free buffer large enough for a frame. Undersized ones are
    /// released rather than handed to the DMA.
    fn pop_free_fitting(&self, frame_size: usize) -> Option<FrameBuffer> {
        while let Some(buffer) = self.free.pop() {
            if buffer.capacity() >= frame_size {
                return Some(buffer);
            }
            error!(
                addr = %Addr(buffer.addr()),
                capacity = buffer.capacity(),
                frame_size,
                "free buffer smaller than the frame, released"
            );
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        None
    }

    /// Return every buffer the driver holds, sentinel included. Stream must
    /// be stopped.
    pub fn teardown(&self) -> Result<Vec<FrameBuffer>> {
        let control = lock(&self.control);
        if control.state == StreamState::Started {
            return Err(Error::StreamActive);
        }

        let mut buffers = Vec::with_capacity(self.pool_capacity + 1);
        while let Some(buffer) = self.ready.pop(Timeout::NoWait) {
            buffers.push(buffer);
        }

        let mut slots = lock(&self.slots);
        buffers.extend(slots.unbind_all());
        while let Some(buffer) = self.free.pop() {
            buffers.push(buffer);
        }
        buffers.extend(slots.take_sentinel());
        self.in_flight.store(0, Ordering::Release);

        debug!("released {} buffers", buffers.len());
        Ok(buffers)
    }

    pub fn state(&self) -> StreamState {
        lock(&self.control).state
    }

    /// Negotiated output format, if any
    pub fn format(&self) -> Option<Format> {
        lock(&self.control).negotiated.map(|n| n.output)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size.load(Ordering::Acquire)
    }

    /// Read the slot table with the frame interrupt masked
    fn inspect_slots<T>(&self, read: impl FnOnce(&SlotTable) -> T) -> T {
        let _control = lock(&self.control);
        let _masked = IrqMask::new(&self.regs, INT_FRAME_RECEIVED);
        let slots = lock(&self.slots);
        read(&*slots)
    }

    pub fn slot_addresses(&self) -> [Option<usize>; OUTPUT_SLOTS] {
        self.inspect_slots(SlotTable::addresses)
    }

    pub fn active_index(&self) -> usize {
        self.inspect_slots(SlotTable::active_index)
    }

    pub fn primed(&self) -> usize {
        self.inspect_slots(SlotTable::primed)
    }

    pub fn sentinel_addr(&self) -> Option<usize> {
        self.inspect_slots(SlotTable::sentinel_addr)
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}

impl<R: IsiRegisters, S: VideoSource> Drop for Isi<R, S> {
    fn drop(&mut self) {
        if *self.streaming.get_mut() {
            let _ = self.stream_stop();
        }
    }
}
