//! Pre-sized buffer queues shared with interrupt context

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use crossbeam::queue::ArrayQueue;

use crate::capture::frame::FrameBuffer;

/// How long a dequeue may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    NoWait,
    After(Duration),
    Forever,
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        if value.is_zero() {
            Self::NoWait
        } else {
            Self::After(value)
        }
    }
}

/// Empty buffers waiting to be handed to the hardware
pub struct FreeQueue {
    inner: ArrayQueue<FrameBuffer>,
}

impl FreeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Append at the tail, handing the buffer back when full
    pub fn push(&self, buffer: FrameBuffer) -> Result<(), FrameBuffer> {
        self.inner.push(buffer)
    }

    /// Take from the head without blocking
    pub fn pop(&self) -> Option<FrameBuffer> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

/// Completed buffers waiting for the consumer
pub struct ReadyQueue {
    tx: Sender<FrameBuffer>,
    rx: Receiver<FrameBuffer>,
}

impl ReadyQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Non-blocking; hands the buffer back when full
    pub fn push(&self, buffer: FrameBuffer) -> Result<(), FrameBuffer> {
        self.tx.try_send(buffer).map_err(|e| match e {
            TrySendError::Full(b) | TrySendError::Disconnected(b) => b,
        })
    }

    pub fn pop(&self, timeout: Timeout) -> Option<FrameBuffer> {
        match timeout {
            Timeout::NoWait => self.rx.try_recv().ok(),
            Timeout::After(wait) => match self.rx.recv_timeout(wait) {
                Ok(buffer) => Some(buffer),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            },
            Timeout::Forever => self.rx.recv().ok(),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn free_queue_is_fifo_and_bounded() {
        let queue = FreeQueue::new(2);
        let a = FrameBuffer::new(8);
        let b = FrameBuffer::new(8);
        let (addr_a, addr_b) = (a.addr(), b.addr());

        queue.push(a).unwrap();
        queue.push(b).unwrap();
        assert!(queue.push(FrameBuffer::new(8)).is_err());

        assert_eq!(queue.pop().map(|b| b.addr()), Some(addr_a));
        assert_eq!(queue.pop().map(|b| b.addr()), Some(addr_b));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn ready_queue_times_out_when_empty() {
        let queue = ReadyQueue::new(4);
        let start = Instant::now();
        assert!(queue.pop(Timeout::After(Duration::from_millis(30))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(queue.pop(Timeout::NoWait).is_none());
    }

    #[test]
    fn ready_queue_wakes_blocked_consumer() {
        let queue = std::sync::Arc::new(ReadyQueue::new(4));
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(FrameBuffer::new(8)).unwrap();
        });
        assert!(queue.pop(Timeout::Forever).is_some());
        handle.join().unwrap();
    }

    #[test]
    fn zero_duration_means_no_wait() {
        assert_eq!(Timeout::from(Duration::ZERO), Timeout::NoWait);
        assert_eq!(
            Timeout::from(Duration::from_millis(5)),
            Timeout::After(Duration::from_millis(5))
        );
    }
}
