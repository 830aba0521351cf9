//! Double-buffered hardware output slots

use crate::capture::frame::FrameBuffer;
use crate::hal::OUTPUT_SLOTS;

#[derive(Debug, Default)]
struct ActiveSlot {
    addr: Option<usize>,
    buffer: Option<FrameBuffer>,
}

/// What came out of a slot the hardware just finished
#[derive(Debug)]
pub enum Retired {
    Completed(FrameBuffer),
    /// The slot pointed at the drop sentinel
    Dropped,
}

/// The two output slots, the index of the one the hardware is filling, and
/// the drop sentinel.
///
/// A slot bound to the sentinel carries the sentinel address and no buffer.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: [ActiveSlot; OUTPUT_SLOTS],
    index: usize,
    sentinel: Option<FrameBuffer>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sentinel_addr(&self) -> Option<usize> {
        self.sentinel.as_ref().map(FrameBuffer::addr)
    }

    pub fn sentinel_capacity(&self) -> Option<usize> {
        self.sentinel.as_ref().map(FrameBuffer::capacity)
    }

    pub fn has_sentinel(&self) -> bool {
        self.sentinel.is_some()
    }

    /// Keep `buffer` as the permanent drop target
    pub fn reserve_sentinel(&mut self, buffer: FrameBuffer) {
        debug_assert!(self.sentinel.is_none());
        self.sentinel = Some(buffer);
    }

    pub fn take_sentinel(&mut self) -> Option<FrameBuffer> {
        self.sentinel.take()
    }

    /// Slots bound to a real buffer
    pub fn primed(&self) -> usize {
        self.slots.iter().filter(|s| s.buffer.is_some()).count()
    }

    /// Capacities of the buffers bound to slots, sentinel excluded
    pub fn bound_capacities(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .filter_map(|s| s.buffer.as_ref().map(FrameBuffer::capacity))
    }

    /// Bind `buffer` into the first empty slot, handing it back when both
    /// slots are taken.
    pub fn prime(&mut self, buffer: FrameBuffer) -> Result<usize, FrameBuffer> {
        match self.slots.iter().position(|s| s.buffer.is_none()) {
            Some(i) => {
                self.slots[i] = ActiveSlot {
                    addr: Some(buffer.addr()),
                    buffer: Some(buffer),
                };
                Ok(i)
            }
            None => Err(buffer),
        }
    }

    pub fn active_index(&self) -> usize {
        self.index
    }

    pub fn addresses(&self) -> [Option<usize>; OUTPUT_SLOTS] {
        [self.slots[0].addr, self.slots[1].addr]
    }

    /// Harvest the slot the hardware just completed
    pub fn retire(&mut self) -> Retired {
        match self.slots[self.index].buffer.take() {
            Some(buffer) => Retired::Completed(buffer),
            None => Retired::Dropped,
        }
    }

    /// Bind the active slot to `next`, or to the sentinel when there is none.
    /// Returns the address to program, `None` only without a sentinel.
    pub fn rebind(&mut self, next: Option<FrameBuffer>) -> Option<usize> {
        let slot = &mut self.slots[self.index];
        slot.addr = match &next {
            Some(buffer) => Some(buffer.addr()),
            None => self.sentinel.as_ref().map(FrameBuffer::addr),
        };
        slot.buffer = next;
        slot.addr
    }

    /// Hand the active index to the other slot
    pub fn advance(&mut self) {
        self.index ^= 1;
    }

    pub fn reset_index(&mut self) {
        self.index = 0;
    }

    /// Empty both slots and reset the index, returning bound buffers in slot
    /// order.
    pub fn unbind_all(&mut self) -> impl Iterator<Item = FrameBuffer> {
        self.index = 0;
        let [a, b] = std::mem::take(&mut self.slots);
        [a.buffer, b.buffer].into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primed_table() -> (SlotTable, usize, [usize; 2]) {
        let mut table = SlotTable::new();
        let sentinel = FrameBuffer::new(16);
        let sentinel_addr = sentinel.addr();
        table.reserve_sentinel(sentinel);
        let a = FrameBuffer::new(16);
        let b = FrameBuffer::new(16);
        let addrs = [a.addr(), b.addr()];
        assert_eq!(table.prime(a).unwrap(), 0);
        assert_eq!(table.prime(b).unwrap(), 1);
        (table, sentinel_addr, addrs)
    }

    #[test]
    fn priming_fills_two_slots_then_refuses() {
        let (mut table, _, addrs) = primed_table();
        assert_eq!(table.primed(), 2);
        assert_eq!(table.addresses(), [Some(addrs[0]), Some(addrs[1])]);

        let extra = FrameBuffer::new(16);
        let addr = extra.addr();
        let back = table.prime(extra).unwrap_err();
        assert_eq!(back.addr(), addr);
    }

    #[test]
    fn retire_then_rebind_alternates_slots() {
        let (mut table, _, addrs) = primed_table();

        let Retired::Completed(first) = table.retire() else {
            panic!("slot 0 should hold a buffer");
        };
        assert_eq!(first.addr(), addrs[0]);
        let next = FrameBuffer::new(16);
        let next_addr = next.addr();
        assert_eq!(table.rebind(Some(next)), Some(next_addr));
        table.advance();
        assert_eq!(table.active_index(), 1);

        let Retired::Completed(second) = table.retire() else {
            panic!("slot 1 should hold a buffer");
        };
        assert_eq!(second.addr(), addrs[1]);
    }

    #[test]
    fn starved_slot_points_at_sentinel_and_drops() {
        let (mut table, sentinel_addr, _) = primed_table();

        assert!(matches!(table.retire(), Retired::Completed(_)));
        assert_eq!(table.rebind(None), Some(sentinel_addr));
        assert_eq!(table.addresses()[0], Some(sentinel_addr));
        assert_eq!(table.primed(), 1);

        table.advance();
        table.advance();
        assert!(matches!(table.retire(), Retired::Dropped));
    }

    #[test]
    fn unbind_returns_buffers_in_slot_order() {
        let (mut table, _, addrs) = primed_table();
        table.advance();

        let back: Vec<_> = table.unbind_all().map(|b| b.addr()).collect();
        assert_eq!(back, addrs);
        assert_eq!(table.primed(), 0);
        assert_eq!(table.active_index(), 0);
        assert_eq!(table.addresses(), [None, None]);
        assert!(table.has_sentinel());
    }
}
