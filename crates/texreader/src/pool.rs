use tracing::{debug, trace, warn};

use crate::device::ReadbackDevice;
use crate::error::ReadbackError;
use crate::types::PoolState;

/// One transfer buffer and the copy most recently issued into it.
pub(crate) struct Slot<D: ReadbackDevice> {
    pub(crate) buffer: D::Buffer,
    pub(crate) in_flight: Option<D::Fence>,
}

/// Ring of equally sized transfer buffers.
///
/// The pool is either fully allocated or empty. `cursor` always equals
/// `issued % len` while allocated.
pub(crate) struct TransferPool<D: ReadbackDevice> {
    slots: Vec<Slot<D>>,
    capacity: usize,
    cursor: usize,
    issued: u32,
}

impl<D: ReadbackDevice> TransferPool<D> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            capacity: 0,
            cursor: 0,
            issued: 0,
        }
    }

    pub(crate) fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Makes sure the pool holds `buffer_count` buffers of exactly `capacity`
    /// bytes, reallocating from scratch otherwise. Returns true when it had to
    /// (re)allocate.
    pub(crate) fn ensure(
        &mut self,
        device: &mut D,
        capacity: usize,
        buffer_count: usize,
    ) -> Result<bool, ReadbackError> {
        if self.is_allocated() && self.capacity == capacity && self.slots.len() == buffer_count {
            return Ok(false);
        }

        if self.is_allocated() {
            debug!(
                old_capacity = self.capacity,
                new_capacity = capacity,
                old_count = self.slots.len(),
                new_count = buffer_count,
                "transfer pool shape changed; reallocating"
            );
        }
        self.destroy(device);

        let mut slots = Vec::with_capacity(buffer_count);
        for index in 0..buffer_count {
            match device.create_buffer(capacity) {
                Ok(buffer) => {
                    trace!(index, capacity, "allocated transfer buffer");
                    slots.push(Slot {
                        buffer,
                        in_flight: None,
                    });
                }
                Err(source) => {
                    warn!(
                        index,
                        capacity,
                        error = %source,
                        "transfer buffer allocation failed; releasing partial pool"
                    );
                    for slot in slots {
                        device.destroy_buffer(slot.buffer);
                    }
                    return Err(ReadbackError::Allocation {
                        count: buffer_count,
                        capacity,
                        source,
                    });
                }
            }
        }

        self.slots = slots;
        self.capacity = capacity;
        self.cursor = 0;
        self.issued = 0;
        debug!(buffer_count, capacity, "allocated transfer pool");
        Ok(true)
    }

    /// Releases every buffer. Safe to call on an empty pool.
    pub(crate) fn destroy(&mut self, device: &mut D) {
        if self.is_allocated() {
            let count = self.slots.len();
            for slot in self.slots.drain(..) {
                device.destroy_buffer(slot.buffer);
            }
            debug!(count, capacity = self.capacity, "released transfer pool");
        }
        self.capacity = 0;
        self.cursor = 0;
        self.issued = 0;
    }

    /// True until every buffer has received one copy.
    pub(crate) fn warming_up(&self) -> bool {
        (self.issued as usize) < self.slots.len()
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn current_mut(&mut self) -> &mut Slot<D> {
        &mut self.slots[self.cursor]
    }

    /// Moves to the next buffer after a copy was issued.
    ///
    /// `issued` never wraps to zero: on reaching `u32::MAX` it drops back to
    /// the smallest post-warmup value that still agrees with the cursor.
    pub(crate) fn advance(&mut self) {
        let len = self.slots.len();
        self.cursor = (self.cursor + 1) % len;
        self.issued = match self.issued.checked_add(1) {
            Some(next) if next != u32::MAX => next,
            _ => (len + self.cursor) as u32,
        };
    }

    pub(crate) fn state(&self) -> PoolState {
        PoolState {
            allocated: self.is_allocated(),
            capacity: self.capacity,
            buffer_count: self.slots.len(),
            cursor: self.cursor,
            issued: self.issued,
        }
    }
}
