use tracing::{trace, warn};

use crate::device::ReadbackDevice;
use crate::error::ErrorKind;
use crate::pool::Slot;

/// What draining a transfer buffer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// `dst` now holds the buffer's pixels.
    Delivered,
    /// The copy could not be read back; `dst` is unchanged.
    Stale,
}

/// Reads the copy held in `slot` into `dst`.
///
/// Waits on the slot's fence first when the device has not finished the copy
/// yet, so the buffer is never mapped while the device is still writing it.
pub(crate) fn drain<D: ReadbackDevice>(
    device: &mut D,
    slot: &mut Slot<D>,
    dst: &mut [u8],
) -> Completion {
    let Some(fence) = slot.in_flight.take() else {
        warn!(
            kind = ?ErrorKind::Transient,
            "transfer buffer holds no completed copy; keeping previous pixels"
        );
        return Completion::Stale;
    };

    if !device.fence_signaled(&fence) {
        trace!("transfer copy still in flight; waiting on its fence");
        if let Err(error) = device.wait_fence(fence) {
            warn!(
                kind = ?ErrorKind::Transient,
                %error,
                "waiting for transfer copy failed; keeping previous pixels"
            );
            return Completion::Stale;
        }
    }

    match device.map_read(&mut slot.buffer, dst) {
        Ok(()) => {
            trace!(bytes = dst.len(), "drained transfer buffer");
            Completion::Delivered
        }
        Err(error) => {
            warn!(
                kind = ?ErrorKind::Transient,
                %error,
                "failed to map transfer buffer; keeping previous pixels"
            );
            Completion::Stale
        }
    }
}
