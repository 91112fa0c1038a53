use tracing::{trace, warn};

use crate::device::{CopyRegion, CopySource, ReadbackDevice, TargetStatus};
use crate::error::{DeviceError, ReadbackError};
use crate::types::{CaptureTarget, TargetKind, TextureId};

/// A render target bound as the source of subsequent pixel copies.
///
/// Dropping the guard destroys the temporary off-screen target, if one was
/// created, and restores the device's default bindings. That runs on every
/// exit path, so callers can use `?` freely between `bind` and the end of the
/// capture.
pub(crate) struct BoundTarget<'d, D: ReadbackDevice> {
    device: &'d mut D,
    offscreen: Option<D::Offscreen>,
}

impl<'d, D: ReadbackDevice> BoundTarget<'d, D> {
    pub(crate) fn bind(device: &'d mut D, target: CaptureTarget) -> Result<Self, ReadbackError> {
        match target {
            CaptureTarget::Surface => {
                let bound = Self {
                    device,
                    offscreen: None,
                };
                ensure_complete(bound.device.surface_status(), TargetKind::Surface)?;
                Ok(bound)
            }
            CaptureTarget::Texture(texture) => Self::bind_texture(device, texture),
        }
    }

    fn bind_texture(device: &'d mut D, texture: TextureId) -> Result<Self, ReadbackError> {
        let offscreen = device
            .create_offscreen()
            .map_err(|source| offscreen_error(texture, source))?;
        // From here on the guard owns the off-screen target and tears it down on failure.
        let mut bound = Self {
            device,
            offscreen: Some(offscreen),
        };
        if let Some(offscreen) = bound.offscreen.as_mut() {
            bound
                .device
                .attach_texture(offscreen, texture)
                .map_err(|source| offscreen_error(texture, source))?;
            ensure_complete(bound.device.offscreen_status(offscreen), TargetKind::Texture)?;
        }
        trace!(%texture, "bound texture through temporary off-screen target");
        Ok(bound)
    }

    /// The bound device, for work that does not read from the target.
    pub(crate) fn device(&mut self) -> &mut D {
        &mut *self.device
    }

    pub(crate) fn read_pixels(
        &mut self,
        region: &CopyRegion,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        let source = match self.offscreen.as_ref() {
            Some(offscreen) => CopySource::Offscreen(offscreen),
            None => CopySource::Surface,
        };
        self.device.read_pixels(source, region, dst)
    }

    pub(crate) fn copy_to_buffer(
        &mut self,
        region: &CopyRegion,
        buffer: &mut D::Buffer,
    ) -> Result<D::Fence, DeviceError> {
        let source = match self.offscreen.as_ref() {
            Some(offscreen) => CopySource::Offscreen(offscreen),
            None => CopySource::Surface,
        };
        self.device.copy_to_buffer(source, region, buffer)
    }
}

impl<D: ReadbackDevice> Drop for BoundTarget<'_, D> {
    fn drop(&mut self) {
        if let Some(offscreen) = self.offscreen.take() {
            self.device.destroy_offscreen(offscreen);
        }
        self.device.restore_default_bindings();
    }
}

fn ensure_complete(status: TargetStatus, target: TargetKind) -> Result<(), ReadbackError> {
    match status {
        TargetStatus::Complete => Ok(()),
        TargetStatus::Incomplete(reason) => {
            warn!(%target, %reason, "render target is incomplete");
            Err(ReadbackError::IncompleteTarget { target, reason })
        }
    }
}

fn offscreen_error(texture: TextureId, source: DeviceError) -> ReadbackError {
    warn!(%texture, error = %source, "failed to prepare off-screen target");
    ReadbackError::Offscreen { texture, source }
}
