//! The boundary between the reader and the rendering context it runs on.
//!
//! The reader never owns the context. Every call receives `&mut D` for a
//! device whose context is already current on the calling thread, and the
//! device hands back opaque buffer, fence, and off-screen target handles that
//! the reader stores and returns to it later.

use crate::error::DeviceError;
use crate::types::{Capabilities, PixelFormat, Rect, TextureId};

/// Pixels a single copy covers and how they are packed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub rect: Rect,
    pub format: PixelFormat,
    pub reverse_rows: bool,
}

impl CopyRegion {
    /// Tightly packed size of the region in `format`.
    pub fn byte_len(&self) -> usize {
        self.rect
            .pixel_count()
            .saturating_mul(usize::from(self.format.bytes_per_pixel()))
    }
}

/// Render target a copy reads from.
#[derive(Debug)]
pub enum CopySource<'a, T> {
    Surface,
    Offscreen(&'a T),
}

impl<T> Clone for CopySource<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CopySource<'_, T> {}

/// Result of a render-target completeness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Incomplete(String),
}

impl TargetStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, TargetStatus::Complete)
    }
}

/// Operations the reader needs from a rendering context.
///
/// Copies issued through [`copy_to_buffer`](Self::copy_to_buffer) return
/// before the device executes them. The returned fence is the only thing
/// that says when the buffer contents are valid; implementations may leave
/// the buffer holding older data until the fence has signaled.
pub trait ReadbackDevice {
    type Buffer;
    type Fence;
    type Offscreen;

    /// Resolved once by the reader; implementations should not change the answer.
    fn capabilities(&self) -> Capabilities;

    fn surface_status(&self) -> TargetStatus;

    /// Creates an empty off-screen target and makes it the copy source.
    fn create_offscreen(&mut self) -> Result<Self::Offscreen, DeviceError>;

    fn attach_texture(
        &mut self,
        target: &mut Self::Offscreen,
        texture: TextureId,
    ) -> Result<(), DeviceError>;

    fn offscreen_status(&self, target: &Self::Offscreen) -> TargetStatus;

    fn destroy_offscreen(&mut self, target: Self::Offscreen);

    /// Returns target, texture, and off-screen bindings to their defaults.
    fn restore_default_bindings(&mut self);

    /// Blocking copy straight into host memory. `dst` is exactly `region.byte_len()` long.
    fn read_pixels(
        &mut self,
        source: CopySource<'_, Self::Offscreen>,
        region: &CopyRegion,
        dst: &mut [u8],
    ) -> Result<(), DeviceError>;

    fn create_buffer(&mut self, capacity: usize) -> Result<Self::Buffer, DeviceError>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Issues a non-blocking copy into `buffer`.
    fn copy_to_buffer(
        &mut self,
        source: CopySource<'_, Self::Offscreen>,
        region: &CopyRegion,
        buffer: &mut Self::Buffer,
    ) -> Result<Self::Fence, DeviceError>;

    /// Non-blocking query.
    fn fence_signaled(&mut self, fence: &Self::Fence) -> bool;

    /// Blocks until the copy guarded by `fence` has finished.
    fn wait_fence(&mut self, fence: Self::Fence) -> Result<(), DeviceError>;

    /// Maps the buffer read-only, copies the most recent copy's pixels into
    /// `dst`, and unmaps it. On error `dst` is left untouched.
    fn map_read(&mut self, buffer: &mut Self::Buffer, dst: &mut [u8]) -> Result<(), DeviceError>;
}
