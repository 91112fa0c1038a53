//! CPU-backed [`ReadbackDevice`] for tests and headless tooling.
//!
//! The device behaves like a driver with a lagging command queue: a copy
//! into a transfer buffer only lands when its fence retires, either because
//! the reader waited on it or because the caller ended the frame with
//! [`SoftwareDevice::finish_frame`]. Mapping a buffer whose copy has not
//! landed yet hands back whatever the buffer held before.

use std::collections::BTreeMap;

use tracing::trace;

use crate::device::{CopyRegion, CopySource, ReadbackDevice, TargetStatus};
use crate::error::DeviceError;
use crate::pixels::{pack_region, SourceOrder, SourceRows, SOURCE_BYTES_PER_PIXEL};
use crate::types::{Capabilities, PixelFormat, TextureId};

const DEFAULT_OFFSCREEN_LIMIT: usize = 8;

/// Counters for everything the device was asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub buffers_created: u32,
    pub buffers_destroyed: u32,
    pub copies_issued: u32,
    pub direct_reads: u32,
    pub maps: u32,
    pub failed_maps: u32,
    pub fence_waits: u32,
    pub offscreen_created: u32,
    pub offscreen_destroyed: u32,
    pub binding_restores: u32,
}

#[derive(Debug, Clone)]
struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * SOURCE_BYTES_PER_PIXEL],
        }
    }

    fn fill(&mut self, color: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(SOURCE_BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&color);
        }
    }

    fn rows(&self) -> SourceRows<'_> {
        SourceRows {
            bytes: &self.pixels,
            stride: self.width as usize * SOURCE_BYTES_PER_PIXEL,
            order: SourceOrder::Rgba,
        }
    }

    fn pack(&self, region: &CopyRegion, dst: &mut [u8]) -> Result<(), DeviceError> {
        let rect = region.rect;
        if !rect.fits_within(self.width, self.height) {
            return Err(DeviceError::OutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                target_width: self.width,
                target_height: self.height,
            });
        }
        pack_region(self.rows(), rect, region.format, region.reverse_rows, dst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct SoftwareBuffer {
    id: u32,
    capacity: usize,
    contents: Vec<u8>,
    pending: Option<(u64, Vec<u8>)>,
}

impl SoftwareBuffer {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareFence(u64);

#[derive(Debug)]
pub struct SoftwareOffscreen {
    handle: u32,
    texture: Option<TextureId>,
}

pub struct SoftwareDevice {
    surface: Canvas,
    surface_complete: bool,
    textures: BTreeMap<TextureId, Canvas>,
    next_texture: u32,
    buffer_mapping: bool,
    next_buffer: u32,
    live_buffers: usize,
    allocations_left: Option<usize>,
    failing_maps: u32,
    failing_copies: u32,
    last_fence: u64,
    retired_fence: u64,
    offscreen_limit: usize,
    live_offscreen: usize,
    next_offscreen: u32,
    bound_offscreen: Option<u32>,
    stats: SoftwareStats,
}

impl SoftwareDevice {
    /// Device with a cleared `width`x`height` RGBA surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: Canvas::new(width, height),
            surface_complete: true,
            textures: BTreeMap::new(),
            next_texture: 1,
            buffer_mapping: true,
            next_buffer: 1,
            live_buffers: 0,
            allocations_left: None,
            failing_maps: 0,
            failing_copies: 0,
            last_fence: 0,
            retired_fence: 0,
            offscreen_limit: DEFAULT_OFFSCREEN_LIMIT,
            live_offscreen: 0,
            next_offscreen: 1,
            bound_offscreen: None,
            stats: SoftwareStats::default(),
        }
    }

    /// Caps the number of off-screen targets that may be alive at once.
    pub fn with_offscreen_limit(mut self, limit: usize) -> Self {
        self.offscreen_limit = limit;
        self
    }

    /// Reports transfer buffers as unmappable.
    pub fn without_buffer_mapping(mut self) -> Self {
        self.buffer_mapping = false;
        self
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    pub fn fill_surface(&mut self, color: [u8; 4]) {
        self.surface.fill(color);
    }

    /// Writes one RGBA pixel, counting rows from the top.
    pub fn set_surface_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) -> Result<(), DeviceError> {
        let surface = &mut self.surface;
        if x >= surface.width || y >= surface.height {
            return Err(DeviceError::OutOfBounds {
                x,
                y,
                width: 1,
                height: 1,
                target_width: surface.width,
                target_height: surface.height,
            });
        }
        let start = (y as usize * surface.width as usize + x as usize) * SOURCE_BYTES_PER_PIXEL;
        surface.pixels[start..start + SOURCE_BYTES_PER_PIXEL].copy_from_slice(&color);
        Ok(())
    }

    pub fn set_surface_complete(&mut self, complete: bool) {
        self.surface_complete = complete;
    }

    pub fn register_texture(&mut self, width: u32, height: u32) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, Canvas::new(width, height));
        id
    }

    pub fn fill_texture(&mut self, texture: TextureId, color: [u8; 4]) -> Result<(), DeviceError> {
        self.textures
            .get_mut(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?
            .fill(color);
        Ok(())
    }

    /// Deletes a texture. Off-screen targets still pointing at it become incomplete.
    pub fn remove_texture(&mut self, texture: TextureId) -> bool {
        self.textures.remove(&texture).is_some()
    }

    /// Lets `count` more buffer allocations succeed, then fails every later one.
    pub fn fail_allocations_after(&mut self, count: usize) {
        self.allocations_left = Some(count);
    }

    pub fn fail_next_maps(&mut self, count: u32) {
        self.failing_maps = count;
    }

    /// Makes the next `count` buffer copies fail before they are queued.
    pub fn fail_next_copies(&mut self, count: u32) {
        self.failing_copies = count;
    }

    /// Retires every copy issued so far, as the end of a frame would.
    pub fn finish_frame(&mut self) {
        self.retired_fence = self.last_fence;
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers
    }

    pub fn live_offscreen(&self) -> usize {
        self.live_offscreen
    }

    pub fn has_bound_offscreen(&self) -> bool {
        self.bound_offscreen.is_some()
    }

    fn source(&self, source: CopySource<'_, SoftwareOffscreen>) -> Result<&Canvas, DeviceError> {
        match source {
            CopySource::Surface => Ok(&self.surface),
            CopySource::Offscreen(target) => {
                let texture = target.texture.ok_or_else(|| {
                    DeviceError::Validation("off-screen target has no color attachment".into())
                })?;
                self.textures
                    .get(&texture)
                    .ok_or(DeviceError::UnknownTexture(texture))
            }
        }
    }

    fn retired(&self, fence: u64) -> bool {
        fence <= self.retired_fence
    }
}

impl ReadbackDevice for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type Fence = SoftwareFence;
    type Offscreen = SoftwareOffscreen;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            buffer_mapping: self.buffer_mapping,
            formats: PixelFormat::ALL.to_vec(),
        }
    }

    fn surface_status(&self) -> TargetStatus {
        if self.surface_complete {
            TargetStatus::Complete
        } else {
            TargetStatus::Incomplete("surface has no attached drawable".into())
        }
    }

    fn create_offscreen(&mut self) -> Result<SoftwareOffscreen, DeviceError> {
        if self.live_offscreen >= self.offscreen_limit {
            return Err(DeviceError::TargetsExhausted {
                live: self.live_offscreen,
            });
        }
        let handle = self.next_offscreen;
        self.next_offscreen += 1;
        self.live_offscreen += 1;
        self.bound_offscreen = Some(handle);
        self.stats.offscreen_created += 1;
        trace!(handle, "created off-screen target");
        Ok(SoftwareOffscreen {
            handle,
            texture: None,
        })
    }

    fn attach_texture(
        &mut self,
        target: &mut SoftwareOffscreen,
        texture: TextureId,
    ) -> Result<(), DeviceError> {
        if !self.textures.contains_key(&texture) {
            return Err(DeviceError::UnknownTexture(texture));
        }
        target.texture = Some(texture);
        Ok(())
    }

    fn offscreen_status(&self, target: &SoftwareOffscreen) -> TargetStatus {
        match target.texture {
            None => TargetStatus::Incomplete("missing color attachment".into()),
            Some(texture) if !self.textures.contains_key(&texture) => {
                TargetStatus::Incomplete(format!("attached texture {texture} was deleted"))
            }
            Some(_) => TargetStatus::Complete,
        }
    }

    fn destroy_offscreen(&mut self, target: SoftwareOffscreen) {
        self.live_offscreen = self.live_offscreen.saturating_sub(1);
        self.stats.offscreen_destroyed += 1;
        trace!(handle = target.handle, "destroyed off-screen target");
    }

    fn restore_default_bindings(&mut self) {
        self.bound_offscreen = None;
        self.stats.binding_restores += 1;
    }

    fn read_pixels(
        &mut self,
        source: CopySource<'_, SoftwareOffscreen>,
        region: &CopyRegion,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.source(source)?.pack(region, dst)?;
        self.stats.direct_reads += 1;
        Ok(())
    }

    fn create_buffer(&mut self, capacity: usize) -> Result<SoftwareBuffer, DeviceError> {
        match self.allocations_left.as_mut() {
            Some(0) => return Err(DeviceError::OutOfMemory { bytes: capacity }),
            Some(left) => *left -= 1,
            None => {}
        }
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.live_buffers += 1;
        self.stats.buffers_created += 1;
        Ok(SoftwareBuffer {
            id,
            capacity,
            contents: Vec::new(),
            pending: None,
        })
    }

    fn destroy_buffer(&mut self, buffer: SoftwareBuffer) {
        self.live_buffers = self.live_buffers.saturating_sub(1);
        self.stats.buffers_destroyed += 1;
        trace!(id = buffer.id, "destroyed transfer buffer");
    }

    fn copy_to_buffer(
        &mut self,
        source: CopySource<'_, SoftwareOffscreen>,
        region: &CopyRegion,
        buffer: &mut SoftwareBuffer,
    ) -> Result<SoftwareFence, DeviceError> {
        let len = region.byte_len();
        if len > buffer.capacity {
            return Err(DeviceError::Validation(format!(
                "copy of {len} bytes overflows transfer buffer of {} bytes",
                buffer.capacity
            )));
        }
        if self.failing_copies > 0 {
            self.failing_copies -= 1;
            return Err(DeviceError::Validation(format!(
                "copy into transfer buffer {} was rejected",
                buffer.id
            )));
        }
        let mut staged = vec![0; len];
        self.source(source)?.pack(region, &mut staged)?;

        self.last_fence += 1;
        let fence = self.last_fence;
        if let Some((earlier, pixels)) = buffer.pending.take() {
            if self.retired(earlier) {
                buffer.contents = pixels;
            }
        }
        buffer.pending = Some((fence, staged));
        self.stats.copies_issued += 1;
        Ok(SoftwareFence(fence))
    }

    fn fence_signaled(&mut self, fence: &SoftwareFence) -> bool {
        self.retired(fence.0)
    }

    fn wait_fence(&mut self, fence: SoftwareFence) -> Result<(), DeviceError> {
        self.stats.fence_waits += 1;
        self.retired_fence = self.retired_fence.max(fence.0);
        Ok(())
    }

    fn map_read(&mut self, buffer: &mut SoftwareBuffer, dst: &mut [u8]) -> Result<(), DeviceError> {
        let landed = matches!(&buffer.pending, Some((fence, _)) if self.retired(*fence));
        if landed {
            if let Some((_, pixels)) = buffer.pending.take() {
                buffer.contents = pixels;
            }
        }
        if self.failing_maps > 0 {
            self.failing_maps -= 1;
            self.stats.failed_maps += 1;
            return Err(DeviceError::Map(format!(
                "transfer buffer {} could not be mapped",
                buffer.id
            )));
        }
        if buffer.contents.len() != dst.len() {
            self.stats.failed_maps += 1;
            return Err(DeviceError::Map(format!(
                "transfer buffer {} holds {} bytes, destination wants {}",
                buffer.id,
                buffer.contents.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(&buffer.contents);
        self.stats.maps += 1;
        Ok(())
    }
}
