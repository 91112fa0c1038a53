use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, TryRecvError};
use tracing::{debug, trace, warn};

use super::context::GpuContext;
use crate::device::{CopyRegion, CopySource, ReadbackDevice, TargetStatus};
use crate::error::DeviceError;
use crate::pixels::{align_to, pack_region, SourceOrder, SourceRows, SOURCE_BYTES_PER_PIXEL};
use crate::types::{Capabilities, PixelFormat, Rect, TextureId};

/// Format used for textures created through [`WgpuDevice::create_target_texture`].
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Staging buffer that grows to fit the padded rows of the largest copy.
pub struct WgpuBuffer {
    capacity: usize,
    staging: Option<wgpu::Buffer>,
    staged_size: u64,
    layout: Option<StagedLayout>,
    /// Submission that carried the last copy into `staging`.
    submission: Option<wgpu::SubmissionIndex>,
}

impl WgpuBuffer {
    /// Logical byte size the buffer was created for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Shape of the last copy issued into a [`WgpuBuffer`].
#[derive(Debug, Clone, Copy)]
struct StagedLayout {
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    order: SourceOrder,
    format: PixelFormat,
    reverse_rows: bool,
}

impl StagedLayout {
    fn staged_len(&self) -> u64 {
        u64::from(self.padded_bytes_per_row) * u64::from(self.height)
    }
}

/// Marks the queue submission that carried one copy.
pub struct WgpuFence {
    index: wgpu::SubmissionIndex,
    done: Arc<AtomicBool>,
}

pub struct WgpuOffscreen {
    handle: u32,
    attachment: Option<(TextureId, wgpu::Texture)>,
}

/// [`ReadbackDevice`] over a `wgpu` device and queue.
///
/// Caller textures are registered up front and referred to by [`TextureId`].
/// The "surface" is whatever texture the caller most recently handed to
/// [`set_surface_texture`](Self::set_surface_texture), typically the
/// acquired swapchain frame configured with `COPY_SRC` usage.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: BTreeMap<TextureId, wgpu::Texture>,
    next_texture: u32,
    surface: Option<wgpu::Texture>,
    next_offscreen: u32,
    bound_offscreen: Option<u32>,
}

impl WgpuDevice {
    pub fn new(context: &GpuContext) -> Self {
        Self::from_parts(context.device.clone(), context.queue.clone())
    }

    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            textures: BTreeMap::new(),
            next_texture: 1,
            surface: None,
            next_offscreen: 1,
            bound_offscreen: None,
        }
    }

    pub fn register_texture(&mut self, texture: wgpu::Texture) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        trace!(%id, width = texture.width(), height = texture.height(), "registered texture");
        self.textures.insert(id, texture);
        id
    }

    pub fn unregister_texture(&mut self, id: TextureId) -> Option<wgpu::Texture> {
        self.textures.remove(&id)
    }

    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&id)
    }

    /// Sets the texture captured for [`CaptureTarget::Surface`](crate::CaptureTarget::Surface).
    pub fn set_surface_texture(&mut self, texture: Option<wgpu::Texture>) {
        self.surface = texture;
    }

    /// True while an off-screen target is bound as the copy source.
    pub fn has_bound_offscreen(&self) -> bool {
        self.bound_offscreen.is_some()
    }

    /// Creates a single-sampled texture that can be rendered to and read back.
    pub fn create_target_texture(&self, width: u32, height: u32, label: &str) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    /// Clears a registered texture to `color` with a render pass.
    pub fn fill_texture(&mut self, id: TextureId, color: [u8; 4]) -> Result<(), DeviceError> {
        let texture = self
            .textures
            .get(&id)
            .ok_or(DeviceError::UnknownTexture(id))?;
        self.clear(texture, color)
    }

    /// Clears the current surface texture to `color`.
    pub fn fill_surface(&mut self, color: [u8; 4]) -> Result<(), DeviceError> {
        let texture = self
            .surface
            .as_ref()
            .ok_or_else(|| DeviceError::Validation("no surface texture is set".into()))?;
        self.clear(texture, color)
    }

    fn clear(&self, texture: &wgpu::Texture, color: [u8; 4]) -> Result<(), DeviceError> {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let [r, g, b, a] = color.map(|channel| f64::from(channel) / 255.0);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texreader clear"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("texreader clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DeviceError::Validation(error.to_string())),
            None => Ok(()),
        }
    }

    fn resolve<'a>(
        &'a self,
        source: CopySource<'a, WgpuOffscreen>,
    ) -> Result<&'a wgpu::Texture, DeviceError> {
        match source {
            CopySource::Surface => self
                .surface
                .as_ref()
                .ok_or_else(|| DeviceError::Validation("no surface texture is set".into())),
            CopySource::Offscreen(target) => target
                .attachment
                .as_ref()
                .map(|(_, texture)| texture)
                .ok_or_else(|| {
                    DeviceError::Validation("off-screen target has no color attachment".into())
                }),
        }
    }

    /// Grows `buffer` when needed and encodes the copy. Returns the submission index.
    fn submit_copy(
        &self,
        texture: &wgpu::Texture,
        region: &CopyRegion,
        buffer: &mut WgpuBuffer,
    ) -> Result<wgpu::SubmissionIndex, DeviceError> {
        let rect = region.rect;
        if !rect.fits_within(texture.width(), texture.height()) {
            return Err(DeviceError::OutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                target_width: texture.width(),
                target_height: texture.height(),
            });
        }
        let order = source_order(texture.format()).ok_or_else(|| {
            DeviceError::Validation(format!("{:?} cannot be read back", texture.format()))
        })?;
        let unpadded = rect.width as usize * SOURCE_BYTES_PER_PIXEL;
        let padded_bytes_per_row =
            align_to(unpadded, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize) as u32;
        let layout = StagedLayout {
            width: rect.width,
            height: rect.height,
            padded_bytes_per_row,
            order,
            format: region.format,
            reverse_rows: region.reverse_rows,
        };
        self.reserve(buffer, layout.staged_len())?;
        let staging = buffer
            .staging
            .as_ref()
            .ok_or_else(|| DeviceError::Validation("transfer buffer has no storage".into()))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texreader readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            buffer.layout = None;
            buffer.submission = None;
            return Err(DeviceError::Validation(error.to_string()));
        }
        buffer.layout = Some(layout);
        buffer.submission = Some(index.clone());
        Ok(index)
    }

    fn reserve(&self, buffer: &mut WgpuBuffer, size: u64) -> Result<(), DeviceError> {
        if buffer.staging.is_some() && buffer.staged_size >= size {
            return Ok(());
        }
        if let Some(old) = buffer.staging.take() {
            old.destroy();
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texreader transfer buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            buffer.staged_size = 0;
            return Err(DeviceError::OutOfMemory {
                bytes: size as usize,
            });
        }
        debug!(size, "grew transfer staging buffer");
        buffer.staging = Some(staging);
        buffer.staged_size = size;
        Ok(())
    }

    fn poll(&self, poll: wgpu::PollType) -> Result<(), DeviceError> {
        self.device
            .poll(poll)
            .map(|_| ())
            .map_err(|err| DeviceError::Lost(err.to_string()))
    }
}

impl ReadbackDevice for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Fence = WgpuFence;
    type Offscreen = WgpuOffscreen;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            buffer_mapping: true,
            formats: PixelFormat::ALL.to_vec(),
        }
    }

    fn surface_status(&self) -> TargetStatus {
        match &self.surface {
            Some(texture) => texture_status(texture),
            None => TargetStatus::Incomplete("no surface texture is set".into()),
        }
    }

    fn create_offscreen(&mut self) -> Result<WgpuOffscreen, DeviceError> {
        let handle = self.next_offscreen;
        self.next_offscreen = self.next_offscreen.wrapping_add(1);
        self.bound_offscreen = Some(handle);
        Ok(WgpuOffscreen {
            handle,
            attachment: None,
        })
    }

    fn attach_texture(
        &mut self,
        target: &mut WgpuOffscreen,
        texture: TextureId,
    ) -> Result<(), DeviceError> {
        let resolved = self
            .textures
            .get(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?;
        target.attachment = Some((texture, resolved.clone()));
        Ok(())
    }

    fn offscreen_status(&self, target: &WgpuOffscreen) -> TargetStatus {
        match &target.attachment {
            Some((_, texture)) => texture_status(texture),
            None => TargetStatus::Incomplete("missing color attachment".into()),
        }
    }

    fn destroy_offscreen(&mut self, target: WgpuOffscreen) {
        trace!(
            handle = target.handle,
            texture = ?target.attachment.as_ref().map(|(id, _)| *id),
            "released off-screen target"
        );
    }

    fn restore_default_bindings(&mut self) {
        self.bound_offscreen = None;
    }

    fn read_pixels(
        &mut self,
        source: CopySource<'_, WgpuOffscreen>,
        region: &CopyRegion,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        let mut buffer = self.create_buffer(region.byte_len())?;
        let result = self
            .copy_to_buffer(source, region, &mut buffer)
            .and_then(|fence| self.wait_fence(fence))
            .and_then(|()| self.map_read(&mut buffer, dst));
        self.destroy_buffer(buffer);
        result
    }

    fn create_buffer(&mut self, capacity: usize) -> Result<WgpuBuffer, DeviceError> {
        let max = self.device.limits().max_buffer_size;
        if capacity as u64 > max {
            return Err(DeviceError::OutOfMemory { bytes: capacity });
        }
        Ok(WgpuBuffer {
            capacity,
            staging: None,
            staged_size: 0,
            layout: None,
            submission: None,
        })
    }

    fn destroy_buffer(&mut self, buffer: WgpuBuffer) {
        if let Some(staging) = buffer.staging {
            staging.destroy();
        }
    }

    fn copy_to_buffer(
        &mut self,
        source: CopySource<'_, WgpuOffscreen>,
        region: &CopyRegion,
        buffer: &mut WgpuBuffer,
    ) -> Result<WgpuFence, DeviceError> {
        let texture = self.resolve(source)?.clone();
        let index = self.submit_copy(&texture, region, buffer)?;
        let done = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&done);
        self.queue
            .on_submitted_work_done(move || signal.store(true, Ordering::Release));
        Ok(WgpuFence { index, done })
    }

    fn fence_signaled(&mut self, fence: &WgpuFence) -> bool {
        if let Err(error) = self.poll(wgpu::PollType::Poll) {
            warn!(%error, "device poll failed");
        }
        fence.done.load(Ordering::Acquire)
    }

    fn wait_fence(&mut self, fence: WgpuFence) -> Result<(), DeviceError> {
        if fence.done.load(Ordering::Acquire) {
            return Ok(());
        }
        self.poll(wgpu::PollType::WaitForSubmissionIndex(fence.index))
    }

    fn map_read(&mut self, buffer: &mut WgpuBuffer, dst: &mut [u8]) -> Result<(), DeviceError> {
        let (Some(staging), Some(layout)) = (buffer.staging.as_ref(), buffer.layout) else {
            return Err(DeviceError::Map("transfer buffer holds no copy".into()));
        };
        let rect = Rect::sized(layout.width, layout.height);
        let expected = rect.pixel_count() * usize::from(layout.format.bytes_per_pixel());
        if dst.len() != expected {
            return Err(DeviceError::Map(format!(
                "transfer buffer holds {expected} bytes, destination wants {}",
                dst.len()
            )));
        }

        let slice = staging.slice(..layout.staged_len());
        let (sender, receiver) = bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        // Only the copy into this buffer is waited on; later submissions for
        // other ring slots keep running.
        let wait = match buffer.submission.clone() {
            Some(index) => wgpu::PollType::WaitForSubmissionIndex(index),
            None => wgpu::PollType::Poll,
        };
        self.poll(wait)?;
        let map_result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => {
                trace!("map callback not delivered by the indexed wait; waiting for the queue");
                self.poll(wgpu::PollType::Wait)?;
                receiver
                    .recv()
                    .map_err(|_| DeviceError::Map("map callback was dropped".into()))?
            }
            Err(TryRecvError::Disconnected) => {
                return Err(DeviceError::Map("map callback was dropped".into()))
            }
        };
        map_result.map_err(|error| DeviceError::Map(error.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            let rows = SourceRows {
                bytes: &mapped,
                stride: layout.padded_bytes_per_row as usize,
                order: layout.order,
            };
            pack_region(rows, rect, layout.format, layout.reverse_rows, dst);
        }
        staging.unmap();
        Ok(())
    }
}

fn source_order(format: wgpu::TextureFormat) -> Option<SourceOrder> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
            Some(SourceOrder::Rgba)
        }
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            Some(SourceOrder::Bgra)
        }
        _ => None,
    }
}

fn texture_status(texture: &wgpu::Texture) -> TargetStatus {
    if !texture.usage().contains(wgpu::TextureUsages::COPY_SRC) {
        return TargetStatus::Incomplete("texture was not created with COPY_SRC usage".into());
    }
    if texture.sample_count() != 1 {
        return TargetStatus::Incomplete(format!(
            "multisampled texture ({} samples) must be resolved first",
            texture.sample_count()
        ));
    }
    if texture.dimension() != wgpu::TextureDimension::D2 {
        return TargetStatus::Incomplete(format!("{:?} texture is not 2D", texture.dimension()));
    }
    if source_order(texture.format()).is_none() {
        return TargetStatus::Incomplete(format!(
            "{:?} is not an 8-bit RGBA or BGRA format",
            texture.format()
        ));
    }
    TargetStatus::Complete
}
