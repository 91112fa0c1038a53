use tracing::{debug, trace, warn};

use crate::completion::{drain, Completion};
use crate::device::{CopyRegion, ReadbackDevice};
use crate::error::ReadbackError;
use crate::pool::TransferPool;
use crate::target::BoundTarget;
use crate::types::{
    CaptureRequest, Capabilities, DownloadReport, PoolConfig, PoolState, ReaderConfig, Strategy,
};

/// Pixel reader for one rendering context.
///
/// The reader owns its transfer pool but not the device; every call borrows
/// the device whose context is current on the calling thread. Buffers are
/// only released by [`shutdown_pool`](Self::shutdown_pool), so call it
/// before the device goes away.
pub struct TexReader<D: ReadbackDevice> {
    config: ReaderConfig,
    capabilities: Capabilities,
    pool: TransferPool<D>,
}

impl<D: ReadbackDevice> TexReader<D> {
    pub fn new(capabilities: Capabilities, config: ReaderConfig) -> Result<Self, ReadbackError> {
        if let Some(pool) = config.pool {
            validate_pool_config(pool)?;
            if !capabilities.buffer_mapping {
                return Err(ReadbackError::MappingUnsupported);
            }
        }
        debug!(
            strategy = %config.strategy(),
            buffer_mapping = capabilities.buffer_mapping,
            formats = capabilities.formats.len(),
            "created pixel reader"
        );
        Ok(Self {
            config,
            capabilities,
            pool: TransferPool::new(),
        })
    }

    /// Builds a reader with the device's capabilities.
    pub fn for_device(device: &D, config: ReaderConfig) -> Result<Self, ReadbackError> {
        Self::new(device.capabilities(), config)
    }

    /// Enables the pooled path. A changed `buffer_count` takes effect on the
    /// next pooled capture, which reallocates the pool.
    pub fn configure(&mut self, buffer_count: u32, pipeline_depth: u32) -> Result<(), ReadbackError> {
        let pool = PoolConfig {
            buffer_count,
            pipeline_depth,
        };
        validate_pool_config(pool)?;
        if !self.capabilities.buffer_mapping {
            return Err(ReadbackError::MappingUnsupported);
        }
        debug!(buffer_count, pipeline_depth, "configured transfer pool");
        self.config.pool = Some(pool);
        Ok(())
    }

    /// Routes later captures through the direct path. Existing buffers stay
    /// allocated until [`shutdown_pool`](Self::shutdown_pool).
    pub fn disable_pool(&mut self) {
        self.config.pool = None;
    }

    pub fn config(&self) -> ReaderConfig {
        self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn pool_state(&self) -> PoolState {
        self.pool.state()
    }

    /// Captures `request` into `dst` using the configured strategy.
    ///
    /// On a pooled [`ReadbackError::Copy`] the steps that ran before the
    /// failing copy have already delivered into `dst`, so it may hold a
    /// newer frame than before the call. The buffer whose copy failed holds
    /// no pending copy and is reported stale when the ring comes back to it.
    pub fn download(
        &mut self,
        device: &mut D,
        request: &CaptureRequest,
        dst: &mut [u8],
    ) -> Result<DownloadReport, ReadbackError> {
        self.download_with(self.config.strategy(), device, request, dst)
    }

    /// Blocking capture that bypasses the pool, e.g. for first-frame or debug dumps.
    pub fn download_direct(
        &mut self,
        device: &mut D,
        request: &CaptureRequest,
        dst: &mut [u8],
    ) -> Result<DownloadReport, ReadbackError> {
        self.download_with(Strategy::Direct, device, request, dst)
    }

    /// Captures with an explicit strategy. A pooled capture on a reader with
    /// no pool configured uses [`PoolConfig::default`].
    pub fn download_with(
        &mut self,
        strategy: Strategy,
        device: &mut D,
        request: &CaptureRequest,
        dst: &mut [u8],
    ) -> Result<DownloadReport, ReadbackError> {
        let region = self.validate(request, dst)?;
        trace!(
            %strategy,
            target = ?request.target,
            width = region.rect.width,
            height = region.rect.height,
            format = %region.format,
            "capture requested"
        );
        match strategy {
            Strategy::Direct => capture_direct(device, request, &region, dst),
            Strategy::Pooled => self.capture_pooled(device, request, &region, dst),
        }
    }

    /// Releases the transfer pool. Calling it again is a no-op.
    pub fn shutdown_pool(&mut self, device: &mut D) {
        self.pool.destroy(device);
    }

    fn validate(&self, request: &CaptureRequest, dst: &[u8]) -> Result<CopyRegion, ReadbackError> {
        let rect = request.rect;
        if rect.is_empty() {
            return Err(ReadbackError::EmptyRect {
                width: rect.width,
                height: rect.height,
            });
        }
        let expected_bpp = request.format.bytes_per_pixel();
        if request.bytes_per_pixel != expected_bpp {
            return Err(ReadbackError::BytesPerPixel {
                format: request.format,
                expected: expected_bpp,
                given: request.bytes_per_pixel,
            });
        }
        if !self.capabilities.supports(request.format) {
            return Err(ReadbackError::UnsupportedFormat(request.format));
        }
        let Some(expected) = request.checked_byte_len() else {
            return Err(ReadbackError::Config(format!(
                "capture rectangle {}x{} at {} bytes per pixel does not fit in memory",
                rect.width, rect.height, request.bytes_per_pixel
            )));
        };
        if dst.len() != expected {
            return Err(ReadbackError::DestinationSize {
                expected,
                actual: dst.len(),
            });
        }
        Ok(CopyRegion {
            rect,
            format: request.format,
            reverse_rows: request.reverse_rows,
        })
    }

    fn capture_pooled(
        &mut self,
        device: &mut D,
        request: &CaptureRequest,
        region: &CopyRegion,
        dst: &mut [u8],
    ) -> Result<DownloadReport, ReadbackError> {
        if !self.capabilities.buffer_mapping {
            return Err(ReadbackError::MappingUnsupported);
        }
        let pool_config = self.config.pool.unwrap_or_default();
        self.pool
            .ensure(device, request.byte_len(), pool_config.buffer_count as usize)?;

        let mut bound = BoundTarget::bind(device, request.target)?;
        let mut report = DownloadReport::new(Strategy::Pooled);
        for _ in 0..pool_config.pipeline_depth {
            step(&mut self.pool, &mut bound, region, dst, &mut report)?;
        }
        Ok(report)
    }
}

/// One scheduler step: drain the buffer under the cursor once it has left
/// warmup, then refill it with the current frame and advance the ring.
fn step<D: ReadbackDevice>(
    pool: &mut TransferPool<D>,
    bound: &mut BoundTarget<'_, D>,
    region: &CopyRegion,
    dst: &mut [u8],
    report: &mut DownloadReport,
) -> Result<(), ReadbackError> {
    let warming_up = pool.warming_up();
    let cursor = pool.cursor();
    let slot = pool.current_mut();

    if !warming_up {
        match drain(bound.device(), slot, dst) {
            Completion::Delivered => report.delivered += 1,
            Completion::Stale => report.stale += 1,
        }
    }

    let fence = bound
        .copy_to_buffer(region, &mut slot.buffer)
        .map_err(|error| {
            warn!(cursor, %error, "failed to issue copy into transfer buffer");
            ReadbackError::Copy(error)
        })?;
    slot.in_flight = Some(fence);
    report.issued += 1;
    trace!(cursor, warming_up, "issued copy into transfer buffer");

    pool.advance();
    Ok(())
}

fn capture_direct<D: ReadbackDevice>(
    device: &mut D,
    request: &CaptureRequest,
    region: &CopyRegion,
    dst: &mut [u8],
) -> Result<DownloadReport, ReadbackError> {
    let mut bound = BoundTarget::bind(device, request.target)?;
    bound.read_pixels(region, dst).map_err(|error| {
        warn!(%error, target = ?request.target, "direct pixel copy failed");
        ReadbackError::Copy(error)
    })?;
    let mut report = DownloadReport::new(Strategy::Direct);
    report.issued = 1;
    report.delivered = 1;
    Ok(report)
}

fn validate_pool_config(pool: PoolConfig) -> Result<(), ReadbackError> {
    if pool.buffer_count == 0 {
        return Err(ReadbackError::Config(
            "buffer_count must be at least 1".into(),
        ));
    }
    if pool.buffer_count > PoolConfig::MAX_BUFFER_COUNT {
        return Err(ReadbackError::Config(format!(
            "buffer_count {} exceeds the limit of {}",
            pool.buffer_count,
            PoolConfig::MAX_BUFFER_COUNT
        )));
    }
    if pool.pipeline_depth == 0 {
        return Err(ReadbackError::Config(
            "pipeline_depth must be at least 1".into(),
        ));
    }
    if pool.pipeline_depth > PoolConfig::MAX_PIPELINE_DEPTH {
        return Err(ReadbackError::Config(format!(
            "pipeline_depth {} exceeds the limit of {}",
            pool.pipeline_depth,
            PoolConfig::MAX_PIPELINE_DEPTH
        )));
    }
    Ok(())
}
