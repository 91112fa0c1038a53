use std::fmt;

/// Rectangle of already-rendered pixels, in the target's native pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin.
    pub const fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Saturates at `usize::MAX`; see [`checked_byte_len`](Self::checked_byte_len).
    pub fn pixel_count(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Tightly packed size at `bytes_per_pixel`, or `None` if it overflows `usize`.
    pub fn checked_byte_len(&self, bytes_per_pixel: u16) -> Option<usize> {
        usize::try_from(self.width)
            .ok()?
            .checked_mul(usize::try_from(self.height).ok()?)?
            .checked_mul(usize::from(bytes_per_pixel))
    }

    /// Returns true when the rectangle lies entirely within a `width`x`height` target.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// Host-side layout the captured pixels are packed into.
///
/// Sources are always 8-bit RGBA or BGRA; narrower formats keep a subset of
/// those channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
    Red8,
    Alpha8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 5] = [
        PixelFormat::Rgba8,
        PixelFormat::Bgra8,
        PixelFormat::Rgb8,
        PixelFormat::Red8,
        PixelFormat::Alpha8,
    ];

    pub const fn bytes_per_pixel(self) -> u16 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Red8 | PixelFormat::Alpha8 => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgba8 => f.write_str("rgba8"),
            PixelFormat::Bgra8 => f.write_str("bgra8"),
            PixelFormat::Rgb8 => f.write_str("rgb8"),
            PixelFormat::Red8 => f.write_str("red8"),
            PixelFormat::Alpha8 => f.write_str("alpha8"),
        }
    }
}

/// Opaque handle for a caller-owned texture registered with a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the pixels are copied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    /// The presentation surface that is currently bound as the drawable.
    Surface,
    /// A caller texture, wrapped in a temporary off-screen target for the copy.
    Texture(TextureId),
}

impl CaptureTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            CaptureTarget::Surface => TargetKind::Surface,
            CaptureTarget::Texture(_) => TargetKind::Texture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Surface,
    Texture,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Surface => f.write_str("surface"),
            TargetKind::Texture => f.write_str("texture"),
        }
    }
}

/// One capture call. The destination slice travels separately so the request
/// stays `Copy` and can be reused frame after frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub target: CaptureTarget,
    pub rect: Rect,
    pub format: PixelFormat,
    /// Deliver rows in the reverse of the device's native order.
    pub reverse_rows: bool,
    pub bytes_per_pixel: u16,
}

impl CaptureRequest {
    pub fn new(target: CaptureTarget, rect: Rect, format: PixelFormat) -> Self {
        Self {
            target,
            rect,
            format,
            reverse_rows: false,
            bytes_per_pixel: format.bytes_per_pixel(),
        }
    }

    pub fn with_reverse_rows(mut self, reverse_rows: bool) -> Self {
        self.reverse_rows = reverse_rows;
        self
    }

    /// Number of bytes the destination must hold, saturating at `usize::MAX`.
    pub fn byte_len(&self) -> usize {
        self.checked_byte_len().unwrap_or(usize::MAX)
    }

    pub fn checked_byte_len(&self) -> Option<usize> {
        self.rect.checked_byte_len(self.bytes_per_pixel)
    }
}

/// How a capture reaches host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Single blocking copy straight into the destination.
    Direct,
    /// Copy into a ring of transfer buffers and drain the oldest one.
    Pooled,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => f.write_str("direct"),
            Strategy::Pooled => f.write_str("pooled"),
        }
    }
}

/// Pool shape for the pooled strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of transfer buffers in the ring.
    pub buffer_count: u32,
    /// Copy requests issued per `download` call.
    pub pipeline_depth: u32,
}

impl PoolConfig {
    /// Largest ring the reader will allocate.
    pub const MAX_BUFFER_COUNT: u32 = 64;
    pub const MAX_PIPELINE_DEPTH: u32 = 256;
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            pipeline_depth: 2,
        }
    }
}

/// Reader configuration. Without a pool every capture takes the direct path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderConfig {
    pub pool: Option<PoolConfig>,
}

impl ReaderConfig {
    pub fn direct() -> Self {
        Self { pool: None }
    }

    pub fn pooled(buffer_count: u32, pipeline_depth: u32) -> Self {
        Self {
            pool: Some(PoolConfig {
                buffer_count,
                pipeline_depth,
            }),
        }
    }

    pub fn strategy(&self) -> Strategy {
        if self.pool.is_some() {
            Strategy::Pooled
        } else {
            Strategy::Direct
        }
    }
}

/// Device features the reader depends on, resolved once when the reader is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Transfer buffers can be mapped for reading. Required by the pooled path.
    pub buffer_mapping: bool,
    /// Host formats the device can pack pixels into.
    pub formats: Vec<PixelFormat>,
}

impl Capabilities {
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            buffer_mapping: true,
            formats: PixelFormat::ALL.to_vec(),
        }
    }
}

/// Outcome of a successful `download`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub strategy: Strategy,
    /// Copy requests issued by this call.
    pub issued: u32,
    /// Completed copies written into the destination.
    pub delivered: u32,
    /// Completed copies that could not be read; the destination kept older contents.
    pub stale: u32,
}

impl DownloadReport {
    pub(crate) fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            issued: 0,
            delivered: 0,
            stale: 0,
        }
    }

    /// True when the destination now holds pixels from this or an earlier frame.
    pub fn has_pixels(&self) -> bool {
        self.delivered > 0
    }
}

/// Snapshot of the transfer pool bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolState {
    pub allocated: bool,
    pub capacity: usize,
    pub buffer_count: usize,
    pub cursor: usize,
    pub issued: u32,
}

impl PoolState {
    /// Still priming: no buffer is old enough to be drained.
    pub fn warming_up(&self) -> bool {
        (self.issued as usize) < self.buffer_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_byte_len_follows_format() {
        let request =
            CaptureRequest::new(CaptureTarget::Surface, Rect::sized(4, 4), PixelFormat::Rgba8);
        assert_eq!(request.byte_len(), 64);
        let request =
            CaptureRequest::new(CaptureTarget::Surface, Rect::sized(3, 2), PixelFormat::Rgb8);
        assert_eq!(request.byte_len(), 18);
    }

    #[test]
    fn rect_bounds_check_handles_offsets() {
        let rect = Rect::new(2, 2, 2, 2);
        assert!(rect.fits_within(4, 4));
        assert!(!rect.fits_within(3, 4));
        assert!(!Rect::new(u32::MAX, 0, 2, 1).fits_within(u32::MAX, 1));
    }

    #[test]
    fn reader_config_strategy_tracks_pool() {
        assert_eq!(ReaderConfig::default().strategy(), Strategy::Direct);
        assert_eq!(ReaderConfig::pooled(2, 2).strategy(), Strategy::Pooled);
    }
}
