//! Pipelined GPU-to-CPU pixel readback.
//!
//! `texreader` copies already-rendered pixels (the presentation surface or a
//! caller texture) into host memory without stalling the render loop on
//! every frame. The flow for one pooled `download` is:
//!
//! ```text
//!   TexReader::download
//!          │ CaptureRequest + &mut [u8]
//!          ▼
//!   validate ──▶ TransferPool::ensure ──▶ BoundTarget::bind
//!                                              │
//!          ┌───────── pipeline_depth steps ────┘
//!          ▼
//!   warming up? ──no──▶ drain(cursor) ──▶ wait fence ─▶ map ─▶ dst ─▶ unmap
//!          │                                                    │
//!          └──────────────▶ copy_to_buffer(cursor) ◀────────────┘
//!                                │ fence
//!                                ▼
//!                          advance cursor
//! ```
//!
//! Copies land in a ring of transfer buffers and are read back
//! `buffer_count` copies later, so pooled output trails rendering by that
//! many steps. The first captures after allocation only prime the ring and
//! leave the destination untouched. The direct strategy does a single
//! blocking copy instead and always delivers the current frame.
//!
//! The reader never owns the rendering context: it is driven through the
//! [`ReadbackDevice`] trait, implemented here for `wgpu` (feature `gpu`) and
//! for an in-memory [`SoftwareDevice`].

mod completion;
mod device;
mod error;
mod pixels;
mod pool;
mod reader;
pub mod software;
mod target;
mod types;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use device::{CopyRegion, CopySource, ReadbackDevice, TargetStatus};
pub use error::{DeviceError, ErrorKind, ReadbackError};
pub use reader::TexReader;
pub use software::{SoftwareDevice, SoftwareStats};
pub use types::{
    Capabilities, CaptureRequest, CaptureTarget, DownloadReport, PixelFormat, PoolConfig,
    PoolState, ReaderConfig, Rect, Strategy, TargetKind, TextureId,
};
