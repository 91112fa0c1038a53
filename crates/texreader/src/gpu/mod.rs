//! `wgpu` implementation of the device boundary.
//!
//! - `context` brings up an instance, adapter, and device without a window.
//! - `device` implements [`ReadbackDevice`](crate::ReadbackDevice) with
//!   texture-to-buffer copies, submission fences, and `map_async` readback.

mod context;
mod device;

pub use context::{AdapterProfile, GpuContext, GpuMemoryMode, GpuPowerPreference, HeadlessOptions};
pub use device::{WgpuBuffer, WgpuDevice, WgpuFence, WgpuOffscreen, TARGET_FORMAT};
