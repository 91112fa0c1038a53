use crate::types::{PixelFormat, TargetKind, TextureId};

/// Failures reported by a [`ReadbackDevice`](crate::ReadbackDevice).
///
/// The display strings keep the GL error names so device logs read the same
/// regardless of which backend produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("INVALID_VALUE: texture {0} is not registered with the device")]
    UnknownTexture(TextureId),
    #[error("INVALID_OPERATION: no off-screen target handles left ({live} live)")]
    TargetsExhausted { live: usize },
    #[error("OUT_OF_MEMORY: failed to allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("INVALID_VALUE: region {width}x{height}+{x}+{y} exceeds the {target_width}x{target_height} source")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },
    #[error("INVALID_OPERATION: {0}")]
    Validation(String),
    #[error("buffer mapping failed: {0}")]
    Map(String),
    #[error("device lost: {0}")]
    Lost(String),
}

/// Error classes a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing device features or invalid reader settings; fall back to the direct path or abort.
    Configuration,
    /// Incomplete or unusable render target; retry on a later frame.
    Target,
    /// Allocation or copy failure; the next call starts from scratch.
    Resource,
    /// Non-fatal, frame-local failure.
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("invalid reader configuration: {0}")]
    Config(String),
    #[error("device cannot map transfer buffers; the pooled path is unavailable")]
    MappingUnsupported,
    #[error("pixel format {0} is not supported by this device")]
    UnsupportedFormat(PixelFormat),
    #[error("{format} uses {expected} bytes per pixel but the request specified {given}")]
    BytesPerPixel {
        format: PixelFormat,
        expected: u16,
        given: u16,
    },
    #[error("capture rectangle {width}x{height} is empty")]
    EmptyRect { width: u32, height: u32 },
    #[error("destination holds {actual} bytes but the capture needs {expected}")]
    DestinationSize { expected: usize, actual: usize },
    #[error("{target} target is incomplete: {reason}")]
    IncompleteTarget { target: TargetKind, reason: String },
    #[error("failed to prepare an off-screen target for texture {texture}")]
    Offscreen {
        texture: TextureId,
        #[source]
        source: DeviceError,
    },
    #[error("failed to allocate {count} transfer buffers of {capacity} bytes")]
    Allocation {
        count: usize,
        capacity: usize,
        #[source]
        source: DeviceError,
    },
    #[error("pixel copy failed")]
    Copy(#[source] DeviceError),
}

impl ReadbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadbackError::Config(_)
            | ReadbackError::MappingUnsupported
            | ReadbackError::UnsupportedFormat(_)
            | ReadbackError::BytesPerPixel { .. }
            | ReadbackError::EmptyRect { .. }
            | ReadbackError::DestinationSize { .. } => ErrorKind::Configuration,
            ReadbackError::IncompleteTarget { .. } | ReadbackError::Offscreen { .. } => {
                ErrorKind::Target
            }
            ReadbackError::Allocation { .. } | ReadbackError::Copy(_) => ErrorKind::Resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_read_like_gl_errors() {
        let err = DeviceError::OutOfMemory { bytes: 64 };
        assert_eq!(err.to_string(), "OUT_OF_MEMORY: failed to allocate 64 bytes");
        let err = DeviceError::UnknownTexture(TextureId(7));
        assert!(err.to_string().starts_with("INVALID_VALUE"));
    }

    #[test]
    fn classifies_errors_into_taxonomy() {
        assert_eq!(
            ReadbackError::MappingUnsupported.kind(),
            ErrorKind::Configuration
        );
        let target = ReadbackError::IncompleteTarget {
            target: TargetKind::Surface,
            reason: "no frame".into(),
        };
        assert_eq!(target.kind(), ErrorKind::Target);
        let alloc = ReadbackError::Allocation {
            count: 2,
            capacity: 16,
            source: DeviceError::OutOfMemory { bytes: 16 },
        };
        assert_eq!(alloc.kind(), ErrorKind::Resource);
    }
}
