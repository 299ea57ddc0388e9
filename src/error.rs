//! Error types surfaced by the backend seam and the frame driver.

use thiserror::Error;

/// Failures reported by a [`RayTracingBackend`](crate::backend::RayTracingBackend).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Requested image has zero area or exceeds the device limits
    #[error("invalid image extent {width}x{height}")]
    InvalidExtent { width: u32, height: u32 },

    /// Device memory could not hold the requested resource
    #[error("out of device memory allocating {label} ({bytes} bytes)")]
    OutOfMemory { label: String, bytes: u64 },

    /// No adapter could be acquired
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(String),

    /// Device creation or another device-level failure
    #[error("device error: {0}")]
    Device(String),
}

/// Failures reported by the [`FrameDriver`](crate::driver::FrameDriver).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Ray tracing is not available on this adapter; checked once at activation
    #[error("ray tracing is not supported by adapter {adapter}")]
    Unsupported { adapter: String },

    /// Resource creation failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The driver already released its resources
    #[error("frame driver resources were released")]
    Released,
}
