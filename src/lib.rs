//! Progressive path-tracing camera.
//!
//! Each frame traces one jittered sample per pixel and blends it into a running
//! average held in a pair of accumulation images. Any change that invalidates the
//! history (camera motion, resize, a manual reset or a new scene) restarts the
//! average. Tracing itself sits behind [`RayTracingBackend`], so the same driver
//! runs on the deterministic CPU reference tracer and on wgpu compute kernels.

pub mod accumulation;
pub mod backend;
pub mod camera;
pub mod change;
pub mod config;
pub mod driver;
pub mod error;
pub mod frustum;
pub mod input;
pub mod resources;
pub mod scene;

pub use accumulation::{blend_weight, AccumulationPair, SampleCounter};
pub use backend::{
    BackendCapabilities, BlitOp, CpuBackend, CpuImage, DispatchParams, GpuImage, GpuScene,
    ImageFormat, RayTracingBackend, WgpuBackend,
};
pub use camera::{CameraState, Viewport};
pub use change::{ChangeDetector, ResetReason};
pub use config::TracerSettings;
pub use driver::{AccumulationState, FramePhase, FrameDriver, FrameReport};
pub use error::{BackendError, DriverError};
pub use frustum::FrustumDirections;
pub use input::{InputState, KeyCode, NamedKey, ResetTrigger};
pub use resources::{FrameResources, ResourceManager};
pub use scene::{SceneDescription, SceneDocument, SceneObject, SphereInstance};
