//! Seam between the accumulation state machine and the device that traces rays.
//!
//! The driver only talks to a [`RayTracingBackend`]. Every call is a blocking
//! boundary from the driver's point of view: writes issued by one call are visible
//! to the next one. [`CpuBackend`] executes eagerly; [`WgpuBackend`] submits each
//! stage to a single queue, which orders them on the device.

pub mod cpu;
pub mod gpu;
mod shaders;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::camera::Viewport;
use crate::error::BackendError;
use crate::frustum::FrustumDirections;
use crate::scene::SceneDescription;

pub use cpu::{CpuBackend, CpuImage};
pub use gpu::{GpuImage, GpuScene, WgpuBackend};

/// Name of the ray generation entry point in the tracing kernel.
pub const RAYGEN_ENTRY_POINT: &str = "raygen";

/// Texel format shared by the raw sample buffer and both accumulation slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Rgba32Float,
    Rgba16Float,
}

impl ImageFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rgba32float" | "argbfloat" => Some(Self::Rgba32Float),
            "rgba16float" | "argbhalf" => Some(Self::Rgba16Float),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::Rgba32Float => 16,
            Self::Rgba16Float => 8,
        }
    }

    pub(crate) fn wgsl_name(self) -> &'static str {
        match self {
            Self::Rgba32Float => "rgba32float",
            Self::Rgba16Float => "rgba16float",
        }
    }
}

/// What a backend reports about itself once, at activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub ray_tracing: bool,
    pub adapter: String,
}

/// Per-dispatch inputs for the ray generation kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchParams {
    pub frame_index: u32,
    /// Gamma-encoded color for rays escaping upward.
    pub sky_color: Vec3,
    /// Gamma-encoded color for rays escaping downward.
    pub ground_color: Vec3,
    pub frustum: FrustumDirections,
    pub max_bounces: u32,
}

/// Full-screen operation performed by [`RayTracingBackend::blit`].
#[derive(Debug, Clone, Copy)]
pub enum BlitOp<'a, I> {
    /// Copy the source into the destination.
    Copy,
    /// `destination = history * (1 - weight) + source * weight`; a weight of one
    /// copies the source without reading history.
    Accumulate { history: &'a I, weight: f32 },
}

/// Device that traces rays and owns image storage.
pub trait RayTracingBackend {
    /// Handle to a device image. Swapping handles never moves pixel data.
    type Image;
    /// Handle to the uploaded scene.
    type Scene;

    fn capabilities(&self) -> BackendCapabilities;

    fn create_image(
        &mut self,
        viewport: Viewport,
        format: ImageFormat,
        label: &str,
    ) -> Result<Self::Image, BackendError>;

    fn release_image(&mut self, image: Self::Image);

    fn build_acceleration_structure(
        &mut self,
        scene: &SceneDescription,
    ) -> Result<Self::Scene, BackendError>;

    /// Cheap per-frame refresh of instance data.
    fn update_acceleration_structure(&mut self, accel: &mut Self::Scene, scene: &SceneDescription);

    fn release_acceleration_structure(&mut self, accel: Self::Scene);

    /// Traces one sample per pixel into `target`.
    fn dispatch(&mut self, accel: &Self::Scene, target: &Self::Image, params: &DispatchParams);

    fn blit(&mut self, source: &Self::Image, destination: &Self::Image, op: BlitOp<'_, Self::Image>);

    /// Shows `source` on the output target.
    fn present(&mut self, source: &Self::Image);
}

/// Converts a linear color channel to gamma space with the sRGB transfer curve.
pub fn linear_to_gamma(value: f32) -> f32 {
    if value <= 0.0031308 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

pub fn linear_to_gamma_rgb(color: Vec3) -> Vec3 {
    Vec3::new(
        linear_to_gamma(color.x),
        linear_to_gamma(color.y),
        linear_to_gamma(color.z),
    )
}
