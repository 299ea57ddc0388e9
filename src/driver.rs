//! Per-frame orchestration of detection, tracing, accumulation and present.
//!
//! One [`FrameDriver`] exists per camera and runs strictly one frame at a time:
//!
//! ```text
//! Idle ─▶ Dispatching ─▶ Blending ─▶ Presenting ─▶ Idle
//! ```
//!
//! Reset decisions happen only in `Idle`, so a manual reset request that arrives
//! while a frame is in flight is applied to the following frame.

use std::fmt;

use log::{debug, error, info, trace};

use crate::accumulation::SampleCounter;
use crate::backend::{DispatchParams, RayTracingBackend};
use crate::camera::{CameraState, Viewport};
use crate::change::{ChangeDetector, ResetReason};
use crate::config::TracerSettings;
use crate::error::DriverError;
use crate::frustum::FrustumDirections;
use crate::resources::ResourceManager;
use crate::scene::SceneDescription;

/// Stage of the per-frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Dispatching,
    Blending,
    Presenting,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Blending => "blending",
            Self::Presenting => "presenting",
        })
    }
}

/// Outcome of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Sample index used as blend weight for this frame.
    pub sample_index: u32,
    /// Samples contained in the presented image.
    pub samples_accumulated: u32,
    /// Set when accumulated history was discarded before tracing.
    pub reset: Option<ResetReason>,
}

/// Everything that decides whether history is valid, owned by one driver.
#[derive(Debug, Clone, Default)]
pub struct AccumulationState {
    last_camera: Option<CameraState>,
    samples: SampleCounter,
    frustum: Option<FrustumDirections>,
}

impl AccumulationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs change detection for `camera` and applies a reset when needed.
    ///
    /// `scene_changed` is folded in after the camera checks, so camera-driven
    /// reasons win when both apply.
    pub fn observe(
        &mut self,
        detector: &ChangeDetector,
        camera: &CameraState,
        manual_trigger: bool,
        scene_changed: bool,
        allocated: Option<Viewport>,
    ) -> Option<ResetReason> {
        let reason = detector
            .reason(self.last_camera.as_ref(), camera, manual_trigger, allocated)
            .or(scene_changed.then_some(ResetReason::SceneChanged));
        if reason.is_some() {
            self.samples.reset();
            self.frustum = Some(FrustumDirections::build(camera));
            self.last_camera = Some(*camera);
        }
        reason
    }

    pub fn samples(&self) -> SampleCounter {
        self.samples
    }

    pub fn frustum(&self) -> Option<&FrustumDirections> {
        self.frustum.as_ref()
    }

    pub fn last_camera(&self) -> Option<&CameraState> {
        self.last_camera.as_ref()
    }

    fn advance(&mut self) {
        self.samples.advance();
    }

    /// Forces the next observation to be treated as a first frame.
    fn forget(&mut self) {
        *self = Self::default();
    }
}

/// Drives one camera's progressive accumulation on a backend it owns.
pub struct FrameDriver<B: RayTracingBackend> {
    backend: B,
    settings: TracerSettings,
    detector: ChangeDetector,
    scene: SceneDescription,
    scene_dirty: bool,
    accel: Option<B::Scene>,
    resources: ResourceManager<B::Image>,
    state: AccumulationState,
    phase: FramePhase,
}

impl<B: RayTracingBackend> FrameDriver<B> {
    /// Checks ray tracing support, uploads the scene and allocates images sized to
    /// `camera`. Fails without leaving anything allocated.
    pub fn activate(
        mut backend: B,
        scene: SceneDescription,
        camera: &CameraState,
        settings: TracerSettings,
    ) -> Result<Self, DriverError> {
        let capabilities = backend.capabilities();
        if !capabilities.ray_tracing {
            error!(
                "ray tracing is not supported by {}; camera will not render",
                capabilities.adapter
            );
            return Err(DriverError::Unsupported {
                adapter: capabilities.adapter,
            });
        }

        let accel = backend.build_acceleration_structure(&scene)?;
        let mut resources = ResourceManager::new(settings.format);
        if let Err(err) = resources.allocate(&mut backend, camera.viewport) {
            error!("failed to allocate accumulation images: {err}");
            backend.release_acceleration_structure(accel);
            return Err(err.into());
        }

        info!(
            "activated progressive camera on {} ({}x{}, {} instances)",
            capabilities.adapter,
            camera.viewport.width,
            camera.viewport.height,
            scene.instances.len()
        );

        Ok(Self {
            detector: settings.change_detector(),
            backend,
            settings,
            scene,
            scene_dirty: false,
            accel: Some(accel),
            resources,
            state: AccumulationState::new(),
            phase: FramePhase::Idle,
        })
    }

    /// Renders one frame for `camera`. `manual_reset` is the trigger state sampled
    /// at this frame boundary.
    pub fn render_frame(
        &mut self,
        camera: &CameraState,
        manual_reset: bool,
    ) -> Result<FrameReport, DriverError> {
        if self.accel.is_none() {
            return Err(DriverError::Released);
        }

        self.phase = FramePhase::Idle;
        let reset = self.state.observe(
            &self.detector,
            camera,
            manual_reset,
            self.scene_dirty,
            self.resources.viewport(),
        );
        if let Some(reason) = reset {
            debug!("accumulation reset: {reason}");
            self.scene_dirty = false;
            // A first frame can also arrive with a new viewport.
            if reason.requires_reallocation() || self.resources.viewport() != Some(camera.viewport)
            {
                if let Err(err) = self.resources.allocate(&mut self.backend, camera.viewport) {
                    error!("failed to reallocate accumulation images: {err}");
                    self.state.forget();
                    return Err(err.into());
                }
            }
        }

        let (Some(accel), Some(resources), Some(frustum)) = (
            self.accel.as_mut(),
            self.resources.get_mut(),
            self.state.frustum().copied(),
        ) else {
            return Err(DriverError::Released);
        };
        let sample_index = self.state.samples().value();

        self.phase = FramePhase::Dispatching;
        trace!("frame {sample_index}: {}", self.phase);
        self.backend
            .update_acceleration_structure(accel, &self.scene);
        let params = DispatchParams {
            frame_index: sample_index,
            sky_color: self.settings.sky_color_gamma(),
            ground_color: self.settings.ground_color_gamma(),
            frustum,
            max_bounces: self.settings.max_bounces,
        };
        self.backend.dispatch(accel, &resources.raw, &params);

        self.phase = FramePhase::Blending;
        trace!("frame {sample_index}: {}", self.phase);
        resources
            .accumulation
            .blend(&mut self.backend, &resources.raw, sample_index);
        resources.accumulation.swap();

        self.phase = FramePhase::Presenting;
        trace!("frame {sample_index}: {}", self.phase);
        self.backend.present(resources.accumulation.current());

        self.state.advance();
        self.phase = FramePhase::Idle;

        Ok(FrameReport {
            sample_index,
            samples_accumulated: self.state.samples().value(),
            reset,
        })
    }

    /// Replaces the traced scene; the next frame starts a fresh accumulation.
    pub fn set_scene(&mut self, scene: SceneDescription) {
        self.scene = scene;
        self.scene_dirty = true;
    }

    /// Frees the scene and every image. Later calls are no-ops.
    pub fn release(&mut self) {
        self.resources.release(&mut self.backend);
        if let Some(accel) = self.accel.take() {
            self.backend.release_acceleration_structure(accel);
            info!("released progressive camera resources");
        }
        self.state.forget();
        self.phase = FramePhase::Idle;
    }

    pub fn is_active(&self) -> bool {
        self.accel.is_some()
    }

    /// Current stage of the frame cycle. `render_frame` runs a whole frame before
    /// returning, so callers only ever observe `Idle`, including after a frame
    /// that failed during reallocation.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn state(&self) -> &AccumulationState {
        &self.state
    }

    pub fn samples(&self) -> u32 {
        self.state.samples().value()
    }

    pub fn settings(&self) -> &TracerSettings {
        &self.settings
    }

    pub fn scene(&self) -> &SceneDescription {
        &self.scene
    }

    pub fn resources(&self) -> &ResourceManager<B::Image> {
        &self.resources
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: RayTracingBackend> Drop for FrameDriver<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;

    fn camera(x: f32) -> CameraState {
        CameraState::new(
            Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
            Viewport::new(8, 8),
        )
    }

    #[test]
    fn state_resets_only_on_change() {
        let detector = ChangeDetector::exact();
        let allocated = Some(Viewport::new(8, 8));
        let mut state = AccumulationState::new();

        assert_eq!(
            state.observe(&detector, &camera(0.0), false, false, allocated),
            Some(ResetReason::FirstFrame)
        );
        state.advance();
        state.advance();
        assert_eq!(state.observe(&detector, &camera(0.0), false, false, allocated), None);
        assert_eq!(state.samples().value(), 2);

        assert_eq!(
            state.observe(&detector, &camera(1.0), false, false, allocated),
            Some(ResetReason::CameraMoved)
        );
        assert_eq!(state.samples().value(), 0);
        assert_eq!(state.frustum().unwrap().camera_position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn scene_change_ranks_below_camera_reasons() {
        let detector = ChangeDetector::exact();
        let allocated = Some(Viewport::new(8, 8));
        let mut state = AccumulationState::new();
        state.observe(&detector, &camera(0.0), false, false, allocated);
        assert_eq!(
            state.observe(&detector, &camera(0.0), false, true, allocated),
            Some(ResetReason::SceneChanged)
        );
        assert_eq!(
            state.observe(&detector, &camera(0.0), true, true, allocated),
            Some(ResetReason::ManualTrigger)
        );
    }

    #[test]
    fn frustum_is_kept_between_resets() {
        let detector = ChangeDetector::with_tolerance(1e-3);
        let allocated = Some(Viewport::new(8, 8));
        let mut state = AccumulationState::new();
        state.observe(&detector, &camera(0.0), false, false, allocated);
        let first = *state.frustum().unwrap();
        assert_eq!(state.observe(&detector, &camera(1e-5), false, false, allocated), None);
        assert_eq!(state.frustum().unwrap(), &first);
        assert_eq!(state.last_camera(), Some(&camera(0.0)));
    }
}
