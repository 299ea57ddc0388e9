use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Pixel dimensions of the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn aspect(self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Snapshot of the camera taken once per frame.
///
/// The camera looks down its local -Z axis. Equality only considers the world
/// transform, compared element by element without tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraState {
    pub world_transform: Mat4,
    pub viewport: Viewport,
    pub fov_y_degrees: f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl CameraState {
    pub const DEFAULT_FOV: f32 = 60.0;
    pub const DEFAULT_NEAR: f32 = 0.3;
    pub const DEFAULT_FAR: f32 = 1000.0;

    pub fn new(world_transform: Mat4, viewport: Viewport) -> Self {
        Self {
            world_transform,
            viewport,
            fov_y_degrees: Self::DEFAULT_FOV,
            near_plane: Self::DEFAULT_NEAR,
            far_plane: Self::DEFAULT_FAR,
        }
    }

    /// Camera at `position` facing `target`.
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3, viewport: Viewport) -> Self {
        let view = Mat4::look_at_rh(position, target, up);
        Self::new(view.inverse(), viewport)
    }

    pub fn with_fov(mut self, fov_y_degrees: f32) -> Self {
        self.fov_y_degrees = fov_y_degrees;
        self
    }

    pub fn with_clip_planes(mut self, near_plane: f32, far_plane: f32) -> Self {
        self.near_plane = near_plane;
        self.far_plane = far_plane;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_transform(mut self, world_transform: Mat4) -> Self {
        self.world_transform = world_transform;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.world_transform.w_axis.truncate()
    }

    /// Unit view direction, falling back to world -Z for degenerate transforms.
    pub fn forward(&self) -> Vec3 {
        (-self.world_transform.z_axis.truncate())
            .try_normalize()
            .unwrap_or(Vec3::NEG_Z)
    }

    pub fn view(&self) -> Mat4 {
        self.world_transform.inverse()
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(
            self.fov_y_degrees.to_radians(),
            self.viewport.aspect().max(0.01),
            self.near_plane,
            self.far_plane,
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Compares world transforms with an absolute per-element epsilon; zero means exact.
    pub fn same_transform(&self, other: &CameraState, tolerance: f32) -> bool {
        if tolerance > 0.0 {
            self.world_transform
                .abs_diff_eq(other.world_transform, tolerance)
        } else {
            self.world_transform == other.world_transform
        }
    }
}

impl PartialEq for CameraState {
    fn eq(&self, other: &Self) -> bool {
        self.world_transform == other.world_transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_everything_but_transform() {
        let a = CameraState::new(Mat4::IDENTITY, Viewport::new(64, 64));
        let b = a.with_fov(90.0).with_viewport(Viewport::new(32, 16));
        assert_eq!(a, b);
        let c = a.with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 1e-6)));
        assert_ne!(a, c);
    }

    #[test]
    fn tolerance_absorbs_jitter() {
        let a = CameraState::new(Mat4::IDENTITY, Viewport::new(8, 8));
        let b = a.with_transform(Mat4::from_translation(Vec3::splat(1e-7)));
        assert!(!a.same_transform(&b, 0.0));
        assert!(a.same_transform(&b, 1e-5));
    }

    #[test]
    fn look_at_places_camera() {
        let camera = CameraState::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            Viewport::new(4, 4),
        );
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }

    #[test]
    fn empty_viewport_has_unit_aspect() {
        assert!(Viewport::new(0, 10).is_empty());
        assert_eq!(Viewport::new(10, 0).aspect(), 1.0);
        assert_eq!(Viewport::new(20, 10).pixel_count(), 200);
    }
}
