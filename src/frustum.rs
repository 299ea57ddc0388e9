use glam::{Vec2, Vec3};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::camera::CameraState;

/// Corner ray directions of the view frustum plus the ray origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrustumDirections {
    pub top_left: Vec3,
    pub top_right: Vec3,
    pub bottom_left: Vec3,
    pub bottom_right: Vec3,
    pub camera_position: Vec3,
}

impl FrustumDirections {
    /// Derives the corner rays for `camera`.
    ///
    /// Each viewport corner is unprojected onto the far clip plane, so all four
    /// corners share the same depth and the frustum stays symmetric. A corner that
    /// coincides with the camera position (or produces non-finite values from a
    /// singular transform) falls back to the camera's forward axis.
    pub fn build(camera: &CameraState) -> Self {
        let position = camera.position();
        let forward = camera.forward();
        let corner = |viewport_point: Vec2| -> Vec3 {
            let point = far_plane_point(camera, viewport_point);
            match (point - position).try_normalize() {
                Some(direction) => direction,
                None => {
                    warn!(
                        "degenerate frustum corner at viewport {viewport_point}; using forward axis"
                    );
                    forward
                }
            }
        };

        Self {
            bottom_left: corner(Vec2::new(0.0, 0.0)),
            top_left: corner(Vec2::new(0.0, 1.0)),
            bottom_right: corner(Vec2::new(1.0, 0.0)),
            top_right: corner(Vec2::new(1.0, 1.0)),
            camera_position: position,
        }
    }

    /// Ray direction through a normalized viewport coordinate, bottom-left origin.
    pub fn direction_at(&self, u: f32, v: f32) -> Vec3 {
        let bottom = self.bottom_left.lerp(self.bottom_right, u);
        let top = self.top_left.lerp(self.top_right, u);
        bottom.lerp(top, v).try_normalize().unwrap_or(bottom)
    }
}

fn far_plane_point(camera: &CameraState, viewport_point: Vec2) -> Vec3 {
    let ndc = (viewport_point * 2.0 - Vec2::ONE).extend(1.0);
    camera.view_projection().inverse().project_point3(ndc)
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::camera::Viewport;

    fn square_camera() -> CameraState {
        CameraState::new(Mat4::IDENTITY, Viewport::new(100, 100))
            .with_fov(90.0)
            .with_clip_planes(0.5, 100.0)
    }

    #[test]
    fn corners_match_symmetric_frustum() {
        let frustum = FrustumDirections::build(&square_camera());
        let expected = |x: f32, y: f32| Vec3::new(x, y, -1.0).normalize();
        assert!(frustum.top_left.abs_diff_eq(expected(-1.0, 1.0), 1e-4));
        assert!(frustum.top_right.abs_diff_eq(expected(1.0, 1.0), 1e-4));
        assert!(frustum.bottom_left.abs_diff_eq(expected(-1.0, -1.0), 1e-4));
        assert!(frustum.bottom_right.abs_diff_eq(expected(1.0, -1.0), 1e-4));
        assert_eq!(frustum.camera_position, Vec3::ZERO);
    }

    #[test]
    fn corners_share_far_plane_depth() {
        let camera = CameraState::look_at(
            Vec3::new(3.0, 2.0, 7.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::Y,
            Viewport::new(160, 90),
        )
        .with_clip_planes(0.3, 50.0);
        let frustum = FrustumDirections::build(&camera);
        let forward = camera.forward();
        let depths: Vec<f32> = [
            frustum.top_left,
            frustum.top_right,
            frustum.bottom_left,
            frustum.bottom_right,
        ]
        .iter()
        .map(|dir| dir.dot(forward))
        .collect();
        for depth in &depths {
            assert!((depth - depths[0]).abs() < 1e-4, "{depths:?}");
        }
        for dir in [frustum.top_left, frustum.bottom_right] {
            assert!((dir.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn translation_moves_origin_not_directions() {
        let base = FrustumDirections::build(&square_camera());
        let moved = FrustumDirections::build(
            &square_camera().with_transform(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))),
        );
        assert_eq!(moved.camera_position, Vec3::new(5.0, 0.0, 0.0));
        assert!(moved.top_left.abs_diff_eq(base.top_left, 1e-4));
    }

    #[test]
    fn singular_transform_falls_back_to_forward() {
        let camera = square_camera().with_transform(Mat4::ZERO);
        let frustum = FrustumDirections::build(&camera);
        assert_eq!(frustum.top_left, Vec3::NEG_Z);
        assert_eq!(frustum.bottom_right, Vec3::NEG_Z);
    }

    #[test]
    fn center_direction_points_forward() {
        let frustum = FrustumDirections::build(&square_camera());
        assert!(frustum.direction_at(0.5, 0.5).abs_diff_eq(Vec3::NEG_Z, 1e-4));
    }
}
