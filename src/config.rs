use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::backend::{linear_to_gamma_rgb, ImageFormat};
use crate::change::ChangeDetector;
use crate::input::{KeyCode, NamedKey};

/// Operator-facing knobs of the progressive tracer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerSettings {
    /// Linear color returned by rays escaping upward.
    pub sky_color: Vec3,
    /// Linear color returned by rays escaping downward.
    pub ground_color: Vec3,
    /// Key that forces the sample counter back to zero.
    pub reset_key: KeyCode,
    /// Per-element transform epsilon; zero compares exactly.
    pub transform_tolerance: f32,
    pub max_bounces: u32,
    pub format: ImageFormat,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            sky_color: Vec3::new(0.0, 0.0, 1.0),
            ground_color: Vec3::splat(0.5),
            reset_key: KeyCode::Named(NamedKey::Space),
            transform_tolerance: 0.0,
            max_bounces: 4,
            format: ImageFormat::Rgba32Float,
        }
    }
}

impl TracerSettings {
    pub fn sky_color_gamma(&self) -> Vec3 {
        linear_to_gamma_rgb(self.sky_color)
    }

    pub fn ground_color_gamma(&self) -> Vec3 {
        linear_to_gamma_rgb(self.ground_color)
    }

    pub fn change_detector(&self) -> ChangeDetector {
        ChangeDetector::with_tolerance(self.transform_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_blue_sky_gray_ground() {
        let settings = TracerSettings::default();
        assert!(settings
            .sky_color_gamma()
            .abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1e-6));
        let ground = settings.ground_color_gamma();
        assert!((ground.x - 0.735_356_7).abs() < 1e-4);
        assert_eq!(settings.change_detector(), ChangeDetector::exact());
    }
}
