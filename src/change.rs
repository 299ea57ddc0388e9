use std::fmt;

use crate::camera::{CameraState, Viewport};

/// Why accumulated history was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetReason {
    /// No previous frame to compare with.
    FirstFrame,
    /// Viewport no longer matches the allocated images.
    ViewportResized,
    /// Reset requested through the bound input.
    ManualTrigger,
    /// World transform differs from the last traced one.
    CameraMoved,
    /// Scene instances were replaced.
    SceneChanged,
}

impl ResetReason {
    /// True when the images must be recreated before tracing.
    pub fn requires_reallocation(self) -> bool {
        matches!(self, Self::ViewportResized)
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstFrame => "first frame",
            Self::ViewportResized => "viewport resized",
            Self::ManualTrigger => "manual trigger",
            Self::CameraMoved => "camera moved",
            Self::SceneChanged => "scene changed",
        })
    }
}

/// Decides whether accumulated history is still valid for the current camera.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChangeDetector {
    tolerance: f32,
}

impl ChangeDetector {
    /// Any transform difference resets.
    pub fn exact() -> Self {
        Self::default()
    }

    /// Transform differences up to `tolerance` per element are ignored.
    pub fn with_tolerance(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
        }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Returns the first applicable reason, or `None` when history stays valid.
    pub fn reason(
        &self,
        previous: Option<&CameraState>,
        current: &CameraState,
        manual_trigger: bool,
        allocated: Option<Viewport>,
    ) -> Option<ResetReason> {
        let Some(previous) = previous else {
            return Some(ResetReason::FirstFrame);
        };
        if allocated != Some(current.viewport) {
            return Some(ResetReason::ViewportResized);
        }
        if manual_trigger {
            return Some(ResetReason::ManualTrigger);
        }
        if !current.same_transform(previous, self.tolerance) {
            return Some(ResetReason::CameraMoved);
        }
        None
    }

    /// True when a reset is required.
    pub fn detect(
        &self,
        previous: Option<&CameraState>,
        current: &CameraState,
        manual_trigger: bool,
        allocated: Option<Viewport>,
    ) -> bool {
        self.reason(previous, current, manual_trigger, allocated)
            .is_some()
    }
}
