use log::debug;

use crate::accumulation::AccumulationPair;
use crate::backend::{ImageFormat, RayTracingBackend};
use crate::camera::Viewport;
use crate::error::BackendError;

/// Every image one camera needs: the raw sample target and both accumulation slots.
#[derive(Debug)]
pub struct FrameResources<I> {
    pub raw: I,
    pub accumulation: AccumulationPair<I>,
    viewport: Viewport,
    format: ImageFormat,
}

impl<I> FrameResources<I> {
    /// Creates all three images or none of them.
    pub fn allocate<B>(
        backend: &mut B,
        viewport: Viewport,
        format: ImageFormat,
    ) -> Result<Self, BackendError>
    where
        B: RayTracingBackend<Image = I>,
    {
        if viewport.is_empty() {
            return Err(BackendError::InvalidExtent {
                width: viewport.width,
                height: viewport.height,
            });
        }

        let raw = backend.create_image(viewport, format, "raw-sample")?;
        let first = match backend.create_image(viewport, format, "accumulation-a") {
            Ok(image) => image,
            Err(err) => {
                backend.release_image(raw);
                return Err(err);
            }
        };
        let second = match backend.create_image(viewport, format, "accumulation-b") {
            Ok(image) => image,
            Err(err) => {
                backend.release_image(first);
                backend.release_image(raw);
                return Err(err);
            }
        };

        Ok(Self {
            raw,
            accumulation: AccumulationPair::new(first, second),
            viewport,
            format,
        })
    }

    pub fn release<B>(self, backend: &mut B)
    where
        B: RayTracingBackend<Image = I>,
    {
        let [current, next] = self.accumulation.into_slots();
        backend.release_image(self.raw);
        backend.release_image(current);
        backend.release_image(next);
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

/// Owns the camera's images between activation and release.
#[derive(Debug)]
pub struct ResourceManager<I> {
    resources: Option<FrameResources<I>>,
    format: ImageFormat,
}

impl<I> ResourceManager<I> {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            resources: None,
            format,
        }
    }

    /// Releases anything currently held, then allocates for `viewport`. On failure
    /// the manager is left empty.
    pub fn allocate<B>(
        &mut self,
        backend: &mut B,
        viewport: Viewport,
    ) -> Result<&mut FrameResources<I>, BackendError>
    where
        B: RayTracingBackend<Image = I>,
    {
        self.release(backend);
        debug!(
            "allocating {}x{} {:?} accumulation images",
            viewport.width, viewport.height, self.format
        );
        let resources = FrameResources::allocate(backend, viewport, self.format)?;
        Ok(self.resources.insert(resources))
    }

    /// Frees every image. Safe to call repeatedly or before any allocation.
    pub fn release<B>(&mut self, backend: &mut B)
    where
        B: RayTracingBackend<Image = I>,
    {
        if let Some(resources) = self.resources.take() {
            debug!(
                "releasing {}x{} accumulation images",
                resources.viewport.width, resources.viewport.height
            );
            resources.release(backend);
        }
    }

    pub fn get(&self) -> Option<&FrameResources<I>> {
        self.resources.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut FrameResources<I>> {
        self.resources.as_mut()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.resources.as_ref().map(FrameResources::viewport)
    }

    pub fn is_allocated(&self) -> bool {
        self.resources.is_some()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    const FORMAT: ImageFormat = ImageFormat::Rgba32Float;

    #[test]
    fn allocate_creates_three_matching_images() {
        let mut backend = CpuBackend::new();
        let mut manager = ResourceManager::new(FORMAT);
        let viewport = Viewport::new(16, 9);
        let resources = manager.allocate(&mut backend, viewport).unwrap();
        assert_eq!(resources.viewport(), viewport);
        assert_eq!(resources.raw.viewport(), viewport);
        assert_eq!(resources.accumulation.current().viewport(), viewport);
        assert_eq!(resources.accumulation.next().viewport(), viewport);
        assert_eq!(backend.live_images(), 3);
    }

    #[test]
    fn reallocation_replaces_old_images() {
        let mut backend = CpuBackend::new();
        let mut manager = ResourceManager::new(FORMAT);
        let old_raw = manager
            .allocate(&mut backend, Viewport::new(8, 8))
            .unwrap()
            .raw
            .clone();
        let resources = manager.allocate(&mut backend, Viewport::new(4, 2)).unwrap();
        assert_ne!(resources.raw, old_raw);
        assert_eq!(resources.raw.viewport(), Viewport::new(4, 2));
        assert_eq!(backend.live_images(), 3);
        assert!(backend.pixels(&old_raw).is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let mut backend = CpuBackend::new();
        let mut manager: ResourceManager<_> = ResourceManager::new(FORMAT);
        manager.release(&mut backend);
        manager.allocate(&mut backend, Viewport::new(2, 2)).unwrap();
        manager.release(&mut backend);
        manager.release(&mut backend);
        assert!(!manager.is_allocated());
        assert_eq!(backend.live_images(), 0);
        assert_eq!(backend.stats().releases, 3);
    }

    #[test]
    fn partial_failure_leaves_nothing_behind() {
        // Room for two 4x4 float images, not three.
        let mut backend = CpuBackend::new().with_memory_budget(2 * 4 * 4 * 16);
        let mut manager = ResourceManager::new(FORMAT);
        let err = manager.allocate(&mut backend, Viewport::new(4, 4)).unwrap_err();
        assert!(matches!(err, BackendError::OutOfMemory { .. }));
        assert!(!manager.is_allocated());
        assert_eq!(backend.live_images(), 0);
    }

    #[test]
    fn oversized_viewport_fails_activation_cleanly() {
        use glam::Mat4;

        use crate::camera::CameraState;
        use crate::config::TracerSettings;
        use crate::driver::FrameDriver;
        use crate::error::DriverError;
        use crate::scene::SceneDescription;

        let huge = Viewport::new(1 << 31, 1 << 31);
        let mut backend = CpuBackend::new();
        let mut manager = ResourceManager::new(FORMAT);
        let err = manager.allocate(&mut backend, huge).unwrap_err();
        assert!(matches!(err, BackendError::OutOfMemory { .. }));
        assert!(!manager.is_allocated());
        assert_eq!(backend.live_images(), 0);

        let activated = FrameDriver::activate(
            CpuBackend::new(),
            SceneDescription::default(),
            &CameraState::new(Mat4::IDENTITY, huge),
            TracerSettings::default(),
        );
        assert!(matches!(
            activated.err(),
            Some(DriverError::Backend(BackendError::OutOfMemory { .. }))
        ));
    }

    #[test]
    fn zero_area_is_rejected() {
        let mut backend = CpuBackend::new();
        let mut manager = ResourceManager::new(FORMAT);
        let err = manager.allocate(&mut backend, Viewport::new(0, 4)).unwrap_err();
        assert_eq!(err, BackendError::InvalidExtent { width: 0, height: 4 });
        assert_eq!(backend.live_images(), 0);
    }
}
