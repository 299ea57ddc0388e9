use std::collections::HashMap;

use glam::{Vec3, Vec4};
use log::{debug, warn};

use super::{BackendCapabilities, BlitOp, DispatchParams, ImageFormat, RayTracingBackend};
use crate::accumulation::blend_pixel;
use crate::camera::Viewport;
use crate::error::BackendError;
use crate::scene::{SceneDescription, SphereInstance};

const SURFACE_EPSILON: f32 = 1e-3;

/// Handle to an image stored by a [`CpuBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CpuImage {
    id: u64,
    viewport: Viewport,
}

impl CpuImage {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

/// Sphere list uploaded by [`CpuBackend::build_acceleration_structure`].
#[derive(Debug, Clone, PartialEq)]
pub struct CpuScene {
    spheres: Vec<SphereInstance>,
}

impl CpuScene {
    pub fn spheres(&self) -> &[SphereInstance] {
        &self.spheres
    }
}

/// Counters for everything the backend was asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub allocations: usize,
    pub releases: usize,
    pub dispatches: usize,
    pub blits: usize,
    pub presents: usize,
    pub scene_updates: usize,
    /// Accesses to images that were already released.
    pub stale_accesses: usize,
}

#[derive(Debug)]
struct ImageStorage {
    pixels: Vec<Vec4>,
    format: ImageFormat,
}

#[derive(Debug)]
struct Presented {
    viewport: Viewport,
    pixels: Vec<Vec4>,
}

/// Software backend that traces spheres against a two-tone environment.
///
/// Uses the same per-pixel hashing and bounce logic as the wgpu kernel, so the two
/// converge to the same image. Images live in a map keyed by handle id, which
/// makes use-after-release observable through [`CpuStats::stale_accesses`].
#[derive(Debug)]
pub struct CpuBackend {
    images: HashMap<u64, ImageStorage>,
    next_id: u64,
    ray_tracing: bool,
    memory_budget: Option<u64>,
    bytes_in_use: u64,
    presented: Option<Presented>,
    stats: CpuStats,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            next_id: 1,
            ray_tracing: true,
            memory_budget: None,
            bytes_in_use: 0,
            presented: None,
            stats: CpuStats::default(),
        }
    }

    /// Reports ray tracing as unavailable, mimicking unsupported hardware.
    pub fn without_ray_tracing(mut self) -> Self {
        self.ray_tracing = false;
        self
    }

    /// Fails allocations once `bytes` of image memory are in use.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn stats(&self) -> &CpuStats {
        &self.stats
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn contains(&self, image: &CpuImage) -> bool {
        self.images.contains_key(&image.id)
    }

    /// Pixel data for `image`, row-major from the top-left corner.
    pub fn pixels(&self, image: &CpuImage) -> Option<&[Vec4]> {
        self.images.get(&image.id).map(|storage| storage.pixels.as_slice())
    }

    pub fn fill(&mut self, image: &CpuImage, value: Vec4) {
        match self.images.get_mut(&image.id) {
            Some(storage) => storage.pixels.fill(value),
            None => self.stats.stale_accesses += 1,
        }
    }

    pub fn presented(&self) -> Option<&[Vec4]> {
        self.presented.as_ref().map(|frame| frame.pixels.as_slice())
    }

    pub fn presented_viewport(&self) -> Option<Viewport> {
        self.presented.as_ref().map(|frame| frame.viewport)
    }

    /// Average of the last presented frame.
    pub fn presented_mean(&self) -> Option<Vec4> {
        let frame = self.presented.as_ref()?;
        if frame.pixels.is_empty() {
            return None;
        }
        let sum = frame.pixels.iter().fold(Vec4::ZERO, |acc, pixel| acc + *pixel);
        Some(sum / frame.pixels.len() as f32)
    }

    fn read(&mut self, image: &CpuImage) -> Option<Vec<Vec4>> {
        match self.images.get(&image.id) {
            Some(storage) => Some(storage.pixels.clone()),
            None => {
                warn!("read of released image #{}", image.id);
                self.stats.stale_accesses += 1;
                None
            }
        }
    }
}

impl RayTracingBackend for CpuBackend {
    type Image = CpuImage;
    type Scene = CpuScene;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            ray_tracing: self.ray_tracing,
            adapter: "cpu reference tracer".to_string(),
        }
    }

    fn create_image(
        &mut self,
        viewport: Viewport,
        format: ImageFormat,
        label: &str,
    ) -> Result<CpuImage, BackendError> {
        if viewport.is_empty() {
            return Err(BackendError::InvalidExtent {
                width: viewport.width,
                height: viewport.height,
            });
        }
        let out_of_memory = |bytes: u64| BackendError::OutOfMemory {
            label: label.to_string(),
            bytes,
        };
        let bytes = u64::from(viewport.width)
            .checked_mul(u64::from(viewport.height))
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| out_of_memory(u64::MAX))?;
        if let Some(budget) = self.memory_budget {
            if self.bytes_in_use.saturating_add(bytes) > budget {
                return Err(out_of_memory(bytes));
            }
        }

        let pixel_count =
            usize::try_from(bytes / format.bytes_per_pixel()).map_err(|_| out_of_memory(bytes))?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(pixel_count)
            .map_err(|_| out_of_memory(bytes))?;
        pixels.resize(pixel_count, Vec4::ZERO);

        let id = self.next_id;
        self.next_id += 1;
        self.bytes_in_use += bytes;
        self.stats.allocations += 1;
        self.images.insert(id, ImageStorage { pixels, format });
        debug!("created {label} image #{id} ({}x{})", viewport.width, viewport.height);
        Ok(CpuImage { id, viewport })
    }

    fn release_image(&mut self, image: CpuImage) {
        match self.images.remove(&image.id) {
            Some(storage) => {
                self.bytes_in_use = self.bytes_in_use.saturating_sub(
                    storage.pixels.len() as u64 * storage.format.bytes_per_pixel(),
                );
                self.stats.releases += 1;
            }
            None => warn!("image #{} released twice", image.id),
        }
    }

    fn build_acceleration_structure(
        &mut self,
        scene: &SceneDescription,
    ) -> Result<CpuScene, BackendError> {
        Ok(CpuScene {
            spheres: scene.instances.clone(),
        })
    }

    fn update_acceleration_structure(&mut self, accel: &mut CpuScene, scene: &SceneDescription) {
        self.stats.scene_updates += 1;
        if accel.spheres != scene.instances {
            accel.spheres.clone_from(&scene.instances);
        }
    }

    fn release_acceleration_structure(&mut self, accel: CpuScene) {
        drop(accel);
    }

    fn dispatch(&mut self, accel: &CpuScene, target: &CpuImage, params: &DispatchParams) {
        self.stats.dispatches += 1;
        let Some(storage) = self.images.get_mut(&target.id) else {
            self.stats.stale_accesses += 1;
            return;
        };
        let Viewport { width, height } = target.viewport;
        for y in 0..height {
            for x in 0..width {
                let index = y as usize * width as usize + x as usize;
                storage.pixels[index] = trace_pixel(&accel.spheres, params, x, y, width, height);
            }
        }
    }

    fn blit(&mut self, source: &CpuImage, destination: &CpuImage, op: BlitOp<'_, CpuImage>) {
        self.stats.blits += 1;
        let Some(raw) = self.read(source) else {
            return;
        };
        let history = match op {
            BlitOp::Accumulate { history, weight } if weight < 1.0 => match self.read(history) {
                Some(prior) => Some((prior, weight)),
                None => return,
            },
            _ => None,
        };
        let Some(target) = self.images.get_mut(&destination.id) else {
            self.stats.stale_accesses += 1;
            return;
        };
        if target.pixels.len() != raw.len() {
            warn!(
                "blit size mismatch: {} source pixels, {} destination pixels",
                raw.len(),
                target.pixels.len()
            );
            return;
        }
        match history {
            Some((prior, weight)) => {
                for ((out, prior), raw) in target.pixels.iter_mut().zip(&prior).zip(&raw) {
                    *out = blend_pixel(*prior, *raw, weight);
                }
            }
            None => target.pixels.copy_from_slice(&raw),
        }
    }

    fn present(&mut self, source: &CpuImage) {
        self.stats.presents += 1;
        if let Some(pixels) = self.read(source) {
            self.presented = Some(Presented {
                viewport: source.viewport,
                pixels,
            });
        }
    }
}

pub(crate) fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

pub(crate) fn random_float(seed: &mut u32) -> f32 {
    *seed = pcg_hash(*seed);
    *seed as f32 / u32::MAX as f32
}

pub(crate) fn pixel_seed(x: u32, y: u32, width: u32, frame_index: u32) -> u32 {
    pcg_hash(x.wrapping_add(y.wrapping_mul(width)) ^ pcg_hash(frame_index))
}

fn random_unit_vector(seed: &mut u32) -> Vec3 {
    let z = random_float(seed) * 2.0 - 1.0;
    let phi = random_float(seed) * std::f32::consts::TAU;
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

fn trace_pixel(
    spheres: &[SphereInstance],
    params: &DispatchParams,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Vec4 {
    let mut seed = pixel_seed(x, y, width, params.frame_index);
    let u = (x as f32 + random_float(&mut seed)) / width as f32;
    let v = 1.0 - (y as f32 + random_float(&mut seed)) / height as f32;
    let direction = params.frustum.direction_at(u, v);
    let radiance = trace_path(
        spheres,
        params.frustum.camera_position,
        direction,
        params,
        &mut seed,
    );
    radiance.extend(1.0)
}

fn trace_path(
    spheres: &[SphereInstance],
    mut origin: Vec3,
    mut direction: Vec3,
    params: &DispatchParams,
    seed: &mut u32,
) -> Vec3 {
    let mut throughput = Vec3::ONE;
    for _ in 0..=params.max_bounces {
        match closest_hit(spheres, origin, direction) {
            Some(hit) => {
                throughput *= hit.albedo;
                origin = hit.point + hit.normal * SURFACE_EPSILON;
                direction = (hit.normal + random_unit_vector(seed))
                    .try_normalize()
                    .unwrap_or(hit.normal);
            }
            None => return throughput * environment(direction, params),
        }
    }
    Vec3::ZERO
}

fn environment(direction: Vec3, params: &DispatchParams) -> Vec3 {
    if direction.y >= 0.0 {
        params.sky_color
    } else {
        params.ground_color
    }
}

struct Hit {
    point: Vec3,
    normal: Vec3,
    albedo: Vec3,
}

fn closest_hit(spheres: &[SphereInstance], origin: Vec3, direction: Vec3) -> Option<Hit> {
    let mut closest: Option<(f32, &SphereInstance)> = None;
    for sphere in spheres {
        let oc = origin - sphere.center;
        let b = oc.dot(direction);
        let c = oc.length_squared() - sphere.radius * sphere.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            continue;
        }
        let root = discriminant.sqrt();
        let mut t = -b - root;
        if t <= SURFACE_EPSILON {
            t = -b + root;
        }
        if t <= SURFACE_EPSILON {
            continue;
        }
        if closest.map_or(true, |(best, _)| t < best) {
            closest = Some((t, sphere));
        }
    }
    closest.map(|(t, sphere)| {
        let point = origin + direction * t;
        Hit {
            point,
            normal: ((point - sphere.center) / sphere.radius.max(f32::EPSILON))
                .try_normalize()
                .unwrap_or(Vec3::Y),
            albedo: sphere.albedo,
        }
    })
}
