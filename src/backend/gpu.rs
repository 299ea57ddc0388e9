use bytemuck::{bytes_of, Pod, Zeroable};
use log::{info, warn};
use pollster::block_on;
use wgpu::util::DeviceExt;

use super::shaders::{with_format, ACCUMULATE_SHADER, RAYGEN_SHADER};
use super::{
    BackendCapabilities, BlitOp, DispatchParams, ImageFormat, RayTracingBackend,
    RAYGEN_ENTRY_POINT,
};
use crate::camera::Viewport;
use crate::error::BackendError;
use crate::scene::{SceneDescription, SphereInstance};

const WORKGROUP_SIZE: u32 = 8;
const ACCUMULATE_ENTRY_POINT: &str = "accumulate";

/// Device image created by [`WgpuBackend`].
#[derive(Debug)]
pub struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    viewport: Viewport,
}

impl GpuImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

/// Sphere storage buffer standing in for an acceleration structure.
#[derive(Debug)]
pub struct GpuScene {
    spheres: wgpu::Buffer,
    count: u32,
    capacity: u32,
    uploaded: Vec<SphereInstance>,
}

impl GpuScene {
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

struct Kernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

struct Kernels {
    raygen: Kernel,
    accumulate: Kernel,
}

/// wgpu compute backend: ray generation kernel, accumulation kernel and a copy to
/// an output texture on present.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    format: ImageFormat,
    kernels: Option<Kernels>,
    raygen_uniform: wgpu::Buffer,
    blend_uniform: wgpu::Buffer,
    output: Option<GpuImage>,
    frames_presented: u64,
}

impl WgpuBackend {
    /// Acquires a headless adapter and device and compiles the kernels for `format`.
    ///
    /// An adapter without compute shaders still yields a backend; it reports
    /// `ray_tracing: false` so activation can refuse it.
    pub async fn new(format: ImageFormat) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| BackendError::NoAdapter(err.to_string()))?;
        let adapter_info = adapter.get_info();
        let supports_compute = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("progressive-camera-device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        };
        let (device, queue) = adapter
            .request_device(&device_descriptor)
            .await
            .map_err(|err| BackendError::Device(err.to_string()))?;

        let kernels = supports_compute.then(|| Kernels {
            raygen: create_kernel(
                &device,
                "raygen",
                with_format(RAYGEN_SHADER, format),
                RAYGEN_ENTRY_POINT,
                &[
                    uniform_entry(0),
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    storage_texture_entry(2, format),
                ],
            ),
            accumulate: create_kernel(
                &device,
                "accumulate",
                with_format(ACCUMULATE_SHADER, format),
                ACCUMULATE_ENTRY_POINT,
                &[
                    uniform_entry(0),
                    texture_entry(1),
                    texture_entry(2),
                    storage_texture_entry(3, format),
                ],
            ),
        });

        let raygen_uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("raygen-uniform"),
            size: std::mem::size_of::<RaygenUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let blend_uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blend-uniform"),
            size: std::mem::size_of::<BlendUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        info!(
            "wgpu adapter {} ({:?}), compute {}",
            adapter_info.name,
            adapter_info.backend,
            if supports_compute { "available" } else { "missing" }
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            format,
            kernels,
            raygen_uniform,
            blend_uniform,
            output: None,
            frames_presented: 0,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Texture holding the most recently presented frame.
    pub fn output(&self) -> Option<&GpuImage> {
        self.output.as_ref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn submit_compute(&self, kernel: &Kernel, bind_group: &wgpu::BindGroup, viewport: Viewport) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compute-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compute-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(
                viewport.width.div_ceil(WORKGROUP_SIZE),
                viewport.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn copy(&self, source: &GpuImage, destination: &GpuImage) {
        if source.viewport != destination.viewport {
            warn!(
                "copy size mismatch: {:?} -> {:?}",
                source.viewport, destination.viewport
            );
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("copy-encoder"),
            });
        encoder.copy_texture_to_texture(
            source.texture.as_image_copy(),
            destination.texture.as_image_copy(),
            extent(source.viewport),
        );
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn new_image(&self, viewport: Viewport, label: &str) -> GpuImage {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(viewport),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(self.format),
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuImage {
            texture,
            view,
            viewport,
        }
    }
}

impl RayTracingBackend for WgpuBackend {
    type Image = GpuImage;
    type Scene = GpuScene;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            ray_tracing: self.kernels.is_some(),
            adapter: self.adapter_info.name.clone(),
        }
    }

    fn create_image(
        &mut self,
        viewport: Viewport,
        format: ImageFormat,
        label: &str,
    ) -> Result<GpuImage, BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if viewport.is_empty() || viewport.width > max || viewport.height > max {
            return Err(BackendError::InvalidExtent {
                width: viewport.width,
                height: viewport.height,
            });
        }
        if format != self.format {
            return Err(BackendError::Device(format!(
                "kernels were compiled for {:?}, not {format:?}",
                self.format
            )));
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let image = self.new_image(viewport, label);
        let scoped = block_on(self.device.pop_error_scope());
        let bytes = u64::from(viewport.width)
            * u64::from(viewport.height)
            * format.bytes_per_pixel();
        if let Err(err) = allocation_result(scoped, label, bytes) {
            image.texture.destroy();
            return Err(err);
        }
        Ok(image)
    }

    fn release_image(&mut self, image: GpuImage) {
        image.texture.destroy();
    }

    fn build_acceleration_structure(
        &mut self,
        scene: &SceneDescription,
    ) -> Result<GpuScene, BackendError> {
        let spheres = gpu_spheres(&scene.instances);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("scene-spheres"),
                contents: bytemuck::cast_slice(&spheres),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
        Ok(GpuScene {
            spheres: buffer,
            count: scene.instances.len() as u32,
            capacity: spheres.len() as u32,
            uploaded: scene.instances.clone(),
        })
    }

    fn update_acceleration_structure(&mut self, accel: &mut GpuScene, scene: &SceneDescription) {
        if accel.uploaded == scene.instances {
            return;
        }
        let spheres = gpu_spheres(&scene.instances);
        if spheres.len() as u32 <= accel.capacity {
            self.queue
                .write_buffer(&accel.spheres, 0, bytemuck::cast_slice(&spheres));
            accel.count = scene.instances.len() as u32;
            accel.uploaded.clone_from(&scene.instances);
        } else {
            let old = std::mem::replace(accel, {
                let buffer = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("scene-spheres"),
                        contents: bytemuck::cast_slice(&spheres),
                        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    });
                GpuScene {
                    spheres: buffer,
                    count: scene.instances.len() as u32,
                    capacity: spheres.len() as u32,
                    uploaded: scene.instances.clone(),
                }
            });
            old.spheres.destroy();
        }
    }

    fn release_acceleration_structure(&mut self, accel: GpuScene) {
        accel.spheres.destroy();
    }

    fn dispatch(&mut self, accel: &GpuScene, target: &GpuImage, params: &DispatchParams) {
        let Some(kernels) = self.kernels.as_ref() else {
            warn!("dispatch skipped: compute kernels unavailable");
            return;
        };
        let uniform = RaygenUniform::new(params, accel.count, target.viewport);
        self.queue
            .write_buffer(&self.raygen_uniform, 0, bytes_of(&uniform));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raygen-bind-group"),
            layout: &kernels.raygen.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.raygen_uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: accel.spheres.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&target.view),
                },
            ],
        });
        self.submit_compute(&kernels.raygen, &bind_group, target.viewport);
    }

    fn blit(&mut self, source: &GpuImage, destination: &GpuImage, op: BlitOp<'_, GpuImage>) {
        let (history, weight) = match op {
            BlitOp::Copy => return self.copy(source, destination),
            BlitOp::Accumulate { history, weight } => (history, weight),
        };
        let Some(kernels) = self.kernels.as_ref() else {
            warn!("accumulation skipped: compute kernels unavailable");
            return;
        };
        let uniform = BlendUniform {
            weight,
            width: destination.viewport.width,
            height: destination.viewport.height,
            _pad: 0,
        };
        self.queue
            .write_buffer(&self.blend_uniform, 0, bytes_of(&uniform));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("accumulate-bind-group"),
            layout: &kernels.accumulate.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.blend_uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&history.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&destination.view),
                },
            ],
        });
        self.submit_compute(&kernels.accumulate, &bind_group, destination.viewport);
    }

    fn present(&mut self, source: &GpuImage) {
        if self
            .output
            .as_ref()
            .map_or(true, |output| output.viewport != source.viewport)
        {
            if let Some(old) = self.output.take() {
                old.texture.destroy();
            }
            self.output = Some(self.new_image(source.viewport, "present-output"));
        }
        if let Some(output) = self.output.as_ref() {
            self.copy(source, output);
            self.frames_presented += 1;
        }
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        if let Some(output) = self.output.take() {
            output.texture.destroy();
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RaygenUniform {
    top_left: [f32; 4],
    top_right: [f32; 4],
    bottom_left: [f32; 4],
    bottom_right: [f32; 4],
    camera_position: [f32; 4],
    sky_color: [f32; 4],
    ground_color: [f32; 4],
    frame_index: u32,
    sphere_count: u32,
    max_bounces: u32,
    width: u32,
    height: u32,
    _pad: [u32; 3],
}

impl RaygenUniform {
    fn new(params: &DispatchParams, sphere_count: u32, viewport: Viewport) -> Self {
        let frustum = &params.frustum;
        Self {
            top_left: frustum.top_left.extend(0.0).into(),
            top_right: frustum.top_right.extend(0.0).into(),
            bottom_left: frustum.bottom_left.extend(0.0).into(),
            bottom_right: frustum.bottom_right.extend(0.0).into(),
            camera_position: frustum.camera_position.extend(1.0).into(),
            sky_color: params.sky_color.extend(1.0).into(),
            ground_color: params.ground_color.extend(1.0).into(),
            frame_index: params.frame_index,
            sphere_count,
            max_bounces: params.max_bounces,
            width: viewport.width,
            height: viewport.height,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BlendUniform {
    weight: f32,
    width: u32,
    height: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct GpuSphere {
    center_radius: [f32; 4],
    albedo: [f32; 4],
}

/// Packs instances for the storage buffer; never empty, since zero-sized
/// bindings are invalid.
fn gpu_spheres(instances: &[SphereInstance]) -> Vec<GpuSphere> {
    let mut spheres: Vec<GpuSphere> = instances
        .iter()
        .map(|sphere| GpuSphere {
            center_radius: sphere.center.extend(sphere.radius).into(),
            albedo: sphere.albedo.extend(1.0).into(),
        })
        .collect();
    if spheres.is_empty() {
        spheres.push(GpuSphere::zeroed());
    }
    spheres
}

/// Maps the error captured around a texture allocation.
fn allocation_result(
    error: Option<wgpu::Error>,
    label: &str,
    bytes: u64,
) -> Result<(), BackendError> {
    match error {
        None => Ok(()),
        Some(wgpu::Error::OutOfMemory { .. }) => Err(BackendError::OutOfMemory {
            label: label.to_string(),
            bytes,
        }),
        Some(other) => Err(BackendError::Device(other.to_string())),
    }
}

fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        ImageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

fn extent(viewport: Viewport) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: viewport.width,
        height: viewport.height,
        depth_or_array_layers: 1,
    }
}

fn create_kernel(
    device: &wgpu::Device,
    label: &str,
    source: String,
    entry_point: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Kernel {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    });
    Kernel { pipeline, layout }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32, format: ImageFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: texture_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;
    use crate::camera::CameraState;
    use crate::frustum::FrustumDirections;

    #[test]
    fn uniform_layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<RaygenUniform>(), 144);
        assert_eq!(std::mem::size_of::<BlendUniform>(), 16);
        assert_eq!(std::mem::size_of::<GpuSphere>(), 32);
    }

    #[test]
    fn empty_scene_still_has_a_sphere_slot() {
        let spheres = gpu_spheres(&[]);
        assert_eq!(spheres, vec![GpuSphere::zeroed()]);
        let packed = gpu_spheres(&[SphereInstance {
            name: "a".into(),
            center: Vec3::new(1.0, 2.0, 3.0),
            radius: 0.5,
            albedo: Vec3::splat(0.25),
        }]);
        assert_eq!(packed[0].center_radius, [1.0, 2.0, 3.0, 0.5]);
        assert_eq!(packed[0].albedo, [0.25, 0.25, 0.25, 1.0]);
    }

    #[test]
    fn raygen_uniform_carries_frame_state() {
        let viewport = Viewport::new(33, 17);
        let camera = CameraState::new(Mat4::IDENTITY, viewport);
        let params = DispatchParams {
            frame_index: 9,
            sky_color: Vec3::Z,
            ground_color: Vec3::splat(0.5),
            frustum: FrustumDirections::build(&camera),
            max_bounces: 3,
        };
        let uniform = RaygenUniform::new(&params, 2, viewport);
        assert_eq!(uniform.frame_index, 9);
        assert_eq!(uniform.sphere_count, 2);
        assert_eq!((uniform.width, uniform.height), (33, 17));
        assert_eq!(uniform.camera_position, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(viewport.width.div_ceil(WORKGROUP_SIZE), 5);
    }

    #[test]
    fn captured_out_of_memory_is_reported() {
        assert_eq!(allocation_result(None, "raw-sample", 64), Ok(()));
        let oom = wgpu::Error::OutOfMemory {
            source: Box::new(std::fmt::Error),
        };
        assert_eq!(
            allocation_result(Some(oom), "raw-sample", 64),
            Err(BackendError::OutOfMemory {
                label: "raw-sample".to_string(),
                bytes: 64
            })
        );
        let other = wgpu::Error::Internal {
            source: Box::new(std::fmt::Error),
            description: "device lost".to_string(),
        };
        assert_eq!(
            allocation_result(Some(other), "accumulation-a", 64),
            Err(BackendError::Device("device lost".to_string()))
        );
    }

    #[test]
    fn kernels_are_specialized_per_format() {
        let source = with_format(RAYGEN_SHADER, ImageFormat::Rgba16Float);
        assert!(source.contains("texture_storage_2d<rgba16float, write>"));
        assert!(!source.contains("{{FORMAT}}"));
        assert!(source.contains(&format!("fn {RAYGEN_ENTRY_POINT}(")));
        let source = with_format(ACCUMULATE_SHADER, ImageFormat::Rgba32Float);
        assert!(source.contains(&format!("fn {ACCUMULATE_ENTRY_POINT}(")));
    }
}
