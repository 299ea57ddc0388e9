//! WGSL kernels for [`WgpuBackend`](super::WgpuBackend).
//!
//! `{{FORMAT}}` is replaced with the storage texel format before compilation.
//! Sampling mirrors `cpu.rs`: same PCG hash, seeding, jitter and bounce rule.

pub(crate) const RAYGEN_SHADER: &str = r#"
struct RaygenParams {
    top_left: vec4<f32>,
    top_right: vec4<f32>,
    bottom_left: vec4<f32>,
    bottom_right: vec4<f32>,
    camera_position: vec4<f32>,
    sky_color: vec4<f32>,
    ground_color: vec4<f32>,
    frame_index: u32,
    sphere_count: u32,
    max_bounces: u32,
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct Sphere {
    center_radius: vec4<f32>,
    albedo: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> params: RaygenParams;

@group(0) @binding(1)
var<storage, read> spheres: array<Sphere>;

@group(0) @binding(2)
var raw_target: texture_storage_2d<{{FORMAT}}, write>;

const SURFACE_EPSILON: f32 = 1e-3;
const TAU: f32 = 6.283185307179586;

fn pcg_hash(input: u32) -> u32 {
    let state = input * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

fn random_float(seed: ptr<function, u32>) -> f32 {
    *seed = pcg_hash(*seed);
    return f32(*seed) / 4294967295.0;
}

fn random_unit_vector(seed: ptr<function, u32>) -> vec3<f32> {
    let z = random_float(seed) * 2.0 - 1.0;
    let phi = random_float(seed) * TAU;
    let r = sqrt(max(1.0 - z * z, 0.0));
    return vec3<f32>(r * cos(phi), r * sin(phi), z);
}

fn environment(direction: vec3<f32>) -> vec3<f32> {
    if (direction.y >= 0.0) {
        return params.sky_color.xyz;
    }
    return params.ground_color.xyz;
}

struct Hit {
    found: bool,
    t: f32,
    index: u32,
}

fn closest_hit(origin: vec3<f32>, direction: vec3<f32>) -> Hit {
    var hit = Hit(false, 0.0, 0u);
    for (var i = 0u; i < params.sphere_count; i = i + 1u) {
        let sphere = spheres[i];
        let oc = origin - sphere.center_radius.xyz;
        let b = dot(oc, direction);
        let c = dot(oc, oc) - sphere.center_radius.w * sphere.center_radius.w;
        let discriminant = b * b - c;
        if (discriminant < 0.0) {
            continue;
        }
        let root = sqrt(discriminant);
        var t = -b - root;
        if (t <= SURFACE_EPSILON) {
            t = -b + root;
        }
        if (t <= SURFACE_EPSILON) {
            continue;
        }
        if (!hit.found || t < hit.t) {
            hit = Hit(true, t, i);
        }
    }
    return hit;
}

fn frustum_direction(u: f32, v: f32) -> vec3<f32> {
    let bottom = mix(params.bottom_left.xyz, params.bottom_right.xyz, vec3<f32>(u));
    let top = mix(params.top_left.xyz, params.top_right.xyz, vec3<f32>(u));
    return normalize(mix(bottom, top, vec3<f32>(v)));
}

@compute @workgroup_size(8, 8, 1)
fn raygen(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= params.width || id.y >= params.height) {
        return;
    }

    var seed = pcg_hash((id.x + id.y * params.width) ^ pcg_hash(params.frame_index));
    let u = (f32(id.x) + random_float(&seed)) / f32(params.width);
    let v = 1.0 - (f32(id.y) + random_float(&seed)) / f32(params.height);

    var origin = params.camera_position.xyz;
    var direction = frustum_direction(u, v);
    var throughput = vec3<f32>(1.0);
    var radiance = vec3<f32>(0.0);

    for (var bounce = 0u; bounce <= params.max_bounces; bounce = bounce + 1u) {
        let hit = closest_hit(origin, direction);
        if (!hit.found) {
            radiance = throughput * environment(direction);
            break;
        }
        let sphere = spheres[hit.index];
        let point = origin + direction * hit.t;
        let normal = normalize(point - sphere.center_radius.xyz);
        throughput = throughput * sphere.albedo.xyz;
        origin = point + normal * SURFACE_EPSILON;
        let scattered = normal + random_unit_vector(&seed);
        if (dot(scattered, scattered) > 1e-12) {
            direction = normalize(scattered);
        } else {
            direction = normal;
        }
    }

    textureStore(raw_target, vec2<i32>(id.xy), vec4<f32>(radiance, 1.0));
}
"#;

pub(crate) const ACCUMULATE_SHADER: &str = r#"
struct BlendParams {
    weight: f32,
    width: u32,
    height: u32,
    _pad: u32,
}

@group(0) @binding(0)
var<uniform> blend: BlendParams;

@group(0) @binding(1)
var raw_sample: texture_2d<f32>;

@group(0) @binding(2)
var history: texture_2d<f32>;

@group(0) @binding(3)
var accumulated: texture_storage_2d<{{FORMAT}}, write>;

@compute @workgroup_size(8, 8, 1)
fn accumulate(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= blend.width || id.y >= blend.height) {
        return;
    }
    let coord = vec2<i32>(id.xy);
    let raw = textureLoad(raw_sample, coord, 0);
    var result = raw;
    if (blend.weight < 1.0) {
        let prior = textureLoad(history, coord, 0);
        result = prior * (1.0 - blend.weight) + raw * blend.weight;
    }
    textureStore(accumulated, coord, result);
}
"#;

pub(crate) fn with_format(source: &str, format: super::ImageFormat) -> String {
    source.replace("{{FORMAT}}", format.wgsl_name())
}
