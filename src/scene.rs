use anyhow::{anyhow, Context, Result};
use glam::{Mat4, Vec3};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraState, Viewport};
use crate::config::TracerSettings;

/// Geometry handed to the acceleration-structure builder.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    pub instances: Vec<SphereInstance>,
}

impl SceneDescription {
    pub fn new(instances: Vec<SphereInstance>) -> Self {
        Self { instances }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Analytic sphere with a diffuse albedo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereInstance {
    pub name: String,
    pub center: Vec3,
    pub radius: f32,
    pub albedo: Vec3,
}

/// Parsed scene file: objects plus tracer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SceneDocument {
    pub objects: Vec<SceneObject>,
    pub settings: TracerSettings,
}

impl SceneDocument {
    /// Parses a `<scene>` document of `<object>` elements and an optional `<settings>`.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let mut objects = Vec::new();

        for node in document.descendants().filter(|n| n.has_tag_name("object")) {
            let mut object = SceneObject::default();
            object.name = required_text(&node, "name")?;
            object.object_type =
                optional_text(&node, "type").unwrap_or_else(|| "sphere".to_string());
            object.color = parse_color(optional_text(&node, "color"), object.color)
                .with_context(|| format!("object {}", object.name))?;
            object.position = parse_vec3(optional_text(&node, "position"), object.position)
                .with_context(|| format!("object {}", object.name))?;
            object.rotation = parse_vec3(optional_text(&node, "rotation"), object.rotation)
                .with_context(|| format!("object {}", object.name))?;
            object.scale = parse_vec3(optional_text(&node, "scale"), object.scale)
                .with_context(|| format!("object {}", object.name))?;
            object.fov = parse_f32(optional_text(&node, "fov"), object.fov)?;
            object.near = parse_f32(optional_text(&node, "near"), object.near)?;
            object.far = parse_f32(optional_text(&node, "far"), object.far)?;
            objects.push(object);
        }

        let settings = match document
            .descendants()
            .find(|n| n.has_tag_name("settings"))
        {
            Some(node) => parse_settings(&node)?,
            None => TracerSettings::default(),
        };

        Ok(Self { objects, settings })
    }

    /// Sphere instances for the acceleration structure.
    pub fn description(&self) -> SceneDescription {
        SceneDescription::new(
            self.objects
                .iter()
                .filter(|o| o.object_type == "sphere")
                .map(|o| SphereInstance {
                    name: o.name.clone(),
                    center: o.position,
                    radius: o.scale.x.abs(),
                    albedo: o.color,
                })
                .collect(),
        )
    }

    /// Camera described by the first `camera` object, or a default view of the origin.
    pub fn camera(&self, viewport: Viewport) -> CameraState {
        match self.objects.iter().find(|o| o.object_type == "camera") {
            Some(camera) => CameraState::new(object_transform(camera), viewport)
                .with_fov(camera.fov)
                .with_clip_planes(camera.near, camera.far),
            None => CameraState::look_at(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO, Vec3::Y, viewport),
        }
    }
}

/// Scene object as written in the scene file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default = "default_color")]
    pub color: Vec3,
    #[serde(default)]
    pub position: Vec3,
    /// Euler angles in degrees, applied Z * Y * X.
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default = "default_scale")]
    pub scale: Vec3,
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

impl Default for SceneObject {
    fn default() -> Self {
        Self {
            name: String::new(),
            object_type: String::new(),
            color: default_color(),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: default_scale(),
            fov: default_fov(),
            near: default_near(),
            far: default_far(),
        }
    }
}

fn default_color() -> Vec3 {
    Vec3::splat(0.8)
}

fn default_scale() -> Vec3 {
    Vec3::ONE
}

fn default_fov() -> f32 {
    CameraState::DEFAULT_FOV
}

fn default_near() -> f32 {
    CameraState::DEFAULT_NEAR
}

fn default_far() -> f32 {
    CameraState::DEFAULT_FAR
}

/// World transform of an object: translation, then Z * Y * X rotation.
pub fn object_transform(object: &SceneObject) -> Mat4 {
    let rotation = Mat4::from_rotation_z(object.rotation.z.to_radians())
        * Mat4::from_rotation_y(object.rotation.y.to_radians())
        * Mat4::from_rotation_x(object.rotation.x.to_radians());
    Mat4::from_translation(object.position) * rotation
}

fn parse_settings(node: &Node<'_, '_>) -> Result<TracerSettings> {
    let defaults = TracerSettings::default();
    let reset_key = match optional_text(node, "reset-key") {
        Some(name) => crate::input::KeyCode::from_name(&name)
            .ok_or_else(|| anyhow!("unknown reset key: {name}"))?,
        None => defaults.reset_key,
    };
    let format = match optional_text(node, "format") {
        Some(name) => crate::backend::ImageFormat::from_name(&name)
            .ok_or_else(|| anyhow!("unknown image format: {name}"))?,
        None => defaults.format,
    };
    let max_bounces = match optional_text(node, "bounces") {
        Some(value) => value
            .parse::<u32>()
            .map_err(|err| anyhow!("failed to parse bounces: {err}"))?,
        None => defaults.max_bounces,
    };
    Ok(TracerSettings {
        sky_color: parse_color(optional_text(node, "sky"), defaults.sky_color)
            .context("sky color")?,
        ground_color: parse_color(optional_text(node, "ground"), defaults.ground_color)
            .context("ground color")?,
        reset_key,
        transform_tolerance: parse_f32(
            optional_text(node, "tolerance"),
            defaults.transform_tolerance,
        )?,
        max_bounces,
        format,
    })
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_components(value: &str, what: &str) -> Result<Vec3> {
    let mut numbers = value.split_whitespace().map(|component| {
        component
            .parse::<f32>()
            .map_err(|err| anyhow!("invalid {what} component {component:?}: {err}"))
    });
    let mut next = || {
        numbers
            .next()
            .unwrap_or_else(|| Err(anyhow!("{what} is missing components")))
    };
    Ok(Vec3::new(next()?, next()?, next()?))
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => parse_components(&value, "vector"),
        None => Ok(default),
    }
}

/// Colors are written as 0-255 channels.
fn parse_color(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => Ok(parse_components(&value, "color")? / 255.0),
        None => Ok(default),
    }
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float: {err}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageFormat;
    use crate::input::{KeyCode, NamedKey};

    const SAMPLE: &str = r#"
    <scene>
        <settings>
            <sky>51 102 255</sky>
            <ground>64 64 64</ground>
            <reset-key>R</reset-key>
            <tolerance>0.0001</tolerance>
            <bounces>2</bounces>
            <format>rgba16float</format>
        </settings>
        <object>
            <name>Camera</name>
            <type>camera</type>
            <position>0 1 5</position>
            <fov>45</fov>
            <far>200</far>
        </object>
        <object>
            <name>Ball</name>
            <type>sphere</type>
            <position>0 0 -2</position>
            <scale>1.5 1.5 1.5</scale>
            <color>255 0 0</color>
        </object>
    </scene>
    "#;

    #[test]
    fn parse_scene_populates_objects_and_settings() {
        let doc = SceneDocument::from_xml(SAMPLE).unwrap();
        assert_eq!(doc.objects.len(), 2);
        assert_eq!(doc.settings.sky_color, Vec3::new(0.2, 0.4, 1.0));
        assert_eq!(doc.settings.reset_key, KeyCode::Character('R'));
        assert_eq!(doc.settings.max_bounces, 2);
        assert_eq!(doc.settings.format, ImageFormat::Rgba16Float);
        assert!((doc.settings.transform_tolerance - 1e-4).abs() < 1e-9);

        let scene = doc.description();
        assert_eq!(scene.instances.len(), 1);
        assert_eq!(scene.instances[0].radius, 1.5);
        assert_eq!(scene.instances[0].albedo, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn camera_object_drives_camera_state() {
        let doc = SceneDocument::from_xml(SAMPLE).unwrap();
        let camera = doc.camera(Viewport::new(320, 240));
        assert_eq!(camera.position(), Vec3::new(0.0, 1.0, 5.0));
        assert_eq!(camera.fov_y_degrees, 45.0);
        assert_eq!(camera.far_plane, 200.0);
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn defaults_without_settings_or_camera() {
        let doc = SceneDocument::from_xml("<scene></scene>").unwrap();
        assert_eq!(doc.settings, TracerSettings::default());
        assert_eq!(doc.settings.reset_key, KeyCode::Named(NamedKey::Space));
        let camera = doc.camera(Viewport::new(10, 10));
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, 2.0, 6.0), 1e-5));
        assert!(doc.description().is_empty());
    }

    #[test]
    fn missing_name_is_an_error() {
        let bad = "<scene><object><type>sphere</type></object></scene>";
        assert!(SceneDocument::from_xml(bad).is_err());
    }

    #[test]
    fn malformed_vectors_are_errors() {
        let bad = "<scene><object><name>A</name><position>1 2</position></object></scene>";
        assert!(SceneDocument::from_xml(bad).is_err());
        let bad = "<scene><settings><reset-key>Nope</reset-key></settings></scene>";
        assert!(SceneDocument::from_xml(bad).is_err());
    }
}
