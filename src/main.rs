use std::env;
use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::Mat4;
use log::info;
use pollster::block_on;

use progressive_camera::{
    CameraState, CpuBackend, FrameDriver, InputState, RayTracingBackend, ResetTrigger,
    SceneDocument, Viewport, WgpuBackend,
};

const USAGE: &str = "Usage: progressive-camera <scene.xml> [--frames N] [--size WxH] [--orbit] [--reset-every K] [--gpu]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let xml = fs::read_to_string(&options.path)
        .with_context(|| format!("failed to read scene {}", options.path))?;
    let document = SceneDocument::from_xml(&xml).context("failed to parse scene XML")?;
    let description = document.description();

    println!(
        "Loaded scene with {} objects ({} spheres)",
        document.objects.len(),
        description.instances.len()
    );
    for object in &document.objects {
        println!(" - {} ({})", object.name, object.object_type);
    }

    let camera = document.camera(options.viewport);
    if options.gpu {
        let backend = block_on(WgpuBackend::new(document.settings.format))
            .context("failed to initialise wgpu backend")?;
        let (_driver, summary) = run_frames(backend, &document, camera, &options)?;
        summary.print();
    } else {
        let (driver, summary) = run_frames(CpuBackend::new(), &document, camera, &options)?;
        summary.print();
        if let Some(mean) = driver.backend().presented_mean() {
            println!("Mean color: ({:.3}, {:.3}, {:.3})", mean.x, mean.y, mean.z);
        }
    }
    Ok(())
}

struct RunSummary {
    frames: u32,
    resets: u32,
    samples: u32,
}

impl RunSummary {
    fn print(&self) {
        println!("Rendered {} frames", self.frames);
        println!("Resets: {}", self.resets);
        println!("Samples accumulated: {}", self.samples);
    }
}

fn run_frames<B: RayTracingBackend>(
    backend: B,
    document: &SceneDocument,
    camera: CameraState,
    options: &CliOptions,
) -> Result<(FrameDriver<B>, RunSummary)> {
    let settings = document.settings.clone();
    let input = Arc::new(InputState::new());
    let trigger = ResetTrigger::new(Arc::clone(&input), settings.reset_key);
    let mut driver = FrameDriver::activate(backend, document.description(), &camera, settings)
        .context("failed to activate progressive camera")?;

    let mut summary = RunSummary {
        frames: 0,
        resets: 0,
        samples: 0,
    };
    for frame in 0..options.frames {
        if options.reset_every.is_some_and(|every| frame > 0 && frame % every == 0) {
            input.set_key_down(trigger.key());
            input.set_key_up(trigger.key());
        }
        let camera = if options.orbit {
            let angle = (frame as f32 * ORBIT_STEP_DEGREES).to_radians();
            camera.with_transform(Mat4::from_rotation_y(angle) * camera.world_transform)
        } else {
            camera
        };

        let report = driver
            .render_frame(&camera, trigger.take())
            .with_context(|| format!("frame {frame} failed"))?;
        if let Some(reason) = report.reset {
            info!("frame {frame}: accumulation reset ({reason})");
            summary.resets += 1;
        }
        summary.frames += 1;
        summary.samples = report.samples_accumulated;
    }
    Ok((driver, summary))
}

const ORBIT_STEP_DEGREES: f32 = 5.0;

struct CliOptions {
    path: String,
    frames: u32,
    viewport: Viewport,
    orbit: bool,
    reset_every: Option<u32>,
    gpu: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let Some(path) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut options = Self {
            path,
            frames: 16,
            viewport: Viewport::new(160, 90),
            orbit: false,
            reset_every: None,
            gpu: false,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--frames" => options.frames = parse_number(args.next(), "--frames")?,
                "--size" => options.viewport = parse_size(args.next())?,
                "--orbit" => options.orbit = true,
                "--reset-every" => {
                    let every = parse_number(args.next(), "--reset-every")?;
                    if every == 0 {
                        return Err(anyhow!("--reset-every must be at least 1"));
                    }
                    options.reset_every = Some(every);
                }
                "--gpu" => options.gpu = true,
                other => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
            }
        }
        Ok(options)
    }
}

fn parse_number(value: Option<String>, flag: &str) -> Result<u32> {
    let value = value.ok_or_else(|| anyhow!("{flag} expects a value"))?;
    value
        .parse()
        .with_context(|| format!("invalid value for {flag}: {value}"))
}

fn parse_size(value: Option<String>) -> Result<Viewport> {
    let value = value.ok_or_else(|| anyhow!("--size expects WIDTHxHEIGHT"))?;
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| anyhow!("invalid size {value}, expected WIDTHxHEIGHT"))?;
    let width = width
        .parse()
        .with_context(|| format!("invalid width in {value}"))?;
    let height = height
        .parse()
        .with_context(|| format!("invalid height in {value}"))?;
    Ok(Viewport::new(width, height))
}
