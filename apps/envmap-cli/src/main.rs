use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use envmap_common::{DepthCamera, DepthFrame, Plane, Pose, Ray, SyntheticScene};
use envmap_compute::{ComputeBackend, CpuBackend, RecordingBackend, VolumeKernel};
use envmap_kernel::{Environment, EnvironmentConfig, Strategy, UpdateOutcome};
use envmap_persist::{MapSnapshot, SnapshotStore, encode_updates};
use envmap_stream::FrameTimer;
use glam::{Vec2, Vec3};
use tracing_subscriber::EnvFilter;

/// Simulated host frame period.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "envmap-cli", about = "Run environment mappers against synthetic depth scenes")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Environment config (YAML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run the mapper kernels on the GPU (needs the `wgpu` feature)
    #[arg(long, global = true)]
    gpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective configuration
    Info,
    /// Map a synthetic floor with the height-field strategy
    Height {
        /// Number of depth frames to integrate
        #[arg(short, long, default_value = "30")]
        frames: u32,
        /// Floor height in metres
        #[arg(long, default_value = "-1.0", allow_hyphen_values = true)]
        floor: f32,
    },
    /// Scan a synthetic wall with the voxel strategy and raycast it
    Volume {
        /// Distance from the camera to the wall in metres
        #[arg(short, long, default_value = "2.3")]
        wall: f32,
        /// Raycast range in metres
        #[arg(short, long, default_value = "5.0")]
        max_distance: f32,
        /// Host frames to simulate before giving up on the sweep
        #[arg(long, default_value = "600")]
        max_frames: u32,
    },
    /// Save a mapped height field to a store, then restore it into a fresh environment
    Snapshot {
        /// Store directory
        #[arg(short, long, default_value = "envmap-store")]
        store: PathBuf,
        /// Number of depth frames to integrate before saving
        #[arg(short, long, default_value = "10")]
        frames: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => EnvironmentConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EnvironmentConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("envmap-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("strategy: {}", config.strategy);
            if cli.gpu {
                println!("adapter: {}", gpu_adapter()?);
            }
            print!("{}", config.to_yaml()?);
        }
        Commands::Height { frames, floor } => run_height(config, backend(cli.gpu)?, frames, floor)?,
        Commands::Volume {
            wall,
            max_distance,
            max_frames,
        } => run_volume(config, backend(cli.gpu)?, wall, max_distance, max_frames)?,
        Commands::Snapshot { store, frames } => run_snapshot(config, cli.gpu, &store, frames)?,
    }

    Ok(())
}

/// The CPU reference backend, or the wgpu one with `--gpu`.
fn backend(gpu: bool) -> anyhow::Result<Box<dyn ComputeBackend>> {
    if gpu {
        gpu_backend()
    } else {
        Ok(Box::new(CpuBackend::new()))
    }
}

#[cfg(feature = "wgpu")]
fn gpu_backend() -> anyhow::Result<Box<dyn ComputeBackend>> {
    let backend = envmap_compute::WgpuBackend::new().context("opening a wgpu device")?;
    tracing::info!(adapter = backend.adapter_name(), "running kernels on the GPU");
    Ok(Box::new(backend))
}

#[cfg(not(feature = "wgpu"))]
fn gpu_backend() -> anyhow::Result<Box<dyn ComputeBackend>> {
    anyhow::bail!("envmap-cli was built without the `wgpu` feature")
}

#[cfg(feature = "wgpu")]
fn gpu_adapter() -> anyhow::Result<String> {
    let backend = envmap_compute::WgpuBackend::new().context("opening a wgpu device")?;
    Ok(backend.adapter_name().to_owned())
}

#[cfg(not(feature = "wgpu"))]
fn gpu_adapter() -> anyhow::Result<String> {
    anyhow::bail!("envmap-cli was built without the `wgpu` feature")
}

fn floor_frame(floor: f32) -> anyhow::Result<DepthFrame> {
    let pose = Pose::looking_at(Vec3::new(0.0, floor + 1.5, 0.0), Vec3::new(0.0, floor, -2.0));
    Ok(SyntheticScene::new()
        .with_plane(Plane::floor(floor))
        .render(&DepthCamera::default(), pose)?)
}

fn map_floor<B: ComputeBackend>(
    env: &mut Environment<B>,
    frame: &DepthFrame,
    frames: u32,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut timer = FrameTimer::new(64);
    let mut last_cells = 0;
    for i in 0..frames {
        let outcome = timer.time(|| env.update(frame, start + FRAME * i))?;
        if let UpdateOutcome::Height(tick) = &outcome {
            if let Some(updates) = tick.updates() {
                last_cells = updates.len();
            }
        }
    }
    println!(
        "{frames} frames, last frame wrote {last_cells} cells, avg {:?}, max {:?}",
        timer.average(),
        timer.max()
    );
    Ok(())
}

fn run_height(
    config: EnvironmentConfig,
    backend: Box<dyn ComputeBackend>,
    frames: u32,
    floor: f32,
) -> anyhow::Result<()> {
    let config = EnvironmentConfig::height_field(config.height);
    let mut env = Environment::new(config, backend)?;
    let frame = floor_frame(floor)?;
    let spot = Vec2::new(0.0, -1.5);

    let start = Instant::now();
    for i in 0..frames {
        let outcome = env.update(&frame, start + FRAME * i)?;
        let sample = env.surface_height(spot)?;
        if let (UpdateOutcome::Height(tick), Some(sample)) = (&outcome, sample) {
            let cells = tick.updates().map_or(0, |u| u.len());
            println!(
                "frame {i:3}: cells={cells:5} height={:+.3} confidence={:.3}",
                sample.height, sample.confidence
            );
        }
    }

    if let UpdateOutcome::Height(tick) = env.update(&frame, start + FRAME * frames)? {
        if let Some(updates) = tick.updates() {
            let bytes = encode_updates(updates)?;
            println!("update batch: {} cells, {} bytes encoded", updates.len(), bytes.len());
        }
    }
    Ok(())
}

fn run_volume(
    config: EnvironmentConfig,
    backend: Box<dyn ComputeBackend>,
    wall: f32,
    max_distance: f32,
    max_frames: u32,
) -> anyhow::Result<()> {
    let config = EnvironmentConfig::voxel(config.volume);
    let mut env = Environment::new(config, RecordingBackend::new(backend))?;
    let frame = SyntheticScene::new()
        .with_plane(Plane::new(Vec3::Z, Vec3::new(0.0, 0.0, -wall)))
        .render(&DepthCamera::default(), Pose::default())?;

    let start = Instant::now();
    let mut timer = FrameTimer::new(64);
    let mut completed = None;
    for i in 0..max_frames {
        let outcome = timer.time(|| env.update(&frame, start + FRAME * i))?;
        if let UpdateOutcome::Voxel(report) = outcome {
            if report.sweep_completed {
                completed = Some(i + 1);
                break;
            }
        }
    }
    let Some(frames) = completed else {
        anyhow::bail!("scan sweep did not complete within {max_frames} frames");
    };

    let mapper = env
        .tsdf_mapper()
        .context("voxel environment has no TSDF mapper")?;
    let stats = mapper.stats();
    println!(
        "sweep completed in {frames} frames: dispatched={} culled={} (avg update {:?})",
        stats.chunks_dispatched,
        stats.chunks_culled,
        timer.average()
    );
    println!(
        "scan dispatches recorded: {}",
        mapper.backend().count(VolumeKernel::Scan)
    );
    if let Some(mesh) = mapper.mesh() {
        println!(
            "surface mesh: {} vertices, {} triangles",
            mesh.vertices.len(),
            mesh.triangle_count()
        );
    }

    match env.raycast(Ray::new(Vec3::ZERO, Vec3::NEG_Z), max_distance)? {
        Some(hit) => println!(
            "hit at {:.3} m (wall at {wall:.3} m), point={:?}",
            hit.distance, hit.point
        ),
        None => println!("no hit within {max_distance} m"),
    }
    Ok(())
}

fn run_snapshot(config: EnvironmentConfig, gpu: bool, dir: &Path, frames: u32) -> anyhow::Result<()> {
    let config = EnvironmentConfig::height_field(config.height);
    let mut env = Environment::new(config.clone(), backend(gpu)?)?;
    map_floor(&mut env, &floor_frame(-1.0)?, frames)?;

    let snapshot = MapSnapshot::capture(&env).context("height map not configured")?;
    let mut store = SnapshotStore::open(dir)
        .with_context(|| format!("opening store {}", dir.display()))?;
    let index = store.save(&snapshot)?;
    store.verify_integrity()?;
    println!("saved snapshot {index} to {}", store.root().display());

    let loaded = store.load_latest()?;
    let mut restored = Environment::new(config, CpuBackend::new())?;
    loaded.restore_into(&mut restored)?;
    let original = env.height_mapper().and_then(|m| m.texture());
    let copy = restored.height_mapper().and_then(|m| m.texture());
    println!(
        "restored {} strategy, contents {}",
        Strategy::HeightField,
        if original == copy { "match" } else { "MISMATCH" }
    );
    Ok(())
}
