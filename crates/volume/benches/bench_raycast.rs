use std::hint::black_box;
use std::time::Instant;

use envmap_common::{DepthCamera, Plane, Pose, Ray, SyntheticScene};
use envmap_compute::CpuBackend;
use envmap_volume::{TsdfMapper, VolumeConfig};
use glam::Vec3;

fn mapped_wall(dims: u32) -> TsdfMapper<CpuBackend> {
    let mut mapper = TsdfMapper::new(CpuBackend::new());
    mapper
        .configure(VolumeConfig {
            chunk_size: 16,
            max_eye_distance: 5.0,
            dims: [dims, dims, dims],
            ..Default::default()
        })
        .unwrap();
    let frame = SyntheticScene::new()
        .with_plane(Plane::new(Vec3::Z, Vec3::new(0.0, 0.0, -2.3)))
        .render(&DepthCamera::default(), Pose::default())
        .unwrap();
    mapper.scan_visible(&frame).unwrap();
    mapper
}

fn bench_scan(dims: u32) {
    let start = Instant::now();
    let mapper = mapped_wall(dims);
    println!(
        "  scan ({dims}^3 voxels): {:?}, {} chunks dispatched",
        start.elapsed(),
        mapper.stats().chunks_dispatched
    );
}

fn bench_raycast(dims: u32, iterations: usize) {
    let mut mapper = mapped_wall(dims);
    let start = Instant::now();
    let mut hits = 0;
    for i in 0..iterations {
        let angle = (i % 32) as f32 * 0.01 - 0.16;
        let ray = Ray::new(Vec3::ZERO, Vec3::new(angle, 0.0, -1.0));
        if black_box(mapper.raycast(ray, 5.0).unwrap()).is_some() {
            hits += 1;
        }
    }
    let per_iter = start.elapsed() / iterations as u32;
    println!("  raycast ({dims}^3 voxels, {iterations} rays): {per_iter:?}/ray, {hits} hits");
}

fn main() {
    println!("=== Volume Benchmarks ===\n");

    println!("Scan:");
    bench_scan(64);
    bench_scan(128);

    println!("\nRaycast:");
    bench_raycast(64, 10_000);
    bench_raycast(128, 10_000);

    println!("\n=== Done ===");
}
