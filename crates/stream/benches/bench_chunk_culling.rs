use std::hint::black_box;
use std::time::{Duration, Instant};

use envmap_common::{Frustum, Pose};
use envmap_compute::VoxelSpace;
use envmap_stream::{BudgetConfig, ChunkGrid, DispatchBudget};
use glam::{Mat4, UVec3, Vec3};

fn frustum_at(yaw: f32, max_distance: f32) -> Frustum {
    let target = Vec3::new(yaw.sin(), 1.2, -yaw.cos());
    let pose = Pose::looking_at(Vec3::new(0.0, 1.6, 0.0), target);
    let projection = Mat4::perspective_rh(70.0_f32.to_radians(), 1.0, 0.1, 50.0);
    Frustum::from_view_projection(projection * pose.view_matrix()).with_far_distance(
        pose.position,
        pose.forward(),
        max_distance,
    )
}

fn bench_visible_chunks(dims: u32, chunk_size: u32, iterations: usize) {
    let grid = match ChunkGrid::new(VoxelSpace::new(UVec3::splat(dims), 0.1), chunk_size) {
        Ok(grid) => grid,
        Err(err) => {
            println!("  skipped {dims}^3 / {chunk_size}: {err}");
            return;
        }
    };

    let start = Instant::now();
    let mut visible = 0;
    for i in 0..iterations {
        let frustum = frustum_at(i as f32 * 0.05, 5.0);
        visible += black_box(grid.visible_chunks(black_box(&frustum))).len();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  cull ({dims}^3 voxels, chunk {chunk_size}, {} chunks, {iterations} iters): {per_iter:?}/iter, avg visible {}",
        grid.chunk_count(),
        visible / iterations
    );
}

fn bench_budget(iterations: usize) {
    let mut budget = DispatchBudget::new(BudgetConfig::default());
    let t0 = Instant::now();
    let start = Instant::now();
    let mut granted = 0;
    for i in 0..iterations {
        let now = t0 + Duration::from_millis(i as u64 * 11);
        if budget.try_acquire(black_box(now)) {
            granted += 1;
        }
    }
    let elapsed = start.elapsed();
    println!("  budget ({iterations} simulated frames at 11ms): {granted} grants, total {elapsed:?}");
}

fn main() {
    println!("=== Chunk Culling Benchmarks ===\n");

    println!("Frustum culling:");
    bench_visible_chunks(64, 8, 1000);
    bench_visible_chunks(128, 8, 200);
    bench_visible_chunks(128, 16, 1000);

    println!("\nDispatch budget:");
    bench_budget(100_000);

    println!("\n=== Done ===");
}
