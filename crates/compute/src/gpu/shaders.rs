//! WGSL sources of the mapper kernels. Every kernel's entry point is `main`.

use crate::kernel::{HeightKernel, KernelId, VolumeKernel};

/// Depth frame bindings and helpers shared by Accumulate and Scan.
const FRAME: &str = r#"
struct Frame {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_view: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    size: vec4<u32>,
};

@group(0) @binding(1)
var<uniform> frame: Frame;

@group(0) @binding(2)
var<storage, read> depth_buffer: array<f32>;

const NO_DEPTH: f32 = -1.0;

fn in_unit(uv: vec2<f32>) -> bool {
    return all(uv >= vec2<f32>(0.0)) && all(uv <= vec2<f32>(1.0));
}

fn texel_of(uv: vec2<f32>) -> vec2<u32> {
    let size = frame.size.xy;
    return min(vec2<u32>(uv * vec2<f32>(size)), size - vec2<u32>(1u));
}

fn texel_center(texel: vec2<u32>) -> vec2<f32> {
    return (vec2<f32>(texel) + vec2<f32>(0.5)) / vec2<f32>(frame.size.xy);
}

fn depth_at(texel: vec2<u32>) -> f32 {
    let d = depth_buffer[texel.y * frame.size.x + texel.x];
    if (d > 0.0 && d < 1.0e30) {
        return d;
    }
    return NO_DEPTH;
}

fn sample_depth(uv: vec2<f32>) -> f32 {
    if (!in_unit(uv)) {
        return NO_DEPTH;
    }
    return depth_at(texel_of(uv));
}

fn unproject(uv: vec2<f32>, d: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv * 2.0 - vec2<f32>(1.0), 0.0, 1.0);
    let near_h = frame.inverse_projection * ndc;
    let near_point = near_h.xyz / near_h.w;
    let ray = near_point / -near_point.z;
    return (frame.inverse_view * vec4<f32>(ray * d, 1.0)).xyz;
}
"#;

const HEIGHT_PARAMS: &str = r#"
struct HeightParams {
    tex_size: u32,
    depth_samples: u32,
    env_size: f32,
    lerp_height: f32,
    depth_range: vec2<f32>,
    height_range: vec2<f32>,
    frame_crop: f32,
    edge_filter_size: f32,
    gradient_cutoff: f32,
    pad: f32,
    depth_frame_pos: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> params: HeightParams;

const UNWRITTEN: i32 = -32000;
"#;

const VOLUME_TYPES: &str = r#"
struct Extent {
    size: vec4<u32>,
};

struct Voxel {
    sdf: f32,
    weight: f32,
};
"#;

const INIT: &str = r#"
struct Extent {
    size: vec4<u32>,
};

struct Cell {
    height: f32,
    confidence: f32,
};

@group(0) @binding(0)
var<uniform> extent: Extent;

@group(0) @binding(1)
var<storage, read_write> cells: array<Cell>;

@group(0) @binding(2)
var<storage, read_write> scratch: array<i32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= extent.size.x || id.y >= extent.size.y) {
        return;
    }
    let idx = id.y * extent.size.x + id.x;
    cells[idx] = Cell(0.0, 0.0);
    scratch[idx] = -32000;
}
"#;

const ACCUMULATE: &str = r#"
@group(0) @binding(3)
var<storage, read_write> scratch: array<atomic<i32>>;

struct Surface {
    point: vec3<f32>,
    d: f32,
    valid: bool,
};

fn surface_point(uv: vec2<f32>) -> Surface {
    var s: Surface;
    s.valid = false;
    if (!in_unit(uv)) {
        return s;
    }
    let texel = texel_of(uv);
    let d = depth_at(texel);
    if (d == NO_DEPTH) {
        return s;
    }
    s.point = unproject(texel_center(texel), d);
    s.d = d;
    s.valid = true;
    return s;
}

fn on_edge(uv: vec2<f32>, height: f32) -> bool {
    let e = params.edge_filter_size;
    if (e <= 0.0) {
        return false;
    }
    var offsets = array<vec2<f32>, 4>(
        vec2<f32>(e, 0.0),
        vec2<f32>(-e, 0.0),
        vec2<f32>(0.0, e),
        vec2<f32>(0.0, -e),
    );
    for (var k = 0u; k < 4u; k++) {
        let neighbour = surface_point(uv + offsets[k]);
        if (neighbour.valid && abs(neighbour.point.y - height) > params.gradient_cutoff) {
            return true;
        }
    }
    return false;
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let n = params.depth_samples;
    if (id.x >= n || id.y >= n) {
        return;
    }
    let crop = params.frame_crop;
    let span = 1.0 - 2.0 * crop;
    let uv = vec2<f32>(crop) + (vec2<f32>(id.xy) + vec2<f32>(0.5)) / f32(n) * span;

    let s = surface_point(uv);
    if (!s.valid || s.d < params.depth_range.x || s.d > params.depth_range.y) {
        return;
    }
    let camera_y = params.depth_frame_pos.y;
    let rel_height = s.point.y - camera_y;
    if (rel_height < params.height_range.x || rel_height > params.height_range.y) {
        return;
    }
    if (on_edge(uv, s.point.y)) {
        return;
    }
    let mm = round(rel_height * 1000.0);
    if (mm <= f32(UNWRITTEN) || mm > 32767.0) {
        return;
    }

    let cell_uv = s.point.xz / params.env_size + vec2<f32>(0.5);
    if (any(cell_uv < vec2<f32>(0.0)) || any(cell_uv >= vec2<f32>(1.0))) {
        return;
    }
    let size = params.tex_size;
    let cell = min(vec2<u32>(cell_uv * f32(size)), vec2<u32>(size - 1u));
    atomicMax(&scratch[cell.y * size + cell.x], i32(mm));
}
"#;

const APPLY: &str = r#"
struct Cell {
    height: f32,
    confidence: f32,
};

@group(0) @binding(1)
var<storage, read_write> cells: array<Cell>;

@group(0) @binding(2)
var<storage, read_write> scratch: array<i32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = params.tex_size;
    if (id.x >= size || id.y >= size) {
        return;
    }
    let idx = id.y * size + id.x;
    let stored = scratch[idx];
    if (stored == UNWRITTEN) {
        return;
    }
    let observed = params.depth_frame_pos.y + f32(stored) / 1000.0;
    let t = params.lerp_height;
    var cell = cells[idx];
    cell.height += (observed - cell.height) * t;
    cell.confidence += (1.0 - cell.confidence) * t;
    cells[idx] = cell;
    scratch[idx] = UNWRITTEN;
}
"#;

const CLEAR: &str = r#"
@group(0) @binding(0)
var<uniform> extent: Extent;

@group(0) @binding(1)
var<storage, read_write> voxels: array<Voxel>;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = extent.size.xyz;
    if (any(id >= dims)) {
        return;
    }
    voxels[(id.z * dims.y + id.y) * dims.x + id.x] = Voxel(0.0, 0.0);
}
"#;

const SCAN: &str = r#"
struct ScanParams {
    index_offset: vec4<u32>,
    meters_per_voxel: f32,
    max_eye_distance: f32,
    truncation: f32,
    max_weight: f32,
};

@group(0) @binding(0)
var<uniform> params: ScanParams;

@group(0) @binding(3)
var<uniform> extent: Extent;

@group(0) @binding(4)
var<storage, read_write> voxels: array<Voxel>;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let chunk = params.index_offset.w;
    if (any(id >= vec3<u32>(chunk))) {
        return;
    }
    let voxel_at = params.index_offset.xyz + id;
    let dims = extent.size.xyz;
    if (any(voxel_at >= dims)) {
        return;
    }

    let world = vec3<f32>(vec3<i32>(voxel_at) - vec3<i32>(dims / 2u)) * params.meters_per_voxel;
    let view_point = (frame.view * vec4<f32>(world, 1.0)).xyz;
    let view_depth = -view_point.z;
    if (view_depth <= 0.0) {
        return;
    }
    let clip = frame.projection * vec4<f32>(view_point, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = (ndc.xy + vec2<f32>(1.0)) * 0.5;
    if (length(view_point) > params.max_eye_distance || !in_unit(uv)) {
        return;
    }
    let d = sample_depth(uv);
    if (d == NO_DEPTH) {
        return;
    }
    let sdf = d - view_depth;
    if (sdf < -params.truncation) {
        return;
    }
    let tsdf = clamp(sdf / params.truncation, -1.0, 1.0);

    let slot = (voxel_at.z * dims.y + voxel_at.y) * dims.x + voxel_at.x;
    var voxel = voxels[slot];
    let weight = voxel.weight;
    voxel.sdf = (voxel.sdf * weight + tsdf) / (weight + 1.0);
    voxel.weight = min(weight + 1.0, params.max_weight);
    voxels[slot] = voxel;
}
"#;

const RAYCAST: &str = r#"
struct RayParams {
    origin: vec4<f32>,
    direction: vec4<f32>,
    meters_per_voxel: f32,
    int_scale: f32,
    steps: u32,
    first_step: u32,
};

@group(0) @binding(0)
var<uniform> params: RayParams;

@group(0) @binding(1)
var<uniform> extent: Extent;

@group(0) @binding(2)
var<storage, read> voxels: array<Voxel>;

@group(0) @binding(3)
var<storage, read_write> hit_distance: atomic<u32>;

fn lookup(t: f32) -> Voxel {
    let dims = vec3<i32>(extent.size.xyz);
    let world = params.origin.xyz + params.direction.xyz * t;
    let voxel_at = vec3<i32>(round(world / params.meters_per_voxel)) + dims / 2;
    if (any(voxel_at < vec3<i32>(0)) || any(voxel_at >= dims)) {
        return Voxel(0.0, 0.0);
    }
    let u = vec3<u32>(voxel_at);
    let d = vec3<u32>(dims);
    return voxels[(u.z * d.y + u.y) * d.x + u.x];
}

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let march = params.first_step + id.x;
    if (march >= params.steps) {
        return;
    }
    let mpv = params.meters_per_voxel;
    let t = f32(march) * mpv;
    let a = lookup(t);
    let b = lookup(t + mpv);
    if (a.weight <= 0.0 || b.weight <= 0.0) {
        return;
    }
    if (a.sdf > 0.0 && b.sdf <= 0.0) {
        let crossing = a.sdf / (a.sdf - b.sdf);
        let hit = max(t + crossing * mpv, 0.0);
        atomicMin(&hit_distance, u32(floor(hit * params.int_scale)));
    }
}
"#;

/// Complete WGSL module of `kernel`.
pub(super) fn source(kernel: KernelId) -> String {
    match kernel {
        KernelId::Height(HeightKernel::Init) => INIT.to_owned(),
        KernelId::Height(HeightKernel::Accumulate) => format!("{HEIGHT_PARAMS}{FRAME}{ACCUMULATE}"),
        KernelId::Height(HeightKernel::Apply) => format!("{HEIGHT_PARAMS}{APPLY}"),
        KernelId::Volume(VolumeKernel::Clear) => format!("{VOLUME_TYPES}{CLEAR}"),
        KernelId::Volume(VolumeKernel::Scan) => format!("{VOLUME_TYPES}{FRAME}{SCAN}"),
        KernelId::Volume(VolumeKernel::Raycast) => format!("{VOLUME_TYPES}{RAYCAST}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kernel_declares_main() {
        for kernel in [
            HeightKernel::Init.into(),
            HeightKernel::Accumulate.into(),
            HeightKernel::Apply.into(),
            VolumeKernel::Clear.into(),
            VolumeKernel::Scan.into(),
            VolumeKernel::Raycast.into(),
        ] {
            let source = source(kernel);
            assert_eq!(source.matches("fn main(").count(), 1, "{kernel}");
            assert!(source.contains("@compute"), "{kernel}");
        }
    }
}
