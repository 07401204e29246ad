//! Surface extraction from a TSDF volume.
//!
//! Cubes are marched over every 2×2×2 block of observed voxels. A cube whose
//! corners change sign gets one vertex, the mean of its edge crossings; each
//! voxel edge that changes sign emits a quad joining the four cubes around it.

use envmap_compute::{Voxel, VoxelSpace, VoxelTexture};
use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Cube corners as offsets from its first voxel. Bottom ring, then top ring.
const CORNERS: [IVec3; 8] = [
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(1, 1, 1),
    IVec3::new(0, 1, 1),
];

/// The twelve cube edges as corner pairs.
const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Edge axis with the two directions spanning the quad around it.
const QUAD_AXES: [(IVec3, IVec3, IVec3); 3] = [
    (IVec3::X, IVec3::Z, IVec3::Y),
    (IVec3::Y, IVec3::X, IVec3::Z),
    (IVec3::Z, IVec3::Y, IVec3::X),
];

/// Indexed triangle mesh in world space.
///
/// Triangles wind counter-clockwise seen from the free-space side of the surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl SurfaceMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Corner positions of every triangle.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            Some([
                *self.vertices.get(tri[0] as usize)?,
                *self.vertices.get(tri[1] as usize)?,
                *self.vertices.get(tri[2] as usize)?,
            ])
        })
    }
}

/// Extract the zero crossing of `volume` as a triangle mesh.
///
/// Cubes touching an unobserved voxel are skipped, so holes stay open rather
/// than closing against the zero-initialised distance.
pub fn extract_mesh(volume: &VoxelTexture, space: &VoxelSpace) -> SurfaceMesh {
    let dims = volume.dims().as_ivec3();
    if dims.cmplt(IVec3::splat(2)).any() {
        return SurfaceMesh::default();
    }

    let mut mesh = SurfaceMesh::default();
    let mut cube_vertex: Vec<Option<u32>> = vec![None; volume.voxels().len()];
    let mut cubes = Vec::new();
    for z in 0..dims.z - 1 {
        for y in 0..dims.y - 1 {
            for x in 0..dims.x - 1 {
                let at = IVec3::new(x, y, z);
                let Some(vertex) = cube_vertex_position(volume, space, at) else {
                    continue;
                };
                if let Some(slot) = volume.index(at).and_then(|i| cube_vertex.get_mut(i)) {
                    *slot = Some(mesh.vertices.len() as u32);
                    mesh.vertices.push(vertex);
                    cubes.push(at);
                }
            }
        }
    }

    let vertex_of = |at: IVec3| volume.index(at).and_then(|i| cube_vertex[i]);
    for at in cubes {
        if at.cmpeq(IVec3::ZERO).any() {
            continue;
        }
        let Some(inside) = volume.get(at).map(|v| v.sdf < 0.0) else {
            continue;
        };
        for (axis, d1, d2) in QUAD_AXES {
            let Some(next) = volume.get(at + axis).filter(|v| v.is_observed()) else {
                continue;
            };
            if inside == (next.sdf < 0.0) {
                continue;
            }
            let quad = (
                vertex_of(at),
                vertex_of(at - d1),
                vertex_of(at - d1 - d2),
                vertex_of(at - d2),
            );
            let (Some(a), Some(b), Some(c), Some(d)) = quad else {
                continue;
            };
            if inside {
                mesh.indices.extend_from_slice(&[c, b, a, d, c, a]);
            } else {
                mesh.indices.extend_from_slice(&[a, c, d, a, b, c]);
            }
        }
    }

    tracing::debug!(
        vertices = mesh.vertices.len(),
        triangles = mesh.triangle_count(),
        "surface mesh extracted"
    );
    mesh
}

/// Mean edge crossing of the cube starting at `at`, if its corners change sign.
fn cube_vertex_position(volume: &VoxelTexture, space: &VoxelSpace, at: IVec3) -> Option<Vec3> {
    let mut corners = [Voxel::default(); 8];
    for (corner, offset) in corners.iter_mut().zip(CORNERS) {
        *corner = volume.get(at + offset).copied().filter(Voxel::is_observed)?;
    }

    let mut sum = Vec3::ZERO;
    let mut crossings = 0u32;
    for (a, b) in EDGES {
        let (va, vb) = (corners[a].sdf, corners[b].sdf);
        if (va < 0.0) == (vb < 0.0) {
            continue;
        }
        let pa = space.voxel_to_world((at + CORNERS[a]).as_uvec3());
        let pb = space.voxel_to_world((at + CORNERS[b]).as_uvec3());
        let t = va / (va - vb);
        sum += pa + (pb - pa) * t;
        crossings += 1;
    }
    (crossings > 0).then(|| sum / crossings as f32)
}
