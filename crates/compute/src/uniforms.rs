use bytemuck::{Pod, Zeroable};

/// Parameters shared by the Accumulate and Apply height kernels.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct HeightUniforms {
    pub tex_size: u32,
    pub depth_samples: u32,
    pub env_size: f32,
    pub lerp_height: f32,
    pub depth_range: [f32; 2],
    pub height_range: [f32; 2],
    pub frame_crop: f32,
    pub edge_filter_size: f32,
    pub gradient_cutoff: f32,
    pub _pad: f32,
    /// Camera position at capture time, `w` unused.
    pub depth_frame_pos: [f32; 4],
}

/// Parameters of one chunk scan.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ScanUniforms {
    /// First voxel of the chunk in `xyz`, chunk edge length in `w`.
    pub index_offset: [u32; 4],
    pub meters_per_voxel: f32,
    pub max_eye_distance: f32,
    pub truncation: f32,
    pub max_weight: f32,
}

/// Parameters of one raycast.
///
/// Threads march voxel-sized steps `first_step..steps` along the ray.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct RaycastUniforms {
    pub origin: [f32; 4],
    pub direction: [f32; 4],
    pub meters_per_voxel: f32,
    pub int_scale: f32,
    pub steps: u32,
    pub first_step: u32,
}

impl RaycastUniforms {
    /// Steps the dispatch covers, one thread each.
    pub fn thread_count(&self) -> u32 {
        self.steps.saturating_sub(self.first_step)
    }
}
