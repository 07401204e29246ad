use std::collections::VecDeque;
use std::time::Instant;

use envmap_common::{DepthFrame, Ray};
use envmap_compute::{
    ComputeBackend, RaycastResult, RaycastUniforms, ScanUniforms, VolumeKernel, VolumeKernels,
    Voxel, VoxelTexture,
};
use envmap_stream::{ChunkCoord, ChunkGrid, DispatchBudget, ScanStats};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::VolumeConfig;
use crate::error::VolumeError;
use crate::mesh::{extract_mesh, SurfaceMesh};

/// Fixed-point scale of raycast distances (millimetres).
pub const RAYCAST_SCALE: f32 = 1000.0;

/// A surface crossing found by [`TsdfMapper::raycast`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RaycastHit {
    pub point: Vec3,
    pub distance: f32,
}

/// What one [`TsdfMapper::update`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Chunks scanned this update, in dispatch order.
    pub dispatched: Vec<ChunkCoord>,
    /// Chunks still queued in the current sweep.
    pub pending: usize,
    pub sweep_completed: bool,
    pub stats: ScanStats,
}

struct Configured {
    config: VolumeConfig,
    kernels: VolumeKernels,
    grid: ChunkGrid,
    volume: VoxelTexture,
    budget: DispatchBudget,
    pending: Option<VecDeque<ChunkCoord>>,
    totals: ScanStats,
}

/// Integrates depth frames into a chunked truncated signed distance volume.
///
/// Scanning runs as paced sweeps: each sweep queues the chunks inside the
/// camera frustum and dispatches them as the [`DispatchBudget`] allows, one
/// [`TsdfMapper::update`] call per host frame.
pub struct TsdfMapper<B> {
    backend: B,
    state: Option<Configured>,
    enabled: bool,
}

impl<B: ComputeBackend> TsdfMapper<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: None,
            enabled: true,
        }
    }

    /// Validate `config`, allocate the volume, bind kernels and clear it.
    pub fn configure(&mut self, config: VolumeConfig) -> Result<(), VolumeError> {
        config.validate()?;
        let grid = ChunkGrid::new(config.space(), config.chunk_size)?;
        let kernels = VolumeKernels {
            clear: self.backend.bind(VolumeKernel::Clear.into())?,
            scan: self.backend.bind(VolumeKernel::Scan.into())?,
            raycast: self.backend.bind(VolumeKernel::Raycast.into())?,
        };
        tracing::info!(
            dims = ?config.dims,
            meters_per_voxel = config.meters_per_voxel,
            chunks = grid.chunk_count(),
            "volume mapper configured"
        );
        self.state = Some(Configured {
            volume: VoxelTexture::new(config.dims()),
            budget: DispatchBudget::new(config.budget),
            config,
            kernels,
            grid,
            pending: None,
            totals: ScanStats::default(),
        });
        self.clear_volume()
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> Option<&VolumeConfig> {
        self.state.as_ref().map(|s| &s.config)
    }

    pub fn volume(&self) -> Option<&VoxelTexture> {
        self.state.as_ref().map(|s| &s.volume)
    }

    pub fn grid(&self) -> Option<&ChunkGrid> {
        self.state.as_ref().map(|s| &s.grid)
    }

    /// Counters summed over every update since configure.
    pub fn stats(&self) -> ScanStats {
        self.state.as_ref().map(|s| s.totals).unwrap_or_default()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pause or resume scanning. Disabling drops the pending sweep; resuming
    /// refills the dispatch budget.
    pub fn set_enabled(&mut self, enabled: bool) {
        if let Some(state) = self.state.as_mut() {
            if !enabled {
                if let Some(pending) = state.pending.take() {
                    tracing::debug!(dropped = pending.len(), "scan sweep cancelled");
                }
            } else if !self.enabled {
                state.budget.reset();
            }
        }
        self.enabled = enabled;
    }

    /// Chunks still queued in the current sweep.
    pub fn pending_chunks(&self) -> usize {
        self.state
            .as_ref()
            .and_then(|s| s.pending.as_ref())
            .map_or(0, VecDeque::len)
    }

    /// Zero every voxel. Calling it again changes nothing.
    pub fn clear_volume(&mut self) -> Result<(), VolumeError> {
        let state = self.state.as_mut().ok_or(VolumeError::NotConfigured)?;
        self.backend
            .clear_volume(&state.kernels.clear, &mut state.volume)?;
        tracing::info!("volume cleared");
        Ok(())
    }

    /// Advance scanning by one host frame.
    ///
    /// Starts a sweep when none is pending and `frame` is present, then
    /// dispatches queued chunks while the budget grants tokens at `now`.
    /// Without a frame queued chunks wait.
    ///
    /// Queued chunks are tested again against `frame`'s frustum before
    /// dispatch. Chunks the camera has turned away from are dropped from the
    /// sweep without spending a token and counted as culled.
    pub fn update(
        &mut self,
        frame: Option<&DepthFrame>,
        now: Instant,
    ) -> Result<ScanReport, VolumeError> {
        let state = self.state.as_mut().ok_or(VolumeError::NotConfigured)?;
        let mut report = ScanReport::default();
        if !self.enabled {
            return Ok(report);
        }
        let Some(frame) = frame else {
            report.pending = state.pending.as_ref().map_or(0, VecDeque::len);
            tracing::trace!(pending = report.pending, "no depth frame, scan waits");
            return Ok(report);
        };

        let _span = tracing::info_span!("scan_sweep").entered();
        let frustum = frame.frustum(state.config.max_eye_distance);
        if state.pending.is_none() {
            let visible = state.grid.visible_chunks(&frustum);
            report.stats.sweeps_started = 1;
            report.stats.chunks_culled = state.grid.chunk_count() - visible.len();
            tracing::debug!(
                visible = visible.len(),
                culled = report.stats.chunks_culled,
                "scan sweep started"
            );
            state.pending = Some(visible.into());
        }

        if let Some(pending) = state.pending.as_mut() {
            while let Some(&chunk) = pending.front() {
                if !frustum.intersects_aabb(&state.grid.chunk_bounds(chunk)) {
                    pending.pop_front();
                    report.stats.chunks_culled += 1;
                    continue;
                }
                if !state.budget.try_acquire(now) {
                    break;
                }
                pending.pop_front();
                scan(&mut self.backend, &state.kernels, &state.grid, &state.config, frame, &mut state.volume, chunk)?;
                report.dispatched.push(chunk);
            }
            report.pending = pending.len();
        }
        if report.pending == 0 {
            state.pending = None;
            report.sweep_completed = true;
            report.stats.sweeps_completed = 1;
            tracing::debug!("scan sweep completed");
        }

        report.stats.chunks_dispatched = report.dispatched.len();
        state.totals.accumulate(&report.stats);
        Ok(report)
    }

    /// Scan every chunk visible from `frame` now, ignoring the budget.
    ///
    /// Leaves any paced sweep untouched.
    pub fn scan_visible(&mut self, frame: &DepthFrame) -> Result<Vec<ChunkCoord>, VolumeError> {
        let state = self.state.as_mut().ok_or(VolumeError::NotConfigured)?;
        let _span = tracing::info_span!("scan_visible").entered();
        let visible = state
            .grid
            .visible_chunks(&frame.frustum(state.config.max_eye_distance));
        for chunk in &visible {
            scan(&mut self.backend, &state.kernels, &state.grid, &state.config, frame, &mut state.volume, *chunk)?;
        }
        state.totals.accumulate(&ScanStats {
            chunks_dispatched: visible.len(),
            chunks_culled: state.grid.chunk_count() - visible.len(),
            sweeps_started: 1,
            sweeps_completed: 1,
        });
        Ok(visible)
    }

    /// First surface crossing along `ray` within `max_distance`.
    ///
    /// The march is clipped to the volume bounds, so an infinite `max_distance`
    /// stops at the far face. A ray that misses the volume, a non-positive or
    /// NaN `max_distance` and a zero direction all miss without touching the
    /// backend.
    pub fn raycast(&mut self, ray: Ray, max_distance: f32) -> Result<Option<RaycastHit>, VolumeError> {
        let state = self.state.as_ref().ok_or(VolumeError::NotConfigured)?;
        if !(max_distance > 0.0) || ray.direction == Vec3::ZERO {
            return Ok(None);
        }
        let Some((enter, exit)) = state.config.space().bounds().ray_interval(&ray) else {
            tracing::trace!("raycast misses volume");
            return Ok(None);
        };
        if enter >= max_distance {
            return Ok(None);
        }

        let mpv = state.config.meters_per_voxel;
        // One step past the exit face so the last voxel pair is still compared.
        let reach = max_distance.min(exit + mpv);
        let initial = (reach * RAYCAST_SCALE).floor() as u32;
        let uniforms = RaycastUniforms {
            origin: ray.origin.extend(1.0).to_array(),
            direction: ray.direction.extend(0.0).to_array(),
            meters_per_voxel: mpv,
            int_scale: RAYCAST_SCALE,
            steps: (reach / mpv).ceil() as u32,
            first_step: ((enter / mpv).floor() as u32).saturating_sub(1),
        };
        let result = RaycastResult::new(initial);
        self.backend
            .raycast(&state.kernels.raycast, &uniforms, &state.volume, &result)?;
        let fixed = self.backend.read_back(&result)?;

        if fixed >= initial {
            return Ok(None);
        }
        let distance = fixed as f32 / RAYCAST_SCALE;
        if distance >= max_distance {
            return Ok(None);
        }
        tracing::trace!(distance, "raycast hit");
        Ok(Some(RaycastHit {
            point: ray.point_at(distance),
            distance,
        }))
    }

    /// Triangulate the current surface. `None` before configure.
    pub fn mesh(&self) -> Option<SurfaceMesh> {
        let state = self.state.as_ref()?;
        Some(extract_mesh(&state.volume, &state.config.space()))
    }

    /// Voxel nearest to `world`, if inside the volume.
    pub fn voxel_at(&self, world: Vec3) -> Option<Voxel> {
        let state = self.state.as_ref()?;
        let index = state.config.space().world_to_voxel(world);
        state.volume.get(index).copied()
    }

    /// Replace the volume contents, e.g. from a stored snapshot.
    pub fn restore(&mut self, volume: VoxelTexture) -> Result<(), VolumeError> {
        let state = self.state.as_mut().ok_or(VolumeError::NotConfigured)?;
        if volume.dims() != state.config.dims() {
            return Err(VolumeError::DimensionMismatch {
                expected: state.config.dims,
                actual: volume.dims().to_array(),
            });
        }
        state.volume = volume;
        Ok(())
    }
}

fn scan<B: ComputeBackend>(
    backend: &mut B,
    kernels: &VolumeKernels,
    grid: &ChunkGrid,
    config: &VolumeConfig,
    frame: &DepthFrame,
    volume: &mut VoxelTexture,
    chunk: ChunkCoord,
) -> Result<(), VolumeError> {
    let offset = grid.voxel_offset(chunk);
    let uniforms = ScanUniforms {
        index_offset: [offset.x, offset.y, offset.z, grid.chunk_size()],
        meters_per_voxel: config.meters_per_voxel,
        max_eye_distance: config.max_eye_distance,
        truncation: config.truncation,
        max_weight: config.max_weight,
    };
    backend.scan_chunk(&kernels.scan, &uniforms, frame, volume)?;
    tracing::debug!(?chunk, "chunk scanned");
    Ok(())
}
