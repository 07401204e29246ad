use envmap_common::DepthFrame;
use envmap_compute::{
    ComputeBackend, HeightKernel, HeightKernels, HeightTexture, PerFrameHeight,
};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::HeightMapConfig;
use crate::error::HeightMapError;
use crate::updates::PerFrameUpdates;

/// Result of one [`HeightMapper::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No depth frame was available; the map is unchanged.
    Skipped,
    /// The frame was integrated. Carries the cells it wrote.
    Applied(PerFrameUpdates),
}

impl TickOutcome {
    pub fn updates(&self) -> Option<&PerFrameUpdates> {
        match self {
            TickOutcome::Skipped => None,
            TickOutcome::Applied(updates) => Some(updates),
        }
    }
}

/// Height-map value at a world position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightSample {
    pub height: f32,
    pub confidence: f32,
}

impl HeightSample {
    pub fn is_observed(&self) -> bool {
        self.confidence > 0.0
    }
}

struct Configured {
    config: HeightMapConfig,
    kernels: HeightKernels,
    map: HeightTexture,
    scratch: PerFrameHeight,
}

/// Builds a 2.5D height map of the surroundings from depth frames.
///
/// Owns its compute backend and the GPU-resident map. Everything except
/// [`HeightMapper::sample`] fails with [`HeightMapError::NotConfigured`] until
/// [`HeightMapper::configure`] succeeds.
pub struct HeightMapper<B> {
    backend: B,
    state: Option<Configured>,
}

impl<B: ComputeBackend> HeightMapper<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: None,
        }
    }

    /// Validate `config`, allocate the map and run the Init kernel.
    ///
    /// Reconfiguring discards the current map.
    pub fn configure(&mut self, config: HeightMapConfig) -> Result<(), HeightMapError> {
        config.validate()?;
        let kernels = HeightKernels {
            init: self.backend.bind(HeightKernel::Init.into())?,
            accumulate: self.backend.bind(HeightKernel::Accumulate.into())?,
            apply: self.backend.bind(HeightKernel::Apply.into())?,
        };
        let mut map = HeightTexture::new(config.texture_size);
        let mut scratch = PerFrameHeight::new(config.cell_count());
        self.backend.init_height(&kernels.init, &mut map, &mut scratch)?;
        tracing::info!(
            texture_size = config.texture_size,
            env_size = config.env_size,
            depth_samples = config.depth_samples,
            "height mapper configured"
        );
        self.state = Some(Configured {
            config,
            kernels,
            map,
            scratch,
        });
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> Option<&HeightMapConfig> {
        self.state.as_ref().map(|s| &s.config)
    }

    pub fn texture(&self) -> Option<&HeightTexture> {
        self.state.as_ref().map(|s| &s.map)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Integrate one frame. `None` means depth is unavailable this frame.
    pub fn tick(&mut self, frame: Option<&DepthFrame>) -> Result<TickOutcome, HeightMapError> {
        let state = self.state.as_mut().ok_or(HeightMapError::NotConfigured)?;
        let Some(frame) = frame else {
            tracing::trace!("no depth frame, height tick skipped");
            return Ok(TickOutcome::Skipped);
        };
        let _span = tracing::debug_span!("height_tick").entered();

        let camera = frame.pose().position;
        let uniforms = state.config.uniforms(camera);
        self.backend.accumulate_height(
            &state.kernels.accumulate,
            &uniforms,
            frame,
            &state.map,
            &mut state.scratch,
        )?;
        let updates = PerFrameUpdates::from_scratch(state.config.texture_size, camera.y, &state.scratch);
        self.backend
            .apply_height(&state.kernels.apply, &uniforms, &mut state.map, &mut state.scratch)?;

        tracing::debug!(cells = updates.len(), "height frame applied");
        Ok(TickOutcome::Applied(updates))
    }

    /// Replay cells written by another peer's frame.
    ///
    /// The whole batch is validated before anything is dispatched.
    pub fn apply_updates(&mut self, updates: &PerFrameUpdates) -> Result<(), HeightMapError> {
        let state = self.state.as_mut().ok_or(HeightMapError::NotConfigured)?;
        if updates.texture_size != state.config.texture_size {
            return Err(HeightMapError::TextureSizeMismatch {
                expected: state.config.texture_size,
                actual: updates.texture_size,
            });
        }
        if !updates.reference_height.is_finite() {
            return Err(HeightMapError::InvalidReference(updates.reference_height));
        }
        let len = state.scratch.len();
        for cell in &updates.cells {
            if cell.index as usize >= len {
                return Err(HeightMapError::CellOutOfRange {
                    index: cell.index,
                    len,
                });
            }
            if !cell.is_valid_value() {
                return Err(HeightMapError::InvalidValue {
                    index: cell.index,
                    value: cell.value,
                });
            }
        }

        for cell in &updates.cells {
            state.scratch.write_max(cell.index as usize, i32::from(cell.value));
        }
        let uniforms = state.config.uniforms(Vec3::new(0.0, updates.reference_height, 0.0));
        self.backend
            .apply_height(&state.kernels.apply, &uniforms, &mut state.map, &mut state.scratch)?;
        tracing::debug!(cells = updates.len(), "remote height updates applied");
        Ok(())
    }

    /// Zero every cell. Calling it again changes nothing.
    pub fn clear_map(&mut self) -> Result<(), HeightMapError> {
        let state = self.state.as_mut().ok_or(HeightMapError::NotConfigured)?;
        self.backend
            .init_height(&state.kernels.init, &mut state.map, &mut state.scratch)?;
        tracing::info!("height map cleared");
        Ok(())
    }

    /// Replace the map contents, e.g. from a stored snapshot.
    pub fn restore(&mut self, texture: HeightTexture) -> Result<(), HeightMapError> {
        let state = self.state.as_mut().ok_or(HeightMapError::NotConfigured)?;
        if texture.size() != state.config.texture_size {
            return Err(HeightMapError::TextureSizeMismatch {
                expected: state.config.texture_size,
                actual: texture.size(),
            });
        }
        state.map = texture;
        state.scratch.reset();
        Ok(())
    }

    /// Map value at world `xz`. `None` outside the mapped square or before configure.
    pub fn sample(&self, world_xz: Vec2) -> Option<HeightSample> {
        let state = self.state.as_ref()?;
        let index = state.map.cell_index(world_xz, state.config.env_size)?;
        let cell = state.map.cells().get(index)?;
        Some(HeightSample {
            height: cell.height,
            confidence: cell.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envmap_common::{DepthCamera, Plane, Pose, SyntheticScene};
    use envmap_compute::{CpuBackend, RecordingBackend};

    fn small_config() -> HeightMapConfig {
        HeightMapConfig {
            texture_size: 64,
            env_size: 10.0,
            depth_samples: 32,
            ..Default::default()
        }
    }

    fn mapper() -> HeightMapper<RecordingBackend<CpuBackend>> {
        let mut mapper = HeightMapper::new(RecordingBackend::new(CpuBackend::new()));
        mapper.configure(small_config()).unwrap();
        mapper
    }

    fn floor_frame(floor_y: f32) -> DepthFrame {
        let pose = Pose::looking_at(Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, -1.0, -2.0));
        SyntheticScene::new()
            .with_plane(Plane::floor(floor_y))
            .render(&DepthCamera::default(), pose)
            .unwrap()
    }

    #[test]
    fn unconfigured_mapper_refuses_work() {
        let mut mapper = HeightMapper::new(CpuBackend::new());
        assert!(matches!(mapper.tick(None), Err(HeightMapError::NotConfigured)));
        assert!(matches!(mapper.clear_map(), Err(HeightMapError::NotConfigured)));
        assert!(matches!(
            mapper.apply_updates(&PerFrameUpdates::new(64, 0.0)),
            Err(HeightMapError::NotConfigured)
        ));
        assert!(mapper.sample(Vec2::ZERO).is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut mapper = HeightMapper::new(CpuBackend::new());
        let config = HeightMapConfig {
            lerp_height: 0.0,
            ..small_config()
        };
        assert!(matches!(mapper.configure(config), Err(HeightMapError::Config(_))));
        assert!(!mapper.is_configured());
    }

    #[test]
    fn configure_runs_init_once() {
        let mapper = mapper();
        assert_eq!(mapper.backend().count(HeightKernel::Init), 1);
        assert_eq!(mapper.backend().records().len(), 1);
        assert!(mapper.texture().unwrap().is_zeroed());
    }

    #[test]
    fn missing_frame_skips_without_dispatch() {
        let mut mapper = mapper();
        mapper.tick(Some(&floor_frame(-1.0))).unwrap();
        let before = mapper.texture().unwrap().clone();
        let dispatches = mapper.backend().records().len();

        assert_eq!(mapper.tick(None).unwrap(), TickOutcome::Skipped);
        assert_eq!(mapper.texture().unwrap(), &before);
        assert_eq!(mapper.backend().records().len(), dispatches);
    }

    #[test]
    fn tick_dispatches_accumulate_then_apply() {
        let mut mapper = mapper();
        mapper.tick(Some(&floor_frame(-1.0))).unwrap();
        let kernels: Vec<_> = mapper.backend().records()[1..].iter().map(|r| r.kernel).collect();
        assert_eq!(
            kernels,
            vec![HeightKernel::Accumulate.into(), HeightKernel::Apply.into()]
        );
        let accumulate = &mapper.backend().records()[1];
        assert_eq!(accumulate.groups.x, 4);
        assert_eq!(accumulate.groups.y, 4);
    }

    #[test]
    fn constant_height_converges_monotonically() {
        let mut mapper = mapper();
        let frame = floor_frame(-1.0);
        let lerp = small_config().lerp_height;

        let TickOutcome::Applied(first) = mapper.tick(Some(&frame)).unwrap() else {
            panic!("frame skipped");
        };
        assert!(!first.is_empty());
        let mut previous: Vec<f32> = first
            .cells
            .iter()
            .map(|c| mapper.texture().unwrap().cells()[c.index as usize].height)
            .collect();

        for k in 2..=20 {
            mapper.tick(Some(&frame)).unwrap();
            let map = mapper.texture().unwrap();
            for (cell, prev) in first.cells.iter().zip(previous.iter_mut()) {
                let target = first.height_of(cell);
                let height = map.cells()[cell.index as usize].height;
                assert!(height <= *prev + 1e-6, "cell {} rose", cell.index);
                assert!(height >= target - 1e-4, "cell {} overshot", cell.index);
                let expected = target * (1.0 - (1.0 - lerp).powi(k));
                assert!((height - expected).abs() < 1e-3);
                *prev = height;
            }
        }
        let sample = mapper.sample(Vec2::new(0.0, -1.0)).unwrap();
        assert!(sample.is_observed());
        assert!((sample.height + 1.0).abs() < 0.05);
    }

    #[test]
    fn floors_far_above_the_origin_keep_their_height() {
        let mut mapper = HeightMapper::new(CpuBackend::new());
        mapper
            .configure(HeightMapConfig {
                lerp_height: 1.0,
                ..small_config()
            })
            .unwrap();
        let pose = Pose::looking_at(Vec3::new(0.0, 40.0, 0.0), Vec3::new(0.0, 38.5, -2.0));
        let frame = SyntheticScene::new()
            .with_plane(Plane::floor(38.5))
            .render(&DepthCamera::default(), pose)
            .unwrap();

        let TickOutcome::Applied(updates) = mapper.tick(Some(&frame)).unwrap() else {
            panic!("frame skipped");
        };
        assert!(!updates.is_empty());
        assert_eq!(updates.reference_height, 40.0);
        let map = mapper.texture().unwrap();
        for cell in &updates.cells {
            let height = map.cells()[cell.index as usize].height;
            assert!((height - 38.5).abs() < 2e-3, "cell {} stored {height}", cell.index);
        }

        let mut remote = HeightMapper::new(CpuBackend::new());
        remote
            .configure(HeightMapConfig {
                lerp_height: 1.0,
                ..small_config()
            })
            .unwrap();
        remote.apply_updates(&updates).unwrap();
        assert_eq!(remote.texture(), mapper.texture());
    }

    #[test]
    fn clearing_twice_equals_clearing_once() {
        let mut mapper = mapper();
        mapper.tick(Some(&floor_frame(-1.0))).unwrap();
        assert!(!mapper.texture().unwrap().is_zeroed());

        mapper.clear_map().unwrap();
        let once = mapper.texture().unwrap().clone();
        mapper.clear_map().unwrap();
        assert_eq!(mapper.texture().unwrap(), &once);
        assert!(once.is_zeroed());
    }

    #[test]
    fn remote_updates_reproduce_local_map() {
        let mut local = mapper();
        let mut remote = HeightMapper::new(CpuBackend::new());
        remote.configure(small_config()).unwrap();

        for floor in [-1.0, -1.2, -0.9] {
            let outcome = local.tick(Some(&floor_frame(floor))).unwrap();
            remote.apply_updates(outcome.updates().unwrap()).unwrap();
        }
        assert_eq!(local.texture(), remote.texture());
    }

    #[test]
    fn bad_updates_are_rejected_before_dispatch() {
        let mut mapper = mapper();
        let dispatches = mapper.backend().records().len();

        let mut out_of_range = PerFrameUpdates::new(64, 0.0);
        out_of_range.push(0, 100);
        out_of_range.push(64 * 64, 100);
        assert!(matches!(
            mapper.apply_updates(&out_of_range),
            Err(HeightMapError::CellOutOfRange { index: 4096, .. })
        ));

        let mut sentinel = PerFrameUpdates::new(64, 0.0);
        sentinel.push(3, -32000);
        assert!(matches!(
            mapper.apply_updates(&sentinel),
            Err(HeightMapError::InvalidValue { index: 3, .. })
        ));

        assert!(matches!(
            mapper.apply_updates(&PerFrameUpdates::new(32, 0.0)),
            Err(HeightMapError::TextureSizeMismatch { expected: 64, actual: 32 })
        ));

        let mut unanchored = PerFrameUpdates::new(64, f32::NAN);
        unanchored.push(3, 100);
        assert!(matches!(
            mapper.apply_updates(&unanchored),
            Err(HeightMapError::InvalidReference(_))
        ));

        assert_eq!(mapper.backend().records().len(), dispatches);
        assert!(mapper.texture().unwrap().is_zeroed());
    }

    #[test]
    fn sample_outside_env_square_is_none() {
        let mapper = mapper();
        assert!(mapper.sample(Vec2::new(5.5, 0.0)).is_none());
        let inside = mapper.sample(Vec2::new(4.9, -4.9)).unwrap();
        assert!(!inside.is_observed());
    }

    #[test]
    fn restore_checks_size() {
        let mut mapper = mapper();
        assert!(matches!(
            mapper.restore(HeightTexture::new(8)),
            Err(HeightMapError::TextureSizeMismatch { expected: 64, actual: 8 })
        ));
        let mut texture = HeightTexture::new(64);
        texture.cells_mut()[5].confidence = 1.0;
        mapper.restore(texture.clone()).unwrap();
        assert_eq!(mapper.texture(), Some(&texture));
    }
}
