use std::time::Instant;

use envmap_common::{DepthSource, Ray};
use envmap_compute::ComputeBackend;
use envmap_height::{HeightMapper, HeightSample, TickOutcome};
use envmap_volume::{RaycastHit, ScanReport, TsdfMapper};
use glam::Vec2;

use crate::config::{EnvironmentConfig, Strategy};
use crate::error::EnvironmentError;

/// What one [`Environment::update`] did, per strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Height(TickOutcome),
    Voxel(ScanReport),
}

enum Mapper<B> {
    Height(HeightMapper<B>),
    Voxel(TsdfMapper<B>),
}

/// The environment-mapping service handed to gameplay code.
///
/// Wraps exactly one configured mapper. Consumers receive it explicitly; there
/// is no global instance.
pub struct Environment<B> {
    mapper: Mapper<B>,
    depth_seen: bool,
}

impl<B: ComputeBackend> Environment<B> {
    /// Configure the strategy named by `config` on `backend`.
    pub fn new(config: EnvironmentConfig, backend: B) -> Result<Self, EnvironmentError> {
        let mapper = match config.strategy {
            Strategy::HeightField => {
                let mut mapper = HeightMapper::new(backend);
                mapper.configure(config.height)?;
                Mapper::Height(mapper)
            }
            Strategy::Voxel => {
                let mut mapper = TsdfMapper::new(backend);
                mapper.configure(config.volume)?;
                Mapper::Voxel(mapper)
            }
        };
        tracing::info!(strategy = %config.strategy, "environment ready");
        Ok(Self {
            mapper,
            depth_seen: false,
        })
    }

    pub fn strategy(&self) -> Strategy {
        match self.mapper {
            Mapper::Height(_) => Strategy::HeightField,
            Mapper::Voxel(_) => Strategy::Voxel,
        }
    }

    /// True once any depth frame has reached the mapper.
    pub fn has_depth(&self) -> bool {
        self.depth_seen
    }

    /// Feed the source's latest frame, or nothing when depth is unavailable.
    pub fn update<S: DepthSource + ?Sized>(
        &mut self,
        source: &S,
        now: Instant,
    ) -> Result<UpdateOutcome, EnvironmentError> {
        let frame = source.latest_frame();
        if frame.is_some() && !self.depth_seen {
            tracing::info!("first depth frame received");
            self.depth_seen = true;
        }
        Ok(match &mut self.mapper {
            Mapper::Height(mapper) => UpdateOutcome::Height(mapper.tick(frame)?),
            Mapper::Voxel(mapper) => UpdateOutcome::Voxel(mapper.update(frame, now)?),
        })
    }

    pub fn clear(&mut self) -> Result<(), EnvironmentError> {
        match &mut self.mapper {
            Mapper::Height(mapper) => mapper.clear_map()?,
            Mapper::Voxel(mapper) => mapper.clear_volume()?,
        }
        Ok(())
    }

    /// First mapped surface along `ray`. Only the voxel strategy answers ray queries.
    pub fn raycast(&mut self, ray: Ray, max_distance: f32) -> Result<Option<RaycastHit>, EnvironmentError> {
        match &mut self.mapper {
            Mapper::Voxel(mapper) => Ok(mapper.raycast(ray, max_distance)?),
            Mapper::Height(_) => Err(EnvironmentError::RaycastUnsupported(Strategy::HeightField)),
        }
    }

    /// Like [`Environment::raycast`], but until depth first arrives the ray is
    /// cast against the horizontal plane `y = floor_y` instead.
    pub fn raycast_or_floor(
        &mut self,
        ray: Ray,
        max_distance: f32,
        floor_y: f32,
    ) -> Result<Option<RaycastHit>, EnvironmentError> {
        if self.depth_seen {
            return self.raycast(ray, max_distance);
        }
        Ok(ray
            .distance_to_horizontal_plane(floor_y)
            .filter(|d| *d < max_distance)
            .map(|distance| RaycastHit {
                point: ray.point_at(distance),
                distance,
            }))
    }

    /// Height map value at world `xz`. Only the height-field strategy answers.
    pub fn surface_height(&self, world_xz: Vec2) -> Result<Option<HeightSample>, EnvironmentError> {
        match &self.mapper {
            Mapper::Height(mapper) => Ok(mapper.sample(world_xz)),
            Mapper::Voxel(_) => Err(EnvironmentError::SurfaceHeightUnsupported(Strategy::Voxel)),
        }
    }

    pub fn height_mapper(&self) -> Option<&HeightMapper<B>> {
        match &self.mapper {
            Mapper::Height(mapper) => Some(mapper),
            Mapper::Voxel(_) => None,
        }
    }

    pub fn height_mapper_mut(&mut self) -> Option<&mut HeightMapper<B>> {
        match &mut self.mapper {
            Mapper::Height(mapper) => Some(mapper),
            Mapper::Voxel(_) => None,
        }
    }

    pub fn tsdf_mapper(&self) -> Option<&TsdfMapper<B>> {
        match &self.mapper {
            Mapper::Voxel(mapper) => Some(mapper),
            Mapper::Height(_) => None,
        }
    }

    pub fn tsdf_mapper_mut(&mut self) -> Option<&mut TsdfMapper<B>> {
        match &mut self.mapper {
            Mapper::Voxel(mapper) => Some(mapper),
            Mapper::Height(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envmap_common::{DepthCamera, DepthFrame, Plane, Pose, SyntheticScene};
    use envmap_compute::{CpuBackend, HeightKernel, RecordingBackend, VolumeKernel};
    use envmap_height::HeightMapConfig;
    use envmap_stream::BudgetConfig;
    use envmap_volume::VolumeConfig;
    use glam::Vec3;

    fn height_env() -> Environment<RecordingBackend<CpuBackend>> {
        let config = EnvironmentConfig::height_field(HeightMapConfig {
            texture_size: 64,
            env_size: 10.0,
            depth_samples: 32,
            ..Default::default()
        });
        Environment::new(config, RecordingBackend::new(CpuBackend::new())).unwrap()
    }

    fn voxel_env() -> Environment<RecordingBackend<CpuBackend>> {
        let config = EnvironmentConfig::voxel(VolumeConfig {
            chunk_size: 8,
            max_eye_distance: 5.0,
            dims: [64, 64, 64],
            budget: BudgetConfig {
                interval_ms: 0,
                burst: 1,
            },
            ..Default::default()
        });
        Environment::new(config, RecordingBackend::new(CpuBackend::new())).unwrap()
    }

    fn floor_frame() -> DepthFrame {
        let pose = Pose::looking_at(Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, -1.0, -2.0));
        SyntheticScene::new()
            .with_plane(Plane::floor(-1.0))
            .render(&DepthCamera::default(), pose)
            .unwrap()
    }

    fn wall_frame() -> DepthFrame {
        SyntheticScene::new()
            .with_plane(Plane::new(Vec3::Z, Vec3::new(0.0, 0.0, -2.3)))
            .render(&DepthCamera::default(), Pose::default())
            .unwrap()
    }

    #[test]
    fn invalid_config_fails_fast() {
        let config = EnvironmentConfig::voxel(VolumeConfig {
            chunk_size: 0,
            ..Default::default()
        });
        assert!(matches!(
            Environment::new(config, CpuBackend::new()),
            Err(EnvironmentError::Volume(_))
        ));
    }

    #[test]
    fn height_strategy_maps_floor() {
        let mut env = height_env();
        assert_eq!(env.strategy(), Strategy::HeightField);
        assert!(env.tsdf_mapper().is_none());

        let frame = floor_frame();
        for _ in 0..30 {
            env.update(&frame, Instant::now()).unwrap();
        }
        assert!(env.has_depth());
        let sample = env.surface_height(Vec2::new(0.0, -1.0)).unwrap().unwrap();
        assert!((sample.height + 1.0).abs() < 0.01);
    }

    #[test]
    fn height_strategy_rejects_raycasts() {
        let mut env = height_env();
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        assert!(matches!(
            env.raycast(ray, 5.0),
            Err(EnvironmentError::RaycastUnsupported(Strategy::HeightField))
        ));
    }

    #[test]
    fn missing_depth_is_not_an_error() {
        let mut env = height_env();
        let none: Option<DepthFrame> = None;
        let outcome = env.update(&none, Instant::now()).unwrap();
        assert_eq!(outcome, UpdateOutcome::Height(TickOutcome::Skipped));
        assert!(!env.has_depth());
    }

    #[test]
    fn voxel_strategy_raycasts_wall() {
        let mut env = voxel_env();
        assert!(matches!(
            env.surface_height(Vec2::ZERO),
            Err(EnvironmentError::SurfaceHeightUnsupported(Strategy::Voxel))
        ));

        let outcome = env.update(&wall_frame(), Instant::now()).unwrap();
        let UpdateOutcome::Voxel(report) = outcome else {
            panic!("wrong strategy");
        };
        assert!(report.sweep_completed);

        let hit = env
            .raycast(Ray::new(Vec3::ZERO, Vec3::NEG_Z), 5.0)
            .unwrap()
            .expect("wall hit");
        assert!((hit.distance - 2.3).abs() < 0.1);
    }

    #[test]
    fn floor_fallback_until_depth_arrives() {
        let mut env = voxel_env();
        let down = Ray::new(Vec3::new(0.0, 1.6, 0.0), Vec3::new(0.0, -1.0, -1.0));

        let hit = env.raycast_or_floor(down, 5.0, 0.0).unwrap().unwrap();
        assert!(hit.point.y.abs() < 1e-5);
        assert!((hit.distance - 1.6 * 2f32.sqrt()).abs() < 1e-4);
        assert!(env.raycast_or_floor(down, 1.0, 0.0).unwrap().is_none());
        assert_eq!(env.tsdf_mapper().unwrap().backend().count(VolumeKernel::Raycast), 0);

        env.update(&wall_frame(), Instant::now()).unwrap();
        let forward = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let hit = env.raycast_or_floor(forward, 5.0, -10.0).unwrap().unwrap();
        assert!((hit.distance - 2.3).abs() < 0.1);
        assert_eq!(env.tsdf_mapper().unwrap().backend().count(VolumeKernel::Raycast), 1);
    }

    #[test]
    fn clear_routes_to_active_mapper() {
        let mut height = height_env();
        height.clear().unwrap();
        assert_eq!(height.height_mapper().unwrap().backend().count(HeightKernel::Init), 2);

        let mut voxel = voxel_env();
        voxel.update(&wall_frame(), Instant::now()).unwrap();
        voxel.clear().unwrap();
        let mapper = voxel.tsdf_mapper().unwrap();
        assert_eq!(mapper.backend().count(VolumeKernel::Clear), 2);
        assert!(mapper.volume().unwrap().is_zeroed());
    }
}
