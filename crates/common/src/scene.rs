use glam::{Mat4, Vec2, Vec3};

use crate::depth::{DepthFrame, DepthFrameError};
use crate::types::Pose;

/// An infinite plane `normal · p = offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub offset: f32,
}

impl Plane {
    pub fn new(normal: Vec3, point_on_plane: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            offset: normal.dot(point_on_plane),
        }
    }

    /// Horizontal floor at height `y`.
    pub fn floor(y: f32) -> Self {
        Self::new(Vec3::Y, Vec3::new(0.0, y, 0.0))
    }
}

/// Camera intrinsics shared by the synthetic depth renderer.
#[derive(Debug, Clone, Copy)]
pub struct DepthCamera {
    pub width: u32,
    pub height: u32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for DepthCamera {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            fov_y_degrees: 70.0,
            near: 0.1,
            far: 20.0,
        }
    }
}

impl DepthCamera {
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            self.width as f32 / self.height as f32,
            self.near,
            self.far,
        )
    }
}

/// A scene of planes rendered into depth frames for tests and simulation.
///
/// Stands in for the headset's depth sensor.
#[derive(Debug, Clone, Default)]
pub struct SyntheticScene {
    planes: Vec<Plane>,
}

impl SyntheticScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plane(mut self, plane: Plane) -> Self {
        self.planes.push(plane);
        self
    }

    /// Nearest positive hit distance along a world ray.
    pub fn trace(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        self.planes
            .iter()
            .filter_map(|plane| {
                let denom = plane.normal.dot(direction);
                if denom.abs() < 1e-6 {
                    return None;
                }
                let t = (plane.offset - plane.normal.dot(origin)) / denom;
                (t > 0.0).then_some(t)
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Render a depth frame seen from `pose`. Pixels that hit nothing carry no data.
    pub fn render(&self, camera: &DepthCamera, pose: Pose) -> Result<DepthFrame, DepthFrameError> {
        let projection = camera.projection();
        let inverse_projection = projection.inverse();
        let mut depth = Vec::with_capacity(camera.width as usize * camera.height as usize);
        for y in 0..camera.height {
            for x in 0..camera.width {
                let uv = Vec2::new(
                    (x as f32 + 0.5) / camera.width as f32,
                    (y as f32 + 0.5) / camera.height as f32,
                );
                let ndc = (uv * 2.0 - Vec2::ONE).extend(0.0);
                let near = inverse_projection.project_point3(ndc);
                let view_dir = near.normalize();
                let world_dir = pose.rotation * view_dir;
                let sample = self
                    .trace(pose.position, world_dir)
                    .map(|t| t * -view_dir.z)
                    .filter(|d| *d <= camera.far)
                    .unwrap_or(0.0);
                depth.push(sample);
            }
        }
        DepthFrame::new(camera.width, camera.height, depth, pose, projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_renders_constant_depth() {
        let scene = SyntheticScene::new().with_plane(Plane::new(Vec3::Z, Vec3::new(0.0, 0.0, -2.0)));
        let frame = scene.render(&DepthCamera::default(), Pose::default()).unwrap();
        for d in frame.samples() {
            assert!((d - 2.0).abs() < 1e-3, "depth {d}");
        }
    }

    #[test]
    fn floor_points_unproject_onto_floor() {
        let scene = SyntheticScene::new().with_plane(Plane::floor(0.0));
        let pose = Pose::looking_at(Vec3::new(0.0, 1.6, 0.0), Vec3::new(0.0, 0.0, -2.0));
        let frame = scene.render(&DepthCamera::default(), pose).unwrap();
        let uv = Vec2::splat(0.5);
        let d = frame.sample(uv).unwrap();
        let p = frame.unproject(uv, d);
        assert!(p.y.abs() < 0.05, "floor point at y={}", p.y);
    }

    #[test]
    fn empty_scene_has_no_data() {
        let frame = SyntheticScene::new()
            .render(&DepthCamera::default(), Pose::default())
            .unwrap();
        assert!(frame.samples().iter().all(|d| *d == 0.0));
    }
}
