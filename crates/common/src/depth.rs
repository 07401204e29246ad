use glam::{Mat4, Vec2, Vec3};

use crate::geometry::Frustum;
use crate::types::Pose;

/// Errors from constructing a [`DepthFrame`].
#[derive(Debug, thiserror::Error)]
pub enum DepthFrameError {
    #[error("depth frame must be non-empty, got {width}x{height}")]
    Empty { width: u32, height: u32 },
    #[error("depth buffer has {actual} samples, expected {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },
    #[error("projection matrix is not invertible")]
    SingularProjection,
}

/// One frame from a depth-sensing camera.
///
/// Samples are linear eye-space depth in metres, row-major with row 0 at the
/// bottom of the image. Non-positive or non-finite samples mean "no data".
/// The projection uses a 0..1 clip depth range (`Mat4::perspective_rh`).
#[derive(Debug, Clone)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    depth: Vec<f32>,
    pose: Pose,
    view: Mat4,
    projection: Mat4,
    inverse_view: Mat4,
    inverse_projection: Mat4,
}

impl DepthFrame {
    pub fn new(
        width: u32,
        height: u32,
        depth: Vec<f32>,
        pose: Pose,
        projection: Mat4,
    ) -> Result<Self, DepthFrameError> {
        if width == 0 || height == 0 {
            return Err(DepthFrameError::Empty { width, height });
        }
        if depth.len() != width as usize * height as usize {
            return Err(DepthFrameError::SizeMismatch {
                width,
                height,
                actual: depth.len(),
            });
        }
        if projection.determinant().abs() < f32::EPSILON {
            return Err(DepthFrameError::SingularProjection);
        }
        let view = pose.view_matrix();
        Ok(Self {
            width,
            height,
            depth,
            pose,
            view,
            projection,
            inverse_view: pose.to_matrix(),
            inverse_projection: projection.inverse(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn samples(&self) -> &[f32] {
        &self.depth
    }

    /// Depth at pixel `(x, y)`, or `None` when the pixel carries no data.
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let d = self.depth[(y * self.width + x) as usize];
        (d.is_finite() && d > 0.0).then_some(d)
    }

    /// Nearest-pixel depth lookup at normalized image coordinates.
    pub fn sample(&self, uv: Vec2) -> Option<f32> {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return None;
        }
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        self.depth_at(x, y)
    }

    /// Centre of the texel that [`DepthFrame::sample`] reads at `uv`.
    pub fn texel_center(&self, uv: Vec2) -> Option<Vec2> {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return None;
        }
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        Some(Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        ))
    }

    /// View-space direction through `uv`, scaled so that its depth (-z) is 1.
    pub fn view_ray(&self, uv: Vec2) -> Vec3 {
        let ndc = (uv * 2.0 - Vec2::ONE).extend(0.0);
        let near = self.inverse_projection.project_point3(ndc);
        near / -near.z
    }

    /// World position of a sample at `uv` with eye-space depth `depth`.
    pub fn unproject(&self, uv: Vec2, depth: f32) -> Vec3 {
        self.inverse_view
            .transform_point3(self.view_ray(uv) * depth)
    }

    /// Image coordinates and eye-space depth of a world point, if it is in front of the camera.
    ///
    /// The returned uv may fall outside 0..1 for points outside the field of view.
    pub fn project(&self, world: Vec3) -> Option<Projected> {
        let view_point = self.view.transform_point3(world);
        let view_depth = -view_point.z;
        if view_depth <= 0.0 {
            return None;
        }
        let clip = self.projection * view_point.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        Some(Projected {
            uv: (Vec2::new(ndc.x, ndc.y) + Vec2::ONE) * 0.5,
            view_depth,
            eye_distance: view_point.length(),
        })
    }

    /// Camera frustum with the far plane pulled in to `max_distance`.
    pub fn frustum(&self, max_distance: f32) -> Frustum {
        Frustum::from_view_projection(self.projection * self.view).with_far_distance(
            self.pose.position,
            self.pose.forward(),
            max_distance,
        )
    }
}

/// A world point projected into a [`DepthFrame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    pub uv: Vec2,
    /// Distance along the camera's forward axis.
    pub view_depth: f32,
    /// Straight-line distance from the eye.
    pub eye_distance: f32,
}

impl Projected {
    pub fn in_image(&self) -> bool {
        (0.0..=1.0).contains(&self.uv.x) && (0.0..=1.0).contains(&self.uv.y)
    }
}

/// The depth collaborator: hands out the most recent frame, or `None` while
/// depth is unavailable.
pub trait DepthSource {
    fn latest_frame(&self) -> Option<&DepthFrame>;
}

impl DepthSource for Option<DepthFrame> {
    fn latest_frame(&self) -> Option<&DepthFrame> {
        self.as_ref()
    }
}

impl DepthSource for DepthFrame {
    fn latest_frame(&self) -> Option<&DepthFrame> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection() -> Mat4 {
        Mat4::perspective_rh(90.0_f32.to_radians(), 1.0, 0.1, 20.0)
    }

    fn flat_frame(depth: f32) -> DepthFrame {
        DepthFrame::new(4, 4, vec![depth; 16], Pose::default(), projection()).unwrap()
    }

    #[test]
    fn rejects_bad_sizes() {
        let err = DepthFrame::new(0, 4, vec![], Pose::default(), projection()).unwrap_err();
        assert!(matches!(err, DepthFrameError::Empty { .. }));

        let err = DepthFrame::new(2, 2, vec![1.0; 3], Pose::default(), projection()).unwrap_err();
        assert!(matches!(err, DepthFrameError::SizeMismatch { actual: 3, .. }));

        let err = DepthFrame::new(2, 2, vec![1.0; 4], Pose::default(), Mat4::ZERO).unwrap_err();
        assert!(matches!(err, DepthFrameError::SingularProjection));
    }

    #[test]
    fn invalid_samples_read_as_none() {
        let mut depth = vec![1.0; 4];
        depth[1] = 0.0;
        depth[2] = f32::NAN;
        let frame = DepthFrame::new(2, 2, depth, Pose::default(), projection()).unwrap();
        assert_eq!(frame.depth_at(0, 0), Some(1.0));
        assert_eq!(frame.depth_at(1, 0), None);
        assert_eq!(frame.depth_at(0, 1), None);
        assert_eq!(frame.depth_at(5, 5), None);
        assert_eq!(frame.sample(Vec2::new(1.5, 0.5)), None);
    }

    #[test]
    fn center_unprojects_straight_ahead() {
        let frame = flat_frame(2.0);
        let p = frame.unproject(Vec2::splat(0.5), 2.0);
        assert!((p - Vec3::new(0.0, 0.0, -2.0)).length() < 1e-4);
    }

    #[test]
    fn project_inverts_unproject() {
        let pose = Pose::looking_at(Vec3::new(1.0, 1.5, 0.0), Vec3::new(1.0, 0.0, -3.0));
        let frame = DepthFrame::new(4, 4, vec![1.0; 16], pose, projection()).unwrap();
        let uv = Vec2::new(0.3, 0.7);
        let world = frame.unproject(uv, 2.5);
        let projected = frame.project(world).unwrap();
        assert!((projected.uv - uv).length() < 1e-4);
        assert!((projected.view_depth - 2.5).abs() < 1e-4);
        assert!(projected.in_image());
    }

    #[test]
    fn texel_center_snaps_inside_image() {
        let frame = flat_frame(1.0);
        assert_eq!(frame.texel_center(Vec2::new(0.3, 0.99)), Some(Vec2::new(0.375, 0.875)));
        assert_eq!(frame.texel_center(Vec2::new(1.0, 0.0)), Some(Vec2::new(0.875, 0.125)));
        assert_eq!(frame.texel_center(Vec2::new(-0.1, 0.5)), None);
    }

    #[test]
    fn points_behind_do_not_project() {
        let frame = flat_frame(1.0);
        assert!(frame.project(Vec3::new(0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn option_is_a_depth_source() {
        let none: Option<DepthFrame> = None;
        assert!(none.latest_frame().is_none());
        let some = Some(flat_frame(1.0));
        assert!(some.latest_frame().is_some());
    }
}
