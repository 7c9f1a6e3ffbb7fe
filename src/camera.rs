use crate::math::{
    sqr, xfm_point, xfm_vector, xfm_vector_transpose, Float, Matrix4, Ray, Vector2, Vector3,
    FRAC_PI_2, PI,
};

/// A pinhole or equidistant-fisheye camera with `[0, 1]²` screen coordinates.
///
/// The fisheye image occupies the inscribed circle of the screen square and
/// covers a hemisphere; everything else (projection, clipping, primary-ray
/// generation and the projection adjoints) is shared between the two models.
#[derive(Debug, Clone)]
pub struct Camera {
    pub width: usize,
    pub height: usize,
    pub cam_to_world: Matrix4,
    pub world_to_cam: Matrix4,
    /// Tangent of half the vertical field of view (pinhole model only).
    pub tan_half_fov: Float,
    pub fisheye: bool,
    pub clip_near: Float,
}

impl Camera {
    pub fn new(
        width: usize,
        height: usize,
        cam_to_world: Matrix4,
        fov_degrees: Float,
        fisheye: bool,
    ) -> Camera {
        let world_to_cam = cam_to_world
            .try_inverse()
            .expect("camera transform must be invertible");
        Camera {
            width,
            height,
            cam_to_world,
            world_to_cam,
            tan_half_fov: (fov_degrees * PI / 360.0).tan(),
            fisheye,
            clip_near: 1e-4,
        }
    }

    /// World-space position of the center of projection.
    #[inline]
    pub fn origin(&self) -> Vector3 {
        xfm_point(&self.cam_to_world, Vector3::zeros())
    }

    #[inline]
    fn aspect(&self) -> Float {
        self.width as Float / self.height as Float
    }

    /// Unprojects a screen point into camera space: a unit direction for the
    /// fisheye model, a film point at z = 1 for the pinhole model.
    pub fn screen_to_camera(&self, s: Vector2) -> Vector3 {
        if self.fisheye {
            let x = 2.0 * (s.x - 0.5);
            let y = 2.0 * (s.y - 0.5);
            let r = (x * x + y * y).sqrt();
            if r < 1e-6 {
                return Vector3::new(0.0, 0.0, 1.0);
            }
            let theta = r * FRAC_PI_2;
            let (sin_theta, cos_theta) = theta.sin_cos();
            Vector3::new(sin_theta * x / r, sin_theta * y / r, cos_theta)
        } else {
            Vector3::new(
                (2.0 * s.x - 1.0) * self.tan_half_fov * self.aspect(),
                (2.0 * s.y - 1.0) * self.tan_half_fov,
                1.0,
            )
        }
    }

    /// Projects a camera-space point onto the screen.
    pub fn camera_to_screen(&self, p: Vector3) -> Vector2 {
        if self.fisheye {
            let rho = (p.x * p.x + p.y * p.y).sqrt();
            if rho < 1e-10 {
                return Vector2::new(0.5, 0.5);
            }
            let theta = rho.atan2(p.z);
            let r = theta / FRAC_PI_2;
            Vector2::new(0.5 + 0.5 * r * p.x / rho, 0.5 + 0.5 * r * p.y / rho)
        } else {
            Vector2::new(
                p.x / (p.z * self.tan_half_fov * self.aspect()) * 0.5 + 0.5,
                p.y / (p.z * self.tan_half_fov) * 0.5 + 0.5,
            )
        }
    }

    pub fn in_screen(&self, s: Vector2) -> bool {
        if !(s.x >= 0.0 && s.x < 1.0 && s.y >= 0.0 && s.y < 1.0) {
            return false;
        }
        !self.fisheye || sqr(s.x - 0.5) + sqr(s.y - 0.5) < 0.25
    }

    /// Projects a world-space edge onto the screen, clipping it against the
    /// near plane. Fails when the edge lies entirely behind the camera.
    pub fn project(&self, v0: Vector3, v1: Vector3) -> Option<(Vector2, Vector2)> {
        let mut c0 = xfm_point(&self.world_to_cam, v0);
        let mut c1 = xfm_point(&self.world_to_cam, v1);
        if c0.z < self.clip_near && c1.z < self.clip_near {
            return None;
        }
        if c0.z < self.clip_near {
            let t = (self.clip_near - c0.z) / (c1.z - c0.z);
            c0 += (c1 - c0) * t;
        } else if c1.z < self.clip_near {
            let t = (self.clip_near - c1.z) / (c0.z - c1.z);
            c1 += (c0 - c1) * t;
        }
        Some((self.camera_to_screen(c0), self.camera_to_screen(c1)))
    }

    /// Camera ray through a screen position.
    pub fn sample_primary(&self, s: Vector2) -> Ray {
        let dir = xfm_vector(&self.cam_to_world, self.screen_to_camera(s)).normalize();
        Ray::new(self.origin(), dir)
    }

    /// Derivatives of the camera-space direction with respect to the screen
    /// coordinates.
    pub fn d_screen_to_camera(&self, s: Vector2) -> (Vector3, Vector3) {
        if !self.fisheye {
            return (
                Vector3::new(2.0 * self.tan_half_fov * self.aspect(), 0.0, 0.0),
                Vector3::new(0.0, 2.0 * self.tan_half_fov, 0.0),
            );
        }
        let x = 2.0 * (s.x - 0.5);
        let y = 2.0 * (s.y - 0.5);
        let r = (x * x + y * y).sqrt();
        if r < 1e-6 {
            return (Vector3::new(PI, 0.0, 0.0), Vector3::new(0.0, PI, 0.0));
        }
        let u = x / r;
        let v = y / r;
        let theta = r * FRAC_PI_2;
        let (sin_theta, cos_theta) = theta.sin_cos();
        let d_dir_x = Vector3::new(
            cos_theta * FRAC_PI_2 * u * u + sin_theta * (1.0 - u * u) / r,
            cos_theta * FRAC_PI_2 * u * v - sin_theta * u * v / r,
            -sin_theta * FRAC_PI_2 * u,
        );
        let d_dir_y = Vector3::new(
            cos_theta * FRAC_PI_2 * u * v - sin_theta * u * v / r,
            cos_theta * FRAC_PI_2 * v * v + sin_theta * (1.0 - v * v) / r,
            -sin_theta * FRAC_PI_2 * v,
        );
        (d_dir_x * 2.0, d_dir_y * 2.0)
    }

    /// Rows of the 2×3 Jacobian of `camera_to_screen` at a camera-space
    /// point.
    fn d_camera_to_screen(&self, c: Vector3) -> (Vector3, Vector3) {
        if !self.fisheye {
            let sx = 2.0 * self.tan_half_fov * self.aspect();
            let sy = 2.0 * self.tan_half_fov;
            return (
                Vector3::new(1.0 / (sx * c.z), 0.0, -c.x / (sx * c.z * c.z)),
                Vector3::new(0.0, 1.0 / (sy * c.z), -c.y / (sy * c.z * c.z)),
            );
        }
        let rho = (c.x * c.x + c.y * c.y).sqrt();
        if rho < 1e-8 {
            // The equidistant mapping is locally linear straight ahead.
            let k = 1.0 / (PI * c.z);
            return (Vector3::new(k, 0.0, 0.0), Vector3::new(0.0, k, 0.0));
        }
        let u = c.x / rho;
        let v = c.y / rho;
        let len_sq = rho * rho + c.z * c.z;
        let theta = rho.atan2(c.z);
        // s = 0.5 + (θ/π)·(u, v)
        let d_theta = Vector3::new(u * c.z / len_sq, v * c.z / len_sq, -rho / len_sq);
        let d_u = Vector3::new((1.0 - u * u) / rho, -u * v / rho, 0.0);
        let d_v = Vector3::new(-u * v / rho, (1.0 - v * v) / rho, 0.0);
        (
            (d_theta * u + d_u * theta) / PI,
            (d_theta * v + d_v * theta) / PI,
        )
    }

    /// Back-propagates screen-position gradients of a projected edge into
    /// vertex positions and the world-to-camera matrix.
    pub fn d_project(
        &self,
        v0: Vector3,
        v1: Vector3,
        d_v0_ss: Vector2,
        d_v1_ss: Vector2,
        d_camera: &mut DCamera,
        d_v0: &mut Vector3,
        d_v1: &mut Vector3,
    ) {
        self.d_project_vertex(v0, d_v0_ss, d_camera, d_v0);
        self.d_project_vertex(v1, d_v1_ss, d_camera, d_v1);
    }

    fn d_project_vertex(
        &self,
        v: Vector3,
        d_ss: Vector2,
        d_camera: &mut DCamera,
        d_v: &mut Vector3,
    ) {
        let c = xfm_point(&self.world_to_cam, v);
        if c.z < self.clip_near {
            return;
        }
        let (row_x, row_y) = self.d_camera_to_screen(c);
        let d_c = row_x * d_ss.x + row_y * d_ss.y;
        *d_v += xfm_vector_transpose(&self.world_to_cam, d_c);
        for i in 0..3 {
            for j in 0..3 {
                d_camera.world_to_cam[(i, j)] += d_c[i] * v[j];
            }
            d_camera.world_to_cam[(i, 3)] += d_c[i];
        }
    }
}

/// Gradient of the camera parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DCamera {
    pub world_to_cam: Matrix4,
}

impl Default for DCamera {
    fn default() -> Self {
        Self { world_to_cam: Matrix4::zeros() }
    }
}

/// Liang–Barsky clip of a screen-space segment against the unit square.
pub fn clip_line_screen(p0: Vector2, p1: Vector2) -> Option<(Vector2, Vector2)> {
    let d = p1 - p0;
    let mut t0: Float = 0.0;
    let mut t1: Float = 1.0;
    for (p, q) in [
        (-d.x, p0.x),
        (d.x, 1.0 - p0.x),
        (-d.y, p0.y),
        (d.y, 1.0 - p0.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((p0 + d * t0, p0 + d * t1))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn look_at_origin(eye: Vector3, fisheye: bool) -> Camera {
        // Camera at `eye`, looking down +z toward the origin.
        let cam_to_world = Matrix4::new(
            1.0, 0.0, 0.0, eye.x, //
            0.0, 1.0, 0.0, eye.y, //
            0.0, 0.0, 1.0, eye.z, //
            0.0, 0.0, 0.0, 1.0,
        );
        Camera::new(512, 512, cam_to_world, 90.0, fisheye)
    }

    #[test]
    fn test_pinhole_project_round_trip() {
        let camera = look_at_origin(Vector3::zeros(), false);
        let s = Vector2::new(0.3, 0.7);
        let p = camera.screen_to_camera(s);
        assert_relative_eq!(camera.camera_to_screen(p), s, epsilon = 1e-5);
        assert_relative_eq!(camera.camera_to_screen(p * 3.5), s, epsilon = 1e-5);
    }

    #[test]
    fn test_fisheye_project_round_trip() {
        let camera = look_at_origin(Vector3::zeros(), true);
        let s = Vector2::new(0.4, 0.65);
        let dir = camera.screen_to_camera(s);
        assert_relative_eq!(dir.norm(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(camera.camera_to_screen(dir), s, epsilon = 1e-5);
    }

    #[test]
    fn test_project_clips_near_plane() {
        let camera = look_at_origin(Vector3::zeros(), false);
        let behind = Vector3::new(0.0, 0.0, -1.0);
        let front = Vector3::new(0.0, 0.5, 1.0);
        assert!(camera.project(behind, behind).is_none());
        assert!(camera.project(behind, front).is_some());
        assert!(camera.project(front, behind).is_some());
    }

    #[test]
    fn test_d_screen_to_camera_matches_finite_differences() {
        for fisheye in [false, true] {
            let camera = look_at_origin(Vector3::zeros(), fisheye);
            let s = Vector2::new(0.42, 0.61);
            let delta = 1e-3;
            let (dx, dy) = camera.d_screen_to_camera(s);
            let fd_x = (camera.screen_to_camera(s + Vector2::new(delta, 0.0))
                - camera.screen_to_camera(s - Vector2::new(delta, 0.0)))
                / (2.0 * delta);
            let fd_y = (camera.screen_to_camera(s + Vector2::new(0.0, delta))
                - camera.screen_to_camera(s - Vector2::new(0.0, delta)))
                / (2.0 * delta);
            assert_relative_eq!(dx, fd_x, epsilon = 1e-2);
            assert_relative_eq!(dy, fd_y, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_d_project_matches_finite_differences() {
        for fisheye in [false, true] {
            let camera = look_at_origin(Vector3::new(0.1, -0.2, -3.0), fisheye);
            let v0 = Vector3::new(0.3, 0.2, 0.5);
            let v1 = Vector3::new(-0.4, 0.1, 0.2);
            let d_ss = Vector2::new(1.0, -0.5);

            let mut d_camera = DCamera::default();
            let mut d_v0 = Vector3::zeros();
            let mut d_v1 = Vector3::zeros();
            camera.d_project(
                v0,
                v1,
                d_ss,
                Vector2::zeros(),
                &mut d_camera,
                &mut d_v0,
                &mut d_v1,
            );
            assert_relative_eq!(d_v1, Vector3::zeros());

            // d_v0 should be the gradient of dot(project(v0), d_ss).
            let delta = 1e-3;
            for axis in 0..3 {
                let mut offset = Vector3::zeros();
                offset[axis] = delta;
                let (hi, _) = camera.project(v0 + offset, v1).unwrap();
                let (lo, _) = camera.project(v0 - offset, v1).unwrap();
                let fd = ((hi - lo) / (2.0 * delta)).dot(&d_ss);
                assert_relative_eq!(d_v0[axis], fd, epsilon = 2e-2, max_relative = 2e-2);
            }
        }
    }

    #[test]
    fn test_clip_line_screen() {
        // Fully inside.
        let (a, b) = clip_line_screen(Vector2::new(0.2, 0.2), Vector2::new(0.8, 0.6)).unwrap();
        assert_relative_eq!(a, Vector2::new(0.2, 0.2));
        assert_relative_eq!(b, Vector2::new(0.8, 0.6));
        // Crossing the whole screen vertically.
        let (a, b) = clip_line_screen(Vector2::new(0.5, -4.5), Vector2::new(0.5, 5.5)).unwrap();
        assert_relative_eq!(a.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(b.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!((b - a).norm(), 1.0, epsilon = 1e-5);
        // Fully outside.
        assert!(clip_line_screen(Vector2::new(1.5, 0.0), Vector2::new(2.0, 3.0)).is_none());
    }
}
