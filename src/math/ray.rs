use crate::math::{Float, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3,
    pub direction: Vector3,
    pub t_min: Float,
}

impl Ray {
    #[inline]
    pub fn new(origin: Vector3, direction: Vector3) -> Self {
        Self { origin, direction, t_min: 0.0 }
    }

    /// Ray whose intersections closer than `t_min` are ignored.
    #[inline]
    pub fn with_t_min(origin: Vector3, direction: Vector3, t_min: Float) -> Self {
        Self { origin, direction, t_min }
    }

    /// Point along the ray at parameter `t`.
    #[inline]
    pub fn at(&self, t: Float) -> Vector3 {
        self.origin + self.direction * t
    }
}

impl Default for Ray {
    fn default() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }
}

/// Screen-space derivatives of a ray's origin and direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayDifferential {
    pub org_dx: Vector3,
    pub org_dy: Vector3,
    pub dir_dx: Vector3,
    pub dir_dy: Vector3,
}

impl Default for RayDifferential {
    fn default() -> Self {
        Self {
            org_dx: Vector3::zeros(),
            org_dy: Vector3::zeros(),
            dir_dx: Vector3::zeros(),
            dir_dy: Vector3::zeros(),
        }
    }
}
