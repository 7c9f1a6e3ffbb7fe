use crate::math::{coordinate_system, Matrix3, Vector3};

/// A right-handed orthonormal basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub x: Vector3,
    pub y: Vector3,
    pub z: Vector3,
}

impl Frame {
    #[inline]
    pub fn new(x: Vector3, y: Vector3, z: Vector3) -> Self {
        debug_assert!((x.norm() - 1.0).abs() < 1e-3);
        debug_assert!((y.norm() - 1.0).abs() < 1e-3);
        debug_assert!((z.norm() - 1.0).abs() < 1e-3);
        Self { x, y, z }
    }

    /// Basis whose third axis is the given unit vector.
    #[inline]
    pub fn from_z(z: Vector3) -> Self {
        let (x, y) = coordinate_system(z);
        Self::new(x, y, z)
    }

    #[inline]
    pub fn to_local(&self, v: Vector3) -> Vector3 {
        Vector3::new(v.dot(&self.x), v.dot(&self.y), v.dot(&self.z))
    }

    #[inline]
    pub fn to_world(&self, v: Vector3) -> Vector3 {
        self.x * v.x + self.y * v.y + self.z * v.z
    }

    /// The world-to-local rotation as a matrix.
    #[inline]
    pub fn to_local_matrix(&self) -> Matrix3 {
        Matrix3::from_columns(&[self.x, self.y, self.z]).transpose()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_local_world_round_trip() {
        let frame = Frame::from_z(Vector3::new(1.0, 1.0, 1.0).normalize());
        let v = Vector3::new(0.3, -0.8, 0.5);
        assert_relative_eq!(frame.to_world(frame.to_local(v)), v, epsilon = 1e-5);
    }

    #[test]
    fn test_matrix_matches_to_local() {
        let frame = Frame::from_z(Vector3::new(0.0, 1.0, 0.0));
        let v = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(frame.to_local_matrix() * v, frame.to_local(v), epsilon = 1e-6);
    }
}
