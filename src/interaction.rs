use crate::math::{Frame, Vector3};

/// Identifies the triangle a ray hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intersection {
    pub shape_id: usize,
    pub tri_id: usize,
}

/// Differential surface geometry at a shading point.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePoint {
    pub position: Vector3,
    pub geom_normal: Vector3,
    pub shading_frame: Frame,
    /// Screen-space derivatives of the shading normal.
    pub dn_dx: Vector3,
    pub dn_dy: Vector3,
}

impl SurfacePoint {
    /// A flat surface point with the shading frame built around `normal`.
    pub fn from_position_normal(position: Vector3, normal: Vector3) -> SurfacePoint {
        SurfacePoint {
            position,
            geom_normal: normal,
            shading_frame: Frame::from_z(normal),
            dn_dx: Vector3::zeros(),
            dn_dy: Vector3::zeros(),
        }
    }
}
