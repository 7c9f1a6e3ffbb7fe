#![allow(clippy::excessive_precision)]

pub mod bounds;
pub mod distribution;
pub mod frame;
pub mod ray;

pub use bounds::Bounds3;
pub use distribution::Distribution1D;
pub use frame::Frame;
pub use ray::{Ray, RayDifferential};

#[allow(unused_imports)]
pub use nalgebra_glm::{self as glm, vec2, vec3};
pub use nalgebra_glm::{TMat3, TMat4, TVec2, TVec3};

pub type Float = f32;

pub type Vector2 = TVec2<Float>;
pub type Vector3 = TVec3<Float>;
pub type Matrix3 = TMat3<Float>;
pub type Matrix4 = TMat4<Float>;

/// π
pub const PI: Float = 3.14159265358979323846;
/// π/2
pub const FRAC_PI_2: Float = 1.57079632679489661923;
/// 1/π
pub const FRAC_1_PI: Float = 0.31830988618379067154;

/// Linear interpolation between `a` and `b` at `t`.
#[inline]
pub fn lerp(a: Float, b: Float, t: Float) -> Float {
    a + (b - a) * t
}

/// Square of a number.
#[inline]
pub fn sqr(x: Float) -> Float {
    x * x
}

/// Wraps `x` into `[0, m)`.
#[inline]
pub fn modulo(x: Float, m: Float) -> Float {
    let r = x % m;
    if r < 0.0 {
        r + m
    } else {
        r
    }
}

/// Domain-clamped versions of functions that would otherwise return NaN on
/// inputs a few ulps outside their domain.
pub mod safe {
    use super::Float;

    #[inline]
    pub fn sqrt(x: Float) -> Float {
        x.max(0.0).sqrt()
    }

    #[inline]
    pub fn acos(x: Float) -> Float {
        x.clamp(-1.0, 1.0).acos()
    }
}

/// Applies the affine transform `m` to a position.
#[inline]
pub fn xfm_point(m: &Matrix4, p: Vector3) -> Vector3 {
    Vector3::new(
        m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)] * p.z + m[(0, 3)],
        m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)] * p.z + m[(1, 3)],
        m[(2, 0)] * p.x + m[(2, 1)] * p.y + m[(2, 2)] * p.z + m[(2, 3)],
    )
}

/// Applies the linear part of `m` to a direction.
#[inline]
pub fn xfm_vector(m: &Matrix4, v: Vector3) -> Vector3 {
    Vector3::new(
        m[(0, 0)] * v.x + m[(0, 1)] * v.y + m[(0, 2)] * v.z,
        m[(1, 0)] * v.x + m[(1, 1)] * v.y + m[(1, 2)] * v.z,
        m[(2, 0)] * v.x + m[(2, 1)] * v.y + m[(2, 2)] * v.z,
    )
}

/// Applies the transposed linear part of `m` to a direction.
#[inline]
pub fn xfm_vector_transpose(m: &Matrix4, v: Vector3) -> Vector3 {
    Vector3::new(
        m[(0, 0)] * v.x + m[(1, 0)] * v.y + m[(2, 0)] * v.z,
        m[(0, 1)] * v.x + m[(1, 1)] * v.y + m[(2, 1)] * v.z,
        m[(0, 2)] * v.x + m[(1, 2)] * v.y + m[(2, 2)] * v.z,
    )
}

/// Builds two unit vectors orthogonal to `w` and to each other.
pub fn coordinate_system(w: Vector3) -> (Vector3, Vector3) {
    let w = w.normalize();
    let v1 = if w.x.abs() > w.y.abs() {
        Vector3::new(-w.z, 0.0, w.x) / (w.x * w.x + w.z * w.z).sqrt()
    } else {
        Vector3::new(0.0, w.z, -w.y) / (w.y * w.y + w.z * w.z).sqrt()
    };
    let v2 = w.cross(&v1);
    (v1, v2)
}

/// Counter-clockwise normal of a 2-D direction.
#[inline]
pub fn screen_normal(v: Vector2) -> Vector2 {
    Vector2::new(-v.y, v.x)
}
