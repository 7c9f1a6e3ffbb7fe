use once_cell::sync::Lazy;

use crate::interaction::SurfacePoint;
use crate::material::Material;
use crate::math::{lerp, safe, Float, Matrix3, Vector3, FRAC_PI_2, PI};

/// Resolution of both lookup grids.
pub const TABLE_SIZE: usize = 64;

/// Process-wide linearly-transformed-cosine lookup data, generated once at
/// first use.
pub static TABLES: Lazy<Tables> = Lazy::new(Tables::generate);

/// The LTC matrix grid over (roughness, incidence angle) and the sphere
/// integral grid over (elevation cosine, form factor).
///
/// The matrix grid parameterizes the lobe as a clamped cosine stretched by
/// the roughness and rotated into the mirror direction; the sphere grid is
/// the zenith cap integral re-indexed by the equivalent-disk form factor.
/// Both only steer importance: every selection probability they influence is
/// divided back out of the estimator.
pub struct Tables {
    tab_m: Vec<Matrix3>,
    tab_sphere: Vec<Float>,
}

impl Tables {
    fn generate() -> Tables {
        let n = TABLE_SIZE;
        let mut tab_m = Vec::with_capacity(n * n);
        for tid in 0..n {
            let theta = FRAC_PI_2 * tid as Float / (n - 1) as Float;
            let (sin_t, cos_t) = theta.sin_cos();
            for rid in 0..n {
                let alpha = (rid as Float / (n - 1) as Float).max(1e-3);
                tab_m.push(Matrix3::new(
                    alpha * cos_t, 0.0, -sin_t, //
                    0.0, alpha, 0.0, //
                    alpha * sin_t, 0.0, cos_t,
                ));
            }
        }

        let mut tab_sphere = Vec::with_capacity(n * n);
        for vid in 0..n {
            let form_factor = vid as Float / (n - 1) as Float;
            for uid in 0..n {
                let cos_theta = 2.0 * uid as Float / (n - 1) as Float - 1.0;
                tab_sphere.push(sphere_cap_ratio(cos_theta, form_factor));
            }
        }

        Tables { tab_m, tab_sphere }
    }

    /// LTC matrix for a roughness/incidence pair (nearest cell, like the
    /// baked grid it replaces).
    pub fn matrix(&self, roughness: Float, theta: Float) -> Matrix3 {
        let n = TABLE_SIZE;
        let rid = ((roughness * (n - 1) as Float) as usize).min(n - 1);
        let tid = ((theta / FRAC_PI_2 * (n - 1) as Float) as usize).min(n - 1);
        self.tab_m[rid + tid * n]
    }

    /// Bilinear fetch of the sphere grid.
    pub fn sphere(&self, cos_theta: Float, form_factor: Float) -> Float {
        let n = TABLE_SIZE;
        let max_index = (n - 1) as Float;
        let fu = ((cos_theta * 0.5 + 0.5) * max_index).clamp(0.0, max_index);
        let fv = (form_factor * max_index).clamp(0.0, max_index);
        let u0 = fu as usize;
        let v0 = fv as usize;
        let u1 = (u0 + 1).min(n - 1);
        let v1 = (v0 + 1).min(n - 1);
        let du = fu - u0 as Float;
        let dv = fv - v0 as Float;
        let at = |u: usize, v: usize| self.tab_sphere[u + v * n];
        lerp(
            lerp(at(u0, v0), at(u1, v0), du),
            lerp(at(u0, v1), at(u1, v1), du),
            dv,
        )
    }
}

/// Ratio of the clamped-cosine integral over a spherical cap to the cap's
/// equivalent-disk form factor, for an average direction at elevation
/// `cos_theta`.
fn sphere_cap_ratio(cos_theta: Float, form_factor: Float) -> Float {
    if form_factor <= 0.0 || cos_theta <= 0.0 {
        return 0.0;
    }
    let ff = form_factor.min(0.9999);
    // tan² of the disk half-angle
    let t2 = ff / (1.0 - ff);
    let visible = (1.0 - t2 * cos_theta.min(1.0)).max(0.0);
    PI * (1.0 - visible.sqrt()) / ff
}

/// LTC matrix for the material at a shading point, seen from `wi`.
pub fn get_ltc_matrix(
    material: &Material,
    point: &SurfacePoint,
    wi: Vector3,
    min_roughness: Float,
) -> Matrix3 {
    let roughness = material.get_roughness(point).max(min_roughness);
    let theta = safe::acos(wi.dot(&point.shading_frame.z));
    TABLES.matrix(roughness, theta)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_matrix_at_normal_incidence_is_stretched_identity() {
        let m = TABLES.matrix(0.5, 0.0);
        let alpha: Float = (0.5 * 63.0f32).floor() / 63.0;
        assert_relative_eq!(m[(0, 0)], alpha, epsilon = 1e-2);
        assert_relative_eq!(m[(1, 1)], alpha, epsilon = 1e-2);
        assert_relative_eq!(m[(2, 2)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(m[(0, 2)], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_matrices_are_invertible() {
        for rid in 0..TABLE_SIZE {
            let roughness = rid as Float / (TABLE_SIZE - 1) as Float;
            for tid in 0..TABLE_SIZE {
                let theta = FRAC_PI_2 * tid as Float / (TABLE_SIZE - 1) as Float;
                assert!(TABLES.matrix(roughness, theta).try_inverse().is_some());
            }
        }
    }

    #[test]
    fn test_sphere_grid_full_hemisphere_limit() {
        // A form factor of one is the whole hemisphere: the clamped cosine
        // integrates to π.
        assert_relative_eq!(TABLES.sphere(1.0, 1.0) * 1.0, PI, epsilon = 2e-2);
    }

    #[test]
    fn test_sphere_grid_below_horizon_is_zero() {
        assert_eq!(TABLES.sphere(-0.5, 0.3), 0.0);
    }
}
