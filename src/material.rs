use crate::interaction::SurfacePoint;
use crate::math::{Float, Vector3, FRAC_1_PI};

/// Rec. 709 luminance of a linear RGB value.
#[inline]
pub fn luminance(c: Vector3) -> Float {
    0.212671 * c.x + 0.715160 * c.y + 0.072169 * c.z
}

/// A diffuse plus Blinn-microfacet material with constant reflectances.
///
/// The accessors take the surface point so textured variants can slot in
/// without touching the samplers.
#[derive(Debug, Clone)]
pub struct Material {
    pub diffuse_reflectance: Vector3,
    pub specular_reflectance: Vector3,
    pub roughness: Float,
}

impl Material {
    #[inline]
    pub fn get_roughness(&self, _point: &SurfacePoint) -> Float {
        self.roughness
    }

    #[inline]
    pub fn get_diffuse_reflectance(&self, _point: &SurfacePoint) -> Vector3 {
        self.diffuse_reflectance
    }

    #[inline]
    pub fn get_specular_reflectance(&self, _point: &SurfacePoint) -> Vector3 {
        self.specular_reflectance
    }

    /// Evaluates the BSDF times the outgoing cosine. Roughness is clamped
    /// from below by `min_roughness`, the floor carried along the light
    /// path.
    pub fn bsdf(
        &self,
        point: &SurfacePoint,
        wi: Vector3,
        wo: Vector3,
        min_roughness: Float,
    ) -> Vector3 {
        let n = point.shading_frame.z;
        let cos_wi = n.dot(&wi);
        let cos_wo = n.dot(&wo);
        if cos_wi <= 0.0 || cos_wo <= 0.0 {
            return Vector3::zeros();
        }
        let mut f = self.diffuse_reflectance * (FRAC_1_PI * cos_wo);
        let roughness = self.roughness.max(min_roughness).max(1e-4);
        let exponent = 2.0 / (roughness * roughness);
        let h = (wi + wo).normalize();
        let cos_h = n.dot(&h).max(0.0);
        let d = (exponent + 2.0) * FRAC_1_PI * 0.5 * cos_h.powf(exponent);
        f += self.specular_reflectance * (d / (4.0 * cos_wi.max(1e-4)));
        f
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::math::{Vector3, PI};

    fn gray(albedo: Float) -> Material {
        Material {
            diffuse_reflectance: Vector3::new(albedo, albedo, albedo),
            specular_reflectance: Vector3::zeros(),
            roughness: 0.5,
        }
    }

    #[test]
    fn test_luminance_weights() {
        assert_relative_eq!(luminance(Vector3::new(1.0, 1.0, 1.0)), 1.0, epsilon = 1e-5);
        assert_relative_eq!(luminance(Vector3::new(0.0, 1.0, 0.0)), 0.715160);
    }

    #[test]
    fn test_diffuse_bsdf_is_cosine_over_pi() {
        let point =
            SurfacePoint::from_position_normal(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0));
        let wi = Vector3::new(0.0, 0.0, 1.0);
        let wo = Vector3::new(1.0, 0.0, 1.0).normalize();
        let f = gray(0.8).bsdf(&point, wi, wo, 0.0);
        assert_relative_eq!(f.x, 0.8 / PI * wo.z, epsilon = 1e-5);
    }

    #[test]
    fn test_bsdf_zero_below_horizon() {
        let point =
            SurfacePoint::from_position_normal(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0));
        let wi = Vector3::new(0.0, 0.0, 1.0);
        let wo = Vector3::new(0.0, 0.0, -1.0);
        assert_eq!(gray(0.8).bsdf(&point, wi, wo, 0.0), Vector3::zeros());
    }
}
