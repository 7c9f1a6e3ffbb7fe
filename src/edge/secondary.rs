use rayon::prelude::*;

use crate::interaction::{Intersection, SurfacePoint};
use crate::ltc;
use crate::material::{luminance, Material};
use crate::math::{modulo, Float, Frame, Matrix3, Ray, RayDifferential, Vector3};
use crate::scene::{ChannelInfo, DVertex, Scene};

use super::tree::ImportanceQuery;
use super::{is_silhouette, EdgeSampler};

/// Stratum count of the importance-resampling fallback.
const RESAMPLE_STRATA: usize = 64;
/// Paths whose roughness floor exceeds this are skipped outright.
const MIN_ROUGHNESS_CUTOFF: Float = 1e-2;
const LINE_TOLERANCE: Float = 1e-5;
const MAX_LINE_ITERATIONS: usize = 20;

/// Independent uniform draws for one secondary-edge sample.
#[derive(Debug, Clone, Copy)]
pub struct SecondaryEdgeSample {
    pub edge_sel: Float,
    pub resample_sel: Float,
    pub t: Float,
    /// Selects the diffuse or the specular lobe of the LTC proposal.
    pub bsdf_component: Float,
}

/// Outcome of one secondary-edge draw. `edge == None` is the canonical dead
/// sample.
#[derive(Debug, Clone, Copy)]
pub struct SecondaryEdgeRecord {
    pub edge: Option<super::Edge>,
    /// Sampled edge point, relative to the shading point.
    pub edge_pt: Vector3,
    /// Chord direction pushed through the LTC transform, kept for the
    /// ray-plane intersection Jacobian.
    pub mwt: Vector3,
}

impl Default for SecondaryEdgeRecord {
    fn default() -> Self {
        Self { edge: None, edge_pt: Vector3::zeros(), mwt: Vector3::zeros() }
    }
}

/// The LTC line integral along a clipped edge chord in the transformed local
/// frame, with its CDF inversion.
pub(crate) struct LineIntegral {
    wt: Vector3,
    vo: Vector3,
    d: Float,
    l0: Float,
    l1: Float,
    i_l0: Float,
    i_l1: Float,
}

impl LineIntegral {
    /// Decomposes the chord `v0o → v1o` into its direction `wt`, the foot
    /// `vo` of the perpendicular from the origin, and the parameter range
    /// `[l0, l1]`. Fails on degenerate chords and chords through the origin.
    pub(crate) fn new(v0o: Vector3, v1o: Vector3) -> Option<LineIntegral> {
        let chord = v1o - v0o;
        if chord.norm_squared() < 1e-20 {
            return None;
        }
        let wt = chord.normalize();
        let l0 = v0o.dot(&wt);
        let l1 = v1o.dot(&wt);
        let vo = v0o - wt * l0;
        let d = vo.norm();
        if d < 1e-10 {
            return None;
        }
        let mut line = LineIntegral { wt, vo, d, l0, l1, i_l0: 0.0, i_l1: 0.0 };
        line.i_l0 = line.eval(l0);
        line.i_l1 = line.eval(l1);
        Some(line)
    }

    /// Builds the integral directly from its decomposition; the test seam
    /// for the inversion.
    #[cfg(test)]
    pub(crate) fn from_parts(vo: Vector3, wt: Vector3, l0: Float, l1: Float) -> LineIntegral {
        let d = vo.norm();
        let mut line = LineIntegral { wt, vo, d, l0, l1, i_l0: 0.0, i_l1: 0.0 };
        line.i_l0 = line.eval(l0);
        line.i_l1 = line.eval(l1);
        line
    }

    /// Antiderivative of the clamped-cosine line integrand.
    fn eval(&self, l: Float) -> Float {
        let d = self.d;
        (l / (d * (d * d + l * l)) + (l / d).atan() / (d * d)) * self.vo.z
            + (l * l / (d * (d * d + l * l))) * self.wt.z
    }

    /// Unnormalized integral over the chord; the resampling weight.
    #[inline]
    pub(crate) fn integral(&self) -> Float {
        self.i_l1 - self.i_l0
    }

    pub(crate) fn cdf(&self, l: Float) -> Float {
        (self.eval(l) - self.i_l0) / (self.i_l1 - self.i_l0)
    }

    pub(crate) fn pdf(&self, l: Float) -> Float {
        let dist_sq = self.d * self.d + l * l;
        2.0 * self.d * (self.vo.z + l * self.wt.z)
            / ((self.i_l1 - self.i_l0) * dist_sq * dist_sq)
    }

    /// Solves `cdf(l) = t` by bisection with Newton acceleration; a Newton
    /// step that leaves the bracket is replaced by the bracket midpoint.
    pub(crate) fn invert_cdf(&self, t: Float) -> Float {
        let (mut lb, mut ub) = if self.l0 < self.l1 {
            (self.l0, self.l1)
        } else {
            (self.l1, self.l0)
        };
        let mut l = 0.5 * (lb + ub);
        for it in 0..MAX_LINE_ITERATIONS {
            if !(l >= lb && l <= ub) {
                l = 0.5 * (lb + ub);
            }
            let value = self.cdf(l) - t;
            if value.abs() < LINE_TOLERANCE || it == MAX_LINE_ITERATIONS - 1 {
                break;
            }
            if value > 0.0 {
                ub = l;
            } else {
                lb = l;
            }
            l -= value / self.pdf(l);
        }
        l
    }

    /// Point on the chord at parameter `l`.
    #[inline]
    pub(crate) fn point(&self, l: Float) -> Vector3 {
        self.vo + self.wt * l
    }

    #[inline]
    pub(crate) fn direction(&self) -> Vector3 {
        self.wt
    }
}

/// Clips a local-frame chord against the tangent plane `z = 0`. `None` when
/// the whole chord lies below.
fn clip_to_tangent_plane(v0o: Vector3, v1o: Vector3) -> Option<(Vector3, Vector3)> {
    if v0o.z <= 0.0 && v1o.z <= 0.0 {
        return None;
    }
    let crossing = (v0o * v1o.z - v1o * v0o.z) / (v1o.z - v0o.z);
    let c0 = if v0o.z < 0.0 { crossing } else { v0o };
    let c1 = if v1o.z < 0.0 { crossing } else { v1o };
    Some((c0, c1))
}

struct LtcSetup {
    m: Matrix3,
    m_inv: Matrix3,
    m_pmf: Float,
    diffuse: bool,
}

/// Chooses the BSDF component by reflectance luminance and assembles the
/// matching LTC transform pair.
fn setup_ltc(
    material: &Material,
    point: &SurfacePoint,
    wi: Vector3,
    min_roughness: Float,
    bsdf_component: Float,
) -> Option<LtcSetup> {
    let diffuse_weight = luminance(material.get_diffuse_reflectance(point));
    let specular_weight = luminance(material.get_specular_reflectance(point));
    let weight_sum = diffuse_weight + specular_weight;
    if weight_sum <= 0.0 {
        // Black material.
        return None;
    }
    let diffuse_pmf = diffuse_weight / weight_sum;

    let n = point.shading_frame.z;
    let tangent = wi - n * wi.dot(&n);
    let frame_x = if tangent.norm_squared() > 1e-12 {
        tangent.normalize()
    } else {
        point.shading_frame.x
    };
    let frame_y = n.cross(&frame_x);
    let iso = Frame::new(frame_x, frame_y, n).to_local_matrix();

    if bsdf_component <= diffuse_pmf {
        let m = iso.try_inverse()?;
        Some(LtcSetup { m, m_inv: iso, m_pmf: diffuse_pmf, diffuse: true })
    } else {
        let ltc_inv = ltc::get_ltc_matrix(material, point, wi, min_roughness).try_inverse()?;
        let m_inv = ltc_inv * iso;
        let m = m_inv.try_inverse()?;
        Some(LtcSetup { m, m_inv, m_pmf: 1.0 - diffuse_pmf, diffuse: false })
    }
}

/// Stratified importance resampling over the flat secondary distribution:
/// M candidate draws share one uniform number, each candidate is weighted by
/// its clipped LTC line integral, and one survivor is chosen proportionally.
/// Returns the survivor and its resampling weight.
fn resample_edge(
    scene: &Scene,
    sampler: &EdgeSampler,
    shading_isect: &Intersection,
    shading_point: &SurfacePoint,
    m_inv: &Matrix3,
    edge_sel: Float,
    resample_sel: Float,
) -> Option<(usize, Float)> {
    let dist = sampler.secondary_distribution.as_ref()?;
    let mut edge_ids = [0usize; RESAMPLE_STRATA];
    let mut edge_weights = [0.0 as Float; RESAMPLE_STRATA];
    let mut resample_cdf = [0.0 as Float; RESAMPLE_STRATA];
    let mut acc = 0.0;
    for k in 0..RESAMPLE_STRATA {
        let u = modulo(edge_sel + k as Float / RESAMPLE_STRATA as Float, 1.0);
        let edge_id = dist.sample(u);
        edge_ids[k] = edge_id;
        let edge = &sampler.edges[edge_id];
        let same_tri = edge.shape_id == shading_isect.shape_id
            && (edge.f0 == shading_isect.tri_id || edge.f1 == Some(shading_isect.tri_id));
        if dist.pmf(edge_id) > 0.0
            && !same_tri
            && is_silhouette(&scene.shapes, shading_point.position, edge)
        {
            let (v0, v1) = edge.endpoints(&scene.shapes);
            if (v1 - v0).norm_squared() > 1e-10 {
                let v0o = m_inv * (v0 - shading_point.position);
                let v1o = m_inv * (v1 - shading_point.position);
                if let Some((c0, c1)) = clip_to_tangent_plane(v0o, v1o) {
                    if let Some(line) = LineIntegral::new(c0, c1) {
                        edge_weights[k] = (line.integral() / dist.pmf(edge_id)).max(0.0);
                    }
                }
            }
        }
        acc += edge_weights[k];
        resample_cdf[k] = acc;
    }
    let total = resample_cdf[RESAMPLE_STRATA - 1];
    if total <= 0.0 {
        return None;
    }
    let resample_u = resample_sel * total;
    let chosen = resample_cdf
        .partition_point(|&c| c < resample_u)
        .min(RESAMPLE_STRATA - 1);
    if edge_weights[chosen] <= 0.0 {
        return None;
    }
    let weight = (total / RESAMPLE_STRATA as Float)
        / (edge_weights[chosen] * dist.pmf(edge_ids[chosen]));
    Some((edge_ids[chosen], weight))
}

/// Per active pixel: selects a silhouette edge for the shading point (tree
/// traversal or importance resampling), samples a point on it by inverting
/// the LTC line CDF, and emits the straddling ray pair with its throughputs
/// and propagated ray differentials.
#[allow(clippy::too_many_arguments)]
pub fn sample_secondary_edges(
    scene: &Scene,
    sampler: &EdgeSampler,
    active_pixels: &[usize],
    samples: &[SecondaryEdgeSample],
    incoming_rays: &[Ray],
    incoming_ray_differentials: &[RayDifferential],
    shading_isects: &[Intersection],
    shading_points: &[SurfacePoint],
    throughputs: &[Vector3],
    min_roughness: &[Float],
    d_image: &[Float],
    channels: &ChannelInfo,
    records: &mut [SecondaryEdgeRecord],
    rays: &mut [Ray],
    bsdf_differentials: &mut [RayDifferential],
    new_throughputs: &mut [Vector3],
    edge_min_roughness: &mut [Float],
) {
    debug_assert_eq!(records.len(), active_pixels.len());
    debug_assert_eq!(samples.len(), active_pixels.len());
    debug_assert_eq!(rays.len(), 2 * active_pixels.len());
    debug_assert_eq!(new_throughputs.len(), 2 * active_pixels.len());

    let cam_org = scene.camera.origin();
    records
        .par_iter_mut()
        .zip(rays.par_chunks_mut(2))
        .zip(bsdf_differentials.par_chunks_mut(2))
        .zip(new_throughputs.par_chunks_mut(2))
        .zip(edge_min_roughness.par_chunks_mut(2))
        .enumerate()
        .for_each(
            |(idx, ((((record, rays), bsdf_diffs), new_throughputs), edge_min_rough))| {
                let pixel_id = active_pixels[idx];
                let edge_sample = samples[idx];
                let wi = -incoming_rays[pixel_id].direction;
                let shading_isect = shading_isects[pixel_id];
                let shading_point = &shading_points[pixel_id];
                let throughput = throughputs[pixel_id];
                let min_rough = min_roughness[pixel_id];

                *record = SecondaryEdgeRecord::default();
                rays[0] = Ray::default();
                rays[1] = Ray::default();
                bsdf_diffs[0] = RayDifferential::default();
                bsdf_diffs[1] = RayDifferential::default();
                new_throughputs[0] = Vector3::zeros();
                new_throughputs[1] = Vector3::zeros();
                edge_min_rough[0] = min_rough;
                edge_min_rough[1] = min_rough;

                // Paths that already scattered diffusely carry almost no
                // silhouette signal, only noise.
                if min_rough > MIN_ROUGHNESS_CUTOFF {
                    return;
                }

                let material = &scene.materials[scene.shapes[shading_isect.shape_id].material_id];
                let Some(ltc) = setup_ltc(
                    material,
                    shading_point,
                    wi,
                    min_rough,
                    edge_sample.bsdf_component,
                ) else {
                    return;
                };

                let (edge_id, edge_sample_weight) = if let Some(tree) = &sampler.tree {
                    let query =
                        ImportanceQuery { point: shading_point, m_inv: ltc.m_inv, cam_org };
                    let Some((edge_id, pmf)) = tree.sample(&query, edge_sample.edge_sel) else {
                        return;
                    };
                    debug_assert!(pmf > 0.0);
                    (edge_id, 1.0 / pmf)
                } else {
                    let Some(chosen) = resample_edge(
                        scene,
                        sampler,
                        &shading_isect,
                        shading_point,
                        &ltc.m_inv,
                        edge_sample.edge_sel,
                        edge_sample.resample_sel,
                    ) else {
                        return;
                    };
                    chosen
                };

                let edge = sampler.edges[edge_id];
                if !is_silhouette(&scene.shapes, shading_point.position, &edge) {
                    return;
                }
                let (v0, v1) = edge.endpoints(&scene.shapes);
                let v0o = ltc.m_inv * (v0 - shading_point.position);
                let v1o = ltc.m_inv * (v1 - shading_point.position);
                let Some((c0, c1)) = clip_to_tangent_plane(v0o, v1o) else {
                    return;
                };
                let Some(line) = LineIntegral::new(c0, c1) else {
                    return;
                };
                let l = line.invert_cdf(edge_sample.t);
                let line_pdf = line.pdf(l);
                if line_pdf <= 0.0 {
                    return;
                }
                let sample_p = ltc.m * line.point(l);

                // The shading point and the edge span a half-plane; the two
                // rays straddle it.
                let half_plane_normal = (v0 - shading_point.position)
                    .cross(&(v1 - shading_point.position))
                    .normalize();
                let sample_dir = sample_p.normalize();
                let offset = 1e-5 / sample_p.norm();
                let v_upper_dir = (sample_dir + half_plane_normal * offset).normalize();
                let v_lower_dir = (sample_dir - half_plane_normal * offset).normalize();

                let eval_bsdf = material.bsdf(shading_point, wi, sample_dir, min_rough);
                if luminance(eval_bsdf) < 1e-6 {
                    return;
                }

                let nd = channels.num_total_dimensions;
                let rd = channels.radiance_dimension;
                let d_color = Vector3::new(
                    d_image[nd * pixel_id + rd],
                    d_image[nd * pixel_id + rd + 1],
                    d_image[nd * pixel_id + rd + 2],
                );

                record.edge = Some(edge);
                record.edge_pt = sample_p;
                record.mwt = ltc.m * line.direction();
                let t_min = 1e-3 * sample_p.norm();
                rays[0] = Ray::with_t_min(shading_point.position, v_upper_dir, t_min);
                rays[1] = Ray::with_t_min(shading_point.position, v_lower_dir, t_min);

                let incoming = &incoming_ray_differentials[pixel_id];
                let differential = if ltc.diffuse {
                    // The diffuse lobe low-passes everything downstream;
                    // widen the footprint instead of tracking a dependency
                    // that does not exist.
                    RayDifferential {
                        org_dx: incoming.org_dx,
                        org_dy: incoming.org_dy,
                        dir_dx: Vector3::new(0.03, 0.03, 0.03),
                        dir_dy: Vector3::new(0.03, 0.03, 0.03),
                    }
                } else {
                    // Treat the half vector as a micronormal and reflect the
                    // incoming differentials around it (Igehy, Eqs. 14-15).
                    let m = (wi + sample_dir).normalize();
                    let m_cos = m.dot(&shading_point.shading_frame.z);
                    let dm_dx = shading_point.dn_dx * m_cos;
                    let dm_dy = shading_point.dn_dy * m_cos;
                    let d_dot_m_dx = incoming.dir_dx.dot(&m) - wi.dot(&dm_dx);
                    let d_dot_m_dy = incoming.dir_dy.dot(&m) - wi.dot(&dm_dy);
                    let wi_dot_m = wi.dot(&m);
                    RayDifferential {
                        org_dx: incoming.org_dx,
                        org_dy: incoming.org_dy,
                        dir_dx: incoming.dir_dx
                            - (shading_point.dn_dx * -wi_dot_m + m * d_dot_m_dx) * 2.0,
                        dir_dy: incoming.dir_dy
                            - (shading_point.dn_dy * -wi_dot_m + m * d_dot_m_dy) * 2.0,
                    }
                };
                bsdf_diffs[0] = differential;
                bsdf_diffs[1] = differential;

                // The Jacobian between the shading point and the eventual
                // surface hit is applied once the rays come back.
                let edge_weight = edge_sample_weight / (ltc.m_pmf * line_pdf);
                let nt = throughput.component_mul(&eval_bsdf).component_mul(&d_color)
                    * edge_weight;
                debug_assert!(nt.iter().all(|c| c.is_finite()));
                new_throughputs[0] = nt;
                new_throughputs[1] = -nt;
            },
        );
}

/// Derivative of a ray-plane intersection point with respect to the sampled
/// line parameter.
fn intersect_jacobian(org: Vector3, dir: Vector3, p: Vector3, n: Vector3, l: Vector3) -> Vector3 {
    let dir_dot_n = dir.dot(&n);
    if dir_dot_n.abs() < 1e-10 {
        return Vector3::zeros();
    }
    let d = -p.dot(&n);
    let t = -(org.dot(&n) + d) / dir_dot_n;
    if t <= 0.0 {
        return Vector3::zeros();
    }
    (l - dir * (l.dot(&n) / dir_dot_n)) * t
}

fn update_throughput(
    scene: &Scene,
    record: &SecondaryEdgeRecord,
    edge: &super::Edge,
    shading_point: &SurfacePoint,
    edge_isect: Option<Intersection>,
    edge_surface_point: &SurfacePoint,
    edge_throughput: &mut Vector3,
) {
    if edge_isect.is_some() {
        // Surface hit: geometry term plus the ray-plane Jacobian.
        let dir = edge_surface_point.position - shading_point.position;
        let dist_sq = dir.norm_squared();
        if dist_sq < 1e-8 {
            // Likely a self-intersection.
            *edge_throughput = Vector3::zeros();
            return;
        }
        let n_dir = dir / dist_sq.sqrt();
        let geometry_term = edge_surface_point.geom_normal.dot(&n_dir).abs() / dist_sq;
        let isect_jacobian = intersect_jacobian(
            shading_point.position,
            record.edge_pt,
            edge_surface_point.position,
            edge_surface_point.geom_normal,
            record.mwt,
        );
        let (v0, v1) = edge.endpoints(&scene.shapes);
        let half_plane_normal = (v0 - shading_point.position)
            .cross(&(v1 - shading_point.position))
            .normalize();
        let line_jacobian = isect_jacobian.norm()
            / edge_surface_point
                .geom_normal
                .cross(&half_plane_normal)
                .norm();
        let d0 = v0 - shading_point.position;
        let d1 = v1 - shading_point.position;
        let dirac_jacobian = d0.cross(&d1).norm();
        let w = line_jacobian / dirac_jacobian;
        debug_assert!(geometry_term.is_finite());
        debug_assert!(w.is_finite());
        *edge_throughput *= geometry_term * w;
    } else if scene.has_environment_map {
        // The ray escaped into the environment map; the solid-angle
        // conversion replaces the surface Jacobian.
        let (v0, v1) = edge.endpoints(&scene.shapes);
        let d0 = v0 - shading_point.position;
        let d1 = v1 - shading_point.position;
        let dirac_jacobian = d0.cross(&d1).norm();
        let line_jacobian = 1.0 / record.edge_pt.norm_squared();
        *edge_throughput *= line_jacobian / dirac_jacobian;
    }
}

/// Applies the geometry term and the ray-plane intersection Jacobian to the
/// throughputs of returned secondary ray pairs, with the environment-map
/// fallback for escaped rays.
pub fn update_secondary_edge_weights(
    scene: &Scene,
    active_pixels: &[usize],
    shading_points: &[SurfacePoint],
    edge_isects: &[Option<Intersection>],
    edge_surface_points: &[SurfacePoint],
    records: &[SecondaryEdgeRecord],
    edge_throughputs: &mut [Vector3],
) {
    edge_throughputs
        .par_chunks_mut(2)
        .enumerate()
        .for_each(|(idx, throughputs)| {
            let Some(edge) = records[idx].edge else {
                return;
            };
            let shading_point = &shading_points[active_pixels[idx]];
            for side in 0..2 {
                update_throughput(
                    scene,
                    &records[idx],
                    &edge,
                    shading_point,
                    edge_isects[2 * idx + side],
                    &edge_surface_points[2 * idx + side],
                    &mut throughputs[side],
                );
            }
        });
}

/// Accumulates the cross-product gradient of the half-plane Dirac term into
/// shading-point and vertex gradients, per returned ray pair.
#[allow(clippy::too_many_arguments)]
pub fn accumulate_secondary_edge_derivatives(
    scene: &Scene,
    active_pixels: &[usize],
    shading_points: &[SurfacePoint],
    records: &[SecondaryEdgeRecord],
    edge_surface_points: &[Vector3],
    edge_contribs: &[Float],
    d_points: &mut [Vector3],
    d_vertices: &mut [Option<DVertex>],
) {
    debug_assert_eq!(d_vertices.len(), 2 * records.len());
    debug_assert_eq!(edge_contribs.len(), 2 * records.len());

    let d_position: Vec<Vector3> = d_vertices
        .par_chunks_mut(2)
        .enumerate()
        .map(|(idx, d_verts)| {
            d_verts[0] = None;
            d_verts[1] = None;
            let Some(edge) = records[idx].edge else {
                return Vector3::zeros();
            };
            let p = shading_points[active_pixels[idx]].position;
            let (v0, v1) = edge.endpoints(&scene.shapes);
            let mut dcolor_dp = Vector3::zeros();
            let mut dcolor_dv0 = Vector3::zeros();
            let mut dcolor_dv1 = Vector3::zeros();
            for side in 0..2 {
                let edge_contrib = edge_contribs[2 * idx + side];
                if edge_contrib == 0.0 {
                    continue;
                }
                let x = edge_surface_points[2 * idx + side];
                let d0 = v0 - p;
                let d1 = v1 - p;
                dcolor_dp +=
                    (d1.cross(&d0) + (x - p).cross(&d1) + d0.cross(&(x - p))) * edge_contrib;
                dcolor_dv0 += d1.cross(&(x - p)) * edge_contrib;
                dcolor_dv1 += (x - p).cross(&d0) * edge_contrib;
            }
            debug_assert!(dcolor_dp.iter().all(|c| c.is_finite()));
            d_verts[0] = Some(DVertex {
                shape_id: edge.shape_id,
                vertex_id: edge.v0,
                d_v: dcolor_dv0,
            });
            d_verts[1] = Some(DVertex {
                shape_id: edge.shape_id,
                vertex_id: edge.v1,
                d_v: dcolor_dv1,
            });
            dcolor_dp
        })
        .collect();

    for (idx, dp) in d_position.into_iter().enumerate() {
        d_points[active_pixels[idx]] += dp;
    }
}
