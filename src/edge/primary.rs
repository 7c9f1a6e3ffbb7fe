use rayon::prelude::*;

use crate::camera::DCamera;
use crate::interaction::Intersection;
use crate::math::{
    screen_normal, sqr, xfm_point, Float, Ray, RayDifferential, Vector2, Vector3,
};
use crate::scene::{ChannelInfo, DVertex, Scene};

use super::EdgeSampler;

/// Independent uniform draws for one primary-edge sample.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryEdgeSample {
    pub edge_sel: Float,
    pub t: Float,
}

/// Outcome of one primary-edge draw. `edge == None` is the canonical dead
/// sample: its rays, throughputs and channel multipliers are all zero and
/// the outer pipeline skips it.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryEdgeRecord {
    pub edge: Option<super::Edge>,
    /// Screen-space position the sample landed on.
    pub edge_pt: Vector2,
}

impl Default for PrimaryEdgeRecord {
    fn default() -> Self {
        Self { edge: None, edge_pt: Vector2::zeros() }
    }
}

/// Draws a point on a silhouette edge per sample and emits the ray pair
/// straddling it, weighted by the gradient image at the sampled pixel.
///
/// Output slices follow the pair discipline: `2·idx + {0, 1}` for rays and
/// throughputs, `2·nd·idx + d` for channel multipliers.
#[allow(clippy::too_many_arguments)]
pub fn sample_primary_edges(
    scene: &Scene,
    sampler: &EdgeSampler,
    samples: &[PrimaryEdgeSample],
    d_image: &[Float],
    channels: &ChannelInfo,
    records: &mut [PrimaryEdgeRecord],
    rays: &mut [Ray],
    ray_differentials: &mut [RayDifferential],
    throughputs: &mut [Vector3],
    channel_multipliers: &mut [Float],
) {
    let nd = channels.num_total_dimensions;
    debug_assert_eq!(records.len(), samples.len());
    debug_assert_eq!(rays.len(), 2 * samples.len());
    debug_assert_eq!(ray_differentials.len(), samples.len());
    debug_assert_eq!(throughputs.len(), 2 * samples.len());
    debug_assert_eq!(channel_multipliers.len(), 2 * nd * samples.len());

    records
        .par_iter_mut()
        .zip(rays.par_chunks_mut(2))
        .zip(ray_differentials.par_iter_mut())
        .zip(throughputs.par_chunks_mut(2))
        .zip(channel_multipliers.par_chunks_mut(2 * nd))
        .enumerate()
        .for_each(|(idx, ((((record, rays), ray_diff), throughputs), multipliers))| {
            *record = PrimaryEdgeRecord::default();
            rays[0] = Ray::default();
            rays[1] = Ray::default();
            *ray_diff = RayDifferential::default();
            throughputs[0] = Vector3::zeros();
            throughputs[1] = Vector3::zeros();
            multipliers.fill(0.0);

            let sample = samples[idx];
            let camera = &scene.camera;
            let edge_id = sampler.primary_distribution.sample(sample.edge_sel);
            let edge = sampler.edges[edge_id];
            let (v0, v1) = edge.endpoints(&scene.shapes);
            let Some((v0_ss, v1_ss)) = camera.project(v0, v1) else {
                return;
            };
            let pmf = sampler.primary_distribution.pmf(edge_id);
            if pmf <= 0.0 {
                return;
            }

            let (edge_pt, jacobian) = if !camera.fisheye {
                // The projected edge stays a line segment, so sampling in
                // screen space is exact and the length and edge-equation
                // gradient cancel in the weight.
                let edge_pt = v0_ss + (v1_ss - v0_ss) * sample.t;
                if !camera.in_screen(edge_pt) {
                    return;
                }
                let half_space_normal = screen_normal((v0_ss - v1_ss).normalize());
                let offset = 1e-6;
                rays[0] = camera.sample_primary(edge_pt + half_space_normal * offset);
                rays[1] = camera.sample_primary(edge_pt - half_space_normal * offset);
                (edge_pt, 1.0)
            } else {
                // The fisheye projection bends edges, so sample on the
                // unprojected segment in camera space and project back.
                let v0_dir = camera.screen_to_camera(v0_ss);
                let v1_dir = camera.screen_to_camera(v1_ss);
                let v_dir3 = v1_dir - v0_dir;
                let edge_pt3 = v0_dir + v_dir3 * sample.t;
                let edge_pt = camera.camera_to_screen(edge_pt3);
                if !camera.in_screen(edge_pt) {
                    return;
                }
                // The edge equation is alpha(p) = dot(p, v0_dir × v1_dir);
                // offset the sample along its normal, shrinking with the
                // edge's camera-space distance.
                let cross_dir = v0_dir.cross(&v1_dir);
                let half_space_normal = cross_dir.normalize();
                let v0_local = xfm_point(&camera.world_to_cam, v0);
                let v1_local = xfm_point(&camera.world_to_cam, v1);
                let edge_local = v0_local + v1_local * sample.t;
                let offset = 1e-5 / edge_local.norm();
                let upper_dir = (edge_pt3 + half_space_normal * offset).normalize();
                rays[0] = camera.sample_primary(camera.camera_to_screen(upper_dir));
                let lower_dir = (edge_pt3 - half_space_normal * offset).normalize();
                rays[1] = camera.sample_primary(camera.camera_to_screen(lower_dir));

                let (d_dir_x, d_dir_y) = camera.d_screen_to_camera(edge_pt);
                let d_alpha_dx = d_dir_x.dot(&cross_dir);
                let d_alpha_dy = d_dir_y.dot(&cross_dir);
                let dirac_jacobian = 1.0 / (sqr(d_alpha_dx) + sqr(d_alpha_dy)).sqrt();
                let jac_offset = 1e-6;
                let edge_pt3_delta = v0_dir + v_dir3 * (sample.t + jac_offset);
                let edge_pt_delta = camera.camera_to_screen(edge_pt3_delta);
                let line_jacobian = ((edge_pt_delta - edge_pt) / offset).norm();
                (edge_pt, line_jacobian * dirac_jacobian)
            };

            record.edge = Some(edge);
            record.edge_pt = edge_pt;

            let xi = ((edge_pt.x * camera.width as Float) as usize).min(camera.width - 1);
            let yi = ((edge_pt.y * camera.height as Float) as usize).min(camera.height - 1);
            let pixel = nd * (yi * camera.width + xi);
            let rd = channels.radiance_dimension;
            let d_color = Vector3::new(
                d_image[pixel + rd],
                d_image[pixel + rd + 1],
                d_image[pixel + rd + 2],
            );
            let upper_weight = d_color * (jacobian / pmf);
            debug_assert!(upper_weight.iter().all(|w| w.is_finite()));
            throughputs[0] = upper_weight;
            throughputs[1] = -upper_weight;
            for d in 0..nd {
                let d_channel = d_image[pixel + d] * jacobian / pmf;
                multipliers[d] = d_channel;
                multipliers[d + nd] = -d_channel;
            }

            // Screen-space ray differential at the sample, by half-pixel
            // finite differences.
            let delta = 1e-3;
            let ray = camera.sample_primary(edge_pt);
            let ray_dx = camera.sample_primary(edge_pt + Vector2::new(delta, 0.0));
            let ray_dy = camera.sample_primary(edge_pt + Vector2::new(0.0, delta));
            let pixel_size_x = 0.5 / camera.width as Float;
            let pixel_size_y = 0.5 / camera.height as Float;
            *ray_diff = RayDifferential {
                org_dx: (ray_dx.origin - ray.origin) * (pixel_size_x / delta),
                org_dy: (ray_dy.origin - ray.origin) * (pixel_size_y / delta),
                dir_dx: (ray_dx.direction - ray.direction) * (pixel_size_x / delta),
                dir_dy: (ray_dy.direction - ray.direction) * (pixel_size_y / delta),
            };
        });
}

/// Zeroes the weights of ray pairs that hit neither face adjacent to their
/// sampled edge. Disabled unless `validate_primary_hits` was set when the
/// sampler was built: discarding such pairs also discards legitimate
/// occlusion changes, so the hook is opt-in.
pub fn update_primary_edge_weights(
    sampler: &EdgeSampler,
    records: &[PrimaryEdgeRecord],
    edge_isects: &[Option<Intersection>],
    channels: &ChannelInfo,
    throughputs: &mut [Vector3],
    channel_multipliers: &mut [Float],
) {
    if !sampler.options.validate_primary_hits {
        return;
    }
    let nd = channels.num_total_dimensions;
    throughputs
        .par_chunks_mut(2)
        .zip(channel_multipliers.par_chunks_mut(2 * nd))
        .enumerate()
        .for_each(|(idx, (throughputs, multipliers))| {
            let Some(edge) = records[idx].edge else {
                return;
            };
            let connected = |isect: &Option<Intersection>| {
                isect.is_some_and(|i| {
                    i.shape_id == edge.shape_id
                        && (i.tri_id == edge.f0 || Some(i.tri_id) == edge.f1)
                })
            };
            if !connected(&edge_isects[2 * idx]) && !connected(&edge_isects[2 * idx + 1]) {
                throughputs[0] = Vector3::zeros();
                throughputs[1] = Vector3::zeros();
                multipliers.fill(0.0);
            }
        });
}

/// Turns per-ray contribution differences into vertex and camera gradients:
/// the screen-space edge-equation gradient per endpoint, pushed through the
/// projection adjoint.
pub fn compute_primary_edge_derivatives(
    scene: &Scene,
    records: &[PrimaryEdgeRecord],
    edge_contribs: &[Float],
    d_vertices: &mut [Option<DVertex>],
    d_cameras: &mut [DCamera],
) {
    debug_assert_eq!(edge_contribs.len(), 2 * records.len());
    debug_assert_eq!(d_vertices.len(), 2 * records.len());
    debug_assert_eq!(d_cameras.len(), records.len());

    d_vertices
        .par_chunks_mut(2)
        .zip(d_cameras.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (d_verts, d_camera))| {
            d_verts[0] = None;
            d_verts[1] = None;
            *d_camera = DCamera::default();
            let Some(edge) = records[idx].edge else {
                return;
            };
            d_verts[0] = Some(DVertex {
                shape_id: edge.shape_id,
                vertex_id: edge.v0,
                d_v: Vector3::zeros(),
            });
            d_verts[1] = Some(DVertex {
                shape_id: edge.shape_id,
                vertex_id: edge.v1,
                d_v: Vector3::zeros(),
            });

            let camera = &scene.camera;
            let (v0, v1) = edge.endpoints(&scene.shapes);
            let Some((v0_ss, v1_ss)) = camera.project(v0, v1) else {
                return;
            };
            let edge_contrib = edge_contribs[2 * idx] + edge_contribs[2 * idx + 1];
            let edge_pt = records[idx].edge_pt;
            let (d_v0_ss, d_v1_ss) = if !camera.fisheye {
                (
                    Vector2::new(v1_ss.y - edge_pt.y, edge_pt.x - v1_ss.x),
                    Vector2::new(edge_pt.y - v0_ss.y, v0_ss.x - edge_pt.x),
                )
            } else {
                // d alpha / d v_ss through the unprojected directions.
                let v0_dir = camera.screen_to_camera(v0_ss);
                let v1_dir = camera.screen_to_camera(v1_ss);
                let edge_dir = camera.screen_to_camera(edge_pt);
                let (d_v0_dir_x, d_v0_dir_y) = camera.d_screen_to_camera(v0_ss);
                let (d_v1_dir_x, d_v1_dir_y) = camera.d_screen_to_camera(v1_ss);
                let n0 = v1_dir.cross(&edge_dir);
                let n1 = edge_dir.cross(&v0_dir);
                (
                    Vector2::new(n0.dot(&d_v0_dir_x), n0.dot(&d_v0_dir_y)),
                    Vector2::new(n1.dot(&d_v1_dir_x), n1.dot(&d_v1_dir_y)),
                )
            };
            let mut d_v0 = Vector3::zeros();
            let mut d_v1 = Vector3::zeros();
            camera.d_project(
                v0,
                v1,
                d_v0_ss * edge_contrib,
                d_v1_ss * edge_contrib,
                d_camera,
                &mut d_v0,
                &mut d_v1,
            );
            d_verts[0] = Some(DVertex { shape_id: edge.shape_id, vertex_id: edge.v0, d_v: d_v0 });
            d_verts[1] = Some(DVertex { shape_id: edge.shape_id, vertex_id: edge.v1, d_v: d_v1 });
        });
}
