use tracing::debug;

use crate::interaction::SurfacePoint;
use crate::ltc;
use crate::math::{coordinate_system, safe, sqr, Bounds3, Float, Matrix3, Vector3, PI};
use crate::scene::Scene;

use super::{exterior_dihedral_angle, Edge};

/// A node over a cluster of edges: spatial bounds, optional directional
/// bounds over the cluster's silhouette anchors, and the cluster's
/// dihedral-weighted total edge length.
pub struct EdgeTreeNode {
    pub bounds: Bounds3,
    pub dir_bounds: Option<Bounds3>,
    pub weighted_total_length: Float,
    pub content: EdgeTreeContent,
}

pub enum EdgeTreeContent {
    Leaf { edge_id: usize },
    Interior { children: [Box<EdgeTreeNode>; 2] },
}

/// The two-way edge partition the secondary sampler traverses.
pub struct EdgeTree {
    /// Edges that are silhouettes from every viewpoint (boundary edges);
    /// spatial bounds suffice.
    pub cs_root: Option<Box<EdgeTreeNode>>,
    /// Edges whose silhouette-ness depends on the viewpoint; these also
    /// carry directional bounds.
    pub ncs_root: Option<Box<EdgeTreeNode>>,
}

struct BuildItem {
    edge_id: usize,
    bounds: Bounds3,
    dir_bounds: Bounds3,
    centroid: Vector3,
    weight: Float,
}

impl EdgeTree {
    pub fn build(scene: &Scene, edges: &[Edge]) -> EdgeTree {
        let cam_org = scene.camera.origin();
        let mut items: Vec<BuildItem> = edges
            .iter()
            .enumerate()
            .map(|(edge_id, edge)| {
                let (v0, v1) = edge.endpoints(&scene.shapes);
                let midpoint = (v0 + v1) * 0.5;
                // Anchor of the midpoint-to-camera segment: the traversal's
                // sphere test against these anchors keeps a cluster exactly
                // when some contained edge is closer to the query point than
                // the camera is.
                let dir_anchor = (midpoint + cam_org) * 0.5;
                BuildItem {
                    edge_id,
                    bounds: Bounds3::from_point(v0).union_point(v1),
                    dir_bounds: Bounds3::from_point(dir_anchor),
                    centroid: midpoint,
                    weight: (v1 - v0).norm() * exterior_dihedral_angle(&scene.shapes, edge),
                }
            })
            .collect();

        let split = itertools::partition(&mut items, |item| edges[item.edge_id].f1.is_none());
        let (cs_items, ncs_items) = items.split_at_mut(split);
        let cs_root = (!cs_items.is_empty()).then(|| build_node(cs_items, false));
        let ncs_root = (!ncs_items.is_empty()).then(|| build_node(ncs_items, true));
        debug!(
            cs_edges = split,
            ncs_edges = edges.len() - split,
            "edge tree built"
        );
        EdgeTree { cs_root, ncs_root }
    }

    /// Traverses from the two roots: picks a subtree proportionally to its
    /// importance, rescales `u`, and descends to a leaf. Returns the edge id
    /// and the product of selection probabilities, or `None` when no
    /// reachable edge has importance.
    pub(crate) fn sample(&self, query: &ImportanceQuery, u: Float) -> Option<(usize, Float)> {
        let imp_cs = self.cs_root.as_deref().map_or(0.0, |n| n.importance(query));
        let imp_ncs = self.ncs_root.as_deref().map_or(0.0, |n| n.importance(query));
        if imp_cs <= 0.0 && imp_ncs <= 0.0 {
            return None;
        }
        let prob_cs = imp_cs / (imp_cs + imp_ncs);
        let (root, mut pmf, u) = if u < prob_cs {
            (self.cs_root.as_deref()?, prob_cs, u * (imp_cs + imp_ncs) / imp_cs)
        } else {
            (
                self.ncs_root.as_deref()?,
                1.0 - prob_cs,
                (u * (imp_cs + imp_ncs) - imp_cs) / imp_ncs,
            )
        };
        let edge_id = sample_edge_from_node(root, query, u, &mut pmf)?;
        Some((edge_id, pmf))
    }
}

fn build_node(items: &mut [BuildItem], directional: bool) -> Box<EdgeTreeNode> {
    if items.len() == 1 {
        let item = &items[0];
        return Box::new(EdgeTreeNode {
            bounds: item.bounds,
            dir_bounds: directional.then_some(item.dir_bounds),
            weighted_total_length: item.weight,
            content: EdgeTreeContent::Leaf { edge_id: item.edge_id },
        });
    }
    let centroid_bounds = items
        .iter()
        .fold(Bounds3::new(), |b, item| b.union_point(item.centroid));
    let axis = centroid_bounds.max_dim();
    items.sort_unstable_by(|a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));
    let mid = items.len() / 2;
    let (left_items, right_items) = items.split_at_mut(mid);
    let left = build_node(left_items, directional);
    let right = build_node(right_items, directional);
    let dir_bounds = match (&left.dir_bounds, &right.dir_bounds) {
        (Some(a), Some(b)) => Some(a.union(b)),
        _ => None,
    };
    Box::new(EdgeTreeNode {
        bounds: left.bounds.union(&right.bounds),
        dir_bounds,
        weighted_total_length: left.weighted_total_length + right.weighted_total_length,
        content: EdgeTreeContent::Interior { children: [left, right] },
    })
}

/// Everything constant across one traversal.
pub(crate) struct ImportanceQuery<'a> {
    pub point: &'a SurfacePoint,
    pub m_inv: Matrix3,
    pub cam_org: Vector3,
}

fn below_tangent_plane(bounds: &Bounds3, point: &SurfacePoint) -> bool {
    for i in 0..8u8 {
        if point
            .shading_frame
            .z
            .dot(&(bounds.corner(i) - point.position))
            > 0.0
        {
            return false;
        }
    }
    true
}

fn sphere_overlaps(center: Vector3, radius: Float, bounds: &Bounds3) -> bool {
    bounds.distance_squared(center) <= radius * radius
}

impl EdgeTreeNode {
    /// LTC-weighted importance of this cluster for the query point:
    /// `brdf_term · weighted_total_length / distance²`, zero for clusters
    /// entirely below the tangent plane or outside the silhouette cone.
    pub(crate) fn importance(&self, query: &ImportanceQuery) -> Float {
        if below_tangent_plane(&self.bounds, query.point) {
            return 0.0;
        }
        if let Some(dir_bounds) = &self.dir_bounds {
            // Olson-Zhang: the sphere spanned by the query point and the
            // camera origin must reach the cluster's direction anchors for
            // any contained edge to be a silhouette.
            let center = (query.point.position + query.cam_org) * 0.5;
            let radius = (query.point.position - query.cam_org).norm() * 0.5;
            if !sphere_overlaps(center, radius, dir_bounds) {
                return 0.0;
            }
        }
        let (center, radius) = self.bounds.bounding_sphere();
        let to_center = center - query.point.position;
        let brdf_term = if to_center.norm() <= radius {
            PI
        } else {
            ltc_sphere_integral(center, radius, query.point, &query.m_inv)
        };
        brdf_term * self.weighted_total_length / to_center.norm_squared().max(1e-6)
    }
}

/// Descends to a leaf, multiplying each level's selection probability into
/// `pmf`. `None` when both children of some node have zero importance.
pub(crate) fn sample_edge_from_node(
    node: &EdgeTreeNode,
    query: &ImportanceQuery,
    mut u: Float,
    pmf: &mut Float,
) -> Option<usize> {
    let mut node = node;
    loop {
        match &node.content {
            EdgeTreeContent::Leaf { edge_id } => return Some(*edge_id),
            EdgeTreeContent::Interior { children } => {
                let imp0 = children[0].importance(query);
                let imp1 = children[1].importance(query);
                if imp0 <= 0.0 && imp1 <= 0.0 {
                    return None;
                }
                let prob0 = imp0 / (imp0 + imp1);
                if u < prob0 {
                    *pmf *= prob0;
                    u = u * (imp0 + imp1) / imp0;
                    node = &children[0];
                } else {
                    *pmf *= 1.0 - prob0;
                    u = (u * (imp0 + imp1) - imp0) / imp1;
                    node = &children[1];
                }
            }
        }
    }
}

/// Integral of the transformed clamped cosine over the bounding sphere of a
/// cluster, through its equivalent disk.
pub(crate) fn ltc_sphere_integral(
    center: Vector3,
    radius: Float,
    point: &SurfacePoint,
    m_inv: &Matrix3,
) -> Float {
    let c_world = center - point.position;
    let (t0, t1) = coordinate_system(c_world);
    let c = m_inv * c_world;
    let v1 = m_inv * (t0 * radius);
    let v2 = m_inv * (t1 * radius);
    if v1.cross(&v2).dot(&c) <= 0.0 {
        return 0.0;
    }

    // The transform skews the tangent frame; recover an orthogonal ellipse
    // frame from the closed-form eigen decomposition of the 2x2 Gram matrix.
    let d11 = v1.dot(&v1);
    let d22 = v2.dot(&v2);
    let d12 = v1.dot(&v2);
    let (a, b, axis1, axis2);
    if d12.abs() / (d11 * d22).sqrt() > 1e-4 {
        let trace = d11 + d22;
        let det = safe::sqrt(d11 * d22 - d12 * d12);
        let u = 0.5 * safe::sqrt(trace - 2.0 * det);
        let v = 0.5 * safe::sqrt(trace + 2.0 * det);
        let e_max = sqr(u + v);
        let e_min = sqr(u - v);
        let (axis1_, axis2_) = if d11 > d22 {
            (v1 * d12 + v2 * (e_max - d11), v1 * d12 + v2 * (e_min - d11))
        } else {
            (v2 * d12 + v1 * (e_max - d22), v2 * d12 + v1 * (e_min - d22))
        };
        a = 1.0 / e_max;
        b = 1.0 / e_min;
        axis1 = axis1_.normalize();
        axis2 = axis2_.normalize();
    } else {
        a = 1.0 / d11;
        b = 1.0 / d22;
        axis1 = v1 * a.sqrt();
        axis2 = v2 * b.sqrt();
    }
    let mut v3 = axis1.cross(&axis2);
    if c.dot(&v3) < 0.0 {
        v3 = -v3;
    }

    let l = v3.dot(&c);
    let x0 = axis1.dot(&c) / l;
    let y0 = axis2.dot(&c) / l;
    let a = a * sqr(l);
    let b = b * sqr(l);

    // Disk with the same solid angle as the ellipse: middle root of the
    // characteristic cubic.
    let c0 = a * b;
    let c1 = a * b * (1.0 + sqr(x0) + sqr(y0)) - a - b;
    let c2 = 1.0 - a * (1.0 + sqr(x0)) - b * (1.0 + sqr(y0));
    let roots = solve_cubic(c0, c1, c2, 1.0);
    let e1 = roots[0];
    let e2 = roots[1];
    let e3 = roots[2];
    let avg_dir_local = Vector3::new(a * x0 / (a - e2), b * y0 / (b - e2), 1.0);
    let rotate = Matrix3::from_columns(&[axis1, axis2, v3]);
    let avg_dir = (rotate * avg_dir_local).normalize();
    let l1 = safe::sqrt(-e2 / e3);
    let l2 = safe::sqrt(-e2 / e1);
    let form_factor = l1 * l2 / (1.0 + sqr(l1)).sqrt() / (1.0 + sqr(l2)).sqrt();
    debug_assert!(form_factor.is_finite());
    ltc::TABLES.sphere(avg_dir.z, form_factor) * form_factor
}

/// Blinn's two-formula depressed-cubic solve. Both formulas are evaluated
/// and merged so neither suffers the other's cancellation; the returned
/// roots hold the smallest in the middle slot. Valid for the non-negative
/// discriminants the equivalent-disk cubic produces; the discriminant is
/// clamped so rounding cannot push it below zero.
fn solve_cubic(c0: Float, c1: Float, c2: Float, c3: Float) -> [Float; 3] {
    let inv_c3 = 1.0 / c3;
    let c0 = c0 * inv_c3;
    let c1 = c1 * inv_c3 / 3.0;
    let c2 = c2 * inv_c3 / 3.0;

    let a = c3;
    let b = c2;
    let c = c1;
    let d = c0;

    let delta_x = -sqr(c2) + c1;
    let delta_y = -c1 * c2 + c0;
    let delta_z = c2 * c0 - sqr(c1);
    let discriminant = (4.0 * delta_x * delta_z - sqr(delta_y)).max(0.0);

    // Algorithm A: accurate around the largest root.
    let xlc = {
        let c_a = delta_x;
        let d_a = -2.0 * b * delta_x + delta_y;
        let theta = discriminant.sqrt().atan2(-d_a) / 3.0;
        let x_1a = 2.0 * safe::sqrt(-c_a) * theta.cos();
        let x_3a = 2.0 * safe::sqrt(-c_a) * (theta + 2.0 / 3.0 * PI).cos();
        let xl = if x_1a + x_3a > 2.0 * b { x_1a } else { x_3a };
        (xl - b, a)
    };

    // Algorithm D: accurate around the smallest root.
    let xsc = {
        let c_d = delta_z;
        let d_d = -d * delta_y + 2.0 * c * delta_z;
        let theta = (d * discriminant.sqrt()).atan2(-d_d) / 3.0;
        let x_1d = 2.0 * safe::sqrt(-c_d) * theta.cos();
        let x_3d = 2.0 * safe::sqrt(-c_d) * (theta + 2.0 / 3.0 * PI).cos();
        let xs = if x_1d + x_3d < 2.0 * c { x_1d } else { x_3d };
        (-d, xs + c)
    };

    let e = xlc.1 * xsc.1;
    let f = -xlc.0 * xsc.1 - xlc.1 * xsc.0;
    let g = xlc.0 * xsc.0;
    let xmc = (c * f - b * g, -b * f + c * e);

    let mut roots = [xsc.0 / xsc.1, xmc.0 / xmc.1, xlc.0 / xlc.1];
    if roots[0] < roots[1] && roots[0] < roots[2] {
        roots.swap(0, 1);
    } else if roots[2] < roots[0] && roots[2] < roots[1] {
        roots.swap(2, 1);
    }
    roots
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::camera::Camera;
    use crate::material::Material;
    use crate::math::{Matrix4, Vector3};
    use crate::shape::Shape;

    fn cubic_value(c0: Float, c1: Float, c2: Float, c3: Float, x: Float) -> Float {
        c3 * x * x * x + c2 * x * x + c1 * x + c0
    }

    #[test]
    fn test_solve_cubic_roots_satisfy_polynomial() {
        // (x + 1)(x - 4)^2 = x^3 - 7x^2 + 8x + 16
        let roots = solve_cubic(16.0, 8.0, -7.0, 1.0);
        for root in roots {
            assert!(cubic_value(16.0, 8.0, -7.0, 1.0, root).abs() < 1e-2);
        }
        // The smallest root sits in the middle slot.
        assert_relative_eq!(roots[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_solve_cubic_distinct_roots() {
        // (x + 2)(x - 1)(x - 3) = x^3 - 2x^2 - 5x + 6
        let roots = solve_cubic(6.0, -5.0, -2.0, 1.0);
        assert_relative_eq!(roots[1], -2.0, epsilon = 1e-3);
        let mut sorted = roots;
        sorted.sort_by(Float::total_cmp);
        assert_relative_eq!(sorted[0], -2.0, epsilon = 1e-3);
        assert_relative_eq!(sorted[1], 1.0, epsilon = 1e-3);
        assert_relative_eq!(sorted[2], 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_sphere_integral_matches_solid_angle_reference() {
        // Unit sphere two units above the shading point, untransformed
        // cosine lobe: π·(1 − √(1 − 1/4)).
        let point =
            SurfacePoint::from_position_normal(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0));
        let result = ltc_sphere_integral(
            Vector3::new(0.0, 0.0, 2.0),
            1.0,
            &point,
            &Matrix3::identity(),
        );
        let reference = PI * (1.0 - (1.0 - 0.25 as Float).sqrt());
        assert!(
            (result - reference).abs() / reference < 0.01,
            "result {result}, reference {reference}"
        );
    }

    #[test]
    fn test_sphere_integral_zero_when_backfacing() {
        let point =
            SurfacePoint::from_position_normal(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0));
        let result = ltc_sphere_integral(
            Vector3::new(0.0, 0.0, -2.0),
            1.0,
            &point,
            &Matrix3::identity(),
        );
        assert_eq!(result, 0.0);
    }

    fn octahedron_scene() -> Scene {
        let shape = Shape::new(
            vec![
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(-1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(0.0, -1.0, 0.0),
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, 0.0, -1.0),
            ],
            vec![
                0, 2, 4, 2, 1, 4, 1, 3, 4, 3, 0, 4, //
                2, 0, 5, 1, 2, 5, 3, 1, 5, 0, 3, 5,
            ],
            0,
        );
        let cam_to_world = Matrix4::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, -6.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        Scene {
            camera: Camera::new(64, 64, cam_to_world, 45.0, false),
            shapes: vec![shape],
            materials: vec![Material {
                diffuse_reflectance: Vector3::new(0.5, 0.5, 0.5),
                specular_reflectance: Vector3::zeros(),
                roughness: 0.5,
            }],
            has_environment_map: false,
        }
    }

    fn enumerate_leaf_probabilities(
        node: &EdgeTreeNode,
        query: &ImportanceQuery,
        scale: Float,
        out: &mut Vec<(usize, Float)>,
    ) {
        match &node.content {
            EdgeTreeContent::Leaf { edge_id } => out.push((*edge_id, scale)),
            EdgeTreeContent::Interior { children } => {
                let imp0 = children[0].importance(query);
                let imp1 = children[1].importance(query);
                if imp0 <= 0.0 && imp1 <= 0.0 {
                    return;
                }
                let prob0 = imp0 / (imp0 + imp1);
                if prob0 > 0.0 {
                    enumerate_leaf_probabilities(&children[0], query, scale * prob0, out);
                }
                if prob0 < 1.0 {
                    enumerate_leaf_probabilities(&children[1], query, scale * (1.0 - prob0), out);
                }
            }
        }
    }

    #[test]
    fn test_traversal_pmf_product_sums_to_one() {
        let scene = octahedron_scene();
        let edges = super::super::collect_edges(&scene.shapes).unwrap();
        assert_eq!(edges.len(), 12);
        let tree = EdgeTree::build(&scene, &edges);
        assert!(tree.cs_root.is_none());
        let root = tree.ncs_root.as_deref().unwrap();
        assert_relative_eq!(
            root.weighted_total_length,
            edges
                .iter()
                .map(|e| e.length(&scene.shapes) * exterior_dihedral_angle(&scene.shapes, e))
                .sum::<Float>(),
            epsilon = 1e-4
        );

        let point = SurfacePoint::from_position_normal(
            Vector3::new(0.0, 0.0, -2.0),
            Vector3::new(0.0, 0.0, 1.0),
        );
        let query = ImportanceQuery {
            point: &point,
            m_inv: Matrix3::identity(),
            cam_org: scene.camera.origin(),
        };
        assert!(root.importance(&query) > 0.0);

        let mut leaves = Vec::new();
        enumerate_leaf_probabilities(root, &query, 1.0, &mut leaves);
        let total: Float = leaves.iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-4);

        // Sampling must land on a leaf with exactly the enumerated product.
        for u in [0.01, 0.17, 0.39, 0.55, 0.71, 0.93] {
            let (edge_id, pmf) = tree.sample(&query, u).expect("positive importance");
            let enumerated = leaves
                .iter()
                .find(|(id, _)| *id == edge_id)
                .expect("sampled leaf enumerated");
            assert_relative_eq!(pmf, enumerated.1, epsilon = 1e-4, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_boundary_edges_build_the_spatial_tree() {
        let mut scene = octahedron_scene();
        scene.shapes = vec![Shape::new(
            vec![
                Vector3::new(-1.0, -1.0, 0.0),
                Vector3::new(1.0, -1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            vec![0, 1, 2],
            0,
        )];
        let edges = super::super::collect_edges(&scene.shapes).unwrap();
        let tree = EdgeTree::build(&scene, &edges);
        assert!(tree.ncs_root.is_none());
        let root = tree.cs_root.as_deref().unwrap();
        assert!(root.dir_bounds.is_none());

        let point = SurfacePoint::from_position_normal(
            Vector3::new(0.0, 0.0, -1.5),
            Vector3::new(0.0, 0.0, 1.0),
        );
        let query = ImportanceQuery {
            point: &point,
            m_inv: Matrix3::identity(),
            cam_org: scene.camera.origin(),
        };
        let mut leaves = Vec::new();
        enumerate_leaf_probabilities(root, &query, 1.0, &mut leaves);
        let total: Float = leaves.iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-4);
        let (edge_id, pmf) = tree.sample(&query, 0.4).expect("positive importance");
        assert!(edge_id < edges.len());
        assert!(pmf > 0.0);
    }

    #[test]
    fn test_traversal_fails_below_tangent_plane() {
        let scene = octahedron_scene();
        let edges = super::super::collect_edges(&scene.shapes).unwrap();
        let tree = EdgeTree::build(&scene, &edges);
        // Every octahedron corner is below this point's tangent plane.
        let point = SurfacePoint::from_position_normal(
            Vector3::new(0.0, 0.0, 3.0),
            Vector3::new(0.0, 0.0, 1.0),
        );
        let query = ImportanceQuery {
            point: &point,
            m_inv: Matrix3::identity(),
            cam_org: scene.camera.origin(),
        };
        assert!(tree.sample(&query, 0.5).is_none());
    }
}
