pub mod primary;
pub mod secondary;
pub mod tree;

use rayon::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::camera::clip_line_screen;
use crate::math::{safe, Distribution1D, Float, Vector3, PI};
use crate::scene::Scene;
use crate::shape::Shape;
use self::tree::EdgeTree;

/// A unique mesh edge with its incident triangles.
///
/// Endpoint indices are canonical (`v0 < v1`); `f1` is absent for boundary
/// edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub shape_id: usize,
    pub v0: usize,
    pub v1: usize,
    pub f0: usize,
    pub f1: Option<usize>,
}

impl Edge {
    /// World positions of the two endpoints.
    #[inline]
    pub fn endpoints(&self, shapes: &[Shape]) -> (Vector3, Vector3) {
        let shape = &shapes[self.shape_id];
        (shape.vertex(self.v0), shape.vertex(self.v1))
    }

    #[inline]
    pub fn length(&self, shapes: &[Shape]) -> Float {
        let (v0, v1) = self.endpoints(shapes);
        (v1 - v0).norm()
    }
}

/// Whether `edge` separates front-facing from back-facing geometry as seen
/// from `q`.
///
/// Exactly aligned adjacent faces put both normals on the same (closed) side
/// and therefore never count as silhouettes, so repeated evaluation of
/// identical inputs is stable.
pub fn is_silhouette(shapes: &[Shape], q: Vector3, edge: &Edge) -> bool {
    let Some(f1) = edge.f1 else {
        // A boundary edge bounds visibility from everywhere.
        return true;
    };
    let shape = &shapes[edge.shape_id];
    let to_q = q - shape.vertex(edge.v0);
    let front0 = shape.face_normal(edge.f0).dot(&to_q) > 0.0;
    let front1 = shape.face_normal(f1).dot(&to_q) > 0.0;
    front0 != front1
}

/// π minus the interior dihedral angle between the faces sharing `edge`;
/// boundary edges count as π, coplanar faces as zero.
pub fn exterior_dihedral_angle(shapes: &[Shape], edge: &Edge) -> Float {
    let Some(f1) = edge.f1 else {
        return PI;
    };
    let shape = &shapes[edge.shape_id];
    safe::acos(shape.face_normal(edge.f0).dot(&shape.face_normal(f1)))
}

#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("edge ({v0}, {v1}) of shape {shape_id} is shared by more than two triangles")]
    NonManifold { shape_id: usize, v0: usize, v1: usize },
}

/// Build-time switches of the edge sampler.
#[derive(Debug, Clone)]
pub struct EdgeSamplerOptions {
    /// Build the hierarchical tree for secondary sampling. When off, the
    /// flat length-times-dihedral distribution is built instead and
    /// secondary selection falls back to stratified importance resampling.
    pub use_edge_tree: bool,
    /// Zero primary throughputs whose ray pair hit neither face adjacent to
    /// the sampled edge.
    pub validate_primary_hits: bool,
}

impl Default for EdgeSamplerOptions {
    fn default() -> Self {
        Self { use_edge_tree: true, validate_primary_hits: false }
    }
}

/// Scene-lifetime tables for silhouette-edge sampling: the deduplicated edge
/// array, the screen-space primary distribution, and either the flat
/// secondary distribution or the hierarchical edge tree.
pub struct EdgeSampler {
    pub edges: Vec<Edge>,
    pub primary_distribution: Distribution1D,
    pub secondary_distribution: Option<Distribution1D>,
    pub tree: Option<EdgeTree>,
    pub options: EdgeSamplerOptions,
}

impl EdgeSampler {
    /// Collects and weights the scene's edges. Fails only on meshes where a
    /// vertex pair is shared by more than two triangles.
    pub fn build(scene: &Scene, options: EdgeSamplerOptions) -> Result<EdgeSampler, EdgeError> {
        let edges = collect_edges(&scene.shapes)?;
        info!(num_edges = edges.len(), "edge table built");

        let weights: Vec<Float> = edges
            .par_iter()
            .map(|edge| primary_edge_weight(scene, edge))
            .collect();
        let primary_distribution = Distribution1D::from_weights(&weights);
        info!(
            total_screen_length = primary_distribution.total(),
            "primary edge distribution built"
        );

        let (secondary_distribution, tree) = if options.use_edge_tree {
            (None, Some(EdgeTree::build(scene, &edges)))
        } else {
            let weights: Vec<Float> = edges
                .par_iter()
                .map(|edge| {
                    edge.length(&scene.shapes) * exterior_dihedral_angle(&scene.shapes, edge)
                })
                .collect();
            let distribution = Distribution1D::from_weights(&weights);
            info!(
                total_weighted_length = distribution.total(),
                "secondary edge distribution built"
            );
            (Some(distribution), None)
        };

        Ok(EdgeSampler {
            edges,
            primary_distribution,
            secondary_distribution,
            tree,
            options,
        })
    }
}

/// Projected, clipped screen length if the edge is a silhouette from the
/// camera origin; zero otherwise.
fn primary_edge_weight(scene: &Scene, edge: &Edge) -> Float {
    let (v0, v1) = edge.endpoints(&scene.shapes);
    let Some((v0_ss, v1_ss)) = scene.camera.project(v0, v1) else {
        return 0.0;
    };
    let Some((c0, c1)) = clip_line_screen(v0_ss, v1_ss) else {
        return 0.0;
    };
    if !is_silhouette(&scene.shapes, scene.camera.origin(), edge) {
        return 0.0;
    }
    (c1 - c0).norm()
}

/// Forms the three candidate edges of every triangle, canonicalizes the
/// endpoint order, sorts, and merges duplicates so both incident triangles
/// land on a single record. Edges never merge across shapes.
fn collect_edges(shapes: &[Shape]) -> Result<Vec<Edge>, EdgeError> {
    let mut edges = Vec::new();
    for (shape_id, shape) in shapes.iter().enumerate() {
        let mut shape_edges = Vec::with_capacity(3 * shape.num_triangles());
        for tri in 0..shape.num_triangles() {
            let (i0, i1, i2) = shape.triangle(tri);
            for (a, b) in [(i0, i1), (i1, i2), (i2, i0)] {
                shape_edges.push(Edge {
                    shape_id,
                    v0: a.min(b),
                    v1: a.max(b),
                    f0: tri,
                    f1: None,
                });
            }
        }
        shape_edges.sort_unstable_by_key(|e| (e.v0, e.v1, e.f0));
        let mut merged: Vec<Edge> = Vec::with_capacity(shape_edges.len());
        for edge in shape_edges {
            match merged.last_mut() {
                Some(last) if last.v0 == edge.v0 && last.v1 == edge.v1 => {
                    if last.f1.is_some() {
                        return Err(EdgeError::NonManifold {
                            shape_id,
                            v0: edge.v0,
                            v1: edge.v1,
                        });
                    }
                    last.f1 = Some(edge.f0);
                }
                _ => merged.push(edge),
            }
        }
        edges.extend(merged);
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::math::{Vector3, FRAC_PI_2};

    fn single_triangle() -> Vec<Shape> {
        vec![Shape::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            vec![0, 1, 2],
            0,
        )]
    }

    fn quad() -> Vec<Shape> {
        vec![Shape::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
            0,
        )]
    }

    #[test]
    fn test_single_triangle_has_three_boundary_edges() {
        let edges = collect_edges(&single_triangle()).unwrap();
        assert_eq!(edges.len(), 3);
        for edge in &edges {
            assert!(edge.v0 < edge.v1);
            assert_eq!(edge.f1, None);
        }
    }

    #[test]
    fn test_quad_dedup_merges_diagonal() {
        let edges = collect_edges(&quad()).unwrap();
        assert_eq!(edges.len(), 5);
        let diagonal = edges
            .iter()
            .find(|e| e.v0 == 0 && e.v1 == 2)
            .expect("shared diagonal present");
        assert_eq!(diagonal.f0, 0);
        assert_eq!(diagonal.f1, Some(1));
        assert_eq!(edges.iter().filter(|e| e.f1.is_none()).count(), 4);
    }

    #[test]
    fn test_nonmanifold_rejected() {
        // Three triangles fanning around the (0, 1) edge.
        let shapes = vec![Shape::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, -1.0, 0.0),
            ],
            vec![0, 1, 2, 0, 1, 3, 0, 1, 4],
            0,
        )];
        assert!(matches!(
            collect_edges(&shapes),
            Err(EdgeError::NonManifold { v0: 0, v1: 1, .. })
        ));
    }

    #[test]
    fn test_boundary_edge_is_always_silhouette() {
        let shapes = single_triangle();
        let edges = collect_edges(&shapes).unwrap();
        for q in [
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(3.0, -2.0, -1.0),
            Vector3::new(0.3, 0.3, 0.0),
        ] {
            assert!(is_silhouette(&shapes, q, &edges[0]));
        }
    }

    #[test]
    fn test_coplanar_interior_edge_is_never_silhouette() {
        let shapes = quad();
        let edges = collect_edges(&shapes).unwrap();
        let diagonal = edges.iter().find(|e| e.f1.is_some()).unwrap();
        for q in [
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(2.0, -1.0, -3.0),
            Vector3::new(0.5, 0.5, 1e-8),
        ] {
            assert!(!is_silhouette(&shapes, q, diagonal));
        }
    }

    #[test]
    fn test_right_angle_fold_silhouette_and_dihedral() {
        // Two faces meeting at ninety degrees along the y axis.
        let shapes = vec![Shape::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 1.0),
            ],
            vec![0, 2, 1, 0, 1, 3],
            0,
        )];
        let edges = collect_edges(&shapes).unwrap();
        let fold = edges.iter().find(|e| e.f1.is_some()).unwrap();
        assert_eq!((fold.v0, fold.v1), (0, 1));
        assert_relative_eq!(
            exterior_dihedral_angle(&shapes, fold),
            FRAC_PI_2,
            epsilon = 1e-5
        );
        // Beside one face, only that face is front-facing.
        assert!(is_silhouette(&shapes, Vector3::new(1.0, 0.5, -1.0), fold));
        // In front of both faces, or behind both, the fold is interior.
        assert!(!is_silhouette(&shapes, Vector3::new(1.0, 0.5, 1.0), fold));
        assert!(!is_silhouette(&shapes, Vector3::new(-1.0, 0.5, -1.0), fold));
    }
}
