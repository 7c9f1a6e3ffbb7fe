//! Silhouette-edge sampling for differentiable rendering of triangle-mesh
//! scenes.
//!
//! A rendered image is discontinuous across silhouette edges, so pixel-level
//! automatic differentiation misses the contribution those discontinuities
//! make to geometry and camera gradients. This crate samples the two
//! boundary integrals explicitly: *primary* edges, silhouettes seen from the
//! camera, and *secondary* edges, silhouettes seen from shading points
//! inside the scene. For each sample it emits a pair of rays straddling the
//! edge together with signed throughputs; once the outer pipeline reports
//! the radiance carried by each pair, the derivative propagators turn the
//! differences into vertex and camera gradients with the appropriate
//! Jacobians.
//!
//! [`EdgeSampler::build`] deduplicates mesh edges and builds the sampling
//! distributions once per scene; [`sample_primary_edges`] and
//! [`sample_secondary_edges`] run once per frame sample, and the
//! `update_*`/`compute_*`/`accumulate_*` passes post-process what the outer
//! pipeline traced. All per-sample failure modes yield zeroed records
//! rather than errors.

pub mod camera;
pub mod edge;
pub mod interaction;
pub mod ltc;
pub mod material;
pub mod math;
pub mod scene;
pub mod shape;

pub use camera::{clip_line_screen, Camera, DCamera};
pub use edge::primary::{
    compute_primary_edge_derivatives, sample_primary_edges, update_primary_edge_weights,
    PrimaryEdgeRecord, PrimaryEdgeSample,
};
pub use edge::secondary::{
    accumulate_secondary_edge_derivatives, sample_secondary_edges,
    update_secondary_edge_weights, SecondaryEdgeRecord, SecondaryEdgeSample,
};
pub use edge::{
    exterior_dihedral_angle, is_silhouette, Edge, EdgeError, EdgeSampler, EdgeSamplerOptions,
};
pub use interaction::{Intersection, SurfacePoint};
pub use material::{luminance, Material};
pub use math::{Float, Ray, RayDifferential, Vector2, Vector3};
pub use scene::{ChannelInfo, DVertex, Scene};
pub use shape::Shape;
