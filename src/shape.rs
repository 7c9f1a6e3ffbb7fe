use crate::math::Vector3;

/// An indexed triangle mesh.
#[derive(Debug, Clone)]
pub struct Shape {
    pub vertices: Vec<Vector3>,
    /// Flat triangle index array, three entries per triangle.
    pub indices: Vec<usize>,
    pub material_id: usize,
}

impl Shape {
    pub fn new(vertices: Vec<Vector3>, indices: Vec<usize>, material_id: usize) -> Shape {
        debug_assert!(indices.len() % 3 == 0);
        debug_assert!(indices.iter().all(|&i| i < vertices.len()));
        Shape { vertices, indices, material_id }
    }

    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn triangle(&self, tri: usize) -> (usize, usize, usize) {
        (
            self.indices[3 * tri],
            self.indices[3 * tri + 1],
            self.indices[3 * tri + 2],
        )
    }

    #[inline]
    pub fn vertex(&self, index: usize) -> Vector3 {
        self.vertices[index]
    }

    /// Unit geometric normal of a face, oriented by its winding.
    pub fn face_normal(&self, tri: usize) -> Vector3 {
        let (i0, i1, i2) = self.triangle(tri);
        let p0 = self.vertices[i0];
        (self.vertices[i1] - p0)
            .cross(&(self.vertices[i2] - p0))
            .normalize()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::math::Vector3;

    #[test]
    fn test_face_normal_follows_winding() {
        let shape = Shape::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            vec![0, 1, 2],
            0,
        );
        assert_relative_eq!(shape.face_normal(0), Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-6);
    }
}
