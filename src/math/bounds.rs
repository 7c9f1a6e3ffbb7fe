use crate::math::{Float, Vector3};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds3 {
    pub min: Vector3,
    pub max: Vector3,
}

impl Default for Bounds3 {
    fn default() -> Self {
        Self::new()
    }
}

impl Bounds3 {
    /// Creates an empty box that any union will replace.
    #[inline]
    pub fn new() -> Self {
        Self {
            min: Vector3::new(Float::MAX, Float::MAX, Float::MAX),
            max: Vector3::new(Float::MIN, Float::MIN, Float::MIN),
        }
    }

    #[inline]
    pub fn from_point(p: Vector3) -> Self {
        Self { min: p, max: p }
    }

    #[inline]
    pub fn union_point(&self, p: Vector3) -> Self {
        Self {
            min: self.min.zip_map(&p, Float::min),
            max: self.max.zip_map(&p, Float::max),
        }
    }

    #[inline]
    pub fn union(&self, rhs: &Bounds3) -> Self {
        Self {
            min: self.min.zip_map(&rhs.min, Float::min),
            max: self.max.zip_map(&rhs.max, Float::max),
        }
    }

    /// Position of the given corner (bit 0 selects x, bit 1 y, bit 2 z).
    #[inline]
    pub fn corner(&self, corner: u8) -> Vector3 {
        Vector3::new(
            if corner & 1 == 0 { self.min.x } else { self.max.x },
            if corner & 2 == 0 { self.min.y } else { self.max.y },
            if corner & 4 == 0 { self.min.z } else { self.max.z },
        )
    }

    #[inline]
    pub fn diagonal(&self) -> Vector3 {
        self.max - self.min
    }

    #[inline]
    pub fn centroid(&self) -> Vector3 {
        (self.min + self.max) * 0.5
    }

    /// Sphere that encloses the box.
    #[inline]
    pub fn bounding_sphere(&self) -> (Vector3, Float) {
        let center = self.centroid();
        (center, (self.max - center).norm())
    }

    #[inline]
    pub fn inside(&self, p: Vector3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Squared distance from `p` to the box; zero for points inside.
    pub fn distance_squared(&self, p: Vector3) -> Float {
        let dx = (self.min.x - p.x).max(p.x - self.max.x).max(0.0);
        let dy = (self.min.y - p.y).max(p.y - self.max.y).max(0.0);
        let dz = (self.min.z - p.z).max(p.z - self.max.z).max(0.0);
        dx * dx + dy * dy + dz * dz
    }

    /// Index of the widest axis of the box.
    pub fn max_dim(&self) -> usize {
        let d = self.diagonal();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }
}
