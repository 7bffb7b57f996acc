use bevy::math::DVec3;

use crate::{lat_lon::point_on_sphere, sector::Sector};

/// Bounding sphere around a sector on a globe of the given radius. Coarse on
/// purpose; it only has to be conservative for frustum and distance tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extent {
    center: DVec3,
    radius: f64,
}

impl Extent {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn from_sector(sector: &Sector, globe_radius: f64) -> Self {
        let points: Vec<DVec3> = sector
            .reference_locations()
            .iter()
            .map(|loc| point_on_sphere(loc, globe_radius))
            .collect();

        let mut center = DVec3::ZERO;
        for p in &points {
            center += *p;
        }
        center /= points.len() as f64;

        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0_f64, f64::max);

        Self { center, radius }
    }

    pub fn center(&self) -> DVec3 {
        self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn distance_to_squared(&self, point: DVec3) -> f64 {
        self.center.distance_squared(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_contains_corners() {
        let sector = Sector::from_degrees(-10.0, 10.0, 30.0, 50.0);
        let extent = Extent::from_sector(&sector, 6371.0);
        for loc in sector.reference_locations() {
            let p = point_on_sphere(&loc, 6371.0);
            assert!(p.distance(extent.center()) <= extent.radius() + 1e-9);
        }
    }

    #[test]
    fn test_extent_deterministic() {
        let sector = Sector::from_degrees(0.0, 36.0, 0.0, 36.0);
        let a = Extent::from_sector(&sector, 1.0);
        let b = Extent::from_sector(&sector, 1.0);
        assert_eq!(a, b);
    }
}
