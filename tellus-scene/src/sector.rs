use std::f64::consts::{FRAC_PI_2, PI};

use crate::lat_lon::LatLon;

/// A rectangular geographic region, bounds in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sector {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Sector {
    pub const FULL_SPHERE: Sector = Sector {
        min_latitude: -FRAC_PI_2,
        max_latitude: FRAC_PI_2,
        min_longitude: -PI,
        max_longitude: PI,
    };

    pub fn new(
        min_latitude: f64,
        max_latitude: f64,
        min_longitude: f64,
        max_longitude: f64,
    ) -> Self {
        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    pub fn from_degrees(
        min_latitude: f64,
        max_latitude: f64,
        min_longitude: f64,
        max_longitude: f64,
    ) -> Self {
        Self {
            min_latitude: min_latitude.to_radians(),
            max_latitude: max_latitude.to_radians(),
            min_longitude: min_longitude.to_radians(),
            max_longitude: max_longitude.to_radians(),
        }
    }

    pub fn delta_latitude(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn delta_longitude(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }

    pub fn centroid(&self) -> LatLon {
        LatLon::new(
            (self.min_latitude + self.max_latitude) / 2.0,
            (self.min_longitude + self.max_longitude) / 2.0,
        )
    }

    pub fn contains(&self, location: &LatLon) -> bool {
        location.latitude >= self.min_latitude
            && location.latitude <= self.max_latitude
            && location.longitude >= self.min_longitude
            && location.longitude <= self.max_longitude
    }

    /// True when the two sectors overlap, touching edges included.
    pub fn intersects(&self, other: &Sector) -> bool {
        self.min_latitude <= other.max_latitude
            && self.max_latitude >= other.min_latitude
            && self.min_longitude <= other.max_longitude
            && self.max_longitude >= other.min_longitude
    }

    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        if !self.intersects(other) {
            return None;
        }
        Some(Sector::new(
            self.min_latitude.max(other.min_latitude),
            self.max_latitude.min(other.max_latitude),
            self.min_longitude.max(other.min_longitude),
            self.max_longitude.min(other.max_longitude),
        ))
    }

    /// The four quadrants, ordered southwest, southeast, northwest, northeast.
    pub fn subdivide(&self) -> [Sector; 4] {
        let mid_lat = (self.min_latitude + self.max_latitude) / 2.0;
        let mid_lon = (self.min_longitude + self.max_longitude) / 2.0;
        [
            Sector::new(self.min_latitude, mid_lat, self.min_longitude, mid_lon),
            Sector::new(self.min_latitude, mid_lat, mid_lon, self.max_longitude),
            Sector::new(mid_lat, self.max_latitude, self.min_longitude, mid_lon),
            Sector::new(mid_lat, self.max_latitude, mid_lon, self.max_longitude),
        ]
    }

    /// Corner locations followed by the centroid.
    pub fn reference_locations(&self) -> [LatLon; 5] {
        [
            LatLon::new(self.min_latitude, self.min_longitude),
            LatLon::new(self.min_latitude, self.max_longitude),
            LatLon::new(self.max_latitude, self.min_longitude),
            LatLon::new(self.max_latitude, self.max_longitude),
            self.centroid(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects() {
        let a = Sector::from_degrees(0.0, 10.0, 0.0, 10.0);
        let b = Sector::from_degrees(5.0, 15.0, 5.0, 15.0);
        let c = Sector::from_degrees(20.0, 30.0, 20.0, 30.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        // touching edges count as intersecting
        let d = Sector::from_degrees(10.0, 20.0, 0.0, 10.0);
        assert!(a.intersects(&d));
    }

    #[test]
    fn test_intersection() {
        let a = Sector::from_degrees(0.0, 10.0, 0.0, 10.0);
        let b = Sector::from_degrees(5.0, 15.0, 5.0, 15.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Sector::from_degrees(5.0, 10.0, 5.0, 10.0));
        let c = Sector::from_degrees(20.0, 30.0, 20.0, 30.0);
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_subdivide_covers_parent() {
        let s = Sector::from_degrees(-45.0, 45.0, -90.0, 0.0);
        let q = s.subdivide();
        assert_eq!(q[0].min_latitude, s.min_latitude);
        assert_eq!(q[3].max_latitude, s.max_latitude);
        assert_eq!(q[0].min_longitude, s.min_longitude);
        assert_eq!(q[3].max_longitude, s.max_longitude);
        for quad in &q {
            assert!((quad.delta_latitude() - s.delta_latitude() / 2.0).abs() < 1e-12);
            assert!((quad.delta_longitude() - s.delta_longitude() / 2.0).abs() < 1e-12);
        }
    }
}
