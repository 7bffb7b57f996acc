use bevy::math::DVec3;
use serde::Deserialize;

/// A geographic location in radians.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLon {
    pub const ZERO: LatLon = LatLon {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: latitude.to_radians(),
            longitude: longitude.to_radians(),
        }
    }

    pub fn mid_point(a: &LatLon, b: &LatLon) -> Self {
        Self {
            latitude: (a.latitude + b.latitude) / 2.0,
            longitude: (a.longitude + b.longitude) / 2.0,
        }
    }
}

/// Cartesian point for a location on a sphere of the given radius, with the
/// z axis through the poles and the x axis through (0, 0).
pub fn point_on_sphere(location: &LatLon, radius: f64) -> DVec3 {
    let cos_lat = location.latitude.cos();
    DVec3::new(
        radius * cos_lat * location.longitude.cos(),
        radius * cos_lat * location.longitude.sin(),
        radius * location.latitude.sin(),
    )
}
