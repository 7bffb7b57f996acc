use bevy::math::DVec3;

use tellus_scene::{point_on_sphere, Extent, Sector};

use crate::level_set::LevelSet;
use crate::tile_key::TileKey;

/// Cartesian geometry derived from a tile's sector for one globe radius.
struct TileGeometry {
    globe_radius: f64,
    extent: Extent,
    reference_points: [DVec3; 5],
}

/// One quadtree tile as the selector sees it: a fixed address and sector plus
/// lazily stamped Cartesian geometry.
pub struct Tile {
    key: TileKey,
    sector: Sector,
    geometry: Option<TileGeometry>,
}

impl Tile {
    pub fn new(key: TileKey, sector: Sector) -> Self {
        Self {
            key,
            sector,
            geometry: None,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    /// Stamps the tile's extent and reference points for the given globe
    /// radius, recomputing only when the radius changed since the last stamp.
    pub fn update_geometry(&mut self, globe_radius: f64) {
        let stale = match &self.geometry {
            Some(g) => g.globe_radius != globe_radius,
            None => true,
        };
        if stale {
            let locations = self.sector.reference_locations();
            let mut reference_points = [DVec3::ZERO; 5];
            for (point, location) in reference_points.iter_mut().zip(locations.iter()) {
                *point = point_on_sphere(location, globe_radius);
            }
            self.geometry = Some(TileGeometry {
                globe_radius,
                extent: Extent::from_sector(&self.sector, globe_radius),
                reference_points,
            });
        }
    }

    /// Bounding extent for the most recent stamp. Callers must have stamped
    /// the geometry first.
    pub fn extent(&self) -> Option<&Extent> {
        self.geometry.as_ref().map(|g| &g.extent)
    }

    /// Smallest squared distance from the eye to any of the tile's reference
    /// points, the quantity the subdivision criterion compares against the
    /// on-screen texel size.
    pub fn min_distance_squared_to(&self, eye: DVec3) -> Option<f64> {
        let geometry = self.geometry.as_ref()?;
        Some(
            geometry
                .reference_points
                .iter()
                .map(|p| p.distance_squared(eye))
                .fold(f64::INFINITY, f64::min),
        )
    }

    /// Squared eye distance to the tile's extent center; retrieval priority,
    /// lower values first.
    pub fn priority_distance_squared(&self, eye: DVec3) -> Option<f64> {
        self.geometry
            .as_ref()
            .map(|g| g.extent.distance_to_squared(eye))
    }

    /// The four child tiles at the next level, sectors paired with child keys
    /// in southwest, southeast, northwest, northeast order. Children falling
    /// entirely outside the level set's coverage are dropped.
    pub fn subdivide(&self, level_set: &LevelSet) -> Vec<Tile> {
        let sectors = self.sector.subdivide();
        let keys = self.key.child_keys();
        keys.iter()
            .zip(sectors.iter())
            .filter(|(_, sector)| sector.intersects(level_set.sector()))
            .map(|(key, sector)| Tile::new(*key, *sector))
            .collect()
    }
}

/// A tile the selector chose to draw this frame, together with the address of
/// the texture to sample. `texture` equals `key` when the tile's own texture
/// is resident, otherwise it names the nearest resident ancestor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectedTile {
    pub key: TileKey,
    pub sector: Sector,
    pub texture: TileKey,
}

impl SelectedTile {
    pub fn is_fallback(&self) -> bool {
        self.texture != self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tellus_scene::LatLon;

    use crate::level_set::LevelSetParams;

    fn level_set() -> LevelSet {
        LevelSet::new(LevelSetParams {
            dataset: "earth/test".to_string(),
            sector: Sector::FULL_SPHERE,
            tile_origin: LatLon::from_degrees(-90.0, -180.0),
            level_zero_tile_delta: LatLon::from_degrees(36.0, 36.0),
            num_levels: 3,
            num_empty_levels: 0,
            tile_width: 512,
            tile_height: 512,
            format_suffix: ".png".to_string(),
            max_absent_attempts: 3,
            min_absent_check_interval: Duration::from_secs(600),
        })
        .unwrap()
    }

    #[test]
    fn test_geometry_stamped_once_per_radius() {
        let mut tile = Tile::new(
            TileKey::new(0, 2, 5),
            Sector::from_degrees(-18.0, 18.0, 0.0, 36.0),
        );
        assert!(tile.extent().is_none());
        tile.update_geometry(6371.0);
        let extent = *tile.extent().unwrap();
        tile.update_geometry(6371.0);
        assert_eq!(*tile.extent().unwrap(), extent);
        tile.update_geometry(1.0);
        assert_ne!(*tile.extent().unwrap(), extent);
    }

    #[test]
    fn test_subdivide_keys_match_sectors() {
        let set = level_set();
        let parent_key = TileKey::new(0, 2, 5);
        let parent_sector = set.compute_sector_for_key(&parent_key).unwrap();
        let tile = Tile::new(parent_key, parent_sector);
        let children = tile.subdivide(&set);
        assert_eq!(children.len(), 4);
        for child in &children {
            let expected = set.compute_sector_for_key(&child.key()).unwrap();
            assert!((child.sector().min_latitude - expected.min_latitude).abs() < 1e-12);
            assert!((child.sector().min_longitude - expected.min_longitude).abs() < 1e-12);
        }
    }

    #[test]
    fn test_min_distance_at_reference_point() {
        let mut tile = Tile::new(
            TileKey::new(0, 2, 5),
            Sector::from_degrees(-18.0, 18.0, 0.0, 36.0),
        );
        tile.update_geometry(1.0);
        // the eye sits exactly on the sector centroid's surface point
        let eye = point_on_sphere(&LatLon::from_degrees(0.0, 18.0), 1.0);
        let d = tile.min_distance_squared_to(eye).unwrap();
        assert!(d < 1e-20);
    }

    #[test]
    fn test_fallback_flag() {
        let own = SelectedTile {
            key: TileKey::new(2, 4, 4),
            sector: Sector::from_degrees(0.0, 9.0, 0.0, 9.0),
            texture: TileKey::new(2, 4, 4),
        };
        assert!(!own.is_fallback());
        let borrowed = SelectedTile {
            texture: TileKey::new(1, 2, 2),
            ..own
        };
        assert!(borrowed.is_fallback());
    }
}
