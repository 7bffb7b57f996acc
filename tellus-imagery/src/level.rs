use std::sync::atomic::{AtomicU64, Ordering};

use tellus_scene::LatLon;

use crate::tile_key::TileKey;

/// One resolution tier of a level set. Immutable after construction except
/// for the expiry timestamp.
pub struct Level {
    level_number: u32,
    tile_delta: LatLon,
    texel_size: f64,
    tile_width: u32,
    tile_height: u32,
    format_suffix: String,
    dataset: String,
    empty: bool,
    expiry_time_ms: AtomicU64,
}

impl Level {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        level_number: u32,
        tile_delta: LatLon,
        tile_width: u32,
        tile_height: u32,
        format_suffix: String,
        dataset: String,
        empty: bool,
    ) -> Self {
        Self {
            level_number,
            tile_delta,
            // ground resolution in radians of latitude per texel
            texel_size: tile_delta.latitude / tile_height as f64,
            tile_width,
            tile_height,
            format_suffix,
            dataset,
            empty,
            expiry_time_ms: AtomicU64::new(0),
        }
    }

    pub fn level_number(&self) -> u32 {
        self.level_number
    }

    pub fn tile_delta(&self) -> LatLon {
        self.tile_delta
    }

    pub fn texel_size(&self) -> f64 {
        self.texel_size
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn format_suffix(&self) -> &str {
        &self.format_suffix
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// A level declared but deliberately unpopulated; no requests are issued
    /// for its tiles and subdivision skips straight past it.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Epoch milliseconds beyond which cached data for this level is stale.
    /// Zero means no expiry.
    pub fn expiry_time_ms(&self) -> u64 {
        self.expiry_time_ms.load(Ordering::Relaxed)
    }

    pub fn set_expiry_time_ms(&self, expiry_time_ms: u64) {
        self.expiry_time_ms.store(expiry_time_ms, Ordering::Relaxed);
    }

    /// Canonical cache-relative path for a tile of this level, derived only
    /// from the dataset name and the tile address.
    pub fn tile_cache_path(&self, key: &TileKey) -> String {
        format!(
            "{}/{}/{}/{}_{}{}",
            self.dataset, key.level, key.row, key.row, key.column, self.format_suffix
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level() -> Level {
        Level::new(
            2,
            LatLon::from_degrees(9.0, 9.0),
            512,
            512,
            ".png".to_string(),
            "earth/bmng".to_string(),
            false,
        )
    }

    #[test]
    fn test_texel_size() {
        let level = level();
        assert!((level.texel_size() - 9.0_f64.to_radians() / 512.0).abs() < 1e-15);
    }

    #[test]
    fn test_tile_cache_path_deterministic() {
        let level = level();
        let key = TileKey::new(2, 5, 11);
        assert_eq!(level.tile_cache_path(&key), "earth/bmng/2/5/5_11.png");
        assert_eq!(level.tile_cache_path(&key), level.tile_cache_path(&key));
    }

    #[test]
    fn test_expiry_mutation() {
        let level = level();
        assert_eq!(level.expiry_time_ms(), 0);
        level.set_expiry_time_ms(1_700_000_000_000);
        assert_eq!(level.expiry_time_ms(), 1_700_000_000_000);
    }
}
