use std::f64::consts::{PI, TAU};
use std::sync::Arc;
use std::time::Duration;

use tellus_scene::{LatLon, Sector};

use crate::absent_resource_list::AbsentResourceList;
use crate::level::Level;
use crate::tile_key::TileKey;

/// A misconfigured or misaddressed tile pyramid. These are construction-time
/// failures; none of them represents a runtime condition worth retrying.
#[derive(thiserror::Error, Debug)]
pub enum LevelSetError {
    #[error("a level set needs at least one level")]
    NoLevels,
    #[error("{empty} empty levels leaves no populated level out of {total}")]
    AllLevelsEmpty { empty: u32, total: u32 },
    #[error("level zero tile delta must be positive, got ({0}, {1})")]
    NonPositiveTileDelta(f64, f64),
    #[error("tile width and height must be positive")]
    ZeroTileDimension,
    #[error("location {location} lies outside the tile grid origin {origin}")]
    AddressOutOfRange { location: f64, origin: f64 },
}

/// Construction parameters for a [`LevelSet`].
pub struct LevelSetParams {
    pub dataset: String,
    pub sector: Sector,
    pub tile_origin: LatLon,
    pub level_zero_tile_delta: LatLon,
    pub num_levels: u32,
    pub num_empty_levels: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub format_suffix: String,
    pub max_absent_attempts: u32,
    pub min_absent_check_interval: Duration,
}

/// The quadtree's resolution pyramid: an ordered sequence of levels from the
/// coarsest (level 0) to the final level, each halving the tile delta of the
/// previous one, plus the per-tile absent bookkeeping shared with retrieval
/// workers.
pub struct LevelSet {
    sector: Sector,
    tile_origin: LatLon,
    levels: Vec<Level>,
    absent: Arc<AbsentResourceList>,
}

impl LevelSet {
    pub fn new(params: LevelSetParams) -> Result<Self, LevelSetError> {
        if params.num_levels == 0 {
            return Err(LevelSetError::NoLevels);
        }
        if params.num_empty_levels >= params.num_levels {
            return Err(LevelSetError::AllLevelsEmpty {
                empty: params.num_empty_levels,
                total: params.num_levels,
            });
        }
        if params.level_zero_tile_delta.latitude <= 0.0
            || params.level_zero_tile_delta.longitude <= 0.0
        {
            return Err(LevelSetError::NonPositiveTileDelta(
                params.level_zero_tile_delta.latitude,
                params.level_zero_tile_delta.longitude,
            ));
        }
        if params.tile_width == 0 || params.tile_height == 0 {
            return Err(LevelSetError::ZeroTileDimension);
        }

        let mut levels = Vec::with_capacity(params.num_levels as usize);
        for n in 0..params.num_levels {
            let divisor = 2f64.powi(n as i32);
            let delta = LatLon::new(
                params.level_zero_tile_delta.latitude / divisor,
                params.level_zero_tile_delta.longitude / divisor,
            );
            levels.push(Level::new(
                n,
                delta,
                params.tile_width,
                params.tile_height,
                params.format_suffix.clone(),
                params.dataset.clone(),
                n < params.num_empty_levels,
            ));
        }

        Ok(Self {
            sector: params.sector,
            tile_origin: params.tile_origin,
            levels,
            absent: Arc::new(AbsentResourceList::new(
                params.max_absent_attempts,
                params.min_absent_check_interval,
            )),
        })
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn tile_origin(&self) -> LatLon {
        self.tile_origin
    }

    pub fn num_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level(&self, level_number: u32) -> Option<&Level> {
        self.levels.get(level_number as usize)
    }

    pub fn first_level(&self) -> &Level {
        &self.levels[0]
    }

    pub fn last_level(&self) -> &Level {
        &self.levels[self.levels.len() - 1]
    }

    pub fn is_final_level(&self, level_number: u32) -> bool {
        level_number as usize >= self.levels.len() - 1
    }

    pub fn is_level_empty(&self, level_number: u32) -> bool {
        self.level(level_number).map_or(false, Level::is_empty)
    }

    /// Applies a dataset-wide expiry time to every level.
    pub fn set_expiry_time_ms(&self, expiry_time_ms: u64) {
        for level in &self.levels {
            level.set_expiry_time_ms(expiry_time_ms);
        }
    }

    // ---- absent-resource delegation -------------------------------------

    pub fn absent_list(&self) -> &Arc<AbsentResourceList> {
        &self.absent
    }

    pub fn is_resource_absent(&self, key: TileKey) -> bool {
        self.absent.is_resource_absent(key)
    }

    pub fn mark_resource_absent(&self, key: TileKey) {
        self.absent.mark_resource_absent(key)
    }

    pub fn unmark_resource_absent(&self, key: TileKey) {
        self.absent.unmark_resource_absent(key)
    }

    // ---- addressing ------------------------------------------------------

    /// The coarsest non-empty level whose texel size does not exceed the
    /// target resolution (radians of latitude per texel), preferring the
    /// closer of the two bracketing levels.
    pub fn level_for_resolution(&self, resolution: f64) -> &Level {
        let mut target = self.last_level();
        for level in &self.levels[..self.levels.len() - 1] {
            if level.is_empty() {
                continue;
            }
            if level.texel_size() > resolution {
                continue;
            }
            target = level;
            break;
        }

        if target.level_number() != 0 && !self.is_level_empty(target.level_number() - 1) {
            let coarser = &self.levels[(target.level_number() - 1) as usize];
            let d_coarser = (coarser.texel_size() - resolution).abs();
            let d_target = (target.texel_size() - resolution).abs();
            if d_coarser < d_target {
                target = coarser;
            }
        }

        target
    }

    /// Row index of the tile containing `latitude` on a grid of `delta`-sized
    /// tiles anchored at `origin`. Pure arithmetic; identical inputs always
    /// produce identical indices.
    pub fn compute_row(delta: f64, latitude: f64, origin: f64) -> Result<u32, LevelSetError> {
        let span = latitude - origin;
        if span < 0.0 || span > PI {
            return Err(LevelSetError::AddressOutOfRange {
                location: latitude,
                origin,
            });
        }
        let mut row = (span / delta).floor() as i64;
        // a latitude on the grid's north edge belongs to the last row
        if span == PI {
            row -= 1;
        }
        Ok(row as u32)
    }

    /// Column counterpart of [`Self::compute_row`].
    pub fn compute_column(delta: f64, longitude: f64, origin: f64) -> Result<u32, LevelSetError> {
        let span = longitude - origin;
        if span < 0.0 || span > TAU {
            return Err(LevelSetError::AddressOutOfRange {
                location: longitude,
                origin,
            });
        }
        let mut column = (span / delta).floor() as i64;
        // a longitude on the grid's east edge belongs to the last column
        if span == TAU {
            column -= 1;
        }
        Ok(column as u32)
    }

    /// The fixed geographic sector addressed by a tile key.
    pub fn compute_sector_for_key(&self, key: &TileKey) -> Option<Sector> {
        let level = self.level(key.level)?;
        let delta = level.tile_delta();
        let min_latitude = self.tile_origin.latitude + key.row as f64 * delta.latitude;
        let min_longitude = self.tile_origin.longitude + key.column as f64 * delta.longitude;
        Some(Sector::new(
            min_latitude,
            min_latitude + delta.latitude,
            min_longitude,
            min_longitude + delta.longitude,
        ))
    }

    /// Keys of every tile of the first level intersecting the set's sector.
    pub fn top_level_keys(&self) -> Result<Vec<TileKey>, LevelSetError> {
        let sector = self.sector;
        self.keys_in_sector(&sector, self.first_level().level_number())
    }

    /// Keys of all tiles of a level intersecting `sector`, row-major from the
    /// southwest corner.
    pub fn keys_in_sector(
        &self,
        sector: &Sector,
        level_number: u32,
    ) -> Result<Vec<TileKey>, LevelSetError> {
        let Some(level) = self.level(level_number) else {
            return Ok(Vec::new());
        };
        let Some(bounds) = self.sector.intersection(sector) else {
            return Ok(Vec::new());
        };
        let delta = level.tile_delta();
        let origin = self.tile_origin;

        let first_row = Self::compute_row(delta.latitude, bounds.min_latitude, origin.latitude)?;
        let last_row = Self::compute_row(delta.latitude, bounds.max_latitude, origin.latitude)?;
        let first_col =
            Self::compute_column(delta.longitude, bounds.min_longitude, origin.longitude)?;
        let last_col =
            Self::compute_column(delta.longitude, bounds.max_longitude, origin.longitude)?;

        let mut keys = Vec::new();
        for row in first_row..=last_row {
            for column in first_col..=last_col {
                keys.push(TileKey::new(level_number, row, column));
            }
        }
        Ok(keys)
    }

    /// Number of tiles of a level intersecting `sector`.
    pub fn tile_count_in_sector(
        &self,
        sector: &Sector,
        level_number: u32,
    ) -> Result<u64, LevelSetError> {
        Ok(self.keys_in_sector(sector, level_number)?.len() as u64)
    }
}
