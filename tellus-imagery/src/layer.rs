use std::sync::Arc;

use tellus_jobs::CancelFlag;

use crate::config::{ConfigError, TiledImageLayerConfig, UrlBuilder};
use crate::level_set::LevelSet;
use crate::retrieval::{RetrievalQueue, RetrieveTileJob, TileLoadOutcome, TileLoadStatus};
use crate::services::LayerServices;
use crate::tile::{SelectedTile, Tile};
use crate::tile_key::TileKey;
use crate::visibility::FrameContext;

/// A tiled image layer: walks its quadtree once per frame to pick the tiles
/// worth drawing, and feeds the retrieval queue for the ones whose textures
/// are not resident yet.
pub struct TiledImageLayer {
    name: String,
    level_set: Arc<LevelSet>,
    url_builder: Box<dyn UrlBuilder>,
    services: LayerServices,
    queue: RetrievalQueue,
    top_level_tiles: Vec<Tile>,
    selected: Vec<SelectedTile>,
    detail_hint: f64,
    detail_hint_origin: f64,
    retain_level_zero_tiles: bool,
    max_concurrent_retrievals: usize,
    stale_request_limit: std::time::Duration,
    cancel: CancelFlag,
}

impl TiledImageLayer {
    pub fn from_config(
        config: &TiledImageLayerConfig,
        services: LayerServices,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let level_set = LevelSet::new(config.level_set_params())?;
        level_set.set_expiry_time_ms(config.expiry_time_ms);
        let url_builder = config.service.clone().into_url_builder()?;

        let top_level_tiles: Vec<Tile> = level_set
            .top_level_keys()?
            .into_iter()
            .filter_map(|key| {
                level_set
                    .compute_sector_for_key(&key)
                    .map(|sector| Tile::new(key, sector))
            })
            .collect();

        let layer = Self {
            name: config.name.clone(),
            level_set: Arc::new(level_set),
            url_builder,
            services,
            queue: RetrievalQueue::new(),
            top_level_tiles,
            selected: Vec::new(),
            detail_hint: config.detail_hint,
            detail_hint_origin: config.detail_hint_origin,
            retain_level_zero_tiles: config.retain_level_zero_tiles,
            max_concurrent_retrievals: config.max_concurrent_retrievals,
            stale_request_limit: config.stale_request_limit(),
            cancel: CancelFlag::new(),
        };

        if config.force_level_zero_loads {
            for tile in &layer.top_level_tiles {
                // ahead of any camera, so the best possible priority
                layer.queue.enqueue(tile.key(), 0.0);
            }
        }

        Ok(layer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level_set(&self) -> &Arc<LevelSet> {
        &self.level_set
    }

    pub fn services(&self) -> &LayerServices {
        &self.services
    }

    /// The tiles chosen by the last [`Self::assemble_tiles`] call.
    pub fn selected_tiles(&self) -> &[SelectedTile] {
        &self.selected
    }

    /// Walks the quadtree for the current frame. Every visible tile either
    /// meets the render criteria and is selected, or is subdivided with the
    /// nearest resident ancestor texture carried down as a fallback. Requests
    /// for missing textures accumulate in the queue as a side effect.
    pub fn assemble_tiles(&mut self, frame: &FrameContext) -> &[SelectedTile] {
        self.selected.clear();
        let mut tiles = std::mem::take(&mut self.top_level_tiles);
        for tile in &mut tiles {
            tile.update_geometry(frame.globe_radius);
            if self.is_tile_visible(frame, tile) {
                self.add_tile_or_descendants(frame, tile, None);
            }
        }
        self.top_level_tiles = tiles;
        &self.selected
    }

    fn add_tile_or_descendants(
        &mut self,
        frame: &FrameContext,
        tile: &mut Tile,
        fallback: Option<TileKey>,
    ) {
        let level_number = tile.key().level;
        let level_empty = self.level_set.is_level_empty(level_number);
        let final_level = self.level_set.is_final_level(level_number);

        if final_level || !self.must_subdivide(frame, tile) {
            // an empty level has nothing to draw or fetch; its descendants
            // only come into play once the view demands subdivision
            if !level_empty {
                self.add_tile(frame, tile, fallback);
            }
            return;
        }

        // a resident texture here serves as the fallback for descendants
        let fallback = if !level_empty && self.services.cache.contains(tile.key()) {
            Some(tile.key())
        } else {
            if !level_empty && level_number == 0 {
                // cold start: no ancestor exists yet, so get the coarse
                // texture coming while descendants are selected
                self.request_tile(frame, tile);
            }
            fallback
        };

        let mut children = tile.subdivide(&self.level_set);
        for child in &mut children {
            child.update_geometry(frame.globe_radius);
            if self.is_tile_visible(frame, child) {
                self.add_tile_or_descendants(frame, child, fallback);
            }
        }
    }

    fn add_tile(&mut self, frame: &FrameContext, tile: &Tile, fallback: Option<TileKey>) {
        let key = tile.key();
        if self.services.cache.contains(key) {
            self.selected.push(SelectedTile {
                key,
                sector: *tile.sector(),
                texture: key,
            });
            if self.is_texture_expired(frame, key) {
                self.request_tile(frame, tile);
            }
        } else {
            self.request_tile(frame, tile);
            if let Some(texture) = fallback {
                self.selected.push(SelectedTile {
                    key,
                    sector: *tile.sector(),
                    texture,
                });
            }
        }
    }

    fn is_tile_visible(&self, frame: &FrameContext, tile: &Tile) -> bool {
        if frame.view.is_sector_visible(tile.sector()) {
            return true;
        }
        tile.extent()
            .map_or(false, |extent| frame.view.intersects_frustum(extent))
    }

    /// A tile must subdivide while its texel footprint, scaled by the detail
    /// factor, still exceeds the eye's distance to the tile. Equality keeps
    /// the tile, so the walk bottoms out deterministically.
    fn must_subdivide(&self, frame: &FrameContext, tile: &Tile) -> bool {
        let Some(level) = self.level_set.level(tile.key().level) else {
            return false;
        };
        let Some(distance_squared) = tile.min_distance_squared_to(frame.eye_point()) else {
            return false;
        };
        let texel_size_m = level.texel_size() * frame.globe_radius;
        let scale = 10f64.powf(self.detail_hint_origin + self.detail_hint);
        texel_size_m * scale > distance_squared.sqrt()
    }

    fn is_texture_expired(&self, frame: &FrameContext, key: TileKey) -> bool {
        let expiry = self
            .level_set
            .level(key.level)
            .map_or(0, |level| level.expiry_time_ms());
        if expiry == 0 || frame.now_epoch_ms < expiry {
            return false;
        }
        self.services
            .cache
            .updated_at_ms(key)
            .map_or(false, |updated| updated < expiry)
    }

    fn request_tile(&self, frame: &FrameContext, tile: &Tile) {
        let key = tile.key();
        if self.level_set.is_level_empty(key.level) {
            return;
        }
        if self.level_set.is_resource_absent(key) {
            return;
        }
        let priority = tile
            .priority_distance_squared(frame.eye_point())
            .unwrap_or(f64::MAX);
        self.queue.enqueue(key, priority);
    }

    /// Takes the best queued requests up to the layer's concurrency budget
    /// and turns them into retrieval jobs. Leftover requests are dropped;
    /// tiles still needed will be re-requested next frame.
    pub fn drain_requests(&self) -> Vec<RetrieveTileJob> {
        self.queue
            .drain(self.max_concurrent_retrievals)
            .into_iter()
            .filter_map(|task| self.make_job(&task))
            .collect()
    }

    fn make_job(&self, task: &crate::retrieval::RequestTask) -> Option<RetrieveTileJob> {
        let key = task.key;
        let level = self.level_set.level(key.level)?;
        Some(RetrieveTileJob {
            layer: self.name.clone(),
            key,
            cache_path: level.tile_cache_path(&key),
            url: self.url_builder.url_for_tile(&key),
            expiry_time_ms: level.expiry_time_ms(),
            enqueued_at: task.enqueued_at,
            stale_limit: self.stale_request_limit,
            services: self.services.clone(),
            absent: self.level_set.absent_list().clone(),
            cancel: self.cancel.clone(),
        })
    }

    /// Bookkeeping for a finished retrieval: frees the in-flight slot and
    /// pins freshly loaded level-zero textures when the layer retains them.
    pub fn on_outcome(&self, outcome: &TileLoadOutcome) {
        self.queue.complete(outcome.key);
        if self.retain_level_zero_tiles
            && outcome.key.level == 0
            && matches!(outcome.status, TileLoadStatus::Loaded { .. })
        {
            self.services.cache.set_pinned(outcome.key, true);
        }
    }

    /// Marks all cached tile data stale as of `expiry_time_ms`; resident
    /// textures keep drawing but are re-requested on their next selection.
    pub fn set_expiry_time_ms(&self, expiry_time_ms: u64) {
        self.level_set.set_expiry_time_ms(expiry_time_ms);
    }

    /// Stops the layer: pending requests are dropped and jobs not yet
    /// started become no-ops. Textures already cached stay available.
    pub fn dispose(&mut self) {
        self.cancel.cancel();
        self.queue.clear();
        self.selected.clear();
    }
}
