use std::collections::HashMap;
use std::time::Duration;

use new_string_template::template::Template;
use serde::Deserialize;

use tellus_scene::{LatLon, Sector};

use crate::level_set::{LevelSetError, LevelSetParams};
use crate::tile_key::TileKey;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    LevelSet(#[from] LevelSetError),
    #[error("url template does not render with level/row/column: {0}")]
    BadUrlTemplate(String),
    #[error("cache low-water mark {low_water} exceeds capacity {capacity}")]
    CacheLowWaterAboveCapacity { low_water: u64, capacity: u64 },
    #[error("max_concurrent_retrievals must be at least 1")]
    NoRetrievalSlots,
}

/// Produces the remote URL for a tile address. One per layer, built from the
/// layer's service description.
pub trait UrlBuilder: Send + Sync {
    fn url_for_tile(&self, key: &TileKey) -> String;
}

/// How a layer's tiles are fetched, as it appears in layer configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TileService {
    /// Template URL with `{level}`, `{row}` and `{column}` placeholders.
    Xyz { url_template: String },
    /// WMTS KVP GetTile requests against an endpoint.
    Wmts {
        endpoint: String,
        layer: String,
        style: String,
        format: String,
        tile_matrix_set: String,
        #[serde(default)]
        tile_matrix_prefix: String,
    },
}

impl TileService {
    pub fn into_url_builder(self) -> Result<Box<dyn UrlBuilder>, ConfigError> {
        match self {
            TileService::Xyz { url_template } => {
                let template = Template::new(url_template.as_str());
                // fail at load time, not per tile
                let probe = render_tile_url(&template, &TileKey::new(0, 0, 0))
                    .map_err(|e| ConfigError::BadUrlTemplate(e.to_string()))?;
                if probe == url_template {
                    return Err(ConfigError::BadUrlTemplate(format!(
                        "no placeholders found in {url_template:?}"
                    )));
                }
                Ok(Box::new(XyzUrlBuilder { template }))
            }
            TileService::Wmts {
                endpoint,
                layer,
                style,
                format,
                tile_matrix_set,
                tile_matrix_prefix,
            } => Ok(Box::new(WmtsUrlBuilder {
                endpoint,
                layer,
                style,
                format,
                tile_matrix_set,
                tile_matrix_prefix,
            })),
        }
    }
}

struct XyzUrlBuilder {
    template: Template,
}

impl UrlBuilder for XyzUrlBuilder {
    fn url_for_tile(&self, key: &TileKey) -> String {
        // the template rendered at load time; the same placeholders render
        // for every key
        render_tile_url(&self.template, key).unwrap_or_default()
    }
}

fn render_tile_url(
    template: &Template,
    key: &TileKey,
) -> Result<String, new_string_template::error::TemplateError> {
    let mut data: HashMap<&str, String> = HashMap::new();
    data.insert("level", key.level.to_string());
    data.insert("row", key.row.to_string());
    data.insert("column", key.column.to_string());
    template.render(&data)
}

struct WmtsUrlBuilder {
    endpoint: String,
    layer: String,
    style: String,
    format: String,
    tile_matrix_set: String,
    tile_matrix_prefix: String,
}

impl UrlBuilder for WmtsUrlBuilder {
    fn url_for_tile(&self, key: &TileKey) -> String {
        let joiner = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}SERVICE=WMTS&REQUEST=GetTile&VERSION=1.0.0&LAYER={}&STYLE={}&FORMAT={}\
             &TILEMATRIXSET={}&TILEMATRIX={}{}&TILEROW={}&TILECOL={}",
            self.endpoint,
            joiner,
            self.layer,
            self.style,
            self.format,
            self.tile_matrix_set,
            self.tile_matrix_prefix,
            key.level,
            key.row,
            key.column,
        )
    }
}

fn default_sector_degrees() -> [f64; 4] {
    [-90.0, 90.0, -180.0, 180.0]
}
fn default_tile_origin_degrees() -> [f64; 2] {
    [-90.0, -180.0]
}
fn default_tile_delta_degrees() -> [f64; 2] {
    [36.0, 36.0]
}
fn default_num_levels() -> u32 {
    19
}
fn default_tile_dimension() -> u32 {
    512
}
fn default_format_suffix() -> String {
    ".png".to_string()
}
fn default_detail_hint_origin() -> f64 {
    2.8
}
fn default_max_absent_attempts() -> u32 {
    3
}
fn default_min_absent_check_interval_ms() -> u64 {
    600_000
}
fn default_max_host_failures() -> u32 {
    7
}
fn default_host_retry_interval_ms() -> u64 {
    60_000
}
fn default_cache_capacity_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_cache_low_water_bytes() -> u64 {
    80 * 1024 * 1024
}
fn default_max_concurrent_retrievals() -> usize {
    4
}
fn default_connect_timeout_ms() -> u64 {
    8_000
}
fn default_read_timeout_ms() -> u64 {
    15_000
}
fn default_stale_request_limit_ms() -> u64 {
    9_000
}
fn default_true() -> bool {
    true
}

/// Complete description of one tiled image layer, deserialized from JSON.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TiledImageLayerConfig {
    pub name: String,
    pub dataset: String,
    pub service: TileService,
    /// min latitude, max latitude, min longitude, max longitude
    #[serde(default = "default_sector_degrees")]
    pub sector_degrees: [f64; 4],
    #[serde(default = "default_tile_origin_degrees")]
    pub tile_origin_degrees: [f64; 2],
    #[serde(default = "default_tile_delta_degrees")]
    pub level_zero_tile_delta_degrees: [f64; 2],
    #[serde(default = "default_num_levels")]
    pub num_levels: u32,
    #[serde(default)]
    pub num_empty_levels: u32,
    #[serde(default = "default_tile_dimension")]
    pub tile_width: u32,
    #[serde(default = "default_tile_dimension")]
    pub tile_height: u32,
    #[serde(default = "default_format_suffix")]
    pub format_suffix: String,
    /// User-tunable bias on the subdivision threshold; positive values
    /// subdivide sooner.
    #[serde(default)]
    pub detail_hint: f64,
    #[serde(default = "default_detail_hint_origin")]
    pub detail_hint_origin: f64,
    /// Epoch milliseconds after which cached tiles count as stale; zero
    /// disables expiry.
    #[serde(default)]
    pub expiry_time_ms: u64,
    #[serde(default = "default_max_absent_attempts")]
    pub max_absent_attempts: u32,
    #[serde(default = "default_min_absent_check_interval_ms")]
    pub min_absent_check_interval_ms: u64,
    /// Consecutive failures before a host is treated as unavailable. Tuned
    /// separately from the per-tile absent backoff above.
    #[serde(default = "default_max_host_failures")]
    pub max_host_failures: u32,
    #[serde(default = "default_host_retry_interval_ms")]
    pub host_retry_interval_ms: u64,
    #[serde(default = "default_cache_capacity_bytes")]
    pub cache_capacity_bytes: u64,
    #[serde(default = "default_cache_low_water_bytes")]
    pub cache_low_water_bytes: u64,
    #[serde(default = "default_max_concurrent_retrievals")]
    pub max_concurrent_retrievals: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Requests that wait longer than this between selection and retrieval
    /// are skipped; zero disables the check.
    #[serde(default = "default_stale_request_limit_ms")]
    pub stale_request_limit_ms: u64,
    /// Master switch for network retrieval. When off, tiles still load from
    /// the local file store.
    #[serde(default = "default_true")]
    pub network_retrieval_enabled: bool,
    /// Request every level-zero tile up front instead of on first visit.
    #[serde(default)]
    pub force_level_zero_loads: bool,
    /// Pin level-zero textures in the memory cache so something always
    /// remains to fall back on.
    #[serde(default)]
    pub retain_level_zero_tiles: bool,
}

impl TiledImageLayerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_low_water_bytes > self.cache_capacity_bytes {
            return Err(ConfigError::CacheLowWaterAboveCapacity {
                low_water: self.cache_low_water_bytes,
                capacity: self.cache_capacity_bytes,
            });
        }
        if self.max_concurrent_retrievals == 0 {
            return Err(ConfigError::NoRetrievalSlots);
        }
        Ok(())
    }

    pub fn sector(&self) -> Sector {
        let [min_lat, max_lat, min_lon, max_lon] = self.sector_degrees;
        Sector::from_degrees(min_lat, max_lat, min_lon, max_lon)
    }

    pub fn level_set_params(&self) -> LevelSetParams {
        LevelSetParams {
            dataset: self.dataset.clone(),
            sector: self.sector(),
            tile_origin: LatLon::from_degrees(
                self.tile_origin_degrees[0],
                self.tile_origin_degrees[1],
            ),
            level_zero_tile_delta: LatLon::from_degrees(
                self.level_zero_tile_delta_degrees[0],
                self.level_zero_tile_delta_degrees[1],
            ),
            num_levels: self.num_levels,
            num_empty_levels: self.num_empty_levels,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            format_suffix: self.format_suffix.clone(),
            max_absent_attempts: self.max_absent_attempts,
            min_absent_check_interval: Duration::from_millis(self.min_absent_check_interval_ms),
        }
    }

    pub fn host_retry_interval(&self) -> Duration {
        Duration::from_millis(self.host_retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stale_request_limit(&self) -> Duration {
        Duration::from_millis(self.stale_request_limit_ms)
    }
}
