#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::expect_used
)]

//! Tiled globe imagery: quadtree tile selection with ancestor fallback, a
//! prioritized retrieval pipeline (local file cache first, then the network)
//! and a memory-bounded texture cache, wired into bevy as a plugin.

mod absent_resource_list;
mod change;
mod config;
mod decoder;
mod file_store;
mod layer;
mod layer_storage;
mod level;
mod level_set;
mod memory_cache;
mod retrieval;
mod retriever;
mod services;
mod systems;
mod tile;
mod tile_key;
mod visibility;

pub use absent_resource_list::AbsentResourceList;
pub use change::{ChangeListener, ChannelChangeListener, LayerChange, NullChangeListener};
pub use config::{ConfigError, TileService, TiledImageLayerConfig, UrlBuilder};
pub use decoder::{DecodeError, RawTextureDecoder, TextureData, TextureDecoder};
pub use file_store::{FileStore, LocalFileStore};
pub use layer::TiledImageLayer;
pub use layer_storage::LayerStorage;
pub use level::Level;
pub use level_set::{LevelSet, LevelSetError, LevelSetParams};
pub use memory_cache::MemoryCache;
pub use retrieval::{
    epoch_ms, RequestTask, RetrievalQueue, RetrieveTileJob, TileLoadError, TileLoadOutcome,
    TileLoadStatus,
};
pub use retriever::{HttpRetriever, NetworkStatus, RetrieveError, Retriever};
pub use services::LayerServices;
pub use systems::{ActiveView, Globe, LayerChanged, Plugin};
pub use tile::{SelectedTile, Tile};
pub use tile_key::TileKey;
pub use visibility::{FrameContext, FullView, SceneView};
