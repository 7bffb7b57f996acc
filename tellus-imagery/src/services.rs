use std::sync::Arc;

use crate::change::{ChangeListener, NullChangeListener};
use crate::config::TiledImageLayerConfig;
use crate::decoder::{RawTextureDecoder, TextureDecoder};
use crate::file_store::{FileStore, LocalFileStore};
use crate::memory_cache::MemoryCache;
use crate::retriever::{HttpRetriever, NetworkStatus, Retriever};

/// Everything a layer and its retrieval jobs need besides the tile pyramid
/// itself. Handed to each job by cloning; all members are shared.
#[derive(Clone)]
pub struct LayerServices {
    pub file_store: Arc<dyn FileStore>,
    pub retriever: Arc<dyn Retriever>,
    pub decoder: Arc<dyn TextureDecoder>,
    pub listener: Arc<dyn ChangeListener>,
    pub network: Arc<NetworkStatus>,
    pub cache: Arc<MemoryCache>,
}

impl LayerServices {
    /// Default bundle for a config: local file store under `cache_root`, HTTP
    /// retrieval, pass-through decoding and no change listener.
    pub fn for_config(
        config: &TiledImageLayerConfig,
        cache_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        let network = Arc::new(NetworkStatus::new(
            config.max_host_failures,
            config.host_retry_interval(),
        ));
        network.set_network_enabled(config.network_retrieval_enabled);
        Self {
            file_store: Arc::new(LocalFileStore::new(cache_root)),
            retriever: Arc::new(HttpRetriever::new(
                config.connect_timeout(),
                config.read_timeout(),
            )),
            decoder: Arc::new(RawTextureDecoder),
            listener: Arc::new(NullChangeListener),
            network,
            cache: Arc::new(MemoryCache::new(
                config.cache_capacity_bytes,
                config.cache_low_water_bytes,
            )),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = listener;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_tracking_tuned_independently_of_absent_backoff() {
        let json = r#"{
            "name": "bmng",
            "dataset": "earth/bmng",
            "service": { "type": "xyz", "url_template": "https://t/{level}/{row}/{column}" },
            "max_absent_attempts": 9,
            "max_host_failures": 1
        }"#;
        let config = TiledImageLayerConfig::from_json(json).unwrap();
        let services =
            LayerServices::for_config(&config, std::env::temp_dir().join("tellus-services-tests"));
        let url = "https://tiles.example.com/0/0/0.png";
        assert!(services.network.is_host_available(url));
        // a single failure trips the host limit even though individual tiles
        // are still granted nine absent attempts
        services.network.log_failure(url);
        assert!(!services.network.is_host_available(url));
    }
}
