use crate::tile_key::TileKey;

/// Why a layer announced a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerChange {
    /// A tile's texture became resident in the memory cache.
    TileLoaded(TileKey),
    /// A tile's retrieval or decode failed for good this round.
    TileFailed(TileKey),
}

/// Receives change notifications from retrieval workers. Each completed
/// retrieval produces exactly one notification, success or failure.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, layer: &str, change: LayerChange);
}

/// Listener that drops everything, for layers nobody observes.
pub struct NullChangeListener;

impl ChangeListener for NullChangeListener {
    fn on_change(&self, _layer: &str, _change: LayerChange) {}
}

/// Listener that forwards notifications over an unbounded channel, letting
/// the render thread drain them once per frame.
pub struct ChannelChangeListener {
    sender: crossbeam_channel::Sender<(String, LayerChange)>,
}

impl ChannelChangeListener {
    pub fn new() -> (Self, crossbeam_channel::Receiver<(String, LayerChange)>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl ChangeListener for ChannelChangeListener {
    fn on_change(&self, layer: &str, change: LayerChange) {
        // the receiver going away just means nobody is watching anymore
        let _ = self.sender.send((layer.to_string(), change));
    }
}
