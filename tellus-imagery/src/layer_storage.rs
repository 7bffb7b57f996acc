use bevy::{prelude::Resource, utils::HashMap};

use crate::layer::TiledImageLayer;

/// All active tiled image layers, keyed by layer name.
#[derive(Resource, Default)]
pub struct LayerStorage {
    map: HashMap<String, TiledImageLayer>,
}

impl LayerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn add(&mut self, layer: TiledImageLayer) {
        self.map.insert(layer.name().to_string(), layer);
    }

    /// Removes a layer, cancelling whatever it still had in flight.
    pub fn remove(&mut self, name: &str) {
        if let Some(mut layer) = self.map.remove(name) {
            layer.dispose();
        }
    }

    pub fn get(&self, name: &str) -> Option<&TiledImageLayer> {
        self.map.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TiledImageLayer> {
        self.map.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TiledImageLayer> {
        self.map.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TiledImageLayer> {
        self.map.values_mut()
    }
}
