use std::sync::Arc;

use bevy::prelude::*;

use tellus_jobs::{FinishedJobs, Job, JobSpawner};

use crate::layer_storage::LayerStorage;
use crate::retrieval::{epoch_ms, RetrieveTileJob, TileLoadStatus};
use crate::tile_key::TileKey;
use crate::visibility::{FrameContext, SceneView};

/// The camera the layers select tiles for. Swapped by whatever drives the
/// scene; selection idles while it is absent.
#[derive(Resource)]
pub struct ActiveView(pub Arc<dyn SceneView>);

/// Globe geometry shared by all layers.
#[derive(Resource)]
pub struct Globe {
    pub radius: f64,
}

impl Default for Globe {
    fn default() -> Self {
        // WGS84 equatorial radius in meters
        Self { radius: 6_378_137.0 }
    }
}

/// Emitted once per finished retrieval so render code knows a layer's
/// drawable set changed.
#[derive(Event, Debug, Clone)]
pub struct LayerChanged {
    pub layer: String,
    pub key: TileKey,
    pub loaded: bool,
}

pub struct Plugin;

impl bevy::prelude::Plugin for Plugin {
    fn build(&self, app: &mut App) {
        if !app.is_plugin_added::<tellus_jobs::Plugin>() {
            app.add_plugins(tellus_jobs::Plugin);
        }
        app.init_resource::<LayerStorage>()
            .init_resource::<Globe>()
            .add_event::<LayerChanged>()
            .add_systems(
                Update,
                (assemble_layers, dispatch_requests, collect_outcomes).chain(),
            );
    }
}

/// Runs tile selection for every layer against the active view.
fn assemble_layers(
    mut storage: ResMut<LayerStorage>,
    view: Option<Res<ActiveView>>,
    globe: Res<Globe>,
) {
    let Some(view) = view else {
        return;
    };
    let frame = FrameContext::new(view.0.as_ref(), globe.radius, epoch_ms());
    for layer in storage.iter_mut() {
        layer.assemble_tiles(&frame);
    }
}

/// Turns each layer's best queued requests into retrieval jobs.
fn dispatch_requests(storage: Res<LayerStorage>, mut spawner: JobSpawner) {
    for layer in storage.iter() {
        for job in layer.drain_requests() {
            bevy::log::debug!("dispatching {}", job.name());
            spawner.spawn(job);
        }
    }
}

/// Hands finished retrievals back to their layers and announces the results.
fn collect_outcomes(
    storage: Res<LayerStorage>,
    mut finished: FinishedJobs,
    mut events: EventWriter<LayerChanged>,
) {
    while let Some(outcome) = finished.take_next::<RetrieveTileJob>() {
        if let Some(layer) = storage.get(&outcome.layer) {
            layer.on_outcome(&outcome);
        }
        match outcome.status {
            TileLoadStatus::Loaded { .. } => events.send(LayerChanged {
                layer: outcome.layer,
                key: outcome.key,
                loaded: true,
            }),
            TileLoadStatus::Failed(_) => events.send(LayerChanged {
                layer: outcome.layer,
                key: outcome.key,
                loaded: false,
            }),
            TileLoadStatus::Cancelled | TileLoadStatus::Stale => {}
        }
    }
}
