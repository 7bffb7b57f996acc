#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::expect_used
)]

//! Umbrella crate for the tellus globe imagery engine. Add [`TellusPlugin`]
//! to a bevy app, register layers in [`tellus_imagery::LayerStorage`] and
//! provide an [`tellus_imagery::ActiveView`] for selection to run against.

use bevy::prelude::*;

pub use tellus_imagery as imagery;
pub use tellus_jobs as jobs;
pub use tellus_scene as scene;

pub struct TellusPlugin;

impl Plugin for TellusPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(tellus_jobs::Plugin)
            .add_plugins(tellus_imagery::Plugin);
    }
}
