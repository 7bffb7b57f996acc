use bevy::math::DVec3;

use tellus_scene::{Extent, Sector};

/// What the layer needs to know about the camera each frame. The renderer
/// supplies the implementation; the layer only asks visibility questions and
/// reads the eye point.
pub trait SceneView: Send + Sync {
    fn eye_point(&self) -> DVec3;

    /// Whether any part of the geographic sector may appear on screen.
    fn is_sector_visible(&self, sector: &Sector) -> bool;

    /// Whether the bounding extent intersects the view frustum.
    fn intersects_frustum(&self, extent: &Extent) -> bool;
}

/// A view that culls nothing. Useful for warm-up passes and tests.
pub struct FullView {
    pub eye: DVec3,
}

impl SceneView for FullView {
    fn eye_point(&self) -> DVec3 {
        self.eye
    }

    fn is_sector_visible(&self, _sector: &Sector) -> bool {
        true
    }

    fn intersects_frustum(&self, _extent: &Extent) -> bool {
        true
    }
}

/// Per-frame inputs to tile selection, bundled so the walk doesn't thread
/// half a dozen parameters through every call.
pub struct FrameContext<'a> {
    pub view: &'a dyn SceneView,
    pub globe_radius: f64,
    /// Wall-clock epoch milliseconds, compared against level expiry times.
    pub now_epoch_ms: u64,
}

impl<'a> FrameContext<'a> {
    pub fn new(view: &'a dyn SceneView, globe_radius: f64, now_epoch_ms: u64) -> Self {
        Self {
            view,
            globe_radius,
            now_epoch_ms,
        }
    }

    pub fn eye_point(&self) -> DVec3 {
        self.view.eye_point()
    }
}
