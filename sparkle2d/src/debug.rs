//! Collider visualisation drawn on top of the scene.

use crate::math::{Color, Matrix};
use crate::path::Path;
use crate::pool::PoolManager;
use crate::render::{GpuBackend, PathMode, Renderer};
use crate::scene::SceneTree;

/// Draws every registered collider's world shape as a translucent fill plus
/// an outline. Colliders with contacts use the contact colors.
#[derive(Debug)]
pub struct DebugOverlay {
    pub fill: Color,
    pub outline: Color,
    pub contact_fill: Color,
    pub contact_outline: Color,
    pub line_width: f32,
    path: Path,
}

impl DebugOverlay {
    pub fn new() -> Self {
        Self {
            fill: Color::rgba(0.2, 0.6, 1.0, 0.25),
            outline: Color::rgba(0.2, 0.6, 1.0, 1.0),
            contact_fill: Color::rgba(1.0, 0.25, 0.2, 0.3),
            contact_outline: Color::rgba(1.0, 0.25, 0.2, 1.0),
            line_width: 2.0,
            path: Path::new(),
        }
    }

    /// World shapes are already in screen space, so they are submitted with
    /// the identity matrix.
    pub fn draw<B: GpuBackend>(
        &mut self,
        scene: &SceneTree,
        renderer: &mut Renderer<B>,
        pool: &mut PoolManager,
    ) {
        for id in scene.physics().iter() {
            let Some(collision) = scene.get(id).and_then(|n| n.collision.as_ref()) else {
                continue;
            };
            if !collision.is_shape_ready() {
                continue;
            }

            let (fill, outline) = if collision.contacts().is_empty() {
                (self.fill, self.outline)
            } else {
                (self.contact_fill, self.contact_outline)
            };

            self.path.begin_path(pool);
            self.path.polygon_path(pool, collision.world_points());
            renderer.draw_path(&self.path, PathMode::Fill, 0.0, fill, &Matrix::IDENTITY);
            renderer.draw_path(
                &self.path,
                PathMode::Line,
                self.line_width,
                outline,
                &Matrix::IDENTITY,
            );
        }
        self.path.release(pool);
    }
}

impl Default for DebugOverlay {
    fn default() -> Self {
        Self::new()
    }
}
