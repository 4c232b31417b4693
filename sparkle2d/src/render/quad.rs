use crate::math::{Color, Matrix, Rect, Vec2};
use crate::render::backend::{GpuBackend, Program};
use crate::render::compositor::{Compositor, CompositorCore};
use crate::render::texture::{Texture, TextureHandle};

/// Batches textured quads. Corners are transformed on the CPU so every quad
/// shares one pipeline; a texture change ends the batch.
#[derive(Debug)]
pub struct QuadCompositor {
    core: CompositorCore,
    texture: Option<TextureHandle>,
    texture_dirty: bool,
}

impl QuadCompositor {
    pub fn new() -> Self {
        Self {
            core: CompositorCore::new(Program::Quad),
            texture: None,
            texture_dirty: false,
        }
    }

    /// Queue `region` of `texture` (the whole texture when `None`), placed
    /// with its top-left corner at the local origin of `matrix`.
    pub fn add_quad(
        &mut self,
        backend: &mut dyn GpuBackend,
        texture: &Texture,
        region: Option<Rect>,
        matrix: &Matrix,
    ) {
        if self.texture != Some(texture.handle) {
            self.flush(backend);
            self.texture = Some(texture.handle);
            self.texture_dirty = true;
        }

        let tw = texture.width.max(1) as f32;
        let th = texture.height.max(1) as f32;
        let r = region.unwrap_or_else(|| Rect::new(0.0, 0.0, tw, th));
        let (u0, v0) = (r.x / tw, r.y / th);
        let (u1, v1) = ((r.x + r.w) / tw, (r.y + r.h) / th);

        let corners = [
            (0.0, 0.0, u0, v0),
            (r.w, 0.0, u1, v0),
            (r.w, r.h, u1, v1),
            (0.0, 0.0, u0, v0),
            (r.w, r.h, u1, v1),
            (0.0, r.h, u0, v1),
        ];
        for (x, y, u, v) in corners {
            let p = matrix.apply(Vec2::new(x, y));
            self.core.vertices.push_vertex(&[p.x, p.y, u, v]);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.core.vertices.len()
    }
}

impl Default for QuadCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor for QuadCompositor {
    fn program(&self) -> Program {
        self.core.program()
    }

    fn bind(&mut self, backend: &mut dyn GpuBackend, projection: &[[f32; 4]; 4]) {
        self.core.bind(backend, projection);
        self.texture_dirty = self.texture.is_some();
    }

    fn set_color(&mut self, backend: &mut dyn GpuBackend, color: Color) {
        if color != self.core.color() {
            self.flush(backend);
        }
        self.core.set_color(backend, color);
    }

    fn flush(&mut self, backend: &mut dyn GpuBackend) -> usize {
        if self.core.vertices.is_empty() {
            return 0;
        }
        if self.texture_dirty {
            if let Some(texture) = self.texture {
                backend.bind_texture(texture);
            }
            self.texture_dirty = false;
        }
        self.core.flush(backend)
    }

    fn is_empty(&self) -> bool {
        self.core.vertices.is_empty()
    }

    fn take_counts(&mut self) -> (usize, usize) {
        self.core.take_counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::{GpuCommand, RecordingBackend};

    fn texture(id: u32) -> Texture {
        Texture::new(TextureHandle(id), 64, 32)
    }

    #[test]
    fn atlas_region_maps_to_uvs() {
        let mut backend = RecordingBackend::new();
        let mut quad = QuadCompositor::new();
        let mut m = Matrix::IDENTITY;
        m.translate(100.0, 50.0);

        quad.add_quad(
            &mut backend,
            &texture(1),
            Some(Rect::new(32.0, 0.0, 16.0, 16.0)),
            &m,
        );

        let v = quad.core.vertices.as_slice();
        assert_eq!(quad.vertex_count(), 6);
        assert_eq!(&v[0..4], &[100.0, 50.0, 0.5, 0.0]);
        assert_eq!(&v[8..12], &[116.0, 66.0, 0.75, 0.5]);
    }

    #[test]
    fn texture_change_flushes() {
        let mut backend = RecordingBackend::new();
        let mut quad = QuadCompositor::new();
        quad.add_quad(&mut backend, &texture(1), None, &Matrix::IDENTITY);
        quad.add_quad(&mut backend, &texture(1), None, &Matrix::IDENTITY);
        assert_eq!(backend.draw_calls(), 0);

        quad.add_quad(&mut backend, &texture(2), None, &Matrix::IDENTITY);
        assert_eq!(backend.draw_calls(), 1);
        assert!(backend
            .commands()
            .contains(&GpuCommand::BindTexture(TextureHandle(1))));

        assert_eq!(quad.flush(&mut backend), 6);
        assert_eq!(backend.draw_calls(), 2);
    }
}
