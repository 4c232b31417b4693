//! Batching shared by the quad and primitive compositors.

use log::trace;

use crate::math::Color;
use crate::render::backend::{DrawMode, GpuBackend, Program, Uniform};
use crate::render::vertex_array::VertexArray;

/// A shader program paired with a CPU vertex buffer. Geometry accumulates
/// until [`Compositor::flush`] uploads it and issues one draw call.
pub trait Compositor {
    fn program(&self) -> Program;

    /// Make this compositor's program current.
    fn bind(&mut self, backend: &mut dyn GpuBackend, projection: &[[f32; 4]; 4]);

    /// Change the draw color. Pending geometry is flushed first since the
    /// color is a uniform.
    fn set_color(&mut self, backend: &mut dyn GpuBackend, color: Color);

    /// Submit pending geometry. Returns the number of vertices drawn.
    fn flush(&mut self, backend: &mut dyn GpuBackend) -> usize;

    fn is_empty(&self) -> bool;

    /// Draw calls and vertices submitted since the previous call.
    fn take_counts(&mut self) -> (usize, usize);
}

/// State every compositor carries.
#[derive(Debug)]
pub struct CompositorCore {
    program: Program,
    pub(crate) vertices: VertexArray,
    color: Color,
    color_dirty: bool,
    draw_calls: usize,
    vertices_drawn: usize,
}

impl CompositorCore {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            vertices: VertexArray::new(program.vertex_size()),
            color: Color::WHITE,
            color_dirty: true,
            draw_calls: 0,
            vertices_drawn: 0,
        }
    }

    pub fn program(&self) -> Program {
        self.program
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn bind(&mut self, backend: &mut dyn GpuBackend, projection: &[[f32; 4]; 4]) {
        backend.use_program(self.program);
        backend.set_uniform(Uniform::Projection(*projection));
        self.color_dirty = true;
    }

    pub fn set_color(&mut self, backend: &mut dyn GpuBackend, color: Color) {
        if color == self.color {
            return;
        }
        if !self.vertices.is_empty() {
            self.flush(backend);
        }
        self.color = color;
        self.color_dirty = true;
    }

    pub fn flush(&mut self, backend: &mut dyn GpuBackend) -> usize {
        if self.vertices.is_empty() {
            return 0;
        }
        if self.color_dirty {
            backend.set_uniform(Uniform::Color(self.color));
            self.color_dirty = false;
        }

        let count = self.vertices.len();
        backend.upload_buffer(self.vertices.bytes());
        backend.draw_arrays(DrawMode::Triangles, count as u32);
        trace!("{:?} flush: {count} vertices", self.program);
        self.vertices.clear();
        self.draw_calls += 1;
        self.vertices_drawn += count;
        count
    }

    pub fn take_counts(&mut self) -> (usize, usize) {
        let counts = (self.draw_calls, self.vertices_drawn);
        self.draw_calls = 0;
        self.vertices_drawn = 0;
        counts
    }
}
