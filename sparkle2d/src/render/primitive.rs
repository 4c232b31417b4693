use crate::math::{Color, Matrix, Vec2};
use crate::path::Path;
use crate::render::backend::{GpuBackend, Program};
use crate::render::compositor::{Compositor, CompositorCore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathMode {
    /// Each segment becomes a quad `line_width` wide. No joins.
    Line,
    /// A triangle fan per sub-path; correct for convex or star-shaped input.
    Fill,
}

/// Batches flat-colored geometry built from a [`Path`].
#[derive(Debug)]
pub struct PrimitiveCompositor {
    core: CompositorCore,
}

impl PrimitiveCompositor {
    pub fn new() -> Self {
        Self {
            core: CompositorCore::new(Program::Primitive),
        }
    }

    pub fn add_path(&mut self, path: &Path, mode: PathMode, line_width: f32, matrix: &Matrix) {
        match mode {
            PathMode::Line => {
                let half = line_width * 0.5;
                for (a, b) in path.segments() {
                    let start = matrix.apply(a);
                    let end = matrix.apply(b);
                    let dir = (end - start).normalized();
                    if dir == Vec2::ZERO {
                        continue;
                    }
                    let n = dir.perp() * half;
                    for p in [start - n, start + n, end - n, start + n, end + n, end - n] {
                        self.core.vertices.push_vertex(&[p.x, p.y]);
                    }
                }
            }
            PathMode::Fill => {
                for subpath in path.subpaths() {
                    let mut points = subpath;
                    if points.len() > 1 && points.first() == points.last() {
                        points = &points[..points.len() - 1];
                    }
                    if points.len() < 3 {
                        continue;
                    }
                    let origin = matrix.apply(points[0]);
                    for pair in points[1..].windows(2) {
                        for p in [origin, matrix.apply(pair[0]), matrix.apply(pair[1])] {
                            self.core.vertices.push_vertex(&[p.x, p.y]);
                        }
                    }
                }
            }
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.core.vertices.len()
    }
}

impl Default for PrimitiveCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor for PrimitiveCompositor {
    fn program(&self) -> Program {
        self.core.program()
    }

    fn bind(&mut self, backend: &mut dyn GpuBackend, projection: &[[f32; 4]; 4]) {
        self.core.bind(backend, projection);
    }

    fn set_color(&mut self, backend: &mut dyn GpuBackend, color: Color) {
        self.core.set_color(backend, color);
    }

    fn flush(&mut self, backend: &mut dyn GpuBackend) -> usize {
        self.core.flush(backend)
    }

    fn is_empty(&self) -> bool {
        self.core.vertices.is_empty()
    }

    fn take_counts(&mut self) -> (usize, usize) {
        self.core.take_counts()
    }
}
