//! Matrix stack, deferred draw list and compositor switching.
//!
//! A frame is drawn in two phases. [`Renderer::build`] walks the tree
//! pre-order, concatenating each node's local transform onto the matrix
//! stack, committing world values and refreshing collision shapes, and
//! records a [`DrawCommand`] per visible drawable. [`Renderer::flush_draw_list`]
//! then stable-sorts the commands by z-index and submits geometry with the
//! matrices captured during the walk.

use glam::Mat4;
use log::trace;

use crate::error::RenderError;
use crate::math::{Color, Matrix, Rect, Vec2};
use crate::node::{NodeId, ShapeKind, Visual};
use crate::path::Path;
use crate::pool::PoolManager;
use crate::render::backend::{GpuBackend, Program};
use crate::render::compositor::Compositor;
use crate::render::primitive::{PathMode, PrimitiveCompositor};
use crate::render::quad::QuadCompositor;
use crate::render::texture::Texture;
use crate::scene::SceneTree;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCommand {
    pub node: NodeId,
    pub z_index: i32,
    /// World matrix with the node's offset applied.
    pub matrix: Matrix,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: usize,
    pub vertices: usize,
    pub nodes_drawn: usize,
}

pub struct Renderer<B: GpuBackend> {
    backend: B,
    width: u32,
    height: u32,
    projection: [[f32; 4]; 4],
    matrix: Matrix,
    stack: Vec<Matrix>,
    draw_list: Vec<DrawCommand>,
    quad: QuadCompositor,
    primitive: PrimitiveCompositor,
    current: Option<Program>,
    path: Path,
    background: Color,
    stats: FrameStats,
    last_order: Vec<NodeId>,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, width: u32, height: u32) -> Self {
        Self {
            backend,
            width,
            height,
            projection: ortho(width, height),
            matrix: Matrix::IDENTITY,
            stack: Vec::new(),
            draw_list: Vec::new(),
            quad: QuadCompositor::new(),
            primitive: PrimitiveCompositor::new(),
            current: None,
            path: Path::new(),
            background: Color::BLACK,
            stats: FrameStats::default(),
            last_order: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_background(&mut self, color: Color) {
        self.background = color;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        self.projection = ortho(width, height);
        self.backend.resize(width, height);
    }

    /// Reset per-frame state and open a backend frame.
    pub fn begin_frame(&mut self, pool: &mut PoolManager) -> Result<(), RenderError> {
        pool.release_all(self.stack.drain(..));
        self.matrix.set_identity();
        self.draw_list.clear();
        self.last_order.clear();
        self.stats = FrameStats::default();
        self.current = None;
        self.quad.take_counts();
        self.primitive.take_counts();
        self.backend.begin_frame(self.background)
    }

    /// Push the current matrix.
    pub fn save(&mut self, pool: &mut PoolManager) {
        self.stack.push(pool.acquire(Some(self.matrix)));
    }

    /// Pop the matrix pushed by the matching [`Renderer::save`].
    ///
    /// # Panics
    /// On a restore without a matching save.
    pub fn restore(&mut self, pool: &mut PoolManager) {
        let Some(saved) = self.stack.pop() else {
            panic!("Renderer::restore without a matching save");
        };
        self.matrix = saved;
        pool.release(saved);
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut Matrix {
        &mut self.matrix
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Queue `node` for the flush phase with the current matrix.
    pub fn push_draw(&mut self, node: NodeId, z_index: i32, matrix: Matrix) {
        self.draw_list.push(DrawCommand {
            node,
            z_index,
            matrix,
        });
    }

    pub fn draw_list(&self) -> &[DrawCommand] {
        &self.draw_list
    }

    /// Build phase over the whole tree.
    pub fn build(&mut self, scene: &mut SceneTree, pool: &mut PoolManager) {
        let root = scene.root();
        self.visit(scene, pool, root);
        debug_assert!(self.stack.is_empty(), "unbalanced matrix stack");
    }

    fn visit(&mut self, scene: &mut SceneTree, pool: &mut PoolManager, id: NodeId) {
        let Some(node) = scene.get_mut(id) else {
            return;
        };

        self.save(pool);
        let mut draw_matrix = self.matrix;
        if let Some(transform) = node.transform.as_mut() {
            transform.apply_to(&mut self.matrix);
            transform.commit_world(&self.matrix);
            if let Some(collision) = node.collision.as_mut() {
                collision.update_world_shape(pool, &self.matrix);
            }
            draw_matrix = self.matrix;
            draw_matrix.translate(-transform.offset.x, -transform.offset.y);
        }
        node.drawn = true;

        if let Some(drawable) = node.drawable.as_ref().filter(|d| d.visible) {
            let z_index = drawable.z_index;
            self.push_draw(id, z_index, draw_matrix);
        }

        // Structure is frozen during the build phase, so indexing is stable.
        let mut index = 0;
        while let Some(child) = scene
            .get(id)
            .and_then(|n| n.children.get(index).copied())
        {
            self.visit(scene, pool, child);
            index += 1;
        }

        self.restore(pool);
    }

    /// Flush phase: stable z-sort, then submit each command.
    pub fn flush_draw_list(&mut self, scene: &SceneTree, pool: &mut PoolManager) {
        let mut commands = std::mem::take(&mut self.draw_list);
        commands.sort_by_key(|c| c.z_index);

        for command in &commands {
            let Some(drawable) = scene.get(command.node).and_then(|n| n.drawable.as_ref()) else {
                continue;
            };
            match &drawable.visual {
                Visual::Sprite { texture, region } => {
                    self.draw_texture(texture, *region, drawable.color, &command.matrix);
                }
                Visual::Shape {
                    shape,
                    fill,
                    line_width,
                } => {
                    let mut path = std::mem::take(&mut self.path);
                    path.begin_path(pool);
                    match shape {
                        ShapeKind::Rect { width, height } => {
                            path.rect_path(pool, &Rect::new(0.0, 0.0, *width, *height));
                        }
                        ShapeKind::Polygon(points) => path.polygon_path(pool, points),
                        ShapeKind::Circle { radius } => {
                            path.circle_path(pool, Vec2::ZERO, *radius);
                        }
                    }
                    let mode = if *fill { PathMode::Fill } else { PathMode::Line };
                    self.draw_path(&path, mode, *line_width, drawable.color, &command.matrix);
                    path.release(pool);
                    self.path = path;
                }
            }
            self.last_order.push(command.node);
            self.stats.nodes_drawn += 1;
        }

        commands.clear();
        self.draw_list = commands;
    }

    /// Node order of the last flush phase.
    pub fn last_draw_order(&self) -> &[NodeId] {
        &self.last_order
    }

    /// Immediate textured quad.
    pub fn draw_texture(
        &mut self,
        texture: &Texture,
        region: Option<Rect>,
        color: Color,
        matrix: &Matrix,
    ) {
        self.set_compositor(Program::Quad);
        self.quad.set_color(&mut self.backend, color);
        self.quad.add_quad(&mut self.backend, texture, region, matrix);
    }

    /// Immediate path geometry.
    pub fn draw_path(
        &mut self,
        path: &Path,
        mode: PathMode,
        line_width: f32,
        color: Color,
        matrix: &Matrix,
    ) {
        self.set_compositor(Program::Primitive);
        self.primitive.set_color(&mut self.backend, color);
        self.primitive.add_path(path, mode, line_width, matrix);
    }

    /// Flush the previous compositor and bind `program`'s.
    pub fn set_compositor(&mut self, program: Program) {
        if self.current == Some(program) {
            return;
        }
        if let Some(previous) = self.current {
            self.flush_compositor(previous);
        }
        trace!("switching compositor to {program:?}");
        let projection = self.projection;
        match program {
            Program::Quad => self.quad.bind(&mut self.backend, &projection),
            Program::Primitive => self.primitive.bind(&mut self.backend, &projection),
        }
        self.current = Some(program);
    }

    fn flush_compositor(&mut self, program: Program) {
        match program {
            Program::Quad => self.quad.flush(&mut self.backend),
            Program::Primitive => self.primitive.flush(&mut self.backend),
        };
    }

    /// Flush pending geometry and close the backend frame.
    pub fn end_frame(&mut self) -> Result<FrameStats, RenderError> {
        if let Some(current) = self.current.take() {
            self.flush_compositor(current);
        }
        for (draw_calls, vertices) in [self.quad.take_counts(), self.primitive.take_counts()] {
            self.stats.draw_calls += draw_calls;
            self.stats.vertices += vertices;
        }
        self.backend.end_frame()?;
        Ok(self.stats)
    }
}

fn ortho(width: u32, height: u32) -> [[f32; 4]; 4] {
    Mat4::orthographic_rh(0.0, width as f32, height as f32, 0.0, -1.0, 1.0).to_cols_array_2d()
}
