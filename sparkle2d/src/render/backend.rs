//! The minimal GPU surface the renderer draws through.

use crate::error::RenderError;
use crate::math::Color;
use crate::render::texture::TextureHandle;

/// One vertex attribute of a program's interleaved `f32` layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: &'static str,
    /// Number of `f32` components.
    pub components: u32,
    /// Byte offset within a vertex.
    pub offset: u64,
}

const QUAD_ATTRIBUTES: &[AttributeInfo] = &[
    AttributeInfo {
        name: "position",
        components: 2,
        offset: 0,
    },
    AttributeInfo {
        name: "uv",
        components: 2,
        offset: 8,
    },
];

const PRIMITIVE_ATTRIBUTES: &[AttributeInfo] = &[AttributeInfo {
    name: "position",
    components: 2,
    offset: 0,
}];

/// Shader programs known to every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Program {
    /// Textured quads: position + uv, tinted by the color uniform.
    Quad,
    /// Flat-colored triangles: position only.
    Primitive,
}

impl Program {
    pub fn attributes(self) -> &'static [AttributeInfo] {
        match self {
            Program::Quad => QUAD_ATTRIBUTES,
            Program::Primitive => PRIMITIVE_ATTRIBUTES,
        }
    }

    /// Floats per vertex.
    pub fn vertex_size(self) -> usize {
        self.attributes()
            .iter()
            .map(|a| a.components as usize)
            .sum()
    }

    /// Bytes per vertex.
    pub fn stride(self) -> u64 {
        (self.vertex_size() * std::mem::size_of::<f32>()) as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Uniform {
    /// Column-major orthographic projection.
    Projection([[f32; 4]; 4]),
    Color(Color),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawMode {
    Triangles,
}

/// Immediate-style draw surface. Uniforms and texture bindings apply to
/// every following `draw_arrays` until changed.
pub trait GpuBackend {
    fn begin_frame(&mut self, clear: Color) -> Result<(), RenderError>;
    fn use_program(&mut self, program: Program);
    fn set_uniform(&mut self, uniform: Uniform);
    fn bind_texture(&mut self, texture: TextureHandle);
    /// Replace the vertex data used by the next `draw_arrays`.
    fn upload_buffer(&mut self, bytes: &[u8]);
    fn draw_arrays(&mut self, mode: DrawMode, count: u32);
    fn end_frame(&mut self) -> Result<(), RenderError>;
    fn resize(&mut self, width: u32, height: u32);
}

/// A call recorded by [`RecordingBackend`].
#[derive(Clone, Debug, PartialEq)]
pub enum GpuCommand {
    BeginFrame(Color),
    UseProgram(Program),
    SetUniform(Uniform),
    BindTexture(TextureHandle),
    UploadBuffer(Vec<u8>),
    DrawArrays { mode: DrawMode, count: u32 },
    EndFrame,
    Resize { width: u32, height: u32 },
}

/// Headless backend that records every call of the current frame.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    commands: Vec<GpuCommand>,
    frames: u64,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls since the last `begin_frame`.
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Completed frames.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn draw_calls(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::DrawArrays { .. }))
            .count()
    }

    /// Colors in effect at each draw call, in submission order.
    pub fn draw_colors(&self) -> Vec<Color> {
        let mut current = Color::WHITE;
        let mut colors = Vec::new();
        for command in &self.commands {
            match command {
                GpuCommand::SetUniform(Uniform::Color(c)) => current = *c,
                GpuCommand::DrawArrays { .. } => colors.push(current),
                _ => {}
            }
        }
        colors
    }
}

impl GpuBackend for RecordingBackend {
    fn begin_frame(&mut self, clear: Color) -> Result<(), RenderError> {
        self.commands.clear();
        self.commands.push(GpuCommand::BeginFrame(clear));
        Ok(())
    }

    fn use_program(&mut self, program: Program) {
        self.commands.push(GpuCommand::UseProgram(program));
    }

    fn set_uniform(&mut self, uniform: Uniform) {
        self.commands.push(GpuCommand::SetUniform(uniform));
    }

    fn bind_texture(&mut self, texture: TextureHandle) {
        self.commands.push(GpuCommand::BindTexture(texture));
    }

    fn upload_buffer(&mut self, bytes: &[u8]) {
        self.commands.push(GpuCommand::UploadBuffer(bytes.to_vec()));
    }

    fn draw_arrays(&mut self, mode: DrawMode, count: u32) {
        self.commands.push(GpuCommand::DrawArrays { mode, count });
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        self.commands.push(GpuCommand::EndFrame);
        self.frames += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.commands.push(GpuCommand::Resize { width, height });
    }
}
