mod backend;
mod compositor;
mod primitive;
mod quad;
mod renderer;
mod texture;
mod vertex_array;
mod wgpu_backend;

pub use backend::{
    AttributeInfo, DrawMode, GpuBackend, GpuCommand, Program, RecordingBackend, Uniform,
};
pub use compositor::{Compositor, CompositorCore};
pub use primitive::{PathMode, PrimitiveCompositor};
pub use quad::QuadCompositor;
pub use renderer::{DrawCommand, FrameStats, Renderer};
pub use texture::{Texture, TextureHandle};
pub use vertex_array::VertexArray;
pub use wgpu_backend::WgpuBackend;
