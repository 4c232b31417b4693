//! Typed errors surfaced by the library.
//!
//! Contract violations (stale parents, cycles, unregistered pool types) are
//! not errors: they panic at the offending call.

use thiserror::Error;

/// Rejected collision polygon.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ShapeError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon has zero area")]
    Degenerate,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable adapter: {0}")]
    RequestAdapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("texture {0} is not registered with the backend")]
    UnknownTexture(u32),
    #[error("{0} called outside of begin_frame/end_frame")]
    NoFrame(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
