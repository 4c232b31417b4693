//! Sparkle2D - a retained-mode 2D scene-graph engine.
//!
//! Nodes live in a [`SceneTree`] arena. Each frame the [`Engine`] runs node
//! behaviours, walks the tree to commit world transforms, runs SAT collision
//! over every active collider and submits z-sorted, batched geometry through
//! a [`GpuBackend`].

pub mod debug;
pub mod engine;
pub mod error;
pub mod events;
pub mod math;
pub mod node;
pub mod path;
pub mod physics;
pub mod pool;
pub mod render;
pub mod scene;

pub use crate::debug::DebugOverlay;
pub use crate::engine::{run, Engine, EngineConfig, Game};
pub use crate::error::{ConfigError, RenderError, ShapeError};
pub use crate::events::{EventBus, Subscription};
pub use crate::math::{Color, Matrix, Rect, Vec2};
pub use crate::node::{
    Drawable, Node, NodeContext, NodeEvent, NodeId, ShapeKind, Transform, Updatable, Visual,
};
pub use crate::path::Path;
pub use crate::physics::{
    point_in_polygon, sat_collision, Collision, CollisionResult, PhysicsManager, Polygon,
};
pub use crate::pool::{ObjectPool, PoolManager, Poolable};
pub use crate::render::{
    FrameStats, GpuBackend, RecordingBackend, Renderer, Texture, TextureHandle, WgpuBackend,
};
pub use crate::scene::SceneTree;
