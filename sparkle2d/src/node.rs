//! Scene nodes: a flat struct with optional components.
//!
//! A [`Node`] is built detached and handed to [`SceneTree::insert`]. Its
//! pooled components ([`Transform`], [`Drawable`], [`Collision`]) take their
//! value objects from the [`PoolManager`] on construction and give them back
//! when the node is destroyed.

use std::collections::HashSet;

use slotmap::new_key_type;

use crate::events::{EventBus, Subscription};
use crate::math::{Color, Matrix, Rect, Vec2};
use crate::physics::Collision;
use crate::pool::PoolManager;
use crate::render::Texture;
use crate::scene::SceneTree;

new_key_type! {
    /// Generational handle to a node in a [`SceneTree`].
    pub struct NodeId;
}

/// Lifecycle, collision and input notifications delivered to a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    EnterTree,
    ExitTree,
    /// Fired on the tick after the node was first visited by the build phase.
    Ready,
    /// Fired while the node is being torn down, to listeners only.
    Destroyed,
    CollisionEnter { other: NodeId, overlap: Vec2 },
    CollisionExit { other: NodeId },
    Click { position: Vec2 },
}

/// Per-frame logic attached to a node.
pub trait Updatable {
    fn update(&mut self, ctx: &mut NodeContext<'_>, dt: f32);

    fn on_event(&mut self, _ctx: &mut NodeContext<'_>, _event: &NodeEvent) {}
}

/// What a behaviour sees while it runs: its own id plus the engine context.
///
/// The behaviour is detached from its node for the duration of the call, so
/// the node (and the rest of the tree) can be mutated freely.
pub struct NodeContext<'a> {
    pub node: NodeId,
    pub scene: &'a mut SceneTree,
    pub pool: &'a mut PoolManager,
}

impl NodeContext<'_> {
    pub fn this(&mut self) -> Option<&mut Node> {
        self.scene.get_mut(self.node)
    }

    pub fn transform_mut(&mut self) -> Option<&mut Transform> {
        self.scene
            .get_mut(self.node)
            .and_then(|n| n.transform.as_mut())
    }

    pub fn destroy(&mut self) {
        self.scene.request_destroy(self.node);
    }
}

/// Local placement of a node relative to its parent, plus the world values
/// committed by the last build phase.
#[derive(Debug)]
pub struct Transform {
    pub position: Vec2,
    pub scale: Vec2,
    /// Radians.
    pub rotation: f32,
    /// Radians along each axis.
    pub skew: Vec2,
    /// Pivot subtracted from the render matrix only.
    pub offset: Vec2,
    world_matrix: Matrix,
    world_position: Vec2,
    world_rotation: f32,
}

impl Transform {
    pub fn new(pool: &mut PoolManager) -> Self {
        Self {
            position: pool.acquire((0.0, 0.0)),
            scale: pool.acquire((1.0, 1.0)),
            rotation: 0.0,
            skew: pool.acquire((0.0, 0.0)),
            offset: pool.acquire((0.0, 0.0)),
            world_matrix: pool.acquire(None),
            world_position: pool.acquire((0.0, 0.0)),
            world_rotation: 0.0,
        }
    }

    #[must_use]
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position.set(x, y);
        self
    }

    #[must_use]
    pub fn with_scale(mut self, x: f32, y: f32) -> Self {
        self.scale.set(x, y);
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.rotation = radians;
        self
    }

    #[must_use]
    pub fn with_skew(mut self, x: f32, y: f32) -> Self {
        self.skew.set(x, y);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, x: f32, y: f32) -> Self {
        self.offset.set(x, y);
        self
    }

    /// Concatenate this transform onto `matrix` in translate, rotate, scale,
    /// skew order.
    pub fn apply_to(&self, matrix: &mut Matrix) {
        matrix.translate(self.position.x, self.position.y);
        matrix.rotate(self.rotation);
        matrix.scale(self.scale.x, self.scale.y);
        matrix.skew(self.skew.x, self.skew.y);
    }

    pub(crate) fn commit_world(&mut self, matrix: &Matrix) {
        self.world_matrix = *matrix;
        self.world_position.set(matrix.tx, matrix.ty);
        self.world_rotation = matrix.rotation();
    }

    pub fn world_matrix(&self) -> &Matrix {
        &self.world_matrix
    }

    pub fn world_position(&self) -> Vec2 {
        self.world_position
    }

    pub fn world_rotation(&self) -> f32 {
        self.world_rotation
    }

    pub(crate) fn release(self, pool: &mut PoolManager) {
        pool.release_all([
            self.position,
            self.scale,
            self.skew,
            self.offset,
            self.world_position,
        ]);
        pool.release(self.world_matrix);
    }
}

/// Geometry emitted by the primitive compositor, in local space.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeKind {
    Rect { width: f32, height: f32 },
    Polygon(Vec<Vec2>),
    Circle { radius: f32 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Visual {
    /// A texture, or an atlas region of one.
    Sprite { texture: Texture, region: Option<Rect> },
    Shape {
        shape: ShapeKind,
        fill: bool,
        line_width: f32,
    },
}

/// Render component.
#[derive(Debug)]
pub struct Drawable {
    pub color: Color,
    pub visible: bool,
    /// Paint order key; ties keep traversal order.
    pub z_index: i32,
    pub visual: Visual,
}

impl Drawable {
    pub fn new(pool: &mut PoolManager, visual: Visual) -> Self {
        Self {
            color: pool.acquire((1.0, 1.0, 1.0, 1.0)),
            visible: true,
            z_index: 0,
            visual,
        }
    }

    pub fn sprite(pool: &mut PoolManager, texture: Texture) -> Self {
        Self::new(
            pool,
            Visual::Sprite {
                texture,
                region: None,
            },
        )
    }

    pub fn shape(pool: &mut PoolManager, shape: ShapeKind, fill: bool) -> Self {
        Self::new(
            pool,
            Visual::Shape {
                shape,
                fill,
                line_width: 1.0,
            },
        )
    }

    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color.set(color.r, color.g, color.b, color.a);
        self
    }

    #[must_use]
    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub(crate) fn release(self, pool: &mut PoolManager) {
        pool.release(self.color);
    }
}

/// A scene-graph node. Structure (parent, children, flags) is managed by
/// [`SceneTree`]. The drawable is public; the transform and collision
/// components are swapped through [`SceneTree::set_transform`] and
/// [`SceneTree::set_collision`] so physics registration stays in sync.
pub struct Node {
    pub(crate) tags: HashSet<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) in_tree: bool,
    pub(crate) ready: bool,
    pub(crate) destroyed: bool,
    pub(crate) drawn: bool,
    pub(crate) transform: Option<Transform>,
    pub drawable: Option<Drawable>,
    pub(crate) collision: Option<Collision>,
    pub(crate) behaviour: Option<Box<dyn Updatable>>,
    pub(crate) events: EventBus<NodeEvent>,
}

impl Node {
    pub fn new() -> Self {
        Self {
            tags: HashSet::new(),
            parent: None,
            children: Vec::new(),
            in_tree: false,
            ready: false,
            destroyed: false,
            drawn: false,
            transform: None,
            drawable: None,
            collision: None,
            behaviour: None,
            events: EventBus::new(),
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn with_drawable(mut self, drawable: Drawable) -> Self {
        self.drawable = Some(drawable);
        self
    }

    #[must_use]
    pub fn with_collision(mut self, collision: Collision) -> Self {
        self.collision = Some(collision);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_behaviour(mut self, behaviour: impl Updatable + 'static) -> Self {
        self.behaviour = Some(Box::new(behaviour));
        self
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    pub fn transform_mut(&mut self) -> Option<&mut Transform> {
        self.transform.as_mut()
    }

    pub fn collision(&self) -> Option<&Collision> {
        self.collision.as_ref()
    }

    /// Edit the collision shape in place, e.g. via [`Collision::set_polygon`].
    pub fn collision_mut(&mut self) -> Option<&mut Collision> {
        self.collision.as_mut()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_in_tree(&self) -> bool {
        self.in_tree
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// `true` once destruction has been requested.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&NodeEvent) + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, handle: Subscription) -> bool {
        self.events.unsubscribe(handle)
    }

    /// Hand every pooled component back and drop listeners.
    pub(crate) fn release(mut self, pool: &mut PoolManager) {
        if let Some(transform) = self.transform.take() {
            transform.release(pool);
        }
        if let Some(drawable) = self.drawable.take() {
            drawable.release(pool);
        }
        if let Some(mut collision) = self.collision.take() {
            collision.release(pool);
        }
        self.events.clear();
        self.behaviour = None;
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("tags", &self.tags)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("in_tree", &self.in_tree)
            .field("ready", &self.ready)
            .field("destroyed", &self.destroyed)
            .field("transform", &self.transform)
            .field("drawable", &self.drawable)
            .field("has_collision", &self.collision.is_some())
            .field("has_behaviour", &self.behaviour.is_some())
            .finish()
    }
}
