use anyhow::Result;
use log::info;
use sparkle2d::{
    Collision, Color, Drawable, Engine, EngineConfig, Game, Node, NodeContext, NodeEvent,
    Polygon, ShapeKind, Transform, Updatable, Vec2, WgpuBackend,
};

/// Slides its node back and forth between `min_x` and `max_x`.
struct Patrol {
    speed: f32,
    min_x: f32,
    max_x: f32,
}

impl Updatable for Patrol {
    fn update(&mut self, ctx: &mut NodeContext<'_>, dt: f32) {
        let Some(transform) = ctx.transform_mut() else {
            return;
        };
        transform.position.x += self.speed * dt;
        if transform.position.x > self.max_x || transform.position.x < self.min_x {
            self.speed = -self.speed;
            transform.position.x = transform.position.x.clamp(self.min_x, self.max_x);
        }
    }

    fn on_event(&mut self, ctx: &mut NodeContext<'_>, event: &NodeEvent) {
        let tint = match event {
            NodeEvent::CollisionEnter { .. } => Color::RED,
            NodeEvent::CollisionExit { .. } => Color::WHITE,
            _ => return,
        };
        if let Some(drawable) = ctx.this().and_then(|n| n.drawable.as_mut()) {
            drawable.color = tint;
        }
    }
}

struct Spin(f32);

impl Updatable for Spin {
    fn update(&mut self, ctx: &mut NodeContext<'_>, dt: f32) {
        if let Some(transform) = ctx.transform_mut() {
            transform.rotation += self.0 * dt;
        }
    }

    fn on_event(&mut self, ctx: &mut NodeContext<'_>, event: &NodeEvent) {
        if let NodeEvent::Click { .. } = event {
            self.0 = -self.0;
            info!("triangle {:?} reversed", ctx.node);
        }
    }
}

struct CollisionDemo;

impl Game for CollisionDemo {
    fn init(&mut self, engine: &mut Engine<WgpuBackend>) -> Result<()> {
        let white = engine
            .renderer_mut()
            .backend_mut()
            .create_texture_rgba(&[255; 4 * 16 * 16], 16, 16);

        let (scene, pool) = engine.parts_mut();
        let root = scene.root();

        let square = Node::new()
            .with_tag("square")
            .with_transform(Transform::new(pool).with_position(100.0, 250.0))
            .with_drawable(Drawable::shape(
                pool,
                ShapeKind::Rect {
                    width: 100.0,
                    height: 100.0,
                },
                true,
            ))
            .with_collision(Collision::new(Polygon::rect(0.0, 0.0, 100.0, 100.0)?))
            .with_behaviour(Patrol {
                speed: 120.0,
                min_x: 50.0,
                max_x: 600.0,
            });
        let square = scene.insert(square);
        scene.add_child(root, square);

        let triangle_points = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(0.0, 100.0),
        ];
        let triangle = Node::new()
            .with_tag("triangle")
            .with_transform(
                Transform::new(pool)
                    .with_position(400.0, 300.0)
                    .with_scale(-2.0, 1.0)
                    .with_offset(-25.0, 25.0),
            )
            .with_drawable(
                Drawable::shape(pool, ShapeKind::Polygon(triangle_points.clone()), true)
                    .with_color(Color::rgba(0.27, 0.67, 0.53, 1.0))
                    .with_z_index(1),
            )
            .with_collision(Collision::new(Polygon::new(triangle_points)?))
            .with_behaviour(Spin(0.8));
        let triangle = scene.insert(triangle);
        scene.add_child(root, triangle);

        // A sprite riding on the triangle, drawn beneath it.
        let badge = Node::new()
            .with_transform(Transform::new(pool).with_position(10.0, 10.0))
            .with_drawable(
                Drawable::sprite(pool, white)
                    .with_color(Color::rgba(1.0, 0.9, 0.2, 1.0))
                    .with_z_index(-1),
            );
        let badge = scene.insert(badge);
        scene.add_child(triangle, badge);

        scene.subscribe(square, |event| {
            if let NodeEvent::CollisionEnter { other, overlap } = event {
                info!("square hit {other:?}, overlap {:.1}", overlap.length());
            }
        });

        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let config = EngineConfig::default()
        .with_title("Sparkle2D - Collision Demo")
        .with_size(800, 600)
        .with_debug_collisions(true);
    sparkle2d::run(config, CollisionDemo)
}
