use std::cell::{Cell, RefCell};
use std::f32::consts::FRAC_PI_2;
use std::rc::Rc;

use approx::assert_relative_eq;
use sparkle2d::render::GpuCommand;
use sparkle2d::{
    Collision, Color, Drawable, Engine, EngineConfig, Matrix, Node, NodeContext, NodeEvent,
    NodeId, PoolManager, Polygon, RecordingBackend, ShapeKind, Texture, TextureHandle,
    Transform, Updatable, Vec2,
};

fn engine() -> Engine<RecordingBackend> {
    Engine::new(
        EngineConfig::default().with_size(800, 600),
        RecordingBackend::new(),
    )
}

fn spawn(
    engine: &mut Engine<RecordingBackend>,
    parent: Option<NodeId>,
    build: impl FnOnce(&mut PoolManager) -> Node,
) -> NodeId {
    let (scene, pool) = engine.parts_mut();
    let node = build(pool);
    let id = scene.insert(node);
    let parent = parent.unwrap_or_else(|| scene.root());
    scene.add_child(parent, id);
    id
}

fn collider(pool: &mut PoolManager, x: f32, y: f32, size: f32) -> Node {
    Node::new()
        .with_transform(Transform::new(pool).with_position(x, y))
        .with_collision(Collision::new(Polygon::rect(0.0, 0.0, size, size).unwrap()))
}

fn record(engine: &mut Engine<RecordingBackend>, id: NodeId) -> Rc<RefCell<Vec<NodeEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    engine
        .scene_mut()
        .subscribe(id, move |e| sink.borrow_mut().push(e.clone()))
        .expect("node exists");
    events
}

fn collision_events(events: &RefCell<Vec<NodeEvent>>) -> Vec<NodeEvent> {
    events
        .borrow()
        .iter()
        .filter(|e| {
            matches!(
                e,
                NodeEvent::CollisionEnter { .. } | NodeEvent::CollisionExit { .. }
            )
        })
        .cloned()
        .collect()
}

fn set_position(engine: &mut Engine<RecordingBackend>, id: NodeId, x: f32, y: f32) {
    let transform = engine
        .scene_mut()
        .get_mut(id)
        .and_then(|n| n.transform_mut())
        .expect("node has a transform");
    transform.position.set(x, y);
}

#[test]
fn world_matrix_composes_three_levels() {
    let mut engine = engine();
    let a = spawn(&mut engine, None, |pool| {
        Node::new().with_transform(
            Transform::new(pool)
                .with_position(10.0, 20.0)
                .with_rotation(FRAC_PI_2),
        )
    });
    let b = spawn(&mut engine, Some(a), |pool| {
        Node::new().with_transform(
            Transform::new(pool)
                .with_position(5.0, 0.0)
                .with_scale(2.0, 3.0),
        )
    });
    let c = spawn(&mut engine, Some(b), |pool| {
        Node::new().with_transform(
            Transform::new(pool)
                .with_position(1.0, 1.0)
                .with_skew(0.3, 0.0),
        )
    });

    engine.tick(1.0 / 60.0).unwrap();

    let mut expected = Matrix::IDENTITY;
    expected.translate(10.0, 20.0);
    expected.rotate(FRAC_PI_2);
    expected.translate(5.0, 0.0);
    expected.scale(2.0, 3.0);
    expected.translate(1.0, 1.0);
    expected.skew(0.3, 0.0);

    let transform = engine.scene().get(c).unwrap().transform().unwrap();
    let world = transform.world_matrix();
    for (got, want) in [
        (world.a, expected.a),
        (world.b, expected.b),
        (world.c, expected.c),
        (world.d, expected.d),
        (world.tx, expected.tx),
        (world.ty, expected.ty),
    ] {
        assert_relative_eq!(got, want, epsilon = 1e-4);
    }

    assert_relative_eq!(transform.world_position().x, 7.0, epsilon = 1e-4);
    assert_relative_eq!(transform.world_position().y, 27.0, epsilon = 1e-4);
    assert_relative_eq!(transform.world_rotation(), FRAC_PI_2, epsilon = 1e-5);
}

#[test]
fn collision_enter_and_exit_fire_once_per_transition() {
    let mut engine = engine();
    let p = spawn(&mut engine, None, |pool| collider(pool, 0.0, 0.0, 10.0));
    let q = spawn(&mut engine, None, |pool| collider(pool, 5.0, 5.0, 10.0));
    let events = record(&mut engine, p);

    engine.tick(0.016).unwrap();
    let frame1 = collision_events(&events);
    assert_eq!(frame1.len(), 1);
    assert!(matches!(frame1[0], NodeEvent::CollisionEnter { other, .. } if other == q));

    set_position(&mut engine, q, 100.0, 100.0);
    engine.tick(0.016).unwrap();
    assert_eq!(
        collision_events(&events)[1..],
        [NodeEvent::CollisionExit { other: q }]
    );

    set_position(&mut engine, q, 5.0, 5.0);
    engine.tick(0.016).unwrap();
    let frame3 = collision_events(&events);
    assert_eq!(frame3.len(), 3);
    assert!(matches!(frame3[2], NodeEvent::CollisionEnter { other, .. } if other == q));

    // Staying in contact does not re-fire.
    engine.tick(0.016).unwrap();
    assert_eq!(collision_events(&events).len(), 3);
}

fn square(size: f32) -> Collision {
    Collision::new(Polygon::rect(0.0, 0.0, size, size).unwrap())
}

#[test]
fn collision_set_after_entering_the_tree_is_registered() {
    let mut engine = engine();
    let a = spawn(&mut engine, None, |pool| collider(pool, 0.0, 0.0, 10.0));
    let b = spawn(&mut engine, None, |pool| {
        Node::new().with_transform(Transform::new(pool).with_position(5.0, 5.0))
    });
    let events = record(&mut engine, a);
    engine.tick(0.016).unwrap();
    assert!(collision_events(&events).is_empty());

    let (scene, pool) = engine.parts_mut();
    scene.set_collision(b, Some(square(10.0)), pool);
    assert!(scene.physics().contains(b));

    engine.tick(0.016).unwrap();
    let hits = collision_events(&events);
    assert_eq!(hits.len(), 1);
    assert!(matches!(hits[0], NodeEvent::CollisionEnter { other, .. } if other == b));

    let (scene, pool) = engine.parts_mut();
    scene.set_collision(b, None, pool);
    assert!(!scene.physics().contains(b));

    engine.tick(0.016).unwrap();
    assert_eq!(
        collision_events(&events)[1..],
        [NodeEvent::CollisionExit { other: b }]
    );
}

#[test]
fn removing_a_collider_transform_stops_it_colliding() {
    let mut engine = engine();
    let a = spawn(&mut engine, None, |pool| collider(pool, 0.0, 0.0, 10.0));
    let b = spawn(&mut engine, None, |pool| collider(pool, 5.0, 5.0, 10.0));
    let events = record(&mut engine, a);
    engine.tick(0.016).unwrap();
    assert_eq!(collision_events(&events).len(), 1);

    let (scene, pool) = engine.parts_mut();
    scene.set_transform(b, None, pool);
    assert!(!scene.physics().contains(b));
    assert!(!scene.get(b).unwrap().collision().unwrap().is_shape_ready());

    engine.tick(0.016).unwrap();
    engine.tick(0.016).unwrap();
    assert!(engine.scene().collision_detection(a).is_empty());
    assert_eq!(
        collision_events(&events)[1..],
        [NodeEvent::CollisionExit { other: b }]
    );

    let (scene, pool) = engine.parts_mut();
    let transform = Transform::new(pool).with_position(5.0, 5.0);
    scene.set_transform(b, Some(transform), pool);
    engine.tick(0.016).unwrap();
    let all = collision_events(&events);
    assert_eq!(all.len(), 3);
    assert!(matches!(all[2], NodeEvent::CollisionEnter { other, .. } if other == b));
}

#[test]
#[should_panic(expected = "needs a transform")]
fn collision_without_transform_is_rejected() {
    let mut engine = engine();
    let bare = spawn(&mut engine, None, |_| Node::new());
    let (scene, pool) = engine.parts_mut();
    scene.set_collision(bare, Some(square(4.0)), pool);
}

#[test]
fn detached_nodes_never_become_ready_after_exit() {
    let mut engine = engine();
    let id = spawn(&mut engine, None, |pool| {
        Node::new().with_transform(Transform::new(pool))
    });
    let events = record(&mut engine, id);
    let root = engine.scene().root();

    engine.tick(0.016).unwrap();
    engine.scene_mut().remove_child(root, id);
    engine.tick(0.016).unwrap();
    engine.tick(0.016).unwrap();
    assert!(!engine.scene().get(id).unwrap().is_ready());
    assert_eq!(
        *events.borrow(),
        vec![NodeEvent::EnterTree, NodeEvent::ExitTree]
    );

    // Re-attaching waits for a fresh first draw.
    engine.scene_mut().add_child(root, id);
    engine.tick(0.016).unwrap();
    assert!(!engine.scene().get(id).unwrap().is_ready());
    engine.tick(0.016).unwrap();
    assert_eq!(
        *events.borrow(),
        vec![
            NodeEvent::EnterTree,
            NodeEvent::ExitTree,
            NodeEvent::EnterTree,
            NodeEvent::Ready,
        ]
    );
}

#[test]
fn square_and_scaled_rotated_triangle_collide() {
    let mut engine = engine();
    let square = spawn(&mut engine, None, |pool| collider(pool, 100.0, 100.0, 100.0));
    let triangle = spawn(&mut engine, None, |pool| {
        Node::new()
            .with_transform(
                Transform::new(pool)
                    .with_position(200.0, 100.0)
                    .with_scale(-2.0, 1.0)
                    .with_rotation(-0.5),
            )
            .with_collision(Collision::new(
                Polygon::new(vec![
                    Vec2::new(0.0, 0.0),
                    Vec2::new(100.0, 0.0),
                    Vec2::new(0.0, 100.0),
                ])
                .unwrap(),
            ))
    });

    engine.tick(0.016).unwrap();

    let results = engine.scene().collision_detection(triangle);
    let hit = results
        .iter()
        .find(|r| r.body == square)
        .expect("triangle overlaps the square");
    assert!(hit.overlap.length() > 0.0);
}

#[derive(Default)]
struct SelfDestruct;

impl Updatable for SelfDestruct {
    fn update(&mut self, ctx: &mut NodeContext<'_>, _dt: f32) {
        ctx.destroy();
    }
}

#[test]
fn destroy_requested_during_update_is_drawn_then_removed() {
    let mut engine = engine();
    let doomed = spawn(&mut engine, None, |pool| {
        Node::new()
            .with_transform(Transform::new(pool))
            .with_drawable(Drawable::shape(
                pool,
                ShapeKind::Rect {
                    width: 10.0,
                    height: 10.0,
                },
                true,
            ))
            .with_behaviour(SelfDestruct)
    });
    let events = record(&mut engine, doomed);

    engine.tick(0.016).unwrap();
    assert_eq!(engine.renderer().last_draw_order(), &[doomed]);
    assert!(!engine.scene().contains(doomed));
    assert_eq!(events.borrow().last(), Some(&NodeEvent::Destroyed));

    engine.tick(0.016).unwrap();
    assert!(engine.renderer().last_draw_order().is_empty());
}

#[test]
fn equal_z_keeps_child_order() {
    let mut engine = engine();
    let colors = [Color::RED, Color::GREEN, Color::BLUE];
    let ids: Vec<NodeId> = [1, 0, 1]
        .into_iter()
        .zip(colors)
        .map(|(z, color)| {
            spawn(&mut engine, None, |pool| {
                Node::new()
                    .with_transform(Transform::new(pool))
                    .with_drawable(
                        Drawable::shape(pool, ShapeKind::Circle { radius: 4.0 }, true)
                            .with_color(color)
                            .with_z_index(z),
                    )
            })
        })
        .collect();

    engine.tick(0.016).unwrap();

    assert_eq!(engine.renderer().last_draw_order(), &[ids[1], ids[0], ids[2]]);
    assert_eq!(
        engine.renderer().backend().draw_colors(),
        vec![Color::GREEN, Color::RED, Color::BLUE]
    );
}

#[test]
fn batches_break_on_compositor_switches() {
    let mut engine = engine();
    let texture = Texture::new(TextureHandle(1), 16, 16);
    for i in 0..3 {
        spawn(&mut engine, None, |pool| {
            Node::new()
                .with_transform(Transform::new(pool).with_position(i as f32 * 20.0, 0.0))
                .with_drawable(Drawable::sprite(pool, texture))
        });
    }

    let stats = engine.tick(0.016).unwrap();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.vertices, 18);
    assert_eq!(stats.nodes_drawn, 3);

    spawn(&mut engine, None, |pool| {
        Node::new()
            .with_transform(Transform::new(pool))
            .with_drawable(
                Drawable::shape(
                    pool,
                    ShapeKind::Rect {
                        width: 4.0,
                        height: 4.0,
                    },
                    true,
                )
                .with_z_index(0),
            )
    });
    spawn(&mut engine, None, |pool| {
        Node::new()
            .with_transform(Transform::new(pool))
            .with_drawable(Drawable::sprite(pool, texture).with_z_index(1))
    });

    let stats = engine.tick(0.016).unwrap();
    // Three sprites, the rect, then the top sprite.
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(engine.renderer().backend().draw_calls(), 3);
}

#[test]
fn offset_moves_rendering_but_not_collision() {
    let mut engine = engine();
    let texture = Texture::new(TextureHandle(3), 10, 10);
    let id = spawn(&mut engine, None, |pool| {
        Node::new()
            .with_transform(
                Transform::new(pool)
                    .with_position(50.0, 50.0)
                    .with_offset(5.0, 5.0),
            )
            .with_drawable(Drawable::sprite(pool, texture))
            .with_collision(Collision::new(Polygon::rect(0.0, 0.0, 10.0, 10.0).unwrap()))
    });

    engine.tick(0.016).unwrap();

    let collision = engine.scene().get(id).unwrap().collision().unwrap();
    assert_eq!(collision.world_points()[0], Vec2::new(50.0, 50.0));

    let uploaded = engine
        .renderer()
        .backend()
        .commands()
        .iter()
        .find_map(|c| match c {
            GpuCommand::UploadBuffer(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .expect("sprite geometry was uploaded");
    let first_x = f32::from_le_bytes(uploaded[0..4].try_into().unwrap());
    let first_y = f32::from_le_bytes(uploaded[4..8].try_into().unwrap());
    assert_eq!((first_x, first_y), (45.0, 45.0));
}

#[test]
fn ready_fires_on_the_tick_after_first_draw() {
    let mut engine = engine();
    let id = spawn(&mut engine, None, |pool| {
        Node::new().with_transform(Transform::new(pool))
    });
    let events = record(&mut engine, id);
    let ready_count = || {
        events
            .borrow()
            .iter()
            .filter(|e| **e == NodeEvent::Ready)
            .count()
    };

    engine.tick(0.016).unwrap();
    assert!(!engine.scene().get(id).unwrap().is_ready());
    assert_eq!(ready_count(), 0);

    engine.tick(0.016).unwrap();
    assert!(engine.scene().get(id).unwrap().is_ready());
    assert_eq!(ready_count(), 1);

    engine.tick(0.016).unwrap();
    assert_eq!(ready_count(), 1);
}

struct Spawner {
    counter: Rc<Cell<u32>>,
    spawned: bool,
}

struct Counter(Rc<Cell<u32>>);

impl Updatable for Counter {
    fn update(&mut self, _ctx: &mut NodeContext<'_>, _dt: f32) {
        self.0.set(self.0.get() + 1);
    }
}

impl Updatable for Spawner {
    fn update(&mut self, ctx: &mut NodeContext<'_>, _dt: f32) {
        if self.spawned {
            return;
        }
        self.spawned = true;
        let child = ctx
            .scene
            .insert(Node::new().with_behaviour(Counter(self.counter.clone())));
        ctx.scene.add_child(ctx.node, child);
    }
}

#[test]
fn nodes_attached_during_update_run_next_tick() {
    let mut engine = engine();
    let counter = Rc::new(Cell::new(0));
    spawn(&mut engine, None, |_| {
        Node::new().with_behaviour(Spawner {
            counter: counter.clone(),
            spawned: false,
        })
    });

    engine.tick(0.016).unwrap();
    assert_eq!(counter.get(), 0);
    engine.tick(0.016).unwrap();
    assert_eq!(counter.get(), 1);
}

#[test]
fn pointer_release_clicks_colliders_under_the_pointer() {
    let mut engine = engine();
    let target = spawn(&mut engine, None, |pool| collider(pool, 10.0, 10.0, 50.0));
    let events = record(&mut engine, target);
    engine.tick(0.016).unwrap();

    engine.pointer_moved(Vec2::new(200.0, 200.0));
    engine.pointer_released();
    engine.tick(0.016).unwrap();
    assert!(!events
        .borrow()
        .iter()
        .any(|e| matches!(e, NodeEvent::Click { .. })));

    engine.pointer_moved(Vec2::new(30.0, 30.0));
    engine.pointer_released();
    engine.tick(0.016).unwrap();
    assert!(events.borrow().contains(&NodeEvent::Click {
        position: Vec2::new(30.0, 30.0)
    }));
}

#[test]
fn debug_overlay_draws_collider_shapes() {
    let mut engine = Engine::new(
        EngineConfig::default().with_debug_collisions(true),
        RecordingBackend::new(),
    );
    spawn(&mut engine, None, |pool| collider(pool, 0.0, 0.0, 10.0));

    let stats = engine.tick(0.016).unwrap();
    // Fill and outline use different colors.
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.nodes_drawn, 0);
}
