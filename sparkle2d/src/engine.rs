use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::debug::DebugOverlay;
use crate::error::{ConfigError, RenderError};
use crate::math::{Color, Vec2};
use crate::node::NodeEvent;
use crate::pool::PoolManager;
use crate::render::{FrameStats, GpuBackend, Renderer, WgpuBackend};
use crate::scene::SceneTree;

/// Configuration values for the engine window and runtime behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub background: Color,
    /// Draw collider outlines over the scene.
    pub debug_collisions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Sparkle2D".into(),
            width: 1280,
            height: 720,
            vsync: true,
            background: Color::rgba(0.08, 0.08, 0.1, 1.0),
            debug_collisions: false,
        }
    }
}

impl EngineConfig {
    /// Override the window title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Override the initial window size in logical pixels.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vertical sync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub fn with_debug_collisions(mut self, enabled: bool) -> Self {
        self.debug_collisions = enabled;
        self
    }

    /// Parse a JSON config. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// The engine context: pool, scene and renderer, driven once per frame.
pub struct Engine<B: GpuBackend> {
    config: EngineConfig,
    pool: PoolManager,
    scene: SceneTree,
    renderer: Renderer<B>,
    debug: DebugOverlay,
    pointer: Vec2,
    frame: u64,
    elapsed: Duration,
}

impl<B: GpuBackend> Engine<B> {
    pub fn new(config: EngineConfig, backend: B) -> Self {
        let mut renderer = Renderer::new(backend, config.width, config.height);
        renderer.set_background(config.background);

        Self {
            config,
            pool: PoolManager::with_defaults(),
            scene: SceneTree::new(),
            renderer,
            debug: DebugOverlay::new(),
            pointer: Vec2::ZERO,
            frame: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scene(&self) -> &SceneTree {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneTree {
        &mut self.scene
    }

    pub fn pool_mut(&mut self) -> &mut PoolManager {
        &mut self.pool
    }

    /// Scene and pool together, for building nodes.
    pub fn parts_mut(&mut self) -> (&mut SceneTree, &mut PoolManager) {
        (&mut self.scene, &mut self.pool)
    }

    pub fn renderer(&self) -> &Renderer<B> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<B> {
        &mut self.renderer
    }

    pub fn debug_overlay_mut(&mut self) -> &mut DebugOverlay {
        &mut self.debug
    }

    /// Frames drawn so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Sum of every `dt` passed to [`Engine::update`].
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.renderer.resize(width, height);
    }

    pub fn toggle_debug(&mut self) {
        self.config.debug_collisions = !self.config.debug_collisions;
        debug!("collision overlay: {}", self.config.debug_collisions);
    }

    pub fn pointer_moved(&mut self, position: Vec2) {
        self.pointer = position;
    }

    pub fn pointer_position(&self) -> Vec2 {
        self.pointer
    }

    /// Queue [`NodeEvent::Click`] for every collider under the pointer.
    pub fn pointer_released(&mut self) {
        let position = self.pointer;
        for id in self.scene.hit_test(position) {
            self.scene.queue_event(id, NodeEvent::Click { position });
        }
    }

    /// Game logic: ready transitions, then every behaviour pre-order.
    pub fn update(&mut self, dt: f32) {
        self.elapsed += Duration::from_secs_f32(dt.max(0.0));
        self.scene.mark_ready();
        self.scene.update(&mut self.pool, dt);
    }

    /// Build, collide, flush and submit; then deliver queued events and
    /// drain the destroy queue. Events and destruction run even when
    /// submission fails.
    pub fn draw(&mut self) -> Result<FrameStats, RenderError> {
        let submitted = self.render();
        self.scene.dispatch_events(&mut self.pool);
        self.scene.drain_destroy_queue(&mut self.pool);
        self.frame += 1;
        submitted
    }

    /// [`Engine::update`] followed by [`Engine::draw`].
    pub fn tick(&mut self, dt: f32) -> Result<FrameStats, RenderError> {
        self.update(dt);
        self.draw()
    }

    fn render(&mut self) -> Result<FrameStats, RenderError> {
        self.renderer.begin_frame(&mut self.pool)?;
        self.renderer.build(&mut self.scene, &mut self.pool);
        self.scene.step_collisions();
        self.renderer.flush_draw_list(&self.scene, &mut self.pool);
        if self.config.debug_collisions {
            self.debug
                .draw(&self.scene, &mut self.renderer, &mut self.pool);
        }
        self.renderer.end_frame()
    }
}

/// Trait implemented by user code to hook into the engine lifecycle.
pub trait Game {
    /// Called once after the window is created but before the first frame.
    fn init(&mut self, engine: &mut Engine<WgpuBackend>) -> Result<()>;

    /// Called once per frame before the engine's own update.
    fn update(&mut self, _engine: &mut Engine<WgpuBackend>, _dt: f32) -> Result<()> {
        Ok(())
    }
}

struct Running {
    window: Arc<Window>,
    engine: Engine<WgpuBackend>,
    last_frame: Instant,
}

struct App<G> {
    config: EngineConfig,
    game: G,
    running: Option<Running>,
    error: Option<anyhow::Error>,
}

impl<G: Game> App<G> {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();

        let backend = WgpuBackend::new(window.clone(), self.config.vsync)?;
        let mut engine = Engine::new(self.config.clone(), backend);
        engine.resize(size.width, size.height);
        self.game.init(&mut engine)?;
        info!("engine started: {}", self.config.title);

        self.running = Some(Running {
            window,
            engine,
            last_frame: Instant::now(),
        });
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:?}");
        self.error = Some(err);
        event_loop.exit();
    }
}

impl<G: Game> ApplicationHandler for App<G> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if is_pressed(&event, KeyCode::Escape) {
                    event_loop.exit();
                } else if is_pressed(&event, KeyCode::F3) {
                    running.engine.toggle_debug();
                }
            }
            WindowEvent::Resized(size) => running.engine.resize(size.width, size.height),
            WindowEvent::CursorMoved { position, .. } => running
                .engine
                .pointer_moved(Vec2::new(position.x as f32, position.y as f32)),
            WindowEvent::MouseInput {
                state: ElementState::Released,
                button: MouseButton::Left,
                ..
            } => running.engine.pointer_released(),
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - running.last_frame).as_secs_f32();
                running.last_frame = now;

                let result = self
                    .game
                    .update(&mut running.engine, dt)
                    .and_then(|()| Ok(running.engine.tick(dt)?));
                if let Err(err) = result {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }
}

fn is_pressed(event: &KeyEvent, key: KeyCode) -> bool {
    event.state == ElementState::Pressed
        && !event.repeat
        && matches!(event.physical_key, PhysicalKey::Code(code) if code == key)
}

/// Open a window and run `game` until the window is closed.
pub fn run<G: Game>(config: EngineConfig, game: G) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let mut app = App {
        config,
        game,
        running: None,
        error: None,
    };
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
