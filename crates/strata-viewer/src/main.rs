use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use kurbo::{Point, Rect, Vec2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use strata_engine::core::{App, AppControl, FrameCtx};
use strata_engine::device::{ContextManager, DisplaySlot, GpuInit};
use strata_engine::logging::{init_logging, LoggingConfig};
use strata_engine::paint::Color;
use strata_engine::painter::{Shape, ShapeItem};
use strata_engine::render::cache::Residency;
use strata_engine::render::{AntialiasingMode, Gal, GalConfig};
use strata_engine::view::{LayerId, Scene, SceneConfig, ViewItem};
use strata_engine::window::{Runtime, RuntimeConfig};

/// Pixels of scroll per wheel line.
const LINE_PIXELS: f64 = 40.0;
/// Zoom change per pixel of scroll.
const ZOOM_STEP: f64 = 0.005;
const MAX_WHEEL_ROTATION: f64 = 100.0;

#[derive(Debug, Clone)]
struct ViewerConfig {
    rects: usize,
    circles: usize,
    world: Rect,
    seed: u64,
    antialiasing: AntialiasingMode,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            rects: 1000,
            circles: 1000,
            world: Rect::new(0.0, 0.0, 2000.0, 2000.0),
            seed: 0x5eed_cafe,
            antialiasing: AntialiasingMode::Fast,
        }
    }
}

const RECT_LAYERS: u32 = 4;
const CIRCLE_LAYERS: u32 = 4;

struct Viewer {
    config: ViewerConfig,
    scene: Scene,
    /// The scene only keeps weak references.
    items: Vec<Rc<dyn ViewItem>>,
    display: DisplaySlot,
    cursor: Point,
    drag_from: Option<Point>,
}

impl Viewer {
    fn new(config: ViewerConfig) -> Self {
        let mut scene = Scene::new(SceneConfig {
            layer_count: RECT_LAYERS + CIRCLE_LAYERS,
            initial_scale: 1.0,
            ..SceneConfig::default()
        });

        let settings = scene.painter_mut().settings_mut();
        for layer in 0..RECT_LAYERS + CIRCLE_LAYERS {
            let t = layer as f32 / (RECT_LAYERS + CIRCLE_LAYERS) as f32;
            settings.set_layer_color(LayerId(layer), Color::from_straight(0.2 + 0.8 * t, 0.8 - 0.6 * t, 0.6, 0.8));
        }

        let mut viewer = Self {
            config,
            scene,
            items: Vec::new(),
            display: DisplaySlot::new(),
            cursor: Point::ZERO,
            drag_from: None,
        };
        viewer.populate();
        viewer
    }

    fn populate(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let world = self.config.world;

        for _ in 0..self.config.rects {
            let origin =
                Point::new(rng.random_range(world.x0..world.x1), rng.random_range(world.y0..world.y1));
            let size = (rng.random_range(4.0..40.0), rng.random_range(4.0..40.0));
            let layer = LayerId(rng.random_range(0..RECT_LAYERS));
            self.push(Shape::Rectangle(Rect::from_origin_size(origin, size)), layer);
        }
        for _ in 0..self.config.circles {
            let center =
                Point::new(rng.random_range(world.x0..world.x1), rng.random_range(world.y0..world.y1));
            let radius = rng.random_range(2.0..25.0);
            let layer = LayerId(RECT_LAYERS + rng.random_range(0..CIRCLE_LAYERS));
            self.push(Shape::Circle { center, radius }, layer);
        }
        log::info!("scene holds {} items", self.scene.item_count());
    }

    fn push(&mut self, shape: Shape, layer: LayerId) {
        let item: Rc<dyn ViewItem> = Rc::new(ShapeItem::new(shape, [layer]));
        self.scene.add(&item, None);
        self.items.push(item);
    }

    fn attach_gal(&mut self, ctx: &FrameCtx<'_, '_>) {
        let (width, height) = ctx.window.physical_size();
        let context = ctx.gpu.create_context(self.display.clone());
        let mut gal = Gal::new(
            Box::new(context),
            Arc::new(ContextManager::new()),
            GalConfig {
                residency: Residency::Device,
                antialiasing: self.config.antialiasing,
                ..GalConfig::default()
            },
        );
        gal.resize_screen(width, height);
        self.scene.set_screen_size(width, height);
        self.scene.set_gal(gal);
        self.scene.set_viewport(self.config.world);
        log::info!("renderer ready at {width}x{height}");
    }

    fn zoom(&mut self, rotation: f64) {
        let rotation = rotation.clamp(-MAX_WHEEL_ROTATION, MAX_WHEEL_ROTATION);
        let anchor = self.scene.to_world(self.cursor);
        let scale = self.scene.scale() * (1.0 + rotation * ZOOM_STEP);
        self.scene.set_scale(scale, Some(anchor));
    }

    fn cycle_antialiasing(&mut self) {
        let Some(gal) = self.scene.gal_mut() else {
            return;
        };
        let mode = gal.antialiasing_mode().next();
        gal.set_antialiasing_mode(mode);
        self.config.antialiasing = mode;
        self.scene.mark_dirty();
        log::info!("antialiasing: {mode:?}");
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Some(gal) = self.scene.gal_mut() {
            gal.resize_screen(width, height);
        }
        self.scene.set_screen_size(width, height);
    }
}

impl App for Viewer {
    fn on_window_event(&mut self, _window_id: WindowId, event: &WindowEvent) -> AppControl {
        match event {
            WindowEvent::Resized(size) => self.resize(size.width, size.height),

            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Point::new(position.x, position.y);
                if let Some(from) = self.drag_from {
                    let delta: Vec2 = self.scene.to_world_vec(self.cursor - from);
                    let center = self.scene.center() - delta;
                    self.scene.set_center(center);
                    self.drag_from = Some(self.cursor);
                }
            }

            WindowEvent::MouseInput { state, button: MouseButton::Left | MouseButton::Middle, .. } => {
                self.drag_from = match state {
                    ElementState::Pressed => Some(self.cursor),
                    ElementState::Released => None,
                };
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let rotation = match delta {
                    MouseScrollDelta::LineDelta(_, y) => f64::from(*y) * LINE_PIXELS,
                    MouseScrollDelta::PixelDelta(p) => p.y,
                };
                self.zoom(rotation);
            }

            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::KeyA) => self.cycle_antialiasing(),
                    PhysicalKey::Code(KeyCode::Escape) => return AppControl::Exit,
                    _ => {}
                }
            }

            _ => {}
        }
        AppControl::Continue
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        if self.scene.gal().is_none() {
            self.attach_gal(ctx);
        }
        let scene = &mut self.scene;
        ctx.render(&self.display, || scene.redraw())
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let viewer = Viewer::new(ViewerConfig::default());
    Runtime::run(
        RuntimeConfig {
            title: "strata viewer".to_string(),
            ..RuntimeConfig::default()
        },
        GpuInit::default(),
        viewer,
    )
}
