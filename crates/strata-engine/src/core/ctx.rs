use winit::window::{Window, WindowId};

use crate::device::{DisplaySlot, Gpu, SurfaceErrorAction};
use crate::render::RenderError;
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

use super::app::AppControl;

pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl WindowCtx<'_> {
    /// Drawable size in physical pixels.
    pub fn physical_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn scale_factor(&self) -> f64 {
        self.window.scale_factor()
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }
}

/// Per-frame context handed to [`App::on_frame`](super::App::on_frame).
///
/// `'a` is the callback, `'w` the window borrow held by [`Gpu`].
pub struct FrameCtx<'a, 'w> {
    pub window: WindowCtx<'a>,
    pub gpu: &'a mut Gpu<'w>,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

impl FrameCtx<'_, '_> {
    /// Acquires the next surface image, exposes it through `display` while
    /// `draw` runs and presents it.
    ///
    /// Surface errors skip the frame unless they are fatal. Render errors
    /// the context can recover from are logged and the frame is dropped;
    /// other render errors end the application.
    pub fn render<F>(&mut self, display: &DisplaySlot, draw: F) -> AppControl
    where
        F: FnOnce() -> Result<(), RenderError>,
    {
        let (width, height) = self.window.physical_size();
        if width == 0 || height == 0 {
            return AppControl::Continue;
        }

        let frame = match self.gpu.begin_frame() {
            Ok(frame) => frame,
            Err(err) => {
                return match self.gpu.handle_surface_error(err) {
                    SurfaceErrorAction::Fatal => AppControl::Exit,
                    _ => AppControl::Continue,
                };
            }
        };

        display.set(frame.view.clone(), frame.size());
        let result = draw();
        display.clear();
        self.gpu.present(frame);

        match result {
            Ok(()) => AppControl::Continue,
            Err(err) if err.is_recoverable() => {
                log::warn!("frame {} dropped: {err}", self.time.frame_index);
                AppControl::Continue
            }
            Err(err) => {
                log::error!("rendering failed: {err}");
                AppControl::Exit
            }
        }
    }
}
