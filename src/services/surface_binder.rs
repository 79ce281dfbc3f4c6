use crate::backend::{GraphicsDriver, TextureFormat, TextureTarget, WindowSystem};
use crate::error::{CompositorError, Result};
use crate::events::WindowHandle;
use crate::gl_check;
use crate::services::window_table::TrackedWindow;
use tracing::{debug, error, info};

/// Превращает окно в текстуру, готовую к выводу.
///
/// Текстура не загружается при привязке: образ pixmap привязывается
/// заново в каждом кадре, отслеживания повреждений здесь нет.
pub struct SurfaceBinder;

impl SurfaceBinder {
    pub fn bind(
        &self,
        window: WindowHandle,
        window_system: &mut dyn WindowSystem,
        graphics: &mut dyn GraphicsDriver,
    ) -> Result<TrackedWindow> {
        let geometry = window_system.query_geometry(window)?;
        let format = TextureFormat::for_depth(geometry.depth);

        let pixmap = window_system.name_window_pixmap(window)?;
        debug!("Получен pixmap {:#x} для {}", pixmap.0, window);

        let binding = match graphics.create_binding(pixmap, format) {
            Ok(binding) => binding,
            Err(e) => {
                window_system.free_pixmap(pixmap);
                return Err(e);
            }
        };
        gl_check!(graphics, "glXCreatePixmap");

        let raw_target = match graphics.binding_target(binding) {
            Ok(raw) => raw,
            Err(e) => {
                graphics.destroy_binding(binding);
                window_system.free_pixmap(pixmap);
                return Err(e);
            }
        };
        gl_check!(graphics, "glXQueryDrawable");

        let Some(target) = TextureTarget::from_raw(raw_target) else {
            error!("Окно {}: неподдерживаемый texture target {:#x}", window, raw_target);
            graphics.destroy_binding(binding);
            window_system.free_pixmap(pixmap);
            return Err(CompositorError::InvalidTarget(raw_target));
        };

        let texture = match graphics.create_texture() {
            Ok(texture) => texture,
            Err(e) => {
                graphics.destroy_binding(binding);
                window_system.free_pixmap(pixmap);
                return Err(e);
            }
        };
        gl_check!(graphics, "glGenTextures");

        info!(
            "Окно {} {}: binding {:#x}, target {}, текстура {}",
            window, geometry, binding.0, target, texture.0
        );

        Ok(TrackedWindow {
            handle: window,
            geometry,
            pixmap,
            binding,
            texture,
            target,
            format,
        })
    }

    /// Освобождает текстуру, привязку и pixmap окна, именно в этом порядке
    pub fn release(
        &self,
        tracked: TrackedWindow,
        window_system: &mut dyn WindowSystem,
        graphics: &mut dyn GraphicsDriver,
    ) {
        graphics.delete_texture(tracked.texture);
        gl_check!(graphics, "glDeleteTextures");
        graphics.destroy_binding(tracked.binding);
        gl_check!(graphics, "glXDestroyPixmap");
        window_system.free_pixmap(tracked.pixmap);
        debug!("Ресурсы окна {} освобождены", tracked.handle);
    }
}
