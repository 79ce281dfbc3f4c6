use crate::backend::{
    ColoredQuad, ColoredVertex, GraphicsDriver, TexturedQuad, TexturedVertex, WindowSystem,
};
use crate::config::CompositorConfig;
use crate::error::Result;
use crate::services::window_table::{TrackedWindow, WindowTable};
use crate::{debug_if_enabled, gl_check, trace_if_enabled};
use std::time::{Duration, Instant};

/// Отступ фоновой подложки от краёв overlay
const BACKGROUND_INSET: f32 = 5.0;
const BACKGROUND_TOP: [f32; 3] = [0.7, 0.0, 0.9];
const BACKGROUND_BOTTOM: [f32; 3] = [0.3, 0.0, 0.4];
const FPS_REPORT_FRAMES: u64 = 600;

/// Покадровая перерисовка всех окон таблицы на холст.
pub struct Compositor {
    clear_color: [f32; 4],
    draw_background: bool,
    frame_interval: Duration,
    viewport: (u32, u32),
    y_inverted: bool,
    frames: u64,
    window_started: Instant,
}

impl Compositor {
    pub fn new(config: &CompositorConfig, viewport: (u32, u32), y_inverted: bool) -> Self {
        Self {
            clear_color: config.clear_color,
            draw_background: config.draw_background,
            frame_interval: config.frame_interval(),
            viewport,
            y_inverted,
            frames: 0,
            window_started: Instant::now(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Один кадр: ожидание X, очистка, фон, окна, swap, пауза и запрос следующего кадра.
    ///
    /// Ошибки драйвера только логируются; ошибкой завершается лишь отправка
    /// уведомления о следующем кадре.
    pub fn frame(
        &mut self,
        table: &WindowTable,
        window_system: &mut dyn WindowSystem,
        graphics: &mut dyn GraphicsDriver,
    ) -> Result<()> {
        graphics.wait_native();
        gl_check!(graphics, "glXWaitX");

        graphics.clear(self.clear_color);
        gl_check!(graphics, "glClear");

        if self.draw_background {
            graphics.draw_background(&self.background_quad());
            gl_check!(graphics, "draw_background");
        }

        table.for_each(|tracked| self.draw_window(tracked, graphics));

        graphics.wait_gl();
        gl_check!(graphics, "glXWaitGL");
        graphics.present();
        gl_check!(graphics, "glXSwapBuffers");

        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }

        self.frames += 1;
        self.report_rate();

        window_system.send_frame_tick()
    }

    fn draw_window(&self, tracked: &TrackedWindow, graphics: &mut dyn GraphicsDriver) {
        let target = tracked.target;

        // Окна X хранят premultiplied alpha
        let blend = tracked.geometry.has_alpha();
        graphics.set_blending(blend);
        gl_check!(graphics, if blend { "glEnable(GL_BLEND)" } else { "glDisable(GL_BLEND)" });

        graphics.bind_texture(target, tracked.texture);
        gl_check!(graphics, "glBindTexture");
        graphics.bind_image(tracked.binding);
        gl_check!(graphics, "glXBindTexImageEXT");
        graphics.set_linear_filter(target);
        gl_check!(graphics, "glTexParameteri");

        graphics.draw_textured(target, &window_quad(tracked, self.y_inverted));
        gl_check!(graphics, "draw_textured");

        graphics.unbind_texture(target);
        gl_check!(graphics, "glBindTexture(0)");
        graphics.release_image(tracked.binding);
        gl_check!(graphics, "glXReleaseTexImageEXT");

        trace_if_enabled!("Окно {} выведено ({}, blend: {})", tracked.handle, target, blend);
    }

    fn background_quad(&self) -> ColoredQuad {
        let (width, height) = (self.viewport.0 as f32, self.viewport.1 as f32);
        let (left, top) = (BACKGROUND_INSET, BACKGROUND_INSET);
        let (right, bottom) = (width - BACKGROUND_INSET, height - BACKGROUND_INSET);
        ColoredQuad {
            vertices: [
                ColoredVertex { position: [left, top], color: BACKGROUND_TOP },
                ColoredVertex { position: [right, top], color: BACKGROUND_TOP },
                ColoredVertex { position: [right, bottom], color: BACKGROUND_BOTTOM },
                ColoredVertex { position: [left, bottom], color: BACKGROUND_BOTTOM },
            ],
        }
    }

    fn report_rate(&mut self) {
        if self.frames % FPS_REPORT_FRAMES != 0 {
            return;
        }
        let elapsed = self.window_started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            debug_if_enabled!(
                "Кадр {}: {:.1} кадров/с",
                self.frames,
                FPS_REPORT_FRAMES as f64 / elapsed
            );
        }
        self.window_started = Instant::now();
    }
}

/// Квад окна в пикселях overlay.
///
/// Для прямоугольных текстур координаты пиксельные, для 2D нормализованные.
/// Без Y-инверсии у привязанного образа t = 0 соответствует нижней строке,
/// поэтому верх квада берёт координату низа текстуры.
pub fn window_quad(tracked: &TrackedWindow, y_inverted: bool) -> TexturedQuad {
    let geometry = tracked.geometry;
    let (width, height) = (geometry.width as f32, geometry.height as f32);
    let (x0, y0) = (geometry.x as f32, geometry.y as f32);
    let (x1, y1) = (x0 + width, y0 + height);

    let (sx, sy) = if tracked.target.is_normalized() {
        (1.0, 1.0)
    } else {
        (width, height)
    };
    let (left, right) = (0.0, sx);
    let (top, bottom) = if y_inverted { (0.0, sy) } else { (sy, 0.0) };

    TexturedQuad {
        vertices: [
            TexturedVertex { position: [x0, y0], tex_coord: [left, top] },
            TexturedVertex { position: [x0, y1], tex_coord: [left, bottom] },
            TexturedVertex { position: [x1, y1], tex_coord: [right, bottom] },
            TexturedVertex { position: [x1, y0], tex_coord: [right, top] },
        ],
    }
}
