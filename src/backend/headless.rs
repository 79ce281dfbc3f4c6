use super::{
    Backend, ColoredQuad, GraphicsDriver, PixmapHandle, SurfaceBinding, TextureFormat,
    TextureId, TextureTarget, TexturedQuad, WindowSystem, TARGET_TEXTURE_RECTANGLE,
};
use crate::error::{CompositorError, Result};
use crate::events::{Notification, WindowGeometry, WindowHandle};
use crate::{debug_if_enabled, trace_if_enabled};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::info;

pub const HEADLESS_ROOT: WindowHandle = WindowHandle(0x1e3);
pub const HEADLESS_OVERLAY: WindowHandle = WindowHandle(0x1e4);
pub const HEADLESS_CANVAS: WindowHandle = WindowHandle(0x1e5);

/// Команда, полученная headless-драйвером
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    CreateBinding { pixmap: PixmapHandle, format: TextureFormat },
    DestroyBinding(SurfaceBinding),
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    WaitNative,
    Clear([f32; 4]),
    Background(ColoredQuad),
    Blending(bool),
    BindTexture { target: TextureTarget, texture: TextureId },
    BindImage(SurfaceBinding),
    LinearFilter(TextureTarget),
    Draw { target: TextureTarget, quad: TexturedQuad },
    Unbind(TextureTarget),
    ReleaseImage(SurfaceBinding),
    WaitGl,
    Present,
}

/// Общий журнал headless-бэкенда
#[derive(Debug, Default)]
pub struct HeadlessLog {
    pub calls: Vec<DrawCall>,
    pub frame_ticks: u64,
    pub named_pixmaps: Vec<PixmapHandle>,
    pub freed_pixmaps: Vec<PixmapHandle>,
}

impl HeadlessLog {
    /// Сбрасывает команды и pixmap-журналы; счётчик кадров сохраняется
    pub fn clear(&mut self) {
        self.calls.clear();
        self.named_pixmaps.clear();
        self.freed_pixmaps.clear();
    }
}

#[cfg(test)]
impl HeadlessLog {
    pub fn count(&self, pred: impl Fn(&DrawCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Состояние смешивания, действовавшее для каждого вывода текстуры
    pub fn blending_per_draw(&self) -> Vec<bool> {
        let mut blending = false;
        let mut result = Vec::new();
        for call in &self.calls {
            match call {
                DrawCall::Blending(enabled) => blending = *enabled,
                DrawCall::Draw { .. } => result.push(blending),
                _ => {}
            }
        }
        result
    }

    pub fn draws(&self) -> Vec<(TextureTarget, TexturedQuad)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DrawCall::Draw { target, quad } => Some((*target, *quad)),
                _ => None,
            })
            .collect()
    }

    pub fn live_textures(&self) -> usize {
        let created = self.count(|c| matches!(c, DrawCall::CreateTexture(_)));
        let deleted = self.count(|c| matches!(c, DrawCall::DeleteTexture(_)));
        created - deleted
    }
}

pub type SharedLog = Arc<Mutex<HeadlessLog>>;

pub struct HeadlessWindowSystem {
    screen: (u32, u32),
    windows: HashMap<WindowHandle, WindowGeometry>,
    viewable: Vec<WindowHandle>,
    queue: VecDeque<Notification>,
    frame_budget: Option<u64>,
    rotation: Option<Rotation>,
    next_pixmap: u32,
    log: SharedLog,
}

/// Dry-run: периодически уничтожает старейшее окно и отображает новое
struct Rotation {
    every: u64,
    live: VecDeque<WindowHandle>,
    next_handle: u32,
}

impl HeadlessWindowSystem {
    pub fn new(log: SharedLog) -> Self {
        Self {
            screen: (1280, 800),
            windows: HashMap::new(),
            viewable: Vec::new(),
            queue: VecDeque::new(),
            frame_budget: None,
            rotation: None,
            next_pixmap: 0x60_0000,
            log,
        }
    }

    /// Окно, геометрию которого знает оконная система
    pub fn with_window(mut self, window: WindowHandle, geometry: WindowGeometry) -> Self {
        self.windows.insert(window, geometry);
        self
    }

    /// Окно, уже отображённое к моменту старта
    pub fn with_viewable(mut self, window: WindowHandle, geometry: WindowGeometry) -> Self {
        self.windows.insert(window, geometry);
        self.viewable.push(window);
        self
    }

    /// После `frames` кадров поток уведомлений закрывается
    #[cfg(test)]
    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    pub fn map(mut self, window: WindowHandle) -> Self {
        self.queue.push_back(Notification::Created(window));
        self.queue.push_back(Notification::Mapped {
            window,
            parent: HEADLESS_ROOT,
        });
        self
    }

    #[cfg(test)]
    pub fn then(mut self, notification: Notification) -> Self {
        self.queue.push_back(notification);
        self
    }

    fn rotate(&mut self, frame: u64) {
        let Some(rotation) = self.rotation.as_mut() else {
            return;
        };
        if frame == 0 || frame % rotation.every != 0 {
            return;
        }

        if let Some(oldest) = rotation.live.pop_front() {
            info!("Dry-run: уничтожаем окно {}", oldest);
            self.windows.remove(&oldest);
            self.queue.push_back(Notification::Destroyed(oldest));
        }

        let window = WindowHandle(rotation.next_handle);
        rotation.next_handle += 1;
        rotation.live.push_back(window);
        let depth = if window.0 % 2 == 0 { 32 } else { 24 };
        let offset = (window.0 % 8) as i32 * 40;
        self.windows
            .insert(window, WindowGeometry::new(480, 320, depth).at(offset, offset));
        info!("Dry-run: отображаем окно {} (depth {})", window, depth);
        self.queue.push_back(Notification::Created(window));
        self.queue.push_back(Notification::Mapped {
            window,
            parent: HEADLESS_ROOT,
        });
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn root(&self) -> WindowHandle {
        HEADLESS_ROOT
    }

    fn overlay(&self) -> WindowHandle {
        HEADLESS_OVERLAY
    }

    fn canvas(&self) -> WindowHandle {
        HEADLESS_CANVAS
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    fn query_geometry(&mut self, window: WindowHandle) -> Result<WindowGeometry> {
        self.windows
            .get(&window)
            .copied()
            .ok_or(CompositorError::NotFound(window))
    }

    fn name_window_pixmap(&mut self, window: WindowHandle) -> Result<PixmapHandle> {
        if !self.windows.contains_key(&window) {
            return Err(CompositorError::NotFound(window));
        }
        let pixmap = PixmapHandle(self.next_pixmap);
        self.next_pixmap += 1;
        self.log.lock().named_pixmaps.push(pixmap);
        Ok(pixmap)
    }

    fn free_pixmap(&mut self, pixmap: PixmapHandle) {
        self.log.lock().freed_pixmaps.push(pixmap);
    }

    fn mapped_windows(&mut self) -> Result<Vec<WindowHandle>> {
        Ok(self.viewable.clone())
    }

    fn send_frame_tick(&mut self) -> Result<()> {
        let frame = {
            let mut log = self.log.lock();
            log.frame_ticks += 1;
            log.frame_ticks
        };

        if let Some(budget) = self.frame_budget {
            if frame > budget {
                return Ok(());
            }
        }

        self.rotate(frame);
        self.queue.push_back(Notification::FrameTick);
        Ok(())
    }

    fn next_notification(&mut self) -> Result<Option<Notification>> {
        Ok(self.queue.pop_front())
    }
}

pub struct HeadlessGraphics {
    y_inverted: bool,
    target: u32,
    next_binding: u64,
    next_texture: u32,
    error_on: HashMap<&'static str, u32>,
    pending_error: Option<u32>,
    binding_error: Option<u32>,
    verbose: bool,
    log: SharedLog,
}

impl HeadlessGraphics {
    pub fn new(log: SharedLog) -> Self {
        Self {
            y_inverted: false,
            target: TARGET_TEXTURE_RECTANGLE,
            next_binding: 0x80_0000,
            next_texture: 1,
            error_on: HashMap::new(),
            pending_error: None,
            binding_error: None,
            verbose: false,
            log,
        }
    }

    #[cfg(test)]
    pub fn with_y_inverted(mut self, y_inverted: bool) -> Self {
        self.y_inverted = y_inverted;
        self
    }

    /// Код texture target, который драйвер сообщит для каждой привязки
    #[cfg(test)]
    pub fn with_target(mut self, raw: u32) -> Self {
        self.target = raw;
        self
    }

    /// Каждая привязка pixmap завершается ошибкой сервера с кодом `code`
    #[cfg(test)]
    pub fn with_binding_error(mut self, code: u32) -> Self {
        self.binding_error = Some(code);
        self
    }

    /// Каждый вызов `call` оставляет код ошибки для следующей проверки
    #[cfg(test)]
    pub fn with_error_on(mut self, call: &'static str, code: u32) -> Self {
        self.error_on.insert(call, code);
        self
    }

    fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    fn record(&mut self, call: &'static str, draw_call: DrawCall) {
        if let Some(code) = self.error_on.get(call) {
            self.pending_error = Some(*code);
        }
        if self.verbose {
            trace_if_enabled!("[headless] {}: {:?}", call, draw_call);
        }
        self.log.lock().calls.push(draw_call);
    }
}

impl GraphicsDriver for HeadlessGraphics {
    fn y_inverted(&self) -> bool {
        self.y_inverted
    }

    fn create_binding(&mut self, pixmap: PixmapHandle, format: TextureFormat) -> Result<SurfaceBinding> {
        if let Some(code) = self.binding_error {
            return Err(CompositorError::Graphics {
                call: "glXCreatePixmap",
                code,
            });
        }
        let binding = SurfaceBinding(self.next_binding);
        self.next_binding += 1;
        self.record("create_binding", DrawCall::CreateBinding { pixmap, format });
        Ok(binding)
    }

    fn binding_target(&mut self, _binding: SurfaceBinding) -> Result<u32> {
        Ok(self.target)
    }

    fn destroy_binding(&mut self, binding: SurfaceBinding) {
        self.record("destroy_binding", DrawCall::DestroyBinding(binding));
    }

    fn create_texture(&mut self) -> Result<TextureId> {
        let texture = TextureId(self.next_texture);
        self.next_texture += 1;
        self.record("create_texture", DrawCall::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.record("delete_texture", DrawCall::DeleteTexture(texture));
    }

    fn wait_native(&mut self) {
        self.record("wait_native", DrawCall::WaitNative);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.record("clear", DrawCall::Clear(color));
    }

    fn draw_background(&mut self, quad: &ColoredQuad) {
        self.record("draw_background", DrawCall::Background(*quad));
    }

    fn set_blending(&mut self, premultiplied: bool) {
        self.record("set_blending", DrawCall::Blending(premultiplied));
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: TextureId) {
        self.record("bind_texture", DrawCall::BindTexture { target, texture });
    }

    fn bind_image(&mut self, binding: SurfaceBinding) {
        self.record("bind_image", DrawCall::BindImage(binding));
    }

    fn set_linear_filter(&mut self, target: TextureTarget) {
        self.record("set_linear_filter", DrawCall::LinearFilter(target));
    }

    fn draw_textured(&mut self, target: TextureTarget, quad: &TexturedQuad) {
        self.record("draw_textured", DrawCall::Draw { target, quad: *quad });
    }

    fn unbind_texture(&mut self, target: TextureTarget) {
        self.record("unbind_texture", DrawCall::Unbind(target));
    }

    fn release_image(&mut self, binding: SurfaceBinding) {
        self.record("release_image", DrawCall::ReleaseImage(binding));
    }

    fn wait_gl(&mut self) {
        self.record("wait_gl", DrawCall::WaitGl);
    }

    fn present(&mut self) {
        self.record("present", DrawCall::Present);
        if self.verbose {
            // Журнал dry-run не должен расти без ограничений
            self.log.lock().clear();
        }
    }

    fn take_error(&mut self) -> Option<u32> {
        self.pending_error.take()
    }
}

pub fn backend(window_system: HeadlessWindowSystem, graphics: HeadlessGraphics) -> Backend {
    Backend {
        window_system: Box::new(window_system),
        graphics: Box::new(graphics),
    }
}

/// Бэкенд для `--dry-run`: два окна и бесконечные кадры с ротацией окон
pub fn dry_run_backend() -> Backend {
    let log = SharedLog::default();
    let mut window_system = HeadlessWindowSystem::new(log.clone())
        .with_viewable(WindowHandle(0x20_0001), WindowGeometry::new(640, 480, 24).at(40, 40))
        .with_window(WindowHandle(0x20_0002), WindowGeometry::new(300, 200, 32).at(200, 120))
        .map(WindowHandle(0x20_0002));
    window_system.rotation = Some(Rotation {
        every: 500,
        live: VecDeque::from([WindowHandle(0x20_0001), WindowHandle(0x20_0002)]),
        next_handle: 0x20_0003,
    });
    debug_if_enabled!("Dry-run: экран {:?}", window_system.screen);

    backend(window_system, HeadlessGraphics::new(log).verbose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TARGET_TEXTURE_2D;

    #[test]
    fn test_window_system_queue_and_budget() {
        let log = SharedLog::default();
        let mut ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(7), WindowGeometry::new(10, 20, 24))
            .map(WindowHandle(7))
            .with_frame_budget(1);

        assert_eq!(
            ws.next_notification().unwrap(),
            Some(Notification::Created(WindowHandle(7)))
        );
        assert!(matches!(
            ws.next_notification().unwrap(),
            Some(Notification::Mapped { .. })
        ));
        assert_eq!(ws.next_notification().unwrap(), None);

        ws.send_frame_tick().unwrap();
        assert_eq!(ws.next_notification().unwrap(), Some(Notification::FrameTick));
        ws.send_frame_tick().unwrap();
        assert_eq!(ws.next_notification().unwrap(), None);
        assert_eq!(log.lock().frame_ticks, 2);
    }

    #[test]
    fn test_unknown_window_has_no_geometry() {
        let mut ws = HeadlessWindowSystem::new(SharedLog::default());
        assert!(matches!(
            ws.query_geometry(WindowHandle(1)),
            Err(CompositorError::NotFound(_))
        ));
        assert!(ws.name_window_pixmap(WindowHandle(1)).is_err());
    }

    #[test]
    fn test_graphics_records_and_injects_errors() {
        let log = SharedLog::default();
        let mut gfx = HeadlessGraphics::new(log.clone())
            .with_target(TARGET_TEXTURE_2D)
            .with_error_on("bind_image", 0x502);

        let binding = gfx.create_binding(PixmapHandle(1), TextureFormat::Rgb).unwrap();
        assert_eq!(gfx.binding_target(binding).unwrap(), TARGET_TEXTURE_2D);
        assert_eq!(gfx.take_error(), None);

        gfx.bind_image(binding);
        assert_eq!(gfx.take_error(), Some(0x502));
        assert_eq!(gfx.take_error(), None);
        assert_eq!(log.lock().calls.len(), 2);
    }

    #[test]
    fn test_dry_run_present_trims_log() {
        let log = SharedLog::default();
        let mut ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(7), WindowGeometry::new(10, 20, 24));
        let mut gfx = HeadlessGraphics::new(log.clone()).verbose();

        let pixmap = ws.name_window_pixmap(WindowHandle(7)).unwrap();
        ws.free_pixmap(pixmap);
        ws.send_frame_tick().unwrap();
        gfx.wait_gl();
        gfx.present();

        let log = log.lock();
        assert!(log.calls.is_empty());
        assert!(log.named_pixmaps.is_empty());
        assert!(log.freed_pixmaps.is_empty());
        assert_eq!(log.frame_ticks, 1);
    }

    #[test]
    fn test_dry_run_rotation_replaces_oldest_window() {
        let Backend { mut window_system, .. } = dry_run_backend();
        while window_system.next_notification().unwrap().is_some() {}

        for _ in 0..500 {
            window_system.send_frame_tick().unwrap();
        }

        let mut seen = Vec::new();
        while let Some(n) = window_system.next_notification().unwrap() {
            if n != Notification::FrameTick {
                seen.push(n);
            }
        }
        assert_eq!(seen[0], Notification::Destroyed(WindowHandle(0x20_0001)));
        assert_eq!(seen[1], Notification::Created(WindowHandle(0x20_0003)));
        assert!(window_system.query_geometry(WindowHandle(0x20_0003)).is_ok());
    }
}
