use crate::backend::{Backend, GraphicsDriver, WindowSystem};
use crate::config::{CompositorConfig, Config};
use crate::error::Result;
use crate::events::WindowHandle;
use crate::services::compositor::Compositor;
use crate::services::dispatcher::Dispatcher;
use crate::services::surface_binder::SurfaceBinder;
use crate::services::window_table::{AddOutcome, ReservedHandles, WindowTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Всё, что изменяют обработчики уведомлений.
///
/// Принадлежит единственному потоку цикла событий, поэтому блокировок нет.
pub struct SessionState {
    pub window_system: Box<dyn WindowSystem>,
    pub graphics: Box<dyn GraphicsDriver>,
    pub table: WindowTable,
    pub binder: SurfaceBinder,
    pub compositor: Compositor,
}

impl SessionState {
    pub fn new(backend: Backend, config: &CompositorConfig) -> Self {
        let Backend {
            window_system,
            graphics,
        } = backend;

        let reserved = ReservedHandles {
            root: window_system.root(),
            overlay: window_system.overlay(),
            canvas: window_system.canvas(),
        };
        let compositor = Compositor::new(config, window_system.screen_size(), graphics.y_inverted());

        Self {
            window_system,
            graphics,
            table: WindowTable::new(config.max_windows, reserved),
            binder: SurfaceBinder,
            compositor,
        }
    }

    /// Берёт окно на учёт; повторный map перепривязывает его на месте
    pub fn track(&mut self, window: WindowHandle) -> Result<AddOutcome> {
        if self.table.contains(window) {
            let slot = self.retrack(window)?;
            return Ok(AddOutcome::AlreadyTracked { slot });
        }

        let Self {
            window_system,
            graphics,
            table,
            binder,
            ..
        } = self;
        table.add(window, |w| binder.bind(w, window_system.as_mut(), graphics.as_mut()))
    }

    pub fn untrack(&mut self, window: WindowHandle) -> Result<usize> {
        let Self {
            window_system,
            graphics,
            table,
            binder,
            ..
        } = self;
        table.remove(window, |tracked| {
            binder.release(tracked, window_system.as_mut(), graphics.as_mut())
        })
    }

    /// Освобождает старые ресурсы окна и привязывает его заново в том же слоте
    pub fn retrack(&mut self, window: WindowHandle) -> Result<usize> {
        let Self {
            window_system,
            graphics,
            table,
            binder,
            ..
        } = self;
        table.rebind(window, |old| {
            binder.release(old, window_system.as_mut(), graphics.as_mut());
            binder.bind(window, window_system.as_mut(), graphics.as_mut())
        })
    }

    pub fn render_frame(&mut self) -> Result<()> {
        self.compositor
            .frame(&self.table, self.window_system.as_mut(), self.graphics.as_mut())
    }

    pub fn release_all(&mut self) {
        let Self {
            window_system,
            graphics,
            table,
            binder,
            ..
        } = self;
        table.clear(|tracked| binder.release(tracked, window_system.as_mut(), graphics.as_mut()));
    }
}

/// Сессия компоновщика: соединение, контекст, таблица и цикл событий.
pub struct Session {
    state: SessionState,
    dispatcher: Dispatcher,
    stop: Arc<AtomicBool>,
}

impl Session {
    pub fn open(backend: Backend, config: &Config, stop: Arc<AtomicBool>) -> Result<Self> {
        let mut state = SessionState::new(backend, &config.compositor);
        let dispatcher = Dispatcher::with_default_handlers(&config.compositor);

        info!(
            "Сессия открыта: root {}, overlay {}, холст {}, ёмкость {}",
            state.window_system.root(),
            state.window_system.overlay(),
            state.window_system.canvas(),
            state.table.capacity()
        );

        if config.compositor.adopt_existing {
            for window in state.window_system.mapped_windows()? {
                if let Err(e) = state.track(window) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("Не удалось подхватить окно {}: {}", window, e);
                }
            }
            info!("Подхвачено уже отображённых окон: {}", state.table.len());
        }

        Ok(Self {
            state,
            dispatcher,
            stop,
        })
    }

    /// Первый кадр, затем блокирующий цикл уведомлений до закрытия потока или флага остановки
    pub fn run(&mut self) -> Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            info!("Остановка запрошена до первого кадра");
            return Ok(());
        }
        info!("Цикл событий запущен");
        self.state.render_frame()?;

        while !self.stop.load(Ordering::Relaxed) {
            let Some(notification) = self.state.window_system.next_notification()? else {
                info!("Поток уведомлений закрыт");
                break;
            };
            self.dispatcher.dispatch(&notification, &mut self.state)?;
        }

        info!("Цикл событий остановлен после {} кадров", self.state.compositor.frames());
        Ok(())
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Освобождает все окна и закрывает бэкенд без отрисовки новых кадров
    pub fn close(mut self) {
        let tracked = self.state.table.len();
        self.state.release_all();
        info!("Сессия закрыта, освобождено окон: {}", tracked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{
        self, HeadlessGraphics, HeadlessWindowSystem, SharedLog, HEADLESS_ROOT,
    };
    use crate::backend::TARGET_TEXTURE_1D;
    use crate::error::CompositorError;
    use crate::events::{Notification, WindowGeometry};

    fn config() -> Config {
        let mut config = Config::default();
        config.compositor.frame_interval_ms = 0;
        config
    }

    fn handles(session: &Session) -> Vec<WindowHandle> {
        session.state().table.iter().map(|(_, t)| t.handle).collect()
    }

    #[test]
    fn test_map_destroy_map_reuses_slot() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(200, 100, 24))
            .with_window(WindowHandle(0xB), WindowGeometry::new(300, 100, 24))
            .map(WindowHandle(0xA))
            .then(Notification::Destroyed(WindowHandle(0xA)))
            .map(WindowHandle(0xB))
            .with_frame_budget(2);
        let backend = headless::backend(ws, HeadlessGraphics::new(log.clone()));

        let mut session = Session::open(backend, &config(), Arc::default()).unwrap();
        session.run().unwrap();

        assert_eq!(handles(&session), vec![WindowHandle(0xB)]);
        assert_eq!(session.state().table.slot_of(WindowHandle(0xB)), Some(0));
        assert_eq!(log.lock().live_textures(), 1);

        session.close();
        let log = log.lock();
        assert_eq!(log.live_textures(), 0);
        assert_eq!(log.freed_pixmaps.len(), log.named_pixmaps.len());
    }

    #[test]
    fn test_eight_windows_with_capacity_seven() {
        let log = SharedLog::default();
        let mut ws = HeadlessWindowSystem::new(log.clone()).with_frame_budget(1);
        for id in 1..=8u32 {
            let window = WindowHandle(0x100 + id);
            ws = ws
                .with_window(window, WindowGeometry::new(10 * id, 10, 24))
                .map(window);
        }
        let backend = headless::backend(ws, HeadlessGraphics::new(log.clone()));

        let mut session = Session::open(backend, &config(), Arc::default()).unwrap();
        session.run().unwrap();

        let tracked = handles(&session);
        assert_eq!(tracked.len(), 7);
        assert!(!tracked.contains(&WindowHandle(0x108)));
    }

    #[test]
    fn test_unsupported_target_is_fatal() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(200, 100, 24))
            .map(WindowHandle(0xA));
        let gfx = HeadlessGraphics::new(log.clone()).with_target(TARGET_TEXTURE_1D);

        let mut session =
            Session::open(headless::backend(ws, gfx), &config(), Arc::default()).unwrap();
        let err = session.run().unwrap_err();

        assert!(matches!(err, CompositorError::InvalidTarget(TARGET_TEXTURE_1D)));
        assert_eq!(err.exit_code(), crate::error::EXIT_INVALID_TARGET);
        assert!(session.state().table.is_empty());
    }

    #[test]
    fn test_adopts_viewable_windows_and_skips_reserved() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_viewable(WindowHandle(0xA), WindowGeometry::new(20, 20, 32))
            .with_viewable(HEADLESS_ROOT, WindowGeometry::new(1280, 800, 24))
            .with_frame_budget(0);
        let session =
            Session::open(headless::backend(ws, HeadlessGraphics::new(log)), &config(), Arc::default())
                .unwrap();
        assert_eq!(handles(&session), vec![WindowHandle(0xA)]);
    }

    #[test]
    fn test_adoption_can_be_disabled() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_viewable(WindowHandle(0xA), WindowGeometry::new(20, 20, 32));
        let mut config = config();
        config.compositor.adopt_existing = false;
        let session =
            Session::open(headless::backend(ws, HeadlessGraphics::new(log)), &config, Arc::default())
                .unwrap();
        assert!(session.state().table.is_empty());
    }

    #[test]
    fn test_stop_flag_ends_loop_before_next_event() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(20, 20, 24))
            .map(WindowHandle(0xA));
        let stop = Arc::new(AtomicBool::new(true));
        let mut session =
            Session::open(headless::backend(ws, HeadlessGraphics::new(log.clone())), &config(), stop)
                .unwrap();
        session.run().unwrap();

        assert!(session.state().table.is_empty());
        assert_eq!(log.lock().frame_ticks, 0);
        assert!(log.lock().calls.is_empty());
    }

    #[test]
    fn test_failed_binding_skips_window_and_loop_continues() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(200, 100, 32))
            .map(WindowHandle(0xA))
            .with_frame_budget(3);
        let gfx = HeadlessGraphics::new(log.clone()).with_binding_error(8);

        let mut session =
            Session::open(headless::backend(ws, gfx), &config(), Arc::default()).unwrap();
        session.run().unwrap();

        assert!(session.state().table.is_empty());
        let log = log.lock();
        assert_eq!(log.frame_ticks, 4);
        assert_eq!(log.freed_pixmaps, log.named_pixmaps);
    }

    #[test]
    fn test_driver_y_inversion_reaches_frame() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(200, 100, 24))
            .map(WindowHandle(0xA))
            .with_frame_budget(1);
        let gfx = HeadlessGraphics::new(log.clone()).with_y_inverted(true);

        let mut session =
            Session::open(headless::backend(ws, gfx), &config(), Arc::default()).unwrap();
        session.run().unwrap();

        let draws = log.lock().draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].1.vertices[0].tex_coord, [0.0, 0.0]);
        assert_eq!(draws[0].1.vertices[1].tex_coord, [0.0, 100.0]);
    }

    #[test]
    fn test_duplicate_map_rebinds_in_place() {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(20, 20, 24))
            .map(WindowHandle(0xA))
            .map(WindowHandle(0xA))
            .with_frame_budget(0);
        let mut session =
            Session::open(headless::backend(ws, HeadlessGraphics::new(log.clone())), &config(), Arc::default())
                .unwrap();
        session.run().unwrap();

        assert_eq!(handles(&session), vec![WindowHandle(0xA)]);
        let log = log.lock();
        assert_eq!(log.live_textures(), 1);
        assert_eq!(log.named_pixmaps.len(), 2);
        assert_eq!(log.freed_pixmaps.len(), 1);
    }
}
