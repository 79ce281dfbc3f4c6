use super::handlers::{
    ConfigureHandler, CreateHandler, DestroyHandler, FrameHandler, MapHandler,
    ProtocolErrorHandler, RequestHandler, UnmapHandler,
};
use crate::config::CompositorConfig;
use crate::error::{CompositorError, Result};
use crate::events::{Notification, NotificationKind};
use crate::services::session::SessionState;
use crate::trace_if_enabled;
use tracing::{debug, warn};

/// Trait for handlers of one notification kind
pub trait NotificationHandler {
    /// Handle the notification; only fatal errors should end the session
    fn handle(&self, notification: &Notification, state: &mut SessionState) -> Result<()>;
}

/// Таблица обработчиков, индексированная видом уведомления
pub struct Dispatcher {
    handlers: [Option<Box<dyn NotificationHandler>>; NotificationKind::COUNT],
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Factory function to create the dispatcher with the handlers the config asks for
    pub fn with_default_handlers(config: &CompositorConfig) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(NotificationKind::Created, Box::new(CreateHandler));
        dispatcher.register(NotificationKind::Mapped, Box::new(MapHandler));
        dispatcher.register(
            NotificationKind::Unmapped,
            Box::new(UnmapHandler::new(config.untrack_on_unmap)),
        );
        dispatcher.register(NotificationKind::Destroyed, Box::new(DestroyHandler));
        dispatcher.register(NotificationKind::MapRequested, Box::new(RequestHandler));
        dispatcher.register(NotificationKind::ConfigureRequested, Box::new(RequestHandler));
        dispatcher.register(NotificationKind::FrameTick, Box::new(FrameHandler));
        dispatcher.register(NotificationKind::ProtocolError, Box::new(ProtocolErrorHandler));
        if config.follow_configure {
            dispatcher.register(NotificationKind::Configured, Box::new(ConfigureHandler));
        }
        dispatcher
    }

    pub fn register(&mut self, kind: NotificationKind, handler: Box<dyn NotificationHandler>) {
        self.handlers[kind.index()] = Some(handler);
    }

    #[cfg(test)]
    pub fn is_registered(&self, kind: NotificationKind) -> bool {
        self.handlers[kind.index()].is_some()
    }

    /// Передаёт уведомление обработчику.
    ///
    /// Нефатальные ошибки логируются и поглощаются; наружу выходят только фатальные.
    pub fn dispatch(&self, notification: &Notification, state: &mut SessionState) -> Result<()> {
        let kind = notification.kind();
        if kind == NotificationKind::FrameTick {
            trace_if_enabled!("[Event] {}", notification);
        } else {
            debug!("[Event] {}", notification);
        }

        let Some(handler) = self.handlers[kind.index()].as_ref() else {
            return Ok(());
        };

        match handler.handle(notification, state) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(CompositorError::NotFound(window)) => {
                debug!("[{}] Окно {} не отслеживается", kind, window);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] {}", kind, e);
                Ok(())
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{
        self, DrawCall, HeadlessGraphics, HeadlessWindowSystem, SharedLog, HEADLESS_OVERLAY,
        HEADLESS_ROOT,
    };
    use crate::backend::TARGET_TEXTURE_1D;
    use crate::config::Config;
    use crate::events::{WindowGeometry, WindowHandle};
    use std::cell::Cell;
    use std::rc::Rc;

    const A: WindowHandle = WindowHandle(0xA);
    const B: WindowHandle = WindowHandle(0xB);

    fn config() -> CompositorConfig {
        let mut config = Config::default().compositor;
        config.frame_interval_ms = 0;
        config
    }

    fn state_with(config: &CompositorConfig, gfx: impl FnOnce(SharedLog) -> HeadlessGraphics) -> (SessionState, SharedLog) {
        let log = SharedLog::default();
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(A, WindowGeometry::new(200, 100, 24))
            .with_window(B, WindowGeometry::new(50, 50, 32));
        let backend = headless::backend(ws, gfx(log.clone()));
        (SessionState::new(backend, config), log)
    }

    fn mapped(window: WindowHandle) -> Notification {
        Notification::Mapped {
            window,
            parent: HEADLESS_ROOT,
        }
    }

    #[test]
    fn test_map_then_frame_draws_without_blending() {
        let config = config();
        let (mut state, log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);

        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        dispatcher.dispatch(&Notification::FrameTick, &mut state).unwrap();

        assert_eq!(state.table.len(), 1);
        let geometry = state.table.get(A).unwrap().geometry;
        assert_eq!((geometry.width, geometry.height), (200, 100));
        assert_eq!(log.lock().blending_per_draw(), vec![false]);
    }

    #[test]
    fn test_destroy_untracks_and_unknown_destroy_is_ignored() {
        let config = config();
        let (mut state, log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);

        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        dispatcher.dispatch(&Notification::Destroyed(A), &mut state).unwrap();
        assert!(state.table.is_empty());
        assert_eq!(log.lock().live_textures(), 0);

        assert!(dispatcher.dispatch(&Notification::Destroyed(A), &mut state).is_ok());
        assert!(state.table.is_empty());
    }

    #[test]
    fn test_reserved_windows_are_never_tracked() {
        let config = config();
        let (mut state, _log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);

        dispatcher.dispatch(&mapped(HEADLESS_ROOT), &mut state).unwrap();
        dispatcher.dispatch(&mapped(HEADLESS_OVERLAY), &mut state).unwrap();
        assert!(state.table.is_empty());
    }

    #[test]
    fn test_capacity_exhaustion_is_not_fatal() {
        let mut config = config();
        config.max_windows = 1;
        let (mut state, _log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);

        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        assert!(dispatcher.dispatch(&mapped(B), &mut state).is_ok());
        assert_eq!(state.table.len(), 1);
        assert!(!state.table.contains(B));
    }

    #[test]
    fn test_invalid_target_propagates_and_table_untouched() {
        let config = config();
        let (mut state, _log) =
            state_with(&config, |log| HeadlessGraphics::new(log).with_target(TARGET_TEXTURE_1D));
        let dispatcher = Dispatcher::with_default_handlers(&config);

        let err = dispatcher.dispatch(&mapped(A), &mut state).unwrap_err();
        assert!(matches!(err, CompositorError::InvalidTarget(_)));
        assert!(state.table.is_empty());
    }

    #[test]
    fn test_unmap_policy() {
        let config = config();
        let (mut state, _log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);
        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        dispatcher.dispatch(&Notification::Unmapped(A), &mut state).unwrap();
        assert!(state.table.is_empty());
        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        assert!(state.table.contains(A));

        let mut keep = config;
        keep.untrack_on_unmap = false;
        let (mut state, _log) = state_with(&keep, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&keep);
        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        dispatcher.dispatch(&Notification::Unmapped(A), &mut state).unwrap();
        assert!(state.table.contains(A));
    }

    #[test]
    fn test_unregistered_kinds_are_ignored() {
        let config = config();
        let (mut state, log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);
        assert!(!dispatcher.is_registered(NotificationKind::Exposed));
        assert!(!dispatcher.is_registered(NotificationKind::Configured));

        for n in [
            Notification::Exposed(A),
            Notification::Visibility(A),
            Notification::KeyPressed { keycode: 24 },
            Notification::ButtonPressed { button: 1 },
            Notification::Configured { window: A, x: 1, y: 1, width: 5, height: 5 },
            Notification::Other(85),
        ] {
            dispatcher.dispatch(&n, &mut state).unwrap();
        }
        assert!(state.table.is_empty());
        assert!(log.lock().calls.is_empty());
    }

    #[test]
    fn test_configure_follows_position_and_rebinds_on_resize() {
        let mut config = config();
        config.follow_configure = true;
        let (mut state, log) = state_with(&config, HeadlessGraphics::new);
        let dispatcher = Dispatcher::with_default_handlers(&config);
        dispatcher.dispatch(&mapped(A), &mut state).unwrap();

        let moved = Notification::Configured { window: A, x: 30, y: 40, width: 200, height: 100 };
        dispatcher.dispatch(&moved, &mut state).unwrap();
        let geometry = state.table.get(A).unwrap().geometry;
        assert_eq!((geometry.x, geometry.y), (30, 40));
        assert_eq!(log.lock().count(|c| matches!(c, DrawCall::CreateTexture(_))), 1);

        let resized = Notification::Configured { window: A, x: 30, y: 40, width: 400, height: 100 };
        dispatcher.dispatch(&resized, &mut state).unwrap();
        assert_eq!(log.lock().count(|c| matches!(c, DrawCall::CreateTexture(_))), 2);
        assert_eq!(log.lock().live_textures(), 1);
    }

    struct Counting(Rc<Cell<u32>>);

    impl NotificationHandler for Counting {
        fn handle(&self, _notification: &Notification, _state: &mut SessionState) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Err(CompositorError::Graphics { call: "test", code: 1 })
        }
    }

    #[test]
    fn test_custom_handler_errors_are_absorbed() {
        let config = config();
        let (mut state, _log) = state_with(&config, HeadlessGraphics::new);
        let calls = Rc::new(Cell::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(NotificationKind::Exposed, Box::new(Counting(calls.clone())));

        dispatcher.dispatch(&Notification::Exposed(A), &mut state).unwrap();
        dispatcher.dispatch(&mapped(A), &mut state).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(state.table.is_empty());
    }
}
