use super::NotificationHandler;
use crate::error::Result;
use crate::events::Notification;
use crate::services::session::SessionState;
use crate::services::window_table::AddOutcome;
use crate::trace_if_enabled;
use tracing::{debug, info, warn};

/// CreateNotify: только сообщение, окно ещё не отображено
pub struct CreateHandler;

impl NotificationHandler for CreateHandler {
    fn handle(&self, notification: &Notification, _state: &mut SessionState) -> Result<()> {
        if let Some(window) = notification.window() {
            debug!("[Create] Создано окно {}", window);
        }
        Ok(())
    }
}

/// MapNotify: окно берётся на учёт и привязывается к текстуре
pub struct MapHandler;

impl NotificationHandler for MapHandler {
    fn handle(&self, notification: &Notification, state: &mut SessionState) -> Result<()> {
        let Notification::Mapped { window, parent } = *notification else {
            return Ok(());
        };

        match state.track(window)? {
            AddOutcome::Added { slot } => {
                info!("[Map] Окно {} (родитель {}) в слоте {}", window, parent, slot);
            }
            AddOutcome::AlreadyTracked { slot } => {
                debug!("[Map] Окно {} уже в слоте {}, привязка обновлена", window, slot);
            }
            AddOutcome::Reserved => {
                trace_if_enabled!("[Map] Служебное окно {} пропущено", window);
            }
        }
        Ok(())
    }
}

/// UnmapNotify: по умолчанию окно снимается с учёта
pub struct UnmapHandler {
    untrack: bool,
}

impl UnmapHandler {
    pub fn new(untrack: bool) -> Self {
        Self { untrack }
    }
}

impl NotificationHandler for UnmapHandler {
    fn handle(&self, notification: &Notification, state: &mut SessionState) -> Result<()> {
        let Notification::Unmapped(window) = *notification else {
            return Ok(());
        };

        if !self.untrack {
            debug!("[Unmap] Окно {} скрыто, остаётся на учёте", window);
            return Ok(());
        }

        let slot = state.untrack(window)?;
        info!("[Unmap] Окно {} снято с учёта, слот {} свободен", window, slot);
        Ok(())
    }
}

/// DestroyNotify: ресурсы освобождаются до повторного использования слота
pub struct DestroyHandler;

impl NotificationHandler for DestroyHandler {
    fn handle(&self, notification: &Notification, state: &mut SessionState) -> Result<()> {
        let Notification::Destroyed(window) = *notification else {
            return Ok(());
        };

        let slot = state.untrack(window)?;
        info!("[Destroy] Окно {} уничтожено, слот {} свободен", window, slot);
        Ok(())
    }
}

/// ConfigureNotify: сдвиг обновляет позицию, смена размера перепривязывает pixmap
pub struct ConfigureHandler;

impl NotificationHandler for ConfigureHandler {
    fn handle(&self, notification: &Notification, state: &mut SessionState) -> Result<()> {
        let Notification::Configured {
            window,
            x,
            y,
            width,
            height,
        } = *notification
        else {
            return Ok(());
        };

        let Some(tracked) = state.table.get(window) else {
            return Ok(());
        };

        if tracked.geometry.width != width || tracked.geometry.height != height {
            debug!(
                "[Configure] Окно {}: {}x{} -> {}x{}",
                window, tracked.geometry.width, tracked.geometry.height, width, height
            );
            // Старый pixmap после смены размера больше не отражает окно
            state.retrack(window)?;
        }
        state.table.move_to(window, x, y)
    }
}

/// MapRequest и ConfigureRequest: политики управления окнами нет, только журнал
pub struct RequestHandler;

impl NotificationHandler for RequestHandler {
    fn handle(&self, notification: &Notification, _state: &mut SessionState) -> Result<()> {
        info!("[Request] {} оставлен без обработки", notification);
        Ok(())
    }
}

/// Собственный ClientMessage: следующий кадр
pub struct FrameHandler;

impl NotificationHandler for FrameHandler {
    fn handle(&self, _notification: &Notification, state: &mut SessionState) -> Result<()> {
        state.render_frame()
    }
}

/// Асинхронные ошибки протокола X11 сообщаются и не прерывают работу
pub struct ProtocolErrorHandler;

impl NotificationHandler for ProtocolErrorHandler {
    fn handle(&self, notification: &Notification, _state: &mut SessionState) -> Result<()> {
        if let Notification::ProtocolError(details) = notification {
            warn!("[X11] Ошибка протокола: {}", details);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{self, DrawCall, HeadlessGraphics, HeadlessWindowSystem, SharedLog};
    use crate::config::Config;
    use crate::events::{WindowGeometry, WindowHandle};

    fn state(log: &SharedLog) -> SessionState {
        let mut config = Config::default().compositor;
        config.frame_interval_ms = 0;
        let ws = HeadlessWindowSystem::new(log.clone())
            .with_window(WindowHandle(0xA), WindowGeometry::new(200, 100, 32));
        SessionState::new(headless::backend(ws, HeadlessGraphics::new(log.clone())), &config)
    }

    #[test]
    fn test_frame_handler_blends_depth_32() {
        let log = SharedLog::default();
        let mut state = state(&log);
        MapHandler
            .handle(
                &Notification::Mapped { window: WindowHandle(0xA), parent: WindowHandle(1) },
                &mut state,
            )
            .unwrap();
        FrameHandler.handle(&Notification::FrameTick, &mut state).unwrap();

        let log = log.lock();
        assert_eq!(log.blending_per_draw(), vec![true]);
        assert_eq!(log.frame_ticks, 1);
    }

    #[test]
    fn test_unmap_of_untracked_window_reports_not_found() {
        let log = SharedLog::default();
        let mut state = state(&log);
        let result = UnmapHandler::new(true).handle(&Notification::Unmapped(WindowHandle(0xA)), &mut state);
        assert!(matches!(result, Err(crate::error::CompositorError::NotFound(_))));
    }

    #[test]
    fn test_configure_for_untracked_window_is_noop() {
        let log = SharedLog::default();
        let mut state = state(&log);
        let configured = Notification::Configured {
            window: WindowHandle(0xA),
            x: 1,
            y: 2,
            width: 3,
            height: 4,
        };
        ConfigureHandler.handle(&configured, &mut state).unwrap();
        assert_eq!(log.lock().count(|c| matches!(c, DrawCall::CreateTexture(_))), 0);
    }

    #[test]
    fn test_informational_handlers_touch_nothing() {
        let log = SharedLog::default();
        let mut state = state(&log);
        CreateHandler.handle(&Notification::Created(WindowHandle(0xA)), &mut state).unwrap();
        RequestHandler
            .handle(&Notification::MapRequested(WindowHandle(0xA)), &mut state)
            .unwrap();
        ProtocolErrorHandler
            .handle(&Notification::ProtocolError("BadWindow".into()), &mut state)
            .unwrap();
        assert!(state.table.is_empty());
        assert!(log.lock().calls.is_empty());
    }
}
