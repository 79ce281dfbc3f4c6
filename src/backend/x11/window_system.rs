use super::display::XDisplay;
use crate::backend::{PixmapHandle, WindowSystem};
use crate::error::Result;
use crate::events::{Notification, WindowGeometry, WindowHandle};
use std::rc::Rc;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::composite::{ConnectionExt as _, Redirect};
use x11rb::protocol::xproto::{
    Atom, ClientMessageEvent, ConnectionExt as _, EventMask, MapState, Window, WindowClass,
    CLIENT_MESSAGE_EVENT,
};
use x11rb::protocol::Event;

/// Имя атома собственного ClientMessage, запускающего кадр
pub const FRAME_ATOM_NAME: &[u8] = b"_GLCOMP_FRAME";

/// Оконная сторона X11: уведомления x11rb и команды Composite
pub struct X11WindowSystem {
    display: Rc<XDisplay>,
    root: Window,
    overlay: Window,
    canvas: Window,
    screen_size: (u32, u32),
    frame_atom: Atom,
}

impl X11WindowSystem {
    pub fn new(
        display: Rc<XDisplay>,
        root: Window,
        overlay: Window,
        canvas: Window,
        screen_size: (u32, u32),
        frame_atom: Atom,
    ) -> Self {
        Self {
            display,
            root,
            overlay,
            canvas,
            screen_size,
            frame_atom,
        }
    }
}

impl WindowSystem for X11WindowSystem {
    fn root(&self) -> WindowHandle {
        WindowHandle(self.root)
    }

    fn overlay(&self) -> WindowHandle {
        WindowHandle(self.overlay)
    }

    fn canvas(&self) -> WindowHandle {
        WindowHandle(self.canvas)
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen_size
    }

    fn query_geometry(&mut self, window: WindowHandle) -> Result<WindowGeometry> {
        let reply = self.display.conn.get_geometry(window.0)?.reply()?;
        Ok(WindowGeometry::new(reply.width.into(), reply.height.into(), reply.depth)
            .at(reply.x.into(), reply.y.into()))
    }

    fn name_window_pixmap(&mut self, window: WindowHandle) -> Result<PixmapHandle> {
        let conn = &self.display.conn;
        let pixmap = conn.generate_id()?;
        // Окно могло исчезнуть между уведомлением и запросом: ошибка должна прийти сейчас
        conn.composite_name_window_pixmap(window.0, pixmap)?.check()?;
        Ok(PixmapHandle(pixmap))
    }

    fn free_pixmap(&mut self, pixmap: PixmapHandle) {
        if let Err(e) = self.display.conn.free_pixmap(pixmap.0) {
            warn!("FreePixmap {:#x}: {}", pixmap.0, e);
        }
    }

    fn mapped_windows(&mut self) -> Result<Vec<WindowHandle>> {
        let conn = &self.display.conn;
        let tree = conn.query_tree(self.root)?.reply()?;
        debug!("Дочерних окон root: {}", tree.children.len());

        let cookies = tree
            .children
            .iter()
            .map(|&window| Ok((window, conn.get_window_attributes(window)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut viewable = Vec::new();
        for (window, cookie) in cookies {
            // Окно могло быть уничтожено после QueryTree
            let Ok(attributes) = cookie.reply() else {
                continue;
            };
            if attributes.map_state == MapState::VIEWABLE && attributes.class != WindowClass::INPUT_ONLY {
                viewable.push(WindowHandle(window));
            }
        }
        Ok(viewable)
    }

    fn send_frame_tick(&mut self) -> Result<()> {
        let conn = &self.display.conn;
        let event = ClientMessageEvent::new(8, self.root, self.frame_atom, [0u8; 20]);
        conn.send_event(false, self.overlay, EventMask::SUBSTRUCTURE_NOTIFY, event)?;
        conn.flush()?;
        Ok(())
    }

    fn next_notification(&mut self) -> Result<Option<Notification>> {
        let event = self.display.conn.wait_for_event()?;
        Ok(Some(to_notification(event, self.frame_atom)))
    }
}

impl Drop for X11WindowSystem {
    fn drop(&mut self) {
        let conn = &self.display.conn;
        let _ = conn.composite_unredirect_subwindows(self.root, Redirect::AUTOMATIC);
        let _ = conn.composite_release_overlay_window(self.root);
        let _ = conn.flush();
        debug!("Перенаправление окон снято, overlay освобождён");
    }
}

/// Приводит событие X11 к закрытому набору уведомлений
pub fn to_notification(event: Event, frame_atom: Atom) -> Notification {
    match event {
        Event::CreateNotify(e) => Notification::Created(WindowHandle(e.window)),
        Event::MapNotify(e) => Notification::Mapped {
            window: WindowHandle(e.window),
            parent: WindowHandle(e.event),
        },
        Event::UnmapNotify(e) => Notification::Unmapped(WindowHandle(e.window)),
        Event::DestroyNotify(e) => Notification::Destroyed(WindowHandle(e.window)),
        Event::ConfigureNotify(e) => Notification::Configured {
            window: WindowHandle(e.window),
            x: e.x.into(),
            y: e.y.into(),
            width: e.width.into(),
            height: e.height.into(),
        },
        Event::Expose(e) => Notification::Exposed(WindowHandle(e.window)),
        Event::VisibilityNotify(e) => Notification::Visibility(WindowHandle(e.window)),
        Event::MapRequest(e) => Notification::MapRequested(WindowHandle(e.window)),
        Event::ConfigureRequest(e) => Notification::ConfigureRequested(WindowHandle(e.window)),
        Event::KeyPress(e) => Notification::KeyPressed { keycode: e.detail },
        Event::ButtonPress(e) => Notification::ButtonPressed { button: e.detail },
        Event::ClientMessage(e) if e.type_ == frame_atom => Notification::FrameTick,
        Event::ClientMessage(_) => Notification::Other(CLIENT_MESSAGE_EVENT),
        Event::Error(e) => Notification::ProtocolError(format!(
            "{:?}, запрос {}.{}, значение {:#x}",
            e.error_kind, e.major_opcode, e.minor_opcode, e.bad_value
        )),
        other => Notification::Other(other.response_type()),
    }
}
