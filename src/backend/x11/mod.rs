//! X11 backend: Composite redirection through x11rb, drawing through GLX and glow.
//!
//! Xlib is loaded at runtime only because GLX needs a `Display`; every
//! protocol request and the event queue go through x11rb on the same
//! connection.

mod display;
mod glx;
mod programs;
mod window_system;

use self::display::XDisplay;
use self::glx::GlxDriver;
use self::window_system::X11WindowSystem;
use super::Backend;
use crate::compositor_error;
use crate::config::Config;
use crate::error::Result;
use std::ffi::c_int;
use std::rc::Rc;
use tracing::info;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::composite::{self, ConnectionExt as _, Redirect};
use x11rb::protocol::shape::{self, SK};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::damage;
use x11rb::protocol::xproto::{ChangeWindowAttributesAux, ConnectionExt as _, EventMask, Window};

/// Минимальные версии Composite и GLX
const COMPOSITE_VERSION: (u32, u32) = (0, 3);
const GLX_VERSION: (c_int, c_int) = (1, 3);

/// Открывает дисплей, проверяет расширения и собирает оба бэкенда
pub fn open(config: &Config) -> Result<Backend> {
    let display = Rc::new(XDisplay::open(config.display.name.as_deref())?);
    check_features(&display)?;

    let conn = &display.conn;
    let screen = conn
        .setup()
        .roots
        .get(display.screen)
        .ok_or_else(|| compositor_error!(connection, "экран {} не найден", display.screen))?;
    let root = screen.root;

    conn.change_window_attributes(
        root,
        &ChangeWindowAttributesAux::new().event_mask(
            EventMask::SUBSTRUCTURE_NOTIFY
                | EventMask::KEY_PRESS
                | EventMask::VISIBILITY_CHANGE
                | EventMask::EXPOSURE,
        ),
    )?
    .check()?;
    conn.composite_redirect_subwindows(root, Redirect::AUTOMATIC)?.check()?;

    let overlay = create_overlay(&display, root)?;
    let overlay_geometry = conn.get_geometry(overlay)?.reply()?;
    let size = (
        u32::from(overlay_geometry.width),
        u32::from(overlay_geometry.height),
    );

    let frame_atom = conn
        .intern_atom(false, window_system::FRAME_ATOM_NAME)?
        .reply()?
        .atom;

    let graphics = GlxDriver::new(display.clone(), overlay, size, config.display.direct_rendering)?;
    info!(
        "X11: root {:#x}, overlay {:#x}, холст {:#x}, экран {}x{}",
        root,
        overlay,
        graphics.canvas(),
        size.0,
        size.1
    );

    let window_system = X11WindowSystem::new(display, root, overlay, graphics.canvas(), size, frame_atom);

    Ok(Backend {
        window_system: Box::new(window_system),
        graphics: Box::new(graphics),
    })
}

fn check_features(display: &XDisplay) -> Result<()> {
    let conn = &display.conn;

    if conn.extension_information(composite::X11_EXTENSION_NAME)?.is_none() {
        return Err(compositor_error!(missing_extension, "Composite"));
    }
    let version = conn
        .composite_query_version(COMPOSITE_VERSION.0, COMPOSITE_VERSION.1)?
        .reply()?;
    if (version.major_version, version.minor_version) < COMPOSITE_VERSION {
        return Err(compositor_error!(
            missing_extension,
            "Composite >= {}.{} (сервер {}.{})",
            COMPOSITE_VERSION.0,
            COMPOSITE_VERSION.1,
            version.major_version,
            version.minor_version
        ));
    }

    for name in [shape::X11_EXTENSION_NAME, damage::X11_EXTENSION_NAME, xfixes::X11_EXTENSION_NAME] {
        if conn.extension_information(name)?.is_none() {
            return Err(compositor_error!(missing_extension, "{}", name));
        }
    }
    // XFixes требует согласования версии до первого запроса
    conn.xfixes_query_version(5, 0)?.reply()?;

    let (mut event_base, mut error_base) = (0, 0);
    let has_glx = unsafe { (display.glx.glXQueryExtension)(display.raw, &mut error_base, &mut event_base) } != 0;
    if !has_glx {
        return Err(compositor_error!(missing_extension, "GLX"));
    }
    let (mut major, mut minor) = (0, 0);
    unsafe { (display.glx.glXQueryVersion)(display.raw, &mut major, &mut minor) };
    if (major, minor) < GLX_VERSION {
        return Err(compositor_error!(
            missing_extension,
            "GLX >= {}.{} (сервер {}.{})",
            GLX_VERSION.0,
            GLX_VERSION.1,
            major,
            minor
        ));
    }

    info!(
        "Все расширения доступны: Composite {}.{}, GLX {}.{}",
        version.major_version, version.minor_version, major, minor
    );
    Ok(())
}

/// Overlay Composite, прозрачный для ввода
fn create_overlay(display: &XDisplay, root: Window) -> Result<Window> {
    let conn = &display.conn;
    let overlay = conn.composite_get_overlay_window(root)?.reply()?.overlay_win;

    let region = conn.generate_id()?;
    conn.xfixes_create_region(region, &[])?;
    conn.xfixes_set_window_shape_region(overlay, SK::BOUNDING, 0, 0, x11rb::NONE)?;
    conn.xfixes_set_window_shape_region(overlay, SK::INPUT, 0, 0, region)?;
    conn.xfixes_destroy_region(region)?;

    conn.change_window_attributes(
        overlay,
        &ChangeWindowAttributesAux::new().event_mask(
            EventMask::SUBSTRUCTURE_NOTIFY | EventMask::VISIBILITY_CHANGE | EventMask::EXPOSURE,
        ),
    )?
    .check()?;
    conn.flush()?;
    Ok(overlay)
}
