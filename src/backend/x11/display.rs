use crate::compositor_error;
use crate::error::Result;
use std::ffi::{c_int, c_void, CString};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};
use x11_dl::glx::Glx;
use x11_dl::xlib::{Display, XErrorEvent, Xlib};
use x11_dl::xlib_xcb::{XEventQueueOwner, Xlib_xcb};
use x11rb::xcb_ffi::XCBConnection;

/// Код последней ошибки запроса Xlib, 0 если ошибок не было
static LAST_XLIB_ERROR: AtomicU8 = AtomicU8::new(0);

/// Одно соединение с X-сервером, общее для Xlib/GLX и x11rb.
///
/// GLX требует Xlib `Display`, а протокол удобнее вести через x11rb;
/// обе стороны работают поверх одного xcb-соединения, очередью событий владеет XCB.
pub struct XDisplay {
    pub conn: XCBConnection,
    pub xlib: Xlib,
    pub glx: Glx,
    pub raw: *mut Display,
    pub screen: usize,
}

impl XDisplay {
    pub fn open(name: Option<&str>) -> Result<Self> {
        let xlib = Xlib::open().map_err(|e| compositor_error!(connection, "libX11: {}", e))?;
        let xlib_xcb =
            Xlib_xcb::open().map_err(|e| compositor_error!(connection, "libX11-xcb: {}", e))?;
        let glx = Glx::open().map_err(|e| compositor_error!(missing_extension, "libGL: {}", e))?;

        let name = name
            .map(CString::new)
            .transpose()
            .map_err(|e| compositor_error!(connection, "имя дисплея: {}", e))?;
        let raw = unsafe { (xlib.XOpenDisplay)(name.as_ref().map_or(std::ptr::null(), |n| n.as_ptr())) };
        if raw.is_null() {
            return Err(compositor_error!(
                connection,
                "XOpenDisplay({}) вернул NULL",
                name.as_ref().map_or("$DISPLAY".into(), |n| n.to_string_lossy().into_owned())
            ));
        }

        let conn = unsafe {
            (xlib.XSetErrorHandler)(Some(on_xlib_error));
            (xlib_xcb.XSetEventQueueOwner)(raw, XEventQueueOwner::XCBOwnsEventQueue);
            let xcb = (xlib_xcb.XGetXCBConnection)(raw);
            XCBConnection::from_raw_xcb_connection(xcb as *mut c_void, false)
        };
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                unsafe { (xlib.XCloseDisplay)(raw) };
                return Err(e.into());
            }
        };

        let screen = unsafe { (xlib.XDefaultScreen)(raw) } as usize;
        debug!("Дисплей открыт, экран {}", screen);

        Ok(Self {
            conn,
            xlib,
            glx,
            raw,
            screen,
        })
    }
}

impl XDisplay {
    /// Забывает ошибки, пришедшие до начала отслеживаемого запроса
    pub fn discard_error(&self) {
        unsafe { (self.xlib.XSync)(self.raw, 0) };
        take_last_error();
    }

    /// Дожидается обработки запросов Xlib и возвращает код ошибки, если она пришла
    pub fn sync_error(&self) -> Option<u8> {
        unsafe { (self.xlib.XSync)(self.raw, 0) };
        take_last_error()
    }
}

fn take_last_error() -> Option<u8> {
    match LAST_XLIB_ERROR.swap(0, Ordering::Relaxed) {
        0 => None,
        code => Some(code),
    }
}

impl Drop for XDisplay {
    fn drop(&mut self) {
        debug!("Закрытие дисплея");
        unsafe { (self.xlib.XCloseDisplay)(self.raw) };
    }
}

/// Ошибки запросов Xlib (GLX) не должны завершать процесс
unsafe extern "C" fn on_xlib_error(_display: *mut Display, event: *mut XErrorEvent) -> c_int {
    if let Some(event) = event.as_ref() {
        LAST_XLIB_ERROR.store(event.error_code, Ordering::Relaxed);
        warn!(
            "[XError] код {}, запрос {}.{}, ресурс {:#x}",
            event.error_code, event.request_code, event.minor_code, event.resourceid
        );
    }
    0
}
