use super::display::XDisplay;
use super::programs::QuadPrograms;
use crate::backend::{
    ColoredQuad, GraphicsDriver, PixmapHandle, SurfaceBinding, TextureFormat, TextureId,
    TextureTarget, TexturedQuad,
};
use crate::compositor_error;
use crate::error::{CompositorError, Result};
use glow::HasContext;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::ffi::{c_int, c_uint, c_ulong, c_void, CString};
use std::rc::Rc;
use tracing::{debug, info, warn};
use x11_dl::glx::{GLXContext, GLXFBConfig, GLXWindow, Glx};
use x11_dl::xlib::{Display, XVisualInfo};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    ColormapAlloc, ConnectionExt as _, CreateWindowAux, EventMask, Window, WindowClass,
};

// GLX 1.3
const GLX_DOUBLEBUFFER: c_int = 5;
const GLX_DEPTH_SIZE: c_int = 12;
const GLX_DRAWABLE_TYPE: c_int = 0x8010;
const GLX_RENDER_TYPE: c_int = 0x8011;
const GLX_X_RENDERABLE: c_int = 0x8012;
const GLX_RGBA_TYPE: c_int = 0x8014;
const GLX_WINDOW_BIT: c_int = 0x0001;
const GLX_RGBA_BIT: c_int = 0x0001;

// GLX_EXT_texture_from_pixmap
const GLX_BIND_TO_TEXTURE_RGBA_EXT: c_int = 0x20D1;
const GLX_BIND_TO_MIPMAP_TEXTURE_EXT: c_int = 0x20D2;
const GLX_BIND_TO_TEXTURE_TARGETS_EXT: c_int = 0x20D3;
const GLX_Y_INVERTED_EXT: c_int = 0x20D4;
const GLX_TEXTURE_FORMAT_EXT: c_int = 0x20D5;
const GLX_TEXTURE_TARGET_EXT: c_int = 0x20D6;
const GLX_TEXTURE_FORMAT_RGB_EXT: c_int = 0x20D9;
const GLX_TEXTURE_FORMAT_RGBA_EXT: c_int = 0x20DA;
const GLX_TEXTURE_2D_EXT: c_int = 0x20DC;
const GLX_TEXTURE_RECTANGLE_EXT: c_int = 0x20DD;
const GLX_FRONT_LEFT_EXT: c_int = 0x20DE;
const GLX_TEXTURE_2D_BIT_EXT: c_int = 0x0002;
const GLX_TEXTURE_RECTANGLE_BIT_EXT: c_int = 0x0004;

#[rustfmt::skip]
const FBCONFIG_ATTRIBUTES: [c_int; 15] = [
    GLX_BIND_TO_TEXTURE_RGBA_EXT, 1,
    GLX_BIND_TO_MIPMAP_TEXTURE_EXT, 1,
    GLX_DOUBLEBUFFER, 1,
    GLX_DEPTH_SIZE, 24,
    GLX_RENDER_TYPE, GLX_RGBA_BIT,
    GLX_DRAWABLE_TYPE, GLX_WINDOW_BIT,
    GLX_X_RENDERABLE, 1,
    0,
];

type BindTexImageFn = unsafe extern "C" fn(*mut Display, c_ulong, c_int, *const c_int);
type ReleaseTexImageFn = unsafe extern "C" fn(*mut Display, c_ulong, c_int);

/// Точки входа GLX_EXT_texture_from_pixmap, загруженные через glXGetProcAddress
struct TextureFromPixmap {
    bind: BindTexImageFn,
    release: ReleaseTexImageFn,
}

impl TextureFromPixmap {
    fn load(glx: &Glx) -> Result<Self> {
        let bind = proc_address(glx, "glXBindTexImageEXT");
        let release = proc_address(glx, "glXReleaseTexImageEXT");
        if bind.is_null() || release.is_null() {
            return Err(compositor_error!(missing_extension, "GLX_EXT_texture_from_pixmap"));
        }
        unsafe {
            Ok(Self {
                bind: std::mem::transmute::<*const c_void, BindTexImageFn>(bind),
                release: std::mem::transmute::<*const c_void, ReleaseTexImageFn>(release),
            })
        }
    }
}

fn proc_address(glx: &Glx, name: &str) -> *const c_void {
    let Ok(symbol) = CString::new(name) else {
        return std::ptr::null();
    };
    unsafe { (glx.glXGetProcAddress)(symbol.as_ptr() as *const u8) }
        .map_or(std::ptr::null(), |f| f as *const c_void)
}

/// Атрибуты glXCreatePixmap: формат по глубине и target из поддерживаемых конфигурацией
fn pixmap_attributes(format: TextureFormat, bind_targets: c_int) -> SmallVec<[c_int; 5]> {
    let mut attributes = SmallVec::new();
    attributes.push(GLX_TEXTURE_FORMAT_EXT);
    attributes.push(match format {
        TextureFormat::Rgb => GLX_TEXTURE_FORMAT_RGB_EXT,
        TextureFormat::Rgba => GLX_TEXTURE_FORMAT_RGBA_EXT,
    });
    if bind_targets & GLX_TEXTURE_RECTANGLE_BIT_EXT != 0 {
        attributes.extend_from_slice(&[GLX_TEXTURE_TARGET_EXT, GLX_TEXTURE_RECTANGLE_EXT]);
    } else if bind_targets & GLX_TEXTURE_2D_BIT_EXT != 0 {
        attributes.extend_from_slice(&[GLX_TEXTURE_TARGET_EXT, GLX_TEXTURE_2D_EXT]);
    }
    // Иначе target выбирает драйвер
    attributes.push(0);
    attributes
}

fn gl_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Rectangle => glow::TEXTURE_RECTANGLE,
        TextureTarget::Texture2D => glow::TEXTURE_2D,
    }
}

/// Графический драйвер поверх GLX и glow
pub struct GlxDriver {
    display: Rc<XDisplay>,
    gl: glow::Context,
    fbconfig: GLXFBConfig,
    context: GLXContext,
    canvas: Window,
    colormap: u32,
    glx_window: GLXWindow,
    y_inverted: bool,
    bind_targets: c_int,
    tfp: TextureFromPixmap,
    programs: QuadPrograms,
    textures: HashMap<TextureId, glow::Texture>,
    next_texture: u32,
    pending_error: Option<u32>,
}

impl GlxDriver {
    /// Выбирает конфигурацию framebuffer, создаёт холст внутри overlay и делает контекст текущим
    pub fn new(display: Rc<XDisplay>, overlay: Window, size: (u32, u32), direct: bool) -> Result<Self> {
        let dpy = display.raw;
        let glx = &display.glx;
        let conn = &display.conn;

        let fbconfig = choose_fbconfig(&display)?;
        let y_inverted = fbconfig_attribute(&display, fbconfig, GLX_Y_INVERTED_EXT) != 0;
        let bind_targets = fbconfig_attribute(&display, fbconfig, GLX_BIND_TO_TEXTURE_TARGETS_EXT);
        debug!("FBConfig: y_inverted {}, targets {:#x}", y_inverted, bind_targets);

        let visual = unsafe { (glx.glXGetVisualFromFBConfig)(dpy, fbconfig) };
        let Some(&XVisualInfo { visualid, depth, .. }) = (unsafe { visual.as_ref() }) else {
            return Err(compositor_error!(graphics_setup, "glXGetVisualFromFBConfig вернул NULL"));
        };
        unsafe { (display.xlib.XFree)(visual as *mut c_void) };
        let visualid = visualid as u32;

        let root = conn
            .setup()
            .roots
            .get(display.screen)
            .map(|screen| screen.root)
            .ok_or_else(|| compositor_error!(connection, "экран {} не найден", display.screen))?;
        let colormap = conn.generate_id()?;
        conn.create_colormap(ColormapAlloc::NONE, colormap, root, visualid)?;

        let canvas = conn.generate_id()?;
        let (width, height) = (size.0.min(u16::MAX as u32) as u16, size.1.min(u16::MAX as u32) as u16);
        conn.create_window(
            depth as u8,
            canvas,
            overlay,
            0,
            0,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            visualid,
            &CreateWindowAux::new()
                .colormap(colormap)
                .border_pixel(0)
                .event_mask(EventMask::EXPOSURE),
        )?
        .check()?;

        let glx_window = unsafe { (glx.glXCreateWindow)(dpy, fbconfig, canvas as c_ulong, std::ptr::null()) };
        if glx_window == 0 {
            return Err(compositor_error!(graphics_setup, "glXCreateWindow для {:#x}", canvas));
        }

        let context = unsafe {
            (glx.glXCreateNewContext)(dpy, fbconfig, GLX_RGBA_TYPE, std::ptr::null_mut(), direct as c_int)
        };
        if context.is_null() {
            return Err(compositor_error!(graphics_setup, "glXCreateNewContext вернул NULL"));
        }

        let is_direct = unsafe { (glx.glXIsDirect)(dpy, context) } != 0;
        if direct && !is_direct {
            warn!("Сервер не поддерживает прямой рендеринг, используется непрямой");
        }
        info!("Рендеринг: {}", if is_direct { "прямой" } else { "непрямой" });

        if unsafe { (glx.glXMakeContextCurrent)(dpy, glx_window, glx_window, context) } == 0 {
            return Err(compositor_error!(graphics_setup, "glXMakeContextCurrent"));
        }

        let tfp = TextureFromPixmap::load(glx)?;
        let gl = unsafe { glow::Context::from_loader_function(|name| proc_address(glx, name)) };
        unsafe { gl.viewport(0, 0, size.0 as i32, size.1 as i32) };
        let programs = QuadPrograms::new(&gl, size)?;

        conn.map_subwindows(overlay)?;
        conn.flush()?;
        info!("Холст {:#x} {}x{} внутри overlay {:#x}", canvas, size.0, size.1, overlay);

        Ok(Self {
            display,
            gl,
            fbconfig,
            context,
            canvas,
            colormap,
            glx_window,
            y_inverted,
            bind_targets,
            tfp,
            programs,
            textures: HashMap::new(),
            next_texture: 1,
            pending_error: None,
        })
    }

    pub fn canvas(&self) -> Window {
        self.canvas
    }
}

fn choose_fbconfig(display: &XDisplay) -> Result<GLXFBConfig> {
    let mut count: c_int = 0;
    let configs = unsafe {
        (display.glx.glXChooseFBConfig)(
            display.raw,
            display.screen as c_int,
            FBCONFIG_ATTRIBUTES.as_ptr(),
            &mut count,
        )
    };
    if configs.is_null() || count <= 0 {
        return Err(CompositorError::NoFramebufferConfig);
    }

    let fbconfig = unsafe { *configs };
    unsafe { (display.xlib.XFree)(configs as *mut c_void) };
    debug!("Подходящих FBConfig: {}, выбран первый", count);
    Ok(fbconfig)
}

fn fbconfig_attribute(display: &XDisplay, fbconfig: GLXFBConfig, attribute: c_int) -> c_int {
    let mut value: c_int = 0;
    unsafe { (display.glx.glXGetFBConfigAttrib)(display.raw, fbconfig, attribute, &mut value) };
    value
}

impl GraphicsDriver for GlxDriver {
    fn y_inverted(&self) -> bool {
        self.y_inverted
    }

    fn create_binding(&mut self, pixmap: PixmapHandle, format: TextureFormat) -> Result<SurfaceBinding> {
        let attributes = pixmap_attributes(format, self.bind_targets);
        self.display.discard_error();
        let binding = unsafe {
            (self.display.glx.glXCreatePixmap)(
                self.display.raw,
                self.fbconfig,
                pixmap.0 as c_ulong,
                attributes.as_ptr(),
            )
        };
        // Ошибка сервера приходит асинхронно: XID в этом случае мёртвый
        let error = self.display.sync_error();
        if binding == 0 || error.is_some() {
            return Err(CompositorError::Graphics {
                call: "glXCreatePixmap",
                code: error.map_or(0, u32::from),
            });
        }
        Ok(SurfaceBinding(binding as u64))
    }

    fn binding_target(&mut self, binding: SurfaceBinding) -> Result<u32> {
        let mut value: c_uint = 0;
        unsafe {
            (self.display.glx.glXQueryDrawable)(
                self.display.raw,
                binding.0 as c_ulong,
                GLX_TEXTURE_TARGET_EXT,
                &mut value,
            )
        };
        if let Some(code) = self.display.sync_error() {
            return Err(CompositorError::Graphics {
                call: "glXQueryDrawable",
                code: code.into(),
            });
        }
        Ok(value)
    }

    fn destroy_binding(&mut self, binding: SurfaceBinding) {
        unsafe { (self.display.glx.glXDestroyPixmap)(self.display.raw, binding.0 as c_ulong) };
    }

    fn create_texture(&mut self) -> Result<TextureId> {
        let texture = unsafe { self.gl.create_texture() }.map_err(|_| CompositorError::Graphics {
            call: "glGenTextures",
            code: unsafe { self.gl.get_error() },
        })?;
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(&texture) {
            unsafe { self.gl.delete_texture(texture) };
        }
    }

    fn wait_native(&mut self) {
        unsafe { (self.display.glx.glXWaitX)() };
    }

    fn clear(&mut self, color: [f32; 4]) {
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn draw_background(&mut self, quad: &ColoredQuad) {
        unsafe { self.gl.disable(glow::BLEND) };
        self.programs.draw_colored(&self.gl, quad);
    }

    fn set_blending(&mut self, premultiplied: bool) {
        unsafe {
            if premultiplied {
                self.gl.enable(glow::BLEND);
                self.gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);
            } else {
                self.gl.disable(glow::BLEND);
            }
        }
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: TextureId) {
        match self.textures.get(&texture) {
            Some(&texture) => unsafe {
                self.gl.active_texture(glow::TEXTURE0);
                self.gl.bind_texture(gl_target(target), Some(texture));
            },
            None => self.pending_error = Some(glow::INVALID_VALUE),
        }
    }

    fn bind_image(&mut self, binding: SurfaceBinding) {
        unsafe {
            (self.tfp.bind)(
                self.display.raw,
                binding.0 as c_ulong,
                GLX_FRONT_LEFT_EXT,
                std::ptr::null(),
            )
        };
    }

    fn set_linear_filter(&mut self, target: TextureTarget) {
        let target = gl_target(target);
        unsafe {
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        }
    }

    fn draw_textured(&mut self, target: TextureTarget, quad: &TexturedQuad) {
        self.programs.draw_textured(&self.gl, target.is_normalized(), quad);
    }

    fn unbind_texture(&mut self, target: TextureTarget) {
        unsafe { self.gl.bind_texture(gl_target(target), None) };
    }

    fn release_image(&mut self, binding: SurfaceBinding) {
        unsafe { (self.tfp.release)(self.display.raw, binding.0 as c_ulong, GLX_FRONT_LEFT_EXT) };
    }

    fn wait_gl(&mut self) {
        unsafe { (self.display.glx.glXWaitGL)() };
    }

    fn present(&mut self) {
        unsafe { (self.display.glx.glXSwapBuffers)(self.display.raw, self.glx_window) };
    }

    fn take_error(&mut self) -> Option<u32> {
        if let Some(code) = self.pending_error.take() {
            return Some(code);
        }
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => None,
            code => Some(code),
        }
    }
}

impl Drop for GlxDriver {
    fn drop(&mut self) {
        let dpy = self.display.raw;
        let glx = &self.display.glx;
        unsafe {
            for (_, texture) in self.textures.drain() {
                self.gl.delete_texture(texture);
            }
            self.programs.delete(&self.gl);
            (glx.glXMakeContextCurrent)(dpy, 0, 0, std::ptr::null_mut());
            (glx.glXDestroyContext)(dpy, self.context);
            (glx.glXDestroyWindow)(dpy, self.glx_window);
        }

        let conn = &self.display.conn;
        let _ = conn.destroy_window(self.canvas);
        let _ = conn.free_colormap(self.colormap);
        let _ = conn.flush();
        debug!("GLX-контекст и холст освобождены");
    }
}
