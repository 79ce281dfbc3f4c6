//! Backends: the windowing system and the graphics driver the core talks to.
//!
//! The compositing core never touches X11 or GL directly. It sees a
//! [`WindowSystem`] (notification stream plus a small command set) and a
//! [`GraphicsDriver`] (texture-from-pixmap binding and quad drawing).
//! `x11` is the real implementation, `headless` records everything and
//! backs both `--dry-run` and the unit tests.

pub mod headless;
pub mod x11;

use crate::config::Config;
use crate::error::Result;
use crate::events::{Notification, WindowGeometry, WindowHandle};
use std::fmt;
use tracing::info;

/// Texture target codes as reported by GLX_EXT_texture_from_pixmap.
#[cfg(test)]
pub const TARGET_TEXTURE_1D: u32 = 0x20DB;
pub const TARGET_TEXTURE_2D: u32 = 0x20DC;
pub const TARGET_TEXTURE_RECTANGLE: u32 = 0x20DD;

/// Off-screen pixmap named for a redirected window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixmapHandle(pub u32);

/// Driver-side binding of a pixmap (a GLXPixmap on X11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceBinding(pub u64);

/// GPU texture name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgb,
    Rgba,
}

impl TextureFormat {
    pub fn for_depth(depth: u8) -> Self {
        if depth == 32 {
            TextureFormat::Rgba
        } else {
            TextureFormat::Rgb
        }
    }
}

/// Texture addressing negotiated with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Pixel-addressed texture coordinates.
    Rectangle,
    /// Normalised `[0, 1]` texture coordinates.
    Texture2D,
}

impl TextureTarget {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            TARGET_TEXTURE_RECTANGLE => Some(TextureTarget::Rectangle),
            TARGET_TEXTURE_2D => Some(TextureTarget::Texture2D),
            _ => None,
        }
    }

    pub fn is_normalized(self) -> bool {
        matches!(self, TextureTarget::Texture2D)
    }
}

impl fmt::Display for TextureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureTarget::Rectangle => f.write_str("RECTANGLE"),
            TextureTarget::Texture2D => f.write_str("2D"),
        }
    }
}

/// Vertex of a textured quad in overlay pixels: position then texture coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturedQuad {
    pub vertices: [TexturedVertex; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColoredVertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColoredQuad {
    pub vertices: [ColoredVertex; 4],
}

/// Windowing-system side: notifications in, a handful of commands out.
pub trait WindowSystem {
    fn root(&self) -> WindowHandle;
    fn overlay(&self) -> WindowHandle;
    /// The compositor's own drawing surface.
    fn canvas(&self) -> WindowHandle;
    fn screen_size(&self) -> (u32, u32);

    fn query_geometry(&mut self, window: WindowHandle) -> Result<WindowGeometry>;
    fn name_window_pixmap(&mut self, window: WindowHandle) -> Result<PixmapHandle>;
    fn free_pixmap(&mut self, pixmap: PixmapHandle);
    /// Top-level windows that are already viewable.
    fn mapped_windows(&mut self) -> Result<Vec<WindowHandle>>;

    /// Queue the private notification that drives the next frame.
    fn send_frame_tick(&mut self) -> Result<()>;
    /// Blocks for the next notification; `None` once the stream is closed.
    fn next_notification(&mut self) -> Result<Option<Notification>>;
}

/// Graphics-driver side. Calls do not report errors themselves;
/// callers poll [`GraphicsDriver::take_error`] after each one.
pub trait GraphicsDriver {
    /// Whether bound images are stored bottom-up; fixed per framebuffer configuration.
    fn y_inverted(&self) -> bool;

    fn create_binding(&mut self, pixmap: PixmapHandle, format: TextureFormat) -> Result<SurfaceBinding>;
    /// Raw texture target code the driver chose for the binding.
    fn binding_target(&mut self, binding: SurfaceBinding) -> Result<u32>;
    fn destroy_binding(&mut self, binding: SurfaceBinding);
    fn create_texture(&mut self) -> Result<TextureId>;
    fn delete_texture(&mut self, texture: TextureId);

    fn wait_native(&mut self);
    fn clear(&mut self, color: [f32; 4]);
    fn draw_background(&mut self, quad: &ColoredQuad);
    fn set_blending(&mut self, premultiplied: bool);
    fn bind_texture(&mut self, target: TextureTarget, texture: TextureId);
    fn bind_image(&mut self, binding: SurfaceBinding);
    fn set_linear_filter(&mut self, target: TextureTarget);
    fn draw_textured(&mut self, target: TextureTarget, quad: &TexturedQuad);
    fn unbind_texture(&mut self, target: TextureTarget);
    fn release_image(&mut self, binding: SurfaceBinding);
    fn wait_gl(&mut self);
    fn present(&mut self);

    fn take_error(&mut self) -> Option<u32>;
}

/// Both collaborators of one session.
pub struct Backend {
    pub window_system: Box<dyn WindowSystem>,
    pub graphics: Box<dyn GraphicsDriver>,
}

/// Factory function to create the backend based on the dry_run flag
pub fn create_backend(config: &Config, dry_run: bool) -> Result<Backend> {
    if dry_run {
        info!("Dry-run режим - используется headless backend");
        Ok(headless::dry_run_backend())
    } else {
        x11::open(config)
    }
}
