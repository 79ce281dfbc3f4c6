use serde::{Deserialize, Serialize};
use std::fmt;

/// Идентификатор окна оконной системы (XID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u32);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Геометрия окна, снятая в момент привязки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
}

impl WindowGeometry {
    pub fn new(width: u32, height: u32, depth: u8) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            depth,
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// 32-битные окна несут premultiplied alpha
    pub fn has_alpha(&self) -> bool {
        self.depth == 32
    }
}

impl fmt::Display for WindowGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{} (depth {})",
            self.width, self.height, self.x, self.y, self.depth
        )
    }
}

/// Уведомление оконной системы, приведённое к закрытому набору видов
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Created(WindowHandle),
    Mapped {
        window: WindowHandle,
        parent: WindowHandle,
    },
    Unmapped(WindowHandle),
    Destroyed(WindowHandle),
    Configured {
        window: WindowHandle,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Exposed(WindowHandle),
    Visibility(WindowHandle),
    MapRequested(WindowHandle),
    ConfigureRequested(WindowHandle),
    KeyPressed { keycode: u8 },
    ButtonPressed { button: u8 },
    /// Собственное уведомление компоновщика, запускающее следующий кадр
    FrameTick,
    ProtocolError(String),
    Other(u8),
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Created(_) => NotificationKind::Created,
            Notification::Mapped { .. } => NotificationKind::Mapped,
            Notification::Unmapped(_) => NotificationKind::Unmapped,
            Notification::Destroyed(_) => NotificationKind::Destroyed,
            Notification::Configured { .. } => NotificationKind::Configured,
            Notification::Exposed(_) => NotificationKind::Exposed,
            Notification::Visibility(_) => NotificationKind::Visibility,
            Notification::MapRequested(_) => NotificationKind::MapRequested,
            Notification::ConfigureRequested(_) => NotificationKind::ConfigureRequested,
            Notification::KeyPressed { .. } => NotificationKind::KeyPressed,
            Notification::ButtonPressed { .. } => NotificationKind::ButtonPressed,
            Notification::FrameTick => NotificationKind::FrameTick,
            Notification::ProtocolError(_) => NotificationKind::ProtocolError,
            Notification::Other(_) => NotificationKind::Other,
        }
    }

    /// Окно, к которому относится уведомление, если оно есть
    pub fn window(&self) -> Option<WindowHandle> {
        match self {
            Notification::Created(w)
            | Notification::Unmapped(w)
            | Notification::Destroyed(w)
            | Notification::Exposed(w)
            | Notification::Visibility(w)
            | Notification::MapRequested(w)
            | Notification::ConfigureRequested(w) => Some(*w),
            Notification::Mapped { window, .. } | Notification::Configured { window, .. } => {
                Some(*window)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window() {
            Some(window) => write!(f, "{} {}", self.kind(), window),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Виды уведомлений; индекс используется как позиция в таблице диспетчеризации
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Created,
    Mapped,
    Unmapped,
    Destroyed,
    Configured,
    Exposed,
    Visibility,
    MapRequested,
    ConfigureRequested,
    KeyPressed,
    ButtonPressed,
    FrameTick,
    ProtocolError,
    Other,
}

impl NotificationKind {
    pub const COUNT: usize = 14;

    #[cfg(test)]
    pub const ALL: [NotificationKind; Self::COUNT] = [
        NotificationKind::Created,
        NotificationKind::Mapped,
        NotificationKind::Unmapped,
        NotificationKind::Destroyed,
        NotificationKind::Configured,
        NotificationKind::Exposed,
        NotificationKind::Visibility,
        NotificationKind::MapRequested,
        NotificationKind::ConfigureRequested,
        NotificationKind::KeyPressed,
        NotificationKind::ButtonPressed,
        NotificationKind::FrameTick,
        NotificationKind::ProtocolError,
        NotificationKind::Other,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationKind::Created => "CreateNotify",
            NotificationKind::Mapped => "MapNotify",
            NotificationKind::Unmapped => "UnmapNotify",
            NotificationKind::Destroyed => "DestroyNotify",
            NotificationKind::Configured => "ConfigureNotify",
            NotificationKind::Exposed => "Expose",
            NotificationKind::Visibility => "VisibilityNotify",
            NotificationKind::MapRequested => "MapRequest",
            NotificationKind::ConfigureRequested => "ConfigureRequest",
            NotificationKind::KeyPressed => "KeyPress",
            NotificationKind::ButtonPressed => "ButtonPress",
            NotificationKind::FrameTick => "FrameTick",
            NotificationKind::ProtocolError => "Error",
            NotificationKind::Other => "Other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_indexes_are_dense() {
        for (i, kind) in NotificationKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_notification_window_and_display() {
        let mapped = Notification::Mapped {
            window: WindowHandle(0x1a00003),
            parent: WindowHandle(0x1e3),
        };
        assert_eq!(mapped.kind(), NotificationKind::Mapped);
        assert_eq!(mapped.window(), Some(WindowHandle(0x1a00003)));
        assert_eq!(mapped.to_string(), "MapNotify 0x1a00003");

        assert_eq!(Notification::FrameTick.window(), None);
        assert_eq!(Notification::FrameTick.to_string(), "FrameTick");
    }

    #[test]
    fn test_geometry_alpha_by_depth() {
        assert!(WindowGeometry::new(10, 10, 32).has_alpha());
        assert!(!WindowGeometry::new(10, 10, 24).has_alpha());
        assert_eq!(
            WindowGeometry::new(200, 100, 24).at(5, 7).to_string(),
            "200x100+5+7 (depth 24)"
        );
    }
}
