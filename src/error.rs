use crate::events::WindowHandle;
use thiserror::Error;

/// Exit status for connection, extension and configuration failures.
pub const EXIT_CONNECTION: u8 = 1;
/// Exit status when no framebuffer configuration matches.
pub const EXIT_FBCONFIG: u8 = 2;
/// Exit status when the driver reports a texture target we cannot sample.
pub const EXIT_INVALID_TARGET: u8 = 3;

#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Ошибка конфигурации: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Не удалось открыть дисплей: {0}")]
    Connection(String),

    #[error("Ошибка подключения к X-серверу: {0}")]
    XConnect(#[from] x11rb::errors::ConnectError),

    #[error("Соединение с X-сервером потеряно: {0}")]
    XConnection(#[from] x11rb::errors::ConnectionError),

    #[error("Ошибка ответа X-сервера: {0}")]
    XReply(#[from] x11rb::errors::ReplyError),

    #[error("Ошибка выделения XID: {0}")]
    XId(#[from] x11rb::errors::ReplyOrIdError),

    #[error("Расширение недоступно: {0}")]
    MissingExtension(String),

    #[error("Не найдено подходящей конфигурации framebuffer")]
    NoFramebufferConfig,

    #[error("Ошибка инициализации графики: {0}")]
    GraphicsSetup(String),

    #[error("Неподдерживаемый texture target: {0:#x}")]
    InvalidTarget(u32),

    #[error("Таблица окон заполнена (ёмкость {capacity})")]
    Capacity { capacity: usize },

    #[error("Окно {0} не отслеживается")]
    NotFound(WindowHandle),

    #[error("Ошибка драйвера в {call}: {code:#x}")]
    Graphics { call: &'static str, code: u32 },
}

impl CompositorError {
    /// Fatal errors end the session; everything else is logged and the loop continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            CompositorError::Capacity { .. }
            | CompositorError::NotFound(_)
            | CompositorError::Graphics { .. } => false,
            CompositorError::XReply(x11rb::errors::ReplyError::X11Error(_)) => false,
            CompositorError::XId(x11rb::errors::ReplyOrIdError::X11Error(_)) => false,
            _ => true,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            CompositorError::NoFramebufferConfig => EXIT_FBCONFIG,
            CompositorError::InvalidTarget(_) => EXIT_INVALID_TARGET,
            _ => EXIT_CONNECTION,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompositorError>;

#[macro_export]
macro_rules! compositor_error {
    (connection, $($arg:tt)*) => {
        $crate::error::CompositorError::Connection(format!($($arg)*))
    };
    (missing_extension, $($arg:tt)*) => {
        $crate::error::CompositorError::MissingExtension(format!($($arg)*))
    };
    (graphics_setup, $($arg:tt)*) => {
        $crate::error::CompositorError::GraphicsSetup(format!($($arg)*))
    };
}
