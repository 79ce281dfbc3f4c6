// Макросы условного логирования для горячего пути кадра
#[macro_export]
macro_rules! debug_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! trace_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!($($arg)*);
        }
    };
}

/// Проверка кода ошибки драйвера сразу после вызова.
///
/// Ошибка только логируется с местом вызова; возвращает `true`, если она была.
#[macro_export]
macro_rules! gl_check {
    ($driver:expr, $call:expr) => {
        match $driver.take_error() {
            Some(code) => {
                tracing::error!(
                    call = $call,
                    site = concat!(file!(), ":", line!()),
                    "Ошибка драйвера {:#x}",
                    code
                );
                true
            }
            None => false,
        }
    };
}
