//! Event dispatcher: responsibility and boundaries
//!
//! Routes each windowing-system notification to at most one handler, looked up
//! by notification kind in a fixed table. Kinds without a handler are ignored.
//! Handlers only mutate the window table or request a frame; input, focus and
//! decoration policy are out of scope here.

mod handlers;
mod r#trait;

pub use self::r#trait::{Dispatcher, NotificationHandler};
