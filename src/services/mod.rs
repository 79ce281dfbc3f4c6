pub mod compositor;
pub mod dispatcher;
pub mod session;
pub mod surface_binder;
pub mod window_table;

pub use session::Session;
