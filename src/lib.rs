pub mod app;
pub mod handlers;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
