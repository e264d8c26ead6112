pub mod app;
pub mod dealer;

pub use app::app;
