//! Controller binary support: configuration, tracing setup, manifest bootstrap and wiring.

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod observability;

pub use app::App;
pub use config::AppConfig;
