mod classifier;
mod emotion;
mod frame;
mod ort_classifier;
mod routes;
mod server;

pub mod app;
pub mod config;

pub use app::start_app;
