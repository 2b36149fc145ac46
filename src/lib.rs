//! rt-compute: a compute-shader triangle ray tracer whose output image is
//! shared between a compute queue and a graphics queue.

pub mod app;
pub mod config;
pub mod error;
pub mod render;
pub mod scene;
pub mod sync;
pub mod vk;

pub use config::AppConfig;
pub use error::RenderError;
