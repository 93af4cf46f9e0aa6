//! Configuration loading and validation.

pub mod loader;
pub mod model;

pub use loader::{load_and_validate, load_detected, load_from_path};
pub use model::{AppConfig, DisplayConfig, PlayerConfig, PollConfig, StopConfig, WorkerConfig};
