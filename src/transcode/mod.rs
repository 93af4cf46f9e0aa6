//! Turns a source URL into a content-addressed, display-ready artifact.

pub mod commands;
pub mod pipeline;
pub mod tools;

pub use commands::TranscodeSettings;
pub use pipeline::TranscodePipeline;
pub use tools::{ProcessRunner, ToolCommand, ToolRunner, ToolStage};
