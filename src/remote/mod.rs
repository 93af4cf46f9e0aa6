//! Orchestrator-side access to the worker service.

pub mod client;

pub use client::{WorkerApi, WorkerClient};
