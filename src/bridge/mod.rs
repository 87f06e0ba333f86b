//! Top-level wiring: endpoints, pipeline, catch-up, and supervision.

pub mod orchestrator;

pub use orchestrator::Orchestrator;
