//! Capability traits the pipeline depends on.
//!
//! Applications implement these to plug in a real discovery service;
//! the orchestrator only ever sees them as `Arc<dyn ..>`.

pub mod backend;
pub mod directory;
