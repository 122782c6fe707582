//! Domain types shared by every stage of a deployment.

pub mod config;
pub mod job;
pub mod progress;
pub mod target;
