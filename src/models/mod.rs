// src/models/mod.rs
// JSON/YAML descriptors shared between services, the config store and the orchestrator

mod descriptors;
mod payloads;

pub use descriptors::*;
pub use payloads::*;
