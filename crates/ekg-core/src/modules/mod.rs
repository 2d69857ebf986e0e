//! Analysis modules that run on a built event knowledge graph

pub mod discovery;
pub mod inference;

pub use discovery::ProcessDiscovery;
pub use inference::InferenceEngine;
