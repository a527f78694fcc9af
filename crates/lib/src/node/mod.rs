//! Build-unit descriptors.
//!
//! A node is one buildable layer (runtime, framework or project) in the
//! dependency graph. Declarations are what callers hand to the engine;
//! [`BuildNode`] is the graph-owned form that additionally carries the
//! computed fingerprint.
//!
//! # Submodules
//!
//! - [`matrix`] - Cartesian-product expansion of build-argument axes

pub mod matrix;
mod types;

pub use types::*;
