//! strata-lib: dependency-aware build engine with a fingerprint cache
//!
//! This crate provides the pieces behind the `strata` CLI:
//! - `node` / `graph`: layered build units and their base edges
//! - `fingerprint`: content hashes chained through each node's base
//! - `cache`: persistent fingerprint → artifact records
//! - `scheduler`: stage-by-stage parallel execution of stale nodes
//! - `builder`: the collaborator that actually produces artifacts
//! - `manifest`: loading node declarations from `strata.yaml`

pub mod builder;
pub mod cache;
pub mod consts;
pub mod fingerprint;
pub mod graph;
pub mod manifest;
pub mod node;
pub mod paths;
pub mod scheduler;
