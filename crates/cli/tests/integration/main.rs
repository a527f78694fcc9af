//! CLI integration tests.
//!
//! Fixture builders shell out to `/bin/sh`, so the build tests are unix-only.

mod common;

#[cfg(unix)]
mod build_tests;
#[cfg(unix)]
mod cache_tests;
mod graph_tests;
