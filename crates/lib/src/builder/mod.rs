//! The artifact-producing collaborator.
//!
//! The engine never interprets build instructions; it hands a
//! [`BuildRequest`] to a [`Builder`] and gets an artifact path back.

mod command;

pub use command::CommandBuilder;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::node::BuildNode;

/// Everything a builder needs to produce one node's artifact.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub node: BuildNode,
  /// Artifact of the node's base, for non-root nodes.
  pub base_artifact: Option<PathBuf>,
  pub parameters: BTreeMap<String, String>,
}

impl BuildRequest {
  pub fn new(node: BuildNode, base_artifact: Option<PathBuf>) -> Self {
    let parameters = node.parameters.clone();
    Self {
      node,
      base_artifact,
      parameters,
    }
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
  #[error("failed to start `{program}`: {message}")]
  Spawn { program: String, message: String },

  #[error("build of {node} failed with {} (see {})", exit_status(.code), .log.display())]
  CommandFailed {
    node: String,
    code: Option<i32>,
    log: PathBuf,
  },

  #[error("build of {node} succeeded but produced no artifact at {}", .path.display())]
  MissingOutput { node: String, path: PathBuf },

  #[error("build timed out after {}", format_timeout(.0))]
  Timeout(Duration),

  #[error("I/O error: {0}")]
  Io(String),

  #[error("{0}")]
  Other(String),
}

fn exit_status(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {}", code),
    None => "no exit code (killed by signal)".to_string(),
  }
}

fn format_timeout(timeout: &Duration) -> String {
  humantime::format_duration(*timeout).to_string()
}

impl From<std::io::Error> for BuildError {
  fn from(e: std::io::Error) -> Self {
    BuildError::Io(e.to_string())
  }
}

impl Serialize for BuildError {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// Produces artifacts.
///
/// Invoked at most once per node per run, and only for stale nodes. The
/// returned path is recorded against the request's fingerprint, so a builder
/// must not reuse it for different content.
pub trait Builder: Send + Sync + 'static {
  fn build(&self, request: BuildRequest) -> impl Future<Output = Result<PathBuf, BuildError>> + Send;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_messages() {
    let err = BuildError::Timeout(Duration::from_secs(90));
    assert_eq!(err.to_string(), "build timed out after 1m 30s");

    let err = BuildError::CommandFailed {
      node: "mpi".into(),
      code: Some(2),
      log: PathBuf::from("logs/mpi.log"),
    };
    assert_eq!(err.to_string(), "build of mpi failed with exit code 2 (see logs/mpi.log)");

    assert_eq!(serde_json::to_value(&err).unwrap(), serde_json::json!(err.to_string()));
  }
}
