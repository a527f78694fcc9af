//! Configuration, results and errors for scheduled runs.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::warn;

use crate::builder::BuildError;
use crate::fingerprint::Fingerprint;
use crate::graph::GraphError;
use crate::node::{NodeKind, NodeStatus};

/// Which nodes to rebuild regardless of the cache.
///
/// Forcing a node also forces all of its transitive dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForceRebuild {
  #[default]
  None,
  All,
  Nodes(BTreeSet<String>),
}

impl ForceRebuild {
  /// Parse `all` or a comma-separated list of node ids.
  pub fn from_list(list: &str) -> Self {
    let list = list.trim();
    if list.is_empty() || list.eq_ignore_ascii_case("all") {
      return ForceRebuild::All;
    }
    ForceRebuild::Nodes(
      list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect(),
    )
  }
}

/// Cooperative stop request shared with a running scheduler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn new() -> Self {
    Self::default()
  }

  /// Ask the scheduler to stop. Nodes not yet started are cancelled;
  /// running builds finish normally.
  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Maximum concurrent builder invocations.
  pub max_workers: usize,
  /// Per-invocation limit; `None` waits forever.
  pub timeout: Option<Duration>,
  pub force: ForceRebuild,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      max_workers: num_cpus(),
      timeout: None,
      force: ForceRebuild::None,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error("node {0} has not been fingerprinted")]
  Unfingerprinted(String),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// What happened to one node during a run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
  pub id: String,
  pub kind: NodeKind,
  pub stage: usize,
  pub fingerprint: Option<Fingerprint>,
  pub status: NodeStatus,
  /// Every state the node passed through, starting at `Pending`.
  pub transitions: Vec<NodeStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifact: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<BuildError>,
  /// For skipped nodes, the ancestor whose failure caused the skip.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failed_ancestor: Option<String>,
}

impl NodeReport {
  pub(crate) fn new(id: &str, kind: NodeKind, stage: usize, fingerprint: Option<Fingerprint>) -> Self {
    Self {
      id: id.to_string(),
      kind,
      stage,
      fingerprint,
      status: NodeStatus::Pending,
      transitions: vec![NodeStatus::Pending],
      artifact: None,
      error: None,
      failed_ancestor: None,
    }
  }

  /// Move to `next`, ignoring illegal transitions.
  pub(crate) fn advance(&mut self, next: NodeStatus) {
    if !self.status.can_transition_to(next) {
      warn!(node = %self.id, from = %self.status, to = %next, "ignoring illegal state transition");
      return;
    }
    self.status = next;
    self.transitions.push(next);
  }

  /// Whether the node was satisfied from the cache.
  pub fn was_cached(&self) -> bool {
    self.transitions.contains(&NodeStatus::Cached)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  /// Built by invoking the builder.
  pub built: usize,
  pub cached: usize,
  pub failed: usize,
  pub skipped: usize,
  pub cancelled: usize,
}

impl RunSummary {
  pub fn total(&self) -> usize {
    self.built + self.cached + self.failed + self.skipped + self.cancelled
  }
}

/// Result of [`super::Scheduler::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  /// Nodes in stage order, then by id.
  pub nodes: Vec<NodeReport>,
  pub summary: RunSummary,
  #[serde(serialize_with = "serialize_secs")]
  pub duration: Duration,
  /// Whether a stop was requested during the run.
  pub stopped: bool,
}

impl RunReport {
  pub(crate) fn new(mut nodes: Vec<NodeReport>, duration: Duration, stopped: bool) -> Self {
    nodes.sort_by(|a, b| (a.stage, &a.id).cmp(&(b.stage, &b.id)));

    let mut summary = RunSummary::default();
    for node in &nodes {
      match node.status {
        NodeStatus::Built if node.was_cached() => summary.cached += 1,
        NodeStatus::Built => summary.built += 1,
        NodeStatus::Failed => summary.failed += 1,
        NodeStatus::Skipped => summary.skipped += 1,
        NodeStatus::Cancelled => summary.cancelled += 1,
        _ => {}
      }
    }

    Self {
      nodes,
      summary,
      duration,
      stopped,
    }
  }

  pub fn node(&self, id: &str) -> Option<&NodeReport> {
    self.nodes.iter().find(|n| n.id == id)
  }

  /// True if every node ended Built.
  pub fn is_success(&self) -> bool {
    self.summary.failed == 0 && self.summary.skipped == 0 && self.summary.cancelled == 0
  }

  pub fn has_failures(&self) -> bool {
    self.summary.failed > 0
  }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_f64(duration.as_secs_f64())
}

/// One node in a dry-run plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedNode {
  pub id: String,
  pub kind: NodeKind,
  pub stage: usize,
  pub fingerprint: Fingerprint,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub base: Option<String>,
  pub fresh: bool,
  pub forced: bool,
}

/// Result of [`super::Scheduler::plan`].
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
  pub stages: Vec<Vec<String>>,
  /// Nodes in stage order, then by id.
  pub nodes: Vec<PlannedNode>,
}

impl BuildPlan {
  pub fn to_build(&self) -> impl Iterator<Item = &PlannedNode> {
    self.nodes.iter().filter(|n| !n.fresh)
  }

  pub fn cached(&self) -> impl Iterator<Item = &PlannedNode> {
    self.nodes.iter().filter(|n| n.fresh)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn force_rebuild_parsing() {
    assert_eq!(ForceRebuild::from_list("all"), ForceRebuild::All);
    assert_eq!(ForceRebuild::from_list(""), ForceRebuild::All);
    assert_eq!(
      ForceRebuild::from_list("framework, project1,"),
      ForceRebuild::Nodes(["framework".to_string(), "project1".to_string()].into())
    );
  }

  #[test]
  fn stop_handle_is_shared() {
    let handle = StopHandle::new();
    let clone = handle.clone();
    assert!(!handle.is_stopped());
    clone.stop();
    assert!(handle.is_stopped());
  }

  #[test]
  fn report_transitions_and_counts() {
    let mut cached = NodeReport::new("a", NodeKind::Runtime, 0, None);
    cached.advance(NodeStatus::Cached);
    cached.advance(NodeStatus::Built);

    let mut built = NodeReport::new("b", NodeKind::Framework, 1, None);
    built.advance(NodeStatus::Building);
    built.advance(NodeStatus::Built);

    let mut failed = NodeReport::new("c", NodeKind::Framework, 1, None);
    failed.advance(NodeStatus::Building);
    failed.advance(NodeStatus::Failed);
    // Terminal: ignored
    failed.advance(NodeStatus::Built);

    let mut skipped = NodeReport::new("d", NodeKind::Project, 2, None);
    skipped.advance(NodeStatus::Skipped);

    let report = RunReport::new(vec![skipped, failed, built, cached], Duration::from_millis(5), false);
    assert_eq!(
      report.summary,
      RunSummary {
        built: 1,
        cached: 1,
        failed: 1,
        skipped: 1,
        cancelled: 0
      }
    );
    assert_eq!(report.summary.total(), 4);
    assert!(report.has_failures());
    assert!(!report.is_success());

    let order: Vec<_> = report.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c", "d"]);
    assert_eq!(
      report.node("c").unwrap().transitions,
      vec![NodeStatus::Pending, NodeStatus::Building, NodeStatus::Failed]
    );
  }
}
