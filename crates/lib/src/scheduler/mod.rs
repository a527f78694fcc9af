//! Stage-by-stage execution of a fingerprinted build graph.
//!
//! For each stage, in order:
//! 1. Nodes whose base was cancelled are cancelled; nodes whose base failed
//!    or was skipped are skipped.
//! 2. If a stop was requested, remaining nodes are cancelled.
//! 3. Fresh nodes go `Cached -> Built` without touching the builder.
//! 4. Stale nodes are submitted to a bounded worker pool.
//!
//! The next stage starts only once every node of the current one is
//! terminal, so a node never starts before its base finished.

mod types;

pub use types::*;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::builder::{BuildError, BuildRequest, Builder};
use crate::cache::BuildCache;
use crate::graph::BuildGraph;
use crate::node::{BuildNode, NodeStatus};

/// How a submitted node ended.
enum Outcome {
  /// Stop requested before the builder started.
  Cancelled,
  /// Another producer of the same fingerprint finished first.
  Reused(PathBuf),
  Built(PathBuf),
  Failed(BuildError),
}

pub struct Scheduler<B: Builder> {
  builder: Arc<B>,
  cache: Arc<BuildCache>,
  config: SchedulerConfig,
  stop: StopHandle,
  /// Current status of every node in the active or last run.
  live: Arc<Mutex<HashMap<String, NodeStatus>>>,
}

impl<B: Builder> Scheduler<B> {
  pub fn new(builder: B, cache: Arc<BuildCache>, config: SchedulerConfig) -> Self {
    Self {
      builder: Arc::new(builder),
      cache,
      config,
      stop: StopHandle::new(),
      live: Arc::default(),
    }
  }

  /// Status of `id` in the active run, or at the end of the last one.
  pub fn status(&self, id: &str) -> Option<NodeStatus> {
    self.live.lock().unwrap_or_else(|e| e.into_inner()).get(id).copied()
  }

  /// Handle for requesting a cooperative stop from another task.
  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  pub fn cache(&self) -> &BuildCache {
    &self.cache
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Compute order and freshness without building or writing anything.
  pub fn plan(&self, graph: &BuildGraph) -> Result<BuildPlan, ScheduleError> {
    let stages = graph.build_order()?;
    let forced = self.forced_nodes(graph)?;

    let mut nodes = Vec::with_capacity(graph.len());
    for (stage_idx, stage) in stages.iter().enumerate() {
      for id in stage {
        let node = require_node(graph, id)?;
        let fingerprint = node
          .fingerprint
          .clone()
          .ok_or_else(|| ScheduleError::Unfingerprinted(id.clone()))?;
        let is_forced = forced.contains(id);

        nodes.push(PlannedNode {
          id: id.clone(),
          kind: node.kind,
          stage: stage_idx,
          fingerprint,
          base: node.base.clone(),
          fresh: !is_forced && self.cache.is_fresh(node),
          forced: is_forced,
        });
      }
    }

    Ok(BuildPlan {
      stages: stages.into_iter().map(|s| s.into_iter().collect()).collect(),
      nodes,
    })
  }

  /// Build every stale node of `graph`.
  ///
  /// Only structural problems (cycles, missing fingerprints, unknown forced
  /// ids) are errors; build failures are reported per node.
  pub async fn run(&self, graph: &BuildGraph) -> Result<RunReport, ScheduleError> {
    let started = Instant::now();
    let stages = graph.build_order()?;

    let mut reports: HashMap<String, NodeReport> = HashMap::with_capacity(graph.len());
    self.live.lock().unwrap_or_else(|e| e.into_inner()).clear();
    for (stage_idx, stage) in stages.iter().enumerate() {
      for id in stage {
        let node = require_node(graph, id)?;
        if node.fingerprint.is_none() {
          return Err(ScheduleError::Unfingerprinted(id.clone()));
        }
        reports.insert(
          id.clone(),
          NodeReport::new(id, node.kind, stage_idx, node.fingerprint.clone()),
        );
        self.publish(id, NodeStatus::Pending);
      }
    }

    for id in self.forced_nodes(graph)? {
      self.cache.force_stale(require_node(graph, &id)?);
    }

    info!(
      nodes = graph.len(),
      stages = stages.len(),
      max_workers = self.config.max_workers,
      "starting build run"
    );

    let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
    let mut artifacts: HashMap<String, PathBuf> = HashMap::new();

    for (stage_idx, stage) in stages.iter().enumerate() {
      debug!(stage = stage_idx, nodes = stage.len(), "executing stage");

      let mut ready: Vec<&BuildNode> = Vec::new();
      for id in stage {
        let node = require_node(graph, id)?;
        let Some(report) = reports.get(id) else {
          continue;
        };
        if report.status.is_terminal() {
          continue;
        }

        match self.upstream_outcome(node, &reports) {
          Some(Upstream::Cancelled) => {
            self.update(&mut reports, id, |r| r.advance(NodeStatus::Cancelled));
            continue;
          }
          Some(Upstream::Failed(ancestor)) => {
            warn!(node = %id, failed_ancestor = %ancestor, "skipping node due to failed ancestor");
            self.update(&mut reports, id, |r| {
              r.advance(NodeStatus::Skipped);
              r.failed_ancestor = Some(ancestor);
            });
            continue;
          }
          None => {}
        }

        if self.stop.is_stopped() {
          self.update(&mut reports, id, |r| r.advance(NodeStatus::Cancelled));
          continue;
        }

        if self.cache.is_fresh(node)
          && let Some(record) = node.fingerprint.as_ref().and_then(|fp| self.cache.lookup(fp))
        {
          info!(node = %id, "cached");
          artifacts.insert(id.clone(), record.artifact_path.clone());
          self.update(&mut reports, id, |r| {
            r.advance(NodeStatus::Cached);
            r.advance(NodeStatus::Built);
            r.artifact = Some(record.artifact_path);
          });
          continue;
        }

        ready.push(node);
      }

      if ready.is_empty() {
        continue;
      }

      let results = self
        .execute_stage(&ready, &artifacts, Arc::clone(&semaphore), &mut reports)
        .await;

      for (id, outcome) in results {
        match outcome {
          Outcome::Cancelled => {
            self.update(&mut reports, &id, |r| r.advance(NodeStatus::Cancelled));
          }
          Outcome::Reused(path) => {
            info!(node = %id, artifact = %path.display(), "reused artifact with identical fingerprint");
            artifacts.insert(id.clone(), path.clone());
            self.update(&mut reports, &id, |r| {
              r.advance(NodeStatus::Cached);
              r.advance(NodeStatus::Built);
              r.artifact = Some(path);
            });
          }
          Outcome::Built(path) => {
            info!(node = %id, artifact = %path.display(), "built");
            artifacts.insert(id.clone(), path.clone());
            self.update(&mut reports, &id, |r| {
              r.advance(NodeStatus::Built);
              r.artifact = Some(path);
            });
          }
          Outcome::Failed(e) => {
            error!(node = %id, error = %e, "build failed");
            self.update(&mut reports, &id, |r| {
              if r.status == NodeStatus::Pending {
                r.advance(NodeStatus::Building);
              }
              r.advance(NodeStatus::Failed);
              r.error = Some(e);
            });
          }
        }
      }
    }

    let report = RunReport::new(
      reports.into_values().collect(),
      started.elapsed(),
      self.stop.is_stopped(),
    );

    info!(
      built = report.summary.built,
      cached = report.summary.cached,
      failed = report.summary.failed,
      skipped = report.summary.skipped,
      cancelled = report.summary.cancelled,
      "build run complete"
    );

    Ok(report)
  }

  /// Run one stage's stale nodes through the worker pool.
  ///
  /// Nodes move to `Building` as their worker starts the builder.
  async fn execute_stage(
    &self,
    nodes: &[&BuildNode],
    artifacts: &HashMap<String, PathBuf>,
    semaphore: Arc<Semaphore>,
    reports: &mut HashMap<String, NodeReport>,
  ) -> Vec<(String, Outcome)> {
    let mut join_set = JoinSet::new();
    let mut task_nodes = HashMap::new();
    let (started_tx, mut started_rx) = mpsc::unbounded_channel::<String>();

    for &node in nodes {
      let node = node.clone();
      let base_artifact = node.base.as_ref().and_then(|base| artifacts.get(base).cloned());
      let builder = Arc::clone(&self.builder);
      let cache = Arc::clone(&self.cache);
      let semaphore = Arc::clone(&semaphore);
      let stop = self.stop.clone();
      let timeout = self.config.timeout;
      let started = started_tx.clone();
      let id = node.id.clone();

      let handle = join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire_owned().await else {
          return (node.id, Outcome::Cancelled);
        };

        if stop.is_stopped() {
          debug!(node = %node.id, "stop requested before start");
          return (node.id, Outcome::Cancelled);
        }

        let outcome = produce(&*builder, &cache, node.clone(), base_artifact, timeout, started).await;
        (node.id, outcome)
      });
      task_nodes.insert(handle.id(), id);
    }

    drop(started_tx);

    let mut results = Vec::with_capacity(nodes.len());
    loop {
      tokio::select! {
        biased;
        Some(id) = started_rx.recv() => {
          self.update(reports, &id, |r| r.advance(NodeStatus::Building));
        }
        joined = join_set.join_next_with_id() => match joined {
          None => break,
          Some(Ok((_, result))) => results.push(result),
          Some(Err(e)) => {
            error!(error = %e, "build task panicked");
            if let Some(id) = task_nodes.remove(&e.id()) {
              results.push((id, Outcome::Failed(BuildError::Other(format!("build task panicked: {}", e)))));
            }
          }
        },
      }
    }

    results
  }

  /// The forced node ids, expanded to all transitive dependents.
  fn forced_nodes(&self, graph: &BuildGraph) -> Result<BTreeSet<String>, ScheduleError> {
    let mut forced = BTreeSet::new();
    match &self.config.force {
      ForceRebuild::None => {}
      ForceRebuild::All => forced.extend(graph.nodes().map(|n| n.id.clone())),
      ForceRebuild::Nodes(ids) => {
        for id in ids {
          forced.extend(graph.dependents(id, true)?);
          forced.insert(id.clone());
        }
      }
    }
    Ok(forced)
  }

  /// Apply `f` to the report of `id` and publish its new status.
  fn update(&self, reports: &mut HashMap<String, NodeReport>, id: &str, f: impl FnOnce(&mut NodeReport)) {
    if let Some(report) = reports.get_mut(id) {
      f(report);
      self.publish(id, report.status);
    }
  }

  fn publish(&self, id: &str, status: NodeStatus) {
    self
      .live
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(id.to_string(), status);
  }

  fn upstream_outcome(&self, node: &BuildNode, reports: &HashMap<String, NodeReport>) -> Option<Upstream> {
    let base = reports.get(node.base.as_deref()?)?;
    match base.status {
      NodeStatus::Cancelled => Some(Upstream::Cancelled),
      NodeStatus::Failed => Some(Upstream::Failed(base.id.clone())),
      NodeStatus::Skipped => Some(Upstream::Failed(
        base.failed_ancestor.clone().unwrap_or_else(|| base.id.clone()),
      )),
      _ => None,
    }
  }
}

enum Upstream {
  Cancelled,
  /// Names the ancestor that actually failed.
  Failed(String),
}

/// Produce one node's artifact under its fingerprint lock.
async fn produce<B: Builder>(
  builder: &B,
  cache: &BuildCache,
  node: BuildNode,
  base_artifact: Option<PathBuf>,
  timeout: Option<std::time::Duration>,
  started: mpsc::UnboundedSender<String>,
) -> Outcome {
  let Some(fingerprint) = node.fingerprint.clone() else {
    return Outcome::Failed(BuildError::Other(format!("node {} has no fingerprint", node.id)));
  };

  let _guard = cache.lock(&fingerprint).await;

  // Someone may have produced this fingerprint while we waited
  if cache.is_fresh(&node)
    && let Some(record) = cache.lookup(&fingerprint)
  {
    return Outcome::Reused(record.artifact_path);
  }

  info!(node = %node.id, fingerprint = %fingerprint.short(), "building");
  let _ = started.send(node.id.clone());
  let request = BuildRequest::new(node.clone(), base_artifact);

  let result = match timeout {
    Some(limit) => tokio::time::timeout(limit, builder.build(request))
      .await
      .unwrap_or(Err(BuildError::Timeout(limit))),
    None => builder.build(request).await,
  };

  match result {
    Ok(artifact) => {
      if let Err(e) = cache.record(&node, &artifact) {
        warn!(node = %node.id, error = %e, "failed to record artifact in cache");
      }
      Outcome::Built(artifact)
    }
    Err(e) => Outcome::Failed(e),
  }
}

fn require_node<'a>(graph: &'a BuildGraph, id: &str) -> Result<&'a BuildNode, ScheduleError> {
  graph
    .node(id)
    .ok_or_else(|| ScheduleError::Graph(crate::graph::GraphError::UnknownNode(id.to_string())))
}
