//! Graph command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn text_lists_stages() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .arg("graph")
    .assert()
    .success()
    .stdout(predicate::str::contains("Stage 0: [mpi]\nStage 1: [framework]\nStage 2: [project1, project2]"));
}

#[test]
fn graph_only_prints_stages() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["build", "--graph-only"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Stage 1: [framework]"));

  assert!(!env.cache_path().exists());
}

#[test]
fn dot_and_mermaid_formats() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["graph", "--format", "dot"])
    .assert()
    .success()
    .stdout(predicate::str::contains("digraph strata {"))
    .stdout(predicate::str::contains("\"framework\" -> \"project1\";"));

  env
    .strata_cmd()
    .args(["graph", "--format", "mermaid"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("graph TD"));
}

#[test]
fn json_export_has_nodes_edges_and_stages() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["-o", "json", "graph"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"nodes\""))
    .stdout(predicate::str::contains("\"edges\""))
    .stdout(predicate::str::contains("\"stages\""))
    .stdout(predicate::str::contains("\"fingerprint\""));
}

#[test]
fn graph_written_to_file() {
  let env = TestEnv::from_fixture("layered.yaml");
  let out = env.temp.path().join("graph.dot");

  env
    .strata_cmd()
    .args(["graph", "--format", "dot", "--write"])
    .arg(&out)
    .assert()
    .success()
    .stdout(predicate::str::contains("Wrote 4 node(s)"));

  assert!(std::fs::read_to_string(out).unwrap().contains("digraph"));
}

#[test]
fn cycle_is_rejected() {
  let env = TestEnv::from_fixture("cycle.yaml");

  env
    .strata_cmd()
    .arg("graph")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cycle detected"));
}

#[test]
fn missing_manifest_fails() {
  let env = TestEnv::empty();

  env
    .strata_cmd()
    .arg("graph")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load manifest"));
}
