//! Build command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, find_artifacts};

#[test]
fn cold_build_builds_every_node() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Build complete"))
    .stdout(predicate::str::contains("Built: 4"))
    .stdout(predicate::str::contains("Cached: 0"));

  let artifact = env.artifact_path("framework", "framework", "img");
  assert_eq!(std::fs::read_to_string(artifact).unwrap(), "Bootstrap: framework\n");
  assert!(env.temp.path().join("artifacts/logs/framework.log").exists());
}

#[test]
fn warm_build_uses_cache() {
  let env = TestEnv::from_fixture("layered.yaml");

  env.strata_cmd().arg("build").assert().success();
  env
    .strata_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 0"))
    .stdout(predicate::str::contains("Cached: 4"));
}

#[test]
fn changed_definition_rebuilds_descendants_only() {
  let env = TestEnv::from_fixture("layered.yaml");

  env.strata_cmd().arg("build").assert().success();
  env.write_file("defs/framework.def", "Bootstrap: framework v2\n");

  env
    .strata_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 3"))
    .stdout(predicate::str::contains("Cached: 1"));
}

#[test]
fn reverted_definition_is_cached_with_its_own_artifact() {
  let env = TestEnv::from_fixture("layered.yaml");

  env.strata_cmd().arg("build").assert().success();
  env.write_file("defs/framework.def", "Bootstrap: framework v2\n");
  env.strata_cmd().arg("build").assert().success();
  env.write_file("defs/framework.def", "Bootstrap: framework\n");

  env
    .strata_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 0"))
    .stdout(predicate::str::contains("Cached: 4"));

  let framework = env.artifacts("framework", "framework", "img");
  assert_eq!(framework.len(), 2);
  let contents: Vec<String> = framework
    .iter()
    .map(|path| std::fs::read_to_string(path).unwrap())
    .collect();
  assert!(contents.contains(&"Bootstrap: framework\n".to_string()));
  assert!(contents.contains(&"Bootstrap: framework v2\n".to_string()));
}

#[test]
fn force_rebuild_cascades_to_dependents() {
  let env = TestEnv::from_fixture("layered.yaml");

  env.strata_cmd().arg("build").assert().success();
  env
    .strata_cmd()
    .args(["build", "--force-rebuild", "framework"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 3"))
    .stdout(predicate::str::contains("Cached: 1"));
}

#[test]
fn no_cache_rebuilds_everything() {
  let env = TestEnv::from_fixture("layered.yaml");

  env.strata_cmd().arg("build").assert().success();
  env
    .strata_cmd()
    .args(["build", "--no-cache", "--sequential"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 4"));
}

#[test]
fn force_rebuild_of_unknown_node_fails() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["build", "--force-rebuild", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown node: nope"));
}

#[test]
fn failure_skips_descendants_and_exits_nonzero() {
  let env = TestEnv::from_fixture("failing.yaml");

  env
    .strata_cmd()
    .arg("build")
    .assert()
    .code(1)
    .stdout(predicate::str::contains("Built: 1"))
    .stdout(predicate::str::contains("Failed: 1"))
    .stdout(predicate::str::contains("Skipped: 2"))
    .stdout(predicate::str::contains("skipped (framework failed)"));

  let log = std::fs::read_to_string(env.temp.path().join("artifacts/logs/framework.log")).unwrap();
  assert!(log.contains("boom"));
}

#[test]
fn dry_run_builds_nothing() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["build", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Stage 0: [mpi]"))
    .stdout(predicate::str::contains("Stage 2: [project1, project2]"))
    .stdout(predicate::str::contains("To build: 4"));

  assert!(env.artifacts("runtime", "mpi", "img").is_empty());
  assert!(!env.cache_path().join("records").exists());
}

#[test]
fn plan_reflects_cache_state() {
  let env = TestEnv::from_fixture("layered.yaml");

  env.strata_cmd().arg("build").assert().success();
  env
    .strata_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("To build: 0"))
    .stdout(predicate::str::contains("Cached: 4"));

  env
    .strata_cmd()
    .args(["plan", "--force-rebuild", "mpi"])
    .assert()
    .success()
    .stdout(predicate::str::contains("forced"))
    .stdout(predicate::str::contains("To build: 4"));
}

#[test]
fn json_report_has_summary() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["-o", "json", "build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"summary\""))
    .stdout(predicate::str::contains("\"built\": 4"))
    .stdout(predicate::str::contains("\"transitions\""));
}

#[test]
fn matrix_nodes_are_built() {
  let env = TestEnv::from_fixture("matrix.yaml");

  env
    .strata_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("test-dev-release"))
    .stdout(predicate::str::contains("Built: 5"));

  assert_eq!(env.artifacts("project", "test-master-debug", "sif").len(), 1);
}

#[test]
fn cli_dirs_override_manifest() {
  let env = TestEnv::from_fixture("layered.yaml");
  let cache = env.temp.path().join("other-cache");
  let artifacts = env.temp.path().join("other-artifacts");

  env
    .strata_cmd()
    .arg("build")
    .arg("--cache-dir")
    .arg(&cache)
    .arg("--artifact-dir")
    .arg(&artifacts)
    .assert()
    .success();

  assert!(cache.join("records").is_dir());
  assert_eq!(find_artifacts(&artifacts, "runtime", "mpi", "img").len(), 1);
  assert!(!env.cache_path().join("records").exists());
}
