//! Cache subcommand integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn list_shows_records_after_build() {
  let env = TestEnv::from_fixture("layered.yaml");
  env.strata_cmd().arg("build").assert().success();

  env
    .strata_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("framework"))
    .stdout(predicate::str::contains("built"));
}

#[test]
fn list_on_empty_cache() {
  let env = TestEnv::from_fixture("layered.yaml");

  env
    .strata_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No cache records"));
}

#[test]
fn stats_counts_records() {
  let env = TestEnv::from_fixture("layered.yaml");
  env.strata_cmd().arg("build").assert().success();

  env
    .strata_cmd()
    .args(["-o", "json", "cache", "stats"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"records\": 4"))
    .stdout(predicate::str::contains("\"dangling\": 0"));
}

#[test]
fn prune_removes_dangling_records() {
  let env = TestEnv::from_fixture("layered.yaml");
  env.strata_cmd().arg("build").assert().success();
  std::fs::remove_file(env.artifact_path("project", "project2", "img")).unwrap();

  env
    .strata_cmd()
    .args(["cache", "prune", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"))
    .stdout(predicate::str::contains("Records removed: 0"));

  env
    .strata_cmd()
    .args(["cache", "prune"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Records removed: 1"))
    .stdout(predicate::str::contains("Records kept: 3"));

  // The missing artifact is rebuilt, the rest stays cached
  env
    .strata_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 1"))
    .stdout(predicate::str::contains("Cached: 3"));
}

#[test]
fn cache_dir_flag_works_without_manifest() {
  let env = TestEnv::empty();

  env
    .strata_cmd()
    .args(["cache", "stats", "--cache-dir"])
    .arg(env.temp.path().join("somewhere"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Records: 0"));
}
