//! A [`Builder`] that runs an external build program per node.
//!
//! Arguments may contain placeholders, expanded per node:
//!
//! | Placeholder     | Value                                   |
//! |-----------------|-----------------------------------------|
//! | `{id}`          | node id                                 |
//! | `{kind}`        | `runtime`, `framework` or `project`     |
//! | `{output}`      | artifact path to produce                |
//! | `{definition}`  | definition path                         |
//! | `{base}`        | base artifact path (empty for roots)    |
//! | `{fingerprint}` | node fingerprint                        |
//!
//! An argument that is exactly `{build_args}` expands to one
//! `--build-arg KEY=VALUE` pair per parameter, plus `BASE_CONTAINER=<base>`
//! for non-root nodes. The same values are exported as `STRATA_*`
//! environment variables.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::{BuildError, BuildRequest, Builder};

const BUILD_ARGS_TOKEN: &str = "{build_args}";
const DEFAULT_EXTENSION: &str = "sif";
const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct CommandBuilder {
  program: String,
  args: Vec<String>,
  artifact_dir: PathBuf,
  extension: String,
  working_dir: Option<PathBuf>,
}

impl CommandBuilder {
  pub fn new(program: impl Into<String>, args: Vec<String>, artifact_dir: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args,
      artifact_dir: artifact_dir.into(),
      extension: DEFAULT_EXTENSION.to_string(),
      working_dir: None,
    }
  }

  /// `apptainer build --force {build_args} {output} {definition}`
  pub fn apptainer(artifact_dir: impl Into<PathBuf>) -> Self {
    Self::new("apptainer", Self::default_args(), artifact_dir)
  }

  /// Default argument template for `apptainer build`.
  pub fn default_args() -> Vec<String> {
    ["build", "--force", BUILD_ARGS_TOKEN, "{output}", "{definition}"]
      .into_iter()
      .map(String::from)
      .collect()
  }

  pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
    self.extension = extension.into();
    self
  }

  pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  pub fn artifact_dir(&self) -> &Path {
    &self.artifact_dir
  }

  /// `<artifact_dir>/<kind>/<id>-<short fingerprint>.<extension>`
  ///
  /// Each fingerprint gets its own file, so rebuilding a node never
  /// overwrites an artifact that an older cache record still names.
  pub fn output_path(&self, request: &BuildRequest) -> PathBuf {
    let node = &request.node;
    let name = match &node.fingerprint {
      Some(fingerprint) => format!("{}-{}.{}", node.id, fingerprint.short(), self.extension),
      None => format!("{}.{}", node.id, self.extension),
    };
    self.artifact_dir.join(node.kind.as_str()).join(name)
  }

  pub fn log_path(&self, request: &BuildRequest) -> PathBuf {
    self.artifact_dir.join(LOGS_DIR).join(format!("{}.log", request.node.id))
  }

  /// Expand placeholders in the configured arguments.
  pub fn expand_args(&self, request: &BuildRequest, output: &Path) -> Vec<String> {
    let vars = placeholder_values(request, output);
    let mut expanded = Vec::with_capacity(self.args.len());

    for arg in &self.args {
      if arg == BUILD_ARGS_TOKEN {
        for (key, value) in build_args(request) {
          expanded.push("--build-arg".to_string());
          expanded.push(format!("{}={}", key, value));
        }
        continue;
      }

      let mut value = arg.clone();
      for (name, replacement) in &vars {
        value = value.replace(&format!("{{{}}}", name), replacement);
      }
      expanded.push(value);
    }

    expanded
  }
}

fn placeholder_values(request: &BuildRequest, output: &Path) -> Vec<(&'static str, String)> {
  let node = &request.node;
  vec![
    ("id", node.id.clone()),
    ("kind", node.kind.as_str().to_string()),
    ("output", output.display().to_string()),
    ("definition", node.definition.display().to_string()),
    (
      "base",
      request
        .base_artifact
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default(),
    ),
    (
      "fingerprint",
      node.fingerprint.as_ref().map(ToString::to_string).unwrap_or_default(),
    ),
  ]
}

fn build_args(request: &BuildRequest) -> Vec<(String, String)> {
  let mut args: Vec<(String, String)> = request
    .parameters
    .iter()
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect();
  if let Some(base) = &request.base_artifact {
    args.push(("BASE_CONTAINER".to_string(), base.display().to_string()));
  }
  args
}

impl Builder for CommandBuilder {
  async fn build(&self, request: BuildRequest) -> Result<PathBuf, BuildError> {
    let node_id = request.node.id.clone();
    let output = self.output_path(&request);
    let log_path = self.log_path(&request);
    let args = self.expand_args(&request, &output);

    if let Some(parent) = output.parent() {
      fs::create_dir_all(parent)?;
    }
    if let Some(parent) = log_path.parent() {
      fs::create_dir_all(parent)?;
    }

    // A leftover artifact must not mask a build that writes nothing
    match fs::remove_file(&output) {
      Ok(()) => debug!(node = %node_id, path = %output.display(), "removed previous artifact"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    let log = File::create(&log_path)?;
    let log_err = log.try_clone()?;

    let mut command = Command::new(&self.program);
    command
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::from(log))
      .stderr(Stdio::from(log_err))
      .kill_on_drop(true)
      .env("STRATA_NODE_ID", &node_id)
      .env("STRATA_KIND", request.node.kind.as_str())
      .env("STRATA_OUTPUT", &output)
      .env("STRATA_DEFINITION", &request.node.definition)
      .env(
        "STRATA_BASE",
        request.base_artifact.as_deref().unwrap_or_else(|| Path::new("")),
      );

    if let Some(fingerprint) = &request.node.fingerprint {
      command.env("STRATA_FINGERPRINT", fingerprint.as_str());
    }
    if let Some(dir) = &self.working_dir {
      command.current_dir(dir);
    }

    info!(node = %node_id, program = %self.program, log = %log_path.display(), "running build command");
    debug!(node = %node_id, args = ?args, "build command arguments");

    let status = command.status().await.map_err(|e| BuildError::Spawn {
      program: self.program.clone(),
      message: e.to_string(),
    })?;

    if !status.success() {
      return Err(BuildError::CommandFailed {
        node: node_id,
        code: status.code(),
        log: log_path,
      });
    }

    if !output.exists() {
      return Err(BuildError::MissingOutput {
        node: node_id,
        path: output,
      });
    }

    Ok(output)
  }
}
