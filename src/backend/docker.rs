use std::process::{Command, Stdio};

use log::{debug, error, info, warn};
use nix::unistd::{getgid, getuid};

use crate::backend::supervise::{supervise, Exit, Teardown};
use crate::backend::{BackendOutcome, BackendRun, ExecutionBackend, Invocation};
use crate::SnipBoxError;

/// Mount point of the workspace inside the container
pub const CONTAINER_WORKDIR: &str = "/app";

/// `docker run` reports its own failures (daemon, image, flags) with this code
const DOCKER_ERROR_EXIT: i32 = 125;

/// Environment the runtime CLI needs to reach its daemon, nothing else is forwarded
const FORWARDED_ENV: [&str; 9] = [
  "PATH",
  "HOME",
  "DOCKER_HOST",
  "DOCKER_CONFIG",
  "DOCKER_CONTEXT",
  "DOCKER_CERT_PATH",
  "DOCKER_TLS_VERIFY",
  "XDG_RUNTIME_DIR",
  "CONTAINER_HOST",
];

/// Runs snippets with a container runtime CLI (`docker` or a compatible one)
#[derive(Debug, Clone)]
pub struct DockerBackend {
  program: String,
  user: Option<String>,
}

struct RemoveContainer<'a> {
  backend: &'a DockerBackend,
  name: &'a str,
}

impl DockerBackend {
  /// The container runs as the engine's uid and gid, so whatever the snippet
  /// writes into the workspace stays removable by the engine
  pub fn new<PS: Into<String>>(program: PS) -> Self {
    DockerBackend {
      program: program.into(),
      user: Some(format!("{}:{}", getuid(), getgid())),
    }
  }

  /// Override the `--user` of the container, `None` keeps the image's user
  pub fn user(mut self, user: Option<String>) -> Self {
    self.user = user;
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn container_user(&self) -> Option<&str> {
    self.user.as_deref()
  }

  /// Arguments of the `run` invocation, without the program itself
  pub fn arguments(&self, invocation: &Invocation) -> Vec<String> {
    let limits = invocation.limits;
    let memory = format!("{}m", limits.memory_mib);
    let mut args = vec![
      "run".to_string(),
      "--rm".to_string(),
      "-i".to_string(),
      "--name".to_string(),
      invocation.workspace_name.to_string(),
      "-v".to_string(),
      format!("{}:{}", invocation.host_path, CONTAINER_WORKDIR),
      "--workdir".to_string(),
      CONTAINER_WORKDIR.to_string(),
    ];
    if let Some(user) = &self.user {
      // Build caches go to $HOME, which must be writable by that user
      args.extend([
        "--user".to_string(),
        user.clone(),
        "-e".to_string(),
        format!("HOME={}", CONTAINER_WORKDIR),
      ]);
    }
    args.extend([
      "--network=none".to_string(),
      "--memory".to_string(),
      memory.clone(),
      // Same as --memory, so the ceiling can not be dodged through swap
      "--memory-swap".to_string(),
      memory,
      "--cpus".to_string(),
      format!("{:.2}", limits.cpus),
      "--pids-limit".to_string(),
      limits.pids.to_string(),
      invocation.spec.image_ref().to_string(),
    ]);
    args.extend(invocation.spec.build_and_run_command().iter().cloned());
    args
  }

  /// Force removal of the named container, it keeps running after its CLI is killed
  fn remove_container(&self, name: &str) {
    let status = Command::new(&self.program)
      .args(["rm", "--force", name])
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status();
    match status {
      Ok(status) if status.success() => info!("Remove container {}", name),
      Ok(status) => debug!("Remove container {} exited with {}", name, status),
      Err(err) => error!("Remove container {} fails: {}", name, err),
    }
  }
}

impl Teardown for RemoveContainer<'_> {
  fn timed_out(&self) {
    self.backend.remove_container(self.name);
  }
}

impl Default for DockerBackend {
  fn default() -> Self {
    DockerBackend::new("docker")
  }
}

impl ExecutionBackend for DockerBackend {
  fn name(&self) -> &str {
    "docker"
  }

  fn run(&self, invocation: &Invocation) -> Result<BackendRun, SnipBoxError> {
    let args = self.arguments(invocation);
    info!("Start running {} {}", self.program, args.join(" "));

    let mut command = Command::new(&self.program);
    command.args(&args).env_clear();
    for key in FORWARDED_ENV {
      if let Ok(value) = std::env::var(key) {
        command.env(key, value);
      }
    }

    let name = invocation.workspace_name;
    let (output, exit, truncated) = supervise(
      command,
      invocation.stdin,
      invocation.limits,
      invocation.timeout,
      &RemoveContainer {
        backend: self,
        name,
      },
    )?;

    let outcome = match exit {
      Exit::Exited(DOCKER_ERROR_EXIT) => {
        warn!("Container runtime fails for {}: {}", name, output.trim_end());
        BackendOutcome::InvocationFailed(format!(
          "{} run exited with status {}",
          self.program, DOCKER_ERROR_EXIT
        ))
      }
      exit => exit.into_outcome(),
    };

    Ok(BackendRun::new(output, outcome, truncated))
  }
}
