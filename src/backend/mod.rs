use std::path::Path;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::language::LanguageSpec;
use crate::SnipBoxError;

pub use docker::DockerBackend;
pub use process::ProcessBackend;

mod cgroup;
mod docker;
mod pipe;
mod process;
mod supervise;

/// Resource ceilings applied to every isolated execution
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
  /// Memory ceiling (unit: MiB)
  pub memory_mib: u64,
  /// CPU cores
  pub cpus: f64,
  /// Max number of processes
  pub pids: u64,
  /// Captured output is cut after this many bytes
  pub output_bytes: usize,
}

/// Everything a backend needs for one run
#[derive(Debug)]
pub struct Invocation<'a> {
  pub spec: &'a LanguageSpec,
  /// Unique workspace name, usable as a container name
  pub workspace_name: &'a str,
  /// Workspace path as seen by this process
  pub workspace_path: &'a Path,
  /// Workspace path as seen by the runtime host
  pub host_path: &'a str,
  pub stdin: &'a str,
  pub limits: &'a Limits,
  pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
  /// The process exited, the exit code is informational
  Completed {
    exit_code: Option<i32>,
    signal: Option<Signal>,
  },
  /// Wall-clock timeout expired and the process tree was killed
  TimedOut,
  /// The isolation mechanism itself reported a failure
  InvocationFailed(String),
}

/// Captured result of one backend run
#[derive(Debug, Clone)]
pub struct BackendRun {
  pub output: String,
  pub outcome: BackendOutcome,
  pub truncated: bool,
}

/// An isolation technology able to run one language command in a workspace.
///
/// Implementations must enforce `invocation.timeout` themselves and must not
/// return before the isolated process is gone. `Err` is reserved for failures
/// to start the isolation mechanism at all.
pub trait ExecutionBackend: Send + Sync {
  fn name(&self) -> &str;

  fn run(&self, invocation: &Invocation) -> Result<BackendRun, SnipBoxError>;
}

impl Default for Limits {
  fn default() -> Self {
    Limits {
      memory_mib: 1024,
      cpus: 2.0,
      pids: 256,
      output_bytes: 1024 * 1024,
    }
  }
}
