use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};

use crate::backend::Limits;
use crate::utils::parse_env;
use crate::SnipBoxError;

pub const DEFAULT_EXEC_ROOT: &str = "/code-exec";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

pub const DEFAULT_CGROUP: &str = "snipj";

/// Isolation technology used when no custom backend is supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
  Docker,
  Process,
}

/// Engine configuration, handed to the engine explicitly
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Execution root as seen by this process
  pub exec_root: PathBuf,
  /// Where the execution root is visible to the host performing the bind mount
  pub host_base: Option<String>,
  pub limits: Limits,
  /// Wall-clock timeout of one execution
  pub timeout: Duration,
  /// Max number of simultaneous executions, unbounded if `None`
  pub max_concurrent: Option<usize>,
  /// Container runtime program
  pub runtime: String,
  pub backend: BackendKind,
  /// Parent cgroup of process backend runs
  pub cgroup: String,
}

/// Positive and representable timeout, `None` otherwise
pub fn timeout_from_secs(seconds: f64) -> Option<Duration> {
  if seconds > 0.0 {
    Duration::try_from_secs_f64(seconds).ok()
  } else {
    None
  }
}

impl FromStr for BackendKind {
  type Err = SnipBoxError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    match text.to_ascii_lowercase().as_str() {
      "docker" | "container" => Ok(BackendKind::Docker),
      "process" | "local" => Ok(BackendKind::Process),
      _ => Err(SnipBoxError::configuration(format!(
        "unknown backend {:?}, expected docker or process",
        text
      ))),
    }
  }
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      exec_root: PathBuf::from(DEFAULT_EXEC_ROOT),
      host_base: None,
      limits: Limits::default(),
      timeout: DEFAULT_TIMEOUT,
      max_concurrent: None,
      runtime: "docker".to_string(),
      backend: BackendKind::Docker,
      cgroup: DEFAULT_CGROUP.to_string(),
    }
  }
}

impl EngineConfig {
  /// Load from `SNIPJ_*` environment variables on top of the defaults.
  ///
  /// A missing host base is not an error here, every execution reports it instead.
  pub fn from_env() -> Result<Self, SnipBoxError> {
    let mut config = EngineConfig::default();

    if let Some(root) = parse_env::<PathBuf>("SNIPJ_EXEC_ROOT")? {
      config.exec_root = root;
    }

    config.host_base = match parse_env::<String>("SNIPJ_HOST_EXEC_ROOT")? {
      Some(base) => Some(base),
      None => env::var("HOST_PROJECT_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map(|path| format!("{}/code-exec", path.trim_end_matches(['/', '\\']))),
    };
    if config.host_base.is_none() {
      warn!("Host base path of the execution root is not configured");
    }

    if let Some(seconds) = parse_env::<f64>("SNIPJ_TIMEOUT")? {
      config.timeout = timeout_from_secs(seconds)
        .ok_or_else(|| SnipBoxError::configuration(format!("SNIPJ_TIMEOUT {} is out of range", seconds)))?;
    }
    if let Some(memory) = parse_env::<u64>("SNIPJ_MEMORY")? {
      config.limits.memory_mib = memory;
    }
    if let Some(cpus) = parse_env::<f64>("SNIPJ_CPUS")? {
      config.limits.cpus = cpus;
    }
    if let Some(pids) = parse_env::<u64>("SNIPJ_PIDS")? {
      config.limits.pids = pids;
    }
    if let Some(bytes) = parse_env::<usize>("SNIPJ_OUTPUT_LIMIT")? {
      config.limits.output_bytes = bytes;
    }
    config.max_concurrent = parse_env::<usize>("SNIPJ_MAX_CONCURRENT")?;
    if let Some(runtime) = parse_env::<String>("SNIPJ_RUNTIME")? {
      config.runtime = runtime;
    }
    if let Some(backend) = parse_env::<String>("SNIPJ_BACKEND")? {
      config.backend = backend.parse()?;
    }
    if let Some(cgroup) = parse_env::<String>("SNIPJ_CGROUP")? {
      config.cgroup = cgroup;
    }

    config.validate()?;
    debug!("Load engine config {:?}", config);
    Ok(config)
  }

  /// Reject limits that would make every execution fail
  pub fn validate(&self) -> Result<(), SnipBoxError> {
    if self.limits.memory_mib < 6 {
      return Err(SnipBoxError::configuration(
        "memory limit should be at least 6 MiB",
      ));
    }
    if !(self.limits.cpus.is_finite() && self.limits.cpus > 0.0) {
      return Err(SnipBoxError::configuration("cpu limit should be positive"));
    }
    if self.limits.pids == 0 {
      return Err(SnipBoxError::configuration("pids limit should be positive"));
    }
    if self.timeout.is_zero() {
      return Err(SnipBoxError::configuration("timeout should be positive"));
    }
    if self.cgroup.trim_matches('/').is_empty() || self.cgroup.split('/').any(|part| part == "..") {
      return Err(SnipBoxError::configuration(format!(
        "cgroup {:?} should be a relative cgroup name",
        self.cgroup
      )));
    }
    if self.max_concurrent == Some(0) {
      return Err(SnipBoxError::configuration(
        "max concurrent executions should be positive",
      ));
    }
    Ok(())
  }
}
