use log::debug;

use crate::backend::{DockerBackend, ExecutionBackend, ProcessBackend};
use crate::config::{BackendKind, EngineConfig};
use crate::engine::gate::ExecutionGate;
use crate::host_path::{absolute, HostPathResolver};
use crate::workspace::WorkspaceManager;
use crate::{Engine, SnipBoxError};

/// Build an Engine
pub struct EngineBuilder {
  config: EngineConfig,
  backend: Option<Box<dyn ExecutionBackend>>,
  resolver: Option<HostPathResolver>,
}

impl EngineBuilder {
  pub fn new(config: EngineConfig) -> Self {
    EngineBuilder {
      config,
      backend: None,
      resolver: None,
    }
  }

  /// Use a custom backend instead of the one named by the config
  pub fn backend(mut self, backend: Box<dyn ExecutionBackend>) -> Self {
    self.backend = Some(backend);
    self
  }

  /// Use a custom host path resolver
  pub fn resolver(mut self, resolver: HostPathResolver) -> Self {
    self.resolver = Some(resolver);
    self
  }

  /// Set max number of simultaneous executions
  pub fn max_concurrent(mut self, value: Option<usize>) -> Self {
    self.config.max_concurrent = value;
    self
  }

  pub fn build(self) -> Result<Engine, SnipBoxError> {
    let mut config = self.config;
    config.validate()?;
    // A relative source of `-v` would be taken as a named volume
    config.exec_root = absolute(&config.exec_root)?;

    let resolver = match self.resolver {
      Some(resolver) => resolver,
      // The process backend mounts nothing, workspaces are used in place
      None if config.backend == BackendKind::Process && self.backend.is_none() => {
        HostPathResolver::identity(&config.exec_root)?
      }
      None => HostPathResolver::new(&config.exec_root, config.host_base.clone()),
    };

    let backend = match self.backend {
      Some(backend) => backend,
      None => match config.backend {
        BackendKind::Docker => {
          Box::new(DockerBackend::new(config.runtime.clone())) as Box<dyn ExecutionBackend>
        }
        BackendKind::Process => Box::new(ProcessBackend::new().cgroup(config.cgroup.clone())),
      },
    };

    debug!(
      "Build engine with {} backend at {}",
      backend.name(),
      config.exec_root.to_string_lossy()
    );

    Ok(Engine {
      workspaces: WorkspaceManager::new(config.exec_root.clone()),
      resolver,
      backend,
      limits: config.limits,
      timeout: config.timeout,
      gate: config.max_concurrent.map(ExecutionGate::new),
    })
  }
}
