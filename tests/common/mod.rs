#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use flexi_logger::Logger;

use snipj::{
  BackendOutcome, BackendRun, Engine, EngineConfig, ExecutionBackend, HostPathResolver, Invocation,
  SnipBoxError,
};

static INIT: Once = Once::new();

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("snipj=debug,info")
      .unwrap()
      .start()
      .map(std::mem::forget)
      .unwrap();
  });
}

pub const HOST_BASE: &str = "/srv/project/code-exec";

#[derive(Debug, Clone, Copy)]
pub enum Mode {
  /// Print the source file followed by stdin
  Echo,
  /// Print a partial line, then run into the timeout
  Hang,
  /// The isolation mechanism can not start
  Unavailable,
  /// The runtime starts but reports its own failure
  Refuse,
  Panic,
}

/// What the fake saw while the workspace was alive
#[derive(Debug, Clone)]
pub struct Observed {
  pub workspace_name: String,
  pub workspace_path: PathBuf,
  pub host_path: String,
  pub source: Option<String>,
  pub stdin: String,
}

#[derive(Clone)]
pub struct FakeBackend {
  mode: Mode,
  delay: Duration,
  observed: Arc<Mutex<Vec<Observed>>>,
}

impl FakeBackend {
  pub fn new(mode: Mode) -> Self {
    FakeBackend {
      mode,
      delay: Duration::ZERO,
      observed: Arc::new(Mutex::new(vec![])),
    }
  }

  pub fn delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn observed(&self) -> Vec<Observed> {
    self.observed.lock().unwrap().clone()
  }
}

impl ExecutionBackend for FakeBackend {
  fn name(&self) -> &str {
    "fake"
  }

  fn run(&self, invocation: &Invocation) -> Result<BackendRun, SnipBoxError> {
    let source = fs::read_to_string(
      invocation
        .workspace_path
        .join(invocation.spec.source_filename()),
    )
    .ok();
    self.observed.lock().unwrap().push(Observed {
      workspace_name: invocation.workspace_name.to_string(),
      workspace_path: invocation.workspace_path.to_path_buf(),
      host_path: invocation.host_path.to_string(),
      source: source.clone(),
      stdin: invocation.stdin.to_string(),
    });

    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }

    match self.mode {
      Mode::Echo => Ok(BackendRun {
        output: format!("{}{}", source.unwrap_or_default(), invocation.stdin),
        outcome: BackendOutcome::Completed {
          exit_code: Some(0),
          signal: None,
        },
        truncated: false,
      }),
      Mode::Hang => {
        thread::sleep(invocation.timeout);
        Ok(BackendRun {
          output: "partial\n".to_string(),
          outcome: BackendOutcome::TimedOut,
          truncated: false,
        })
      }
      Mode::Unavailable => Err(SnipBoxError::backend("container runtime is not available")),
      Mode::Refuse => Ok(BackendRun {
        output: "Unable to find image 'python:3.10-alpine' locally\n".to_string(),
        outcome: BackendOutcome::InvocationFailed("docker run exited with status 125".to_string()),
        truncated: false,
      }),
      Mode::Panic => panic!("fake backend panics"),
    }
  }
}

pub fn config(root: &Path) -> EngineConfig {
  let mut config = EngineConfig::default();
  config.exec_root = root.to_path_buf();
  config.host_base = Some(HOST_BASE.to_string());
  config.timeout = Duration::from_millis(300);
  config
}

pub fn engine(root: &Path, backend: FakeBackend) -> Engine {
  Engine::builder(config(root))
    .backend(Box::new(backend))
    .build()
    .unwrap()
}

pub fn engine_without_host_base(root: &Path, backend: FakeBackend) -> Engine {
  let mut config = config(root);
  config.host_base = None;
  Engine::builder(config)
    .backend(Box::new(backend))
    .resolver(HostPathResolver::new(root, None))
    .build()
    .unwrap()
}

pub fn entries(root: &Path) -> Vec<PathBuf> {
  match fs::read_dir(root) {
    Ok(dir) => dir.map(|entry| entry.unwrap().path()).collect(),
    Err(_) => vec![],
  }
}
