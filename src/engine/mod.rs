use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use nix::libc::STDERR_FILENO;
use nix::unistd::isatty;

use crate::backend::{BackendOutcome, BackendRun, ExecutionBackend, Invocation, Limits};
use crate::host_path::HostPathResolver;
use crate::language::{self, LanguageSpec};
use crate::workspace::{Workspace, WorkspaceManager};
use crate::{ErrorKind, SnipBoxError};

pub use builder::EngineBuilder;

mod builder;
mod gate;

/// One snippet to run, supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
  pub language: String,
  pub code: String,
  pub stdin: String,
}

/// Outcome of one execution, always produced, never persisted
#[derive(Debug, Clone)]
pub struct ExecutionResult {
  output: String,
  error: Option<ErrorKind>,
  message: Option<String>,
  duration: Duration,
  truncated: bool,
}

/// Runs snippets: resolves the language, owns a workspace for the duration of
/// the run and hands it to the configured backend
pub struct Engine {
  workspaces: WorkspaceManager,
  resolver: HostPathResolver,
  backend: Box<dyn ExecutionBackend>,
  limits: Limits,
  timeout: Duration,
  gate: Option<gate::ExecutionGate>,
}

impl ExecutionRequest {
  pub fn new<LS: Into<String>, CS: Into<String>, IS: Into<String>>(
    language: LS,
    code: CS,
    stdin: IS,
  ) -> Self {
    ExecutionRequest {
      language: language.into(),
      code: code.into(),
      stdin: stdin.into(),
    }
  }
}

impl Engine {
  pub fn builder(config: crate::EngineConfig) -> EngineBuilder {
    EngineBuilder::new(config)
  }

  /// Build an engine with the backend named by the config
  pub fn from_config(config: crate::EngineConfig) -> Result<Self, SnipBoxError> {
    EngineBuilder::new(config).build()
  }

  pub fn backend_name(&self) -> &str {
    self.backend.name()
  }

  pub fn exec_root(&self) -> &std::path::Path {
    self.workspaces.root()
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn limits(&self) -> &Limits {
    &self.limits
  }

  /// Run one snippet and report what it printed
  pub fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
    let start = Instant::now();
    info!(
      "Start executing {} snippet ({} bytes, {} bytes of stdin)",
      request.language,
      request.code.len(),
      request.stdin.len()
    );

    let result = match self.try_execute(request) {
      Ok(run) => ExecutionResult::from_run(run, self.timeout, start.elapsed()),
      Err(err) => {
        match err.kind() {
          Some(ErrorKind::BackendInvocationFailure) => error!("{}", err),
          _ => warn!("{}", err),
        }
        ExecutionResult::from_error(err, start.elapsed())
      }
    };

    info!(
      "Finish executing {} snippet in {} ms ({})",
      request.language,
      result.duration.as_millis(),
      result.error.map_or("ok", |kind| kind.as_str())
    );
    result
  }

  fn try_execute(&self, request: &ExecutionRequest) -> Result<BackendRun, SnipBoxError> {
    let spec = language::resolve(&request.language)?;
    self.resolver.ensure_configured()?;

    let _permit = self.gate.as_ref().map(|gate| gate.acquire());

    let workspace = self.workspaces.create()?;
    let run = self.run_in(&workspace, spec, request);
    workspace.release();
    run
  }

  fn run_in(
    &self,
    workspace: &Workspace,
    spec: &LanguageSpec,
    request: &ExecutionRequest,
  ) -> Result<BackendRun, SnipBoxError> {
    workspace.write_source(spec.source_filename(), &request.code)?;
    let host_path = self.resolver.to_host_path(workspace.path())?;

    let invocation = Invocation {
      spec,
      workspace_name: workspace.name(),
      workspace_path: workspace.path(),
      host_path: &host_path,
      stdin: &request.stdin,
      limits: &self.limits,
      timeout: self.timeout,
    };
    debug!(
      "Invoke {} backend for workspace {}",
      self.backend.name(),
      workspace.name()
    );
    self.backend.run(&invocation)
  }
}

impl ExecutionResult {
  fn from_run(run: BackendRun, timeout: Duration, duration: Duration) -> Self {
    let (error, message) = match run.outcome {
      BackendOutcome::Completed { exit_code, signal } => {
        debug!("Snippet exited with status {:?}, signal {:?}", exit_code, signal);
        (None, None)
      }
      BackendOutcome::TimedOut => {
        let err = SnipBoxError::timeout(format!(
          "execution timed out after {} ms",
          timeout.as_millis()
        ));
        (err.kind(), Some(err.to_string()))
      }
      BackendOutcome::InvocationFailed(reason) => {
        let err = SnipBoxError::backend(reason);
        (err.kind(), Some(err.to_string()))
      }
    };
    ExecutionResult {
      output: run.output,
      error,
      message,
      duration,
      truncated: run.truncated,
    }
  }

  fn from_error(err: SnipBoxError, duration: Duration) -> Self {
    ExecutionResult {
      output: String::new(),
      error: Some(err.kind().unwrap_or(ErrorKind::BackendInvocationFailure)),
      message: Some(err.to_string()),
      duration,
      truncated: false,
    }
  }

  /// Interleaved stdout and stderr, populated even when `error` is set
  pub fn output(&self) -> &str {
    &self.output
  }

  pub fn into_output(self) -> String {
    self.output
  }

  pub fn error(&self) -> Option<ErrorKind> {
    self.error
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }

  pub fn duration(&self) -> Duration {
    self.duration
  }

  /// Whether output was cut at the configured limit
  pub fn truncated(&self) -> bool {
    self.truncated
  }

  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!({
      "output": self.output,
      "error": self.error.map(|kind| kind.as_str()),
      "message": self.message,
      "duration_ms": self.duration.as_millis() as u64,
      "truncated": self.truncated,
    })
  }

  /// Report to stderr, human readable on a tty and json otherwise
  pub fn report(&self) {
    let is_tty = isatty(STDERR_FILENO).unwrap_or(false);
    if is_tty {
      self.report_human();
    } else {
      self.report_json();
    }
  }

  pub fn report_human(&self) {
    let error = self.error.map_or_else(
      || "\x1b[92m✓\x1b[39m".to_string(),
      |kind| format!("\x1b[91m{}\x1b[39m", kind),
    );

    eprintln!();
    eprintln!("\x1b[1mError\x1b[22m      {}", error);
    if let Some(message) = &self.message {
      eprintln!("\x1b[1mMessage\x1b[22m    {}", message);
    }
    eprintln!("\x1b[1mTime\x1b[22m       {} ms", self.duration.as_millis());
    if self.truncated {
      eprintln!("\x1b[1mOutput\x1b[22m     \x1b[93mtruncated\x1b[39m");
    }
    eprintln!();
  }

  pub fn report_json(&self) {
    let mut report = self.to_json();
    if let Some(object) = report.as_object_mut() {
      // Output already went to stdout
      object.remove("output");
      object.insert("ok".to_string(), serde_json::Value::Bool(self.is_ok()));
    }
    eprintln!("{}", report);
  }
}
