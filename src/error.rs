use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::{errno::Errno, libc::STDERR_FILENO, unistd::isatty};

/// Public error taxonomy handed back to callers of `Engine::execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  UnsupportedLanguage,
  ConfigurationError,
  WorkspaceError,
  BackendInvocationFailure,
  TimeoutExceeded,
}

pub enum SnipBoxError {
  UnsupportedLanguage(String),
  Configuration(String),
  Workspace(String),
  Backend(String),
  Timeout(String),
  Cli(String),
  Logger(FlexiLoggerError),
}

pub enum SnipBoxExit {
  Ok,
  Failed(ErrorKind),
  Err(SnipBoxError),
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::UnsupportedLanguage => "UnsupportedLanguage",
      ErrorKind::ConfigurationError => "ConfigurationError",
      ErrorKind::WorkspaceError => "WorkspaceError",
      ErrorKind::BackendInvocationFailure => "BackendInvocationFailure",
      ErrorKind::TimeoutExceeded => "TimeoutExceeded",
    }
  }
}

impl Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl SnipBoxError {
  pub fn unsupported_language<MS: Into<String>>(language: MS) -> SnipBoxError {
    SnipBoxError::UnsupportedLanguage(language.into())
  }

  pub fn configuration<MS: Into<String>>(msg: MS) -> SnipBoxError {
    SnipBoxError::Configuration(msg.into())
  }

  pub fn workspace<MS: Into<String>>(msg: MS) -> SnipBoxError {
    SnipBoxError::Workspace(msg.into())
  }

  pub fn backend<MS: Into<String>>(msg: MS) -> SnipBoxError {
    SnipBoxError::Backend(msg.into())
  }

  pub fn timeout<MS: Into<String>>(msg: MS) -> SnipBoxError {
    SnipBoxError::Timeout(msg.into())
  }

  pub fn cli<MS: Into<String>>(msg: MS) -> SnipBoxError {
    SnipBoxError::Cli(msg.into())
  }

  /// Map to the public taxonomy, `None` for errors that never leave the binary
  pub fn kind(&self) -> Option<ErrorKind> {
    match self {
      SnipBoxError::UnsupportedLanguage(_) => Some(ErrorKind::UnsupportedLanguage),
      SnipBoxError::Configuration(_) => Some(ErrorKind::ConfigurationError),
      SnipBoxError::Workspace(_) => Some(ErrorKind::WorkspaceError),
      SnipBoxError::Backend(_) => Some(ErrorKind::BackendInvocationFailure),
      SnipBoxError::Timeout(_) => Some(ErrorKind::TimeoutExceeded),
      SnipBoxError::Cli(_) | SnipBoxError::Logger(_) => None,
    }
  }
}

impl Debug for SnipBoxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for SnipBoxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      SnipBoxError::UnsupportedLanguage(language) => {
        f.write_fmt(format_args!("SnipBox Language Error: unsupported language {}", language))
      }
      SnipBoxError::Configuration(msg) => {
        f.write_fmt(format_args!("SnipBox Configuration Error: {}", msg))
      }
      SnipBoxError::Workspace(msg) => f.write_fmt(format_args!("SnipBox Workspace Error: {}", msg)),
      SnipBoxError::Backend(msg) => f.write_fmt(format_args!("SnipBox Backend Error: {}", msg)),
      SnipBoxError::Timeout(msg) => f.write_fmt(format_args!("SnipBox Timeout Error: {}", msg)),
      SnipBoxError::Cli(msg) => f.write_fmt(format_args!("SnipBox CLI Error: {}", msg)),
      SnipBoxError::Logger(err) => f.write_fmt(format_args!("SnipBox Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for SnipBoxError {
  fn from(errno: Errno) -> Self {
    SnipBoxError::Backend(errno.desc().to_string())
  }
}

impl From<std::io::Error> for SnipBoxError {
  fn from(err: std::io::Error) -> Self {
    SnipBoxError::Workspace(err.to_string())
  }
}

impl From<FlexiLoggerError> for SnipBoxError {
  fn from(err: FlexiLoggerError) -> Self {
    SnipBoxError::Logger(err)
  }
}

impl Error for SnipBoxError {}

impl Termination for SnipBoxExit {
  fn report(self) -> ExitCode {
    match self {
      SnipBoxExit::Ok => ExitCode::SUCCESS.report(),
      SnipBoxExit::Failed(_) => ExitCode::FAILURE.report(),
      SnipBoxExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) => {
            let is_tty = isatty(STDERR_FILENO).unwrap_or(false);
            if is_tty {
              format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
            } else {
              serde_json::json!({
                "ok": false,
                "type": prefix,
                "message": message,
              })
              .to_string()
            }
          }
          None => text,
        };
        eprintln!("{}", text);
        ExitCode::FAILURE.report()
      }
    }
  }
}
