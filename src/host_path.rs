use std::path::{Component, Path, PathBuf};

use log::debug;
use path_absolutize::Absolutize;

use crate::SnipBoxError;

/// Maps workspace paths seen by this process to paths the runtime host can mount.
///
/// When the engine runs inside a container of its own, the execution root is a
/// bind mount whose host-side location is only known through configuration.
/// A workspace at `<exec_root>/<rel>` is mounted from `<host_base>/<rel>`.
#[derive(Debug, Clone)]
pub struct HostPathResolver {
  exec_root: PathBuf,
  host_base: Option<String>,
}

impl HostPathResolver {
  pub fn new<P: Into<PathBuf>>(exec_root: P, host_base: Option<String>) -> Self {
    HostPathResolver {
      exec_root: exec_root.into(),
      host_base: host_base.filter(|base| !base.trim().is_empty()),
    }
  }

  /// Resolver for an engine that shares its filesystem with the runtime host.
  ///
  /// A relative `exec_root` is made absolute against the current directory.
  pub fn identity<P: AsRef<Path>>(exec_root: P) -> Result<Self, SnipBoxError> {
    let exec_root = absolute(exec_root.as_ref())?;
    let host_base = exec_root.to_string_lossy().to_string();
    Ok(HostPathResolver {
      exec_root,
      host_base: Some(host_base),
    })
  }

  pub fn exec_root(&self) -> &Path {
    &self.exec_root
  }

  pub fn host_base(&self) -> Option<&str> {
    self.host_base.as_deref()
  }

  /// Fail unless a host base directory is configured
  pub fn ensure_configured(&self) -> Result<&str, SnipBoxError> {
    self.host_base.as_deref().ok_or_else(|| {
      SnipBoxError::configuration(
        "host base path of the execution root is not set (SNIPJ_HOST_EXEC_ROOT or HOST_PROJECT_PATH)",
      )
    })
  }

  pub fn to_host_path(&self, workspace_path: &Path) -> Result<String, SnipBoxError> {
    let host_base = self.ensure_configured()?;

    let relative = workspace_path.strip_prefix(&self.exec_root).map_err(|_| {
      SnipBoxError::workspace(format!(
        "workspace {} is outside the execution root {}",
        workspace_path.to_string_lossy(),
        self.exec_root.to_string_lossy()
      ))
    })?;

    let mut parts = vec![];
    for component in relative.components() {
      match component {
        Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
        Component::CurDir => {}
        _ => {
          return Err(SnipBoxError::workspace(format!(
            "workspace path {} should not contain {:?}",
            workspace_path.to_string_lossy(),
            component
          )))
        }
      }
    }

    let joined = if parts.is_empty() {
      host_base.to_string()
    } else {
      format!("{}/{}", host_base, parts.join("/"))
    };
    let host_path = normalize_host_path(&joined);
    debug!(
      "Map workspace {} -> host {}",
      workspace_path.to_string_lossy(),
      host_path
    );
    Ok(host_path)
  }
}

/// `path` made absolute against the current directory, `.` and `..` resolved lexically
pub(crate) fn absolute(path: &Path) -> Result<PathBuf, SnipBoxError> {
  let absolute = path.absolutize().map_err(|err| {
    SnipBoxError::configuration(format!(
      "can not make {} absolute: {}",
      path.to_string_lossy(),
      err
    ))
  })?;
  Ok(absolute.into_owned())
}

/// Normalize separators and drive letters into the form docker accepts.
///
/// `C:\Users\me\code-exec` becomes `/c/Users/me/code-exec`.
pub fn normalize_host_path(path: &str) -> String {
  let text = path.replace('\\', "/");

  let bytes = text.as_bytes();
  let text = if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
    let drive = (bytes[0] as char).to_ascii_lowercase();
    format!("/{}/{}", drive, &text[2..])
  } else {
    text
  };

  let mut normalized = String::with_capacity(text.len());
  for ch in text.chars() {
    if ch == '/' && normalized.ends_with('/') {
      continue;
    }
    normalized.push(ch);
  }
  while normalized.len() > 1 && normalized.ends_with('/') {
    normalized.pop();
  }
  normalized
}
