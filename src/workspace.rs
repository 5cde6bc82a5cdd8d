use std::fs::{self, create_dir_all, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, error, info};

use crate::SnipBoxError;

const WORKSPACE_PREFIX: &str = "codeexec-";

/// Allocates scratch directories under one execution root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
  root: PathBuf,
}

/// Single-use scratch directory owned by one execution request.
///
/// The directory is removed by [`Workspace::release`], or on drop when a
/// request unwinds before reaching it. Removal happens exactly once.
#[derive(Debug)]
pub struct Workspace {
  name: String,
  path: PathBuf,
  created_at: DateTime<Local>,
  released: bool,
}

impl WorkspaceManager {
  pub fn new<P: Into<PathBuf>>(root: P) -> Self {
    WorkspaceManager { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Create a fresh workspace with a random suffix
  pub fn create(&self) -> Result<Workspace, SnipBoxError> {
    create_dir_all(&self.root).map_err(|err| {
      SnipBoxError::workspace(format!(
        "can not create execution root {}: {}",
        self.root.to_string_lossy(),
        err
      ))
    })?;

    // tempfile creates the directory with mode 0700 and retries on name collision
    let dir = tempfile::Builder::new()
      .prefix(WORKSPACE_PREFIX)
      .rand_bytes(12)
      .tempdir_in(&self.root)
      .map_err(|err| {
        SnipBoxError::workspace(format!(
          "can not create workspace in {}: {}",
          self.root.to_string_lossy(),
          err
        ))
      })?;
    let path = dir.into_path();

    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().to_string())
      .unwrap_or_default();

    debug!("Create workspace {}", path.to_string_lossy());

    Ok(Workspace {
      name,
      path,
      created_at: Local::now(),
      released: false,
    })
  }
}

impl Workspace {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn created_at(&self) -> &DateTime<Local> {
    &self.created_at
  }

  /// Write the source file into the workspace root
  pub fn write_source(&self, filename: &str, code: &str) -> Result<PathBuf, SnipBoxError> {
    let mut components = Path::new(filename).components();
    let is_bare = matches!(
      (components.next(), components.next()),
      (Some(Component::Normal(_)), None)
    );
    if !is_bare {
      return Err(SnipBoxError::workspace(format!(
        "source filename {:?} should be a bare file name",
        filename
      )));
    }

    let file_path = self.path.join(filename);
    let mut file = OpenOptions::new()
      .write(true)
      .create_new(true)
      .mode(0o644)
      .open(&file_path)
      .map_err(|err| {
        SnipBoxError::workspace(format!(
          "can not create source file {}: {}",
          file_path.to_string_lossy(),
          err
        ))
      })?;
    file.write_all(code.as_bytes()).map_err(|err| {
      SnipBoxError::workspace(format!(
        "can not write source file {}: {}",
        file_path.to_string_lossy(),
        err
      ))
    })?;

    debug!("Write {} bytes to {}", code.len(), file_path.to_string_lossy());
    Ok(file_path)
  }

  /// Remove the workspace directory
  pub fn release(mut self) {
    self.remove();
  }

  fn remove(&mut self) {
    if self.released {
      return;
    }
    self.released = true;

    match remove_dir_all::remove_dir_all(&self.path) {
      Ok(_) => {
        let lifetime = Local::now().signed_duration_since(self.created_at);
        info!(
          "Release workspace {} after {} ms",
          self.name,
          lifetime.num_milliseconds()
        );
      }
      Err(err) => {
        // The directory may already be gone, anything else is a leak
        if fs::metadata(&self.path).is_ok() {
          error!(
            "Fails removing workspace {}: {}",
            self.path.to_string_lossy(),
            err
          );
        }
      }
    }
  }
}

impl Drop for Workspace {
  fn drop(&mut self) {
    self.remove();
  }
}
