use std::fs::File;
use std::os::unix::prelude::{FromRawFd, RawFd};
use std::process::Stdio;

use nix::{fcntl::OFlag, unistd::pipe2};

use crate::SnipBoxError;

/// One pipe shared by the child's stdout and stderr, so writes interleave
/// in the order the child made them
pub(crate) struct CombinedPipe(RawFd, RawFd);

pub(crate) struct CombinedReadPipe(pub(crate) File);

pub(crate) struct CombinedWritePipe {
  pub(crate) stdout: Stdio,
  pub(crate) stderr: Stdio,
}

impl CombinedPipe {
  pub(crate) fn new() -> Result<Self, SnipBoxError> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC)
      .map_err(|errno| SnipBoxError::backend(format!("Create output pipe fails: {}", errno)))?;
    Ok(CombinedPipe(read, write))
  }

  /// Split into the parent's read end and the child's two write handles
  pub(crate) fn split(self) -> Result<(CombinedReadPipe, CombinedWritePipe), SnipBoxError> {
    // Both fds come straight from pipe2 and are owned here only
    let read = unsafe { File::from_raw_fd(self.0) };
    let write = unsafe { File::from_raw_fd(self.1) };
    let write_err = write
      .try_clone()
      .map_err(|err| SnipBoxError::backend(format!("Duplicate output pipe fails: {}", err)))?;
    Ok((
      CombinedReadPipe(read),
      CombinedWritePipe {
        stdout: Stdio::from(write),
        stderr: Stdio::from(write_err),
      },
    ))
  }
}
