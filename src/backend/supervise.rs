use std::io::{ErrorKind, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::backend::pipe::CombinedPipe;
use crate::backend::{BackendOutcome, BackendRun, Limits};
use crate::utils::into_text;
use crate::SnipBoxError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time allowed for the output reader to drain after the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Capture {
  bytes: Vec<u8>,
  truncated: bool,
}

/// Exit of the supervised process
pub(crate) enum Exit {
  Exited(i32),
  Signaled(Signal),
  TimedOut,
}

/// Driver specific teardown of what lives outside the process group
pub(crate) trait Teardown {
  /// The deadline passed and the process group is already killed
  fn timed_out(&self) {}

  /// The process is reaped, kill whatever it left behind
  fn finished(&self) {}
}

/// Spawn `command` in its own process group and supervise it until exit or timeout.
///
/// Stdout and stderr share one pipe. `stdin` is written once and closed.
/// On timeout the whole process group is killed, then `teardown` runs so the
/// driver can remove anything living outside the group (a container, a cgroup).
pub(crate) fn supervise<T: Teardown>(
  mut command: Command,
  stdin: &str,
  limits: &Limits,
  timeout: Duration,
  teardown: &T,
) -> Result<(String, Exit, bool), SnipBoxError> {
  let (reader, writer) = CombinedPipe::new()?.split()?;
  command
    .stdin(Stdio::piped())
    .stdout(writer.stdout)
    .stderr(writer.stderr)
    .process_group(0);

  let start = Instant::now();
  let mut child = command
    .spawn()
    .map_err(|err| SnipBoxError::backend(format!("Spawn {:?} fails: {}", command.get_program(), err)))?;
  // The command still holds the write ends, the reader sees EOF only once they close
  drop(command);

  let pid = Pid::from_raw(child.id() as i32);
  info!("Start supervising process #{}.", pid);

  let stdin_pipe = child.stdin.take();
  let input = stdin.as_bytes().to_vec();
  thread::spawn(move || {
    if let Some(mut pipe) = stdin_pipe {
      if let Err(err) = pipe.write_all(&input) {
        if err.kind() != ErrorKind::BrokenPipe {
          debug!("Write stdin to process #{}. fails: {}", pid, err);
        }
      }
    }
  });

  let capture = Arc::new(Mutex::new(Capture::default()));
  let (done_tx, done_rx) = mpsc::channel::<()>();
  {
    let capture = Arc::clone(&capture);
    let limit = limits.output_bytes;
    let mut reader = reader.0;
    thread::spawn(move || {
      let mut buf = [0u8; 8192];
      loop {
        match reader.read(&mut buf) {
          Ok(0) => break,
          Ok(size) => {
            let mut capture = capture.lock().unwrap_or_else(|e| e.into_inner());
            let room = limit.saturating_sub(capture.bytes.len());
            if size > room {
              capture.truncated = true;
            }
            let take = size.min(room);
            capture.bytes.extend_from_slice(&buf[..take]);
          }
          Err(err) if err.kind() == ErrorKind::Interrupted => continue,
          Err(_) => break,
        }
      }
      let _ = done_tx.send(());
    });
  }

  let deadline = start + timeout;
  let exit = loop {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
      Ok(WaitStatus::Exited(pid, status)) => {
        info!("Process #{}. exited with status {}", pid, status);
        break Exit::Exited(status);
      }
      Ok(WaitStatus::Signaled(pid, signal, _)) => {
        info!("Process #{}. is signaled by {}", pid, signal);
        break Exit::Signaled(signal);
      }
      Ok(_) => {
        if Instant::now() >= deadline {
          warn!(
            "Process #{}. exceeded the time limit of {} ms",
            pid,
            timeout.as_millis()
          );
          kill_group(pid);
          teardown.timed_out();
          reap(pid);
          break Exit::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
      }
      Err(Errno::EINTR) => continue,
      Err(errno) => {
        kill_group(pid);
        teardown.finished();
        return Err(SnipBoxError::backend(format!(
          "Wait for process #{} fails: {}",
          pid, errno
        )));
      }
    }
  };

  // Leftovers would keep the output pipe open
  kill_group(pid);
  teardown.finished();

  if done_rx.recv_timeout(DRAIN_GRACE).is_err() {
    warn!("Output of process #{}. is still open, returning what was read", pid);
  }

  let mut capture = capture.lock().unwrap_or_else(|e| e.into_inner());
  let bytes = std::mem::take(&mut capture.bytes);
  let truncated = capture.truncated;
  debug!(
    "Process #{}. finished in {} ms with {} bytes of output",
    pid,
    start.elapsed().as_millis(),
    bytes.len()
  );

  Ok((into_text(bytes), exit, truncated))
}

impl Exit {
  pub(crate) fn into_outcome(self) -> BackendOutcome {
    match self {
      Exit::Exited(status) => BackendOutcome::Completed {
        exit_code: Some(status),
        signal: None,
      },
      Exit::Signaled(signal) => BackendOutcome::Completed {
        exit_code: None,
        signal: Some(signal),
      },
      Exit::TimedOut => BackendOutcome::TimedOut,
    }
  }
}

impl BackendRun {
  pub(crate) fn new(output: String, outcome: BackendOutcome, truncated: bool) -> Self {
    BackendRun {
      output,
      outcome,
      truncated,
    }
  }
}

fn kill_group(pid: Pid) {
  match killpg(pid, Signal::SIGKILL) {
    Ok(_) | Err(Errno::ESRCH) => {}
    Err(errno) => warn!("Kill process group #{}. fails: {}", pid, errno),
  }
}

fn reap(pid: Pid) {
  loop {
    match waitpid(pid, None) {
      Err(Errno::EINTR) => continue,
      _ => break,
    }
  }
}
