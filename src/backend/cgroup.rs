use std::fs::{self, File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use cgroups_rs::cgroup_builder::CgroupBuilder;
use cgroups_rs::{Cgroup, MaxValue};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::backend::Limits;

const KILL_ROUNDS: usize = 100;

const KILL_INTERVAL: Duration = Duration::from_millis(10);

/// Cgroup of one run, carrying its memory and pids ceilings.
///
/// The child joins it itself between fork and exec by writing `0` to the
/// opened `cgroup.procs` files, so every descendant is a member from the start.
pub(crate) struct RunCgroup {
  name: String,
  cgroup: Cgroup,
  dirs: Vec<PathBuf>,
  procs: Vec<File>,
}

impl RunCgroup {
  /// Create `<parent>/<run>`, `None` if the hierarchy can not be used
  pub(crate) fn new(parent: &str, run: &str, limits: &Limits) -> Option<Self> {
    let name = format!("{}/{}", parent.trim_matches('/'), run);
    debug!("Init cgroup {}", name);

    let hierarchy = cgroups_rs::hierarchies::auto();
    let subsystems = hierarchy.subsystems();
    let enable_memory = subsystems.iter().any(|subsystem| subsystem.controller_name() == "memory");
    let enable_pids = subsystems.iter().any(|subsystem| subsystem.controller_name() == "pids");
    if !enable_memory || !enable_pids {
      warn!("cgroup memory or pids is not supported");
      return None;
    }

    let root = hierarchy.root();
    let dirs = if hierarchy.v2() {
      vec![root.join(&name)]
    } else {
      vec![root.join("memory").join(&name), root.join("pids").join(&name)]
    };

    let memory_limit = (limits.memory_mib * 1024 * 1024) as i64;
    let builder = CgroupBuilder::new(name.as_str())
      .memory()
      .memory_hard_limit(memory_limit)
      .memory_swap_limit(memory_limit)
      .done()
      .pid()
      .maximum_number_of_processes(MaxValue::Value(limits.pids as i64))
      .done()
      .set_specified_controllers(vec!["memory".to_string(), "pids".to_string()]);

    let cgroup = match builder.build(hierarchy) {
      Ok(cgroup) => cgroup,
      Err(err) => {
        warn!("Build cgroup {} fails: {}", name, err);
        return None;
      }
    };

    let mut procs = vec![];
    for dir in dirs.iter() {
      match OpenOptions::new().write(true).open(dir.join("cgroup.procs")) {
        Ok(file) => procs.push(file),
        Err(err) => {
          warn!("Open {}/cgroup.procs fails: {}", dir.to_string_lossy(), err);
          if let Err(err) = cgroup.delete() {
            error!("Delete cgroup {} fails: {}", name, err);
          }
          return None;
        }
      }
    }

    info!(
      "Create cgroup {} (memory {} MiB, pids {})",
      name, limits.memory_mib, limits.pids
    );
    Some(RunCgroup {
      name,
      cgroup,
      dirs,
      procs,
    })
  }

  /// Descriptors the child writes `0` to, open until this cgroup is dropped
  pub(crate) fn procs_fds(&self) -> Vec<RawFd> {
    self.procs.iter().map(|file| file.as_raw_fd()).collect()
  }

  fn members(&self) -> Vec<Pid> {
    let mut members = vec![];
    for dir in self.dirs.iter() {
      if let Ok(text) = fs::read_to_string(dir.join("cgroup.procs")) {
        for line in text.lines() {
          if let Ok(pid) = line.trim().parse::<i32>() {
            let pid = Pid::from_raw(pid);
            if !members.contains(&pid) {
              members.push(pid);
            }
          }
        }
      }
    }
    members
  }

  /// Kill every member, including those that left the process group
  pub(crate) fn kill_all(&self) {
    for _ in 0..KILL_ROUNDS {
      let members = self.members();
      if members.is_empty() {
        return;
      }
      debug!("Kill {} processes of cgroup {}", members.len(), self.name);
      for pid in members {
        match kill(pid, Signal::SIGKILL) {
          Ok(_) | Err(Errno::ESRCH) => {}
          Err(errno) => warn!("Kill process #{}. fails: {}", pid, errno),
        }
      }
      thread::sleep(KILL_INTERVAL);
    }
    warn!("cgroup {} still has members", self.name);
  }
}

impl Drop for RunCgroup {
  fn drop(&mut self) {
    self.kill_all();
    debug!("Delete created cgroup {}", self.name);
    if let Err(err) = self.cgroup.delete() {
      error!("Delete cgroup {} fails: {}", self.name, err);
    }
  }
}
