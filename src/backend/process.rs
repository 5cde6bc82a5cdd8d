use std::os::unix::process::CommandExt;
use std::process::Command;
use std::thread::available_parallelism;

use log::{debug, info, warn};
use nix::libc::rlim_t;
use nix::sched::{sched_setaffinity, unshare, CloneFlags, CpuSet};
use nix::sys::resource::{setrlimit, Resource};
use nix::unistd::{write, Pid};

use crate::backend::cgroup::RunCgroup;
use crate::backend::supervise::{supervise, Teardown};
use crate::backend::{BackendRun, ExecutionBackend, Invocation, Limits};
use crate::SnipBoxError;

/// Output file size 256 MB
const FILE_SIZE_LIMIT: rlim_t = 256 * 1024 * 1024;

/// Runs snippets as restricted host processes, using host toolchains.
///
/// The child gets fresh user and network namespaces (no network), a CPU time
/// ceiling and a CPU affinity mask. Memory and pids are capped by a cgroup
/// created under the configured parent. Without a usable cgroup hierarchy
/// memory falls back to an address space ceiling and pids are not capped.
/// The language's image reference is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProcessBackend {
  cgroup: Option<String>,
}

impl ProcessBackend {
  pub fn new() -> Self {
    ProcessBackend { cgroup: None }
  }

  /// Create one cgroup per run under `parent`
  pub fn cgroup<S: Into<String>>(mut self, parent: S) -> Self {
    self.cgroup = Some(parent.into());
    self
  }

  pub fn cgroup_parent(&self) -> Option<&str> {
    self.cgroup.as_deref()
  }
}

impl Teardown for Option<RunCgroup> {
  fn timed_out(&self) {
    if let Some(cgroup) = self {
      cgroup.kill_all();
    }
  }

  fn finished(&self) {
    if let Some(cgroup) = self {
      cgroup.kill_all();
    }
  }
}

/// Pin to the first `ceil(cpus)` cores that exist
fn cpu_set(limits: &Limits) -> Result<CpuSet, SnipBoxError> {
  let available = available_parallelism().map(|n| n.get()).unwrap_or(1);
  let cores = (limits.cpus.ceil() as usize).clamp(1, available.min(CpuSet::count()));
  let mut set = CpuSet::new();
  for core in 0..cores {
    set.set(core)?;
  }
  debug!("Restrict process to {} cores", cores);
  Ok(set)
}

impl ExecutionBackend for ProcessBackend {
  fn name(&self) -> &str {
    "process"
  }

  fn run(&self, invocation: &Invocation) -> Result<BackendRun, SnipBoxError> {
    let argv = invocation.spec.build_and_run_command();
    let (program, arguments) = argv
      .split_first()
      .ok_or_else(|| SnipBoxError::backend(format!("language {} has no command", invocation.spec.id())))?;

    let cgroup = self
      .cgroup
      .as_deref()
      .and_then(|parent| RunCgroup::new(parent, invocation.workspace_name, invocation.limits));
    if cgroup.is_none() {
      warn!(
        "Run {} without cgroup, the pids limit is not enforced",
        invocation.workspace_name
      );
    }
    let procs = cgroup.as_ref().map(|cgroup| cgroup.procs_fds()).unwrap_or_default();
    let address_space = match &cgroup {
      Some(_) => None,
      None => Some((invocation.limits.memory_mib as rlim_t) * 1024 * 1024),
    };

    // 运行时限 + 1 秒
    let cpu_time = invocation.timeout.as_secs() as rlim_t + 1;
    let cpus = cpu_set(invocation.limits)?;

    let mut command = Command::new(program);
    command
      .args(arguments)
      .current_dir(invocation.workspace_path)
      .env_clear()
      .env("PATH", std::env::var("PATH").unwrap_or_default())
      .env("HOME", invocation.workspace_path);

    // Only raw syscalls run between fork and exec
    unsafe {
      command.pre_exec(move || {
        // Join before exec, so nothing forked later escapes the cgroup
        for fd in procs.iter() {
          write(*fd, b"0")?;
        }
        unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET)?;
        sched_setaffinity(Pid::from_raw(0), &cpus)?;
        if let Some(memory) = address_space {
          setrlimit(Resource::RLIMIT_AS, memory, memory)?;
        }
        setrlimit(Resource::RLIMIT_CPU, cpu_time, cpu_time)?;
        setrlimit(Resource::RLIMIT_FSIZE, FILE_SIZE_LIMIT, FILE_SIZE_LIMIT)?;
        Ok(())
      });
    }

    info!(
      "Start running {} in {}",
      argv.join(" "),
      invocation.workspace_path.to_string_lossy()
    );

    let (output, exit, truncated) = supervise(
      command,
      invocation.stdin,
      invocation.limits,
      invocation.timeout,
      &cgroup,
    )?;

    Ok(BackendRun::new(output, exit.into_outcome(), truncated))
  }
}
