use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use nix::unistd::{getgid, getuid};
use tempfile::tempdir;

use snipj::{
  resolve_language, DockerBackend, Engine, EngineConfig, ErrorKind, ExecutionRequest,
  HostPathResolver, Invocation, Limits,
};

mod common;

// Containers of parallel tests would show up in each other's checks, and a
// runtime script being written while another test forks can not be executed
static DOCKER: Mutex<()> = Mutex::new(());

fn one_test_at_a_time() -> MutexGuard<'static, ()> {
  DOCKER.lock().unwrap_or_else(|e| e.into_inner())
}

/// Write a stand-in for the runtime CLI into `dir`.
///
/// `rm` calls append the container name to `dir/removed`, `run` executes `body`
/// with the arguments of `docker run` (`$5` is the name, `$7` the mount).
fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
  let path = dir.join("runtime");
  let script = format!(
    "#!/bin/sh\nif [ \"$1\" = rm ]; then\n  echo \"$3\" >> '{}'\n  exit 0\nfi\n{}\n",
    dir.join("removed").to_string_lossy(),
    body
  );
  fs::write(&path, script).unwrap();
  fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
  path
}

fn fake_config(root: &Path, runtime: &Path, timeout: Duration) -> EngineConfig {
  let mut config = EngineConfig::default();
  config.exec_root = root.to_path_buf();
  config.runtime = runtime.to_string_lossy().to_string();
  config.timeout = timeout;
  config
}

fn fake_engine(config: EngineConfig) -> Engine {
  let root = config.exec_root.clone();
  Engine::builder(config)
    .resolver(HostPathResolver::identity(root).unwrap())
    .build()
    .unwrap()
}

#[test]
fn it_should_build_isolated_run_arguments() {
  common::setup();

  let spec = resolve_language("cpp").unwrap();
  let limits = Limits::default();
  let invocation = Invocation {
    spec,
    workspace_name: "codeexec-abc123",
    workspace_path: Path::new("/code-exec/codeexec-abc123"),
    host_path: "/c/Users/me/code-exec/codeexec-abc123",
    stdin: "",
    limits: &limits,
    timeout: Duration::from_secs(20),
  };

  let args = DockerBackend::default()
    .user(Some("1000:1000".to_string()))
    .arguments(&invocation);
  assert_eq!(
    args,
    vec![
      "run",
      "--rm",
      "-i",
      "--name",
      "codeexec-abc123",
      "-v",
      "/c/Users/me/code-exec/codeexec-abc123:/app",
      "--workdir",
      "/app",
      "--user",
      "1000:1000",
      "-e",
      "HOME=/app",
      "--network=none",
      "--memory",
      "1024m",
      "--memory-swap",
      "1024m",
      "--cpus",
      "2.00",
      "--pids-limit",
      "256",
      "cpp-compiler-alpine",
      "sh",
      "-c",
      "g++ -o main main.cpp && ./main",
    ]
  );
}

#[test]
fn it_should_pass_custom_limits() {
  common::setup();

  let spec = resolve_language("python").unwrap();
  let limits = Limits {
    memory_mib: 256,
    cpus: 0.5,
    pids: 32,
    output_bytes: 1024,
  };
  let invocation = Invocation {
    spec,
    workspace_name: "codeexec-x",
    workspace_path: Path::new("/code-exec/codeexec-x"),
    host_path: "/srv/code-exec/codeexec-x",
    stdin: "",
    limits: &limits,
    timeout: Duration::from_secs(5),
  };

  let args = DockerBackend::new("podman").user(None).arguments(&invocation);
  let joined = args.join(" ");
  assert!(!args.contains(&"--user".to_string()));
  assert!(joined.contains("--memory 256m --memory-swap 256m"));
  assert!(joined.contains("--cpus 0.50"));
  assert!(joined.contains("--pids-limit 32"));
  assert!(joined.ends_with("python:3.10-alpine python main.py"));
  // Only the workspace is mounted
  assert_eq!(args.iter().filter(|arg| *arg == "-v").count(), 1);
}

#[test]
fn it_should_run_as_engine_user() {
  common::setup();

  let expected = format!("{}:{}", getuid(), getgid());
  assert_eq!(DockerBackend::default().container_user(), Some(expected.as_str()));
}

#[test]
fn it_should_fail_when_runtime_is_missing() {
  common::setup();
  let _guard = one_test_at_a_time();

  let dir = tempdir().unwrap();
  let mut config = common::config(dir.path());
  config.runtime = "snipj-no-such-runtime".to_string();
  let engine = Engine::from_config(config).unwrap();

  let result = engine.execute(&ExecutionRequest::new("python", "print(1)", ""));
  assert_eq!(result.error(), Some(ErrorKind::BackendInvocationFailure));
  assert!(common::entries(dir.path()).is_empty());
}

#[test]
fn it_should_feed_stdin_and_merge_output() {
  common::setup();
  let _guard = one_test_at_a_time();

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  let runtime = fake_runtime(
    bin.path(),
    "read line\necho \"out:$line\"\necho \"err:$line\" >&2\ncat \"${7%:/app}/main.py\"",
  );
  let engine = fake_engine(fake_config(dir.path(), &runtime, Duration::from_secs(10)));

  let result = engine.execute(&ExecutionRequest::new("python", "print(1)\n", "hello\n"));
  info!("Result: {:?}", result);
  assert!(result.is_ok(), "{:?}", result.message());
  assert_eq!(result.output(), "out:hello\nerr:hello\nprint(1)\n");
  assert!(!result.truncated());
  assert!(common::entries(dir.path()).is_empty());
  assert!(!bin.path().join("removed").exists());
}

#[test]
fn it_should_not_treat_nonzero_exit_as_error() {
  common::setup();
  let _guard = one_test_at_a_time();

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  let runtime = fake_runtime(bin.path(), "echo out\nexit 3");
  let engine = fake_engine(fake_config(dir.path(), &runtime, Duration::from_secs(10)));

  let result = engine.execute(&ExecutionRequest::new("go", "package main", ""));
  assert!(result.is_ok());
  assert_eq!(result.output(), "out\n");
}

#[test]
fn it_should_remove_container_on_timeout() {
  common::setup();
  let _guard = one_test_at_a_time();

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  let runtime = fake_runtime(bin.path(), "echo started\nsleep 30");
  let timeout = Duration::from_millis(500);
  let engine = fake_engine(fake_config(dir.path(), &runtime, timeout));

  let start = Instant::now();
  let result = engine.execute(&ExecutionRequest::new("python", "while True: pass", ""));
  let elapsed = start.elapsed();
  info!("Timed out run returned after {} ms", elapsed.as_millis());

  assert_eq!(result.error(), Some(ErrorKind::TimeoutExceeded));
  assert_eq!(result.output(), "started\n");
  assert!(elapsed >= timeout);
  assert!(elapsed < timeout + Duration::from_millis(1500));

  let removed = fs::read_to_string(bin.path().join("removed")).unwrap();
  assert_eq!(removed.lines().count(), 1);
  assert!(removed.starts_with("codeexec-"), "{}", removed);
  assert!(common::entries(dir.path()).is_empty());
}

#[test]
fn it_should_kill_leftover_group_members() {
  common::setup();
  let _guard = one_test_at_a_time();

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  // The background sleep holds the output pipe after the runtime exits
  let runtime = fake_runtime(bin.path(), "sleep 30 &\necho done");
  let engine = fake_engine(fake_config(dir.path(), &runtime, Duration::from_secs(10)));

  let start = Instant::now();
  let result = engine.execute(&ExecutionRequest::new("python", "print('done')", ""));
  assert!(result.is_ok());
  assert_eq!(result.output(), "done\n");
  assert!(start.elapsed() < Duration::from_millis(1500));
  assert!(common::entries(dir.path()).is_empty());
}

#[test]
fn it_should_map_runtime_failure() {
  common::setup();
  let _guard = one_test_at_a_time();

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  let runtime = fake_runtime(
    bin.path(),
    "echo \"Unable to find image 'python:3.10-alpine' locally\" >&2\nexit 125",
  );
  let engine = fake_engine(fake_config(dir.path(), &runtime, Duration::from_secs(10)));

  let result = engine.execute(&ExecutionRequest::new("python", "print(1)", ""));
  assert_eq!(result.error(), Some(ErrorKind::BackendInvocationFailure));
  assert!(result.output().contains("Unable to find image"));
  assert!(result.message().unwrap().contains("125"));
  assert!(common::entries(dir.path()).is_empty());
}

#[test]
fn it_should_truncate_runtime_output() {
  common::setup();
  let _guard = one_test_at_a_time();

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  let runtime = fake_runtime(bin.path(), "head -c 100000 /dev/zero | tr '\\0' x");
  let mut config = fake_config(dir.path(), &runtime, Duration::from_secs(10));
  config.limits.output_bytes = 1000;
  let engine = fake_engine(config);

  let result = engine.execute(&ExecutionRequest::new("python", "print('x' * 100000)", ""));
  assert!(result.is_ok());
  assert!(result.truncated());
  assert_eq!(result.output(), "x".repeat(1000));
}

#[test]
fn it_should_forward_runtime_environment() {
  common::setup();
  let _guard = one_test_at_a_time();

  let keys = ["DOCKER_TLS_VERIFY", "DOCKER_CERT_PATH", "XDG_RUNTIME_DIR", "SNIPJ_TEST_SECRET"];
  let saved = keys.map(|key| (key, env::var(key).ok()));
  env::set_var("DOCKER_TLS_VERIFY", "1");
  env::set_var("DOCKER_CERT_PATH", "/etc/docker/certs");
  env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
  env::set_var("SNIPJ_TEST_SECRET", "leaked");

  let bin = tempdir().unwrap();
  let dir = tempdir().unwrap();
  let runtime = fake_runtime(
    bin.path(),
    "echo \"$DOCKER_TLS_VERIFY|$DOCKER_CERT_PATH|$XDG_RUNTIME_DIR|$SNIPJ_TEST_SECRET\"",
  );
  let engine = fake_engine(fake_config(dir.path(), &runtime, Duration::from_secs(10)));
  let result = engine.execute(&ExecutionRequest::new("python", "", ""));

  for (key, value) in saved {
    match value {
      Some(value) => env::set_var(key, value),
      None => env::remove_var(key),
    }
  }

  assert!(result.is_ok());
  assert_eq!(result.output(), "1|/etc/docker/certs|/run/user/1000|\n");
}

fn docker_engine(root: &Path, timeout: Duration) -> Engine {
  let mut config = EngineConfig::default();
  config.exec_root = root.to_path_buf();
  config.timeout = timeout;
  fake_engine(config)
}

fn container_exists(name: &str) -> bool {
  let output = Command::new("docker")
    .args(["ps", "-a", "-q", "--filter", &format!("name={}", name)])
    .output()
    .unwrap();
  !output.stdout.is_empty()
}

#[test]
#[ignore = "requires a docker daemon and the python image"]
fn it_should_print_literal() {
  common::setup();
  let _guard = one_test_at_a_time();

  let dir = tempdir().unwrap();
  let engine = docker_engine(dir.path(), Duration::from_secs(60));
  let result = engine.execute(&ExecutionRequest::new("python", "print('Hello, World!')", ""));
  info!("Result: {:?}", result);
  assert!(result.is_ok());
  assert_eq!(result.output(), "Hello, World!\n");
  assert!(common::entries(dir.path()).is_empty());
}

#[test]
#[ignore = "requires a docker daemon and the python image"]
fn it_should_echo_stdin() {
  common::setup();
  let _guard = one_test_at_a_time();

  let dir = tempdir().unwrap();
  let engine = docker_engine(dir.path(), Duration::from_secs(60));
  let result = engine.execute(&ExecutionRequest::new("python", "print(input())", "ping\n"));
  assert!(result.is_ok());
  assert_eq!(result.output(), "ping\n");

  let result = engine.execute(&ExecutionRequest::new(
    "python",
    "import sys\nprint('out')\nprint('err', file=sys.stderr)\nsys.exit(3)",
    "",
  ));
  assert!(result.is_ok(), "non-zero exit is not an error");
  assert!(result.output().contains("out"));
  assert!(result.output().contains("err"));
}

#[test]
#[ignore = "requires a docker daemon and the python image"]
fn it_should_kill_infinite_loop() {
  common::setup();
  let _guard = one_test_at_a_time();

  let dir = tempdir().unwrap();
  let engine = docker_engine(dir.path(), Duration::from_secs(5));

  let start = Instant::now();
  let result = engine.execute(&ExecutionRequest::new(
    "python",
    "print('started', flush=True)\nwhile True: pass",
    "",
  ));
  let elapsed = start.elapsed();
  info!("Infinite loop returned after {} ms", elapsed.as_millis());

  assert_eq!(result.error(), Some(ErrorKind::TimeoutExceeded));
  assert!(elapsed < Duration::from_secs(5) + Duration::from_secs(10));
  assert!(common::entries(dir.path()).is_empty());
  assert!(!container_exists("codeexec-"));
}

#[test]
#[ignore = "requires a docker daemon and the python image"]
fn it_should_isolate_concurrent_runs() {
  common::setup();
  let _guard = one_test_at_a_time();

  let dir = tempdir().unwrap();
  let engine = Arc::new(docker_engine(dir.path(), Duration::from_secs(60)));

  let handles = (0..4)
    .map(|i| {
      let engine = Arc::clone(&engine);
      thread::spawn(move || {
        let stdin = format!("payload-{}\n", i);
        let result = engine.execute(&ExecutionRequest::new("python", "print(input())", stdin.clone()));
        assert!(result.is_ok());
        assert_eq!(result.output(), stdin);
      })
    })
    .collect::<Vec<_>>();
  for handle in handles {
    handle.join().unwrap();
  }

  assert!(common::entries(dir.path()).is_empty());
}

#[test]
#[ignore = "requires a docker daemon and the python image"]
fn it_should_disable_network() {
  common::setup();
  let _guard = one_test_at_a_time();

  let dir = tempdir().unwrap();
  let engine = docker_engine(dir.path(), Duration::from_secs(60));
  let code = "import socket\ntry:\n  socket.create_connection(('1.1.1.1', 53), timeout=2)\n  print('online')\nexcept OSError:\n  print('offline')";
  let result = engine.execute(&ExecutionRequest::new("python", code, ""));
  assert_eq!(result.output().trim(), "offline");
}
