use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::info;

use snipj::{
  default_format, languages, timeout_from_secs, BackendKind, Engine, EngineConfig, ExecutionRequest,
  SnipBoxError, SnipBoxExit,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(long, help = "Wall-clock timeout (unit: seconds)")]
  timeout: Option<f64>,

  #[arg(short, long, help = "Memory limit (unit: MiB)")]
  memory: Option<u64>,

  #[arg(long, help = "CPU cores")]
  cpus: Option<f64>,

  #[arg(long, help = "Isolation backend: docker or process")]
  backend: Option<String>,

  #[arg(long, help = "File passed as standard input")]
  stdin: Option<PathBuf>,

  #[arg(long, default_value_t = false)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  #[command(about = "Run a snippet")]
  Run {
    #[arg(help = "Language")]
    language: String,

    #[arg(help = "Source file")]
    source: PathBuf,
  },

  #[command(about = "List supported languages")]
  Languages,
}

impl Cli {
  fn config(&self) -> Result<EngineConfig, SnipBoxError> {
    let mut config = EngineConfig::from_env()?;
    if let Some(timeout) = self.timeout {
      config.timeout = timeout_from_secs(timeout)
        .ok_or_else(|| SnipBoxError::cli(format!("--timeout {} is out of range", timeout)))?;
    }
    if let Some(memory) = self.memory {
      config.limits.memory_mib = memory;
    }
    if let Some(cpus) = self.cpus {
      config.limits.cpus = cpus;
    }
    if let Some(backend) = &self.backend {
      config.backend = backend.parse::<BackendKind>()?;
    }
    Ok(config)
  }
}

fn setup_logger(verbose: bool) -> Result<LoggerHandle, SnipBoxError> {
  let spec = if verbose { "snipj=debug" } else { "snipj=info" };
  let handle = Logger::try_with_str(spec)?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("LOG_DIR").unwrap_or("./logs/".into()))
        .basename("snipj")
        .discriminant(format!("{}", chrono::offset::Local::now().format("%Y-%m-%d")))
        .suppress_timestamp(),
    )
    .append()
    .duplicate_to_stderr(if verbose { Duplicate::Debug } else { Duplicate::Warn })
    .format_for_files(default_format)
    .start()?;
  Ok(handle)
}

fn start(cli: Cli) -> Result<SnipBoxExit, SnipBoxError> {
  let _logger = setup_logger(cli.verbose)?;

  match &cli.command {
    Commands::Languages => {
      for language in languages() {
        println!("{}", language);
      }
      Ok(SnipBoxExit::Ok)
    }
    Commands::Run { language, source } => {
      let code = fs::read_to_string(source).map_err(|err| {
        SnipBoxError::cli(format!("can not read {}: {}", source.to_string_lossy(), err))
      })?;
      let stdin = match &cli.stdin {
        Some(path) => fs::read_to_string(path).map_err(|err| {
          SnipBoxError::cli(format!("can not read {}: {}", path.to_string_lossy(), err))
        })?,
        None => String::new(),
      };

      let engine = Engine::from_config(cli.config()?)?;
      info!("Start running snipj with {} backend", engine.backend_name());

      let result = engine.execute(&ExecutionRequest::new(language.as_str(), code, stdin));
      print!("{}", result.output());
      let _ = std::io::stdout().flush();
      result.report();

      info!("Running snipj finished");
      Ok(match result.error() {
        Some(kind) => SnipBoxExit::Failed(kind),
        None => SnipBoxExit::Ok,
      })
    }
  }
}

fn main() -> SnipBoxExit {
  let cli = Cli::parse();
  match start(cli) {
    Ok(exit) => exit,
    Err(err) => SnipBoxExit::Err(err),
  }
}
