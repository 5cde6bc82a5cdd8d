pub use backend::{
  BackendOutcome, BackendRun, DockerBackend, ExecutionBackend, Invocation, Limits, ProcessBackend,
};
pub use config::{timeout_from_secs, BackendKind, EngineConfig};
pub use engine::{Engine, EngineBuilder, ExecutionRequest, ExecutionResult};
pub use error::{ErrorKind, SnipBoxError, SnipBoxExit};
pub use host_path::{normalize_host_path, HostPathResolver};
pub use language::{languages, resolve as resolve_language, LanguageSpec};
pub use utils::default_format;
pub use workspace::{Workspace, WorkspaceManager};

mod backend;
mod config;
mod engine;
mod error;
mod host_path;
mod language;
mod utils;
mod workspace;
