pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod lock;
pub mod options;
pub mod orchestrator;
pub mod parser;
pub mod schema;
pub mod state;
pub mod ui;
pub mod writer;

pub use cli::{Cli, Commands};
pub use config::SyncConfig;
pub use error::{Error, ErrorCode, Result};
pub use options::{OptionSet, Resolution};
pub use orchestrator::{DomainStatus, Orchestrator, RunOutcome, RunReport};
pub use ui::{ConsoleUi, Phase, SilentUi, Ui};
