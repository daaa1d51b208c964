//! DRS tree - versioned Data Reference Syntax trees for scientific datasets.
//!
//! Incoming files are mapped to a dataset key and version through a project
//! template, then published under
//!
//! ```text
//! <root>/<dataset>/files/d<N>/<file>       real data
//! <root>/<dataset>/v<N>/<file>             -> ../files/d<N>/<file>
//! <root>/<dataset>/latest/<file>           -> ../v<N>/<file>
//! ```
//!
//! A run is planned first (list, tree, todo) and only touches the disk on
//! `upgrade`. Existing versions can be removed and `latest` links rebuilt.
//!
//! # Example
//!
//! ```rust,ignore
//! use drstree_core::{Action, Command, Orchestrator, RunOptions};
//!
//! let options = RunOptions::new(Command::Latest, Action::Upgrade, "/drs", vec!["/drs".into()]);
//! let report = Orchestrator::new(options).run()?;
//! println!("{}", report.summary());
//! ```

pub mod cache;
pub mod collector;
pub mod config;
pub mod drs;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod scheduler;

// Re-export commonly used types
pub use cache::{CachedRun, ScratchCache};
pub use config::ProjectConfig;
pub use drs::{
    Action, ChecksumAlgorithm, Command, DrsTree, FacetResolver, MigrationMode, TemplateResolver,
    TraceSink, Version,
};
pub use error::{DrsError, ErrorCategory, Result};
pub use orchestrator::{FileResult, Orchestrator, RunArguments, RunOptions, RunReport};
pub use scheduler::WorkOutcome;
