//! One invocation of `make`, `remove` or `latest`.
//!
//! The scan phase plans every incoming file (or every discovered dataset) on
//! the worker pool and records the result in a shared [`DatasetIndex`].
//! Once the pool has joined, the finalize phase runs on the calling thread:
//! uniqueness check, the selected action, then empty-directory pruning.

use crate::cache::{CachedRun, ScratchCache};
use crate::collector::{collect_files, discover_datasets};
use crate::config::ScanConfig;
use crate::drs::display::{list_table, render_tree};
use crate::drs::duplicate::DuplicateResolver;
use crate::drs::executor::MigrationExecutor;
use crate::drs::facets::FacetResolver;
use crate::drs::hashing::{ChecksumAlgorithm, ChecksumStore};
use crate::drs::latest::LatestRepairer;
use crate::drs::operation::{MigrationMode, MigrationOperation, OperationPlanner};
use crate::drs::path_planner::{DatasetKey, DatasetLayout, PathPlanner};
use crate::drs::remover::VersionRemover;
use crate::drs::trace::TraceSink;
use crate::drs::tree::{DatasetIndex, DrsTree, FileRecord};
use crate::drs::version::Version;
use crate::drs::{Action, Command};
use crate::error::{DrsError, Result};
use crate::scheduler::{OutputBuffer, RunCounters, WorkOutcome, WorkerPool};
use colored::Colorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub command: Command,
    pub action: Action,
    pub root: PathBuf,
    pub directories: Vec<PathBuf>,
    /// Version to build or remove; `remove` defaults to the newest one.
    pub version: Option<Version>,
    pub mode: MigrationMode,
    /// `None` disables checksumming (size-only duplicate detection).
    pub checksum: Option<ChecksumAlgorithm>,
    /// Salt digests with the file name.
    pub checksum_filename: bool,
    pub checksums_from: Option<PathBuf>,
    pub upgrade_from_latest: bool,
    pub ignore_from_incoming: Option<PathBuf>,
    /// Names whose `latest` entry is dropped under `upgrade_from_latest`.
    pub ignore_from_latest: Option<PathBuf>,
    pub filename_filter: Option<String>,
    /// Facet resolver setup (config path, overrides), compared for cache reuse.
    pub resolver_settings: BTreeMap<String, String>,
    pub max_processes: usize,
    pub rescan: bool,
    pub quiet: bool,
    pub commands_file: Option<PathBuf>,
    pub overwrite_commands_file: bool,
    /// Scratch cache location; `None` disables caching.
    pub cache_path: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(
        command: Command,
        action: Action,
        root: impl Into<PathBuf>,
        directories: Vec<PathBuf>,
    ) -> Self {
        Self {
            command,
            action,
            root: root.into(),
            directories,
            version: None,
            mode: MigrationMode::Move,
            checksum: Some(ChecksumAlgorithm::Sha256),
            checksum_filename: false,
            checksums_from: None,
            upgrade_from_latest: false,
            ignore_from_incoming: None,
            ignore_from_latest: None,
            filename_filter: None,
            resolver_settings: BTreeMap::new(),
            max_processes: ScanConfig::DEFAULT_MAX_PROCESSES,
            rescan: false,
            quiet: false,
            commands_file: None,
            overwrite_commands_file: false,
            cache_path: None,
        }
    }
}

/// Arguments that decide whether a cached scan is still valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArguments {
    pub command: Command,
    pub root: PathBuf,
    pub directories: Vec<PathBuf>,
    pub version: Option<Version>,
    pub mode: MigrationMode,
    pub checksum: Option<ChecksumAlgorithm>,
    pub checksum_filename: bool,
    pub checksums_from: Option<PathBuf>,
    pub upgrade_from_latest: bool,
    pub ignore_from_incoming: Option<PathBuf>,
    pub ignore_from_latest: Option<PathBuf>,
    pub filename_filter: Option<String>,
    pub resolver_settings: BTreeMap<String, String>,
}

impl From<&RunOptions> for RunArguments {
    fn from(options: &RunOptions) -> Self {
        Self {
            command: options.command,
            root: options.root.clone(),
            directories: options.directories.clone(),
            version: options.version.clone(),
            mode: options.mode,
            checksum: options.checksum,
            checksum_filename: options.checksum_filename,
            checksums_from: options.checksums_from.clone(),
            upgrade_from_latest: options.upgrade_from_latest,
            ignore_from_incoming: options.ignore_from_incoming.clone(),
            ignore_from_latest: options.ignore_from_latest.clone(),
            filename_filter: options.filename_filter.clone(),
            resolver_settings: options.resolver_settings.clone(),
        }
    }
}

/// Scan result for one incoming file or dataset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub source: PathBuf,
    pub outcome: WorkOutcome,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub total: usize,
    pub successes: usize,
    pub skips: usize,
    /// Items that failed during the scan.
    pub errors: usize,
    /// Operations that failed during execution.
    pub execution_errors: usize,
}

impl RunReport {
    fn from_results(results: &[FileResult]) -> Self {
        let mut report = RunReport {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.outcome {
                WorkOutcome::Success => report.successes += 1,
                WorkOutcome::Skip => report.skips += 1,
                WorkOutcome::Fatal => report.errors += 1,
            }
        }
        report
    }

    pub fn error_count(&self) -> usize {
        self.errors + self.execution_errors
    }

    /// 0 on success, otherwise the number of failures.
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.error_count()).unwrap_or(i32::MAX)
    }

    /// Colored summary: green without errors, red when nothing succeeded.
    pub fn summary(&self) -> String {
        let text = format!(
            "Number of success(es): {}\nNumber of error(s): {}",
            self.successes,
            self.error_count()
        );
        if self.error_count() == 0 {
            text.green().to_string()
        } else if self.successes == 0 {
            text.red().to_string()
        } else {
            text.yellow().to_string()
        }
    }
}

/// Full error chain, one cause per line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("  caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}

fn absolute_root(root: &Path) -> Result<PathBuf> {
    match fs::canonicalize(root) {
        Ok(path) => Ok(path),
        Err(_) => std::path::absolute(root).map_err(|e| DrsError::io_with_path(e, root)),
    }
}

fn load_ignore_list(path: &Path) -> Result<HashSet<String>> {
    let contents = fs::read_to_string(path).map_err(|e| DrsError::io_with_path(e, path))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            Path::new(line)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| line.to_string())
        })
        .collect())
}

/// Read-only settings shared by the scan workers of a `make` run.
struct MakeContext<'a> {
    resolver: &'a dyn FacetResolver,
    paths: PathPlanner,
    duplicates: DuplicateResolver,
    planner: OperationPlanner,
    ignored: HashSet<String>,
    index: &'a DatasetIndex,
}

impl MakeContext<'_> {
    fn process(&self, source: &Path) -> Result<WorkOutcome> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| DrsError::resolution(source, "no file name"))?;
        if self.ignored.contains(&file_name) {
            debug!("Ignoring {} (listed in ignore file)", source.display());
            return Ok(WorkOutcome::Skip);
        }

        let resolved = self.resolver.resolve(source)?;
        let paths = self
            .paths
            .plan(&resolved.dataset_key, &resolved.version, &file_name)?;
        let layout = DatasetLayout::new(&paths.dataset_dir);
        layout.require_per_file_latest()?;
        let latest_version = layout.latest_version()?;

        let (compare_version, newest_holder) = if self.planner.upgrade_from_latest() {
            let holder = layout.newest_version_with(&file_name, None)?;
            (holder.clone(), holder)
        } else {
            (latest_version.clone(), latest_version.clone())
        };
        let compare_dir = compare_version.as_ref().map(|v| layout.version_dir(v));
        let check = self
            .duplicates
            .check_with_digest(source, compare_dir.as_deref())?;
        let is_newest = newest_holder.map_or(true, |v| resolved.version > v);

        let plan = self
            .planner
            .plan(source, &paths, check.is_duplicate, is_newest);
        let size = fs::metadata(source)
            .map_err(|e| DrsError::io_with_path(e, source))?
            .len();
        debug!(
            "{} -> {} ({} operations, duplicate: {})",
            source.display(),
            plan.destination.display(),
            plan.operations.len(),
            plan.is_duplicate
        );

        let key = resolved.dataset_key;
        self.index.with_tree(|tree| -> Result<()> {
            for operation in &plan.operations {
                tree.check_leaf_free(operation)?;
            }
            tree.add_path(
                &key,
                paths.dataset_dir.clone(),
                latest_version,
                resolved.version,
            );
            tree.append_path(
                &key,
                FileRecord {
                    source: Some(source.to_path_buf()),
                    destination: plan.destination,
                    is_duplicate: plan.is_duplicate,
                    checksum: check.checksum,
                    size,
                },
            )?;
            for operation in plan.operations {
                tree.insert_operation(&key, operation, false)?;
            }
            Ok(())
        })??;
        Ok(WorkOutcome::Success)
    }
}

/// Drives one run from scan to action.
pub struct Orchestrator {
    options: RunOptions,
    resolver: Option<Arc<dyn FacetResolver>>,
    sink: TraceSink,
}

impl Orchestrator {
    pub fn new(mut options: RunOptions) -> Self {
        if options.ignore_from_latest.is_some() && !options.upgrade_from_latest {
            warn!("--ignore-from-latest forces --upgrade-from-latest");
            options.upgrade_from_latest = true;
        }
        Self {
            options,
            resolver: None,
            sink: TraceSink::Stdout,
        }
    }

    /// Facet resolver used by `make`.
    pub fn with_resolver(mut self, resolver: Arc<dyn FacetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Where trace and listing lines go.
    pub fn with_sink(mut self, sink: TraceSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn run(&self) -> Result<RunReport> {
        let options = &self.options;
        let root = absolute_root(&options.root)?;
        let sink = self.output_sink()?;

        if options.command == Command::Make && options.checksum.is_none() {
            warn!("Checksumming disabled: duplicated files will not be detected properly");
        }

        let cache = options
            .cache_path
            .as_ref()
            .map(|path| ScratchCache::new(path.clone()));
        let arguments = RunArguments::from(options);
        let reused = cache
            .as_ref()
            .and_then(|cache| cache.reusable(&arguments, options.action, options.rescan));

        let (tree, results) = match reused {
            Some(cached) => {
                warn!("Skip incoming files scan (use --rescan to force it), using cached DRS tree");
                (cached.index, cached.results)
            }
            None => {
                let (tree, results) = self.scan(&root)?;
                if let Some(cache) = &cache {
                    let run = CachedRun {
                        arguments,
                        index: tree,
                        results,
                    };
                    if let Err(e) = cache.store(&run) {
                        warn!("Could not write scratch cache: {}", e);
                    }
                    (run.index, run.results)
                } else {
                    (tree, results)
                }
            }
        };

        let mut report = RunReport::from_results(&results);
        if report.successes == 0 {
            info!("Nothing to do: no item was planned successfully");
            return Ok(report);
        }

        tree.check_uniqueness()?;
        report.execution_errors = self.finalize(&tree, &sink)?;
        sink.flush()?;
        Ok(report)
    }

    fn output_sink(&self) -> Result<TraceSink> {
        let options = &self.options;
        match (&options.commands_file, options.action) {
            (Some(path), Action::Todo) => TraceSink::to_file(path, options.overwrite_commands_file),
            (Some(path), _) => {
                warn!(
                    "--commands-file {} ignored: only used with the todo action",
                    path.display()
                );
                Ok(self.sink.clone())
            }
            (None, _) => Ok(self.sink.clone()),
        }
    }

    fn scan(&self, root: &Path) -> Result<(DrsTree, Vec<FileResult>)> {
        let options = &self.options;
        let index = DatasetIndex::new(DrsTree::new(root, options.command));
        let pool = WorkerPool::new(options.max_processes);
        let output = OutputBuffer::default();

        let items = match options.command {
            Command::Make => {
                let filter = options
                    .filename_filter
                    .as_deref()
                    .map(Regex::new)
                    .transpose()?;
                collect_files(&options.directories, filter.as_ref())?
            }
            Command::Remove | Command::Latest => discover_datasets(&options.directories)?,
        };
        info!("Scanning {} item(s)", items.len());
        let counters = RunCounters::new(items.len());

        let results = match options.command {
            Command::Make => {
                let context = self.make_context(root, &index)?;
                pool.run(&items, |source| {
                    Self::record(source, context.process(source), &counters, &output)
                })?
            }
            Command::Remove | Command::Latest => pool.run(&items, |dataset_dir| {
                let outcome = self.plan_dataset(root, dataset_dir, &index);
                Self::record(dataset_dir, outcome, &counters, &output)
            })?,
        };

        for line in output.drain() {
            error!("{}", line);
        }
        let snapshot = counters.snapshot();
        debug!(
            "Scan finished: {} success(es), {} skip(s), {} error(s)",
            snapshot.successes, snapshot.skips, snapshot.errors
        );
        let mut tree = index.into_tree()?;
        if let Some(path) = &options.ignore_from_latest {
            Self::drop_ignored_latest(&mut tree, &load_ignore_list(path)?)?;
        }
        Ok((tree, results))
    }

    /// Plan the removal of `latest/<name>` for every ignored name the run
    /// does not publish again.
    fn drop_ignored_latest(tree: &mut DrsTree, ignored: &HashSet<String>) -> Result<()> {
        let mut removals = Vec::new();
        for state in tree.datasets() {
            let layout = DatasetLayout::new(&state.dataset_dir);
            let incoming: HashSet<String> =
                state.files.iter().filter_map(FileRecord::file_name).collect();
            for name in layout.latest_entries()?.into_keys() {
                if ignored.contains(&name) && !incoming.contains(&name) {
                    debug!("Dropping {} from latest of {}", name, state.key);
                    removals.push((state.key.clone(), layout.latest_dir().join(name)));
                }
            }
        }
        for (key, path) in removals {
            tree.insert_operation(&key, MigrationOperation::remove(path), true)?;
        }
        Ok(())
    }

    fn record(
        source: &Path,
        outcome: Result<WorkOutcome>,
        counters: &RunCounters,
        output: &OutputBuffer,
    ) -> FileResult {
        let outcome = outcome.unwrap_or_else(|e| {
            output.push(format!("SKIPPED {}\n{}", source.display(), error_chain(&e)));
            WorkOutcome::Fatal
        });
        let done = counters.record(outcome);
        debug!("[{}/{}] {}", done, counters.snapshot().total, source.display());
        FileResult {
            source: source.to_path_buf(),
            outcome,
        }
    }

    fn make_context<'a>(&'a self, root: &Path, index: &'a DatasetIndex) -> Result<MakeContext<'a>> {
        let options = &self.options;
        let resolver = self.resolver.as_deref().ok_or_else(|| DrsError::Config {
            message: "make requires a facet resolver".to_string(),
        })?;
        let store = match &options.checksums_from {
            Some(path) => ChecksumStore::load(path)?,
            None => ChecksumStore::default(),
        };
        let ignored = match &options.ignore_from_incoming {
            Some(path) => load_ignore_list(path)?,
            None => HashSet::new(),
        };
        Ok(MakeContext {
            resolver,
            paths: PathPlanner::new(root),
            duplicates: DuplicateResolver::new(options.checksum)
                .with_filename_salt(options.checksum_filename)
                .with_store(Arc::new(store)),
            planner: OperationPlanner::new(options.mode, options.upgrade_from_latest),
            ignored,
            index,
        })
    }

    fn plan_dataset(&self, root: &Path, dataset_dir: &Path, index: &DatasetIndex) -> Result<WorkOutcome> {
        let relative = dataset_dir.strip_prefix(root).map_err(|_| DrsError::Config {
            message: format!(
                "{} is not below the DRS root {}",
                dataset_dir.display(),
                root.display()
            ),
        })?;
        let key = DatasetKey::from_relative(relative)?;
        let plan = match self.options.command {
            Command::Remove => {
                VersionRemover::new(self.options.version.clone()).plan(key, dataset_dir.to_path_buf())?
            }
            _ => LatestRepairer.plan(key, dataset_dir.to_path_buf())?,
        };
        if plan.operations.is_empty() {
            debug!("{}: nothing to change", dataset_dir.display());
            return Ok(WorkOutcome::Skip);
        }
        index.with_tree(|tree| tree.apply_plan(plan))??;
        Ok(WorkOutcome::Success)
    }

    /// Run the selected action; returns the number of failed operations.
    fn finalize(&self, tree: &DrsTree, sink: &TraceSink) -> Result<usize> {
        match self.options.action {
            Action::List => {
                for line in list_table(tree) {
                    sink.emit(&line)?;
                }
                Ok(0)
            }
            Action::Tree => {
                for line in render_tree(tree) {
                    sink.emit(&line)?;
                }
                Ok(0)
            }
            Action::Todo => {
                let mut executor = MigrationExecutor::new(tree.root(), sink.clone()).dry_run(true);
                self.apply(tree, &mut executor)
            }
            Action::Upgrade => {
                let mut executor =
                    MigrationExecutor::new(tree.root(), sink.clone()).quiet(self.options.quiet);
                let duplicates = duplicate_removals(tree);
                executor.preflight(
                    tree.leaves(None)
                        .filter_map(|node| node.leaf.as_ref())
                        .chain(duplicates.iter()),
                )?;
                let failures = self.apply(tree, &mut executor)?;
                let pruned = executor.prune_empty_dirs(tree.directories_bottom_up())?;
                debug!("Pruned {} empty directories", pruned);
                Ok(failures)
            }
        }
    }

    fn apply(&self, tree: &DrsTree, executor: &mut MigrationExecutor) -> Result<usize> {
        let mut failures = 0;
        for node in tree.leaves(None) {
            let Some(operation) = &node.leaf else {
                continue;
            };
            if let Err(e) = executor.execute(operation) {
                if e.aborts_action() {
                    return Err(e);
                }
                error!("{}", error_chain(&e));
                failures += 1;
            }
        }
        for operation in duplicate_removals(tree) {
            if let Err(e) = executor.execute(&operation) {
                error!("{}", error_chain(&e));
                failures += 1;
            }
        }
        executor.flush()?;
        Ok(failures)
    }
}

fn duplicate_removals(tree: &DrsTree) -> Vec<MigrationOperation> {
    tree.datasets()
        .flat_map(|state| state.duplicates.iter())
        .map(MigrationOperation::remove)
        .collect()
}
