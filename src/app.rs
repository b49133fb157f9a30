// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! The state of one stamping run.
//!
//! A [`Session`] is told which files and directories to work on, figures out
//! which patchers apply to each file, patches them all in order, and then
//! checks the package versions recorded in the build's intermediate
//! directory for consistency. Any failure stops the run.

use glob::Pattern;
use log::{debug, error, info};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

use crate::{
    consistency,
    errors::{Error, PrepError, Result},
    patchers::{PatchOutcome, Patcher, PatcherRegistry},
    version::VersionContext,
};

/// Directory names that are never scanned, besides hidden ones.
const BUILD_OUTPUT_DIRS: &[&str] = &["bin", "obj"];

/// Where a run is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Idle,
    Discovering,
    Patching,
    CheckingConsistency,
    Done,
    Failed,
}

/// What a completed run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Files that were rewritten (or generated), in order.
    pub modified: Vec<PathBuf>,

    /// The number of patcher applications that didn't need to change
    /// anything.
    pub unchanged: usize,

    /// The number of patcher applications that declined to run.
    pub skipped: usize,

    /// The number of dependency manifests that were checked, if the check
    /// ran at all.
    pub manifests_checked: Option<usize>,
}

struct QueuedFile<'a> {
    path: PathBuf,
    patchers: Vec<&'a dyn Patcher>,
}

/// One stamping run.
pub struct Session<'a> {
    registry: &'a PatcherRegistry,
    ctx: VersionContext,
    state: RunState,
    queue: Vec<QueuedFile<'a>>,
    seen: HashSet<PathBuf>,
    probe_failures: Vec<(PathBuf, String)>,
    skip_dirs: Vec<String>,
    intermediate_dir: Option<PathBuf>,
    excludes: Vec<Pattern>,
}

impl<'a> Session<'a> {
    pub fn new(registry: &'a PatcherRegistry, ctx: VersionContext) -> Self {
        Session {
            registry,
            ctx,
            state: RunState::Idle,
            queue: Vec::new(),
            seen: HashSet::new(),
            probe_failures: Vec::new(),
            skip_dirs: Vec::new(),
            intermediate_dir: None,
            excludes: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn version_context(&self) -> &VersionContext {
        &self.ctx
    }

    /// The files queued so far, in the order they'll be patched.
    pub fn queued_paths(&self) -> impl Iterator<Item = &Path> {
        self.queue.iter().map(|q| q.path.as_path())
    }

    /// Skip directories with this name during scans.
    pub fn skip_dir<S: Into<String>>(&mut self, name: S) -> &mut Self {
        self.skip_dirs.push(name.into());
        self
    }

    /// Check the dependency manifests under this directory after patching.
    pub fn intermediate_dir<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        self.intermediate_dir = Some(dir.into());
        self
    }

    /// Leave projects whose names match these patterns out of the
    /// consistency check.
    pub fn exclude(&mut self, patterns: Vec<Pattern>) -> &mut Self {
        self.excludes.extend(patterns);
        self
    }

    fn fail<T>(&mut self, e: Error) -> Result<T> {
        self.state = RunState::Failed;
        Err(e)
    }

    fn begin_discovery(&mut self) -> Result<()> {
        match self.state {
            RunState::Idle | RunState::Discovering => {
                self.state = RunState::Discovering;
                Ok(())
            }

            other => Err(anyhow::anyhow!(
                "cannot add more inputs to a run that is {:?}",
                other
            )),
        }
    }

    fn enqueue(&mut self, path: PathBuf, patchers: Vec<&'a dyn Patcher>) {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());

        if self.seen.insert(key) {
            debug!(
                "queued `{}` for: {}",
                path.display(),
                patchers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
            );
            self.queue.push(QueuedFile { path, patchers });
        }
    }

    /// Add a file or a directory, depending on what's at `path`.
    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        match fs::metadata(path) {
            Ok(md) if md.is_dir() => self.add_directory(path),
            Ok(_) => self.add_file(path),
            Err(e) => {
                let e = PrepError::Discovery {
                    path: path.to_owned(),
                    reason: e.to_string(),
                };
                self.fail(e.into())
            }
        }
    }

    /// Add a file that must be patched. It's an error if nothing knows how.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.begin_discovery()?;
        let path = path.as_ref();
        let registry = self.registry;

        let patchers = match registry.resolve(path) {
            Ok(p) => p,
            Err(e) => {
                let e = e.context(PrepError::Discovery {
                    path: path.to_owned(),
                    reason: "the file could not be examined".to_owned(),
                });
                return self.fail(e);
            }
        };

        if patchers.is_empty() {
            return self.fail(PrepError::NoApplicableProcessor(path.to_owned()).into());
        }

        self.enqueue(path.to_owned(), patchers);
        Ok(())
    }

    /// Recursively scan a directory, queuing every file that some patcher
    /// applies to.
    ///
    /// Hidden directories, build output directories, and any configured
    /// skip directories are not entered. If a file can't be examined, the
    /// problem is logged and the scan continues, but the run will fail before
    /// anything is patched.
    pub fn add_directory<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        self.begin_discovery()?;
        let dir = dir.as_ref();
        let registry = self.registry;
        let skip_dirs = self.skip_dirs.clone();

        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e, &skip_dirs));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let e = PrepError::Discovery {
                        path: e.path().unwrap_or(dir).to_owned(),
                        reason: e.to_string(),
                    };
                    return self.fail(e.into());
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.into_path();

            match registry.resolve(&path) {
                Ok(patchers) if patchers.is_empty() => {}
                Ok(patchers) => self.enqueue(path, patchers),
                Err(e) => {
                    error!("cannot examine `{}`: {}", path.display(), e);
                    self.probe_failures.push((path, e.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Patch everything that's been queued, then run the consistency check.
    pub fn run(&mut self) -> Result<RunSummary> {
        if let Some((path, reason)) = self.probe_failures.first() {
            let e = PrepError::Discovery {
                path: path.clone(),
                reason: format!(
                    "{} (and {} more file(s) could not be examined)",
                    reason,
                    self.probe_failures.len() - 1
                ),
            };
            return self.fail(e.into());
        }

        self.state = RunState::Patching;

        let mut summary = match self.patch_all() {
            Ok(s) => s,
            Err(e) => return self.fail(e),
        };

        self.state = RunState::CheckingConsistency;

        summary.manifests_checked = match self.check_consistency() {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };

        self.state = RunState::Done;
        info!(
            "{} file(s) updated, {} already up to date, {} skipped",
            summary.modified.len(),
            summary.unchanged,
            summary.skipped
        );
        Ok(summary)
    }

    fn patch_all(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for item in &self.queue {
            for p in &item.patchers {
                let outcome = p.apply(&item.path, &self.ctx).map_err(|e| {
                    e.context(format!(
                        "failed to apply the {} patcher to `{}`",
                        p.name(),
                        item.path.display()
                    ))
                })?;

                match outcome {
                    PatchOutcome::Modified(written) => {
                        info!("{}: updated `{}`", p.name(), written.display());
                        summary.modified.push(written);
                    }

                    PatchOutcome::Unchanged => {
                        debug!("{}: `{}` is already up to date", p.name(), item.path.display());
                        summary.unchanged += 1;
                    }

                    PatchOutcome::Skipped(reason) => {
                        info!("{}: skipped `{}`: {}", p.name(), item.path.display(), reason);
                        summary.skipped += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    fn check_consistency(&self) -> Result<Option<usize>> {
        let dir = match self.intermediate_dir {
            Some(ref d) => d,
            None => {
                debug!("no intermediate directory given; not checking package versions");
                return Ok(None);
            }
        };

        let manifests = consistency::collect_manifests(dir)?;
        let ledger = consistency::check(&manifests, &self.excludes)?;
        info!(
            "{} dependency manifest(s) agree on {} package version(s)",
            manifests.len(),
            ledger.len()
        );
        Ok(Some(manifests.len()))
    }
}

fn is_skipped_dir(entry: &DirEntry, extra: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }

    let name = entry.file_name().to_string_lossy();

    name.starts_with('.')
        || BUILD_OUTPUT_DIRS.iter().any(|d| name.eq_ignore_ascii_case(d))
        || extra.iter().any(|d| *d == name)
}
