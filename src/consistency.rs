// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Checking that package versions agree across projects.
//!
//! Every .NET project resolves its package dependencies independently, and
//! records the result in `obj/project.assets.json`. When projects that end up
//! in the same deployment resolve the same package to different versions, the
//! build is broken in ways that can be very hard to diagnose later. So we
//! gather all of those manifests and fold them into a single ledger of
//! `framework → package → version`, stopping at the first disagreement.

use glob::Pattern;
use log::debug;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;
use walkdir::WalkDir;

use crate::{
    atry,
    errors::{PrepError, Result},
    textfile::TextFile,
};

/// The name of the files that record a project's resolved dependencies.
pub const ASSETS_FILE_NAME: &str = "project.assets.json";

/// The subset of the `project.assets.json` format that we care about.
mod syntax {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct AssetsFile {
        #[serde(default)]
        pub targets: BTreeMap<String, BTreeMap<String, TargetEntry>>,

        #[serde(default)]
        pub project: Option<ProjectInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct TargetEntry {
        #[serde(rename = "type", default)]
        pub kind: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ProjectInfo {
        #[serde(default)]
        pub restore: Option<RestoreInfo>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RestoreInfo {
        #[serde(default)]
        pub project_name: Option<String>,
    }
}

/// The external package versions resolved by one project.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencyManifest {
    /// The name identifying the project.
    pub project: String,

    /// Framework moniker → package name → version.
    pub frameworks: BTreeMap<String, BTreeMap<String, String>>,
}

impl DependencyManifest {
    pub fn new<S: Into<String>>(project: S) -> Self {
        DependencyManifest {
            project: project.into(),
            frameworks: BTreeMap::new(),
        }
    }

    /// Record a package resolution.
    pub fn insert<F, P, V>(&mut self, framework: F, package: P, version: V) -> &mut Self
    where
        F: Into<String>,
        P: Into<String>,
        V: Into<String>,
    {
        self.frameworks
            .entry(framework.into())
            .or_default()
            .insert(package.into(), version.into());
        self
    }

    /// Parse the text of an assets file.
    ///
    /// If the file doesn't name its project, `fallback_project` is used.
    /// References to other projects in the same build are left out.
    pub fn from_assets_json(text: &str, fallback_project: &str) -> Result<Self> {
        let assets: syntax::AssetsFile = serde_json::from_str(text)?;

        let project = assets
            .project
            .and_then(|p| p.restore)
            .and_then(|r| r.project_name)
            .unwrap_or_else(|| fallback_project.to_owned());

        let mut manifest = DependencyManifest::new(project);

        for (framework, entries) in assets.targets {
            // Keep the framework even if nothing in it survives, so that it's
            // clear that it was looked at.
            let packages = manifest.frameworks.entry(framework).or_default();

            for (key, entry) in entries {
                if entry.kind.as_deref() == Some("project") {
                    continue;
                }

                match key.split_once('/') {
                    Some((name, version)) => {
                        packages.insert(name.to_owned(), version.to_owned());
                    }

                    None => debug!("ignoring unversioned dependency key `{}`", key),
                }
            }
        }

        Ok(manifest)
    }

    /// Load an assets file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let tf = TextFile::load(path)?;

        // The usual layout is `<project dir>/obj/project.assets.json`.
        let fallback = path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(atry!(
            Self::from_assets_json(tf.text(), &fallback);
            ["malformed dependency manifest `{}`", path.display()]
        ))
    }
}

/// Two projects disagree about which version of a package to use.
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error(
    "inconsistent versions of package `{package}` for framework `{framework}`: \
     project `{first_project}` uses {first_version}, but project `{second_project}` uses {second_version}"
)]
pub struct ConsistencyConflict {
    pub package: String,
    pub framework: String,
    pub first_version: String,
    pub first_project: String,
    pub second_version: String,
    pub second_project: String,
}

/// Where a package version in the ledger came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerEntry {
    pub version: String,
    pub project: String,
}

/// The agreed-upon package versions, per framework.
#[derive(Debug, Default)]
pub struct ConsistencyLedger {
    frameworks: BTreeMap<String, BTreeMap<String, LedgerEntry>>,
}

impl ConsistencyLedger {
    pub fn get(&self, framework: &str, package: &str) -> Option<&LedgerEntry> {
        self.frameworks.get(framework)?.get(package)
    }

    /// The total number of (framework, package) pairs recorded.
    pub fn len(&self) -> usize {
        self.frameworks.values().map(|p| p.len()).sum()
    }

    /// Add everything from one manifest, or report the first disagreement
    /// with what's already here.
    fn absorb(mut self, manifest: &DependencyManifest) -> std::result::Result<Self, ConsistencyConflict> {
        for (framework, packages) in &manifest.frameworks {
            // Platform-qualified entries like `net6.0/win-x64` sit alongside
            // an unqualified one with the same package list.
            if framework.contains('/') {
                debug!(
                    "skipping platform-specific framework `{}` of project `{}`",
                    framework, manifest.project
                );
                continue;
            }

            let ledger = self.frameworks.entry(framework.clone()).or_default();

            for (package, version) in packages {
                match ledger.get(package) {
                    Some(prev) if prev.version != *version => {
                        return Err(ConsistencyConflict {
                            package: package.clone(),
                            framework: framework.clone(),
                            first_version: prev.version.clone(),
                            first_project: prev.project.clone(),
                            second_version: version.clone(),
                            second_project: manifest.project.clone(),
                        });
                    }

                    Some(_) => {}

                    None => {
                        ledger.insert(
                            package.clone(),
                            LedgerEntry {
                                version: version.clone(),
                                project: manifest.project.clone(),
                            },
                        );
                    }
                }
            }
        }

        Ok(self)
    }
}

/// Fold manifests into a ledger, in order, failing at the first conflict.
///
/// Manifests whose project name matches any of `excludes` are skipped
/// entirely.
pub fn check<'a, I>(manifests: I, excludes: &[Pattern]) -> std::result::Result<ConsistencyLedger, ConsistencyConflict>
where
    I: IntoIterator<Item = &'a DependencyManifest>,
{
    manifests
        .into_iter()
        .filter(|m| {
            let excluded = excludes.iter().any(|p| p.matches(&m.project));

            if excluded {
                debug!("excluding project `{}` from the consistency check", m.project);
            }

            !excluded
        })
        .try_fold(ConsistencyLedger::default(), |ledger, m| ledger.absorb(m))
}

/// Compile exclusion wildcards.
pub fn compile_excludes<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    let mut compiled = Vec::with_capacity(patterns.len());

    for p in patterns {
        let p = p.as_ref();
        compiled.push(atry!(
            Pattern::new(p);
            ["invalid exclusion pattern `{}`", p]
        ));
    }

    Ok(compiled)
}

/// Find all of the assets files under `dir`, sorted by path.
pub fn find_manifests(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| PrepError::Discovery {
            path: e.path().unwrap_or(dir).to_owned(),
            reason: e.to_string(),
        })?;

        if entry.file_type().is_file() && entry.file_name() == ASSETS_FILE_NAME {
            paths.push(entry.into_path());
        }
    }

    paths.sort();
    Ok(paths)
}

/// Load all of the dependency manifests under `dir`.
pub fn collect_manifests(dir: &Path) -> Result<Vec<DependencyManifest>> {
    find_manifests(dir)?
        .iter()
        .map(|p| DependencyManifest::load(p))
        .collect()
}
