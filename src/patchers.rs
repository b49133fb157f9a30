// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Stamping version metadata into files.
//!
//! Each kind of file that can carry version information gets a [`Patcher`].
//! Patchers are stateless: they decide whether they apply to a path, and if
//! asked, they patch that file according to a [`VersionContext`]. The
//! [`PatcherRegistry`] holds the fixed, ordered set of them.

use std::path::{Path, PathBuf};

use crate::{errors::Result, version::VersionContext};

pub mod assembly_info;
pub mod installer;
pub mod resource;
pub mod sdk_project;
pub mod template;

/// What happened when a patcher was applied to a file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PatchOutcome {
    /// The file at this path (possibly not the input path) was rewritten.
    Modified(PathBuf),

    /// The file already contained the requested values.
    Unchanged,

    /// The patcher declined to touch the file, for the given reason.
    Skipped(String),
}

/// A trait for something that can stamp version metadata into one kind of
/// file.
pub trait Patcher: std::fmt::Debug + Send + Sync {
    /// A short human-readable name, for logging.
    fn name(&self) -> &'static str;

    /// Decide whether this patcher should be run on the file at `path`.
    ///
    /// This may read the file, but must not modify it. An `Err` means that
    /// the file couldn't be examined, not that it doesn't apply.
    fn is_applicable(&self, path: &Path) -> Result<bool>;

    /// Patch the file at `path`.
    ///
    /// The file should only be rewritten if something actually changes.
    fn apply(&self, path: &Path, ctx: &VersionContext) -> Result<PatchOutcome>;
}

/// Does `path` have one of the given extensions? Comparison is
/// case-insensitive, as it would be on Windows.
pub(crate) fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// The fixed, ordered collection of patchers.
#[derive(Debug)]
pub struct PatcherRegistry {
    patchers: Vec<Box<dyn Patcher>>,
}

impl Default for PatcherRegistry {
    fn default() -> Self {
        PatcherRegistry {
            patchers: vec![
                Box::new(assembly_info::AssemblyInfoPatcher),
                Box::new(sdk_project::SdkProjectPatcher),
                Box::new(resource::ResourcePatcher),
                Box::new(installer::InstallerPatcher),
                Box::new(template::TemplatePatcher::default()),
            ],
        }
    }
}

impl PatcherRegistry {
    /// Iterate over all patchers in registration order.
    pub fn patchers(&self) -> impl Iterator<Item = &dyn Patcher> {
        self.patchers.iter().map(|p| p.as_ref())
    }

    /// Find the patchers that apply to `path`, in registration order.
    ///
    /// An empty result is not an error here; it's up to the caller to decide
    /// whether it should be.
    pub fn resolve(&self, path: &Path) -> Result<Vec<&dyn Patcher>> {
        let mut matched = Vec::new();

        for p in self.patchers() {
            if p.is_applicable(path)? {
                matched.push(p);
            }
        }

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn extension_matching() {
        assert!(has_extension(Path::new("a/b/App.RC"), &["rc"]));
        assert!(has_extension(Path::new("x.csproj"), &["fsproj", "csproj"]));
        assert!(!has_extension(Path::new("x.csproj.user"), &["csproj"]));
        assert!(!has_extension(Path::new("Makefile"), &["rc"]));
    }

    #[test]
    fn registration_order() {
        let reg = PatcherRegistry::default();
        let names: Vec<_> = reg.patchers().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "assembly attributes",
                "SDK project",
                "native resource",
                "installer descriptor",
                "template",
            ]
        );
    }

    #[test]
    fn resolve_probes_content() {
        let dir = tempfile::tempdir().unwrap();
        let reg = PatcherRegistry::default();

        let with_block = dir.path().join("app.rc");
        fs::write(&with_block, "VS_VERSION_INFO VERSIONINFO\n FILEVERSION 1,0,0,0\n").unwrap();
        let names: Vec<_> = reg
            .resolve(&with_block)
            .unwrap()
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["native resource"]);

        let without_block = dir.path().join("icons.rc");
        fs::write(&without_block, "IDI_ICON1 ICON \"app.ico\"\n").unwrap();
        assert!(reg.resolve(&without_block).unwrap().is_empty());

        let unrelated = dir.path().join("notes.txt");
        fs::write(&unrelated, "AssemblyVersion(\"1.0\")").unwrap();
        assert!(reg.resolve(&unrelated).unwrap().is_empty());
    }

    #[test]
    fn resolve_reports_probe_failures() {
        let dir = tempfile::tempdir().unwrap();
        let reg = PatcherRegistry::default();
        let p = dir.path().join("Broken.csproj");
        fs::write(&p, "<Project Sdk=Microsoft.NET.Sdk><PropertyGroup/></Project>").unwrap();
        assert!(reg.resolve(&p).is_err());
    }
}
