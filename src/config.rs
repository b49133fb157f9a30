// Copyright 2020-2022 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! The buildstamp configuration file.
//!
//! Builds should be reproducible no matter who's running them, so the few
//! knobs that exist live in a `buildstamp.toml` file checked in next to the
//! sources, rather than in anyone's personal settings. The file is optional.

use anyhow::Context;
use std::{fs::File, io::Read, path::Path};

use crate::errors::{Error, Result};

/// The default name of the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "buildstamp.toml";

/// The configuration file structures as explicitly serialized into the TOML
/// format.
mod syntax {
    use serde::Deserialize;

    /// The toplevel configuration structure.
    #[derive(Clone, Debug, Default, Deserialize)]
    pub struct SerializedConfiguration {
        /// Settings for the package version consistency check.
        #[serde(default)]
        pub consistency: ConsistencyConfiguration,

        /// Settings for directory scans.
        #[serde(default)]
        pub scan: ScanConfiguration,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    pub struct ConsistencyConfiguration {
        /// Wildcard patterns of project names to leave out of the check.
        #[serde(default)]
        pub exclude: Vec<String>,

        /// The directory to search for dependency manifests. If unset, the
        /// check doesn't run unless a directory is given on the command line.
        pub intermediate_dir: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    pub struct ScanConfiguration {
        /// Extra directory names to skip, on top of hidden directories and
        /// build outputs.
        #[serde(default)]
        pub skip_dirs: Vec<String>,
    }
}

// The rest of this module normalizes the on-disk format into forms more useful
// at runtime.

pub use syntax::{ConsistencyConfiguration, ScanConfiguration};

#[derive(Clone, Debug, Default)]
pub struct ConfigurationFile {
    pub consistency: ConsistencyConfiguration,
    pub scan: ScanConfiguration,
}

impl ConfigurationFile {
    /// Load the configuration file at `path`. If it doesn't exist, the
    /// defaults are returned.
    pub fn get<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut f = match File::open(&path) {
            Ok(f) => f,

            Err(e) => {
                return if e.kind() == std::io::ErrorKind::NotFound {
                    Ok(Self::default())
                } else {
                    Err(Error::new(e).context(format!(
                        "failed to open config file `{}`",
                        path.as_ref().display()
                    )))
                }
            }
        };

        let mut text = String::new();
        f.read_to_string(&mut text)
            .with_context(|| format!("failed to read config file `{}`", path.as_ref().display()))?;

        Self::parse(&text).with_context(|| {
            format!(
                "could not parse config file `{}` as TOML",
                path.as_ref().display()
            )
        })
    }

    fn parse(text: &str) -> Result<Self> {
        let sercfg: syntax::SerializedConfiguration = toml::from_str(text)?;

        Ok(ConfigurationFile {
            consistency: sercfg.consistency,
            scan: sercfg.scan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigurationFile::get(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert!(cfg.consistency.exclude.is_empty());
        assert!(cfg.consistency.intermediate_dir.is_none());
        assert!(cfg.scan.skip_dirs.is_empty());
    }

    #[test]
    fn parses_sections() {
        let cfg = ConfigurationFile::parse(
            "[consistency]\n\
             exclude = [\"*.Tests\", \"Samples.*\"]\n\
             intermediate_dir = \"artifacts/obj\"\n\
             \n\
             [scan]\n\
             skip_dirs = [\"packages\"]\n",
        )
        .unwrap();

        assert_eq!(cfg.consistency.exclude, vec!["*.Tests", "Samples.*"]);
        assert_eq!(cfg.consistency.intermediate_dir.as_deref(), Some("artifacts/obj"));
        assert_eq!(cfg.scan.skip_dirs, vec!["packages"]);

        let partial = ConfigurationFile::parse("[scan]\nskip_dirs = []\n").unwrap();
        assert!(partial.consistency.exclude.is_empty());
    }

    #[test]
    fn bad_toml_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&p, "[consistency\nexclude = 1").unwrap();
        let e = ConfigurationFile::get(&p).unwrap_err();
        assert!(e.to_string().contains(DEFAULT_CONFIG_FILE));
    }
}
