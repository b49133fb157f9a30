// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Version numbers.
//!
//! The versions that we stamp into files are opaque strings supplied from
//! outside. Some file formats need them in a numeric form, though, so this
//! module also knows how to break dotted version strings into components.

use thiserror::Error as ThisError;

use crate::{env::maybe_var, errors::Result};

/// The individual version fields that patchers know how to stamp.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VersionField {
    Version,
    AssemblyVersion,
    FileVersion,
    PackageVersion,
    InformationalVersion,
}

impl VersionField {
    pub const ALL: [VersionField; 5] = [
        VersionField::Version,
        VersionField::AssemblyVersion,
        VersionField::FileVersion,
        VersionField::PackageVersion,
        VersionField::InformationalVersion,
    ];

    /// The name of this field as it appears in MSBuild project files.
    pub fn msbuild_name(self) -> &'static str {
        match self {
            VersionField::Version => "Version",
            VersionField::AssemblyVersion => "AssemblyVersion",
            VersionField::FileVersion => "FileVersion",
            VersionField::PackageVersion => "PackageVersion",
            VersionField::InformationalVersion => "InformationalVersion",
        }
    }

    /// The environment variable that the CLI reads this field from.
    pub fn env_var(self) -> &'static str {
        match self {
            VersionField::Version => "BUILDSTAMP_VERSION",
            VersionField::AssemblyVersion => "BUILDSTAMP_ASSEMBLY_VERSION",
            VersionField::FileVersion => "BUILDSTAMP_FILE_VERSION",
            VersionField::PackageVersion => "BUILDSTAMP_PACKAGE_VERSION",
            VersionField::InformationalVersion => "BUILDSTAMP_INFORMATIONAL_VERSION",
        }
    }
}

/// The set of version strings applied during one run.
///
/// Every field is optional: an absent field means "leave whatever is in the
/// file alone", not "clear it". Once built, a context is never modified.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VersionContext {
    version: Option<String>,
    assembly_version: Option<String>,
    file_version: Option<String>,
    package_version: Option<String>,
    informational_version: Option<String>,
}

impl VersionContext {
    /// Start building a new context.
    pub fn builder() -> VersionContextBuilder {
        VersionContextBuilder::default()
    }

    /// Build a context from the `BUILDSTAMP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut b = Self::builder();

        for field in VersionField::ALL.iter().copied() {
            if let Some(v) = maybe_var(field.env_var())? {
                b.set(field, v);
            }
        }

        Ok(b.finish())
    }

    pub fn get(&self, field: VersionField) -> Option<&str> {
        match field {
            VersionField::Version => self.version.as_deref(),
            VersionField::AssemblyVersion => self.assembly_version.as_deref(),
            VersionField::FileVersion => self.file_version.as_deref(),
            VersionField::PackageVersion => self.package_version.as_deref(),
            VersionField::InformationalVersion => self.informational_version.as_deref(),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn assembly_version(&self) -> Option<&str> {
        self.assembly_version.as_deref()
    }

    pub fn file_version(&self) -> Option<&str> {
        self.file_version.as_deref()
    }

    pub fn package_version(&self) -> Option<&str> {
        self.package_version.as_deref()
    }

    pub fn informational_version(&self) -> Option<&str> {
        self.informational_version.as_deref()
    }

    /// True if this context would not patch anything at all.
    pub fn is_empty(&self) -> bool {
        VersionField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// A builder for a [`VersionContext`].
#[derive(Debug, Default)]
pub struct VersionContextBuilder {
    inner: VersionContext,
}

impl VersionContextBuilder {
    pub fn set<S: Into<String>>(&mut self, field: VersionField, value: S) -> &mut Self {
        let value = Some(value.into());

        match field {
            VersionField::Version => self.inner.version = value,
            VersionField::AssemblyVersion => self.inner.assembly_version = value,
            VersionField::FileVersion => self.inner.file_version = value,
            VersionField::PackageVersion => self.inner.package_version = value,
            VersionField::InformationalVersion => self.inner.informational_version = value,
        }

        self
    }

    pub fn version<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.set(VersionField::Version, v)
    }

    pub fn assembly_version<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.set(VersionField::AssemblyVersion, v)
    }

    pub fn file_version<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.set(VersionField::FileVersion, v)
    }

    pub fn package_version<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.set(VersionField::PackageVersion, v)
    }

    pub fn informational_version<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.set(VersionField::InformationalVersion, v)
    }

    pub fn finish(&self) -> VersionContext {
        self.inner.clone()
    }
}

/// A problem converting a dotted version string into numbers.
#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum NumericVersionError {
    #[error("the version string is empty")]
    Empty,

    #[error("version `{version}` has more than {max} components")]
    TooManyComponents { version: String, max: usize },

    #[error("component `{component}` of version `{version}` is not an integer between 0 and {max}")]
    BadComponent {
        version: String,
        component: String,
        max: u32,
    },
}

fn split_components(version: &str, max: u32) -> std::result::Result<Vec<u32>, NumericVersionError> {
    if version.is_empty() {
        return Err(NumericVersionError::Empty);
    }

    version
        .split('.')
        .map(|piece| match piece.parse::<u32>() {
            Ok(n) if n <= max => Ok(n),
            _ => Err(NumericVersionError::BadComponent {
                version: version.to_owned(),
                component: piece.to_owned(),
                max,
            }),
        })
        .collect()
}

/// Convert a version into the four 16-bit numbers used by Windows binary
/// version stamps.
///
/// Any pre-release or build metadata suffix (starting with `-` or `+`) is
/// ignored, and missing trailing components become zero, so that `1.2-beta`
/// becomes `[1, 2, 0, 0]`.
pub fn four_part_numeric(version: &str) -> std::result::Result<[u16; 4], NumericVersionError> {
    let core = match version.find(|c: char| c == '-' || c == '+') {
        Some(idx) => &version[..idx],
        None => version,
    };

    let pieces = split_components(core, u16::MAX as u32)?;

    if pieces.len() > 4 {
        return Err(NumericVersionError::TooManyComponents {
            version: version.to_owned(),
            max: 4,
        });
    }

    let mut result = [0u16; 4];

    for (slot, n) in result.iter_mut().zip(pieces) {
        *slot = n as u16;
    }

    Ok(result)
}

/// Convert a version into a sequence of bytes, one per dotted component.
///
/// Unlike [`four_part_numeric`], the version must be purely numeric.
pub fn byte_components(version: &str) -> std::result::Result<Vec<u8>, NumericVersionError> {
    Ok(split_components(version, u8::MAX as u32)?
        .into_iter()
        .map(|n| n as u8)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_only_requested_fields() {
        let ctx = VersionContext::builder()
            .version("1.2.3")
            .file_version("1.2.3.4")
            .finish();

        assert_eq!(ctx.version(), Some("1.2.3"));
        assert_eq!(ctx.file_version(), Some("1.2.3.4"));
        assert_eq!(ctx.assembly_version(), None);
        assert_eq!(ctx.get(VersionField::PackageVersion), None);
        assert!(!ctx.is_empty());
        assert!(VersionContext::default().is_empty());
    }

    #[test]
    fn four_part() {
        assert_eq!(four_part_numeric("2.10.0.5").unwrap(), [2, 10, 0, 5]);
        assert_eq!(four_part_numeric("3.1").unwrap(), [3, 1, 0, 0]);
        assert_eq!(four_part_numeric("1.4.0-beta.2+abc").unwrap(), [1, 4, 0, 0]);
        assert_eq!(four_part_numeric("65535.0.0.0").unwrap(), [65535, 0, 0, 0]);
    }

    #[test]
    fn four_part_rejects() {
        assert_eq!(four_part_numeric(""), Err(NumericVersionError::Empty));
        assert!(matches!(
            four_part_numeric("1.2.3.4.5"),
            Err(NumericVersionError::TooManyComponents { .. })
        ));
        assert!(matches!(
            four_part_numeric("1.x.3"),
            Err(NumericVersionError::BadComponent { .. })
        ));
        assert!(matches!(
            four_part_numeric("70000.1"),
            Err(NumericVersionError::BadComponent { .. })
        ));
    }

    #[test]
    fn bytes() {
        assert_eq!(byte_components("1.2.3").unwrap(), vec![1, 2, 3]);
        assert!(byte_components("1.256").is_err());
        assert!(byte_components("1.2.3-rc1").is_err());
    }
}
