// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Error handling for the version-stamping engine.
//!
//! Everything fallible returns an `anyhow` result. The specific failure kinds
//! that callers may want to react to are modeled as `thiserror` types that can
//! be recovered from an `anyhow::Error` with `downcast_ref`, even after
//! context has been layered on top of them.

use std::path::PathBuf;
use thiserror::Error as ThisError;

pub use anyhow::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The distinguishable kinds of failure that can stop a run.
///
/// Consistency conflicts have their own type,
/// [`crate::consistency::ConsistencyConflict`], since they carry a lot more
/// structure.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum PrepError {
    /// A path handed to us couldn't be scanned, or files inside a scanned
    /// directory couldn't be examined.
    #[error("cannot discover files under `{}`: {reason}", .path.display())]
    Discovery { path: PathBuf, reason: String },

    /// A file was explicitly requested, but nothing knows how to patch it.
    #[error("no version patcher applies to the explicitly requested file `{}`", .0.display())]
    NoApplicableProcessor(PathBuf),

    /// A file matched a patcher but lacked a required structural element, or
    /// a value couldn't be converted into the form that the file needs.
    #[error("cannot patch `{}`: {reason}", .path.display())]
    PatchFormat { path: PathBuf, reason: String },

    /// A file passed a patcher's coarse applicability check, but none of its
    /// more detailed shapes.
    #[error("unsupported format in `{}`: {reason}", .path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("I/O error on `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PrepError {
    pub fn patch_format<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        PrepError::PatchFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        PrepError::Io {
            path: path.into(),
            source,
        }
    }
}

/// "annotated try" -- like the `try!` macro or the `?` operator, but attaches
/// formatted context messages to the error if the operation fails.
///
/// ```ignore
/// let f = atry!(
///     File::open(&p);
///     ["failed to open file `{}`", p.display()]
/// );
/// ```
#[macro_export]
macro_rules! atry {
    (@aa $ar:ident [ $($inner:tt)+ ] ) => {
        $ar = $ar.context(format!($($inner)+));
    };

    (@aa $ar:ident ( note $($inner:tt)+ ) ) => {
        $ar = $ar.context(format!("note: {}", format!($($inner)+)));
    };

    ($op:expr ; $( $annotation:tt )+) => {{
        match $op {
            Ok(t) => t,
            Err(e) => {
                #[allow(unused_mut)]
                let mut ar = $crate::errors::Error::from(e);
                $(
                    $crate::atry!(@aa ar $annotation);
                )+
                return Err(ar.into());
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_open(p: &str) -> Result<std::fs::File> {
        let f = atry!(
            std::fs::File::open(p);
            ["failed to open file `{}`", p]
            (note "this file was never going to exist")
        );
        Ok(f)
    }

    #[test]
    fn atry_attaches_context() {
        let e = failing_open("/nonexistent/buildstamp/file").unwrap_err();
        let chain: Vec<String> = e.chain().map(|c| c.to_string()).collect();
        assert_eq!(chain[0], "note: this file was never going to exist");
        assert_eq!(chain[1], "failed to open file `/nonexistent/buildstamp/file`");
        assert!(e.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn kinds_survive_context() {
        let e: Error = PrepError::patch_format("a/b.rc", "no FILEVERSION").into();
        let e = e.context("while patching");
        match e.downcast_ref::<PrepError>() {
            Some(PrepError::PatchFormat { reason, .. }) => assert_eq!(reason, "no FILEVERSION"),
            other => panic!("unexpected downcast result {:?}", other),
        }
    }
}
