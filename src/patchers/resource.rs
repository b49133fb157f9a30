// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Windows resource scripts (`.rc`) with a `VERSIONINFO` block.
//!
//! The version appears twice over: once as numeric fields
//!
//! ```text
//! VS_VERSION_INFO VERSIONINFO
//!  FILEVERSION 1,0,0,1
//!  PRODUCTVERSION 1,0,0,1
//! ```
//!
//! and once as strings in the `StringFileInfo` block:
//!
//! ```text
//!             VALUE "FileVersion", "1.0.0.1"
//!             VALUE "ProductVersion", "1.0.0.1"
//! ```
//!
//! The file version feeds `FILEVERSION` and `"FileVersion"`; the main
//! version feeds `PRODUCTVERSION` and `"ProductVersion"`. The resource
//! compiler is picky, so we always write these files back as plain ASCII.

use lazy_static::lazy_static;
use log::warn;
use regex::{Captures, Regex};
use std::path::Path;

use super::{has_extension, PatchOutcome, Patcher};
use crate::{
    errors::{PrepError, Result},
    textfile::{TextEncoding, TextFile},
    version::{four_part_numeric, NumericVersionError, VersionContext},
};

lazy_static! {
    static ref VERSIONINFO_RE: Regex =
        Regex::new(r"(?m)^[ \t]*\S+[ \t]+VERSIONINFO\b").expect("hardcoded regex must compile");
    static ref FILEVERSION_RE: Regex = numeric_field_regex("FILEVERSION");
    static ref PRODUCTVERSION_RE: Regex = numeric_field_regex("PRODUCTVERSION");
    static ref FILEVERSION_STR_RE: Regex = string_field_regex("FileVersion");
    static ref PRODUCTVERSION_STR_RE: Regex = string_field_regex("ProductVersion");
}

fn numeric_field_regex(keyword: &str) -> Regex {
    Regex::new(&format!(
        r"(?m)^(?P<head>[ \t]*(?i:{})[ \t]+)(?P<value>[0-9]+(?:[ \t]*,[ \t]*[0-9]+)*)",
        keyword
    ))
    .expect("hardcoded regex must compile")
}

fn string_field_regex(key: &str) -> Regex {
    Regex::new(&format!(
        r#"(?m)^(?P<head>[ \t]*VALUE[ \t]+"{}"[ \t]*,[ \t]*")(?P<value>[^"\r\n]*)(?P<tail>")"#,
        key
    ))
    .expect("hardcoded regex must compile")
}

/// The result of patching resource script text.
#[derive(Debug)]
pub struct ResourcePatch {
    pub text: String,
    pub changed: bool,

    /// Descriptions of the expected fields that weren't found.
    pub missing: Vec<&'static str>,
}

/// Replace the `value` group of every match of `re` with `new`, noting
/// whether anything changed and whether there was any match at all.
fn replace_field(text: &str, re: &Regex, new: &str, changed: &mut bool) -> (String, bool) {
    let mut matched = false;

    let out = re.replace_all(text, |caps: &Captures| {
        matched = true;
        let value = caps.name("value").expect("regex has a value group");

        if value.as_str() == new {
            return caps[0].to_owned();
        }

        *changed = true;
        let tail = caps.name("tail").map(|m| m.as_str()).unwrap_or("");
        format!("{}{}{}", &caps["head"], new, tail)
    });

    (out.into_owned(), matched)
}

/// Render a version as the comma-separated four integers that the numeric
/// fields want, e.g. `2.10.0.5` becomes `2,10,0,5`.
pub fn numeric_field_value(version: &str) -> std::result::Result<String, NumericVersionError> {
    let parts = four_part_numeric(version)?;
    Ok(format!("{},{},{},{}", parts[0], parts[1], parts[2], parts[3]))
}

/// Patch the version fields of resource script text.
pub fn patch_text(
    text: &str,
    ctx: &VersionContext,
) -> std::result::Result<ResourcePatch, NumericVersionError> {
    let mut text = text.to_owned();
    let mut changed = false;
    let mut missing = Vec::new();

    let fields: [(Option<&str>, bool, &Regex, &'static str); 4] = [
        (ctx.file_version(), true, &*FILEVERSION_RE, "FILEVERSION"),
        (ctx.file_version(), false, &*FILEVERSION_STR_RE, "VALUE \"FileVersion\""),
        (ctx.version(), true, &*PRODUCTVERSION_RE, "PRODUCTVERSION"),
        (ctx.version(), false, &*PRODUCTVERSION_STR_RE, "VALUE \"ProductVersion\""),
    ];

    for (value, numeric, re, desc) in fields.iter() {
        let value = match value {
            Some(v) => *v,
            None => continue,
        };

        let new = if *numeric {
            numeric_field_value(value)?
        } else {
            value.to_owned()
        };

        let (patched, matched) = replace_field(&text, re, &new, &mut changed);

        if matched {
            text = patched;
        } else {
            missing.push(*desc);
        }
    }

    Ok(ResourcePatch {
        text,
        changed,
        missing,
    })
}

/// Patches `VERSIONINFO` blocks in Windows resource scripts.
#[derive(Debug)]
pub struct ResourcePatcher;

impl Patcher for ResourcePatcher {
    fn name(&self) -> &'static str {
        "native resource"
    }

    fn is_applicable(&self, path: &Path) -> Result<bool> {
        if !has_extension(path, &["rc"]) {
            return Ok(false);
        }

        let tf = TextFile::load(path)?;
        Ok(VERSIONINFO_RE.is_match(tf.text()))
    }

    fn apply(&self, path: &Path, ctx: &VersionContext) -> Result<PatchOutcome> {
        let tf = TextFile::load(path)?;
        let patch = patch_text(tf.text(), ctx)
            .map_err(|e| PrepError::patch_format(tf.path(), e.to_string()))?;

        for desc in &patch.missing {
            warn!(
                "no {} field in the version block of `{}`; not stamping it",
                desc,
                tf.path().display()
            );
        }

        if !patch.changed {
            return Ok(PatchOutcome::Unchanged);
        }

        if tf.encoding() != TextEncoding::Ascii {
            warn!(
                "`{}` is encoded as {}, but will be rewritten as ASCII",
                tf.path().display(),
                tf.encoding()
            );
        }

        if tf.save_as(&patch.text, TextEncoding::Ascii)? {
            Ok(PatchOutcome::Modified(tf.path().to_owned()))
        } else {
            Ok(PatchOutcome::Unchanged)
        }
    }
}
