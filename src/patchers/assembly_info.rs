// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Version attributes in .NET source files, e.g. `Properties/AssemblyInfo.cs`.
//!
//! We recognize the three attribute forms
//!
//! ```text
//! [assembly: AssemblyVersion("1.0.0.0")]
//! [assembly: AssemblyFileVersion("1.0.0.0")]
//! [assembly: AssemblyInformationalVersion("1.0.0-dev")]
//! ```
//!
//! in C#, VB (`<Assembly: ...>`), and F# (`[<assembly: ...>]`) syntax, with or
//! without the `Attribute` suffix or a `System.Reflection.` qualifier, and
//! with any amount of whitespace inside the call. Only the text inside the
//! string literal is replaced.

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Captures, Regex};
use std::path::Path;

use super::{has_extension, PatchOutcome, Patcher};
use crate::{
    errors::Result,
    textfile::TextFile,
    version::{VersionContext, VersionField},
};

lazy_static! {
    static ref ATTRIBUTE_RE: Regex = Regex::new(
        r#"(?P<head>(?i:assembly)\s*:\s*(?:System\s*\.\s*Reflection\s*\.\s*)?Assembly(?P<kind>File|Informational)?Version(?:Attribute)?\s*\(\s*")(?P<value>[^"\r\n]*)(?P<tail>")"#
    )
    .expect("hardcoded regex must compile");
}

const FIELDS: &[VersionField] = &[
    VersionField::AssemblyVersion,
    VersionField::FileVersion,
    VersionField::InformationalVersion,
];

fn field_for_kind(kind: Option<&str>) -> VersionField {
    match kind {
        Some("File") => VersionField::FileVersion,
        Some(_) => VersionField::InformationalVersion,
        None => VersionField::AssemblyVersion,
    }
}

/// The result of patching attribute source text.
#[derive(Debug)]
pub struct AttributePatch {
    pub text: String,
    pub changed: bool,

    /// The fields for which at least one attribute was found.
    pub seen: Vec<VersionField>,
}

/// Patch the version attributes in some source text.
pub fn patch_text(text: &str, ctx: &VersionContext) -> AttributePatch {
    let mut changed = false;
    let mut seen = Vec::new();

    let new_text = ATTRIBUTE_RE.replace_all(text, |caps: &Captures| {
        let field = field_for_kind(caps.name("kind").map(|m| m.as_str()));
        let old = &caps["value"];

        if !seen.contains(&field) {
            seen.push(field);
        }

        match ctx.get(field) {
            Some(new) if new != old => {
                changed = true;
                format!("{}{}{}", &caps["head"], new, &caps["tail"])
            }
            _ => caps[0].to_owned(),
        }
    });

    AttributePatch {
        text: new_text.into_owned(),
        changed,
        seen,
    }
}

/// Patches assembly version attributes in C#, VB, and F# sources.
#[derive(Debug)]
pub struct AssemblyInfoPatcher;

impl Patcher for AssemblyInfoPatcher {
    fn name(&self) -> &'static str {
        "assembly attributes"
    }

    fn is_applicable(&self, path: &Path) -> Result<bool> {
        if !has_extension(path, &["cs", "vb", "fs"]) {
            return Ok(false);
        }

        let tf = TextFile::load(path)?;
        Ok(ATTRIBUTE_RE.is_match(tf.text()))
    }

    fn apply(&self, path: &Path, ctx: &VersionContext) -> Result<PatchOutcome> {
        let tf = TextFile::load(path)?;
        let patch = patch_text(tf.text(), ctx);

        for field in FIELDS {
            if ctx.get(*field).is_some() && !patch.seen.contains(field) {
                debug!(
                    "no {} attribute in `{}`; leaving it out",
                    field.msbuild_name(),
                    path.display()
                );
            }
        }

        if patch.seen.is_empty() {
            warn!(
                "no version attributes found in `{}` after all",
                path.display()
            );
        }

        if patch.changed && tf.save(&patch.text)? {
            Ok(PatchOutcome::Modified(path.to_owned()))
        } else {
            Ok(PatchOutcome::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CS: &str = "using System.Reflection;\r\n\
        \r\n\
        [assembly: AssemblyTitle(\"Widget\")]\r\n\
        [assembly: AssemblyVersion(\"1.0.0.0\")]\r\n\
        [assembly:AssemblyFileVersionAttribute( \"1.0.0.0\" )]\r\n\
        [assembly: System.Reflection.AssemblyInformationalVersion(\"1.0.0-dev\")]\r\n";

    fn ctx() -> VersionContext {
        VersionContext::builder()
            .assembly_version("2.0.0.0")
            .file_version("2.1.3.7")
            .informational_version("2.1.3-beta+abc")
            .finish()
    }

    #[test]
    fn patches_all_three_forms() {
        let p = patch_text(CS, &ctx());
        assert!(p.changed);
        assert_eq!(p.seen.len(), 3);
        assert!(p.text.contains("[assembly: AssemblyVersion(\"2.0.0.0\")]\r\n"));
        assert!(p.text.contains("[assembly:AssemblyFileVersionAttribute( \"2.1.3.7\" )]\r\n"));
        assert!(p
            .text
            .contains("[assembly: System.Reflection.AssemblyInformationalVersion(\"2.1.3-beta+abc\")]"));
        assert!(p.text.contains("AssemblyTitle(\"Widget\")"));
    }

    #[test]
    fn idempotent() {
        let once = patch_text(CS, &ctx());
        let twice = patch_text(&once.text, &ctx());
        assert!(!twice.changed);
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn unset_fields_untouched() {
        let only_file = VersionContext::builder().file_version("9.9.9.9").finish();
        let p = patch_text(CS, &only_file);
        assert!(p.changed);
        assert!(p.text.contains("AssemblyVersion(\"1.0.0.0\")"));
        assert!(p.text.contains("AssemblyInformationalVersion(\"1.0.0-dev\")"));
        assert!(p.text.contains("AssemblyFileVersionAttribute( \"9.9.9.9\" )"));
    }

    #[test]
    fn other_languages() {
        let vb = "<Assembly: AssemblyVersion(\"1.0.*\")>\n";
        let fs = "[<assembly: AssemblyFileVersion(\"0.1\")>]\n";
        let c = ctx();
        assert_eq!(
            patch_text(vb, &c).text,
            "<Assembly: AssemblyVersion(\"2.0.0.0\")>\n"
        );
        assert_eq!(
            patch_text(fs, &c).text,
            "[<assembly: AssemblyFileVersion(\"2.1.3.7\")>]\n"
        );
    }

    #[test]
    fn applicability() {
        let dir = tempfile::tempdir().unwrap();
        let yes = dir.path().join("AssemblyInfo.cs");
        std::fs::write(&yes, CS).unwrap();
        let no = dir.path().join("Program.cs");
        std::fs::write(&no, "class Program { static void Main() {} }").unwrap();

        assert!(AssemblyInfoPatcher.is_applicable(&yes).unwrap());
        assert!(!AssemblyInfoPatcher.is_applicable(&no).unwrap());
    }

    #[test]
    fn apply_preserves_bom() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("AssemblyInfo.cs");
        let mut data = b"\xEF\xBB\xBF".to_vec();
        data.extend_from_slice(CS.as_bytes());
        std::fs::write(&p, &data).unwrap();

        let outcome = AssemblyInfoPatcher.apply(&p, &ctx()).unwrap();
        assert_eq!(outcome, PatchOutcome::Modified(p.clone()));

        let after = std::fs::read(&p).unwrap();
        assert!(after.starts_with(b"\xEF\xBB\xBF"));
        assert_eq!(
            AssemblyInfoPatcher.apply(&p, &ctx()).unwrap(),
            PatchOutcome::Unchanged
        );
    }
}
