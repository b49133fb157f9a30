// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Generating files from `.template` files.
//!
//! A file named `version.h.template` is rendered into `version.h` next to it,
//! with `{NAME}` replaced by the value of the environment variable `NAME`.
//! Literal braces are written `{{` and `}}`. Any other use of a brace, or a
//! reference to a variable that isn't set, is an error.

use dynfmt::{Format, SimpleCurlyFormat};
use std::{collections::HashMap, path::Path};
use thiserror::Error as ThisError;

use super::{has_extension, PatchOutcome, Patcher};
use crate::{
    env,
    errors::{PrepError, Result},
    textfile::{write_if_changed, TextFile},
    version::VersionContext,
};

/// A problem rendering a template.
#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum TemplateError {
    #[error("unclosed `{{` at byte {0}")]
    Unclosed(usize),

    #[error("unmatched `}}` at byte {0}; write `}}}}` for a literal brace")]
    Unmatched(usize),

    #[error("`{{{0}}}` is not a valid placeholder")]
    BadPlaceholder(String),

    #[error("{0}")]
    Render(String),
}

fn flush(
    pending: &mut String,
    out: &mut String,
    vars: &HashMap<String, String>,
) -> std::result::Result<(), TemplateError> {
    if !pending.is_empty() {
        let rendered = SimpleCurlyFormat
            .format(pending.as_str(), vars)
            .map_err(|e| TemplateError::Render(e.to_string()))?;
        out.push_str(&rendered);
        pending.clear();
    }

    Ok(())
}

/// Render template text with the given variable bindings.
///
/// The text is split at escaped braces; each run in between goes through
/// `dynfmt`, which does the actual substitution.
pub fn render(template: &str, vars: &HashMap<String, String>) -> std::result::Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut pending = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, c)| *c) == Some('{') => {
                chars.next();
                flush(&mut pending, &mut out, vars)?;
                out.push('{');
            }

            '}' if chars.peek().map(|(_, c)| *c) == Some('}') => {
                chars.next();
                flush(&mut pending, &mut out, vars)?;
                out.push('}');
            }

            '{' => {
                let mut name = String::new();
                let mut closed = false;

                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }

                    name.push(c);
                }

                if !closed {
                    return Err(TemplateError::Unclosed(idx));
                }

                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(TemplateError::BadPlaceholder(name));
                }

                pending.push('{');
                pending.push_str(&name);
                pending.push('}');
            }

            '}' => return Err(TemplateError::Unmatched(idx)),

            c => pending.push(c),
        }
    }

    flush(&mut pending, &mut out, vars)?;
    Ok(out)
}

/// Renders `.template` files into their non-template siblings.
#[derive(Debug, Default)]
pub struct TemplatePatcher {
    /// Fixed bindings; if unset, the process environment at the time of
    /// rendering is used.
    bindings: Option<HashMap<String, String>>,
}

impl TemplatePatcher {
    /// A patcher that renders with the given bindings instead of the process
    /// environment.
    pub fn with_bindings(bindings: HashMap<String, String>) -> Self {
        TemplatePatcher {
            bindings: Some(bindings),
        }
    }

    /// The path that a template renders to.
    pub fn output_path(path: &Path) -> std::path::PathBuf {
        path.with_extension("")
    }
}

impl Patcher for TemplatePatcher {
    fn name(&self) -> &'static str {
        "template"
    }

    fn is_applicable(&self, path: &Path) -> Result<bool> {
        Ok(has_extension(path, &["template"]))
    }

    fn apply(&self, path: &Path, _ctx: &VersionContext) -> Result<PatchOutcome> {
        let tf = TextFile::load(path)?;

        let snapshot;
        let vars = match self.bindings {
            Some(ref b) => b,
            None => {
                snapshot = env::snapshot();
                &snapshot
            }
        };

        let text = render(tf.text(), vars)
            .map_err(|e| PrepError::patch_format(tf.path(), format!("cannot render template: {}", e)))?;

        let out_path = Self::output_path(path);
        let encoding = tf.encoding().preserving(&text);

        if write_if_changed(&out_path, &text, encoding)? {
            Ok(PatchOutcome::Modified(out_path))
        } else {
            Ok(PatchOutcome::Unchanged)
        }
    }
}
