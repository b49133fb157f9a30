// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! SDK-style MSBuild project files (`<Project Sdk="Microsoft.NET.Sdk">`).
//!
//! These declare their versions as properties:
//!
//! ```xml
//! <Project Sdk="Microsoft.NET.Sdk">
//!   <PropertyGroup>
//!     <Version>1.0.0</Version>
//!     <FileVersion>1.0.0.0</FileVersion>
//!   </PropertyGroup>
//! </Project>
//! ```
//!
//! We stream the document through `quick_xml` and replace only the text of
//! the version elements that are direct children of a toplevel
//! `<PropertyGroup>`, so that formatting, comments, and line endings survive.
//! We never add elements that aren't there.

use log::{error, info, warn};
use quick_xml::{
    events::{BytesCData, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use std::path::Path;

use super::{has_extension, PatchOutcome, Patcher};
use crate::{
    atry,
    errors::Result,
    textfile::TextFile,
    version::{VersionContext, VersionField},
};

/// The setting of the `<GenerateAssemblyInfo>` property.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AssemblyInfoGeneration {
    Unspecified,
    Enabled,
    Disabled,
    Unrecognized(String),
}

/// The result of patching project text.
#[derive(Debug)]
pub struct ProjectPatch {
    pub text: String,
    pub changed: bool,

    /// The version elements that exist in the project.
    pub found: Vec<VersionField>,
}

fn field_for_element(name: &[u8]) -> Option<VersionField> {
    VersionField::ALL
        .iter()
        .copied()
        .find(|f| f.msbuild_name().as_bytes() == name)
}

/// If the element stack places us directly inside a toplevel
/// `<PropertyGroup>`, return the name of the current property element.
fn property_name(stack: &[Vec<u8>]) -> Option<&[u8]> {
    match stack {
        [root, group, prop] if root == b"Project" && group == b"PropertyGroup" => Some(&prop[..]),
        _ => None,
    }
}

/// Look at the root element of a project document and report whether it's
/// an SDK-style project.
pub fn is_sdk_project(text: &str) -> Result<bool> {
    let mut reader = Reader::from_str(text);

    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if e.local_name().as_ref() != b"Project" {
                    return Ok(false);
                }

                for attr in e.attributes() {
                    if attr?.key.as_ref() == b"Sdk" {
                        return Ok(true);
                    }
                }

                return Ok(false);
            }

            Event::Eof => return Ok(false),

            _ => {}
        }
    }
}

/// Find out what the project says about `<GenerateAssemblyInfo>`. If it's
/// given multiple times, the last one wins, as in MSBuild.
pub fn assembly_info_generation(text: &str) -> Result<AssemblyInfoGeneration> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut setting = AssemblyInfoGeneration::Unspecified;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => stack.push(e.local_name().as_ref().to_vec()),

            Event::End(_) => {
                stack.pop();
            }

            Event::Text(ref t) => {
                if property_name(&stack) == Some(&b"GenerateAssemblyInfo"[..]) {
                    let value = t.unescape()?;
                    let value = value.trim();

                    setting = if value.eq_ignore_ascii_case("true") {
                        AssemblyInfoGeneration::Enabled
                    } else if value.eq_ignore_ascii_case("false") {
                        AssemblyInfoGeneration::Disabled
                    } else {
                        AssemblyInfoGeneration::Unrecognized(value.to_owned())
                    };
                }
            }

            Event::Eof => break,

            _ => {}
        }
    }

    Ok(setting)
}

/// The value of a version element, from the content events buffered while
/// inside it.
fn field_text(content: &[Event]) -> Result<String> {
    let mut value = String::new();

    for event in content {
        match event {
            Event::Text(t) => value.push_str(&t.unescape()?),
            Event::CData(c) => value.push_str(std::str::from_utf8(c)?),
            _ => {}
        }
    }

    Ok(value)
}

/// Rewrite the version properties in some project text.
pub fn patch_text(text: &str, ctx: &VersionContext) -> Result<ProjectPatch> {
    enum State<'a> {
        Scanning,

        /// Inside a version element. Its content is held back until the
        /// closing tag, so that the whole value can be replaced at once.
        InField(VersionField, Vec<Event<'a>>),
    }

    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut state = State::Scanning;
    let mut changed = false;
    let mut found = Vec::new();

    loop {
        let event = reader.read_event()?;

        if let State::InField(..) = state {
            match event {
                Event::Text(_) | Event::CData(_) | Event::Comment(_) => {
                    if let State::InField(_, ref mut content) = state {
                        content.push(event);
                    }

                    continue;
                }

                // Markup inside a version property; leave the element alone.
                Event::Start(_) | Event::Empty(_) => {
                    if let State::InField(_, content) = std::mem::replace(&mut state, State::Scanning) {
                        for held in &content {
                            writer.write_event(held)?;
                        }
                    }
                }

                _ => {}
            }
        }

        match event {
            Event::Start(ref e) => {
                stack.push(e.local_name().as_ref().to_vec());

                if let Some(f) = property_name(&stack).and_then(field_for_element) {
                    if !found.contains(&f) {
                        found.push(f);
                    }

                    state = State::InField(f, Vec::new());
                }

                writer.write_event(&event)?;
            }

            Event::End(_) => {
                if let State::InField(f, content) = std::mem::replace(&mut state, State::Scanning) {
                    let old = field_text(&content)?;

                    match ctx.get(f).filter(|v| !v.is_empty()) {
                        Some(new) if new != old => {
                            if content.iter().any(|e| matches!(e, Event::CData(_))) {
                                writer.write_event(Event::CData(BytesCData::new(new)))?;
                            } else {
                                writer.write_event(Event::Text(BytesText::new(new)))?;
                            }

                            changed = true;
                        }

                        _ => {
                            for held in &content {
                                writer.write_event(held)?;
                            }
                        }
                    }
                }

                stack.pop();
                writer.write_event(&event)?;
            }

            Event::Empty(ref e) => {
                let name = e.local_name().as_ref().to_vec();
                stack.push(name);
                let field = property_name(&stack).and_then(field_for_element);
                stack.pop();

                match field.map(|f| (f, ctx.get(f))) {
                    Some((f, Some(new))) if !new.is_empty() => {
                        if !found.contains(&f) {
                            found.push(f);
                        }

                        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        writer.write_event(Event::Start(BytesStart::new(tag.as_str())))?;
                        writer.write_event(Event::Text(BytesText::new(new)))?;
                        writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                        changed = true;
                    }

                    other => {
                        if let Some((f, _)) = other {
                            if !found.contains(&f) {
                                found.push(f);
                            }
                        }

                        writer.write_event(&event)?;
                    }
                }
            }

            Event::Eof => break,

            _ => {
                writer.write_event(&event)?;
            }
        }
    }

    Ok(ProjectPatch {
        text: String::from_utf8(writer.into_inner())?,
        changed,
        found,
    })
}

/// Patches version properties in SDK-style .NET project files.
#[derive(Debug)]
pub struct SdkProjectPatcher;

impl Patcher for SdkProjectPatcher {
    fn name(&self) -> &'static str {
        "SDK project"
    }

    fn is_applicable(&self, path: &Path) -> Result<bool> {
        if !has_extension(path, &["csproj", "fsproj", "vbproj", "props"]) {
            return Ok(false);
        }

        let tf = TextFile::load(path)?;
        Ok(atry!(
            is_sdk_project(tf.text());
            ["error parsing `{}` as XML", path.display()]
        ))
    }

    fn apply(&self, path: &Path, ctx: &VersionContext) -> Result<PatchOutcome> {
        let tf = TextFile::load(path)?;

        let generation = atry!(
            assembly_info_generation(tf.text());
            ["error parsing `{}` as XML", path.display()]
        );

        match generation {
            AssemblyInfoGeneration::Disabled => {
                return Ok(PatchOutcome::Skipped(
                    "version generation is disabled with <GenerateAssemblyInfo>".to_owned(),
                ));
            }

            AssemblyInfoGeneration::Unrecognized(value) => {
                error!(
                    "unrecognized <GenerateAssemblyInfo> value `{}` in `{}`; not patching it",
                    value,
                    path.display()
                );
                return Ok(PatchOutcome::Skipped(format!(
                    "unrecognized <GenerateAssemblyInfo> value `{}`",
                    value
                )));
            }

            AssemblyInfoGeneration::Unspecified | AssemblyInfoGeneration::Enabled => {}
        }

        let patch = atry!(
            patch_text(tf.text(), ctx);
            ["error rewriting `{}` as XML", path.display()]
        );

        for field in VersionField::ALL.iter().copied() {
            if ctx.get(field).is_none() || patch.found.contains(&field) {
                continue;
            }

            // Plenty of projects don't produce packages at all.
            if field == VersionField::PackageVersion {
                info!(
                    "no <{}> element in `{}`; not stamping it",
                    field.msbuild_name(),
                    path.display()
                );
            } else {
                warn!(
                    "no <{}> element in `{}`; not stamping it",
                    field.msbuild_name(),
                    path.display()
                );
            }
        }

        if patch.changed && tf.save(&patch.text)? {
            Ok(PatchOutcome::Modified(path.to_owned()))
        } else {
            Ok(PatchOutcome::Unchanged)
        }
    }
}
