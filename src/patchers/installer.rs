// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! WiX installer descriptors (`.wxs`, `.wxi`).
//!
//! Installer sources carry their version as a variable, either as a
//! preprocessor definition or as a `<Variable>` element:
//!
//! ```xml
//! <?define ProductVersion = "1.0.0" ?>
//! <Variable Name="ProductVersion" Value="1.0.0" />
//! ```
//!
//! Documents come in two shapes. A *package* (with a `<Product>` or
//! `<Package>` element) builds an MSI, and also needs a fresh `ProductCode`
//! for every version, which we derive from its `UpgradeCode`. A *bundle*
//! (with a `<Bundle>` element) only gets the version.

use lazy_static::lazy_static;
use log::{error, warn};
use quick_xml::{
    escape::escape,
    events::{BytesStart, BytesText, Event},
    Reader, Writer,
};
use regex::Regex;
use std::{borrow::Cow, collections::BTreeMap, path::Path};

use super::{has_extension, PatchOutcome, Patcher};
use crate::{
    atry,
    errors::{PrepError, Result},
    product_code::{self, ProductIdentifier},
    textfile::TextFile,
    version::VersionContext,
};

pub const WIX3_NAMESPACE: &str = "http://schemas.microsoft.com/wix/2006/wi";
pub const WIX4_NAMESPACE: &str = "http://wixtoolset.org/schemas/v4/wxs";

const PRODUCT_VERSION_VAR: &str = "ProductVersion";
const PRODUCT_CODE_VAR: &str = "ProductCode";
const UPGRADE_CODE_VAR: &str = "UpgradeCode";

lazy_static! {
    static ref DEFINE_RE: Regex = Regex::new(
        r#"(?s)^(?P<head>\s*define\s+(?P<name>[A-Za-z_][A-Za-z0-9_.]*)\s*=\s*)(?P<value>"[^"]*"|[^\s"]*)(?P<tail>.*)$"#
    )
    .expect("hardcoded regex must compile");
    static ref VAR_REF_RE: Regex =
        Regex::new(r"^\$\((?:var\.)?(?P<name>[^)]+)\)$").expect("hardcoded regex must compile");
}

/// The two kinds of installer document that we know how to stamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstallerShape {
    Package,
    Bundle,
}

/// What a first pass over an installer document tells us.
#[derive(Debug, Default)]
pub struct InstallerSurvey {
    pub shape: Option<InstallerShape>,

    /// The upgrade code, with any variable reference resolved, if there is
    /// one.
    pub upgrade_code: Option<String>,

    /// Variables defined in the document, either way.
    pub variables: BTreeMap<String, String>,
}

/// The result of patching installer text.
#[derive(Debug)]
pub struct InstallerPatch {
    pub text: String,
    pub changed: bool,

    /// The names of the requested variables that exist in the document.
    pub found: Vec<String>,
}

fn attribute(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;

        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }

    Ok(None)
}

/// Decide whether the root element of some text is a WiX `<Wix>` element in
/// one of the namespaces that we understand.
pub fn is_wix_document(text: &str) -> Result<bool> {
    let mut reader = Reader::from_str(text);

    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if e.local_name().as_ref() != b"Wix" {
                    return Ok(false);
                }

                let qname = e.name();
                let ns_key = match qname.prefix() {
                    Some(p) => [&b"xmlns:"[..], p.as_ref()].concat(),
                    None => b"xmlns".to_vec(),
                };

                return Ok(matches!(
                    attribute(e, &ns_key)?.as_deref(),
                    Some(WIX3_NAMESPACE) | Some(WIX4_NAMESPACE)
                ));
            }

            Event::Eof => return Ok(false),

            _ => {}
        }
    }
}

/// Scan an installer document for its shape, variables, and upgrade code.
pub fn survey(text: &str) -> Result<InstallerSurvey> {
    let mut reader = Reader::from_str(text);
    let mut shape = None;
    let mut variables = BTreeMap::new();
    let mut upgrade_attr = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"Product" | b"Package" => {
                    if shape.is_none() {
                        shape = Some(InstallerShape::Package);
                    }

                    if upgrade_attr.is_none() {
                        upgrade_attr = attribute(e, b"UpgradeCode")?;
                    }
                }

                b"Bundle" => {
                    if shape.is_none() {
                        shape = Some(InstallerShape::Bundle);
                    }
                }

                b"Variable" => {
                    let name = match attribute(e, b"Id")? {
                        Some(n) => Some(n),
                        None => attribute(e, b"Name")?,
                    };

                    if let (Some(name), Some(value)) = (name, attribute(e, b"Value")?) {
                        variables.insert(name, value);
                    }
                }

                _ => {}
            },

            Event::PI(ref pi) => {
                if let Some(caps) = DEFINE_RE.captures(std::str::from_utf8(pi)?) {
                    variables.insert(
                        caps["name"].to_owned(),
                        caps["value"].trim_matches('"').to_owned(),
                    );
                }
            }

            Event::Eof => break,

            _ => {}
        }
    }

    let upgrade_code = match upgrade_attr {
        Some(text) => match VAR_REF_RE.captures(&text) {
            Some(caps) => variables.get(&caps["name"]).cloned(),
            None => Some(text),
        },
        None => variables.get(UPGRADE_CODE_VAR).cloned(),
    };

    Ok(InstallerSurvey {
        shape,
        upgrade_code,
        variables,
    })
}

struct Rewrite {
    name: String,

    /// The new content of the node, if it needs to change.
    content: Option<String>,
}

fn rewrite_define(content: &str, values: &BTreeMap<&str, String>) -> Option<Rewrite> {
    let caps = DEFINE_RE.captures(content)?;
    let name = &caps["name"];
    let new = values.get(name)?;
    let raw = &caps["value"];
    let quoted = raw.starts_with('"');

    let content = if raw.trim_matches('"') == new {
        None
    } else if quoted {
        Some(format!("{}\"{}\"{}", &caps["head"], new, &caps["tail"]))
    } else {
        Some(format!("{}{}{}", &caps["head"], new, &caps["tail"]))
    };

    Some(Rewrite {
        name: name.to_owned(),
        content,
    })
}

fn rewrite_variable(e: &BytesStart, values: &BTreeMap<&str, String>) -> Result<Option<Rewrite>> {
    if e.local_name().as_ref() != b"Variable" {
        return Ok(None);
    }

    let raw: &[u8] = e;
    let mut name = None;
    let mut old = None;
    let mut span = None;

    for attr in e.attributes() {
        let attr = attr?;

        match attr.key.as_ref() {
            b"Id" | b"Name" => name = Some(attr.unescape_value()?.into_owned()),

            b"Value" => {
                old = Some(attr.unescape_value()?.into_owned());

                // The value borrows from the tag's own bytes, which gives us
                // its exact position.
                if let Cow::Borrowed(v) = attr.value {
                    let start = v.as_ptr() as usize - raw.as_ptr() as usize;
                    span = Some(start..start + v.len());
                }
            }

            _ => {}
        }
    }

    let name = match name {
        Some(n) => n,
        None => return Ok(None),
    };

    let new = match values.get(name.as_str()) {
        Some(v) => v,
        None => return Ok(None),
    };

    if old.as_deref() == Some(new.as_str()) {
        return Ok(Some(Rewrite {
            name,
            content: None,
        }));
    }

    let content = std::str::from_utf8(raw)?;
    let content = span.map(|r| format!("{}{}{}", &content[..r.start], escape(new), &content[r.end..]));
    Ok(Some(Rewrite { name, content }))
}

/// Set the named variables in some installer text, wherever they're
/// defined. Variables that aren't already defined aren't added.
pub fn patch_text(text: &str, values: &BTreeMap<&str, String>) -> Result<InstallerPatch> {
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    let mut changed = false;
    let mut found = Vec::new();

    loop {
        let event = reader.read_event()?;

        let rewrite = match event {
            Event::PI(ref pi) => rewrite_define(std::str::from_utf8(pi)?, values),
            Event::Start(ref e) | Event::Empty(ref e) => rewrite_variable(e, values)?,
            Event::Eof => break,
            _ => None,
        };

        let rewrite = match rewrite {
            Some(r) => r,
            None => {
                writer.write_event(&event)?;
                continue;
            }
        };

        if !found.contains(&rewrite.name) {
            found.push(rewrite.name.clone());
        }

        match (&event, rewrite.content) {
            (Event::PI(_), Some(c)) => {
                writer.write_event(Event::PI(BytesText::from_escaped(c)))?;
                changed = true;
            }

            (Event::Start(e), Some(c)) => {
                let len = e.name().as_ref().len();
                writer.write_event(Event::Start(BytesStart::from_content(c, len)))?;
                changed = true;
            }

            (Event::Empty(e), Some(c)) => {
                let len = e.name().as_ref().len();
                writer.write_event(Event::Empty(BytesStart::from_content(c, len)))?;
                changed = true;
            }

            _ => {
                writer.write_event(&event)?;
            }
        }
    }

    Ok(InstallerPatch {
        text: String::from_utf8(writer.into_inner())?,
        changed,
        found,
    })
}

fn describe(e: &dyn std::error::Error) -> String {
    match e.source() {
        Some(s) => format!("{}: {}", e, s),
        None => e.to_string(),
    }
}

/// Patches WiX package and bundle sources.
#[derive(Debug)]
pub struct InstallerPatcher;

impl Patcher for InstallerPatcher {
    fn name(&self) -> &'static str {
        "installer descriptor"
    }

    fn is_applicable(&self, path: &Path) -> Result<bool> {
        if !has_extension(path, &["wxs", "wxi"]) {
            return Ok(false);
        }

        let tf = TextFile::load(path)?;
        Ok(atry!(
            is_wix_document(tf.text());
            ["error parsing `{}` as XML", path.display()]
        ))
    }

    fn apply(&self, path: &Path, ctx: &VersionContext) -> Result<PatchOutcome> {
        let tf = TextFile::load(path)?;
        let survey = atry!(
            survey(tf.text());
            ["error parsing `{}` as XML", path.display()]
        );

        let shape = match survey.shape {
            Some(s) => s,
            None => {
                return Err(PrepError::UnsupportedFormat {
                    path: path.to_owned(),
                    reason: "no <Product>, <Package>, or <Bundle> element".to_owned(),
                }
                .into());
            }
        };

        let version = match ctx.version() {
            Some(v) => v,
            None => return Ok(PatchOutcome::Unchanged),
        };

        let mut values = BTreeMap::new();
        values.insert(PRODUCT_VERSION_VAR, version.to_owned());

        if shape == InstallerShape::Package {
            match survey.upgrade_code.as_deref() {
                None => {
                    error!(
                        "no UpgradeCode in `{}`; not deriving a new product code",
                        path.display()
                    );
                }

                Some(text) => match text.parse::<ProductIdentifier>() {
                    Err(e) => {
                        error!(
                            "{} in `{}`; not deriving a new product code",
                            e,
                            path.display()
                        );
                    }

                    Ok(upgrade) => {
                        let code = product_code::derive(version, &upgrade)
                            .map_err(|e| PrepError::patch_format(path, describe(&e)))?;
                        values.insert(PRODUCT_CODE_VAR, code.to_string());
                    }
                },
            }
        }

        let patch = atry!(
            patch_text(tf.text(), &values);
            ["error rewriting `{}` as XML", path.display()]
        );

        for name in values.keys() {
            if !patch.found.iter().any(|f| f == name) {
                warn!(
                    "no `{}` variable in `{}`; not stamping it",
                    name,
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

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &str = "{6D2A1C43-9E0B-4F7A-8C55-1D3E2F4A5B6C}";

    const PACKAGE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
        <Wix xmlns=\"http://schemas.microsoft.com/wix/2006/wi\">\n\
        \x20 <?define ProductVersion = \"1.0.0\" ?>\n\
        \x20 <?define ProductCode = \"{00000000-0000-0000-0000-000000000000}\" ?>\n\
        \x20 <?define UpgradeCode = \"{6D2A1C43-9E0B-4F7A-8C55-1D3E2F4A5B6C}\" ?>\n\
        \x20 <Product Id=\"$(var.ProductCode)\" Name=\"Widget\" Version=\"$(var.ProductVersion)\"\n\
        \x20          UpgradeCode=\"$(var.UpgradeCode)\" Language=\"1033\">\n\
        \x20   <Package InstallerVersion=\"200\" Compressed=\"yes\" />\n\
        \x20 </Product>\n\
        </Wix>\n";

    const BUNDLE: &str = "<Wix xmlns=\"http://wixtoolset.org/schemas/v4/wxs\">\n\
        \x20 <Bundle Name=\"Widget\" Version=\"$(ProductVersion)\" UpgradeCode=\"{6D2A1C43-9E0B-4F7A-8C55-1D3E2F4A5B6C}\">\n\
        \x20   <Variable Name=\"ProductVersion\"\n\
        \x20             Value='1.0.0' />\n\
        \x20   <Variable Name=\"ProductCode\" Value=\"keep\" />\n\
        \x20 </Bundle>\n\
        </Wix>\n";

    fn ctx() -> VersionContext {
        VersionContext::builder().version("1.4.2").finish()
    }

    fn expected_code() -> String {
        product_code::derive("1.4.2", &UPGRADE.parse().unwrap())
            .unwrap()
            .to_string()
    }

    fn write(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, text).unwrap();
        p
    }

    #[test]
    fn shapes_and_variables() {
        let s = survey(PACKAGE).unwrap();
        assert_eq!(s.shape, Some(InstallerShape::Package));
        assert_eq!(s.upgrade_code.as_deref(), Some(UPGRADE));
        assert_eq!(s.variables["ProductVersion"], "1.0.0");

        let s = survey(BUNDLE).unwrap();
        assert_eq!(s.shape, Some(InstallerShape::Bundle));
        assert_eq!(s.variables["ProductCode"], "keep");
    }

    #[test]
    fn namespaces() {
        assert!(is_wix_document(PACKAGE).unwrap());
        assert!(is_wix_document(BUNDLE).unwrap());
        assert!(is_wix_document(
            "<w:Wix xmlns:w=\"http://schemas.microsoft.com/wix/2006/wi\"></w:Wix>"
        )
        .unwrap());
        assert!(!is_wix_document("<Wix xmlns=\"http://example.com/other\"></Wix>").unwrap());
        assert!(!is_wix_document("<Include xmlns=\"http://schemas.microsoft.com/wix/2006/wi\"/>").unwrap());
    }

    #[test]
    fn package_gets_version_and_code() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "Product.wxs", PACKAGE);

        assert!(InstallerPatcher.is_applicable(&p).unwrap());
        assert_eq!(
            InstallerPatcher.apply(&p, &ctx()).unwrap(),
            PatchOutcome::Modified(p.clone())
        );

        let after = std::fs::read_to_string(&p).unwrap();
        assert!(after.contains("  <?define ProductVersion = \"1.4.2\" ?>\n"));
        assert!(after.contains(&format!("<?define ProductCode = \"{}\" ?>", expected_code())));
        assert!(after.contains("Version=\"$(var.ProductVersion)\"\n"));
        assert!(after.contains("<Package InstallerVersion=\"200\" Compressed=\"yes\" />"));

        assert_eq!(
            InstallerPatcher.apply(&p, &ctx()).unwrap(),
            PatchOutcome::Unchanged
        );
    }

    #[test]
    fn bundle_gets_only_version() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "Bundle.wxs", BUNDLE);

        assert_eq!(
            InstallerPatcher.apply(&p, &ctx()).unwrap(),
            PatchOutcome::Modified(p.clone())
        );

        let after = std::fs::read_to_string(&p).unwrap();
        let expected = BUNDLE.replace("Value='1.0.0'", "Value='1.4.2'");
        assert_eq!(after, expected);
    }

    #[test]
    fn bad_upgrade_code_still_patches_version() {
        let dir = tempfile::tempdir().unwrap();

        for replacement in &["{NOT-A-GUID}", ""] {
            let text = PACKAGE.replace(UPGRADE, replacement);
            let p = write(&dir, "Product.wxs", &text);

            InstallerPatcher.apply(&p, &ctx()).unwrap();
            let after = std::fs::read_to_string(&p).unwrap();
            assert!(after.contains("<?define ProductVersion = \"1.4.2\" ?>"));
            assert!(after.contains("{00000000-0000-0000-0000-000000000000}"));
        }
    }

    #[test]
    fn unsupported_shape_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let text = "<Wix xmlns=\"http://wixtoolset.org/schemas/v4/wxs\">\n\
            \x20 <?define ProductVersion = \"1.0.0\" ?>\n\
            \x20 <Fragment />\n\
            </Wix>\n";
        let p = write(&dir, "Fragment.wxs", text);

        assert!(InstallerPatcher.is_applicable(&p).unwrap());
        let e = InstallerPatcher.apply(&p, &ctx()).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<PrepError>(),
            Some(PrepError::UnsupportedFormat { .. })
        ));
        assert_eq!(std::fs::read_to_string(&p).unwrap(), text);
    }

    #[test]
    fn value_text_in_other_attributes_ignored() {
        let mut values = BTreeMap::new();
        values.insert(PRODUCT_VERSION_VAR, "2.0".to_owned());
        let text = "<Bundle><Variable Name=\"ProductVersion\" Description=\" Value='old'\" Value=\"1.0\"/></Bundle>";
        let p = patch_text(text, &values).unwrap();
        assert!(p.changed);
        assert_eq!(
            p.text,
            "<Bundle><Variable Name=\"ProductVersion\" Description=\" Value='old'\" Value=\"2.0\"/></Bundle>"
        );
    }

    #[test]
    fn unquoted_defines() {
        let mut values = BTreeMap::new();
        values.insert(PRODUCT_VERSION_VAR, "2.0".to_owned());
        let text = "<Wix xmlns=\"x\"><?define ProductVersion=1.0?><?define Other = \"a\" ?></Wix>";
        let p = patch_text(text, &values).unwrap();
        assert!(p.changed);
        assert_eq!(
            p.text,
            "<Wix xmlns=\"x\"><?define ProductVersion=2.0?><?define Other = \"a\" ?></Wix>"
        );
        assert_eq!(p.found, vec!["ProductVersion".to_owned()]);
    }
}
