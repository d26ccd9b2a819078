//! Dockerfile template rendering for the packages layer.
//!
//! Templates are plain text with two kinds of tags:
//!
//! - `{{ name }}` substitutes a value: `base_image` and `version_label` at any
//!   level, `fingerprint`, `name` and `sha1` inside a packages block
//! - `{{#packages}} ... {{/packages}}` repeats its body once per package
//!
//! The rendered output must parse as a Dockerfile starting with `FROM` and
//! carry the labels layer matching depends on: one `fingerprint.<fp>` label
//! per added package and the version label. Substituted values may not
//! contain quotes, backslashes or control characters.

use std::collections::BTreeMap;
use std::path::Path;

use layerpack_core::config::TemplateSource;
use layerpack_core::error::{LayerError, Result};
use layerpack_core::labels::fingerprint_label;
use layerpack_core::model::Package;

use crate::dockerfile::Dockerfile;

/// Template used when no other source is configured.
pub const BUILTIN_TEMPLATE: &str = "\
FROM {{ base_image }}

ADD packages-src /var/vcap/packages-src/
{{#packages}}LABEL fingerprint.{{ fingerprint }}=\"{{ name }}\"
{{/packages}}LABEL {{ version_label }}
";

const PACKAGES_BLOCK: &str = "packages";
const GLOBAL_VARS: &[&str] = &["base_image", "version_label"];
const PACKAGE_VARS: &[&str] = &["fingerprint", "name", "sha1"];

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Lit(String),
    Var(String),
    Packages(Vec<Part>),
}

/// Values a template is rendered with.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub base_image: &'a str,
    pub packages: &'a [Package],
    pub version_label: &'a str,
}

/// A parsed Dockerfile template.
#[derive(Debug, Clone)]
pub struct DockerfileTemplate {
    parts: Vec<Part>,
}

impl DockerfileTemplate {
    /// Load and parse a template from its configured source.
    pub fn from_source(source: &TemplateSource) -> Result<Self> {
        match source {
            TemplateSource::Builtin => Self::parse(BUILTIN_TEMPLATE),
            TemplateSource::Inline { content } => Self::parse(content),
            TemplateSource::File { path } => Self::from_file(path),
        }
    }

    /// Parse a template from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LayerError::Template(format!(
                "Failed to read Dockerfile template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse template text.
    pub fn parse(source: &str) -> Result<Self> {
        let mut top: Vec<Part> = Vec::new();
        let mut block: Option<Vec<Part>> = None;
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            let (literal, after_open) = rest.split_at(open);
            push_literal(block.as_mut().unwrap_or(&mut top), literal);

            let close = after_open.find("}}").ok_or_else(|| {
                LayerError::Template(format!(
                    "unclosed tag starting at '{}'",
                    truncate(after_open)
                ))
            })?;
            let tag = after_open[2..close].trim();
            rest = &after_open[close + 2..];

            if let Some(name) = tag.strip_prefix('#') {
                let name = name.trim();
                if name != PACKAGES_BLOCK {
                    return Err(LayerError::Template(format!("unknown block '{}'", name)));
                }
                if block.is_some() {
                    return Err(LayerError::Template(
                        "nested packages blocks are not supported".to_string(),
                    ));
                }
                block = Some(Vec::new());
            } else if let Some(name) = tag.strip_prefix('/') {
                let name = name.trim();
                match block.take() {
                    Some(body) if name == PACKAGES_BLOCK => top.push(Part::Packages(body)),
                    Some(_) => {
                        return Err(LayerError::Template(format!(
                            "mismatched closing tag '{}'",
                            name
                        )))
                    }
                    None => {
                        return Err(LayerError::Template(format!(
                            "closing tag '{}' without open block",
                            name
                        )))
                    }
                }
            } else {
                let known = GLOBAL_VARS.contains(&tag)
                    || (block.is_some() && PACKAGE_VARS.contains(&tag));
                if !known {
                    return Err(LayerError::Template(format!("unknown placeholder '{}'", tag)));
                }
                block
                    .as_mut()
                    .unwrap_or(&mut top)
                    .push(Part::Var(tag.to_string()));
            }
        }

        if block.is_some() {
            return Err(LayerError::Template("unclosed packages block".to_string()));
        }
        push_literal(&mut top, rest);

        Ok(Self { parts: top })
    }

    /// Render the template and check the result is a usable Dockerfile.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> Result<String> {
        let mut out = String::new();
        render_parts(&self.parts, ctx, None, &mut out)?;

        let dockerfile = Dockerfile::parse(&out)
            .map_err(|e| LayerError::Template(format!("rendered Dockerfile is invalid: {}", e)))?;
        let labels = dockerfile.labels();
        check_label_contract(&labels, ctx)?;

        tracing::debug!(
            base_image = dockerfile.base_image().unwrap_or_default(),
            labels = labels.len(),
            "Rendered packages layer Dockerfile"
        );

        Ok(out)
    }
}

/// The rendered labels must let layer matching find the image again: one
/// fingerprint label per added package and the exact version label.
fn check_label_contract(
    labels: &BTreeMap<String, String>,
    ctx: &TemplateContext<'_>,
) -> Result<()> {
    for pkg in ctx.packages {
        let key = fingerprint_label(&pkg.fingerprint);
        if !labels.contains_key(&key) {
            return Err(LayerError::Template(format!(
                "rendered Dockerfile is missing label {} for package {}",
                key, pkg.name
            )));
        }
    }

    let (key, value) = ctx
        .version_label
        .split_once('=')
        .unwrap_or((ctx.version_label, ""));
    if labels.get(key).map(String::as_str) != Some(value) {
        return Err(LayerError::Template(format!(
            "rendered Dockerfile is missing label {}",
            ctx.version_label
        )));
    }
    Ok(())
}

/// Substituted values must not be able to break out of a quoted label
/// value or start a new instruction.
fn check_value<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    match value.chars().find(|&c| matches!(c, '"' | '\\') || c.is_control()) {
        Some(c) => Err(LayerError::Template(format!(
            "value of '{}' contains forbidden character {:?}: {:?}",
            name, c, value
        ))),
        None => Ok(value),
    }
}

fn push_literal(parts: &mut Vec<Part>, literal: &str) {
    if !literal.is_empty() {
        parts.push(Part::Lit(literal.to_string()));
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(24) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn render_parts(
    parts: &[Part],
    ctx: &TemplateContext<'_>,
    package: Option<&Package>,
    out: &mut String,
) -> Result<()> {
    for part in parts {
        match part {
            Part::Lit(text) => out.push_str(text),
            Part::Var(name) => out.push_str(check_value(name, lookup(name, ctx, package)?)?),
            Part::Packages(body) => {
                for pkg in ctx.packages {
                    render_parts(body, ctx, Some(pkg), out)?;
                }
            }
        }
    }
    Ok(())
}

fn lookup<'a>(
    name: &str,
    ctx: &TemplateContext<'a>,
    package: Option<&'a Package>,
) -> Result<&'a str> {
    match (name, package) {
        ("base_image", _) => Ok(ctx.base_image),
        ("version_label", _) => Ok(ctx.version_label),
        ("fingerprint", Some(pkg)) => Ok(&pkg.fingerprint),
        ("name", Some(pkg)) => Ok(&pkg.name),
        ("sha1", Some(pkg)) => Ok(&pkg.sha1),
        _ => Err(LayerError::Template(format!(
            "placeholder '{}' has no value here",
            name
        ))),
    }
}
