//! Dependency Set: the project's requirements manifest.
//!
//! Only enough of the requirements format is understood to validate the file
//! and report what will be installed. Names, pins, markers and direct
//! references are recognized; per-requirement options and `\` continuations
//! are tolerated. Installation itself is delegated to the package installer
//! with `-r <manifest>`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

static REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(?P<pin>(?:===|==|~=|!=|>=|<=|>|<)\s*[^;\s,]+(?:\s*,\s*(?:===|==|~=|!=|>=|<=|>|<)\s*[^;\s,]+)*)?$",
    )
    .expect("requirement regex is valid")
});

/// `name[extras] @ location`
static NAMED_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*@\s*(?P<location>\S+)$",
    )
    .expect("reference regex is valid")
});

const ARCHIVE_SUFFIXES: &[&str] = &[".whl", ".zip", ".tar.gz", ".tgz", ".tar.bz2", ".tar.xz"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySpec {
    /// A named package, optionally pinned.
    Package {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        marker: Option<String>,
        raw: String,
    },
    /// A direct reference: `name @ url`, a local path or an archive URL.
    Reference {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        location: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        marker: Option<String>,
        raw: String,
    },
    /// An installer option line (`-r other.txt`, `-e .`, `--index-url ...`).
    Option { raw: String },
}

impl DependencySpec {
    pub fn name(&self) -> Option<&str> {
        match self {
            DependencySpec::Package { name, .. } => Some(name),
            DependencySpec::Reference { name, .. } => name.as_deref(),
            DependencySpec::Option { .. } => None,
        }
    }

    /// Whether the line installs something itself.
    pub fn is_requirement(&self) -> bool {
        !matches!(self, DependencySpec::Option { .. })
    }

    fn marker(&self) -> Option<&str> {
        match self {
            DependencySpec::Package { marker, .. } | DependencySpec::Reference { marker, .. } => {
                marker.as_deref()
            }
            DependencySpec::Option { .. } => None,
        }
    }
}

/// Normalized package name used for duplicate detection (`Foo_Bar` == `foo-bar`).
fn canonical_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

fn strip_comment(line: &str) -> &str {
    // A `#` only starts a comment at line start or after whitespace; URLs keep fragments.
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

/// Join `\`-continued lines. Each logical line keeps the number of its first line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, line) in text.lines().enumerate() {
        let (start, mut joined) = pending.take().unwrap_or((idx + 1, String::new()));
        let trimmed = line.trim_end();
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                joined.push_str(head);
                joined.push(' ');
                pending = Some((start, joined));
            }
            None => {
                joined.push_str(trimmed);
                out.push((start, joined));
            }
        }
    }
    if let Some(last) = pending {
        out.push(last);
    }
    out
}

/// Split off per-requirement options (`--hash=...`, `--config-settings ...`).
fn split_options(content: &str) -> &str {
    let bytes = content.as_bytes();
    for i in 1..bytes.len() {
        let starts_flag = bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'-');
        if starts_flag && bytes[i - 1].is_ascii_whitespace() {
            return content[..i].trim_end();
        }
    }
    content
}

/// Split `requirement ; marker`. After a URL the `;` must follow whitespace.
fn split_marker(requirement: &str) -> (&str, Option<String>) {
    let bytes = requirement.as_bytes();
    let needs_space = requirement.contains("://");
    for (i, b) in bytes.iter().enumerate() {
        if *b == b';' && (!needs_space || (i > 0 && bytes[i - 1].is_ascii_whitespace())) {
            let marker = requirement[i + 1..].split_whitespace().collect::<Vec<_>>().join(" ");
            let marker = (!marker.is_empty()).then_some(marker);
            return (requirement[..i].trim_end(), marker);
        }
    }
    (requirement, None)
}

fn is_location(requirement: &str) -> bool {
    requirement.contains("://")
        || requirement.starts_with(['.', '~'])
        || requirement.contains('/')
        || requirement.contains('\\')
        || ARCHIVE_SUFFIXES.iter().any(|s| requirement.ends_with(s))
}

fn parse_requirement(content: &str) -> Option<DependencySpec> {
    let (requirement, marker) = split_marker(split_options(content));
    let raw = content.to_string();

    if let Some(caps) = NAMED_REFERENCE.captures(requirement) {
        return Some(DependencySpec::Reference {
            name: Some(caps["name"].to_string()),
            location: caps["location"].to_string(),
            marker,
            raw,
        });
    }
    if is_location(requirement) && !requirement.contains(char::is_whitespace) {
        return Some(DependencySpec::Reference {
            name: None,
            location: requirement.to_string(),
            marker,
            raw,
        });
    }

    let caps = REQUIREMENT.captures(requirement)?;
    let pin = caps
        .name("pin")
        .map(|m| m.as_str().split_whitespace().collect::<String>());
    Some(DependencySpec::Package {
        name: caps["name"].to_string(),
        pin,
        marker,
        raw,
    })
}

/// Parse manifest text into an ordered dependency list.
///
/// The same name may appear more than once only under different environment
/// markers. `origin` only appears in error details.
pub fn parse_manifest(text: &str, origin: &str) -> Result<Vec<DependencySpec>> {
    let mut specs = Vec::new();
    let mut seen = HashSet::new();

    for (line_no, line) in logical_lines(text) {
        let content = strip_comment(&line).trim();
        if content.is_empty() {
            continue;
        }

        if content.starts_with('-') {
            specs.push(DependencySpec::Option {
                raw: content.to_string(),
            });
            continue;
        }

        let spec = parse_requirement(content).ok_or_else(|| {
            Error::environment_manifest_invalid(
                origin,
                line_no,
                format!("unrecognized requirement '{}'", content),
            )
        })?;

        if let Some(name) = spec.name() {
            let key = (canonical_name(name), spec.marker().map(str::to_string));
            if !seen.insert(key) {
                return Err(Error::environment_manifest_invalid(
                    origin,
                    line_no,
                    format!("duplicate requirement '{}'", name),
                ));
            }
        }

        specs.push(spec);
    }

    Ok(specs)
}

/// Read and parse a manifest file.
pub fn load_manifest(path: &Path) -> Result<Vec<DependencySpec>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("read manifest {}", path.display())),
        )
    })?;
    parse_manifest(&text, &path.to_string_lossy())
}
