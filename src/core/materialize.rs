//! Turn a raw template plus resolved values into final artifact text.

use std::collections::{BTreeMap, HashMap};

use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use serde_yml::Value;

use crate::error::{Error, Result};
use crate::placeholder::extract_markers;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Materialized {
    pub content: String,
    /// Placeholder names still present in `content`, in order of appearance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    pub namespace_injected: bool,
}

/// Substitute `values` into `raw`, inject `namespace` when the first
/// top-level `metadata:` block lacks one, and validate the result as YAML.
///
/// Placeholders without a non-empty value are left in place and reported in
/// `Materialized::unresolved`.
pub fn materialize(
    template_name: &str,
    raw: &str,
    values: &HashMap<String, String>,
    namespace: Option<&str>,
) -> Result<Materialized> {
    let substituted = substitute(raw, values)?;

    let namespace = namespace.map(str::trim).filter(|ns| !ns.is_empty());
    let (content, namespace_injected) = match namespace.and_then(|ns| inject_namespace(&substituted, ns)) {
        Some(injected) => (injected, true),
        None => (substituted, false),
    };

    validate_yaml(template_name, &content)?;

    let mut unresolved: Vec<String> = Vec::new();
    for marker in extract_markers(&content) {
        if !unresolved.contains(&marker.name) {
            unresolved.push(marker.name);
        }
    }

    Ok(Materialized {
        content,
        unresolved,
        namespace_injected,
    })
}

/// Replace every `${name}` (and `${name#[...]}`) occurrence, matching the name
/// case-insensitively. Names are applied in sorted order so the output does
/// not depend on map iteration order.
pub fn substitute(raw: &str, values: &HashMap<String, String>) -> Result<String> {
    let ordered: BTreeMap<&str, &str> = values
        .iter()
        .map(|(k, v)| (k.trim(), v.as_str()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect();

    let mut content = raw.to_string();
    for (name, value) in ordered {
        let pattern = format!(r"(?i)\$\{{\s*{}\s*(?:#\[[^\]]*\])?\s*\}}", regex::escape(name));
        let re = Regex::new(&pattern).map_err(|e| {
            Error::validation_invalid_argument(
                "values",
                format!("Invalid placeholder name '{}': {}", name, e),
                Some(name.to_string()),
                None,
            )
        })?;
        content = re.replace_all(&content, NoExpand(value)).into_owned();
    }

    Ok(content)
}

/// Insert `namespace: <ns>` as the first child of the first top-level
/// `metadata:` block. Returns `None` when there is no such block or it
/// already declares a namespace.
pub fn inject_namespace(content: &str, namespace: &str) -> Option<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let metadata_idx = lines
        .iter()
        .position(|line| strip_comment(line).trim_end() == "metadata:")?;

    let mut child_indent: Option<usize> = None;
    for line in &lines[metadata_idx + 1..] {
        let trimmed = line.trim_start();
        if trimmed.trim_end().is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        if indent == 0 {
            break;
        }
        let expected = *child_indent.get_or_insert(indent);
        if indent == expected && trimmed.starts_with("namespace:") {
            return None;
        }
    }

    let indent = " ".repeat(child_indent.unwrap_or(2));
    let line_ending = if lines[metadata_idx].ends_with('\r') { "\r" } else { "" };
    let injected = format!("{}namespace: {}{}", indent, namespace, line_ending);

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    out.insert(metadata_idx + 1, injected);
    Some(out.join("\n"))
}

/// Drop a trailing `# comment`. A `#` only starts a comment at the beginning
/// of the line or after whitespace.
fn strip_comment(line: &str) -> &str {
    let mut previous: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        if ch == '#' && previous.map_or(true, char::is_whitespace) {
            return &line[..idx];
        }
        previous = Some(ch);
    }
    line
}

/// Ensure every document in `content` parses as YAML.
pub fn validate_yaml(template_name: &str, content: &str) -> Result<()> {
    for document in serde_yml::Deserializer::from_str(content) {
        Value::deserialize(document).map_err(|e| Error::template_invalid(template_name, &e))?;
    }
    Ok(())
}
