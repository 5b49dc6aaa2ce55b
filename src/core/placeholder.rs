//! Placeholder discovery for resource templates.
//!
//! Templates mark substitution points as `${name}` or, when suggesting
//! values, `${name#[default1, default2]}`. Scanning walks every document of
//! the parsed YAML (keys, values, nested sequences and mappings) and groups
//! the discovered names by category.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yml::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Basic,
    Image,
    Service,
    Resources,
    Deployment,
    Node,
    Misc,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Basic,
        Category::Image,
        Category::Service,
        Category::Resources,
        Category::Deployment,
        Category::Node,
        Category::Misc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Basic => "basic",
            Category::Image => "image",
            Category::Service => "service",
            Category::Resources => "resources",
            Category::Deployment => "deployment",
            Category::Node => "node",
            Category::Misc => "misc",
        }
    }
}

/// Ordered category rules. The first rule with a keyword contained in the
/// lowercased name wins, so `node_name` is `Basic`, not `Node`.
const CATEGORY_RULES: &[(&[&str], Category)] = &[
    (&["namespace", "name"], Category::Basic),
    (&["image", "repository", "tag"], Category::Image),
    (&["service", "port"], Category::Service),
    (&["cpu", "memory"], Category::Resources),
    (&["replica", "deployment"], Category::Deployment),
    (&["node", "affinity"], Category::Node),
];

pub fn categorize(name: &str) -> Category {
    let lowered = name.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or(Category::Misc)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub default_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGroup {
    pub category: Category,
    pub placeholders: Vec<Placeholder>,
}

/// Placeholders of one template, grouped by category in `Category::ALL` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderCatalog {
    pub groups: Vec<CatalogGroup>,
}

impl PlaceholderCatalog {
    pub fn iter(&self) -> impl Iterator<Item = &Placeholder> {
        self.groups.iter().flat_map(|g| g.placeholders.iter())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Placeholder> {
        self.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|p| p.name.clone()).collect()
    }

    /// Fill `resolved_value` from `values`. Exact key match is preferred,
    /// then a case-insensitive match. Empty values leave the entry unresolved.
    pub fn resolve(&mut self, values: &HashMap<String, String>) {
        for placeholder in self.groups.iter_mut().flat_map(|g| g.placeholders.iter_mut()) {
            placeholder.resolved_value = lookup_value(values, &placeholder.name);
        }
    }

    pub fn unresolved(&self) -> Vec<String> {
        self.iter()
            .filter(|p| p.resolved_value.is_none())
            .map(|p| p.name.clone())
            .collect()
    }
}

fn lookup_value(values: &HashMap<String, String>, name: &str) -> Option<String> {
    values
        .get(name)
        .or_else(|| {
            values
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .filter(|value| !value.is_empty())
        .cloned()
}

/// A single `${...}` occurrence found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub name: String,
    pub defaults: Option<Vec<String>>,
}

pub(crate) fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"\$\{([^}#]+)(?:#\[([^\]]*)\])?\}").expect("placeholder marker pattern")
    })
}

/// Extract markers from a flat string, in order of appearance.
pub fn extract_markers(text: &str) -> Vec<Marker> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().trim();
            if name.is_empty() {
                return None;
            }
            Some(Marker {
                name: name.to_string(),
                defaults: caps.get(2).map(|m| parse_defaults(m.as_str())),
            })
        })
        .collect()
}

fn parse_defaults(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| strip_quotes(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Scan a template and build its placeholder catalog.
///
/// Fails with `TemplateScanFailed` if the template is not parseable YAML.
pub fn scan(template_name: &str, text: &str) -> Result<PlaceholderCatalog> {
    let mut collector = Collector::default();

    for document in serde_yml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::template_scan_failed(template_name, &e))?;
        collector.walk(&value);
    }

    Ok(collector.into_catalog())
}

#[derive(Default)]
struct Collector {
    order: Vec<Placeholder>,
    index: HashMap<String, usize>,
}

impl Collector {
    fn walk(&mut self, value: &Value) {
        match value {
            Value::String(s) => self.record_all(s),
            Value::Sequence(items) => items.iter().for_each(|item| self.walk(item)),
            Value::Mapping(map) => {
                for (key, item) in map {
                    self.walk(key);
                    self.walk(item);
                }
            }
            Value::Tagged(tagged) => self.walk(&tagged.value),
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn record_all(&mut self, text: &str) {
        for marker in extract_markers(text) {
            self.record(marker);
        }
    }

    fn record(&mut self, marker: Marker) {
        let defaults = marker.defaults.unwrap_or_default();

        if let Some(&idx) = self.index.get(&marker.name) {
            let existing = &mut self.order[idx];
            if existing.default_values.is_empty() && !defaults.is_empty() {
                existing.default_values = defaults;
            }
            return;
        }

        self.index.insert(marker.name.clone(), self.order.len());
        self.order.push(Placeholder {
            category: categorize(&marker.name),
            name: marker.name,
            default_values: defaults,
            resolved_value: None,
        });
    }

    fn into_catalog(self) -> PlaceholderCatalog {
        let mut groups: Vec<CatalogGroup> = Category::ALL
            .iter()
            .map(|category| CatalogGroup {
                category: *category,
                placeholders: Vec::new(),
            })
            .collect();

        for placeholder in self.order {
            // Category::ALL is declared in enum order.
            groups[placeholder.category as usize].placeholders.push(placeholder);
        }

        groups.retain(|g| !g.placeholders.is_empty());
        PlaceholderCatalog { groups }
    }
}
