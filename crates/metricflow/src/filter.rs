// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pass/drop filtering of metric names, fields and tags.
//!
//! For each dimension (name, field key, tag) the precedence is:
//! - pass list only: the item passes iff it matches the pass list
//! - drop list only: the item passes iff it does not match the drop list
//! - both: the item must match the pass list and must not match the drop list
//! - neither: the item passes
//!
//! A value that satisfies both lists is dropped.

use crate::errors::FilterError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Debug;

/// Pattern matching capability consumed by [`Filter`].
pub trait Matcher: Send + Sync + Debug {
    fn matches(&self, candidate: &str) -> bool;
}

/// Matches any of a list of glob patterns.
///
/// Supported syntax: `*` (any run of characters), `?` (one character), `[abc]` / `[!abc]`
/// character classes and `{a,b}` alternatives. Everything else is literal.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    regex: Regex,
}

impl GlobMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, FilterError> {
        let alternatives = patterns
            .iter()
            .map(|p| glob_to_regex(p))
            .collect::<Vec<_>>()
            .join("|");
        let source = format!("^(?:{alternatives})$");
        let regex = Regex::new(&source).map_err(|source| FilterError::Pattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self { regex })
    }
}

impl Matcher for GlobMatcher {
    fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut in_class = false;
    let mut alternation_depth = 0usize;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if in_class {
            match c {
                ']' => {
                    in_class = false;
                    out.push(']');
                }
                '\\' => out.push_str("\\\\"),
                other => out.push(other),
            }
            continue;
        }
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
            }
            '{' => {
                alternation_depth += 1;
                out.push_str("(?:");
            }
            '}' if alternation_depth > 0 => {
                alternation_depth -= 1;
                out.push(')');
            }
            ',' if alternation_depth > 0 => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// Compiles a pattern list. An empty list means "not configured" and yields `None`.
pub fn compile(patterns: &[String]) -> Result<Option<Box<dyn Matcher>>, FilterError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    Ok(Some(Box::new(GlobMatcher::new(patterns)?)))
}

/// Tag name and the value patterns applied to it
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TagFilterConfig {
    pub name: String,
    #[serde(default)]
    pub filter: Vec<String>,
}

/// Declarative filter lists, as found in input and output configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    pub name_pass: Vec<String>,
    pub name_drop: Vec<String>,
    pub field_pass: Vec<String>,
    pub field_drop: Vec<String>,
    pub tag_pass: Vec<TagFilterConfig>,
    pub tag_drop: Vec<TagFilterConfig>,
    pub tag_include: Vec<String>,
    pub tag_exclude: Vec<String>,
}

impl FilterConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug)]
struct TagFilter {
    name: String,
    matcher: Option<Box<dyn Matcher>>,
}

impl TagFilter {
    fn matches(&self, tags: &HashMap<String, String>) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };
        tags.get(&self.name).is_some_and(|value| matcher.matches(value))
    }
}

/// Compiled filter
#[derive(Debug, Default)]
pub struct Filter {
    name_pass: Option<Box<dyn Matcher>>,
    name_drop: Option<Box<dyn Matcher>>,
    field_pass: Option<Box<dyn Matcher>>,
    field_drop: Option<Box<dyn Matcher>>,
    tag_pass: Vec<TagFilter>,
    tag_drop: Vec<TagFilter>,
    tag_include: Option<Box<dyn Matcher>>,
    tag_exclude: Option<Box<dyn Matcher>>,
    active: bool,
}

impl Filter {
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        let tag_filters = |entries: &[TagFilterConfig]| -> Result<Vec<TagFilter>, FilterError> {
            entries
                .iter()
                .map(|entry| {
                    Ok(TagFilter {
                        name: entry.name.clone(),
                        matcher: compile(&entry.filter)?,
                    })
                })
                .collect()
        };

        Ok(Self {
            name_pass: compile(&config.name_pass)?,
            name_drop: compile(&config.name_drop)?,
            field_pass: compile(&config.field_pass)?,
            field_drop: compile(&config.field_drop)?,
            tag_pass: tag_filters(&config.tag_pass)?,
            tag_drop: tag_filters(&config.tag_drop)?,
            tag_include: compile(&config.tag_include)?,
            tag_exclude: compile(&config.tag_exclude)?,
            active: !config.is_empty(),
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns false if the metric should be filtered out.
    ///
    /// Non-passing fields and projected-away tags are deleted from the maps in place.
    pub fn apply<V>(
        &self,
        name: &str,
        fields: &mut HashMap<String, V>,
        tags: &mut HashMap<String, String>,
    ) -> bool {
        if !self.active {
            return true;
        }

        if !self.should_name_pass(name) {
            return false;
        }

        if !self.should_tags_pass(tags) {
            return false;
        }

        fields.retain(|key, _| self.should_field_pass(key));
        if fields.is_empty() {
            return false;
        }

        self.filter_tags(tags);
        true
    }

    fn should_name_pass(&self, name: &str) -> bool {
        pass_drop(self.name_pass.as_deref(), self.name_drop.as_deref(), name)
    }

    fn should_field_pass(&self, key: &str) -> bool {
        pass_drop(self.field_pass.as_deref(), self.field_drop.as_deref(), key)
    }

    fn should_tags_pass(&self, tags: &HashMap<String, String>) -> bool {
        let pass = || self.tag_pass.iter().any(|f| f.matches(tags));
        let drop = || !self.tag_drop.iter().any(|f| f.matches(tags));

        match (self.tag_pass.is_empty(), self.tag_drop.is_empty()) {
            (false, false) => pass() && drop(),
            (false, true) => pass(),
            (true, false) => drop(),
            (true, true) => true,
        }
    }

    fn filter_tags(&self, tags: &mut HashMap<String, String>) {
        if let Some(include) = &self.tag_include {
            tags.retain(|key, _| include.matches(key));
        }
        if let Some(exclude) = &self.tag_exclude {
            tags.retain(|key, _| !exclude.matches(key));
        }
    }
}

fn pass_drop(pass: Option<&dyn Matcher>, drop: Option<&dyn Matcher>, candidate: &str) -> bool {
    match (pass, drop) {
        (Some(pass), Some(drop)) => pass.matches(candidate) && !drop.matches(candidate),
        (Some(pass), None) => pass.matches(candidate),
        (None, Some(drop)) => !drop.matches(candidate),
        (None, None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn fields(keys: &[&str]) -> HashMap<String, i64> {
        keys.iter().map(|k| ((*k).to_string(), 1)).collect()
    }

    #[test]
    fn test_glob_matcher() {
        let matcher = GlobMatcher::new(&strings(&["cpu*", "mem", "disk?", "net.{in,out}", "[ab]x"]))
            .expect("compile failed");
        assert!(matcher.matches("cpu"));
        assert!(matcher.matches("cpu_total"));
        assert!(matcher.matches("mem"));
        assert!(!matcher.matches("memory"));
        assert!(matcher.matches("disk1"));
        assert!(!matcher.matches("disk12"));
        assert!(matcher.matches("net.in"));
        assert!(!matcher.matches("net.err"));
        assert!(matcher.matches("ax"));
        assert!(!matcher.matches("cx"));
    }

    #[test]
    fn test_glob_negated_class_and_literals() {
        let matcher = GlobMatcher::new(&strings(&["[!a]b", "a.b+c"])).expect("compile failed");
        assert!(matcher.matches("zb"));
        assert!(!matcher.matches("ab"));
        assert!(matcher.matches("a.b+c"));
        assert!(!matcher.matches("aXb+c"));
    }

    #[test]
    fn test_inactive_filter_passes_everything() {
        let filter = Filter::new(&FilterConfig::default()).unwrap();
        assert!(!filter.is_active());
        let mut f = fields(&["a"]);
        let mut t = tags(&[("x", "y")]);
        assert!(filter.apply("anything", &mut f, &mut t));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_name_pass_and_drop_is_conjunction() {
        let filter = Filter::new(&FilterConfig {
            name_pass: strings(&["cpu"]),
            name_drop: strings(&["cpu"]),
            ..Default::default()
        })
        .unwrap();
        assert!(!filter.apply("cpu", &mut fields(&["usage"]), &mut tags(&[])));
    }

    #[test]
    fn test_name_pass_only_and_drop_only() {
        let pass = Filter::new(&FilterConfig {
            name_pass: strings(&["cpu*"]),
            ..Default::default()
        })
        .unwrap();
        assert!(pass.apply("cpu0", &mut fields(&["a"]), &mut tags(&[])));
        assert!(!pass.apply("mem", &mut fields(&["a"]), &mut tags(&[])));

        let drop = Filter::new(&FilterConfig {
            name_drop: strings(&["cpu*"]),
            ..Default::default()
        })
        .unwrap();
        assert!(!drop.apply("cpu0", &mut fields(&["a"]), &mut tags(&[])));
        assert!(drop.apply("mem", &mut fields(&["a"]), &mut tags(&[])));
    }

    #[test]
    fn test_field_filter_prunes_and_rejects_when_empty() {
        let filter = Filter::new(&FilterConfig {
            field_pass: strings(&["usage_*"]),
            field_drop: strings(&["usage_idle"]),
            ..Default::default()
        })
        .unwrap();

        let mut f = fields(&["usage_user", "usage_idle", "time_user"]);
        assert!(filter.apply("cpu", &mut f, &mut tags(&[])));
        assert_eq!(f.keys().collect::<Vec<_>>(), vec!["usage_user"]);

        let mut f = fields(&["usage_idle", "time_user"]);
        assert!(!filter.apply("cpu", &mut f, &mut tags(&[])));
        assert!(f.is_empty());
    }

    #[test]
    fn test_tag_pass_and_drop() {
        let filter = Filter::new(&FilterConfig {
            tag_pass: vec![
                TagFilterConfig {
                    name: "cpu".to_string(),
                    filter: strings(&["cpu*"]),
                },
                TagFilterConfig {
                    name: "skipped".to_string(),
                    filter: vec![],
                },
            ],
            tag_drop: vec![TagFilterConfig {
                name: "cpu".to_string(),
                filter: strings(&["cpu7"]),
            }],
            ..Default::default()
        })
        .unwrap();

        assert!(filter.apply("m", &mut fields(&["a"]), &mut tags(&[("cpu", "cpu0")])));
        assert!(!filter.apply("m", &mut fields(&["a"]), &mut tags(&[("cpu", "cpu7")])));
        assert!(!filter.apply("m", &mut fields(&["a"]), &mut tags(&[("cpu", "total")])));
        assert!(!filter.apply("m", &mut fields(&["a"]), &mut tags(&[("skipped", "x")])));
    }

    #[test]
    fn test_tag_pass_entry_without_pattern_never_passes() {
        let filter = Filter::new(&FilterConfig {
            tag_pass: vec![TagFilterConfig {
                name: "cpu".to_string(),
                filter: vec![],
            }],
            ..Default::default()
        })
        .unwrap();
        assert!(!filter.apply("m", &mut fields(&["a"]), &mut tags(&[("cpu", "cpu0")])));
    }

    #[test]
    fn test_tag_include_and_exclude() {
        let filter = Filter::new(&FilterConfig {
            tag_include: strings(&["host", "cpu*"]),
            tag_exclude: strings(&["cpu_id"]),
            ..Default::default()
        })
        .unwrap();
        let mut t = tags(&[("host", "h"), ("cpu", "0"), ("cpu_id", "1"), ("dc", "eu")]);
        assert!(filter.apply("m", &mut fields(&["a"]), &mut t));
        let mut keys: Vec<_> = t.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, strings(&["cpu", "host"]));
    }
}
