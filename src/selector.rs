//! Label selector parsing and matching
//!
//! Supports the string form accepted by `kubectl -l` and the API server's
//! `labelSelector` query parameter:
//!
//! - equality: `env=prod`, `env==prod`, `env!=dev`
//! - set-based: `tier in (web, api)`, `tier notin (batch)`
//! - existence: `team`, `!legacy`
//! - numeric: `replicas>1`, `priority<10`
//!
//! Requirements are comma separated and all of them must hold. Everything
//! except the numeric comparisons is evaluated by [`kube::core::Expression`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Expression, Selector as KubeSelector, SelectorExt};

use crate::error::{Error, Result};

const MAX_VALUE_LEN: usize = 63;

/// A single requirement of a label selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Equality, set-based and existence requirements
    Label(Expression),
    /// The label exists and holds an integer strictly greater than `value`
    GreaterThan { key: String, value: i64 },
    /// The label exists and holds an integer strictly less than `value`
    LessThan { key: String, value: i64 },
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Label(expr) => expr.matches(labels),
            Requirement::GreaterThan { key, value } => {
                integer_label(labels, key).is_some_and(|v| v > *value)
            }
            Requirement::LessThan { key, value } => {
                integer_label(labels, key).is_some_and(|v| v < *value)
            }
        }
    }
}

fn integer_label(labels: &BTreeMap<String, String>, key: &str) -> Option<i64> {
    labels.get(key).and_then(|v| v.parse().ok())
}

/// A parsed label selector expression
///
/// The original expression is kept so it can be handed to the API server
/// verbatim for server-side filtering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl Selector {
    /// The empty selector, matching every label set
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let raw = expr.trim();
        if raw.is_empty() {
            return Ok(Self::everything());
        }

        let invalid = |reason: String| Error::InvalidSelector {
            selector: raw.to_string(),
            reason,
        };

        let requirements = split_top_level(raw)
            .map_err(invalid)?
            .into_iter()
            .map(|term| parse_requirement(term).map_err(invalid))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            requirements,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split on commas that are not inside a parenthesised value list
fn split_top_level(expr: &str) -> std::result::Result<Vec<&str>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in expr.char_indices() {
        match ch {
            '(' => {
                if depth > 0 {
                    return Err("nested parentheses".to_string());
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err("unbalanced ')'".to_string());
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                terms.push(expr[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    terms.push(expr[start..].trim());

    if terms.iter().any(|t| t.is_empty()) {
        return Err("empty requirement".to_string());
    }
    Ok(terms)
}

fn parse_requirement(term: &str) -> std::result::Result<Requirement, String> {
    if let Some(open) = term.find('(') {
        return parse_set_requirement(term, open);
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement::Label(Expression::DoesNotExist(key.to_string())));
    }

    if let Some((key, value)) = term.split_once("!=") {
        let (key, value) = key_value(key, value)?;
        return Ok(Requirement::Label(Expression::NotEqual(key, value)));
    }

    if let Some((key, value)) = term.split_once('>') {
        let (key, value) = key_integer(key, value)?;
        return Ok(Requirement::GreaterThan { key, value });
    }

    if let Some((key, value)) = term.split_once('<') {
        let (key, value) = key_integer(key, value)?;
        return Ok(Requirement::LessThan { key, value });
    }

    if let Some((key, value)) = term.split_once('=') {
        let value = value.strip_prefix('=').unwrap_or(value);
        let (key, value) = key_value(key, value)?;
        return Ok(Requirement::Label(Expression::Equal(key, value)));
    }

    validate_key(term)?;
    Ok(Requirement::Label(Expression::Exists(term.to_string())))
}

fn key_value(key: &str, value: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = (key.trim(), value.trim());
    validate_key(key)?;
    validate_value(value)?;
    Ok((key.to_string(), value.to_string()))
}

fn key_integer(key: &str, value: &str) -> std::result::Result<(String, i64), String> {
    let (key, value) = key_value(key, value)?;
    let value = value
        .parse()
        .map_err(|_| format!("value for {key:?} must be an integer, got {value:?}"))?;
    Ok((key, value))
}

fn parse_set_requirement(term: &str, open: usize) -> std::result::Result<Requirement, String> {
    let inner = term[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("expected ')' at end of {term:?}"))?;

    let mut head = term[..open].split_whitespace();
    let (key, op) = match (head.next(), head.next(), head.next()) {
        (Some(key), Some(op), None) => (key, op),
        _ => return Err(format!("expected '<key> in|notin (...)' in {term:?}")),
    };
    validate_key(key)?;

    let values = inner
        .split(',')
        .map(str::trim)
        .map(|v| validate_value(v).map(|_| v.to_string()))
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    if values.iter().all(|v| v.is_empty()) {
        return Err(format!("empty value set for key {key:?}"));
    }

    let key = key.to_string();
    match op {
        "in" => Ok(Requirement::Label(Expression::In(key, values))),
        "notin" => Ok(Requirement::Label(Expression::NotIn(key, values))),
        other => Err(format!("unknown set operator {other:?}")),
    }
}

fn validate_key(key: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            let prefix_ok = prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
            if prefix.is_empty() || !prefix_ok {
                return Err(format!("invalid label key prefix in {key:?}"));
            }
            name
        }
        None => key,
    };
    if name.is_empty() || name.len() > MAX_VALUE_LEN || !is_label_name(name) {
        return Err(format!("invalid label key {key:?}"));
    }
    Ok(())
}

fn validate_value(value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_VALUE_LEN || !is_label_name(value) {
        return Err(format!("invalid label value {value:?}"));
    }
    Ok(())
}

/// `[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?`
fn is_label_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    let edge_ok = |b: &u8| b.is_ascii_alphanumeric();
    bytes.first().is_some_and(edge_ok)
        && bytes.last().is_some_and(edge_ok)
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Evaluate a structured `LabelSelector` against a label set
///
/// An empty selector matches everything, as it does for `policy/v1`
/// PodDisruptionBudgets. A selector that does not convert (unknown
/// operator, set operator without values) never matches.
pub fn label_selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    KubeSelector::try_from(selector.clone()).is_ok_and(|s| s.matches(labels))
}
