//! Label selector matching
//!
//! Supports the subset of the Kubernetes selector grammar used to filter
//! manifests: `k = v`, `k == v`, `k != v`, `k in (a, b)`, `k notin (a, b)`,
//! `k` and `!k`, joined by commas. All clauses must hold.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

static EQUALITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9._/-]+)\s*(==|=|!=)\s*([A-Za-z0-9._-]*)$").expect("valid regex")
});
static SET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9._/-]+)\s+(in|notin)\s*\(([A-Za-z0-9._,\s-]*)\)$").expect("valid regex")
});
static EXISTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(!?)\s*([A-Za-z0-9._/-]+)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn parse(clause: &str) -> Option<Self> {
        if let Some(caps) = SET.captures(clause) {
            let key = caps[1].to_string();
            let values = caps[3]
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            return Some(match &caps[2] {
                "in" => Requirement::In(key, values),
                _ => Requirement::NotIn(key, values),
            });
        }
        if let Some(caps) = EQUALITY.captures(clause) {
            let (key, value) = (caps[1].to_string(), caps[3].to_string());
            return Some(match &caps[2] {
                "!=" => Requirement::NotEquals(key, value),
                _ => Requirement::Equals(key, value),
            });
        }
        if let Some(caps) = EXISTS.captures(clause) {
            let key = caps[2].to_string();
            return Some(if caps[1].is_empty() {
                Requirement::Exists(key)
            } else {
                Requirement::DoesNotExist(key)
            });
        }
        None
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Split on commas that are not inside a parenthesised value set
fn clauses(selector: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(selector[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(selector[start..].trim());
    out.retain(|c| !c.is_empty());
    out
}

/// Whether `labels` satisfy `selector`
///
/// An empty or missing selector matches everything, missing labels behave
/// as an empty map and an unparseable clause never matches.
pub fn matches(labels: Option<&BTreeMap<String, String>>, selector: Option<&str>) -> bool {
    let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
        return true;
    };
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    clauses(selector)
        .into_iter()
        .all(|clause| Requirement::parse(clause).is_some_and(|req| req.matches(labels)))
}

/// Render `key=value` pairs as an equality selector
pub fn equality_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches() {
        let l = labels(&[("test", "yes")]);
        assert!(matches(Some(&l), Some("")));
        assert!(matches(Some(&l), None));
        assert!(matches(None, None));
        assert!(matches(None, Some("   ")));
    }

    #[test]
    fn test_equality() {
        let l = labels(&[("test", "yes"), ("enabled", "no")]);
        assert!(matches(Some(&l), Some("test = yes")));
        assert!(matches(Some(&l), Some("test==yes")));
        assert!(!matches(Some(&l), Some("test = no")));
        assert!(matches(Some(&l), Some("test != no")));
        assert!(!matches(Some(&l), Some("test != yes")));
        assert!(matches(Some(&l), Some("test = yes, enabled = no")));
    }

    #[test]
    fn test_set_membership() {
        let l = labels(&[("test", "yes"), ("enabled", "no")]);
        assert!(matches(Some(&l), Some("test in (yes, no), enabled in (no)")));
        assert!(!matches(Some(&l), Some("test in (yes, no), enabled in (yes)")));
        assert!(matches(
            Some(&l),
            Some("test notin (no, maybe), enabled notin (yes, maybe)")
        ));
        assert!(!matches(
            Some(&l),
            Some("test notin (yes, maybe), enabled notin (no, maybe)")
        ));
    }

    #[test]
    fn test_existence() {
        let l = labels(&[("test", "yes"), ("enabled", "no")]);
        assert!(matches(Some(&l), Some("test, enabled")));
        assert!(!matches(Some(&l), Some("test, missing")));
        assert!(matches(Some(&l), Some("!missing, !disabled")));
        assert!(!matches(Some(&l), Some("!test, !disabled")));
    }

    #[test]
    fn test_mixed_clauses() {
        let l = labels(&[("test", "yes"), ("enabled", "no")]);
        assert!(matches(
            Some(&l),
            Some("test in (yes, no), !disabled, enabled, enabled = no")
        ));
        assert!(!matches(
            Some(&l),
            Some("test in (yes, no), !disabled, enabled, enabled = yes")
        ));
    }

    #[test]
    fn test_missing_labels() {
        assert!(matches(None, Some("!disabled, enabled != no")));
        assert!(!matches(None, Some("test in (yes, no), !disabled, enabled")));
        assert!(matches(Some(&BTreeMap::new()), Some("app notin (web)")));
    }

    #[test]
    fn test_invalid_clause_never_panics() {
        let l = labels(&[("test", "yes")]);
        for selector in ["test in (yes", "= yes", "test = = yes", "((", ",,,", "test in yes)"] {
            let _ = matches(Some(&l), Some(selector));
        }
        assert!(!matches(Some(&l), Some("test = = yes")));
    }

    #[test]
    fn test_qualified_keys() {
        let l = labels(&[("app.kubernetes.io/name", "web")]);
        assert!(matches(Some(&l), Some("app.kubernetes.io/name=web")));
    }

    #[test]
    fn test_equality_selector() {
        let l = labels(&[("name", "web"), ("id", "dep-1")]);
        assert_eq!(equality_selector(&l), "id=dep-1,name=web");
    }
}
