//! The OData query-option parser (spec.md §4.2).
//!
//! Parses the six supported option kinds into a `QueryOptionSet`, recursing
//! into `$expand`'s parenthesised sub-option lists. Validation against the
//! focused entity's SELECTable fields happens one layer up, in
//! `crate::plan`, which is the only place that knows the registry — this
//! module only enforces syntax.

pub mod filter;

use crate::error::ApiError;
use filter::FilterExpr;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

/// A single `$expand` term: a nav-prop name plus its own (recursively
/// parsed) option set from the parenthesised sub-option list, if any.
#[derive(Debug, Clone, Default)]
pub struct ExpandTerm {
    pub nav_prop: String,
    pub options: QueryOptionSet,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptionSet {
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub count: Option<bool>,
    pub order_by: Option<(String, OrderDir)>,
    pub select: Option<Vec<String>>,
    pub expand: Option<Vec<ExpandTerm>>,
    pub filter: Option<FilterExpr>,
}

/// Server-side cap on `$top`, matching spec.md §2/§6 (default 200).
pub const MAX_TOP: i64 = 200;

const SUPPORTED_KEYS: &[&str] = &[
    "$top", "$skip", "$count", "$orderby", "$select", "$expand", "$filter",
];

/// Parse a flat `key -> value` map of query-string parameters (already
/// URL-decoded) into a `QueryOptionSet`. Used both for the top-level request
/// query string and, recursively, for `$expand(...)`'s inner sub-options.
pub fn parse_options(params: &HashMap<String, String>) -> Result<QueryOptionSet, ApiError> {
    let mut opts = QueryOptionSet::default();

    for (key, value) in params {
        if !key.starts_with('$') {
            continue;
        }
        if !SUPPORTED_KEYS.contains(&key.as_str()) {
            return Err(ApiError::BadOption(key.clone()));
        }
        match key.as_str() {
            "$top" => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| ApiError::BadOption(format!("$top={value}")))?;
                if n < 0 {
                    return Err(ApiError::BadOption(format!("$top={value}")));
                }
                opts.top = Some(n.min(MAX_TOP));
            }
            "$skip" => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| ApiError::BadOption(format!("$skip={value}")))?;
                if n < 0 {
                    return Err(ApiError::BadOption(format!("$skip={value}")));
                }
                opts.skip = Some(n);
            }
            "$count" => {
                opts.count = Some(match value.to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(ApiError::BadOption(format!("$count={value}"))),
                });
            }
            "$orderby" => {
                opts.order_by = Some(parse_order_by(value)?);
            }
            "$select" => {
                opts.select = Some(
                    value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                );
            }
            "$expand" => {
                opts.expand = Some(parse_expand(value)?);
            }
            "$filter" => {
                opts.filter = Some(filter::parse_filter(value)?);
            }
            _ => unreachable!("filtered by SUPPORTED_KEYS above"),
        }
    }

    Ok(opts)
}

/// `<property> asc|desc`, a single term only (spec.md §4.2 table).
fn parse_order_by(value: &str) -> Result<(String, OrderDir), ApiError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(ApiError::OrderByInvalid(value.to_string()));
    }
    let dir = match parts[1].to_ascii_lowercase().as_str() {
        "asc" => OrderDir::Asc,
        "desc" => OrderDir::Desc,
        _ => return Err(ApiError::OrderByInvalid(value.to_string())),
    };
    if parts[0].is_empty() {
        return Err(ApiError::OrderByInvalid(value.to_string()));
    }
    Ok((parts[0].to_string(), dir))
}

fn parse_expand(value: &str) -> Result<Vec<ExpandTerm>, ApiError> {
    split_top_level(value, ',')
        .into_iter()
        .map(|term| {
            let term = term.trim();
            if term.is_empty() {
                return Err(ApiError::ExpandInvalid(value.to_string()));
            }
            match term.find('(') {
                Some(paren_pos) => {
                    if !term.ends_with(')') {
                        return Err(ApiError::ExpandInvalid(term.to_string()));
                    }
                    let nav_prop = term[..paren_pos].to_string();
                    let inner = &term[paren_pos + 1..term.len() - 1];
                    let sub_params = parse_sub_option_list(inner)?;
                    let options = parse_options(&sub_params)?;
                    Ok(ExpandTerm { nav_prop, options })
                }
                None => Ok(ExpandTerm {
                    nav_prop: term.to_string(),
                    options: QueryOptionSet::default(),
                }),
            }
        })
        .collect()
}

/// Sub-options inside `$expand(...)` are `;`-separated `$key=value` pairs.
fn parse_sub_option_list(inner: &str) -> Result<HashMap<String, String>, ApiError> {
    let mut map = HashMap::new();
    for clause in split_top_level(inner, ';') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (key, value) = clause
            .split_once('=')
            .ok_or_else(|| ApiError::ExpandInvalid(clause.to_string()))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

/// Split `s` on `sep` at paren-nesting depth 0 only — so a `$select=a,b`
/// nested inside `$expand=X($select=a,b)` doesn't get mistaken for a
/// top-level `$expand` term boundary.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_top_and_orderby() {
        let opts = parse_options(&map(&[("$top", "2"), ("$orderby", "name asc")])).unwrap();
        assert_eq!(opts.top, Some(2));
        assert_eq!(opts.order_by, Some(("name".to_string(), OrderDir::Asc)));
    }

    #[test]
    fn caps_top_at_server_max() {
        let opts = parse_options(&map(&[("$top", "99999")])).unwrap();
        assert_eq!(opts.top, Some(MAX_TOP));
    }

    #[test]
    fn rejects_negative_top() {
        assert!(parse_options(&map(&[("$top", "-1")])).is_err());
    }

    #[test]
    fn rejects_malformed_orderby() {
        let err = parse_options(&map(&[("$orderby", "bogus")])).unwrap_err();
        assert!(matches!(err, ApiError::OrderByInvalid(_)));
    }

    #[test]
    fn rejects_unknown_option() {
        let err = parse_options(&map(&[("$bogus", "1")])).unwrap_err();
        assert!(matches!(err, ApiError::BadOption(_)));
    }

    #[test]
    fn ignores_non_dollar_keys() {
        let opts = parse_options(&map(&[("foo", "bar")])).unwrap();
        assert!(opts.top.is_none());
    }

    #[test]
    fn parses_nested_expand_with_suboptions() {
        let opts = parse_options(&map(&[(
            "$expand",
            "Thing,Observations($top=1;$orderby=phenomenonTime desc)",
        )]))
        .unwrap();
        let expand = opts.expand.unwrap();
        assert_eq!(expand.len(), 2);
        assert_eq!(expand[0].nav_prop, "Thing");
        assert_eq!(expand[1].nav_prop, "Observations");
        assert_eq!(expand[1].options.top, Some(1));
        assert_eq!(
            expand[1].options.order_by,
            Some(("phenomenonTime".to_string(), OrderDir::Desc))
        );
    }

    #[test]
    fn parses_doubly_nested_expand() {
        let opts = parse_options(&map(&[(
            "$expand",
            "Datastreams($expand=Observations($top=1))",
        )]))
        .unwrap();
        let expand = opts.expand.unwrap();
        let inner = expand[0].options.expand.as_ref().unwrap();
        assert_eq!(inner[0].nav_prop, "Observations");
        assert_eq!(inner[0].options.top, Some(1));
    }
}
