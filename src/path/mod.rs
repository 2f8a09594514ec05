//! The resource path parser (spec.md §4.3).
//!
//! ```text
//! path     := segment ('/' segment)* ('/$value')? ('/$ref')?
//! segment  := entityCollection ( '(' id ')' )? | navProp ( '(' id ')' )?
//! ```
//!
//! The input is the tail of the URL after `/{externalPrefix}/v1.0/`. Output
//! is a `PathChain`: an ordered sequence of `(kind, optionalID)` pairs, plus
//! terminal modifiers. Adjacent segments are cross-checked against
//! `crate::entities::is_direct_relation`.

use crate::entities::EntityKind;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegment {
    pub kind: EntityKind,
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTail {
    None,
    Value,
    Ref,
}

#[derive(Debug, Clone)]
pub struct PathChain {
    /// At least one segment; the last is the focus entity.
    pub segments: Vec<PathSegment>,
    /// `Some(name)` when the path ends in a scalar property access
    /// (`.../Things(1)/name`), in which case `segments` holds only the
    /// entity segments and the focus entity is `segments.last()`.
    pub property: Option<String>,
    pub tail: PathTail,
}

impl PathChain {
    pub fn focus(&self) -> PathSegment {
        *self.segments.last().expect("PathChain always has >= 1 segment")
    }

    /// Earlier segments with a pinned id become scoping filters on the
    /// focus query (spec.md §4.3 "the chain determines ... the set of
    /// implicit scoping filters").
    pub fn scoping_segments(&self) -> &[PathSegment] {
        &self.segments[..self.segments.len() - 1]
    }
}

pub fn parse_path(raw: &str) -> Result<PathChain, ApiError> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::NotFound);
    }

    let mut tokens: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    let mut tail = PathTail::None;
    if tokens.last() == Some(&"$ref") {
        tail = PathTail::Ref;
        tokens.pop();
    } else if tokens.last() == Some(&"$value") {
        tail = PathTail::Value;
        tokens.pop();
    }

    if tokens.is_empty() {
        return Err(ApiError::NotFound);
    }

    let mut segments = Vec::new();
    let mut property = None;

    for (i, token) in tokens.iter().enumerate() {
        let (name, id) = split_name_and_id(token)?;

        let kind = if i == 0 {
            EntityKind::from_collection_name(name)
        } else {
            EntityKind::from_nav_prop(name)
        };

        match kind {
            Some(kind) => {
                if let Some(prev) = segments.last().map(|s: &PathSegment| s.kind) {
                    if !crate::entities::is_direct_relation(prev, kind) {
                        return Err(ApiError::NoSuchRelation(format!("{prev}/{kind}")));
                    }
                }
                segments.push(PathSegment { kind, id });
            }
            None if i == tokens.len() - 1 && id.is_none() => {
                // Trailing segment that isn't a known collection/nav-prop:
                // treat as a scalar property access on the previous segment.
                if segments.is_empty() {
                    return Err(ApiError::NotFound);
                }
                property = Some(name.to_string());
            }
            None => return Err(ApiError::NotFound),
        }
    }

    if segments.is_empty() {
        return Err(ApiError::NotFound);
    }

    Ok(PathChain { segments, property, tail })
}

/// Splits `Name(123)` into `("Name", Some(123))`, or `Name` into `("Name",
/// None)`. A present-but-unparsable id (`Name(abc)`) is a 404: the
/// identifier space is integers only (spec.md §3 invariants).
fn split_name_and_id(token: &str) -> Result<(&str, Option<i64>), ApiError> {
    match token.find('(') {
        Some(start) => {
            if !token.ends_with(')') {
                return Err(ApiError::NotFound);
            }
            let name = &token[..start];
            let id_str = &token[start + 1..token.len() - 1];
            let id: i64 = id_str.parse().map_err(|_| ApiError::NotFound)?;
            Ok((name, Some(id)))
        }
        None => Ok((token, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_collection() {
        let chain = parse_path("Things").unwrap();
        assert_eq!(chain.segments.len(), 1);
        assert_eq!(chain.focus().kind, EntityKind::Thing);
        assert_eq!(chain.focus().id, None);
    }

    #[test]
    fn parses_id_and_nav_chain() {
        let chain = parse_path("Things(7)/Locations").unwrap();
        assert_eq!(chain.segments.len(), 2);
        assert_eq!(chain.segments[0], PathSegment { kind: EntityKind::Thing, id: Some(7) });
        assert_eq!(chain.focus().kind, EntityKind::Location);
    }

    #[test]
    fn rejects_relation_not_in_registry() {
        let err = parse_path("Things(1)/Sensors").unwrap_err();
        assert!(matches!(err, ApiError::NoSuchRelation(_)));
    }

    #[test]
    fn parses_scalar_property_tail() {
        let chain = parse_path("Things(1)/name").unwrap();
        assert_eq!(chain.focus().kind, EntityKind::Thing);
        assert_eq!(chain.property.as_deref(), Some("name"));
    }

    #[test]
    fn parses_value_modifier() {
        let chain = parse_path("Things(1)/name/$value").unwrap();
        assert_eq!(chain.tail, PathTail::Value);
        assert_eq!(chain.property.as_deref(), Some("name"));
    }

    #[test]
    fn parses_long_nav_chain() {
        let chain = parse_path("Datastreams(5)/Thing/Locations(3)/HistoricalLocations").unwrap();
        assert_eq!(chain.segments.len(), 4);
        assert_eq!(chain.focus().kind, EntityKind::HistoricalLocation);
    }
}
