//! The row assembler (spec.md §4.5): turns the flat row set a compiled
//! `PlanNode` query returns into a nested entity tree.
//!
//! Grounded in the teacher's `assemble_trace` (`handlers/traces.rs`): decode
//! first-seen order and a dedup map keyed by id, then recurse per child
//! relation. The one difference from a single-level span tree is that
//! dedup has to happen independently *per parent row group*, not once
//! globally — the same child id can legitimately recur under two different
//! parents when a many-to-many link table is involved.

use crate::entities::Entity;
use crate::error::ApiError;
use crate::plan::PlanNode;
use crate::registry;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;

fn column_prefix(kind: crate::entities::EntityKind, query_index: usize) -> String {
    format!("{}_q{}", registry::entry(kind).table, query_index)
}

/// Build the entity tree for `node` out of the flat rows its compiled
/// query produced. Never re-reads `rows`; one pass, id order preserved.
pub fn assemble(node: &PlanNode, rows: &[PgRow]) -> Result<Vec<Entity>, ApiError> {
    let refs: Vec<&PgRow> = rows.iter().collect();
    assemble_refs(node, &refs)
}

fn assemble_refs(node: &PlanNode, rows: &[&PgRow]) -> Result<Vec<Entity>, ApiError> {
    let prefix = column_prefix(node.kind, node.query_index);
    let id_alias = format!("{prefix}_id");

    let mut order: Vec<i64> = Vec::new();
    let mut groups: HashMap<i64, Vec<&PgRow>> = HashMap::new();
    for &row in rows {
        let id: i64 = row.try_get(id_alias.as_str()).map_err(ApiError::from)?;
        if !groups.contains_key(&id) {
            order.push(id);
        }
        groups.entry(id).or_default().push(row);
    }

    let factory = registry::entry(node.kind).factory;
    let mut out = Vec::with_capacity(order.len());
    for id in order {
        let group = &groups[&id];
        let mut entity = factory(group[0], &prefix)?;

        for child in &node.children {
            let child_id_alias = format!("{}_id", column_prefix(child.kind, child.query_index));
            let present: Vec<&PgRow> = group
                .iter()
                .copied()
                .filter(|r| matches!(r.try_get::<Option<i64>, _>(child_id_alias.as_str()), Ok(Some(_))))
                .collect();
            for child_entity in assemble_refs(child, &present)? {
                entity.attach_child(child.kind, child_entity);
            }
        }

        out.push(entity);
    }

    Ok(out)
}

/// The dedup/ordering core of `assemble_refs`, isolated from row decoding
/// so it can be exercised without a live connection: given the id column's
/// values in row order, returns the first-seen id order plus the row
/// indices belonging to each id.
fn first_seen_groups(ids: &[i64]) -> (Vec<i64>, HashMap<i64, Vec<usize>>) {
    let mut order = Vec::new();
    let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, &id) in ids.iter().enumerate() {
        if !groups.contains_key(&id) {
            order.push(id);
        }
        groups.entry(id).or_default().push(i);
    }
    (order, groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_repeated_ids_preserving_first_seen_order() {
        let (order, groups) = first_seen_groups(&[3, 1, 1, 2, 3, 3]);
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(groups[&3], vec![0, 4, 5]);
        assert_eq!(groups[&1], vec![1, 2]);
        assert_eq!(groups[&2], vec![3]);
    }

    #[test]
    fn empty_row_set_yields_no_groups() {
        let (order, groups) = first_seen_groups(&[]);
        assert!(order.is_empty());
        assert!(groups.is_empty());
    }

    #[test]
    fn single_id_collapses_to_one_group() {
        let (order, groups) = first_seen_groups(&[7, 7, 7]);
        assert_eq!(order, vec![7]);
        assert_eq!(groups[&7].len(), 3);
    }
}
