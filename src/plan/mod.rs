//! The query planner (spec.md §4.4): turns a `PathChain` plus a
//! `QueryOptionSet` into one parametrized SQL statement (and, when
//! `$count=true`, a companion `COUNT` statement). No literal ever reaches
//! the SQL string — every `$filter` literal and every pinned path id is
//! bound as a `$N` placeholder, never interpolated.
//!
//! Earlier path segments with a pinned id (`Things(1)/Datastreams`) become
//! extra tables joined into the same statement plus an `id = $N` conjunct —
//! the same technique `dbinfo.go`'s `QueryParseInfo`/`GetQueryIDRelationMap`
//! uses to keep the whole chain in one query. `$expand` children become
//! either a plain `LEFT JOIN` (the common case) or a `LEFT JOIN LATERAL`
//! derived table when the child requests its own `$top`/`$skip`/`$orderby`
//! — Postgres has no other way to paginate a child independently per parent
//! row.

use crate::entities::EntityKind;
use crate::error::ApiError;
use crate::odata::filter::{CompareOp, FilterExpr, Literal};
use crate::odata::{OrderDir, QueryOptionSet};
use crate::path::PathChain;
use crate::registry::{self, FieldDef, JoinTemplate};

#[derive(Debug, Clone)]
pub struct ScopeSegment {
    pub kind: EntityKind,
    pub id: i64,
    pub query_index: usize,
}

pub struct PlanNode {
    pub kind: EntityKind,
    pub query_index: usize,
    pub select: Vec<&'static FieldDef>,
    pub filter: Option<FilterExpr>,
    pub order_by: Option<(&'static FieldDef, OrderDir)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub children: Vec<PlanNode>,
}

pub struct Plan {
    pub scope: Vec<ScopeSegment>,
    pub root: PlanNode,
    /// A pinned id on the focus segment itself (`Things(1)`, as opposed to
    /// an earlier scoping segment).
    pub focus_id: Option<i64>,
    pub count_requested: bool,
}

/// A literal bound into the statement. Handlers walk this alongside `sql`
/// to call `.bind(...)` in order — never formatted into the query text.
#[derive(Debug, Clone)]
pub enum Param {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Json(serde_json::Value),
    Time(chrono::DateTime<chrono::Utc>),
}

impl Param {
    /// Bind this parameter onto a query in positional order. Used both for
    /// `$filter`/scoping params (read path) and for write-path column
    /// values — Postgres infers each placeholder's target type from
    /// context (the comparison operand or the column it's assigned to),
    /// so no parameter ever needs an explicit cast beyond the geometry
    /// constructor already baked into the SQL text (see `crate::handlers`).
    pub fn bind<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        match self {
            Param::Int(v) => query.bind(v),
            Param::Float(v) => query.bind(v),
            Param::Str(v) => query.bind(v),
            Param::Bool(v) => query.bind(v),
            Param::Json(v) => query.bind(v),
            Param::Time(v) => query.bind(v),
        }
    }
}

impl From<&Literal> for Param {
    fn from(lit: &Literal) -> Param {
        match lit {
            Literal::Number(n) => Param::Float(*n),
            Literal::String(s) => Param::Str(s.clone()),
            Literal::Bool(b) => Param::Bool(*b),
        }
    }
}

pub struct Compiled {
    pub sql: String,
    pub count_sql: Option<String>,
    pub params: Vec<Param>,
}

/// Build the plan tree for one request: resolve `$select`/`$orderby`/
/// `$filter`/`$expand` against the registry, recursing into `$expand`'s
/// nested option sets. Structural validation only — no SQL text yet.
pub fn build_plan(path: &PathChain, opts: &QueryOptionSet) -> Result<Plan, ApiError> {
    let mut counter = 0usize;
    let mut scope = Vec::new();
    for seg in path.scoping_segments() {
        let id = seg.id.ok_or(ApiError::NotFound)?;
        scope.push(ScopeSegment { kind: seg.kind, id, query_index: counter });
        counter += 1;
    }

    let focus = path.focus();
    let root = build_node(focus.kind, opts, &mut counter)?;

    Ok(Plan {
        scope,
        root,
        focus_id: focus.id,
        count_requested: opts.count.unwrap_or(false),
    })
}

fn build_node(kind: EntityKind, opts: &QueryOptionSet, counter: &mut usize) -> Result<PlanNode, ApiError> {
    let query_index = *counter;
    *counter += 1;

    let mut select: Vec<&'static FieldDef> = match &opts.select {
        Some(names) => names
            .iter()
            .map(|n| registry::field_by_name(kind, n).ok_or_else(|| ApiError::SelectInvalid(n.clone())))
            .collect::<Result<_, _>>()?,
        None => registry::entry(kind).fields.iter().filter(|f| f.selectable).collect(),
    };
    // The assembler dedups and attaches children by id; every node carries
    // it regardless of $select so nested $expand below a restricted
    // $select still has something to join on.
    if !select.iter().any(|f| f.name == "id") {
        if let Some(id_field) = registry::entry(kind).fields.iter().find(|f| f.name == "id") {
            select.insert(0, id_field);
        }
    }

    let order_by = match &opts.order_by {
        Some((name, dir)) => {
            let field = registry::field_by_name(kind, name).ok_or_else(|| ApiError::OrderByInvalid(name.clone()))?;
            Some((field, *dir))
        }
        None => None,
    };

    let mut children = Vec::new();
    if let Some(expand) = &opts.expand {
        for term in expand {
            let child_kind = EntityKind::from_nav_prop(&term.nav_prop)
                .ok_or_else(|| ApiError::ExpandInvalid(term.nav_prop.clone()))?;
            if !crate::entities::is_direct_relation(kind, child_kind) {
                return Err(ApiError::ExpandInvalid(term.nav_prop.clone()));
            }
            children.push(build_node(child_kind, &term.options, counter)?);
        }
    }

    // Whatever local column a child's join predicate needs (this node's own
    // "id", or an FK column when the relation runs the other way) must be
    // in `select` regardless of $select — once this node becomes a LEFT
    // JOIN LATERAL derived table, a grandchild can only join against
    // columns this node actually outputs (see `attach_child`).
    for child in &children {
        let needed_col = match registry::join_fragment(kind, child.kind)? {
            JoinTemplate::Direct { from_col, .. } => from_col,
            JoinTemplate::Linked { .. } => "id",
        };
        if !select.iter().any(|f| matches!(f.expr, registry::ExprKind::Column(c) if c == needed_col)) {
            if let Some(field) = registry::entry(kind).fields.iter().find(|f| matches!(f.expr, registry::ExprKind::Column(c) if c == needed_col)) {
                select.push(field);
            }
        }
    }

    Ok(PlanNode {
        kind,
        query_index,
        select,
        filter: opts.filter.clone(),
        order_by,
        limit: opts.top,
        offset: opts.skip,
        children,
    })
}

fn sql_alias(query_index: usize) -> String {
    format!("t{query_index}")
}

fn column_prefix(kind: EntityKind, query_index: usize) -> String {
    format!("{}_q{}", registry::entry(kind).table, query_index)
}

/// Lower a `Plan` into one parametrized SQL statement (spec.md §4.4).
pub fn compile(plan: &Plan) -> Result<Compiled, ApiError> {
    let mut params = Vec::new();
    let mut select_list = Vec::new();
    let mut where_conjuncts = Vec::new();

    let mut chain_kinds: Vec<EntityKind> = plan.scope.iter().map(|s| s.kind).collect();
    chain_kinds.push(plan.root.kind);
    let mut chain_aliases: Vec<String> = plan.scope.iter().map(|s| sql_alias(s.query_index)).collect();
    chain_aliases.push(sql_alias(plan.root.query_index));

    let mut from_clause = format!(
        "{} {}",
        registry::entry(chain_kinds[0]).table,
        chain_aliases[0]
    );
    for i in 0..chain_kinds.len() - 1 {
        let (from_kind, to_kind) = (chain_kinds[i], chain_kinds[i + 1]);
        let from_alias = chain_aliases[i].clone();
        let to_alias = chain_aliases[i + 1].clone();
        let to_table = registry::entry(to_kind).table;
        match registry::join_fragment(from_kind, to_kind)? {
            JoinTemplate::Direct { from_col, to_col } => {
                from_clause.push_str(&format!(
                    " INNER JOIN {to_table} {to_alias} ON {from_alias}.{from_col} = {to_alias}.{to_col}"
                ));
            }
            JoinTemplate::Linked { link_table, from_link_col, to_link_col } => {
                let link_alias = format!("lnk{i}");
                from_clause.push_str(&format!(
                    " INNER JOIN {link_table} {link_alias} ON {from_alias}.id = {link_alias}.{from_link_col} \
                     INNER JOIN {to_table} {to_alias} ON {link_alias}.{to_link_col} = {to_alias}.id"
                ));
            }
        }
    }

    for seg in &plan.scope {
        params.push(Param::Int(seg.id));
        where_conjuncts.push(format!("{}.id = ${}", sql_alias(seg.query_index), params.len()));
    }
    if let Some(id) = plan.focus_id {
        params.push(Param::Int(id));
        where_conjuncts.push(format!("{}.id = ${}", sql_alias(plan.root.query_index), params.len()));
    }

    collect_select(&plan.root, &mut select_list);

    if let Some(filter) = &plan.root.filter {
        where_conjuncts.push(render_filter(plan.root.kind, &sql_alias(plan.root.query_index), filter, &mut params)?);
    }

    for child in &plan.root.children {
        attach_child(
            child,
            plan.root.kind,
            plan.root.query_index,
            false,
            &mut from_clause,
            &mut select_list,
            &mut params,
        )?;
    }

    let where_clause = if where_conjuncts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_conjuncts.join(" AND "))
    };

    let order_clause = match &plan.root.order_by {
        Some((field, dir)) => format!(
            " ORDER BY {} {}",
            field.select_expr(&sql_alias(plan.root.query_index)),
            order_dir_sql(*dir)
        ),
        None => format!(" ORDER BY {}.id ASC", sql_alias(plan.root.query_index)),
    };
    let limit_clause = plan.root.limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
    let offset_clause = plan.root.offset.map(|n| format!(" OFFSET {n}")).unwrap_or_default();

    let sql = format!(
        "SELECT {} FROM {from_clause}{where_clause}{order_clause}{limit_clause}{offset_clause}",
        select_list.join(", ")
    );

    let count_sql = plan
        .count_requested
        .then(|| format!("SELECT COUNT(*) FROM {from_clause}{where_clause}"));

    Ok(Compiled { sql, count_sql, params })
}

fn order_dir_sql(dir: OrderDir) -> &'static str {
    match dir {
        OrderDir::Asc => "ASC",
        OrderDir::Desc => "DESC",
    }
}

/// `expr AS alias` for every SELECTed field of `node`, referencing `node`'s
/// own table alias directly (valid at the top level, and inside a LATERAL
/// subquery body where that alias is a real joined table).
fn collect_select(node: &PlanNode, out: &mut Vec<String>) {
    let alias = sql_alias(node.query_index);
    let prefix = column_prefix(node.kind, node.query_index);
    for field in &node.select {
        out.push(format!("{} AS {}", field.select_expr(&alias), field.column_alias(&prefix)));
    }
}

/// `alias.col` references into an already-materialized derived table (a
/// LATERAL child), as opposed to `collect_select`'s `expr AS col` which
/// computes the column in the first place.
fn select_output_refs(node: &PlanNode, out: &mut Vec<String>) {
    let alias = sql_alias(node.query_index);
    let prefix = column_prefix(node.kind, node.query_index);
    for field in &node.select {
        out.push(format!("{alias}.{}", field.column_alias(&prefix)));
    }
}

/// A reference to `parent_kind`/`parent_idx`'s own `col` column, usable as a
/// join operand from the outer query scope. When the parent is a genuine
/// joined table this is just `{alias}.{col}`; when the parent was itself
/// attached via `LEFT JOIN LATERAL` (see `attach_child`'s `paginated`
/// branch), the derived table exposes only the renamed columns
/// `collect_select` gave it, so `col` must be resolved to that alias
/// instead.
fn parent_column_ref(parent_kind: EntityKind, parent_idx: usize, parent_is_lateral: bool, col: &str) -> String {
    let alias = sql_alias(parent_idx);
    if parent_is_lateral {
        let field = registry::field_by_column(parent_kind, col)
            .expect("join key column must be carried in the LATERAL parent's own SELECT list");
        format!("{alias}.{}", field.column_alias(&column_prefix(parent_kind, parent_idx)))
    } else {
        format!("{alias}.{col}")
    }
}

fn attach_child(
    node: &PlanNode,
    parent_kind: EntityKind,
    parent_idx: usize,
    parent_is_lateral: bool,
    from_clause: &mut String,
    select_list: &mut Vec<String>,
    params: &mut Vec<Param>,
) -> Result<(), ApiError> {
    let to_table = registry::entry(node.kind).table;
    let to_alias = sql_alias(node.query_index);
    let paginated = node.limit.is_some() || node.offset.is_some() || node.order_by.is_some();

    if !paginated {
        match registry::join_fragment(parent_kind, node.kind)? {
            JoinTemplate::Direct { from_col, to_col } => {
                let parent_ref = parent_column_ref(parent_kind, parent_idx, parent_is_lateral, from_col);
                let mut on = format!("{parent_ref} = {to_alias}.{to_col}");
                if let Some(filter) = &node.filter {
                    on.push_str(" AND ");
                    on.push_str(&render_filter(node.kind, &to_alias, filter, params)?);
                }
                from_clause.push_str(&format!(" LEFT JOIN {to_table} {to_alias} ON {on}"));
            }
            JoinTemplate::Linked { link_table, from_link_col, to_link_col } => {
                let link_alias = format!("lnk{}", node.query_index);
                let parent_ref = parent_column_ref(parent_kind, parent_idx, parent_is_lateral, "id");
                from_clause.push_str(&format!(
                    " LEFT JOIN {link_table} {link_alias} ON {parent_ref} = {link_alias}.{from_link_col}"
                ));
                let mut on = format!("{link_alias}.{to_link_col} = {to_alias}.id");
                if let Some(filter) = &node.filter {
                    on.push_str(" AND ");
                    on.push_str(&render_filter(node.kind, &to_alias, filter, params)?);
                }
                from_clause.push_str(&format!(" LEFT JOIN {to_table} {to_alias} ON {on}"));
            }
        }
        collect_select(node, select_list);
    } else {
        let (inner_from, correlation) = match registry::join_fragment(parent_kind, node.kind)? {
            JoinTemplate::Direct { from_col, to_col } => {
                let parent_ref = parent_column_ref(parent_kind, parent_idx, parent_is_lateral, from_col);
                (format!("{to_table} {to_alias}"), format!("{to_alias}.{to_col} = {parent_ref}"))
            }
            JoinTemplate::Linked { link_table, from_link_col, to_link_col } => {
                let parent_ref = parent_column_ref(parent_kind, parent_idx, parent_is_lateral, "id");
                (
                    format!(
                        "{link_table} lnk{idx} INNER JOIN {to_table} {to_alias} ON lnk{idx}.{to_link_col} = {to_alias}.id",
                        idx = node.query_index
                    ),
                    format!("lnk{}.{from_link_col} = {parent_ref}", node.query_index),
                )
            }
        };

        let mut inner_select = Vec::new();
        collect_select(node, &mut inner_select);

        let mut inner_where = vec![correlation];
        if let Some(filter) = &node.filter {
            inner_where.push(render_filter(node.kind, &to_alias, filter, params)?);
        }
        let inner_order = match &node.order_by {
            Some((field, dir)) => format!("ORDER BY {} {}", field.select_expr(&to_alias), order_dir_sql(*dir)),
            None => format!("ORDER BY {to_alias}.id ASC"),
        };
        let inner_limit = node.limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
        let inner_offset = node.offset.map(|n| format!(" OFFSET {n}")).unwrap_or_default();

        from_clause.push_str(&format!(
            " LEFT JOIN LATERAL (SELECT {} FROM {inner_from} WHERE {} {inner_order}{inner_limit}{inner_offset}) {to_alias} ON TRUE",
            inner_select.join(", "),
            inner_where.join(" AND "),
        ));

        select_output_refs(node, select_list);
    }

    for grandchild in &node.children {
        attach_child(grandchild, node.kind, node.query_index, paginated, from_clause, select_list, params)?;
    }
    Ok(())
}

/// The left-hand operand for a `$filter` comparison. `select_expr` can't be
/// reused verbatim for `ExprKind::JsonField`: it extracts with `->`, which
/// yields `jsonb`, and Postgres has no `jsonb > double precision` or
/// `jsonb = text` operator. Comparisons need the text-extraction `->>`
/// instead, cast to match the literal's own bound type.
fn filter_operand(alias: &str, field: &FieldDef, literal: &Literal) -> String {
    match field.expr {
        registry::ExprKind::JsonField(key) => match literal {
            Literal::Number(_) => format!("({alias}.data ->> '{key}')::double precision"),
            Literal::Bool(_) => format!("({alias}.data ->> '{key}')::boolean"),
            Literal::String(_) => format!("{alias}.data ->> '{key}'"),
        },
        _ => field.select_expr(alias),
    }
}

fn render_filter(kind: EntityKind, alias: &str, expr: &FilterExpr, params: &mut Vec<Param>) -> Result<String, ApiError> {
    match expr {
        FilterExpr::Compare { property, op, literal } => {
            let field = registry::field_by_name(kind, property).ok_or_else(|| ApiError::FilterInvalid(property.clone()))?;
            let operand = filter_operand(alias, field, literal);
            params.push(Param::from(literal));
            let op_sql = match op {
                CompareOp::Eq => "=",
                CompareOp::Ne => "<>",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
            };
            Ok(format!("{operand} {op_sql} ${}", params.len()))
        }
        FilterExpr::And(l, r) => Ok(format!(
            "({} AND {})",
            render_filter(kind, alias, l, params)?,
            render_filter(kind, alias, r, params)?
        )),
        FilterExpr::Or(l, r) => Ok(format!(
            "({} OR {})",
            render_filter(kind, alias, l, params)?,
            render_filter(kind, alias, r, params)?
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odata::parse_options;
    use crate::path::parse_path;
    use std::collections::HashMap;

    fn opts(pairs: &[(&str, &str)]) -> QueryOptionSet {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        parse_options(&map).unwrap()
    }

    #[test]
    fn compiles_simple_list_query() {
        let path = parse_path("Things").unwrap();
        let plan = build_plan(&path, &opts(&[])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.starts_with("SELECT "));
        assert!(compiled.sql.contains("FROM thing t0"));
        assert!(compiled.sql.contains("ORDER BY t0.id ASC"));
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn compiles_pinned_scope_with_bound_param() {
        let path = parse_path("Things(1)/Datastreams").unwrap();
        let plan = build_plan(&path, &opts(&[])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("INNER JOIN datastream t1 ON t0.id = t1.thing_id"));
        assert!(compiled.sql.contains("WHERE t0.id = $1"));
        assert!(matches!(compiled.params[0], Param::Int(1)));
    }

    #[test]
    fn compiles_linked_relation_through_hidden_table() {
        let path = parse_path("Things(1)/Locations").unwrap();
        let plan = build_plan(&path, &opts(&[])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("thing_to_location"));
    }

    #[test]
    fn paginated_expand_uses_lateral_join() {
        let path = parse_path("Things").unwrap();
        let plan = build_plan(&path, &opts(&[("$expand", "Datastreams($top=1)")])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("LEFT JOIN LATERAL"));
        assert!(compiled.sql.contains(" LIMIT 1"));
    }

    #[test]
    fn plain_expand_uses_left_join() {
        let path = parse_path("Things").unwrap();
        let plan = build_plan(&path, &opts(&[("$expand", "Datastreams")])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("LEFT JOIN datastream t1 ON t0.id = t1.thing_id"));
        assert!(!compiled.sql.contains("LATERAL"));
    }

    #[test]
    fn filter_binds_literal_as_param_not_text() {
        let path = parse_path("Observations").unwrap();
        let plan = build_plan(&path, &opts(&[("$filter", "result gt 10")])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("$1"));
        assert!(!compiled.sql.contains(" 10"));
        assert!(matches!(compiled.params[0], Param::Float(n) if n == 10.0));
    }

    #[test]
    fn json_field_filter_uses_text_extraction_with_cast() {
        let path = parse_path("Observations").unwrap();
        let plan = build_plan(&path, &opts(&[("$filter", "result gt 10")])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("(t0.data ->> 'result')::double precision > $1"));
        assert!(!compiled.sql.contains("t0.data -> 'result'"));
    }

    #[test]
    fn grandchild_of_lateral_child_joins_against_aliased_output_column() {
        let path = parse_path("Things").unwrap();
        let plan = build_plan(
            &path,
            &opts(&[("$expand", "Datastreams($top=1;$expand=Observations)")]),
        )
        .unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.sql.contains("LEFT JOIN LATERAL"));
        // the grandchild join must reference the LATERAL parent's own
        // aliased output column, not the raw `id` the parent table would
        // have had if it were joined directly.
        assert!(compiled.sql.contains("t1.datastream_q1_id = t2.stream_id"));
        assert!(!compiled.sql.contains("t1.id = t2.stream_id"));
    }

    #[test]
    fn count_true_produces_companion_statement() {
        let path = parse_path("Things").unwrap();
        let plan = build_plan(&path, &opts(&[("$count", "true")])).unwrap();
        let compiled = compile(&plan).unwrap();
        assert!(compiled.count_sql.unwrap().starts_with("SELECT COUNT(*) FROM thing t0"));
    }

    #[test]
    fn rejects_unknown_select_field() {
        let path = parse_path("Things").unwrap();
        let err = build_plan(&path, &opts(&[("$select", "bogus")])).unwrap_err();
        assert!(matches!(err, ApiError::SelectInvalid(_)));
    }

    #[test]
    fn rejects_expand_on_unrelated_kind() {
        let path = parse_path("Things").unwrap();
        let err = build_plan(&path, &opts(&[("$expand", "Sensor")])).unwrap_err();
        assert!(matches!(err, ApiError::ExpandInvalid(_)));
    }
}
