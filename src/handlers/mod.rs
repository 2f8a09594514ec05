//! Endpoint dispatch (spec.md §4.6): binds the generic resource-path
//! grammar to the planner/assembler pipeline. Unlike the teacher's
//! one-route-per-concern `main.rs` table, every STA collection shares the
//! same handler — the path/option parsers carry the per-collection
//! variation, exactly as `EndpointDatastream.go`'s table-driven
//! `Operation{method, pathTemplate, handler}` dispatch does with a single
//! handler parametrized by the matched template.

pub mod health;

use crate::entities::{Entity, EntityKind};
use crate::error::ApiError;
use crate::odata::{self, QueryOptionSet};
use crate::path::{self, PathChain, PathTail};
use crate::plan::{self, Param};
use crate::registry::{self, ExprKind};
use crate::AppState;
use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;

#[derive(Serialize)]
struct CollectionEnvelope {
    #[serde(rename = "@iot.count", skip_serializing_if = "Option::is_none")]
    count: Option<i64>,
    value: Vec<Entity>,
}

fn parse_request(tail: &str, query: &HashMap<String, String>) -> Result<(PathChain, QueryOptionSet), ApiError> {
    let chain = path::parse_path(tail)?;
    let opts = odata::parse_options(query)?;
    Ok((chain, opts))
}

async fn run_query(pool: &PgPool, compiled: &plan::Compiled) -> Result<Vec<sqlx::postgres::PgRow>, ApiError> {
    let mut q = sqlx::query(&compiled.sql);
    for p in &compiled.params {
        q = p.bind(q);
    }
    Ok(q.fetch_all(pool).await?)
}

pub async fn dispatch_get(
    State(state): State<AppState>,
    AxPath(tail): AxPath<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let (chain, opts) = parse_request(&tail, &query)?;

    if let Some(property) = &chain.property {
        return get_property(&state.pool, &chain, property).await;
    }

    let plan = plan::build_plan(&chain, &opts)?;
    let compiled = plan::compile(&plan)?;
    let rows = run_query(&state.pool, &compiled).await?;
    let mut entities = crate::assemble::assemble(&plan.root, &rows)?;

    if chain.focus().id.is_some() {
        let entity = entities.pop().ok_or(ApiError::NotFound)?;
        return Ok(Json(entity).into_response());
    }

    let count = match &compiled.count_sql {
        Some(sql) => {
            let mut q = sqlx::query_scalar::<_, i64>(sql);
            for p in &compiled.params {
                q = bind_scalar(q, p);
            }
            Some(q.fetch_one(&state.pool).await?)
        }
        None => None,
    };

    Ok(Json(CollectionEnvelope { count, value: entities }).into_response())
}

fn bind_scalar<'q>(
    query: sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments>,
    param: &'q Param,
) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments> {
    match param {
        Param::Int(v) => query.bind(v),
        Param::Float(v) => query.bind(v),
        Param::Str(v) => query.bind(v),
        Param::Bool(v) => query.bind(v),
        Param::Json(v) => query.bind(v),
        Param::Time(v) => query.bind(v),
    }
}

/// `GET .../C(id)/prop` and `.../prop/$value` (spec.md §6): fetch the
/// focused entity with no expansion, then project one field out of its
/// already-serialized JSON form.
async fn get_property(pool: &PgPool, chain: &PathChain, property: &str) -> Result<Response, ApiError> {
    let bare_opts = QueryOptionSet::default();
    let plan = plan::build_plan(chain, &bare_opts)?;
    let compiled = plan::compile(&plan)?;
    let rows = run_query(pool, &compiled).await?;
    let entities = crate::assemble::assemble(&plan.root, &rows)?;
    let entity = entities.into_iter().next().ok_or(ApiError::NotFound)?;

    let json = serde_json::to_value(&entity).map_err(|e| ApiError::BackendError(e.to_string()))?;
    let value = json.get(property).cloned().ok_or_else(|| ApiError::NotFound)?;

    if chain.tail == PathTail::Value {
        let text = match &value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok((StatusCode::OK, text).into_response())
    } else {
        let mut body = serde_json::Map::new();
        body.insert(property.to_string(), value);
        Ok(Json(serde_json::Value::Object(body)).into_response())
    }
}

pub async fn dispatch_post(
    State(state): State<AppState>,
    AxPath(tail): AxPath<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let chain = path::parse_path(&tail)?;
    if chain.property.is_some() {
        return Err(ApiError::MethodNotAllowed);
    }
    let kind = chain.focus().kind;
    let scope = match chain.scoping_segments().last() {
        Some(seg) => Some((seg.kind, seg.id.ok_or(ApiError::NotFound)?)),
        None => None,
    };

    let mut tx = state.pool.begin().await.map_err(ApiError::from)?;
    let id = insert_entity(&mut tx, kind, &body, scope).await?;
    tx.commit().await.map_err(ApiError::from)?;

    let single_path = format!("{}({id})", kind.collection_name());
    let select_chain = path::parse_path(&single_path)?;
    let plan = plan::build_plan(&select_chain, &QueryOptionSet::default())?;
    let compiled = plan::compile(&plan)?;
    let rows = run_query(&state.pool, &compiled).await?;
    let entity = crate::assemble::assemble(&plan.root, &rows)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::BackendError("row vanished after insert".to_string()))?;

    Ok((StatusCode::CREATED, Json(entity)).into_response())
}

pub async fn dispatch_patch(
    State(state): State<AppState>,
    AxPath(tail): AxPath<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let chain = path::parse_path(&tail)?;
    let focus = chain.focus();
    let id = focus.id.ok_or(ApiError::NotFound)?;

    let mut tx = state.pool.begin().await.map_err(ApiError::from)?;
    update_entity(&mut tx, focus.kind, id, &body).await?;
    tx.commit().await.map_err(ApiError::from)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn dispatch_delete(
    State(state): State<AppState>,
    AxPath(tail): AxPath<String>,
) -> Result<Response, ApiError> {
    let chain = path::parse_path(&tail)?;
    let focus = chain.focus();
    let id = focus.id.ok_or(ApiError::NotFound)?;
    let table = registry::entry(focus.kind).table;

    let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(ApiError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Every plain numeric column this writer ever binds (id columns only —
/// everything else numeric lives inside a jsonb blob) is `BIGINT`, so an
/// integral JSON number binds as `Param::Int` rather than `Param::Float`;
/// binding an `f64` against an `int8` parameter would fail at the wire
/// protocol level, since Postgres doesn't coerce across parameter types.
fn value_to_param(value: &serde_json::Value) -> Param {
    match value {
        serde_json::Value::String(s) => Param::Str(s.clone()),
        serde_json::Value::Bool(b) => Param::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Param::Int(i),
            None => Param::Float(n.as_f64().unwrap_or_default()),
        },
        other => Param::Json(other.clone()),
    }
}

const OBSERVATION_JSON_FIELDS: &[&str] =
    &["phenomenonTime", "resultTime", "result", "validTime", "resultQuality", "parameters"];

/// Columns + bound values for an INSERT/UPDATE of `kind`, given the
/// request body and an optional `(parentKind, parentID)` scope inherited
/// from a nav-prop create (`POST .../Parent(id)/nav`).
fn write_columns(
    kind: EntityKind,
    body: &serde_json::Value,
    scope: Option<(EntityKind, i64)>,
) -> Result<Vec<(&'static str, Param)>, ApiError> {
    let mut out = Vec::new();

    if kind == EntityKind::Observation {
        let mut data = serde_json::Map::new();
        for key in OBSERVATION_JSON_FIELDS {
            if let Some(v) = body.get(key) {
                data.insert(key.to_string(), v.clone());
            }
        }
        out.push(("data", Param::Json(serde_json::Value::Object(data))));
        if let Some(v) = body.get("datastreamID") {
            out.push(("stream_id", value_to_param(v)));
        }
        if let Some(v) = body.get("featureOfInterestID") {
            out.push(("featureofinterest_id", value_to_param(v)));
        }
    } else {
        for field in registry::entry(kind).fields {
            if field.name == "id" {
                continue;
            }
            if let ExprKind::JsonField(_) = field.expr {
                continue;
            }
            if let Some(v) = body.get(field.name) {
                match field.expr {
                    // `historicallocation.time` is the one plain column
                    // that isn't text/int/jsonb — it needs a real
                    // `DateTime` binding, not a raw string, or Postgres
                    // rejects the parameter type at bind time.
                    ExprKind::Column("time") => {
                        let text = v.as_str().ok_or_else(|| ApiError::BadOption("time must be a string".to_string()))?;
                        let time = chrono::DateTime::parse_from_rfc3339(text)
                            .map_err(|e| ApiError::BadOption(format!("time: {e}")))?
                            .with_timezone(&chrono::Utc);
                        out.push(("time", Param::Time(time)));
                    }
                    ExprKind::Column(col) => out.push((col, value_to_param(v))),
                    ExprKind::Geo(col) => {
                        let text = serde_json::to_string(v).map_err(|e| ApiError::BadOption(e.to_string()))?;
                        out.push((col, Param::Str(text)));
                    }
                    ExprKind::JsonField(_) => unreachable!(),
                }
            }
        }
    }

    if let Some((parent_kind, parent_id)) = scope {
        if let registry::JoinTemplate::Direct { to_col, .. } = registry::join_fragment(parent_kind, kind)? {
            out.retain(|(col, _)| *col != to_col);
            out.push((to_col, Param::Int(parent_id)));
        }
        // Many-to-many (Linked) scoping — e.g. POST Things(1)/Locations —
        // is performed as a follow-up link-table insert by the caller's
        // transaction once the new row's id is known; see insert_entity.
    }

    Ok(out)
}

/// Geometry columns need `ST_GeomFromGeoJSON($n)` around the placeholder
/// itself rather than a plain `$n`; every other column binds directly.
fn placeholder_for(kind: EntityKind, col: &str, index: usize) -> String {
    let is_geo = registry::entry(kind)
        .fields
        .iter()
        .any(|f| matches!(f.expr, ExprKind::Geo(c) if c == col));
    if is_geo {
        format!("ST_SetSRID(ST_GeomFromGeoJSON(${index}), 4326)")
    } else {
        format!("${index}")
    }
}

async fn insert_entity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    kind: EntityKind,
    body: &serde_json::Value,
    scope: Option<(EntityKind, i64)>,
) -> Result<i64, ApiError> {
    let columns = write_columns(kind, body, scope)?;
    let table = registry::entry(kind).table;

    let col_list: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
    let placeholders: Vec<String> = col_list
        .iter()
        .enumerate()
        .map(|(i, col)| placeholder_for(kind, col, i + 1))
        .collect();

    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) RETURNING id",
        col_list.join(", "),
        placeholders.join(", ")
    );

    let mut q = sqlx::query_scalar::<_, i64>(&sql);
    for (_, param) in &columns {
        q = bind_scalar(q, param);
    }
    let id = q.fetch_one(&mut **tx).await.map_err(ApiError::from)?;

    if let Some((parent_kind, parent_id)) = scope {
        if let registry::JoinTemplate::Linked { link_table, from_link_col, to_link_col } =
            registry::join_fragment(parent_kind, kind)?
        {
            sqlx::query(&format!(
                "INSERT INTO {link_table} ({from_link_col}, {to_link_col}) VALUES ($1, $2)"
            ))
            .bind(parent_id)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(ApiError::from)?;
        }
    }

    Ok(id)
}

async fn update_entity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    kind: EntityKind,
    id: i64,
    body: &serde_json::Value,
) -> Result<(), ApiError> {
    let columns = write_columns(kind, body, None)?;
    if columns.is_empty() {
        return Ok(());
    }
    let table = registry::entry(kind).table;

    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{col} = {}", placeholder_for(kind, col, i + 1)))
        .collect();
    let id_placeholder = columns.len() + 1;

    let sql = format!("UPDATE {table} SET {} WHERE id = ${id_placeholder}", assignments.join(", "));

    let mut q = sqlx::query(&sql);
    for (_, param) in &columns {
        q = param.bind(q);
    }
    q = q.bind(id);
    let result = q.execute(&mut **tx).await.map_err(ApiError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
