//! The Entity Metadata Registry (spec.md §4.1).
//!
//! A process-wide, read-only table mapping each `EntityKind` to its SQL
//! table name, its SELECTable fields (and how to express each one in a
//! `SELECT` list), the join fragment to every directly-related kind, and a
//! factory that hydrates one row slice into an `Entity`. Everything here is
//! `&'static` data reached through plain `match` — there is nothing to
//! build at startup and nothing to synchronize (spec.md §5).
//!
//! Grounded throughout in the original gost `database/postgis/dbinfo.go`:
//! its `tableMappings`, `selectMappings`/`asMappings`, and
//! `createJoinMappings` are exactly `RegistryEntry::table`,
//! `RegistryEntry::fields`, and `join_fragment` below.

use crate::entities::{Entity, EntityKind, *};
use crate::error::ApiError;
use sqlx::postgres::PgRow;
use sqlx::Row;

/// How a field's value is produced in a `SELECT` list.
#[derive(Debug, Clone, Copy)]
pub enum ExprKind {
    /// A plain column, selected (and decoded) as-is.
    Column(&'static str),
    /// A PostGIS geometry column, wrapped in `ST_AsGeoJSON` so it decodes
    /// as GeoJSON text rather than WKB.
    Geo(&'static str),
    /// A key inside `observation`'s `data` jsonb blob, extracted with `->`.
    JsonField(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// The OData-facing property name (e.g. `"encodingType"`).
    pub name: &'static str,
    /// The suffix used to build this field's column alias.
    pub alias_suffix: &'static str,
    pub expr: ExprKind,
    /// Whether this field may appear in `$select`/`$orderby`/`$filter`.
    /// `false` for internal-only columns carried solely for hydration.
    pub selectable: bool,
}

impl FieldDef {
    /// The `SELECT` list entry for this field, given the SQL alias bound to
    /// this query node's table in the `FROM`/`JOIN` clause (e.g. `"t0"`).
    pub fn select_expr(&self, sql_alias: &str) -> String {
        match self.expr {
            ExprKind::Column(c) => format!("{sql_alias}.{c}"),
            ExprKind::Geo(c) => format!("ST_AsGeoJSON({sql_alias}.{c})"),
            ExprKind::JsonField(k) => format!("{sql_alias}.data -> '{k}'"),
        }
    }

    /// The column alias this field is given in the generated `SELECT`,
    /// unique across the whole statement: `<table>_q<queryIndex>_<suffix>`.
    /// Never contains whitespace (see the alias-collision Open Question in
    /// DESIGN.md, resolved against the original's trailing-space columns).
    pub fn column_alias(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.alias_suffix)
    }
}

pub type Factory = fn(&PgRow, &str) -> Result<Entity, ApiError>;

pub struct RegistryEntry {
    pub kind: EntityKind,
    pub table: &'static str,
    pub fields: &'static [FieldDef],
    pub factory: Factory,
}

const THING_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "name", alias_suffix: "name", expr: ExprKind::Column("name"), selectable: true },
    FieldDef { name: "description", alias_suffix: "description", expr: ExprKind::Column("description"), selectable: true },
    FieldDef { name: "properties", alias_suffix: "properties", expr: ExprKind::Column("properties"), selectable: true },
];

const LOCATION_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "name", alias_suffix: "name", expr: ExprKind::Column("name"), selectable: true },
    FieldDef { name: "description", alias_suffix: "description", expr: ExprKind::Column("description"), selectable: true },
    FieldDef { name: "encodingType", alias_suffix: "encodingtype", expr: ExprKind::Column("encodingtype"), selectable: true },
    FieldDef { name: "location", alias_suffix: "location", expr: ExprKind::Geo("location"), selectable: true },
];

const HISTORICAL_LOCATION_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "time", alias_suffix: "time", expr: ExprKind::Column("time"), selectable: true },
    FieldDef { name: "thingID", alias_suffix: "thing_id", expr: ExprKind::Column("thing_id"), selectable: true },
    FieldDef { name: "locationID", alias_suffix: "location_id", expr: ExprKind::Column("location_id"), selectable: true },
];

const SENSOR_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "name", alias_suffix: "name", expr: ExprKind::Column("name"), selectable: true },
    FieldDef { name: "description", alias_suffix: "description", expr: ExprKind::Column("description"), selectable: true },
    FieldDef { name: "encodingType", alias_suffix: "encodingtype", expr: ExprKind::Column("encodingtype"), selectable: true },
    FieldDef { name: "metadata", alias_suffix: "metadata", expr: ExprKind::Column("metadata"), selectable: true },
];

const OBSERVED_PROPERTY_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "name", alias_suffix: "name", expr: ExprKind::Column("name"), selectable: true },
    FieldDef { name: "description", alias_suffix: "description", expr: ExprKind::Column("description"), selectable: true },
    FieldDef { name: "definition", alias_suffix: "definition", expr: ExprKind::Column("definition"), selectable: true },
];

const DATASTREAM_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "name", alias_suffix: "name", expr: ExprKind::Column("name"), selectable: true },
    FieldDef { name: "description", alias_suffix: "description", expr: ExprKind::Column("description"), selectable: true },
    FieldDef { name: "unitOfMeasurement", alias_suffix: "unitofmeasurement", expr: ExprKind::Column("unitofmeasurement"), selectable: true },
    FieldDef { name: "observationType", alias_suffix: "observationtype", expr: ExprKind::Column("observationtype"), selectable: true },
    FieldDef { name: "observedArea", alias_suffix: "observedarea", expr: ExprKind::Geo("observedarea"), selectable: true },
    FieldDef { name: "phenomenonTime", alias_suffix: "phenomenontime", expr: ExprKind::Column("phenomenontime"), selectable: true },
    FieldDef { name: "resultTime", alias_suffix: "resulttime", expr: ExprKind::Column("resulttime"), selectable: true },
    FieldDef { name: "thingID", alias_suffix: "thing_id", expr: ExprKind::Column("thing_id"), selectable: true },
    FieldDef { name: "sensorID", alias_suffix: "sensor_id", expr: ExprKind::Column("sensor_id"), selectable: true },
    FieldDef { name: "observedPropertyID", alias_suffix: "observedproperty_id", expr: ExprKind::Column("observedproperty_id"), selectable: true },
];

const OBSERVATION_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "phenomenonTime", alias_suffix: "phenomenontime", expr: ExprKind::JsonField("phenomenonTime"), selectable: true },
    FieldDef { name: "resultTime", alias_suffix: "resulttime", expr: ExprKind::JsonField("resultTime"), selectable: true },
    FieldDef { name: "result", alias_suffix: "result", expr: ExprKind::JsonField("result"), selectable: true },
    FieldDef { name: "validTime", alias_suffix: "validtime", expr: ExprKind::JsonField("validTime"), selectable: true },
    FieldDef { name: "resultQuality", alias_suffix: "resultquality", expr: ExprKind::JsonField("resultQuality"), selectable: true },
    FieldDef { name: "parameters", alias_suffix: "parameters", expr: ExprKind::JsonField("parameters"), selectable: true },
    FieldDef { name: "datastreamID", alias_suffix: "stream_id", expr: ExprKind::Column("stream_id"), selectable: true },
    FieldDef { name: "featureOfInterestID", alias_suffix: "featureofinterest_id", expr: ExprKind::Column("featureofinterest_id"), selectable: true },
];

const FEATURE_OF_INTEREST_FIELDS: &[FieldDef] = &[
    FieldDef { name: "id", alias_suffix: "id", expr: ExprKind::Column("id"), selectable: true },
    FieldDef { name: "name", alias_suffix: "name", expr: ExprKind::Column("name"), selectable: true },
    FieldDef { name: "description", alias_suffix: "description", expr: ExprKind::Column("description"), selectable: true },
    FieldDef { name: "encodingType", alias_suffix: "encodingtype", expr: ExprKind::Column("encodingtype"), selectable: true },
    FieldDef { name: "feature", alias_suffix: "feature", expr: ExprKind::Geo("feature"), selectable: true },
    FieldDef { name: "originalLocationID", alias_suffix: "original_location_id", expr: ExprKind::Column("original_location_id"), selectable: true },
];

/// The metadata entry for `kind`. Infallible: every `EntityKind` in
/// `ADDRESSABLE` has one.
pub fn entry(kind: EntityKind) -> &'static RegistryEntry {
    match kind {
        EntityKind::Thing => &RegistryEntry {
            kind: EntityKind::Thing,
            table: "thing",
            fields: THING_FIELDS,
            factory: hydrate_thing,
        },
        EntityKind::Location => &RegistryEntry {
            kind: EntityKind::Location,
            table: "location",
            fields: LOCATION_FIELDS,
            factory: hydrate_location,
        },
        EntityKind::HistoricalLocation => &RegistryEntry {
            kind: EntityKind::HistoricalLocation,
            table: "historicallocation",
            fields: HISTORICAL_LOCATION_FIELDS,
            factory: hydrate_historical_location,
        },
        EntityKind::Sensor => &RegistryEntry {
            kind: EntityKind::Sensor,
            table: "sensor",
            fields: SENSOR_FIELDS,
            factory: hydrate_sensor,
        },
        EntityKind::ObservedProperty => &RegistryEntry {
            kind: EntityKind::ObservedProperty,
            table: "observedproperty",
            fields: OBSERVED_PROPERTY_FIELDS,
            factory: hydrate_observed_property,
        },
        EntityKind::Datastream => &RegistryEntry {
            kind: EntityKind::Datastream,
            table: "datastream",
            fields: DATASTREAM_FIELDS,
            factory: hydrate_datastream,
        },
        EntityKind::Observation => &RegistryEntry {
            kind: EntityKind::Observation,
            table: "observation",
            fields: OBSERVATION_FIELDS,
            factory: hydrate_observation,
        },
        EntityKind::FeatureOfInterest => &RegistryEntry {
            kind: EntityKind::FeatureOfInterest,
            table: "featureofinterest",
            fields: FEATURE_OF_INTEREST_FIELDS,
            factory: hydrate_feature_of_interest,
        },
        EntityKind::ThingToLocation | EntityKind::LocationToHistoricalLocation => {
            unreachable!("link kinds have no registry entry; they only appear inside join_fragment")
        }
    }
}

/// Look up a SELECTable field of `kind` by its OData-facing name.
pub fn field_by_name(kind: EntityKind, name: &str) -> Option<&'static FieldDef> {
    entry(kind).fields.iter().find(|f| f.selectable && f.name == name)
}

/// Look up a field of `kind` by its underlying plain column name. Used by
/// the planner to re-point a join predicate at a field's *aliased* SELECT
/// output when the table it would otherwise reference directly is a
/// `LEFT JOIN LATERAL` derived table rather than a real relation — the
/// derived table exposes only the renamed columns `collect_select` gave it,
/// never the original column name. Not restricted to `selectable` fields:
/// join keys like `thing_id` may be carried for hydration only.
pub fn field_by_column(kind: EntityKind, column: &str) -> Option<&'static FieldDef> {
    entry(kind)
        .fields
        .iter()
        .find(|f| matches!(f.expr, ExprKind::Column(c) if c == column))
}

/// How two directly-related kinds are joined in a `FROM`/`JOIN` clause.
/// Mirrors `dbinfo.go`'s `createJoinMappings`: every relation is either a
/// direct foreign key between the two tables, or mediated through one of
/// the two hidden link tables.
#[derive(Debug, Clone, Copy)]
pub enum JoinTemplate {
    /// `<from_alias>.<from_col> = <to_alias>.<to_col>`.
    Direct { from_col: &'static str, to_col: &'static str },
    /// `<from_alias>.id = <link_alias>.<from_link_col> AND <link_alias>.<to_link_col> = <to_alias>.id`.
    Linked {
        link_table: &'static str,
        from_link_col: &'static str,
        to_link_col: &'static str,
    },
}

/// The join fragment connecting `from` to `to`. `NoSuchRelation` for any
/// pair that isn't one of the sixteen directed relations in
/// `crate::entities::is_direct_relation`.
pub fn join_fragment(from: EntityKind, to: EntityKind) -> Result<JoinTemplate, ApiError> {
    use EntityKind::*;
    Ok(match (from, to) {
        (Thing, Location) => JoinTemplate::Linked {
            link_table: "thing_to_location",
            from_link_col: "thing_id",
            to_link_col: "location_id",
        },
        (Location, Thing) => JoinTemplate::Linked {
            link_table: "thing_to_location",
            from_link_col: "location_id",
            to_link_col: "thing_id",
        },
        (Location, HistoricalLocation) => JoinTemplate::Linked {
            link_table: "location_to_historicallocation",
            from_link_col: "location_id",
            to_link_col: "historicallocation_id",
        },
        (HistoricalLocation, Location) => JoinTemplate::Linked {
            link_table: "location_to_historicallocation",
            from_link_col: "historicallocation_id",
            to_link_col: "location_id",
        },
        (Thing, HistoricalLocation) => JoinTemplate::Direct { from_col: "id", to_col: "thing_id" },
        (HistoricalLocation, Thing) => JoinTemplate::Direct { from_col: "thing_id", to_col: "id" },
        (Thing, Datastream) => JoinTemplate::Direct { from_col: "id", to_col: "thing_id" },
        (Datastream, Thing) => JoinTemplate::Direct { from_col: "thing_id", to_col: "id" },
        (Sensor, Datastream) => JoinTemplate::Direct { from_col: "id", to_col: "sensor_id" },
        (Datastream, Sensor) => JoinTemplate::Direct { from_col: "sensor_id", to_col: "id" },
        (ObservedProperty, Datastream) => JoinTemplate::Direct { from_col: "id", to_col: "observedproperty_id" },
        (Datastream, ObservedProperty) => JoinTemplate::Direct { from_col: "observedproperty_id", to_col: "id" },
        (Datastream, Observation) => JoinTemplate::Direct { from_col: "id", to_col: "stream_id" },
        (Observation, Datastream) => JoinTemplate::Direct { from_col: "stream_id", to_col: "id" },
        (FeatureOfInterest, Observation) => JoinTemplate::Direct { from_col: "id", to_col: "featureofinterest_id" },
        (Observation, FeatureOfInterest) => JoinTemplate::Direct { from_col: "featureofinterest_id", to_col: "id" },
        _ => return Err(ApiError::NoSuchRelation(format!("{from}/{to}"))),
    })
}

fn geo(row: &PgRow, alias: &str) -> Result<serde_json::Value, ApiError> {
    match row.try_get::<Option<String>, _>(alias)? {
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| ApiError::BackendError(format!("malformed geometry in column {alias}: {e}"))),
        None => Ok(serde_json::Value::Null),
    }
}

fn json(row: &PgRow, alias: &str) -> Result<serde_json::Value, ApiError> {
    Ok(row.try_get::<Option<serde_json::Value>, _>(alias)?.unwrap_or(serde_json::Value::Null))
}

/// `data -> 'field'` extraction: SQL `NULL` (key absent) and JSON `null`
/// (key present, null value) both normalize to `None`.
fn json_opt(row: &PgRow, alias: &str) -> Result<Option<serde_json::Value>, ApiError> {
    Ok(row
        .try_get::<Option<serde_json::Value>, _>(alias)?
        .filter(|v| !v.is_null()))
}

fn hydrate_thing(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::Thing(Thing {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        description: row.try_get(format!("{prefix}_description").as_str())?,
        properties: json(row, &format!("{prefix}_properties"))?,
        ..Default::default()
    }))
}

fn hydrate_location(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::Location(Location {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        description: row.try_get(format!("{prefix}_description").as_str())?,
        encoding_type: row.try_get(format!("{prefix}_encodingtype").as_str())?,
        location: geo(row, &format!("{prefix}_location"))?,
        ..Default::default()
    }))
}

fn hydrate_historical_location(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::HistoricalLocation(HistoricalLocation {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        time: row.try_get(format!("{prefix}_time").as_str())?,
        thing_id: row.try_get(format!("{prefix}_thing_id").as_str())?,
        location_id: row.try_get(format!("{prefix}_location_id").as_str())?,
        ..Default::default()
    }))
}

fn hydrate_sensor(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::Sensor(Sensor {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        description: row.try_get(format!("{prefix}_description").as_str())?,
        encoding_type: row.try_get(format!("{prefix}_encodingtype").as_str())?,
        metadata: row.try_get(format!("{prefix}_metadata").as_str())?,
        ..Default::default()
    }))
}

fn hydrate_observed_property(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::ObservedProperty(ObservedProperty {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        description: row.try_get(format!("{prefix}_description").as_str())?,
        definition: row.try_get(format!("{prefix}_definition").as_str())?,
        ..Default::default()
    }))
}

fn hydrate_datastream(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::Datastream(Datastream {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        description: row.try_get(format!("{prefix}_description").as_str())?,
        unit_of_measurement: json(row, &format!("{prefix}_unitofmeasurement"))?,
        observation_type: row.try_get(format!("{prefix}_observationtype").as_str())?,
        observed_area: Some(geo(row, &format!("{prefix}_observedarea"))?).filter(|v| !v.is_null()),
        phenomenon_time: row.try_get(format!("{prefix}_phenomenontime").as_str())?,
        result_time: row.try_get(format!("{prefix}_resulttime").as_str())?,
        thing_id: row.try_get(format!("{prefix}_thing_id").as_str())?,
        sensor_id: row.try_get(format!("{prefix}_sensor_id").as_str())?,
        observed_property_id: row.try_get(format!("{prefix}_observedproperty_id").as_str())?,
        ..Default::default()
    }))
}

fn hydrate_observation(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::Observation(Observation {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        phenomenon_time: json_opt(row, &format!("{prefix}_phenomenontime"))?,
        result_time: json_opt(row, &format!("{prefix}_resulttime"))?,
        result: json_opt(row, &format!("{prefix}_result"))?,
        valid_time: json_opt(row, &format!("{prefix}_validtime"))?,
        result_quality: json_opt(row, &format!("{prefix}_resultquality"))?,
        parameters: json_opt(row, &format!("{prefix}_parameters"))?,
        datastream_id: row.try_get(format!("{prefix}_stream_id").as_str())?,
        feature_of_interest_id: row.try_get(format!("{prefix}_featureofinterest_id").as_str())?,
        ..Default::default()
    }))
}

fn hydrate_feature_of_interest(row: &PgRow, prefix: &str) -> Result<Entity, ApiError> {
    Ok(Entity::FeatureOfInterest(FeatureOfInterest {
        id: row.try_get(format!("{prefix}_id").as_str())?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        description: row.try_get(format!("{prefix}_description").as_str())?,
        encoding_type: row.try_get(format!("{prefix}_encodingtype").as_str())?,
        feature: geo(row, &format!("{prefix}_feature"))?,
        original_location_id: row.try_get(format!("{prefix}_original_location_id").as_str())?,
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_addressable_kind_has_an_entry_with_an_id_field() {
        for &kind in EntityKind::ADDRESSABLE {
            let e = entry(kind);
            assert_eq!(e.kind, kind);
            assert!(e.fields.iter().any(|f| f.name == "id"));
        }
    }

    #[test]
    fn column_aliases_are_unique_and_whitespace_free() {
        for &kind in EntityKind::ADDRESSABLE {
            let e = entry(kind);
            let prefix = format!("{}_q0", e.table);
            let mut seen = HashSet::new();
            for field in e.fields {
                let alias = field.column_alias(&prefix);
                assert!(!alias.chars().any(char::is_whitespace), "alias {alias} has whitespace");
                assert!(seen.insert(alias.clone()), "duplicate alias {alias} for {kind:?}");
            }
        }
    }

    #[test]
    fn every_direct_relation_has_a_join_fragment() {
        use EntityKind::*;
        let pairs = [
            (Thing, Location),
            (Location, Thing),
            (Thing, HistoricalLocation),
            (HistoricalLocation, Thing),
            (Location, HistoricalLocation),
            (HistoricalLocation, Location),
            (Thing, Datastream),
            (Datastream, Thing),
            (Sensor, Datastream),
            (Datastream, Sensor),
            (ObservedProperty, Datastream),
            (Datastream, ObservedProperty),
            (Datastream, Observation),
            (Observation, Datastream),
            (FeatureOfInterest, Observation),
            (Observation, FeatureOfInterest),
        ];
        for (a, b) in pairs {
            assert!(join_fragment(a, b).is_ok(), "missing join fragment {a}/{b}");
        }
    }

    #[test]
    fn undeclared_relation_is_rejected() {
        let err = join_fragment(EntityKind::Thing, EntityKind::Sensor).unwrap_err();
        assert!(matches!(err, ApiError::NoSuchRelation(_)));
    }

    #[test]
    fn field_by_name_finds_select_able_fields_only() {
        assert!(field_by_name(EntityKind::Thing, "name").is_some());
        assert!(field_by_name(EntityKind::Thing, "nonexistent").is_none());
    }
}
