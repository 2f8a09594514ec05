//! The closed set of STA entity kinds and their nav-prop relations.
//!
//! `EntityKind` and `Entity` are the two ends of the tagged-variant design in
//! spec.md §9 ("Polymorphism over entity kinds") — the registry (see
//! `crate::registry`) attaches per-kind behaviour (table, select exprs,
//! joins, hydration) to these variants rather than scattering `match`
//! statements across call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of addressable STA entity kinds, plus the two hidden
/// link kinds used only inside join fragments (never surfaced in a path or
/// response — see spec.md §9 "Hidden link tables").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Thing,
    Location,
    HistoricalLocation,
    Sensor,
    ObservedProperty,
    Datastream,
    Observation,
    FeatureOfInterest,
    ThingToLocation,
    LocationToHistoricalLocation,
}

impl EntityKind {
    /// All kinds addressable from a resource path (excludes the link kinds).
    pub const ADDRESSABLE: &'static [EntityKind] = &[
        EntityKind::Thing,
        EntityKind::Location,
        EntityKind::HistoricalLocation,
        EntityKind::Sensor,
        EntityKind::ObservedProperty,
        EntityKind::Datastream,
        EntityKind::Observation,
        EntityKind::FeatureOfInterest,
    ];

    /// Parse the plural collection name used in URLs (e.g. `"Things"`).
    pub fn from_collection_name(name: &str) -> Option<EntityKind> {
        Some(match name {
            "Things" => EntityKind::Thing,
            "Locations" => EntityKind::Location,
            "HistoricalLocations" => EntityKind::HistoricalLocation,
            "Sensors" => EntityKind::Sensor,
            "ObservedProperties" => EntityKind::ObservedProperty,
            "Datastreams" => EntityKind::Datastream,
            "Observations" => EntityKind::Observation,
            "FeaturesOfInterest" => EntityKind::FeatureOfInterest,
            _ => return None,
        })
    }

    /// Parse a nav-prop name as seen after an entity segment (e.g.
    /// `Thing(1)/Datastreams`). Nav-prop names may be singular (`Thing`) or
    /// plural (`Datastreams`) depending on the cardinality of the relation.
    pub fn from_nav_prop(name: &str) -> Option<EntityKind> {
        Some(match name {
            "Things" | "Thing" => EntityKind::Thing,
            "Locations" | "Location" => EntityKind::Location,
            "HistoricalLocations" | "HistoricalLocation" => EntityKind::HistoricalLocation,
            "Sensors" | "Sensor" => EntityKind::Sensor,
            "ObservedProperties" | "ObservedProperty" => EntityKind::ObservedProperty,
            "Datastreams" | "Datastream" => EntityKind::Datastream,
            "Observations" | "Observation" => EntityKind::Observation,
            "FeaturesOfInterest" | "FeatureOfInterest" => EntityKind::FeatureOfInterest,
            _ => return None,
        })
    }

    /// The collection name as it appears in the canonical URL for this kind.
    pub fn collection_name(self) -> &'static str {
        match self {
            EntityKind::Thing => "Things",
            EntityKind::Location => "Locations",
            EntityKind::HistoricalLocation => "HistoricalLocations",
            EntityKind::Sensor => "Sensors",
            EntityKind::ObservedProperty => "ObservedProperties",
            EntityKind::Datastream => "Datastreams",
            EntityKind::Observation => "Observations",
            EntityKind::FeatureOfInterest => "FeaturesOfInterest",
            EntityKind::ThingToLocation => "thing_to_location",
            EntityKind::LocationToHistoricalLocation => "location_to_historicallocation",
        }
    }

    /// The nav-prop name this kind is reached by when it's the *child* of
    /// `parent` (used by the assembler to pick which slot to attach into).
    pub fn nav_prop_under(self, parent: EntityKind) -> &'static str {
        use EntityKind::*;
        match (parent, self) {
            (_, Thing) => "Thing",
            (Thing, Location) | (HistoricalLocation, Location) => "Locations",
            (_, Location) => "Locations",
            (_, HistoricalLocation) => "HistoricalLocations",
            (_, Sensor) => "Sensor",
            (_, ObservedProperty) => "ObservedProperty",
            (_, Datastream) => "Datastreams",
            (_, Observation) => "Observations",
            (_, FeatureOfInterest) => "FeatureOfInterest",
            (_, ThingToLocation) | (_, LocationToHistoricalLocation) => "",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection_name())
    }
}

/// A hydrated entity, tagged by kind. Each variant's shape matches the
/// semantic attributes in spec.md §3. Nav-props are filled in by the
/// assembler (`crate::assemble`) when `$expand` requested them; otherwise
/// they stay `None`/empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entity {
    Thing(Thing),
    Location(Location),
    HistoricalLocation(HistoricalLocation),
    Sensor(Sensor),
    ObservedProperty(ObservedProperty),
    Datastream(Datastream),
    Observation(Observation),
    FeatureOfInterest(FeatureOfInterest),
}

impl Entity {
    pub fn id(&self) -> i64 {
        match self {
            Entity::Thing(e) => e.id,
            Entity::Location(e) => e.id,
            Entity::HistoricalLocation(e) => e.id,
            Entity::Sensor(e) => e.id,
            Entity::ObservedProperty(e) => e.id,
            Entity::Datastream(e) => e.id,
            Entity::Observation(e) => e.id,
            Entity::FeatureOfInterest(e) => e.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Thing(_) => EntityKind::Thing,
            Entity::Location(_) => EntityKind::Location,
            Entity::HistoricalLocation(_) => EntityKind::HistoricalLocation,
            Entity::Sensor(_) => EntityKind::Sensor,
            Entity::ObservedProperty(_) => EntityKind::ObservedProperty,
            Entity::Datastream(_) => EntityKind::Datastream,
            Entity::Observation(_) => EntityKind::Observation,
            Entity::FeatureOfInterest(_) => EntityKind::FeatureOfInterest,
        }
    }

    /// Attach a hydrated child entity under this entity's nav-prop slot for
    /// `child_kind`. Used exclusively by the row assembler (§4.5); panics if
    /// called with a kind this entity has no slot for, which would be an
    /// assembler bug, not user-reachable.
    pub fn attach_child(&mut self, child_kind: EntityKind, child: Entity) {
        macro_rules! push_or_set {
            ($slot:expr) => {{
                $slot.get_or_insert_with(Vec::new).push(child);
            }};
        }
        use EntityKind::*;
        match (self, child_kind) {
            (Entity::Thing(t), Location) => push_or_set!(t.locations),
            (Entity::Thing(t), HistoricalLocation) => push_or_set!(t.historical_locations),
            (Entity::Thing(t), Datastream) => push_or_set!(t.datastreams),
            (Entity::Location(l), Thing) => push_or_set!(l.things),
            (Entity::Location(l), HistoricalLocation) => push_or_set!(l.historical_locations),
            (Entity::HistoricalLocation(h), Thing) => h.thing = Some(Box::new(child)),
            (Entity::HistoricalLocation(h), Location) => push_or_set!(h.locations),
            (Entity::Sensor(s), Datastream) => push_or_set!(s.datastreams),
            (Entity::ObservedProperty(o), Datastream) => push_or_set!(o.datastreams),
            (Entity::Datastream(d), Thing) => d.thing = Some(Box::new(child)),
            (Entity::Datastream(d), Sensor) => d.sensor = Some(Box::new(child)),
            (Entity::Datastream(d), ObservedProperty) => d.observed_property = Some(Box::new(child)),
            (Entity::Datastream(d), Observation) => push_or_set!(d.observations),
            (Entity::Observation(o), Datastream) => o.datastream = Some(Box::new(child)),
            (Entity::Observation(o), FeatureOfInterest) => o.feature_of_interest = Some(Box::new(child)),
            (Entity::FeatureOfInterest(f), Observation) => push_or_set!(f.observations),
            (this, kind) => unreachable!(
                "assembler requested an invalid attach: {:?} has no slot for {kind:?}",
                this.kind()
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Thing {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub properties: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Locations")]
    pub locations: Option<Vec<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "HistoricalLocations")]
    pub historical_locations: Option<Vec<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Datastreams")]
    pub datastreams: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "encodingType")]
    pub encoding_type: String,
    pub location: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Things")]
    pub things: Option<Vec<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "HistoricalLocations")]
    pub historical_locations: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoricalLocation {
    pub id: i64,
    pub time: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "thingID")]
    pub thing_id: i64,
    #[serde(rename = "locationID")]
    pub location_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Thing")]
    pub thing: Option<Box<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Locations")]
    pub locations: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Sensor {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "encodingType")]
    pub encoding_type: String,
    pub metadata: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Datastreams")]
    pub datastreams: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservedProperty {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub definition: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Datastreams")]
    pub datastreams: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Datastream {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "unitOfMeasurement")]
    pub unit_of_measurement: serde_json::Value,
    #[serde(rename = "observationType")]
    pub observation_type: String,
    #[serde(rename = "observedArea")]
    pub observed_area: Option<serde_json::Value>,
    #[serde(rename = "phenomenonTime")]
    pub phenomenon_time: Option<String>,
    #[serde(rename = "resultTime")]
    pub result_time: Option<String>,
    #[serde(rename = "thingID")]
    pub thing_id: i64,
    #[serde(rename = "sensorID")]
    pub sensor_id: i64,
    #[serde(rename = "observedPropertyID")]
    pub observed_property_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Thing")]
    pub thing: Option<Box<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Sensor")]
    pub sensor: Option<Box<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "ObservedProperty")]
    pub observed_property: Option<Box<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Observations")]
    pub observations: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Observation {
    pub id: i64,
    #[serde(rename = "phenomenonTime")]
    pub phenomenon_time: Option<serde_json::Value>,
    #[serde(rename = "resultTime")]
    pub result_time: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    #[serde(rename = "validTime")]
    pub valid_time: Option<serde_json::Value>,
    #[serde(rename = "resultQuality")]
    pub result_quality: Option<serde_json::Value>,
    pub parameters: Option<serde_json::Value>,
    #[serde(rename = "datastreamID")]
    pub datastream_id: i64,
    #[serde(rename = "featureOfInterestID")]
    pub feature_of_interest_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Datastream")]
    pub datastream: Option<Box<Entity>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "FeatureOfInterest")]
    pub feature_of_interest: Option<Box<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeatureOfInterest {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "encodingType")]
    pub encoding_type: String,
    pub feature: serde_json::Value,
    #[serde(rename = "originalLocationID")]
    pub original_location_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Observations")]
    pub observations: Option<Vec<Entity>>,
}

/// Directly-related (A, B) pairs, direction-aware, as enumerated in
/// spec.md §3 "Relationships". Used by the path parser to validate adjacent
/// segments and by the registry to know which `joinFragment` calls are legal.
pub fn is_direct_relation(a: EntityKind, b: EntityKind) -> bool {
    use EntityKind::*;
    matches!(
        (a, b),
        (Thing, Location)
            | (Location, Thing)
            | (Thing, HistoricalLocation)
            | (HistoricalLocation, Thing)
            | (Location, HistoricalLocation)
            | (HistoricalLocation, Location)
            | (Thing, Datastream)
            | (Datastream, Thing)
            | (Sensor, Datastream)
            | (Datastream, Sensor)
            | (ObservedProperty, Datastream)
            | (Datastream, ObservedProperty)
            | (Datastream, Observation)
            | (Observation, Datastream)
            | (FeatureOfInterest, Observation)
            | (Observation, FeatureOfInterest)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_roundtrips_through_parser() {
        for &kind in EntityKind::ADDRESSABLE {
            let name = kind.collection_name();
            assert_eq!(EntityKind::from_collection_name(name), Some(kind));
        }
    }

    #[test]
    fn thing_sensor_is_not_a_direct_relation() {
        assert!(!is_direct_relation(EntityKind::Thing, EntityKind::Sensor));
        assert!(!is_direct_relation(EntityKind::Sensor, EntityKind::Thing));
    }

    #[test]
    fn thing_datastream_is_direct() {
        assert!(is_direct_relation(EntityKind::Thing, EntityKind::Datastream));
    }
}
