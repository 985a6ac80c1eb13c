use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Property key holding an entity's globally unique identifier.
pub const PROPERTY_UUID: &str = "uuid";
/// Property key holding an entity's type tag.
pub const PROPERTY_TYPE: &str = "type";

/// One importable entity: a flattened property map carrying its identifier
/// and type tag. Immutable once enqueued; consumed exactly once by a writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
  properties: Map<String, Value>,
}

impl Record {
  pub fn new(properties: Map<String, Value>) -> Self {
    Self { properties }
  }

  /// The record's identifier, if present and parseable.
  pub fn uuid(&self) -> Option<Uuid> {
    self
      .properties
      .get(PROPERTY_UUID)
      .and_then(Value::as_str)
      .and_then(|raw| Uuid::parse_str(raw).ok())
  }

  /// The record's type tag, if present.
  pub fn kind(&self) -> Option<&str> {
    self.properties.get(PROPERTY_TYPE).and_then(Value::as_str)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.properties.get(key)
  }

  pub fn properties(&self) -> &Map<String, Value> {
    &self.properties
  }

  pub fn into_properties(self) -> Map<String, Value> {
    self.properties
  }
}

impl From<Map<String, Value>> for Record {
  fn from(properties: Map<String, Value>) -> Self {
    Self { properties }
  }
}

/// Opaque handle to an entity known to exist in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
  pub id: Uuid,
  pub kind: String,
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.kind, self.id)
  }
}

/// A stored entity as returned by point lookups.
#[derive(Debug, Clone)]
pub struct StoredEntity {
  pub id: Uuid,
  pub kind: String,
  pub properties: Map<String, Value>,
}

impl StoredEntity {
  pub fn entity_ref(&self) -> EntityRef {
    EntityRef {
      id: self.id,
      kind: self.kind.clone(),
    }
  }
}

/// A membership group with its current member ids.
#[derive(Debug, Clone)]
pub struct Group {
  pub id: Uuid,
  pub name: String,
  pub members: Vec<Uuid>,
}
