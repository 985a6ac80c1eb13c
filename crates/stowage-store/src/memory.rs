use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{EntityRef, EntityStore, Group, PROPERTY_UUID, Record, StoreError, StoredEntity};

struct MemoryEntity {
  kind: String,
  properties: Map<String, Value>,
  dictionaries: HashMap<String, Map<String, Value>>,
}

struct MemoryGroup {
  name: String,
  members: BTreeSet<Uuid>,
}

/// In-memory [`EntityStore`] backed by concurrent maps. Used as the test
/// double for the pipeline and as the CLI rehearsal target; real deployments
/// put a durable store behind the same trait.
#[derive(Default)]
pub struct MemoryStore {
  entities: DashMap<Uuid, MemoryEntity>,
  groups: DashMap<Uuid, MemoryGroup>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entity_count(&self) -> usize {
    self.entities.len()
  }

  pub fn group_count(&self) -> usize {
    self.groups.len()
  }

  /// Snapshot of a named dictionary, if the entity has one.
  pub fn dictionary(&self, id: Uuid, name: &str) -> Option<Map<String, Value>> {
    self
      .entities
      .get(&id)
      .and_then(|entity| entity.dictionaries.get(name).cloned())
  }

  /// Snapshot of a group's member ids.
  pub fn group_members(&self, id: Uuid) -> Option<Vec<Uuid>> {
    self
      .groups
      .get(&id)
      .map(|group| group.members.iter().copied().collect())
  }
}

#[async_trait]
impl EntityStore for MemoryStore {
  async fn upsert(&self, id: Uuid, kind: &str, properties: Record) -> Result<(), StoreError> {
    match self.entities.entry(id) {
      Entry::Occupied(_) => Err(StoreError::Duplicate {
        id,
        kind: kind.to_string(),
        property: PROPERTY_UUID.to_string(),
      }),
      Entry::Vacant(slot) => {
        slot.insert(MemoryEntity {
          kind: kind.to_string(),
          properties: properties.into_properties(),
          dictionaries: HashMap::new(),
        });
        Ok(())
      }
    }
  }

  async fn get(&self, id: Uuid) -> Result<Option<StoredEntity>, StoreError> {
    Ok(self.entities.get(&id).map(|entity| StoredEntity {
      id,
      kind: entity.kind.clone(),
      properties: entity.properties.clone(),
    }))
  }

  async fn entity_ref(&self, id: Uuid) -> Result<EntityRef, StoreError> {
    self
      .entities
      .get(&id)
      .map(|entity| EntityRef {
        id,
        kind: entity.kind.clone(),
      })
      .ok_or(StoreError::NotFound { id })
  }

  async fn add_to_dictionary(
    &self,
    entity: &EntityRef,
    name: &str,
    entries: Map<String, Value>,
  ) -> Result<(), StoreError> {
    let mut stored = self
      .entities
      .get_mut(&entity.id)
      .ok_or(StoreError::NotFound { id: entity.id })?;
    let dictionary = stored.dictionaries.entry(name.to_string()).or_default();
    for (key, value) in entries {
      dictionary.insert(key, value);
    }
    Ok(())
  }

  async fn group(&self, id: Uuid) -> Result<Option<Group>, StoreError> {
    Ok(self.groups.get(&id).map(|group| Group {
      id,
      name: group.name.clone(),
      members: group.members.iter().copied().collect(),
    }))
  }

  async fn create_group(
    &self,
    id: Uuid,
    name: &str,
    founder: &EntityRef,
  ) -> Result<(), StoreError> {
    match self.groups.entry(id) {
      Entry::Occupied(_) => Err(StoreError::Duplicate {
        id,
        kind: "group".to_string(),
        property: PROPERTY_UUID.to_string(),
      }),
      Entry::Vacant(slot) => {
        debug!(group = name, founder = %founder, "creating group");
        slot.insert(MemoryGroup {
          name: name.to_string(),
          members: BTreeSet::from([founder.id]),
        });
        Ok(())
      }
    }
  }

  async fn attach_member(&self, group_id: Uuid, member: &EntityRef) -> Result<(), StoreError> {
    let mut group = self
      .groups
      .get_mut(&group_id)
      .ok_or(StoreError::NotFound { id: group_id })?;
    group.members.insert(member.id);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(id: Uuid, kind: &str) -> Record {
    let value = json!({ "uuid": id.to_string(), "type": kind, "username": "alice" });
    match value {
      Value::Object(map) => Record::new(map),
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn upsert_rejects_duplicate_id() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();

    store.upsert(id, "user", record(id, "user")).await.unwrap();
    let err = store
      .upsert(id, "user", record(id, "user"))
      .await
      .unwrap_err();

    assert!(err.is_duplicate());
    assert_eq!(store.entity_count(), 1);
  }

  #[tokio::test]
  async fn dictionary_merge_overwrites_existing_keys() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();
    store.upsert(id, "user", record(id, "user")).await.unwrap();
    let entity = store.entity_ref(id).await.unwrap();

    let mut first = Map::new();
    first.insert("role".to_string(), json!("viewer"));
    first.insert("team".to_string(), json!("core"));
    store
      .add_to_dictionary(&entity, "settings", first)
      .await
      .unwrap();

    let mut second = Map::new();
    second.insert("role".to_string(), json!("admin"));
    store
      .add_to_dictionary(&entity, "settings", second)
      .await
      .unwrap();

    let dictionary = store.dictionary(id, "settings").unwrap();
    assert_eq!(dictionary.get("role"), Some(&json!("admin")));
    assert_eq!(dictionary.get("team"), Some(&json!("core")));
  }

  #[tokio::test]
  async fn create_group_includes_founder() {
    let store = MemoryStore::new();
    let user = Uuid::new_v4();
    store
      .upsert(user, "user", record(user, "user"))
      .await
      .unwrap();
    let founder = store.entity_ref(user).await.unwrap();

    let group_id = Uuid::new_v4();
    store
      .create_group(group_id, "staff", &founder)
      .await
      .unwrap();

    assert_eq!(store.group_members(group_id), Some(vec![user]));
    let err = store
      .create_group(group_id, "staff", &founder)
      .await
      .unwrap_err();
    assert!(err.is_duplicate());
  }

  #[tokio::test]
  async fn attach_member_requires_existing_group() {
    let store = MemoryStore::new();
    let user = Uuid::new_v4();
    store
      .upsert(user, "user", record(user, "user"))
      .await
      .unwrap();
    let member = store.entity_ref(user).await.unwrap();

    let missing = Uuid::new_v4();
    let err = store.attach_member(missing, &member).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { id } if id == missing));
  }
}
