use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::counters::ImportCounters;
use crate::pool::{WorkerGuard, WorkerHandle};
use crate::queue::BatchQueue;
use stowage_store::{EntityRef, EntityStore};

pub const MEMBERSHIPS_KEY: &str = "memberships";
pub const DICTIONARIES_KEY: &str = "dictionaries";

/// An entity reference paired with relationship data to apply once the
/// entity exists. Attempted at most once.
#[derive(Debug, Clone)]
pub struct MetadataTask {
  pub entity: EntityRef,
  pub payload: Map<String, Value>,
}

/// Applies membership and dictionary relationships for resolved entities.
///
/// The two relationship kinds are independent sub-steps: a failure in one
/// never blocks the other, and a failure on a single membership or
/// dictionary is logged while the loop continues. Duplicate-already-exists
/// outcomes are the store's idempotency at work and are treated as success.
pub struct MetadataImporter {
  store: Arc<dyn EntityStore>,
  counters: ImportCounters,
}

impl MetadataImporter {
  pub fn new(store: Arc<dyn EntityStore>, counters: ImportCounters) -> Self {
    Self { store, counters }
  }

  pub async fn apply(&self, task: &MetadataTask) {
    self.apply_memberships(task).await;
    self.apply_dictionaries(task).await;
  }

  async fn apply_memberships(&self, task: &MetadataTask) {
    let entries = match task.payload.get(MEMBERSHIPS_KEY) {
      Some(Value::Array(entries)) if !entries.is_empty() => entries,
      _ => {
        warn!(entity = %task.entity, "entity has no memberships");
        return;
      }
    };

    // The principal must still exist before we attach it anywhere.
    match self.store.get(task.entity.id).await {
      Ok(Some(_)) => {}
      Ok(None) => {
        error!(entity = %task.entity, "entity not found, not adding to groups");
        return;
      }
      Err(e) => {
        error!(entity = %task.entity, error = %e, "principal lookup failed, skipping memberships");
        self.counters.metadata_failures.fetch_add(1, Ordering::Relaxed);
        return;
      }
    }

    for entry in entries {
      let Some(membership) = entry.as_object() else {
        warn!(entity = %task.entity, "membership entry is not a map, skipping");
        continue;
      };
      let group_id = membership
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok());
      let Some(group_id) = group_id else {
        warn!(entity = %task.entity, "membership entry has no usable group uuid, skipping");
        continue;
      };
      let name = membership
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();

      match self.store.group(group_id).await {
        Ok(None) => match self.store.create_group(group_id, name, &task.entity).await {
          Ok(()) => debug!(group = name, entity = %task.entity, "created group"),
          Err(e) if e.is_duplicate() => debug!(group = name, "group already exists"),
          Err(e) => {
            error!(group = name, entity = %task.entity, error = %e, "failed to create group");
            self.counters.metadata_failures.fetch_add(1, Ordering::Relaxed);
          }
        },
        Ok(Some(group)) => match self.store.attach_member(group_id, &task.entity).await {
          Ok(()) => debug!(group = group.name, entity = %task.entity, "attached to group"),
          Err(e) => {
            error!(group = group.name, entity = %task.entity, error = %e, "failed to attach to group");
            self.counters.metadata_failures.fetch_add(1, Ordering::Relaxed);
          }
        },
        Err(e) => {
          error!(%group_id, error = %e, "group lookup failed");
          self.counters.metadata_failures.fetch_add(1, Ordering::Relaxed);
        }
      }
    }
  }

  async fn apply_dictionaries(&self, task: &MetadataTask) {
    let dictionaries = match task.payload.get(DICTIONARIES_KEY) {
      Some(Value::Object(dictionaries)) if !dictionaries.is_empty() => dictionaries,
      _ => {
        warn!(entity = %task.entity, "entity has no dictionaries");
        return;
      }
    };

    for (name, value) in dictionaries {
      let Some(entries) = value.as_object() else {
        warn!(entity = %task.entity, dictionary = name, "dictionary value is not a map, skipping");
        continue;
      };
      match self
        .store
        .add_to_dictionary(&task.entity, name, entries.clone())
        .await
      {
        Ok(()) => debug!(entity = %task.entity, dictionary = name, "merged dictionary"),
        Err(e) => {
          error!(entity = %task.entity, dictionary = name, error = %e, "failed to import dictionary");
          self.counters.metadata_failures.fetch_add(1, Ordering::Relaxed);
        }
      }
    }
  }
}

#[derive(Clone)]
pub(crate) struct MetadataContext {
  pub store: Arc<dyn EntityStore>,
  pub queue: BatchQueue<MetadataTask>,
  pub counters: ImportCounters,
  pub poll_timeout: Duration,
  pub idle_backoff: Duration,
}

/// Metadata loop: same poll/idle skeleton as the writer, applying one
/// relationship task per dequeue.
pub(crate) async fn metadata_worker(
  ctx: MetadataContext,
  index: usize,
  handle: WorkerHandle,
  idle: Arc<AtomicUsize>,
) {
  let _guard = WorkerGuard::new("metadata", index);
  let importer = MetadataImporter::new(ctx.store.clone(), ctx.counters.clone());
  let mut applied = 0usize;
  let mut duration_sum = Duration::ZERO;

  while !handle.is_stopped() {
    let Some(task) = ctx.queue.take(ctx.poll_timeout).await else {
      if ctx.queue.is_closed() {
        break;
      }
      debug!(worker = index, "metadata queue empty");
      idle.fetch_add(1, Ordering::Relaxed);
      tokio::time::sleep(ctx.idle_backoff).await;
      continue;
    };
    idle.store(0, Ordering::Relaxed);

    let started = Instant::now();
    importer.apply(&task).await;
    ctx.counters.metadata_applied.fetch_add(1, Ordering::Relaxed);

    duration_sum += started.elapsed();
    applied += 1;
    if applied % 30 == 0 {
      info!(
        worker = index,
        applied,
        total = ctx.counters.metadata_applied.load(Ordering::Relaxed),
        avg_ms = duration_sum.as_millis() as u64 / applied as u64,
        "metadata progress"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use stowage_store::MemoryStore;

  async fn seeded_store() -> (Arc<MemoryStore>, EntityRef) {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    let record = match json!({ "uuid": id.to_string(), "type": "user" }) {
      Value::Object(map) => map.into(),
      _ => unreachable!(),
    };
    store.upsert(id, "user", record).await.unwrap();
    let entity = store.entity_ref(id).await.unwrap();
    (store, entity)
  }

  fn payload(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn applies_memberships_and_dictionaries() {
    let (store, entity) = seeded_store().await;
    let counters = ImportCounters::new();
    let importer = MetadataImporter::new(store.clone(), counters.clone());
    let group_id = Uuid::new_v4();

    let task = MetadataTask {
      entity: entity.clone(),
      payload: payload(json!({
        "memberships": [{"uuid": group_id.to_string(), "name": "staff"}],
        "dictionaries": {"settings": {"theme": "dark"}}
      })),
    };
    importer.apply(&task).await;

    assert_eq!(store.group_members(group_id), Some(vec![entity.id]));
    let dictionary = store.dictionary(entity.id, "settings").unwrap();
    assert_eq!(dictionary.get("theme"), Some(&json!("dark")));
    assert_eq!(counters.snapshot().metadata_failures, 0);
  }

  #[tokio::test]
  async fn dictionaries_apply_without_memberships() {
    let (store, entity) = seeded_store().await;
    let importer = MetadataImporter::new(store.clone(), ImportCounters::new());

    let task = MetadataTask {
      entity: entity.clone(),
      payload: payload(json!({ "dictionaries": {"roles": {"k": "v"}} })),
    };
    importer.apply(&task).await;

    let dictionary = store.dictionary(entity.id, "roles").unwrap();
    assert_eq!(dictionary.get("k"), Some(&json!("v")));
  }

  #[tokio::test]
  async fn existing_group_gains_a_member() {
    let (store, entity) = seeded_store().await;
    let (other_store_entity, founder) = {
      let id = Uuid::new_v4();
      let record = match json!({ "uuid": id.to_string(), "type": "user" }) {
        Value::Object(map) => map.into(),
        _ => unreachable!(),
      };
      store.upsert(id, "user", record).await.unwrap();
      let founder = store.entity_ref(id).await.unwrap();
      (id, founder)
    };

    let group_id = Uuid::new_v4();
    store
      .create_group(group_id, "staff", &founder)
      .await
      .unwrap();

    let importer = MetadataImporter::new(store.clone(), ImportCounters::new());
    let task = MetadataTask {
      entity: entity.clone(),
      payload: payload(json!({
        "memberships": [{"uuid": group_id.to_string(), "name": "staff"}]
      })),
    };
    importer.apply(&task).await;

    let members = store.group_members(group_id).unwrap();
    assert!(members.contains(&entity.id));
    assert!(members.contains(&other_store_entity));
  }

  #[tokio::test]
  async fn one_bad_dictionary_does_not_stop_the_rest() {
    let (store, entity) = seeded_store().await;
    let importer = MetadataImporter::new(store.clone(), ImportCounters::new());

    let task = MetadataTask {
      entity: entity.clone(),
      payload: payload(json!({
        "dictionaries": {"broken": 42, "settings": {"theme": "dark"}}
      })),
    };
    importer.apply(&task).await;

    assert!(store.dictionary(entity.id, "broken").is_none());
    let dictionary = store.dictionary(entity.id, "settings").unwrap();
    assert_eq!(dictionary.get("theme"), Some(&json!("dark")));
  }
}
