//! Backing-store contract for the stowage import pipeline, plus an in-memory
//! reference implementation used by tests and the CLI harness.

mod error;
mod memory;
mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use types::{EntityRef, Group, PROPERTY_TYPE, PROPERTY_UUID, Record, StoredEntity};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// The store collaborator the import pipeline writes into.
///
/// Per-record operations are independent of each other; callers may invoke
/// them from any number of workers concurrently. Idempotency lives here:
/// a duplicate create surfaces as [`StoreError::Duplicate`] rather than a
/// second copy, and group creation is duplicate-tolerant in the same way.
#[async_trait]
pub trait EntityStore: Send + Sync {
  /// Create an entity keyed by `id` and `kind`. An entity that already
  /// exists yields [`StoreError::Duplicate`].
  async fn upsert(&self, id: Uuid, kind: &str, properties: Record) -> Result<(), StoreError>;

  /// Point lookup by identifier.
  async fn get(&self, id: Uuid) -> Result<Option<StoredEntity>, StoreError>;

  /// Resolve an identifier to an opaque reference, or [`StoreError::NotFound`].
  async fn entity_ref(&self, id: Uuid) -> Result<EntityRef, StoreError>;

  /// Merge `entries` into the entity's named dictionary, creating it on first
  /// use. Existing keys are overwritten.
  async fn add_to_dictionary(
    &self,
    entity: &EntityRef,
    name: &str,
    entries: Map<String, Value>,
  ) -> Result<(), StoreError>;

  /// Look up a group by identifier.
  async fn group(&self, id: Uuid) -> Result<Option<Group>, StoreError>;

  /// Create a group with `founder` as its first member. An existing group
  /// with the same id yields [`StoreError::Duplicate`].
  async fn create_group(
    &self,
    id: Uuid,
    name: &str,
    founder: &EntityRef,
  ) -> Result<(), StoreError>;

  /// Attach `member` to an existing group. Attaching an existing member is a
  /// no-op.
  async fn attach_member(&self, group_id: Uuid, member: &EntityRef) -> Result<(), StoreError>;
}
