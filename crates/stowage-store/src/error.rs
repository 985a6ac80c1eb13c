use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("duplicate unique property {property} for {kind} {id}")]
  Duplicate {
    id: Uuid,
    kind: String,
    property: String,
  },

  #[error("entity {id} not found")]
  NotFound { id: Uuid },

  #[error("storage backend error: {0}")]
  Backend(String),
}

impl StoreError {
  pub fn is_duplicate(&self) -> bool {
    matches!(self, StoreError::Duplicate { .. })
  }
}
