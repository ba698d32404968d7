//! In-memory entity store.
//!
//! Intended for tests/dev. Mirrors the Postgres store's contract, including
//! the "relation does not exist" failure when a table is queried before its
//! schema has been ensured.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use dinesync_core::{EntityKind, Restaurant, User};

use super::r#trait::{EntityStore, StoreError};

#[derive(Debug, Default)]
struct State {
    schemas: HashSet<EntityKind>,
    users: BTreeMap<i64, User>,
    restaurants: BTreeMap<i64, Restaurant>,
}

/// In-memory entity store backed by lock-guarded maps.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<State>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::transient("store lock poisoned")
}

fn missing_relation(entity: EntityKind) -> StoreError {
    StoreError::permanent(format!("relation \"{}\" does not exist", entity.table_name()))
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn ensure_schema(&self, entity: EntityKind) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.schemas.insert(entity);
        Ok(())
    }

    async fn insert_user(&self, id: i64, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.schemas.contains(&EntityKind::User) {
            return Err(missing_relation(EntityKind::User));
        }
        if state.users.contains_key(&id) {
            return Ok(false);
        }
        state.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
            },
        );
        Ok(true)
    }

    async fn delete_user(&self, id: i64) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.schemas.contains(&EntityKind::User) {
            return Err(missing_relation(EntityKind::User));
        }
        Ok(state.users.remove(&id).map(|_| 1).unwrap_or(0))
    }

    async fn insert_restaurant(
        &self,
        id: i64,
        name: &str,
        address: &str,
        cuisine: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.schemas.contains(&EntityKind::Restaurant) {
            return Err(missing_relation(EntityKind::Restaurant));
        }
        if state.restaurants.contains_key(&id) {
            return Ok(false);
        }
        state.restaurants.insert(
            id,
            Restaurant {
                id,
                name: name.to_string(),
                address: address.to_string(),
                cuisine: cuisine.to_string(),
            },
        );
        Ok(true)
    }

    async fn delete_restaurant(&self, id: i64) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.schemas.contains(&EntityKind::Restaurant) {
            return Err(missing_relation(EntityKind::Restaurant));
        }
        Ok(state.restaurants.remove(&id).map(|_| 1).unwrap_or(0))
    }

    async fn all_users(&self) -> Result<Vec<User>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        if !state.schemas.contains(&EntityKind::User) {
            return Err(missing_relation(EntityKind::User));
        }
        Ok(state.users.values().cloned().collect())
    }

    async fn all_restaurants(&self) -> Result<Vec<Restaurant>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        if !state.schemas.contains(&EntityKind::Restaurant) {
            return Err(missing_relation(EntityKind::Restaurant));
        }
        Ok(state.restaurants.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn query_before_schema_is_a_permanent_error() {
        let store = InMemoryEntityStore::new();
        let err = store.all_users().await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent_under_concurrency() {
        let store = Arc::new(InMemoryEntityStore::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.ensure_schema(EntityKind::User).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(store.all_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_is_insert_if_absent() {
        let store = InMemoryEntityStore::new();
        store.ensure_schema(EntityKind::User).await.unwrap();

        assert!(store.insert_user(1, "Ada").await.unwrap());
        assert!(!store.insert_user(1, "Ada").await.unwrap());
        assert_eq!(store.all_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_row_is_a_no_op() {
        let store = InMemoryEntityStore::new();
        store.ensure_schema(EntityKind::Restaurant).await.unwrap();

        assert_eq!(store.delete_restaurant(999).await.unwrap(), 0);
        assert!(store.all_restaurants().await.unwrap().is_empty());
    }
}
