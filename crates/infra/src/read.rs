//! Read services.
//!
//! Stateless queries over current rows. These bypass the bus entirely and
//! never observe in-flight, unpersisted mutations. Failure is an explicit
//! `Err`, distinguishable from an empty result set.

use tracing::instrument;

use dinesync_core::{Restaurant, User};

use crate::store::{EntityStore, StoreError};

/// Store-backed read surface: `all_users` / `all_restaurants`.
#[derive(Debug, Clone)]
pub struct ReadService<S> {
    store: S,
}

impl<S> ReadService<S>
where
    S: EntityStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), err)]
    pub async fn all_users(&self) -> Result<Vec<User>, StoreError> {
        self.store.all_users().await
    }

    #[instrument(skip(self), err)]
    pub async fn all_restaurants(&self) -> Result<Vec<Restaurant>, StoreError> {
        self.store.all_restaurants().await
    }
}
