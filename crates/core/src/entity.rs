//! Entity types held in the relational store.
//!
//! Rows are created by `Create*` mutations, never updated in place, and
//! removed only by `Delete*` mutations addressed by id. The id is the
//! caller-supplied identifier parsed as an integer; the store does not mint
//! its own keys (see DESIGN.md for the resolved id policy).

use serde::{Deserialize, Serialize};

/// The entity types the pipeline knows about, one consumer each.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Restaurant,
}

impl EntityKind {
    /// Table owned by this entity's consumer.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Restaurant => "restaurants",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// A restaurant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub cuisine: String,
}
