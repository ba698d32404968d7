//! Canonical event envelope.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dinesync_core::{EntityKind, PipelineError};

/// Source tag stamped on every envelope this system emits.
///
/// Bus subscriptions filter on it, so foreign traffic sharing a channel is
/// never delivered to our consumers.
pub const EVENT_SOURCE: &str = "dinesync.mutations";

/// The closed set of mutation kinds carried across the bus.
///
/// Adding a kind is a compile-time exercise: every dispatch over this enum is
/// exhaustive, so there is no stringly-typed fallback path to fall into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    CreateUser,
    DeleteUser,
    CreateRestaurant,
    DeleteRestaurant,
}

impl MutationKind {
    /// All kinds, in wire-name order. Used to build the default subscription
    /// filter.
    pub const ALL: [MutationKind; 4] = [
        MutationKind::CreateUser,
        MutationKind::DeleteUser,
        MutationKind::CreateRestaurant,
        MutationKind::DeleteRestaurant,
    ];

    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::CreateUser => "CreateUser",
            MutationKind::DeleteUser => "DeleteUser",
            MutationKind::CreateRestaurant => "CreateRestaurant",
            MutationKind::DeleteRestaurant => "DeleteRestaurant",
        }
    }

    /// The entity whose consumer owns this kind.
    pub fn entity(&self) -> EntityKind {
        match self {
            MutationKind::CreateUser | MutationKind::DeleteUser => EntityKind::User,
            MutationKind::CreateRestaurant | MutationKind::DeleteRestaurant => {
                EntityKind::Restaurant
            }
        }
    }

    /// Whether this kind creates a row (as opposed to deleting one).
    pub fn is_create(&self) -> bool {
        matches!(self, MutationKind::CreateUser | MutationKind::CreateRestaurant)
    }
}

impl core::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CreateUser" => Ok(MutationKind::CreateUser),
            "DeleteUser" => Ok(MutationKind::DeleteUser),
            "CreateRestaurant" => Ok(MutationKind::CreateRestaurant),
            "DeleteRestaurant" => Ok(MutationKind::DeleteRestaurant),
            other => Err(PipelineError::unknown_kind(other)),
        }
    }
}

/// Canonical message unit carrying a mutation's kind and field data across
/// the bus.
///
/// Immutable once built (fields are private; there are no setters). The bus
/// mints no envelope id, so consumers must tolerate duplicate delivery;
/// idempotency lives on the persistence side, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    source: String,
    kind: MutationKind,
    fields: BTreeMap<String, String>,
}

impl EventEnvelope {
    pub fn new(
        source: impl Into<String>,
        kind: MutationKind,
        fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            fields,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Look up a single field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_round_trip() {
        for kind in MutationKind::ALL {
            assert_eq!(kind.as_str().parse::<MutationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_name_is_classified() {
        let err = "RenameUser".parse::<MutationKind>().unwrap_err();
        assert_eq!(err, PipelineError::unknown_kind("RenameUser"));
    }

    #[test]
    fn kinds_map_to_owning_entity() {
        assert_eq!(MutationKind::CreateUser.entity(), EntityKind::User);
        assert_eq!(MutationKind::DeleteUser.entity(), EntityKind::User);
        assert_eq!(MutationKind::CreateRestaurant.entity(), EntityKind::Restaurant);
        assert_eq!(MutationKind::DeleteRestaurant.entity(), EntityKind::Restaurant);
    }

    #[test]
    fn envelope_serializes_with_wire_shape() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), "1".to_string());
        fields.insert("name".to_string(), "Ada".to_string());

        let envelope = EventEnvelope::new(EVENT_SOURCE, MutationKind::CreateUser, fields);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["source"], EVENT_SOURCE);
        assert_eq!(json["kind"], "CreateUser");
        assert_eq!(json["fields"]["name"], "Ada");
    }
}
