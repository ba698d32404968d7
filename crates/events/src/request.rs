//! Tagged mutation requests.
//!
//! `MutationRequest` is the typed form a consumer works with after decoding
//! an envelope. It replaces the original string-switch dispatch: the variant
//! set is closed, so every consumer match is exhaustive.

use std::collections::BTreeMap;

use dinesync_core::{PipelineError, PipelineResult};

use crate::envelope::{EventEnvelope, MutationKind};

/// A mutation call's arguments, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    CreateUser { id: String, name: String },
    DeleteUser { id: String },
    CreateRestaurant {
        id: String,
        name: String,
        address: String,
        cuisine: String,
    },
    DeleteRestaurant { id: String },
}

impl MutationRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationRequest::CreateUser { .. } => MutationKind::CreateUser,
            MutationRequest::DeleteUser { .. } => MutationKind::DeleteUser,
            MutationRequest::CreateRestaurant { .. } => MutationKind::CreateRestaurant,
            MutationRequest::DeleteRestaurant { .. } => MutationKind::DeleteRestaurant,
        }
    }

    /// The caller-supplied id, present on every variant.
    pub fn id(&self) -> &str {
        match self {
            MutationRequest::CreateUser { id, .. }
            | MutationRequest::DeleteUser { id }
            | MutationRequest::CreateRestaurant { id, .. }
            | MutationRequest::DeleteRestaurant { id } => id,
        }
    }

    /// Flatten into the envelope field map: exactly the arguments relevant
    /// to this kind, nothing else.
    pub fn into_fields(self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        match self {
            MutationRequest::CreateUser { id, name } => {
                fields.insert("id".to_string(), id);
                fields.insert("name".to_string(), name);
            }
            MutationRequest::DeleteUser { id } => {
                fields.insert("id".to_string(), id);
            }
            MutationRequest::CreateRestaurant {
                id,
                name,
                address,
                cuisine,
            } => {
                fields.insert("id".to_string(), id);
                fields.insert("name".to_string(), name);
                fields.insert("address".to_string(), address);
                fields.insert("cuisine".to_string(), cuisine);
            }
            MutationRequest::DeleteRestaurant { id } => {
                fields.insert("id".to_string(), id);
            }
        }
        fields
    }

    /// Parse the caller-supplied id as the store's row key.
    ///
    /// The caller id is authoritative (it becomes the primary key), so a
    /// non-numeric id is a validation failure, not something to paper over.
    pub fn row_id(&self) -> PipelineResult<i64> {
        parse_row_id(self.id())
    }
}

pub(crate) fn parse_row_id(id: &str) -> PipelineResult<i64> {
    id.parse::<i64>()
        .map_err(|_| PipelineError::validation(format!("id is not an integer: {id:?}")))
}

fn required_field(envelope: &EventEnvelope, name: &str) -> PipelineResult<String> {
    match envelope.field(name) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        Some(_) => Err(PipelineError::validation(format!(
            "{} envelope has empty field {name:?}",
            envelope.kind()
        ))),
        None => Err(PipelineError::validation(format!(
            "{} envelope is missing field {name:?}",
            envelope.kind()
        ))),
    }
}

impl TryFrom<&EventEnvelope> for MutationRequest {
    type Error = PipelineError;

    /// Decode an envelope back into a typed request, validating that every
    /// field required by the kind is present and non-empty.
    fn try_from(envelope: &EventEnvelope) -> Result<Self, Self::Error> {
        let id = required_field(envelope, "id")?;

        match envelope.kind() {
            MutationKind::CreateUser => Ok(MutationRequest::CreateUser {
                id,
                name: required_field(envelope, "name")?,
            }),
            MutationKind::DeleteUser => Ok(MutationRequest::DeleteUser { id }),
            MutationKind::CreateRestaurant => Ok(MutationRequest::CreateRestaurant {
                id,
                name: required_field(envelope, "name")?,
                address: required_field(envelope, "address")?,
                cuisine: required_field(envelope, "cuisine")?,
            }),
            MutationKind::DeleteRestaurant => Ok(MutationRequest::DeleteRestaurant { id }),
        }
    }
}
