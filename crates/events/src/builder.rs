//! Envelope builder: mutation call arguments → canonical envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dinesync_core::{PipelineError, PipelineResult};

use crate::envelope::{EVENT_SOURCE, EventEnvelope};
use crate::request::MutationRequest;

/// Acknowledgment returned to the mutation caller.
///
/// Confirms acceptance onto the bus, **not** persistence. Eventual
/// persistence failures surface through the dead-letter channel, never
/// synchronously to the original caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: String,
}

/// Pure transformation from a mutation request to an event envelope.
///
/// Building is side-effect free; publishing is the caller's job. The kind
/// set is a closed enum, so there is no "unrecognized kind" path to emit an
/// incomplete envelope through: the match below is exhaustive by
/// construction.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    source: String,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the source tag (tests, parallel deployments).
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Build an envelope from a request.
    ///
    /// Rejects an empty id at the gate, before anything reaches the bus.
    /// Every field value is sanitized for transport: control characters are
    /// escaped, printable text (quotes included) passes through untouched.
    pub fn build(&self, request: MutationRequest) -> PipelineResult<(EventEnvelope, Ack)> {
        if request.id().is_empty() {
            return Err(PipelineError::validation(format!(
                "{} rejected: empty id",
                request.kind()
            )));
        }

        let kind = request.kind();
        let ack = Ack {
            id: request.id().to_string(),
        };

        let fields: BTreeMap<String, String> = request
            .into_fields()
            .into_iter()
            .map(|(name, value)| (name, sanitize(&value)))
            .collect();

        tracing::debug!(kind = %kind, id = %ack.id, "envelope built");

        Ok((EventEnvelope::new(self.source.clone(), kind, fields), ack))
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self {
            source: EVENT_SOURCE.to_string(),
        }
    }
}

/// Escape control characters so every field value is transport-safe.
///
/// Printable characters, including quotes, are preserved exactly; injection
/// safety is the persistence layer's job (bound parameters), not this one's.
fn sanitize(value: &str) -> String {
    if !value.chars().any(char::is_control) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}
