//! `dinesync-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the entity types carried through the mutation pipeline and the classified
//! error taxonomy every layer speaks.

pub mod entity;
pub mod error;

pub use entity::{EntityKind, Restaurant, User};
pub use error::{PipelineError, PipelineResult};
