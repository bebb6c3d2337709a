//! Entity layer modules.
//!
//! This module groups entity identity and natural-key resolution.

pub mod entity;
pub mod resolution;

pub use entity::{normalize_key, Entity, EntityType, SurrogateId};
pub use resolution::{KeyResolver, Resolution};
