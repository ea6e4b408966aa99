//! # Knowledge Graph Model
//!
//! DTOs that cross every boundary: store ↔ planner ↔ service ↔ caller.
//!
//! Design rule: this module is pure data. No I/O, no state, no async.

pub mod actor;
pub mod element;
pub mod entity;
pub mod ids;
pub mod property_map;
pub mod relationship;
pub mod value;

pub use actor::Actor;
pub use element::Element;
pub use entity::Entity;
pub use property_map::{properties, PropertyMap};
pub use relationship::{
    validate_confidence, Direction, FieldPatch, RelationMeta, Relationship, IMMUTABLE_FIELDS,
};
pub use value::Value;
