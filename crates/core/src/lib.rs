pub mod configuration;
pub mod document;
pub mod error;
pub mod field_value;
pub mod hlc;
pub mod ids;

pub use configuration::{CategoryDefinition, ProjectConfiguration, RelationDefinition};
pub use document::{
    is_hierarchical, Action, Document, Geometry, GeometryType, Resource, LIES_WITHIN, RECORDED_IN,
};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use hlc::{Hlc, HlcClock};
pub use ids::{ResourceId, RevisionId};
