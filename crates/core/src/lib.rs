pub mod error;
pub mod field_value;
pub mod ids;
pub mod record;
pub mod resolve;
pub mod schema;
pub mod timestamp;

pub use error::{CoreError, ValidationError};
pub use field_value::FieldValue;
pub use ids::*;
pub use record::EntityRecord;
pub use resolve::{FocusQuery, Resolution, resolve};
pub use schema::{EntitySchema, FieldKind, FieldRule, SchemaRegistry, ValidationRules};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};
