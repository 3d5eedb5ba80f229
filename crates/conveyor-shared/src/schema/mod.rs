//! Declarative parameter validation for job submissions.

mod params;

pub use params::{FieldSpec, FieldType, ParameterSchema};
